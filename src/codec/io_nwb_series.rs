//! Hierarchical time-indexed pose series reader and writer.
//!
//! The container holds one group per (video, individual) pairing, the way
//! NWB-style pose estimation stores it: each group embeds its skeleton,
//! names its video, and carries per-node coordinate series aligned to one
//! shared frame-index vector. Decode slices the series back into discrete
//! labeled frames; groups that land on the same (video, frame) merge into
//! one frame with several instances.
//!
//! # Time base
//!
//! A group supplies either an explicit `frame_index` vector or `timestamps`
//! plus a `rate` (index = round(t * rate)). Either way the resulting index
//! vector must be strictly increasing; a violation aborts the decode. The
//! writer always emits explicit `frame_index`.
//!
//! # Scores
//!
//! Per-node `confidence` series carry point scores and a group-level
//! `score` series carries instance scores; a group with either decodes as
//! predicted, one with neither as user-labeled. Untracked instances encode
//! into anonymous groups.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::{DecodeStage, LabelsBuilder};
use crate::error::PoselabError;
use crate::model::{
    Instance, Labels, Point, Skeleton, Track, Video, VideoShape, VideoSource,
};

// ============================================================================
// Container schema types (internal to this module)
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
struct SeriesFile {
    groups: Vec<SeriesGroup>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SeriesGroup {
    name: String,
    video: SeriesVideo,

    /// Individual identity; absent for anonymous groups.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    track: Option<String>,

    skeleton: SeriesSkeleton,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    rate: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    timestamps: Option<Vec<f64>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    frame_index: Option<Vec<u64>>,

    nodes: Vec<SeriesNode>,

    /// Instance-level score per timestep.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    score: Option<Vec<Option<f64>>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SeriesVideo {
    filename: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    shape: Option<Vec<u64>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SeriesSkeleton {
    name: String,
    nodes: Vec<String>,
    /// Edges as 0-based node index pairs.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    edges: Vec<[usize; 2]>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SeriesNode {
    name: String,
    /// One [x, y] pair per timestep; null components mean not labeled.
    data: Vec<[Option<f64>; 2]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    confidence: Option<Vec<Option<f64>>>,
}

// ============================================================================
// Public API
// ============================================================================

/// Reads a `Labels` value from a pose series container file.
pub fn read_nwb_series(path: &Path) -> Result<Labels, PoselabError> {
    let file = File::open(path).map_err(PoselabError::Io)?;
    let reader = BufReader::new(file);
    let series: SeriesFile =
        serde_json::from_reader(reader).map_err(|source| PoselabError::SeriesParse {
            path: path.to_path_buf(),
            source,
        })?;
    series_to_labels(series, path)
}

/// Writes a `Labels` value as a pose series container file.
pub fn write_nwb_series(path: &Path, labels: &Labels) -> Result<(), PoselabError> {
    let file = File::create(path).map_err(PoselabError::Io)?;
    let writer = BufWriter::new(file);
    let series = labels_to_series(labels);
    serde_json::to_writer_pretty(writer, &series).map_err(|source| PoselabError::SeriesWrite {
        path: path.to_path_buf(),
        source,
    })
}

/// Reads a `Labels` value from series JSON text.
pub fn from_series_str(json: &str) -> Result<Labels, PoselabError> {
    let path = Path::new("<string>");
    let series: SeriesFile =
        serde_json::from_str(json).map_err(|source| PoselabError::SeriesParse {
            path: path.to_path_buf(),
            source,
        })?;
    series_to_labels(series, path)
}

/// Serializes a `Labels` value to series JSON text.
pub fn to_series_string(labels: &Labels) -> Result<String, PoselabError> {
    let series = labels_to_series(labels);
    serde_json::to_string_pretty(&series).map_err(|source| PoselabError::SeriesWrite {
        path: Path::new("<string>").to_path_buf(),
        source,
    })
}

// ============================================================================
// Decode
// ============================================================================

fn series_to_labels(series: SeriesFile, path: &Path) -> Result<Labels, PoselabError> {
    let mut builder = LabelsBuilder::new("nwb-series", path);

    for (group_pos, group) in series.groups.iter().enumerate() {
        // Registry stage. Every group embeds its skeleton; structural
        // dedup collapses the repeats into one registry entry.
        let mut skeleton =
            Skeleton::with_nodes(&group.skeleton.name, group.skeleton.nodes.iter().cloned())
                .map_err(|e| {
                    builder.malformed(
                        DecodeStage::Registries,
                        format!("group '{}': {}", group.name, e),
                    )
                })?;
        for [a, b] in &group.skeleton.edges {
            let (Some(source), Some(destination)) =
                (group.skeleton.nodes.get(*a), group.skeleton.nodes.get(*b))
            else {
                return Err(builder.malformed(
                    DecodeStage::Registries,
                    format!(
                        "group '{}' has edge [{}, {}] outside its {} node(s)",
                        group.name,
                        a,
                        b,
                        group.skeleton.nodes.len()
                    ),
                ));
            };
            let source = source.clone();
            let destination = destination.clone();
            skeleton.add_edge(&source, &destination).map_err(|e| {
                builder.malformed(
                    DecodeStage::Registries,
                    format!("group '{}': {}", group.name, e),
                )
            })?;
        }
        let skeleton_id = builder.intern_skeleton(format!("group:{group_pos}"), skeleton);

        let mut video = Video::media_file(&group.video.filename);
        if let Some(shape) = &group.video.shape {
            if let [frames, height, width, channels] = shape.as_slice() {
                video = video.with_shape(VideoShape::new(
                    *frames,
                    *height as u32,
                    *width as u32,
                    *channels as u32,
                ));
            }
        }
        let video = builder.intern_video(group.video.filename.clone(), video);

        let track = group.track.as_ref().map(|name| {
            builder.intern_track(format!("individual:{name}"), Track::new(name.clone()))
        });

        // Frame stage: resolve and check the shared index vector, then
        // slice the per-node series into per-frame instances.
        let index = resolve_index(&builder, group)?;

        let node_count = group.skeleton.nodes.len();
        let mut node_slots: Vec<Option<&SeriesNode>> = vec![None; node_count];
        for node in &group.nodes {
            let slot = group
                .skeleton
                .nodes
                .iter()
                .position(|n| n == &node.name)
                .ok_or_else(|| {
                    builder.malformed(
                        DecodeStage::Frames,
                        format!(
                            "group '{}' carries series for '{}' which is not a skeleton node",
                            group.name, node.name
                        ),
                    )
                })?;
            if node.data.len() != index.len() {
                return Err(builder.malformed(
                    DecodeStage::Frames,
                    format!(
                        "group '{}' node '{}' has {} sample(s) for {} frame indices",
                        group.name,
                        node.name,
                        node.data.len(),
                        index.len()
                    ),
                ));
            }
            node_slots[slot] = Some(node);
        }

        let predicted = group.score.is_some()
            || group.nodes.iter().any(|n| n.confidence.is_some());

        for (t, frame_idx) in index.iter().enumerate() {
            let mut points = Vec::with_capacity(node_count);
            for slot in &node_slots {
                let point = match slot {
                    Some(node) => {
                        let [x, y] = node.data[t];
                        match (x, y) {
                            (Some(x), Some(y)) => {
                                let confidence =
                                    node.confidence.as_ref().and_then(|c| c.get(t).copied());
                                match confidence.flatten() {
                                    Some(score) => Point::new(x, y).with_score(score),
                                    None => Point::new(x, y),
                                }
                            }
                            _ => Point::missing(),
                        }
                    }
                    None => Point::missing(),
                };
                points.push(point);
            }

            if points.iter().all(Point::is_missing) {
                continue;
            }

            let instance = {
                let skeleton = builder.registry().skeleton(skeleton_id).ok_or_else(|| {
                    builder.malformed(DecodeStage::Frames, "skeleton registry miss")
                })?;
                if predicted {
                    let score = group
                        .score
                        .as_ref()
                        .and_then(|s| s.get(t).copied())
                        .flatten()
                        .unwrap_or_else(|| {
                            let scores: Vec<f64> =
                                points.iter().filter_map(|p| p.score).collect();
                            if scores.is_empty() {
                                0.0
                            } else {
                                scores.iter().sum::<f64>() / scores.len() as f64
                            }
                        });
                    Instance::predicted(skeleton_id, skeleton, points, score)?
                } else {
                    Instance::user(skeleton_id, skeleton, points)?
                }
            };
            let instance = match track {
                Some(track) => instance.with_track(track),
                None => instance,
            };
            builder.link_frame(video, *frame_idx, vec![instance]);
        }
    }

    builder.finish()
}

/// Resolves a group's frame-index vector and enforces strict monotonicity.
fn resolve_index(builder: &LabelsBuilder, group: &SeriesGroup) -> Result<Vec<u64>, PoselabError> {
    let index: Vec<u64> = match (&group.frame_index, &group.timestamps, group.rate) {
        (Some(index), _, _) => index.clone(),
        (None, Some(timestamps), Some(rate)) => timestamps
            .iter()
            .map(|t| (t * rate).round() as u64)
            .collect(),
        _ => {
            return Err(builder.malformed(
                DecodeStage::Frames,
                format!(
                    "group '{}' supplies neither frame_index nor timestamps with a rate",
                    group.name
                ),
            ))
        }
    };
    if index.windows(2).any(|w| w[0] >= w[1]) {
        return Err(builder.malformed(
            DecodeStage::Frames,
            format!(
                "frame index vector of group '{}' is not strictly increasing",
                group.name
            ),
        ));
    }
    Ok(index)
}

// ============================================================================
// Encode
// ============================================================================

/// Group slot: a real track or the k-th anonymous slot of a frame.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Slot {
    Tracked(u32),
    Anonymous(u32),
}

fn labels_to_series(labels: &Labels) -> SeriesFile {
    // Accumulate (frame_idx, instance) runs per (video, slot, skeleton).
    // Frames iterate in sorted order, so each run's index vector comes out
    // strictly increasing by construction.
    let mut runs: BTreeMap<(u32, Slot, u32), Vec<(u64, Instance)>> = BTreeMap::new();

    for frame in labels.frames() {
        let mut anon = 0u32;
        for instance in &frame.instances {
            let slot = match instance.track {
                Some(track) => Slot::Tracked(track.as_u32()),
                None => {
                    let slot = Slot::Anonymous(anon);
                    anon += 1;
                    slot
                }
            };
            runs.entry((frame.video.as_u32(), slot, instance.skeleton.as_u32()))
                .or_default()
                .push((frame.frame_idx, instance.clone()));
        }
    }

    let mut groups = Vec::new();
    for ((video_raw, slot, skeleton_raw), run) in runs {
        let video = labels.video(crate::model::VideoId(video_raw));
        let skeleton = labels.skeleton(crate::model::SkeletonId(skeleton_raw));
        let Some(skeleton) = skeleton else { continue };

        let (track, name) = match slot {
            Slot::Tracked(raw) => {
                let name = labels
                    .track(crate::model::TrackId(raw))
                    .map(|t| t.name.clone())
                    .unwrap_or_else(|| format!("track{}", raw));
                (Some(name.clone()), name)
            }
            Slot::Anonymous(k) => (None, format!("untracked{}", k)),
        };

        let frame_index: Vec<u64> = run.iter().map(|(idx, _)| *idx).collect();
        let any_point_scores = run
            .iter()
            .any(|(_, i)| i.points().iter().any(|p| p.score.is_some()));
        let any_predicted = run.iter().any(|(_, i)| i.is_predicted());

        let nodes = skeleton
            .node_names()
            .enumerate()
            .map(|(node, node_name)| SeriesNode {
                name: node_name.to_string(),
                data: run
                    .iter()
                    .map(|(_, i)| {
                        let p = i.points()[node];
                        if p.is_missing() {
                            [None, None]
                        } else {
                            [Some(p.x), Some(p.y)]
                        }
                    })
                    .collect(),
                confidence: if any_point_scores {
                    Some(run.iter().map(|(_, i)| i.points()[node].score).collect())
                } else {
                    None
                },
            })
            .collect();

        groups.push(SeriesGroup {
            name,
            video: SeriesVideo {
                filename: video
                    .map(|v| match &v.source {
                        VideoSource::MediaFile { path } => path.display().to_string(),
                        other => other.describe(),
                    })
                    .unwrap_or_default(),
                shape: video.and_then(|v| v.shape).map(|s| {
                    vec![s.frames, s.height as u64, s.width as u64, s.channels as u64]
                }),
            },
            track,
            skeleton: SeriesSkeleton {
                name: skeleton.name.clone(),
                nodes: skeleton.node_names().map(str::to_string).collect(),
                edges: skeleton
                    .edges()
                    .map(|e| [e.source, e.destination])
                    .collect(),
            },
            rate: None,
            timestamps: None,
            frame_index: Some(frame_index),
            nodes,
            score: if any_predicted {
                Some(run.iter().map(|(_, i)| i.score()).collect())
            } else {
                None
            },
        });
    }

    SeriesFile { groups }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_series_json() -> &'static str {
        r#"{
            "groups": [
                {
                    "name": "female",
                    "video": {"filename": "session.mp4", "shape": [500, 480, 640, 3]},
                    "track": "female",
                    "skeleton": {"name": "fly", "nodes": ["head", "thorax"],
                                 "edges": [[0, 1]]},
                    "frame_index": [3, 5, 9],
                    "nodes": [
                        {"name": "head",
                         "data": [[1.0, 2.0], [3.0, 4.0], [null, null]]},
                        {"name": "thorax",
                         "data": [[5.0, 6.0], [null, null], [7.0, 8.0]]}
                    ]
                },
                {
                    "name": "male",
                    "video": {"filename": "session.mp4", "shape": [500, 480, 640, 3]},
                    "track": "male",
                    "skeleton": {"name": "fly", "nodes": ["head", "thorax"],
                                 "edges": [[0, 1]]},
                    "frame_index": [5],
                    "nodes": [
                        {"name": "head", "data": [[10.0, 11.0]],
                         "confidence": [0.9]},
                        {"name": "thorax", "data": [[12.0, 13.0]],
                         "confidence": [0.7]}
                    ],
                    "score": [0.85]
                }
            ]
        }"#
    }

    #[test]
    fn test_embedded_skeletons_deduplicate() {
        let labels = from_series_str(sample_series_json()).expect("parse");
        assert_eq!(labels.skeletons().len(), 1);
        assert_eq!(labels.videos().len(), 1);
        assert_eq!(labels.tracks().len(), 2);
    }

    #[test]
    fn test_series_slice_back_into_frames() {
        let labels = from_series_str(sample_series_json()).expect("parse");
        let keys: Vec<u64> = labels.frames().map(|f| f.frame_idx).collect();
        assert_eq!(keys, vec![3, 5, 9]);

        // Frame 5 carries one instance from each group.
        let video = labels.frames().next().unwrap().video;
        let frame = labels.find_frame(video, 5).unwrap();
        assert_eq!(frame.instances.len(), 2);
    }

    #[test]
    fn test_null_samples_decode_as_missing() {
        let labels = from_series_str(sample_series_json()).expect("parse");
        let video = labels.frames().next().unwrap().video;
        let frame = labels.find_frame(video, 5).unwrap();
        let female = frame
            .instances
            .iter()
            .find(|i| !i.is_predicted())
            .unwrap();
        assert_eq!(female.points()[0].x, 3.0);
        assert!(female.points()[1].is_missing());
    }

    #[test]
    fn test_confidence_yields_predicted_instances() {
        let labels = from_series_str(sample_series_json()).expect("parse");
        let video = labels.frames().next().unwrap().video;
        let frame = labels.find_frame(video, 5).unwrap();
        let male = frame.instances.iter().find(|i| i.is_predicted()).unwrap();
        assert_eq!(male.score(), Some(0.85));
        assert_eq!(male.points()[0].score, Some(0.9));
    }

    #[test]
    fn test_timestamps_with_rate_resolve_to_indices() {
        let json = r#"{
            "groups": [{
                "name": "a",
                "video": {"filename": "v.mp4"},
                "track": "a",
                "skeleton": {"name": "s", "nodes": ["n"]},
                "rate": 10.0,
                "timestamps": [0.1, 0.3, 0.7],
                "nodes": [{"name": "n", "data": [[1.0, 1.0], [2.0, 2.0], [3.0, 3.0]]}]
            }]
        }"#;
        let labels = from_series_str(json).expect("parse");
        let keys: Vec<u64> = labels.frames().map(|f| f.frame_idx).collect();
        assert_eq!(keys, vec![1, 3, 7]);
    }

    #[test]
    fn test_non_monotonic_index_is_malformed() {
        let json = r#"{
            "groups": [{
                "name": "a",
                "video": {"filename": "v.mp4"},
                "skeleton": {"name": "s", "nodes": ["n"]},
                "frame_index": [3, 3],
                "nodes": [{"name": "n", "data": [[1.0, 1.0], [2.0, 2.0]]}]
            }]
        }"#;
        let err = from_series_str(json).unwrap_err();
        assert!(matches!(err, PoselabError::Format { .. }));
    }

    #[test]
    fn test_length_mismatch_is_malformed() {
        let json = r#"{
            "groups": [{
                "name": "a",
                "video": {"filename": "v.mp4"},
                "skeleton": {"name": "s", "nodes": ["n"]},
                "frame_index": [1, 2],
                "nodes": [{"name": "n", "data": [[1.0, 1.0]]}]
            }]
        }"#;
        let err = from_series_str(json).unwrap_err();
        assert!(matches!(err, PoselabError::Format { .. }));
    }

    #[test]
    fn test_missing_time_base_is_malformed() {
        let json = r#"{
            "groups": [{
                "name": "a",
                "video": {"filename": "v.mp4"},
                "skeleton": {"name": "s", "nodes": ["n"]},
                "nodes": [{"name": "n", "data": []}]
            }]
        }"#;
        let err = from_series_str(json).unwrap_err();
        assert!(matches!(err, PoselabError::Format { .. }));
    }

    #[test]
    fn test_roundtrip_preserves_tracks_and_poses() {
        let original = from_series_str(sample_series_json()).expect("parse");
        let json = to_series_string(&original).expect("serialize");
        let restored = from_series_str(&json).expect("reparse");

        assert_eq!(original.skeletons(), restored.skeletons());
        assert_eq!(original.tracks(), restored.tracks());
        assert_eq!(original.len(), restored.len());

        let video = original.frames().next().unwrap().video;
        let a = original.find_frame(video, 5).unwrap();
        let rv = restored.frames().next().unwrap().video;
        let b = restored.find_frame(rv, 5).unwrap();
        assert_eq!(a.instances.len(), b.instances.len());
        for (x, y) in a.instances.iter().zip(b.instances.iter()) {
            assert!(x.same_pose(y));
        }
    }

    #[test]
    fn test_untracked_instances_encode_to_anonymous_groups() {
        use crate::model::LabeledFrame;

        let mut labels = Labels::new();
        let skeleton_id = labels.add_skeleton(Skeleton::with_nodes("s", ["n"]).unwrap());
        let video = labels.add_video(Video::media_file("v.mp4"));
        let a = Instance::user(
            skeleton_id,
            labels.skeleton(skeleton_id).unwrap(),
            vec![Point::new(1.0, 2.0)],
        )
        .unwrap();
        let b = Instance::user(
            skeleton_id,
            labels.skeleton(skeleton_id).unwrap(),
            vec![Point::new(3.0, 4.0)],
        )
        .unwrap();
        labels.insert_frame(LabeledFrame::new(video, 0, vec![a, b]));

        let json = to_series_string(&labels).expect("serialize");
        let restored = from_series_str(&json).expect("reparse");
        assert!(restored.tracks().is_empty());
        let frame = restored.frames().next().unwrap();
        assert_eq!(frame.instances.len(), 2);
    }
}
