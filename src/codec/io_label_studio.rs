//! Label Studio task-export reader and writer.
//!
//! A task corresponds to one labeled frame; its flattened `result` list
//! mixes rectangle results (one per individual), keypoint results (percent
//! coordinates), and `relation` entries attaching keypoints to their
//! individual. The video behind a task lives under `meta.video` as
//! `{filename, frame_idx, shape}`. Older exports use a `completions` key in
//! place of `annotations`; both are accepted.
//!
//! User annotations live under `annotations` (first entry wins, matching
//! upstream tooling); model output lives under `predictions`, one entry per
//! predicted instance so instance scores survive the trip.
//!
//! Keypoint coordinates are percent of the image: decode multiplies by
//! `original_width` / `original_height` over 100; encode divides, falling
//! back to a 100x100 reference frame when the video shape is unknown.

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::{DecodeStage, LabelsBuilder};
use crate::error::PoselabError;
use crate::model::{
    Instance, LabeledFrame, Labels, Point, Skeleton, SkeletonId, Track, TrackId, Video,
    VideoShape, VideoSource,
};

/// Rectangle label the writer uses when an instance has no track.
const ANONYMOUS_LABEL: &str = "instance_class";

/// Decode options.
///
/// Label Studio files carry no skeleton; by default one is synthesized from
/// the keypoint labels in first-seen order. Callers that know the intended
/// node order (and edges) supply it here instead.
#[derive(Debug, Default)]
pub struct LabelStudioOptions {
    /// Skeleton to decode against instead of synthesizing one.
    pub skeleton: Option<Skeleton>,
}

// ============================================================================
// Task schema types (internal to this module)
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
struct LsTask {
    #[serde(default)]
    data: serde_json::Map<String, serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    meta: Option<LsMeta>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    annotations: Vec<LsEntry>,

    /// Legacy alias for `annotations` seen in older exports.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    completions: Vec<LsEntry>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    predictions: Vec<LsEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct LsMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    video: Option<LsVideoMeta>,
}

#[derive(Debug, Serialize, Deserialize)]
struct LsVideoMeta {
    filename: String,
    frame_idx: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    shape: Option<Vec<u64>>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct LsEntry {
    #[serde(default)]
    result: Vec<LsResult>,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    ground_truth: bool,

    /// Model score on prediction entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    score: Option<f64>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct LsResult {
    #[serde(rename = "type")]
    kind: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    value: Option<LsValue>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    original_width: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    original_height: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    from_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    to_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    from_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    to_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    direction: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct LsValue {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    x: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    y: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    width: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    height: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    rotation: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    keypointlabels: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    rectanglelabels: Vec<String>,
}

// ============================================================================
// Public API
// ============================================================================

/// Reads a `Labels` value from a Label Studio task-export JSON file.
pub fn read_label_studio(
    path: &Path,
    options: &LabelStudioOptions,
) -> Result<Labels, PoselabError> {
    let file = File::open(path).map_err(PoselabError::Io)?;
    let reader = BufReader::new(file);
    let tasks: Vec<LsTask> =
        serde_json::from_reader(reader).map_err(|source| PoselabError::LabelStudioParse {
            path: path.to_path_buf(),
            source,
        })?;
    tasks_to_labels(tasks, path, options)
}

/// Writes a `Labels` value as a Label Studio task-export JSON file.
pub fn write_label_studio(path: &Path, labels: &Labels) -> Result<(), PoselabError> {
    let file = File::create(path).map_err(PoselabError::Io)?;
    let writer = BufWriter::new(file);
    let tasks = labels_to_tasks(labels);
    serde_json::to_writer_pretty(writer, &tasks).map_err(|source| {
        PoselabError::LabelStudioWrite {
            path: path.to_path_buf(),
            source,
        }
    })
}

/// Reads a `Labels` value from Label Studio JSON text.
pub fn from_label_studio_str(
    json: &str,
    options: &LabelStudioOptions,
) -> Result<Labels, PoselabError> {
    let path = Path::new("<string>");
    let tasks: Vec<LsTask> =
        serde_json::from_str(json).map_err(|source| PoselabError::LabelStudioParse {
            path: path.to_path_buf(),
            source,
        })?;
    tasks_to_labels(tasks, path, options)
}

/// Serializes a `Labels` value to Label Studio JSON text.
pub fn to_label_studio_string(labels: &Labels) -> Result<String, PoselabError> {
    let tasks = labels_to_tasks(labels);
    serde_json::to_string_pretty(&tasks).map_err(|source| PoselabError::LabelStudioWrite {
        path: Path::new("<string>").to_path_buf(),
        source,
    })
}

// ============================================================================
// Decode
// ============================================================================

fn tasks_to_labels(
    tasks: Vec<LsTask>,
    path: &Path,
    options: &LabelStudioOptions,
) -> Result<Labels, PoselabError> {
    let mut builder = LabelsBuilder::new("label-studio", path);

    // Registry stage. Without a caller-supplied skeleton, node order is the
    // first-seen order of keypoint labels across the result sets decode
    // will actually consume.
    let skeleton = match &options.skeleton {
        Some(skeleton) => skeleton.clone(),
        None => synthesize_skeleton(&tasks, &builder)?,
    };
    let skeleton_id = builder.intern_skeleton("skeleton", skeleton);

    for task in &tasks {
        let meta = task
            .meta
            .as_ref()
            .and_then(|m| m.video.as_ref())
            .ok_or_else(|| {
                builder.malformed(DecodeStage::Parse, "task carries no meta.video block")
            })?;

        let mut video = Video::media_file(&meta.filename);
        if let Some(shape) = &meta.shape {
            if let [frames, height, width, channels] = shape.as_slice() {
                video = video.with_shape(VideoShape::new(
                    *frames,
                    *height as u32,
                    *width as u32,
                    *channels as u32,
                ));
            }
        }
        let video = builder.intern_video(meta.filename.clone(), video);

        let entry_slot = user_entry(task).ok_or_else(|| {
            builder.malformed(
                DecodeStage::Parse,
                format!(
                    "task for frame {} of '{}' carries neither annotations nor predictions",
                    meta.frame_idx, meta.filename
                ),
            )
        })?;

        let mut instances = Vec::new();
        if let Some(entry) = entry_slot {
            let parsed = collect_instances(&builder, skeleton_id, &entry.result)?;
            instances.extend(realize(&mut builder, skeleton_id, parsed, None)?);
        }
        for prediction in &task.predictions {
            let parsed = collect_instances(&builder, skeleton_id, &prediction.result)?;
            let score = prediction.score.unwrap_or(0.0);
            instances.extend(realize(&mut builder, skeleton_id, parsed, Some(score))?);
        }

        builder.link_frame(video, meta.frame_idx, instances);
    }

    builder.finish()
}

/// First user annotation entry, honoring the legacy `completions` key.
/// `Ok(None)` when the task is prediction-only.
fn user_entry(task: &LsTask) -> Option<Option<&LsEntry>> {
    if let Some(entry) = task.annotations.first().or_else(|| task.completions.first()) {
        Some(Some(entry))
    } else if !task.predictions.is_empty() {
        Some(None)
    } else {
        None
    }
}

fn synthesize_skeleton(
    tasks: &[LsTask],
    builder: &LabelsBuilder,
) -> Result<Skeleton, PoselabError> {
    let mut names: Vec<String> = Vec::new();
    for task in tasks {
        let entries = user_entry(task).and_then(|e| e).into_iter();
        for entry in entries.chain(task.predictions.iter()) {
            for result in &entry.result {
                if result.kind != "keypointlabels" {
                    continue;
                }
                if let Some(label) = result
                    .value
                    .as_ref()
                    .and_then(|v| v.keypointlabels.first())
                {
                    if !names.iter().any(|n| n == label) {
                        names.push(label.clone());
                    }
                }
            }
        }
    }
    Skeleton::with_nodes("label-studio", names)
        .map_err(|e| builder.malformed(DecodeStage::Registries, e.to_string()))
}

/// One parsed instance: its rectangle label (if any) and the aligned points.
type ParsedInstance = (Option<String>, Vec<Point>);

/// Resolves one flattened result list into per-instance point arrays.
///
/// Keypoints related to a rectangle belong to that individual; leftover
/// keypoints form one extra untracked instance, which covers both
/// single-animal exports and stray points in multi-animal ones.
fn collect_instances(
    builder: &LabelsBuilder,
    skeleton_id: SkeletonId,
    results: &[LsResult],
) -> Result<Vec<ParsedInstance>, PoselabError> {
    let skeleton = builder
        .registry()
        .skeleton(skeleton_id)
        .ok_or_else(|| builder.malformed(DecodeStage::Frames, "skeleton registry miss"))?;

    let rectangles: Vec<&LsResult> = results
        .iter()
        .filter(|r| r.kind == "rectanglelabels")
        .collect();
    let keypoints: Vec<&LsResult> = results
        .iter()
        .filter(|r| r.kind == "keypointlabels")
        .collect();

    // Two-way relation map, so the file may record either direction.
    let mut relations: HashMap<&str, Vec<&str>> = HashMap::new();
    for result in results.iter().filter(|r| r.kind == "relation") {
        if let (Some(from), Some(to)) = (result.from_id.as_deref(), result.to_id.as_deref()) {
            relations.entry(from).or_default().push(to);
            relations.entry(to).or_default().push(from);
        }
    }

    let mut used: HashSet<&str> = HashSet::new();
    let mut parsed = Vec::new();

    for rectangle in &rectangles {
        let rect_id = rectangle.id.as_deref().unwrap_or("");
        let mut points = vec![Point::missing(); skeleton.node_count()];
        for related in relations.get(rect_id).into_iter().flatten().copied() {
            let Some(keypoint) = keypoints
                .iter()
                .find(|k| k.id.as_deref() == Some(related))
                .copied()
            else {
                continue;
            };
            used.insert(related);
            apply_keypoint(builder, skeleton, keypoint, &mut points)?;
        }
        let label = rectangle
            .value
            .as_ref()
            .and_then(|v| v.rectanglelabels.first().cloned());
        if points.iter().any(|p| !p.is_missing()) {
            parsed.push((label, points));
        }
    }

    let mut leftover = vec![Point::missing(); skeleton.node_count()];
    for &keypoint in keypoints
        .iter()
        .filter(|k| !used.contains(k.id.as_deref().unwrap_or("")))
    {
        apply_keypoint(builder, skeleton, keypoint, &mut leftover)?;
    }
    if leftover.iter().any(|p| !p.is_missing()) {
        parsed.push((None, leftover));
    }

    Ok(parsed)
}

/// Converts one keypoint result from percent to pixel coordinates and
/// stores it at its node's slot. NaN coordinates mean the annotator never
/// placed the point; the slot stays missing.
fn apply_keypoint(
    builder: &LabelsBuilder,
    skeleton: &Skeleton,
    keypoint: &LsResult,
    points: &mut [Point],
) -> Result<(), PoselabError> {
    let value = keypoint.value.as_ref().ok_or_else(|| {
        builder.malformed(DecodeStage::Frames, "keypoint result carries no value")
    })?;
    let label = value.keypointlabels.first().ok_or_else(|| {
        builder.malformed(DecodeStage::Frames, "keypoint result carries no label")
    })?;
    let node = skeleton.node_index(label).ok_or_else(|| {
        builder.malformed(
            DecodeStage::Frames,
            format!("keypoint label '{}' is not a node of the decode skeleton", label),
        )
    })?;

    let width = keypoint.original_width.unwrap_or(100.0);
    let height = keypoint.original_height.unwrap_or(100.0);
    let x = value.x.unwrap_or(f64::NAN) * width / 100.0;
    let y = value.y.unwrap_or(f64::NAN) * height / 100.0;
    if x.is_nan() || y.is_nan() {
        return Ok(());
    }
    points[node] = Point::new(x, y);
    Ok(())
}

/// Turns parsed instances into model instances, interning tracks for
/// rectangle labels other than the anonymous placeholder.
fn realize(
    builder: &mut LabelsBuilder,
    skeleton_id: SkeletonId,
    parsed: Vec<ParsedInstance>,
    prediction_score: Option<f64>,
) -> Result<Vec<Instance>, PoselabError> {
    let tracks: Vec<Option<TrackId>> = parsed
        .iter()
        .map(|(label, _)| match label {
            Some(label) if label != ANONYMOUS_LABEL && !label.is_empty() => Some(
                builder.intern_track(format!("individual:{label}"), Track::new(label.clone())),
            ),
            _ => None,
        })
        .collect();

    let mut instances = Vec::new();
    for ((_, points), track) in parsed.into_iter().zip(tracks) {
        let skeleton = builder
            .registry()
            .skeleton(skeleton_id)
            .ok_or_else(|| builder.malformed(DecodeStage::Frames, "skeleton registry miss"))?;
        let instance = match prediction_score {
            Some(score) => Instance::predicted(skeleton_id, skeleton, points, score)?,
            None => Instance::user(skeleton_id, skeleton, points)?,
        };
        instances.push(match track {
            Some(track) => instance.with_track(track),
            None => instance,
        });
    }
    Ok(instances)
}

// ============================================================================
// Encode
// ============================================================================

fn labels_to_tasks(labels: &Labels) -> Vec<LsTask> {
    labels.frames().map(|frame| frame_to_task(labels, frame)).collect()
}

fn frame_to_task(labels: &Labels, frame: &LabeledFrame) -> LsTask {
    let video = labels.video(frame.video);
    let (width, height) = video
        .and_then(|v| v.shape)
        .map(|s| (s.width as f64, s.height as f64))
        .unwrap_or((100.0, 100.0));

    let filename = video
        .map(|v| match &v.source {
            VideoSource::MediaFile { path } => path.display().to_string(),
            other => other.describe(),
        })
        .unwrap_or_default();
    let shape = video.and_then(|v| v.shape).map(|s| {
        vec![s.frames, s.height as u64, s.width as u64, s.channels as u64]
    });

    let mut user_results = Vec::new();
    let mut predictions = Vec::new();
    for (pos, instance) in frame.instances.iter().enumerate() {
        let prefix = if instance.is_predicted() {
            format!("frame{}_pred{}", frame.frame_idx, pos)
        } else {
            format!("frame{}_inst{}", frame.frame_idx, pos)
        };
        let results = instance_results(labels, instance, &prefix, width, height);
        if let Some(score) = instance.score() {
            predictions.push(LsEntry {
                result: results,
                ground_truth: false,
                score: Some(score),
            });
        } else {
            user_results.extend(results);
        }
    }

    let annotations = if user_results.is_empty() && !predictions.is_empty() {
        Vec::new()
    } else {
        vec![LsEntry {
            result: user_results,
            ground_truth: true,
            score: None,
        }]
    };

    LsTask {
        data: serde_json::Map::new(),
        meta: Some(LsMeta {
            video: Some(LsVideoMeta {
                filename,
                frame_idx: frame.frame_idx,
                shape,
            }),
        }),
        annotations,
        completions: Vec::new(),
        predictions,
    }
}

fn instance_results(
    labels: &Labels,
    instance: &Instance,
    prefix: &str,
    width: f64,
    height: f64,
) -> Vec<LsResult> {
    let rect_label = instance
        .track
        .and_then(|t| labels.track(t))
        .map(|t| t.name.clone())
        .unwrap_or_else(|| ANONYMOUS_LABEL.to_string());

    let mut results = vec![LsResult {
        kind: "rectanglelabels".to_string(),
        id: Some(prefix.to_string()),
        value: Some(LsValue {
            x: Some(0.0),
            y: Some(0.0),
            width: Some(100.0),
            height: Some(100.0),
            rotation: Some(0.0),
            rectanglelabels: vec![rect_label],
            ..LsValue::default()
        }),
        original_width: Some(width),
        original_height: Some(height),
        from_name: Some("individuals".to_string()),
        to_name: Some("image".to_string()),
        ..LsResult::default()
    }];

    let node_names: Vec<String> = labels
        .skeleton(instance.skeleton)
        .map(|s| s.node_names().map(str::to_string).collect())
        .unwrap_or_default();

    for (node, point) in instance.points().iter().enumerate() {
        if point.is_missing() {
            continue;
        }
        let point_id = format!("{}_kp{}", prefix, node);
        results.push(LsResult {
            kind: "keypointlabels".to_string(),
            id: Some(point_id.clone()),
            value: Some(LsValue {
                x: Some(point.x / width * 100.0),
                y: Some(point.y / height * 100.0),
                keypointlabels: vec![node_names
                    .get(node)
                    .cloned()
                    .unwrap_or_else(|| format!("node{}", node))],
                ..LsValue::default()
            }),
            original_width: Some(width),
            original_height: Some(height),
            from_name: Some("keypoint-label".to_string()),
            to_name: Some("image".to_string()),
            ..LsResult::default()
        });
        results.push(LsResult {
            kind: "relation".to_string(),
            from_id: Some(point_id),
            to_id: Some(prefix.to_string()),
            direction: Some("right".to_string()),
            ..LsResult::default()
        });
    }

    results
}

// ============================================================================
// Tests
// ============================================================================
