//! The native poselab container format.
//!
//! A schema-versioned JSON container with foreign-key tables: skeletons,
//! videos and tracks are stored exactly once, keyed by their position in the
//! table, and frames reference them by integer key. Instance points are
//! fixed-stride flat numeric arrays (`[x, y, visible, score]` per node) with
//! `null` standing in for NaN/absent, so missing points survive JSON's lack
//! of non-finite numbers.
//!
//! # Schema evolution
//!
//! The `version` tag is read before anything else; it is never inferred from
//! field presence. The reader accepts every published version (1 and 2) and
//! upgrades old shapes in memory; the writer always emits the current
//! version. Unknown top-level fields and unknown per-video fields are
//! preserved opaquely and re-emitted on encode.
//!
//! This is the only format with a lossless round-trip guarantee:
//! `decode(encode(L))` is structurally equal to `L`.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{DecodeStage, LabelsBuilder};
use crate::error::PoselabError;
use crate::model::{
    Edge, Instance, Labels, Node, Point, Scoring, Skeleton, SkeletonId, SymmetryPair, Track,
    TrackId, Video, VideoShape, VideoSource,
};

/// Current on-disk schema version.
pub const CURRENT_VERSION: u64 = 2;

/// Versions the reader accepts.
pub const SUPPORTED_VERSIONS: &str = "1, 2";

/// Provenance key under which unknown top-level container fields are
/// preserved between decode and re-encode.
const EXTRA_PROVENANCE_KEY: &str = "native.extra";

/// Point array stride: x, y, visible, score.
const POINT_STRIDE: usize = 4;

// ============================================================================
// Native schema types, current version (internal to this module)
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
struct NativeFile {
    version: u64,

    #[serde(default)]
    skeletons: Vec<NativeSkeleton>,

    #[serde(default)]
    videos: Vec<NativeVideo>,

    #[serde(default)]
    tracks: Vec<NativeTrack>,

    #[serde(default)]
    frames: Vec<NativeFrame>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    provenance: BTreeMap<String, Value>,

    /// Unknown newer fields, preserved opaquely.
    #[serde(flatten)]
    extra: BTreeMap<String, Value>,
}

#[derive(Debug, Serialize, Deserialize)]
struct NativeSkeleton {
    name: String,
    nodes: Vec<String>,
    #[serde(default)]
    edges: Vec<[usize; 2]>,
    #[serde(default)]
    symmetries: Vec<[usize; 2]>,
}

#[derive(Debug, Serialize, Deserialize)]
struct NativeVideo {
    source: VideoSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    shape: Option<[u64; 4]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    backend: Option<String>,
    #[serde(flatten)]
    extra: BTreeMap<String, Value>,
}

#[derive(Debug, Serialize, Deserialize)]
struct NativeTrack {
    name: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct NativeFrame {
    video: usize,
    frame_idx: u64,
    instances: Vec<NativeInstance>,
}

#[derive(Debug, Serialize, Deserialize)]
struct NativeInstance {
    skeleton: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    track: Option<usize>,
    /// Absent for user-labeled instances, present for predictions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    score: Option<f64>,
    /// Fixed-stride nullable array: [x, y, visible, score] per node.
    points: Vec<Option<f64>>,
}

// ============================================================================
// Native schema types, version 1 (historical)
// ============================================================================

#[derive(Debug, Deserialize)]
struct NativeFileV1 {
    #[serde(default)]
    skeletons: Vec<NativeSkeletonV1>,
    #[serde(default)]
    videos: Vec<NativeVideoV1>,
    #[serde(default)]
    tracks: Vec<String>,
    #[serde(default)]
    frames: Vec<NativeFrameV1>,
}

#[derive(Debug, Deserialize)]
struct NativeSkeletonV1 {
    name: String,
    nodes: Vec<String>,
    #[serde(default)]
    edges: Vec<[usize; 2]>,
    // Version 1 had no symmetry table.
}

#[derive(Debug, Deserialize)]
struct NativeVideoV1 {
    filename: String,
    #[serde(default)]
    shape: Option<[u64; 4]>,
}

#[derive(Debug, Deserialize)]
struct NativeFrameV1 {
    video: usize,
    frame_idx: u64,
    instances: Vec<NativeInstanceV1>,
}

#[derive(Debug, Deserialize)]
struct NativeInstanceV1 {
    skeleton: usize,
    #[serde(default)]
    track: Option<usize>,
    #[serde(default)]
    score: Option<f64>,
    points: Vec<NativePointV1>,
}

// Version 1 stored points as objects, not stride arrays.
#[derive(Debug, Deserialize)]
struct NativePointV1 {
    #[serde(default)]
    x: Option<f64>,
    #[serde(default)]
    y: Option<f64>,
    #[serde(default = "default_visible")]
    visible: bool,
}

fn default_visible() -> bool {
    true
}

// ============================================================================
// Public API
// ============================================================================

/// Reads a `Labels` value from a native container file.
pub fn read_native(path: &Path) -> Result<Labels, PoselabError> {
    let file = File::open(path).map_err(PoselabError::Io)?;
    let reader = BufReader::new(file);

    let raw: Value = serde_json::from_reader(reader).map_err(|source| PoselabError::NativeParse {
        path: path.to_path_buf(),
        source,
    })?;

    native_to_labels(raw, path)
}

/// Writes a `Labels` value to a native container file at the current schema
/// version.
pub fn write_native(path: &Path, labels: &Labels) -> Result<(), PoselabError> {
    let file = File::create(path).map_err(PoselabError::Io)?;
    let writer = BufWriter::new(file);

    let native = labels_to_native(labels);

    serde_json::to_writer_pretty(writer, &native).map_err(|source| PoselabError::NativeWrite {
        path: path.to_path_buf(),
        source,
    })
}

/// Reads a `Labels` value from a native container string.
///
/// Useful for testing without file I/O.
pub fn from_native_str(json: &str) -> Result<Labels, PoselabError> {
    let path = Path::new("<string>");
    let raw: Value = serde_json::from_str(json).map_err(|source| PoselabError::NativeParse {
        path: path.to_path_buf(),
        source,
    })?;
    native_to_labels(raw, path)
}

/// Serializes a `Labels` value to a native container string.
pub fn to_native_string(labels: &Labels) -> Result<String, PoselabError> {
    let native = labels_to_native(labels);
    serde_json::to_string_pretty(&native).map_err(|source| PoselabError::NativeWrite {
        path: Path::new("<string>").to_path_buf(),
        source,
    })
}

// ============================================================================
// Conversion: native -> Labels
// ============================================================================

fn native_to_labels(raw: Value, path: &Path) -> Result<Labels, PoselabError> {
    let builder = LabelsBuilder::new("native", path);

    // The version tag is read before anything else; field presence never
    // decides the schema shape.
    let version = raw
        .get("version")
        .and_then(Value::as_u64)
        .ok_or_else(|| builder.malformed(DecodeStage::Parse, "missing or non-integer 'version'"))?;

    let file = match version {
        1 => {
            let v1: NativeFileV1 = serde_json::from_value(raw).map_err(|source| {
                PoselabError::NativeParse {
                    path: path.to_path_buf(),
                    source,
                }
            })?;
            upgrade_v1(v1)
        }
        CURRENT_VERSION => serde_json::from_value(raw).map_err(|source| {
            PoselabError::NativeParse {
                path: path.to_path_buf(),
                source,
            }
        })?,
        other => {
            return Err(PoselabError::SchemaVersion {
                found: other,
                supported: SUPPORTED_VERSIONS,
            })
        }
    };

    file_to_labels(file, builder)
}

/// One upgrade path per historical version into the current shape.
fn upgrade_v1(v1: NativeFileV1) -> NativeFile {
    NativeFile {
        version: CURRENT_VERSION,
        skeletons: v1
            .skeletons
            .into_iter()
            .map(|s| NativeSkeleton {
                name: s.name,
                nodes: s.nodes,
                edges: s.edges,
                symmetries: Vec::new(),
            })
            .collect(),
        videos: v1
            .videos
            .into_iter()
            .map(|v| NativeVideo {
                source: VideoSource::MediaFile {
                    path: v.filename.into(),
                },
                shape: v.shape,
                backend: None,
                extra: BTreeMap::new(),
            })
            .collect(),
        tracks: v1.tracks.into_iter().map(|name| NativeTrack { name }).collect(),
        frames: v1
            .frames
            .into_iter()
            .map(|f| NativeFrame {
                video: f.video,
                frame_idx: f.frame_idx,
                instances: f
                    .instances
                    .into_iter()
                    .map(|i| NativeInstance {
                        skeleton: i.skeleton,
                        track: i.track,
                        score: i.score,
                        points: i
                            .points
                            .into_iter()
                            .flat_map(|p| {
                                // Version 1 defaulted `visible` to true even
                                // on coordinate-less points; a missing point
                                // is never visible.
                                let visible =
                                    p.visible && (p.x.is_some() || p.y.is_some());
                                [
                                    p.x,
                                    p.y,
                                    Some(if visible { 1.0 } else { 0.0 }),
                                    None,
                                ]
                            })
                            .collect(),
                    })
                    .collect(),
            })
            .collect(),
        provenance: BTreeMap::new(),
        extra: BTreeMap::new(),
    }
}

fn file_to_labels(file: NativeFile, mut builder: LabelsBuilder) -> Result<Labels, PoselabError> {
    // Registry stage: entity tables become arena entries, keyed by table
    // position.
    for (pos, skeleton) in file.skeletons.into_iter().enumerate() {
        let built = build_skeleton(skeleton, pos, &builder)?;
        builder.intern_skeleton(format!("skeleton:{pos}"), built);
    }
    for (pos, video) in file.videos.into_iter().enumerate() {
        let mut built = Video {
            source: video.source,
            shape: video.shape.map(|[frames, height, width, channels]| {
                VideoShape::new(frames, height as u32, width as u32, channels as u32)
            }),
            backend: video.backend,
            extra: video.extra,
        };
        built.extra.retain(|_, v| !v.is_null());
        builder.intern_video(format!("video:{pos}"), built);
    }
    for (pos, track) in file.tracks.into_iter().enumerate() {
        builder.intern_track(format!("track:{pos}"), Track::new(track.name));
    }

    // Frame stage: link by foreign key. Dangling keys are representable and
    // surface in the validation stage as referential-integrity errors.
    for frame in file.frames {
        // Dangling foreign keys stay representable here; the validation
        // stage reports them with full context.
        let video = builder
            .video_for(&format!("video:{}", frame.video))
            .unwrap_or(crate::model::VideoId(frame.video as u32));
        let mut instances = Vec::with_capacity(frame.instances.len());
        for (pos, instance) in frame.instances.into_iter().enumerate() {
            if instance.points.len() % POINT_STRIDE != 0 {
                return Err(builder.malformed(
                    DecodeStage::Frames,
                    format!(
                        "instance {} of frame (video {}, idx {}) has a point array of length {} \
                         (not a multiple of {})",
                        pos,
                        frame.video,
                        frame.frame_idx,
                        instance.points.len(),
                        POINT_STRIDE
                    ),
                ));
            }
            let points = instance
                .points
                .chunks_exact(POINT_STRIDE)
                .map(|chunk| Point {
                    x: chunk[0].unwrap_or(f64::NAN),
                    y: chunk[1].unwrap_or(f64::NAN),
                    visible: chunk[2].unwrap_or(0.0) != 0.0,
                    score: chunk[3],
                })
                .collect();
            let scoring = match instance.score {
                Some(score) => Scoring::Predicted { score },
                None => Scoring::UserLabeled,
            };
            // Table positions are interning keys, not arena ids: dedup can
            // collapse repeated skeleton structures and track names, so the
            // foreign keys go through the same lookups the tables were
            // registered under. Dangling positions fall back to a raw handle
            // for validation to report.
            let skeleton = builder
                .skeleton_for(&format!("skeleton:{}", instance.skeleton))
                .unwrap_or(SkeletonId(instance.skeleton as u32));
            let track = instance.track.map(|t| {
                builder
                    .track_for(&format!("track:{t}"))
                    .unwrap_or(TrackId(t as u32))
            });
            instances.push(Instance::from_parts(points, skeleton, track, scoring));
        }
        builder.link_frame(video, frame.frame_idx, instances);
    }

    for (key, value) in file.provenance {
        builder.set_provenance(key, value);
    }
    if !file.extra.is_empty() {
        builder.set_provenance(
            EXTRA_PROVENANCE_KEY,
            Value::Object(file.extra.into_iter().collect()),
        );
    }

    builder.finish()
}

fn build_skeleton(
    raw: NativeSkeleton,
    pos: usize,
    builder: &LabelsBuilder,
) -> Result<Skeleton, PoselabError> {
    let node_count = raw.nodes.len();
    for [a, b] in raw.edges.iter().chain(raw.symmetries.iter()) {
        if *a >= node_count || *b >= node_count {
            return Err(builder.malformed(
                DecodeStage::Registries,
                format!(
                    "skeleton table entry {} ('{}') references node index {} outside its {} node(s)",
                    pos,
                    raw.name,
                    (*a).max(*b),
                    node_count
                ),
            ));
        }
    }
    Ok(Skeleton::from_parts(
        raw.name,
        raw.nodes.into_iter().map(Node::new).collect(),
        raw.edges
            .into_iter()
            .map(|[s, d]| Edge::new(s, d))
            .collect(),
        raw.symmetries
            .into_iter()
            .map(|[a, b]| SymmetryPair::new(a, b))
            .collect(),
    ))
}

// ============================================================================
// Conversion: Labels -> native
// ============================================================================

fn labels_to_native(labels: &Labels) -> NativeFile {
    let skeletons = labels
        .skeletons()
        .iter()
        .map(|s| NativeSkeleton {
            name: s.name.clone(),
            nodes: s.node_names().map(str::to_string).collect(),
            edges: s.edges().map(|e| [e.source, e.destination]).collect(),
            symmetries: s.symmetries().map(|p| [p.first(), p.second()]).collect(),
        })
        .collect();

    let videos = labels
        .videos()
        .iter()
        .map(|v| NativeVideo {
            source: v.source.clone(),
            shape: v.shape.map(|s| {
                [s.frames, s.height as u64, s.width as u64, s.channels as u64]
            }),
            backend: v.backend.clone(),
            extra: v.extra.clone(),
        })
        .collect();

    let tracks = labels
        .tracks()
        .iter()
        .map(|t| NativeTrack {
            name: t.name.clone(),
        })
        .collect();

    // Frames come out of the sorted index, so output is deterministic.
    let frames = labels
        .frames()
        .map(|frame| NativeFrame {
            video: frame.video.as_u32() as usize,
            frame_idx: frame.frame_idx,
            instances: frame
                .instances
                .iter()
                .map(|instance| NativeInstance {
                    skeleton: instance.skeleton.as_u32() as usize,
                    track: instance.track.map(|t| t.as_u32() as usize),
                    score: instance.score(),
                    points: instance
                        .points()
                        .iter()
                        .flat_map(|p| {
                            [
                                finite_or_none(p.x),
                                finite_or_none(p.y),
                                Some(if p.visible { 1.0 } else { 0.0 }),
                                p.score,
                            ]
                        })
                        .collect(),
                })
                .collect(),
        })
        .collect();

    let mut provenance = labels.provenance.clone();
    let extra = match provenance.remove(EXTRA_PROVENANCE_KEY) {
        Some(Value::Object(map)) => map.into_iter().collect(),
        _ => BTreeMap::new(),
    };

    NativeFile {
        version: CURRENT_VERSION,
        skeletons,
        videos,
        tracks,
        frames,
        provenance,
        extra,
    }
}

fn finite_or_none(value: f64) -> Option<f64> {
    if value.is_nan() {
        None
    } else {
        Some(value)
    }
}

// ============================================================================
// Tests
// ============================================================================
