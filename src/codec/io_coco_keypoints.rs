//! COCO-style keypoint JSON reader and writer.
//!
//! The flat tabular family: one annotation record per instance, categories
//! declaring a keypoint name list (which decode synthesizes into a skeleton)
//! and optional 1-based `skeleton` edge pairs. The format has no track or
//! symmetry concept; encode drops those per the published contract.
//!
//! # Keypoint triplets
//!
//! Annotation keypoints are flat `[x, y, v]` triplets in category keypoint
//! order. The visibility flag follows COCO convention: 0 = not labeled
//! (decoded as a missing point), 1 = labeled but occluded, 2 = visible.
//!
//! # Deterministic output
//!
//! The writer assigns category ids by skeleton registry order and image /
//! annotation ids by sorted frame order, so output is reproducible.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::{DecodeStage, LabelsBuilder};
use crate::error::PoselabError;
use crate::model::{
    Instance, Labels, Point, Skeleton, Video, VideoShape, VideoSource,
};

// ============================================================================
// COCO schema types (internal to this module)
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
struct CocoFile {
    #[serde(default)]
    images: Vec<CocoImage>,

    #[serde(default)]
    annotations: Vec<CocoAnnotation>,

    #[serde(default)]
    categories: Vec<CocoCategory>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CocoImage {
    id: u64,
    file_name: String,
    #[serde(default)]
    width: u32,
    #[serde(default)]
    height: u32,
}

#[derive(Debug, Serialize, Deserialize)]
struct CocoCategory {
    id: u64,
    name: String,

    /// Keypoint names; defines the synthesized skeleton's node order.
    #[serde(default)]
    keypoints: Vec<String>,

    /// Edges as 1-based keypoint index pairs, per COCO convention.
    #[serde(default)]
    skeleton: Vec<[usize; 2]>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CocoAnnotation {
    id: u64,
    image_id: u64,
    category_id: u64,

    /// Flat [x, y, v] triplets in category keypoint order.
    keypoints: Vec<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    num_keypoints: Option<u64>,

    /// Present for detection results; maps to the instance score.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    score: Option<f64>,
}

// ============================================================================
// Public API
// ============================================================================

/// Reads a `Labels` value from a COCO keypoints JSON file.
pub fn read_coco_keypoints(path: &Path) -> Result<Labels, PoselabError> {
    let file = File::open(path).map_err(PoselabError::Io)?;
    let reader = BufReader::new(file);

    let coco: CocoFile =
        serde_json::from_reader(reader).map_err(|source| PoselabError::CocoParse {
            path: path.to_path_buf(),
            source,
        })?;

    coco_to_labels(coco, path)
}

/// Writes a `Labels` value to a COCO keypoints JSON file.
pub fn write_coco_keypoints(path: &Path, labels: &Labels) -> Result<(), PoselabError> {
    let file = File::create(path).map_err(PoselabError::Io)?;
    let writer = BufWriter::new(file);

    let coco = labels_to_coco(labels);

    serde_json::to_writer_pretty(writer, &coco).map_err(|source| PoselabError::CocoWrite {
        path: path.to_path_buf(),
        source,
    })
}

/// Reads a `Labels` value from a COCO keypoints JSON string.
pub fn from_coco_str(json: &str) -> Result<Labels, PoselabError> {
    let path = Path::new("<string>");
    let coco: CocoFile = serde_json::from_str(json).map_err(|source| PoselabError::CocoParse {
        path: path.to_path_buf(),
        source,
    })?;
    coco_to_labels(coco, path)
}

/// Serializes a `Labels` value to a COCO keypoints JSON string.
pub fn to_coco_string(labels: &Labels) -> Result<String, PoselabError> {
    let coco = labels_to_coco(labels);
    serde_json::to_string_pretty(&coco).map_err(|source| PoselabError::CocoWrite {
        path: Path::new("<string>").to_path_buf(),
        source,
    })
}

// ============================================================================
// Conversion: COCO -> Labels
// ============================================================================

fn coco_to_labels(coco: CocoFile, path: &Path) -> Result<Labels, PoselabError> {
    let mut builder = LabelsBuilder::new("coco-keypoints", path);

    // Registry stage: categories become skeletons, images become
    // single-image videos.
    let mut category_keys: BTreeMap<u64, String> = BTreeMap::new();
    for category in &coco.categories {
        if category.keypoints.is_empty() {
            // Plain detection categories carry no pose; annotations that
            // reference them fail below.
            continue;
        }
        let skeleton = synthesize_skeleton(category, &builder)?;
        let key = format!("category:{}", category.id);
        builder.intern_skeleton(key.clone(), skeleton);
        category_keys.insert(category.id, key);
    }

    let mut image_keys: BTreeMap<u64, String> = BTreeMap::new();
    for image in &coco.images {
        let mut video = Video::media_file(&image.file_name);
        if image.width > 0 && image.height > 0 {
            video = video.with_shape(VideoShape::new(1, image.height, image.width, 3));
        }
        let key = format!("image:{}", image.id);
        builder.intern_video(key.clone(), video);
        image_keys.insert(image.id, key);
    }

    // Frame stage: one frame per annotated image, index 0.
    for annotation in coco.annotations {
        let video = image_keys
            .get(&annotation.image_id)
            .and_then(|key| builder.video_for(key))
            .ok_or_else(|| {
                builder.malformed(
                    DecodeStage::Frames,
                    format!(
                        "annotation {} references unknown image {}",
                        annotation.id, annotation.image_id
                    ),
                )
            })?;
        let skeleton_id = category_keys
            .get(&annotation.category_id)
            .and_then(|key| builder.skeleton_for(key))
            .ok_or_else(|| {
                builder.malformed(
                    DecodeStage::Frames,
                    format!(
                        "annotation {} references category {} which declares no keypoints",
                        annotation.id, annotation.category_id
                    ),
                )
            })?;

        let node_count = builder
            .registry()
            .skeleton(skeleton_id)
            .map(|s| s.node_count())
            .ok_or_else(|| {
                builder.malformed(
                    DecodeStage::Frames,
                    format!("annotation {} resolved to an unregistered skeleton", annotation.id),
                )
            })?;
        if annotation.keypoints.len() != node_count * 3 {
            return Err(builder.malformed(
                DecodeStage::Frames,
                format!(
                    "annotation {} has {} keypoint value(s); expected {} for {} node(s)",
                    annotation.id,
                    annotation.keypoints.len(),
                    node_count * 3,
                    node_count
                ),
            ));
        }

        let points: Vec<Point> = annotation
            .keypoints
            .chunks_exact(3)
            .map(|triplet| match triplet[2].round() as i64 {
                0 => Point::missing(),
                1 => Point::occluded(triplet[0], triplet[1]),
                _ => Point::new(triplet[0], triplet[1]),
            })
            .collect();

        let instance = match builder.registry().skeleton(skeleton_id) {
            Some(skeleton) => match annotation.score {
                Some(score) => Instance::predicted(skeleton_id, skeleton, points, score)?,
                None => Instance::user(skeleton_id, skeleton, points)?,
            },
            None => {
                return Err(builder.malformed(
                    DecodeStage::Frames,
                    format!("annotation {} resolved to an unregistered skeleton", annotation.id),
                ))
            }
        };
        builder.link_frame(video, 0, vec![instance]);
    }

    builder.finish()
}

fn synthesize_skeleton(
    category: &CocoCategory,
    builder: &LabelsBuilder,
) -> Result<Skeleton, PoselabError> {
    let mut skeleton =
        Skeleton::with_nodes(&category.name, category.keypoints.iter().cloned()).map_err(
            |_| {
                builder.malformed(
                    DecodeStage::Registries,
                    format!(
                        "category {} ('{}') declares duplicate keypoint names",
                        category.id, category.name
                    ),
                )
            },
        )?;
    for [a, b] in &category.skeleton {
        if *a == 0 || *b == 0 || *a > category.keypoints.len() || *b > category.keypoints.len() {
            return Err(builder.malformed(
                DecodeStage::Registries,
                format!(
                    "category {} ('{}') has skeleton pair [{}, {}] outside its 1..={} keypoints",
                    category.id,
                    category.name,
                    a,
                    b,
                    category.keypoints.len()
                ),
            ));
        }
        let source = category.keypoints[*a - 1].clone();
        let destination = category.keypoints[*b - 1].clone();
        // Repeated pairs in the raw file collapse silently; COCO tooling
        // sometimes emits both directions.
        let _ = skeleton.add_edge(&source, &destination);
    }
    Ok(skeleton)
}

// ============================================================================
// Conversion: Labels -> COCO
// ============================================================================

fn labels_to_coco(labels: &Labels) -> CocoFile {
    let categories = labels
        .skeletons()
        .iter()
        .enumerate()
        .map(|(pos, skeleton)| CocoCategory {
            id: pos as u64 + 1,
            name: skeleton.name.clone(),
            keypoints: skeleton.node_names().map(str::to_string).collect(),
            skeleton: skeleton
                .edges()
                .map(|e| [e.source + 1, e.destination + 1])
                .collect(),
        })
        .collect();

    let mut images = Vec::new();
    let mut annotations = Vec::new();
    let mut annotation_id = 0u64;

    for (pos, frame) in labels.frames().enumerate() {
        let image_id = pos as u64 + 1;
        let video = labels.video(frame.video);
        let (width, height) = video
            .and_then(|v| v.shape)
            .map(|s| (s.width, s.height))
            .unwrap_or((0, 0));
        images.push(CocoImage {
            id: image_id,
            file_name: video
                .map(|v| frame_file_name(&v.source, frame.frame_idx))
                .unwrap_or_default(),
            width,
            height,
        });

        for instance in &frame.instances {
            annotation_id += 1;
            let keypoints: Vec<f64> = instance
                .points()
                .iter()
                .flat_map(|p| {
                    if p.is_missing() {
                        [0.0, 0.0, 0.0]
                    } else {
                        [p.x, p.y, if p.visible { 2.0 } else { 1.0 }]
                    }
                })
                .collect();
            annotations.push(CocoAnnotation {
                id: annotation_id,
                image_id,
                category_id: instance.skeleton.as_u32() as u64 + 1,
                keypoints,
                num_keypoints: Some(instance.labeled_count() as u64),
                // Track identity and per-point scores have no slot here;
                // they are omitted, never substituted.
                score: instance.score(),
            });
        }
    }

    CocoFile {
        images,
        annotations,
        categories,
    }
}

/// Derives a per-frame image name from the video source.
///
/// Frame 0 of a media file keeps the original name so COCO-sourced data
/// round-trips; other frames get a zero-padded index suffix.
fn frame_file_name(source: &VideoSource, frame_idx: u64) -> String {
    match source {
        VideoSource::MediaFile { path } => {
            if frame_idx == 0 {
                path.display().to_string()
            } else {
                format!("{}.{:05}.png", path.display(), frame_idx)
            }
        }
        VideoSource::ImageSequence { paths } => paths
            .get(frame_idx as usize)
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| format!("frame.{:05}.png", frame_idx)),
        VideoSource::EmbeddedArray { key } => format!("{}.{:05}.png", key, frame_idx),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_coco_json() -> &'static str {
        r#"{
            "images": [
                {"id": 7, "file_name": "frame_000.png", "width": 640, "height": 480}
            ],
            "categories": [
                {
                    "id": 1,
                    "name": "mouse",
                    "keypoints": ["nose", "ear_l", "ear_r", "tail"],
                    "skeleton": [[1, 2], [1, 3], [1, 4]]
                }
            ],
            "annotations": [
                {
                    "id": 1,
                    "image_id": 7,
                    "category_id": 1,
                    "keypoints": [10.0, 20.0, 2, 30.0, 40.0, 1, 0, 0, 0, 50.0, 60.0, 2],
                    "num_keypoints": 3
                }
            ]
        }"#
    }

    #[test]
    fn test_decode_synthesizes_skeleton_from_keypoints() {
        let labels = from_coco_str(sample_coco_json()).expect("parse");

        assert_eq!(labels.skeletons().len(), 1);
        let skeleton = &labels.skeletons()[0];
        assert_eq!(skeleton.name, "mouse");
        assert_eq!(
            skeleton.node_names().collect::<Vec<_>>(),
            vec!["nose", "ear_l", "ear_r", "tail"]
        );
        assert_eq!(skeleton.edges().count(), 3);
    }

    #[test]
    fn test_visibility_flag_semantics() {
        let labels = from_coco_str(sample_coco_json()).expect("parse");
        let video = labels.find_video(&Video::media_file("frame_000.png")).unwrap();
        let frame = labels.find_frame(video, 0).unwrap();
        let points = frame.instances[0].points();

        assert!(points[0].visible);
        assert!(!points[1].visible);
        assert!(!points[1].is_missing());
        assert!(points[2].is_missing());
        assert_eq!(frame.instances[0].labeled_count(), 3);
    }

    #[test]
    fn test_identical_categories_collapse_to_one_skeleton() {
        let json = r#"{
            "images": [{"id": 1, "file_name": "a.png", "width": 10, "height": 10}],
            "categories": [
                {"id": 1, "name": "mouse", "keypoints": ["nose", "tail"], "skeleton": [[1, 2]]},
                {"id": 2, "name": "mouse", "keypoints": ["nose", "tail"], "skeleton": [[1, 2]]}
            ],
            "annotations": []
        }"#;
        let labels = from_coco_str(json).expect("parse");
        assert_eq!(labels.skeletons().len(), 1);
    }

    #[test]
    fn test_keypoint_count_mismatch_aborts() {
        let json = r#"{
            "images": [{"id": 1, "file_name": "a.png", "width": 10, "height": 10}],
            "categories": [{"id": 1, "name": "m", "keypoints": ["nose", "tail"], "skeleton": []}],
            "annotations": [
                {"id": 1, "image_id": 1, "category_id": 1, "keypoints": [1.0, 2.0, 2]}
            ]
        }"#;
        let err = from_coco_str(json).unwrap_err();
        assert!(matches!(err, PoselabError::Format { .. }));
    }

    #[test]
    fn test_score_maps_to_predicted() {
        let json = r#"{
            "images": [{"id": 1, "file_name": "a.png", "width": 10, "height": 10}],
            "categories": [{"id": 1, "name": "m", "keypoints": ["nose"], "skeleton": []}],
            "annotations": [
                {"id": 1, "image_id": 1, "category_id": 1, "keypoints": [1.0, 2.0, 2], "score": 0.85}
            ]
        }"#;
        let labels = from_coco_str(json).expect("parse");
        let video = labels.find_video(&Video::media_file("a.png")).unwrap();
        let frame = labels.find_frame(video, 0).unwrap();
        assert_eq!(frame.instances[0].score(), Some(0.85));
    }

    #[test]
    fn test_roundtrip_preserves_poses() {
        let original = from_coco_str(sample_coco_json()).expect("parse");
        let json = to_coco_string(&original).expect("serialize");
        let restored = from_coco_str(&json).expect("reparse");

        assert_eq!(original.skeletons(), restored.skeletons());
        assert_eq!(original.len(), restored.len());
        let video = restored
            .find_video(&Video::media_file("frame_000.png"))
            .unwrap();
        let frame = restored.find_frame(video, 0).unwrap();
        assert_eq!(frame.instances[0].labeled_count(), 3);
        assert_eq!(frame.instances[0].points()[0].x, 10.0);
    }

    #[test]
    fn test_encode_is_deterministic_and_sorted() {
        let original = from_coco_str(sample_coco_json()).expect("parse");
        let a = to_coco_string(&original).expect("serialize");
        let b = to_coco_string(&original).expect("serialize");
        assert_eq!(a, b);

        let value: serde_json::Value = serde_json::from_str(&a).unwrap();
        assert_eq!(value["images"][0]["id"], 1);
        assert_eq!(value["annotations"][0]["id"], 1);
    }
}
