//! Referential-closure validation for `Labels` values.
//!
//! Checks that every entity reachable from a frame or instance is present in
//! its owning registry, that point arrays stay aligned with their skeletons,
//! and that skeleton topology is well-formed. Codecs run this as their final
//! decode stage; callers can also run it directly for diagnostics.

mod report;

pub use report::{IssueCode, IssueContext, Severity, ValidationIssue, ValidationReport};

use std::collections::HashSet;

use crate::model::{Labels, TrackId};

/// Validates a `Labels` value and returns a report of all issues found.
///
/// Errors break referential closure (dangling handles, misaligned point
/// arrays, out-of-range frame indices); warnings flag suspect but workable
/// topology (reversed duplicate edges, unused tracks).
pub fn validate_labels(labels: &Labels) -> ValidationReport {
    let mut report = ValidationReport::new();

    validate_skeletons(labels, &mut report);
    validate_frames(labels, &mut report);
    validate_tracks(labels, &mut report);

    report
}

fn validate_skeletons(labels: &Labels, report: &mut ValidationReport) {
    for (pos, skeleton) in labels.skeletons().iter().enumerate() {
        let id = crate::model::SkeletonId(pos as u32);
        let node_count = skeleton.node_count();

        if skeleton.name.is_empty() {
            report.add(ValidationIssue::warning(
                IssueCode::EmptySkeletonName,
                "Empty skeleton name",
                IssueContext::Skeleton { id },
            ));
        }

        let mut seen_edges = HashSet::new();
        for edge in skeleton.edges() {
            if edge.source >= node_count || edge.destination >= node_count {
                report.add(ValidationIssue::error(
                    IssueCode::EdgeEndpointOutOfRange,
                    format!(
                        "Edge {} -> {} exceeds node count {}",
                        edge.source, edge.destination, node_count
                    ),
                    IssueContext::Skeleton { id },
                ));
                continue;
            }
            if seen_edges.contains(&edge.reversed()) {
                report.add(ValidationIssue::warning(
                    IssueCode::ReversedDuplicateEdge,
                    format!(
                        "Both {} -> {} and its reversal are present",
                        edge.source, edge.destination
                    ),
                    IssueContext::Skeleton { id },
                ));
            }
            seen_edges.insert(*edge);
        }

        let mut symmetric_nodes = HashSet::new();
        for pair in skeleton.symmetries() {
            if pair.first() >= node_count || pair.second() >= node_count {
                report.add(ValidationIssue::error(
                    IssueCode::SymmetryEndpointOutOfRange,
                    format!(
                        "Symmetry ({}, {}) exceeds node count {}",
                        pair.first(),
                        pair.second(),
                        node_count
                    ),
                    IssueContext::Skeleton { id },
                ));
                continue;
            }
            for node in [pair.first(), pair.second()] {
                if !symmetric_nodes.insert(node) {
                    report.add(ValidationIssue::warning(
                        IssueCode::NodeInMultipleSymmetries,
                        format!("Node {} appears in more than one symmetry pair", node),
                        IssueContext::Skeleton { id },
                    ));
                }
            }
        }
    }
}

fn validate_frames(labels: &Labels, report: &mut ValidationReport) {
    for frame in labels.frames() {
        match labels.video(frame.video) {
            Some(video) => {
                if let Some(shape) = &video.shape {
                    if frame.frame_idx >= shape.frames {
                        report.add(ValidationIssue::error(
                            IssueCode::FrameIndexOutOfRange,
                            format!(
                                "Frame index {} exceeds video frame count {} ({})",
                                frame.frame_idx,
                                shape.frames,
                                video.source.describe()
                            ),
                            IssueContext::Frame {
                                video: frame.video,
                                frame_idx: frame.frame_idx,
                            },
                        ));
                    }
                }
            }
            None => {
                report.add(ValidationIssue::error(
                    IssueCode::DanglingVideoRef,
                    format!("References non-existent video {}", frame.video),
                    IssueContext::Frame {
                        video: frame.video,
                        frame_idx: frame.frame_idx,
                    },
                ));
            }
        }

        for (position, instance) in frame.instances.iter().enumerate() {
            let context = IssueContext::Instance {
                video: frame.video,
                frame_idx: frame.frame_idx,
                position,
            };

            match labels.skeleton(instance.skeleton) {
                Some(skeleton) => {
                    if instance.points().len() != skeleton.node_count() {
                        report.add(ValidationIssue::error(
                            IssueCode::PointCountMismatch,
                            format!(
                                "{} point(s) for skeleton '{}' with {} node(s)",
                                instance.points().len(),
                                skeleton.name,
                                skeleton.node_count()
                            ),
                            context.clone(),
                        ));
                    }
                }
                None => {
                    report.add(ValidationIssue::error(
                        IssueCode::DanglingSkeletonRef,
                        format!("References non-existent skeleton {}", instance.skeleton),
                        context.clone(),
                    ));
                }
            }

            if let Some(track) = instance.track {
                if labels.track(track).is_none() {
                    report.add(ValidationIssue::error(
                        IssueCode::DanglingTrackRef,
                        format!("References non-existent track {}", track),
                        context,
                    ));
                }
            }
        }
    }
}

fn validate_tracks(labels: &Labels, report: &mut ValidationReport) {
    let referenced: HashSet<TrackId> = labels
        .frames()
        .flat_map(|f| f.instances.iter())
        .filter_map(|i| i.track)
        .collect();

    for pos in 0..labels.tracks().len() {
        let id = TrackId(pos as u32);
        if !referenced.contains(&id) {
            report.add(ValidationIssue::warning(
                IssueCode::UnusedTrack,
                format!(
                    "Track '{}' is never referenced by an instance",
                    labels.tracks()[pos].name
                ),
                IssueContext::Track { id },
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        Instance, LabeledFrame, Labels, Point, Skeleton, SkeletonId, Track, TrackId, Video,
        VideoShape,
    };

    fn valid_labels() -> Labels {
        let mut labels = Labels::new();
        let mut skeleton = Skeleton::with_nodes("fly", ["head", "thorax", "abdomen"]).unwrap();
        skeleton.add_edge("head", "thorax").unwrap();
        skeleton.add_edge("thorax", "abdomen").unwrap();
        let skeleton_id = labels.add_skeleton(skeleton);
        let video = labels
            .add_video(Video::media_file("v.mp4").with_shape(VideoShape::new(100, 480, 640, 1)));
        let track = labels.add_track(Track::new("animal_0"));

        let instance = Instance::user(
            skeleton_id,
            labels.skeleton(skeleton_id).unwrap(),
            vec![Point::new(1.0, 1.0), Point::new(2.0, 2.0), Point::missing()],
        )
        .unwrap()
        .with_track(track);

        labels.insert_frame(LabeledFrame::new(video, 10, vec![instance]));
        labels
    }

    #[test]
    fn test_valid_labels() {
        let labels = valid_labels();
        let report = validate_labels(&labels);
        assert!(report.is_clean(), "Expected no issues, got: {:?}", report.issues);
    }

    #[test]
    fn test_dangling_skeleton_ref() {
        let mut labels = valid_labels();
        let video = labels.find_video(&Video::media_file("v.mp4")).unwrap();
        let mut frame = labels.remove_frame(video, 10).unwrap();
        frame.instances[0].skeleton = SkeletonId(99);
        labels.insert_frame(frame);

        let report = validate_labels(&labels);
        assert!(report
            .issues
            .iter()
            .any(|i| i.code == IssueCode::DanglingSkeletonRef));
    }

    #[test]
    fn test_dangling_track_ref() {
        let mut labels = valid_labels();
        let video = labels.find_video(&Video::media_file("v.mp4")).unwrap();
        let mut frame = labels.remove_frame(video, 10).unwrap();
        frame.instances[0].track = Some(TrackId(42));
        labels.insert_frame(frame);

        let report = validate_labels(&labels);
        assert!(report
            .issues
            .iter()
            .any(|i| i.code == IssueCode::DanglingTrackRef));
        // The original track is now unreferenced as well.
        assert!(report.issues.iter().any(|i| i.code == IssueCode::UnusedTrack));
    }

    #[test]
    fn test_frame_index_out_of_range() {
        let mut labels = valid_labels();
        let video = labels.find_video(&Video::media_file("v.mp4")).unwrap();
        let frame = labels.remove_frame(video, 10).unwrap();
        labels.insert_frame(LabeledFrame::new(video, 100, frame.instances));

        let report = validate_labels(&labels);
        assert_eq!(report.error_count(), 1);
        assert!(report
            .issues
            .iter()
            .any(|i| i.code == IssueCode::FrameIndexOutOfRange));
    }

    #[test]
    fn test_reversed_duplicate_edge_is_warning() {
        let mut labels = valid_labels();
        let mut skeleton = Skeleton::with_nodes("fly2", ["a", "b"]).unwrap();
        skeleton.add_edge("a", "b").unwrap();
        skeleton.add_edge("b", "a").unwrap();
        labels.add_skeleton(skeleton);

        let report = validate_labels(&labels);
        assert!(report.is_ok());
        assert!(report
            .issues
            .iter()
            .any(|i| i.code == IssueCode::ReversedDuplicateEdge));
    }
}
