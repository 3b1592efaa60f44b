//! Semantic round-trips through the Label Studio codec.
//!
//! Percent coordinates are scaled through the video shape, so coordinate
//! comparisons allow for floating-point rounding. The format carries no
//! skeleton edges or occlusion flags.

mod common;

use poselab::codec::io_label_studio::{
    from_label_studio_str, to_label_studio_string, LabelStudioOptions,
};
use poselab::codec::{build_encode_report, decode, encode, EncodeIssueCode, Format};

use common::{fly_skeleton, two_animal_labels};

const EPSILON: f64 = 1e-9;

#[test]
fn file_roundtrip_preserves_frames_tracks_and_scores() {
    let labels = two_animal_labels();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tasks.json");

    encode(Format::LabelStudio, &labels, &path).unwrap();
    let restored = decode(Format::LabelStudio, &path).unwrap();

    assert_eq!(labels.tracks(), restored.tracks());
    assert_eq!(labels.videos(), restored.videos());
    assert_eq!(labels.len(), restored.len());

    for (a, b) in labels.frames().zip(restored.frames()) {
        assert_eq!(a.frame_idx, b.frame_idx);
        assert_eq!(a.instances.len(), b.instances.len());
        for (ia, ib) in a.instances.iter().zip(b.instances.iter()) {
            assert_eq!(ia.track, ib.track);
            assert_eq!(ia.score(), ib.score());
            for (pa, pb) in ia.points().iter().zip(ib.points().iter()) {
                assert_eq!(pa.is_missing(), pb.is_missing());
                if !pa.is_missing() {
                    assert!((pa.x - pb.x).abs() < EPSILON);
                    assert!((pa.y - pb.y).abs() < EPSILON);
                }
            }
        }
    }
}

#[test]
fn node_order_survives_without_a_caller_skeleton() {
    let labels = two_animal_labels();
    let restored =
        from_label_studio_str(&to_label_studio_string(&labels).unwrap(), &LabelStudioOptions::default())
            .unwrap();
    assert_eq!(
        labels.skeletons()[0].node_names().collect::<Vec<_>>(),
        restored.skeletons()[0].node_names().collect::<Vec<_>>()
    );
    // Edges never survive; the synthesized skeleton has none.
    assert_eq!(restored.skeletons()[0].edges().count(), 0);
}

#[test]
fn caller_skeleton_restores_edges() {
    let labels = two_animal_labels();
    let options = LabelStudioOptions {
        skeleton: Some(fly_skeleton()),
    };
    let restored =
        from_label_studio_str(&to_label_studio_string(&labels).unwrap(), &options).unwrap();
    assert_eq!(labels.skeletons(), restored.skeletons());
}

#[test]
fn untracked_instances_use_the_anonymous_label() {
    let mut labels = two_animal_labels();
    // Strip the track off every instance in a rebuilt copy of frame 5.
    let video = labels.frames().next().unwrap().video;
    let mut frame = labels.remove_frame(video, 5).unwrap();
    for instance in &mut frame.instances {
        instance.track = None;
    }
    labels.insert_frame(frame);

    let json = to_label_studio_string(&labels).unwrap();
    assert!(json.contains("instance_class"));

    let restored = from_label_studio_str(&json, &LabelStudioOptions::default()).unwrap();
    let video = restored.find_video(&labels.videos()[0]).unwrap();
    let frame = restored.find_frame(video, 5).unwrap();
    assert!(frame.instances.iter().all(|i| i.track.is_none()));
    // "instance_class" never becomes a track name.
    assert!(restored.find_track("instance_class").is_none());
}

#[test]
fn encode_report_flags_edge_loss_and_percent_policy() {
    let labels = two_animal_labels();
    let report = build_encode_report(&labels, Format::LabelStudio);
    assert!(report.is_lossy());
    assert!(report
        .issues
        .iter()
        .any(|i| i.code == EncodeIssueCode::DropEdges));
    assert!(report
        .issues
        .iter()
        .any(|i| i.code == EncodeIssueCode::LabelStudioPercentCoordinates));
}

#[test]
fn encode_is_deterministic() {
    let labels = two_animal_labels();
    let a = to_label_studio_string(&labels).unwrap();
    let b = to_label_studio_string(&labels).unwrap();
    assert_eq!(a, b);
}
