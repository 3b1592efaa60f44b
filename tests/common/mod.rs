//! Shared fixtures for the integration tests.

use poselab::model::{
    Instance, LabeledFrame, Labels, Point, Skeleton, Track, Video, VideoShape,
};

/// Two-node fly skeleton with one edge.
pub fn fly_skeleton() -> Skeleton {
    let mut skeleton = Skeleton::with_nodes("fly", ["head", "thorax"]).unwrap();
    skeleton.add_edge("head", "thorax").unwrap();
    skeleton
}

/// A small two-animal dataset: one video, two tracks, frames 0 and 5 with a
/// mix of user and predicted instances.
pub fn two_animal_labels() -> Labels {
    let mut labels = Labels::new();
    let skeleton = labels.add_skeleton(fly_skeleton());
    let video = labels
        .add_video(Video::media_file("session.mp4").with_shape(VideoShape::new(100, 480, 640, 3)));
    let female = labels.add_track(Track::new("female"));
    let male = labels.add_track(Track::new("male"));

    let f0_female = Instance::user(
        skeleton,
        labels.skeleton(skeleton).unwrap(),
        vec![Point::new(10.0, 20.0), Point::new(30.0, 40.0)],
    )
    .unwrap()
    .with_track(female);
    let f0_male = Instance::predicted(
        skeleton,
        labels.skeleton(skeleton).unwrap(),
        vec![Point::new(50.0, 60.0).with_score(0.9), Point::missing()],
        0.8,
    )
    .unwrap()
    .with_track(male);
    labels.insert_frame(LabeledFrame::new(video, 0, vec![f0_female, f0_male]));

    let f5_female = Instance::user(
        skeleton,
        labels.skeleton(skeleton).unwrap(),
        vec![Point::new(11.0, 21.0), Point::occluded(31.0, 41.0)],
    )
    .unwrap()
    .with_track(female);
    labels.insert_frame(LabeledFrame::new(video, 5, vec![f5_female]));

    labels
}

/// Asserts that two datasets carry the same frames and poses, comparing
/// instances with `same_pose` so missing-point sentinels compare sanely.
pub fn assert_same_poses(a: &Labels, b: &Labels) {
    assert_eq!(a.len(), b.len(), "frame counts differ");
    for (fa, fb) in a.frames().zip(b.frames()) {
        assert_eq!(fa.frame_idx, fb.frame_idx);
        assert_eq!(
            fa.instances.len(),
            fb.instances.len(),
            "instance counts differ at frame {}",
            fa.frame_idx
        );
        for (ia, ib) in fa.instances.iter().zip(fb.instances.iter()) {
            assert!(
                ia.same_pose(ib),
                "poses differ at frame {}",
                fa.frame_idx
            );
        }
    }
}
