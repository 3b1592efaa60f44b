//! Property tests for the native container: any valid dataset survives a
//! serialize/parse trip unchanged, and frame keys stay unique and sorted.

use proptest::prelude::*;

use poselab::codec::io_native::{from_native_str, to_native_string};
use poselab::model::{
    Instance, LabeledFrame, Labels, Point, Skeleton, Track, TrackId, Video, VideoShape,
};

/// Raw material for one point: `None` is the missing sentinel, otherwise
/// coordinates, visibility and an optional confidence.
type PointSeed = Option<(f64, f64, bool, Option<f64>)>;

/// Raw material for one instance: its points, an instance score when
/// predicted, and a track slot.
type InstanceSeed = (Vec<PointSeed>, Option<f64>, Option<usize>);

fn coord() -> impl Strategy<Value = f64> {
    -1.0e6..1.0e6f64
}

fn point_seed() -> impl Strategy<Value = PointSeed> {
    prop::option::weighted(
        0.8,
        (coord(), coord(), any::<bool>(), prop::option::of(0.0..1.5f64)),
    )
}

fn instance_seed(node_count: usize, track_count: usize) -> impl Strategy<Value = InstanceSeed> {
    (
        prop::collection::vec(point_seed(), node_count),
        prop::option::of(-0.5..1.5f64),
        if track_count == 0 {
            Just(None).boxed()
        } else {
            prop::option::of(0..track_count).boxed()
        },
    )
}

fn labels_seed() -> impl Strategy<Value = (usize, usize, Vec<(u64, Vec<InstanceSeed>)>)> {
    (1..=4usize, 0..=3usize).prop_flat_map(|(node_count, track_count)| {
        let frames = prop::collection::btree_map(
            0u64..60,
            prop::collection::vec(instance_seed(node_count, track_count), 1..=3),
            0..=5,
        );
        frames.prop_map(move |frames| {
            (node_count, track_count, frames.into_iter().collect())
        })
    })
}

fn build_labels(
    node_count: usize,
    track_count: usize,
    frames: &[(u64, Vec<InstanceSeed>)],
) -> Labels {
    let mut labels = Labels::new();

    let names: Vec<String> = (0..node_count).map(|i| format!("node{i}")).collect();
    let mut skeleton = Skeleton::with_nodes("generated", names).unwrap();
    if node_count >= 2 {
        skeleton.add_edge("node0", "node1").unwrap();
    }
    let skeleton_id = labels.add_skeleton(skeleton);
    let video = labels
        .add_video(Video::media_file("session.mp4").with_shape(VideoShape::new(60, 480, 640, 3)));
    for t in 0..track_count {
        labels.add_track(Track::new(format!("track{t}")));
    }

    for (frame_idx, seeds) in frames {
        let mut instances = Vec::new();
        for (point_seeds, score, track) in seeds {
            let points: Vec<Point> = point_seeds
                .iter()
                .map(|seed| match seed {
                    Some((x, y, visible, point_score)) => {
                        let mut point = if *visible {
                            Point::new(*x, *y)
                        } else {
                            Point::occluded(*x, *y)
                        };
                        if let Some(point_score) = point_score {
                            point = point.with_score(*point_score);
                        }
                        point
                    }
                    None => Point::missing(),
                })
                .collect();
            let instance = match score {
                Some(score) => Instance::predicted(
                    skeleton_id,
                    labels.skeleton(skeleton_id).unwrap(),
                    points,
                    *score,
                )
                .unwrap(),
                None => {
                    Instance::user(skeleton_id, labels.skeleton(skeleton_id).unwrap(), points)
                        .unwrap()
                }
            };
            let instance = match track {
                Some(track) => instance.with_track(TrackId(*track as u32)),
                None => instance,
            };
            instances.push(instance);
        }
        labels.insert_frame(LabeledFrame::new(video, *frame_idx, instances));
    }

    labels
}

proptest! {
    #[test]
    fn native_roundtrip_is_identity((node_count, track_count, frames) in labels_seed()) {
        let labels = build_labels(node_count, track_count, &frames);
        let text = to_native_string(&labels).unwrap();
        let restored = from_native_str(&text).unwrap();
        prop_assert_eq!(labels, restored);
    }

    #[test]
    fn frame_keys_stay_unique_and_sorted((node_count, track_count, frames) in labels_seed()) {
        let labels = build_labels(node_count, track_count, &frames);
        let restored = from_native_str(&to_native_string(&labels).unwrap()).unwrap();

        let keys: Vec<(u32, u64)> = restored
            .frames()
            .map(|f| (f.video.as_u32(), f.frame_idx))
            .collect();
        let mut sorted = keys.clone();
        sorted.sort();
        sorted.dedup();
        prop_assert_eq!(keys, sorted);
    }

    #[test]
    fn instance_counts_survive((node_count, track_count, frames) in labels_seed()) {
        let labels = build_labels(node_count, track_count, &frames);
        let restored = from_native_str(&to_native_string(&labels).unwrap()).unwrap();
        prop_assert_eq!(labels.instance_count(), restored.instance_count());
        prop_assert_eq!(labels.len(), restored.len());
    }
}
