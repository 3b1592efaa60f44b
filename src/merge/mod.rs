//! Merging several `Labels` values into one.
//!
//! Entities unify by their identity rules (structural equality for
//! skeletons, source equality for videos, name equality for tracks) and
//! frames merge per the `(video, frame index)` insertion contract, so
//! merging a dataset with itself is the identity apart from the duplicate
//! counts in the report.
//!
//! Same-name skeletons with incompatible structure are kept as distinct
//! entries and reported as conflicts; strict mode turns any conflict into
//! [`PoselabError::MergeConflict`] and discards the merged value.

pub mod report;

pub use report::{MergeConflict, MergeReport};

use std::collections::BTreeMap;

use crate::error::PoselabError;
use crate::model::{Instance, LabeledFrame, Labels, SkeletonId, TrackId, VideoId};

/// Options controlling [`merge`].
#[derive(Clone, Debug, Default)]
pub struct MergeOptions {
    /// Fail with [`PoselabError::MergeConflict`] instead of returning a
    /// report that lists conflicts.
    pub strict: bool,

    /// Track renames applied to inputs before unification, so e.g.
    /// "animal_0" in one file and "female" in another land on one track.
    pub track_map: BTreeMap<String, String>,
}

/// Merges the inputs left to right into one `Labels` value.
///
/// Every handle in every input is remapped into the output's registries;
/// the inputs themselves are untouched.
pub fn merge(
    inputs: &[Labels],
    options: &MergeOptions,
) -> Result<(Labels, MergeReport), PoselabError> {
    let mut merged = Labels::new();
    let mut report = MergeReport {
        inputs: inputs.len(),
        ..MergeReport::default()
    };

    for (input_pos, input) in inputs.iter().enumerate() {
        let skeleton_map = map_skeletons(&mut merged, input, input_pos, &mut report);
        let video_map = map_videos(&mut merged, input, &mut report);
        let track_map = map_tracks(&mut merged, input, options, &mut report);

        for frame in input.frames() {
            let video = video_map
                .get(frame.video.as_u32() as usize)
                .copied()
                .unwrap_or(frame.video);
            let instances: Vec<Instance> = frame
                .instances
                .iter()
                .map(|instance| remap_instance(instance, &skeleton_map, &track_map))
                .collect();

            let outcome = merged.insert_frame(LabeledFrame::new(video, frame.frame_idx, instances));
            if outcome.merged {
                report.frames_merged += 1;
            } else {
                report.frames_added += 1;
            }
            report.duplicate_instances += outcome.duplicates;
        }

        // Provenance: first writer of a key wins; later inputs never
        // silently overwrite.
        for (key, value) in &input.provenance {
            merged
                .provenance
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
    }

    if options.strict && !report.is_clean() {
        return Err(PoselabError::MergeConflict {
            conflicts: report.conflicts.len(),
            report,
        });
    }

    Ok((merged, report))
}

fn map_skeletons(
    merged: &mut Labels,
    input: &Labels,
    input_pos: usize,
    report: &mut MergeReport,
) -> Vec<SkeletonId> {
    input
        .skeletons()
        .iter()
        .map(|skeleton| {
            let contested = merged
                .skeletons()
                .iter()
                .any(|s| s.name == skeleton.name && !s.matches_structure(skeleton));
            let before = merged.skeletons().len();
            let id = merged.add_skeleton(skeleton.clone());
            if merged.skeletons().len() > before {
                report.skeletons_added += 1;
                if contested {
                    report.conflicts.push(MergeConflict {
                        skeleton: skeleton.name.clone(),
                        input: input_pos,
                    });
                }
            } else {
                report.skeletons_unified += 1;
            }
            id
        })
        .collect()
}

fn map_videos(merged: &mut Labels, input: &Labels, report: &mut MergeReport) -> Vec<VideoId> {
    input
        .videos()
        .iter()
        .map(|video| {
            let before = merged.videos().len();
            let id = merged.add_video(video.clone());
            if merged.videos().len() > before {
                report.videos_added += 1;
            } else {
                report.videos_unified += 1;
            }
            id
        })
        .collect()
}

fn map_tracks(
    merged: &mut Labels,
    input: &Labels,
    options: &MergeOptions,
    report: &mut MergeReport,
) -> Vec<TrackId> {
    input
        .tracks()
        .iter()
        .map(|track| {
            let mut track = track.clone();
            if let Some(canonical) = options.track_map.get(&track.name) {
                track.name = canonical.clone();
            }
            let before = merged.tracks().len();
            let id = merged.add_track(track);
            if merged.tracks().len() > before {
                report.tracks_added += 1;
            } else {
                report.tracks_unified += 1;
            }
            id
        })
        .collect()
}

fn remap_instance(
    instance: &Instance,
    skeleton_map: &[SkeletonId],
    track_map: &[TrackId],
) -> Instance {
    let skeleton = skeleton_map
        .get(instance.skeleton.as_u32() as usize)
        .copied()
        .unwrap_or(instance.skeleton);
    let track = instance
        .track
        .and_then(|t| track_map.get(t.as_u32() as usize).copied());
    Instance::from_parts(instance.points().to_vec(), skeleton, track, instance.scoring)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Point, Skeleton, Track, Video};

    fn fly() -> Skeleton {
        let mut s = Skeleton::with_nodes("fly", ["head", "thorax"]).unwrap();
        s.add_edge("head", "thorax").unwrap();
        s
    }

    fn dataset(track_name: &str, x: f64) -> Labels {
        let mut labels = Labels::new();
        let skeleton = labels.add_skeleton(fly());
        let video = labels.add_video(Video::media_file("session.mp4"));
        let track = labels.add_track(Track::new(track_name));
        let instance = Instance::user(
            skeleton,
            labels.skeleton(skeleton).unwrap(),
            vec![Point::new(x, x), Point::new(x + 1.0, x + 1.0)],
        )
        .unwrap()
        .with_track(track);
        labels.insert_frame(LabeledFrame::new(video, 0, vec![instance]));
        labels
    }

    #[test]
    fn test_self_merge_is_idempotent() {
        let labels = dataset("animal_0", 1.0);
        let (merged, report) =
            merge(&[labels.clone(), labels.clone()], &MergeOptions::default()).unwrap();

        assert_eq!(merged.skeletons().len(), 1);
        assert_eq!(merged.videos().len(), 1);
        assert_eq!(merged.tracks().len(), 1);
        assert_eq!(merged.len(), labels.len());
        assert_eq!(merged.instance_count(), labels.instance_count());
        // The duplicate is flagged, not silently dropped.
        assert_eq!(report.duplicate_instances, 1);
        assert_eq!(report.frames_merged, 1);
        assert!(report.is_clean());
    }

    #[test]
    fn test_shared_entities_unify_across_inputs() {
        let a = dataset("animal_0", 1.0);
        let b = dataset("animal_1", 9.0);
        let (merged, report) = merge(&[a, b], &MergeOptions::default()).unwrap();

        assert_eq!(merged.skeletons().len(), 1);
        assert_eq!(merged.videos().len(), 1);
        assert_eq!(merged.tracks().len(), 2);
        assert_eq!(report.skeletons_unified, 1);
        assert_eq!(report.videos_unified, 1);

        // Both instances land in the one shared frame.
        let frame = merged.frames().next().unwrap();
        assert_eq!(frame.instances.len(), 2);
        assert_ne!(frame.instances[0].track, frame.instances[1].track);
    }

    #[test]
    fn test_track_map_unifies_renamed_individuals() {
        let a = dataset("animal_0", 1.0);
        let b = dataset("female", 9.0);
        let options = MergeOptions {
            track_map: [("animal_0".to_string(), "female".to_string())].into(),
            ..MergeOptions::default()
        };
        let (merged, _) = merge(&[a, b], &options).unwrap();
        assert_eq!(merged.tracks().len(), 1);
        assert_eq!(merged.tracks()[0].name, "female");
    }

    #[test]
    fn test_same_name_different_structure_is_a_conflict() {
        let a = dataset("animal_0", 1.0);
        let mut b = Labels::new();
        let other = Skeleton::with_nodes("fly", ["nose", "tail", "wing"]).unwrap();
        b.add_skeleton(other);

        let (merged, report) = merge(&[a, b], &MergeOptions::default()).unwrap();
        // Both structures survive as distinct entries.
        assert_eq!(merged.skeletons().len(), 2);
        assert_eq!(report.conflicts.len(), 1);
        assert_eq!(report.conflicts[0].skeleton, "fly");
        assert_eq!(report.conflicts[0].input, 1);
    }

    #[test]
    fn test_strict_mode_turns_conflicts_into_errors() {
        let a = dataset("animal_0", 1.0);
        let mut b = Labels::new();
        b.add_skeleton(Skeleton::with_nodes("fly", ["nose"]).unwrap());

        let options = MergeOptions {
            strict: true,
            ..MergeOptions::default()
        };
        let err = merge(&[a, b], &options).unwrap_err();
        assert!(matches!(err, PoselabError::MergeConflict { conflicts: 1, .. }));
    }

    #[test]
    fn test_handles_are_remapped_not_reused() {
        // Input b's skeleton 0 must not alias input a's skeleton 0.
        let a = dataset("animal_0", 1.0);
        let mut b = Labels::new();
        let skeleton = b.add_skeleton(Skeleton::with_nodes("worm", ["h", "t", "m"]).unwrap());
        let video = b.add_video(Video::media_file("other.mp4"));
        let instance = Instance::user(
            skeleton,
            b.skeleton(skeleton).unwrap(),
            vec![Point::new(1.0, 1.0), Point::new(2.0, 2.0), Point::new(3.0, 3.0)],
        )
        .unwrap();
        b.insert_frame(LabeledFrame::new(video, 5, vec![instance]));

        let (merged, _) = merge(&[a, b], &MergeOptions::default()).unwrap();
        let worm_frame = merged
            .frames()
            .find(|f| f.frame_idx == 5)
            .unwrap();
        let skeleton = merged.skeleton(worm_frame.instances[0].skeleton).unwrap();
        assert_eq!(skeleton.name, "worm");
        assert_eq!(worm_frame.instances[0].points().len(), 3);
    }

    #[test]
    fn test_provenance_first_writer_wins() {
        let mut a = dataset("animal_0", 1.0);
        a.provenance
            .insert("origin".into(), serde_json::json!("first"));
        let mut b = dataset("animal_1", 9.0);
        b.provenance
            .insert("origin".into(), serde_json::json!("second"));

        let (merged, _) = merge(&[a, b], &MergeOptions::default()).unwrap();
        assert_eq!(merged.provenance["origin"], serde_json::json!("first"));
    }
}
