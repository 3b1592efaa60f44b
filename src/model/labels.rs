//! The `Labels` aggregate root: deduplicated entity registries plus the
//! labeled-frame collection.
//!
//! Skeletons, videos and tracks live in per-`Labels` arenas; frames and
//! instances hold [`ids`](super::ids) handles into them. The frame collection
//! is keyed by `(video, frame index)`; inserting at an occupied key merges
//! into the existing frame rather than creating a duplicate entry.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::ids::{SkeletonId, TrackId, VideoId};
use super::instance::{Instance, Track};
use super::skeleton::Skeleton;
use super::video::Video;
use crate::error::PoselabError;

/// The set of instances present at one `(video, frame index)` key.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LabeledFrame {
    /// The video this frame belongs to.
    pub video: VideoId,
    /// Zero-based frame index within the video.
    pub frame_idx: u64,
    /// Instances present in this frame, in insertion order.
    pub instances: Vec<Instance>,
}

impl LabeledFrame {
    /// Creates a labeled frame.
    pub fn new(video: VideoId, frame_idx: u64, instances: Vec<Instance>) -> Self {
        Self {
            video,
            frame_idx,
            instances,
        }
    }

    /// The frame's `(video, frame index)` key.
    pub fn key(&self) -> (VideoId, u64) {
        (self.video, self.frame_idx)
    }

    /// Instances without a model prediction score (ground truth).
    pub fn user_instances(&self) -> impl Iterator<Item = &Instance> {
        self.instances.iter().filter(|i| !i.is_predicted())
    }

    /// Instances produced by a model.
    pub fn predicted_instances(&self) -> impl Iterator<Item = &Instance> {
        self.instances.iter().filter(|i| i.is_predicted())
    }
}

/// Outcome of [`Labels::insert_frame`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameInsert {
    /// True when the key already existed and the incoming instances were
    /// merged into the existing frame.
    pub merged: bool,
    /// Instances actually appended.
    pub added: usize,
    /// Incoming instances flagged as exact duplicates of existing ones
    /// (same track, same scoring, numerically equal points) and skipped.
    pub duplicates: usize,
}

/// The aggregate root owning all deduplicated entities and frames for one
/// dataset.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Labels {
    skeletons: Vec<Skeleton>,
    videos: Vec<Video>,
    tracks: Vec<Track>,
    frames: Vec<LabeledFrame>,
    #[serde(skip)]
    index: BTreeMap<(VideoId, u64), usize>,
    /// Free-form provenance metadata, round-tripped by the native codec.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub provenance: BTreeMap<String, serde_json::Value>,
}

impl Labels {
    /// Creates an empty Labels value.
    pub fn new() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------
    // Registries
    // ------------------------------------------------------------------

    /// Adds a skeleton, collapsing onto an existing structurally equal entry.
    pub fn add_skeleton(&mut self, skeleton: Skeleton) -> SkeletonId {
        if let Some(pos) = self
            .skeletons
            .iter()
            .position(|s| s.matches_structure(&skeleton))
        {
            return SkeletonId(pos as u32);
        }
        self.skeletons.push(skeleton);
        SkeletonId((self.skeletons.len() - 1) as u32)
    }

    /// Adds a video, collapsing onto an existing entry with the same source.
    pub fn add_video(&mut self, video: Video) -> VideoId {
        if let Some(pos) = self.videos.iter().position(|v| v.same_source(&video)) {
            return VideoId(pos as u32);
        }
        self.videos.push(video);
        VideoId((self.videos.len() - 1) as u32)
    }

    /// Adds a track, collapsing onto an existing entry with the same name.
    pub fn add_track(&mut self, track: Track) -> TrackId {
        if let Some(pos) = self.tracks.iter().position(|t| t.name == track.name) {
            return TrackId(pos as u32);
        }
        self.tracks.push(track);
        TrackId((self.tracks.len() - 1) as u32)
    }

    /// Looks up a skeleton by handle.
    pub fn skeleton(&self, id: SkeletonId) -> Option<&Skeleton> {
        self.skeletons.get(id.0 as usize)
    }

    /// Looks up a video by handle.
    pub fn video(&self, id: VideoId) -> Option<&Video> {
        self.videos.get(id.0 as usize)
    }

    /// Looks up a track by handle.
    pub fn track(&self, id: TrackId) -> Option<&Track> {
        self.tracks.get(id.0 as usize)
    }

    /// All skeletons, in registry order.
    pub fn skeletons(&self) -> &[Skeleton] {
        &self.skeletons
    }

    /// All videos, in registry order.
    pub fn videos(&self) -> &[Video] {
        &self.videos
    }

    /// All tracks, in registry order.
    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    /// Finds the handle of a video with the same source, if registered.
    pub fn find_video(&self, video: &Video) -> Option<VideoId> {
        self.videos
            .iter()
            .position(|v| v.same_source(video))
            .map(|pos| VideoId(pos as u32))
    }

    /// Finds a track handle by name.
    pub fn find_track(&self, name: &str) -> Option<TrackId> {
        self.tracks
            .iter()
            .position(|t| t.name == name)
            .map(|pos| TrackId(pos as u32))
    }

    // ------------------------------------------------------------------
    // Frames
    // ------------------------------------------------------------------

    /// Inserts a labeled frame.
    ///
    /// If no frame exists at the frame's `(video, frame index)` key it is
    /// added as-is. Otherwise the incoming instances are appended to the
    /// existing frame; exact duplicates are skipped and counted in the
    /// returned [`FrameInsert`], never silently lost nor doubled.
    pub fn insert_frame(&mut self, frame: LabeledFrame) -> FrameInsert {
        match self.index.get(&frame.key()) {
            Some(&pos) => {
                let existing = &mut self.frames[pos];
                let mut added = 0;
                let mut duplicates = 0;
                for instance in frame.instances {
                    if existing.instances.iter().any(|i| i.same_pose(&instance)) {
                        duplicates += 1;
                    } else {
                        existing.instances.push(instance);
                        added += 1;
                    }
                }
                FrameInsert {
                    merged: true,
                    added,
                    duplicates,
                }
            }
            None => {
                let added = frame.instances.len();
                self.index.insert(frame.key(), self.frames.len());
                self.frames.push(frame);
                FrameInsert {
                    merged: false,
                    added,
                    duplicates: 0,
                }
            }
        }
    }

    /// Looks up the frame at a `(video, frame index)` key.
    pub fn find_frame(&self, video: VideoId, frame_idx: u64) -> Option<&LabeledFrame> {
        self.index
            .get(&(video, frame_idx))
            .map(|&pos| &self.frames[pos])
    }

    /// Removes and returns the frame at a key, if present.
    pub fn remove_frame(&mut self, video: VideoId, frame_idx: u64) -> Option<LabeledFrame> {
        let pos = self.index.remove(&(video, frame_idx))?;
        let frame = self.frames.remove(pos);
        // Positions after the removed slot shift down by one.
        for slot in self.index.values_mut() {
            if *slot > pos {
                *slot -= 1;
            }
        }
        Some(frame)
    }

    /// Iterates frames sorted by `(video, frame index)` for deterministic
    /// output and stable diffs.
    pub fn frames(&self) -> impl Iterator<Item = &LabeledFrame> {
        self.index.values().map(|&pos| &self.frames[pos])
    }

    /// Number of labeled frames.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// True when no frames are present.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Total instance count across all frames.
    pub fn instance_count(&self) -> usize {
        self.frames.iter().map(|f| f.instances.len()).sum()
    }

    // ------------------------------------------------------------------
    // Validated mutation
    // ------------------------------------------------------------------

    /// Replaces a skeleton with a reindexed one and remaps every dependent
    /// instance's point array.
    ///
    /// `node_map[old_index]` gives the node's index in the new skeleton, or
    /// `None` to drop it (dependent points become missing). This is the only
    /// sanctioned way to reorder or remove nodes once instances reference the
    /// skeleton; in-place node removal would silently misalign point arrays.
    pub fn remap_skeleton(
        &mut self,
        id: SkeletonId,
        new_skeleton: Skeleton,
        node_map: &[Option<usize>],
    ) -> Result<(), PoselabError> {
        let old = self
            .skeletons
            .get(id.0 as usize)
            .ok_or_else(|| PoselabError::InvalidRemap {
                message: format!("skeleton {id} is not registered"),
            })?;
        if node_map.len() != old.node_count() {
            return Err(PoselabError::InvalidRemap {
                message: format!(
                    "node map covers {} node(s) but skeleton '{}' has {}",
                    node_map.len(),
                    old.name,
                    old.node_count()
                ),
            });
        }
        let new_len = new_skeleton.node_count();
        let mut seen = vec![false; new_len];
        for target in node_map.iter().flatten() {
            if *target >= new_len {
                return Err(PoselabError::InvalidRemap {
                    message: format!(
                        "node map target {} is out of range for '{}' ({} node(s))",
                        target, new_skeleton.name, new_len
                    ),
                });
            }
            if seen[*target] {
                return Err(PoselabError::InvalidRemap {
                    message: format!("node map target {target} is assigned twice"),
                });
            }
            seen[*target] = true;
        }

        for frame in &mut self.frames {
            for instance in &mut frame.instances {
                if instance.skeleton == id {
                    *instance = instance.remapped(id, new_len, node_map);
                }
            }
        }
        self.skeletons[id.0 as usize] = new_skeleton;
        Ok(())
    }

    /// Retargets every frame of `duplicate` onto `keep`, merging colliding
    /// frame keys per the insertion contract.
    ///
    /// This is the explicit unification point for videos that a caller knows
    /// to be the same source despite differing descriptors (e.g. the same
    /// file via two path spellings). The duplicate's registry entry remains
    /// but becomes unreferenced. Returns the total number of duplicate
    /// instances flagged while merging collided frames.
    pub fn unify_videos(
        &mut self,
        keep: VideoId,
        duplicate: VideoId,
    ) -> Result<usize, PoselabError> {
        for id in [keep, duplicate] {
            if self.video(id).is_none() {
                return Err(PoselabError::InvalidRemap {
                    message: format!("video {id} is not registered"),
                });
            }
        }
        if keep == duplicate {
            return Ok(0);
        }

        let moved_keys: Vec<(VideoId, u64)> = self
            .index
            .keys()
            .filter(|(video, _)| *video == duplicate)
            .copied()
            .collect();

        let mut duplicates = 0;
        for (_, frame_idx) in moved_keys {
            let Some(mut frame) = self.remove_frame(duplicate, frame_idx) else {
                continue;
            };
            frame.video = keep;
            duplicates += self.insert_frame(frame).duplicates;
        }
        Ok(duplicates)
    }

    /// Rebuilds the frame index after deserialization or bulk edits.
    pub(crate) fn rebuild_index(&mut self) {
        self.index = self
            .frames
            .iter()
            .enumerate()
            .map(|(pos, frame)| (frame.key(), pos))
            .collect();
    }

    /// Restores a Labels value from raw parts, rebuilding the frame index.
    /// Codecs use this after their own staging; callers get values that have
    /// already passed validation.
    pub(crate) fn from_parts(
        skeletons: Vec<Skeleton>,
        videos: Vec<Video>,
        tracks: Vec<Track>,
        frames: Vec<LabeledFrame>,
        provenance: BTreeMap<String, serde_json::Value>,
    ) -> Self {
        let mut labels = Self {
            skeletons,
            videos,
            tracks,
            frames,
            index: BTreeMap::new(),
            provenance,
        };
        labels.rebuild_index();
        labels
    }
}
