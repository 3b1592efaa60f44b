//! Format codecs: one module per supported external format plus the shared
//! decode machinery.
//!
//! The supported formats form a closed set, [`Format`], dispatched by tag.
//! Adding a format means adding a variant and an `io_*` module, not touching
//! the core model.
//!
//! # Decode staging
//!
//! Every decode runs the same forward-only pipeline:
//!
//! 1. *parse* the raw bytes into format schema types;
//! 2. *registries*: construct each skeleton/video/track exactly once, keyed
//!    by the format's native identifier, even when the raw encoding repeats
//!    it per record;
//! 3. *frames*: link instances to the already-built registry entries, with
//!    the registry's node order dictating point-array layout;
//! 4. *validate*: check referential closure.
//!
//! [`LabelsBuilder`] carries stages 2-3 and consumes itself in
//! [`LabelsBuilder::finish`], so a failed decode drops all partial state and
//! a caller never observes a half-linked `Labels` value.

pub mod io_coco_keypoints;
pub mod io_dlc_csv;
pub mod io_label_studio;
pub mod io_native;
pub mod io_nwb_series;
pub mod report;

pub use report::{
    build_encode_report, DroppedField, EncodeIssue, EncodeIssueCode, EncodeReport, EncodeSeverity,
};

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::PoselabError;
use crate::model::{Instance, LabeledFrame, Labels, Skeleton, SkeletonId, Track, TrackId, Video,
    VideoId};
use crate::validation::validate_labels;

/// The closed set of supported external formats.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Format {
    /// The schema-versioned native container (lossless round-trip).
    Native,
    /// COCO-style keypoint JSON (flat annotation list + keypoint categories).
    CocoKeypoints,
    /// DeepLabCut-style multi-animal CSV with optional YAML config.
    DlcCsv,
    /// Label Studio task-export JSON with keypoint/relation results.
    LabelStudio,
    /// Hierarchical time-indexed pose series container.
    NwbSeries,
}

/// Classification of how lossy a format is relative to the model.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Lossiness {
    /// Format can represent everything in the model (round-trip safe).
    Lossless,
    /// Format may lose some information depending on dataset content.
    Conditional,
    /// Format always loses some model information.
    Lossy,
}

impl Format {
    /// Human-readable name for the format.
    pub fn name(&self) -> &'static str {
        match self {
            Format::Native => "native",
            Format::CocoKeypoints => "coco-keypoints",
            Format::DlcCsv => "dlc-csv",
            Format::LabelStudio => "label-studio",
            Format::NwbSeries => "nwb-series",
        }
    }

    /// How lossy this format is relative to the model.
    pub fn lossiness(&self) -> Lossiness {
        match self {
            Format::Native => Lossiness::Lossless,
            Format::CocoKeypoints => Lossiness::Conditional,
            Format::DlcCsv => Lossiness::Conditional,
            Format::LabelStudio => Lossiness::Conditional,
            Format::NwbSeries => Lossiness::Lossy,
        }
    }

    /// The model fields this format structurally cannot represent.
    ///
    /// Export of any of these is a no-op (the field is simply absent from
    /// the output), never a silent numeric substitution;
    /// [`build_encode_report`] reports which drops apply to a concrete
    /// dataset.
    pub fn dropped_fields(&self) -> &'static [DroppedField] {
        match self {
            Format::Native => &[],
            Format::CocoKeypoints => &[
                DroppedField::TrackIdentity,
                DroppedField::SymmetryPairs,
                DroppedField::PointScores,
                DroppedField::Provenance,
            ],
            Format::DlcCsv => &[
                DroppedField::SymmetryPairs,
                DroppedField::InstanceScores,
                DroppedField::Provenance,
                DroppedField::VideoShape,
            ],
            Format::LabelStudio => &[
                DroppedField::SymmetryPairs,
                DroppedField::Edges,
                DroppedField::PointScores,
                DroppedField::Provenance,
            ],
            Format::NwbSeries => &[
                DroppedField::SymmetryPairs,
                DroppedField::UserPredictedFlag,
                DroppedField::Provenance,
            ],
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The decode stage at which a failure occurred, carried in
/// [`PoselabError::Format`] so errors locate the offending record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecodeStage {
    /// Reading raw bytes into format schema types.
    Parse,
    /// Constructing the skeleton/video/track registries.
    Registries,
    /// Linking frames and instances to registry entries.
    Frames,
    /// Checking referential closure.
    Validate,
}

impl fmt::Display for DecodeStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DecodeStage::Parse => "parsing",
            DecodeStage::Registries => "registry construction",
            DecodeStage::Frames => "frame linking",
            DecodeStage::Validate => "validation",
        };
        f.write_str(name)
    }
}

/// Decodes an external file into a validated `Labels` value.
///
/// Decode is atomic: any stage failure aborts the whole load and no
/// partially-linked value is ever returned.
pub fn decode(format: Format, source: &Path) -> Result<Labels, PoselabError> {
    match format {
        Format::Native => io_native::read_native(source),
        Format::CocoKeypoints => io_coco_keypoints::read_coco_keypoints(source),
        Format::DlcCsv => io_dlc_csv::read_dlc_csv(source),
        Format::LabelStudio => {
            io_label_studio::read_label_studio(source, &io_label_studio::LabelStudioOptions::default())
        }
        Format::NwbSeries => io_nwb_series::read_nwb_series(source),
    }
}

/// Encodes a `Labels` value to an external file.
///
/// Fields the target format cannot represent are omitted per
/// [`Format::dropped_fields`]; use [`build_encode_report`] beforehand to see
/// which omissions apply to this dataset.
pub fn encode(format: Format, labels: &Labels, destination: &Path) -> Result<(), PoselabError> {
    match format {
        Format::Native => io_native::write_native(destination, labels),
        Format::CocoKeypoints => io_coco_keypoints::write_coco_keypoints(destination, labels),
        Format::DlcCsv => io_dlc_csv::write_dlc_csv(destination, labels),
        Format::LabelStudio => io_label_studio::write_label_studio(destination, labels),
        Format::NwbSeries => io_nwb_series::write_nwb_series(destination, labels),
    }
}

/// Staged accumulator shared by all decoders.
///
/// Entities are interned by the format's native key, so a skeleton declared
/// identically for every one of N frames still yields exactly one registry
/// entry shared by all N. Consuming `finish` makes the whole decode
/// all-or-nothing.
pub struct LabelsBuilder {
    format: &'static str,
    source: PathBuf,
    labels: Labels,
    skeleton_keys: HashMap<String, SkeletonId>,
    video_keys: HashMap<String, VideoId>,
    track_keys: HashMap<String, TrackId>,
}

impl LabelsBuilder {
    /// Creates a builder for a decode of `source` by the named format.
    pub fn new(format: &'static str, source: &Path) -> Self {
        Self {
            format,
            source: source.to_path_buf(),
            labels: Labels::new(),
            skeleton_keys: HashMap::new(),
            video_keys: HashMap::new(),
            track_keys: HashMap::new(),
        }
    }

    /// Interns a skeleton under the format's native key. The first
    /// declaration wins; repeats of the key return the existing handle.
    /// Structurally equal skeletons under different keys also collapse.
    pub fn intern_skeleton(&mut self, key: impl Into<String>, skeleton: Skeleton) -> SkeletonId {
        let key = key.into();
        if let Some(&id) = self.skeleton_keys.get(&key) {
            return id;
        }
        let id = self.labels.add_skeleton(skeleton);
        self.skeleton_keys.insert(key, id);
        id
    }

    /// Interns a video under the format's native key.
    pub fn intern_video(&mut self, key: impl Into<String>, video: Video) -> VideoId {
        let key = key.into();
        if let Some(&id) = self.video_keys.get(&key) {
            return id;
        }
        let id = self.labels.add_video(video);
        self.video_keys.insert(key, id);
        id
    }

    /// Interns a track under the format's native key.
    pub fn intern_track(&mut self, key: impl Into<String>, track: Track) -> TrackId {
        let key = key.into();
        if let Some(&id) = self.track_keys.get(&key) {
            return id;
        }
        let id = self.labels.add_track(track);
        self.track_keys.insert(key, id);
        id
    }

    /// Looks up a previously interned skeleton handle.
    pub fn skeleton_for(&self, key: &str) -> Option<SkeletonId> {
        self.skeleton_keys.get(key).copied()
    }

    /// Looks up a previously interned video handle.
    pub fn video_for(&self, key: &str) -> Option<VideoId> {
        self.video_keys.get(key).copied()
    }

    /// Looks up a previously interned track handle.
    pub fn track_for(&self, key: &str) -> Option<TrackId> {
        self.track_keys.get(key).copied()
    }

    /// Read access to the registries built so far (e.g. to fetch a skeleton
    /// for instance construction during frame linking).
    pub fn registry(&self) -> &Labels {
        &self.labels
    }

    /// Links a frame to the registries, merging on an occupied key per the
    /// `Labels` insertion contract.
    pub fn link_frame(&mut self, video: VideoId, frame_idx: u64, instances: Vec<Instance>) {
        self.labels
            .insert_frame(LabeledFrame::new(video, frame_idx, instances));
    }

    /// Records a provenance entry on the decoded value.
    pub fn set_provenance(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.labels.provenance.insert(key.into(), value);
    }

    /// Builds a typed malformed-data error pointing at this decode's source
    /// and stage.
    pub fn malformed(&self, stage: DecodeStage, message: impl Into<String>) -> PoselabError {
        PoselabError::Format {
            format: self.format,
            path: self.source.clone(),
            stage,
            message: message.into(),
        }
    }

    /// Runs the validation stage and returns the finished `Labels` value.
    ///
    /// Any closure error discards all accumulated state and surfaces as
    /// [`PoselabError::ReferentialIntegrity`] with the full report attached.
    pub fn finish(self) -> Result<Labels, PoselabError> {
        let report = validate_labels(&self.labels);
        if !report.is_ok() {
            return Err(PoselabError::ReferentialIntegrity {
                error_count: report.error_count(),
                report,
            });
        }
        Ok(self.labels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Point;

    fn fly() -> Skeleton {
        Skeleton::with_nodes("fly", ["head", "thorax"]).unwrap()
    }

    #[test]
    fn test_intern_skeleton_once_per_key() {
        let mut builder = LabelsBuilder::new("test", Path::new("<test>"));
        let a = builder.intern_skeleton("cat:1", fly());
        let b = builder.intern_skeleton("cat:1", fly());
        assert_eq!(a, b);
        assert_eq!(builder.registry().skeletons().len(), 1);
    }

    #[test]
    fn test_structurally_equal_keys_collapse() {
        let mut builder = LabelsBuilder::new("test", Path::new("<test>"));
        let a = builder.intern_skeleton("cat:1", fly());
        let b = builder.intern_skeleton("cat:2", fly());
        assert_eq!(a, b);
    }

    #[test]
    fn test_finish_rejects_dangling_refs() {
        let mut builder = LabelsBuilder::new("test", Path::new("<test>"));
        let skeleton_id = builder.intern_skeleton("s", fly());
        let video = builder.intern_video("v", Video::media_file("v.mp4"));
        let instance = Instance::user(
            skeleton_id,
            builder.registry().skeleton(skeleton_id).unwrap(),
            vec![Point::new(0.0, 0.0), Point::new(1.0, 1.0)],
        )
        .unwrap()
        .with_track(TrackId(7)); // never interned
        builder.link_frame(video, 0, vec![instance]);

        let err = builder.finish().unwrap_err();
        assert!(matches!(err, PoselabError::ReferentialIntegrity { .. }));
    }

    #[test]
    fn test_format_dispatch_names() {
        assert_eq!(Format::Native.name(), "native");
        assert_eq!(Format::Native.lossiness(), Lossiness::Lossless);
        assert!(Format::Native.dropped_fields().is_empty());
        assert!(Format::CocoKeypoints
            .dropped_fields()
            .contains(&DroppedField::TrackIdentity));
    }
}
