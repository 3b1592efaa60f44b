//! Poselab: a canonical in-memory model for multi-animal pose annotations.
//!
//! Pose-tracking tools all speak different dialects: flat keypoint tables,
//! task exports, time-indexed series. Poselab holds one strongly typed
//! model, [`Labels`](model::Labels), owning deduplicated skeleton, video and
//! track registries plus the labeled frames that reference them, and a
//! codec per external format, so N formats need N codecs instead of N×M
//! converters.
//!
//! # Modules
//!
//! - [`model`]: the core entities (Skeleton, Video, Track, Instance,
//!   LabeledFrame, Labels) and their identity rules
//! - [`codec`]: per-format readers/writers plus the staged, atomic decode
//!   machinery and encode lossiness reports
//! - [`merge`]: combining several `Labels` values with a conflict report
//! - [`validation`]: referential-integrity checking with coded issues
//! - [`error`]: the crate-wide error type
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use poselab::codec::{decode, encode, Format};
//!
//! # fn main() -> Result<(), poselab::PoselabError> {
//! let labels = decode(Format::CocoKeypoints, Path::new("annotations.json"))?;
//! encode(Format::Native, &labels, Path::new("labels.poselab.json"))?;
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod error;
pub mod merge;
pub mod model;
pub mod validation;

pub use error::PoselabError;
pub use merge::{merge, MergeOptions, MergeReport};
pub use model::{
    Instance, LabeledFrame, Labels, Point, Skeleton, SkeletonId, Track, TrackId, Video,
    VideoId, VideoShape,
};
pub use validation::{validate_labels, ValidationReport};
