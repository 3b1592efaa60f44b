//! Core data model for poselab.
//!
//! This module defines the canonical, format-agnostic representation of
//! multi-animal pose annotations. It is the hub every codec passes through:
//! readers build a [`Labels`] value, writers walk one.
//!
//! # Design Principles
//!
//! 1. **Shared entities, referenced once**: skeletons, videos and tracks are
//!    arena-owned by [`Labels`] and referenced by handle from frames and
//!    instances: a skeleton used by a thousand frames exists once.
//!
//! 2. **Construction enforces local invariants**: duplicate nodes, dangling
//!    edge endpoints and point-count mismatches are rejected at build time
//!    and can never enter a `Labels` value through the API.
//!
//! 3. **Permissive carriage of numbers**: scores are unclamped and missing
//!    points use a NaN sentinel, so "not labeled" is distinguishable from
//!    "labeled at origin".

mod ids;
mod instance;
mod labels;
mod skeleton;
mod video;

pub use ids::{SkeletonId, TrackId, VideoId};
pub use instance::{Instance, Point, Scoring, Track};
pub use labels::{FrameInsert, LabeledFrame, Labels};
pub use skeleton::{Edge, Node, Skeleton, SymmetryPair};
pub use video::{Video, VideoShape, VideoSource};
