use std::path::PathBuf;
use thiserror::Error;

use crate::codec::DecodeStage;
use crate::merge::MergeReport;
use crate::validation::ValidationReport;

/// The main error type for poselab operations.
///
/// Structural violations (nodes, edges, point counts) fail at construction
/// and can never enter a `Labels` value; decode-stage failures abort the
/// whole decode and carry the stage reached plus enough identifiers to
/// locate the offending record.
#[derive(Debug, Error)]
pub enum PoselabError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // ------------------------------------------------------------------
    // Skeleton construction
    // ------------------------------------------------------------------
    #[error("duplicate node '{name}' in skeleton '{skeleton}'")]
    DuplicateNode { skeleton: String, name: String },

    #[error("unknown node '{name}' in skeleton '{skeleton}'")]
    UnknownNode { skeleton: String, name: String },

    // The endpoint fields avoid the name `source`, which thiserror reserves
    // for error chaining.
    #[error("duplicate edge {from_node} -> {to_node} in skeleton '{skeleton}'")]
    DuplicateEdge {
        skeleton: String,
        from_node: String,
        to_node: String,
    },

    #[error("edge from node '{name}' to itself in skeleton '{skeleton}'")]
    SelfLoopEdge { skeleton: String, name: String },

    #[error("node '{name}' already has a symmetry partner in skeleton '{skeleton}'")]
    DuplicateSymmetry { skeleton: String, name: String },

    // ------------------------------------------------------------------
    // Instance construction
    // ------------------------------------------------------------------
    #[error("instance has {points} point(s) but skeleton '{skeleton}' has {nodes} node(s)")]
    PointCountMismatch {
        skeleton: String,
        points: usize,
        nodes: usize,
    },

    // ------------------------------------------------------------------
    // Labels mutation
    // ------------------------------------------------------------------
    #[error("invalid remap: {message}")]
    InvalidRemap { message: String },

    // ------------------------------------------------------------------
    // Decode / encode
    // ------------------------------------------------------------------
    #[error("referential integrity violated with {error_count} error(s)")]
    ReferentialIntegrity {
        error_count: usize,
        report: ValidationReport,
    },

    #[error("unsupported native schema version {found} (supported: {supported})")]
    SchemaVersion { found: u64, supported: &'static str },

    #[error("malformed {format} data in {path} during {stage}: {message}")]
    Format {
        format: &'static str,
        path: PathBuf,
        stage: DecodeStage,
        message: String,
    },

    #[error("failed to parse native container {path}: {source}")]
    NativeParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to write native container {path}: {source}")]
    NativeWrite {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to parse COCO keypoints JSON from {path}: {source}")]
    CocoParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to write COCO keypoints JSON to {path}: {source}")]
    CocoWrite {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to parse DLC CSV from {path}: {source}")]
    DlcCsvParse {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("failed to write DLC CSV to {path}: {source}")]
    DlcCsvWrite {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("failed to parse DLC config {path}: {source}")]
    DlcConfigParse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("failed to parse Label Studio JSON from {path}: {source}")]
    LabelStudioParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to write Label Studio JSON to {path}: {source}")]
    LabelStudioWrite {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to parse pose series container from {path}: {source}")]
    SeriesParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to write pose series container to {path}: {source}")]
    SeriesWrite {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    // ------------------------------------------------------------------
    // Merge
    // ------------------------------------------------------------------
    #[error("merge produced {conflicts} conflict(s) in strict mode")]
    MergeConflict {
        conflicts: usize,
        report: MergeReport,
    },
}
