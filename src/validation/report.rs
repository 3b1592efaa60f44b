//! Validation report types for structured error reporting.

use std::fmt;

use crate::model::{SkeletonId, TrackId, VideoId};

/// The result of validating a `Labels` value.
///
/// Contains all issues found during validation, categorized by severity.
#[derive(Clone, Debug, Default)]
pub struct ValidationReport {
    /// All issues found during validation.
    pub issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    /// Creates a new empty report.
    pub fn new() -> Self {
        Self { issues: Vec::new() }
    }

    /// Adds an issue to the report.
    pub fn add(&mut self, issue: ValidationIssue) {
        self.issues.push(issue);
    }

    /// Returns the number of errors in the report.
    pub fn error_count(&self) -> usize {
        self.issues
            .iter()
            .filter(|i| i.severity == Severity::Error)
            .count()
    }

    /// Returns the number of warnings in the report.
    pub fn warning_count(&self) -> usize {
        self.issues
            .iter()
            .filter(|i| i.severity == Severity::Warning)
            .count()
    }

    /// Returns true if there are no errors.
    pub fn is_ok(&self) -> bool {
        self.error_count() == 0
    }

    /// Returns true if there are no issues at all.
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.issues.is_empty() {
            return writeln!(f, "Validation passed: no issues found");
        }

        writeln!(
            f,
            "Validation completed with {} error(s) and {} warning(s):",
            self.error_count(),
            self.warning_count()
        )?;
        writeln!(f)?;

        for issue in &self.issues {
            writeln!(f, "  {}", issue)?;
        }

        Ok(())
    }
}

/// A single validation issue (error or warning).
#[derive(Clone, Debug)]
pub struct ValidationIssue {
    /// The severity of the issue.
    pub severity: Severity,

    /// A stable code for the issue type.
    pub code: IssueCode,

    /// A human-readable description of the issue.
    pub message: String,

    /// Context about where the issue occurred.
    pub context: IssueContext,
}

impl ValidationIssue {
    /// Creates a new validation issue.
    pub fn new(
        severity: Severity,
        code: IssueCode,
        message: impl Into<String>,
        context: IssueContext,
    ) -> Self {
        Self {
            severity,
            code,
            message: message.into(),
            context,
        }
    }

    /// Creates a new error.
    pub fn error(code: IssueCode, message: impl Into<String>, context: IssueContext) -> Self {
        Self::new(Severity::Error, code, message, context)
    }

    /// Creates a new warning.
    pub fn warning(code: IssueCode, message: impl Into<String>, context: IssueContext) -> Self {
        Self::new(Severity::Warning, code, message, context)
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let severity = match self.severity {
            Severity::Error => "ERROR",
            Severity::Warning => "WARN ",
        };
        write!(
            f,
            "[{}] {:?} in {}: {}",
            severity, self.code, self.context, self.message
        )
    }
}

/// The severity of a validation issue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    /// A warning that doesn't break referential closure but may indicate
    /// problems.
    Warning,
    /// An error that indicates a broken invariant.
    Error,
}

/// A stable code identifying the type of validation issue.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IssueCode {
    // Referential closure
    /// An instance references a skeleton absent from the registry.
    DanglingSkeletonRef,
    /// A frame references a video absent from the registry.
    DanglingVideoRef,
    /// An instance references a track absent from the registry.
    DanglingTrackRef,

    // Instance issues
    /// An instance's point count differs from its skeleton's node count.
    PointCountMismatch,

    // Frame issues
    /// A frame index is at or beyond the video's known frame count.
    FrameIndexOutOfRange,

    // Skeleton issues
    /// An edge endpoint index is outside the node sequence.
    EdgeEndpointOutOfRange,
    /// A symmetry endpoint index is outside the node sequence.
    SymmetryEndpointOutOfRange,
    /// Both an edge and its reversal are present.
    ReversedDuplicateEdge,
    /// A node appears in more than one symmetry pair.
    NodeInMultipleSymmetries,
    /// A skeleton has an empty name.
    EmptySkeletonName,

    // Track issues
    /// A track is registered but never referenced by any instance.
    UnusedTrack,
}

/// Context about where a validation issue occurred.
#[derive(Clone, Debug)]
pub enum IssueContext {
    /// Issue with the labels value as a whole.
    Labels,
    /// Issue with a specific skeleton.
    Skeleton { id: SkeletonId },
    /// Issue with a specific video.
    Video { id: VideoId },
    /// Issue with a specific track.
    Track { id: TrackId },
    /// Issue with a specific frame.
    Frame { video: VideoId, frame_idx: u64 },
    /// Issue with a specific instance within a frame.
    Instance {
        video: VideoId,
        frame_idx: u64,
        position: usize,
    },
}

impl fmt::Display for IssueContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IssueContext::Labels => write!(f, "labels"),
            IssueContext::Skeleton { id } => write!(f, "skeleton {}", id),
            IssueContext::Video { id } => write!(f, "video {}", id),
            IssueContext::Track { id } => write!(f, "track {}", id),
            IssueContext::Frame { video, frame_idx } => {
                write!(f, "frame (video {}, idx {})", video, frame_idx)
            }
            IssueContext::Instance {
                video,
                frame_idx,
                position,
            } => write!(
                f,
                "instance {} of frame (video {}, idx {})",
                position, video, frame_idx
            ),
        }
    }
}
