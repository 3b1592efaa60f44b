//! Merge outcome reporting.

use serde::Serialize;
use std::fmt;

/// Counts and conflicts accumulated while merging several `Labels` values.
///
/// "Unified" means an incoming entity collapsed onto an existing registry
/// entry (structural match for skeletons, source match for videos, name
/// match for tracks); "added" means it had no counterpart and got its own
/// entry.
#[derive(Clone, Debug, Default, Serialize)]
pub struct MergeReport {
    /// Number of input datasets.
    pub inputs: usize,
    /// Skeletons that got new registry entries.
    pub skeletons_added: usize,
    /// Skeletons that collapsed onto existing structurally equal entries.
    pub skeletons_unified: usize,
    /// Videos that got new registry entries.
    pub videos_added: usize,
    /// Videos that collapsed onto existing same-source entries.
    pub videos_unified: usize,
    /// Tracks that got new registry entries.
    pub tracks_added: usize,
    /// Tracks that collapsed onto existing same-name entries.
    pub tracks_unified: usize,
    /// Frames inserted at previously unoccupied keys.
    pub frames_added: usize,
    /// Frames merged into an existing key.
    pub frames_merged: usize,
    /// Incoming instances skipped as exact duplicates of existing ones.
    pub duplicate_instances: usize,
    /// Same-name skeletons with incompatible structure.
    pub conflicts: Vec<MergeConflict>,
}

impl MergeReport {
    /// True when no conflicts were found.
    pub fn is_clean(&self) -> bool {
        self.conflicts.is_empty()
    }
}

impl fmt::Display for MergeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Merged {} input(s): {} skeleton(s) ({} unified), {} video(s) ({} unified), \
             {} track(s) ({} unified)",
            self.inputs,
            self.skeletons_added,
            self.skeletons_unified,
            self.videos_added,
            self.videos_unified,
            self.tracks_added,
            self.tracks_unified,
        )?;
        writeln!(
            f,
            "Frames: {} added, {} merged, {} duplicate instance(s) skipped",
            self.frames_added, self.frames_merged, self.duplicate_instances
        )?;
        if !self.conflicts.is_empty() {
            writeln!(f, "Conflicts ({}):", self.conflicts.len())?;
            for conflict in &self.conflicts {
                writeln!(f, "  - {}", conflict)?;
            }
        }
        Ok(())
    }
}

/// Two structurally different skeletons claiming the same name.
///
/// The merge keeps both as distinct registry entries; callers decide whether
/// to reconcile them via `Labels::remap_skeleton` or treat the report as
/// fatal (strict mode does the latter automatically).
#[derive(Clone, Debug, Serialize)]
pub struct MergeConflict {
    /// The contested skeleton name.
    pub skeleton: String,
    /// Zero-based position of the input that brought the incompatible
    /// structure.
    pub input: usize,
}

impl fmt::Display for MergeConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "input {} carries skeleton '{}' with a structure incompatible with an \
             earlier input's skeleton of the same name",
            self.input, self.skeleton
        )
    }
}
