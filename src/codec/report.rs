//! Encode lossiness reporting.
//!
//! Before exporting to a lossy target, callers can build an [`EncodeReport`]
//! that inspects a concrete `Labels` value and lists exactly which model
//! fields the target format will omit, plus the deterministic policies the
//! writer applies.

use serde::Serialize;
use std::fmt;

use super::Format;
use crate::model::Labels;

/// A model field some format cannot represent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DroppedField {
    /// Cross-frame track identity.
    TrackIdentity,
    /// Skeleton symmetry pairs.
    SymmetryPairs,
    /// Skeleton edges.
    Edges,
    /// Per-point confidence scores.
    PointScores,
    /// Instance-level prediction scores.
    InstanceScores,
    /// The user-labeled vs predicted distinction.
    UserPredictedFlag,
    /// Free-form provenance metadata.
    Provenance,
    /// Video shape information.
    VideoShape,
}

/// A report analyzing what an encode to a given format would lose.
#[derive(Clone, Debug, Default, Serialize)]
pub struct EncodeReport {
    /// Target format name.
    pub format: String,
    /// Issues that apply to the dataset being encoded.
    pub issues: Vec<EncodeIssue>,
}

impl EncodeReport {
    /// Creates an empty report for the named target format.
    pub fn new(format: impl Into<String>) -> Self {
        Self {
            format: format.into(),
            issues: Vec::new(),
        }
    }

    /// Adds an issue to the report.
    pub fn add(&mut self, issue: EncodeIssue) {
        self.issues.push(issue);
    }

    /// Count of warning-level issues (true lossiness).
    pub fn warning_count(&self) -> usize {
        self.issues
            .iter()
            .filter(|i| i.severity == EncodeSeverity::Warning)
            .count()
    }

    /// Count of info-level issues (policy notes).
    pub fn info_count(&self) -> usize {
        self.issues
            .iter()
            .filter(|i| i.severity == EncodeSeverity::Info)
            .count()
    }

    /// Returns true if encoding this dataset would lose information.
    pub fn is_lossy(&self) -> bool {
        self.warning_count() > 0
    }
}

impl fmt::Display for EncodeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.issues.is_empty() {
            return writeln!(f, "Encoding to {} loses nothing for this dataset", self.format);
        }

        let warnings = self.warning_count();
        if warnings > 0 {
            writeln!(f, "Warnings ({}):", warnings)?;
            for issue in self
                .issues
                .iter()
                .filter(|i| i.severity == EncodeSeverity::Warning)
            {
                writeln!(f, "  - {}", issue.message)?;
            }
        }

        let infos = self.info_count();
        if infos > 0 {
            writeln!(f, "Notes ({}):", infos)?;
            for issue in self
                .issues
                .iter()
                .filter(|i| i.severity == EncodeSeverity::Info)
            {
                writeln!(f, "  - {}", issue.message)?;
            }
        }

        Ok(())
    }
}

/// A single issue discovered during encode analysis.
#[derive(Clone, Debug, Serialize)]
pub struct EncodeIssue {
    pub severity: EncodeSeverity,
    pub code: EncodeIssueCode,
    pub message: String,
}

impl EncodeIssue {
    /// Create a warning-level issue (indicates lossiness).
    pub fn warning(code: EncodeIssueCode, message: impl Into<String>) -> Self {
        Self {
            severity: EncodeSeverity::Warning,
            code,
            message: message.into(),
        }
    }

    /// Create an info-level issue (policy note).
    pub fn info(code: EncodeIssueCode, message: impl Into<String>) -> Self {
        Self {
            severity: EncodeSeverity::Info,
            code,
            message: message.into(),
        }
    }
}

/// Severity level for encode issues.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EncodeSeverity {
    /// Information loss.
    Warning,
    /// Deterministic writer policy; nothing is lost.
    Info,
}

/// Stable issue codes for programmatic consumption.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EncodeIssueCode {
    /// Track identity will be dropped.
    DropTrackIdentity,
    /// Symmetry pairs will be dropped.
    DropSymmetryPairs,
    /// Skeleton edges will be dropped.
    DropEdges,
    /// Per-point scores will be dropped.
    DropPointScores,
    /// Instance-level scores will be dropped.
    DropInstanceScores,
    /// The user-labeled vs predicted distinction will be dropped.
    DropUserPredictedFlag,
    /// Provenance metadata will be dropped.
    DropProvenance,
    /// Video shape will be dropped.
    DropVideoShape,

    // Writer policies (Info level)
    /// COCO writer assigns category/image/annotation ids by registry and
    /// sorted frame order.
    CocoWriterIdAssignment,
    /// DLC writer synthesizes per-frame individual slots for untracked
    /// instances.
    DlcWriterUntrackedSlots,
    /// Series writer creates anonymous groups for untracked instances.
    SeriesWriterAnonymousGroups,
    /// Label Studio writer emits percent coordinates from video shape
    /// (100x100 fallback when shape is unknown).
    LabelStudioPercentCoordinates,
}

/// Analyzes what encoding `labels` to `format` would drop.
///
/// Warnings are emitted only for drops that actually apply to this dataset;
/// a dataset with no tracks gets no track warning even for track-less
/// formats.
pub fn build_encode_report(labels: &Labels, format: Format) -> EncodeReport {
    let mut report = EncodeReport::new(format.name());

    let tracked = labels
        .frames()
        .flat_map(|f| f.instances.iter())
        .filter(|i| i.track.is_some())
        .count();
    let with_point_scores = labels
        .frames()
        .flat_map(|f| f.instances.iter())
        .filter(|i| i.points().iter().any(|p| p.score.is_some()))
        .count();
    let predicted = labels
        .frames()
        .flat_map(|f| f.instances.iter())
        .filter(|i| i.is_predicted())
        .count();
    let symmetries = labels
        .skeletons()
        .iter()
        .map(|s| s.symmetries().count())
        .sum::<usize>();
    let edges = labels
        .skeletons()
        .iter()
        .map(|s| s.edges().count())
        .sum::<usize>();

    for field in format.dropped_fields() {
        match field {
            DroppedField::TrackIdentity if tracked > 0 => {
                report.add(EncodeIssue::warning(
                    EncodeIssueCode::DropTrackIdentity,
                    format!("{} tracked instance(s) will lose track identity", tracked),
                ));
            }
            DroppedField::SymmetryPairs if symmetries > 0 => {
                report.add(EncodeIssue::warning(
                    EncodeIssueCode::DropSymmetryPairs,
                    format!("{} symmetry pair(s) will be dropped", symmetries),
                ));
            }
            DroppedField::Edges if edges > 0 => {
                report.add(EncodeIssue::warning(
                    EncodeIssueCode::DropEdges,
                    format!("{} skeleton edge(s) will be dropped", edges),
                ));
            }
            DroppedField::PointScores if with_point_scores > 0 => {
                report.add(EncodeIssue::warning(
                    EncodeIssueCode::DropPointScores,
                    format!(
                        "{} instance(s) carry per-point scores that will be dropped",
                        with_point_scores
                    ),
                ));
            }
            DroppedField::InstanceScores if predicted > 0 => {
                report.add(EncodeIssue::warning(
                    EncodeIssueCode::DropInstanceScores,
                    format!("{} predicted instance(s) will lose instance scores", predicted),
                ));
            }
            DroppedField::UserPredictedFlag if predicted < labels.instance_count() => {
                report.add(EncodeIssue::warning(
                    EncodeIssueCode::DropUserPredictedFlag,
                    "the user-labeled vs predicted distinction will be dropped",
                ));
            }
            DroppedField::Provenance if !labels.provenance.is_empty() => {
                report.add(EncodeIssue::warning(
                    EncodeIssueCode::DropProvenance,
                    format!(
                        "{} provenance entr(ies) will be dropped",
                        labels.provenance.len()
                    ),
                ));
            }
            DroppedField::VideoShape
                if labels.videos().iter().any(|v| v.shape.is_some()) =>
            {
                report.add(EncodeIssue::warning(
                    EncodeIssueCode::DropVideoShape,
                    "video shape information will be dropped",
                ));
            }
            _ => {}
        }
    }

    match format {
        Format::CocoKeypoints => report.add(EncodeIssue::info(
            EncodeIssueCode::CocoWriterIdAssignment,
            "COCO writer assigns ids deterministically: categories by registry order, \
             images and annotations by sorted frame order",
        )),
        Format::DlcCsv if tracked < labels.instance_count() => report.add(EncodeIssue::info(
            EncodeIssueCode::DlcWriterUntrackedSlots,
            "DLC writer assigns untracked instances to synthesized per-frame individual slots",
        )),
        Format::NwbSeries if tracked < labels.instance_count() => report.add(EncodeIssue::info(
            EncodeIssueCode::SeriesWriterAnonymousGroups,
            "series writer assigns untracked instances to anonymous groups",
        )),
        Format::LabelStudio => report.add(EncodeIssue::info(
            EncodeIssueCode::LabelStudioPercentCoordinates,
            "Label Studio writer emits percent coordinates; videos without shape fall back \
             to a 100x100 reference frame",
        )),
        _ => {}
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Instance, LabeledFrame, Labels, Point, Skeleton, Track, Video};

    fn tracked_labels() -> Labels {
        let mut labels = Labels::new();
        let mut skeleton = Skeleton::with_nodes("fly", ["head", "thorax"]).unwrap();
        skeleton.add_edge("head", "thorax").unwrap();
        let skeleton_id = labels.add_skeleton(skeleton);
        let video = labels.add_video(Video::media_file("v.mp4"));
        let track = labels.add_track(Track::new("animal_0"));
        let instance = Instance::predicted(
            skeleton_id,
            labels.skeleton(skeleton_id).unwrap(),
            vec![Point::new(1.0, 1.0).with_score(0.8), Point::missing()],
            0.9,
        )
        .unwrap()
        .with_track(track);
        labels.insert_frame(LabeledFrame::new(video, 0, vec![instance]));
        labels
    }

    #[test]
    fn native_loses_nothing() {
        let labels = tracked_labels();
        let report = build_encode_report(&labels, Format::Native);
        assert!(!report.is_lossy());
    }

    #[test]
    fn coco_drops_tracks_and_point_scores() {
        let labels = tracked_labels();
        let report = build_encode_report(&labels, Format::CocoKeypoints);
        assert!(report.is_lossy());
        assert!(report
            .issues
            .iter()
            .any(|i| i.code == EncodeIssueCode::DropTrackIdentity));
        assert!(report
            .issues
            .iter()
            .any(|i| i.code == EncodeIssueCode::DropPointScores));
    }

    #[test]
    fn drops_are_conditional_on_content() {
        // No tracks, no scores: COCO loses nothing for this dataset.
        let mut labels = Labels::new();
        let skeleton_id = labels.add_skeleton(Skeleton::with_nodes("s", ["a"]).unwrap());
        let video = labels.add_video(Video::media_file("v.mp4"));
        let instance = Instance::user(
            skeleton_id,
            labels.skeleton(skeleton_id).unwrap(),
            vec![Point::new(1.0, 2.0)],
        )
        .unwrap();
        labels.insert_frame(LabeledFrame::new(video, 0, vec![instance]));

        let report = build_encode_report(&labels, Format::CocoKeypoints);
        assert!(!report.is_lossy());
        // Policy note is still present.
        assert!(report.info_count() > 0);
    }

    #[test]
    fn report_serializes_to_json() {
        let labels = tracked_labels();
        let report = build_encode_report(&labels, Format::CocoKeypoints);
        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"format\":\"coco-keypoints\""));
        assert!(json.contains("\"code\":\"drop_track_identity\""));
    }
}
