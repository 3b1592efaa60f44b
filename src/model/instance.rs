//! Points, instances and tracks.
//!
//! A `Point` uses NaN coordinates as the missing sentinel so that "not
//! labeled" stays distinguishable from "labeled at the origin". An `Instance`
//! is a point array aligned to its skeleton's node order; the point count
//! always equals the skeleton node count.

use serde::{Deserialize, Serialize};

use super::ids::{SkeletonId, TrackId};
use super::skeleton::Skeleton;
use crate::error::PoselabError;

/// One landmark coordinate within an instance.
///
/// Equality treats two missing points as equal even though their NaN
/// coordinates would not compare so; without this, no instance containing a
/// missing point could ever equal itself after a round-trip.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct Point {
    /// X coordinate in pixels; NaN when missing.
    pub x: f64,
    /// Y coordinate in pixels; NaN when missing.
    pub y: f64,
    /// Whether the landmark is visible (false = labeled but occluded).
    pub visible: bool,
    /// Per-point confidence, carried only by predicted instances.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

impl Point {
    /// A labeled, visible point.
    pub fn new(x: f64, y: f64) -> Self {
        Self {
            x,
            y,
            visible: true,
            score: None,
        }
    }

    /// A labeled point marked occluded.
    pub fn occluded(x: f64, y: f64) -> Self {
        Self {
            x,
            y,
            visible: false,
            score: None,
        }
    }

    /// The missing sentinel: this node was not labeled in this instance.
    pub fn missing() -> Self {
        Self {
            x: f64::NAN,
            y: f64::NAN,
            visible: false,
            score: None,
        }
    }

    /// Attaches a confidence score.
    pub fn with_score(mut self, score: f64) -> Self {
        self.score = Some(score);
        self
    }

    /// True when this node was not labeled. This is the only sanctioned test;
    /// consumers must not compare coordinates against sentinel values
    /// themselves.
    pub fn is_missing(&self) -> bool {
        self.x.is_nan() || self.y.is_nan()
    }

    /// Numeric equality used by duplicate-instance detection: two missing
    /// points compare equal, otherwise coordinates must match exactly.
    /// Visibility and scores do not participate.
    pub fn numerically_equal(&self, other: &Point) -> bool {
        match (self.is_missing(), other.is_missing()) {
            (true, true) => true,
            (false, false) => self.x == other.x && self.y == other.y,
            _ => false,
        }
    }
}

impl PartialEq for Point {
    fn eq(&self, other: &Self) -> bool {
        self.numerically_equal(other)
            && self.visible == other.visible
            && self.score == other.score
    }
}

/// A persistent cross-frame identity label for one individual.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    /// Name of the individual (e.g. "female", "animal_0").
    pub name: String,
}

impl Track {
    /// Creates a new track.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Whether an instance is ground truth or a model prediction.
///
/// User-labeled instances never carry scores; predicted instances always
/// carry an instance-level score and may carry per-point scores. Scores are
/// unclamped: values outside [0, 1] are preserved.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Scoring {
    /// Ground-truth annotation made by a human.
    UserLabeled,
    /// Model prediction with an instance-level score.
    Predicted {
        /// Instance-level confidence.
        score: f64,
    },
}

/// One pose annotation in one frame, aligned to a skeleton's node order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    points: Vec<Point>,
    /// The skeleton this instance's point array is aligned to.
    pub skeleton: SkeletonId,
    /// Identity of the individual, when tracked.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track: Option<TrackId>,
    /// User-labeled vs predicted.
    pub scoring: Scoring,
}

impl Instance {
    /// Creates a user-labeled (ground truth) instance.
    ///
    /// Fails with [`PoselabError::PointCountMismatch`] unless the point count
    /// equals the skeleton's node count. Per-point scores are stripped: user
    /// labels never carry scores.
    pub fn user(
        skeleton_id: SkeletonId,
        skeleton: &Skeleton,
        mut points: Vec<Point>,
    ) -> Result<Self, PoselabError> {
        check_point_count(skeleton, &points)?;
        for point in &mut points {
            point.score = None;
        }
        Ok(Self {
            points,
            skeleton: skeleton_id,
            track: None,
            scoring: Scoring::UserLabeled,
        })
    }

    /// Creates a predicted instance with an instance-level score. Per-point
    /// scores on the points are preserved.
    pub fn predicted(
        skeleton_id: SkeletonId,
        skeleton: &Skeleton,
        points: Vec<Point>,
        score: f64,
    ) -> Result<Self, PoselabError> {
        check_point_count(skeleton, &points)?;
        Ok(Self {
            points,
            skeleton: skeleton_id,
            track: None,
            scoring: Scoring::Predicted { score },
        })
    }

    /// Associates the instance with a track.
    pub fn with_track(mut self, track: TrackId) -> Self {
        self.track = Some(track);
        self
    }

    /// The point array, index-aligned to the skeleton's node sequence.
    pub fn points(&self) -> &[Point] {
        &self.points
    }

    /// Replaces the point at a node index. Panics if the index is out of
    /// range, mirroring slice indexing.
    pub fn set_point(&mut self, node_index: usize, point: Point) {
        self.points[node_index] = point;
    }

    /// True for predicted instances.
    pub fn is_predicted(&self) -> bool {
        matches!(self.scoring, Scoring::Predicted { .. })
    }

    /// The instance-level score, for predicted instances.
    pub fn score(&self) -> Option<f64> {
        match self.scoring {
            Scoring::UserLabeled => None,
            Scoring::Predicted { score } => Some(score),
        }
    }

    /// Number of labeled (non-missing) points.
    pub fn labeled_count(&self) -> usize {
        self.points.iter().filter(|p| !p.is_missing()).count()
    }

    /// Fraction of nodes labeled in this instance; missing points are
    /// excluded from the numerator. Empty skeletons yield 0.
    pub fn fraction_labeled(&self) -> f64 {
        if self.points.is_empty() {
            return 0.0;
        }
        self.labeled_count() as f64 / self.points.len() as f64
    }

    /// Duplicate detection: same track, same scoring, and numerically equal
    /// point sets.
    pub fn same_pose(&self, other: &Instance) -> bool {
        self.skeleton == other.skeleton
            && self.track == other.track
            && self.scoring == other.scoring
            && self.points.len() == other.points.len()
            && self
                .points
                .iter()
                .zip(other.points.iter())
                .all(|(a, b)| a.numerically_equal(b))
    }

    /// Restores an instance from raw parts without the point-count check.
    /// Codecs use this when the skeleton reference itself may be dangling;
    /// the decode validation stage reports both dangling references and
    /// count mismatches.
    pub(crate) fn from_parts(
        points: Vec<Point>,
        skeleton: SkeletonId,
        track: Option<TrackId>,
        scoring: Scoring,
    ) -> Self {
        Self {
            points,
            skeleton,
            track,
            scoring,
        }
    }

    /// Rebuilds the point array for a new node ordering. `node_map[old]`
    /// gives the new index of the old node, or `None` if dropped. Used by
    /// `Labels::remap_skeleton`.
    pub(crate) fn remapped(
        &self,
        new_skeleton: SkeletonId,
        new_len: usize,
        node_map: &[Option<usize>],
    ) -> Instance {
        let mut points = vec![Point::missing(); new_len];
        for (old_index, point) in self.points.iter().enumerate() {
            if let Some(Some(new_index)) = node_map.get(old_index) {
                points[*new_index] = *point;
            }
        }
        Instance {
            points,
            skeleton: new_skeleton,
            track: self.track,
            scoring: self.scoring,
        }
    }
}

fn check_point_count(skeleton: &Skeleton, points: &[Point]) -> Result<(), PoselabError> {
    if points.len() != skeleton.node_count() {
        return Err(PoselabError::PointCountMismatch {
            skeleton: skeleton.name.clone(),
            points: points.len(),
            nodes: skeleton.node_count(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fly() -> Skeleton {
        let mut s = Skeleton::with_nodes("fly", ["head", "thorax", "abdomen"]).unwrap();
        s.add_edge("head", "thorax").unwrap();
        s.add_edge("thorax", "abdomen").unwrap();
        s
    }

    #[test]
    fn test_missing_point_is_not_origin() {
        let missing = Point::missing();
        let origin = Point::new(0.0, 0.0);
        assert!(missing.is_missing());
        assert!(!origin.is_missing());
        assert!(!missing.numerically_equal(&origin));
    }

    #[test]
    fn test_point_count_must_match_node_count() {
        let skeleton = fly();
        let err = Instance::user(
            SkeletonId(0),
            &skeleton,
            vec![Point::new(1.0, 1.0), Point::new(2.0, 2.0)],
        )
        .unwrap_err();
        assert!(matches!(
            err,
            PoselabError::PointCountMismatch {
                points: 2,
                nodes: 3,
                ..
            }
        ));
    }

    #[test]
    fn test_instance_with_missing_point_is_valid() {
        let skeleton = fly();
        let instance = Instance::user(
            SkeletonId(0),
            &skeleton,
            vec![Point::new(1.0, 1.0), Point::new(2.0, 2.0), Point::missing()],
        )
        .unwrap();
        assert_eq!(instance.labeled_count(), 2);
        assert!((instance.fraction_labeled() - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_user_instances_never_carry_point_scores() {
        let skeleton = fly();
        let instance = Instance::user(
            SkeletonId(0),
            &skeleton,
            vec![
                Point::new(1.0, 1.0).with_score(0.9),
                Point::new(2.0, 2.0),
                Point::missing(),
            ],
        )
        .unwrap();
        assert!(instance.points().iter().all(|p| p.score.is_none()));
        assert_eq!(instance.score(), None);
    }

    #[test]
    fn test_predicted_scores_are_unclamped() {
        let skeleton = fly();
        let instance = Instance::predicted(
            SkeletonId(0),
            &skeleton,
            vec![
                Point::new(1.0, 1.0).with_score(1.7),
                Point::new(2.0, 2.0),
                Point::missing(),
            ],
            -0.25,
        )
        .unwrap();
        assert_eq!(instance.score(), Some(-0.25));
        assert_eq!(instance.points()[0].score, Some(1.7));
    }

    #[test]
    fn test_same_pose_detects_duplicates() {
        let skeleton = fly();
        let points = vec![Point::new(1.0, 1.0), Point::new(2.0, 2.0), Point::missing()];
        let a = Instance::user(SkeletonId(0), &skeleton, points.clone()).unwrap();
        let b = Instance::user(SkeletonId(0), &skeleton, points.clone()).unwrap();
        let c = Instance::predicted(SkeletonId(0), &skeleton, points, 0.5).unwrap();
        assert!(a.same_pose(&b));
        assert!(!a.same_pose(&c));
    }

    #[test]
    fn test_remapped_reorders_points() {
        let skeleton = fly();
        let instance = Instance::user(
            SkeletonId(0),
            &skeleton,
            vec![Point::new(1.0, 1.0), Point::new(2.0, 2.0), Point::new(3.0, 3.0)],
        )
        .unwrap();
        // New order: [abdomen, head]; thorax dropped.
        let remapped = instance.remapped(SkeletonId(1), 2, &[Some(1), None, Some(0)]);
        assert_eq!(remapped.points()[0].x, 3.0);
        assert_eq!(remapped.points()[1].x, 1.0);
    }
}
