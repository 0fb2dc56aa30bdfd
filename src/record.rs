use serde::Serialize;

use crate::geometry::TargetPoint;

/// One gaze sample taken while a target was active.
///
/// Field names follow the wire format the downstream analysis scripts
/// already consume: `(x, y)` is the estimate, `(cx, cy)` the active
/// target's resolved pixel position, `dist` the Euclidean distance between
/// them, and `count` the whole-seconds countdown shown when the sample was
/// taken.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SampleRecord {
    pub x: f64,
    pub y: f64,
    pub cx: f64,
    pub cy: f64,
    pub dist: f64,
    pub count: u32,
}

/// Scored outcome of one fixation target, frozen at window close.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PointResult {
    pub x: f64,
    pub y: f64,
    pub valid: bool,
    pub hit_ratio: f64,
    pub hit_count: u32,
    pub total_count: u32,
}

impl PointResult {
    /// Reduce a window's counters to a verdict.
    ///
    /// A window that never saw an estimate scores a hit ratio of 0 and
    /// fails, rather than propagating 0/0.
    pub fn score(point: TargetPoint, hit_count: u32, total_count: u32, threshold: f64) -> Self {
        debug_assert!(hit_count <= total_count);
        let hit_ratio = if total_count > 0 {
            hit_count as f64 / total_count as f64
        } else {
            0.0
        };
        Self {
            x: point.x,
            y: point.y,
            valid: hit_ratio > threshold,
            hit_ratio,
            hit_count,
            total_count,
        }
    }
}

/// Fraction of targets that passed. Vacuously perfect with no targets.
pub fn accuracy(points: &[PointResult]) -> f64 {
    if points.is_empty() {
        return 1.0;
    }
    points.iter().filter(|p| p.valid).count() as f64 / points.len() as f64
}

/// Everything one calibration or validation invocation produced.
///
/// Built through [`SessionResult::freeze`] when the last window closes and
/// never mutated afterwards.
#[derive(Debug, Clone, Serialize)]
pub struct SessionResult {
    pub points: Vec<PointResult>,
    pub history: Vec<SampleRecord>,
    pub accuracy: f64,
}

impl SessionResult {
    pub fn freeze(points: Vec<PointResult>, history: Vec<SampleRecord>) -> Self {
        let accuracy = accuracy(&points);
        Self {
            points,
            history,
            accuracy,
        }
    }

    pub fn passed_count(&self) -> usize {
        self.points.iter().filter(|p| p.valid).count()
    }

    /// Spread of the logged sample distances, if any samples were logged.
    pub fn distance_summary(&self) -> Option<DistanceSummary> {
        DistanceSummary::of(&self.history)
    }
}

/// Mean, standard deviation and worst case of logged sample distances.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DistanceSummary {
    pub mean: f64,
    pub std_dev: f64,
    pub max: f64,
}

impl DistanceSummary {
    pub fn of(history: &[SampleRecord]) -> Option<Self> {
        if history.is_empty() {
            return None;
        }
        let n = history.len() as f64;
        let mean = history.iter().map(|r| r.dist).sum::<f64>() / n;
        let variance = history
            .iter()
            .map(|r| {
                let diff = mean - r.dist;
                diff * diff
            })
            .sum::<f64>()
            / n;
        let max = history.iter().map(|r| r.dist).fold(0.0, f64::max);
        Some(Self {
            mean,
            std_dev: variance.sqrt(),
            max,
        })
    }
}
