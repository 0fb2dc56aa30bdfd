use std::collections::VecDeque;

use rand::seq::SliceRandom;
use rand::Rng;

use crate::geometry::TargetPoint;

/// Ordered, finite, non-restartable sequence of fixation targets.
///
/// Every configured point is handed out exactly once; the traversal order
/// is front-of-queue. With shuffling enabled the configured list is put
/// through one uniform Fisher-Yates permutation up front.
#[derive(Debug)]
pub struct PointSchedule {
    queue: VecDeque<TargetPoint>,
    total: usize,
}

impl PointSchedule {
    pub fn new(points: Vec<TargetPoint>) -> Self {
        let total = points.len();
        Self {
            queue: points.into(),
            total,
        }
    }

    pub fn shuffled<R: Rng>(mut points: Vec<TargetPoint>, rng: &mut R) -> Self {
        points.shuffle(rng);
        Self::new(points)
    }

    pub fn with_shuffle<R: Rng>(points: Vec<TargetPoint>, shuffle: bool, rng: &mut R) -> Self {
        if shuffle {
            Self::shuffled(points, rng)
        } else {
            Self::new(points)
        }
    }

    /// Insert a fixed lead-in target ahead of the configured sequence.
    /// It is presented first regardless of shuffling.
    pub fn prepend(&mut self, point: TargetPoint) {
        self.queue.push_front(point);
        self.total += 1;
    }

    /// Hand out the next target, consuming it.
    pub fn advance(&mut self) -> Option<TargetPoint> {
        self.queue.pop_front()
    }

    pub fn remaining(&self) -> usize {
        self.queue.len()
    }

    /// Number of points the schedule was configured with.
    pub fn total(&self) -> usize {
        self.total
    }

    pub fn is_exhausted(&self) -> bool {
        self.queue.is_empty()
    }
}

/// Spread `count` targets evenly over the middle of the screen, for
/// configurations that give a point count instead of explicit positions.
pub fn spread_points(count: usize) -> Vec<TargetPoint> {
    if count == 0 {
        return Vec::new();
    }
    let cols = (count as f64).sqrt().ceil() as usize;
    let rows = (count + cols - 1) / cols;
    (0..count)
        .map(|i| {
            let col = i % cols;
            let row = i / cols;
            let x = if cols == 1 {
                50.0
            } else {
                10.0 + 80.0 * col as f64 / (cols - 1) as f64
            };
            let y = if rows == 1 {
                50.0
            } else {
                10.0 + 80.0 * row as f64 / (rows - 1) as f64
            };
            TargetPoint::new(x, y)
        })
        .collect()
}
