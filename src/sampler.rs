use crate::gaze::GazeSource;
use crate::geometry::{distance, ResolvedPoint, TargetPoint, Viewport};
use crate::record::{PointResult, SampleRecord};

/// Pass criteria for a scored window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreSpec {
    /// Maximum distance, in pixels, for a sample to count as a hit.
    pub tolerance: f64,
    /// Hit ratio a point must strictly exceed to pass.
    pub threshold: f64,
}

/// Cadence plan for the unified poll loop.
///
/// One base tick drives three consumers: scoring starts once
/// `score_delay_ms` has elapsed, training once `train_delay_ms` has
/// elapsed, and every `log_divisor`-th accepted poll lands in the history.
/// Training therefore runs at a higher frequency than logging whenever the
/// divisor is above 1.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowTiming {
    pub score_delay_ms: u64,
    pub train_delay_ms: u64,
    pub log_divisor: u32,
}

impl Default for WindowTiming {
    fn default() -> Self {
        Self {
            score_delay_ms: 500,
            train_delay_ms: 800,
            log_divisor: 5,
        }
    }
}

impl WindowTiming {
    /// No lead-ins, every accepted poll logged. Used by exactness tests.
    pub fn immediate() -> Self {
        Self {
            score_delay_ms: 0,
            train_delay_ms: 0,
            log_divisor: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WindowStatus {
    Open,
    Closed,
}

/// Sampling window for one active fixation target.
///
/// The target's coordinates are resolved against the viewport exactly once,
/// here at activation. Each [`PointWindow::poll`] pulls one estimate from
/// the gaze source; a tick with no estimate contributes neither a hit nor a
/// miss and is not logged.
#[derive(Debug)]
pub struct PointWindow {
    origin: TargetPoint,
    resolved: ResolvedPoint,
    duration_ms: u64,
    elapsed_ms: u64,
    accepted: u32,
    hit_count: u32,
    total_count: u32,
    scoring: Option<ScoreSpec>,
    train: bool,
    timing: WindowTiming,
}

impl PointWindow {
    pub fn activate(
        origin: TargetPoint,
        viewport: Viewport,
        duration_secs: f64,
        scoring: Option<ScoreSpec>,
        train: bool,
        timing: WindowTiming,
    ) -> Self {
        Self {
            origin,
            resolved: origin.resolve(viewport),
            duration_ms: (duration_secs * 1000.0).round().max(0.0) as u64,
            elapsed_ms: 0,
            accepted: 0,
            hit_count: 0,
            total_count: 0,
            scoring,
            train,
            timing,
        }
    }

    pub fn resolved(&self) -> ResolvedPoint {
        self.resolved
    }

    pub fn origin(&self) -> TargetPoint {
        self.origin
    }

    /// Whole seconds left on the on-screen countdown.
    pub fn countdown(&self) -> u32 {
        let left = self.duration_ms.saturating_sub(self.elapsed_ms);
        ((left + 999) / 1000) as u32
    }

    pub fn is_closed(&self) -> bool {
        self.elapsed_ms >= self.duration_ms
    }

    /// One poll tick: pull an estimate, classify, log, train, then advance
    /// the window clock by `dt_ms`.
    pub fn poll<G: GazeSource>(
        &mut self,
        gaze: &mut G,
        history: &mut Vec<SampleRecord>,
        dt_ms: u64,
    ) -> WindowStatus {
        if self.is_closed() {
            return WindowStatus::Closed;
        }

        if let Some(pos) = gaze.current_estimate() {
            let dist = distance(pos.x, pos.y, self.resolved.cx, self.resolved.cy);

            if self.elapsed_ms >= self.timing.score_delay_ms {
                if let Some(spec) = self.scoring {
                    if dist < spec.tolerance {
                        self.hit_count += 1;
                    }
                    self.total_count += 1;
                }
            }

            if self.accepted % self.timing.log_divisor.max(1) == 0 {
                history.push(SampleRecord {
                    x: pos.x,
                    y: pos.y,
                    cx: self.resolved.cx,
                    cy: self.resolved.cy,
                    dist,
                    count: self.countdown(),
                });
            }
            self.accepted += 1;
        }

        if self.train && self.elapsed_ms >= self.timing.train_delay_ms {
            gaze.feedback_point(self.resolved.cx, self.resolved.cy);
        }

        self.elapsed_ms += dt_ms;
        if self.is_closed() {
            WindowStatus::Closed
        } else {
            WindowStatus::Open
        }
    }

    /// Reduce the window to its scored outcome. Train-only windows carry no
    /// pass criteria and produce no result.
    pub fn finish(self) -> Option<PointResult> {
        self.scoring.map(|spec| {
            PointResult::score(self.origin, self.hit_count, self.total_count, spec.threshold)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gaze::ScriptedGazeSource;

    const VP: Viewport = Viewport {
        width: 1000.0,
        height: 1000.0,
    };

    fn scored(tolerance: f64, threshold: f64, timing: WindowTiming) -> PointWindow {
        PointWindow::activate(
            TargetPoint::new(50.0, 50.0),
            VP,
            1.0,
            Some(ScoreSpec {
                tolerance,
                threshold,
            }),
            false,
            timing,
        )
    }

    fn run_out<G: GazeSource>(
        window: &mut PointWindow,
        gaze: &mut G,
        history: &mut Vec<SampleRecord>,
        dt_ms: u64,
    ) {
        while window.poll(gaze, history, dt_ms) == WindowStatus::Open {}
    }

    #[test]
    fn on_target_gaze_scores_perfect() {
        // Resolved target is (500, 500); the source sits right on it.
        let mut window = scored(200.0, 0.7, WindowTiming::immediate());
        let mut gaze = ScriptedGazeSource::fixed(500.0, 500.0);
        let mut history = Vec::new();

        run_out(&mut window, &mut gaze, &mut history, 10);
        assert_eq!(history.len(), 100);
        let result = window.finish().unwrap();
        assert_eq!(result.hit_ratio, 1.0);
        assert!(result.valid);
        assert_eq!(result.total_count, 100);
    }

    #[test]
    fn silent_gaze_scores_zero_without_nan() {
        let mut window = scored(200.0, 0.7, WindowTiming::immediate());
        let mut gaze = ScriptedGazeSource::silent();
        let mut history = Vec::new();

        run_out(&mut window, &mut gaze, &mut history, 10);
        assert!(history.is_empty());
        let result = window.finish().unwrap();
        assert_eq!(result.total_count, 0);
        assert_eq!(result.hit_ratio, 0.0);
        assert!(!result.valid);
    }

    #[test]
    fn misses_count_toward_total_and_history() {
        // 600px off target with a 200px tolerance: every sample is a miss.
        let mut window = scored(200.0, 0.7, WindowTiming::immediate());
        let mut gaze = ScriptedGazeSource::fixed(1100.0, 500.0);
        let mut history = Vec::new();

        run_out(&mut window, &mut gaze, &mut history, 10);
        let result = window.finish().unwrap();
        assert_eq!(result.hit_count, 0);
        assert_eq!(result.total_count, 100);
        assert_eq!(history.len(), 100);
        assert!(history.iter().all(|r| r.dist == 600.0));
    }

    #[test]
    fn distance_equal_to_tolerance_is_a_miss() {
        let mut window = scored(100.0, 0.0, WindowTiming::immediate());
        let mut gaze = ScriptedGazeSource::fixed(600.0, 500.0); // dist exactly 100
        let mut history = Vec::new();

        run_out(&mut window, &mut gaze, &mut history, 10);
        let result = window.finish().unwrap();
        assert_eq!(result.hit_count, 0);
        assert_eq!(result.total_count, 100);
    }

    #[test]
    fn ticks_without_estimate_are_skipped_entirely() {
        let mut window = scored(200.0, 0.7, WindowTiming::immediate());
        let mut gaze = ScriptedGazeSource::new(
            vec![Some((500.0, 500.0)), None, Some((500.0, 500.0)), None],
            None,
        );
        let mut history = Vec::new();

        run_out(&mut window, &mut gaze, &mut history, 10);
        let result = window.finish().unwrap();
        assert_eq!(result.total_count, 2);
        assert_eq!(result.hit_count, 2);
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn score_delay_excludes_early_polls() {
        let timing = WindowTiming {
            score_delay_ms: 500,
            train_delay_ms: 0,
            log_divisor: 1,
        };
        let mut window = scored(200.0, 0.7, timing);
        let mut gaze = ScriptedGazeSource::fixed(500.0, 500.0);
        let mut history = Vec::new();

        run_out(&mut window, &mut gaze, &mut history, 10);
        let result = window.finish().unwrap();
        // Only the second half of the 1s window is scored...
        assert_eq!(result.total_count, 50);
        // ...but logging ran for the whole window.
        assert_eq!(history.len(), 100);
    }

    #[test]
    fn log_divisor_thins_history_but_not_scoring() {
        let timing = WindowTiming {
            score_delay_ms: 0,
            train_delay_ms: 0,
            log_divisor: 5,
        };
        let mut window = scored(200.0, 0.7, timing);
        let mut gaze = ScriptedGazeSource::fixed(500.0, 500.0);
        let mut history = Vec::new();

        run_out(&mut window, &mut gaze, &mut history, 10);
        let result = window.finish().unwrap();
        assert_eq!(result.total_count, 100);
        assert_eq!(history.len(), 20);
    }

    #[test]
    fn training_window_feeds_target_back_after_delay() {
        let timing = WindowTiming {
            score_delay_ms: 0,
            train_delay_ms: 800,
            log_divisor: 5,
        };
        let mut window = PointWindow::activate(
            TargetPoint::new(50.0, 50.0),
            VP,
            1.0,
            None,
            true,
            timing,
        );
        let mut gaze = ScriptedGazeSource::fixed(500.0, 500.0);
        let mut history = Vec::new();

        run_out(&mut window, &mut gaze, &mut history, 10);
        // Feedback starts at 800ms into a 1000ms window: 20 pulses at (500, 500).
        assert_eq!(gaze.feedback_calls.len(), 20);
        assert!(gaze.feedback_calls.iter().all(|&c| c == (500.0, 500.0)));
        // Higher-frequency than logging: 20 pulses in a span that logged 4 records.
        assert!(gaze.feedback_calls.len() > history.len() / 5);
        // Train-only windows produce no verdict.
        assert!(window.finish().is_none());
    }

    #[test]
    fn closed_window_refuses_further_polls() {
        let mut window = scored(200.0, 0.7, WindowTiming::immediate());
        let mut gaze = ScriptedGazeSource::fixed(500.0, 500.0);
        let mut history = Vec::new();

        run_out(&mut window, &mut gaze, &mut history, 100);
        let logged = history.len();
        assert_eq!(window.poll(&mut gaze, &mut history, 100), WindowStatus::Closed);
        assert_eq!(history.len(), logged);
    }

    #[test]
    fn countdown_tracks_whole_seconds_remaining() {
        let mut window = PointWindow::activate(
            TargetPoint::new(0.0, 0.0),
            VP,
            3.0,
            None,
            false,
            WindowTiming::immediate(),
        );
        let mut gaze = ScriptedGazeSource::silent();
        let mut history = Vec::new();

        assert_eq!(window.countdown(), 3);
        for _ in 0..25 {
            window.poll(&mut gaze, &mut history, 100);
        }
        // 2.5s elapsed of 3s
        assert_eq!(window.countdown(), 1);
    }

    #[test]
    fn records_carry_the_countdown_at_sample_time() {
        let mut window = scored(200.0, 0.7, WindowTiming::immediate());
        let mut gaze = ScriptedGazeSource::fixed(500.0, 500.0);
        let mut history = Vec::new();

        run_out(&mut window, &mut gaze, &mut history, 250);
        let counts: Vec<u32> = history.iter().map(|r| r.count).collect();
        assert_eq!(counts, vec![1, 1, 1, 1]);
    }
}
