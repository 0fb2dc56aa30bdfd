use rand::Rng;

use crate::gaze::GazeSource;
use crate::geometry::{ResolvedPoint, TargetPoint, Viewport};
use crate::record::{PointResult, SampleRecord, SessionResult};
use crate::sampler::{PointWindow, ScoreSpec, WindowStatus, WindowTiming};
use crate::schedule::PointSchedule;

/// Everything one calibration or validation invocation needs to run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub points: Vec<TargetPoint>,
    pub shuffle: bool,
    /// Extra target presented before the configured sequence, exempt from
    /// shuffling. Scored like any other point.
    pub lead_in_point: Option<TargetPoint>,
    /// How long each target stays on screen, in seconds.
    pub duration_secs: f64,
    /// Pass criteria; `None` makes this a training run with no verdicts.
    pub scoring: Option<ScoreSpec>,
    /// Whether to feed accepted target positions back to the gaze source.
    pub train: bool,
    /// Delay before the first target activates.
    pub lead_in_ms: u64,
    /// How long each verdict stays on screen before the next target.
    pub gap_ms: u64,
    pub timing: WindowTiming,
}

impl RunConfig {
    /// Training run: feed the source, log history, no verdicts.
    pub fn calibration(points: Vec<TargetPoint>, shuffle: bool, duration_secs: f64) -> Self {
        Self {
            points,
            shuffle,
            lead_in_point: None,
            duration_secs,
            scoring: None,
            train: true,
            lead_in_ms: 1000,
            gap_ms: 0,
            timing: WindowTiming::default(),
        }
    }

    /// Scoring run: classify hits against `tolerance`, judge against
    /// `threshold`, show each verdict for a second.
    pub fn validation(
        points: Vec<TargetPoint>,
        shuffle: bool,
        duration_secs: f64,
        tolerance: f64,
        threshold: f64,
    ) -> Self {
        Self {
            points,
            shuffle,
            lead_in_point: None,
            duration_secs,
            scoring: Some(ScoreSpec {
                tolerance,
                threshold,
            }),
            train: false,
            lead_in_ms: 1000,
            gap_ms: 1000,
            timing: WindowTiming::default(),
        }
    }
}

/// What the surrounding display should show right now.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DotView {
    pub cx: f64,
    pub cy: f64,
    pub countdown: u32,
    /// Pass/fail flash shown between points of a scoring run.
    pub verdict: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RunStatus {
    Running,
    Finished,
}

#[derive(Debug)]
enum RunState {
    LeadIn {
        remaining_ms: u64,
    },
    Active(PointWindow),
    Gap {
        remaining_ms: u64,
        verdict: Option<bool>,
        at: ResolvedPoint,
    },
    Done,
}

/// One full pass over a point schedule: activate a window per target,
/// collect its samples, reduce it to a verdict, repeat until exhausted.
///
/// Every poll must present the run's current epoch; the epoch advances
/// whenever a window opens or closes, so a tick scheduled against an
/// already-closed window can never touch the run.
#[derive(Debug)]
pub struct PointRun {
    schedule: PointSchedule,
    state: RunState,
    duration_secs: f64,
    scoring: Option<ScoreSpec>,
    train: bool,
    gap_ms: u64,
    timing: WindowTiming,
    epoch: u64,
    results: Vec<PointResult>,
    history: Vec<SampleRecord>,
}

impl PointRun {
    pub fn new<R: Rng>(cfg: RunConfig, rng: &mut R) -> Self {
        let mut schedule = PointSchedule::with_shuffle(cfg.points, cfg.shuffle, rng);
        if let Some(point) = cfg.lead_in_point {
            schedule.prepend(point);
        }
        Self {
            schedule,
            state: RunState::LeadIn {
                remaining_ms: cfg.lead_in_ms,
            },
            duration_secs: cfg.duration_secs,
            scoring: cfg.scoring,
            train: cfg.train,
            gap_ms: cfg.gap_ms,
            timing: cfg.timing,
            epoch: 0,
            results: Vec::new(),
            history: Vec::new(),
        }
    }

    /// Cancellation token for the current activation.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.state, RunState::Done)
    }

    /// Advance the run by one tick. Polls carrying a stale epoch are
    /// dropped without touching any state.
    pub fn poll<G: GazeSource>(
        &mut self,
        epoch: u64,
        gaze: &mut G,
        viewport: Viewport,
        dt_ms: u64,
    ) -> RunStatus {
        if epoch != self.epoch {
            return self.status();
        }

        match &mut self.state {
            RunState::LeadIn { remaining_ms } => {
                *remaining_ms = remaining_ms.saturating_sub(dt_ms);
                if *remaining_ms == 0 {
                    self.activate_next(viewport);
                }
            }
            RunState::Active(window) => {
                if window.poll(gaze, &mut self.history, dt_ms) == WindowStatus::Closed {
                    self.close_window(viewport);
                }
            }
            RunState::Gap { remaining_ms, .. } => {
                *remaining_ms = remaining_ms.saturating_sub(dt_ms);
                if *remaining_ms == 0 {
                    self.activate_next(viewport);
                }
            }
            RunState::Done => {}
        }

        self.status()
    }

    /// The dot the display should render, if any.
    pub fn dot(&self) -> Option<DotView> {
        match &self.state {
            RunState::Active(window) => Some(DotView {
                cx: window.resolved().cx,
                cy: window.resolved().cy,
                countdown: window.countdown(),
                verdict: None,
            }),
            RunState::Gap { verdict, at, .. } => Some(DotView {
                cx: at.cx,
                cy: at.cy,
                countdown: 0,
                verdict: *verdict,
            }),
            _ => None,
        }
    }

    pub fn results_so_far(&self) -> &[PointResult] {
        &self.results
    }

    /// Freeze the run into its session result.
    pub fn into_result(self) -> SessionResult {
        SessionResult::freeze(self.results, self.history)
    }

    fn status(&self) -> RunStatus {
        if self.is_finished() {
            RunStatus::Finished
        } else {
            RunStatus::Running
        }
    }

    fn activate_next(&mut self, viewport: Viewport) {
        // Epoch bump invalidates any tick still aimed at the previous
        // activation.
        self.epoch += 1;
        self.state = match self.schedule.advance() {
            Some(point) => RunState::Active(PointWindow::activate(
                point,
                viewport,
                self.duration_secs,
                self.scoring,
                self.train,
                self.timing,
            )),
            None => RunState::Done,
        };
    }

    fn close_window(&mut self, viewport: Viewport) {
        let state = std::mem::replace(&mut self.state, RunState::Done);
        let RunState::Active(window) = state else {
            return;
        };
        self.epoch += 1;
        let at = window.resolved();
        let result = window.finish();
        let verdict = result.map(|r| r.valid);
        if let Some(r) = result {
            self.results.push(r);
        }

        if self.gap_ms > 0 {
            self.state = RunState::Gap {
                remaining_ms: self.gap_ms,
                verdict,
                at,
            };
        } else {
            self.activate_next(viewport);
        }
    }
}
