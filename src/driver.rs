use std::mem;

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;

use crate::gaze::{GazeSource, GazeVisuals, InitState};
use crate::geometry::TargetPoint;
use crate::record::{SampleRecord, SessionResult};
use crate::session::{DotView, PointRun, RunConfig, RunStatus};

/// Default calibration grid: 3x3, pushed out toward the screen edges.
pub const DEFAULT_CALIBRATION_POINTS: [(f64, f64); 9] = [
    (10.0, 50.0),
    (10.0, 90.0),
    (10.0, 10.0),
    (50.0, 10.0),
    (50.0, 50.0),
    (50.0, 90.0),
    (90.0, 10.0),
    (90.0, 50.0),
    (90.0, 90.0),
];

/// Validation grid: pulled in from the screen edges so tolerance circles
/// stay fully on screen.
pub const DEFAULT_VALIDATION_POINTS: [(f64, f64); 9] = [
    (30.0, 50.0),
    (30.0, 70.0),
    (30.0, 30.0),
    (50.0, 30.0),
    (50.0, 50.0),
    (50.0, 70.0),
    (70.0, 30.0),
    (80.0, 50.0),
    (70.0, 70.0),
];

/// Recognized trial options and their defaults.
#[derive(Debug, Clone)]
pub struct TrialOptions {
    /// Initialize the gaze source, or resume an already-running one.
    pub do_init: bool,
    /// Hold in the warm-up screen until face quality clears the threshold.
    pub do_face_check: bool,
    pub face_threshold: f64,
    pub do_calibration: bool,
    pub do_validation: bool,
    pub calibration_points: Vec<TargetPoint>,
    pub validation_points: Vec<TargetPoint>,
    pub calibration_duration_secs: f64,
    pub validation_duration_secs: f64,
    /// Hit tolerance in pixels.
    pub tolerance: f64,
    /// Pass threshold on the hit ratio, in [0, 1].
    pub threshold: f64,
    pub shuffle_points: bool,
    /// Fixed seed for the shuffle; fresh entropy when absent.
    pub shuffle_seed: Option<u64>,
    pub show_estimate_marker: bool,
    pub show_video_calibration: bool,
    pub show_video_validation: bool,
    pub calibration_notice: Option<String>,
    pub show_calibration_notice: bool,
    pub validation_notice: Option<String>,
    pub show_validation_notice: bool,
}

impl Default for TrialOptions {
    fn default() -> Self {
        Self {
            do_init: true,
            do_face_check: true,
            face_threshold: 0.7,
            do_calibration: true,
            do_validation: true,
            calibration_points: DEFAULT_CALIBRATION_POINTS.iter().map(|&p| p.into()).collect(),
            validation_points: DEFAULT_VALIDATION_POINTS.iter().map(|&p| p.into()).collect(),
            calibration_duration_secs: 3.0,
            validation_duration_secs: 2.0,
            tolerance: 200.0,
            threshold: 0.7,
            shuffle_points: true,
            shuffle_seed: None,
            show_estimate_marker: false,
            show_video_calibration: false,
            show_video_validation: false,
            calibration_notice: Some(
                "A dot will appear at different positions on the screen. \
                 Look at it and keep looking at it until it moves. \
                 Press SPACE to start."
                    .to_string(),
            ),
            show_calibration_notice: true,
            validation_notice: Some(
                "Next we will check how well the tracker follows your eyes. \
                 Look at each dot until it moves. Press SPACE to start."
                    .to_string(),
            ),
            show_validation_notice: true,
        }
    }
}

/// Final payload handed to the host runner exactly once per trial.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrialPayload {
    /// The validation point verdicts, pre-serialized for the host's data
    /// table.
    pub validation_points: String,
    pub accuracy: f64,
    pub validation_history: Vec<SampleRecord>,
}

/// Host-runner collaborator: the engine never touches the surrounding
/// experiment directly.
pub trait TrialHost {
    fn viewport(&self) -> crate::geometry::Viewport;
    fn finish_trial(&mut self, payload: TrialPayload);
    /// Unrecoverable failure. The host shows a blocking notice and reloads
    /// the whole session; the trial never finishes.
    fn fatal(&mut self, notice: &str);
}

/// Publicly visible trial phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum Phase {
    Idle,
    #[strum(serialize = "Warming up")]
    WarmingUp,
    Calibrating,
    Validating,
    Complete,
    Aborted,
}

/// Warm-up screen data for the surrounding display.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WarmupView {
    pub ready: bool,
    pub quality: f64,
    pub threshold: f64,
    pub face_ok: bool,
}

#[derive(Debug)]
struct Gate {
    delay_ms: u64,
    /// Still waiting for the continue key once the delay has elapsed.
    notice: bool,
}

#[derive(Debug)]
enum State {
    Idle,
    WarmingUp { face_ok: bool },
    CalibrationGate(Gate),
    Calibrating(PointRun),
    ValidationGate(Gate),
    Validating(PointRun),
    Complete,
    Aborted,
}

enum Step {
    None,
    Fail(String),
    LeaveWarmup,
    BeginCalibration,
    FinishCalibration,
    BeginValidation,
    FinishValidation,
}

const PHASE_GATE_MS: u64 = 1000;

/// One-shot trial state machine:
/// `Idle → WarmingUp → Calibrating → Validating → Complete`.
///
/// Single-threaded and tick-driven; the surrounding harness forwards poll
/// ticks via [`Driver::on_tick`] and the trial's only valid response key
/// (Space) via [`Driver::on_continue`]. No phase is ever re-entered, and
/// the host's finish callback fires exactly once.
pub struct Driver<G: GazeSource> {
    opts: TrialOptions,
    gaze: G,
    rng: StdRng,
    state: State,
    calibration: Option<SessionResult>,
    validation: Option<SessionResult>,
    finished: bool,
}

impl<G: GazeSource> Driver<G> {
    pub fn new(opts: TrialOptions, gaze: G) -> Self {
        let rng = match opts.shuffle_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            opts,
            gaze,
            rng,
            state: State::Idle,
            calibration: None,
            validation: None,
            finished: false,
        }
    }

    pub fn phase(&self) -> Phase {
        match self.state {
            State::Idle => Phase::Idle,
            State::WarmingUp { .. } => Phase::WarmingUp,
            State::CalibrationGate(_) | State::Calibrating(_) => Phase::Calibrating,
            State::ValidationGate(_) | State::Validating(_) => Phase::Validating,
            State::Complete => Phase::Complete,
            State::Aborted => Phase::Aborted,
        }
    }

    pub fn gaze_mut(&mut self) -> &mut G {
        &mut self.gaze
    }

    pub fn calibration_result(&self) -> Option<&SessionResult> {
        self.calibration.as_ref()
    }

    pub fn validation_result(&self) -> Option<&SessionResult> {
        self.validation.as_ref()
    }

    /// Kick the trial off. Requests gaze-source initialization when
    /// configured, otherwise resumes the running source and moves on.
    pub fn start(&mut self, host: &mut dyn TrialHost) {
        if !matches!(self.state, State::Idle) {
            return;
        }
        if self.opts.do_init {
            self.gaze.begin();
            self.state = State::WarmingUp { face_ok: false };
        } else {
            self.gaze.resume();
            self.enter_calibration_gate(host);
        }
    }

    /// Advance the trial by one poll tick.
    pub fn on_tick(&mut self, host: &mut dyn TrialHost, dt_ms: u64) {
        let mut step = Step::None;
        match &mut self.state {
            State::Idle | State::Complete | State::Aborted => {}
            State::WarmingUp { face_ok } => match self.gaze.init_state() {
                InitState::Pending => {}
                InitState::Failed(msg) => step = Step::Fail(msg),
                InitState::Ready => {
                    if self.opts.do_face_check {
                        *face_ok = self.gaze.face_quality() > self.opts.face_threshold;
                    } else {
                        step = Step::LeaveWarmup;
                    }
                }
            },
            State::CalibrationGate(gate) => {
                gate.delay_ms = gate.delay_ms.saturating_sub(dt_ms);
                if gate.delay_ms == 0 && !gate.notice {
                    step = Step::BeginCalibration;
                }
            }
            State::Calibrating(run) => {
                let epoch = run.epoch();
                if run.poll(epoch, &mut self.gaze, host.viewport(), dt_ms) == RunStatus::Finished {
                    step = Step::FinishCalibration;
                }
            }
            State::ValidationGate(gate) => {
                gate.delay_ms = gate.delay_ms.saturating_sub(dt_ms);
                if gate.delay_ms == 0 && !gate.notice {
                    step = Step::BeginValidation;
                }
            }
            State::Validating(run) => {
                let epoch = run.epoch();
                if run.poll(epoch, &mut self.gaze, host.viewport(), dt_ms) == RunStatus::Finished {
                    step = Step::FinishValidation;
                }
            }
        }
        self.apply(step, host);
    }

    /// The continue key (Space) was pressed.
    pub fn on_continue(&mut self, host: &mut dyn TrialHost) {
        let mut step = Step::None;
        match &mut self.state {
            State::WarmingUp { face_ok } => {
                let gated = self.opts.do_face_check && !*face_ok;
                if self.gaze.init_state() == InitState::Ready && !gated {
                    step = Step::LeaveWarmup;
                }
            }
            State::CalibrationGate(gate) => {
                if gate.delay_ms == 0 && gate.notice {
                    step = Step::BeginCalibration;
                }
            }
            State::ValidationGate(gate) => {
                if gate.delay_ms == 0 && gate.notice {
                    step = Step::BeginValidation;
                }
            }
            _ => {}
        }
        self.apply(step, host);
    }

    /// Whether a continue press would currently advance the trial.
    pub fn wants_continue(&self) -> bool {
        match &self.state {
            State::WarmingUp { face_ok } => {
                self.gaze.init_state() == InitState::Ready
                    && (*face_ok || !self.opts.do_face_check)
            }
            State::CalibrationGate(gate) | State::ValidationGate(gate) => {
                gate.delay_ms == 0 && gate.notice
            }
            _ => false,
        }
    }

    /// Notice text the display should show while a gate waits for Space.
    pub fn notice(&self) -> Option<&str> {
        match &self.state {
            State::CalibrationGate(gate) if gate.delay_ms == 0 && gate.notice => {
                self.opts.calibration_notice.as_deref()
            }
            State::ValidationGate(gate) if gate.delay_ms == 0 && gate.notice => {
                self.opts.validation_notice.as_deref()
            }
            _ => None,
        }
    }

    /// Warm-up screen data while in `WarmingUp`.
    pub fn warmup(&self) -> Option<WarmupView> {
        match &self.state {
            State::WarmingUp { face_ok } => Some(WarmupView {
                ready: self.gaze.init_state() == InitState::Ready,
                quality: self.gaze.face_quality(),
                threshold: self.opts.face_threshold,
                face_ok: *face_ok,
            }),
            _ => None,
        }
    }

    /// The fixation dot the display should render, if a run is active.
    pub fn dot(&self) -> Option<DotView> {
        match &self.state {
            State::Calibrating(run) | State::Validating(run) => run.dot(),
            _ => None,
        }
    }

    fn apply(&mut self, step: Step, host: &mut dyn TrialHost) {
        match step {
            Step::None => {}
            Step::Fail(msg) => {
                host.fatal(&format!(
                    "Cannot start eye tracking: {msg}. \
                     Check that access to the webcam is permitted; this study needs it."
                ));
                self.state = State::Aborted;
            }
            Step::LeaveWarmup => self.enter_calibration_gate(host),
            Step::BeginCalibration => self.begin_calibration(),
            Step::FinishCalibration => {
                if let State::Calibrating(run) = mem::replace(&mut self.state, State::Idle) {
                    self.calibration = Some(run.into_result());
                }
                // Overlays go dark between phases; the estimate marker
                // keeps following its flag.
                self.gaze.set_visuals(GazeVisuals {
                    estimate_marker: self.opts.show_estimate_marker,
                    ..GazeVisuals::default()
                });
                self.enter_validation_gate(host);
            }
            Step::BeginValidation => self.begin_validation(),
            Step::FinishValidation => {
                if let State::Validating(run) = mem::replace(&mut self.state, State::Idle) {
                    self.validation = Some(run.into_result());
                }
                self.complete(host);
            }
        }
    }

    fn enter_calibration_gate(&mut self, host: &mut dyn TrialHost) {
        if !self.opts.do_calibration {
            self.enter_validation_gate(host);
            return;
        }
        self.state = State::CalibrationGate(Gate {
            delay_ms: PHASE_GATE_MS,
            notice: self.opts.show_calibration_notice && self.opts.calibration_notice.is_some(),
        });
    }

    fn begin_calibration(&mut self) {
        self.gaze.set_visuals(GazeVisuals {
            estimate_marker: self.opts.show_estimate_marker,
            video: self.opts.show_video_calibration,
            face_overlay: self.opts.show_video_calibration,
            face_box: self.opts.show_video_calibration,
        });
        self.gaze.clear_training();
        let run = PointRun::new(
            RunConfig::calibration(
                self.opts.calibration_points.clone(),
                self.opts.shuffle_points,
                self.opts.calibration_duration_secs,
            ),
            &mut self.rng,
        );
        self.state = State::Calibrating(run);
    }

    fn enter_validation_gate(&mut self, host: &mut dyn TrialHost) {
        if !self.opts.do_validation {
            self.complete(host);
            return;
        }
        self.state = State::ValidationGate(Gate {
            delay_ms: PHASE_GATE_MS,
            notice: self.opts.show_validation_notice && self.opts.validation_notice.is_some(),
        });
    }

    fn begin_validation(&mut self) {
        self.gaze.set_visuals(GazeVisuals {
            estimate_marker: self.opts.show_estimate_marker,
            video: self.opts.show_video_validation,
            face_overlay: self.opts.show_video_validation,
            face_box: self.opts.show_video_validation,
        });
        self.gaze.clear_training();
        let run = PointRun::new(
            RunConfig::validation(
                self.opts.validation_points.clone(),
                self.opts.shuffle_points,
                self.opts.validation_duration_secs,
                self.opts.tolerance,
                self.opts.threshold,
            ),
            &mut self.rng,
        );
        self.state = State::Validating(run);
    }

    fn complete(&mut self, host: &mut dyn TrialHost) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.gaze.set_visuals(GazeVisuals::default());

        let validation_points = match &self.validation {
            Some(v) => serde_json::to_string(&v.points).unwrap_or_else(|_| "[]".to_string()),
            None => "[]".to_string(),
        };
        let payload = TrialPayload {
            validation_points,
            accuracy: self.validation.as_ref().map(|v| v.accuracy).unwrap_or(1.0),
            validation_history: self
                .validation
                .as_ref()
                .map(|v| v.history.clone())
                .unwrap_or_default(),
        };
        self.state = State::Complete;
        host.finish_trial(payload);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gaze::ScriptedGazeSource;
    use crate::geometry::Viewport;
    use assert_matches::assert_matches;

    const DT: u64 = 250;

    struct TestHost {
        viewport: Viewport,
        payloads: Vec<TrialPayload>,
        fatals: Vec<String>,
    }

    impl TestHost {
        fn new() -> Self {
            Self {
                viewport: Viewport::new(1000.0, 1000.0),
                payloads: Vec::new(),
                fatals: Vec::new(),
            }
        }
    }

    impl TrialHost for TestHost {
        fn viewport(&self) -> Viewport {
            self.viewport
        }

        fn finish_trial(&mut self, payload: TrialPayload) {
            self.payloads.push(payload);
        }

        fn fatal(&mut self, notice: &str) {
            self.fatals.push(notice.to_string());
        }
    }

    fn quick_opts() -> TrialOptions {
        TrialOptions {
            do_face_check: false,
            calibration_points: vec![TargetPoint::new(50.0, 50.0)],
            validation_points: vec![TargetPoint::new(50.0, 50.0)],
            calibration_duration_secs: 1.0,
            validation_duration_secs: 1.0,
            shuffle_points: false,
            show_calibration_notice: false,
            show_validation_notice: false,
            ..TrialOptions::default()
        }
    }

    fn drive<G: GazeSource>(driver: &mut Driver<G>, host: &mut TestHost, max_ticks: u32) {
        for _ in 0..max_ticks {
            if matches!(driver.phase(), Phase::Complete | Phase::Aborted) {
                return;
            }
            driver.on_tick(host, DT);
        }
        panic!("trial did not settle within {max_ticks} ticks");
    }

    #[test]
    fn full_trial_reaches_complete_with_payload() {
        let mut host = TestHost::new();
        let mut driver = Driver::new(quick_opts(), ScriptedGazeSource::fixed(500.0, 500.0));

        driver.start(&mut host);
        assert_eq!(driver.phase(), Phase::WarmingUp);
        drive(&mut driver, &mut host, 200);

        assert_eq!(driver.phase(), Phase::Complete);
        assert_eq!(host.payloads.len(), 1);
        let payload = &host.payloads[0];
        assert_eq!(payload.accuracy, 1.0);
        assert!(payload.validation_points.contains("\"valid\":true"));
        assert!(!payload.validation_history.is_empty());
    }

    #[test]
    fn finish_fires_exactly_once() {
        let mut host = TestHost::new();
        let mut driver = Driver::new(quick_opts(), ScriptedGazeSource::fixed(500.0, 500.0));

        driver.start(&mut host);
        drive(&mut driver, &mut host, 200);
        // Extra ticks after completion must not re-fire the callback.
        for _ in 0..20 {
            driver.on_tick(&mut host, DT);
        }
        assert_eq!(host.payloads.len(), 1);
    }

    #[test]
    fn off_target_gaze_fails_validation() {
        let mut host = TestHost::new();
        let mut driver = Driver::new(quick_opts(), ScriptedGazeSource::fixed(0.0, 0.0));

        driver.start(&mut host);
        drive(&mut driver, &mut host, 200);

        let payload = &host.payloads[0];
        assert_eq!(payload.accuracy, 0.0);
        assert!(payload.validation_points.contains("\"valid\":false"));
    }

    #[test]
    fn silent_gaze_yields_vacuous_fail() {
        let mut host = TestHost::new();
        let mut driver = Driver::new(quick_opts(), ScriptedGazeSource::silent());

        driver.start(&mut host);
        drive(&mut driver, &mut host, 200);

        let payload = &host.payloads[0];
        assert_eq!(payload.accuracy, 0.0);
        assert!(payload.validation_points.contains("\"totalCount\":0"));
        assert!(payload.validation_history.is_empty());
    }

    #[test]
    fn disabled_phases_are_skipped_with_default_result() {
        let mut host = TestHost::new();
        let opts = TrialOptions {
            do_calibration: false,
            do_validation: false,
            ..quick_opts()
        };
        let mut driver = Driver::new(opts, ScriptedGazeSource::fixed(500.0, 500.0));

        driver.start(&mut host);
        drive(&mut driver, &mut host, 20);

        assert_eq!(driver.phase(), Phase::Complete);
        let payload = &host.payloads[0];
        assert_eq!(payload.validation_points, "[]");
        assert_eq!(payload.accuracy, 1.0);
        assert!(payload.validation_history.is_empty());
        assert!(driver.calibration_result().is_none());
        assert!(driver.validation_result().is_none());
    }

    #[test]
    fn init_failure_aborts_without_finishing() {
        let mut host = TestHost::new();
        let mut driver = Driver::new(quick_opts(), ScriptedGazeSource::failing("no camera"));

        driver.start(&mut host);
        drive(&mut driver, &mut host, 20);

        assert_eq!(driver.phase(), Phase::Aborted);
        assert_eq!(host.fatals.len(), 1);
        assert!(host.fatals[0].contains("no camera"));
        assert!(host.payloads.is_empty());
    }

    #[test]
    fn face_gate_requires_quality_and_confirmation() {
        let mut host = TestHost::new();
        let opts = TrialOptions {
            do_face_check: true,
            face_threshold: 0.7,
            ..quick_opts()
        };
        let mut driver =
            Driver::new(opts, ScriptedGazeSource::fixed(500.0, 500.0).with_quality(0.5));

        driver.start(&mut host);
        driver.on_tick(&mut host, DT);
        assert_eq!(driver.phase(), Phase::WarmingUp);

        // Space with a poor face score is ignored.
        driver.on_continue(&mut host);
        assert_eq!(driver.phase(), Phase::WarmingUp);
        assert!(!driver.wants_continue());

        // Quality climbs over the threshold; Space now advances.
        driver.gaze_mut().quality = 0.9;
        driver.on_tick(&mut host, DT);
        assert!(driver.wants_continue());
        driver.on_continue(&mut host);
        assert_eq!(driver.phase(), Phase::Calibrating);
    }

    #[test]
    fn face_quality_exactly_at_threshold_does_not_pass() {
        let mut host = TestHost::new();
        let opts = TrialOptions {
            do_face_check: true,
            face_threshold: 0.7,
            ..quick_opts()
        };
        let mut driver =
            Driver::new(opts, ScriptedGazeSource::fixed(500.0, 500.0).with_quality(0.7));

        driver.start(&mut host);
        driver.on_tick(&mut host, DT);
        driver.on_continue(&mut host);
        assert_eq!(driver.phase(), Phase::WarmingUp);
    }

    #[test]
    fn notice_gate_waits_for_continue() {
        let mut host = TestHost::new();
        let opts = TrialOptions {
            show_calibration_notice: true,
            ..quick_opts()
        };
        let mut driver = Driver::new(opts, ScriptedGazeSource::fixed(500.0, 500.0));

        driver.start(&mut host);
        // Warm-up passes, then the 1s gate delay elapses.
        for _ in 0..8 {
            driver.on_tick(&mut host, DT);
        }
        assert_eq!(driver.phase(), Phase::Calibrating);
        assert!(driver.notice().is_some());
        assert!(driver.dot().is_none());

        // The notice holds until Space, however many ticks pass.
        for _ in 0..20 {
            driver.on_tick(&mut host, DT);
        }
        assert!(driver.notice().is_some());

        driver.on_continue(&mut host);
        assert!(driver.notice().is_none());
        drive(&mut driver, &mut host, 200);
        assert_eq!(driver.phase(), Phase::Complete);
    }

    #[test]
    fn trial_reports_calibration_and_validation_results() {
        let mut host = TestHost::new();
        let mut driver = Driver::new(quick_opts(), ScriptedGazeSource::fixed(500.0, 500.0));

        driver.start(&mut host);
        drive(&mut driver, &mut host, 200);

        let cal = driver.calibration_result().unwrap();
        assert!(cal.points.is_empty());
        assert!(!cal.history.is_empty());
        let val = driver.validation_result().unwrap();
        assert_eq!(val.points.len(), 1);
        assert_matches!(val.distance_summary(), Some(s) if s.mean == 0.0);
    }

    #[test]
    fn start_is_one_shot() {
        let mut host = TestHost::new();
        let mut driver = Driver::new(quick_opts(), ScriptedGazeSource::fixed(500.0, 500.0));

        driver.start(&mut host);
        drive(&mut driver, &mut host, 200);
        assert_eq!(driver.phase(), Phase::Complete);

        // A second start must not restart the machine.
        driver.start(&mut host);
        assert_eq!(driver.phase(), Phase::Complete);
        assert_eq!(host.payloads.len(), 1);
    }
}
