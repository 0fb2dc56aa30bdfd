use std::collections::VecDeque;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// One estimated look position reported by a gaze source.
///
/// `t_ms` is the source's own monotonic clock; the engine never generates
/// timestamps on the source's behalf.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GazeEstimate {
    pub x: f64,
    pub y: f64,
    pub t_ms: u64,
}

/// Initialization progress of a gaze source after `begin` was requested.
#[derive(Debug, Clone, PartialEq)]
pub enum InitState {
    Pending,
    Ready,
    Failed(String),
}

/// Which of the source's built-in overlays are visible.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GazeVisuals {
    pub estimate_marker: bool,
    pub video: bool,
    pub face_overlay: bool,
    pub face_box: bool,
}

/// External gaze-estimation collaborator.
///
/// `begin` is non-blocking; callers poll [`GazeSource::init_state`] until
/// the source reports `Ready` or `Failed`. Estimates are pulled on demand
/// and may be absent while the source warms up or loses the face.
pub trait GazeSource {
    fn begin(&mut self);
    fn init_state(&self) -> InitState;
    fn current_estimate(&mut self) -> Option<GazeEstimate>;
    /// Training hint: the subject's eye is currently at (x, y).
    fn feedback_point(&mut self, x: f64, y: f64);
    /// Discard accumulated training data.
    fn clear_training(&mut self);
    fn pause(&mut self);
    fn resume(&mut self);
    fn set_visuals(&mut self, visuals: GazeVisuals);
    /// Face-detection quality in [0, 1].
    fn face_quality(&self) -> f64;
}

/// Tunables for [`SimulatedGazeSource`].
#[derive(Debug, Clone, Copy)]
pub struct SimulationProfile {
    /// Initial systematic offset of estimates from the true look position,
    /// in pixels. Training feedback shrinks it.
    pub bias: f64,
    /// Half-width of the uniform per-estimate noise, in pixels.
    pub jitter: f64,
    /// Probability that a poll yields no estimate at all.
    pub dropout: f64,
    /// Polls until the source reports `Ready` after `begin`.
    pub warmup_ticks: u32,
    /// Polls for the face-quality score to ramp from 0 to 1.
    pub quality_ramp_ticks: u32,
}

impl Default for SimulationProfile {
    fn default() -> Self {
        Self {
            bias: 120.0,
            jitter: 40.0,
            dropout: 0.1,
            warmup_ticks: 20,
            quality_ramp_ticks: 120,
        }
    }
}

/// Stand-in gaze source for the demo harness.
///
/// The simulated subject looks wherever [`SimulatedGazeSource::look_at`]
/// last pointed, with a systematic bias that each training hint shrinks a
/// little, so a calibration pass measurably improves validation accuracy.
pub struct SimulatedGazeSource {
    profile: SimulationProfile,
    rng: StdRng,
    init: InitState,
    began: bool,
    paused: bool,
    ticks_since_begin: u32,
    clock_ms: u64,
    look: (f64, f64),
    bias: (f64, f64),
    visuals: GazeVisuals,
}

impl SimulatedGazeSource {
    pub fn new(profile: SimulationProfile, seed: Option<u64>) -> Self {
        let mut rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };
        let angle: f64 = rng.gen_range(0.0..std::f64::consts::TAU);
        let bias = (profile.bias * angle.cos(), profile.bias * angle.sin());
        Self {
            profile,
            rng,
            init: InitState::Pending,
            began: false,
            paused: false,
            ticks_since_begin: 0,
            clock_ms: 0,
            look: (0.0, 0.0),
            bias,
            visuals: GazeVisuals::default(),
        }
    }

    /// Point the simulated subject's eyes at a screen position.
    pub fn look_at(&mut self, x: f64, y: f64) {
        self.look = (x, y);
    }

    /// Advance the simulated clock by one poll interval.
    pub fn tick(&mut self, dt_ms: u64) {
        self.clock_ms += dt_ms;
        if self.began {
            self.ticks_since_begin = self.ticks_since_begin.saturating_add(1);
            if self.init == InitState::Pending && self.ticks_since_begin >= self.profile.warmup_ticks
            {
                self.init = InitState::Ready;
            }
        }
    }

    pub fn visuals(&self) -> GazeVisuals {
        self.visuals
    }

    /// Remaining systematic error, in pixels.
    pub fn residual_bias(&self) -> f64 {
        self.bias.0.hypot(self.bias.1)
    }
}

impl GazeSource for SimulatedGazeSource {
    fn begin(&mut self) {
        self.began = true;
        self.paused = false;
    }

    fn init_state(&self) -> InitState {
        self.init.clone()
    }

    fn current_estimate(&mut self) -> Option<GazeEstimate> {
        if self.paused || self.init != InitState::Ready {
            return None;
        }
        if self.rng.gen_bool(self.profile.dropout.clamp(0.0, 1.0)) {
            return None;
        }
        let j = self.profile.jitter.max(f64::EPSILON);
        Some(GazeEstimate {
            x: self.look.0 + self.bias.0 + self.rng.gen_range(-j..j),
            y: self.look.1 + self.bias.1 + self.rng.gen_range(-j..j),
            t_ms: self.clock_ms,
        })
    }

    fn feedback_point(&mut self, _x: f64, _y: f64) {
        // Each hint nudges the systematic error toward zero.
        self.bias.0 *= 0.995;
        self.bias.1 *= 0.995;
    }

    fn clear_training(&mut self) {}

    fn pause(&mut self) {
        self.paused = true;
    }

    fn resume(&mut self) {
        self.paused = false;
        if self.init == InitState::Pending && self.began {
            self.init = InitState::Ready;
        }
    }

    fn set_visuals(&mut self, visuals: GazeVisuals) {
        self.visuals = visuals;
    }

    fn face_quality(&self) -> f64 {
        if !self.began {
            return 0.0;
        }
        (self.ticks_since_begin as f64 / self.profile.quality_ramp_ticks.max(1) as f64).min(1.0)
    }
}

/// Scripted gaze source for unit and integration tests.
///
/// Plays back a fixed sequence of estimate slots, one per poll; `None`
/// slots model a source that has nothing to report on that tick. When the
/// script runs out it repeats the configured tail behavior.
pub struct ScriptedGazeSource {
    script: VecDeque<Option<(f64, f64)>>,
    /// Returned on every poll after the script is exhausted.
    tail: Option<(f64, f64)>,
    init: InitState,
    pub quality: f64,
    polls: u64,
    pub feedback_calls: Vec<(f64, f64)>,
    pub cleared: u32,
    pub visuals_log: Vec<GazeVisuals>,
}

impl ScriptedGazeSource {
    pub fn new(script: Vec<Option<(f64, f64)>>, tail: Option<(f64, f64)>) -> Self {
        Self {
            script: script.into(),
            tail,
            init: InitState::Ready,
            quality: 1.0,
            polls: 0,
            feedback_calls: Vec::new(),
            cleared: 0,
            visuals_log: Vec::new(),
        }
    }

    /// A source that reports the same position on every poll.
    pub fn fixed(x: f64, y: f64) -> Self {
        Self::new(Vec::new(), Some((x, y)))
    }

    /// A source that never produces an estimate.
    pub fn silent() -> Self {
        Self::new(Vec::new(), None)
    }

    pub fn failing(message: &str) -> Self {
        let mut s = Self::silent();
        s.init = InitState::Failed(message.to_string());
        s
    }

    pub fn with_quality(mut self, quality: f64) -> Self {
        self.quality = quality;
        self
    }
}

impl GazeSource for ScriptedGazeSource {
    fn begin(&mut self) {}

    fn init_state(&self) -> InitState {
        self.init.clone()
    }

    fn current_estimate(&mut self) -> Option<GazeEstimate> {
        self.polls += 1;
        let slot = match self.script.pop_front() {
            Some(slot) => slot,
            None => self.tail,
        };
        slot.map(|(x, y)| GazeEstimate {
            x,
            y,
            t_ms: self.polls,
        })
    }

    fn feedback_point(&mut self, x: f64, y: f64) {
        self.feedback_calls.push((x, y));
    }

    fn clear_training(&mut self) {
        self.cleared += 1;
    }

    fn pause(&mut self) {}

    fn resume(&mut self) {}

    fn set_visuals(&mut self, visuals: GazeVisuals) {
        self.visuals_log.push(visuals);
    }

    fn face_quality(&self) -> f64 {
        self.quality
    }
}
