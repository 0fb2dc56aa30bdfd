mod ui;

use clap::{error::ErrorKind, CommandFactory, Parser, ValueEnum};
use crossterm::{
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
    tty::IsTty,
};
use ratatui::{
    backend::{Backend, CrosstermBackend},
    Frame, Terminal,
};
use std::{
    error::Error,
    io::{self, stdin},
    time::Duration,
};

use saccade::config::{Config, ConfigStore, FileConfigStore};
use saccade::driver::{Driver, TrialHost, TrialOptions, TrialPayload};
use saccade::gaze::{GazeSource, SimulatedGazeSource, SimulationProfile};
use saccade::geometry::Viewport;
use saccade::history::{append_session_log, HistoryDb, SessionKind, SessionRow};
use saccade::runtime::{CrosstermSignalSource, Runner, TrialSignal};
use saccade::schedule::spread_points;

const POLL_RATE_MS: u64 = 25;

/// The simulated subject looks at a virtual screen of this size; the TUI
/// scales it down to terminal cells for drawing.
const VIRTUAL_WIDTH: f64 = 1280.0;
const VIRTUAL_HEIGHT: f64 = 800.0;

/// gaze calibration and validation dry-runs with a simulated subject
#[derive(Parser, Debug, Clone)]
#[clap(
    version,
    about,
    long_about = "Runs the eye-tracking calibration/validation trial against a simulated \
                  subject, scores per-point accuracy, and tracks results across sessions."
)]
pub struct Cli {
    /// seconds each calibration dot stays on screen
    #[clap(short = 'c', long)]
    calibration_duration: Option<f64>,

    /// seconds each validation dot stays on screen
    #[clap(short = 'v', long)]
    validation_duration: Option<f64>,

    /// hit tolerance around each dot, in virtual pixels
    #[clap(short = 't', long)]
    tolerance: Option<f64>,

    /// hit ratio a dot must exceed to pass
    #[clap(long)]
    threshold: Option<f64>,

    /// face-detection quality needed to leave the warm-up screen
    #[clap(long)]
    face_threshold: Option<f64>,

    /// use an evenly spread grid of this many dots instead of the
    /// configured point lists
    #[clap(short = 'n', long)]
    point_count: Option<usize>,

    /// present the dots in their configured order instead of shuffling
    #[clap(long)]
    no_shuffle: bool,

    /// skip the calibration phase
    #[clap(long)]
    no_calibration: bool,

    /// skip the validation phase
    #[clap(long)]
    no_validation: bool,

    /// skip the face-detection warm-up gate
    #[clap(long)]
    no_face_check: bool,

    /// show the live gaze-estimate marker during the trial
    #[clap(short = 'm', long)]
    marker: bool,

    /// how well the simulated subject behaves
    #[clap(short = 's', long, value_enum, default_value_t = Subject::Steady)]
    subject: Subject,

    /// fixed seed for shuffling and the simulated subject
    #[clap(long)]
    seed: Option<u64>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum, strum_macros::Display)]
pub enum Subject {
    Steady,
    Shaky,
    Distracted,
}

impl Subject {
    fn profile(&self) -> SimulationProfile {
        match self {
            Subject::Steady => SimulationProfile {
                bias: 80.0,
                jitter: 25.0,
                dropout: 0.05,
                ..SimulationProfile::default()
            },
            Subject::Shaky => SimulationProfile {
                bias: 120.0,
                jitter: 70.0,
                dropout: 0.1,
                ..SimulationProfile::default()
            },
            Subject::Distracted => SimulationProfile {
                bias: 150.0,
                jitter: 50.0,
                dropout: 0.35,
                ..SimulationProfile::default()
            },
        }
    }
}

fn build_options(cli: &Cli, cfg: &Config) -> TrialOptions {
    let mut opts = cfg.trial_options();
    if let Some(secs) = cli.calibration_duration {
        opts.calibration_duration_secs = secs;
    }
    if let Some(secs) = cli.validation_duration {
        opts.validation_duration_secs = secs;
    }
    if let Some(tol) = cli.tolerance {
        opts.tolerance = tol;
    }
    if let Some(threshold) = cli.threshold {
        opts.threshold = threshold;
    }
    if let Some(face) = cli.face_threshold {
        opts.face_threshold = face;
    }
    if let Some(count) = cli.point_count {
        opts.calibration_points = spread_points(count);
        opts.validation_points = spread_points(count);
    }
    if cli.no_shuffle {
        opts.shuffle_points = false;
    }
    opts.do_calibration = !cli.no_calibration;
    opts.do_validation = !cli.no_validation;
    opts.do_face_check = !cli.no_face_check;
    opts.show_estimate_marker |= cli.marker;
    opts.shuffle_seed = cli.seed;
    opts
}

/// Host-runner stand-in for the demo: collects the finish payload and any
/// fatal notice so the app loop can react after the tick.
#[derive(Debug, Default)]
pub struct DemoHost {
    pub payload: Option<TrialPayload>,
    pub fatal_notice: Option<String>,
}

impl TrialHost for DemoHost {
    fn viewport(&self) -> Viewport {
        Viewport::new(VIRTUAL_WIDTH, VIRTUAL_HEIGHT)
    }

    fn finish_trial(&mut self, payload: TrialPayload) {
        self.payload = Some(payload);
    }

    fn fatal(&mut self, notice: &str) {
        self.fatal_notice = Some(notice.to_string());
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AppState {
    Trial,
    Results,
    Aborted(String),
}

pub struct App {
    pub cli: Option<Cli>,
    pub driver: Driver<SimulatedGazeSource>,
    pub host: DemoHost,
    pub state: AppState,
    pub payload: Option<TrialPayload>,
    pub last_estimate: Option<(f64, f64)>,
    pub history: Option<HistoryDb>,
    pub recent: Vec<SessionRow>,
    pub best_accuracy: Option<f64>,
}

impl App {
    pub fn new(cli: Cli) -> Self {
        let cfg = FileConfigStore::new().load();
        let opts = build_options(&cli, &cfg);
        let gaze = SimulatedGazeSource::new(cli.subject.profile(), cli.seed);
        let history = HistoryDb::new().ok();

        let mut app = Self {
            driver: Driver::new(opts, gaze),
            cli: Some(cli),
            host: DemoHost::default(),
            state: AppState::Trial,
            payload: None,
            last_estimate: None,
            history,
            recent: Vec::new(),
            best_accuracy: None,
        };
        app.driver.start(&mut app.host);
        app
    }

    pub fn reset(&mut self) {
        let cli = self.cli.clone().unwrap();
        let cfg = FileConfigStore::new().load();
        let opts = build_options(&cli, &cfg);
        let gaze = SimulatedGazeSource::new(cli.subject.profile(), cli.seed);

        self.driver = Driver::new(opts, gaze);
        self.host = DemoHost::default();
        self.state = AppState::Trial;
        self.payload = None;
        self.last_estimate = None;
        self.driver.start(&mut self.host);
    }

    pub fn on_tick(&mut self, dt_ms: u64) {
        if self.state != AppState::Trial {
            return;
        }

        // The simulated subject dutifully fixates whatever dot is shown.
        if let Some(dot) = self.driver.dot() {
            self.driver.gaze_mut().look_at(dot.cx, dot.cy);
        }
        self.driver.gaze_mut().tick(dt_ms);
        self.driver.on_tick(&mut self.host, dt_ms);

        self.last_estimate = if self.driver.gaze_mut().visuals().estimate_marker {
            self.driver.gaze_mut().current_estimate().map(|e| (e.x, e.y))
        } else {
            None
        };

        if let Some(notice) = self.host.fatal_notice.take() {
            self.state = AppState::Aborted(notice);
            return;
        }
        if let Some(payload) = self.host.payload.take() {
            self.finish(payload);
        }
    }

    pub fn on_continue(&mut self) {
        self.driver.on_continue(&mut self.host);
    }

    pub fn has_finished(&self) -> bool {
        matches!(self.state, AppState::Results | AppState::Aborted(_))
    }

    fn finish(&mut self, payload: TrialPayload) {
        if let Some(db) = self.history.as_mut() {
            if let Some(cal) = self.driver.calibration_result() {
                let _ = db.record_session(SessionKind::Calibration, cal);
            }
            if let Some(val) = self.driver.validation_result() {
                let _ = db.record_session(SessionKind::Validation, val);
            }
            self.recent = db.recent_sessions(6).unwrap_or_default();
            self.best_accuracy = db.best_validation_accuracy().unwrap_or(None);
        }
        if let Some(val) = self.driver.validation_result() {
            let _ = append_session_log(SessionKind::Validation, val);
        }

        self.payload = Some(payload);
        self.state = AppState::Results;
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    if !stdin().is_tty() {
        let mut cmd = Cli::command();
        cmd.error(ErrorKind::Io, "stdin must be a tty").exit();
    }

    enable_raw_mode()?;

    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut app = App::new(cli);
    start_tui(&mut terminal, &mut app)?;

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen,)?;
    terminal.show_cursor()?;

    Ok(())
}

#[derive(Debug)]
enum ExitType {
    Restart,
    Quit,
}

fn start_tui<B: Backend>(
    terminal: &mut Terminal<B>,
    mut app: &mut App,
) -> Result<(), Box<dyn Error>> {
    let runner = Runner::new(
        CrosstermSignalSource::new(),
        Duration::from_millis(POLL_RATE_MS),
    );

    loop {
        let mut exit_type: ExitType = ExitType::Quit;
        terminal.draw(|f| ui(app, f))?;

        loop {
            let app = &mut app;

            match runner.step() {
                TrialSignal::Tick { dt_ms } => {
                    if !app.has_finished() {
                        app.on_tick(dt_ms);
                        terminal.draw(|f| ui(app, f))?;
                    }
                }
                TrialSignal::Redraw => {
                    terminal.draw(|f| ui(app, f))?;
                }
                TrialSignal::Continue => {
                    app.on_continue();
                    terminal.draw(|f| ui(app, f))?;
                }
                TrialSignal::Restart => {
                    if app.has_finished() {
                        exit_type = ExitType::Restart;
                        break;
                    }
                }
                TrialSignal::Quit => {
                    break;
                }
            }
        }

        match exit_type {
            ExitType::Restart => {
                app.reset();
            }
            ExitType::Quit => {
                break;
            }
        }
    }

    Ok(())
}

fn ui(app: &App, f: &mut Frame) {
    f.render_widget(app, f.area());
}
