use directories::ProjectDirs;
use std::path::PathBuf;

/// Centralized application directory resolution
pub struct AppDirs;

impl AppDirs {
    /// Session history database under $HOME/.local/state/saccade
    pub fn db_path() -> Option<PathBuf> {
        if let Ok(home) = std::env::var("HOME") {
            let state_dir = PathBuf::from(home)
                .join(".local")
                .join("state")
                .join("saccade");
            Some(state_dir.join("sessions.db"))
        } else {
            ProjectDirs::from("", "", "saccade")
                .map(|proj_dirs| proj_dirs.data_local_dir().join("sessions.db"))
        }
    }

    /// Plain-text results log, kept next to the config file
    pub fn log_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "saccade").map(|proj_dirs| proj_dirs.config_dir().join("log.csv"))
    }
}
