//! Configuration module
//!
//! Handles application settings and platform directories

mod settings;

pub use settings::{AppConfig, ConfigError, LinkConfig, LoggingConfig};

use directories::ProjectDirs;
use std::path::PathBuf;

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "quickterm", "Quickterm")
}

/// Get the application configuration directory
pub fn config_dir() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the application data directory
pub fn data_dir() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.data_dir().to_path_buf())
}

/// Get the profile directory, falling back to `./profiles`
pub fn profiles_dir() -> PathBuf {
    config_dir().map_or_else(|| PathBuf::from("profiles"), |d| d.join("profiles"))
}

/// Get the log directory
pub fn log_dir() -> Option<PathBuf> {
    data_dir().map(|d| d.join("logs"))
}

/// Initialize application directories
pub fn init_directories() -> std::io::Result<()> {
    if let Some(dir) = config_dir() {
        std::fs::create_dir_all(dir)?;
    }
    std::fs::create_dir_all(profiles_dir())?;
    if let Some(dir) = log_dir() {
        std::fs::create_dir_all(dir)?;
    }
    Ok(())
}
