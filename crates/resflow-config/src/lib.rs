pub mod error;
pub mod settings;

pub use error::*;
pub use settings::{
    ContainerSettings, DiedPolicy, PollSettings, ReconcileSettings, Settings, WorkflowSettings,
};

use std::path::PathBuf;

const CANDIDATES: [&str; 2] = ["resflow.local.yaml", "resflow.yaml"];

/// Return the user config directory for resflow, creating it if needed
pub fn get_config_dir() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or(ConfigError::ConfigDirNotFound)?
        .join("resflow");

    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir)?;
    }

    Ok(config_dir)
}

/// Locate the settings file
///
/// Search order:
/// 1. `RESFLOW_CONFIG_PATH` (direct path)
/// 2. current directory: resflow.local.yaml, resflow.yaml
/// 3. `./.resflow/`, same names
/// 4. `~/.config/resflow/resflow.yaml`
pub fn find_settings_file() -> Result<PathBuf> {
    if let Ok(config_path) = std::env::var("RESFLOW_CONFIG_PATH") {
        let path = PathBuf::from(config_path);
        if path.exists() {
            return Ok(path);
        }
    }

    let current_dir = std::env::current_dir()?;

    for filename in &CANDIDATES {
        let path = current_dir.join(filename);
        if path.exists() {
            return Ok(path);
        }
    }

    let local_dir = current_dir.join(".resflow");
    if local_dir.is_dir() {
        for filename in &CANDIDATES {
            let path = local_dir.join(filename);
            if path.exists() {
                return Ok(path);
            }
        }
    }

    if let Some(config_dir) = dirs::config_dir() {
        let global = config_dir.join("resflow").join("resflow.yaml");
        if global.exists() {
            return Ok(global);
        }
    }

    Err(ConfigError::SettingsFileNotFound)
}

/// Load settings from the discovered file, or defaults when there is none
pub fn load_settings() -> Result<Settings> {
    match find_settings_file() {
        Ok(path) => Settings::from_file(path),
        Err(ConfigError::SettingsFileNotFound) => Ok(Settings::default()),
        Err(e) => Err(e),
    }
}
