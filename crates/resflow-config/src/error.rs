use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config directory not found")]
    ConfigDirNotFound,

    #[error(
        "settings file not found. Looked in:\n\
        - current directory: resflow.local.yaml, resflow.yaml\n\
        - ./.resflow/ directory\n\
        - ~/.config/resflow/resflow.yaml\n\
        or point RESFLOW_CONFIG_PATH at a file"
    )]
    SettingsFileNotFound,

    #[error("invalid settings: {0}")]
    Invalid(String),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
