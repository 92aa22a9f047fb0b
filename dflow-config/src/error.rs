use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid value for {var}={value:?}: expected {expected}")]
    InvalidEnvValue { var: &'static str, value: String, expected: &'static str },

    #[error("{field} must be positive, got {value}")]
    NotPositive { field: &'static str, value: i64 },

    #[error("invalid listen address {0:?}")]
    InvalidAddr(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
