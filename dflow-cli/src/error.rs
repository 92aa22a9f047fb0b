use thiserror::Error;

/// Errors a launcher can hit while running a script (spec §6, "CLI
/// surface": exit code 2 covers everything in this enum, everything else
/// is a launch failure reported before the script even starts running).
#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("could not read script {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("line {line}: operation failed: {source}")]
    Operation {
        line: usize,
        #[source]
        source: dflow_client::ClientError,
    },
}

pub type Result<T> = std::result::Result<T, ScriptError>;
