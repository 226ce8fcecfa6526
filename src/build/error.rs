use crate::parser::ParseError;
use crate::toolchain::ToolchainError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BuildError {
    /// Missing toolchain path or profile. Raised before anything is scheduled.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("command failed with exit code {code:?}: {program} {}", .args.join(" "))]
    Process {
        program: String,
        args: Vec<String>,
        code: Option<i32>,
    },

    #[error("failed to launch {program}: {message}")]
    Launch { program: String, message: String },

    #[error("cache error: {0}")]
    Cache(String),

    #[error("{0} task(s) can never start, their prerequisites never finished")]
    Stalled(usize),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<ToolchainError> for BuildError {
    fn from(e: ToolchainError) -> Self {
        BuildError::Configuration(e.to_string())
    }
}

impl BuildError {
    pub fn configuration(message: impl Into<String>) -> Self {
        BuildError::Configuration(message.into())
    }
}
