use thiserror::Error;

/// Errors reported by the peerlink command line
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Agent(#[from] peerlink_agent::Error),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Command failed: {0}")]
    CommandFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn invalid_parameter(msg: impl Into<String>) -> Self {
        Error::InvalidParameter(msg.into())
    }

    pub fn command_failed(msg: impl Into<String>) -> Self {
        Error::CommandFailed(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
