//! Error type shared across the workspace.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum NudgeError {
    #[error("Config error: `{0}`")]
    Config(String),
    #[error("Store error: `{0}`")]
    Store(String),
    #[error("Channel error: `{0}`")]
    Channel(String),
    #[error("Validation error: `{0}`")]
    Validation(String),
    #[error("Scheduler error: `{0}`")]
    Scheduler(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, NudgeError>;
