use thiserror::Error;

/// Error taxonomy for the scheduling + execution + persistence core.
///
/// Execution failures (`execution_transient` / `execution_terminal` in the
/// design notes) never surface through this type: they are recorded on the
/// job itself and logged, never propagated past the executor's task
/// boundary. This enum only covers errors that a caller of the Store or
/// Scheduler needs to react to.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("job not found: {0}")]
    NotFound(String),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("operation cancelled")]
    Cancelled,
}

impl From<std::io::Error> for CoreError {
    fn from(err: std::io::Error) -> Self {
        CoreError::Persistence(err.to_string())
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::Persistence(err.to_string())
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
