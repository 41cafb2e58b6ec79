use thiserror::Error;

/// A convenience `Result` alias using [`TetherError`].
pub type TetherResult<T> = Result<T, TetherError>;

/// Top-level error type for the tether runtime.
///
/// Each variant corresponds to a subsystem that can produce errors.
#[derive(Error, Debug)]
pub enum TetherError {
    /// An error originating from the agent execution loop.
    #[error("Agent error: {0}")]
    Agent(String),

    /// An error returned by a model backend.
    #[error("Provider error: {0}")]
    Provider(String),

    /// An error from an outbound HTTP request made by a backend.
    #[error("HTTP error: {0}")]
    Http(String),

    /// An error raised by a tool during invocation.
    #[error("Tool error: {0}")]
    Tool(String),

    /// An error in configuration parsing or validation.
    #[error("Config error: {0}")]
    Config(String),

    /// Every rotation profile is cooling down, or none is registered.
    #[error("No profile available: {0}")]
    NoProfileAvailable(String),

    /// The run was cancelled before the operation completed.
    #[error("Operation cancelled")]
    Cancelled,

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
