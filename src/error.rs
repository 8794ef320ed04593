use thiserror::Error;

/// Failures the relay reports back over the socket or journals.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("{name} tab not found")]
    TabNotFound { name: String },

    #[error("Input field not found")]
    InputNotFound,

    /// Never returned to the peer; the injector falls back to an Enter key-down.
    #[error("Submit control not found, falling back to Enter key")]
    SubmitPathUnavailable,

    #[error("Script execution failed: {0}")]
    ScriptExecutionFailed(String),

    #[error("Malformed command: {0}")]
    MalformedCommand(String),

    #[error("Relay connection lost: {0}")]
    ConnectionLost(String),

    #[error("Relay socket could not be created: {0}")]
    ConstructionFailure(String),

    #[error("Unknown site: {0}")]
    UnknownSite(String),
}
