use thiserror::Error; // Import the `Error` derive macro from the `thiserror` crate

// Contract violations raised to the caller; user mistakes inside a binding are
// reported as diagnostics instead and never show up here.
#[derive(Debug, Error)]
pub enum SandboxError {
    // The binding arrived over the message boundary as something other than a string
    #[error("TypeError: binding must be a string, got {found}")]
    BindingNotString { found: &'static str },

    // An additional-library helper failed; the binding sees an error of class `class`
    #[error("{class}: {message}")]
    Library { class: &'static str, message: String },

    // The receiving side of the response channel has gone away
    #[error("response channel closed before request {request_id} could be answered")]
    ChannelClosed { request_id: String },

    // Configuration file could not be read or decoded
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

// Failure reported by the host when it could not run a trigger capability
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct TriggerError(pub String);

// Type alias for results that use `SandboxError` as the error type
pub type Result<T> = std::result::Result<T, SandboxError>;
