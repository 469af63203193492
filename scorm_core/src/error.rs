// Typed errors with thiserror. Surface meaningful messages to JS.
// SCORM protocol errors are not here: they live in scorm_error.rs and only
// reach the embedded package through the LMS error accessors.

use thiserror::Error;

/// Transport errors raised by the persistence client.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClientError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Server error {status}: {message}")]
    Server { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Malformed response: {0}")]
    Decode(String),

    /// The request could not even be submitted.
    #[error("Request rejected: {0}")]
    Rejected(String),
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        ClientError::Decode(err.to_string())
    }
}

/// Player session errors. These are the ones the learner sees.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    #[error("Cannot {action} while {state}")]
    InvalidTransition {
        state: &'static str,
        action: &'static str,
    },

    #[error("Could not expose the LMS API to the content frame: {0}")]
    Injection(String),

    #[error("No content is open")]
    NoActiveSession,

    #[error("The content did not accept LMS initialization (error {0})")]
    InitializeRejected(u16),

    #[error("Could not load content: {0}")]
    Launch(#[from] ClientError),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Umbrella error at the WASM boundary.
#[derive(Error, Debug)]
pub enum PlayerError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Client(ClientError),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<ClientError> for PlayerError {
    fn from(err: ClientError) -> Self {
        PlayerError::Client(err)
    }
}

impl From<serde_json::Error> for PlayerError {
    fn from(err: serde_json::Error) -> Self {
        PlayerError::Serialization(err.to_string())
    }
}

impl SessionError {
    /// Whether an explicit user retry can recover the session.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SessionError::Launch(_) | SessionError::Injection(_) | SessionError::InitializeRejected(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = SessionError::InvalidTransition {
            state: "loading",
            action: "mark done",
        };
        assert_eq!(err.to_string(), "Cannot mark done while loading");
    }

    #[test]
    fn launch_failures_are_retryable() {
        let err = SessionError::from(ClientError::NotFound("content 9".into()));
        assert!(err.is_retryable());
        assert!(err.to_string().contains("content 9"));
        assert!(!SessionError::NoActiveSession.is_retryable());
    }

    #[test]
    fn json_errors_become_decode_errors() {
        let err: ClientError = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert!(matches!(err, ClientError::Decode(_)));
    }
}
