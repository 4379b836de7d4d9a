use sluice_config::ConfigError;
use std::fmt;

/// Coarse classification of a transport failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportErrorKind {
    /// Connection could not be established.
    Connect,
    Timeout,
    /// Connection broke while sending or receiving.
    Io,
    Protocol,
    /// A request filter refused the request.
    Rejected,
    /// The transport was closed.
    Closed,
}

impl TransportErrorKind {
    /// Failures the retry path re-attempts up to `max_request_retry`.
    pub fn is_io_failure(self) -> bool {
        matches!(self, Self::Connect | Self::Io)
    }
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connect => "connect",
            Self::Timeout => "timeout",
            Self::Io => "io",
            Self::Protocol => "protocol",
            Self::Rejected => "rejected",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind} error: {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn connect(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Connect, message)
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Io, message)
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Rejected, message)
    }

    pub fn closed(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Closed, message)
    }

    pub fn is_io_failure(&self) -> bool {
        self.kind.is_io_failure()
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        // a connect timeout is still a failed connect
        let kind = if err.is_connect() {
            TransportErrorKind::Connect
        } else if err.is_timeout() {
            TransportErrorKind::Timeout
        } else if err.is_builder() || err.is_redirect() || err.is_status() {
            TransportErrorKind::Protocol
        } else {
            TransportErrorKind::Io
        };
        Self::new(kind, err.to_string())
    }
}

/// Everything a request future or the client surface can fail with.
///
/// The type is `Clone` so a single failed cache load reaches every waiter
/// unchanged.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("Request was cancelled")]
    Cancelled,
    #[error("Client is closed")]
    Closed,
    #[error("Worker pool rejected the task")]
    Rejected,
    #[error("Request ended without a result: {0}")]
    Incomplete(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Handler failed: {0}")]
    Handler(String),
    #[error("Failed to decode response: {0}")]
    Decode(String),
}

impl From<ConfigError> for ClientError {
    fn from(err: ConfigError) -> Self {
        Self::Configuration(err.to_string())
    }
}

impl ClientError {
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    pub fn transport_kind(&self) -> Option<TransportErrorKind> {
        match self {
            Self::Transport(err) => Some(err.kind),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_failure_kinds() {
        assert!(TransportErrorKind::Connect.is_io_failure());
        assert!(TransportErrorKind::Io.is_io_failure());
        assert!(!TransportErrorKind::Timeout.is_io_failure());
        assert!(!TransportErrorKind::Protocol.is_io_failure());
        assert!(!TransportErrorKind::Rejected.is_io_failure());
        assert!(!TransportErrorKind::Closed.is_io_failure());
    }

    #[test]
    fn transport_error_display() {
        let err = TransportError::connect("refused");
        assert_eq!(err.to_string(), "connect error: refused");
        let client_err = ClientError::from(err.clone());
        assert_eq!(client_err.to_string(), "connect error: refused");
        assert_eq!(client_err.transport_kind(), Some(TransportErrorKind::Connect));
        assert!(client_err.is_transport());
    }

    #[test]
    fn config_error_becomes_configuration() {
        let err = ClientError::from(ConfigError::MissingSection("http".into()));
        assert!(matches!(err, ClientError::Configuration(ref msg) if msg.contains("http")));
    }
}
