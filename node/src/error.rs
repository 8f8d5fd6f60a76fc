use crate::Variant;
use reqwest::StatusCode;
use thiserror::Error;

/// Coarse classification of a failure, used to decide whether it is worth retrying
/// and whether a test expected it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The node understood the request and rejected it (400, 422).
    ValidationRejected,
    /// The route or resource does not exist (404).
    NotFound,
    /// The failure is expected to clear up on its own (connection refused or
    /// reset, timeouts, 429, 502 to 504, container engine hiccups).
    Transient,
    /// Anything else.
    Fatal,
}

/// Errors that can occur when driving a node.
#[derive(Error, Debug)]
pub enum Error {
    // Node responses
    #[error("Error: {status} for url: {url} with response: {body}")]
    Request {
        method: String,
        url: String,
        status: StatusCode,
        body: String,
    },
    #[error("transport failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("rpc {method} failed: {message}")]
    Rpc { method: String, message: String },
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),

    // Container engine
    #[error("docker {command} failed: {stderr}")]
    Docker { command: String, stderr: String },
    #[error("node is not running: {0}")]
    NotRunning(String),
    #[error("address pool exhausted: {0}")]
    PoolExhausted(String),
    #[error("address in use: {0}")]
    AddressInUse(String),

    // Setup
    #[error("unknown node image: {0}")]
    UnknownImage(String),
    #[error("{operation} is not supported by {variant}")]
    Unsupported {
        variant: Variant,
        operation: &'static str,
    },
    #[error("missing parameter: {0}")]
    MissingParameter(&'static str),
    #[error("invalid flag: {0}")]
    InvalidFlag(String),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("invalid message: {0}")]
    InvalidMessage(String),
    #[error("rln credentials: {0}")]
    Rln(String),

    // Checks
    #[error("{0}")]
    Assertion(String),
    #[error("fixture: {0}")]
    Fixture(String),

    // Plumbing
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl Error {
    /// Classify the failure.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Request { status, .. } => classify_status(*status),
            Error::Transport(err) => {
                if self.is_connection_failure() {
                    ErrorKind::Transient
                } else if let Some(status) = err.status() {
                    classify_status(status)
                } else {
                    ErrorKind::Fatal
                }
            }
            Error::Docker { .. } => ErrorKind::Transient,
            _ => ErrorKind::Fatal,
        }
    }

    /// HTTP status of a rejected request, if any.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Error::Request { status, .. } => Some(*status),
            Error::Transport(err) => err.status(),
            _ => None,
        }
    }

    /// Raw body of a rejected request, if any.
    pub fn body(&self) -> Option<&str> {
        match self {
            Error::Request { body, .. } => Some(body),
            _ => None,
        }
    }

    /// Whether the rendered error (status line plus body) contains `needle`.
    ///
    /// Nodes word their rejections differently, so tests that expect a rejection
    /// usually accept one of several phrasings.
    pub fn mentions(&self, needle: &str) -> bool {
        self.to_string().contains(needle)
    }

    /// Whether the error is a connection-level failure where no complete response
    /// arrived: refused, timed out, or closed by the peer mid-exchange.
    pub fn is_connection_failure(&self) -> bool {
        matches!(
            self,
            Error::Transport(err)
                if err.is_connect() || err.is_timeout() || err.is_request() || err.is_body()
        )
    }

    /// Whether the error stems from how the node was configured rather than from
    /// its runtime behavior. These are never retried.
    pub fn is_setup(&self) -> bool {
        matches!(
            self,
            Error::UnknownImage(_)
                | Error::Unsupported { .. }
                | Error::MissingParameter(_)
                | Error::InvalidFlag(_)
                | Error::InvalidConfig(_)
                | Error::Rln(_)
                | Error::AddressInUse(_)
        )
    }
}

fn classify_status(status: StatusCode) -> ErrorKind {
    match status.as_u16() {
        400 | 422 => ErrorKind::ValidationRejected,
        404 => ErrorKind::NotFound,
        429 | 502 | 503 | 504 => ErrorKind::Transient,
        _ => ErrorKind::Fatal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rejected(status: u16, body: &str) -> Error {
        Error::Request {
            method: "POST".into(),
            url: "http://127.0.0.1:8645/relay/v1/messages/%2Fwaku%2F2%2Frs%2F3%2F0".into(),
            status: StatusCode::from_u16(status).unwrap(),
            body: body.into(),
        }
    }

    #[test]
    fn test_kind_from_status() {
        assert_eq!(rejected(400, "").kind(), ErrorKind::ValidationRejected);
        assert_eq!(rejected(422, "").kind(), ErrorKind::ValidationRejected);
        assert_eq!(rejected(404, "").kind(), ErrorKind::NotFound);
        for status in [429, 502, 503, 504] {
            assert_eq!(rejected(status, "").kind(), ErrorKind::Transient);
        }
        assert_eq!(rejected(500, "").kind(), ErrorKind::Fatal);
        assert_eq!(rejected(401, "").kind(), ErrorKind::Fatal);
    }

    #[test]
    fn test_kind_of_other_errors() {
        let docker = Error::Docker {
            command: "stop abc".into(),
            stderr: "daemon busy".into(),
        };
        assert_eq!(docker.kind(), ErrorKind::Transient);
        assert_eq!(
            Error::Assertion("no messages".into()).kind(),
            ErrorKind::Fatal
        );
        assert_eq!(
            Error::MissingParameter("pubsub topic").kind(),
            ErrorKind::Fatal
        );
    }

    #[test]
    fn test_rendering_keeps_status_and_body() {
        let err = rejected(400, "Failed to publish: invalid payload");
        let rendered = err.to_string();
        assert!(rendered.contains("400 Bad Request"));
        assert!(rendered.contains("invalid payload"));
        assert!(err.mentions("Bad Request"));
        assert!(err.mentions("invalid payload"));
        assert!(!err.mentions("Not Found"));
        assert_eq!(err.status(), Some(StatusCode::BAD_REQUEST));
        assert_eq!(err.body(), Some("Failed to publish: invalid payload"));
    }

    #[test]
    fn test_setup_errors() {
        assert!(Error::UnknownImage("busybox".into()).is_setup());
        assert!(Error::Unsupported {
            variant: Variant::GoWaku,
            operation: "metrics",
        }
        .is_setup());
        assert!(!rejected(503, "").is_setup());
        assert!(!Error::Assertion("x".into()).is_setup());
    }
}
