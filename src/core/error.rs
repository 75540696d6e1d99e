use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The workflow document is not valid structured data.
    #[error("malformed workflow document: {0}")]
    MalformedDocument(String),

    /// Another queued or running download already writes to this path.
    #[error("a download already targets {}", .0.display())]
    DuplicateTarget(PathBuf),

    #[error("HTTP {status}")]
    Http { status: u16 },

    #[error("download cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not found: {0}")]
    NotFound(String),

    /// Connection-level failure reported by the HTTP client.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("transfer ended after {received} of {expected} bytes")]
    IncompleteTransfer { expected: u64, received: u64 },

    #[error("download orchestrator is shut down")]
    ShutDown,
}

impl Error {
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Error::MalformedDocument(error.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(error: reqwest::Error) -> Self {
        match error.status() {
            Some(status) => Error::Http {
                status: status.as_u16(),
            },
            None => Error::Transport(error.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_failure() {
        assert_eq!(Error::Http { status: 404 }.to_string(), "HTTP 404");
        assert_eq!(
            Error::DuplicateTarget(PathBuf::from("/models/a.safetensors")).to_string(),
            "a download already targets /models/a.safetensors"
        );
        assert!(Error::Cancelled.is_cancelled());
        assert!(!Error::NotFound("x".into()).is_cancelled());
    }

    #[test]
    fn json_errors_become_malformed_documents() {
        let parse = serde_json::from_str::<serde_json::Value>("{nodes:").unwrap_err();
        assert!(matches!(Error::from(parse), Error::MalformedDocument(_)));
    }
}
