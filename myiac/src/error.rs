//! Error types for myiac

use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("command `{command}` exited with {}", code.map(|c| c.to_string()).unwrap_or_else(|| "a signal".to_string()))]
    ProcessFailure { command: String, code: Option<i32> },

    #[error("failed to start `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("failed to parse {what}: {source}")]
    Parse {
        what: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("api error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("preferences file {path}: {message}")]
    Preferences { path: PathBuf, message: String },
}

impl Error {
    pub fn validation(message: impl Into<String>) -> Self {
        Error::Validation(message.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Error::NotFound(what.into())
    }

    pub fn parse(what: impl Into<String>, source: serde_json::Error) -> Self {
        Error::Parse {
            what: what.into(),
            source,
        }
    }

    /// Single classification point for "the looked-up resource does not exist".
    ///
    /// The rendered-text match only applies to errors that carry no better
    /// signal, such as API messages from backends that answer 200 with an
    /// error body.
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound(_) => true,
            Error::Api { status: 404, .. } => true,
            Error::Http(err) => err.status().map(|s| s.as_u16()) == Some(404),
            other => other.to_string().to_lowercase().contains("not found"),
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Validation(_) => 2,
            Error::ProcessFailure { .. } | Error::Spawn { .. } => 3,
            _ if self.is_not_found() => 4,
            Error::Parse { .. } => 5,
            _ => 1,
        }
    }
}
