use std::fmt;
use thiserror::Error;

/// Step of `execute_command` that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Staging,
    Invocation,
    Collection,
    ResultFetch,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Staging => "staging",
            Phase::Invocation => "invocation",
            Phase::Collection => "output collection",
            Phase::ResultFetch => "result fetch",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("Config error: {0}")]
    ConfigError(String),
    #[error("Connection error: {0}")]
    ConnectionError(String),
    #[error("Authentication error: {0}")]
    AuthenticationError(String),
    #[error("Timeout error: {0}")]
    TimeoutError(String),
    #[error("File Transfer Error: {0}")]
    FileTransferError(String),
    #[error("File not found: {0}")]
    FileNotFoundError(String),
    #[error("Execution error during {phase}: {source}")]
    ExecutionError {
        phase: Phase,
        #[source]
        source: Box<Error>,
    },
    #[error("Socket Error: {0}")]
    SocketError(#[from] std::io::Error),
    #[error("JSON Error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl Error {
    pub fn execution(phase: Phase, source: Error) -> Self {
        Error::ExecutionError {
            phase,
            source: Box::new(source),
        }
    }

    /// True for a missing remote file, including one wrapped by an execution failure.
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::FileNotFoundError(_) => true,
            Error::ExecutionError { source, .. } => source.is_not_found(),
            _ => false,
        }
    }

    pub fn is_timeout(&self) -> bool {
        match self {
            Error::TimeoutError(_) => true,
            Error::ExecutionError { source, .. } => source.is_timeout(),
            _ => false,
        }
    }

    /// Maps a remote filesystem error for `path`, keeping "not found" distinct.
    pub(crate) fn from_remote_io(path: &str, err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Error::FileNotFoundError(path.to_string()),
            std::io::ErrorKind::TimedOut => Error::TimeoutError(format!("{}: {}", path, err)),
            _ => Error::FileTransferError(format!("{}: {}", path, err)),
        }
    }
}

#[cfg(feature = "ssh")]
impl From<russh::Error> for Error {
    fn from(err: russh::Error) -> Self {
        match err {
            russh::Error::ConnectionTimeout | russh::Error::InactivityTimeout => {
                Error::TimeoutError(err.to_string())
            }
            _ => Error::ConnectionError(err.to_string()),
        }
    }
}

#[cfg(feature = "ssh")]
impl From<russh_keys::Error> for Error {
    fn from(err: russh_keys::Error) -> Self {
        Error::AuthenticationError(err.to_string())
    }
}

/// A custom `Result` type for our client operations.
pub type Result<T> = std::result::Result<T, Error>;
