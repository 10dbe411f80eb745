use thiserror::Error;

/// ttyrelay unified error type
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("System call failed: {0}")]
    Sys(#[from] nix::Error),

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("{0} must contain '/' or ':'")]
    InvalidTarget(String),

    #[error("Console error: {0}")]
    Console(String),

    #[error("Could not connect to {target}: {source}")]
    Connect {
        target: String,
        #[source]
        source: ConnectError,
    },

    #[error("Lost connection to {0}")]
    ConnectionLost(String),

    #[error("Shell command error: {0}")]
    Subprocess(String),
}

impl RelayError {
    /// Process exit status reported for this error.
    pub fn exit_code(&self) -> i32 {
        1
    }
}

/// Outcome of a single failed connection attempt.
#[derive(Error, Debug)]
pub enum ConnectError {
    /// Worth trying again (connection refused, timed out, device not there yet).
    #[error("{0}")]
    Retryable(std::io::Error),

    /// Retrying cannot help; reconnection is abandoned even if requested.
    #[error("{0}")]
    Fatal(std::io::Error),
}

impl ConnectError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ConnectError::Retryable(_))
    }

    /// Classify a network connect failure.
    pub fn from_connect(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::ConnectionRefused | std::io::ErrorKind::TimedOut => {
                ConnectError::Retryable(err)
            }
            _ => ConnectError::Fatal(err),
        }
    }
}

pub type RelayResult<T> = Result<T, RelayError>;
