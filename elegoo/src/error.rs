use std::time::Duration;

/// A Result alias where the error defaults to [Error].
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Failure polling a printer.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The socket failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The printer did not answer in time.
    #[error("printer did not answer within {0:?}")]
    Timeout(Duration),

    /// The printer answered with something we could not read.
    #[error("unreadable status response: {0}")]
    Parse(String),
}
