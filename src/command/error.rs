//! Errors raised while encoding or decoding a [`super::Command`]

use thiserror::Error;

/// Errors raised by the command codec
pub type Error = crate::Error<ErrorKind>;

/// Kinds of command errors
#[derive(Copy, Clone, Debug, Eq, Error, PartialEq)]
pub enum ErrorKind {
    /// The command code byte does not correspond to any known command
    #[error("unknown command code")]
    Unknown,

    /// The command's payload is the wrong length for its code
    #[error("invalid command length")]
    Length,
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        anomaly::Context::new(kind, None).into()
    }
}
