//! Errors raised while encoding or decoding a [`super::Reply`]

use thiserror::Error;

/// Errors raised by the reply codec
pub type Error = crate::Error<ErrorKind>;

/// Kinds of reply errors
#[derive(Copy, Clone, Debug, Eq, Error, PartialEq)]
pub enum ErrorKind {
    /// The reply code byte does not correspond to any known reply
    #[error("unknown reply code")]
    Unknown,

    /// The reply's payload is the wrong length for its code
    #[error("invalid reply length")]
    Length,
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        anomaly::Context::new(kind, None).into()
    }
}
