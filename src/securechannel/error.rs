//! Errors raised by the Secure Channel

use thiserror::Error;

/// Errors raised by [`super::Session`]
pub type Error = crate::Error<ErrorKind>;

/// Kinds of Secure Channel errors
#[derive(Copy, Clone, Debug, Eq, Error, PartialEq)]
pub enum ErrorKind {
    /// A cryptogram or MAC failed to verify
    #[error("secure channel verification failed")]
    VerifyFailed,

    /// An encrypt/decrypt or MAC operation was attempted before the
    /// handshake completed
    #[error("secure channel not active")]
    NotActive,
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        anomaly::Context::new(kind, None).into()
    }
}
