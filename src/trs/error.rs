//! Errors raised while encoding, decoding, or dispatching a TRS message.

use thiserror::Error;

/// Errors raised by the TRS codec
pub type Error = crate::Error<ErrorKind>;

/// Kinds of TRS errors
#[derive(Copy, Clone, Debug, Eq, Error, PartialEq)]
pub enum ErrorKind {
    /// `(mode, code)` fails the validation rule in spec §4.7: `code == 0`,
    /// `mode` outside `{0, 1}`, or `code` out of range for its mode
    #[error("invalid TRS (mode, code) pair")]
    InvalidModeCode,

    /// Payload too short, or a length-prefixed field overruns the buffer
    #[error("malformed TRS message body")]
    Format,

    /// A mode-1 command arrived before the CP issued a matching `MODE_SET`
    #[error("TRS mode 1 command received before MODE_SET")]
    WrongMode,

    /// An APDU exceeds the 64-byte capacity this engine carries
    #[error("APDU too long")]
    ApduTooLong,
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        anomaly::Context::new(kind, None).into()
    }
}
