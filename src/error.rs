//! Error types used throughout this crate.
//!
//! Every fallible subsystem defines its own `ErrorKind` (a small, `Copy`
//! enum of failure categories with no payload) and re-exports
//! `pub type Error = crate::Error<ErrorKind>`. `Error<Kind>` pairs a `Kind`
//! with an optional boxed source error, following the `anomaly` crate's
//! context pattern (see e.g. `command::ErrorKind` or `phy::ErrorKind`).
//!
//! This module additionally defines the top-level [`ErrorKind`], the one
//! subsystem-agnostic view of "what went wrong" that [`crate::Context`]
//! surfaces to an embedder (spec §7's error kinds table), and `From` impls
//! that fold each subsystem's own error into it.

pub use anomaly::{BoxError, Context};
use thiserror::Error as DeriveError;

/// An error of the given `Kind`, optionally wrapping a source error.
pub type Error<Kind> = anomaly::Error<Kind>;

/// Top-level error kinds an embedder can observe out of [`crate::Context`]
/// (spec §7). Subsystem errors (phy, queue, securechannel, command, reply,
/// channel, trs) are folded into one of these via `From`.
#[derive(Copy, Clone, Debug, Eq, DeriveError, PartialEq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// Bad SOM, length, or trailer (`FrameFormat`)
    #[error("malformed frame")]
    FrameFormat,

    /// Buffer does not yet hold a complete frame (`FrameIncomplete`)
    #[error("incomplete frame")]
    FrameIncomplete,

    /// Frame addressed to a different PD (`FrameSkip`)
    #[error("frame not addressed to this PD")]
    FrameSkip,

    /// Unexpected sequence number in the header (`SequenceMismatch`)
    #[error("sequence number mismatch")]
    SequenceMismatch,

    /// MAC mismatch, cryptogram mismatch, or unexpected SCB type
    /// (`SecureChannelFailure`)
    #[error("secure channel failure")]
    SecureChannelFailure,

    /// PD does not implement the command it was sent (`CommandUnknown`)
    #[error("unknown or unsupported command")]
    CommandUnknown,

    /// Command payload had the wrong length for its code (`CommandLength`)
    #[error("command length error")]
    CommandLength,

    /// PD could not process the command's record (`Record`)
    #[error("unable to process record")]
    Record,

    /// The per-PD command queue has no free slab blocks (`QueueFull`)
    #[error("command queue full")]
    QueueFull,

    /// The reply timer expired before a complete frame arrived (`Timeout`)
    #[error("reply timed out")]
    Timeout,

    /// Invalid configuration detected at setup (`ConfigInvalid`)
    #[error("invalid configuration")]
    ConfigInvalid,
}

impl From<ErrorKind> for Error<ErrorKind> {
    fn from(kind: ErrorKind) -> Self {
        anomaly::Context::new(kind, None).into()
    }
}

impl From<crate::phy::Error> for Error<ErrorKind> {
    fn from(err: crate::phy::Error) -> Self {
        let kind = match err.kind() {
            crate::phy::ErrorKind::Format => ErrorKind::FrameFormat,
            crate::phy::ErrorKind::Incomplete => ErrorKind::FrameIncomplete,
            crate::phy::ErrorKind::Skip => ErrorKind::FrameSkip,
        };
        anomaly::Context::new(kind, Some(Box::new(err))).into()
    }
}

impl From<crate::queue::Error> for Error<ErrorKind> {
    fn from(err: crate::queue::Error) -> Self {
        anomaly::Context::new(ErrorKind::QueueFull, Some(Box::new(err))).into()
    }
}

impl From<crate::securechannel::Error> for Error<ErrorKind> {
    fn from(err: crate::securechannel::Error) -> Self {
        anomaly::Context::new(ErrorKind::SecureChannelFailure, Some(Box::new(err))).into()
    }
}

impl From<crate::command::Error> for Error<ErrorKind> {
    fn from(err: crate::command::Error) -> Self {
        let kind = match err.kind() {
            crate::command::ErrorKind::Unknown => ErrorKind::CommandUnknown,
            crate::command::ErrorKind::Length => ErrorKind::CommandLength,
        };
        anomaly::Context::new(kind, Some(Box::new(err))).into()
    }
}

impl From<crate::reply::Error> for Error<ErrorKind> {
    fn from(err: crate::reply::Error) -> Self {
        let kind = match err.kind() {
            crate::reply::ErrorKind::Unknown => ErrorKind::CommandUnknown,
            crate::reply::ErrorKind::Length => ErrorKind::CommandLength,
        };
        anomaly::Context::new(kind, Some(Box::new(err))).into()
    }
}

impl From<crate::channel::Error> for Error<ErrorKind> {
    fn from(err: crate::channel::Error) -> Self {
        anomaly::Context::new(ErrorKind::Record, Some(Box::new(err))).into()
    }
}
