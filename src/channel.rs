//! The serial transport abstraction that connects one PD record to the
//! physical (or simulated) wire.
//!
//! This is the engine's one external collaborator for I/O: a [`Channel`]
//! moves bytes non-blockingly and nothing else. It does not know about
//! frames, sequence numbers, or Secure Channel state.

use anomaly::{BoxError, Context};
use std::io;
use thiserror::Error;

/// Errors raised by a [`Channel`] implementation
pub type Error = crate::Error<ErrorKind>;

/// Kinds of channel errors
#[derive(Copy, Clone, Debug, Eq, Error, PartialEq)]
pub enum ErrorKind {
    /// The underlying transport is gone (closed, unplugged, etc)
    #[error("channel closed")]
    Closed,

    /// I/O error moving bytes
    #[error("I/O error")]
    Io,
}

impl ErrorKind {
    /// Create an error context from this error
    pub fn context(self, source: impl Into<BoxError>) -> Context<ErrorKind> {
        Context::new(self, Some(source.into()))
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        ErrorKind::Io.context(err).into()
    }
}

/// A non-blocking byte transport to exactly one PD.
///
/// Implementations must never block: `send`/`recv` return immediately,
/// reporting however many bytes were actually moved (possibly zero).
/// Multiple PDs may share the same physical bus (RS-485 multidrop) only if
/// the embedder serializes access to it; this engine always assumes one
/// active PD on the wire at a time per `Channel`.
pub trait Channel: Send {
    /// Opaque identifier for this channel, e.g. a file descriptor or port
    /// name. Used only for logging/diagnostics.
    fn id(&self) -> u32;

    /// Write as many bytes of `buf` as can be moved right now without
    /// blocking. Returns the number of bytes written (may be 0).
    fn send(&mut self, buf: &[u8]) -> Result<usize, Error>;

    /// Read as many bytes as are available right now into `buf`, without
    /// blocking. Returns the number of bytes read (0 means "no data now").
    fn recv(&mut self, buf: &mut [u8]) -> Result<usize, Error>;

    /// Discard any buffered in-flight bytes (e.g. after a framing error).
    fn flush(&mut self);
}

/// An in-memory loopback pair of channels, used to exercise the CP and PD
/// state machines against each other without real serial hardware. Both
/// ends are equally "real" `Channel`s backed by a shared byte queue, one
/// per direction.
#[cfg(test)]
pub mod loopback {
    use super::{Channel, Error};
    use std::{
        collections::VecDeque,
        sync::{Arc, Mutex},
    };

    #[derive(Default)]
    struct Pipe(Mutex<VecDeque<u8>>);

    /// One end of an in-memory loopback pair
    pub struct Loopback {
        id: u32,
        outbox: Arc<Pipe>,
        inbox: Arc<Pipe>,
    }

    /// Create a connected pair of loopback channels: bytes sent on `a` are
    /// received on `b` and vice versa.
    pub fn pair(id_a: u32, id_b: u32) -> (Loopback, Loopback) {
        let a_to_b = Arc::new(Pipe::default());
        let b_to_a = Arc::new(Pipe::default());

        let a = Loopback {
            id: id_a,
            outbox: a_to_b.clone(),
            inbox: b_to_a.clone(),
        };
        let b = Loopback {
            id: id_b,
            outbox: b_to_a,
            inbox: a_to_b,
        };

        (a, b)
    }

    impl Channel for Loopback {
        fn id(&self) -> u32 {
            self.id
        }

        fn send(&mut self, buf: &[u8]) -> Result<usize, Error> {
            self.outbox.0.lock().unwrap().extend(buf.iter().copied());
            Ok(buf.len())
        }

        fn recv(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
            let mut inbox = self.inbox.0.lock().unwrap();
            let n = buf.len().min(inbox.len());

            for slot in buf.iter_mut().take(n) {
                *slot = inbox.pop_front().unwrap();
            }

            Ok(n)
        }

        fn flush(&mut self) {
            self.inbox.0.lock().unwrap().clear();
        }
    }

    #[test]
    fn loopback_round_trip() {
        let (mut a, mut b) = pair(1, 2);
        assert_eq!(a.send(b"hello").unwrap(), 5);

        let mut buf = [0u8; 8];
        let n = b.recv(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"hello");

        // nothing left to read
        assert_eq!(b.recv(&mut buf).unwrap(), 0);
    }
}
