//! Events the engine surfaces to a CP embedder (§4.5 "Event surface").
//!
//! Every event is delivered synchronously, within the `refresh` tick that
//! produced it (§5 "Reply delivery is synchronous within a tick"), by
//! calling the embedder's [`EventCallback`]. The callback's return value is
//! advisory only: the engine does not change behavior based on it.

/// A card read, in whichever format the PD reported it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CardRead {
    /// Reader number the card was presented to
    pub reader: u8,
    /// True if `data` is already bit-unpacked (`REPLY_FMT`) rather than the
    /// raw bitstream (`REPLY_RAW`)
    pub formatted: bool,
    /// Card data: the bitstream (raw) or one byte per unpacked bit/char
    pub data: Vec<u8>,
}

/// Events a CP-role [`crate::Context`] surfaces to the embedder, one per
/// occurrence, each tagged with the offset of the PD it concerns (§4.5).
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub enum Event {
    /// A card was presented to a reader
    CardRead(CardRead),
    /// A key was pressed on a reader's keypad
    Keypress {
        /// Reader number
        reader: u8,
        /// Key code
        key: u8,
    },
    /// The PD transitioned from any other state into `ONLINE`
    PdOnline,
    /// The PD was marked `OFFLINE` after repeated phy-level errors
    PdOffline,
    /// The Secure Channel handshake completed and `SC_ACTIVE` was set
    ScUp,
    /// The Secure Channel was torn down (MAC failure, cryptogram mismatch,
    /// or an explicit reset) and `SC_ACTIVE` was cleared
    ScDown,
    /// Local/IO status changed (tamper, power, input, output)
    IoStatus {
        /// Tamper condition present
        tamper: bool,
        /// Power trouble present
        power: bool,
    },
    /// The PD NAK'd a command as unknown/unsupported. Surfaced as an event
    /// rather than a state transition (spec §4.5 NAK handling table).
    CommandUnknown {
        /// Wire code of the command the PD rejected
        code: u8,
    },
    /// A `REPLY_XRD` arrived carrying a Transparent Reader Support reply
    /// (§4.7). The CP role does not interpret TRS semantics itself; it
    /// just hands the decoded reply to the embedder.
    Trs(crate::trs::Reply),
}

/// A PD offset (index into the CP's PD array), paired with the event that
/// occurred on it.
pub type PdOffset = usize;

/// Embedder callback for CP-role events: `event_callback(event, pd_offset)`
/// (§6 "Embedder callbacks (CP role)"). A boxed closure taken at setup
/// rather than a trait object the embedder must name.
pub type EventCallback = Box<dyn FnMut(Event, PdOffset) + Send>;
