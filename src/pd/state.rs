//! PD-role receive/reply state (spec §4.6).

/// States the PD role's [`super::Pd::tick`] cycles through: `IDLE ->
/// SEND_REPLY -> (IDLE | ERR)`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum State {
    /// Waiting for (or accumulating) an incoming frame.
    Idle,
    /// A reply frame is being written to the channel, possibly across
    /// several ticks if `send` only moves part of it.
    SendReply,
    /// A framing error was just handled; clear transient state before
    /// returning to `Idle`.
    Err,
}
