//! Protocol timing constants.
//!
//! These mirror the fixed timing behavior described for the CP phy and
//! application state machines: nothing here is configurable at runtime.

use std::time::Duration;

/// How long the CP phy FSM waits for a complete reply before declaring a
/// timeout and bumping the PD's retry counter.
pub const REPLY_TIMEOUT: Duration = Duration::from_millis(200);

/// Maximum allowed gap between consecutive bytes of one frame while
/// reassembling a reply; a gap this long without forward progress on a
/// partial frame means the transport stalled mid-frame.
pub const INTER_CHARACTER_GAP: Duration = Duration::from_millis(20);

/// How often the CP issues a `POLL` to an `ONLINE` PD when its command
/// queue is empty.
pub const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Initial backoff before retrying an `OFFLINE` PD.
pub const OFFLINE_RETRY_INITIAL: Duration = Duration::from_secs(1);

/// Upper bound on the `OFFLINE` retry backoff.
pub const OFFLINE_RETRY_MAX: Duration = Duration::from_secs(8);

/// Consecutive phy-level errors before a PD is marked `OFFLINE`.
pub const MAX_CONSECUTIVE_ERRORS: u8 = 3;

/// Double the previous backoff, capped at [`OFFLINE_RETRY_MAX`].
pub fn next_backoff(previous: Duration) -> Duration {
    previous.saturating_mul(2).min(OFFLINE_RETRY_MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let mut backoff = OFFLINE_RETRY_INITIAL;
        for _ in 0..10 {
            backoff = next_backoff(backoff);
        }
        assert_eq!(backoff, OFFLINE_RETRY_MAX);
    }
}
