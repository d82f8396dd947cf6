//! One peer PD's CP-side record: queue, wire state, and handshake scratch
//! (spec §3 "PD record" as seen from the CP role).

use super::app::AppState;
use super::phy::PhyState;
use crate::{
    channel::Channel,
    command::Command,
    config::PdConfig,
    error::ErrorKind,
    flags::PdFlags,
    queue::Queue,
    reply::{Capability, PdId},
    securechannel::{Scbk, Session},
    timing,
};
use std::time::{Duration, Instant};

/// Errors raised while running the CP role.
pub type Error = crate::error::Error<ErrorKind>;

/// One peer in a CP's array, addressed by [`crate::pd::PdHandle`].
pub struct Peer {
    pub(super) offset: usize,
    pub(super) address: u8,
    pub(super) channel: Box<dyn Channel>,
    pub(super) use_crc: bool,
    pub(super) flags: PdFlags,

    pub(super) queue: Queue<Command>,
    pub(super) queue_capacity: usize,
    pub(super) seq: u8,

    pub(super) phy_state: PhyState,
    pub(super) pending_tx: Option<(Vec<u8>, usize)>,
    pub(super) rx_buf: Vec<u8>,
    pub(super) await_since: Option<Instant>,
    pub(super) last_sent_code: u8,

    pub(super) consecutive_errors: u8,
    pub(super) err_backoff: Duration,
    pub(super) err_wait_since: Option<Instant>,

    pub(super) offline_since: Option<Instant>,
    pub(super) offline_backoff: Duration,

    pub(super) app_state: AppState,
    pub(super) install_mode: bool,
    pub(super) id: Option<PdId>,
    pub(super) capabilities: Vec<Capability>,
    pub(super) scbk: Option<Scbk>,
    pub(super) session: Option<Session>,
    pub(super) cp_random: Option<[u8; 8]>,
    pub(super) pending_scbk: Option<Scbk>,
}

impl Peer {
    pub(super) fn new(offset: usize, config: &PdConfig, channel: Box<dyn Channel>) -> Self {
        Self {
            offset,
            address: config.address,
            channel,
            use_crc: true,
            flags: config.initial_flags(),
            queue: Queue::new(config.queue_depth),
            queue_capacity: config.queue_depth,
            seq: 0,
            phy_state: PhyState::Idle,
            pending_tx: None,
            rx_buf: Vec::new(),
            await_since: None,
            last_sent_code: 0,
            consecutive_errors: 0,
            err_backoff: timing::OFFLINE_RETRY_INITIAL,
            err_wait_since: None,
            offline_since: None,
            offline_backoff: timing::OFFLINE_RETRY_INITIAL,
            app_state: AppState::Init,
            install_mode: config.install_mode,
            id: None,
            capabilities: Vec::new(),
            scbk: config.scbk,
            session: None,
            cp_random: None,
            pending_scbk: None,
        }
    }

    /// This peer's offset in its CP's array (spec §3 "offset").
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// This peer's bus address.
    pub fn address(&self) -> u8 {
        self.address
    }

    /// This peer's current [`PdFlags`].
    pub fn flags(&self) -> PdFlags {
        self.flags
    }

    /// This peer's application state (spec §4.5).
    pub fn app_state(&self) -> AppState {
        self.app_state
    }

    /// The identification record learned from this peer, once `IDREQ` has
    /// completed.
    pub fn id(&self) -> Option<&PdId> {
        self.id.as_ref()
    }

    /// Queue a command for this peer. Delivered the next time its phy FSM
    /// reaches `IDLE` (spec §4.4).
    pub fn enqueue(&mut self, command: Command) -> Result<(), Error> {
        self.queue.enqueue(command).map_err(Error::from)
    }

    /// Force this peer back through the full handshake from `INIT`,
    /// discarding any queued commands and the active Secure Channel session.
    pub fn reset(&mut self) {
        self.app_state = AppState::Init;
        self.session = None;
        self.queue = Queue::new(self.queue_capacity);
        self.phy_state = PhyState::Idle;
        self.rx_buf.clear();
        self.pending_tx = None;
        self.await_since = None;
        self.flags.remove(PdFlags::SC_ACTIVE);
        self.consecutive_errors = 0;
        self.offline_since = None;
    }
}
