//! Control Panel (CP) role: polls N peripheral devices, round-robin, each
//! through its own phy and application state machines (spec §4.4, §4.5,
//! §4.6.. "CP scheduler").
//!
//! [`Cp`] owns the peer array and the scheduler that picks which one
//! [`Cp::refresh`] advances this tick. Everything it needs from a single
//! peer's wire exchange and handshake bookkeeping lives in [`peer::Peer`];
//! this module is just the part that ties N of those together and exposes
//! them to [`crate::Context`].

mod app;
mod peer;
mod phy;
mod scheduler;

pub use app::AppState;
pub use peer::Peer;

use crate::{
    channel::Channel,
    command::Command,
    config::{Config, PdConfig, RoleConfig},
    error::ErrorKind,
    event::EventCallback,
    pd::PdHandle,
    securechannel::{MasterKey, Scbk},
};
use anomaly::{ensure, fail};
use rand_core::{CryptoRng, RngCore};
use scheduler::Scheduler;

/// Errors raised while running the CP role.
pub type Error = crate::error::Error<ErrorKind>;

/// Embedder callback persisting a freshly diversified SCBK after install-mode
/// key rollover completes (spec §6 "Persistent state": `keyset_persist`).
/// Optional: without one installed, the new key lives only in memory for the
/// life of the [`crate::Context`].
pub type KeysetPersist = Box<dyn FnMut(usize, Scbk) + Send>;

/// A Control Panel's view of the bus: every peer it polls, visited in
/// round-robin order (spec §2 "CP scheduler", §5 "round-robin via
/// `pd_offset`").
pub struct Cp {
    peers: Vec<Peer>,
    scheduler: Scheduler,
    master_key: Option<MasterKey>,
    sc_enabled: bool,
    event_callback: EventCallback,
    keyset_persist: Option<KeysetPersist>,
}

impl Cp {
    /// Build a CP from a validated [`Config`] (must carry [`RoleConfig::Cp`])
    /// and one [`Channel`] per PD, in `offset` order.
    pub(crate) fn new(
        config: &Config,
        channels: Vec<Box<dyn Channel>>,
        event_callback: EventCallback,
        keyset_persist: Option<KeysetPersist>,
    ) -> Result<Self, Error> {
        let RoleConfig::Cp { pds } = &config.role else {
            fail!(ErrorKind::ConfigInvalid, "Cp::new requires a CP-role configuration");
        };
        ensure!(
            pds.len() == channels.len(),
            ErrorKind::ConfigInvalid,
            "{} PDs configured but {} channels supplied",
            pds.len(),
            channels.len()
        );

        let peers = pds
            .iter()
            .zip(channels)
            .enumerate()
            .map(|(offset, (pd_config, channel)): (usize, (&PdConfig, Box<dyn Channel>))| {
                Peer::new(offset, pd_config, channel)
            })
            .collect::<Vec<_>>();

        Ok(Self {
            scheduler: Scheduler::new(peers.len()),
            peers,
            master_key: config.master_key,
            sc_enabled: config.secure_channel_enabled,
            event_callback,
            keyset_persist,
        })
    }

    /// Number of peers this CP polls.
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Read-only access to one peer's record.
    pub fn peer(&self, handle: PdHandle) -> &Peer {
        &self.peers[handle.0]
    }

    /// Queue a command for a specific peer, delivered the next time its phy
    /// FSM reaches `IDLE` (spec §4.4).
    pub fn enqueue(&mut self, handle: PdHandle, command: Command) -> Result<(), Error> {
        self.peers[handle.0].enqueue(command)
    }

    /// Force one peer back through the full handshake from `INIT`, as if it
    /// had just come online (spec §5 "Cancellation": "a per-PD reset ...
    /// aborts any in-flight command and forces state -> INIT").
    pub fn reset_peer(&mut self, handle: PdHandle) {
        self.peers[handle.0].reset();
    }

    /// Advance exactly one peer's state machines by one step (spec §5: "each
    /// tick advances the CP phy FSM for exactly one PD ... then the app
    /// FSM"), then move the scheduler on to the next peer.
    pub fn refresh<R: CryptoRng + RngCore>(&mut self, rng: &mut R) -> Result<(), Error> {
        if self.peers.is_empty() {
            return Ok(());
        }
        let handle = self.scheduler.current();
        let peer = &mut self.peers[handle.0];

        if peer.app_state() == AppState::Offline {
            peer.app_tick_offline();
        } else {
            peer.app_pump(rng)?;
            let outcome = peer.phy_tick()?;
            peer.app_handle_outcome(
                outcome,
                rng,
                self.master_key.as_ref(),
                self.sc_enabled,
                &mut self.event_callback,
                &mut self.keyset_persist,
            )?;
        }

        self.scheduler.advance();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{channel::loopback, config::PdConfig};
    use rand_core::OsRng;

    fn cp_config(addresses: &[u8]) -> Config {
        Config {
            secure_channel_enabled: false,
            master_key: None,
            role: RoleConfig::Cp {
                pds: addresses
                    .iter()
                    .map(|&address| PdConfig {
                        address,
                        baud_rate: 9600,
                        queue_depth: 4,
                        install_mode: false,
                        skip_seq_check: false,
                        scbk: None,
                        id: None,
                        capabilities: Vec::new(),
                    })
                    .collect(),
            },
        }
    }

    #[test]
    fn rejects_mismatched_channel_count() {
        let config = cp_config(&[1, 2]);
        let (_host, field) = loopback::pair(1, 2);
        let err = Cp::new(&config, vec![Box::new(field)], Box::new(|_, _| {}), None);
        assert!(err.is_err());
    }

    #[test]
    fn refresh_visits_every_peer_round_robin() {
        let config = cp_config(&[1, 2, 3]);
        let channels: Vec<Box<dyn Channel>> = (0..3)
            .map(|i| {
                let (_host, field) = loopback::pair(i, i + 10);
                Box::new(field) as Box<dyn Channel>
            })
            .collect();
        let mut cp = Cp::new(&config, channels, Box::new(|_, _| {}), None).unwrap();

        for i in 0..6 {
            assert_eq!(cp.scheduler.current().0, i % 3);
            cp.refresh(&mut OsRng).unwrap();
        }
    }

    #[test]
    fn end_to_end_clear_text_poll_brings_peer_online() {
        use crate::{command::Command as _Cmd, pd::Pd, reply::PdId};
        let _ = _Cmd::Poll;

        let config = cp_config(&[5]);
        let (host, field) = loopback::pair(1, 2);
        let mut cp = Cp::new(&config, vec![Box::new(field)], Box::new(|_, _| {}), None).unwrap();

        let pd_config = PdConfig {
            address: 5,
            baud_rate: 9600,
            queue_depth: 4,
            install_mode: false,
            skip_seq_check: false,
            scbk: None,
            id: Some(PdId {
                vendor_code: [0x5C, 0x0A, 0x26],
                model: 1,
                version: 1,
                serial_number: 0xDEADBEEF,
                firmware: [1, 0, 0],
            }),
            capabilities: Vec::new(),
        };
        let mut pd = Pd::new(&pd_config, Box::new(host), Box::new(|_| crate::pd::PdStatus::Ack));

        let handle = PdHandle(0);
        for _ in 0..64 {
            cp.refresh(&mut OsRng).unwrap();
            pd.tick(&mut OsRng).unwrap();
            if cp.peer(handle).app_state() == AppState::Online {
                break;
            }
        }
        assert_eq!(cp.peer(handle).app_state(), AppState::Online);
        assert!(cp.peer(handle).id().is_some());
    }
}
