//! Top-level engine handle: owns either a CP's view of its peers or a
//! single PD's view of itself, and is the one thing an embedder drives
//! (spec §3 "Context", §5 "the engine exposes a `refresh(ctx)` tick").

use crate::{
    channel::Channel,
    config::{Config, RoleConfig},
    cp::{Cp, KeysetPersist},
    error::ErrorKind,
    event::EventCallback,
    pd::{CommandHandler, Pd, TrsHandler},
};
use anomaly::fail;
use rand_core::{CryptoRng, RngCore};

/// Errors raised while setting up or driving a [`Context`].
pub type Error = crate::error::Error<ErrorKind>;

/// The embedder-supplied collaborators a [`Context`] needs at setup time,
/// specific to the role named by a [`Config`]'s [`RoleConfig`] (spec §6
/// "Embedder callbacks").
pub enum RoleHandles {
    /// Collaborators for a CP-role `Context`: one [`Channel`] per configured
    /// PD, in `offset` order, plus the event sink and (if install-mode key
    /// rollover is in play) the key-persistence callback.
    Cp {
        /// Non-blocking transport, one per peer, in `offset` order.
        channels: Vec<Box<dyn Channel>>,
        /// Receives every CP-role event this tick produced (spec §4.5
        /// "Event surface").
        event_callback: EventCallback,
        /// Invoked once a freshly diversified SCBK has replaced the one a
        /// peer was provisioned with (spec §6 "Persistent state").
        keyset_persist: Option<KeysetPersist>,
    },
    /// Collaborators for a PD-role `Context`: the channel this device is
    /// reached over, the command dispatch callback, and (if Transparent
    /// Reader Support is in play) the TRS request handler.
    Pd {
        /// Non-blocking transport to the CP polling this device.
        channel: Box<dyn Channel>,
        /// Answers every command this engine does not fully handle on its
        /// own (spec §6 "command_handler(command) -> status").
        command_handler: CommandHandler,
        /// Answers TRS requests needing live reader/card state (spec §4.7).
        /// Without one, `SEND_APDU`/`ENTER_PIN`/`CARD_SCAN` are NAK'd.
        trs_handler: Option<TrsHandler>,
    },
}

/// The engine's single entry point: either a Control Panel polling N peers,
/// or a Peripheral Device answering one (spec §3 "Context").
///
/// Constructed by [`Context::setup`] and driven one tick at a time by
/// [`Context::refresh`], which an embedder is expected to call frequently
/// (spec §5: "must be called frequently (<= a few ms)"). Dropping a
/// `Context` (or calling [`Context::teardown`] explicitly) frees its queues
/// and clears any Secure Channel material (spec §5 "Cancellation").
pub enum Context {
    /// This process is the Control Panel.
    Cp(Cp),
    /// This process is a Peripheral Device.
    Pd(Pd),
}

impl Context {
    /// Validate `config`, then build either the CP or PD side of the engine
    /// depending on its [`RoleConfig`]. `handles` must match that role;
    /// passing the wrong variant is a setup-time [`ErrorKind::ConfigInvalid`]
    /// (spec §7 "ConfigInvalid ... detected at setup; fatal, engine does not
    /// start").
    pub fn setup(config: Config, handles: RoleHandles) -> Result<Self, Error> {
        config.validate()?;
        match (&config.role, handles) {
            (
                RoleConfig::Cp { .. },
                RoleHandles::Cp { channels, event_callback, keyset_persist },
            ) => Ok(Context::Cp(Cp::new(&config, channels, event_callback, keyset_persist)?)),
            (
                RoleConfig::Pd { pd },
                RoleHandles::Pd { channel, command_handler, trs_handler },
            ) => {
                let mut instance = Pd::new(pd, channel, command_handler);
                if let Some(handler) = trs_handler {
                    instance.set_trs_handler(handler);
                }
                Ok(Context::Pd(instance))
            }
            _ => fail!(ErrorKind::ConfigInvalid, "role handles do not match the configured role"),
        }
    }

    /// Advance this `Context` by exactly one tick: for a CP, one step of the
    /// current peer's phy FSM followed by its app FSM, then the scheduler
    /// moves on; for a PD, one step of its own receive/reply FSM (spec §5).
    pub fn refresh<R: CryptoRng + RngCore>(&mut self, rng: &mut R) -> Result<(), Error> {
        match self {
            Context::Cp(cp) => cp.refresh(rng),
            Context::Pd(pd) => pd.tick(rng),
        }
    }

    /// This `Context`'s CP half, if it is playing the CP role.
    pub fn cp(&self) -> Option<&Cp> {
        match self {
            Context::Cp(cp) => Some(cp),
            Context::Pd(_) => None,
        }
    }

    /// Mutable access to this `Context`'s CP half, if it is playing the CP
    /// role.
    pub fn cp_mut(&mut self) -> Option<&mut Cp> {
        match self {
            Context::Cp(cp) => Some(cp),
            Context::Pd(_) => None,
        }
    }

    /// This `Context`'s PD half, if it is playing the PD role.
    pub fn pd(&self) -> Option<&Pd> {
        match self {
            Context::Pd(pd) => Some(pd),
            Context::Cp(_) => None,
        }
    }

    /// Mutable access to this `Context`'s PD half, if it is playing the PD
    /// role.
    pub fn pd_mut(&mut self) -> Option<&mut Pd> {
        match self {
            Context::Pd(pd) => Some(pd),
            Context::Cp(_) => None,
        }
    }

    /// Release this `Context`'s queues and Secure Channel material. Plain
    /// `drop`ping does the same thing (spec §5 "dropping the context frees
    /// all queues and clears SC material"); this method exists only to give
    /// that moment a name at the call site.
    pub fn teardown(self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        channel::loopback,
        config::PdConfig,
        pd::PdStatus,
        reply::PdId,
    };
    use rand_core::OsRng;

    fn pd_id() -> PdId {
        PdId {
            vendor_code: [0x5C, 0x0A, 0x26],
            model: 1,
            version: 1,
            serial_number: 0xDEAD_BEEF,
            firmware: [1, 2, 3],
        }
    }

    #[test]
    fn setup_rejects_handles_for_the_wrong_role() {
        let config = Config {
            secure_channel_enabled: false,
            master_key: None,
            role: RoleConfig::Pd {
                pd: PdConfig {
                    address: 5,
                    baud_rate: 9600,
                    queue_depth: 4,
                    install_mode: false,
                    skip_seq_check: false,
                    scbk: None,
                    id: Some(pd_id()),
                    capabilities: Vec::new(),
                },
            },
        };
        let (_host, field) = loopback::pair(1, 2);
        let handles = RoleHandles::Cp {
            channels: vec![Box::new(field)],
            event_callback: Box::new(|_, _| {}),
            keyset_persist: None,
        };
        assert!(Context::setup(config, handles).is_err());
    }

    #[test]
    fn end_to_end_cp_and_pd_contexts_reach_online() {
        let (host, field) = loopback::pair(1, 2);

        let cp_config = Config {
            secure_channel_enabled: false,
            master_key: None,
            role: RoleConfig::Cp {
                pds: vec![PdConfig {
                    address: 5,
                    baud_rate: 9600,
                    queue_depth: 4,
                    install_mode: false,
                    skip_seq_check: false,
                    scbk: None,
                    id: None,
                    capabilities: Vec::new(),
                }],
            },
        };
        let mut cp_ctx = Context::setup(
            cp_config,
            RoleHandles::Cp {
                channels: vec![Box::new(field)],
                event_callback: Box::new(|_, _| {}),
                keyset_persist: None,
            },
        )
        .unwrap();

        let pd_config = Config {
            secure_channel_enabled: false,
            master_key: None,
            role: RoleConfig::Pd {
                pd: PdConfig {
                    address: 5,
                    baud_rate: 9600,
                    queue_depth: 4,
                    install_mode: false,
                    skip_seq_check: false,
                    scbk: None,
                    id: Some(pd_id()),
                    capabilities: Vec::new(),
                },
            },
        };
        let mut pd_ctx = Context::setup(
            pd_config,
            RoleHandles::Pd {
                channel: Box::new(host),
                command_handler: Box::new(|_| PdStatus::Ack),
                trs_handler: None,
            },
        )
        .unwrap();

        for _ in 0..64 {
            cp_ctx.refresh(&mut OsRng).unwrap();
            pd_ctx.refresh(&mut OsRng).unwrap();
        }

        let cp = cp_ctx.cp().unwrap();
        let peer = cp.peer(crate::pd::PdHandle(0));
        assert_eq!(peer.app_state(), crate::cp::AppState::Online);
        assert_eq!(peer.id(), Some(&pd_id()));
        assert!(pd_ctx.pd().is_some());
    }

    #[test]
    fn teardown_consumes_the_context() {
        let (_host, field) = loopback::pair(1, 2);
        let config = Config {
            secure_channel_enabled: false,
            master_key: None,
            role: RoleConfig::Pd {
                pd: PdConfig {
                    address: 5,
                    baud_rate: 9600,
                    queue_depth: 4,
                    install_mode: false,
                    skip_seq_check: false,
                    scbk: None,
                    id: Some(pd_id()),
                    capabilities: Vec::new(),
                },
            },
        };
        let ctx = Context::setup(
            config,
            RoleHandles::Pd {
                channel: Box::new(field),
                command_handler: Box::new(|_| PdStatus::Ack),
                trs_handler: None,
            },
        )
        .unwrap();
        ctx.teardown();
    }

    #[test]
    fn end_to_end_secure_channel_handshake_activates_and_diversifies_scbk() {
        use crate::{event::Event, reply::Capability};
        use std::sync::{Arc, Mutex};

        let (host, field) = loopback::pair(1, 2);
        let master_key = [0x42u8; 16];
        let sc_capability = Capability { function_code: 0x07, compliance_level: 1, num_items: 1 };

        let cp_config = Config {
            secure_channel_enabled: true,
            master_key: Some(master_key),
            role: RoleConfig::Cp {
                pds: vec![PdConfig {
                    address: 5,
                    baud_rate: 9600,
                    queue_depth: 4,
                    install_mode: true,
                    skip_seq_check: false,
                    scbk: None,
                    id: None,
                    capabilities: Vec::new(),
                }],
            },
        };
        let persisted: Arc<Mutex<Option<(usize, crate::securechannel::Scbk)>>> = Arc::new(Mutex::new(None));
        let persisted_handle = persisted.clone();
        let events: Arc<Mutex<Vec<Event>>> = Arc::new(Mutex::new(Vec::new()));
        let events_handle = events.clone();
        let mut cp_ctx = Context::setup(
            cp_config,
            RoleHandles::Cp {
                channels: vec![Box::new(field)],
                event_callback: Box::new(move |ev, _| events_handle.lock().unwrap().push(ev)),
                keyset_persist: Some(Box::new(move |offset, scbk| {
                    *persisted_handle.lock().unwrap() = Some((offset, scbk));
                })),
            },
        )
        .unwrap();

        let pd_config = Config {
            secure_channel_enabled: true,
            master_key: None,
            role: RoleConfig::Pd {
                pd: PdConfig {
                    address: 5,
                    baud_rate: 9600,
                    queue_depth: 4,
                    install_mode: true,
                    skip_seq_check: false,
                    scbk: None,
                    id: Some(pd_id()),
                    capabilities: vec![sc_capability],
                },
            },
        };
        let mut pd_ctx = Context::setup(
            pd_config,
            RoleHandles::Pd {
                channel: Box::new(host),
                command_handler: Box::new(|_| PdStatus::Ack),
                trs_handler: None,
            },
        )
        .unwrap();

        for _ in 0..128 {
            cp_ctx.refresh(&mut OsRng).unwrap();
            pd_ctx.refresh(&mut OsRng).unwrap();
        }

        let cp = cp_ctx.cp().unwrap();
        let peer = cp.peer(crate::pd::PdHandle(0));
        assert_eq!(peer.app_state(), crate::cp::AppState::Online);
        assert!(peer.flags().contains(crate::flags::PdFlags::SC_ACTIVE));
        assert!(events.lock().unwrap().contains(&Event::ScUp));

        let (offset, scbk) = persisted.lock().unwrap().expect("SCBK diversified and persisted");
        assert_eq!(offset, 0);
        assert_ne!(scbk, crate::securechannel::SCBK_DEFAULT);
    }

    #[test]
    fn secure_channel_mac_tamper_during_online_tears_down_and_rehandshakes() {
        use crate::{cp::AppState, event::Event, flags::PdFlags, reply::Capability};
        use std::sync::{
            atomic::{AtomicBool, Ordering},
            Arc, Mutex,
        };

        struct TamperOnSend {
            inner: Box<dyn Channel>,
            armed: Arc<AtomicBool>,
        }

        impl Channel for TamperOnSend {
            fn id(&self) -> u32 {
                self.inner.id()
            }

            fn send(&mut self, buf: &[u8]) -> Result<usize, crate::channel::Error> {
                if self.armed.swap(false, Ordering::SeqCst) {
                    // Flip the last byte of the SCB/payload region (the MAC
                    // tag, for a bodyless ACK reply), then recompute the
                    // trailing CRC16 so the frame still decodes structurally
                    // and only the Secure Channel verification fails.
                    let mut tampered = buf.to_vec();
                    let trailer_offset = tampered.len() - 2;
                    tampered[trailer_offset - 1] ^= 0xFF;
                    let crc = crate::phy::crc16(&tampered[..trailer_offset]).to_le_bytes();
                    tampered[trailer_offset..].copy_from_slice(&crc);
                    self.inner.send(&tampered)
                } else {
                    self.inner.send(buf)
                }
            }

            fn recv(&mut self, buf: &mut [u8]) -> Result<usize, crate::channel::Error> {
                self.inner.recv(buf)
            }

            fn flush(&mut self) {
                self.inner.flush()
            }
        }

        let (host, field) = loopback::pair(1, 2);
        let scbk = [0x11u8; 16];
        let armed = Arc::new(AtomicBool::new(false));
        let tampered_host = TamperOnSend { inner: Box::new(host), armed: armed.clone() };
        let sc_capability = Capability { function_code: 0x07, compliance_level: 1, num_items: 1 };

        let cp_config = Config {
            secure_channel_enabled: true,
            master_key: Some([0u8; 16]),
            role: RoleConfig::Cp {
                pds: vec![PdConfig {
                    address: 5,
                    baud_rate: 9600,
                    queue_depth: 4,
                    install_mode: false,
                    skip_seq_check: false,
                    scbk: Some(scbk),
                    id: None,
                    capabilities: Vec::new(),
                }],
            },
        };
        let events: Arc<Mutex<Vec<Event>>> = Arc::new(Mutex::new(Vec::new()));
        let events_handle = events.clone();
        let mut cp_ctx = Context::setup(
            cp_config,
            RoleHandles::Cp {
                channels: vec![Box::new(field)],
                event_callback: Box::new(move |ev, _| events_handle.lock().unwrap().push(ev)),
                keyset_persist: None,
            },
        )
        .unwrap();

        let pd_config = Config {
            secure_channel_enabled: true,
            master_key: None,
            role: RoleConfig::Pd {
                pd: PdConfig {
                    address: 5,
                    baud_rate: 9600,
                    queue_depth: 4,
                    install_mode: false,
                    skip_seq_check: false,
                    scbk: Some(scbk),
                    id: Some(pd_id()),
                    capabilities: vec![sc_capability],
                },
            },
        };
        let mut pd_ctx = Context::setup(
            pd_config,
            RoleHandles::Pd {
                channel: Box::new(tampered_host),
                command_handler: Box::new(|_| PdStatus::Ack),
                trs_handler: None,
            },
        )
        .unwrap();

        for _ in 0..128 {
            cp_ctx.refresh(&mut OsRng).unwrap();
            pd_ctx.refresh(&mut OsRng).unwrap();
            let cp = cp_ctx.cp().unwrap();
            if cp.peer(crate::pd::PdHandle(0)).flags().contains(PdFlags::SC_ACTIVE) {
                break;
            }
        }
        assert!(cp_ctx.cp().unwrap().peer(crate::pd::PdHandle(0)).flags().contains(PdFlags::SC_ACTIVE));

        armed.store(true, Ordering::SeqCst);

        // Tick just far enough to observe the tear-down, not far enough to
        // let a fresh handshake complete and set `SC_ACTIVE` again.
        for _ in 0..16 {
            cp_ctx.refresh(&mut OsRng).unwrap();
            pd_ctx.refresh(&mut OsRng).unwrap();
            if events.lock().unwrap().contains(&Event::ScDown) {
                break;
            }
        }

        assert!(events.lock().unwrap().contains(&Event::ScDown));
        let cp = cp_ctx.cp().unwrap();
        let peer = cp.peer(crate::pd::PdHandle(0));
        assert!(!peer.flags().contains(PdFlags::SC_ACTIVE));
        assert_eq!(peer.app_state(), AppState::ScInit);
    }

    #[test]
    fn trs_apdu_passthrough_end_to_end() {
        use crate::{command::Command, event::Event, trs};
        use std::sync::{Arc, Mutex};

        let (host, field) = loopback::pair(1, 2);
        let cp_config = Config {
            secure_channel_enabled: false,
            master_key: None,
            role: RoleConfig::Cp {
                pds: vec![PdConfig {
                    address: 5,
                    baud_rate: 9600,
                    queue_depth: 4,
                    install_mode: false,
                    skip_seq_check: false,
                    scbk: None,
                    id: None,
                    capabilities: Vec::new(),
                }],
            },
        };
        let events: Arc<Mutex<Vec<Event>>> = Arc::new(Mutex::new(Vec::new()));
        let events_handle = events.clone();
        let mut cp_ctx = Context::setup(
            cp_config,
            RoleHandles::Cp {
                channels: vec![Box::new(field)],
                event_callback: Box::new(move |ev, _| events_handle.lock().unwrap().push(ev)),
                keyset_persist: None,
            },
        )
        .unwrap();

        let pd_config = Config {
            secure_channel_enabled: false,
            master_key: None,
            role: RoleConfig::Pd {
                pd: PdConfig {
                    address: 5,
                    baud_rate: 9600,
                    queue_depth: 4,
                    install_mode: false,
                    skip_seq_check: false,
                    scbk: None,
                    id: Some(pd_id()),
                    capabilities: Vec::new(),
                },
            },
        };
        let mut pd_ctx = Context::setup(
            pd_config,
            RoleHandles::Pd {
                channel: Box::new(host),
                command_handler: Box::new(|_| PdStatus::Ack),
                trs_handler: Some(Box::new(|command| match command {
                    trs::Command::SendApdu(apdu) => trs::Reply::CardData(trs::CardData {
                        reader: apdu.reader,
                        status: 0,
                        apdu: vec![0x90, 0x00],
                    }),
                    _ => trs::Reply::CurrentMode(trs::CurrentMode { mode: 1 }),
                })),
            },
        )
        .unwrap();

        // Bring the peer online first (no Secure Channel in play here).
        for _ in 0..64 {
            cp_ctx.refresh(&mut OsRng).unwrap();
            pd_ctx.refresh(&mut OsRng).unwrap();
        }
        assert_eq!(
            cp_ctx.cp().unwrap().peer(crate::pd::PdHandle(0)).app_state(),
            crate::cp::AppState::Online
        );

        let mut mode_set = Vec::new();
        trs::Command::ModeSet(trs::ModeSet { mode: 1 }).encode(&mut mode_set).unwrap();
        cp_ctx
            .cp_mut()
            .unwrap()
            .enqueue(crate::pd::PdHandle(0), Command::Xwr(mode_set))
            .unwrap();
        for _ in 0..16 {
            cp_ctx.refresh(&mut OsRng).unwrap();
            pd_ctx.refresh(&mut OsRng).unwrap();
        }

        let mut send_apdu = Vec::new();
        trs::Command::SendApdu(trs::SendApdu { reader: 0, apdu: vec![0x00, 0xA4, 0x04, 0x00, 0x00] })
            .encode(&mut send_apdu)
            .unwrap();
        cp_ctx
            .cp_mut()
            .unwrap()
            .enqueue(crate::pd::PdHandle(0), Command::Xwr(send_apdu))
            .unwrap();
        for _ in 0..16 {
            cp_ctx.refresh(&mut OsRng).unwrap();
            pd_ctx.refresh(&mut OsRng).unwrap();
        }

        let card_data = events.lock().unwrap().iter().find_map(|ev| match ev {
            Event::Trs(trs::Reply::CardData(data)) => Some(data.clone()),
            _ => None,
        });
        let card_data = card_data.expect("CARD_DATA reply observed");
        assert_eq!(card_data.apdu, vec![0x90, 0x00]);
        assert_eq!(card_data.status, 0);
    }
}
