//! CP application state machine: `INIT -> IDREQ -> CAPDET -> SC_INIT ->
//! SC_CHLNG -> SC_SCRYPT -> SET_SCBK -> ONLINE`, plus `OFFLINE` (spec §4.5).

use super::peer::{Error, Peer};
use super::phy::PhyOutcome;
use super::KeysetPersist;
use crate::{
    command::{Command, KeySet},
    event::{CardRead, Event, EventCallback},
    flags::PdFlags,
    reply::{Code as ReplyCode, NakCode, PdId, Reply},
    securechannel::{compute_scbk, MasterKey, Scbk, Session, SCBK_DEFAULT},
    timing,
};
use rand_core::{CryptoRng, RngCore};

/// Capability function code this engine treats as "this PD speaks Secure
/// Channel" (`CAP_COMMUNICATION_SECURITY` in the wire protocol's capability table).
const SC_CAPABILITY_FUNCTION_CODE: u8 = 0x07;

/// Per-peer application states (spec §4.5's state table).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AppState {
    /// Freshly (re)started: reset local bookkeeping, then move on.
    Init,
    /// Awaiting `REPLY_PDID`.
    Idreq,
    /// Awaiting `REPLY_PDCAP`.
    Capdet,
    /// Picking SCBK vs SCBK-D and sending the Secure Channel challenge.
    ScInit,
    /// Awaiting `REPLY_CCRYPT`.
    ScChlng,
    /// Awaiting `REPLY_RMAC_I`.
    ScScrypt,
    /// Awaiting the `ACK` to a freshly issued `CMD_KEYSET`.
    SetScbk,
    /// Steady state: drain the queue, or `POLL` if it is empty.
    Online,
    /// Marked offline after repeated phy-level errors; waiting out a
    /// backoff window before retrying from `INIT`.
    Offline,
}

/// Derive the 8-byte client UID [`compute_scbk`] expects from a PD's
/// identification record: vendor code, model, and serial number happen to
/// total exactly 8 bytes, and together uniquely identify a PD.
fn client_uid(id: &PdId) -> [u8; 8] {
    let mut uid = [0u8; 8];
    uid[..3].copy_from_slice(&id.vendor_code);
    uid[3] = id.model;
    uid[4..8].copy_from_slice(&id.serial_number.to_le_bytes());
    uid
}

impl Peer {
    /// Ensure this peer's queue carries the one command its current
    /// application state wants sent next, when it has nothing else queued
    /// and its phy FSM is ready to pick something up.
    pub(super) fn app_pump<R: CryptoRng + RngCore>(&mut self, rng: &mut R) -> Result<(), Error> {
        use super::phy::PhyState;
        if self.phy_state != PhyState::Idle || !self.queue.is_empty() {
            return Ok(());
        }
        match self.app_state {
            AppState::Init => {
                self.seq = 0;
                self.session = None;
                self.flags.remove(PdFlags::SC_ACTIVE);
                self.app_state = AppState::Idreq;
                self.queue.enqueue(Command::Id)?;
            }
            AppState::Idreq => self.queue.enqueue(Command::Id)?,
            AppState::Capdet => self.queue.enqueue(Command::Cap)?,
            AppState::ScInit => {
                let use_scbkd = self.install_mode || self.scbk.is_none();
                self.flags.set(PdFlags::SC_USE_SCBKD, use_scbkd);
                let base_key = if use_scbkd { SCBK_DEFAULT } else { self.scbk.expect("checked above") };
                self.session = Some(Session::cp_init(base_key));
                let cp_random = Session::generate_cp_random(rng);
                self.cp_random = Some(cp_random);
                self.app_state = AppState::ScChlng;
                self.queue.enqueue(Command::Chlng(cp_random))?;
            }
            AppState::ScChlng => {
                let cp_random = *self.cp_random.get_or_insert_with(|| Session::generate_cp_random(rng));
                self.queue.enqueue(Command::Chlng(cp_random))?;
            }
            AppState::ScScrypt => {
                let session = self.session.as_ref().expect("session set entering SC_SCRYPT");
                self.queue.enqueue(Command::Scrypt(session.cp_cryptogram()))?;
            }
            AppState::SetScbk => {
                let scbk = self.pending_scbk.expect("pending scbk set entering SET_SCBK");
                self.queue.enqueue(Command::Keyset(KeySet { key_type: 1, key_length: 16, scbk }))?;
            }
            AppState::Online | AppState::Offline => {}
        }
        Ok(())
    }

    /// Check an `OFFLINE` peer's backoff timer without touching the wire.
    pub(super) fn app_tick_offline(&mut self) {
        if let Some(since) = self.offline_since {
            if since.elapsed() >= self.offline_backoff {
                self.offline_since = None;
                self.app_state = AppState::Init;
            }
        }
    }

    pub(super) fn app_handle_outcome<R: CryptoRng + RngCore>(
        &mut self,
        outcome: PhyOutcome,
        rng: &mut R,
        master_key: Option<&MasterKey>,
        sc_enabled: bool,
        event_callback: &mut EventCallback,
        keyset_persist: &mut Option<KeysetPersist>,
    ) -> Result<(), Error> {
        let _ = rng;
        match outcome {
            PhyOutcome::Pending => Ok(()),
            PhyOutcome::TimedOut | PhyOutcome::Errored => {
                self.consecutive_errors += 1;
                if self.consecutive_errors >= timing::MAX_CONSECUTIVE_ERRORS {
                    self.go_offline(event_callback);
                }
                Ok(())
            }
            PhyOutcome::SecureChannelFailed => {
                self.consecutive_errors += 1;
                let was_active = self.flags.contains(PdFlags::SC_ACTIVE);
                self.session = None;
                self.flags.remove(PdFlags::SC_ACTIVE);
                if was_active {
                    event_callback(Event::ScDown, self.offset);
                }
                if self.consecutive_errors >= timing::MAX_CONSECUTIVE_ERRORS {
                    self.go_offline(event_callback);
                } else if matches!(
                    self.app_state,
                    AppState::Online | AppState::ScInit | AppState::ScChlng | AppState::ScScrypt | AppState::SetScbk
                ) {
                    self.app_state = AppState::ScInit;
                }
                Ok(())
            }
            PhyOutcome::ReplyReady { reply, command_code } => {
                self.consecutive_errors = 0;
                self.err_backoff = timing::OFFLINE_RETRY_INITIAL;
                self.handle_reply(reply, command_code, master_key, sc_enabled, event_callback, keyset_persist)
            }
        }
    }

    fn handle_reply(
        &mut self,
        reply: Reply,
        command_code: u8,
        master_key: Option<&MasterKey>,
        sc_enabled: bool,
        event_callback: &mut EventCallback,
        keyset_persist: &mut Option<KeysetPersist>,
    ) -> Result<(), Error> {
        if let Reply::Nak(code) = reply {
            return self.handle_nak(code, command_code, event_callback);
        }

        match self.app_state {
            AppState::Idreq => {
                if let Reply::Pdid(id) = reply {
                    self.id = Some(id);
                    self.app_state = AppState::Capdet;
                }
            }
            AppState::Capdet => {
                if let Reply::Pdcap(caps) = reply {
                    let sc_capable = caps.iter().any(|cap| cap.function_code == SC_CAPABILITY_FUNCTION_CODE);
                    self.flags.set(PdFlags::SC_CAPABLE, sc_capable);
                    self.capabilities = caps;
                    if sc_enabled && sc_capable {
                        self.app_state = AppState::ScInit;
                    } else {
                        self.go_online(event_callback);
                    }
                }
            }
            AppState::ScChlng => {
                if let Reply::Ccrypt(cryptogram) = reply {
                    let cp_random = self.cp_random.expect("cp_random stored entering SC_CHLNG");
                    let verified = self
                        .session
                        .as_mut()
                        .expect("session present during SC_CHLNG")
                        .cp_complete_challenge(cp_random, cryptogram.pd_random, &cryptogram.pd_cryptogram)
                        .is_ok();
                    if verified {
                        self.app_state = AppState::ScScrypt;
                    } else {
                        self.session = None;
                        peer_warn!(self, "PD cryptogram did not verify, restarting handshake");
                        event_callback(Event::ScDown, self.offset);
                        self.app_state = AppState::ScInit;
                    }
                }
            }
            AppState::ScScrypt => {
                if let Reply::RmacI(_) = reply {
                    let session = self.session.as_mut().expect("session present during SC_SCRYPT");
                    session.cp_activate();
                    self.flags.insert(PdFlags::SC_ACTIVE);
                    event_callback(Event::ScUp, self.offset);
                    if self.flags.contains(PdFlags::SC_USE_SCBKD) && self.install_mode {
                        let id = self.id.expect("id known by SC_SCRYPT");
                        let uid = client_uid(&id);
                        let new_scbk: Scbk = master_key.map(|mk| compute_scbk(mk, &uid)).unwrap_or(SCBK_DEFAULT);
                        self.pending_scbk = Some(new_scbk);
                        self.app_state = AppState::SetScbk;
                    } else {
                        self.go_online(event_callback);
                    }
                }
            }
            AppState::SetScbk => {
                if let Reply::Ack = reply {
                    let scbk = self.pending_scbk.take().expect("pending scbk set entering SET_SCBK");
                    self.scbk = Some(scbk);
                    self.flags.remove(PdFlags::SC_USE_SCBKD);
                    if let Some(persist) = keyset_persist.as_mut() {
                        persist(self.offset, scbk);
                    }
                    self.go_online(event_callback);
                }
            }
            AppState::Online => self.handle_online_reply(reply, event_callback),
            AppState::Init | AppState::ScInit | AppState::Offline => {}
        }
        Ok(())
    }

    fn handle_online_reply(&mut self, reply: Reply, event_callback: &mut EventCallback) {
        match reply {
            Reply::Raw(ReplyCode::Raw, data) => {
                event_callback(Event::CardRead(CardRead { reader: 0, formatted: false, data }), self.offset);
            }
            Reply::Raw(ReplyCode::Fmt, data) => {
                event_callback(Event::CardRead(CardRead { reader: 0, formatted: true, data }), self.offset);
            }
            Reply::Keyppad(keys) => {
                for key in keys.data {
                    event_callback(Event::Keypress { reader: keys.reader, key }, self.offset);
                }
            }
            Reply::Lstatr(status) => {
                self.flags.set(PdFlags::TAMPER, status.tamper);
                self.flags.set(PdFlags::POWER, status.power);
                event_callback(Event::IoStatus { tamper: status.tamper, power: status.power }, self.offset);
            }
            Reply::Xrd(data) => {
                if let Ok(trs_reply) = crate::trs::Reply::decode(&data) {
                    event_callback(Event::Trs(trs_reply), self.offset);
                }
            }
            Reply::Ack | Reply::Busy | Reply::Ccrypt(_) | Reply::RmacI(_) | Reply::Mfgrep(_) | Reply::Pdid(_)
            | Reply::Pdcap(_) | Reply::Ostatr(_) | Reply::Raw(_, _) | Reply::Nak(_) => {}
        }
    }

    fn handle_nak(&mut self, code: NakCode, command_code: u8, event_callback: &mut EventCallback) -> Result<(), Error> {
        match code {
            NakCode::SeqNum if self.app_state == AppState::Online => {
                let was_active = self.flags.contains(PdFlags::SC_ACTIVE);
                self.session = None;
                self.flags.remove(PdFlags::SC_ACTIVE);
                if was_active {
                    event_callback(Event::ScDown, self.offset);
                }
                self.app_state = AppState::ScInit;
            }
            NakCode::ScCond if self.app_state == AppState::Online => {
                self.session = None;
                self.flags.remove(PdFlags::SC_ACTIVE);
                event_callback(Event::ScDown, self.offset);
                self.app_state = AppState::Init;
            }
            NakCode::CmdUnknown => {
                event_callback(Event::CommandUnknown { code: command_code }, self.offset);
            }
            _ => {}
        }
        Ok(())
    }

    pub(super) fn go_online(&mut self, event_callback: &mut EventCallback) {
        peer_debug!(self, "online");
        self.app_state = AppState::Online;
        self.offline_backoff = timing::OFFLINE_RETRY_INITIAL;
        event_callback(Event::PdOnline, self.offset);
    }

    pub(super) fn go_offline(&mut self, event_callback: &mut EventCallback) {
        self.app_state = AppState::Offline;
        self.offline_since = Some(std::time::Instant::now());
        self.offline_backoff = timing::next_backoff(self.offline_backoff);
        peer_debug!(self, "offline, retrying in {:?}", self.offline_backoff);
        self.flags.remove(PdFlags::SC_ACTIVE);
        self.session = None;
        self.queue = crate::queue::Queue::new(self.queue_capacity);
        event_callback(Event::PdOffline, self.offset);
    }
}
