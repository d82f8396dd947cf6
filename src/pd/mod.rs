//! Peripheral Device (PD) role: answers polls and commands from a CP
//! (spec §4.6).
//!
//! [`Pd`] owns one PD record's state: its address, flags, Secure Channel
//! session, command dispatch, and the non-blocking [`Channel`](crate::Channel)
//! it talks over. [`crate::Context`] drives it one tick at a time via
//! [`Pd::tick`]; nothing here blocks or spawns a thread.

mod state;

pub use state::State;

use crate::{
    channel::Channel,
    command::{Code as CmdCode, Command},
    config::PdConfig,
    error::ErrorKind,
    flags::PdFlags,
    frame::{self, ScsClass},
    phy::FrameParams,
    reply::{Capability, Code as ReplyCode, CryptogramReply, LocalStatus, NakCode, Reply},
    securechannel::{Scbk, ScbType, Session, SCBK_DEFAULT},
    trs::{self, Trs},
};
use rand_core::{CryptoRng, RngCore};

/// Errors raised while running the PD role.
pub type Error = crate::error::Error<ErrorKind>;

/// Re-export of the identification record shape (spec §3 PD record "id"),
/// reported in response to `CMD_ID`.
pub use crate::reply::PdId;

/// Status a [`CommandHandler`] reports back for one dispatched command,
/// mapped to `ACK`/`NAK` by the PD state machine (spec §4.6).
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PdStatus {
    /// The handler carried out the command; reply with `ACK`.
    Ack,
    /// The handler rejected the command; reply `NAK` with this reason.
    Nak(NakCode),
}

/// Embedder callback for commands this engine does not fully answer on its
/// own (`OUT`, `LED`, `BUZ`, `TEXT`, `COMSET` acceptance, `MFG`, and
/// `KEYSET` persistence). Invoked once per dispatched command.
pub type CommandHandler = Box<dyn FnMut(&Command) -> PdStatus + Send>;

/// Embedder callback answering a Transparent Reader Support request that
/// needs live reader/card state (`SEND_APDU`, `ENTER_PIN`, `CARD_SCAN`;
/// spec §4.7). Without one installed, this engine NAKs those requests.
pub type TrsHandler = Box<dyn FnMut(&trs::Command) -> trs::Reply + Send>;

/// Lightweight handle addressing one PD by its offset in a CP's peer array
/// (spec §3 "offset (index in CP's array)"). Used to target
/// [`crate::Context`] operations (enqueue, reset) at a specific peer.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct PdHandle(pub usize);

enum PendingReply {
    None,
    Sending { frame: Vec<u8>, offset: usize },
}

/// One PD record, playing the PD role (spec §3 "PD record", §4.6).
pub struct Pd {
    address: u8,
    flags: PdFlags,
    use_crc: bool,
    last_seq: u8,
    state: State,
    rx_buf: Vec<u8>,
    last_reply_frame: Option<Vec<u8>>,
    pending: PendingReply,
    channel: Box<dyn Channel>,
    scbk: Option<Scbk>,
    session: Option<Session>,
    trs: Trs,
    id: PdId,
    capabilities: Vec<Capability>,
    command_handler: CommandHandler,
    trs_handler: Option<TrsHandler>,
}

impl Pd {
    /// Construct a PD record from its configuration and the channel it is
    /// reached over. `id` and `capabilities` come from [`PdConfig`] (both
    /// required for a PD-role record, enforced by [`crate::Config::validate`]).
    pub fn new(config: &PdConfig, channel: Box<dyn Channel>, command_handler: CommandHandler) -> Self {
        Self {
            address: config.address,
            flags: config.initial_flags(),
            use_crc: true,
            last_seq: 0,
            state: State::Idle,
            rx_buf: Vec::new(),
            last_reply_frame: None,
            pending: PendingReply::None,
            channel,
            scbk: config.scbk,
            session: None,
            trs: Trs::new(),
            id: config.id.expect("PD role requires an identification record"),
            capabilities: config.capabilities.clone(),
            command_handler,
            trs_handler: None,
        }
    }

    /// Install a [`TrsHandler`] for live smart-card passthrough. Without
    /// one, `SEND_APDU`/`ENTER_PIN`/`CARD_SCAN` are NAK'd.
    pub fn set_trs_handler(&mut self, handler: TrsHandler) {
        self.trs_handler = Some(handler);
    }

    /// This PD's bus address.
    pub fn address(&self) -> u8 {
        self.address
    }

    /// This PD's current [`PdFlags`].
    pub fn flags(&self) -> PdFlags {
        self.flags
    }

    fn sc_active(&self) -> bool {
        self.flags.contains(PdFlags::SC_ACTIVE)
    }

    /// Drive this PD one tick: read and answer at most one command
    /// (spec §4.6 `IDLE -> SEND_REPLY -> (IDLE | ERR)`).
    pub fn tick<R: CryptoRng + RngCore>(&mut self, rng: &mut R) -> Result<(), Error> {
        match self.state {
            State::Idle => self.poll_idle(rng),
            State::SendReply => self.drain_pending_reply(),
            State::Err => {
                pd_debug!(self, "clearing transient error state");
                self.state = State::Idle;
                Ok(())
            }
        }
    }

    fn poll_idle<R: CryptoRng + RngCore>(&mut self, rng: &mut R) -> Result<(), Error> {
        let mut scratch = [0u8; 256];
        let n = self.channel.recv(&mut scratch)?;
        if n > 0 {
            self.rx_buf.extend_from_slice(&scratch[..n]);
        }
        if self.rx_buf.is_empty() {
            return Ok(());
        }

        let decoded = match frame::decode(&self.rx_buf, self.address, self.session.as_mut()) {
            Ok(decoded) => decoded,
            Err(err) => {
                return self.handle_decode_error(err);
            }
        };

        if decoded.reply {
            pd_warn!(self, "dropping frame with the reply bit set");
            self.rx_buf.drain(..decoded.frame_len);
            return Ok(());
        }

        let consumed = decoded.frame_len;
        let sequence = decoded.sequence;

        if !self.flags.contains(PdFlags::SKIP_SEQ_CHECK) {
            if sequence == self.last_seq && sequence != 0 {
                // retransmission: the CP never saw our previous reply
                if let Some(frame) = self.last_reply_frame.clone() {
                    self.rx_buf.drain(..consumed);
                    self.pending = PendingReply::Sending { frame, offset: 0 };
                    self.state = State::SendReply;
                    return Ok(());
                }
            } else if sequence != 0 {
                let expected = if self.last_seq == 0 { 1 } else { (self.last_seq % 3) + 1 };
                if sequence != expected {
                    self.rx_buf.drain(..consumed);
                    return self.send_nak(NakCode::SeqNum, sequence);
                }
            }
        }
        self.last_seq = sequence;
        self.rx_buf.drain(..consumed);

        if decoded.data.is_empty() {
            return self.send_nak(NakCode::CmdLen, sequence);
        }
        let code = match CmdCode::from_u8(decoded.data[0]) {
            Ok(code) => code,
            Err(_) => return self.send_nak(NakCode::CmdUnknown, sequence),
        };
        let command = match Command::decode(code, &decoded.data[1..]) {
            Ok(command) => command,
            Err(_) => return self.send_nak(NakCode::CmdLen, sequence),
        };

        let reply = self.dispatch(&command, rng)?;
        self.send_reply(reply, sequence)
    }

    fn handle_decode_error(&mut self, err: Error) -> Result<(), Error> {
        match err.kind() {
            ErrorKind::FrameIncomplete => Ok(()),
            ErrorKind::FrameSkip => {
                self.rx_buf.clear();
                Ok(())
            }
            ErrorKind::SecureChannelFailure => {
                pd_warn!(self, "command failed Secure Channel verification, tearing down session");
                self.rx_buf.clear();
                self.session = None;
                self.flags.remove(PdFlags::SC_ACTIVE);
                self.send_nak(NakCode::ScCond, self.last_seq)
            }
            _ => {
                pd_warn!(self, "frame decode failed: {}", err);
                self.rx_buf.clear();
                self.send_nak(NakCode::MsgChk, self.last_seq)
            }
        }
    }

    fn send_nak(&mut self, code: NakCode, sequence: u8) -> Result<(), Error> {
        self.send_reply(Reply::Nak(code), sequence)
    }

    fn dispatch<R: CryptoRng + RngCore>(&mut self, command: &Command, rng: &mut R) -> Result<Reply, Error> {
        match command {
            Command::Poll => Ok(Reply::Ack),
            Command::Id => Ok(Reply::Pdid(self.id)),
            Command::Cap => Ok(Reply::Pdcap(self.capabilities.clone())),
            Command::Lstat => Ok(Reply::Lstatr(LocalStatus {
                tamper: self.flags.contains(PdFlags::TAMPER),
                power: self.flags.contains(PdFlags::POWER),
            })),
            Command::Istat | Command::Ostat | Command::Rstat | Command::Abort => Ok(Reply::Ack),
            Command::Out(_) | Command::Led(_) | Command::Buz(_) | Command::Text(_) | Command::Mfg(_) => {
                Ok(self.ask_handler(command))
            }
            Command::Comset(comset) => {
                self.address = comset.address;
                let mut buf = vec![comset.address];
                buf.extend_from_slice(&comset.baud_rate.to_le_bytes());
                Ok(Reply::Raw(ReplyCode::Com, buf))
            }
            Command::Keyset(keyset) => {
                if !self.sc_active() {
                    return Ok(Reply::Nak(NakCode::ScCond));
                }
                self.scbk = Some(keyset.scbk);
                self.flags.remove(PdFlags::SC_USE_SCBKD);
                Ok(self.ask_handler(command))
            }
            Command::Chlng(cp_random) => Ok(self.handle_chlng(*cp_random, rng)),
            Command::Scrypt(cp_cryptogram) => Ok(self.handle_scrypt(cp_cryptogram)),
            Command::Xwr(payload) => self.handle_xwr(payload),
            Command::Raw(_, _) => Ok(Reply::Nak(NakCode::CmdUnknown)),
        }
    }

    fn ask_handler(&mut self, command: &Command) -> Reply {
        match (self.command_handler)(command) {
            PdStatus::Ack => Reply::Ack,
            PdStatus::Nak(code) => Reply::Nak(code),
        }
    }

    fn handle_chlng<R: CryptoRng + RngCore>(&mut self, cp_random: [u8; 8], rng: &mut R) -> Reply {
        let use_scbkd = self.flags.contains(PdFlags::INSTALL_MODE) || self.scbk.is_none();
        let base_key = if use_scbkd { SCBK_DEFAULT } else { self.scbk.unwrap() };
        self.flags.set(PdFlags::SC_USE_SCBKD, use_scbkd);
        self.flags.remove(PdFlags::SC_ACTIVE);

        let mut session = Session::pd_init(base_key);
        let pd_cryptogram = session.pd_complete_challenge(cp_random, rng);
        let pd_random = session.pd_random();
        self.session = Some(session);
        Reply::Ccrypt(CryptogramReply { pd_random, pd_cryptogram })
    }

    fn handle_scrypt(&mut self, cp_cryptogram: &[u8; 16]) -> Reply {
        let Some(session) = self.session.as_mut() else {
            return Reply::Nak(NakCode::ScCond);
        };
        if session.pd_verify_scrypt(cp_cryptogram).is_err() {
            self.session = None;
            return Reply::Nak(NakCode::ScCond);
        }
        self.flags.insert(PdFlags::SC_ACTIVE);
        if self.flags.contains(PdFlags::SC_USE_SCBKD) {
            self.flags.insert(PdFlags::SC_SCBKD_DONE);
        }
        Reply::RmacI(session.rmac_seed())
    }

    fn handle_xwr(&mut self, payload: &[u8]) -> Result<Reply, Error> {
        let command = match trs::Command::decode(payload) {
            Ok(command) => command,
            Err(_) => return Ok(Reply::Nak(NakCode::Record)),
        };
        if self.trs.accept(&command).is_err() {
            return Ok(Reply::Nak(NakCode::Record));
        }

        let reply = match &command {
            trs::Command::ModeGet => trs::Reply::CurrentMode(trs::CurrentMode {
                mode: self.trs.mode().unwrap_or(0),
            }),
            trs::Command::ModeSet(mode_set) => trs::Reply::CurrentMode(trs::CurrentMode {
                mode: mode_set.mode,
            }),
            trs::Command::Terminate => trs::Reply::CurrentMode(trs::CurrentMode { mode: 0 }),
            trs::Command::SendApdu(_) | trs::Command::EnterPin(_) | trs::Command::CardScan => {
                match self.trs_handler.as_mut() {
                    Some(handler) => handler(&command),
                    None => return Ok(Reply::Nak(NakCode::CmdUnknown)),
                }
            }
        };

        let mut buf = Vec::new();
        reply.encode(&mut buf).map_err(|_| Error::from(ErrorKind::Record))?;
        Ok(Reply::Xrd(buf))
    }

    fn send_reply(&mut self, reply: Reply, sequence: u8) -> Result<(), Error> {
        let mut payload = vec![reply.code().to_u8()];
        reply.encode(&mut payload);

        let class = match reply.code() {
            ReplyCode::Ccrypt => ScsClass::Handshake(ScbType::Ccrypt),
            ReplyCode::RmacI => ScsClass::Handshake(ScbType::RmacI),
            _ => frame::scs_class(self.sc_active(), payload.len()),
        };
        let params = FrameParams {
            address: self.address,
            reply: true,
            sequence,
            use_crc: self.use_crc,
        };

        let mut frame = Vec::new();
        frame::encode(&params, true, class, self.session.as_mut(), &payload, &mut frame)?;

        self.last_reply_frame = Some(frame.clone());
        self.pending = PendingReply::Sending { frame, offset: 0 };
        self.state = State::SendReply;
        self.drain_pending_reply()
    }

    fn drain_pending_reply(&mut self) -> Result<(), Error> {
        let PendingReply::Sending { frame, offset } = std::mem::replace(&mut self.pending, PendingReply::None) else {
            self.state = State::Idle;
            return Ok(());
        };

        let sent = match self.channel.send(&frame[offset..]) {
            Ok(n) => n,
            Err(err) => {
                self.state = State::Err;
                return Err(err.into());
            }
        };
        let new_offset = offset + sent;
        if new_offset >= frame.len() {
            self.state = State::Idle;
        } else {
            self.pending = PendingReply::Sending { frame, offset: new_offset };
            self.state = State::SendReply;
        }
        Ok(())
    }
}
