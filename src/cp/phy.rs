//! CP phy state machine: `IDLE -> SEND_CMD -> REPLY_WAIT -> (CLEANUP | ERR_WAIT) -> IDLE`
//! (spec §4.4). Drives exactly one peer's wire exchange one step per call;
//! [`super::Cp::refresh`] is what re-visits a peer often enough to carry an
//! exchange across several ticks.

use super::peer::{Error, Peer};
use crate::{
    command::{Code as CmdCode, Command},
    flags::PdFlags,
    frame::{self, ScsClass},
    phy::FrameParams,
    reply::{Code as ReplyCode, Reply},
    securechannel::ScbType,
    timing,
};
use std::time::Instant;

/// States [`Peer::phy_tick`] cycles through.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum PhyState {
    /// No exchange in progress; about to dequeue (or synthesize) a command.
    Idle,
    /// A command frame is being written to the channel, possibly across
    /// several ticks.
    SendCmd,
    /// Waiting for (or accumulating) the reply frame.
    ReplyWait,
    /// A framing error or timeout just occurred; waiting out a backoff
    /// window before returning to `Idle`.
    ErrWait,
}

/// What one [`Peer::phy_tick`] call produced, for [`super::app`] to act on.
pub(crate) enum PhyOutcome {
    /// Still mid-exchange; nothing for the application layer to do yet.
    Pending,
    /// `CLEANUP`: a full reply arrived for the command with this wire code.
    ReplyReady { reply: Reply, command_code: u8 },
    /// The reply timer expired before a complete frame arrived.
    TimedOut,
    /// The reply frame was malformed or carried an unrecognized code.
    Errored,
    /// The reply's MAC (or an unexpected SCB type) failed to verify (spec
    /// §4.2 "Failure", §7 `SecureChannelFailure`): distinct from a plain
    /// `Errored` so the application layer can re-handshake immediately
    /// rather than just counting it toward the offline threshold.
    SecureChannelFailed,
}

fn next_seq(seq: u8) -> u8 {
    if seq == 0 {
        1
    } else {
        (seq % 3) + 1
    }
}

impl Peer {
    pub(crate) fn phy_tick(&mut self) -> Result<PhyOutcome, Error> {
        match self.phy_state {
            PhyState::Idle => self.phy_idle(),
            PhyState::SendCmd => self.drain_send(),
            PhyState::ReplyWait => self.phy_reply_wait(),
            PhyState::ErrWait => self.phy_err_wait(),
        }
    }

    fn phy_idle(&mut self) -> Result<PhyOutcome, Error> {
        if self.queue.is_empty() {
            self.queue
                .enqueue(Command::Poll)
                .expect("queue has room right after observing it empty");
        }
        let command = self
            .queue
            .dequeue()
            .expect("just ensured the queue is non-empty")
            .clone();
        self.build_and_send(command)
    }

    fn build_and_send(&mut self, command: Command) -> Result<PhyOutcome, Error> {
        let mut payload = vec![command.code().to_u8()];
        command.encode(&mut payload);

        let class = match command.code() {
            CmdCode::Poll => ScsClass::None,
            CmdCode::Chlng => ScsClass::Handshake(ScbType::Chlng),
            CmdCode::Scrypt => ScsClass::Handshake(ScbType::Scrypt),
            _ => frame::scs_class(self.flags.contains(PdFlags::SC_ACTIVE), payload.len()),
        };
        let params = FrameParams {
            address: self.address,
            reply: false,
            sequence: self.seq,
            use_crc: self.use_crc,
        };

        let mut frame = Vec::new();
        frame::encode(&params, false, class, self.session.as_mut(), &payload, &mut frame)?;

        self.last_sent_code = command.code().to_u8();
        self.pending_tx = Some((frame, 0));
        self.phy_state = PhyState::SendCmd;
        self.drain_send()
    }

    fn drain_send(&mut self) -> Result<PhyOutcome, Error> {
        let Some((frame, offset)) = self.pending_tx.take() else {
            self.phy_state = PhyState::Idle;
            return Ok(PhyOutcome::Pending);
        };

        let sent = self.channel.send(&frame[offset..])?;
        let new_offset = offset + sent;
        if new_offset >= frame.len() {
            self.seq = next_seq(self.seq);
            self.await_since = Some(Instant::now());
            self.flags.insert(PdFlags::AWAIT_RESP);
            self.phy_state = PhyState::ReplyWait;
        } else {
            self.pending_tx = Some((frame, new_offset));
            self.phy_state = PhyState::SendCmd;
        }
        Ok(PhyOutcome::Pending)
    }

    fn phy_reply_wait(&mut self) -> Result<PhyOutcome, Error> {
        let mut scratch = [0u8; 256];
        let n = self.channel.recv(&mut scratch)?;
        if n > 0 {
            self.rx_buf.extend_from_slice(&scratch[..n]);
        }
        if self.rx_buf.is_empty() {
            return Ok(self.check_reply_timeout());
        }

        match frame::decode(&self.rx_buf, self.address, self.session.as_mut()) {
            Ok(decoded) => {
                self.rx_buf.drain(..decoded.frame_len);
                if !decoded.reply {
                    peer_warn!(self, "ignoring command-direction frame while awaiting a reply");
                    return Ok(self.check_reply_timeout());
                }
                if decoded.data.is_empty() {
                    return Ok(self.enter_err_wait());
                }
                let reply_code = match ReplyCode::from_u8(decoded.data[0]) {
                    Ok(code) => code,
                    Err(_) => return Ok(self.enter_err_wait()),
                };
                let reply = match Reply::decode(reply_code, &decoded.data[1..]) {
                    Ok(reply) => reply,
                    Err(_) => return Ok(self.enter_err_wait()),
                };

                self.await_since = None;
                self.flags.remove(PdFlags::AWAIT_RESP);
                let command_code = self.last_sent_code;
                self.queue.free_in_flight();
                self.phy_state = PhyState::Idle;
                Ok(PhyOutcome::ReplyReady { reply, command_code })
            }
            Err(err) => match err.kind() {
                crate::error::ErrorKind::FrameIncomplete => Ok(self.check_reply_timeout()),
                crate::error::ErrorKind::FrameSkip => {
                    self.rx_buf.clear();
                    Ok(self.check_reply_timeout())
                }
                crate::error::ErrorKind::SecureChannelFailure => {
                    peer_warn!(self, "reply failed Secure Channel verification: {}", err);
                    self.rx_buf.clear();
                    self.enter_err_wait();
                    Ok(PhyOutcome::SecureChannelFailed)
                }
                _ => {
                    peer_warn!(self, "reply frame decode failed: {}", err);
                    self.rx_buf.clear();
                    Ok(self.enter_err_wait())
                }
            },
        }
    }

    fn check_reply_timeout(&mut self) -> PhyOutcome {
        let timed_out = self
            .await_since
            .map(|since| since.elapsed() >= timing::REPLY_TIMEOUT)
            .unwrap_or(false);
        if !timed_out {
            return PhyOutcome::Pending;
        }
        self.await_since = None;
        self.flags.remove(PdFlags::AWAIT_RESP);
        self.rx_buf.clear();
        self.queue.free_in_flight();
        self.phy_state = PhyState::ErrWait;
        self.err_wait_since = Some(Instant::now());
        PhyOutcome::TimedOut
    }

    fn enter_err_wait(&mut self) -> PhyOutcome {
        self.await_since = None;
        self.flags.remove(PdFlags::AWAIT_RESP);
        self.queue.free_in_flight();
        self.phy_state = PhyState::ErrWait;
        self.err_wait_since = Some(Instant::now());
        PhyOutcome::Errored
    }

    fn phy_err_wait(&mut self) -> Result<PhyOutcome, Error> {
        let since = self.err_wait_since.unwrap_or_else(Instant::now);
        if since.elapsed() >= self.err_backoff {
            self.channel.flush();
            self.rx_buf.clear();
            self.err_wait_since = None;
            self.phy_state = PhyState::Idle;
        }
        Ok(PhyOutcome::Pending)
    }
}
