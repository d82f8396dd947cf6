//! Transparent Reader Support (TRS): a nested command/reply sub-protocol for
//! smart-card APDU passthrough, carried inside `CMD_XWR` (CP→PD) and
//! `REPLY_XRD` (PD→CP) (spec §4.7).
//!
//! Every TRS message opens with a `(mode, code)` pair, conceptually packed
//! as `mode_code = mode << 8 | code`; this crate writes the two as separate
//! bytes (mode, then code) rather than folding them into one `u16`; the
//! value is the same either way. [`validate_mode_code`] is the one gate
//! both [`Command::decode`] and [`Reply::decode`] run through before
//! touching the rest of the body.
//!
//! The encoders here append variable-length fields (APDU bytes, CSN,
//! protocol data) at the buffer's current end, after the fixed header bytes
//! already written — writing them back at offset 0 would clobber that
//! header.

mod error;

pub use self::error::{Error, ErrorKind};

use anomaly::ensure;

/// Capacity this engine carries for one APDU (spec §4.7 "APDU capacity
/// (64 B)").
pub const APDU_CAPACITY: usize = 64;

/// Validate a `(mode, code)` pair per spec §4.7's codec-entry rule: reject
/// if `code == 0`, `mode` is outside `{0, 1}`, `mode == 0 && code > 2`, or
/// `mode == 1 && code > 4`.
pub fn validate_mode_code(mode: u8, code: u8) -> Result<(), Error> {
    ensure!(code != 0, ErrorKind::InvalidModeCode, "TRS code must be nonzero");
    match mode {
        0 => ensure!(code <= 2, ErrorKind::InvalidModeCode, "mode 0 code {} out of range", code),
        1 => ensure!(code <= 4, ErrorKind::InvalidModeCode, "mode 1 code {} out of range", code),
        _ => anomaly::fail!(ErrorKind::InvalidModeCode, "unknown TRS mode {}", mode),
    }
    Ok(())
}

fn push_apdu(buf: &mut Vec<u8>, apdu: &[u8]) -> Result<(), Error> {
    ensure!(apdu.len() <= APDU_CAPACITY, ErrorKind::ApduTooLong, "APDU is {} bytes", apdu.len());
    buf.push(apdu.len() as u8);
    buf.extend_from_slice(apdu);
    Ok(())
}

fn take_apdu(data: &[u8], offset: usize) -> Result<(&[u8], usize), Error> {
    ensure!(data.len() > offset, ErrorKind::Format, "TRS message truncated before APDU length");
    let len = data[offset] as usize;
    ensure!(len <= APDU_CAPACITY, ErrorKind::ApduTooLong, "APDU is {} bytes", len);
    let start = offset + 1;
    ensure!(data.len() >= start + len, ErrorKind::Format, "TRS message shorter than its APDU length");
    Ok((&data[start..start + len], start + len))
}

/// `CMD_XWR (0, 2)`: the CP tells the PD which TRS mode to operate in.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ModeSet {
    /// The mode to switch to (0 or 1)
    pub mode: u8,
}

/// `CMD_XWR (1, 1)`: forward one APDU to the PD's attached smart-card reader.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SendApdu {
    /// Reader number (always 0 in this engine; spec §4.7 layout)
    pub reader: u8,
    /// The APDU bytes, at most [`APDU_CAPACITY`]
    pub apdu: Vec<u8>,
}

/// `CMD_XWR (1, 3)`: prompt the PD to collect a PIN from its keypad and
/// wrap it in an APDU (spec §4.7 "ENTER_PIN layout").
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EnterPin {
    /// Primary timeout, seconds
    pub timeout: u8,
    /// Secondary timeout, seconds
    pub timeout2: u8,
    /// PIN block format string
    pub format_string: u8,
    /// PIN block string
    pub pin_block_string: u8,
    /// PIN length format
    pub pin_length_format: u8,
    /// Maximum extra PIN digits allowed, big-endian
    pub pin_max_extra_digit: u16,
    /// PIN entry valid condition
    pub pin_entry_valid_condition: u8,
    /// Number of prompt messages to display
    pub pin_num_messages: u8,
    /// Language identifier, big-endian
    pub language_id: u16,
    /// Message index to display
    pub msg_index: u8,
    /// T=0/T=1 prologue bytes
    pub teo_prologue: [u8; 3],
    /// The APDU template to wrap the collected PIN into
    pub apdu: Vec<u8>,
}

/// A decoded TRS command, carried inside `CMD_XWR`.
#[derive(Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum Command {
    /// `(0, 1)`: request the PD's current TRS mode
    ModeGet,
    /// `(0, 2)`: set the PD's TRS mode
    ModeSet(ModeSet),
    /// `(1, 1)`: forward an APDU
    SendApdu(SendApdu),
    /// `(1, 2)`: end the current TRS session
    Terminate,
    /// `(1, 3)`: collect a PIN from the reader's keypad
    EnterPin(EnterPin),
    /// `(1, 4)`: request a card scan
    CardScan,
}

impl Command {
    /// The `(mode, code)` pair for this command.
    pub fn mode_code(&self) -> (u8, u8) {
        match self {
            Command::ModeGet => (0, 1),
            Command::ModeSet(_) => (0, 2),
            Command::SendApdu(_) => (1, 1),
            Command::Terminate => (1, 2),
            Command::EnterPin(_) => (1, 3),
            Command::CardScan => (1, 4),
        }
    }

    /// Encode this command as a `CMD_XWR` payload: `(mode, code)` followed
    /// by the variant's body, appended at the buffer's current end.
    pub fn encode(&self, buf: &mut Vec<u8>) -> Result<(), Error> {
        let (mode, code) = self.mode_code();
        buf.push(mode);
        buf.push(code);
        match self {
            Command::ModeGet | Command::Terminate | Command::CardScan => {}
            Command::ModeSet(m) => buf.push(m.mode),
            Command::SendApdu(s) => {
                buf.push(s.reader);
                push_apdu(buf, &s.apdu)?;
            }
            Command::EnterPin(p) => {
                buf.extend_from_slice(&[
                    p.timeout,
                    p.timeout2,
                    p.format_string,
                    p.pin_block_string,
                    p.pin_length_format,
                ]);
                buf.extend_from_slice(&p.pin_max_extra_digit.to_be_bytes());
                buf.push(p.pin_entry_valid_condition);
                buf.push(p.pin_num_messages);
                buf.extend_from_slice(&p.language_id.to_be_bytes());
                buf.push(p.msg_index);
                buf.extend_from_slice(&p.teo_prologue);
                ensure!(
                    p.apdu.len() <= APDU_CAPACITY,
                    ErrorKind::ApduTooLong,
                    "APDU is {} bytes",
                    p.apdu.len()
                );
                buf.extend_from_slice(&(p.apdu.len() as u16).to_be_bytes());
                buf.extend_from_slice(&p.apdu);
            }
        }
        Ok(())
    }

    /// Decode a `CMD_XWR` payload into a TRS command.
    pub fn decode(data: &[u8]) -> Result<Self, Error> {
        ensure!(data.len() >= 2, ErrorKind::Format, "TRS command shorter than its header");
        let (mode, code) = (data[0], data[1]);
        validate_mode_code(mode, code)?;
        let body = &data[2..];
        Ok(match (mode, code) {
            (0, 1) => Command::ModeGet,
            (0, 2) => {
                ensure!(!body.is_empty(), ErrorKind::Format, "MODE_SET missing mode byte");
                Command::ModeSet(ModeSet { mode: body[0] })
            }
            (1, 1) => {
                ensure!(!body.is_empty(), ErrorKind::Format, "SEND_APDU missing reader byte");
                let (apdu, _) = take_apdu(body, 1)?;
                Command::SendApdu(SendApdu { reader: body[0], apdu: apdu.to_vec() })
            }
            (1, 2) => Command::Terminate,
            (1, 3) => {
                ensure!(body.len() >= 15, ErrorKind::Format, "ENTER_PIN header truncated");
                let pin_max_extra_digit = u16::from_be_bytes([body[5], body[6]]);
                let language_id = u16::from_be_bytes([body[9], body[10]]);
                let teo_prologue = [body[12], body[13], body[14]];
                ensure!(body.len() >= 17, ErrorKind::Format, "ENTER_PIN missing APDU length");
                let apdu_len = u16::from_be_bytes([body[15], body[16]]) as usize;
                ensure!(apdu_len <= APDU_CAPACITY, ErrorKind::ApduTooLong, "APDU is {} bytes", apdu_len);
                ensure!(body.len() == 17 + apdu_len, ErrorKind::Format, "ENTER_PIN length mismatch");
                Command::EnterPin(EnterPin {
                    timeout: body[0],
                    timeout2: body[1],
                    format_string: body[2],
                    pin_block_string: body[3],
                    pin_length_format: body[4],
                    pin_max_extra_digit,
                    pin_entry_valid_condition: body[7],
                    pin_num_messages: body[8],
                    language_id,
                    msg_index: body[11],
                    teo_prologue,
                    apdu: body[17..].to_vec(),
                })
            }
            (1, 4) => Command::CardScan,
            _ => anomaly::fail!(ErrorKind::InvalidModeCode, "unhandled TRS (mode, code) ({}, {})", mode, code),
        })
    }
}

/// `REPLY_XRD (0, 1)`: the PD's current TRS mode.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CurrentMode {
    /// The reported mode
    pub mode: u8,
}

/// `REPLY_XRD (1, 1)`: a smart card's identity report (spec §4.7
/// "CARD_INFO_REPORT carries variable-length csn and protocol_data").
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CardInfoReport {
    /// Card serial number
    pub csn: Vec<u8>,
    /// Protocol-specific data (e.g. ATR)
    pub protocol_data: Vec<u8>,
}

/// `REPLY_XRD (1, 2)`: the PD's response to a forwarded APDU.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CardData {
    /// Reader number
    pub reader: u8,
    /// Status code (0 = success)
    pub status: u8,
    /// The APDU response bytes
    pub apdu: Vec<u8>,
}

/// `REPLY_XRD (1, 3)`: whether a card is present in the reader.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CardPresent {
    /// True if a card is currently presented
    pub present: bool,
}

/// `REPLY_XRD (1, 4)`: PIN entry finished.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PinEntryComplete {
    /// Reader number
    pub reader: u8,
    /// Status code (0 = success)
    pub status: u8,
}

/// A decoded TRS reply, carried inside `REPLY_XRD`.
#[derive(Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum Reply {
    /// `(0, 1)`
    CurrentMode(CurrentMode),
    /// `(1, 1)`
    CardInfoReport(CardInfoReport),
    /// `(1, 2)`
    CardData(CardData),
    /// `(1, 3)`
    CardPresent(CardPresent),
    /// `(1, 4)`
    PinEntryComplete(PinEntryComplete),
}

impl Reply {
    /// The `(mode, code)` pair for this reply.
    pub fn mode_code(&self) -> (u8, u8) {
        match self {
            Reply::CurrentMode(_) => (0, 1),
            Reply::CardInfoReport(_) => (1, 1),
            Reply::CardData(_) => (1, 2),
            Reply::CardPresent(_) => (1, 3),
            Reply::PinEntryComplete(_) => (1, 4),
        }
    }

    /// Encode this reply as a `REPLY_XRD` payload.
    pub fn encode(&self, buf: &mut Vec<u8>) -> Result<(), Error> {
        let (mode, code) = self.mode_code();
        buf.push(mode);
        buf.push(code);
        match self {
            Reply::CurrentMode(m) => buf.push(m.mode),
            Reply::CardInfoReport(r) => {
                ensure!(r.csn.len() <= 255 && r.protocol_data.len() <= 255, ErrorKind::Format, "CARD_INFO_REPORT field too long");
                buf.push(r.csn.len() as u8);
                buf.extend_from_slice(&r.csn);
                buf.push(r.protocol_data.len() as u8);
                buf.extend_from_slice(&r.protocol_data);
            }
            Reply::CardData(d) => {
                buf.push(d.reader);
                buf.push(d.status);
                push_apdu(buf, &d.apdu)?;
            }
            Reply::CardPresent(p) => buf.push(p.present as u8),
            Reply::PinEntryComplete(p) => {
                buf.push(p.reader);
                buf.push(p.status);
            }
        }
        Ok(())
    }

    /// Decode a `REPLY_XRD` payload into a TRS reply.
    pub fn decode(data: &[u8]) -> Result<Self, Error> {
        ensure!(data.len() >= 2, ErrorKind::Format, "TRS reply shorter than its header");
        let (mode, code) = (data[0], data[1]);
        validate_mode_code(mode, code)?;
        let body = &data[2..];
        Ok(match (mode, code) {
            (0, 1) => {
                ensure!(!body.is_empty(), ErrorKind::Format, "CURRENT_MODE missing mode byte");
                Reply::CurrentMode(CurrentMode { mode: body[0] })
            }
            (1, 1) => {
                ensure!(!body.is_empty(), ErrorKind::Format, "CARD_INFO_REPORT missing csn length");
                let csn_len = body[0] as usize;
                ensure!(body.len() >= 1 + csn_len + 1, ErrorKind::Format, "CARD_INFO_REPORT truncated");
                let csn = body[1..1 + csn_len].to_vec();
                let pd_len_offset = 1 + csn_len;
                let pd_len = body[pd_len_offset] as usize;
                let pd_start = pd_len_offset + 1;
                ensure!(body.len() == pd_start + pd_len, ErrorKind::Format, "CARD_INFO_REPORT length mismatch");
                Reply::CardInfoReport(CardInfoReport {
                    csn,
                    protocol_data: body[pd_start..].to_vec(),
                })
            }
            (1, 2) => {
                ensure!(body.len() >= 2, ErrorKind::Format, "CARD_DATA header truncated");
                let (apdu, _) = take_apdu(body, 2)?;
                Reply::CardData(CardData { reader: body[0], status: body[1], apdu: apdu.to_vec() })
            }
            (1, 3) => {
                ensure!(!body.is_empty(), ErrorKind::Format, "CARD_PRESENT missing status byte");
                Reply::CardPresent(CardPresent { present: body[0] != 0 })
            }
            (1, 4) => {
                ensure!(body.len() >= 2, ErrorKind::Format, "PIN_ENTRY_COMPLETE truncated");
                Reply::PinEntryComplete(PinEntryComplete { reader: body[0], status: body[1] })
            }
            _ => anomaly::fail!(ErrorKind::InvalidModeCode, "unhandled TRS (mode, code) ({}, {})", mode, code),
        })
    }
}

/// Per-PD TRS session state: just the negotiated mode. `OSDP_TRS_STATE_INIT`
/// is the only state transition implemented; no further mode-1 sub-states
/// are tracked.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Trs {
    mode: Option<u8>,
}

impl Trs {
    /// A fresh TRS session: no mode negotiated yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// The negotiated mode, if `MODE_SET` has been processed.
    pub fn mode(&self) -> Option<u8> {
        self.mode
    }

    /// PD side: accept an incoming TRS command, rejecting mode-1 commands
    /// until a matching `MODE_SET` has been seen (spec §4.7 "On the PD,
    /// mode-1 commands are rejected unless `pd.trs.mode == 1`").
    pub fn accept(&mut self, command: &Command) -> Result<(), Error> {
        let (mode, _) = command.mode_code();
        if mode == 1 {
            ensure!(
                self.mode == Some(1),
                ErrorKind::WrongMode,
                "mode-1 TRS command received before MODE_SET"
            );
        }
        if let Command::ModeSet(m) = command {
            self.mode = Some(m.mode);
        }
        Ok(())
    }
}
