//! Secure Channel (SC): key derivation, cryptogram exchange, MAC chains, and
//! payload encryption (§4.2).
//!
//! Layered leaves-first like the rest of the engine: [`crypto`] wraps the
//! raw AES-128 ECB/CBC primitives, [`kdf`] builds session keys and
//! cryptograms out of those primitives, [`mac`] implements the chained
//! CBC-MAC, and [`Session`] (in `session.rs`) is the stateful object a PD
//! record owns across a handshake and into steady-state ONLINE traffic.

mod crypto;
mod error;
mod kdf;
mod mac;
mod session;

pub use self::{
    error::{Error, ErrorKind},
    kdf::derive_session_keys,
    mac::{Mac, MAC_SIZE},
    session::{compute_scbk, MasterKey, Scbk, Session, SCBK_DEFAULT},
};

/// Secure Channel Block type codes (`SCS_*` in the wire protocol), carried as the
/// second byte of an in-frame SCB envelope (§4.1, Glossary "SCS 11-18").
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum ScbType {
    /// CMD_CHLNG: CP's random challenge
    Chlng,
    /// REPLY_CCRYPT: PD's cryptogram reply
    Ccrypt,
    /// CMD_SCRYPT: CP's cryptogram
    Scrypt,
    /// REPLY_RMAC_I: PD's R-MAC seed
    RmacI,
    /// Command, MAC only, no payload
    CmdMacOnly,
    /// Reply, MAC only, no payload
    ReplyMacOnly,
    /// Command, MAC + encrypted payload
    CmdMacEnc,
    /// Reply, MAC + encrypted payload
    ReplyMacEnc,
}

impl ScbType {
    /// The wire byte for this SCB type (`0x11`..`0x18`).
    pub fn to_u8(self) -> u8 {
        match self {
            ScbType::Chlng => 0x11,
            ScbType::Ccrypt => 0x12,
            ScbType::Scrypt => 0x13,
            ScbType::RmacI => 0x14,
            ScbType::CmdMacOnly => 0x15,
            ScbType::ReplyMacOnly => 0x16,
            ScbType::CmdMacEnc => 0x17,
            ScbType::ReplyMacEnc => 0x18,
        }
    }

    /// Parse a wire byte into an SCB type, if it falls in the reserved range.
    pub fn from_u8(byte: u8) -> Option<Self> {
        Some(match byte {
            0x11 => ScbType::Chlng,
            0x12 => ScbType::Ccrypt,
            0x13 => ScbType::Scrypt,
            0x14 => ScbType::RmacI,
            0x15 => ScbType::CmdMacOnly,
            0x16 => ScbType::ReplyMacOnly,
            0x17 => ScbType::CmdMacEnc,
            0x18 => ScbType::ReplyMacEnc,
            _ => return None,
        })
    }

    /// True for the two variants (17/18) whose payload is encrypted as well
    /// as MAC'd (§4.1 "SCS 17/18").
    pub fn is_encrypted(self) -> bool {
        matches!(self, ScbType::CmdMacEnc | ScbType::ReplyMacEnc)
    }
}
