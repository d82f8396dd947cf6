//! OSDP replies: the PD→CP half of the protocol.
//!
//! [`Code`] enumerates every reserved reply byte from the wire (supplemented
//! from `osdp_common.h`'s `REPLY_*` defines). [`Reply`] pairs a code with its
//! decoded payload; replies this crate does not give a structured payload to
//! round-trip as an opaque byte vector via [`Reply::Raw`].

mod error;
mod payload;

pub use self::{
    error::{Error, ErrorKind},
    payload::{
        Capability, CryptogramReply, KeypadData, LocalStatus, MfgReply, NakCode, OutputStatus,
        PdId, Reply,
    },
};

use anomaly::fail;

/// OSDP reply codes (`REPLY_*` in the wire protocol), the PD→CP half of the wire.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[non_exhaustive]
pub enum Code {
    /// Positive acknowledgement, no further data
    Ack,
    /// Negative acknowledgement, carries a [`NakCode`]
    Nak,
    /// Identification record
    Pdid,
    /// Capabilities record
    Pdcap,
    /// Local status (tamper/power)
    Lstatr,
    /// Input status
    Istatr,
    /// Output status
    Ostatr,
    /// Reader status
    Rstatr,
    /// Raw card/reader data
    Raw,
    /// Formatted card/reader data
    Fmt,
    /// Reader presence
    Pres,
    /// Keypad data
    Keyppad,
    /// Communication parameters in effect
    Com,
    /// Secure Channel cryptogram (PD cryptogram)
    Ccrypt,
    /// Secure Channel server R-MAC
    RmacI,
    /// Secure Channel handshake reply (handshake complete ack)
    Screp,
    /// Secure Channel handshake error
    Sper,
    /// Manufacturer-specific reply
    Mfgrep,
    /// PD is busy, retry later
    Busy,
    /// Biometric read reply
    Bioreadr,
    /// Biometric match reply
    Biomatchr,
    /// Transparent Reader Support carrier (nested TRS reply, §4.7)
    Xrd,
}

impl Code {
    /// The wire byte for this reply code.
    pub fn to_u8(self) -> u8 {
        match self {
            Code::Ack => 0x40,
            Code::Nak => 0x41,
            Code::Pdid => 0x45,
            Code::Pdcap => 0x46,
            Code::Lstatr => 0x48,
            Code::Istatr => 0x49,
            Code::Ostatr => 0x4A,
            Code::Rstatr => 0x4B,
            Code::Raw => 0x50,
            Code::Fmt => 0x51,
            Code::Pres => 0x52,
            Code::Keyppad => 0x53,
            Code::Com => 0x54,
            Code::Screp => 0x55,
            Code::Sper => 0x56,
            Code::Bioreadr => 0x57,
            Code::Biomatchr => 0x58,
            Code::Ccrypt => 0x76,
            Code::Busy => 0x79,
            Code::RmacI => 0x78,
            Code::Mfgrep => 0x90,
            Code::Xrd => 0xB1,
        }
    }

    /// Parse a wire byte into a reply code.
    pub fn from_u8(byte: u8) -> Result<Self, Error> {
        Ok(match byte {
            0x40 => Code::Ack,
            0x41 => Code::Nak,
            0x45 => Code::Pdid,
            0x46 => Code::Pdcap,
            0x48 => Code::Lstatr,
            0x49 => Code::Istatr,
            0x4A => Code::Ostatr,
            0x4B => Code::Rstatr,
            0x50 => Code::Raw,
            0x51 => Code::Fmt,
            0x52 => Code::Pres,
            0x53 => Code::Keyppad,
            0x54 => Code::Com,
            0x55 => Code::Screp,
            0x56 => Code::Sper,
            0x57 => Code::Bioreadr,
            0x58 => Code::Biomatchr,
            0x76 => Code::Ccrypt,
            0x78 => Code::RmacI,
            0x79 => Code::Busy,
            0x90 => Code::Mfgrep,
            0xB1 => Code::Xrd,
            _ => fail!(ErrorKind::Unknown, "unknown reply code: 0x{:02x}", byte),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_round_trips_through_wire_byte() {
        for code in [
            Code::Ack,
            Code::Nak,
            Code::Pdid,
            Code::Pdcap,
            Code::Ccrypt,
            Code::RmacI,
            Code::Mfgrep,
            Code::Xrd,
        ] {
            assert_eq!(Code::from_u8(code.to_u8()).unwrap(), code);
        }
    }

    #[test]
    fn unknown_code_is_rejected() {
        assert!(Code::from_u8(0x00).is_err());
    }
}
