//! OSDP commands: the CP→PD half of the protocol.
//!
//! [`Code`] enumerates every reserved command byte from the wire (§Glossary,
//! supplemented from `osdp_common.h`'s `CMD_*` defines). [`Command`] pairs a
//! code with its decoded payload; commands this crate does not give a
//! structured payload to (diagnostics, biometrics, card-format-specific
//! records — out of scope per spec §1's Non-goals) still round-trip as an
//! opaque byte vector via [`Command::Raw`].

mod error;
mod payload;

pub use self::{
    error::{Error, ErrorKind},
    payload::{BuzzerControl, ComSet, Command, KeySet, LedControl, MfgCommand, OutputControl, TextOutput},
};

use anomaly::fail;

/// OSDP command codes (`CMD_*` in the wire protocol), the CP→PD half of the wire.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[non_exhaustive]
pub enum Code {
    /// Poll: the keepalive/no-op command
    Poll,
    /// Request the PD's identification record
    Id,
    /// Request the PD's capabilities
    Cap,
    /// Diagnostics
    Diag,
    /// Request local status (tamper/power)
    Lstat,
    /// Request input status
    Istat,
    /// Request output status
    Ostat,
    /// Request reader status
    Rstat,
    /// Control an output
    Out,
    /// Control an LED
    Led,
    /// Control the buzzer
    Buz,
    /// Display text
    Text,
    /// Set receive/transmit timing
    Rmode,
    /// Set transmit delay
    Tdset,
    /// Set the PD's communication parameters
    Comset,
    /// Raw data passthrough
    Data,
    /// Transmit to a subordinate bus
    Xmit,
    /// Prompt
    Prompt,
    /// Send/peripheral-emulation command
    Spe,
    /// Request a biometric read
    Bioread,
    /// Request a biometric match
    Biomatch,
    /// Install or rotate a Secure Channel key
    Keyset,
    /// Secure Channel challenge (CP random)
    Chlng,
    /// Secure Channel server cryptogram (CP cryptogram)
    Scrypt,
    /// Manufacturer-specific command
    Mfg,
    /// Continue a multi-part exchange
    Cont,
    /// Abort a multi-part exchange
    Abort,
    /// Maximum reply size negotiation
    Maxreply,
    /// Secure Channel handshake complete
    Scdone,
    /// Transparent Reader Support carrier (nested TRS command, §4.7)
    Xwr,
}

impl Code {
    /// The wire byte for this command code.
    pub fn to_u8(self) -> u8 {
        match self {
            Code::Poll => 0x60,
            Code::Id => 0x61,
            Code::Cap => 0x62,
            Code::Diag => 0x63,
            Code::Lstat => 0x64,
            Code::Istat => 0x65,
            Code::Ostat => 0x66,
            Code::Rstat => 0x67,
            Code::Out => 0x68,
            Code::Led => 0x69,
            Code::Buz => 0x6A,
            Code::Text => 0x6B,
            Code::Rmode => 0x6C,
            Code::Tdset => 0x6D,
            Code::Comset => 0x6E,
            Code::Data => 0x6F,
            Code::Xmit => 0x70,
            Code::Prompt => 0x71,
            Code::Spe => 0x72,
            Code::Bioread => 0x73,
            Code::Biomatch => 0x74,
            Code::Keyset => 0x75,
            Code::Chlng => 0x76,
            Code::Scrypt => 0x77,
            Code::Cont => 0x79,
            Code::Abort => 0x7A,
            Code::Maxreply => 0x7B,
            Code::Mfg => 0x80,
            Code::Scdone => 0xA0,
            Code::Xwr => 0xA1,
        }
    }

    /// Parse a wire byte into a command code.
    pub fn from_u8(byte: u8) -> Result<Self, Error> {
        Ok(match byte {
            0x60 => Code::Poll,
            0x61 => Code::Id,
            0x62 => Code::Cap,
            0x63 => Code::Diag,
            0x64 => Code::Lstat,
            0x65 => Code::Istat,
            0x66 => Code::Ostat,
            0x67 => Code::Rstat,
            0x68 => Code::Out,
            0x69 => Code::Led,
            0x6A => Code::Buz,
            0x6B => Code::Text,
            0x6C => Code::Rmode,
            0x6D => Code::Tdset,
            0x6E => Code::Comset,
            0x6F => Code::Data,
            0x70 => Code::Xmit,
            0x71 => Code::Prompt,
            0x72 => Code::Spe,
            0x73 => Code::Bioread,
            0x74 => Code::Biomatch,
            0x75 => Code::Keyset,
            0x76 => Code::Chlng,
            0x77 => Code::Scrypt,
            0x79 => Code::Cont,
            0x7A => Code::Abort,
            0x7B => Code::Maxreply,
            0x80 => Code::Mfg,
            0xA0 => Code::Scdone,
            0xA1 => Code::Xwr,
            _ => fail!(ErrorKind::Unknown, "unknown command code: 0x{:02x}", byte),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_round_trips_through_wire_byte() {
        for code in [
            Code::Poll,
            Code::Id,
            Code::Cap,
            Code::Keyset,
            Code::Chlng,
            Code::Scrypt,
            Code::Mfg,
            Code::Xwr,
        ] {
            assert_eq!(Code::from_u8(code.to_u8()).unwrap(), code);
        }
    }

    #[test]
    fn unknown_code_is_rejected() {
        assert!(Code::from_u8(0x00).is_err());
    }
}
