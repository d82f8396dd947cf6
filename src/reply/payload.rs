//! Decoded reply payloads, keyed by [`super::Code`].

use super::{Code, Error, ErrorKind};
use anomaly::{ensure, fail};
use serde::{Deserialize, Serialize};

/// A PD's identification record, returned in response to `CMD_ID`.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct PdId {
    /// IEEE OUI vendor code
    pub vendor_code: [u8; 3],
    /// Vendor-assigned model number
    pub model: u8,
    /// Vendor-assigned version number
    pub version: u8,
    /// Device serial number
    pub serial_number: u32,
    /// Firmware version, `major.minor.build`
    pub firmware: [u8; 3],
}

impl PdId {
    fn encode(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.vendor_code);
        buf.push(self.model);
        buf.push(self.version);
        buf.extend_from_slice(&self.serial_number.to_le_bytes());
        buf.extend_from_slice(&self.firmware);
    }

    fn decode(data: &[u8]) -> Result<Self, Error> {
        ensure!(data.len() == 12, ErrorKind::Length, "REPLY_PDID expects 12 bytes");
        Ok(PdId {
            vendor_code: [data[0], data[1], data[2]],
            model: data[3],
            version: data[4],
            serial_number: u32::from_le_bytes([data[5], data[6], data[7], data[8]]),
            firmware: [data[9], data[10], data[11]],
        })
    }
}

/// One capability function entry in a `REPLY_PDCAP` record.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Capability {
    /// Function code identifying the capability
    pub function_code: u8,
    /// Compliance level the PD claims for this function
    pub compliance_level: u8,
    /// Number of items of this capability the PD has (e.g. number of readers)
    pub num_items: u8,
}

/// A PD's reply to `CMD_CHLNG`: its random nonce and resulting cryptogram
/// (§4.2 `pd_complete_challenge`). The CP needs both to verify the
/// cryptogram and derive matching session keys.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CryptogramReply {
    /// The PD's random nonce for this handshake
    pub pd_random: [u8; 8],
    /// The PD's cryptogram, `enc(s_enc, cp_random || pd_random)`
    pub pd_cryptogram: [u8; 16],
}

/// PD local status: tamper and power state, returned by `CMD_LSTAT`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct LocalStatus {
    /// Tamper detected
    pub tamper: bool,
    /// Power trouble detected
    pub power: bool,
}

/// Output status bitmap, one bit per output, returned by `CMD_OSTAT`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct OutputStatus {
    /// One entry per output, true if active
    pub outputs: Vec<bool>,
}

/// Keypad data, returned by `CMD_RSTAT`-family polling.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct KeypadData {
    /// Reader number the keypress came from
    pub reader: u8,
    /// Raw keypad digits, one byte per keypress
    pub data: Vec<u8>,
}

/// A manufacturer-specific reply.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MfgReply {
    /// IEEE OUI vendor code
    pub vendor_code: [u8; 3],
    /// Vendor-defined payload
    pub data: Vec<u8>,
}

/// Negative-acknowledgement reason codes (`osdp_pd_nak_code_e` in the wire protocol).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum NakCode {
    /// No error given
    None,
    /// Bad checksum or CRC
    MsgChk,
    /// Command length error
    CmdLen,
    /// Command not implemented by the PD
    CmdUnknown,
    /// Unexpected sequence number in the header
    SeqNum,
    /// Secure Channel requested but not supported
    ScUnsup,
    /// Unsupported security block, or security conditions not met
    ScCond,
    /// Unsupported biometric type
    BioType,
    /// Unsupported biometric format
    BioFmt,
    /// Unable to process the command's record
    Record,
}

impl NakCode {
    fn to_u8(self) -> u8 {
        match self {
            NakCode::None => 0,
            NakCode::MsgChk => 1,
            NakCode::CmdLen => 2,
            NakCode::CmdUnknown => 3,
            NakCode::SeqNum => 4,
            NakCode::ScUnsup => 5,
            NakCode::ScCond => 6,
            NakCode::BioType => 7,
            NakCode::BioFmt => 8,
            NakCode::Record => 9,
        }
    }

    fn from_u8(byte: u8) -> Result<Self, Error> {
        Ok(match byte {
            0 => NakCode::None,
            1 => NakCode::MsgChk,
            2 => NakCode::CmdLen,
            3 => NakCode::CmdUnknown,
            4 => NakCode::SeqNum,
            5 => NakCode::ScUnsup,
            6 => NakCode::ScCond,
            7 => NakCode::BioType,
            8 => NakCode::BioFmt,
            9 => NakCode::Record,
            _ => fail!(ErrorKind::Unknown, "unknown NAK code: {}", byte),
        })
    }
}

/// A decoded OSDP reply, PD→CP.
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub enum Reply {
    /// `REPLY_ACK`
    Ack,
    /// `REPLY_NAK`
    Nak(NakCode),
    /// `REPLY_PDID`
    Pdid(PdId),
    /// `REPLY_PDCAP`
    Pdcap(Vec<Capability>),
    /// `REPLY_LSTATR`
    Lstatr(LocalStatus),
    /// `REPLY_OSTATR`
    Ostatr(OutputStatus),
    /// `REPLY_KEYPPAD`
    Keyppad(KeypadData),
    /// `REPLY_CCRYPT`, carrying the PD's random nonce and cryptogram
    Ccrypt(CryptogramReply),
    /// `REPLY_RMAC_I`, carrying the PD's R-MAC seed
    RmacI([u8; 16]),
    /// `REPLY_MFGREP`
    Mfgrep(MfgReply),
    /// `REPLY_BUSY`
    Busy,
    /// `REPLY_XRD`, the Transparent Reader Support carrier (§4.7)
    Xrd(Vec<u8>),
    /// Any other reserved reply, carried as an opaque byte vector (same
    /// biometric/card-format Non-goals boundary as [`crate::command::Command::Raw`]).
    Raw(Code, Vec<u8>),
}

impl Reply {
    /// The wire code for this reply.
    pub fn code(&self) -> Code {
        match self {
            Reply::Ack => Code::Ack,
            Reply::Nak(_) => Code::Nak,
            Reply::Pdid(_) => Code::Pdid,
            Reply::Pdcap(_) => Code::Pdcap,
            Reply::Lstatr(_) => Code::Lstatr,
            Reply::Ostatr(_) => Code::Ostatr,
            Reply::Keyppad(_) => Code::Keyppad,
            Reply::Ccrypt(_) => Code::Ccrypt,
            Reply::RmacI(_) => Code::RmacI,
            Reply::Mfgrep(_) => Code::Mfgrep,
            Reply::Busy => Code::Busy,
            Reply::Xrd(_) => Code::Xrd,
            Reply::Raw(code, _) => *code,
        }
    }

    /// Encode this reply's payload (not including the wire code byte, which
    /// the PHY layer writes separately).
    pub fn encode(&self, buf: &mut Vec<u8>) {
        match self {
            Reply::Ack | Reply::Busy => {}
            Reply::Nak(code) => buf.push(code.to_u8()),
            Reply::Pdid(id) => id.encode(buf),
            Reply::Pdcap(caps) => {
                for cap in caps {
                    buf.push(cap.function_code);
                    buf.push(cap.compliance_level);
                    buf.push(cap.num_items);
                }
            }
            Reply::Lstatr(status) => {
                buf.push(status.tamper as u8);
                buf.push(status.power as u8);
            }
            Reply::Ostatr(status) => {
                for &on in &status.outputs {
                    buf.push(on as u8);
                }
            }
            Reply::Keyppad(keys) => {
                buf.push(keys.reader);
                buf.push(keys.data.len() as u8);
                buf.extend_from_slice(&keys.data);
            }
            Reply::Ccrypt(cryptogram) => {
                buf.extend_from_slice(&cryptogram.pd_random);
                buf.extend_from_slice(&cryptogram.pd_cryptogram);
            }
            Reply::RmacI(rmac) => buf.extend_from_slice(rmac),
            Reply::Mfgrep(mfg) => {
                buf.extend_from_slice(&mfg.vendor_code);
                buf.extend_from_slice(&mfg.data);
            }
            Reply::Xrd(data) => buf.extend_from_slice(data),
            Reply::Raw(_, data) => buf.extend_from_slice(data),
        }
    }

    /// Decode a reply payload given its wire code.
    pub fn decode(code: Code, data: &[u8]) -> Result<Self, Error> {
        Ok(match code {
            Code::Ack => Reply::Ack,
            Code::Busy => Reply::Busy,
            Code::Nak => {
                ensure!(data.len() == 1, ErrorKind::Length, "REPLY_NAK expects 1 byte");
                Reply::Nak(NakCode::from_u8(data[0])?)
            }
            Code::Pdid => Reply::Pdid(PdId::decode(data)?),
            Code::Pdcap => {
                ensure!(
                    data.len() % 3 == 0,
                    ErrorKind::Length,
                    "REPLY_PDCAP length must be a multiple of 3"
                );
                Reply::Pdcap(
                    data.chunks_exact(3)
                        .map(|chunk| Capability {
                            function_code: chunk[0],
                            compliance_level: chunk[1],
                            num_items: chunk[2],
                        })
                        .collect(),
                )
            }
            Code::Lstatr => {
                ensure!(data.len() == 2, ErrorKind::Length, "REPLY_LSTATR expects 2 bytes");
                Reply::Lstatr(LocalStatus {
                    tamper: data[0] != 0,
                    power: data[1] != 0,
                })
            }
            Code::Ostatr => Reply::Ostatr(OutputStatus {
                outputs: data.iter().map(|&b| b != 0).collect(),
            }),
            Code::Keyppad => {
                ensure!(data.len() >= 2, ErrorKind::Length, "REPLY_KEYPPAD truncated");
                let key_len = data[1] as usize;
                ensure!(
                    data.len() == 2 + key_len,
                    ErrorKind::Length,
                    "REPLY_KEYPPAD length mismatch"
                );
                Reply::Keyppad(KeypadData {
                    reader: data[0],
                    data: data[2..].to_vec(),
                })
            }
            Code::Ccrypt => {
                ensure!(data.len() == 24, ErrorKind::Length, "REPLY_CCRYPT expects 24 bytes");
                let mut pd_random = [0u8; 8];
                pd_random.copy_from_slice(&data[..8]);
                let mut pd_cryptogram = [0u8; 16];
                pd_cryptogram.copy_from_slice(&data[8..24]);
                Reply::Ccrypt(CryptogramReply { pd_random, pd_cryptogram })
            }
            Code::RmacI => {
                ensure!(data.len() == 16, ErrorKind::Length, "REPLY_RMAC_I expects 16 bytes");
                let mut rmac = [0u8; 16];
                rmac.copy_from_slice(data);
                Reply::RmacI(rmac)
            }
            Code::Mfgrep => {
                ensure!(data.len() >= 3, ErrorKind::Length, "REPLY_MFGREP truncated");
                let mut vendor_code = [0u8; 3];
                vendor_code.copy_from_slice(&data[..3]);
                Reply::Mfgrep(MfgReply {
                    vendor_code,
                    data: data[3..].to_vec(),
                })
            }
            Code::Xrd => Reply::Xrd(data.to_vec()),
            other => Reply::Raw(other, data.to_vec()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pdid_round_trips() {
        let id = PdId {
            vendor_code: [0x5C, 0x0A, 0x26],
            model: 0x01,
            version: 0x01,
            serial_number: 0xDEADBEEF,
            firmware: [0x01, 0x02, 0x03],
        };
        let reply = Reply::Pdid(id);
        let mut buf = Vec::new();
        reply.encode(&mut buf);
        assert_eq!(Reply::decode(Code::Pdid, &buf).unwrap(), reply);
    }

    #[test]
    fn ccrypt_round_trips_random_and_cryptogram() {
        let reply = Reply::Ccrypt(CryptogramReply {
            pd_random: [1, 2, 3, 4, 5, 6, 7, 8],
            pd_cryptogram: [0xAA; 16],
        });
        let mut buf = Vec::new();
        reply.encode(&mut buf);
        assert_eq!(buf.len(), 24);
        assert_eq!(Reply::decode(Code::Ccrypt, &buf).unwrap(), reply);
    }

    #[test]
    fn nak_round_trips() {
        let reply = Reply::Nak(NakCode::ScCond);
        let mut buf = Vec::new();
        reply.encode(&mut buf);
        assert_eq!(buf, vec![6]);
        assert_eq!(Reply::decode(Code::Nak, &buf).unwrap(), reply);
    }

    #[test]
    fn pdcap_round_trips_multiple_entries() {
        let reply = Reply::Pdcap(vec![
            Capability {
                function_code: 1,
                compliance_level: 2,
                num_items: 1,
            },
            Capability {
                function_code: 3,
                compliance_level: 1,
                num_items: 4,
            },
        ]);
        let mut buf = Vec::new();
        reply.encode(&mut buf);
        assert_eq!(Reply::decode(Code::Pdcap, &buf).unwrap(), reply);
    }

    #[test]
    fn raw_preserves_unstructured_codes() {
        let reply = Reply::Raw(Code::Bioreadr, vec![9, 9, 9]);
        let mut buf = Vec::new();
        reply.encode(&mut buf);
        assert_eq!(Reply::decode(Code::Bioreadr, &buf).unwrap(), reply);
    }
}
