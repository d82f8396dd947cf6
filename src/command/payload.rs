//! Decoded command payloads, keyed by [`super::Code`].

use super::{Code, Error, ErrorKind};
use anomaly::ensure;

/// Control an output point.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct OutputControl {
    /// Output number
    pub output_number: u8,
    /// Control code (on/off/timed/etc, vendor-defined values)
    pub control_code: u8,
    /// Timer value in units of 100ms when `control_code` selects a timed mode
    pub timer: u16,
}

/// Control a reader LED.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct LedControl {
    /// Reader number
    pub reader: u8,
    /// LED number
    pub led_number: u8,
    /// Control code (permanent/temporary state change)
    pub control_code: u8,
    /// On color
    pub on_color: u8,
    /// Off color
    pub off_color: u8,
    /// On time, units of 100ms
    pub on_time: u8,
    /// Off time, units of 100ms
    pub off_time: u8,
}

/// Control the reader buzzer.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BuzzerControl {
    /// Reader number
    pub reader: u8,
    /// Control code
    pub control_code: u8,
    /// On time, units of 100ms
    pub on_time: u8,
    /// Off time, units of 100ms
    pub off_time: u8,
    /// Repeat count
    pub count: u8,
}

/// Display text on a reader.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TextOutput {
    /// Reader number
    pub reader: u8,
    /// Control code (append/replace/etc)
    pub control_code: u8,
    /// Temporary display time, seconds (0 = permanent)
    pub temp_time: u8,
    /// Row offset
    pub offset_row: u8,
    /// Column offset
    pub offset_col: u8,
    /// Text bytes
    pub data: Vec<u8>,
}

/// Set the PD's communication parameters.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ComSet {
    /// New address
    pub address: u8,
    /// New baud rate
    pub baud_rate: u32,
}

/// Install or rotate a Secure Channel base key.
#[derive(Clone, Copy, Eq, PartialEq)]
pub struct KeySet {
    /// Key type (always 1 = SCBK in this engine)
    pub key_type: u8,
    /// Key length in bytes (always 16)
    pub key_length: u8,
    /// The new SCBK
    pub scbk: [u8; 16],
}

impl std::fmt::Debug for KeySet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeySet")
            .field("key_type", &self.key_type)
            .field("key_length", &self.key_length)
            .field("scbk", &"...")
            .finish()
    }
}

/// A manufacturer-specific command.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MfgCommand {
    /// IEEE OUI vendor code
    pub vendor_code: [u8; 3],
    /// Vendor-defined payload
    pub data: Vec<u8>,
}

/// A decoded OSDP command, CP→PD.
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub enum Command {
    /// `CMD_POLL`
    Poll,
    /// `CMD_ID`
    Id,
    /// `CMD_CAP`
    Cap,
    /// `CMD_LSTAT`
    Lstat,
    /// `CMD_ISTAT`
    Istat,
    /// `CMD_OSTAT`
    Ostat,
    /// `CMD_RSTAT`
    Rstat,
    /// `CMD_OUT`
    Out(OutputControl),
    /// `CMD_LED`
    Led(LedControl),
    /// `CMD_BUZ`
    Buz(BuzzerControl),
    /// `CMD_TEXT`
    Text(TextOutput),
    /// `CMD_COMSET`
    Comset(ComSet),
    /// `CMD_KEYSET`
    Keyset(KeySet),
    /// `CMD_CHLNG`, carrying the CP's random challenge
    Chlng([u8; 8]),
    /// `CMD_SCRYPT`, carrying the CP's cryptogram
    Scrypt([u8; 16]),
    /// `CMD_MFG`
    Mfg(MfgCommand),
    /// `CMD_XWR`, the Transparent Reader Support carrier (§4.7)
    Xwr(Vec<u8>),
    /// `CMD_ABORT`
    Abort,
    /// Any other reserved command, carried as an opaque byte vector. This
    /// engine does not specify biometric or card-format-specific record
    /// layouts (same Non-goals boundary as card formats generally).
    Raw(Code, Vec<u8>),
}

impl Command {
    /// The wire code for this command.
    pub fn code(&self) -> Code {
        match self {
            Command::Poll => Code::Poll,
            Command::Id => Code::Id,
            Command::Cap => Code::Cap,
            Command::Lstat => Code::Lstat,
            Command::Istat => Code::Istat,
            Command::Ostat => Code::Ostat,
            Command::Rstat => Code::Rstat,
            Command::Out(_) => Code::Out,
            Command::Led(_) => Code::Led,
            Command::Buz(_) => Code::Buz,
            Command::Text(_) => Code::Text,
            Command::Comset(_) => Code::Comset,
            Command::Keyset(_) => Code::Keyset,
            Command::Chlng(_) => Code::Chlng,
            Command::Scrypt(_) => Code::Scrypt,
            Command::Mfg(_) => Code::Mfg,
            Command::Xwr(_) => Code::Xwr,
            Command::Abort => Code::Abort,
            Command::Raw(code, _) => *code,
        }
    }

    /// Encode this command's payload (not including the wire code byte,
    /// which the PHY layer writes separately).
    pub fn encode(&self, buf: &mut Vec<u8>) {
        match self {
            Command::Poll
            | Command::Id
            | Command::Cap
            | Command::Lstat
            | Command::Istat
            | Command::Ostat
            | Command::Rstat
            | Command::Abort => {}
            Command::Out(out) => {
                buf.push(out.output_number);
                buf.push(out.control_code);
                buf.extend_from_slice(&out.timer.to_le_bytes());
            }
            Command::Led(led) => {
                buf.extend_from_slice(&[
                    led.reader,
                    led.led_number,
                    led.control_code,
                    led.on_color,
                    led.off_color,
                    led.on_time,
                    led.off_time,
                ]);
            }
            Command::Buz(buz) => {
                buf.extend_from_slice(&[
                    buz.reader,
                    buz.control_code,
                    buz.on_time,
                    buz.off_time,
                    buz.count,
                ]);
            }
            Command::Text(text) => {
                buf.extend_from_slice(&[
                    text.reader,
                    text.control_code,
                    text.temp_time,
                    text.offset_row,
                    text.offset_col,
                    text.data.len() as u8,
                ]);
                buf.extend_from_slice(&text.data);
            }
            Command::Comset(comset) => {
                buf.push(comset.address);
                buf.extend_from_slice(&comset.baud_rate.to_le_bytes());
            }
            Command::Keyset(keyset) => {
                buf.push(keyset.key_type);
                buf.push(keyset.key_length);
                buf.extend_from_slice(&keyset.scbk);
            }
            Command::Chlng(cp_random) => buf.extend_from_slice(cp_random),
            Command::Scrypt(cp_cryptogram) => buf.extend_from_slice(cp_cryptogram),
            Command::Mfg(mfg) => {
                buf.extend_from_slice(&mfg.vendor_code);
                buf.extend_from_slice(&mfg.data);
            }
            Command::Xwr(data) => buf.extend_from_slice(data),
            Command::Raw(_, data) => buf.extend_from_slice(data),
        }
    }

    /// Decode a command payload given its wire code.
    pub fn decode(code: Code, data: &[u8]) -> Result<Self, Error> {
        Ok(match code {
            Code::Poll => Command::Poll,
            Code::Id => Command::Id,
            Code::Cap => Command::Cap,
            Code::Lstat => Command::Lstat,
            Code::Istat => Command::Istat,
            Code::Ostat => Command::Ostat,
            Code::Rstat => Command::Rstat,
            Code::Abort => Command::Abort,
            Code::Out => {
                ensure!(data.len() == 4, ErrorKind::Length, "CMD_OUT expects 4 bytes");
                Command::Out(OutputControl {
                    output_number: data[0],
                    control_code: data[1],
                    timer: u16::from_le_bytes([data[2], data[3]]),
                })
            }
            Code::Led => {
                ensure!(data.len() == 7, ErrorKind::Length, "CMD_LED expects 7 bytes");
                Command::Led(LedControl {
                    reader: data[0],
                    led_number: data[1],
                    control_code: data[2],
                    on_color: data[3],
                    off_color: data[4],
                    on_time: data[5],
                    off_time: data[6],
                })
            }
            Code::Buz => {
                ensure!(data.len() == 5, ErrorKind::Length, "CMD_BUZ expects 5 bytes");
                Command::Buz(BuzzerControl {
                    reader: data[0],
                    control_code: data[1],
                    on_time: data[2],
                    off_time: data[3],
                    count: data[4],
                })
            }
            Code::Text => {
                ensure!(data.len() >= 6, ErrorKind::Length, "CMD_TEXT header truncated");
                let text_len = data[5] as usize;
                ensure!(
                    data.len() == 6 + text_len,
                    ErrorKind::Length,
                    "CMD_TEXT length mismatch"
                );
                Command::Text(TextOutput {
                    reader: data[0],
                    control_code: data[1],
                    temp_time: data[2],
                    offset_row: data[3],
                    offset_col: data[4],
                    data: data[6..].to_vec(),
                })
            }
            Code::Comset => {
                ensure!(data.len() == 5, ErrorKind::Length, "CMD_COMSET expects 5 bytes");
                Command::Comset(ComSet {
                    address: data[0],
                    baud_rate: u32::from_le_bytes([data[1], data[2], data[3], data[4]]),
                })
            }
            Code::Keyset => {
                ensure!(data.len() == 18, ErrorKind::Length, "CMD_KEYSET expects 18 bytes");
                let mut scbk = [0u8; 16];
                scbk.copy_from_slice(&data[2..18]);
                Command::Keyset(KeySet {
                    key_type: data[0],
                    key_length: data[1],
                    scbk,
                })
            }
            Code::Chlng => {
                ensure!(data.len() == 8, ErrorKind::Length, "CMD_CHLNG expects 8 bytes");
                let mut cp_random = [0u8; 8];
                cp_random.copy_from_slice(data);
                Command::Chlng(cp_random)
            }
            Code::Scrypt => {
                ensure!(data.len() == 16, ErrorKind::Length, "CMD_SCRYPT expects 16 bytes");
                let mut cp_cryptogram = [0u8; 16];
                cp_cryptogram.copy_from_slice(data);
                Command::Scrypt(cp_cryptogram)
            }
            Code::Mfg => {
                ensure!(data.len() >= 3, ErrorKind::Length, "CMD_MFG truncated");
                let mut vendor_code = [0u8; 3];
                vendor_code.copy_from_slice(&data[..3]);
                Command::Mfg(MfgCommand {
                    vendor_code,
                    data: data[3..].to_vec(),
                })
            }
            Code::Xwr => Command::Xwr(data.to_vec()),
            other => Command::Raw(other, data.to_vec()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poll_round_trips_empty() {
        let mut buf = Vec::new();
        Command::Poll.encode(&mut buf);
        assert!(buf.is_empty());
        assert_eq!(Command::decode(Code::Poll, &buf).unwrap(), Command::Poll);
    }

    #[test]
    fn chlng_round_trips_cp_random() {
        let cp_random = [1, 2, 3, 4, 5, 6, 7, 8];
        let cmd = Command::Chlng(cp_random);
        let mut buf = Vec::new();
        cmd.encode(&mut buf);
        assert_eq!(buf, cp_random);
        assert_eq!(Command::decode(Code::Chlng, &buf).unwrap(), cmd);
    }

    #[test]
    fn keyset_round_trips_scbk() {
        let cmd = Command::Keyset(KeySet {
            key_type: 1,
            key_length: 16,
            scbk: [0x42; 16],
        });
        let mut buf = Vec::new();
        cmd.encode(&mut buf);
        assert_eq!(Command::decode(Code::Keyset, &buf).unwrap(), cmd);
    }

    #[test]
    fn raw_preserves_unstructured_codes() {
        let cmd = Command::Raw(Code::Bioread, vec![1, 2, 3]);
        let mut buf = Vec::new();
        cmd.encode(&mut buf);
        assert_eq!(buf, vec![1, 2, 3]);
        assert_eq!(Command::decode(Code::Bioread, &buf).unwrap(), cmd);
    }
}
