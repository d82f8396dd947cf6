//! Wire-frame codec: packs and unpacks a single OSDP frame.
//!
//! A frame is `SOM | address | len_lsb | len_msb | control | [scb] | data |
//! trailer`, where `trailer` is a little-endian CRC16 or an 8-bit
//! 2's-complement checksum depending on the control byte's CRC bit. This
//! module only frames bytes; Secure Channel MAC/encryption of the payload is
//! applied by the caller (`securechannel`) before `packet_finalize` and
//! after `decode_packet`.

use thiserror::Error;

/// Start-of-message byte
const SOM: u8 = 0x53;
/// Broadcast address: every PD accepts a frame addressed here
const BROADCAST_ADDRESS: u8 = 0x7F;
/// Minimum bytes needed before the header can even be parsed
const HEADER_LEN: usize = 5;

/// Errors raised by the PHY codec
pub type Error = crate::Error<ErrorKind>;

/// Kinds of PHY codec errors
#[derive(Copy, Clone, Debug, Eq, Error, PartialEq)]
pub enum ErrorKind {
    /// Malformed frame: bad SOM, bad CRC/checksum, or an internal
    /// inconsistency (`OSDP_ERR_PKT_FMT`)
    #[error("malformed frame")]
    Format,

    /// Buffer does not yet hold a complete frame; caller should read more
    /// (`OSDP_ERR_PKT_WAIT`)
    #[error("incomplete frame")]
    Incomplete,

    /// Frame is addressed to a different PD (`OSDP_ERR_PKT_SKIP`)
    #[error("frame not addressed to this PD")]
    Skip,
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        anomaly::Context::new(kind, None).into()
    }
}

/// Parameters needed to frame an outgoing packet.
#[derive(Clone, Copy, Debug)]
pub struct FrameParams {
    /// Destination (CP→PD) or source (PD→CP) PD address, 0–127
    pub address: u8,
    /// True when this frame is a PD's reply (sets the address reply bit)
    pub reply: bool,
    /// Sequence number, 0–3 (0 reserved for a CP comms reset)
    pub sequence: u8,
    /// Use CRC16 trailer instead of the 8-bit checksum
    pub use_crc: bool,
}

/// Write the frame header (and SCB, if any) into `buf`, clearing it first.
/// The length field is written as a placeholder and patched by
/// [`packet_finalize`]. Returns the number of header bytes written.
pub fn packet_init(params: &FrameParams, scb: Option<&[u8]>, buf: &mut Vec<u8>) -> usize {
    buf.clear();
    buf.push(SOM);
    buf.push(params.address | if params.reply { 0x80 } else { 0 });
    buf.push(0);
    buf.push(0);

    let mut control = params.sequence & 0x03;
    if params.use_crc {
        control |= 0x04;
    }
    if scb.is_some() {
        control |= 0x08;
    }
    buf.push(control);

    if let Some(scb) = scb {
        buf.extend_from_slice(scb);
    }
    buf.len()
}

/// Patch the length field and append the trailer (CRC16 or checksum) once
/// the payload (plaintext or already MAC'd/encrypted by the caller) has been
/// appended to `buf`. Returns the final frame length.
pub fn packet_finalize(params: &FrameParams, buf: &mut Vec<u8>) -> Result<usize, Error> {
    let trailer_len = if params.use_crc { 2 } else { 1 };
    let total_len = buf.len() + trailer_len;
    if total_len > u16::MAX as usize {
        return Err(ErrorKind::Format.into());
    }
    let len_bytes = (total_len as u16).to_le_bytes();
    buf[2] = len_bytes[0];
    buf[3] = len_bytes[1];

    if params.use_crc {
        let crc = crc16(buf);
        buf.extend_from_slice(&crc.to_le_bytes());
    } else {
        buf.push(checksum8(buf));
    }
    Ok(buf.len())
}

/// A successfully decoded frame, borrowing its payload from the input buffer.
#[derive(Debug)]
pub struct Decoded<'a> {
    /// Address this frame was sent to/from (reply bit stripped)
    pub address: u8,
    /// True if this is a PD reply frame
    pub reply: bool,
    /// Sequence number carried in the control byte
    pub sequence: u8,
    /// Secure Channel Block, if the control byte's SCB bit was set
    pub scb: Option<&'a [u8]>,
    /// Command/reply payload, excluding the leading id byte
    pub data: &'a [u8],
    /// Total length of the frame this decode consumed
    pub frame_len: usize,
}

/// Validate and unpack one frame from the front of `buf`.
///
/// `own_address` is this PD's address (ignored on the CP side, which passes
/// the address it expects the reply from). Returns [`ErrorKind::Incomplete`]
/// if `buf` does not yet contain a whole frame (caller should read more and
/// retry), [`ErrorKind::Skip`] if the frame is addressed elsewhere, and
/// [`ErrorKind::Format`] for any structural or checksum failure.
pub fn decode_packet<'a>(buf: &'a [u8], own_address: u8) -> Result<Decoded<'a>, Error> {
    if buf.len() < HEADER_LEN {
        return Err(ErrorKind::Incomplete.into());
    }
    if buf[0] != SOM {
        return Err(ErrorKind::Format.into());
    }

    let address = buf[1] & 0x7F;
    let reply = buf[1] & 0x80 != 0;
    if address != own_address && address != BROADCAST_ADDRESS {
        return Err(ErrorKind::Skip.into());
    }

    let frame_len = u16::from_le_bytes([buf[2], buf[3]]) as usize;
    if frame_len < HEADER_LEN {
        return Err(ErrorKind::Format.into());
    }
    if buf.len() < frame_len {
        return Err(ErrorKind::Incomplete.into());
    }

    let control = buf[4];
    let sequence = control & 0x03;
    let use_crc = control & 0x04 != 0;
    let scb_present = control & 0x08 != 0;
    let trailer_len = if use_crc { 2 } else { 1 };

    if frame_len < HEADER_LEN + trailer_len {
        return Err(ErrorKind::Format.into());
    }
    let frame = &buf[..frame_len];
    let trailer_offset = frame_len - trailer_len;

    if use_crc {
        let expected = crc16(&frame[..trailer_offset]);
        let actual = u16::from_le_bytes([frame[trailer_offset], frame[trailer_offset + 1]]);
        if expected != actual {
            return Err(ErrorKind::Format.into());
        }
    } else {
        let expected = checksum8(&frame[..trailer_offset]);
        if expected != frame[trailer_offset] {
            return Err(ErrorKind::Format.into());
        }
    }

    let mut data_offset = HEADER_LEN;
    let scb = if scb_present {
        if frame.len() <= data_offset {
            return Err(ErrorKind::Format.into());
        }
        let scb_len = frame[data_offset] as usize;
        if scb_len == 0 || data_offset + scb_len > trailer_offset {
            return Err(ErrorKind::Format.into());
        }
        let scb_slice = &frame[data_offset..data_offset + scb_len];
        data_offset += scb_len;
        Some(scb_slice)
    } else {
        None
    };

    if data_offset > trailer_offset {
        return Err(ErrorKind::Format.into());
    }

    Ok(Decoded {
        address,
        reply,
        sequence,
        scb,
        data: &frame[data_offset..trailer_offset],
        frame_len,
    })
}

/// Byte offset the payload begins at within a frame built from `params` with
/// the given SCB length (0 if none). Mirrors `packet_get_data_offset`.
pub fn packet_get_data_offset(scb_len: usize) -> usize {
    HEADER_LEN + scb_len
}

/// CRC16-CCITT (poly 0x1021, init 0xFFFF), computed over `data`.
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in data {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ 0x1021
            } else {
                crc << 1
            };
        }
    }
    crc
}

/// 2's-complement 8-bit checksum of `data`.
pub fn checksum8(data: &[u8]) -> u8 {
    let sum: u8 = data.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
    (!sum).wrapping_add(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(use_crc: bool, scb: Option<&[u8]>, payload: &[u8]) -> Vec<u8> {
        let params = FrameParams {
            address: 5,
            reply: false,
            sequence: 1,
            use_crc,
        };
        let mut buf = Vec::new();
        packet_init(&params, scb, &mut buf);
        buf.extend_from_slice(payload);
        packet_finalize(&params, &mut buf).unwrap();
        buf
    }

    #[test]
    fn crc_frame_round_trips() {
        let buf = roundtrip(true, None, &[0x60]);
        let decoded = decode_packet(&buf, 5).unwrap();
        assert_eq!(decoded.address, 5);
        assert!(!decoded.reply);
        assert_eq!(decoded.sequence, 1);
        assert_eq!(decoded.data, &[0x60]);
        assert_eq!(decoded.frame_len, buf.len());
    }

    #[test]
    fn checksum_frame_round_trips() {
        let buf = roundtrip(false, None, &[0x61, 0x00]);
        let decoded = decode_packet(&buf, 5).unwrap();
        assert_eq!(decoded.data, &[0x61, 0x00]);
    }

    #[test]
    fn scb_present_bit_and_slice_round_trip() {
        let scb = [0x03u8, 0x11, 0xAA];
        let buf = roundtrip(true, Some(&scb), &[0x60]);
        let decoded = decode_packet(&buf, 5).unwrap();
        assert_eq!(decoded.scb, Some(&scb[..]));
        assert_eq!(decoded.data, &[0x60]);
    }

    #[test]
    fn broadcast_address_is_accepted() {
        let params = FrameParams {
            address: BROADCAST_ADDRESS,
            reply: false,
            sequence: 0,
            use_crc: true,
        };
        let mut buf = Vec::new();
        packet_init(&params, None, &mut buf);
        buf.push(0x60);
        packet_finalize(&params, &mut buf).unwrap();
        assert!(decode_packet(&buf, 5).is_ok());
    }

    #[test]
    fn mismatched_address_is_skipped() {
        let buf = roundtrip(true, None, &[0x60]);
        let err = decode_packet(&buf, 9).unwrap_err();
        assert_eq!(*err.kind(), ErrorKind::Skip);
    }

    #[test]
    fn truncated_frame_is_incomplete() {
        let buf = roundtrip(true, None, &[0x60, 0x01, 0x02]);
        let err = decode_packet(&buf[..buf.len() - 2], 5).unwrap_err();
        assert_eq!(*err.kind(), ErrorKind::Incomplete);
    }

    #[test]
    fn corrupted_trailer_is_rejected() {
        let mut buf = roundtrip(true, None, &[0x60]);
        let last = buf.len() - 1;
        buf[last] ^= 0xFF;
        let err = decode_packet(&buf, 5).unwrap_err();
        assert_eq!(*err.kind(), ErrorKind::Format);
    }

    #[test]
    fn reply_bit_round_trips() {
        let params = FrameParams {
            address: 5,
            reply: true,
            sequence: 2,
            use_crc: true,
        };
        let mut buf = Vec::new();
        packet_init(&params, None, &mut buf);
        buf.push(0x40);
        packet_finalize(&params, &mut buf).unwrap();
        let decoded = decode_packet(&buf, 5).unwrap();
        assert!(decoded.reply);
        assert_eq!(decoded.sequence, 2);
    }
}
