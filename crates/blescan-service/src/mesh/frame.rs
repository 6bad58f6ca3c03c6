//! XBee API frames (API mode 1, unescaped).
//!
//! ```text
//! 0x7E | length (u16 BE) | frame data ... | checksum
//! ```
//!
//! The checksum is `0xFF` minus the low byte of the sum of the frame data.
//! Only the frame types the relay needs are modelled; everything else is
//! surfaced as [`Frame::Other`].

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::debug;

use crate::error::MeshError;

pub const START_DELIMITER: u8 = 0x7E;

pub const AT_COMMAND: u8 = 0x08;
pub const TRANSMIT_REQUEST: u8 = 0x10;
pub const AT_RESPONSE: u8 = 0x88;
pub const TRANSMIT_STATUS: u8 = 0x8B;
pub const RECEIVE_PACKET: u8 = 0x90;

/// 16-bit address meaning "unknown / use the 64-bit address".
pub const UNKNOWN_ADDR16: u16 = 0xFFFE;

/// Largest frame data the radio accepts.
const MAX_FRAME_LEN: usize = 0x0200;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    AtCommand {
        frame_id: u8,
        command: [u8; 2],
        parameter: Vec<u8>,
    },
    AtResponse {
        frame_id: u8,
        command: [u8; 2],
        status: u8,
        data: Vec<u8>,
    },
    TransmitRequest {
        frame_id: u8,
        dest64: u64,
        payload: Vec<u8>,
    },
    TransmitStatus {
        frame_id: u8,
        retries: u8,
        delivery_status: u8,
        discovery_status: u8,
    },
    ReceivePacket {
        source64: u64,
        options: u8,
        payload: Vec<u8>,
    },
    Other {
        frame_type: u8,
        data: Vec<u8>,
    },
}

impl Frame {
    pub fn at_command(frame_id: u8, command: &str, parameter: &[u8]) -> Self {
        let bytes = command.as_bytes();
        let mut cmd = [b' '; 2];
        for (slot, byte) in cmd.iter_mut().zip(bytes) {
            *slot = *byte;
        }
        Frame::AtCommand {
            frame_id,
            command: cmd,
            parameter: parameter.to_vec(),
        }
    }

    /// Frame id used to correlate a response, if this frame carries one.
    pub fn frame_id(&self) -> Option<u8> {
        match self {
            Frame::AtCommand { frame_id, .. }
            | Frame::AtResponse { frame_id, .. }
            | Frame::TransmitRequest { frame_id, .. }
            | Frame::TransmitStatus { frame_id, .. } => Some(*frame_id),
            Frame::ReceivePacket { .. } | Frame::Other { .. } => None,
        }
    }

    fn write_data(&self, dst: &mut BytesMut) {
        match self {
            Frame::AtCommand {
                frame_id,
                command,
                parameter,
            } => {
                dst.put_u8(AT_COMMAND);
                dst.put_u8(*frame_id);
                dst.put_slice(command);
                dst.put_slice(parameter);
            }
            Frame::AtResponse {
                frame_id,
                command,
                status,
                data,
            } => {
                dst.put_u8(AT_RESPONSE);
                dst.put_u8(*frame_id);
                dst.put_slice(command);
                dst.put_u8(*status);
                dst.put_slice(data);
            }
            Frame::TransmitRequest {
                frame_id,
                dest64,
                payload,
            } => {
                dst.put_u8(TRANSMIT_REQUEST);
                dst.put_u8(*frame_id);
                dst.put_u64(*dest64);
                dst.put_u16(UNKNOWN_ADDR16);
                dst.put_u8(0); // broadcast radius: maximum hops
                dst.put_u8(0); // transmit options
                dst.put_slice(payload);
            }
            Frame::TransmitStatus {
                frame_id,
                retries,
                delivery_status,
                discovery_status,
            } => {
                dst.put_u8(TRANSMIT_STATUS);
                dst.put_u8(*frame_id);
                dst.put_u16(UNKNOWN_ADDR16);
                dst.put_u8(*retries);
                dst.put_u8(*delivery_status);
                dst.put_u8(*discovery_status);
            }
            Frame::ReceivePacket {
                source64,
                options,
                payload,
            } => {
                dst.put_u8(RECEIVE_PACKET);
                dst.put_u64(*source64);
                dst.put_u16(UNKNOWN_ADDR16);
                dst.put_u8(*options);
                dst.put_slice(payload);
            }
            Frame::Other { frame_type, data } => {
                dst.put_u8(*frame_type);
                dst.put_slice(data);
            }
        }
    }

    /// Parse frame data (frame type first, no delimiter/length/checksum).
    pub fn parse(data: &[u8]) -> Result<Self, MeshError> {
        let Some((&frame_type, mut rest)) = data.split_first() else {
            return Err(MeshError::InvalidFrame("empty frame".to_string()));
        };
        let too_short = |needed: usize| {
            MeshError::InvalidFrame(format!(
                "frame type {:#04x} needs {} bytes, got {}",
                frame_type,
                needed,
                data.len()
            ))
        };

        let frame = match frame_type {
            AT_COMMAND => {
                if rest.len() < 3 {
                    return Err(too_short(4));
                }
                Frame::AtCommand {
                    frame_id: rest.get_u8(),
                    command: [rest.get_u8(), rest.get_u8()],
                    parameter: rest.to_vec(),
                }
            }
            AT_RESPONSE => {
                if rest.len() < 4 {
                    return Err(too_short(5));
                }
                Frame::AtResponse {
                    frame_id: rest.get_u8(),
                    command: [rest.get_u8(), rest.get_u8()],
                    status: rest.get_u8(),
                    data: rest.to_vec(),
                }
            }
            TRANSMIT_REQUEST => {
                if rest.len() < 13 {
                    return Err(too_short(14));
                }
                let frame_id = rest.get_u8();
                let dest64 = rest.get_u64();
                rest.advance(4);
                Frame::TransmitRequest {
                    frame_id,
                    dest64,
                    payload: rest.to_vec(),
                }
            }
            TRANSMIT_STATUS => {
                if rest.len() < 6 {
                    return Err(too_short(7));
                }
                let frame_id = rest.get_u8();
                rest.advance(2);
                Frame::TransmitStatus {
                    frame_id,
                    retries: rest.get_u8(),
                    delivery_status: rest.get_u8(),
                    discovery_status: rest.get_u8(),
                }
            }
            RECEIVE_PACKET => {
                if rest.len() < 11 {
                    return Err(too_short(12));
                }
                let source64 = rest.get_u64();
                rest.advance(2);
                Frame::ReceivePacket {
                    source64,
                    options: rest.get_u8(),
                    payload: rest.to_vec(),
                }
            }
            other => Frame::Other {
                frame_type: other,
                data: rest.to_vec(),
            },
        };
        Ok(frame)
    }
}

fn checksum(data: &[u8]) -> u8 {
    0xFF - data.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

/// Codec for [`Frame`]s on a serial stream.
///
/// Bytes before a start delimiter are skipped. Frames with a bad checksum or
/// an impossible length are discarded and decoding resumes at the next
/// delimiter, so line noise never ends the stream.
#[derive(Debug, Default, Clone, Copy)]
pub struct XBeeCodec;

impl Decoder for XBeeCodec {
    type Item = Frame;
    type Error = MeshError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, MeshError> {
        loop {
            match src.iter().position(|b| *b == START_DELIMITER) {
                Some(0) => {}
                Some(start) => src.advance(start),
                None => {
                    src.clear();
                    return Ok(None);
                }
            }

            if src.len() < 3 {
                return Ok(None);
            }
            let length = u16::from_be_bytes([src[1], src[2]]) as usize;
            if length == 0 || length > MAX_FRAME_LEN {
                debug!("Skipping frame with invalid length {}", length);
                src.advance(1);
                continue;
            }
            if src.len() < length + 4 {
                src.reserve(length + 4 - src.len());
                return Ok(None);
            }

            let data = &src[3..3 + length];
            if checksum(data) != src[3 + length] {
                debug!("Skipping frame with bad checksum");
                src.advance(1);
                continue;
            }

            let frame = Frame::parse(data);
            src.advance(length + 4);
            match frame {
                Ok(frame) => return Ok(Some(frame)),
                Err(e) => debug!("Skipping frame: {}", e),
            }
        }
    }
}

impl Encoder<Frame> for XBeeCodec {
    type Error = MeshError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), MeshError> {
        let mut data = BytesMut::new();
        frame.write_data(&mut data);
        if data.len() > MAX_FRAME_LEN {
            return Err(MeshError::InvalidFrame(format!(
                "frame of {} bytes exceeds {}",
                data.len(),
                MAX_FRAME_LEN
            )));
        }

        dst.reserve(data.len() + 4);
        dst.put_u8(START_DELIMITER);
        dst.put_u16(data.len() as u16);
        dst.put_slice(&data);
        dst.put_u8(checksum(&data));
        Ok(())
    }
}

/// One answer to an `ND` (node discovery) command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfo {
    pub addr16: u16,
    pub addr64: u64,
    pub node_id: String,
}

impl NodeInfo {
    /// Parse the data of an `ND` AT response: `MY(2) SH(4) SL(4) NI\0 ...`.
    pub fn parse(data: &[u8]) -> Result<Self, MeshError> {
        if data.len() < 10 {
            return Err(MeshError::InvalidFrame(format!(
                "node discovery answer of {} bytes",
                data.len()
            )));
        }
        let mut buf = data;
        let addr16 = buf.get_u16();
        let addr64 = buf.get_u64();
        let end = buf.iter().position(|b| *b == 0).unwrap_or(buf.len());
        let node_id = String::from_utf8_lossy(&buf[..end]).into_owned();
        Ok(Self {
            addr16,
            addr64,
            node_id,
        })
    }
}
