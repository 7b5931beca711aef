//! SPDY frame codec.
//!
//! Parses and marshals the fixed 8-byte frame header and the small
//! fixed-layout control messages (SYN_STREAM, SYN_REPLY, RST_STREAM, GOAWAY).
//! Everything here is pure: no allocation on the parse/marshall paths, all
//! multi-byte integers big-endian on the wire.
//!
//! ```text
//! Control frame header:              Data frame header:
//! +----------------------------------+   +----------------------------------+
//! |C| Version(15bits) | Type(16bits) |   |C|       Stream-ID (31bits)       |
//! +----------------------------------+   +----------------------------------+
//! | Flags (8)  |  Length (24 bits)   |   | Flags (8)  |  Length (24 bits)   |
//! +----------------------------------+   +----------------------------------+
//! ```

use crate::error::SpdyError;

pub const PROTOCOL_VERSION_2: u16 = 2;
pub const PROTOCOL_VERSION_3: u16 = 3;

/// Largest payload a 24-bit length field can declare.
pub const MAX_FRAME_LENGTH: u32 = (1 << 24) - 1;

const STREAM_ID_MASK: u32 = 0x7FFF_FFFF;
const CONTROL_BIT: u8 = 0x80;

/// SPDY control frame types
#[allow(dead_code)]
pub mod control_type {
    pub const SYN_STREAM: u16 = 1;
    pub const SYN_REPLY: u16 = 2;
    pub const RST_STREAM: u16 = 3;
    pub const SETTINGS: u16 = 4;
    pub const NOOP: u16 = 5;
    pub const PING: u16 = 6;
    pub const GOAWAY: u16 = 7;
    pub const HEADERS: u16 = 8;
    pub const WINDOW_UPDATE: u16 = 9;
}

/// SPDY frame flags
#[allow(dead_code)]
pub mod flags {
    pub const FIN: u8 = 0x01;
    pub const UNIDIRECTIONAL: u8 = 0x02;
    pub const SETTINGS_CLEAR: u8 = 0x01;
}

/// RST_STREAM status codes
#[allow(dead_code)]
pub mod status_code {
    pub const PROTOCOL_ERROR: u32 = 1;
    pub const INVALID_STREAM: u32 = 2;
    pub const REFUSED_STREAM: u32 = 3;
    pub const UNSUPPORTED_VERSION: u32 = 4;
    pub const CANCEL: u32 = 5;
    pub const FLOW_CONTROL_ERROR: u32 = 6;
    pub const STREAM_IN_USE: u32 = 7;
    pub const STREAM_ALREADY_CLOSED: u32 = 8;
}

/// Name of a control frame type, for logging.
pub fn control_type_name(frame_type: u16) -> &'static str {
    match frame_type {
        control_type::SYN_STREAM => "SYN_STREAM",
        control_type::SYN_REPLY => "SYN_REPLY",
        control_type::RST_STREAM => "RST_STREAM",
        control_type::SETTINGS => "SETTINGS",
        control_type::NOOP => "NOOP",
        control_type::PING => "PING",
        control_type::GOAWAY => "GOAWAY",
        control_type::HEADERS => "HEADERS",
        control_type::WINDOW_UPDATE => "WINDOW_UPDATE",
        _ => "UNKNOWN",
    }
}

/// Name of an RST_STREAM status code, for logging.
pub fn status_code_name(code: u32) -> &'static str {
    match code {
        status_code::PROTOCOL_ERROR => "PROTOCOL_ERROR",
        status_code::INVALID_STREAM => "INVALID_STREAM",
        status_code::REFUSED_STREAM => "REFUSED_STREAM",
        status_code::UNSUPPORTED_VERSION => "UNSUPPORTED_VERSION",
        status_code::CANCEL => "CANCEL",
        status_code::FLOW_CONTROL_ERROR => "FLOW_CONTROL_ERROR",
        status_code::STREAM_IN_USE => "STREAM_IN_USE",
        status_code::STREAM_ALREADY_CLOSED => "STREAM_ALREADY_CLOSED",
        _ => "UNKNOWN",
    }
}

#[inline]
fn read_u16(data: &[u8]) -> u16 {
    u16::from_be_bytes([data[0], data[1]])
}

#[inline]
fn read_u32(data: &[u8]) -> u32 {
    u32::from_be_bytes([data[0], data[1], data[2], data[3]])
}

#[inline]
fn read_stream_id(data: &[u8]) -> u32 {
    read_u32(data) & STREAM_ID_MASK
}

fn check_len(what: &'static str, needed: usize, available: usize) -> Result<(), SpdyError> {
    if available < needed {
        return Err(SpdyError::truncated(what, needed, available));
    }
    Ok(())
}

/// The part of the frame header that differs between control and data frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Control { version: u16, frame_type: u16 },
    Data { stream_id: u32 },
}

/// A parsed SPDY frame header (8 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub kind: FrameKind,
    pub flags: u8,
    pub datalen: u32, // 24 bits
}

impl FrameHeader {
    pub const SIZE: usize = 8;

    pub fn control(version: u16, frame_type: u16, flags: u8, datalen: u32) -> Self {
        Self {
            kind: FrameKind::Control { version, frame_type },
            flags,
            datalen,
        }
    }

    pub fn data(stream_id: u32, flags: u8, datalen: u32) -> Self {
        Self {
            kind: FrameKind::Data { stream_id },
            flags,
            datalen,
        }
    }

    /// Parse an 8-byte frame header.
    ///
    /// Only the header itself is checked; whether `datalen` bytes of payload
    /// follow is the caller's business.
    pub fn parse(data: &[u8]) -> Result<Self, SpdyError> {
        check_len("frame header", Self::SIZE, data.len())?;

        let kind = if data[0] & CONTROL_BIT != 0 {
            FrameKind::Control {
                version: read_u16(&data[0..2]) & 0x7FFF,
                frame_type: read_u16(&data[2..4]),
            }
        } else {
            FrameKind::Data {
                stream_id: read_stream_id(&data[0..4]),
            }
        };
        let word = read_u32(&data[4..8]);

        Ok(Self {
            kind,
            flags: (word >> 24) as u8,
            datalen: word & 0x00FF_FFFF,
        })
    }

    /// Write the header into the front of `out`, returning the bytes written.
    pub fn marshall(&self, out: &mut [u8]) -> Result<usize, SpdyError> {
        check_len("frame header buffer", Self::SIZE, out.len())?;
        if self.datalen > MAX_FRAME_LENGTH {
            return Err(SpdyError::FrameTooLarge {
                length: self.datalen,
                max: MAX_FRAME_LENGTH,
            });
        }

        let first = match self.kind {
            FrameKind::Control { version, frame_type } => {
                (0x8000_0000 | (u32::from(version & 0x7FFF) << 16)) | u32::from(frame_type)
            }
            FrameKind::Data { stream_id } => stream_id & STREAM_ID_MASK,
        };
        out[0..4].copy_from_slice(&first.to_be_bytes());
        out[4..8].copy_from_slice(&((u32::from(self.flags) << 24) | self.datalen).to_be_bytes());
        Ok(Self::SIZE)
    }

    /// Marshall into a fresh array.
    pub fn to_bytes(&self) -> Result<[u8; Self::SIZE], SpdyError> {
        let mut out = [0u8; Self::SIZE];
        self.marshall(&mut out)?;
        Ok(out)
    }

    pub fn is_control(&self) -> bool {
        matches!(self.kind, FrameKind::Control { .. })
    }

    /// Total frame size including header
    pub fn total_size(&self) -> usize {
        Self::SIZE + self.datalen as usize
    }

    pub fn is_fin(&self) -> bool {
        self.flags & flags::FIN != 0
    }
}

/// SYN_STREAM fixed prefix. The compressed header block follows it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SynStream {
    pub stream_id: u32,
    pub associated_id: u32,
    /// Top 3 bits of the priority byte.
    pub priority: u8,
}

impl SynStream {
    pub const SIZE: usize = 10;

    pub fn parse(data: &[u8]) -> Result<Self, SpdyError> {
        check_len("SYN_STREAM", Self::SIZE, data.len())?;
        Ok(Self {
            stream_id: read_stream_id(&data[0..4]),
            associated_id: read_stream_id(&data[4..8]),
            priority: data[8] >> 5,
            // data[9] is unused
        })
    }

    pub fn marshall(&self, out: &mut [u8]) -> Result<usize, SpdyError> {
        check_len("SYN_STREAM buffer", Self::SIZE, out.len())?;
        out[0..4].copy_from_slice(&(self.stream_id & STREAM_ID_MASK).to_be_bytes());
        out[4..8].copy_from_slice(&(self.associated_id & STREAM_ID_MASK).to_be_bytes());
        out[8] = (self.priority & 0x07) << 5;
        out[9] = 0;
        Ok(Self::SIZE)
    }
}

/// SYN_REPLY fixed prefix, also the layout of the HEADERS prefix.
///
/// Version 2 pads the stream id with two unused bytes; version 3 does not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SynReply {
    pub stream_id: u32,
}

impl SynReply {
    pub fn size(version: u16) -> usize {
        if version < PROTOCOL_VERSION_3 {
            6
        } else {
            4
        }
    }

    pub fn parse(version: u16, data: &[u8]) -> Result<Self, SpdyError> {
        check_len("SYN_REPLY", Self::size(version), data.len())?;
        Ok(Self {
            stream_id: read_stream_id(&data[0..4]),
        })
    }

    pub fn marshall(&self, version: u16, out: &mut [u8]) -> Result<usize, SpdyError> {
        let size = Self::size(version);
        check_len("SYN_REPLY buffer", size, out.len())?;
        out[0..4].copy_from_slice(&(self.stream_id & STREAM_ID_MASK).to_be_bytes());
        out[4..size].fill(0);
        Ok(size)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RstStream {
    pub stream_id: u32,
    pub status_code: u32,
}

impl RstStream {
    pub const SIZE: usize = 8;

    pub fn parse(data: &[u8]) -> Result<Self, SpdyError> {
        check_len("RST_STREAM", Self::SIZE, data.len())?;
        Ok(Self {
            stream_id: read_stream_id(&data[0..4]),
            status_code: read_u32(&data[4..8]),
        })
    }

    pub fn marshall(&self, out: &mut [u8]) -> Result<usize, SpdyError> {
        check_len("RST_STREAM buffer", Self::SIZE, out.len())?;
        out[0..4].copy_from_slice(&(self.stream_id & STREAM_ID_MASK).to_be_bytes());
        out[4..8].copy_from_slice(&self.status_code.to_be_bytes());
        Ok(Self::SIZE)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GoAway {
    pub last_stream_id: u32,
    pub status_code: u32,
}

impl GoAway {
    pub const SIZE: usize = 8;

    pub fn parse(data: &[u8]) -> Result<Self, SpdyError> {
        check_len("GOAWAY", Self::SIZE, data.len())?;
        Ok(Self {
            last_stream_id: read_stream_id(&data[0..4]),
            status_code: read_u32(&data[4..8]),
        })
    }

    pub fn marshall(&self, out: &mut [u8]) -> Result<usize, SpdyError> {
        check_len("GOAWAY buffer", Self::SIZE, out.len())?;
        out[0..4].copy_from_slice(&(self.last_stream_id & STREAM_ID_MASK).to_be_bytes());
        out[4..8].copy_from_slice(&self.status_code.to_be_bytes());
        Ok(Self::SIZE)
    }
}

/// Create a complete RST_STREAM frame
pub fn create_rst_stream(version: u16, stream_id: u32, status_code: u32) -> Result<Vec<u8>, SpdyError> {
    let mut frame = vec![0u8; FrameHeader::SIZE + RstStream::SIZE];
    let header = FrameHeader::control(version, control_type::RST_STREAM, 0, RstStream::SIZE as u32);
    let rst = RstStream {
        stream_id,
        status_code,
    };
    header.marshall(&mut frame)?;
    rst.marshall(&mut frame[FrameHeader::SIZE..])?;
    Ok(frame)
}

/// Create a complete GOAWAY frame
pub fn create_goaway(version: u16, last_stream_id: u32, status_code: u32) -> Result<Vec<u8>, SpdyError> {
    let mut frame = vec![0u8; FrameHeader::SIZE + GoAway::SIZE];
    let header = FrameHeader::control(version, control_type::GOAWAY, 0, GoAway::SIZE as u32);
    let goaway = GoAway {
        last_stream_id,
        status_code,
    };
    header.marshall(&mut frame)?;
    goaway.marshall(&mut frame[FrameHeader::SIZE..])?;
    Ok(frame)
}

/// Create a complete data frame carrying `payload`.
pub fn create_data_frame(stream_id: u32, flags: u8, payload: &[u8]) -> Result<Vec<u8>, SpdyError> {
    let datalen = u32::try_from(payload.len()).unwrap_or(u32::MAX);
    let header = FrameHeader::data(stream_id, flags, datalen).to_bytes()?;
    let mut frame = Vec::with_capacity(FrameHeader::SIZE + payload.len());
    frame.extend_from_slice(&header);
    frame.extend_from_slice(payload);
    Ok(frame)
}
