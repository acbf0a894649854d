//! Amplifier wire codec.
//!
//! Every datagram is a 10-byte big-endian header followed by a 4-byte ASCII
//! command code and a command-specific payload:
//!
//! ```text
//! 0      2        4          6          8              10     14
//! +------+--------+----------+----------+--------------+------+---------+
//! | 5E41 | subTyp | sequence | reserved | chunk length | code | payload |
//! +------+--------+----------+----------+--------------+------+---------+
//! ```
//!
//! `chunk length` counts every byte after the header (code + payload).

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

/// Protocol identifier carried by every packet.
pub const PROTOCOL_ID: u16 = 0x5E41;

/// Sub-type of packets we transmit.
pub const SUB_TYPE_MASTER: u16 = 0x0001;

/// Sub-type the device uses in replies.
pub const SUB_TYPE_SLAVE: u16 = 0x0100;

/// Header length in bytes.
pub const HEADER_LEN: usize = 10;

/// Command code length in bytes.
pub const CODE_LEN: usize = 4;

/// Offset of the payload within a datagram.
pub const PAYLOAD_OFFSET: usize = HEADER_LEN + CODE_LEN;

/// Object ID stride between zone preset objects.
pub const ZONE_OBJECT_STRIDE: u16 = 26;

/// Device-level preset recall object.
pub const PRESET_RECALL_OBJECT_ID: u16 = 0x0001;

/// Payload offset of zone 0's block in a zone-state SYNC reply.
pub const SYNC_ZONE_OFFSET: usize = 17;

/// Distance between consecutive zone blocks in a zone-state SYNC reply.
pub const SYNC_ZONE_STRIDE: usize = 15;

/// Mute flags written for a soft mute.
pub const ZONE_MUTE_FLAG: u8 = 0x01;

/// Size of one preset record in a preset SYNC reply (validity + name).
pub const PRESET_RECORD_LEN: usize = 33;

/// Maximum preset records in a preset SYNC reply.
pub const MAX_PRESET_RECORDS: usize = 8;

/// Codec errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("Not enough data: needed {needed}, available {available}")]
    NotEnoughData { needed: usize, available: usize },

    #[error("Invalid protocol id: 0x{0:04X}")]
    InvalidProtocolId(u16),

    #[error("Chunk length {declared} exceeds datagram ({available} bytes after header)")]
    ChunkLengthMismatch { declared: usize, available: usize },
}

/// Command codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandCode {
    /// Liveness probe
    Ping,
    /// Device identity query
    What,
    /// Global object read/write
    Gobj,
    /// Preset object read/write
    Pobj,
    /// Bulk state read
    Sync,
    /// Acknowledgement
    Ackn,
    /// Negative acknowledgement
    Nack,
}

impl CommandCode {
    /// The 4 ASCII bytes on the wire.
    pub fn as_bytes(&self) -> &'static [u8; 4] {
        match self {
            CommandCode::Ping => b"PING",
            CommandCode::What => b"WHAT",
            CommandCode::Gobj => b"GOBJ",
            CommandCode::Pobj => b"POBJ",
            CommandCode::Sync => b"SYNC",
            CommandCode::Ackn => b"ACKN",
            CommandCode::Nack => b"NACK",
        }
    }

    /// Parse 4 wire bytes.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        match bytes {
            b"PING" => Some(CommandCode::Ping),
            b"WHAT" => Some(CommandCode::What),
            b"GOBJ" => Some(CommandCode::Gobj),
            b"POBJ" => Some(CommandCode::Pobj),
            b"SYNC" => Some(CommandCode::Sync),
            b"ACKN" => Some(CommandCode::Ackn),
            b"NACK" => Some(CommandCode::Nack),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CommandCode::Ping => "PING",
            CommandCode::What => "WHAT",
            CommandCode::Gobj => "GOBJ",
            CommandCode::Pobj => "POBJ",
            CommandCode::Sync => "SYNC",
            CommandCode::Ackn => "ACKN",
            CommandCode::Nack => "NACK",
        }
    }
}

impl std::fmt::Display for CommandCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// SYNC read selectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SyncType {
    /// Preset names and validity
    Presets = 101,
    /// Live zone gain and mute state
    Zones = 102,
}

/// Packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub protocol_id: u16,
    pub sub_type: u16,
    pub sequence: u16,
    pub reserved: u16,
    pub chunk_length: u16,
}

impl PacketHeader {
    /// Header for a packet we transmit.
    pub fn master(sequence: u16, chunk_length: u16) -> Self {
        Self {
            protocol_id: PROTOCOL_ID,
            sub_type: SUB_TYPE_MASTER,
            sequence,
            reserved: 0,
            chunk_length,
        }
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u16(self.protocol_id);
        buf.put_u16(self.sub_type);
        buf.put_u16(self.sequence);
        buf.put_u16(self.reserved);
        buf.put_u16(self.chunk_length);
    }

    pub fn decode(buf: &mut impl Buf) -> Result<Self, CodecError> {
        if buf.remaining() < HEADER_LEN {
            return Err(CodecError::NotEnoughData {
                needed: HEADER_LEN,
                available: buf.remaining(),
            });
        }
        Ok(Self {
            protocol_id: buf.get_u16(),
            sub_type: buf.get_u16(),
            sequence: buf.get_u16(),
            reserved: buf.get_u16(),
            chunk_length: buf.get_u16(),
        })
    }
}

/// Preset object ID for a 0-based zone index, `None` past the 16-bit id space.
pub fn zone_object_id(zone_index: u16) -> Option<u16> {
    zone_index
        .checked_add(1)?
        .checked_mul(ZONE_OBJECT_STRIDE)
}

/// An outgoing request without its sequence number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub code: CommandCode,
    pub payload: Bytes,
}

impl Request {
    fn new(code: CommandCode, payload: impl Into<Bytes>) -> Self {
        Self {
            code,
            payload: payload.into(),
        }
    }

    /// Liveness probe.
    pub fn ping() -> Self {
        Self::new(CommandCode::Ping, Bytes::new())
    }

    /// Identity query.
    pub fn what() -> Self {
        Self::new(CommandCode::What, Bytes::new())
    }

    /// Bulk state read.
    pub fn sync(sync_type: SyncType) -> Self {
        Self::new(CommandCode::Sync, vec![sync_type as u8])
    }

    /// Write a zone's live gain and mute flags without committing to NV memory.
    ///
    /// Layout: is-read(0), preset number(0 = live), object id, nv-commit(0),
    /// lut index, mute flags, checksum(0).
    pub fn zone_write(object_id: u16, lut_index: u8, mute_flags: u8) -> Self {
        let mut payload = BytesMut::with_capacity(8);
        payload.put_u8(0);
        payload.put_u8(0);
        payload.put_u16(object_id);
        payload.put_u8(0);
        payload.put_u8(lut_index);
        payload.put_u8(mute_flags);
        payload.put_u8(0);
        Self::new(CommandCode::Pobj, payload.freeze())
    }

    /// Write a global object without committing to NV memory.
    pub fn global_write(object_id: u16, data: &[u8]) -> Self {
        let mut payload = BytesMut::with_capacity(4 + data.len());
        payload.put_u8(0);
        payload.put_u16(object_id);
        payload.put_u8(0);
        payload.put_slice(data);
        Self::new(CommandCode::Gobj, payload.freeze())
    }

    /// Recall a stored preset by 0-based index.
    pub fn preset_recall(preset_index: u8) -> Self {
        Self::global_write(PRESET_RECALL_OBJECT_ID, &[preset_index])
    }

    /// Encode with a sequence number.
    pub fn encode(&self, sequence: u16) -> Bytes {
        let chunk_length = (CODE_LEN + self.payload.len()) as u16;
        let mut buf = BytesMut::with_capacity(HEADER_LEN + chunk_length as usize);
        PacketHeader::master(sequence, chunk_length).encode(&mut buf);
        buf.put_slice(self.code.as_bytes());
        buf.put_slice(&self.payload);
        buf.freeze()
    }
}

/// NACK cause reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NackCause(pub u32);

impl NackCause {
    /// Human readable cause.
    pub fn description(&self) -> &'static str {
        match self.0 {
            0x0003_0001 => "corrupt packet",
            0x0003_0002 => "bad global object id",
            0x0003_0003 => "non-volatile memory operation failed",
            0x0003_0004 => "RAM operation failed",
            0x0003_0005 => "incorrect hardware state",
            _ => "unknown cause",
        }
    }
}

impl std::fmt::Display for NackCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:08X} ({})", self.0, self.description())
    }
}

/// How a response relates to the request that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseOutcome {
    /// Same code as the request, or ACKN
    Ack,
    /// Device refused
    Nack(NackCause),
    /// Anything else
    Unexpected(String),
}

/// A decoded datagram from the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub header: PacketHeader,
    pub code: [u8; 4],
    pub payload: Bytes,
}

impl Response {
    pub fn decode(datagram: &[u8]) -> Result<Self, CodecError> {
        if datagram.len() < PAYLOAD_OFFSET {
            return Err(CodecError::NotEnoughData {
                needed: PAYLOAD_OFFSET,
                available: datagram.len(),
            });
        }

        let mut buf = datagram;
        let header = PacketHeader::decode(&mut buf)?;
        if header.protocol_id != PROTOCOL_ID {
            return Err(CodecError::InvalidProtocolId(header.protocol_id));
        }

        // The chunk length bounds the payload when it is consistent; some
        // firmware pads datagrams, so trailing bytes are dropped.
        let available = buf.remaining();
        let declared = header.chunk_length as usize;
        if declared > available {
            return Err(CodecError::ChunkLengthMismatch {
                declared,
                available,
            });
        }

        let mut code = [0u8; 4];
        buf.copy_to_slice(&mut code);
        let payload_len = declared.saturating_sub(CODE_LEN);
        let payload = Bytes::copy_from_slice(&buf[..payload_len]);

        Ok(Self {
            header,
            code,
            payload,
        })
    }

    /// Parsed command code, if known.
    pub fn command_code(&self) -> Option<CommandCode> {
        CommandCode::from_bytes(&self.code)
    }

    /// Command code as text.
    pub fn code_str(&self) -> String {
        String::from_utf8_lossy(&self.code).into_owned()
    }

    /// Classify against the request code.
    pub fn outcome(&self, request: CommandCode) -> ResponseOutcome {
        match self.command_code() {
            Some(CommandCode::Nack) => {
                let cause = if self.payload.len() >= 4 {
                    (&self.payload[..4]).get_u32()
                } else {
                    0
                };
                ResponseOutcome::Nack(NackCause(cause))
            }
            Some(CommandCode::Ackn) => ResponseOutcome::Ack,
            Some(code) if code == request => ResponseOutcome::Ack,
            _ => ResponseOutcome::Unexpected(self.code_str()),
        }
    }
}

/// One zone's state from a zone-state SYNC reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneReading {
    pub zone_index: u16,
    pub lut_index: u8,
    pub mute_flags: u8,
}

impl ZoneReading {
    pub fn muted(&self) -> bool {
        self.mute_flags != 0
    }
}

/// Read one zone's block from a zone-state SYNC payload.
pub fn parse_zone_reading(payload: &[u8], zone_index: u16) -> Result<ZoneReading, CodecError> {
    let offset = SYNC_ZONE_OFFSET + SYNC_ZONE_STRIDE * zone_index as usize;
    if payload.len() < offset + 2 {
        return Err(CodecError::NotEnoughData {
            needed: offset + 2,
            available: payload.len(),
        });
    }
    Ok(ZoneReading {
        zone_index,
        lut_index: payload[offset],
        mute_flags: payload[offset + 1],
    })
}

/// One preset record from a preset SYNC reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresetRecord {
    /// 1-based preset number
    pub number: u8,
    pub valid: bool,
    pub name: String,
}

/// Read up to eight preset records from a preset SYNC payload.
pub fn parse_preset_records(payload: &[u8]) -> Vec<PresetRecord> {
    payload
        .chunks_exact(PRESET_RECORD_LEN)
        .take(MAX_PRESET_RECORDS)
        .enumerate()
        .map(|(i, record)| {
            let name_bytes = &record[1..];
            let end = name_bytes
                .iter()
                .rposition(|&b| b != 0)
                .map_or(0, |p| p + 1);
            PresetRecord {
                number: i as u8 + 1,
                valid: record[0] != 0,
                name: String::from_utf8_lossy(&name_bytes[..end]).into_owned(),
            }
        })
        .collect()
}
