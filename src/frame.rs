use heapless::String;

use crate::{Decode, Encode};

/// Start of transmission mark
pub const START_MARK: u8 = 1;
/// End of transmission mark
pub const END_MARK: u8 = 4;

/// Receive-side payload staging capacity. A frame declaring more than this
/// is dropped rather than buffered.
pub const PAYLOAD_CAPACITY: usize = 64;
/// Start: 1, Tag: 1, Length: 1, End: 1
pub const FRAME_OVERHEAD: usize = 4;
/// The scanner never commits to a candidate with fewer bytes than this.
pub const MIN_FRAME_LEN: usize = FRAME_OVERHEAD + 1;
pub const MAX_FRAME_LEN: usize = PAYLOAD_CAPACITY + FRAME_OVERHEAD;

/// Decoded text capacity. A payload byte above 0x7F re-encodes as two bytes
/// of UTF-8, so the worst case is twice the payload capacity.
pub const TEXT_CAPACITY: usize = 2 * PAYLOAD_CAPACITY;

/// Wire type tags. Zero is reserved for "nothing decoded" and never appears
/// on the wire, so it has no variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TypeTag {
    Char = 1,
    Int = 2,
    Byte = 3,
    Str = 4,
    Command = 254,
    Status = 255,
}

impl TypeTag {
    pub fn from_wire(tag: u8) -> Option<TypeTag> {
        match tag {
            1 => Some(TypeTag::Char),
            2 => Some(TypeTag::Int),
            3 => Some(TypeTag::Byte),
            4 => Some(TypeTag::Str),
            254 => Some(TypeTag::Command),
            255 => Some(TypeTag::Status),
            _ => None,
        }
    }
}

/// Error type for encoding and decoding frames
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    MissingStartMark,
    MissingEndMark {
        index: usize,
        found: u8,
    },
    /// The declared payload runs past the bytes actually present.
    Truncated {
        expected_at_least: usize,
        found: usize,
    },
    EncodeBufferTooSmall {
        expected: usize,
        found: usize,
    },
}

/// A framing-validated view into a byte buffer: the tag byte plus a borrow
/// of the payload. Nothing has been copied or consumed yet.
#[derive(Debug)]
pub struct RawFrame<'a> {
    pub tag: u8,
    pub payload: &'a [u8],
}

impl RawFrame<'_> {
    /// Bytes this frame occupies on the wire, marks included.
    pub fn wire_len(&self) -> usize {
        self.payload.len() + FRAME_OVERHEAD
    }
}

impl<'a> Decode<'a> for RawFrame<'a> {
    type Error = FrameError;

    fn decode(data: &'a [u8]) -> Result<Self, Self::Error> {
        if data.len() < MIN_FRAME_LEN {
            return Err(FrameError::Truncated {
                expected_at_least: MIN_FRAME_LEN,
                found: data.len(),
            });
        }
        if data[0] != START_MARK {
            return Err(FrameError::MissingStartMark);
        }
        let tag = data[1];
        let length = data[2] as usize;
        if data.len() < length + FRAME_OVERHEAD {
            return Err(FrameError::Truncated {
                expected_at_least: length + FRAME_OVERHEAD,
                found: data.len(),
            });
        }
        let end = data[length + 3];
        if end != END_MARK {
            return Err(FrameError::MissingEndMark {
                index: length + 3,
                found: end,
            });
        }
        Ok(RawFrame {
            tag,
            payload: &data[3..length + 3],
        })
    }
}

/// One decoded datagram. Exactly one variant per frame; "nothing decoded"
/// is `Option::None` at the call sites, never a variant here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Byte(u8),
    Char(char),
    Int(i16),
    Str(String<TEXT_CAPACITY>),
    Command(u8),
    Status(bool),
}

impl Value {
    pub fn tag(&self) -> TypeTag {
        match self {
            Value::Byte(_) => TypeTag::Byte,
            Value::Char(_) => TypeTag::Char,
            Value::Int(_) => TypeTag::Int,
            Value::Str(_) => TypeTag::Str,
            Value::Command(_) => TypeTag::Command,
            Value::Status(_) => TypeTag::Status,
        }
    }

    /// Build a text value, keeping as many leading characters as one frame
    /// payload can carry.
    pub fn text(s: &str) -> Value {
        let mut out = String::new();
        for c in s.chars().take(PAYLOAD_CAPACITY) {
            if out.push(c).is_err() {
                break;
            }
        }
        Value::Str(out)
    }

    /// Dispatch a framing-validated `(tag, payload)` pair to a typed value.
    ///
    /// Returns `None` for the reserved zero tag, unknown tags, an empty
    /// payload, or an INT payload shorter than two bytes. Callers treat
    /// `None` as "nothing decoded" and change no other state.
    pub fn from_payload(tag: u8, payload: &[u8]) -> Option<Value> {
        let tag = TypeTag::from_wire(tag)?;
        if payload.is_empty() {
            return None;
        }
        match tag {
            TypeTag::Byte => Some(Value::Byte(payload[0])),
            TypeTag::Char => Some(Value::Char(payload[0] as char)),
            TypeTag::Int => {
                if payload.len() < 2 {
                    return None;
                }
                Some(Value::Int(i16::from_le_bytes([payload[0], payload[1]])))
            }
            TypeTag::Str => {
                let mut s = String::new();
                for &b in payload {
                    // One 8-bit character per payload byte, sender convention.
                    s.push(b as char).ok()?;
                }
                Some(Value::Str(s))
            }
            TypeTag::Command => Some(Value::Command(payload[0])),
            TypeTag::Status => Some(Value::Status(payload[0] != 0)),
        }
    }

    fn payload_len(&self) -> usize {
        match self {
            Value::Byte(_) | Value::Char(_) | Value::Command(_) | Value::Status(_) => 1,
            Value::Int(_) => 2,
            Value::Str(s) => s.chars().count().min(PAYLOAD_CAPACITY),
        }
    }
}

impl Encode for Value {
    type Error = FrameError;

    /// Write the full wire frame and return its length. Total for every
    /// representable value; text beyond the payload capacity is truncated.
    fn encode(&self, buffer: &mut [u8]) -> Result<usize, Self::Error> {
        let length = self.payload_len();
        let total = length + FRAME_OVERHEAD;
        if buffer.len() < total {
            return Err(FrameError::EncodeBufferTooSmall {
                expected: total,
                found: buffer.len(),
            });
        }
        buffer[0] = START_MARK;
        buffer[1] = self.tag() as u8;
        buffer[2] = length as u8;
        match self {
            Value::Byte(b) | Value::Command(b) => buffer[3] = *b,
            Value::Char(c) => buffer[3] = *c as u8,
            Value::Int(n) => {
                let le = n.to_le_bytes();
                buffer[3] = le[0];
                buffer[4] = le[1];
            }
            Value::Str(s) => {
                for (i, c) in s.chars().take(length).enumerate() {
                    buffer[3 + i] = c as u8;
                }
            }
            Value::Status(running) => buffer[3] = *running as u8,
        }
        buffer[3 + length] = END_MARK;
        Ok(total)
    }
}
