//! Signature-driven encoding of values to and from 32-bit words.
//!
//! | tag        | words                                   |
//! |------------|-----------------------------------------|
//! | int32      | 1                                       |
//! | uint32     | 1                                       |
//! | int64      | 2, most significant word first          |
//! | double     | 2, IEEE-754 bits, most significant first|
//! | string[n]  | byte length, then ⌈len/4⌉ packed words  |
//! | struct[n]  | ⌈n/4⌉ packed words                      |
//!
//! Bytes are packed in order into big-endian words and zero padded, so the
//! wire carries them exactly as they appear in memory on the sender. Decoding
//! never trusts a length word further than the words actually received.

use byteorder::{BigEndian, ByteOrder};

use crate::protocol::{Fault, MAX_PAYLOAD_WORDS};
use crate::types::{TypeTag, Value, effective};

/// Encoding or decoding failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("argument {position}: expected {expected}, got {found}")]
    EncodingMismatch {
        position: usize,
        expected: TypeTag,
        found: &'static str,
    },

    #[error("argument {position}: struct of {found} bytes, expected {expected}")]
    StructSize {
        position: usize,
        expected: usize,
        found: usize,
    },

    #[error("argument {position}: string is not valid UTF-8")]
    InvalidUtf8 { position: usize },

    #[error("expected {expected} value(s), got {found}")]
    ArgumentCount { expected: usize, found: usize },

    #[error("{extra} trailing word(s) after the last argument")]
    TrailingWords { extra: usize },

    #[error("argument {position}: needs {needed} more word(s), only {available} left")]
    TruncatedMessage {
        position: usize,
        needed: usize,
        available: usize,
    },

    #[error("argument {position}: field claims {claimed}, limit is {limit}")]
    OversizedField {
        position: usize,
        claimed: usize,
        limit: usize,
    },

    #[error("payload of {words} words exceeds the message capacity")]
    PayloadTooLarge { words: usize },
}

impl CodecError {
    /// Detail word reported to the caller in a `MalformedArguments` response.
    pub fn fault(&self) -> Fault {
        match self {
            CodecError::TruncatedMessage { .. } => Fault::Truncated,
            CodecError::OversizedField { .. } | CodecError::PayloadTooLarge { .. } => {
                Fault::Oversized
            }
            CodecError::EncodingMismatch { .. }
            | CodecError::StructSize { .. }
            | CodecError::InvalidUtf8 { .. }
            | CodecError::ArgumentCount { .. }
            | CodecError::TrailingWords { .. } => Fault::Mismatch,
        }
    }
}

/// Encode `values` according to `signature`.
pub fn marshal_args(signature: &[TypeTag], values: &[Value]) -> Result<Vec<u32>, CodecError> {
    let signature = effective(signature);
    if signature.len() != values.len() {
        return Err(CodecError::ArgumentCount {
            expected: signature.len(),
            found: values.len(),
        });
    }
    let mut words = Vec::new();
    for (position, (tag, value)) in signature.iter().zip(values).enumerate() {
        encode_value(&mut words, position, *tag, value)?;
    }
    check_payload(words)
}

/// Decode the words of a request according to `signature`.
pub fn unmarshal_args(signature: &[TypeTag], words: &[u32]) -> Result<Vec<Value>, CodecError> {
    let mut reader = WordReader::new(words)?;
    let values = effective(signature)
        .iter()
        .enumerate()
        .map(|(position, tag)| reader.decode(position, *tag))
        .collect::<Result<Vec<_>, _>>()?;
    reader.finish()?;
    Ok(values)
}

/// Encode a return value; a `None` tag takes [`Value::Unit`] and yields no words.
pub fn marshal_ret(tag: TypeTag, value: &Value) -> Result<Vec<u32>, CodecError> {
    let mut words = Vec::new();
    encode_value(&mut words, 0, tag, value)?;
    check_payload(words)
}

/// Decode the payload of a successful response.
pub fn unmarshal_ret(tag: TypeTag, words: &[u32]) -> Result<Value, CodecError> {
    let mut reader = WordReader::new(words)?;
    let value = reader.decode(0, tag)?;
    reader.finish()?;
    Ok(value)
}

fn check_payload(words: Vec<u32>) -> Result<Vec<u32>, CodecError> {
    if words.len() > MAX_PAYLOAD_WORDS {
        return Err(CodecError::PayloadTooLarge { words: words.len() });
    }
    Ok(words)
}

fn encode_value(
    out: &mut Vec<u32>,
    position: usize,
    tag: TypeTag,
    value: &Value,
) -> Result<(), CodecError> {
    match (tag, value) {
        (TypeTag::None, Value::Unit) => {}
        (TypeTag::Int32, Value::Int32(v)) => out.push(*v as u32),
        (TypeTag::UInt32, Value::UInt32(v)) => out.push(*v),
        (TypeTag::Int64, Value::Int64(v)) => push_u64(out, *v as u64),
        (TypeTag::Double, Value::Double(v)) => push_u64(out, v.to_bits()),
        (TypeTag::String { max_len }, Value::String(s)) => {
            if s.len() > max_len {
                return Err(CodecError::OversizedField {
                    position,
                    claimed: s.len(),
                    limit: max_len,
                });
            }
            out.push(s.len() as u32);
            push_bytes(out, s.as_bytes());
        }
        (TypeTag::Struct { size }, Value::Struct(bytes)) => {
            if bytes.len() > size {
                return Err(CodecError::OversizedField {
                    position,
                    claimed: bytes.len(),
                    limit: size,
                });
            }
            if bytes.len() != size {
                return Err(CodecError::StructSize {
                    position,
                    expected: size,
                    found: bytes.len(),
                });
            }
            push_bytes(out, bytes);
        }
        (expected, found) => {
            return Err(CodecError::EncodingMismatch {
                position,
                expected,
                found: found.kind(),
            });
        }
    }
    Ok(())
}

fn push_u64(out: &mut Vec<u32>, v: u64) {
    out.push((v >> 32) as u32);
    out.push(v as u32);
}

fn push_bytes(out: &mut Vec<u32>, bytes: &[u8]) {
    for chunk in bytes.chunks(4) {
        let mut word = [0u8; 4];
        word[..chunk.len()].copy_from_slice(chunk);
        out.push(BigEndian::read_u32(&word));
    }
}

/// Cursor over received words; every read is bounds-checked.
struct WordReader<'a> {
    words: &'a [u32],
}

impl<'a> WordReader<'a> {
    fn new(words: &'a [u32]) -> Result<Self, CodecError> {
        if words.len() > MAX_PAYLOAD_WORDS {
            return Err(CodecError::PayloadTooLarge { words: words.len() });
        }
        Ok(Self { words })
    }

    fn take(&mut self, position: usize, n: usize) -> Result<&'a [u32], CodecError> {
        if n > self.words.len() {
            return Err(CodecError::TruncatedMessage {
                position,
                needed: n,
                available: self.words.len(),
            });
        }
        let (head, rest) = self.words.split_at(n);
        self.words = rest;
        Ok(head)
    }

    fn take_u64(&mut self, position: usize) -> Result<u64, CodecError> {
        let w = self.take(position, 2)?;
        Ok((u64::from(w[0]) << 32) | u64::from(w[1]))
    }

    fn take_bytes(&mut self, position: usize, len: usize) -> Result<Vec<u8>, CodecError> {
        let words = self.take(position, len.div_ceil(4))?;
        let mut bytes = vec![0u8; words.len() * 4];
        BigEndian::write_u32_into(words, &mut bytes);
        bytes.truncate(len);
        Ok(bytes)
    }

    fn decode(&mut self, position: usize, tag: TypeTag) -> Result<Value, CodecError> {
        let value = match tag {
            TypeTag::None => Value::Unit,
            TypeTag::Int32 => Value::Int32(self.take(position, 1)?[0] as i32),
            TypeTag::UInt32 => Value::UInt32(self.take(position, 1)?[0]),
            TypeTag::Int64 => Value::Int64(self.take_u64(position)? as i64),
            TypeTag::Double => Value::Double(f64::from_bits(self.take_u64(position)?)),
            TypeTag::String { max_len } => {
                let len = self.take(position, 1)?[0] as usize;
                if len > max_len {
                    return Err(CodecError::OversizedField {
                        position,
                        claimed: len,
                        limit: max_len,
                    });
                }
                // The length word is untrusted: bound it by what was received
                let needed = len.div_ceil(4);
                if needed > self.words.len() {
                    return Err(CodecError::OversizedField {
                        position,
                        claimed: len,
                        limit: self.words.len() * 4,
                    });
                }
                let bytes = self.take_bytes(position, len)?;
                Value::String(
                    String::from_utf8(bytes).map_err(|_| CodecError::InvalidUtf8 { position })?,
                )
            }
            TypeTag::Struct { size } => Value::Struct(self.take_bytes(position, size)?),
        };
        Ok(value)
    }

    fn finish(self) -> Result<(), CodecError> {
        if self.words.is_empty() {
            Ok(())
        } else {
            Err(CodecError::TrailingWords {
                extra: self.words.len(),
            })
        }
    }
}
