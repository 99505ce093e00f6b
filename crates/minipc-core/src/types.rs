//! Type tags, values, and function prototypes.
//!
//! A [`TypeTag`] fixes the wire width of a value independently of the host:
//! an `Int32` is always one word and a `Double` always two, whatever the
//! machine. Signatures are slices of tags; a [`TypeTag::None`] entry ends an
//! argument signature early and, as a return tag, means "no payload".

use std::fmt;

/// Wire type of a single argument or return value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeTag {
    /// Signature terminator, or an empty return value.
    None,
    Int32,
    UInt32,
    Int64,
    Double,
    /// UTF-8 text of at most `max_len` bytes.
    String { max_len: usize },
    /// Raw bytes of exactly `size` bytes.
    Struct { size: usize },
}

impl TypeTag {
    /// Largest number of words a value of this tag can occupy.
    pub fn max_words(self) -> usize {
        match self {
            TypeTag::None => 0,
            TypeTag::Int32 | TypeTag::UInt32 => 1,
            TypeTag::Int64 | TypeTag::Double => 2,
            TypeTag::String { max_len } => 1 + max_len.div_ceil(4),
            TypeTag::Struct { size } => size.div_ceil(4),
        }
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeTag::None => f.write_str("none"),
            TypeTag::Int32 => f.write_str("int32"),
            TypeTag::UInt32 => f.write_str("uint32"),
            TypeTag::Int64 => f.write_str("int64"),
            TypeTag::Double => f.write_str("double"),
            TypeTag::String { max_len } => write!(f, "string[{max_len}]"),
            TypeTag::Struct { size } => write!(f, "struct[{size}]"),
        }
    }
}

/// The tags of `signature` up to, not including, the first [`TypeTag::None`].
pub fn effective(signature: &[TypeTag]) -> &[TypeTag] {
    let end = signature
        .iter()
        .position(|tag| *tag == TypeTag::None)
        .unwrap_or(signature.len());
    &signature[..end]
}

/// Worst-case word count of a whole signature.
pub fn max_words(signature: &[TypeTag]) -> usize {
    effective(signature)
        .iter()
        .map(|tag| tag.max_words())
        .fold(0usize, usize::saturating_add)
}

/// A decoded argument or return value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Unit,
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    Double(f64),
    String(String),
    Struct(Vec<u8>),
}

impl Value {
    /// Short name of the value kind, used in mismatch diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Unit => "unit",
            Value::Int32(_) => "int32",
            Value::UInt32(_) => "uint32",
            Value::Int64(_) => "int64",
            Value::Double(_) => "double",
            Value::String(_) => "string",
            Value::Struct(_) => "struct",
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Value::Int32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        match self {
            Value::UInt32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Double(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Struct(b) => Some(b),
            _ => None,
        }
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int32(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::UInt32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Struct(v)
    }
}

/// Identifier and signatures of a remote function, shared by the server that
/// exports it and the clients that call it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prototype {
    pub id: u32,
    pub args: Vec<TypeTag>,
    pub ret: TypeTag,
}

impl Prototype {
    pub fn new(id: u32, args: impl Into<Vec<TypeTag>>, ret: TypeTag) -> Self {
        Self {
            id,
            args: args.into(),
            ret,
        }
    }

    /// Argument tags, stopping at the first terminator.
    pub fn arg_signature(&self) -> &[TypeTag] {
        effective(&self.args)
    }
}

/// Pack up to four ASCII bytes into an identifier, first byte most
/// significant: `ident(b"sum")` is `0x73756d00`.
pub const fn ident(tag: &[u8]) -> u32 {
    let mut id = 0u32;
    let mut i = 0;
    while i < 4 {
        let byte = if i < tag.len() { tag[i] } else { 0 };
        id = (id << 8) | byte as u32;
        i += 1;
    }
    id
}
