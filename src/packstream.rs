//! PackStream v1 values and Bolt chunked message framing.
//!
//! Every Bolt message is a single PackStream [`Structure`] whose tag names the
//! message type. On the wire the packed bytes are split into chunks:
//!
//! - each chunk is a big-endian `u16` length followed by that many bytes,
//! - a zero-length chunk ends the message.
//!
//! Zero-length chunks seen before a message starts are keep-alive NOOPs and
//! are skipped when reading.
//!
//! # See Also
//! - [`bolt`](crate::bolt): maps structure tags to message names per protocol version.
use std::{fmt, io};

use log::trace;
use thiserror::Error;

use crate::transport::Wire;

const NULL: u8 = 0xC0;
const FLOAT_64: u8 = 0xC1;
const FALSE: u8 = 0xC2;
const TRUE: u8 = 0xC3;
const INT_8: u8 = 0xC8;
const INT_16: u8 = 0xC9;
const INT_32: u8 = 0xCA;
const INT_64: u8 = 0xCB;
const BYTES_8: u8 = 0xCC;
const BYTES_16: u8 = 0xCD;
const BYTES_32: u8 = 0xCE;
const TINY_STRING: u8 = 0x80;
const STRING_8: u8 = 0xD0;
const STRING_16: u8 = 0xD1;
const STRING_32: u8 = 0xD2;
const TINY_LIST: u8 = 0x90;
const LIST_8: u8 = 0xD4;
const LIST_16: u8 = 0xD5;
const LIST_32: u8 = 0xD6;
const TINY_MAP: u8 = 0xA0;
const MAP_8: u8 = 0xD8;
const MAP_16: u8 = 0xD9;
const MAP_32: u8 = 0xDA;
const TINY_STRUCT: u8 = 0xB0;

const MAX_CHUNK_SIZE: usize = 0xFFFF;
const MAX_STRUCT_FIELDS: usize = 15;
/// Lists, maps and structures nested deeper than this are rejected.
pub const MAX_NESTING_DEPTH: usize = 64;
/// Default cap on the de-chunked size of one incoming message.
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum PackStreamError {
    #[error("unknown marker byte 0x{0:02X}")]
    UnknownMarker(u8),

    #[error("message ended unexpectedly, needed {needed} more bytes")]
    Truncated { needed: usize },

    #[error("{0} trailing bytes after message")]
    TrailingBytes(usize),

    #[error("invalid utf-8 in string: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("map key must be a string, got {0}")]
    NonStringKey(String),

    #[error("message is not a structure: {0}")]
    NotAStructure(String),

    #[error("structure has {0} fields, at most {MAX_STRUCT_FIELDS} allowed")]
    StructTooLarge(usize),

    #[error("{0} of {1} items is too large to pack")]
    TooLarge(&'static str, usize),

    #[error("values nested deeper than {0} levels")]
    TooDeep(usize),

    #[error("message exceeds {limit} bytes")]
    MessageTooLarge { limit: usize },

    #[error("{0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    Bytes(Vec<u8>),
    String(String),
    List(Vec<Value>),
    /// Entries keep their wire order.
    Map(Vec<(String, Value)>),
    Structure(Structure),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Structure {
    pub tag: u8,
    pub fields: Vec<Value>,
}

impl Structure {
    pub fn new(tag: u8, fields: Vec<Value>) -> Self {
        Self { tag, fields }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x:?}"),
            Value::Bytes(b) => write!(f, "#{}#", crate::util::hex_repr(b)),
            Value::String(s) => write!(f, "{s:?}"),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Value::Map(entries) => {
                write!(f, "{{")?;
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{key:?}: {value}")?;
                }
                write!(f, "}}")
            }
            Value::Structure(s) => write!(f, "{s}"),
        }
    }
}

impl fmt::Display for Structure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Structure[0x{:02X}](", self.tag)?;
        for (i, field) in self.fields.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{field}")?;
        }
        write!(f, ")")
    }
}

/// Packs a single value, choosing the smallest encoding.
pub fn pack(value: &Value, out: &mut Vec<u8>) -> Result<(), PackStreamError> {
    match value {
        Value::Null => out.push(NULL),
        Value::Boolean(false) => out.push(FALSE),
        Value::Boolean(true) => out.push(TRUE),
        Value::Integer(i) => pack_integer(*i, out),
        Value::Float(x) => {
            out.push(FLOAT_64);
            out.extend_from_slice(&x.to_be_bytes());
        }
        Value::Bytes(b) => {
            match b.len() {
                n if n <= u8::MAX as usize => out.extend([BYTES_8, n as u8]),
                n if n <= u16::MAX as usize => {
                    out.push(BYTES_16);
                    out.extend_from_slice(&(n as u16).to_be_bytes());
                }
                n => {
                    out.push(BYTES_32);
                    out.extend_from_slice(&size_u32("bytes", n)?.to_be_bytes());
                }
            }
            out.extend_from_slice(b);
        }
        Value::String(s) => {
            pack_header(s.len(), TINY_STRING, [STRING_8, STRING_16, STRING_32], out)?;
            out.extend_from_slice(s.as_bytes());
        }
        Value::List(items) => {
            pack_header(items.len(), TINY_LIST, [LIST_8, LIST_16, LIST_32], out)?;
            for item in items {
                pack(item, out)?;
            }
        }
        Value::Map(entries) => {
            pack_header(entries.len(), TINY_MAP, [MAP_8, MAP_16, MAP_32], out)?;
            for (key, value) in entries {
                pack(&Value::String(key.clone()), out)?;
                pack(value, out)?;
            }
        }
        Value::Structure(s) => pack_structure(s, out)?,
    }
    Ok(())
}

pub fn pack_structure(s: &Structure, out: &mut Vec<u8>) -> Result<(), PackStreamError> {
    if s.fields.len() > MAX_STRUCT_FIELDS {
        return Err(PackStreamError::StructTooLarge(s.fields.len()));
    }
    out.push(TINY_STRUCT | s.fields.len() as u8);
    out.push(s.tag);
    for field in &s.fields {
        pack(field, out)?;
    }
    Ok(())
}

fn pack_integer(i: i64, out: &mut Vec<u8>) {
    if (-16..=127).contains(&i) {
        out.push(i as u8);
    } else if i8::try_from(i).is_ok() {
        out.extend([INT_8, i as u8]);
    } else if let Ok(v) = i16::try_from(i) {
        out.push(INT_16);
        out.extend_from_slice(&v.to_be_bytes());
    } else if let Ok(v) = i32::try_from(i) {
        out.push(INT_32);
        out.extend_from_slice(&v.to_be_bytes());
    } else {
        out.push(INT_64);
        out.extend_from_slice(&i.to_be_bytes());
    }
}

fn pack_header(
    size: usize,
    tiny: u8,
    [m8, m16, m32]: [u8; 3],
    out: &mut Vec<u8>,
) -> Result<(), PackStreamError> {
    match size {
        n if n < 0x10 => out.push(tiny | n as u8),
        n if n <= u8::MAX as usize => out.extend([m8, n as u8]),
        n if n <= u16::MAX as usize => {
            out.push(m16);
            out.extend_from_slice(&(n as u16).to_be_bytes());
        }
        n => {
            out.push(m32);
            out.extend_from_slice(&size_u32("container", n)?.to_be_bytes());
        }
    }
    Ok(())
}

fn size_u32(what: &'static str, n: usize) -> Result<u32, PackStreamError> {
    u32::try_from(n).map_err(|_| PackStreamError::TooLarge(what, n))
}

/// Cursor over the bytes of one de-chunked message.
pub struct Unpacker<'a> {
    data: &'a [u8],
    pos: usize,
    depth: usize,
}

impl<'a> Unpacker<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            depth: 0,
        }
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], PackStreamError> {
        if self.remaining() < n {
            return Err(PackStreamError::Truncated {
                needed: n - self.remaining(),
            });
        }
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn byte(&mut self) -> Result<u8, PackStreamError> {
        Ok(self.take(1)?[0])
    }

    fn be<const N: usize>(&mut self) -> Result<[u8; N], PackStreamError> {
        let mut out = [0; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn size(&mut self, marker: u8, [m8, m16, m32]: [u8; 3]) -> Result<usize, PackStreamError> {
        Ok(match marker {
            m if m == m8 => self.byte()? as usize,
            m if m == m16 => u16::from_be_bytes(self.be()?) as usize,
            m if m == m32 => u32::from_be_bytes(self.be()?) as usize,
            m => m as usize & 0x0F,
        })
    }

    /// Unpacks the items of one container one level deeper.
    fn nested<T>(
        &mut self,
        n: usize,
        mut item: impl FnMut(&mut Self) -> Result<T, PackStreamError>,
    ) -> Result<Vec<T>, PackStreamError> {
        if self.depth >= MAX_NESTING_DEPTH {
            return Err(PackStreamError::TooDeep(MAX_NESTING_DEPTH));
        }
        self.depth += 1;
        let mut items = Vec::with_capacity(n.min(self.remaining()));
        for _ in 0..n {
            items.push(item(self)?);
        }
        self.depth -= 1;
        Ok(items)
    }

    pub fn unpack(&mut self) -> Result<Value, PackStreamError> {
        let marker = self.byte()?;
        let value = match marker {
            NULL => Value::Null,
            FALSE => Value::Boolean(false),
            TRUE => Value::Boolean(true),
            FLOAT_64 => Value::Float(f64::from_be_bytes(self.be()?)),
            INT_8 => Value::Integer(self.byte()? as i8 as i64),
            INT_16 => Value::Integer(i16::from_be_bytes(self.be()?) as i64),
            INT_32 => Value::Integer(i32::from_be_bytes(self.be()?) as i64),
            INT_64 => Value::Integer(i64::from_be_bytes(self.be()?)),
            0x00..=0x7F => Value::Integer(marker as i64),
            0xF0..=0xFF => Value::Integer(marker as i8 as i64),
            BYTES_8 | BYTES_16 | BYTES_32 => {
                let n = self.size(marker, [BYTES_8, BYTES_16, BYTES_32])?;
                Value::Bytes(self.take(n)?.to_vec())
            }
            0x80..=0x8F | STRING_8 | STRING_16 | STRING_32 => {
                let n = self.size(marker, [STRING_8, STRING_16, STRING_32])?;
                Value::String(String::from_utf8(self.take(n)?.to_vec())?)
            }
            0x90..=0x9F | LIST_8 | LIST_16 | LIST_32 => {
                let n = self.size(marker, [LIST_8, LIST_16, LIST_32])?;
                Value::List(self.nested(n, Self::unpack)?)
            }
            0xA0..=0xAF | MAP_8 | MAP_16 | MAP_32 => {
                let n = self.size(marker, [MAP_8, MAP_16, MAP_32])?;
                let entries = self.nested(n, |this| {
                    let key = match this.unpack()? {
                        Value::String(key) => key,
                        other => return Err(PackStreamError::NonStringKey(other.to_string())),
                    };
                    Ok((key, this.unpack()?))
                })?;
                Value::Map(entries)
            }
            0xB0..=0xBF => {
                let n = marker as usize & 0x0F;
                let tag = self.byte()?;
                let fields = self.nested(n, Self::unpack)?;
                Value::Structure(Structure { tag, fields })
            }
            m => return Err(PackStreamError::UnknownMarker(m)),
        };
        Ok(value)
    }
}

/// Reads and writes whole Bolt messages over a [`Wire`].
#[derive(Debug)]
pub struct PackStream {
    max_chunk_size: usize,
    max_message_size: usize,
}

impl Default for PackStream {
    fn default() -> Self {
        Self {
            max_chunk_size: MAX_CHUNK_SIZE,
            max_message_size: MAX_MESSAGE_SIZE,
        }
    }
}

impl PackStream {
    pub fn with_max_chunk_size(max_chunk_size: usize) -> Self {
        assert!(max_chunk_size > 0 && max_chunk_size <= MAX_CHUNK_SIZE);
        Self {
            max_chunk_size,
            ..Default::default()
        }
    }

    pub fn max_message_size(mut self, limit: usize) -> Self {
        self.max_message_size = limit;
        self
    }

    pub fn read_message<W: Wire>(&self, wire: &mut W) -> Result<Structure, PackStreamError> {
        let mut data = Vec::new();
        loop {
            let header = wire.read(2)?;
            let size = u16::from_be_bytes([header[0], header[1]]) as usize;
            if size == 0 {
                if data.is_empty() {
                    trace!("skipping NOOP chunk");
                    continue;
                }
                break;
            }
            if data.len() + size > self.max_message_size {
                return Err(PackStreamError::MessageTooLarge {
                    limit: self.max_message_size,
                });
            }
            data.extend(wire.read(size)?);
        }

        let mut unpacker = Unpacker::new(&data);
        let value = unpacker.unpack()?;
        if unpacker.remaining() > 0 {
            return Err(PackStreamError::TrailingBytes(unpacker.remaining()));
        }
        match value {
            Value::Structure(s) => Ok(s),
            other => Err(PackStreamError::NotAStructure(other.to_string())),
        }
    }

    /// Buffers a chunked message on the wire. Nothing reaches the peer
    /// before [`PackStream::drain`].
    pub fn write_message<W: Wire>(
        &self,
        wire: &mut W,
        message: &Structure,
    ) -> Result<(), PackStreamError> {
        let mut data = Vec::new();
        pack_structure(message, &mut data)?;
        for chunk in data.chunks(self.max_chunk_size) {
            wire.write(&(chunk.len() as u16).to_be_bytes())?;
            wire.write(chunk)?;
        }
        wire.write(&[0, 0])?;
        Ok(())
    }

    pub fn drain<W: Wire>(&self, wire: &mut W) -> Result<(), PackStreamError> {
        wire.send()?;
        Ok(())
    }
}
