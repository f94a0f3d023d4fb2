//! Sequential byte cursor used by schemas and custom hooks.
//!
//! `StreamReader`/`StreamWriter` wrap any `Read`/`Write`, count bytes, and add
//! the typed primitives the engine needs on top of `byteorder`.

use crate::value::{NumericType, Value};
use byteorder::{BigEndian, LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Endianness {
    #[default]
    Little,
    Big,
}

/// Per-field byte order override.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FieldEndian {
    #[default]
    Inherit,
    Little,
    Big,
}

impl FieldEndian {
    /// The field's own order, or the owning structure's when inheriting.
    pub fn resolve(self, structure: Endianness) -> Endianness {
        match self {
            FieldEndian::Inherit => structure,
            FieldEndian::Little => Endianness::Little,
            FieldEndian::Big => Endianness::Big,
        }
    }
}

impl From<Endianness> for FieldEndian {
    fn from(e: Endianness) -> Self {
        match e {
            Endianness::Little => FieldEndian::Little,
            Endianness::Big => FieldEndian::Big,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StringEncoding {
    #[default]
    Ascii,
    Utf16Le,
    Utf16Be,
}

impl StringEncoding {
    /// Bytes per encoded unit.
    pub fn unit_size(self) -> usize {
        match self {
            StringEncoding::Ascii => 1,
            StringEncoding::Utf16Le | StringEncoding::Utf16Be => 2,
        }
    }

    /// Number of units `s` occupies on the wire, terminator excluded.
    pub fn unit_count(self, s: &str) -> usize {
        match self {
            StringEncoding::Ascii => s.chars().count(),
            StringEncoding::Utf16Le | StringEncoding::Utf16Be => s.encode_utf16().count(),
        }
    }

    fn encode(self, s: &str) -> Vec<u16> {
        match self {
            StringEncoding::Ascii => s
                .chars()
                .map(|c| if c.is_ascii() { c as u16 } else { b'?' as u16 })
                .collect(),
            StringEncoding::Utf16Le | StringEncoding::Utf16Be => s.encode_utf16().collect(),
        }
    }

    fn decode(self, units: &[u16]) -> String {
        match self {
            StringEncoding::Ascii => units
                .iter()
                .map(|&u| if u < 0x80 { u as u8 as char } else { '\u{FFFD}' })
                .collect(),
            StringEncoding::Utf16Le | StringEncoding::Utf16Be => String::from_utf16_lossy(units),
        }
    }
}

/// Largest count an unsigned prefix of `bits` can carry.
pub fn prefix_max(bits: u32) -> u64 {
    match bits {
        8 => u8::MAX as u64,
        16 => u16::MAX as u64,
        32 => u32::MAX as u64,
        _ => u64::MAX,
    }
}

fn bad_prefix(bits: u32) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidInput,
        format!("unsupported length prefix of {bits} bits"),
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Read,
    Write,
}

/// What a condition predicate sees of the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamContext {
    pub direction: Direction,
    pub position: u64,
}

pub struct StreamReader<'a> {
    inner: &'a mut dyn Read,
    position: u64,
}

impl<'a> StreamReader<'a> {
    pub fn new(inner: &'a mut dyn Read) -> Self {
        StreamReader { inner, position: 0 }
    }

    /// Bytes consumed so far.
    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn context(&self) -> StreamContext {
        StreamContext {
            direction: Direction::Read,
            position: self.position,
        }
    }

    pub fn read_number(&mut self, ty: NumericType, endian: Endianness) -> io::Result<Value> {
        let big = endian == Endianness::Big;
        Ok(match ty {
            NumericType::I8 => Value::I8(self.read_i8()?),
            NumericType::U8 => Value::U8(self.read_u8()?),
            NumericType::I16 => Value::I16(if big {
                self.read_i16::<BigEndian>()?
            } else {
                self.read_i16::<LittleEndian>()?
            }),
            NumericType::U16 => Value::U16(if big {
                self.read_u16::<BigEndian>()?
            } else {
                self.read_u16::<LittleEndian>()?
            }),
            NumericType::I32 => Value::I32(if big {
                self.read_i32::<BigEndian>()?
            } else {
                self.read_i32::<LittleEndian>()?
            }),
            NumericType::U32 => Value::U32(if big {
                self.read_u32::<BigEndian>()?
            } else {
                self.read_u32::<LittleEndian>()?
            }),
            NumericType::I64 => Value::I64(if big {
                self.read_i64::<BigEndian>()?
            } else {
                self.read_i64::<LittleEndian>()?
            }),
            NumericType::U64 => Value::U64(if big {
                self.read_u64::<BigEndian>()?
            } else {
                self.read_u64::<LittleEndian>()?
            }),
            NumericType::F32 => Value::Float(if big {
                self.read_f32::<BigEndian>()?
            } else {
                self.read_f32::<LittleEndian>()?
            }),
            NumericType::F64 => Value::Double(if big {
                self.read_f64::<BigEndian>()?
            } else {
                self.read_f64::<LittleEndian>()?
            }),
        })
    }

    pub fn read_bool(&mut self) -> io::Result<bool> {
        Ok(self.read_u8()? != 0)
    }

    /// Reads an unsigned length prefix.
    pub fn read_length(&mut self, bits: u32, endian: Endianness) -> io::Result<u64> {
        let ty = match bits {
            8 => NumericType::U8,
            16 => NumericType::U16,
            32 => NumericType::U32,
            64 => NumericType::U64,
            _ => return Err(bad_prefix(bits)),
        };
        let v = self.read_number(ty, endian)?;
        v.as_u64().ok_or_else(|| bad_prefix(bits))
    }

    fn read_unit(&mut self, encoding: StringEncoding) -> io::Result<u16> {
        match encoding {
            StringEncoding::Ascii => Ok(self.read_u8()? as u16),
            StringEncoding::Utf16Le => self.read_u16::<LittleEndian>(),
            StringEncoding::Utf16Be => self.read_u16::<BigEndian>(),
        }
    }

    /// Reads exactly `units` units; the text ends at the first zero unit.
    pub fn read_string(&mut self, encoding: StringEncoding, units: usize) -> io::Result<String> {
        let mut buf = Vec::new();
        for _ in 0..units {
            buf.push(self.read_unit(encoding)?);
        }
        if let Some(end) = buf.iter().position(|&u| u == 0) {
            buf.truncate(end);
        }
        Ok(encoding.decode(&buf))
    }

    /// Reads units up to and including a zero terminator.
    pub fn read_cstring(&mut self, encoding: StringEncoding) -> io::Result<String> {
        let mut buf = Vec::new();
        loop {
            let u = self.read_unit(encoding)?;
            if u == 0 {
                break;
            }
            buf.push(u);
        }
        Ok(encoding.decode(&buf))
    }
}

impl Read for StreamReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.position += n as u64;
        Ok(n)
    }
}

pub struct StreamWriter<'a> {
    inner: &'a mut dyn Write,
    position: u64,
}

impl<'a> StreamWriter<'a> {
    pub fn new(inner: &'a mut dyn Write) -> Self {
        StreamWriter { inner, position: 0 }
    }

    /// Bytes emitted so far.
    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn context(&self) -> StreamContext {
        StreamContext {
            direction: Direction::Write,
            position: self.position,
        }
    }

    /// Writes a numeric value as-is; the caller casts it to the wire type first.
    pub fn write_number(&mut self, v: &Value, endian: Endianness) -> io::Result<()> {
        let big = endian == Endianness::Big;
        match *v {
            Value::I8(x) => self.write_i8(x),
            Value::U8(x) => self.write_u8(x),
            Value::I16(x) if big => self.write_i16::<BigEndian>(x),
            Value::I16(x) => self.write_i16::<LittleEndian>(x),
            Value::U16(x) if big => self.write_u16::<BigEndian>(x),
            Value::U16(x) => self.write_u16::<LittleEndian>(x),
            Value::I32(x) if big => self.write_i32::<BigEndian>(x),
            Value::I32(x) => self.write_i32::<LittleEndian>(x),
            Value::U32(x) if big => self.write_u32::<BigEndian>(x),
            Value::U32(x) => self.write_u32::<LittleEndian>(x),
            Value::I64(x) if big => self.write_i64::<BigEndian>(x),
            Value::I64(x) => self.write_i64::<LittleEndian>(x),
            Value::U64(x) if big => self.write_u64::<BigEndian>(x),
            Value::U64(x) => self.write_u64::<LittleEndian>(x),
            Value::Float(x) if big => self.write_f32::<BigEndian>(x),
            Value::Float(x) => self.write_f32::<LittleEndian>(x),
            Value::Double(x) if big => self.write_f64::<BigEndian>(x),
            Value::Double(x) => self.write_f64::<LittleEndian>(x),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "not a numeric value",
            )),
        }
    }

    pub fn write_bool(&mut self, b: bool) -> io::Result<()> {
        self.write_u8(b as u8)
    }

    /// Writes an unsigned length prefix, truncated to `bits`.
    pub fn write_length(&mut self, bits: u32, endian: Endianness, n: u64) -> io::Result<()> {
        let v = match bits {
            8 => Value::U8(n as u8),
            16 => Value::U16(n as u16),
            32 => Value::U32(n as u32),
            64 => Value::U64(n),
            _ => return Err(bad_prefix(bits)),
        };
        self.write_number(&v, endian)
    }

    fn write_units(&mut self, encoding: StringEncoding, units: &[u16]) -> io::Result<()> {
        for &u in units {
            match encoding {
                StringEncoding::Ascii => self.write_u8(u as u8)?,
                StringEncoding::Utf16Le => self.write_u16::<LittleEndian>(u)?,
                StringEncoding::Utf16Be => self.write_u16::<BigEndian>(u)?,
            }
        }
        Ok(())
    }

    /// Writes the string's units without a terminator.
    pub fn write_string(&mut self, encoding: StringEncoding, s: &str) -> io::Result<()> {
        self.write_units(encoding, &encoding.encode(s))
    }

    /// Writes the string's units followed by a zero unit.
    pub fn write_cstring(&mut self, encoding: StringEncoding, s: &str) -> io::Result<()> {
        let mut units = encoding.encode(s);
        units.push(0);
        self.write_units(encoding, &units)
    }
}

impl Write for StreamWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.position += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
