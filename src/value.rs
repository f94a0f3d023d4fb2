//! Runtime values moving between the wire and in-memory field slots.

use std::fmt;

/// Primitive numeric representations, on the wire or in memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NumericType {
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
}

impl NumericType {
    pub fn name(self) -> &'static str {
        match self {
            NumericType::I8 => "i8",
            NumericType::I16 => "i16",
            NumericType::I32 => "i32",
            NumericType::I64 => "i64",
            NumericType::U8 => "u8",
            NumericType::U16 => "u16",
            NumericType::U32 => "u32",
            NumericType::U64 => "u64",
            NumericType::F32 => "f32",
            NumericType::F64 => "f64",
        }
    }

    pub fn bits(self) -> u32 {
        match self {
            NumericType::I8 | NumericType::U8 => 8,
            NumericType::I16 | NumericType::U16 => 16,
            NumericType::I32 | NumericType::U32 | NumericType::F32 => 32,
            NumericType::I64 | NumericType::U64 | NumericType::F64 => 64,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, NumericType::F32 | NumericType::F64)
    }

    /// Wire type of an unsigned integer `bits` wide. Only 8, 16 and 32 exist.
    pub fn unsigned(bits: u32) -> Option<NumericType> {
        match bits {
            8 => Some(NumericType::U8),
            16 => Some(NumericType::U16),
            32 => Some(NumericType::U32),
            _ => None,
        }
    }

    /// True when every unsigned `bits`-wide integer fits this in-memory type
    /// without landing in the sign bit.
    pub fn holds_unsigned(self, bits: u32) -> bool {
        match self {
            NumericType::U8 | NumericType::U16 | NumericType::U32 | NumericType::U64 => {
                self.bits() >= bits
            }
            NumericType::I8 | NumericType::I16 | NumericType::I32 | NumericType::I64 => {
                self.bits() > bits
            }
            NumericType::F32 | NumericType::F64 => false,
        }
    }

    pub fn parse(s: &str) -> Option<NumericType> {
        Some(match s {
            "i8" => NumericType::I8,
            "i16" => NumericType::I16,
            "i32" => NumericType::I32,
            "i64" => NumericType::I64,
            "u8" => NumericType::U8,
            "u16" => NumericType::U16,
            "u32" => NumericType::U32,
            "u64" => NumericType::U64,
            "f32" => NumericType::F32,
            "f64" => NumericType::F64,
            _ => return None,
        })
    }

    /// Zero of this type.
    pub fn zero(self) -> Value {
        Value::I64(0).cast(self).unwrap_or(Value::I64(0))
    }
}

impl fmt::Display for NumericType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single scalar or compound value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    Bool(bool),
    Float(f32),
    Double(f64),
    Text(String),
    List(Vec<Value>),
    Struct(Record),
}

impl Value {
    pub fn numeric_type(&self) -> Option<NumericType> {
        Some(match self {
            Value::U8(_) => NumericType::U8,
            Value::U16(_) => NumericType::U16,
            Value::U32(_) => NumericType::U32,
            Value::U64(_) => NumericType::U64,
            Value::I8(_) => NumericType::I8,
            Value::I16(_) => NumericType::I16,
            Value::I32(_) => NumericType::I32,
            Value::I64(_) => NumericType::I64,
            Value::Float(_) => NumericType::F32,
            Value::Double(_) => NumericType::F64,
            _ => return None,
        })
    }

    /// Integer view, wide enough for every integer variant.
    fn as_i128(&self) -> Option<i128> {
        Some(match self {
            Value::U8(x) => *x as i128,
            Value::U16(x) => *x as i128,
            Value::U32(x) => *x as i128,
            Value::U64(x) => *x as i128,
            Value::I8(x) => *x as i128,
            Value::I16(x) => *x as i128,
            Value::I32(x) => *x as i128,
            Value::I64(x) => *x as i128,
            _ => return None,
        })
    }

    /// Converts a numeric value to another width. Integers wrap (two's
    /// complement), floats convert with `as`. Non-numeric values yield `None`.
    pub fn cast(&self, to: NumericType) -> Option<Value> {
        let from_float = |x: f64| match to {
            NumericType::I8 => Value::I8(x as i8),
            NumericType::I16 => Value::I16(x as i16),
            NumericType::I32 => Value::I32(x as i32),
            NumericType::I64 => Value::I64(x as i64),
            NumericType::U8 => Value::U8(x as u8),
            NumericType::U16 => Value::U16(x as u16),
            NumericType::U32 => Value::U32(x as u32),
            NumericType::U64 => Value::U64(x as u64),
            NumericType::F32 => Value::Float(x as f32),
            NumericType::F64 => Value::Double(x),
        };
        match self {
            Value::Float(x) => return Some(from_float(*x as f64)),
            Value::Double(x) => return Some(from_float(*x)),
            _ => {}
        }
        let x = self.as_i128()?;
        Some(match to {
            NumericType::I8 => Value::I8(x as i8),
            NumericType::I16 => Value::I16(x as i16),
            NumericType::I32 => Value::I32(x as i32),
            NumericType::I64 => Value::I64(x as i64),
            NumericType::U8 => Value::U8(x as u8),
            NumericType::U16 => Value::U16(x as u16),
            NumericType::U32 => Value::U32(x as u32),
            NumericType::U64 => Value::U64(x as u64),
            NumericType::F32 => Value::Float(x as f32),
            NumericType::F64 => Value::Double(x as f64),
        })
    }

    /// Non-negative integer view; used for counts and lengths.
    pub fn as_u64(&self) -> Option<u64> {
        self.as_i128().and_then(|x| u64::try_from(x).ok())
    }

    pub fn as_i64(&self) -> Option<i64> {
        self.as_i128().and_then(|x| i64::try_from(x).ok())
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(x) => Some(*x as f64),
            Value::Double(x) => Some(*x),
            other => other.as_i128().map(|x| x as f64),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_struct(&self) -> Option<&Record> {
        match self {
            Value::Struct(r) => Some(r),
            _ => None,
        }
    }
}

/// Ordered, named field values of one dynamically described structure.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Record {
    type_name: String,
    fields: Vec<(String, Value)>,
}

impl Record {
    pub fn new(type_name: impl Into<String>) -> Self {
        Record {
            type_name: type_name.into(),
            fields: Vec::new(),
        }
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Value> {
        self.fields
            .iter_mut()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    /// Replaces the value of `name`, appending the field if it is new.
    pub fn set(&mut self, name: &str, value: Value) {
        match self.get_mut(name) {
            Some(slot) => *slot = value,
            None => self.fields.push((name.to_string(), value)),
        }
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cast_wraps_twos_complement() {
        assert_eq!(Value::I8(-1).cast(NumericType::U8), Some(Value::U8(255)));
        assert_eq!(Value::U8(255).cast(NumericType::I16), Some(Value::I16(255)));
        assert_eq!(Value::I32(70000).cast(NumericType::U16), Some(Value::U16(4464)));
        assert_eq!(Value::Double(2.5).cast(NumericType::F32), Some(Value::Float(2.5)));
        assert_eq!(Value::Text("x".into()).cast(NumericType::U8), None);
    }

    #[test]
    fn unsigned_capacity() {
        assert!(NumericType::U8.holds_unsigned(8));
        assert!(NumericType::I16.holds_unsigned(8));
        assert!(!NumericType::I8.holds_unsigned(8));
        assert!(!NumericType::I16.holds_unsigned(16));
        assert!(NumericType::I64.holds_unsigned(32));
        assert!(!NumericType::F64.holds_unsigned(8));
        assert_eq!(NumericType::unsigned(64), None);
    }

    #[test]
    fn as_u64_rejects_negative() {
        assert_eq!(Value::I32(3).as_u64(), Some(3));
        assert_eq!(Value::I32(-3).as_u64(), None);
        assert_eq!(Value::Bool(true).as_u64(), None);
    }

    #[test]
    fn record_set_replaces_in_place() {
        let mut r = Record::new("Header");
        r.set("a", Value::U8(1));
        r.set("b", Value::U8(2));
        r.set("a", Value::U8(3));
        let names: Vec<_> = r.fields().map(|(n, _)| n).collect();
        assert_eq!(names, ["a", "b"]);
        assert_eq!(r.get("a"), Some(&Value::U8(3)));
    }
}
