//! Compiled field descriptors and their per-kind transcoding.

use crate::error::{ErrorKind, StructError, StructResult};
use crate::schema::ErasedSchema;
use crate::stream::{
    prefix_max, Endianness, FieldEndian, StreamContext, StreamReader, StreamWriter,
    StringEncoding,
};
use crate::types::{NewInstance, ScalarAccess, SeqAccess};
use crate::value::{NumericType, Value};
use std::any::Any;
use std::fmt;
use std::sync::Arc;

pub type Getter<T> = Arc<dyn for<'a> Fn(&'a T) -> Option<&'a dyn Any> + Send + Sync>;
pub type GetterMut<T> = Arc<dyn for<'a> Fn(&'a mut T) -> Option<&'a mut dyn Any> + Send + Sync>;
pub type Condition<T> = Arc<dyn Fn(&T, &StreamContext) -> bool + Send + Sync>;
pub type ReadHook<T> =
    Arc<dyn Fn(&mut T, &mut StreamReader<'_>) -> anyhow::Result<()> + Send + Sync>;
pub type WriteHook<T> = Arc<dyn Fn(&T, &mut StreamWriter<'_>) -> anyhow::Result<()> + Send + Sync>;
pub type ElementCtor<T> = Arc<dyn Fn(&T) -> Box<dyn Any> + Send + Sync>;
pub type LengthGetter<T> = Arc<dyn Fn(&T) -> Option<u64> + Send + Sync>;

/// Boxes a field projection; the helper pins down the higher-ranked signature.
pub fn getter<T, F>(f: F) -> Getter<T>
where
    F: for<'a> Fn(&'a T) -> Option<&'a dyn Any> + Send + Sync + 'static,
{
    Arc::new(f)
}

pub fn getter_mut<T, F>(f: F) -> GetterMut<T>
where
    F: for<'a> Fn(&'a mut T) -> Option<&'a mut dyn Any> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// How the element or character count of a variable-sized field is obtained.
pub enum LengthStrategy<T> {
    /// Zero-terminated; strings only.
    Terminated,
    Fixed(usize),
    /// Unsigned count of `bits` (8, 16, 32 or 64) written inline before the payload.
    ValuePrefixed { bits: u32, endian: FieldEndian },
    /// Count held by an earlier field. Read-only: writes emit nothing for it.
    Sibling { field: String, get: LengthGetter<T> },
    /// Count computed from the instance. Read-only like `Sibling`.
    Computed { name: String, compute: LengthGetter<T> },
}

impl<T> LengthStrategy<T> {
    pub fn prefixed(bits: u32) -> Self {
        LengthStrategy::ValuePrefixed {
            bits,
            endian: FieldEndian::Inherit,
        }
    }

    pub fn prefixed_with(bits: u32, endian: FieldEndian) -> Self {
        LengthStrategy::ValuePrefixed { bits, endian }
    }

    pub fn sibling<F>(field: &str, get: F) -> Self
    where
        F: Fn(&T) -> u64 + Send + Sync + 'static,
    {
        LengthStrategy::Sibling {
            field: field.to_string(),
            get: Arc::new(move |t: &T| Some(get(t))),
        }
    }

    pub fn computed<F>(name: &str, compute: F) -> Self
    where
        F: Fn(&T) -> u64 + Send + Sync + 'static,
    {
        LengthStrategy::Computed {
            name: name.to_string(),
            compute: Arc::new(move |t: &T| Some(compute(t))),
        }
    }

    /// Sibling and computed lengths are consulted on read only.
    pub fn is_read_only(&self) -> bool {
        matches!(
            self,
            LengthStrategy::Sibling { .. } | LengthStrategy::Computed { .. }
        )
    }

    /// Count to read, or `None` for a terminated value.
    pub(crate) fn read_count(&self, owner: &T, r: &mut StreamReader<'_>) -> StructResult<Option<usize>> {
        let n = match self {
            LengthStrategy::Terminated => return Ok(None),
            LengthStrategy::Fixed(n) => return Ok(Some(*n)),
            LengthStrategy::ValuePrefixed { bits, endian } => {
                r.read_length(*bits, endian.resolve(Endianness::default()))?
            }
            LengthStrategy::Sibling { field, get } => get(owner).ok_or_else(|| {
                ErrorKind::InvalidLength(format!("field `{field}` does not hold a usable count"))
            })?,
            LengthStrategy::Computed { name, compute } => compute(owner).ok_or_else(|| {
                ErrorKind::InvalidLength(format!("computed length `{name}` is unavailable"))
            })?,
        };
        usize::try_from(n)
            .map(Some)
            .map_err(|_| ErrorKind::InvalidLength(format!("count {n} exceeds the address space")).into())
    }

    /// Checks `actual` against the strategy and emits the inline prefix, if any.
    pub(crate) fn write_count(&self, actual: usize, w: &mut StreamWriter<'_>) -> StructResult<()> {
        match self {
            LengthStrategy::Terminated
            | LengthStrategy::Sibling { .. }
            | LengthStrategy::Computed { .. } => Ok(()),
            LengthStrategy::Fixed(n) if *n != actual => Err(ErrorKind::LengthMismatch {
                expected: *n,
                actual,
            }
            .into()),
            LengthStrategy::Fixed(_) => Ok(()),
            LengthStrategy::ValuePrefixed { bits, endian } => {
                if actual as u64 > prefix_max(*bits) {
                    return Err(ErrorKind::InvalidLength(format!(
                        "{actual} does not fit a {bits}-bit length prefix"
                    ))
                    .into());
                }
                w.write_length(*bits, endian.resolve(Endianness::default()), actual as u64)?;
                Ok(())
            }
        }
    }
}

impl<T> fmt::Debug for LengthStrategy<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LengthStrategy::Terminated => f.write_str("Terminated"),
            LengthStrategy::Fixed(n) => write!(f, "Fixed({n})"),
            LengthStrategy::ValuePrefixed { bits, endian } => {
                write!(f, "ValuePrefixed({bits}, {endian:?})")
            }
            LengthStrategy::Sibling { field, .. } => write!(f, "Sibling({field})"),
            LengthStrategy::Computed { name, .. } => write!(f, "Computed({name})"),
        }
    }
}

/// Elements that consume no input are only accepted up to this count.
pub const MAX_EMPTY_ELEMENTS: usize = 1 << 16;

fn type_mismatch(what: impl Into<String>) -> StructError {
    ErrorKind::TypeMismatch(what.into()).into()
}

fn load(access: &ScalarAccess, slot: &dyn Any) -> StructResult<Value> {
    (access.get)(slot).ok_or_else(|| type_mismatch("slot does not hold the declared type"))
}

fn store(access: &ScalarAccess, slot: &mut dyn Any, v: Value) -> StructResult<()> {
    if (access.set)(slot, v) {
        Ok(())
    } else {
        Err(type_mismatch("slot does not accept the decoded value"))
    }
}

/// Wire and memory representation of a numeric field.
#[derive(Clone, Copy)]
pub struct NumericFormat {
    pub wire: NumericType,
    pub memory: NumericType,
    pub endian: Endianness,
    pub(crate) access: ScalarAccess,
}

impl NumericFormat {
    fn read(&self, r: &mut StreamReader<'_>) -> StructResult<Value> {
        let raw = r.read_number(self.wire, self.endian)?;
        raw.cast(self.memory)
            .ok_or_else(|| type_mismatch(format!("cannot store {} as {}", self.wire, self.memory)))
    }

    fn write(&self, v: Value, w: &mut StreamWriter<'_>) -> StructResult<()> {
        let wire = v
            .cast(self.wire)
            .ok_or_else(|| type_mismatch(format!("expected a number for {}", self.wire)))?;
        w.write_number(&wire, self.endian)?;
        Ok(())
    }
}

impl fmt::Debug for NumericFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NumericFormat")
            .field("wire", &self.wire)
            .field("memory", &self.memory)
            .field("endian", &self.endian)
            .finish()
    }
}

pub struct StringFormat<T> {
    pub encoding: StringEncoding,
    pub length: LengthStrategy<T>,
    pub(crate) access: ScalarAccess,
}

impl<T> StringFormat<T> {
    fn read(&self, owner: &T, r: &mut StreamReader<'_>) -> StructResult<Value> {
        let s = match self.length.read_count(owner, r)? {
            None => r.read_cstring(self.encoding)?,
            Some(units) => r.read_string(self.encoding, units)?,
        };
        Ok(Value::Text(s))
    }

    fn write(&self, v: &Value, w: &mut StreamWriter<'_>) -> StructResult<()> {
        let s = v.as_str().ok_or_else(|| type_mismatch("expected text"))?;
        self.length.write_count(self.encoding.unit_count(s), w)?;
        match self.length {
            LengthStrategy::Terminated => w.write_cstring(self.encoding, s)?,
            _ => w.write_string(self.encoding, s)?,
        }
        Ok(())
    }
}

impl<T> fmt::Debug for StringFormat<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StringFormat")
            .field("encoding", &self.encoding)
            .field("length", &self.length)
            .finish()
    }
}

/// A field whose type has a schema of its own.
#[derive(Clone)]
pub struct NestedFormat {
    pub name: String,
    pub(crate) schema: Arc<dyn ErasedSchema>,
    pub(crate) nested: fn(&dyn Any) -> Option<&dyn Any>,
    pub(crate) nested_mut: fn(&mut dyn Any) -> Option<&mut dyn Any>,
}

impl NestedFormat {
    fn read(&self, slot: &mut dyn Any, r: &mut StreamReader<'_>) -> StructResult<()> {
        let instance = (self.nested_mut)(slot).ok_or(ErrorKind::MissingInstance)?;
        self.schema.read_any(instance, r)
    }

    fn write(&self, slot: &dyn Any, w: &mut StreamWriter<'_>) -> StructResult<()> {
        let instance = (self.nested)(slot).ok_or(ErrorKind::MissingInstance)?;
        self.schema.write_any(instance, w)
    }
}

impl fmt::Debug for NestedFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NestedFormat({})", self.name)
    }
}

/// Kinds an array or list element can take.
pub enum ElementKind<T> {
    Numeric(NumericFormat),
    Boolean(ScalarAccess),
    String(StringFormat<T>),
    Nested(NestedFormat),
}

impl<T> fmt::Debug for ElementKind<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElementKind::Numeric(n) => f.debug_tuple("Numeric").field(n).finish(),
            ElementKind::Boolean(_) => f.write_str("Boolean"),
            ElementKind::String(s) => f.debug_tuple("String").field(s).finish(),
            ElementKind::Nested(n) => f.debug_tuple("Nested").field(n).finish(),
        }
    }
}

pub struct ElementDescriptor<T> {
    pub type_name: String,
    pub kind: ElementKind<T>,
    pub(crate) new: NewInstance,
    pub(crate) construct: Option<ElementCtor<T>>,
}

impl<T> ElementDescriptor<T> {
    /// Builds a fresh element and reads into it.
    fn read_fresh(&self, owner: &T, r: &mut StreamReader<'_>) -> StructResult<Box<dyn Any>> {
        let mut item = match &self.construct {
            Some(ctor) => ctor(owner),
            None => (self.new)(),
        };
        let slot: &mut dyn Any = item.as_mut();
        match &self.kind {
            ElementKind::Numeric(f) => store(&f.access, slot, f.read(r)?)?,
            ElementKind::Boolean(access) => store(access, slot, Value::Bool(r.read_bool()?))?,
            ElementKind::String(f) => store(&f.access, slot, f.read(owner, r)?)?,
            ElementKind::Nested(n) => n.read(slot, r)?,
        }
        Ok(item)
    }

    fn write_item(&self, item: &dyn Any, w: &mut StreamWriter<'_>) -> StructResult<()> {
        match &self.kind {
            ElementKind::Numeric(f) => f.write(load(&f.access, item)?, w),
            ElementKind::Boolean(access) => {
                let b = load(access, item)?
                    .as_bool()
                    .ok_or_else(|| type_mismatch("expected a boolean"))?;
                w.write_bool(b)?;
                Ok(())
            }
            ElementKind::String(f) => f.write(&load(&f.access, item)?, w),
            ElementKind::Nested(n) => n.write(item, w),
        }
    }
}

impl<T> fmt::Debug for ElementDescriptor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ElementDescriptor")
            .field("type_name", &self.type_name)
            .field("kind", &self.kind)
            .field("construct", &self.construct.is_some())
            .finish()
    }
}

/// One compiled field, tagged by kind.
pub enum FieldKind<T> {
    Numeric(NumericFormat),
    Boolean(ScalarAccess),
    String(StringFormat<T>),
    FixedArray {
        len: usize,
        element: ElementDescriptor<T>,
        seq: SeqAccess,
    },
    GrowableList {
        length: LengthStrategy<T>,
        element: ElementDescriptor<T>,
        seq: SeqAccess,
    },
    Nested(NestedFormat),
    Custom {
        read: ReadHook<T>,
        write: WriteHook<T>,
    },
}

impl<T> FieldKind<T> {
    pub fn name(&self) -> &'static str {
        match self {
            FieldKind::Numeric(_) => "Numeric",
            FieldKind::Boolean(_) => "Boolean",
            FieldKind::String(_) => "String",
            FieldKind::FixedArray { .. } => "FixedArray",
            FieldKind::GrowableList { .. } => "GrowableList",
            FieldKind::Nested(_) => "NestedStructure",
            FieldKind::Custom { .. } => "Custom",
        }
    }
}

impl<T> fmt::Debug for FieldKind<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldKind::Numeric(n) => f.debug_tuple("Numeric").field(n).finish(),
            FieldKind::String(s) => f.debug_tuple("String").field(s).finish(),
            FieldKind::FixedArray { len, element, .. } => f
                .debug_struct("FixedArray")
                .field("len", len)
                .field("element", element)
                .finish(),
            FieldKind::GrowableList { length, element, .. } => f
                .debug_struct("GrowableList")
                .field("length", length)
                .field("element", element)
                .finish(),
            FieldKind::Nested(n) => f.debug_tuple("Nested").field(n).finish(),
            other => f.write_str(other.name()),
        }
    }
}

pub struct FieldDescriptor<T> {
    pub(crate) name: String,
    pub(crate) type_name: String,
    pub(crate) kind: FieldKind<T>,
    pub(crate) get: Getter<T>,
    pub(crate) get_mut: GetterMut<T>,
    pub(crate) condition: Option<Condition<T>>,
}

impl<T> FieldDescriptor<T> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the declared in-memory type.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn kind(&self) -> &FieldKind<T> {
        &self.kind
    }

    pub fn is_conditional(&self) -> bool {
        self.condition.is_some()
    }

    /// Whether the field takes part in this pass.
    pub fn is_present(&self, owner: &T, ctx: &StreamContext) -> bool {
        self.condition.as_ref().map_or(true, |c| c(owner, ctx))
    }

    fn slot<'a>(&self, owner: &'a T) -> StructResult<&'a dyn Any> {
        (self.get)(owner).ok_or_else(|| type_mismatch(format!("no value for `{}`", self.name)))
    }

    fn slot_mut<'a>(&self, owner: &'a mut T) -> StructResult<&'a mut dyn Any> {
        let name = &self.name;
        (self.get_mut)(owner).ok_or_else(|| type_mismatch(format!("no value for `{name}`")))
    }

    pub(crate) fn read(&self, owner: &mut T, r: &mut StreamReader<'_>) -> StructResult<()> {
        match &self.kind {
            FieldKind::Numeric(f) => {
                let v = f.read(r)?;
                store(&f.access, self.slot_mut(owner)?, v)
            }
            FieldKind::Boolean(access) => {
                let v = Value::Bool(r.read_bool()?);
                store(access, self.slot_mut(owner)?, v)
            }
            FieldKind::String(f) => {
                let v = f.read(owner, r)?;
                store(&f.access, self.slot_mut(owner)?, v)
            }
            FieldKind::FixedArray { len, element, seq } => {
                let current = (seq.len)(self.slot(owner)?);
                if current != Some(*len) {
                    return Err(ErrorKind::LengthMismatch {
                        expected: *len,
                        actual: current.unwrap_or(0),
                    }
                    .into());
                }
                let mut items = Vec::with_capacity(*len);
                for _ in 0..*len {
                    items.push(element.read_fresh(owner, r)?);
                }
                let slot = self.slot_mut(owner)?;
                for (i, item) in items.into_iter().enumerate() {
                    if !(seq.replace)(slot, i, item) {
                        return Err(type_mismatch(format!("cannot store element {i}")));
                    }
                }
                Ok(())
            }
            FieldKind::GrowableList {
                length,
                element,
                seq,
            } => {
                let count = length
                    .read_count(owner, r)?
                    .ok_or_else(|| type_mismatch("list without a count"))?;
                let mut items = Vec::new();
                for i in 0..count {
                    let start = r.position();
                    items.push(element.read_fresh(owner, r)?);
                    if r.position() == start && i >= MAX_EMPTY_ELEMENTS {
                        return Err(ErrorKind::InvalidLength(format!(
                            "count {count} of elements that occupy no bytes exceeds {MAX_EMPTY_ELEMENTS}"
                        ))
                        .into());
                    }
                }
                let slot = self.slot_mut(owner)?;
                if !(seq.clear)(slot) {
                    return Err(type_mismatch("list slot cannot be cleared"));
                }
                for item in items {
                    if !(seq.push)(slot, item) {
                        return Err(type_mismatch("list slot rejected an element"));
                    }
                }
                Ok(())
            }
            FieldKind::Nested(n) => n.read(self.slot_mut(owner)?, r),
            FieldKind::Custom { read, .. } => {
                read(owner, r).map_err(|e| StructError::new(ErrorKind::Hook(e)))
            }
        }
    }

    pub(crate) fn write(&self, owner: &T, w: &mut StreamWriter<'_>) -> StructResult<()> {
        match &self.kind {
            FieldKind::Numeric(f) => f.write(load(&f.access, self.slot(owner)?)?, w),
            FieldKind::Boolean(access) => {
                let b = load(access, self.slot(owner)?)?
                    .as_bool()
                    .ok_or_else(|| type_mismatch("expected a boolean"))?;
                w.write_bool(b)?;
                Ok(())
            }
            FieldKind::String(f) => f.write(&load(&f.access, self.slot(owner)?)?, w),
            FieldKind::FixedArray { len, element, seq } => {
                let slot = self.slot(owner)?;
                let actual = (seq.len)(slot).unwrap_or(0);
                if actual != *len {
                    return Err(ErrorKind::LengthMismatch {
                        expected: *len,
                        actual,
                    }
                    .into());
                }
                write_items(slot, *len, element, seq, w)
            }
            FieldKind::GrowableList {
                length,
                element,
                seq,
            } => {
                let slot = self.slot(owner)?;
                let actual = (seq.len)(slot).ok_or_else(|| type_mismatch("not a list"))?;
                length.write_count(actual, w)?;
                write_items(slot, actual, element, seq, w)
            }
            FieldKind::Nested(n) => n.write(self.slot(owner)?, w),
            FieldKind::Custom { write, .. } => {
                write(owner, w).map_err(|e| StructError::new(ErrorKind::Hook(e)))
            }
        }
    }
}

fn write_items<T>(
    slot: &dyn Any,
    count: usize,
    element: &ElementDescriptor<T>,
    seq: &SeqAccess,
    w: &mut StreamWriter<'_>,
) -> StructResult<()> {
    for i in 0..count {
        let item = (seq.item)(slot, i)
            .ok_or_else(|| type_mismatch(format!("element {i} is missing")))?;
        element.write_item(item, w)?;
    }
    Ok(())
}

impl<T> fmt::Debug for FieldDescriptor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldDescriptor")
            .field("name", &self.name)
            .field("type_name", &self.type_name)
            .field("kind", &self.kind)
            .field("conditional", &self.condition.is_some())
            .finish()
    }
}
