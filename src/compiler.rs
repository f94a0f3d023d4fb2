//! Structure declaration, schema compilation and the process-wide schema cache.
//!
//! A structure type describes its fields once through [`StructureBuilder`];
//! [`SchemaCompiler`] turns that description into an immutable
//! [`StructureSchema`]. Each declared field resolves to exactly one kind, tried
//! in this order:
//!
//! 1. custom hooks
//! 2. fixed-size array
//! 3. growable list (a length strategy is mandatory)
//! 4. numeric
//! 5. boolean
//! 6. text
//! 7. nested structure
//!
//! Anything else is an unsupported type. [`compile`] caches schemas per Rust
//! type for the life of the process.

use crate::error::{ErrorKind, StructError, StructResult};
use crate::field::{
    getter, getter_mut, Condition, ElementCtor, ElementDescriptor, ElementKind, FieldDescriptor,
    FieldKind, Getter, GetterMut, LengthStrategy, NestedFormat, NumericFormat, ReadHook,
    StringFormat, WriteHook,
};
use crate::schema::{BaseLink, ErasedSchema, StructureSchema};
use crate::stream::{Endianness, FieldEndian, StreamContext, StreamReader, StreamWriter, StringEncoding};
use crate::types::{short_type_name, FieldType, NumericInfo, SchemaSource, StructureType, TypeInfo};
use crate::value::NumericType;
use std::any::{Any, TypeId};
use std::cell::RefCell;
use std::collections::HashMap;
use std::io::{Cursor, Read, Write};
use std::sync::{Arc, LazyLock, PoisonError, RwLock};
use tracing::{debug, trace, warn};

/// A Rust type with a binary layout.
pub trait Structure: Default + Send + Sync + 'static {
    fn describe(s: &mut StructureBuilder<Self>);
}

/// Declared base structure of a description.
pub struct BaseDecl<T> {
    name: String,
    schema: SchemaSource,
    project: Getter<T>,
    project_mut: GetterMut<T>,
}

/// One declared field and its configuration hints.
pub struct FieldDecl<T> {
    name: String,
    info: TypeInfo,
    get: Getter<T>,
    get_mut: GetterMut<T>,
    unsigned: Option<u32>,
    endian: FieldEndian,
    encoding: Option<StringEncoding>,
    length: Option<LengthStrategy<T>>,
    element_length: Option<LengthStrategy<T>>,
    condition: Option<Condition<T>>,
    construct: Option<(TypeId, ElementCtor<T>)>,
    hooks: Option<(ReadHook<T>, WriteHook<T>)>,
}

impl<T: 'static> FieldDecl<T> {
    pub fn new(name: &str, info: TypeInfo, get: Getter<T>, get_mut: GetterMut<T>) -> Self {
        FieldDecl {
            name: name.to_string(),
            info,
            get,
            get_mut,
            unsigned: None,
            endian: FieldEndian::Inherit,
            encoding: None,
            length: None,
            element_length: None,
            condition: None,
            construct: None,
            hooks: None,
        }
    }

    /// Transcodes the value as an unsigned integer of `bits` (8, 16 or 32).
    pub fn unsigned(&mut self, bits: u32) -> &mut Self {
        self.unsigned = Some(bits);
        self
    }

    pub fn endian(&mut self, endian: FieldEndian) -> &mut Self {
        self.endian = endian;
        self
    }

    pub fn encoding(&mut self, encoding: StringEncoding) -> &mut Self {
        self.encoding = Some(encoding);
        self
    }

    pub fn length(&mut self, length: LengthStrategy<T>) -> &mut Self {
        self.length = Some(length);
        self
    }

    /// Length of each string element of an array or list.
    pub fn element_length(&mut self, length: LengthStrategy<T>) -> &mut Self {
        self.element_length = Some(length);
        self
    }

    pub fn condition<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&T, &StreamContext) -> bool + Send + Sync + 'static,
    {
        let condition: Condition<T> = Arc::new(f);
        self.condition = Some(condition);
        self
    }

    /// Builds array and list elements from the owning instance instead of `Default`.
    pub fn construct_with<E, F>(&mut self, f: F) -> &mut Self
    where
        E: 'static,
        F: Fn(&T) -> E + Send + Sync + 'static,
    {
        let ctor: ElementCtor<T> = Arc::new(move |t: &T| Box::new(f(t)) as Box<dyn Any>);
        self.construct = Some((TypeId::of::<E>(), ctor));
        self
    }

    /// Replaces the field's transcoding with explicit read and write hooks.
    pub fn hooks<R, W>(&mut self, read: R, write: W) -> &mut Self
    where
        R: Fn(&mut T, &mut StreamReader<'_>) -> anyhow::Result<()> + Send + Sync + 'static,
        W: Fn(&T, &mut StreamWriter<'_>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let read: ReadHook<T> = Arc::new(read);
        let write: WriteHook<T> = Arc::new(write);
        self.hooks = Some((read, write));
        self
    }
}

/// Everything the compiler needs to know about one structure type.
pub struct StructureDescription<T> {
    name: String,
    endian: Endianness,
    encoding: StringEncoding,
    base: Option<BaseDecl<T>>,
    fields: Vec<FieldDecl<T>>,
}

impl<T> StructureDescription<T> {
    pub fn name(&self) -> &str {
        &self.name
    }
}

pub struct StructureBuilder<T> {
    description: StructureDescription<T>,
}

impl<T: 'static> StructureBuilder<T> {
    pub fn new(name: impl Into<String>) -> Self {
        StructureBuilder {
            description: StructureDescription {
                name: name.into(),
                endian: Endianness::default(),
                encoding: StringEncoding::default(),
                base: None,
                fields: Vec::new(),
            },
        }
    }

    pub fn name(&mut self, name: impl Into<String>) -> &mut Self {
        self.description.name = name.into();
        self
    }

    /// Byte order of every field without an override.
    pub fn endian(&mut self, endian: Endianness) -> &mut Self {
        self.description.endian = endian;
        self
    }

    /// Default encoding of string fields.
    pub fn encoding(&mut self, encoding: StringEncoding) -> &mut Self {
        self.description.encoding = encoding;
        self
    }

    /// Declares the base structure, embedded in `T` and reached via the projections.
    pub fn base<B: Structure>(&mut self, project: fn(&T) -> &B, project_mut: fn(&mut T) -> &mut B) -> &mut Self {
        self.base_with(
            &short_type_name::<B>(),
            Arc::new(|| compile::<B>().map(|s| s as Arc<dyn ErasedSchema>)),
            getter(move |t: &T| Some(project(t) as &dyn Any)),
            getter_mut(move |t: &mut T| Some(project_mut(t) as &mut dyn Any)),
        )
    }

    pub fn base_with(
        &mut self,
        name: &str,
        schema: SchemaSource,
        project: Getter<T>,
        project_mut: GetterMut<T>,
    ) -> &mut Self {
        self.description.base = Some(BaseDecl {
            name: name.to_string(),
            schema,
            project,
            project_mut,
        });
        self
    }

    /// Declares the next field in wire order.
    pub fn field<V: FieldType>(
        &mut self,
        name: &str,
        get: fn(&T) -> &V,
        get_mut: fn(&mut T) -> &mut V,
    ) -> &mut FieldDecl<T> {
        self.field_with(FieldDecl::new(
            name,
            V::type_info(),
            getter(move |t: &T| Some(get(t) as &dyn Any)),
            getter_mut(move |t: &mut T| Some(get_mut(t) as &mut dyn Any)),
        ))
    }

    /// Declares a field transcoded only through hooks.
    pub fn custom<R, W>(&mut self, name: &str, read: R, write: W) -> &mut FieldDecl<T>
    where
        R: Fn(&mut T, &mut StreamReader<'_>) -> anyhow::Result<()> + Send + Sync + 'static,
        W: Fn(&T, &mut StreamWriter<'_>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let info = TypeInfo::of::<()>("custom");
        let decl = self.field_with(FieldDecl::new(
            name,
            info,
            getter(|_: &T| None),
            getter_mut(|_: &mut T| None),
        ));
        decl.hooks(read, write)
    }

    pub fn field_with(&mut self, decl: FieldDecl<T>) -> &mut FieldDecl<T> {
        let fields = &mut self.description.fields;
        fields.push(decl);
        let last = fields.len() - 1;
        &mut fields[last]
    }

    pub fn finish(self) -> StructureDescription<T> {
        self.description
    }
}

/// Settings inherited by the elements of an array or list.
struct ElementHints<T> {
    unsigned: Option<u32>,
    endian: FieldEndian,
    encoding: Option<StringEncoding>,
    length: Option<LengthStrategy<T>>,
    construct: Option<(TypeId, ElementCtor<T>)>,
}

/// Structure-wide settings plus the names a sibling length may refer to.
struct Scope {
    endian: Endianness,
    encoding: StringEncoding,
    known: Vec<String>,
}

impl Scope {
    fn check_length<T>(&self, length: LengthStrategy<T>, text: bool) -> StructResult<LengthStrategy<T>> {
        match length {
            LengthStrategy::Terminated if !text => Err(ErrorKind::InvalidConfig(
                "terminated length applies to strings only".to_string(),
            )
            .into()),
            LengthStrategy::ValuePrefixed { bits, endian } => {
                if !matches!(bits, 8 | 16 | 32 | 64) {
                    return Err(ErrorKind::UnsupportedPrefixWidth(bits).into());
                }
                Ok(LengthStrategy::ValuePrefixed {
                    bits,
                    endian: endian.resolve(self.endian).into(),
                })
            }
            LengthStrategy::Sibling { field, get } => {
                if !self.known.contains(&field) {
                    return Err(ErrorKind::InvalidConfig(format!(
                        "length field `{field}` is not declared before this field"
                    ))
                    .into());
                }
                Ok(LengthStrategy::Sibling { field, get })
            }
            other => Ok(other),
        }
    }

    fn numeric(&self, num: NumericInfo, unsigned: Option<u32>, endian: FieldEndian) -> StructResult<NumericFormat> {
        let wire = match unsigned {
            None => num.ty,
            Some(bits) => {
                let wire = NumericType::unsigned(bits).ok_or(ErrorKind::UnsupportedUnsignedWidth(bits))?;
                if !num.ty.holds_unsigned(bits) {
                    return Err(ErrorKind::UnsignedTooNarrow {
                        bits,
                        type_name: num.ty.name().to_string(),
                    }
                    .into());
                }
                wire
            }
        };
        Ok(NumericFormat {
            wire,
            memory: num.ty,
            endian: endian.resolve(self.endian),
            access: num.access,
        })
    }

    fn element<T>(&self, info: TypeInfo, hints: ElementHints<T>) -> StructResult<ElementDescriptor<T>> {
        if info.array.is_some() || info.list.is_some() {
            return Err(ErrorKind::UnsupportedType(format!(
                "{} (containers of containers are not supported)",
                info.name
            ))
            .into());
        }
        if hints.length.is_some() && info.text.is_none() {
            return Err(ErrorKind::InvalidConfig(format!(
                "element length given for non-text elements of type `{}`",
                info.name
            ))
            .into());
        }
        let construct = match hints.construct {
            Some((id, _)) if id != info.type_id => {
                return Err(ErrorKind::InvalidConfig(format!(
                    "element constructor does not produce `{}`",
                    info.name
                ))
                .into())
            }
            Some((_, ctor)) => Some(ctor),
            None => None,
        };
        let kind = if let Some(num) = info.numeric {
            ElementKind::Numeric(self.numeric(num, hints.unsigned, hints.endian)?)
        } else if let Some(access) = info.boolean {
            ElementKind::Boolean(access)
        } else if let Some(access) = info.text {
            ElementKind::String(StringFormat {
                encoding: hints.encoding.unwrap_or(self.encoding),
                length: self.check_length(hints.length.unwrap_or(LengthStrategy::Terminated), true)?,
                access,
            })
        } else if let Some(st) = info.structure {
            ElementKind::Nested(nested(st)?)
        } else {
            return Err(ErrorKind::UnsupportedType(info.name).into());
        };
        Ok(ElementDescriptor {
            type_name: info.name,
            kind,
            new: info.new,
            construct,
        })
    }

    fn field<T>(&self, decl: FieldDecl<T>) -> StructResult<FieldDescriptor<T>> {
        let FieldDecl {
            name,
            info,
            get,
            get_mut,
            unsigned,
            endian,
            encoding,
            length,
            element_length,
            condition,
            construct,
            hooks,
        } = decl;
        let type_name = info.name.clone();
        let hints = ElementHints {
            unsigned,
            endian,
            encoding,
            length: element_length,
            construct,
        };
        let kind = if let Some((read, write)) = hooks {
            FieldKind::Custom { read, write }
        } else if let Some(array) = info.array {
            match &length {
                None => {}
                Some(LengthStrategy::Fixed(n)) if *n == array.len => {}
                Some(other) => {
                    return Err(ErrorKind::InvalidConfig(format!(
                        "array of {} elements cannot take length {other:?}",
                        array.len
                    ))
                    .into())
                }
            }
            FieldKind::FixedArray {
                len: array.len,
                element: self.element(*array.element, hints)?,
                seq: array.seq,
            }
        } else if let Some(list) = info.list {
            let length = length.ok_or_else(|| ErrorKind::MissingLength(type_name.clone()))?;
            FieldKind::GrowableList {
                length: self.check_length(length, false)?,
                element: self.element(*list.element, hints)?,
                seq: list.seq,
            }
        } else if let Some(num) = info.numeric {
            FieldKind::Numeric(self.numeric(num, unsigned, endian)?)
        } else if let Some(access) = info.boolean {
            FieldKind::Boolean(access)
        } else if let Some(access) = info.text {
            FieldKind::String(StringFormat {
                encoding: encoding.unwrap_or(self.encoding),
                length: self.check_length(length.unwrap_or(LengthStrategy::Terminated), true)?,
                access,
            })
        } else if let Some(st) = info.structure {
            FieldKind::Nested(nested(st)?)
        } else {
            return Err(ErrorKind::UnsupportedType(type_name).into());
        };
        Ok(FieldDescriptor {
            name,
            type_name,
            kind,
            get,
            get_mut,
            condition,
        })
    }
}

fn nested(st: StructureType) -> StructResult<NestedFormat> {
    Ok(NestedFormat {
        schema: (st.schema)()?,
        name: st.name,
        nested: st.nested,
        nested_mut: st.nested_mut,
    })
}

/// Turns structure descriptions into schemas. Stateless; caching is [`compile`]'s job.
pub struct SchemaCompiler;

impl SchemaCompiler {
    pub fn compile<T: 'static>(description: StructureDescription<T>) -> StructResult<StructureSchema<T>> {
        let StructureDescription {
            name,
            endian,
            encoding,
            base,
            fields,
        } = description;

        let base = match base {
            Some(b) => {
                let schema = (b.schema)().map_err(|e| e.at(&name, &b.name))?;
                Some(BaseLink {
                    schema,
                    project: b.project,
                    project_mut: b.project_mut,
                })
            }
            None => None,
        };

        let mut scope = Scope {
            endian,
            encoding,
            known: base
                .as_ref()
                .map(|b| b.schema.field_names())
                .unwrap_or_default(),
        };
        let mut compiled = Vec::with_capacity(fields.len());
        for decl in fields {
            let field_name = decl.name.clone();
            if scope.known.contains(&field_name) {
                return Err(StructError::new(ErrorKind::InvalidConfig(format!(
                    "duplicate field `{field_name}`"
                )))
                .at(&name, &field_name));
            }
            compiled.push(scope.field(decl).map_err(|e| e.at(&name, &field_name))?);
            scope.known.push(field_name);
        }
        Ok(StructureSchema::new(name, endian, base, compiled))
    }
}

type CachedSchema = Arc<dyn Any + Send + Sync>;

static SCHEMAS: LazyLock<RwLock<HashMap<TypeId, CachedSchema>>> =
    LazyLock::new(|| RwLock::new(HashMap::new()));

thread_local! {
    static COMPILING: RefCell<Vec<TypeId>> = const { RefCell::new(Vec::new()) };
}

/// Marks a type as being compiled on this thread; re-entry means a cycle.
struct CompileGuard(TypeId);

impl CompileGuard {
    fn enter(key: TypeId, name: &str) -> StructResult<CompileGuard> {
        COMPILING.with(|stack| {
            let mut stack = stack.borrow_mut();
            if stack.contains(&key) {
                return Err(ErrorKind::CyclicStructure(name.to_string()).into());
            }
            stack.push(key);
            Ok(CompileGuard(key))
        })
    }
}

impl Drop for CompileGuard {
    fn drop(&mut self) {
        COMPILING.with(|stack| {
            let mut stack = stack.borrow_mut();
            if let Some(pos) = stack.iter().rposition(|k| *k == self.0) {
                stack.remove(pos);
            }
        });
    }
}

fn cached<T: Structure>(key: TypeId) -> Option<Arc<StructureSchema<T>>> {
    let schemas = SCHEMAS.read().unwrap_or_else(PoisonError::into_inner);
    schemas
        .get(&key)
        .and_then(|s| Arc::clone(s).downcast::<StructureSchema<T>>().ok())
}

/// Compiled schema of `T`, built on first use and shared afterwards.
///
/// Concurrent first uses may compile redundantly; the first published schema
/// wins. Failures are returned, never cached.
pub fn compile<T: Structure>() -> StructResult<Arc<StructureSchema<T>>> {
    let key = TypeId::of::<T>();
    if let Some(schema) = cached::<T>(key) {
        trace!(structure = schema.name(), "schema cache hit");
        return Ok(schema);
    }

    let name = short_type_name::<T>();
    let _guard = CompileGuard::enter(key, &name)?;
    let mut builder = StructureBuilder::<T>::new(name);
    T::describe(&mut builder);
    let schema = Arc::new(SchemaCompiler::compile(builder.finish())?);

    let mut schemas = SCHEMAS.write().unwrap_or_else(PoisonError::into_inner);
    let published = schemas
        .entry(key)
        .or_insert_with(|| Arc::clone(&schema) as CachedSchema);
    match Arc::clone(published).downcast::<StructureSchema<T>>() {
        Ok(existing) if !Arc::ptr_eq(&existing, &schema) => {
            warn!(structure = schema.name(), "schema compiled concurrently; keeping the first");
            Ok(existing)
        }
        _ => {
            debug!(
                structure = schema.name(),
                fields = schema.fields().len(),
                base = schema.base_name(),
                "schema compiled"
            );
            Ok(schema)
        }
    }
}

pub fn read<T: Structure>(instance: &mut T, reader: &mut dyn Read) -> StructResult<()> {
    let mut r = StreamReader::new(reader);
    compile::<T>()?.read(instance, &mut r)
}

pub fn write<T: Structure>(instance: &T, writer: &mut dyn Write) -> StructResult<()> {
    let mut w = StreamWriter::new(writer);
    compile::<T>()?.write(instance, &mut w)
}

/// Reads a fresh `T` from the start of `bytes`. Trailing bytes are ignored.
pub fn from_bytes<T: Structure>(bytes: &[u8]) -> StructResult<T> {
    let mut instance = T::default();
    read(&mut instance, &mut Cursor::new(bytes))?;
    Ok(instance)
}

pub fn to_bytes<T: Structure>(instance: &T) -> StructResult<Vec<u8>> {
    let mut out = Vec::new();
    write(instance, &mut out)?;
    Ok(out)
}
