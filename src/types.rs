//! In-memory type capabilities.
//!
//! A field's in-memory type is described by a [`TypeInfo`]: a bag of optional
//! capabilities (fixed array, growable list, numeric, boolean, textual,
//! structure). A type may advertise several; the compiler picks exactly one by
//! precedence. All access goes through `&dyn Any` so descriptors stay free of
//! the field's concrete type.

use crate::compiler::{compile, Structure};
use crate::error::StructResult;
use crate::schema::ErasedSchema;
use crate::value::{NumericType, Value};
use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

pub type NewInstance = Arc<dyn Fn() -> Box<dyn Any> + Send + Sync>;
pub type SchemaSource = Arc<dyn Fn() -> StructResult<Arc<dyn ErasedSchema>> + Send + Sync>;

/// Reads and writes one scalar slot as a [`Value`].
#[derive(Clone, Copy)]
pub struct ScalarAccess {
    pub get: fn(&dyn Any) -> Option<Value>,
    /// Returns false when the slot or the value has the wrong type.
    pub set: fn(&mut dyn Any, Value) -> bool,
}

impl ScalarAccess {
    pub fn of<V: Scalar>() -> Self {
        ScalarAccess {
            get: get_scalar::<V>,
            set: set_scalar::<V>,
        }
    }
}

/// Element access into an ordered container slot.
#[derive(Clone, Copy)]
pub struct SeqAccess {
    pub len: fn(&dyn Any) -> Option<usize>,
    pub item: fn(&dyn Any, usize) -> Option<&dyn Any>,
    pub clear: fn(&mut dyn Any) -> bool,
    pub push: fn(&mut dyn Any, Box<dyn Any>) -> bool,
    pub replace: fn(&mut dyn Any, usize, Box<dyn Any>) -> bool,
}

#[derive(Clone)]
pub struct ArrayInfo {
    pub len: usize,
    pub seq: SeqAccess,
    pub element: Box<TypeInfo>,
}

#[derive(Clone)]
pub struct ListInfo {
    pub seq: SeqAccess,
    pub element: Box<TypeInfo>,
}

#[derive(Clone, Copy)]
pub struct NumericInfo {
    pub ty: NumericType,
    pub access: ScalarAccess,
}

/// A type that owns a schema of its own.
#[derive(Clone)]
pub struct StructureType {
    pub name: String,
    pub schema: SchemaSource,
    /// Projects the field slot onto the structure instance; `None` when absent.
    pub nested: fn(&dyn Any) -> Option<&dyn Any>,
    pub nested_mut: fn(&mut dyn Any) -> Option<&mut dyn Any>,
}

#[derive(Clone)]
pub struct TypeInfo {
    pub name: String,
    pub type_id: TypeId,
    pub new: NewInstance,
    pub array: Option<ArrayInfo>,
    pub list: Option<ListInfo>,
    pub numeric: Option<NumericInfo>,
    pub boolean: Option<ScalarAccess>,
    pub text: Option<ScalarAccess>,
    pub structure: Option<StructureType>,
}

impl fmt::Debug for TypeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeInfo")
            .field("name", &self.name)
            .field("array", &self.array.as_ref().map(|a| a.len))
            .field("list", &self.list.is_some())
            .field("numeric", &self.numeric.map(|n| n.ty))
            .field("boolean", &self.boolean.is_some())
            .field("text", &self.text.is_some())
            .field("structure", &self.structure.as_ref().map(|s| &s.name))
            .finish()
    }
}

impl TypeInfo {
    /// A capability-less description of `V`; add capabilities with the `with_*` methods.
    pub fn of<V: Default + 'static>(name: impl Into<String>) -> Self {
        TypeInfo::opaque(
            name,
            TypeId::of::<V>(),
            Arc::new(|| Box::new(V::default()) as Box<dyn Any>),
        )
    }

    pub fn opaque(name: impl Into<String>, type_id: TypeId, new: NewInstance) -> Self {
        TypeInfo {
            name: name.into(),
            type_id,
            new,
            array: None,
            list: None,
            numeric: None,
            boolean: None,
            text: None,
            structure: None,
        }
    }

    pub fn with_array(mut self, len: usize, seq: SeqAccess, element: TypeInfo) -> Self {
        self.array = Some(ArrayInfo {
            len,
            seq,
            element: Box::new(element),
        });
        self
    }

    pub fn with_list(mut self, seq: SeqAccess, element: TypeInfo) -> Self {
        self.list = Some(ListInfo {
            seq,
            element: Box::new(element),
        });
        self
    }

    pub fn with_numeric(mut self, ty: NumericType, access: ScalarAccess) -> Self {
        self.numeric = Some(NumericInfo { ty, access });
        self
    }

    pub fn with_boolean(mut self, access: ScalarAccess) -> Self {
        self.boolean = Some(access);
        self
    }

    pub fn with_text(mut self, access: ScalarAccess) -> Self {
        self.text = Some(access);
        self
    }

    pub fn with_structure(mut self, structure: StructureType) -> Self {
        self.structure = Some(structure);
        self
    }

    /// Description of a `Structure` stored inline.
    pub fn structure<S: Structure>() -> Self {
        let name = short_type_name::<S>();
        TypeInfo::of::<S>(name.clone()).with_structure(StructureType {
            name,
            schema: Arc::new(|| compile::<S>().map(|s| s as Arc<dyn ErasedSchema>)),
            nested: inline,
            nested_mut: inline_mut,
        })
    }
}

/// Types that can be declared as structure fields.
pub trait FieldType: Send + Sync + 'static {
    fn type_info() -> TypeInfo;
}

/// Scalar in-memory types convertible to and from [`Value`].
pub trait Scalar: Sized + 'static {
    fn to_value(&self) -> Value;
    fn from_value(v: Value) -> Option<Self>;
}

fn get_scalar<V: Scalar>(a: &dyn Any) -> Option<Value> {
    a.downcast_ref::<V>().map(V::to_value)
}

fn set_scalar<V: Scalar>(a: &mut dyn Any, v: Value) -> bool {
    match (a.downcast_mut::<V>(), V::from_value(v)) {
        (Some(slot), Some(x)) => {
            *slot = x;
            true
        }
        _ => false,
    }
}

macro_rules! numeric_field {
    ($($t:ty => $nt:ident / $variant:ident),* $(,)?) => {$(
        impl Scalar for $t {
            fn to_value(&self) -> Value {
                Value::$variant(*self)
            }
            fn from_value(v: Value) -> Option<Self> {
                match v.cast(NumericType::$nt)? {
                    Value::$variant(x) => Some(x),
                    _ => None,
                }
            }
        }

        impl FieldType for $t {
            fn type_info() -> TypeInfo {
                TypeInfo::of::<$t>(stringify!($t))
                    .with_numeric(NumericType::$nt, ScalarAccess::of::<$t>())
            }
        }
    )*};
}

numeric_field! {
    i8 => I8 / I8,
    i16 => I16 / I16,
    i32 => I32 / I32,
    i64 => I64 / I64,
    u8 => U8 / U8,
    u16 => U16 / U16,
    u32 => U32 / U32,
    u64 => U64 / U64,
    f32 => F32 / Float,
    f64 => F64 / Double,
}

impl Scalar for bool {
    fn to_value(&self) -> Value {
        Value::Bool(*self)
    }
    fn from_value(v: Value) -> Option<Self> {
        v.as_bool()
    }
}

impl FieldType for bool {
    fn type_info() -> TypeInfo {
        TypeInfo::of::<bool>("bool").with_boolean(ScalarAccess::of::<bool>())
    }
}

impl Scalar for String {
    fn to_value(&self) -> Value {
        Value::Text(self.clone())
    }
    fn from_value(v: Value) -> Option<Self> {
        match v {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl FieldType for String {
    fn type_info() -> TypeInfo {
        TypeInfo::of::<String>("String").with_text(ScalarAccess::of::<String>())
    }
}

fn vec_len<E: 'static>(a: &dyn Any) -> Option<usize> {
    a.downcast_ref::<Vec<E>>().map(Vec::len)
}

fn vec_item<E: 'static>(a: &dyn Any, i: usize) -> Option<&dyn Any> {
    a.downcast_ref::<Vec<E>>()?.get(i).map(|e| e as &dyn Any)
}

fn vec_clear<E: 'static>(a: &mut dyn Any) -> bool {
    match a.downcast_mut::<Vec<E>>() {
        Some(v) => {
            v.clear();
            true
        }
        None => false,
    }
}

fn vec_push<E: 'static>(a: &mut dyn Any, item: Box<dyn Any>) -> bool {
    match (a.downcast_mut::<Vec<E>>(), item.downcast::<E>()) {
        (Some(v), Ok(e)) => {
            v.push(*e);
            true
        }
        _ => false,
    }
}

fn vec_replace<E: 'static>(a: &mut dyn Any, i: usize, item: Box<dyn Any>) -> bool {
    match (a.downcast_mut::<Vec<E>>(), item.downcast::<E>()) {
        (Some(v), Ok(e)) if i < v.len() => {
            v[i] = *e;
            true
        }
        _ => false,
    }
}

impl<E: FieldType> FieldType for Vec<E> {
    fn type_info() -> TypeInfo {
        let element = E::type_info();
        let seq = SeqAccess {
            len: vec_len::<E>,
            item: vec_item::<E>,
            clear: vec_clear::<E>,
            push: vec_push::<E>,
            replace: vec_replace::<E>,
        };
        TypeInfo::of::<Vec<E>>(format!("Vec<{}>", element.name)).with_list(seq, element)
    }
}

fn array_len<E: 'static, const N: usize>(a: &dyn Any) -> Option<usize> {
    a.downcast_ref::<[E; N]>().map(|_| N)
}

fn array_item<E: 'static, const N: usize>(a: &dyn Any, i: usize) -> Option<&dyn Any> {
    a.downcast_ref::<[E; N]>()?.get(i).map(|e| e as &dyn Any)
}

fn array_fixed(_: &mut dyn Any) -> bool {
    false
}

fn array_push(_: &mut dyn Any, _: Box<dyn Any>) -> bool {
    false
}

fn array_replace<E: 'static, const N: usize>(a: &mut dyn Any, i: usize, item: Box<dyn Any>) -> bool {
    match (a.downcast_mut::<[E; N]>(), item.downcast::<E>()) {
        (Some(arr), Ok(e)) if i < N => {
            arr[i] = *e;
            true
        }
        _ => false,
    }
}

impl<E: FieldType + Default, const N: usize> FieldType for [E; N] {
    fn type_info() -> TypeInfo {
        let element = E::type_info();
        let seq = SeqAccess {
            len: array_len::<E, N>,
            item: array_item::<E, N>,
            clear: array_fixed,
            push: array_push,
            replace: array_replace::<E, N>,
        };
        TypeInfo::opaque(
            format!("[{}; {}]", element.name, N),
            TypeId::of::<[E; N]>(),
            Arc::new(|| Box::new(std::array::from_fn::<E, N, _>(|_| E::default())) as Box<dyn Any>),
        )
        .with_array(N, seq, element)
    }
}

fn inline(a: &dyn Any) -> Option<&dyn Any> {
    Some(a)
}

fn inline_mut(a: &mut dyn Any) -> Option<&mut dyn Any> {
    Some(a)
}

fn option_inner<S: 'static>(a: &dyn Any) -> Option<&dyn Any> {
    a.downcast_ref::<Option<S>>()?
        .as_ref()
        .map(|s| s as &dyn Any)
}

fn option_inner_mut<S: 'static>(a: &mut dyn Any) -> Option<&mut dyn Any> {
    a.downcast_mut::<Option<S>>()?
        .as_mut()
        .map(|s| s as &mut dyn Any)
}

/// An optional nested structure; `None` is a missing instance on transcode.
/// Fresh elements are constructed as `Some(S::default())`.
impl<S: Structure> FieldType for Option<S> {
    fn type_info() -> TypeInfo {
        let name = short_type_name::<S>();
        TypeInfo::opaque(
            format!("Option<{name}>"),
            TypeId::of::<Option<S>>(),
            Arc::new(|| Box::new(Some(S::default())) as Box<dyn Any>),
        )
        .with_structure(StructureType {
            name,
            schema: Arc::new(|| compile::<S>().map(|s| s as Arc<dyn ErasedSchema>)),
            nested: option_inner::<S>,
            nested_mut: option_inner_mut::<S>,
        })
    }
}

/// Makes a [`Structure`] usable as a field (inline, in arrays and in lists).
#[macro_export]
macro_rules! structure_field {
    ($($t:ty),+ $(,)?) => {$(
        impl $crate::types::FieldType for $t {
            fn type_info() -> $crate::types::TypeInfo {
                $crate::types::TypeInfo::structure::<$t>()
            }
        }
    )+};
}

/// Last path segment of a type name, generics dropped.
pub fn short_type_name<T: ?Sized>() -> String {
    let full = std::any::type_name::<T>();
    let head = full.split('<').next().unwrap_or(full);
    head.rsplit("::").next().unwrap_or(head).to_string()
}
