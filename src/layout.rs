//! Schemas compiled from text layout descriptions.
//!
//! Every text structure compiles to a [`StructureSchema<Record>`]. Field slots
//! are [`Value`]s looked up by name in the record; base fields are stored
//! flattened in the same record, ahead of the structure's own fields.

use crate::ast::{FieldDef, LengthSpec, ResolvedLayout, StructDef, TypeSpec};
use crate::compiler::{FieldDecl, SchemaCompiler, StructureBuilder};
use crate::error::{ErrorKind, StructError, StructResult};
use crate::field::{getter, getter_mut, LengthGetter, LengthStrategy};
use crate::parser;
use crate::schema::{ErasedSchema, StructureSchema};
use crate::stream::{FieldEndian, StreamContext, StreamReader, StreamWriter};
use crate::types::{NewInstance, ScalarAccess, SchemaSource, SeqAccess, StructureType, TypeInfo};
use crate::value::{Record, Value};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

const VALUE_ACCESS: ScalarAccess = ScalarAccess {
    get: get_value,
    set: set_value,
};

const VALUE_SEQ: SeqAccess = SeqAccess {
    len: list_len,
    item: list_item,
    clear: list_clear,
    push: list_push,
    replace: list_replace,
};

fn get_value(a: &dyn Any) -> Option<Value> {
    a.downcast_ref::<Value>().cloned()
}

fn set_value(a: &mut dyn Any, v: Value) -> bool {
    match a.downcast_mut::<Value>() {
        Some(slot) => {
            *slot = v;
            true
        }
        None => false,
    }
}

fn list_len(a: &dyn Any) -> Option<usize> {
    a.downcast_ref::<Value>()?.as_list().map(<[Value]>::len)
}

fn list_item(a: &dyn Any, i: usize) -> Option<&dyn Any> {
    a.downcast_ref::<Value>()?
        .as_list()?
        .get(i)
        .map(|v| v as &dyn Any)
}

fn list_clear(a: &mut dyn Any) -> bool {
    match a.downcast_mut::<Value>() {
        Some(slot) => {
            *slot = Value::List(Vec::new());
            true
        }
        None => false,
    }
}

fn list_push(a: &mut dyn Any, item: Box<dyn Any>) -> bool {
    match (a.downcast_mut::<Value>(), item.downcast::<Value>()) {
        (Some(Value::List(items)), Ok(v)) => {
            items.push(*v);
            true
        }
        _ => false,
    }
}

fn list_replace(a: &mut dyn Any, i: usize, item: Box<dyn Any>) -> bool {
    match (a.downcast_mut::<Value>(), item.downcast::<Value>()) {
        (Some(Value::List(items)), Ok(v)) if i < items.len() => {
            items[i] = *v;
            true
        }
        _ => false,
    }
}

fn value_record(a: &dyn Any) -> Option<&dyn Any> {
    match a.downcast_ref::<Value>()? {
        Value::Struct(r) => Some(r as &dyn Any),
        _ => None,
    }
}

fn value_record_mut(a: &mut dyn Any) -> Option<&mut dyn Any> {
    match a.downcast_mut::<Value>()? {
        Value::Struct(r) => Some(r as &mut dyn Any),
        _ => None,
    }
}

/// Integer view of a condition operand; booleans count as 0 and 1.
fn operand(v: &Value) -> Option<i64> {
    v.as_i64().or_else(|| v.as_bool().map(i64::from))
}

fn to_usize(n: u64, what: &str) -> StructResult<usize> {
    usize::try_from(n)
        .map_err(|_| ErrorKind::InvalidConfig(format!("{what} {n} exceeds the address space")).into())
}

/// Most values a default record may hold, counting through nested structures and arrays.
pub const MAX_RECORD_VALUES: u64 = 1 << 20;

fn unknown(name: &str) -> StructError {
    ErrorKind::Layout(format!("unknown structure `{name}`")).into()
}

/// Compiled schemas and blank records for every structure of a layout.
#[derive(Debug, Default)]
pub struct LayoutSchemas {
    schemas: HashMap<String, Arc<StructureSchema<Record>>>,
    templates: HashMap<String, Record>,
    weights: HashMap<String, u64>,
    order: Vec<String>,
}

impl LayoutSchemas {
    /// Parses, resolves and compiles layout source text.
    pub fn parse(source: &str) -> StructResult<Self> {
        let layout = parser::parse(source).map_err(ErrorKind::Layout)?;
        let resolved = ResolvedLayout::resolve(layout).map_err(ErrorKind::Layout)?;
        LayoutSchemas::compile(&resolved)
    }

    pub fn load(path: impl AsRef<Path>) -> StructResult<Self> {
        let source = std::fs::read_to_string(path)?;
        LayoutSchemas::parse(&source)
    }

    /// Compiles every structure, dependencies (base and nested) first.
    pub fn compile(layout: &ResolvedLayout) -> StructResult<Self> {
        let mut out = LayoutSchemas::default();
        let mut visiting = Vec::new();
        for def in &layout.layout.structs {
            out.ensure(layout, &def.name, &mut visiting)?;
        }
        Ok(out)
    }

    fn ensure(&mut self, layout: &ResolvedLayout, name: &str, visiting: &mut Vec<String>) -> StructResult<()> {
        if self.schemas.contains_key(name) {
            return Ok(());
        }
        if visiting.iter().any(|v| v == name) {
            return Err(ErrorKind::CyclicStructure(name.to_string()).into());
        }
        let def = layout.get_struct(name).ok_or_else(|| unknown(name))?;
        visiting.push(name.to_string());
        if let Some(base) = &def.base {
            self.ensure(layout, base, visiting)
                .map_err(|e| e.at(name, base))?;
        }
        for field in &def.fields {
            if let Some(target) = field.type_spec.struct_ref() {
                self.ensure(layout, target, visiting)
                    .map_err(|e| e.at(name, &field.name))?;
            }
        }
        visiting.pop();

        let (schema, template, weight) = self.build(def)?;
        debug!(
            structure = name,
            fields = schema.fields().len(),
            base = schema.base_name(),
            "layout structure compiled"
        );
        self.schemas.insert(name.to_string(), Arc::new(schema));
        self.templates.insert(name.to_string(), template);
        self.weights.insert(name.to_string(), weight);
        self.order.push(name.to_string());
        Ok(())
    }

    fn build(&self, def: &StructDef) -> StructResult<(StructureSchema<Record>, Record, u64)> {
        let mut b = StructureBuilder::<Record>::new(def.name.clone());
        if let Some(endian) = def.endian {
            b.endian(endian);
        }
        if let Some(encoding) = def.encoding {
            b.encoding(encoding);
        }

        let weight = self.struct_weight(def)?;
        if weight > MAX_RECORD_VALUES {
            return Err(ErrorKind::InvalidConfig(format!(
                "structure `{}` expands to {weight} values, over the limit of {MAX_RECORD_VALUES}",
                def.name
            ))
            .into());
        }

        let mut template = Record::new(&def.name);
        if let Some(base) = &def.base {
            let schema = Arc::clone(self.lookup(base)?);
            for (name, value) in self.template(base)?.fields() {
                template.set(name, value.clone());
            }
            let source: SchemaSource = Arc::new(move || Ok(Arc::clone(&schema) as Arc<dyn ErasedSchema>));
            b.base_with(
                base,
                source,
                getter(|r: &Record| Some(r as &dyn Any)),
                getter_mut(|r: &mut Record| Some(r as &mut dyn Any)),
            );
        }

        for field in &def.fields {
            let info = self
                .type_info(&field.type_spec)
                .map_err(|e| e.at(&def.name, &field.name))?;
            template.set(&field.name, self.default_value(&field.type_spec)?);
            declare(&mut b, field, info)
                .map_err(|e| e.at(&def.name, &field.name))?;
        }

        let schema = SchemaCompiler::compile(b.finish())?;
        Ok((schema, template, weight))
    }

    /// Number of values in a default record of `def`, saturating.
    fn struct_weight(&self, def: &StructDef) -> StructResult<u64> {
        let mut total = match &def.base {
            Some(base) => self.weight_of(base)?,
            None => 0,
        };
        for field in &def.fields {
            total = total.saturating_add(self.weight(&field.type_spec)?);
        }
        Ok(total)
    }

    fn weight(&self, spec: &TypeSpec) -> StructResult<u64> {
        Ok(match spec {
            TypeSpec::StructRef(name) => self.weight_of(name)?.saturating_add(1),
            TypeSpec::Array(inner, n) => self.weight(inner)?.saturating_mul(*n).saturating_add(1),
            TypeSpec::List(inner) => self.weight(inner)?.saturating_add(1),
            _ => 1,
        })
    }

    fn weight_of(&self, name: &str) -> StructResult<u64> {
        self.weights.get(name).copied().ok_or_else(|| unknown(name))
    }

    /// A `Value`-slot description of `spec`.
    fn type_info(&self, spec: &TypeSpec) -> StructResult<TypeInfo> {
        let fresh = self.default_value(spec)?;
        let new: NewInstance = Arc::new(move || Box::new(fresh.clone()) as Box<dyn Any>);
        let info = TypeInfo::opaque(spec.to_string(), TypeId::of::<Value>(), new);
        Ok(match spec {
            TypeSpec::Numeric(nt) => info.with_numeric(*nt, VALUE_ACCESS),
            TypeSpec::Bool => info.with_boolean(VALUE_ACCESS),
            TypeSpec::String => info.with_text(VALUE_ACCESS),
            TypeSpec::StructRef(name) => {
                let schema = Arc::clone(self.lookup(name)?);
                let source: SchemaSource = Arc::new(move || Ok(Arc::clone(&schema) as Arc<dyn ErasedSchema>));
                info.with_structure(StructureType {
                    name: name.clone(),
                    schema: source,
                    nested: value_record,
                    nested_mut: value_record_mut,
                })
            }
            TypeSpec::Array(inner, n) => {
                info.with_array(to_usize(*n, "array length")?, VALUE_SEQ, self.type_info(inner)?)
            }
            TypeSpec::List(inner) => info.with_list(VALUE_SEQ, self.type_info(inner)?),
        })
    }

    fn default_value(&self, spec: &TypeSpec) -> StructResult<Value> {
        Ok(match spec {
            TypeSpec::Numeric(nt) => nt.zero(),
            TypeSpec::Bool => Value::Bool(false),
            TypeSpec::String => Value::Text(String::new()),
            TypeSpec::StructRef(name) => Value::Struct(self.template(name)?.clone()),
            TypeSpec::Array(inner, n) => {
                Value::List(vec![self.default_value(inner)?; to_usize(*n, "array length")?])
            }
            TypeSpec::List(_) => Value::List(Vec::new()),
        })
    }

    fn lookup(&self, name: &str) -> StructResult<&Arc<StructureSchema<Record>>> {
        self.schemas.get(name).ok_or_else(|| unknown(name))
    }

    fn template(&self, name: &str) -> StructResult<&Record> {
        self.templates.get(name).ok_or_else(|| unknown(name))
    }

    pub fn schema(&self, name: &str) -> Option<&Arc<StructureSchema<Record>>> {
        self.schemas.get(name)
    }

    /// Structure names in compilation order (dependencies first).
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    /// A record of `name` with every field, inherited ones included, at its default.
    pub fn new_record(&self, name: &str) -> StructResult<Record> {
        self.template(name).cloned()
    }

    pub fn read(&self, name: &str, record: &mut Record, r: &mut StreamReader<'_>) -> StructResult<()> {
        self.lookup(name)?.read(record, r)
    }

    pub fn write(&self, name: &str, record: &Record, w: &mut StreamWriter<'_>) -> StructResult<()> {
        self.lookup(name)?.write(record, w)
    }

    pub fn decode(&self, name: &str, bytes: &[u8]) -> StructResult<Record> {
        self.decode_with_extent(name, bytes).map(|(record, _)| record)
    }

    /// Decodes from the start of `bytes`; also returns the number of bytes consumed.
    pub fn decode_with_extent(&self, name: &str, bytes: &[u8]) -> StructResult<(Record, u64)> {
        let schema = self.lookup(name)?;
        let mut record = self.new_record(name)?;
        let consumed = schema.read_from(&mut record, Cursor::new(bytes))?;
        Ok((record, consumed))
    }

    pub fn encode(&self, name: &str, record: &Record) -> StructResult<Vec<u8>> {
        let mut out = Vec::new();
        self.lookup(name)?.write_to(record, &mut out)?;
        Ok(out)
    }
}

fn declare(b: &mut StructureBuilder<Record>, field: &FieldDef, info: TypeInfo) -> StructResult<()> {
    let name = field.name.clone();
    let get = {
        let name = name.clone();
        getter(move |r: &Record| r.get(&name).map(|v| v as &dyn Any))
    };
    let get_mut = {
        let name = name.clone();
        getter_mut(move |r: &mut Record| r.get_mut(&name).map(|v| v as &mut dyn Any))
    };
    let decl = b.field_with(FieldDecl::new(&name, info, get, get_mut));
    if let Some(bits) = field.unsigned {
        decl.unsigned(bits);
    }
    if let Some(endian) = field.endian {
        decl.endian(endian.into());
    }
    if let Some(encoding) = field.encoding {
        decl.encoding(encoding);
    }
    if let Some(length) = &field.length {
        decl.length(length_strategy(length)?);
    }
    if let Some(length) = &field.element_length {
        decl.element_length(length_strategy(length)?);
    }
    if let Some(cond) = field.condition.clone() {
        decl.condition(move |r: &Record, _: &StreamContext| {
            r.get(&cond.field)
                .and_then(operand)
                .is_some_and(|x| cond.op.eval(x, cond.value))
        });
    }
    Ok(())
}

fn length_strategy(spec: &LengthSpec) -> StructResult<LengthStrategy<Record>> {
    Ok(match spec {
        LengthSpec::Terminated => LengthStrategy::Terminated,
        LengthSpec::Fixed(n) => LengthStrategy::Fixed(to_usize(*n, "fixed length")?),
        LengthSpec::Prefix { bits, endian } => LengthStrategy::prefixed_with(
            *bits,
            endian.map(FieldEndian::from).unwrap_or_default(),
        ),
        LengthSpec::Field(field) => {
            let name = field.clone();
            let get: LengthGetter<Record> = Arc::new(move |r: &Record| r.get(&name).and_then(Value::as_u64));
            LengthStrategy::Sibling {
                field: field.clone(),
                get,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::FieldKind;

    #[test]
    fn base_fields_are_flattened_into_the_record() {
        let layouts = LayoutSchemas::parse(
            "struct Base { version: u8; }
             struct Msg : Base @big { value: u16; }",
        )
        .unwrap();
        let record = layouts.new_record("Msg").unwrap();
        let names: Vec<&str> = record.fields().map(|(n, _)| n).collect();
        assert_eq!(names, ["version", "value"]);
        assert_eq!(layouts.schema("Msg").unwrap().base_name(), Some("Base"));
        let names: Vec<&str> = layouts.names().collect();
        assert_eq!(names, ["Base", "Msg"]);
    }

    #[test]
    fn field_kinds_come_from_type_specs() {
        let layouts = LayoutSchemas::parse(
            "struct Inner { a: u8; }
             struct Outer {
                 n: u8;
                 flag: bool;
                 name: string;
                 inner: Inner;
                 fixed: u16[3];
                 items: list<Inner> length(field n);
             }",
        )
        .unwrap();
        let schema = layouts.schema("Outer").unwrap();
        let kinds: Vec<&str> = schema.fields().iter().map(|f| f.kind().name()).collect();
        assert_eq!(
            kinds,
            ["Numeric", "Boolean", "String", "NestedStructure", "FixedArray", "GrowableList"]
        );
        let FieldKind::FixedArray { len, .. } = schema.fields()[4].kind() else {
            panic!("expected a fixed array");
        };
        assert_eq!(*len, 3);
    }

    #[test]
    fn nested_cycles_are_compile_errors() {
        let err = LayoutSchemas::parse(
            "struct A { b: B; }
             struct B { a: A; }",
        )
        .unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::CyclicStructure(_)));
        assert!(err.is_compile_error());
    }

    #[test]
    fn nested_arrays_count_against_the_record_limit() {
        let err = LayoutSchemas::parse(
            "struct A { x: u8[1024]; }
             struct B { a: A[2048]; }",
        )
        .unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::InvalidConfig(_)));
        assert!(err.is_compile_error());

        let err = LayoutSchemas::parse("struct C { items: list<u8[4294967295]> length(prefix 8); }")
            .unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::InvalidConfig(_)));

        let layouts = LayoutSchemas::parse(
            "struct A { x: u8[1024]; }
             struct B { a: A[4]; }",
        )
        .unwrap();
        let record = layouts.new_record("B").unwrap();
        let a = record.get("a").and_then(Value::as_list).unwrap();
        assert_eq!(a.len(), 4);
    }

    #[test]
    fn unknown_structures_fail_lookup() {
        let layouts = LayoutSchemas::parse("struct A { a: u8; }").unwrap();
        let err = layouts.decode("B", &[1]).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Layout(_)));
    }

    #[test]
    fn conditions_read_earlier_values() {
        let layouts = LayoutSchemas::parse(
            "struct A { flag: bool; extra: u8 if flag == 1; tail: u8; }",
        )
        .unwrap();
        let with = layouts.decode("A", &[1, 7, 9]).unwrap();
        assert_eq!(with.get("extra"), Some(&Value::U8(7)));
        assert_eq!(with.get("tail"), Some(&Value::U8(9)));
        let without = layouts.decode("A", &[0, 9]).unwrap();
        assert_eq!(without.get("extra"), Some(&Value::U8(0)));
        assert_eq!(without.get("tail"), Some(&Value::U8(9)));
    }
}
