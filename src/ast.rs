//! Abstract syntax tree for text layout descriptions.

use crate::stream::{Endianness, StringEncoding};
use crate::value::NumericType;
use std::collections::HashMap;
use std::fmt;

/// Root of a layout file: structure definitions in source order.
#[derive(Debug, Clone, Default)]
pub struct Layout {
    pub structs: Vec<StructDef>,
}

#[derive(Debug, Clone)]
pub struct StructDef {
    pub name: String,
    pub base: Option<String>,
    pub endian: Option<Endianness>,
    pub encoding: Option<StringEncoding>,
    pub fields: Vec<FieldDef>,
}

#[derive(Debug, Clone)]
pub struct FieldDef {
    pub name: String,
    pub type_spec: TypeSpec,
    pub unsigned: Option<u32>,
    pub endian: Option<Endianness>,
    pub encoding: Option<StringEncoding>,
    pub length: Option<LengthSpec>,
    pub element_length: Option<LengthSpec>,
    pub condition: Option<Condition>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TypeSpec {
    Numeric(NumericType),
    Bool,
    String,
    StructRef(String),
    Array(Box<TypeSpec>, u64),
    List(Box<TypeSpec>),
}

impl TypeSpec {
    /// Structures this type refers to, directly or through containers.
    pub fn struct_ref(&self) -> Option<&str> {
        match self {
            TypeSpec::StructRef(name) => Some(name),
            TypeSpec::Array(inner, _) | TypeSpec::List(inner) => inner.struct_ref(),
            _ => None,
        }
    }
}

impl fmt::Display for TypeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeSpec::Numeric(nt) => write!(f, "{nt}"),
            TypeSpec::Bool => f.write_str("bool"),
            TypeSpec::String => f.write_str("string"),
            TypeSpec::StructRef(name) => f.write_str(name),
            TypeSpec::Array(inner, n) => write!(f, "{inner}[{n}]"),
            TypeSpec::List(inner) => write!(f, "list<{inner}>"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LengthSpec {
    Terminated,
    Fixed(u64),
    Prefix { bits: u32, endian: Option<Endianness> },
    Field(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    pub fn eval(self, lhs: i64, rhs: i64) -> bool {
        match self {
            CompareOp::Eq => lhs == rhs,
            CompareOp::Ne => lhs != rhs,
            CompareOp::Lt => lhs < rhs,
            CompareOp::Le => lhs <= rhs,
            CompareOp::Gt => lhs > rhs,
            CompareOp::Ge => lhs >= rhs,
        }
    }
}

/// `if field <op> value`: the field is transcoded only when the comparison holds.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub field: String,
    pub op: CompareOp,
    pub value: i64,
}

/// Layout with structures indexed by name and references checked.
#[derive(Debug, Clone)]
pub struct ResolvedLayout {
    pub layout: Layout,
    pub structs_by_name: HashMap<String, usize>,
}

impl ResolvedLayout {
    pub fn resolve(layout: Layout) -> Result<Self, String> {
        let mut structs_by_name = HashMap::new();
        for (i, s) in layout.structs.iter().enumerate() {
            if structs_by_name.insert(s.name.clone(), i).is_some() {
                return Err(format!("Duplicate struct name: {}", s.name));
            }
        }
        let resolved = ResolvedLayout {
            layout,
            structs_by_name,
        };
        for s in &resolved.layout.structs {
            resolved.check_struct(s)?;
        }
        Ok(resolved)
    }

    fn check_struct(&self, s: &StructDef) -> Result<(), String> {
        let mut known = match &s.base {
            Some(base) => {
                if self.get_struct(base).is_none() {
                    return Err(format!("{}: unknown base struct {}", s.name, base));
                }
                self.inherited_fields(base)
            }
            None => Vec::new(),
        };
        for f in &s.fields {
            if known.contains(&f.name) {
                return Err(format!("{}: duplicate field {}", s.name, f.name));
            }
            if let Some(target) = f.type_spec.struct_ref() {
                if self.get_struct(target).is_none() {
                    return Err(format!("{}.{}: unknown struct {}", s.name, f.name, target));
                }
            }
            let refs = [
                f.length.as_ref(),
                f.element_length.as_ref(),
            ];
            for len in refs.into_iter().flatten() {
                if let LengthSpec::Field(target) = len {
                    if !known.contains(target) {
                        return Err(format!(
                            "{}.{}: length field {} must be declared earlier",
                            s.name, f.name, target
                        ));
                    }
                }
            }
            if let Some(c) = &f.condition {
                if !known.contains(&c.field) {
                    return Err(format!(
                        "{}.{}: condition field {} must be declared earlier",
                        s.name, f.name, c.field
                    ));
                }
            }
            known.push(f.name.clone());
        }
        Ok(())
    }

    /// Field names of `name` and its bases, base fields first. Stops on a base cycle.
    pub fn inherited_fields(&self, name: &str) -> Vec<String> {
        let mut chain = Vec::new();
        let mut current = self.get_struct(name);
        while let Some(s) = current {
            if chain.iter().any(|c: &&StructDef| c.name == s.name) {
                break;
            }
            chain.push(s);
            current = s.base.as_deref().and_then(|b| self.get_struct(b));
        }
        chain
            .iter()
            .rev()
            .flat_map(|s| s.fields.iter().map(|f| f.name.clone()))
            .collect()
    }

    pub fn get_struct(&self, name: &str) -> Option<&StructDef> {
        self.structs_by_name
            .get(name)
            .map(|&i| &self.layout.structs[i])
    }
}
