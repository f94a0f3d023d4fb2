//! Parse text layout descriptions into the AST using PEST.

use crate::ast::*;
use crate::stream::{Endianness, StringEncoding};
use crate::value::NumericType;
use pest::iterators::Pair;
use pest::Parser;
use pest_derive::Parser as PestParser;

#[derive(PestParser)]
#[grammar = "grammar.pest"]
struct LayoutParser;

/// Parse layout source into AST.
pub fn parse(source: &str) -> Result<Layout, String> {
    let pairs = LayoutParser::parse(Rule::layout, source)
        .map_err(|e| format!("Parse error: {}", e))?;
    let pair = pairs.into_iter().next().ok_or("Empty parse")?;
    let mut structs = Vec::new();
    for inner in pair.into_inner() {
        if inner.as_rule() == Rule::struct_def {
            structs.push(build_struct(inner)?);
        }
    }
    Ok(Layout { structs })
}

fn build_struct(pair: Pair<Rule>) -> Result<StructDef, String> {
    let mut name = String::new();
    let mut base = None;
    let mut endian = None;
    let mut encoding = None;
    let mut fields = Vec::new();
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::ident => name = inner.as_str().to_string(),
            Rule::base_spec => {
                let id = inner.into_inner().next().ok_or("base: missing name")?;
                base = Some(id.as_str().to_string());
            }
            Rule::endian_attr => endian = Some(parse_endian_attr(inner)?),
            Rule::encoding_attr => encoding = Some(parse_encoding_attr(inner)?),
            Rule::field_def => fields.push(build_field(inner)?),
            _ => {}
        }
    }
    Ok(StructDef {
        name,
        base,
        endian,
        encoding,
        fields,
    })
}

fn build_field(pair: Pair<Rule>) -> Result<FieldDef, String> {
    let mut name = String::new();
    let mut type_spec = None;
    let mut unsigned = None;
    let mut endian = None;
    let mut encoding = None;
    let mut length = None;
    let mut element_length = None;
    let mut condition = None;
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::ident => name = inner.as_str().to_string(),
            Rule::type_spec => type_spec = Some(build_type_spec(inner)?),
            Rule::endian_attr => endian = Some(parse_endian_attr(inner)?),
            Rule::unsigned_mod => {
                let n = inner.into_inner().next().ok_or("unsigned(n) needs number")?;
                unsigned = Some(parse_width(n.as_str())?);
            }
            Rule::encoding_attr => encoding = Some(parse_encoding_attr(inner)?),
            Rule::length_mod => length = Some(build_length(inner)?),
            Rule::element_length_mod => element_length = Some(build_length(inner)?),
            Rule::condition => condition = Some(build_condition(inner)?),
            _ => {}
        }
    }
    Ok(FieldDef {
        type_spec: type_spec.ok_or_else(|| format!("Missing type in field {}", name))?,
        name,
        unsigned,
        endian,
        encoding,
        length,
        element_length,
        condition,
    })
}

fn build_type_spec(pair: Pair<Rule>) -> Result<TypeSpec, String> {
    let mut it = pair.into_inner();
    let head = it.next().ok_or("Empty type_spec")?;
    let element = match head.as_rule() {
        Rule::base_type => parse_base_type(head.as_str())?,
        Rule::struct_ref => TypeSpec::StructRef(head.as_str().trim().to_string()),
        Rule::list_type => {
            let inner = head.into_inner().next().ok_or("list<T>: missing element type")?;
            TypeSpec::List(Box::new(build_type_spec(inner)?))
        }
        other => return Err(format!("Unhandled type rule: {:?}", other)),
    };
    match it.next() {
        Some(suffix) if suffix.as_rule() == Rule::array_suffix => {
            let n = suffix.into_inner().next().ok_or("T[n] needs number")?;
            Ok(TypeSpec::Array(Box::new(element), parse_number(n.as_str())?))
        }
        _ => Ok(element),
    }
}

fn parse_base_type(s: &str) -> Result<TypeSpec, String> {
    match s {
        "bool" => Ok(TypeSpec::Bool),
        "string" => Ok(TypeSpec::String),
        other => NumericType::parse(other)
            .map(TypeSpec::Numeric)
            .ok_or_else(|| format!("Unknown base type: {}", other)),
    }
}

fn build_length(pair: Pair<Rule>) -> Result<LengthSpec, String> {
    let spec = pair.into_inner().next().ok_or("length(): missing spec")?;
    let inner = spec.into_inner().next().ok_or("length(): empty spec")?;
    match inner.as_rule() {
        Rule::terminated_len => Ok(LengthSpec::Terminated),
        Rule::fixed_len => {
            let n = inner.into_inner().next().ok_or("fixed n needs number")?;
            Ok(LengthSpec::Fixed(parse_number(n.as_str())?))
        }
        Rule::prefix_len => {
            let mut it = inner.into_inner();
            let n = it.next().ok_or("prefix n needs number")?;
            let endian = it.next().map(parse_endian_attr).transpose()?;
            Ok(LengthSpec::Prefix {
                bits: parse_width(n.as_str())?,
                endian,
            })
        }
        Rule::field_len => {
            let id = inner.into_inner().next().ok_or("field needs a name")?;
            Ok(LengthSpec::Field(id.as_str().to_string()))
        }
        other => Err(format!("Unhandled length rule: {:?}", other)),
    }
}

fn build_condition(pair: Pair<Rule>) -> Result<Condition, String> {
    let mut it = pair.into_inner();
    let field = it.next().ok_or("if: missing field")?.as_str().to_string();
    let op = match it.next().ok_or("if: missing operator")?.as_str() {
        "==" => CompareOp::Eq,
        "!=" => CompareOp::Ne,
        "<" => CompareOp::Lt,
        "<=" => CompareOp::Le,
        ">" => CompareOp::Gt,
        ">=" => CompareOp::Ge,
        other => return Err(format!("Unknown operator: {}", other)),
    };
    let value = parse_int_literal(it.next().ok_or("if: missing value")?.as_str())?;
    Ok(Condition { field, op, value })
}

fn parse_endian_attr(pair: Pair<Rule>) -> Result<Endianness, String> {
    match pair.into_inner().next().map(|p| p.as_str()) {
        Some("little") => Ok(Endianness::Little),
        Some("big") => Ok(Endianness::Big),
        other => Err(format!("Unknown endianness: {:?}", other)),
    }
}

fn parse_encoding_attr(pair: Pair<Rule>) -> Result<StringEncoding, String> {
    match pair.into_inner().next().map(|p| p.as_str()) {
        Some("ascii") => Ok(StringEncoding::Ascii),
        Some("utf16le") => Ok(StringEncoding::Utf16Le),
        Some("utf16be") => Ok(StringEncoding::Utf16Be),
        other => Err(format!("Unknown encoding: {:?}", other)),
    }
}

fn parse_number(s: &str) -> Result<u64, String> {
    let s = s.trim();
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("Invalid number {}: {}", s, e))
}

fn parse_width(s: &str) -> Result<u32, String> {
    u32::try_from(parse_number(s)?).map_err(|_| format!("Bit width out of range: {}", s))
}

fn parse_int_literal(s: &str) -> Result<i64, String> {
    let (negative, digits) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s),
    };
    let magnitude = i64::try_from(parse_number(digits)?)
        .map_err(|_| format!("Integer out of range: {}", s))?;
    Ok(if negative { -magnitude } else { magnitude })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_structs_fields_and_modifiers() {
        let src = r#"
            // header of every record
            struct Header : Base @big encoding(utf16le) {
                count: i32 unsigned(16);
                name: string length(prefix 16 @little);
                items: list<u16> length(field count);
                keys: Key[2];
                extra: f32 @little if version >= 2;
            }
        "#;
        let layout = parse(src).unwrap();
        let s = &layout.structs[0];
        assert_eq!(s.name, "Header");
        assert_eq!(s.base.as_deref(), Some("Base"));
        assert_eq!(s.endian, Some(Endianness::Big));
        assert_eq!(s.encoding, Some(StringEncoding::Utf16Le));
        assert_eq!(s.fields.len(), 5);
        assert_eq!(s.fields[0].unsigned, Some(16));
        assert_eq!(
            s.fields[1].length,
            Some(LengthSpec::Prefix {
                bits: 16,
                endian: Some(Endianness::Little)
            })
        );
        assert_eq!(
            s.fields[2].type_spec,
            TypeSpec::List(Box::new(TypeSpec::Numeric(NumericType::U16)))
        );
        assert_eq!(s.fields[2].length, Some(LengthSpec::Field("count".into())));
        assert_eq!(
            s.fields[3].type_spec,
            TypeSpec::Array(Box::new(TypeSpec::StructRef("Key".into())), 2)
        );
        let cond = s.fields[4].condition.as_ref().unwrap();
        assert_eq!((cond.field.as_str(), cond.op, cond.value), ("version", CompareOp::Ge, 2));
        assert_eq!(s.fields[4].endian, Some(Endianness::Little));
    }

    #[test]
    fn type_names_need_a_word_boundary() {
        let layout = parse("struct A { x: u8x; y: string8; }").unwrap();
        let f = &layout.structs[0].fields;
        assert_eq!(f[0].type_spec, TypeSpec::StructRef("u8x".into()));
        assert_eq!(f[1].type_spec, TypeSpec::StructRef("string8".into()));
    }

    #[test]
    fn negative_and_hex_literals() {
        let layout = parse("struct A { a: i8; b: u8 if a == -1; c: u8[0x2]; }").unwrap();
        let f = &layout.structs[0].fields;
        assert_eq!(f[1].condition.as_ref().unwrap().value, -1);
        assert_eq!(f[2].type_spec, TypeSpec::Array(Box::new(TypeSpec::Numeric(NumericType::U8)), 2));
    }

    #[test]
    fn syntax_errors_are_reported() {
        assert!(parse("struct A { a u8; }").is_err());
        assert!(parse("struct { }").is_err());
    }
}
