//! Format decoded records as an indented text tree.

use crate::value::{Record, Value};

/// Scalar without decoration; text is quoted, compound values fall back to `Debug`.
pub fn format_scalar_raw(v: &Value) -> String {
    match v {
        Value::U8(x) => format!("{}", x),
        Value::U16(x) => format!("{}", x),
        Value::U32(x) => format!("{}", x),
        Value::U64(x) => format!("{}", x),
        Value::I8(x) => format!("{}", x),
        Value::I16(x) => format!("{}", x),
        Value::I32(x) => format!("{}", x),
        Value::I64(x) => format!("{}", x),
        Value::Bool(x) => format!("{}", x),
        Value::Float(x) => format!("{}", x),
        Value::Double(x) => format!("{}", x),
        Value::Text(s) => format!("{:?}", s),
        _ => format!("{:?}", v),
    }
}

/// One value at `indent`, nested records and lists spread over several lines.
pub fn format_value(v: &Value, indent: usize) -> String {
    let pad = "  ".repeat(indent);
    match v {
        Value::Struct(record) => format_record(record, indent),
        Value::List(items) if items.is_empty() => format!("{}[]", pad),
        Value::List(items) => {
            let mut lines = vec![format!("{}[", pad)];
            for (i, item) in items.iter().enumerate() {
                let sub = format_value(item, indent + 1);
                lines.push(format!("{}  [{}] {}", pad, i, sub.trim_start()));
            }
            lines.push(format!("{}]", pad));
            lines.join("\n")
        }
        scalar => format!("{}{}", pad, format_scalar_raw(scalar)),
    }
}

pub fn format_record(record: &Record, indent: usize) -> String {
    let pad = "  ".repeat(indent);
    let mut lines = vec![format!("{}{} {{", pad, record.type_name())];
    for (name, value) in record.fields() {
        let sub = format_value(value, indent + 1);
        lines.push(format!("{}  {}: {}", pad, name, sub.trim_start()));
    }
    lines.push(format!("{}}}", pad));
    lines.join("\n")
}
