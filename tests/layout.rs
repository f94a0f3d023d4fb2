//! Integration tests for text layouts: parse, resolve, compile, decode and encode records.

use std::io::Write;
use structlayout::{parse, ErrorKind, LayoutSchemas, Record, ResolvedLayout, Value};

const HEADER: &str = r#"
// count and items are independent fields on the wire
struct Header {
    count: u32;
    flag: u8;
    items: list<u16> length(field count);
}
"#;

const TABLE: &str = r#"
struct Key @big {
    id: u16;
}

struct Table {
    name: string encoding(utf16le) length(prefix 8);
    keys: list<Key> length(prefix 16 @big);
    tags: string[2] element_length(fixed 3);
    version: i32 unsigned(8);
    extra: f32 if version >= 2;
}
"#;

const INHERITED: &str = r#"
struct Base @big {
    magic: u16;
}

struct Msg : Base {
    value: u16;
}
"#;

#[test]
fn test_parse_and_resolve() {
    let layout = parse(TABLE).expect("parse");
    assert_eq!(layout.structs.len(), 2);
    let resolved = ResolvedLayout::resolve(layout).expect("resolve");
    let table = resolved.get_struct("Table").expect("Table");
    assert_eq!(table.fields.len(), 5);
    assert_eq!(table.fields[2].type_spec.to_string(), "string[2]");
    assert_eq!(table.fields[1].type_spec.to_string(), "list<Key>");
}

#[test]
fn test_header_end_to_end() {
    let layouts = LayoutSchemas::parse(HEADER).expect("compile");
    let bytes = [0x02, 0x00, 0x00, 0x00, 0x01, 0x0A, 0x00, 0x14, 0x00];
    let record = layouts.decode("Header", &bytes).expect("decode");
    assert_eq!(record.type_name(), "Header");
    assert_eq!(record.get("count"), Some(&Value::U32(2)));
    assert_eq!(record.get("flag"), Some(&Value::U8(1)));
    assert_eq!(
        record.get("items"),
        Some(&Value::List(vec![Value::U16(10), Value::U16(20)]))
    );
    assert_eq!(layouts.encode("Header", &record).expect("encode"), bytes);
}

#[test]
fn test_build_record_and_encode() {
    let layouts = LayoutSchemas::parse(HEADER).expect("compile");
    let mut record = layouts.new_record("Header").expect("record");
    record.set("count", Value::U32(1));
    record.set("flag", Value::U8(0));
    record.set("items", Value::List(vec![Value::U16(0xBEEF)]));
    assert_eq!(
        layouts.encode("Header", &record).expect("encode"),
        [1, 0, 0, 0, 0, 0xEF, 0xBE]
    );
}

#[test]
fn test_table_round_trip() {
    let layouts = LayoutSchemas::parse(TABLE).expect("compile");
    let bytes = [
        0x02, b'a', 0x00, b'b', 0x00, // utf-16le name, 8-bit prefix
        0x00, 0x02, 0x00, 0x01, 0x00, 0x02, // two big-endian keys
        b'a', b'b', b'c', b'x', b'y', b'z', // two fixed tags
        0x02, // version
        0x00, 0x00, 0xC0, 0x3F, // extra = 1.5
    ];
    let (record, consumed) = layouts.decode_with_extent("Table", &bytes).expect("decode");
    assert_eq!(consumed, bytes.len() as u64);
    assert_eq!(record.get("name"), Some(&Value::Text("ab".into())));
    assert_eq!(record.get("version"), Some(&Value::I32(2)));
    assert_eq!(record.get("extra"), Some(&Value::Float(1.5)));
    let keys = record.get("keys").and_then(Value::as_list).expect("keys");
    let ids: Vec<&Value> = keys
        .iter()
        .filter_map(Value::as_struct)
        .filter_map(|k| k.get("id"))
        .collect();
    assert_eq!(ids, [&Value::U16(1), &Value::U16(2)]);
    assert_eq!(
        record.get("tags"),
        Some(&Value::List(vec![Value::Text("abc".into()), Value::Text("xyz".into())]))
    );
    assert_eq!(layouts.encode("Table", &record).expect("encode"), bytes);
}

#[test]
fn test_condition_false_skips_field() {
    let layouts = LayoutSchemas::parse(TABLE).expect("compile");
    let bytes = [0x00, 0x00, 0x00, b'a', b'b', b'c', b'x', b'y', b'z', 0x01];
    let (record, consumed) = layouts.decode_with_extent("Table", &bytes).expect("decode");
    assert_eq!(consumed, 10);
    assert_eq!(record.get("version"), Some(&Value::I32(1)));
    assert_eq!(record.get("extra"), Some(&Value::Float(0.0)));
    assert_eq!(layouts.encode("Table", &record).expect("encode"), bytes);
}

#[test]
fn test_inherited_fields_come_first() {
    let layouts = LayoutSchemas::parse(INHERITED).expect("compile");
    let record = layouts.decode("Msg", &[0x12, 0x34, 0x78, 0x56]).expect("decode");
    let fields: Vec<(&str, &Value)> = record.fields().collect();
    assert_eq!(
        fields,
        [("magic", &Value::U16(0x1234)), ("value", &Value::U16(0x5678))]
    );
}

#[test]
fn test_fixed_element_length_violation() {
    let layouts = LayoutSchemas::parse(TABLE).expect("compile");
    let mut record = layouts.new_record("Table").expect("record");
    record.set(
        "tags",
        Value::List(vec![Value::Text("abc".into()), Value::Text("toolong".into())]),
    );
    let err = layouts.encode("Table", &record).unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::LengthMismatch { expected: 3, actual: 7 }));
    assert_eq!(err.path(), "Table.tags");
}

#[test]
fn test_wrong_value_types_are_rejected_on_encode() {
    let layouts = LayoutSchemas::parse(HEADER).expect("compile");
    let mut record = layouts.new_record("Header").expect("record");
    record.set("count", Value::Text("two".into()));
    let err = layouts.encode("Header", &record).unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::TypeMismatch(_)));
    assert_eq!(err.path(), "Header.count");

    let err = layouts.encode("Header", &Record::new("Header")).unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::TypeMismatch(_)));
}

#[test]
fn test_layout_errors() {
    let cases = [
        "struct A { a u8; }",
        "struct A { a: u8; } struct A { b: u8; }",
        "struct B : Missing { }",
        "struct C { inner: Missing; }",
        "struct D { a: u8; a: u16; }",
        "struct E { items: list<u8> length(field n); n: u8; }",
        "struct F { x: u8 if later == 1; later: u8; }",
    ];
    for source in cases {
        let err = LayoutSchemas::parse(source).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Layout(_)), "{source}: {err}");
        assert!(err.is_compile_error());
    }
}

#[test]
fn test_compile_errors_carry_the_field() {
    let err = LayoutSchemas::parse("struct D { x: i8 unsigned(8); }").unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::UnsignedTooNarrow { bits: 8, .. }));
    assert_eq!(err.path(), "D.x");

    let err = LayoutSchemas::parse("struct E { items: list<u8>; }").unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::MissingLength(_)));

    let err = LayoutSchemas::parse("struct F { s: string length(prefix 24); }").unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::UnsupportedPrefixWidth(24)));

    let err = LayoutSchemas::parse("struct G { m: list<list<u8>> length(prefix 8); }").unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::UnsupportedType(_)));
}

#[test]
fn test_base_cycles_are_rejected() {
    let err = LayoutSchemas::parse("struct A : B { } struct B : A { }").unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::CyclicStructure(_)));
}

#[test]
fn test_load_from_file() {
    let mut file = tempfile::NamedTempFile::new().expect("tempfile");
    file.write_all(INHERITED.as_bytes()).expect("write layout");
    let layouts = LayoutSchemas::load(file.path()).expect("load");
    let names: Vec<&str> = layouts.names().collect();
    assert_eq!(names, ["Base", "Msg"]);

    let missing = file.path().with_extension("missing");
    let err = LayoutSchemas::load(&missing).unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::Io(_)));
    assert!(!err.is_compile_error());
}

#[test]
fn test_empty_elements_cannot_inflate_a_list() {
    let layouts =
        LayoutSchemas::parse("struct E { } struct L { items: list<E> length(prefix 32); }")
            .expect("compile");
    let err = layouts.decode("L", &[0xFF, 0xFF, 0xFF, 0xFF]).unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::InvalidLength(_)));
    assert_eq!(err.path(), "L.items");

    let record = layouts.decode("L", &[2, 0, 0, 0]).expect("decode");
    let items = record.get("items").and_then(Value::as_list).expect("items");
    assert_eq!(items.len(), 2);
    assert_eq!(layouts.encode("L", &record).expect("encode"), [2, 0, 0, 0]);
}

#[test]
fn test_zero_length_strings_cannot_inflate_a_list() {
    let layouts = LayoutSchemas::parse(
        "struct S { names: list<string> length(prefix 64) element_length(fixed 0); }",
    )
    .expect("compile");
    let err = layouts.decode("S", &[0xFF; 8]).unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::InvalidLength(_)));
}
