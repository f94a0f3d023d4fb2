//! Batch decoding: independent blobs and back-to-back instances.

use structlayout::batch::decode_one;
use structlayout::{
    compile, decode_batch, decode_sequence, ErrorKind, LayoutSchemas, LengthStrategy, Structure,
    StructureBuilder, Value,
};

#[derive(Debug, Default, Clone, PartialEq)]
struct Entry {
    id: u16,
    name: String,
}

impl Structure for Entry {
    fn describe(s: &mut StructureBuilder<Self>) {
        s.field("id", |e| &e.id, |e| &mut e.id);
        s.field("name", |e| &e.name, |e| &mut e.name)
            .length(LengthStrategy::prefixed(8));
    }
}

#[test]
fn test_failures_do_not_affect_other_items() {
    let schema = compile::<Entry>().expect("compile");
    let inputs: Vec<Vec<u8>> = vec![
        vec![1, 0, 2, b'a', b'b'],
        vec![2, 0, 5, b'x'],
        vec![3, 0, 0, 0xFF, 0xFF],
    ];
    let result = decode_batch(&schema, Entry::default, &inputs);
    assert!(!result.is_complete());
    assert_eq!(result.decoded.len(), 2);
    assert_eq!(result.failed.len(), 1);

    let first = &result.decoded[0];
    assert_eq!(first.index, 0);
    assert_eq!(first.value, Entry { id: 1, name: "ab".into() });
    assert_eq!((first.consumed, first.trailing), (5, 0));

    let third = &result.decoded[1];
    assert_eq!(third.index, 2);
    assert_eq!(third.value.id, 3);
    assert_eq!((third.consumed, third.trailing), (3, 2));

    let failed = &result.failed[0];
    assert_eq!(failed.index, 1);
    assert_eq!(failed.consumed, 4);
    assert!(matches!(failed.error.kind(), ErrorKind::Io(_)));
    assert_eq!(failed.error.path(), "Entry.name");
}

#[test]
fn test_decode_one_reports_extent() {
    let schema = compile::<Entry>().expect("compile");
    let (consumed, result) = decode_one(&schema, Entry::default(), &[9, 0, 1, b'z', 7, 7]);
    assert_eq!(consumed, 4);
    assert_eq!(result.expect("decode").name, "z");
}

#[test]
fn test_sequence_stops_at_first_failure() {
    let schema = compile::<Entry>().expect("compile");
    let bytes = [1, 0, 1, b'a', 2, 0, 0, 3, 0, 4, b'x'];
    let result = decode_sequence(&schema, Entry::default, &bytes);
    let ids: Vec<u16> = result.decoded.iter().map(|d| d.value.id).collect();
    assert_eq!(ids, [1, 2]);
    let offsets: Vec<usize> = result.decoded.iter().map(|d| d.index).collect();
    assert_eq!(offsets, [0, 4]);
    assert_eq!(result.failed.len(), 1);
    assert_eq!(result.failed[0].index, 7);
}

#[test]
fn test_layout_records_in_a_batch() {
    let layouts = LayoutSchemas::parse("struct Pair @big { a: u16; b: bool; }").expect("compile");
    let schema = layouts.schema("Pair").expect("schema");
    let template = layouts.new_record("Pair").expect("record");
    let result = decode_batch(schema, || template.clone(), [&[0x01u8, 0x02, 1][..], &[0x00u8][..]]);
    assert_eq!(result.decoded.len(), 1);
    assert_eq!(result.decoded[0].value.get("a"), Some(&Value::U16(0x0102)));
    assert_eq!(result.decoded[0].value.get("b"), Some(&Value::Bool(true)));
    assert_eq!(result.failed[0].index, 1);
}
