//! Benchmark: typed read/write of a resource table versus the same layout decoded
//! into records from a text description.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use structlayout::{
    compile, from_bytes, structure_field, to_bytes, Endianness, LayoutSchemas, LengthStrategy,
    Structure, StructureBuilder,
};

#[derive(Debug, Default, Clone, PartialEq)]
struct ResourceKey {
    instance: u32,
    type_id: u32,
    group: u32,
}

impl Structure for ResourceKey {
    fn describe(s: &mut StructureBuilder<Self>) {
        s.field("instance", |k| &k.instance, |k| &mut k.instance);
        s.field("type_id", |k| &k.type_id, |k| &mut k.type_id);
        s.field("group", |k| &k.group, |k| &mut k.group);
    }
}

structure_field!(ResourceKey);

#[derive(Debug, Default, Clone, PartialEq)]
struct Table {
    version: i32,
    name: String,
    keys: Vec<ResourceKey>,
}

impl Structure for Table {
    fn describe(s: &mut StructureBuilder<Self>) {
        s.endian(Endianness::Little);
        s.field("version", |t| &t.version, |t| &mut t.version).unsigned(16);
        s.field("name", |t| &t.name, |t| &mut t.name)
            .length(LengthStrategy::prefixed(8));
        s.field("keys", |t| &t.keys, |t| &mut t.keys)
            .length(LengthStrategy::prefixed(32));
    }
}

const TABLE_LAYOUT: &str = r#"
struct ResourceKey {
    instance: u32;
    type_id: u32;
    group: u32;
}

struct Table {
    version: i32 unsigned(16);
    name: string length(prefix 8);
    keys: list<ResourceKey> length(prefix 32);
}
"#;

fn sample_table(n: u32) -> Table {
    Table {
        version: 3,
        name: "resources".into(),
        keys: (0..n)
            .map(|i| ResourceKey {
                instance: i,
                type_id: i.wrapping_mul(31),
                group: 7,
            })
            .collect(),
    }
}

fn bench_transcode(c: &mut Criterion) {
    let table = sample_table(1000);
    let bytes = to_bytes(&table).expect("encode");
    compile::<Table>().expect("compile");

    c.bench_function("typed_write_1000_keys", |b| {
        b.iter(|| to_bytes(black_box(&table)).expect("encode"))
    });
    c.bench_function("typed_read_1000_keys", |b| {
        b.iter(|| from_bytes::<Table>(black_box(&bytes)).expect("decode"))
    });

    let layouts = LayoutSchemas::parse(TABLE_LAYOUT).expect("layout");
    c.bench_function("layout_decode_1000_keys", |b| {
        b.iter(|| layouts.decode("Table", black_box(&bytes)).expect("decode"))
    });
    let record = layouts.decode("Table", &bytes).expect("decode");
    c.bench_function("layout_encode_1000_keys", |b| {
        b.iter(|| layouts.encode("Table", black_box(&record)).expect("encode"))
    });
    c.bench_function("layout_compile", |b| {
        b.iter(|| LayoutSchemas::parse(black_box(TABLE_LAYOUT)).expect("layout"))
    });
}

criterion_group!(benches, bench_transcode);
criterion_main!(benches);
