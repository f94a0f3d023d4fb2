//! Decode fuzz target: arbitrary bytes against a fixed layout with every field kind.
//! Decoding may fail but must not panic.
//! Build with: cargo fuzz run decode_fuzz (requires nightly and cargo fuzz).

#![cfg_attr(fuzzing, no_main)]

#[cfg(fuzzing)]
use libfuzzer_sys::fuzz_target;

#[cfg(fuzzing)]
const LAYOUT: &str = r#"
struct Key @big { id: u16; group: u32; }
struct Base { version: u8; }
struct Blob : Base {
    count: u16;
    name: string encoding(utf16le) length(prefix 8);
    label: string;
    tags: string[2] element_length(fixed 4);
    keys: list<Key> length(field count);
    flags: list<bool> length(prefix 8);
    scale: f64 if version >= 2;
    inner: Key;
}
"#;

#[cfg(fuzzing)]
fuzz_target!(|data: &[u8]| {
    if let Ok(layouts) = structlayout::LayoutSchemas::parse(LAYOUT) {
        let _ = layouts.decode("Blob", data);
    }
});

#[cfg(not(fuzzing))]
fn main() {
    eprintln!("Build with: cargo fuzz run decode_fuzz");
}
