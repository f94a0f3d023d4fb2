//! Layout fuzz target: feed arbitrary text to the layout parser and compiler, then
//! build and encode a default record of every structure that compiles. Nothing may panic.
//! Build with: cargo fuzz run layout_fuzz (requires nightly and cargo fuzz).

#![cfg_attr(fuzzing, no_main)]

#[cfg(fuzzing)]
use libfuzzer_sys::fuzz_target;

#[cfg(fuzzing)]
fuzz_target!(|data: &[u8]| {
    let s = match std::str::from_utf8(data) {
        Ok(x) => x,
        Err(_) => return,
    };
    let Ok(layouts) = structlayout::LayoutSchemas::parse(s) else {
        return;
    };
    for name in layouts.names() {
        if let Ok(record) = layouts.new_record(name) {
            let _ = layouts.encode(name, &record);
        }
    }
});

#[cfg(not(fuzzing))]
fn main() {
    eprintln!("Build with: cargo fuzz run layout_fuzz");
}
