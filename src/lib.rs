//! # structlayout: schema-driven binary structure codec
//!
//! Describe the binary layout of a structure once, compile it into an
//! immutable schema, then read and write instances against any byte stream.
//! Schemas are compiled from Rust types implementing [`Structure`] or from a
//! small text layout format, and are cached per type for the life of the
//! process.
//!
//! ## Field kinds
//!
//! - Numerics `u8`..`u64`, `i8`..`i64`, `f32`, `f64`, with optional unsigned
//!   wire widths (8, 16, 32) and per-field byte order
//! - `bool` (one byte)
//! - Strings: ASCII or UTF-16 (LE/BE), zero-terminated, fixed-length or length-prefixed
//! - Fixed arrays `[E; N]`, growable lists `Vec<E>` with a length strategy
//! - Nested structures, single-base inheritance, conditional fields, custom hooks
//!
//! ## Example
//!
//! ```
//! use structlayout::{from_bytes, to_bytes, Endianness, Structure, StructureBuilder};
//!
//! #[derive(Default)]
//! struct Header {
//!     version: i32,
//!     count: u16,
//! }
//!
//! impl Structure for Header {
//!     fn describe(s: &mut StructureBuilder<Self>) {
//!         s.endian(Endianness::Big);
//!         s.field("version", |h| &h.version, |h| &mut h.version).unsigned(8);
//!         s.field("count", |h| &h.count, |h| &mut h.count);
//!     }
//! }
//!
//! let bytes = to_bytes(&Header { version: 2, count: 10 }).unwrap();
//! assert_eq!(bytes, [0x02, 0x00, 0x0A]);
//! let back: Header = from_bytes(&bytes).unwrap();
//! assert_eq!(back.count, 10);
//! ```
//!
//! ## Text layouts
//!
//! ```text
//! struct ResourceKey {
//!     instance: u32;
//!     type_id: u32;
//! }
//!
//! struct Header : Base @big {
//!     count: i32 unsigned(16);
//!     name: string encoding(utf16le) length(prefix 16 @little);
//!     keys: list<ResourceKey> length(field count);
//!     extra: f32 if version >= 2;
//! }
//! ```
//!
//! See [`LayoutSchemas`] and the `tests/` directory for full examples.

pub mod ast;
pub mod batch;
pub mod compiler;
pub mod dump;
pub mod error;
pub mod field;
pub mod layout;
pub mod parser;
pub mod schema;
pub mod stream;
pub mod types;
pub mod value;

pub use ast::{Layout, ResolvedLayout};
pub use batch::{decode_batch, decode_sequence, BatchResult};
pub use compiler::{compile, from_bytes, read, to_bytes, write, FieldDecl, SchemaCompiler, Structure, StructureBuilder};
pub use error::{ErrorKind, FieldRef, StructError, StructResult};
pub use field::{FieldKind, LengthStrategy};
pub use layout::LayoutSchemas;
pub use parser::parse;
pub use schema::{ErasedSchema, StructureSchema};
pub use stream::{Endianness, FieldEndian, StreamContext, StreamReader, StreamWriter, StringEncoding};
pub use types::{FieldType, TypeInfo};
pub use value::{NumericType, Record, Value};
