//! Batch decoding: many independent blobs, or back-to-back instances in one buffer.
//!
//! A blob that fails to decode is reported with its error and never affects the
//! others; the schema is shared read-only by every decode.

use crate::error::StructError;
use crate::schema::StructureSchema;
use crate::stream::StreamReader;
use std::io::Cursor;
use tracing::debug;

/// Outcome of a batch: successfully decoded items and failures, each tagged with its input index.
#[derive(Debug)]
pub struct BatchResult<T> {
    pub decoded: Vec<DecodedItem<T>>,
    pub failed: Vec<FailedItem>,
}

impl<T> BatchResult<T> {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Debug)]
pub struct DecodedItem<T> {
    pub index: usize,
    pub value: T,
    /// Bytes read by the schema.
    pub consumed: usize,
    /// Bytes of the input left over after the instance.
    pub trailing: usize,
}

#[derive(Debug)]
pub struct FailedItem {
    pub index: usize,
    /// Bytes read before the failure.
    pub consumed: usize,
    pub error: StructError,
}

/// Decodes one `T` from the start of `bytes`; returns the bytes consumed alongside the result.
pub fn decode_one<T: 'static>(
    schema: &StructureSchema<T>,
    mut instance: T,
    bytes: &[u8],
) -> (usize, Result<T, StructError>) {
    let mut cursor = Cursor::new(bytes);
    let mut r = StreamReader::new(&mut cursor);
    let result = schema.read(&mut instance, &mut r);
    let consumed = r.position() as usize;
    (consumed, result.map(|()| instance))
}

/// Decodes every input independently with a fresh instance from `new_instance`.
pub fn decode_batch<T, I, B>(
    schema: &StructureSchema<T>,
    new_instance: impl Fn() -> T,
    inputs: I,
) -> BatchResult<T>
where
    T: 'static,
    I: IntoIterator<Item = B>,
    B: AsRef<[u8]>,
{
    let mut decoded = Vec::new();
    let mut failed = Vec::new();
    for (index, input) in inputs.into_iter().enumerate() {
        let bytes = input.as_ref();
        match decode_one(schema, new_instance(), bytes) {
            (consumed, Ok(value)) => decoded.push(DecodedItem {
                index,
                value,
                consumed,
                trailing: bytes.len().saturating_sub(consumed),
            }),
            (consumed, Err(error)) => {
                debug!(structure = schema.name(), index, error = %error, "batch item failed");
                failed.push(FailedItem {
                    index,
                    consumed,
                    error,
                })
            }
        }
    }
    BatchResult { decoded, failed }
}

/// Decodes instances laid out back to back in `bytes` until the buffer is exhausted.
///
/// Decoding stops at the first failure, since the position of the next instance
/// is then unknown; the failure is reported with the offset it started at as its
/// index. An instance that consumes no bytes ends the sequence.
pub fn decode_sequence<T: 'static>(
    schema: &StructureSchema<T>,
    new_instance: impl Fn() -> T,
    bytes: &[u8],
) -> BatchResult<T> {
    let mut decoded = Vec::new();
    let mut failed = Vec::new();
    let mut offset = 0;
    while offset < bytes.len() {
        let (consumed, result) = decode_one(schema, new_instance(), &bytes[offset..]);
        match result {
            Ok(value) if consumed > 0 => {
                decoded.push(DecodedItem {
                    index: offset,
                    value,
                    consumed,
                    trailing: bytes.len() - offset - consumed,
                });
                offset += consumed;
            }
            Ok(_) => break,
            Err(error) => {
                failed.push(FailedItem {
                    index: offset,
                    consumed,
                    error,
                });
                break;
            }
        }
    }
    BatchResult { decoded, failed }
}
