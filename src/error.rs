//! Errors raised while compiling a structure schema or transcoding an instance.
//!
//! Every failure carries an attribution trail of `(structure, field)` pairs,
//! innermost first, so a failure deep inside a nested structure reports the
//! whole path that led to it.

use std::fmt;

/// One step of an error's attribution trail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldRef {
    pub structure: String,
    pub field: String,
}

/// What went wrong. Variants up to `Layout` are configuration bugs found while
/// compiling; the rest are data or stream problems found per call.
#[derive(Debug, thiserror::Error)]
pub enum ErrorKind {
    #[error("unsupported field type `{0}`")]
    UnsupportedType(String),
    #[error("growable field of type `{0}` has no length strategy")]
    MissingLength(String),
    #[error("unsupported unsigned width {0}; only 8-, 16- and 32-bit unsigned integers are supported")]
    UnsupportedUnsignedWidth(u32),
    #[error("{bits}-bit unsigned values do not fit in `{type_name}`")]
    UnsignedTooNarrow { bits: u32, type_name: String },
    #[error("unsupported length prefix of {0} bits; only 8, 16, 32 and 64 are supported")]
    UnsupportedPrefixWidth(u32),
    #[error("cyclic structure reference through `{0}`")]
    CyclicStructure(String),
    #[error("invalid field configuration: {0}")]
    InvalidConfig(String),
    #[error("layout: {0}")]
    Layout(String),

    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    #[error("length mismatch: declared {expected}, value has {actual}")]
    LengthMismatch { expected: usize, actual: usize },
    #[error("nested structure instance is missing")]
    MissingInstance,
    #[error("length unavailable: {0}")]
    InvalidLength(String),
    #[error("custom hook failed: {0:#}")]
    Hook(anyhow::Error),
    #[error("type mismatch: {0}")]
    TypeMismatch(String),
}

impl ErrorKind {
    /// Compile-time errors are schema bugs; retrying cannot fix them.
    pub fn is_compile_error(&self) -> bool {
        matches!(
            self,
            ErrorKind::UnsupportedType(_)
                | ErrorKind::MissingLength(_)
                | ErrorKind::UnsupportedUnsignedWidth(_)
                | ErrorKind::UnsignedTooNarrow { .. }
                | ErrorKind::UnsupportedPrefixWidth(_)
                | ErrorKind::CyclicStructure(_)
                | ErrorKind::InvalidConfig(_)
                | ErrorKind::Layout(_)
        )
    }
}

/// The single error type of the crate: a cause plus where it happened.
#[derive(Debug)]
pub struct StructError {
    kind: ErrorKind,
    trail: Vec<FieldRef>,
}

pub type StructResult<T> = Result<T, StructError>;

impl StructError {
    pub fn new(kind: ErrorKind) -> Self {
        StructError { kind, trail: Vec::new() }
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    pub fn into_kind(self) -> ErrorKind {
        self.kind
    }

    /// Attribution trail, innermost field first.
    pub fn trail(&self) -> &[FieldRef] {
        &self.trail
    }

    pub fn is_compile_error(&self) -> bool {
        self.kind.is_compile_error()
    }

    /// Appends the enclosing `(structure, field)` to the trail.
    pub fn at(mut self, structure: &str, field: &str) -> Self {
        self.trail.push(FieldRef {
            structure: structure.to_string(),
            field: field.to_string(),
        });
        self
    }

    /// Dotted path from the outermost structure down to the failing field.
    pub fn path(&self) -> String {
        self.trail
            .iter()
            .rev()
            .map(|r| format!("{}.{}", r.structure, r.field))
            .collect::<Vec<_>>()
            .join(" -> ")
    }
}

impl fmt::Display for StructError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.trail.is_empty() {
            write!(f, "{}", self.kind)
        } else {
            write!(f, "{}: {}", self.path(), self.kind)
        }
    }
}

impl std::error::Error for StructError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        std::error::Error::source(&self.kind)
    }
}

impl From<ErrorKind> for StructError {
    fn from(kind: ErrorKind) -> Self {
        StructError::new(kind)
    }
}

impl From<std::io::Error> for StructError {
    fn from(e: std::io::Error) -> Self {
        StructError::new(ErrorKind::Io(e))
    }
}
