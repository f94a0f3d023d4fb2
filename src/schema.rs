//! Compiled structure schemas.

use crate::error::{ErrorKind, StructError, StructResult};
use crate::field::{FieldDescriptor, Getter, GetterMut};
use crate::stream::{Endianness, StreamReader, StreamWriter};
use std::any::Any;
use std::fmt;
use std::io::{Read, Write};
use std::sync::Arc;
use tracing::trace;

/// Type-erased view of a schema, used for nested fields and base links.
pub trait ErasedSchema: Send + Sync {
    fn type_name(&self) -> &str;
    /// Names of all fields transcoded by this schema, base fields first.
    fn field_names(&self) -> Vec<String>;
    fn read_any(&self, instance: &mut dyn Any, r: &mut StreamReader<'_>) -> StructResult<()>;
    fn write_any(&self, instance: &dyn Any, w: &mut StreamWriter<'_>) -> StructResult<()>;
}

/// Link to the schema of a base structure and the projection onto it.
pub(crate) struct BaseLink<T> {
    pub(crate) schema: Arc<dyn ErasedSchema>,
    pub(crate) project: Getter<T>,
    pub(crate) project_mut: GetterMut<T>,
}

/// Compiled layout of one structure type. Immutable once built.
pub struct StructureSchema<T> {
    name: String,
    endian: Endianness,
    base: Option<BaseLink<T>>,
    fields: Vec<FieldDescriptor<T>>,
}

impl<T: 'static> StructureSchema<T> {
    pub(crate) fn new(
        name: String,
        endian: Endianness,
        base: Option<BaseLink<T>>,
        fields: Vec<FieldDescriptor<T>>,
    ) -> Self {
        StructureSchema {
            name,
            endian,
            base,
            fields,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn endian(&self) -> Endianness {
        self.endian
    }

    /// Own fields in declaration order; base fields live in the base schema.
    pub fn fields(&self) -> &[FieldDescriptor<T>] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldDescriptor<T>> {
        self.fields.iter().find(|f| f.name() == name)
    }

    pub fn base_name(&self) -> Option<&str> {
        self.base.as_ref().map(|b| b.schema.type_name())
    }

    pub fn base_schema(&self) -> Option<&Arc<dyn ErasedSchema>> {
        self.base.as_ref().map(|b| &b.schema)
    }

    /// Reads base fields, then own fields, into `instance`.
    pub fn read(&self, instance: &mut T, r: &mut StreamReader<'_>) -> StructResult<()> {
        if let Some(base) = &self.base {
            let target = (base.project_mut)(instance).ok_or_else(|| self.missing_base())?;
            base.schema.read_any(target, r)?;
        }
        for field in &self.fields {
            if !field.is_present(instance, &r.context()) {
                trace!(structure = %self.name, field = field.name(), "condition false, field skipped");
                continue;
            }
            field
                .read(instance, r)
                .map_err(|e| e.at(&self.name, field.name()))?;
        }
        Ok(())
    }

    /// Writes base fields, then own fields, from `instance`.
    pub fn write(&self, instance: &T, w: &mut StreamWriter<'_>) -> StructResult<()> {
        if let Some(base) = &self.base {
            let source = (base.project)(instance).ok_or_else(|| self.missing_base())?;
            base.schema.write_any(source, w)?;
        }
        for field in &self.fields {
            if !field.is_present(instance, &w.context()) {
                trace!(structure = %self.name, field = field.name(), "condition false, field skipped");
                continue;
            }
            field
                .write(instance, w)
                .map_err(|e| e.at(&self.name, field.name()))?;
        }
        Ok(())
    }

    /// Reads from any reader; returns the number of bytes consumed.
    pub fn read_from<R: Read>(&self, instance: &mut T, mut reader: R) -> StructResult<u64> {
        let mut r = StreamReader::new(&mut reader);
        self.read(instance, &mut r)?;
        Ok(r.position())
    }

    /// Writes to any writer; returns the number of bytes emitted.
    pub fn write_to<W: Write>(&self, instance: &T, mut writer: W) -> StructResult<u64> {
        let mut w = StreamWriter::new(&mut writer);
        self.write(instance, &mut w)?;
        Ok(w.position())
    }

    fn missing_base(&self) -> StructError {
        let base = self.base_name().unwrap_or("base");
        StructError::new(ErrorKind::MissingInstance).at(&self.name, base)
    }
}

impl<T: Send + Sync + 'static> ErasedSchema for StructureSchema<T> {
    fn type_name(&self) -> &str {
        &self.name
    }

    fn field_names(&self) -> Vec<String> {
        let mut names = self
            .base
            .as_ref()
            .map(|b| b.schema.field_names())
            .unwrap_or_default();
        names.extend(self.fields.iter().map(|f| f.name().to_string()));
        names
    }

    fn read_any(&self, instance: &mut dyn Any, r: &mut StreamReader<'_>) -> StructResult<()> {
        let instance = instance
            .downcast_mut::<T>()
            .ok_or_else(|| ErrorKind::TypeMismatch(format!("instance is not a {}", self.name)))?;
        self.read(instance, r)
    }

    fn write_any(&self, instance: &dyn Any, w: &mut StreamWriter<'_>) -> StructResult<()> {
        let instance = instance
            .downcast_ref::<T>()
            .ok_or_else(|| ErrorKind::TypeMismatch(format!("instance is not a {}", self.name)))?;
        self.write(instance, w)
    }
}

impl<T> fmt::Debug for StructureSchema<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StructureSchema")
            .field("name", &self.name)
            .field("endian", &self.endian)
            .field("base", &self.base.as_ref().map(|b| b.schema.type_name()))
            .field("fields", &self.fields)
            .finish()
    }
}
