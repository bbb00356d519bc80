//! Codec: pack/unpack/copy/compare/print dispatch driven by the type
//! registry.
//!
//! The [`Codec`] is a thin front end over a shared [`TypeRegistry`]: it
//! looks up the operation set for a wire id and invokes it, adding the
//! self-describing type prefix when the buffer kind calls for one and
//! tolerating sized-integer width mismatches on unpack.
//!
//! # Example
//!
//! ```
//! use proclink::buffer::{Buffer, BufferKind};
//! use proclink::codec::{Codec, Value, ids};
//!
//! let codec = Codec::with_builtins();
//! let mut buf = Buffer::new(BufferKind::FullyDescribed);
//!
//! codec.pack(&mut buf, &[Value::Uint32(42)], ids::UINT32).unwrap();
//! assert_eq!(codec.peek_type(&buf).unwrap(), ids::UINT32);
//!
//! let vals = codec.unpack(&mut buf, 1, ids::UINT32).unwrap();
//! assert_eq!(vals, vec![Value::Uint32(42)]);
//! ```

mod builtins;
mod registry;
mod value;

pub use registry::{DataTypeInfo, DataTypeOps, TypeRegistry};
pub use value::{ids, ByteObject, CompareResult, InfoPair, ProcId, Value};

use std::sync::Arc;

use crate::buffer::{Buffer, BufferKind};
use crate::error::{ProclinkError, Result};

/// Pack/unpack/copy/compare/print dispatcher over a shared registry.
#[derive(Clone)]
pub struct Codec {
    registry: Arc<TypeRegistry>,
}

impl Codec {
    /// Codec over the built-in type set.
    pub fn with_builtins() -> Self {
        Self {
            registry: Arc::new(TypeRegistry::with_builtins()),
        }
    }

    /// Codec over a caller-assembled registry (built-ins plus
    /// extensions).
    pub fn new(registry: Arc<TypeRegistry>) -> Self {
        Self { registry }
    }

    /// The registry backing this codec.
    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    /// Append `values` encoded as type `ty`.
    ///
    /// In a fully-described buffer every value is prefixed with its
    /// type id; a non-described buffer stores values bare.
    pub fn pack(&self, buf: &mut Buffer, values: &[Value], ty: u16) -> Result<()> {
        let info = self.registry.lookup(ty)?;
        for value in values {
            if buf.kind() == BufferKind::FullyDescribed {
                buf.put_u16(ty);
            }
            info.ops.pack(buf, value)?;
        }
        Ok(())
    }

    /// Decode `count` values of type `ty` from the buffer.
    ///
    /// When the stored type (self-describing prefix) differs from the
    /// requested type, sized integers are widened/narrowed on the
    /// already host-order value; any other mismatch is
    /// [`ProclinkError::TypeMismatch`]. Exhaustion yields
    /// [`ProclinkError::ReadPastEndOfBuffer`].
    pub fn unpack(&self, buf: &mut Buffer, count: usize, ty: u16) -> Result<Vec<Value>> {
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            out.push(self.unpack_one(buf, ty)?);
        }
        Ok(out)
    }

    /// Decode a single value of type `ty`.
    pub fn unpack_one(&self, buf: &mut Buffer, ty: u16) -> Result<Value> {
        self.registry.lookup(ty)?;
        let stored = match buf.kind() {
            BufferKind::FullyDescribed => buf.get_u16()?,
            BufferKind::NonDescribed => ty,
        };
        let value = self.registry.lookup(stored)?.ops.unpack(buf)?;
        if stored == ty {
            return Ok(value);
        }
        if Value::is_sized_integer(stored) && Value::is_sized_integer(ty) {
            return builtins::convert_integer(value, ty);
        }
        Err(ProclinkError::TypeMismatch {
            requested: ty,
            stored,
        })
    }

    /// Type id of the next value in a self-describing buffer, without
    /// advancing the cursor.
    pub fn peek_type(&self, buf: &Buffer) -> Result<u16> {
        if buf.kind() != BufferKind::FullyDescribed {
            return Err(ProclinkError::BadParam(
                "peek_type requires a fully-described buffer",
            ));
        }
        buf.peek_u16()
    }

    /// Decode the next value of a self-describing buffer using its own
    /// stored type.
    pub fn peek_unpack(&self, buf: &mut Buffer) -> Result<(u16, Value)> {
        let ty = self.peek_type(buf)?;
        let value = self.unpack_one(buf, ty)?;
        Ok((ty, value))
    }

    /// Deep-copy a value through its type's copy operation.
    pub fn copy(&self, value: &Value, ty: u16) -> Result<Value> {
        self.registry.lookup(ty)?.ops.copy(value)
    }

    /// Three-way comparison through the type's ordering.
    pub fn compare(&self, a: &Value, b: &Value, ty: u16) -> Result<CompareResult> {
        self.registry.lookup(ty)?.ops.compare(a, b)
    }

    /// Render a value for diagnostics.
    pub fn print(&self, value: &Value, ty: u16) -> Result<String> {
        Ok(self.registry.lookup(ty)?.ops.print(value))
    }
}
