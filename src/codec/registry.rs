//! Type registry mapping wire ids to operation sets.
//!
//! The registry is populated once at startup with the built-in types and
//! may be extended by modules registering structured types at distinct
//! ids. After startup it is shared read-only behind an `Arc`; there is
//! no unregistration.
//!
//! # Example
//!
//! ```
//! use proclink::codec::{TypeRegistry, ids};
//!
//! let registry = TypeRegistry::with_builtins();
//! assert_eq!(registry.lookup(ids::UINT32).unwrap().name, "uint32");
//! assert!(registry.lookup(200).is_err());
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use super::value::{CompareResult, Value};
use crate::buffer::Buffer;
use crate::error::{ProclinkError, Result};

/// Operation set for one registered data type.
///
/// Implementations must encode in canonical network byte order and must
/// never panic on malformed input; every failure is a typed error.
pub trait DataTypeOps: Send + Sync {
    /// Append one encoded value to the buffer.
    fn pack(&self, buf: &mut Buffer, value: &Value) -> Result<()>;

    /// Decode one value at the buffer's unpack cursor.
    fn unpack(&self, buf: &mut Buffer) -> Result<Value>;

    /// Deep-copy a value of this type.
    fn copy(&self, value: &Value) -> Result<Value> {
        Ok(value.clone())
    }

    /// Three-way comparison under this type's ordering.
    fn compare(&self, a: &Value, b: &Value) -> Result<CompareResult>;

    /// Human-readable rendering for diagnostics.
    fn print(&self, value: &Value) -> String;
}

/// Descriptor for one registered type.
pub struct DataTypeInfo {
    /// Wire id. Nonzero, unique for the process lifetime.
    pub id: u16,
    /// Debug name. Unique for the process lifetime.
    pub name: String,
    /// True for compound/structured types.
    pub structured: bool,
    /// The operation set.
    pub ops: Arc<dyn DataTypeOps>,
}

/// Registry of data types keyed by wire id.
pub struct TypeRegistry {
    by_id: HashMap<u16, DataTypeInfo>,
    by_name: HashMap<String, u16>,
}

impl TypeRegistry {
    /// Create an empty registry. Most callers want
    /// [`TypeRegistry::with_builtins`].
    pub fn new() -> Self {
        Self {
            by_id: HashMap::new(),
            by_name: HashMap::new(),
        }
    }

    /// Create a registry pre-populated with every built-in type.
    pub fn with_builtins() -> Self {
        let mut reg = Self::new();
        super::builtins::register_builtins(&mut reg)
            .expect("built-in type table is internally consistent");
        reg
    }

    /// Register a type.
    ///
    /// # Errors
    ///
    /// [`ProclinkError::BadParam`] if `id` is zero or `name` is empty;
    /// [`ProclinkError::DuplicateType`] if the id or name is taken.
    pub fn register(
        &mut self,
        name: &str,
        id: u16,
        structured: bool,
        ops: Arc<dyn DataTypeOps>,
    ) -> Result<()> {
        if id == 0 {
            return Err(ProclinkError::BadParam("type id 0 is reserved"));
        }
        if name.is_empty() {
            return Err(ProclinkError::BadParam("type name must be non-empty"));
        }
        if self.by_id.contains_key(&id) {
            return Err(ProclinkError::DuplicateType(format!("id {}", id)));
        }
        if self.by_name.contains_key(name) {
            return Err(ProclinkError::DuplicateType(name.to_string()));
        }
        self.by_name.insert(name.to_string(), id);
        self.by_id.insert(
            id,
            DataTypeInfo {
                id,
                name: name.to_string(),
                structured,
                ops,
            },
        );
        Ok(())
    }

    /// Look up a type by id.
    pub fn lookup(&self, id: u16) -> Result<&DataTypeInfo> {
        self.by_id
            .get(&id)
            .ok_or(ProclinkError::UnknownDataType(id))
    }

    /// Look up a type id by name.
    pub fn lookup_name(&self, name: &str) -> Option<u16> {
        self.by_name.get(name).copied()
    }

    /// Number of registered types.
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// True if no types are registered.
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}
