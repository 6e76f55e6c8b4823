//! Type identity
//!
//! Every described type is registered under the name it declares in
//! [`Described::NAME`]. The name is the registry key, the metatable's
//! `__name` and the type name used in error messages. Two different native
//! types may not share a name within one runtime.

use std::any::TypeId;

use crate::describe::Described;
use crate::error::{BindError, BindResult};

/// Registry name of a described type
pub fn name_for<T: Described>() -> &'static str {
    T::NAME
}

/// Name plus native identity of a registered type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeIdentity {
    /// Registry name
    pub name: &'static str,
    /// Native type
    pub type_id: TypeId,
}

impl TypeIdentity {
    /// Identity of a described type
    pub fn of<T: Described>() -> Self {
        TypeIdentity {
            name: T::NAME,
            type_id: TypeId::of::<T>(),
        }
    }

    /// Check that `other` may use the same registry entry as `self`
    pub fn ensure_same(&self, other: &TypeIdentity) -> BindResult<()> {
        if self.type_id == other.type_id {
            Ok(())
        } else {
            Err(BindError::NameCollision(other.name))
        }
    }
}
