//! Type metatable registry
//!
//! Per runtime instance, each described type gets one bundle: its metatable
//! (`__name`, `__methods`, `__gc`, `__index`, `__newindex`), its methods
//! table and its constructor. Bundles are built lazily on first use and
//! cached in the state's app data, so they die with the runtime.

use std::rc::Rc;

use rustc_hash::FxHashMap;
use tether_vm::{Function, State, Table};

use crate::bridge::{guard, protect};
use crate::describe::{Described, TypeDescriptor};
use crate::error::{BindError, BindResult};
use crate::identity::TypeIdentity;
use crate::object::{self, FieldTable};

/// Behavior bundle of one registered type
#[derive(Clone, Debug)]
pub struct RegisteredType {
    identity: TypeIdentity,
    metatable: Table,
    methods: Table,
    constructor: Option<Function>,
}

impl RegisteredType {
    /// Name and native identity
    pub fn identity(&self) -> TypeIdentity {
        self.identity
    }

    /// Metatable attached to every wrapped object of this type
    pub fn metatable(&self) -> &Table {
        &self.metatable
    }

    /// Methods and functions by name
    pub fn methods(&self) -> &Table {
        &self.methods
    }

    /// Constructor function, if the type declares one
    pub fn constructor(&self) -> Option<&Function> {
        self.constructor.as_ref()
    }
}

/// Registered types of one runtime instance
#[derive(Default)]
pub struct TypeRegistry {
    types: FxHashMap<&'static str, RegisteredType>,
    builds: usize,
}

impl TypeRegistry {
    /// Look up a registered type by name
    pub fn get(&self, name: &str) -> Option<&RegisteredType> {
        self.types.get(name)
    }

    /// Number of registered types
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Check if no type has been registered
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// How many bundles have been built so far
    pub fn build_count(&self) -> usize {
        self.builds
    }
}

/// Bundle for `T`, building it on first use
pub fn metatable<T: Described>(state: &mut State) -> BindResult<RegisteredType> {
    let identity = TypeIdentity::of::<T>();
    if let Some(existing) = state.app_data::<TypeRegistry>().and_then(|r| r.get(T::NAME)) {
        existing.identity.ensure_same(&identity)?;
        return Ok(existing.clone());
    }

    let registered = build::<T>(state, identity)?;
    let registry = state.app_data_or_default::<TypeRegistry>();
    registry.types.insert(T::NAME, registered.clone());
    registry.builds += 1;
    Ok(registered)
}

/// Number of bundles built in this runtime
pub fn build_count(state: &State) -> usize {
    state
        .app_data::<TypeRegistry>()
        .map_or(0, TypeRegistry::build_count)
}

fn build<T: Described>(state: &mut State, identity: TypeIdentity) -> BindResult<RegisteredType> {
    let descriptor = TypeDescriptor::<T>::build();

    let (metatable, created) = state.new_metatable(T::NAME);
    if !created {
        // name taken by a metatable this registry did not build
        return Err(BindError::NameCollision(T::NAME));
    }

    let methods = Table::new();
    for callable in descriptor.callables() {
        methods.set_field(callable.name(), protect(callable.function().clone()));
    }
    let constructor = descriptor
        .constructor_function()
        .map(|function| protect(function.clone()));
    let callables = descriptor.callables().len();

    let fields = Rc::new(FieldTable::new(descriptor.into_fields()));
    metatable.set_field("__methods", methods.clone());
    metatable.set_field("__gc", object::gc_hook());
    metatable.set_field(
        "__index",
        guard("__index", object::index_hook::<T>(fields.clone(), methods.clone())),
    );
    metatable.set_field("__newindex", guard("__newindex", object::newindex_hook::<T>(fields.clone())));

    tracing::debug!(
        type_name = T::NAME,
        fields = fields.len(),
        callables,
        "built type metatable"
    );

    Ok(RegisteredType {
        identity,
        metatable,
        methods,
        constructor,
    })
}
