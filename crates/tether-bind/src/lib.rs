//! Tether binding engine
//!
//! Exposes native Rust types and functions to the Tether runtime
//! (`tether-vm`): values are marshalled across the stack, described structs
//! become wrapped objects with field access and methods, and native
//! failures (errors and panics) become catchable script errors.
//!
//! # Architecture
//!
//! ```text
//! script call ─→ bridge::protect ─→ call adapter ─→ marshal (args)
//!                                        │
//!                                        ├─→ native callable
//!                                        └─→ marshal (result) ─→ one value
//! ```
//!
//! - [`marshal`]: `FromStack` / `ToStack` conversions
//! - [`describe`]: `Described` types and their field/callable lists
//! - [`call`]: signature descriptors and arity-generic adapters
//! - [`object`]: wrapped objects, `Obj<T>` handles, property hooks
//! - [`bridge`]: panic and error translation
//! - [`registry`]: per-runtime metatable cache
//!
//! # Example
//!
//! ```ignore
//! use tether_bind::{Described, TypeDescriptor};
//! use tether_vm::{State, Value};
//!
//! #[derive(Clone)]
//! struct Person { name: String, age: i32 }
//!
//! impl Described for Person {
//!     const NAME: &'static str = "Person";
//!     fn describe(d: &mut TypeDescriptor<Self>) {
//!         d.readonly_field("name", |p| &p.name)
//!             .field("age", |p| &p.age, |p| &mut p.age)
//!             .method("Hello", |p: &Person, greeting: String| format!("{} {}", greeting, p.name));
//!     }
//! }
//!
//! let mut state = State::new();
//! tether_bind::push(&mut state, Person { name: "Ada".into(), age: 36 })?;
//! let person = state.value(-1);
//! let out = state.call_method(&person, "Hello", [Value::string("Hi")])?;
//! assert_eq!(out[0].as_str(), Some("Hi Ada"));
//! ```

#![warn(missing_docs)]

pub mod bridge;
pub mod call;
pub mod describe;
pub mod error;
pub mod identity;
pub mod marshal;
pub mod object;
pub mod registry;

pub use bridge::{guard, protect};
pub use call::{
    IntoFunction, IntoMethod, IntoMethodMut, IntoStateFunction, IntoStateMethod, IntoStateMethodMut,
    NativeFunction, Signature,
};
pub use describe::{CallableEntry, CallableKind, Described, FieldAttrs, FieldEntry, TypeDescriptor};
pub use error::{BindError, BindResult, ErrorKind};
pub use identity::{name_for, TypeIdentity};
pub use marshal::{FromStack, ParamKind, ToStack};
pub use object::{check_object, push_object, Obj};
pub use registry::{build_count, metatable, RegisteredType, TypeRegistry};

use tether_vm::{Kind, State, Table};

// ============================================================================
// Binding surface
// ============================================================================

/// Expose a native function as a global
pub fn register<F, Args>(state: &mut State, name: &str, f: F)
where
    F: IntoFunction<Args>,
{
    state.register(name, protect(f.into_function()));
}

/// Expose a native function taking the runtime handle as a global
pub fn register_with_state<F, Args>(state: &mut State, name: &str, f: F)
where
    F: IntoStateFunction<Args>,
{
    state.register(name, protect(f.into_state_function()));
}

/// Push any marshallable value
pub fn push<V: ToStack>(state: &mut State, value: V) -> BindResult<()> {
    value.push(state)
}

/// Methods table of `T`
pub fn methods_table<T: Described>(state: &mut State) -> BindResult<Table> {
    Ok(metatable::<T>(state)?.methods().clone())
}

/// Push the methods table of `T`
pub fn push_methods_table<T: Described>(state: &mut State) -> BindResult<()> {
    let methods = methods_table::<T>(state)?;
    push(state, tether_vm::Value::Table(methods))
}

/// Push the raw value of `field` in `T`'s metatable (nil when absent)
/// and return its kind
pub fn push_metatable_field<T: Described>(state: &mut State, field: &str) -> BindResult<Kind> {
    let value = metatable::<T>(state)?.metatable().get_field(field);
    let kind = value.kind();
    push(state, value)?;
    Ok(kind)
}

/// Push the constructor of `T`.
///
/// Returns `false` and pushes nothing when `T` declares no constructor.
pub fn push_constructor<T: Described>(state: &mut State) -> BindResult<bool> {
    match metatable::<T>(state)?.constructor() {
        Some(constructor) => {
            push(state, tether_vm::Value::Function(constructor.clone()))?;
            Ok(true)
        }
        None => Ok(false),
    }
}

/// Expose a constructor-bearing type as a global table holding its
/// methods table and a `new` entry
pub fn register_type<T: Described>(state: &mut State) -> BindResult<Table> {
    let registered = metatable::<T>(state)?;
    let global = Table::new();
    global.set_field("methods", registered.methods().clone());
    if let Some(constructor) = registered.constructor() {
        global.set_field("new", constructor.clone());
    }
    state.set_global(T::NAME, global.clone());
    Ok(global)
}

// ============================================================================
// Native context
// ============================================================================

/// Per-runtime native context slot
struct This<C>(C);

/// Store the native context for this runtime, replacing any previous one
pub fn set_this<C: 'static>(state: &mut State, context: C) -> Option<C> {
    state.set_app_data(This(context)).map(|This(old)| old)
}

/// Native context stored with [`set_this`]
pub fn get_this<C: 'static>(state: &State) -> Option<&C> {
    state.app_data::<This<C>>().map(|This(context)| context)
}

/// Mutable native context stored with [`set_this`]
pub fn get_this_mut<C: 'static>(state: &mut State) -> Option<&mut C> {
    state.app_data_mut::<This<C>>().map(|This(context)| context)
}
