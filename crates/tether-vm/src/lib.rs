//! Tether VM
//!
//! A small embeddable stack-machine runtime. Native code talks to it the
//! classic way: push values onto a frame, call functions, read results back
//! out by slot index.
//!
//! # Overview
//!
//! - [`State`]: one runtime instance (stack, globals, registry, heap)
//! - [`Value`]: dynamically typed values (nil, booleans, numbers, byte
//!   strings, tables, native functions, userdata)
//! - [`Userdata`]: opaque native blocks with metatables and `__gc` finalizers
//! - [`open_base`]: `pcall`, `error`, `type` and `tostring`
//!
//! # Example
//!
//! ```ignore
//! use tether_vm::{Function, State, Value};
//!
//! let mut state = State::new();
//! state.register("double", Function::new(|state: &mut State| {
//!     let n = state.to_integer(1).ok_or_else(|| state.raise("expected integer"))?;
//!     state.push(n * 2);
//!     Ok(1)
//! }));
//! let out = state.call_global("double", [Value::Integer(21)])?;
//! assert_eq!(out, vec![Value::Integer(42)]);
//! ```

#![warn(missing_docs)]

mod baselib;
pub mod error;
pub mod options;
pub mod state;
pub mod value;

pub use baselib::open_base;
pub use error::{VmError, VmResult};
pub use options::VmOptions;
pub use state::{State, MULTRET};
pub use value::{Function, Kind, NativeFn, Table, Userdata, Value};
