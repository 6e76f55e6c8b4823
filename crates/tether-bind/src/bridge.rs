//! Error bridge
//!
//! Native failures never cross into the runtime as panics. Two wrappers turn
//! them into script errors:
//!
//! - [`protect`]: for bound functions and methods; catches engine errors and
//!   panics
//! - [`guard`]: for metatable hooks; converts engine errors only
//!
//! Either way the error reaches the runtime as a string value raised with
//! [`State::raise`], so scripts can catch it with `pcall`.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use tether_vm::{Function, State};

use crate::call::NativeFunction;
use crate::error::BindResult;

/// Wrap an adapted callable as a runtime function
pub fn protect(function: NativeFunction) -> Function {
    let name = function.signature().to_string();
    Function::named(name, move |state: &mut State| {
        match panic::catch_unwind(AssertUnwindSafe(|| function.invoke(state))) {
            Ok(Ok(count)) => Ok(count),
            Ok(Err(err)) => {
                tracing::debug!(signature = %function.signature(), error = %err, "native call failed");
                Err(err.into_vm_error(state))
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                tracing::debug!(signature = %function.signature(), panic = %message, "native call panicked");
                Err(state.raise(message))
            }
        }
    })
}

/// Wrap a metatable hook as a runtime function
pub fn guard<F>(name: &str, hook: F) -> Function
where
    F: Fn(&mut State) -> BindResult<usize> + 'static,
{
    let label = name.to_string();
    Function::named(name, move |state: &mut State| {
        hook(state).map_err(|err| {
            tracing::debug!(hook = %label, error = %err, "hook failed");
            err.into_vm_error(state)
        })
    })
}

/// Text of a panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::IntoFunction;
    use crate::error::BindError;
    use tether_vm::{Value, VmError};

    #[test]
    fn test_panic_becomes_script_error() {
        let mut state = State::new();
        let function = protect((|| -> i32 { panic!("native exploded") }).into_function());
        state.register("boom", function);
        let err = state.call_global("boom", []).unwrap_err();
        assert_eq!(err.to_string(), "native exploded");
        assert_eq!(state.top(), 0);
    }

    #[test]
    fn test_formatted_panic_payload() {
        let mut state = State::new();
        let function = protect((|n: i32| -> i32 { panic!("bad {}", n) }).into_function());
        state.register("boom", function);
        let err = state.call_global("boom", [Value::Integer(7)]).unwrap_err();
        assert_eq!(err.to_string(), "bad 7");
    }

    #[test]
    fn test_engine_error_becomes_string_value() {
        let mut state = State::new();
        state.register("add", protect((|a: i32, b: i32| a + b).into_function()));
        let err = state
            .call_global("add", [Value::string("x"), Value::Integer(3)])
            .unwrap_err();
        match err {
            VmError::Runtime(value) => {
                assert_eq!(value.as_str(), Some("arg #1 expected integer, got string"))
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_guard_converts_errors() {
        let mut state = State::new();
        let hook = guard("hook", |_state: &mut State| Err(BindError::StackCapacity));
        state.register("hook", hook);
        let err = state.call_global("hook", []).unwrap_err();
        assert_eq!(err.to_string(), "Could not reserve stack");
    }

    #[test]
    fn test_unknown_payload() {
        let payload: Box<dyn Any + Send> = Box::new(42_u8);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic");
    }
}
