//! Base library: `pcall`, `error`, `type`, `tostring`

use crate::error::{VmError, VmResult};
use crate::state::State;
use crate::value::{Function, Value};

/// Install the base library into the global table
pub fn open_base(state: &mut State) {
    state.register("pcall", Function::named("pcall", pcall));
    state.register("error", Function::named("error", error));
    state.register("type", Function::named("type", type_of));
    state.register("tostring", Function::named("tostring", tostring));
}

/// `pcall(f, ...)`: `true, results...` or `false, err`
fn pcall(state: &mut State) -> VmResult<usize> {
    if state.top() < 1 {
        return Err(state.raise("bad argument #1 to 'pcall' (value expected)"));
    }
    let function = state.value(1);
    let args: Vec<Value> = (2..=state.top()).map(|idx| state.value(idx)).collect();

    match state.call_function(&function, args) {
        Ok(results) => {
            if !state.check_stack(results.len() + 1) {
                return Err(VmError::StackOverflow);
            }
            let count = results.len() + 1;
            state.push(true);
            for value in results {
                state.push(value);
            }
            Ok(count)
        }
        Err(err) => {
            tracing::trace!(error = %err, "pcall caught error");
            if !state.check_stack(2) {
                return Err(VmError::StackOverflow);
            }
            state.push(false);
            state.push(err.into_value());
            Ok(2)
        }
    }
}

/// `error(v)`: raise `v` as-is
fn error(state: &mut State) -> VmResult<usize> {
    Err(state.error(state.value(1)))
}

fn type_of(state: &mut State) -> VmResult<usize> {
    if state.top() < 1 {
        return Err(state.raise("bad argument #1 to 'type' (value expected)"));
    }
    let name = state.value(1).type_name();
    reserve_result(state)?;
    state.push(name);
    Ok(1)
}

fn tostring(state: &mut State) -> VmResult<usize> {
    let text = state.value(1).to_string();
    reserve_result(state)?;
    state.push(text);
    Ok(1)
}

fn reserve_result(state: &State) -> VmResult<()> {
    if state.check_stack(1) {
        Ok(())
    } else {
        Err(VmError::StackOverflow)
    }
}
