//! Integration tests for the runtime: calls, metamethods, collection

use std::cell::Cell;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use tether_vm::{open_base, Function, State, Table, Value, VmError, VmOptions, VmResult, MULTRET};

fn counting_gc(state: &mut State, name: &str, counter: Rc<Cell<u32>>) -> Table {
    let (mt, _) = state.new_metatable(name);
    mt.set_field(
        "__gc",
        Function::new(move |state: &mut State| {
            if let Some(block) = state.to_userdata(1) {
                if block.take_payload().is_some() {
                    counter.set(counter.get() + 1);
                }
            }
            Ok(0)
        }),
    );
    mt
}

#[test]
fn test_nested_frames_are_isolated() {
    let mut state = State::new();
    state.register(
        "inner",
        Function::new(|state: &mut State| {
            assert_eq!(state.top(), 1);
            let n = state.to_integer(1).unwrap_or_default();
            state.push(n + 1);
            Ok(1)
        }),
    );
    state.register(
        "outer",
        Function::new(|state: &mut State| {
            state.push("local");
            let out = state.call_global("inner", [Value::Integer(41)])?;
            assert_eq!(state.top(), 2);
            assert_eq!(state.value(2), Value::string("local"));
            state.push(out[0].clone());
            Ok(1)
        }),
    );

    state.push("caller");
    let results = state.call_global("outer", [Value::Nil]).unwrap();
    assert_eq!(results, vec![Value::Integer(42)]);
    assert_eq!(state.top(), 1);
}

#[test]
fn test_raw_call_with_multret() {
    let mut state = State::new();
    state.push(Function::new(|state: &mut State| {
        let n = state.top();
        for idx in 1..=n {
            state.push_value(idx);
        }
        Ok(n as usize)
    }));
    state.push(1);
    state.push(2);
    state.call(2, MULTRET).unwrap();
    assert_eq!(state.top(), 2);
    assert_eq!(state.value(1), Value::Integer(1));
}

#[test]
fn test_index_and_newindex_functions() {
    let mut state = State::new();
    let writes = Rc::new(Cell::new(0));
    let (mt, _) = state.new_metatable("Proxy");
    mt.set_field(
        "__index",
        Function::new(|state: &mut State| {
            let key = state.value(2).to_string();
            state.push(format!("<{}>", key));
            Ok(1)
        }),
    );
    let seen = writes.clone();
    mt.set_field(
        "__newindex",
        Function::new(move |state: &mut State| {
            assert_eq!(state.top(), 3);
            seen.set(seen.get() + 1);
            Ok(0)
        }),
    );

    let block = state.push_userdata(Rc::new(()), Some(mt));
    let object = Value::Userdata(block);
    assert_eq!(
        state.get_property(&object, "name").unwrap(),
        Value::string("<name>")
    );
    state.set_property(&object, "name", 5).unwrap();
    assert_eq!(writes.get(), 1);
}

#[test]
fn test_newindex_table_chain() {
    let mut state = State::new();
    let target = Table::new();
    let meta = Table::new();
    meta.set_field("__newindex", target.clone());
    let object = Table::new();
    object.set_metatable(Some(meta));

    let value = Value::Table(object.clone());
    state.set_property(&value, "x", 1).unwrap();
    assert!(object.get("x").is_nil());
    assert_eq!(target.get("x"), Value::Integer(1));
}

#[test]
fn test_index_loop_is_reported() {
    let mut state = State::new();
    let a = Table::new();
    let meta = Table::new();
    meta.set_field("__index", a.clone());
    a.set_metatable(Some(meta));
    let err = state.get_property(&Value::Table(a), "x").unwrap_err();
    assert!(err.to_string().contains("loop"));
}

#[test]
fn test_call_method_passes_receiver() {
    let mut state = State::new();
    let methods = Table::new();
    methods.set_field(
        "echo",
        Function::new(|state: &mut State| {
            assert!(state.value(1).as_table().is_some());
            state.push_value(2);
            Ok(1)
        }),
    );
    let meta = Table::new();
    meta.set_field("__index", methods);
    let object = Table::new();
    object.set_metatable(Some(meta));

    let out = state
        .call_method(&Value::Table(object), "echo", [Value::Boolean(true)])
        .unwrap();
    assert_eq!(out, vec![Value::Boolean(true)]);
}

#[test]
fn test_unreachable_blocks_are_finalized_once() {
    let counter = Rc::new(Cell::new(0));
    let mut state = State::new();
    let mt = counting_gc(&mut state, "Counted", counter.clone());

    for _ in 0..3 {
        state.push_userdata(Rc::new(0_u64), Some(mt.clone()));
    }
    let kept = state.push_userdata(Rc::new(0_u64), Some(mt));
    state.pop(4);

    assert_eq!(state.collect_garbage(), 3);
    assert_eq!(counter.get(), 3);
    assert_eq!(state.live_userdata(), 1);

    drop(kept);
    assert_eq!(state.collect_garbage(), 1);
    assert_eq!(counter.get(), 4);
    assert_eq!(state.collect_garbage(), 0);
}

#[test]
fn test_globals_keep_blocks_alive() {
    let counter = Rc::new(Cell::new(0));
    let mut state = State::new();
    let mt = counting_gc(&mut state, "Counted", counter.clone());
    let block = state.push_userdata(Rc::new(()), Some(mt));
    state.set_global("obj", block);
    state.pop(1);

    assert_eq!(state.collect_garbage(), 0);
    state.set_global("obj", Value::Nil);
    assert_eq!(state.collect_garbage(), 1);
    assert_eq!(counter.get(), 1);
}

#[test]
fn test_close_finalizes_and_skips_already_collected() {
    let counter = Rc::new(Cell::new(0));
    {
        let mut state = State::new();
        let mt = counting_gc(&mut state, "Counted", counter.clone());
        state.push_userdata(Rc::new(()), Some(mt.clone()));
        state.push_userdata(Rc::new(()), Some(mt));
        state.pop(1);
        assert_eq!(state.collect_garbage(), 1);
    }
    assert_eq!(counter.get(), 2);
}

#[test]
fn test_close_without_finalizers() {
    let counter = Rc::new(Cell::new(0));
    {
        let mut state = State::with_options(VmOptions {
            finalize_on_close: false,
            ..Default::default()
        });
        let mt = counting_gc(&mut state, "Counted", counter.clone());
        state.push_userdata(Rc::new(()), Some(mt));
    }
    assert_eq!(counter.get(), 0);
}

#[test]
fn test_failing_finalizer_does_not_abort_collection() {
    let mut state = State::new();
    let (mt, _) = state.new_metatable("Broken");
    mt.set_field(
        "__gc",
        Function::new(|state: &mut State| Err(state.raise("boom"))),
    );
    state.push_userdata(Rc::new(()), Some(mt.clone()));
    state.push_userdata(Rc::new(()), Some(mt));
    state.pop(2);
    assert_eq!(state.collect_garbage(), 2);
}

#[test]
fn test_pcall_returns_raised_message() {
    let mut state = State::new();
    open_base(&mut state);
    state.register(
        "fail",
        Function::new(|state: &mut State| Err(state.raise("bad thing"))),
    );
    let fail = state.get_global("fail");
    let results = state.call_global("pcall", [fail]).unwrap();
    assert_eq!(results[0], Value::Boolean(false));
    assert_eq!(results[1].as_str(), Some("bad thing"));
}

#[test]
fn test_uncaught_error_surfaces_to_host() {
    let mut state = State::new();
    open_base(&mut state);
    let err = state
        .call_global("error", [Value::string("top level")])
        .unwrap_err();
    assert!(matches!(err, VmError::Runtime(_)));
    assert_eq!(err.to_string(), "top level");
}

#[test]
fn test_panicking_callee_restores_call_depth() {
    let mut state = State::with_options(VmOptions {
        max_call_depth: 8,
        ..Default::default()
    });
    state.register(
        "explode",
        Function::new(|_state: &mut State| -> VmResult<usize> { panic!("native exploded") }),
    );
    state.register(
        "outer",
        Function::new(|state: &mut State| {
            state.call_global("explode", [])?;
            Ok(0)
        }),
    );
    state.register(
        "inner",
        Function::new(|state: &mut State| {
            state.push(5);
            Ok(1)
        }),
    );
    state.register(
        "nested",
        Function::new(|state: &mut State| {
            let out = state.call_global("inner", [])?;
            state.push(out[0].clone());
            Ok(1)
        }),
    );

    for _ in 0..20 {
        let caught = panic::catch_unwind(AssertUnwindSafe(|| state.call_global("outer", [])));
        assert!(caught.is_err());
        assert_eq!(state.top(), 0);
    }

    let out = state.call_global("nested", []).unwrap();
    assert_eq!(out, vec![Value::Integer(5)]);
}
