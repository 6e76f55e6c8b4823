//! Interpreter state
//!
//! `State` is one runtime instance: a value stack split into call frames,
//! the global table, the registry (where named metatables live), the
//! userdata heap walked by the collector, and per-instance app data.
//!
//! # Frames and slots
//!
//! A native function sees only its own frame. Slot `1` is its first
//! argument and `top()` is the number of values in the frame. Negative
//! indices count down from the top (`-1` is the topmost value).
//!
//! ```text
//! stack: [ ... caller values ... | f | arg1 | arg2 | pushed ... ]
//!                                     ^ base (slot 1)
//! ```

use std::any::{Any, TypeId};
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::error::{VmError, VmResult};
use crate::options::VmOptions;
use crate::value::{Function, Kind, Table, Userdata, Value};

/// Request every result of a call
pub const MULTRET: i32 = -1;

/// Limit on `__index` / `__newindex` table chains and close-time finalizer rounds
const MAX_META_CHAIN: usize = 100;

/// A runtime instance.
///
/// Not thread-safe: everything is reference counted with `Rc`, so a `State`
/// stays on the thread that created it.
pub struct State {
    stack: Vec<Value>,
    base: usize,
    depth: usize,
    globals: Table,
    registry: Table,
    heap: Vec<Rc<Userdata>>,
    app_data: FxHashMap<TypeId, Box<dyn Any>>,
    options: VmOptions,
}

impl State {
    /// Create a state with default options
    pub fn new() -> Self {
        Self::with_options(VmOptions::default())
    }

    /// Create a state with custom options
    pub fn with_options(options: VmOptions) -> Self {
        State {
            stack: Vec::with_capacity(64),
            base: 0,
            depth: 0,
            globals: Table::new(),
            registry: Table::new(),
            heap: Vec::new(),
            app_data: FxHashMap::default(),
            options,
        }
    }

    /// Options this state was created with
    pub fn options(&self) -> &VmOptions {
        &self.options
    }

    // ========================================================================
    // Slot access
    // ========================================================================

    fn slot(&self, idx: i32) -> Option<usize> {
        let len = self.stack.len();
        if idx > 0 {
            let pos = self.base + (idx as usize - 1);
            (pos < len).then_some(pos)
        } else if idx < 0 {
            let back = idx.unsigned_abs() as usize;
            (back <= len - self.base).then(|| len - back)
        } else {
            None
        }
    }

    /// Number of values in the current frame
    pub fn top(&self) -> i32 {
        (self.stack.len() - self.base) as i32
    }

    /// Convert a relative index into a positive frame slot
    pub fn abs_index(&self, idx: i32) -> i32 {
        if idx < 0 {
            self.top() + idx + 1
        } else {
            idx
        }
    }

    /// Borrow the value at a slot
    pub fn get(&self, idx: i32) -> Option<&Value> {
        self.slot(idx).map(|pos| &self.stack[pos])
    }

    /// Value at a slot, nil when the slot is outside the frame
    pub fn value(&self, idx: i32) -> Value {
        self.get(idx).cloned().unwrap_or_default()
    }

    /// Kind of the value at a slot, `Kind::None` outside the frame
    pub fn kind(&self, idx: i32) -> Kind {
        self.get(idx).map_or(Kind::None, Value::kind)
    }

    /// Check for nil or an absent slot
    pub fn is_none_or_nil(&self, idx: i32) -> bool {
        self.get(idx).map_or(true, Value::is_nil)
    }

    /// Numeric value at a slot
    pub fn to_number(&self, idx: i32) -> Option<f64> {
        self.get(idx).and_then(Value::as_number)
    }

    /// Integer value at a slot (integral floats included)
    pub fn to_integer(&self, idx: i32) -> Option<i64> {
        self.get(idx).and_then(Value::as_integer)
    }

    /// String bytes at a slot
    pub fn to_bytes(&self, idx: i32) -> Option<Rc<[u8]>> {
        match self.get(idx) {
            Some(Value::String(s)) => Some(s.clone()),
            _ => None,
        }
    }

    /// Truthiness of a slot
    pub fn to_boolean(&self, idx: i32) -> bool {
        self.get(idx).map_or(false, Value::is_truthy)
    }

    /// Userdata block at a slot
    pub fn to_userdata(&self, idx: i32) -> Option<Rc<Userdata>> {
        self.get(idx).and_then(Value::as_userdata).cloned()
    }

    // ========================================================================
    // Pushing
    // ========================================================================

    /// Check that `n` more values fit on the stack.
    ///
    /// Pushing never checks on its own; callers must reserve first.
    pub fn check_stack(&self, n: usize) -> bool {
        self.stack.len().saturating_add(n) <= self.options.max_stack
    }

    /// Push a value
    pub fn push(&mut self, value: impl Into<Value>) {
        debug_assert!(self.stack.len() < self.options.max_stack, "push past stack limit");
        self.stack.push(value.into());
    }

    /// Push nil
    pub fn push_nil(&mut self) {
        self.push(Value::Nil);
    }

    /// Push a copy of the value at a slot
    pub fn push_value(&mut self, idx: i32) {
        let value = self.value(idx);
        self.push(value);
    }

    /// Pop `n` values (never below the current frame)
    pub fn pop(&mut self, n: usize) {
        let keep = self.stack.len().saturating_sub(n).max(self.base);
        self.stack.truncate(keep);
    }

    /// Resize the frame to `idx` values, filling with nil
    pub fn set_top(&mut self, idx: i32) {
        let target = self.base + self.abs_index(idx).max(0) as usize;
        self.stack.resize(target, Value::Nil);
    }

    // ========================================================================
    // Userdata & metatables
    // ========================================================================

    /// Allocate a userdata block, push it and return a handle to it
    pub fn push_userdata(&mut self, payload: Rc<dyn Any>, metatable: Option<Table>) -> Rc<Userdata> {
        let block = Rc::new(Userdata::new(payload, metatable));
        self.heap.push(block.clone());
        self.push(Value::Userdata(block.clone()));
        block
    }

    /// Get or create the named metatable in the registry.
    ///
    /// Returns the table and `true` when it was created by this call. New
    /// tables get `__name` set to `name`.
    pub fn new_metatable(&mut self, name: &str) -> (Table, bool) {
        if let Value::Table(existing) = self.registry.get_field(name) {
            return (existing, false);
        }
        let metatable = Table::new();
        metatable.set_field("__name", name);
        self.registry.set_field(name, metatable.clone());
        (metatable, true)
    }

    /// Named metatable from the registry
    pub fn metatable_for(&self, name: &str) -> Option<Table> {
        match self.registry.get_field(name) {
            Value::Table(t) => Some(t),
            _ => None,
        }
    }

    /// Userdata at a slot whose metatable is the one registered under `name`
    pub fn test_userdata(&self, idx: i32, name: &str) -> Option<Rc<Userdata>> {
        let block = self.to_userdata(idx)?;
        let expected = self.metatable_for(name)?;
        match block.metatable() {
            Some(mt) if mt.ptr_eq(&expected) => Some(block),
            _ => None,
        }
    }

    /// Registry table
    pub fn registry(&self) -> &Table {
        &self.registry
    }

    // ========================================================================
    // Globals
    // ========================================================================

    /// Global table
    pub fn globals(&self) -> &Table {
        &self.globals
    }

    /// Set a global variable
    pub fn set_global(&mut self, name: &str, value: impl Into<Value>) {
        self.globals.set_field(name, value);
    }

    /// Read a global variable
    pub fn get_global(&self, name: &str) -> Value {
        self.globals.get_field(name)
    }

    /// Expose a native function as a global
    pub fn register(&mut self, name: &str, function: Function) {
        self.set_global(name, function);
    }

    // ========================================================================
    // Errors
    // ========================================================================

    /// Build a script error carrying `message`.
    ///
    /// A native function raises it by returning it as `Err`; the call
    /// machinery unwinds every frame up to the nearest protected call.
    pub fn raise(&self, message: impl Into<String>) -> VmError {
        VmError::Runtime(Value::string(message.into()))
    }

    /// Build a script error carrying an arbitrary value
    pub fn error(&self, value: Value) -> VmError {
        VmError::Runtime(value)
    }

    // ========================================================================
    // Calls
    // ========================================================================

    /// Call the function sitting below the top `nargs` values.
    ///
    /// On success the function and its arguments are replaced by its results,
    /// adjusted to `nresults` (or all of them for [`MULTRET`]). On failure
    /// they are removed and the error is returned. A panicking callee
    /// leaves the frame and call depth restored before the panic resumes.
    pub fn call(&mut self, nargs: usize, nresults: i32) -> VmResult<()> {
        let func_pos = match self.stack.len().checked_sub(nargs + 1) {
            Some(pos) if pos >= self.base => pos,
            _ => return Err(self.raise("call: not enough values in frame")),
        };

        let function = match &self.stack[func_pos] {
            Value::Function(f) => f.clone(),
            other => {
                let kind = other.type_name();
                self.stack.truncate(func_pos);
                return Err(VmError::NotCallable(kind));
            }
        };

        if self.depth >= self.options.max_call_depth {
            self.stack.truncate(func_pos);
            return Err(VmError::StackOverflow);
        }

        let saved_base = self.base;
        self.base = func_pos + 1;
        self.depth += 1;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| function.invoke(self)));
        self.depth -= 1;
        self.base = saved_base;
        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(payload) => {
                // frame is unwound before the panic continues to the host
                self.stack.truncate(func_pos);
                panic::resume_unwind(payload);
            }
        };

        match outcome {
            Ok(count) => {
                let len = self.stack.len();
                let count = count.min(len - (func_pos + 1));
                let results: Vec<Value> = self.stack.drain(len - count..).collect();
                self.stack.truncate(func_pos);
                if nresults == MULTRET {
                    self.stack.extend(results);
                } else {
                    let wanted = nresults.max(0) as usize;
                    self.stack.extend(
                        results
                            .into_iter()
                            .chain(std::iter::repeat(Value::Nil))
                            .take(wanted),
                    );
                }
                Ok(())
            }
            Err(err) => {
                self.stack.truncate(func_pos);
                Err(err)
            }
        }
    }

    /// Call a function value with arguments and collect all of its results
    pub fn call_function(
        &mut self,
        function: &Value,
        args: impl IntoIterator<Item = Value>,
    ) -> VmResult<Vec<Value>> {
        let args: Vec<Value> = args.into_iter().collect();
        if !self.check_stack(args.len() + 1) {
            return Err(VmError::StackOverflow);
        }
        let start = self.stack.len();
        let nargs = args.len();
        self.stack.push(function.clone());
        self.stack.extend(args);
        self.call(nargs, MULTRET)?;
        Ok(self.stack.drain(start..).collect())
    }

    /// Call a global function by name
    pub fn call_global(
        &mut self,
        name: &str,
        args: impl IntoIterator<Item = Value>,
    ) -> VmResult<Vec<Value>> {
        let function = self.get_global(name);
        self.call_function(&function, args)
    }

    /// Script-style method call: `object:name(args...)`
    pub fn call_method(
        &mut self,
        object: &Value,
        name: &str,
        args: impl IntoIterator<Item = Value>,
    ) -> VmResult<Vec<Value>> {
        let method = self.get_property(object, name)?;
        let args = std::iter::once(object.clone()).chain(args);
        self.call_function(&method, args)
    }

    // ========================================================================
    // Property access (metatable-aware)
    // ========================================================================

    /// Script-style read: `object[key]`, honoring `__index`
    pub fn get_property(&mut self, object: &Value, key: impl Into<Value>) -> VmResult<Value> {
        let key = key.into();
        let mut current = object.clone();
        for _ in 0..MAX_META_CHAIN {
            let handler = match &current {
                Value::Table(t) => {
                    let raw = t.get(key.clone());
                    if !raw.is_nil() {
                        return Ok(raw);
                    }
                    match t.metatable().map(|mt| mt.get_field("__index")) {
                        Some(handler) if !handler.is_nil() => handler,
                        _ => return Ok(Value::Nil),
                    }
                }
                other => match other.metatable().map(|mt| mt.get_field("__index")) {
                    Some(handler) if !handler.is_nil() => handler,
                    _ => return Err(VmError::NotIndexable(other.type_name())),
                },
            };

            if handler.as_function().is_some() {
                let results = self.call_function(&handler, [current, key])?;
                return Ok(results.into_iter().next().unwrap_or_default());
            }
            current = handler;
        }
        Err(self.raise("'__index' chain too long; possible loop"))
    }

    /// Script-style write: `object[key] = value`, honoring `__newindex`
    pub fn set_property(
        &mut self,
        object: &Value,
        key: impl Into<Value>,
        value: impl Into<Value>,
    ) -> VmResult<()> {
        let key = key.into();
        let value = value.into();
        let mut current = object.clone();
        for _ in 0..MAX_META_CHAIN {
            let handler = match &current {
                Value::Table(t) => {
                    let handler = t
                        .metatable()
                        .map(|mt| mt.get_field("__newindex"))
                        .unwrap_or_default();
                    if handler.is_nil() || t.contains(key.clone()) {
                        return t.set(key, value);
                    }
                    handler
                }
                other => {
                    let handler = other
                        .metatable()
                        .map(|mt| mt.get_field("__newindex"))
                        .unwrap_or_default();
                    if handler.is_nil() {
                        return Err(VmError::NotIndexable(other.type_name()));
                    }
                    handler
                }
            };

            if handler.as_function().is_some() {
                self.call_function(&handler, [current, key, value])?;
                return Ok(());
            }
            current = handler;
        }
        Err(self.raise("'__newindex' chain too long; possible loop"))
    }

    // ========================================================================
    // Collector
    // ========================================================================

    /// Finalize and release every userdata block no longer referenced
    /// outside the heap. Returns how many blocks were collected.
    ///
    /// Blocks are reference counted, so reachability means "some value,
    /// table or native handle still holds the block".
    pub fn collect_garbage(&mut self) -> usize {
        let mut collected = 0;
        loop {
            let (dead, live): (Vec<_>, Vec<_>) = std::mem::take(&mut self.heap)
                .into_iter()
                .partition(|block| Rc::strong_count(block) == 1);
            // finalizers may allocate, keep anything they pushed
            let allocated = std::mem::replace(&mut self.heap, live);
            self.heap.extend(allocated);
            if dead.is_empty() {
                break;
            }
            collected += dead.len();
            for block in &dead {
                self.finalize(block);
            }
        }
        if collected > 0 {
            tracing::debug!(collected, live = self.heap.len(), "collected userdata");
        }
        collected
    }

    /// Number of userdata blocks still tracked by the heap
    pub fn live_userdata(&self) -> usize {
        self.heap.len()
    }

    /// Run the `__gc` metamethod of a block at most once
    fn finalize(&mut self, block: &Rc<Userdata>) {
        if block.mark_finalized() {
            return;
        }
        let hook = block
            .metatable()
            .map(|mt| mt.get_field("__gc"))
            .unwrap_or_default();
        if hook.as_function().is_some() {
            if let Err(err) = self.call_function(&hook, [Value::Userdata(block.clone())]) {
                tracing::warn!(error = %err, "error in __gc finalizer");
            }
        }
    }

    // ========================================================================
    // App data
    // ========================================================================

    /// Attach native data to this state, one slot per type.
    ///
    /// Returns the previous value of the same type, if any.
    pub fn set_app_data<T: 'static>(&mut self, data: T) -> Option<T> {
        self.app_data
            .insert(TypeId::of::<T>(), Box::new(data))
            .and_then(|old| old.downcast::<T>().ok())
            .map(|old| *old)
    }

    /// Borrow attached native data
    pub fn app_data<T: 'static>(&self) -> Option<&T> {
        self.app_data
            .get(&TypeId::of::<T>())
            .and_then(|data| data.downcast_ref::<T>())
    }

    /// Mutably borrow attached native data
    pub fn app_data_mut<T: 'static>(&mut self) -> Option<&mut T> {
        self.app_data
            .get_mut(&TypeId::of::<T>())
            .and_then(|data| data.downcast_mut::<T>())
    }

    /// Mutably borrow attached native data, inserting a default first
    pub fn app_data_or_default<T: Default + 'static>(&mut self) -> &mut T {
        let slot = self
            .app_data
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Box::new(T::default()) as Box<dyn Any>);
        match slot.downcast_mut::<T>() {
            Some(data) => data,
            None => unreachable!("app data slots are keyed by TypeId"),
        }
    }

    /// Detach native data
    pub fn remove_app_data<T: 'static>(&mut self) -> Option<T> {
        self.app_data
            .remove(&TypeId::of::<T>())
            .and_then(|data| data.downcast::<T>().ok())
            .map(|data| *data)
    }
}

impl Default for State {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for State {
    fn drop(&mut self) {
        if !self.options.finalize_on_close {
            return;
        }
        self.stack.clear();
        self.base = 0;
        self.depth = 0;
        let mut rounds = 0;
        while !self.heap.is_empty() && rounds < MAX_META_CHAIN {
            let pending = std::mem::take(&mut self.heap);
            tracing::debug!(count = pending.len(), "running finalizers on close");
            for block in pending.iter().rev() {
                self.finalize(block);
            }
            rounds += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn sum(state: &mut State) -> VmResult<usize> {
        let mut total = 0;
        for idx in 1..=state.top() {
            total += state
                .to_integer(idx)
                .ok_or_else(|| state.raise(format!("arg #{} is not an integer", idx)))?;
        }
        state.push(total);
        Ok(1)
    }

    #[test]
    fn test_slot_indexing() {
        let mut state = State::new();
        state.push(1);
        state.push("two");
        assert_eq!(state.top(), 2);
        assert_eq!(state.value(1), Value::Integer(1));
        assert_eq!(state.value(-1), Value::string("two"));
        assert_eq!(state.kind(3), Kind::None);
        assert_eq!(state.abs_index(-1), 2);
        assert!(state.is_none_or_nil(5));

        state.pop(1);
        assert_eq!(state.top(), 1);
        state.set_top(3);
        assert_eq!(state.top(), 3);
        assert_eq!(state.kind(3), Kind::Nil);
    }

    #[test]
    fn test_call_native_function() {
        let mut state = State::new();
        state.register("sum", Function::named("sum", sum));
        let results = state
            .call_global("sum", [Value::Integer(2), Value::Number(3.0)])
            .unwrap();
        assert_eq!(results, vec![Value::Integer(5)]);
        assert_eq!(state.top(), 0);
    }

    #[test]
    fn test_call_error_unwinds_frame() {
        let mut state = State::new();
        state.register("sum", Function::new(sum));
        let err = state
            .call_global("sum", [Value::Integer(2), Value::Boolean(true)])
            .unwrap_err();
        assert_eq!(err.to_string(), "arg #2 is not an integer");
        assert_eq!(state.top(), 0);
    }

    #[test]
    fn test_call_non_function() {
        let mut state = State::new();
        let err = state.call_global("missing", []).unwrap_err();
        assert!(matches!(err, VmError::NotCallable("nil")));
    }

    #[test]
    fn test_call_adjusts_results() {
        let mut state = State::new();
        state.push(Function::new(|state: &mut State| {
            state.push(1);
            state.push(2);
            Ok(2)
        }));
        state.call(0, 3).unwrap();
        assert_eq!(state.top(), 3);
        assert_eq!(state.value(2), Value::Integer(2));
        assert!(state.value(3).is_nil());
    }

    #[test]
    fn test_call_depth_limit() {
        let mut state = State::with_options(VmOptions {
            max_call_depth: 8,
            ..Default::default()
        });
        state.register(
            "recurse",
            Function::new(|state: &mut State| {
                state.call_global("recurse", [])?;
                Ok(0)
            }),
        );
        let err = state.call_global("recurse", []).unwrap_err();
        assert!(matches!(err, VmError::StackOverflow));
    }

    #[test]
    fn test_check_stack_respects_limit() {
        let mut state = State::with_options(VmOptions {
            max_stack: 2,
            ..Default::default()
        });
        assert!(state.check_stack(2));
        state.push(1);
        assert!(state.check_stack(1));
        assert!(!state.check_stack(2));
    }

    #[test]
    fn test_named_metatables() {
        let mut state = State::new();
        let (mt, created) = state.new_metatable("Point");
        assert!(created);
        assert_eq!(mt.get_field("__name"), Value::string("Point"));

        let (again, created) = state.new_metatable("Point");
        assert!(!created);
        assert!(again.ptr_eq(&mt));

        state.push_userdata(Rc::new(5_i32), Some(mt));
        assert!(state.test_userdata(-1, "Point").is_some());
        assert!(state.test_userdata(-1, "Other").is_none());
    }

    #[test]
    fn test_index_metamethod_table_chain() {
        let mut state = State::new();
        let fallback = Table::new();
        fallback.set_field("greeting", "hi");
        let meta = Table::new();
        meta.set_field("__index", fallback);
        let object = Table::new();
        object.set_metatable(Some(meta));

        let object = Value::Table(object);
        assert_eq!(
            state.get_property(&object, "greeting").unwrap(),
            Value::string("hi")
        );
        assert!(state.get_property(&object, "missing").unwrap().is_nil());
    }

    #[test]
    fn test_index_on_plain_userdata_fails() {
        let mut state = State::new();
        let block = state.push_userdata(Rc::new(()), None);
        let err = state
            .get_property(&Value::Userdata(block), "x")
            .unwrap_err();
        assert!(matches!(err, VmError::NotIndexable("userdata")));
    }

    #[test]
    fn test_collector_runs_finalizer_once() {
        let finalized = Rc::new(Cell::new(0));
        let mut state = State::new();
        let (mt, _) = state.new_metatable("Counted");
        let counter = finalized.clone();
        mt.set_field(
            "__gc",
            Function::new(move |state: &mut State| {
                let block = state.to_userdata(1).ok_or_else(|| state.raise("no block"))?;
                block.take_payload();
                counter.set(counter.get() + 1);
                Ok(0)
            }),
        );

        state.push_userdata(Rc::new(1_u8), Some(mt));
        assert_eq!(state.collect_garbage(), 0);

        state.pop(1);
        assert_eq!(state.collect_garbage(), 1);
        assert_eq!(state.collect_garbage(), 0);
        assert_eq!(finalized.get(), 1);
        assert_eq!(state.live_userdata(), 0);
    }

    #[test]
    fn test_close_runs_pending_finalizers() {
        let finalized = Rc::new(Cell::new(0));
        {
            let mut state = State::new();
            let (mt, _) = state.new_metatable("Counted");
            let counter = finalized.clone();
            mt.set_field(
                "__gc",
                Function::new(move |_state: &mut State| {
                    counter.set(counter.get() + 1);
                    Ok(0)
                }),
            );
            let block = state.push_userdata(Rc::new(()), Some(mt.clone()));
            state.set_global("kept", block);
            state.push_userdata(Rc::new(()), Some(mt));
        }
        assert_eq!(finalized.get(), 2);
    }

    #[test]
    fn test_app_data_slots() {
        let mut state = State::new();
        assert!(state.set_app_data(41_u32).is_none());
        *state.app_data_mut::<u32>().unwrap() += 1;
        assert_eq!(state.app_data::<u32>(), Some(&42));
        assert!(state.app_data::<i64>().is_none());
        assert_eq!(state.remove_app_data::<u32>(), Some(42));
        assert!(state.app_data::<u32>().is_none());
    }
}
