//! Wrapped objects
//!
//! A described value pushed onto the stack becomes a userdata block whose
//! payload is an `Rc<RefCell<T>>` and whose metatable is the one registered
//! for `T`. The runtime owns the block; the `__gc` hook drops the payload.
//!
//! Property access goes through two hooks installed on the metatable:
//!
//! - `__index`: declared fields first (first declaration wins), then the
//!   methods table, then nil
//! - `__newindex`: writable fields only, everything else is rejected

use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::rc::Rc;

use rustc_hash::FxHashMap;
use tether_vm::{Function, State, Table, Userdata, Value};

use crate::describe::{Described, FieldEntry};
use crate::error::{BindError, BindResult};
use crate::marshal::{reserve, FromStack, ParamKind, ToStack};
use crate::registry;

// ============================================================================
// Obj
// ============================================================================

/// Borrowed handle to a wrapped object.
///
/// Used as a parameter type to receive an existing object without copying
/// it, and as a return type to hand the same object back to the script.
pub struct Obj<T> {
    cell: Rc<RefCell<T>>,
    block: Rc<Userdata>,
}

impl<T: Described> Obj<T> {
    /// Immutably borrow the payload
    pub fn try_borrow(&self) -> BindResult<Ref<'_, T>> {
        self.cell
            .try_borrow()
            .map_err(|_| BindError::AlreadyBorrowed(T::NAME))
    }

    /// Mutably borrow the payload
    pub fn try_borrow_mut(&self) -> BindResult<RefMut<'_, T>> {
        self.cell
            .try_borrow_mut()
            .map_err(|_| BindError::AlreadyBorrowed(T::NAME))
    }

    /// Immutably borrow the payload, panicking on a conflicting borrow
    pub fn borrow(&self) -> Ref<'_, T> {
        self.cell.borrow()
    }

    /// Mutably borrow the payload, panicking on a conflicting borrow
    pub fn borrow_mut(&self) -> RefMut<'_, T> {
        self.cell.borrow_mut()
    }

    /// Userdata block holding the payload
    pub fn userdata(&self) -> &Rc<Userdata> {
        &self.block
    }

    /// Check whether two handles refer to the same object
    pub fn ptr_eq(&self, other: &Obj<T>) -> bool {
        Rc::ptr_eq(&self.block, &other.block)
    }
}

impl<T> Clone for Obj<T> {
    fn clone(&self) -> Self {
        Obj {
            cell: self.cell.clone(),
            block: self.block.clone(),
        }
    }
}

impl<T: Described> fmt::Debug for Obj<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Obj<{}>({:p})", T::NAME, Rc::as_ptr(&self.block))
    }
}

impl<T: Described> FromStack for Obj<T> {
    fn from_stack(state: &State, slot: i32) -> BindResult<Self> {
        check_object::<T>(state, slot)
    }

    fn kind() -> ParamKind {
        ParamKind::Object(T::NAME)
    }
}

/// Pushes the existing block, preserving identity
impl<T: Described> ToStack for Obj<T> {
    fn push(self, state: &mut State) -> BindResult<()> {
        reserve(state)?;
        state.push(Value::Userdata(self.block));
        Ok(())
    }

    fn kind() -> ParamKind {
        ParamKind::Object(T::NAME)
    }
}

/// Resolve the wrapped object of type `T` at `slot`
pub fn check_object<T: Described>(state: &State, slot: i32) -> BindResult<Obj<T>> {
    let wrong_type = || BindError::ObjectType {
        index: slot,
        type_name: T::NAME,
    };
    let block = state.test_userdata(slot, T::NAME).ok_or_else(wrong_type)?;
    let payload = block.payload().ok_or(BindError::Destroyed(T::NAME))?;
    let cell = payload.downcast::<RefCell<T>>().map_err(|_| wrong_type())?;
    Ok(Obj { cell, block })
}

/// Move `value` into a new wrapped object and push it
pub fn push_object<T: Described>(state: &mut State, value: T) -> BindResult<Obj<T>> {
    reserve(state)?;
    let registered = registry::metatable::<T>(state)?;
    let cell = Rc::new(RefCell::new(value));
    let block = state.push_userdata(cell.clone(), Some(registered.metatable().clone()));
    Ok(Obj { cell, block })
}

// ============================================================================
// Metatable hooks
// ============================================================================

/// Fields of a type with their lookup indices
pub(crate) struct FieldTable<T> {
    fields: Vec<FieldEntry<T>>,
    readable: FxHashMap<&'static str, usize>,
    writable: FxHashMap<&'static str, usize>,
}

impl<T> FieldTable<T> {
    pub(crate) fn new(fields: Vec<FieldEntry<T>>) -> Self {
        let mut readable = FxHashMap::default();
        let mut writable = FxHashMap::default();
        for (idx, field) in fields.iter().enumerate() {
            readable.entry(field.name()).or_insert(idx);
            if field.setter.is_some() {
                writable.entry(field.name()).or_insert(idx);
            }
        }
        FieldTable {
            fields,
            readable,
            writable,
        }
    }

    fn readable(&self, key: &[u8]) -> Option<&FieldEntry<T>> {
        let key = std::str::from_utf8(key).ok()?;
        self.readable.get(key).map(|&idx| &self.fields[idx])
    }

    fn writable(&self, key: &[u8]) -> Option<&FieldEntry<T>> {
        let key = std::str::from_utf8(key).ok()?;
        self.writable.get(key).map(|&idx| &self.fields[idx])
    }

    pub(crate) fn len(&self) -> usize {
        self.fields.len()
    }
}

fn key_at(state: &State, slot: i32) -> BindResult<Rc<[u8]>> {
    state.to_bytes(slot).ok_or_else(|| BindError::ArgumentType {
        index: slot,
        expected: "string",
        got: state.kind(slot).name(),
    })
}

/// `__gc`: release the payload; an empty block is left alone
pub(crate) fn gc_hook() -> Function {
    Function::named("__gc", |state: &mut State| {
        if let Some(block) = state.to_userdata(1) {
            drop(block.take_payload());
        }
        Ok(0)
    })
}

/// `__index`: `(object, key) -> value`
pub(crate) fn index_hook<T: Described>(
    fields: Rc<FieldTable<T>>,
    methods: Table,
) -> impl Fn(&mut State) -> BindResult<usize> + 'static {
    move |state: &mut State| {
        let obj = check_object::<T>(state, 1)?;
        let key = key_at(state, 2)?;
        reserve(state)?;
        match fields.readable(&key) {
            Some(field) => {
                let this = obj.try_borrow()?;
                (field.getter)(&*this, state)?;
            }
            None => state.push(methods.get(Value::String(key))),
        }
        Ok(1)
    }
}

/// `__newindex`: `(object, key, value)`
pub(crate) fn newindex_hook<T: Described>(
    fields: Rc<FieldTable<T>>,
) -> impl Fn(&mut State) -> BindResult<usize> + 'static {
    move |state: &mut State| {
        let obj = check_object::<T>(state, 1)?;
        let key = key_at(state, 2)?;
        let setter = fields
            .writable(&key)
            .and_then(|field| field.setter.as_ref())
            .ok_or_else(|| BindError::WriteRejected {
                field: String::from_utf8_lossy(&key).into_owned(),
                type_name: T::NAME,
            })?;
        let mut this = obj.try_borrow_mut()?;
        setter(&mut *this, state, 3)?;
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::describe::TypeDescriptor;

    #[derive(Clone, Debug, PartialEq)]
    struct Point {
        x: f64,
        y: f64,
    }

    impl Described for Point {
        const NAME: &'static str = "Point";

        fn describe(d: &mut TypeDescriptor<Self>) {
            d.field("x", |p| &p.x, |p| &mut p.x)
                .readonly_field("y", |p| &p.y)
                .readonly_field("x", |p| &p.y);
        }
    }

    #[test]
    fn test_push_and_check() {
        let mut state = State::new();
        let obj = push_object(&mut state, Point { x: 1.0, y: 2.0 }).unwrap();
        let again = check_object::<Point>(&state, -1).unwrap();
        assert!(obj.ptr_eq(&again));
        assert_eq!(again.borrow().y, 2.0);
        assert_eq!(state.value(-1).to_string().split(':').next(), Some("Point"));
    }

    #[test]
    fn test_check_rejects_other_values() {
        let mut state = State::new();
        state.push(3);
        let err = check_object::<Point>(&state, 1).unwrap_err();
        assert_eq!(err.to_string(), "arg #1 is not of type 'Point'");
    }

    #[test]
    fn test_field_table_first_declaration_wins() {
        let table = FieldTable::new(TypeDescriptor::<Point>::build().into_fields());
        assert_eq!(table.len(), 3);
        assert!(!table.readable(b"x").unwrap().attrs().read_only);
        assert!(table.writable(b"y").is_none());
        assert!(table.readable(b"\xff").is_none());
    }

    #[test]
    fn test_destroyed_object() {
        let mut state = State::new();
        let obj = push_object(&mut state, Point { x: 0.0, y: 0.0 }).unwrap();
        obj.userdata().take_payload();
        assert!(matches!(
            check_object::<Point>(&state, 1),
            Err(BindError::Destroyed("Point"))
        ));
    }

    #[test]
    fn test_conflicting_borrow_is_an_error() {
        let mut state = State::new();
        let obj = push_object(&mut state, Point { x: 0.0, y: 0.0 }).unwrap();
        let _guard = obj.borrow_mut();
        assert!(matches!(
            obj.try_borrow(),
            Err(BindError::AlreadyBorrowed("Point"))
        ));
    }
}
