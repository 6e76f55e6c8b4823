//! Runtime value model
//!
//! Values are cheap to clone: scalars are stored inline and every heap value
//! (string, table, function, userdata) is reference counted.
//!
//! ```text
//! Nil | Boolean | Integer(i64) | Number(f64) | String(bytes)
//!     | Table | Function | Userdata
//! ```
//!
//! Integers and floats share the `number` kind, matching what scripts see.
//! Strings are length-prefixed byte strings, so embedded NUL bytes survive.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::error::{VmError, VmResult};
use crate::state::State;

// ============================================================================
// Kind
// ============================================================================

/// Script-visible kind of a value (or of an empty stack slot).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    /// Slot outside the current frame
    None,
    /// `nil`
    Nil,
    /// `true` / `false`
    Boolean,
    /// Integer or float
    Number,
    /// Byte string
    String,
    /// Table
    Table,
    /// Native function
    Function,
    /// Opaque native block
    Userdata,
}

impl Kind {
    /// Name used in error messages
    pub const fn name(self) -> &'static str {
        match self {
            Kind::None => "no value",
            Kind::Nil => "nil",
            Kind::Boolean => "boolean",
            Kind::Number => "number",
            Kind::String => "string",
            Kind::Table => "table",
            Kind::Function => "function",
            Kind::Userdata => "userdata",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// Value
// ============================================================================

/// A runtime value.
#[derive(Clone, Default)]
pub enum Value {
    /// Absent value
    #[default]
    Nil,
    /// Boolean
    Boolean(bool),
    /// Integer number
    Integer(i64),
    /// Floating-point number
    Number(f64),
    /// Immutable byte string
    String(Rc<[u8]>),
    /// Table reference
    Table(Table),
    /// Native function reference
    Function(Function),
    /// Userdata block reference
    Userdata(Rc<Userdata>),
}

impl Value {
    /// Create a string value from text or raw bytes
    pub fn string(bytes: impl AsRef<[u8]>) -> Self {
        Value::String(Rc::from(bytes.as_ref()))
    }

    /// Kind of this value
    pub fn kind(&self) -> Kind {
        match self {
            Value::Nil => Kind::Nil,
            Value::Boolean(_) => Kind::Boolean,
            Value::Integer(_) | Value::Number(_) => Kind::Number,
            Value::String(_) => Kind::String,
            Value::Table(_) => Kind::Table,
            Value::Function(_) => Kind::Function,
            Value::Userdata(_) => Kind::Userdata,
        }
    }

    /// Kind name of this value
    pub fn type_name(&self) -> &'static str {
        self.kind().name()
    }

    /// Check for nil
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// Truthiness: everything except `nil` and `false` is true
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Boolean(false))
    }

    /// Get as boolean if this is a boolean
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Get as integer: integers, or floats with an exact integer value
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            Value::Number(n) => float_to_i64(*n),
            _ => None,
        }
    }

    /// Get as float: any number
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Get string bytes
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get string contents if they are valid UTF-8
    pub fn as_str(&self) -> Option<&str> {
        self.as_bytes().and_then(|b| std::str::from_utf8(b).ok())
    }

    /// Get as table
    pub fn as_table(&self) -> Option<&Table> {
        match self {
            Value::Table(t) => Some(t),
            _ => None,
        }
    }

    /// Get as function
    pub fn as_function(&self) -> Option<&Function> {
        match self {
            Value::Function(f) => Some(f),
            _ => None,
        }
    }

    /// Get as userdata
    pub fn as_userdata(&self) -> Option<&Rc<Userdata>> {
        match self {
            Value::Userdata(u) => Some(u),
            _ => None,
        }
    }

    /// Metatable of a table or userdata
    pub fn metatable(&self) -> Option<Table> {
        match self {
            Value::Table(t) => t.metatable(),
            Value::Userdata(u) => u.metatable(),
            _ => None,
        }
    }
}

/// Exact float → i64 conversion (fails for fractions, NaN and out-of-range)
pub(crate) fn float_to_i64(n: f64) -> Option<i64> {
    // 2^63 is exactly representable; i64::MAX is not
    const LIMIT: f64 = 9_223_372_036_854_775_808.0;
    if n.fract() == 0.0 && (-LIMIT..LIMIT).contains(&n) {
        Some(n as i64)
    } else {
        None
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Integer(i), Value::Number(n)) | (Value::Number(n), Value::Integer(i)) => {
                float_to_i64(*n) == Some(*i)
            }
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Table(a), Value::Table(b)) => a.ptr_eq(b),
            (Value::Function(a), Value::Function(b)) => a.ptr_eq(b),
            (Value::Userdata(a), Value::Userdata(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => f.write_str("nil"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Number(n) if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e16 => {
                write!(f, "{:.1}", n)
            }
            Value::Number(n) => write!(f, "{}", n),
            Value::String(s) => f.write_str(&String::from_utf8_lossy(s)),
            Value::Table(t) => write!(f, "table: {:p}", t.as_ptr()),
            Value::Function(func) => match func.name() {
                Some(name) => write!(f, "function: {}", name),
                None => write!(f, "function: {:p}", func.as_ptr()),
            },
            Value::Userdata(u) => {
                let name = u.type_name().unwrap_or_else(|| "userdata".to_string());
                write!(f, "{}: {:p}", name, Rc::as_ptr(u))
            }
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "Value::Nil"),
            Value::Boolean(b) => write!(f, "Value::Boolean({})", b),
            Value::Integer(i) => write!(f, "Value::Integer({})", i),
            Value::Number(n) => write!(f, "Value::Number({})", n),
            Value::String(s) => write!(f, "Value::String({:?})", String::from_utf8_lossy(s)),
            other => write!(f, "Value::{:?}({})", other.kind(), other),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Integer(i64::from(i))
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::string(s)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::string(s)
    }
}

impl From<&[u8]> for Value {
    fn from(b: &[u8]) -> Self {
        Value::string(b)
    }
}

impl From<Table> for Value {
    fn from(t: Table) -> Self {
        Value::Table(t)
    }
}

impl From<Function> for Value {
    fn from(f: Function) -> Self {
        Value::Function(f)
    }
}

impl From<Rc<Userdata>> for Value {
    fn from(u: Rc<Userdata>) -> Self {
        Value::Userdata(u)
    }
}

// ============================================================================
// Table
// ============================================================================

/// Normalized table key. Reference values hash by identity.
#[derive(Clone)]
enum TableKey {
    Boolean(bool),
    Integer(i64),
    Float(u64),
    String(Rc<[u8]>),
    Table(Table),
    Function(Function),
    Userdata(Rc<Userdata>),
}

impl TableKey {
    fn from_value(value: &Value) -> Result<Self, &'static str> {
        Ok(match value {
            Value::Nil => return Err("nil"),
            Value::Boolean(b) => TableKey::Boolean(*b),
            Value::Integer(i) => TableKey::Integer(*i),
            Value::Number(n) if n.is_nan() => return Err("NaN"),
            Value::Number(n) => match float_to_i64(*n) {
                Some(i) => TableKey::Integer(i),
                None => TableKey::Float(n.to_bits()),
            },
            Value::String(s) => TableKey::String(s.clone()),
            Value::Table(t) => TableKey::Table(t.clone()),
            Value::Function(f) => TableKey::Function(f.clone()),
            Value::Userdata(u) => TableKey::Userdata(u.clone()),
        })
    }

    fn address(&self) -> usize {
        match self {
            TableKey::Table(t) => t.as_ptr() as usize,
            TableKey::Function(f) => f.as_ptr() as usize,
            TableKey::Userdata(u) => Rc::as_ptr(u) as *const () as usize,
            _ => 0,
        }
    }
}

impl PartialEq for TableKey {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (TableKey::Boolean(a), TableKey::Boolean(b)) => a == b,
            (TableKey::Integer(a), TableKey::Integer(b)) => a == b,
            (TableKey::Float(a), TableKey::Float(b)) => a == b,
            (TableKey::String(a), TableKey::String(b)) => a == b,
            (TableKey::Table(_), TableKey::Table(_))
            | (TableKey::Function(_), TableKey::Function(_))
            | (TableKey::Userdata(_), TableKey::Userdata(_)) => self.address() == other.address(),
            _ => false,
        }
    }
}

impl Eq for TableKey {}

impl Hash for TableKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            TableKey::Boolean(b) => b.hash(state),
            TableKey::Integer(i) => i.hash(state),
            TableKey::Float(bits) => bits.hash(state),
            TableKey::String(s) => s.hash(state),
            _ => self.address().hash(state),
        }
    }
}

#[derive(Default)]
struct TableData {
    entries: FxHashMap<TableKey, Value>,
    metatable: Option<Table>,
}

/// Reference to a runtime table.
///
/// All accessors here are raw: they never consult the metatable. Use
/// [`State::get_property`] / [`State::set_property`] for script semantics.
#[derive(Clone, Default)]
pub struct Table(Rc<RefCell<TableData>>);

impl Table {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw read; invalid keys read as nil
    pub fn get(&self, key: impl Into<Value>) -> Value {
        match TableKey::from_value(&key.into()) {
            Ok(key) => self.0.borrow().entries.get(&key).cloned().unwrap_or_default(),
            Err(_) => Value::Nil,
        }
    }

    /// Raw write; assigning nil removes the entry
    pub fn set(&self, key: impl Into<Value>, value: impl Into<Value>) -> VmResult<()> {
        let key = TableKey::from_value(&key.into()).map_err(VmError::InvalidKey)?;
        let value = value.into();
        let mut data = self.0.borrow_mut();
        if value.is_nil() {
            data.entries.remove(&key);
        } else {
            data.entries.insert(key, value);
        }
        Ok(())
    }

    /// Raw read of a string key
    pub fn get_field(&self, name: &str) -> Value {
        self.get(name)
    }

    /// Raw write of a string key
    pub fn set_field(&self, name: &str, value: impl Into<Value>) {
        let key = TableKey::String(Rc::from(name.as_bytes()));
        let value = value.into();
        let mut data = self.0.borrow_mut();
        if value.is_nil() {
            data.entries.remove(&key);
        } else {
            data.entries.insert(key, value);
        }
    }

    /// Check whether a key is present
    pub fn contains(&self, key: impl Into<Value>) -> bool {
        !self.get(key).is_nil()
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.0.borrow().entries.len()
    }

    /// Check if the table has no entries
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Metatable of this table
    pub fn metatable(&self) -> Option<Table> {
        self.0.borrow().metatable.clone()
    }

    /// Replace the metatable of this table
    pub fn set_metatable(&self, metatable: Option<Table>) {
        self.0.borrow_mut().metatable = metatable;
    }

    /// Identity comparison
    pub fn ptr_eq(&self, other: &Table) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Address of the table, for identity display
    pub fn as_ptr(&self) -> *const () {
        Rc::as_ptr(&self.0) as *const ()
    }
}

impl fmt::Debug for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Table({:p}, len={})", self.as_ptr(), self.len())
    }
}

// ============================================================================
// Function
// ============================================================================

/// Native function signature.
///
/// The callee sees its arguments as frame slots `1..=state.top()`, pushes its
/// results and returns how many it pushed. Returning `Err` unwinds the call.
pub type NativeFn = dyn Fn(&mut State) -> VmResult<usize>;

struct FunctionData {
    name: Option<String>,
    func: Box<NativeFn>,
}

/// Reference to a native function value.
#[derive(Clone)]
pub struct Function(Rc<FunctionData>);

impl Function {
    /// Wrap a native function
    pub fn new<F>(func: F) -> Self
    where
        F: Fn(&mut State) -> VmResult<usize> + 'static,
    {
        Function(Rc::new(FunctionData {
            name: None,
            func: Box::new(func),
        }))
    }

    /// Wrap a native function with a display name
    pub fn named<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&mut State) -> VmResult<usize> + 'static,
    {
        Function(Rc::new(FunctionData {
            name: Some(name.into()),
            func: Box::new(func),
        }))
    }

    /// Display name, if one was given
    pub fn name(&self) -> Option<&str> {
        self.0.name.as_deref()
    }

    /// Run the function against the current frame of `state`
    pub(crate) fn invoke(&self, state: &mut State) -> VmResult<usize> {
        (self.0.func)(state)
    }

    /// Identity comparison
    pub fn ptr_eq(&self, other: &Function) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Address of the function, for identity display
    pub fn as_ptr(&self) -> *const () {
        Rc::as_ptr(&self.0) as *const ()
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "Function({})", name),
            None => write!(f, "Function({:p})", self.as_ptr()),
        }
    }
}

// ============================================================================
// Userdata
// ============================================================================

/// Opaque block of native memory owned by the runtime.
///
/// The payload is type-erased; whoever allocated the block decides what it
/// holds. Once the block has been finalized the payload is usually gone and
/// [`Userdata::payload`] returns `None`.
pub struct Userdata {
    payload: RefCell<Option<Rc<dyn Any>>>,
    metatable: RefCell<Option<Table>>,
    finalized: Cell<bool>,
}

impl Userdata {
    pub(crate) fn new(payload: Rc<dyn Any>, metatable: Option<Table>) -> Self {
        Self {
            payload: RefCell::new(Some(payload)),
            metatable: RefCell::new(metatable),
            finalized: Cell::new(false),
        }
    }

    /// Shared handle to the payload
    pub fn payload(&self) -> Option<Rc<dyn Any>> {
        self.payload.borrow().clone()
    }

    /// Move the payload out, leaving the block empty
    pub fn take_payload(&self) -> Option<Rc<dyn Any>> {
        self.payload.borrow_mut().take()
    }

    /// Check whether the payload has been taken
    pub fn is_empty(&self) -> bool {
        self.payload.borrow().is_none()
    }

    /// Metatable attached to the block
    pub fn metatable(&self) -> Option<Table> {
        self.metatable.borrow().clone()
    }

    /// Attach or detach a metatable
    pub fn set_metatable(&self, metatable: Option<Table>) {
        *self.metatable.borrow_mut() = metatable;
    }

    /// Whether the collector already ran this block's finalizer
    pub fn is_finalized(&self) -> bool {
        self.finalized.get()
    }

    /// Mark finalized, returning the previous flag
    pub(crate) fn mark_finalized(&self) -> bool {
        self.finalized.replace(true)
    }

    /// `__name` of the metatable, if it is a string
    pub fn type_name(&self) -> Option<String> {
        self.metatable()
            .and_then(|mt| mt.get_field("__name").as_str().map(str::to_string))
    }
}

impl fmt::Debug for Userdata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Userdata")
            .field("type", &self.type_name())
            .field("empty", &self.is_empty())
            .field("finalized", &self.is_finalized())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds() {
        assert_eq!(Value::Nil.kind(), Kind::Nil);
        assert_eq!(Value::Integer(1).kind(), Kind::Number);
        assert_eq!(Value::Number(1.5).kind(), Kind::Number);
        assert_eq!(Value::string("x").type_name(), "string");
        assert_eq!(Kind::None.name(), "no value");
    }

    #[test]
    fn test_numeric_equality() {
        assert_eq!(Value::Integer(23), Value::Number(23.0));
        assert_ne!(Value::Integer(23), Value::Number(23.5));
        assert_ne!(Value::Integer(1), Value::string("1"));
    }

    #[test]
    fn test_as_integer_rejects_fractions() {
        assert_eq!(Value::Number(4.0).as_integer(), Some(4));
        assert_eq!(Value::Number(4.25).as_integer(), None);
        assert_eq!(Value::Number(f64::NAN).as_integer(), None);
        assert_eq!(Value::Number(1e19).as_integer(), None);
    }

    #[test]
    fn test_strings_keep_nul_bytes() {
        let v = Value::string(b"a\0b");
        assert_eq!(v.as_bytes(), Some(&b"a\0b"[..]));
    }

    #[test]
    fn test_table_raw_access() {
        let t = Table::new();
        t.set("x", 1).unwrap();
        t.set(2.0, "two").unwrap();
        assert_eq!(t.get("x"), Value::Integer(1));
        assert_eq!(t.get(2), Value::string("two"));
        assert_eq!(t.len(), 2);

        t.set("x", Value::Nil).unwrap();
        assert!(!t.contains("x"));
        assert!(matches!(t.set(Value::Nil, 1), Err(VmError::InvalidKey("nil"))));
        assert!(matches!(
            t.set(f64::NAN, 1),
            Err(VmError::InvalidKey("NaN"))
        ));
    }

    #[test]
    fn test_reference_keys_use_identity() {
        let t = Table::new();
        let a = Table::new();
        let b = Table::new();
        t.set(a.clone(), "a").unwrap();
        assert_eq!(t.get(a), Value::string("a"));
        assert!(t.get(b).is_nil());
    }

    #[test]
    fn test_display() {
        assert_eq!(Value::Number(2.0).to_string(), "2.0");
        assert_eq!(Value::Number(2.5).to_string(), "2.5");
        assert_eq!(Value::Integer(-3).to_string(), "-3");
        assert_eq!(Value::Boolean(true).to_string(), "true");
    }
}
