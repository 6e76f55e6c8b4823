//! Value marshalling
//!
//! [`FromStack`] pulls a native value out of a frame slot and [`ToStack`]
//! pushes one. Both report a [`ParamKind`] so call signatures can be
//! described without running anything.
//!
//! | native type                  | runtime kind            |
//! |------------------------------|-------------------------|
//! | `i8..i64`, `u8..u64`, sizes  | number (integral)       |
//! | `f32`, `f64`                 | number                  |
//! | `bool`                       | boolean                 |
//! | `String`, `&str`             | string (UTF-8)          |
//! | `Vec<u8>`                    | string (raw bytes)      |
//! | `Option<T>`                  | nil or `T`              |
//! | `()`                         | nil                     |
//! | `Value`                      | anything                |
//! | `T: Described`               | userdata of type `T`    |
//! | [`Obj<T>`](crate::Obj)       | userdata, borrowed      |

use std::fmt;

use tether_vm::{State, Value};

use crate::describe::Described;
use crate::error::{BindError, BindResult};
use crate::object;

// ============================================================================
// ParamKind
// ============================================================================

/// Kind of a parameter or return value, as seen in call signatures
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamKind {
    /// No value (`()`)
    Unit,
    /// Boolean
    Boolean,
    /// Integral number
    Integer,
    /// Any number
    Number,
    /// UTF-8 string
    String,
    /// Byte string
    Bytes,
    /// Any value, passed through
    Any,
    /// Wrapped object of a described type
    Object(&'static str),
    /// Nil or the inner kind
    Optional(Box<ParamKind>),
}

impl fmt::Display for ParamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamKind::Unit => f.write_str("()"),
            ParamKind::Boolean => f.write_str("boolean"),
            ParamKind::Integer => f.write_str("integer"),
            ParamKind::Number => f.write_str("number"),
            ParamKind::String => f.write_str("string"),
            ParamKind::Bytes => f.write_str("bytes"),
            ParamKind::Any => f.write_str("any"),
            ParamKind::Object(name) => f.write_str(name),
            ParamKind::Optional(inner) => write!(f, "{}?", inner),
        }
    }
}

// ============================================================================
// Traits
// ============================================================================

/// Convert a frame slot into a native value
pub trait FromStack: Sized {
    /// Read the value at `slot` of the current frame
    fn from_stack(state: &State, slot: i32) -> BindResult<Self>;

    /// Kind accepted by this conversion
    fn kind() -> ParamKind;
}

/// Push a native value onto the stack
pub trait ToStack {
    /// Push exactly one value
    fn push(self, state: &mut State) -> BindResult<()>;

    /// Kind produced by this conversion
    fn kind() -> ParamKind;
}

/// Fail with `StackCapacity` unless one more value fits
pub(crate) fn reserve(state: &State) -> BindResult<()> {
    if state.check_stack(1) {
        Ok(())
    } else {
        Err(BindError::StackCapacity)
    }
}

fn mismatch(state: &State, slot: i32, expected: &'static str) -> BindError {
    BindError::ArgumentType {
        index: slot,
        expected,
        got: state.kind(slot).name(),
    }
}

// ============================================================================
// Numbers
// ============================================================================

macro_rules! impl_integer {
    ($($ty:ty),* $(,)?) => {$(
        impl FromStack for $ty {
            fn from_stack(state: &State, slot: i32) -> BindResult<Self> {
                let out_of_range = || BindError::OutOfRange {
                    index: slot,
                    min: <$ty>::MIN as i128,
                    max: <$ty>::MAX as i128,
                };
                match state.get(slot) {
                    Some(Value::Integer(i)) => <$ty>::try_from(*i).map_err(|_| out_of_range()),
                    Some(Value::Number(n)) => {
                        let n = *n;
                        if n.is_nan() || n.round() != n {
                            return Err(BindError::NotIntegral { index: slot });
                        }
                        // saturates outside i128, which no target type covers
                        <$ty>::try_from(n as i128).map_err(|_| out_of_range())
                    }
                    _ => Err(mismatch(state, slot, "integer")),
                }
            }

            fn kind() -> ParamKind {
                ParamKind::Integer
            }
        }

        impl ToStack for $ty {
            fn push(self, state: &mut State) -> BindResult<()> {
                reserve(state)?;
                let value = i64::try_from(self)
                    .map_or_else(|_| Value::Number(self as f64), Value::Integer);
                state.push(value);
                Ok(())
            }

            fn kind() -> ParamKind {
                ParamKind::Integer
            }
        }
    )*};
}

impl_integer!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);

macro_rules! impl_float {
    ($($ty:ty),* $(,)?) => {$(
        impl FromStack for $ty {
            fn from_stack(state: &State, slot: i32) -> BindResult<Self> {
                state
                    .to_number(slot)
                    .map(|n| n as $ty)
                    .ok_or_else(|| mismatch(state, slot, "number"))
            }

            fn kind() -> ParamKind {
                ParamKind::Number
            }
        }

        impl ToStack for $ty {
            fn push(self, state: &mut State) -> BindResult<()> {
                reserve(state)?;
                state.push(Value::Number(f64::from(self)));
                Ok(())
            }

            fn kind() -> ParamKind {
                ParamKind::Number
            }
        }
    )*};
}

impl_float!(f32, f64);

// ============================================================================
// Scalars & text
// ============================================================================

impl FromStack for bool {
    fn from_stack(state: &State, slot: i32) -> BindResult<Self> {
        match state.get(slot) {
            Some(Value::Boolean(b)) => Ok(*b),
            _ => Err(mismatch(state, slot, "boolean")),
        }
    }

    fn kind() -> ParamKind {
        ParamKind::Boolean
    }
}

impl ToStack for bool {
    fn push(self, state: &mut State) -> BindResult<()> {
        reserve(state)?;
        state.push(self);
        Ok(())
    }

    fn kind() -> ParamKind {
        ParamKind::Boolean
    }
}

impl FromStack for String {
    fn from_stack(state: &State, slot: i32) -> BindResult<Self> {
        let bytes = state
            .to_bytes(slot)
            .ok_or_else(|| mismatch(state, slot, "string"))?;
        String::from_utf8(bytes.to_vec()).map_err(|_| BindError::ArgumentType {
            index: slot,
            expected: "string",
            got: "non-UTF-8 string",
        })
    }

    fn kind() -> ParamKind {
        ParamKind::String
    }
}

impl ToStack for String {
    fn push(self, state: &mut State) -> BindResult<()> {
        reserve(state)?;
        state.push(self);
        Ok(())
    }

    fn kind() -> ParamKind {
        ParamKind::String
    }
}

impl ToStack for &str {
    fn push(self, state: &mut State) -> BindResult<()> {
        reserve(state)?;
        state.push(self);
        Ok(())
    }

    fn kind() -> ParamKind {
        ParamKind::String
    }
}

impl FromStack for Vec<u8> {
    fn from_stack(state: &State, slot: i32) -> BindResult<Self> {
        state
            .to_bytes(slot)
            .map(|bytes| bytes.to_vec())
            .ok_or_else(|| mismatch(state, slot, "string"))
    }

    fn kind() -> ParamKind {
        ParamKind::Bytes
    }
}

impl ToStack for Vec<u8> {
    fn push(self, state: &mut State) -> BindResult<()> {
        reserve(state)?;
        state.push(Value::string(self));
        Ok(())
    }

    fn kind() -> ParamKind {
        ParamKind::Bytes
    }
}

impl FromStack for Value {
    fn from_stack(state: &State, slot: i32) -> BindResult<Self> {
        Ok(state.value(slot))
    }

    fn kind() -> ParamKind {
        ParamKind::Any
    }
}

impl ToStack for Value {
    fn push(self, state: &mut State) -> BindResult<()> {
        reserve(state)?;
        state.push(self);
        Ok(())
    }

    fn kind() -> ParamKind {
        ParamKind::Any
    }
}

impl ToStack for () {
    fn push(self, state: &mut State) -> BindResult<()> {
        reserve(state)?;
        state.push_nil();
        Ok(())
    }

    fn kind() -> ParamKind {
        ParamKind::Unit
    }
}

// ============================================================================
// Wrappers
// ============================================================================

impl<T: FromStack> FromStack for Option<T> {
    fn from_stack(state: &State, slot: i32) -> BindResult<Self> {
        if state.is_none_or_nil(slot) {
            Ok(None)
        } else {
            T::from_stack(state, slot).map(Some)
        }
    }

    fn kind() -> ParamKind {
        ParamKind::Optional(Box::new(<T as FromStack>::kind()))
    }
}

impl<T: ToStack> ToStack for Option<T> {
    fn push(self, state: &mut State) -> BindResult<()> {
        match self {
            Some(value) => value.push(state),
            None => ().push(state),
        }
    }

    fn kind() -> ParamKind {
        ParamKind::Optional(Box::new(<T as ToStack>::kind()))
    }
}

/// `Err` is raised as a script error carrying its display text
impl<T: ToStack, E: fmt::Display> ToStack for Result<T, E> {
    fn push(self, state: &mut State) -> BindResult<()> {
        match self {
            Ok(value) => value.push(state),
            Err(err) => Err(BindError::Native(err.to_string())),
        }
    }

    fn kind() -> ParamKind {
        <T as ToStack>::kind()
    }
}

// ============================================================================
// Described types
// ============================================================================

/// By-value argument: the payload is cloned out of the wrapped object
impl<T: Described + Clone> FromStack for T {
    fn from_stack(state: &State, slot: i32) -> BindResult<Self> {
        let obj = object::check_object::<T>(state, slot)?;
        let value = obj.try_borrow()?.clone();
        Ok(value)
    }

    fn kind() -> ParamKind {
        ParamKind::Object(T::NAME)
    }
}

/// Moves the value into a new wrapped object
impl<T: Described> ToStack for T {
    fn push(self, state: &mut State) -> BindResult<()> {
        object::push_object(state, self).map(|_| ())
    }

    fn kind() -> ParamKind {
        ParamKind::Object(T::NAME)
    }
}
