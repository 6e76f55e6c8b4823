//! Error types for the binding engine

use tether_vm::VmError;

/// Result type for binding operations
pub type BindResult<T> = Result<T, BindError>;

/// Coarse classification of a [`BindError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Argument has the wrong kind or object type
    ArgumentType,
    /// Numeric argument is fractional or out of range
    ArgumentRange,
    /// Write to a read-only or unknown field
    WriteRejected,
    /// Runtime stack could not grow
    StackCapacity,
    /// Object destroyed or already borrowed
    Lifetime,
    /// Type registration conflict
    Registration,
    /// Error returned by the bound native code
    Native,
    /// Error raised inside the runtime
    Runtime,
}

/// Binding engine errors.
///
/// Argument indices are 1-based positions in the script-visible argument
/// list; the receiver of a method is position 0.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BindError {
    /// Argument kind mismatch
    #[error("arg #{index} expected {expected}, got {got}")]
    ArgumentType {
        /// Argument position
        index: i32,
        /// Expected kind name
        expected: &'static str,
        /// Actual kind name
        got: &'static str,
    },

    /// Argument is not a wrapped object of the expected type
    #[error("arg #{index} is not of type '{type_name}'")]
    ObjectType {
        /// Argument position (0 for the receiver)
        index: i32,
        /// Registered type name
        type_name: &'static str,
    },

    /// Float argument has a fractional part (or is NaN)
    #[error("arg #{index} is not an integer")]
    NotIntegral {
        /// Argument position
        index: i32,
    },

    /// Integer argument outside the target type's range
    #[error("arg #{index} does not fit into [{min}, {max}]")]
    OutOfRange {
        /// Argument position
        index: i32,
        /// Smallest accepted value
        min: i128,
        /// Largest accepted value
        max: i128,
    },

    /// Write to a read-only or unknown field
    #[error("Cannot set field '{field}' on '{type_name}'")]
    WriteRejected {
        /// Field name as written by the script
        field: String,
        /// Registered type name
        type_name: &'static str,
    },

    /// Runtime stack has no room for another value
    #[error("Could not reserve stack")]
    StackCapacity,

    /// Object payload already released by its finalizer
    #[error("object of type '{0}' has been destroyed")]
    Destroyed(&'static str),

    /// Object payload is borrowed in a conflicting way
    #[error("object of type '{0}' is already borrowed")]
    AlreadyBorrowed(&'static str),

    /// A different native type already registered under this name
    #[error("type name '{0}' is already registered by another native type")]
    NameCollision(&'static str),

    /// Error returned by bound native code
    #[error("{0}")]
    Native(String),

    /// Error raised by the runtime while the engine was calling into it
    #[error(transparent)]
    Runtime(#[from] VmError),
}

impl BindError {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            BindError::ArgumentType { .. } | BindError::ObjectType { .. } => ErrorKind::ArgumentType,
            BindError::NotIntegral { .. } | BindError::OutOfRange { .. } => ErrorKind::ArgumentRange,
            BindError::WriteRejected { .. } => ErrorKind::WriteRejected,
            BindError::StackCapacity => ErrorKind::StackCapacity,
            BindError::Destroyed(_) | BindError::AlreadyBorrowed(_) => ErrorKind::Lifetime,
            BindError::NameCollision(_) => ErrorKind::Registration,
            BindError::Native(_) => ErrorKind::Native,
            BindError::Runtime(_) => ErrorKind::Runtime,
        }
    }

    /// Re-number an argument error to its script-visible position.
    ///
    /// Marshalling reports raw frame slots; methods shift them by one.
    pub(crate) fn at_argument(self, position: i32) -> Self {
        match self {
            BindError::ArgumentType { expected, got, .. } => BindError::ArgumentType {
                index: position,
                expected,
                got,
            },
            BindError::ObjectType { type_name, .. } => BindError::ObjectType {
                index: position,
                type_name,
            },
            BindError::NotIntegral { .. } => BindError::NotIntegral { index: position },
            BindError::OutOfRange { min, max, .. } => BindError::OutOfRange {
                index: position,
                min,
                max,
            },
            other => other,
        }
    }

    /// Convert into the error the runtime unwinds with.
    ///
    /// Runtime errors pass through unchanged so their value survives.
    pub fn into_vm_error(self, state: &tether_vm::State) -> VmError {
        match self {
            BindError::Runtime(err) => err,
            other => state.raise(other.to_string()),
        }
    }
}

impl From<String> for BindError {
    fn from(s: String) -> Self {
        BindError::Native(s)
    }
}

impl From<&str> for BindError {
    fn from(s: &str) -> Self {
        BindError::Native(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        let err = BindError::NotIntegral { index: 2 };
        assert_eq!(err.to_string(), "arg #2 is not an integer");

        let err = BindError::OutOfRange {
            index: 1,
            min: 0,
            max: 255,
        };
        assert_eq!(err.to_string(), "arg #1 does not fit into [0, 255]");

        let err = BindError::WriteRejected {
            field: "name".into(),
            type_name: "Person",
        };
        assert_eq!(err.to_string(), "Cannot set field 'name' on 'Person'");
        assert_eq!(BindError::StackCapacity.to_string(), "Could not reserve stack");
    }

    #[test]
    fn test_kinds() {
        assert_eq!(
            BindError::ObjectType {
                index: 0,
                type_name: "T"
            }
            .kind(),
            ErrorKind::ArgumentType
        );
        assert_eq!(BindError::NotIntegral { index: 1 }.kind(), ErrorKind::ArgumentRange);
        assert_eq!(BindError::Destroyed("T").kind(), ErrorKind::Lifetime);
        assert_eq!(BindError::AlreadyBorrowed("T").kind(), ErrorKind::Lifetime);
        assert_eq!(BindError::from("nope").kind(), ErrorKind::Native);
    }

    #[test]
    fn test_runtime_errors_pass_through() {
        let state = tether_vm::State::new();
        let inner = VmError::Runtime(tether_vm::Value::Integer(3));
        let err = BindError::from(inner).into_vm_error(&state);
        assert_eq!(err.into_value(), tether_vm::Value::Integer(3));
    }
}
