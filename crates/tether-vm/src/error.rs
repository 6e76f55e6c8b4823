//! Runtime error types

use crate::value::Value;

/// Result type for runtime operations
pub type VmResult<T> = Result<T, VmError>;

/// Errors raised by the runtime.
///
/// `Runtime` carries an arbitrary error value, the same way a script-level
/// `error(v)` does. The other variants are raised by the runtime itself and
/// are turned into string values when a script catches them.
#[derive(Debug, Clone, thiserror::Error)]
pub enum VmError {
    /// Error raised with an explicit value (native `raise` or script `error`)
    #[error("{0}")]
    Runtime(Value),

    /// Call target is not a function
    #[error("attempt to call a {0} value")]
    NotCallable(&'static str),

    /// Index or assignment on a value without table semantics
    #[error("attempt to index a {0} value")]
    NotIndexable(&'static str),

    /// Table key cannot be used (nil or NaN)
    #[error("table index is {0}")]
    InvalidKey(&'static str),

    /// Value stack or native call depth exhausted
    #[error("stack overflow")]
    StackOverflow,
}

impl VmError {
    /// Convert into the value a script sees when it catches this error.
    pub fn into_value(self) -> Value {
        match self {
            VmError::Runtime(value) => value,
            other => Value::string(other.to_string()),
        }
    }

    /// Human-readable message for the error.
    pub fn message(&self) -> String {
        self.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_error_keeps_value() {
        let err = VmError::Runtime(Value::Integer(7));
        assert_eq!(err.to_string(), "7");
        assert_eq!(err.into_value(), Value::Integer(7));
    }

    #[test]
    fn test_builtin_errors_become_strings() {
        let err = VmError::NotCallable("nil");
        assert_eq!(err.message(), "attempt to call a nil value");
        assert_eq!(
            err.into_value().as_str(),
            Some("attempt to call a nil value")
        );
    }
}
