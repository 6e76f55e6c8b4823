//! Runtime configuration

/// Configuration for a [`State`](crate::State)
#[derive(Debug, Clone)]
pub struct VmOptions {
    /// Maximum number of value slots on the stack (default: 1_000_000)
    pub max_stack: usize,
    /// Maximum nesting of native calls (default: 200)
    pub max_call_depth: usize,
    /// Run pending `__gc` finalizers when the state is dropped (default: true)
    pub finalize_on_close: bool,
}

impl Default for VmOptions {
    fn default() -> Self {
        VmOptions {
            max_stack: 1_000_000,
            max_call_depth: 200,
            finalize_on_close: true,
        }
    }
}
