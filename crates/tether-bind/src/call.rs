//! Call adapter
//!
//! Turns an ordinary Rust callable into a [`NativeFunction`]: a signature
//! descriptor plus a type-erased invoker that follows the runtime's calling
//! convention.
//!
//! ```text
//! frame:  [ receiver? | arg1 | arg2 | ... ]
//!           slot 1      first_arg_slot()
//! ```
//!
//! Six shapes are supported, each for 0 through 8 parameters:
//!
//! | builder                 | callable shape                          |
//! |-------------------------|-----------------------------------------|
//! | [`IntoFunction`]        | `Fn(A, B, ..) -> R`                     |
//! | [`IntoStateFunction`]   | `Fn(&mut State, A, B, ..) -> R`         |
//! | [`IntoMethod`]          | `Fn(&T, A, B, ..) -> R`                 |
//! | [`IntoMethodMut`]       | `Fn(&mut T, A, B, ..) -> R`             |
//! | [`IntoStateMethod`]     | `Fn(&T, &mut State, A, B, ..) -> R`     |
//! | [`IntoStateMethodMut`]  | `Fn(&mut T, &mut State, A, B, ..) -> R` |
//!
//! The runtime handle never occupies a frame slot.
//!
//! Arguments are converted strictly left to right and the first failure
//! aborts the call before the callable runs. Every call pushes exactly one
//! result (`()` pushes nil).

use std::fmt;
use std::rc::Rc;

use tether_vm::State;

use crate::describe::Described;
use crate::error::{BindError, BindResult};
use crate::marshal::{FromStack, ParamKind, ToStack};
use crate::object;

// ============================================================================
// Signature
// ============================================================================

/// Shape of an adapted callable
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    /// Receiver type name for methods
    pub receiver: Option<&'static str>,
    /// Whether the runtime handle is passed, after the receiver if any
    pub takes_state: bool,
    /// Script-visible parameters, in order
    pub params: Vec<ParamKind>,
    /// Result kind
    pub returns: ParamKind,
}

impl Signature {
    /// Frame slot of the first script-visible parameter
    pub fn first_arg_slot(&self) -> i32 {
        if self.receiver.is_some() {
            2
        } else {
            1
        }
    }

    /// Number of script-visible parameters
    pub fn arity(&self) -> usize {
        self.params.len()
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(receiver) = self.receiver {
            write!(f, "{}:", receiver)?;
        }
        f.write_str("fn(")?;
        let mut first = true;
        if self.takes_state {
            f.write_str("state")?;
            first = false;
        }
        for param in &self.params {
            if !first {
                f.write_str(", ")?;
            }
            write!(f, "{}", param)?;
            first = false;
        }
        write!(f, ") -> {}", self.returns)
    }
}

// ============================================================================
// NativeFunction
// ============================================================================

type Invoker = dyn Fn(&mut State) -> BindResult<usize>;

/// Adapted callable: signature plus invoker.
///
/// Built once at registration time; cloning shares both halves.
#[derive(Clone)]
pub struct NativeFunction {
    signature: Rc<Signature>,
    invoker: Rc<Invoker>,
}

impl NativeFunction {
    /// Pair a signature with an invoker
    pub fn new<F>(signature: Signature, invoker: F) -> Self
    where
        F: Fn(&mut State) -> BindResult<usize> + 'static,
    {
        NativeFunction {
            signature: Rc::new(signature),
            invoker: Rc::new(invoker),
        }
    }

    /// Signature of the adapted callable
    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Run against the current frame; returns the number of results pushed
    pub fn invoke(&self, state: &mut State) -> BindResult<usize> {
        tracing::trace!(signature = %self.signature, args = state.top(), "native call");
        (self.invoker)(state)
    }
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NativeFunction({})", self.signature)
    }
}

/// Push the single result of a call
fn push_result<R: ToStack>(state: &mut State, ret: R) -> BindResult<usize> {
    if !state.check_stack(1) {
        return Err(BindError::StackCapacity);
    }
    ret.push(state)?;
    Ok(1)
}

// ============================================================================
// Builders
// ============================================================================

/// Callable without receiver or runtime handle
pub trait IntoFunction<Args>: 'static {
    /// Build the adapted function
    fn into_function(self) -> NativeFunction;
}

/// Callable whose first parameter is `&mut State`
pub trait IntoStateFunction<Args>: 'static {
    /// Build the adapted function
    fn into_state_function(self) -> NativeFunction;
}

/// Callable whose first parameter is `&T`
pub trait IntoMethod<T, Args>: 'static {
    /// Build the adapted method
    fn into_method(self) -> NativeFunction;
}

/// Callable whose first parameter is `&mut T`
pub trait IntoMethodMut<T, Args>: 'static {
    /// Build the adapted method
    fn into_method_mut(self) -> NativeFunction;
}

/// Callable taking `&T` and then `&mut State`.
///
/// The receiver stays borrowed while the callable runs, so re-entering the
/// runtime and touching the same object mutably fails with
/// [`BindError::AlreadyBorrowed`].
pub trait IntoStateMethod<T, Args>: 'static {
    /// Build the adapted method
    fn into_state_method(self) -> NativeFunction;
}

/// Callable taking `&mut T` and then `&mut State`
pub trait IntoStateMethodMut<T, Args>: 'static {
    /// Build the adapted method
    fn into_state_method_mut(self) -> NativeFunction;
}

/// Adapt a `&T` method outside a type description
pub fn method<T, F, Args>(f: F) -> NativeFunction
where
    F: IntoMethod<T, Args>,
{
    f.into_method()
}

/// Adapt a `&mut T` method outside a type description
pub fn method_mut<T, F, Args>(f: F) -> NativeFunction
where
    F: IntoMethodMut<T, Args>,
{
    f.into_method_mut()
}

/// Adapt a `&T` method taking the runtime handle outside a type description
pub fn state_method<T, F, Args>(f: F) -> NativeFunction
where
    F: IntoStateMethod<T, Args>,
{
    f.into_state_method()
}

/// Adapt a `&mut T` method taking the runtime handle outside a type description
pub fn state_method_mut<T, F, Args>(f: F) -> NativeFunction
where
    F: IntoStateMethodMut<T, Args>,
{
    f.into_state_method_mut()
}

macro_rules! impl_callables {
    ($($arg:ident),*) => {
        impl<Func, Ret, $($arg,)*> IntoFunction<fn($($arg,)*) -> Ret> for Func
        where
            Func: Fn($($arg),*) -> Ret + 'static,
            Ret: ToStack,
            $($arg: FromStack,)*
        {
            #[allow(non_snake_case, unused_mut, unused_variables, unused_assignments)]
            fn into_function(self) -> NativeFunction {
                let signature = Signature {
                    receiver: None,
                    takes_state: false,
                    params: vec![$(<$arg as FromStack>::kind()),*],
                    returns: <Ret as ToStack>::kind(),
                };
                NativeFunction::new(signature, move |state: &mut State| {
                    let mut position = 0;
                    $(
                        position += 1;
                        let $arg = <$arg as FromStack>::from_stack(state, position)
                            .map_err(|e| e.at_argument(position))?;
                    )*
                    let ret = (self)($($arg),*);
                    push_result(state, ret)
                })
            }
        }

        impl<Func, Ret, $($arg,)*> IntoStateFunction<fn($($arg,)*) -> Ret> for Func
        where
            Func: Fn(&mut State, $($arg),*) -> Ret + 'static,
            Ret: ToStack,
            $($arg: FromStack,)*
        {
            #[allow(non_snake_case, unused_mut, unused_variables, unused_assignments)]
            fn into_state_function(self) -> NativeFunction {
                let signature = Signature {
                    receiver: None,
                    takes_state: true,
                    params: vec![$(<$arg as FromStack>::kind()),*],
                    returns: <Ret as ToStack>::kind(),
                };
                NativeFunction::new(signature, move |state: &mut State| {
                    let mut position = 0;
                    $(
                        position += 1;
                        let $arg = <$arg as FromStack>::from_stack(state, position)
                            .map_err(|e| e.at_argument(position))?;
                    )*
                    let ret = (self)(state, $($arg),*);
                    push_result(state, ret)
                })
            }
        }

        impl<T, Func, Ret, $($arg,)*> IntoMethod<T, fn($($arg,)*) -> Ret> for Func
        where
            T: Described,
            Func: Fn(&T, $($arg),*) -> Ret + 'static,
            Ret: ToStack,
            $($arg: FromStack,)*
        {
            #[allow(non_snake_case, unused_mut, unused_variables, unused_assignments)]
            fn into_method(self) -> NativeFunction {
                let signature = Signature {
                    receiver: Some(T::NAME),
                    takes_state: false,
                    params: vec![$(<$arg as FromStack>::kind()),*],
                    returns: <Ret as ToStack>::kind(),
                };
                NativeFunction::new(signature, move |state: &mut State| {
                    let receiver = object::check_object::<T>(state, 1).map_err(|e| e.at_argument(0))?;
                    let mut position = 0;
                    $(
                        position += 1;
                        let $arg = <$arg as FromStack>::from_stack(state, position + 1)
                            .map_err(|e| e.at_argument(position))?;
                    )*
                    let ret = {
                        let this = receiver.try_borrow()?;
                        (self)(&*this, $($arg),*)
                    };
                    push_result(state, ret)
                })
            }
        }

        impl<T, Func, Ret, $($arg,)*> IntoMethodMut<T, fn($($arg,)*) -> Ret> for Func
        where
            T: Described,
            Func: Fn(&mut T, $($arg),*) -> Ret + 'static,
            Ret: ToStack,
            $($arg: FromStack,)*
        {
            #[allow(non_snake_case, unused_mut, unused_variables, unused_assignments)]
            fn into_method_mut(self) -> NativeFunction {
                let signature = Signature {
                    receiver: Some(T::NAME),
                    takes_state: false,
                    params: vec![$(<$arg as FromStack>::kind()),*],
                    returns: <Ret as ToStack>::kind(),
                };
                NativeFunction::new(signature, move |state: &mut State| {
                    let receiver = object::check_object::<T>(state, 1).map_err(|e| e.at_argument(0))?;
                    let mut position = 0;
                    $(
                        position += 1;
                        let $arg = <$arg as FromStack>::from_stack(state, position + 1)
                            .map_err(|e| e.at_argument(position))?;
                    )*
                    let ret = {
                        let mut this = receiver.try_borrow_mut()?;
                        (self)(&mut *this, $($arg),*)
                    };
                    push_result(state, ret)
                })
            }
        }

        impl<T, Func, Ret, $($arg,)*> IntoStateMethod<T, fn($($arg,)*) -> Ret> for Func
        where
            T: Described,
            Func: Fn(&T, &mut State, $($arg),*) -> Ret + 'static,
            Ret: ToStack,
            $($arg: FromStack,)*
        {
            #[allow(non_snake_case, unused_mut, unused_variables, unused_assignments)]
            fn into_state_method(self) -> NativeFunction {
                let signature = Signature {
                    receiver: Some(T::NAME),
                    takes_state: true,
                    params: vec![$(<$arg as FromStack>::kind()),*],
                    returns: <Ret as ToStack>::kind(),
                };
                NativeFunction::new(signature, move |state: &mut State| {
                    let receiver = object::check_object::<T>(state, 1).map_err(|e| e.at_argument(0))?;
                    let mut position = 0;
                    $(
                        position += 1;
                        let $arg = <$arg as FromStack>::from_stack(state, position + 1)
                            .map_err(|e| e.at_argument(position))?;
                    )*
                    let ret = {
                        let this = receiver.try_borrow()?;
                        (self)(&*this, state, $($arg),*)
                    };
                    push_result(state, ret)
                })
            }
        }

        impl<T, Func, Ret, $($arg,)*> IntoStateMethodMut<T, fn($($arg,)*) -> Ret> for Func
        where
            T: Described,
            Func: Fn(&mut T, &mut State, $($arg),*) -> Ret + 'static,
            Ret: ToStack,
            $($arg: FromStack,)*
        {
            #[allow(non_snake_case, unused_mut, unused_variables, unused_assignments)]
            fn into_state_method_mut(self) -> NativeFunction {
                let signature = Signature {
                    receiver: Some(T::NAME),
                    takes_state: true,
                    params: vec![$(<$arg as FromStack>::kind()),*],
                    returns: <Ret as ToStack>::kind(),
                };
                NativeFunction::new(signature, move |state: &mut State| {
                    let receiver = object::check_object::<T>(state, 1).map_err(|e| e.at_argument(0))?;
                    let mut position = 0;
                    $(
                        position += 1;
                        let $arg = <$arg as FromStack>::from_stack(state, position + 1)
                            .map_err(|e| e.at_argument(position))?;
                    )*
                    let ret = {
                        let mut this = receiver.try_borrow_mut()?;
                        (self)(&mut *this, state, $($arg),*)
                    };
                    push_result(state, ret)
                })
            }
        }
    };
}

impl_callables!();
impl_callables!(A1);
impl_callables!(A1, A2);
impl_callables!(A1, A2, A3);
impl_callables!(A1, A2, A3, A4);
impl_callables!(A1, A2, A3, A4, A5);
impl_callables!(A1, A2, A3, A4, A5, A6);
impl_callables!(A1, A2, A3, A4, A5, A6, A7);
impl_callables!(A1, A2, A3, A4, A5, A6, A7, A8);
