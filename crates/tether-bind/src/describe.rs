//! Type descriptions
//!
//! A native type opts into binding by implementing [`Described`]: a name and
//! a `describe` function that lists its fields and callables on a
//! [`TypeDescriptor`]. Declaration order is preserved; when a name appears
//! twice the first entry wins.
//!
//! ```ignore
//! #[derive(Clone)]
//! struct Person { name: String, age: i32 }
//!
//! impl Described for Person {
//!     const NAME: &'static str = "Person";
//!
//!     fn describe(d: &mut TypeDescriptor<Self>) {
//!         d.readonly_field("name", |p| &p.name)
//!             .field("age", |p| &p.age, |p| &mut p.age)
//!             .method("Hello", |p: &Person, greeting: String| {
//!                 format!("{} {}", greeting, p.name)
//!             });
//!     }
//! }
//! ```

use std::rc::Rc;

use tether_vm::State;

use crate::call::{
    IntoFunction, IntoMethod, IntoMethodMut, IntoStateFunction, IntoStateMethod, IntoStateMethodMut,
    NativeFunction,
};
use crate::error::BindResult;
use crate::marshal::{FromStack, ParamKind, ToStack};

/// A native type that can be exposed to the runtime
pub trait Described: Sized + 'static {
    /// Registry and metatable name
    const NAME: &'static str;

    /// List fields and callables
    fn describe(desc: &mut TypeDescriptor<Self>);
}

/// Field attributes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FieldAttrs {
    /// Scripts may read but not write the field
    pub read_only: bool,
}

pub(crate) type Getter<T> = Rc<dyn Fn(&T, &mut State) -> BindResult<()>>;
pub(crate) type Setter<T> = Rc<dyn Fn(&mut T, &State, i32) -> BindResult<()>>;

/// One described field
pub struct FieldEntry<T> {
    name: &'static str,
    kind: ParamKind,
    attrs: FieldAttrs,
    pub(crate) getter: Getter<T>,
    pub(crate) setter: Option<Setter<T>>,
}

impl<T> FieldEntry<T> {
    /// Field name
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Value kind of the field
    pub fn kind(&self) -> &ParamKind {
        &self.kind
    }

    /// Field attributes
    pub fn attrs(&self) -> FieldAttrs {
        self.attrs
    }
}

/// Whether a callable takes the object as its receiver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallableKind {
    /// Called as `obj:name(...)`
    Method,
    /// Called without a receiver
    Function,
}

/// One described callable
#[derive(Clone)]
pub struct CallableEntry {
    name: &'static str,
    kind: CallableKind,
    function: NativeFunction,
}

impl CallableEntry {
    /// Callable name
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Method or free function
    pub fn kind(&self) -> CallableKind {
        self.kind
    }

    /// Adapted function
    pub fn function(&self) -> &NativeFunction {
        &self.function
    }
}

/// Ordered description of a native type
pub struct TypeDescriptor<T> {
    fields: Vec<FieldEntry<T>>,
    callables: Vec<CallableEntry>,
    constructor: Option<NativeFunction>,
}

impl<T: Described> TypeDescriptor<T> {
    /// Run `T::describe` on an empty descriptor
    pub fn build() -> Self {
        let mut desc = TypeDescriptor {
            fields: Vec::new(),
            callables: Vec::new(),
            constructor: None,
        };
        T::describe(&mut desc);
        desc
    }

    /// Readable and writable field
    pub fn field<F, G, M>(&mut self, name: &'static str, get: G, get_mut: M) -> &mut Self
    where
        F: FromStack + ToStack + Clone + 'static,
        G: Fn(&T) -> &F + 'static,
        M: Fn(&mut T) -> &mut F + 'static,
    {
        let setter: Setter<T> = Rc::new(move |this: &mut T, state: &State, slot: i32| {
            *get_mut(this) = F::from_stack(state, slot)?;
            Ok(())
        });
        self.push_field(name, get, Some(setter), FieldAttrs { read_only: false })
    }

    /// Field scripts can read but never write
    pub fn readonly_field<F, G>(&mut self, name: &'static str, get: G) -> &mut Self
    where
        F: ToStack + Clone + 'static,
        G: Fn(&T) -> &F + 'static,
    {
        self.push_field(name, get, None, FieldAttrs { read_only: true })
    }

    fn push_field<F, G>(
        &mut self,
        name: &'static str,
        get: G,
        setter: Option<Setter<T>>,
        attrs: FieldAttrs,
    ) -> &mut Self
    where
        F: ToStack + Clone + 'static,
        G: Fn(&T) -> &F + 'static,
    {
        let getter: Getter<T> = Rc::new(move |this: &T, state: &mut State| get(this).clone().push(state));
        self.fields.push(FieldEntry {
            name,
            kind: <F as ToStack>::kind(),
            attrs,
            getter,
            setter,
        });
        self
    }

    /// Method taking `&T` as receiver
    pub fn method<F, Args>(&mut self, name: &'static str, f: F) -> &mut Self
    where
        F: IntoMethod<T, Args>,
    {
        self.push_callable(name, CallableKind::Method, f.into_method())
    }

    /// Method taking `&mut T` as receiver
    pub fn method_mut<F, Args>(&mut self, name: &'static str, f: F) -> &mut Self
    where
        F: IntoMethodMut<T, Args>,
    {
        self.push_callable(name, CallableKind::Method, f.into_method_mut())
    }

    /// Method taking `&T` and the runtime handle
    pub fn method_with_state<F, Args>(&mut self, name: &'static str, f: F) -> &mut Self
    where
        F: IntoStateMethod<T, Args>,
    {
        self.push_callable(name, CallableKind::Method, f.into_state_method())
    }

    /// Method taking `&mut T` and the runtime handle
    pub fn method_mut_with_state<F, Args>(&mut self, name: &'static str, f: F) -> &mut Self
    where
        F: IntoStateMethodMut<T, Args>,
    {
        self.push_callable(name, CallableKind::Method, f.into_state_method_mut())
    }

    /// Function without a receiver, reachable through the methods table
    pub fn function<F, Args>(&mut self, name: &'static str, f: F) -> &mut Self
    where
        F: IntoFunction<Args>,
    {
        self.push_callable(name, CallableKind::Function, f.into_function())
    }

    /// Function whose first parameter is the runtime handle
    pub fn function_with_state<F, Args>(&mut self, name: &'static str, f: F) -> &mut Self
    where
        F: IntoStateFunction<Args>,
    {
        self.push_callable(name, CallableKind::Function, f.into_state_function())
    }

    /// Function scripts call to create new instances
    pub fn constructor<F, Args>(&mut self, f: F) -> &mut Self
    where
        F: IntoFunction<Args>,
    {
        self.constructor = Some(f.into_function());
        self
    }

    fn push_callable(&mut self, name: &'static str, kind: CallableKind, function: NativeFunction) -> &mut Self {
        self.callables.push(CallableEntry { name, kind, function });
        self
    }
}

impl<T> TypeDescriptor<T> {
    /// Fields in declaration order
    pub fn fields(&self) -> &[FieldEntry<T>] {
        &self.fields
    }

    /// Callables in declaration order
    pub fn callables(&self) -> &[CallableEntry] {
        &self.callables
    }

    /// Constructor, if one was declared
    pub fn constructor_function(&self) -> Option<&NativeFunction> {
        self.constructor.as_ref()
    }

    pub(crate) fn into_fields(self) -> Vec<FieldEntry<T>> {
        self.fields
    }
}
