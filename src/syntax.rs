//! Capability interfaces between the compiler and its library.
//!
//! The compiler knows nothing about `if`, `let` or `+`. It resolves the head
//! of a form through a [`Bindings`] table and hands the form to whatever it
//! finds: a [`Syntax`] compiles the form itself, a [`Macro`] rewrites it into
//! simpler code before compilation, and a [`Procedure`] is referenced as a
//! constant (or compiled by its attached syntax, when it has one).

use std::collections::HashMap;
use std::rc::Rc;

use crate::compiler::Compiler;
use crate::object::{Handle, Procedure};
use crate::scope::Scope;
use crate::sets::NameSet;
use crate::Result;

/// A special form: compiles itself and defines its own variable scoping
pub trait Syntax {
    fn name(&self) -> &'static str;

    /// Compile `form` so that its value is in the accumulator when `next` runs
    fn compile(
        &self,
        compiler: &mut Compiler<'_>,
        form: Handle,
        scope: &Scope,
        sets: &NameSet,
        next: Handle,
    ) -> Result<Handle>;

    /// Names referenced by `form` that are neither in `bound` nor global
    fn find_free(&self, compiler: &Compiler<'_>, form: Handle, bound: &NameSet)
    -> Result<NameSet>;

    /// Members of `candidates` that `form` assigns. `bound` holds the names
    /// rebound by lambdas around `form`, which hide global keywords.
    fn find_sets(
        &self,
        compiler: &Compiler<'_>,
        form: Handle,
        candidates: &NameSet,
        bound: &NameSet,
    ) -> Result<NameSet>;
}

/// A source-to-source rewrite applied before compilation
pub trait Macro {
    fn name(&self) -> &'static str;

    /// Rewrite `form`. Implementations pass their result back through
    /// [`Compiler::transform`] so expansions may use other macros.
    fn transform(&self, compiler: &mut Compiler<'_>, form: Handle) -> Result<Handle>;
}

/// What a global name denotes. `object` is the store handle a reference compiles to.
#[derive(Clone)]
pub enum Binding {
    Syntax {
        object: Handle,
        syntax: Rc<dyn Syntax>,
    },
    Macro {
        object: Handle,
        transformer: Rc<dyn Macro>,
    },
    Procedure {
        object: Handle,
        procedure: Rc<Procedure>,
    },
}

impl Binding {
    pub fn object(&self) -> Handle {
        match self {
            Binding::Syntax { object, .. }
            | Binding::Macro { object, .. }
            | Binding::Procedure { object, .. } => *object,
        }
    }

    /// The syntax that compiles forms headed by this name, if any
    pub fn syntax(&self) -> Option<Rc<dyn Syntax>> {
        match self {
            Binding::Syntax { syntax, .. } => Some(Rc::clone(syntax)),
            Binding::Procedure { procedure, .. } => procedure.syntax.clone(),
            Binding::Macro { .. } => None,
        }
    }

    pub fn transformer(&self) -> Option<Rc<dyn Macro>> {
        match self {
            Binding::Macro { transformer, .. } => Some(Rc::clone(transformer)),
            _ => None,
        }
    }
}

/// Global name table. When a name is bound twice the first binding wins.
#[derive(Clone, Default)]
pub struct Bindings {
    table: HashMap<Handle, Binding>,
    order: Vec<Handle>,
}

impl Bindings {
    pub fn new() -> Self {
        Bindings::default()
    }

    /// Add a binding for the symbol `name`; returns false if it was already bound
    pub fn define(&mut self, name: Handle, binding: Binding) -> bool {
        if self.table.contains_key(&name) {
            return false;
        }
        self.table.insert(name, binding);
        self.order.push(name);
        true
    }

    pub fn lookup(&self, name: Handle) -> Option<&Binding> {
        self.table.get(&name)
    }

    /// Bound names in definition order
    pub fn names(&self) -> &[Handle] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
