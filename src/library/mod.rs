//! The standard library the compiler and machine are configured with.
//!
//! A [`Library`] is an ordered list of named entries. Installing it into an
//! object store allocates one object per entry and produces the [`Bindings`]
//! table the compiler resolves names through; the first entry for a name wins.
//!
//! ## Contents
//!
//! - **Special forms** ([`forms`]): `quote`, `if`, `set!`, `lambda`, `begin`, `define`
//! - **Derived forms** ([`derived`]): `let` (including named `let`), `let*`,
//!   `letrec`, `letrec*`, `and`, `or`, `when`, `unless`, `cond`
//! - **Procedures** ([`primitives`]): arithmetic, comparison, type predicates,
//!   pairs and lists, vectors, `apply`, `call/cc`, `error`, and output
//!
//! `call/cc`, `display`, `write` and `newline` are procedures with an attached
//! syntax: used as a value they behave like any other procedure, but a form
//! headed by their name is compiled specially (a stack capture, or an inline
//! call without a frame).

pub mod derived;
pub mod forms;
pub mod primitives;

use std::rc::Rc;

use crate::heap::Heap;
use crate::object::{Object, Procedure};
use crate::syntax::{Binding, Bindings, Macro, Syntax};
use crate::Result;

/// One library definition
#[derive(Clone)]
pub enum Entry {
    Syntax(Rc<dyn Syntax>),
    Macro(Rc<dyn Macro>),
    Procedure(Rc<Procedure>),
}

#[derive(Clone, Default)]
pub struct Library {
    entries: Vec<(&'static str, Entry)>,
}

impl Library {
    /// A library with no entries
    pub fn new() -> Self {
        Library::default()
    }

    /// Special forms, derived forms and procedures
    pub fn standard() -> Self {
        let mut library = Library::new();
        forms::register(&mut library);
        derived::register(&mut library);
        primitives::register(&mut library);
        library
    }

    pub fn syntax(&mut self, name: &'static str, syntax: impl Syntax + 'static) -> &mut Self {
        self.entries.push((name, Entry::Syntax(Rc::new(syntax))));
        self
    }

    pub fn transformer(&mut self, name: &'static str, transformer: impl Macro + 'static) -> &mut Self {
        self.entries.push((name, Entry::Macro(Rc::new(transformer))));
        self
    }

    /// Register `procedure` under its own name
    pub fn procedure(&mut self, procedure: Procedure) -> &mut Self {
        let name = procedure.name;
        self.entries
            .push((name, Entry::Procedure(Rc::new(procedure))));
        self
    }

    /// Register an existing entry under another name
    pub fn alias(&mut self, alias: &'static str, original: &str) -> &mut Self {
        if let Some(entry) = self.lookup(original).cloned() {
            self.entries.push((alias, entry));
        }
        self
    }

    pub fn lookup(&self, name: &str) -> Option<&Entry> {
        self.entries
            .iter()
            .find(|(entry_name, _)| *entry_name == name)
            .map(|(_, entry)| entry)
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.iter().map(|(name, _)| *name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Allocate every entry in `heap` and bind it to its interned name
    pub fn install(&self, heap: &mut Heap) -> Result<Bindings> {
        let mut bindings = Bindings::new();
        for (name, entry) in &self.entries {
            let symbol = heap.intern(name)?;
            if bindings.lookup(symbol).is_some() {
                continue;
            }
            let binding = match entry {
                Entry::Syntax(syntax) => Binding::Syntax {
                    object: heap.allocate(Object::Syntax(Rc::clone(syntax)))?,
                    syntax: Rc::clone(syntax),
                },
                Entry::Macro(transformer) => Binding::Macro {
                    object: heap.allocate(Object::Macro(Rc::clone(transformer)))?,
                    transformer: Rc::clone(transformer),
                },
                Entry::Procedure(procedure) => Binding::Procedure {
                    object: heap.allocate(Object::Procedure(Rc::clone(procedure)))?,
                    procedure: Rc::clone(procedure),
                },
            };
            bindings.define(symbol, binding);
        }
        tracing::debug!(
            target: "stackscheme::heap",
            bindings = bindings.len(),
            heap = heap.len(),
            "installed library"
        );
        Ok(bindings)
    }
}
