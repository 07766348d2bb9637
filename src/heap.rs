use std::collections::HashMap;
use std::rc::Rc;

use string_interner::{DefaultBackend, DefaultSymbol, StringInterner};

use crate::object::{Closure, Constant, Handle, Instruction, Object, Procedure};
use crate::{Error, Result};

/// The object store. All heap values are allocated here.
/// A handle's index is a position in `objects`; nothing is ever freed.
pub struct Heap {
    objects: Vec<Object>,
    capacity: usize,
    interner: StringInterner<DefaultBackend>,
    /// Interned symbols: one object per name
    symbols: HashMap<DefaultSymbol, Handle>,
    gensym_counter: usize,
}

impl Heap {
    /// Create a store holding at most `capacity` objects, including the
    /// empty-list sentinel and the preallocated constants.
    pub fn new(capacity: usize) -> Self {
        let mut objects = Vec::with_capacity(capacity.min(1024));
        objects.push(Object::Nil);
        objects.extend(Constant::ALL.iter().map(|&c| Object::Constant(c)));
        Heap {
            objects,
            capacity,
            interner: StringInterner::<DefaultBackend>::new(),
            symbols: HashMap::new(),
            gensym_counter: 0,
        }
    }

    /// Append an object. Returns Err(CapacityError) when the arena is full.
    pub fn allocate(&mut self, object: Object) -> Result<Handle> {
        if self.objects.len() >= self.capacity {
            tracing::warn!(
                target: "stackscheme::heap",
                capacity = self.capacity,
                rejected = object.type_name(),
                "object store exhausted"
            );
            return Err(Error::CapacityError {
                capacity: self.capacity,
            });
        }
        let index = u32::try_from(self.objects.len()).map_err(|_| Error::CapacityError {
            capacity: self.capacity,
        })?;
        self.objects.push(object);
        Ok(Handle::Object(index))
    }

    /// Look up the object behind a handle
    pub fn get(&self, handle: Handle) -> Result<&Object> {
        match handle {
            Handle::Object(index) => self
                .objects
                .get(index as usize)
                .ok_or(Error::InvalidHandle(index as usize)),
            Handle::Fixnum(n) => Err(Error::TypeError(format!(
                "expected a heap object, got integer {n}"
            ))),
        }
    }

    fn get_mut(&mut self, handle: Handle) -> Result<&mut Object> {
        match handle {
            Handle::Object(0) => Err(Error::TypeError("the empty list is immutable".into())),
            Handle::Object(index) => self
                .objects
                .get_mut(index as usize)
                .ok_or(Error::InvalidHandle(index as usize)),
            Handle::Fixnum(n) => Err(Error::TypeError(format!(
                "expected a heap object, got integer {n}"
            ))),
        }
    }

    /// Number of allocated objects
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.len() <= 1 + Constant::ALL.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Variant name of any handle, for error messages
    pub fn type_name(&self, handle: Handle) -> &'static str {
        match handle {
            Handle::Fixnum(_) => "integer",
            Handle::Object(_) => self.get(handle).map_or("invalid handle", Object::type_name),
        }
    }

    // === Symbols ===

    /// Intern a symbol: the same name always yields the same handle
    pub fn intern(&mut self, name: &str) -> Result<Handle> {
        let symbol = self.interner.get_or_intern(name);
        if let Some(&handle) = self.symbols.get(&symbol) {
            return Ok(handle);
        }
        let handle = self.allocate(Object::Symbol(symbol))?;
        self.symbols.insert(symbol, handle);
        Ok(handle)
    }

    /// Create a fresh uninterned symbol; it never equals a symbol the reader produces.
    pub fn gensym(&mut self, prefix: &str) -> Result<Handle> {
        self.gensym_counter += 1;
        let symbol = self
            .interner
            .get_or_intern(format!("#:{prefix}{}", self.gensym_counter));
        self.allocate(Object::Symbol(symbol))
    }

    pub fn is_symbol(&self, handle: Handle) -> bool {
        matches!(self.get(handle), Ok(Object::Symbol(_)))
    }

    pub fn symbol_name(&self, handle: Handle) -> Result<&str> {
        match self.get(handle)? {
            Object::Symbol(symbol) => self
                .interner
                .resolve(*symbol)
                .ok_or_else(|| Error::TypeError("symbol missing from interner".into())),
            other => Err(Error::TypeError(format!(
                "expected a symbol, got {}",
                other.type_name()
            ))),
        }
    }

    // === Pairs and lists ===

    /// Immutable pair, as used for code and literals
    pub fn pair(&mut self, car: Handle, cdr: Handle) -> Result<Handle> {
        self.allocate(Object::Pair(car, cdr))
    }

    /// Run-time pair (`cons`)
    pub fn cons(&mut self, car: Handle, cdr: Handle) -> Result<Handle> {
        self.allocate(Object::MutablePair { car, cdr })
    }

    pub fn is_pair(&self, handle: Handle) -> bool {
        matches!(
            self.get(handle),
            Ok(Object::Pair(..) | Object::MutablePair { .. })
        )
    }

    /// Split a pair of either kind into car and cdr
    pub fn uncons(&self, handle: Handle) -> Result<(Handle, Handle)> {
        match self.get(handle)? {
            Object::Pair(car, cdr) | Object::MutablePair { car, cdr } => Ok((*car, *cdr)),
            other => Err(Error::TypeError(format!(
                "expected a pair, got {}",
                other.type_name()
            ))),
        }
    }

    pub fn car(&self, handle: Handle) -> Result<Handle> {
        self.uncons(handle).map(|(car, _)| car)
    }

    pub fn cdr(&self, handle: Handle) -> Result<Handle> {
        self.uncons(handle).map(|(_, cdr)| cdr)
    }

    pub fn set_car(&mut self, handle: Handle, value: Handle) -> Result<()> {
        match self.get_mut(handle)? {
            Object::MutablePair { car, .. } => {
                *car = value;
                Ok(())
            }
            Object::Pair(..) => Err(Error::TypeError("cannot mutate a literal pair".into())),
            other => Err(Error::TypeError(format!(
                "expected a pair, got {}",
                other.type_name()
            ))),
        }
    }

    pub fn set_cdr(&mut self, handle: Handle, value: Handle) -> Result<()> {
        match self.get_mut(handle)? {
            Object::MutablePair { cdr, .. } => {
                *cdr = value;
                Ok(())
            }
            Object::Pair(..) => Err(Error::TypeError("cannot mutate a literal pair".into())),
            other => Err(Error::TypeError(format!(
                "expected a pair, got {}",
                other.type_name()
            ))),
        }
    }

    /// Build an immutable proper list
    pub fn list(&mut self, items: &[Handle]) -> Result<Handle> {
        self.list_with_tail(items, Handle::NIL)
    }

    /// Build an immutable list ending in `tail` instead of the empty list
    pub fn list_with_tail(&mut self, items: &[Handle], tail: Handle) -> Result<Handle> {
        let mut result = tail;
        for &item in items.iter().rev() {
            result = self.pair(item, result)?;
        }
        Ok(result)
    }

    /// Build a run-time (mutable) proper list
    pub fn list_mut(&mut self, items: &[Handle]) -> Result<Handle> {
        let mut result = Handle::NIL;
        for &item in items.iter().rev() {
            result = self.cons(item, result)?;
        }
        Ok(result)
    }

    /// Collect a proper list into a Vec. Returns None if not a proper list.
    pub fn list_to_vec(&self, handle: Handle) -> Option<Vec<Handle>> {
        let (items, tail) = self.list_parts(handle);
        tail.is_nil().then_some(items)
    }

    /// Split a possibly improper list into its elements and final cdr
    pub fn list_parts(&self, handle: Handle) -> (Vec<Handle>, Handle) {
        let mut items = Vec::new();
        let mut current = handle;
        while let Ok((car, cdr)) = self.uncons(current) {
            items.push(car);
            current = cdr;
            // A cycle through mutable pairs would otherwise never end
            if items.len() > self.objects.len() {
                break;
            }
        }
        (items, current)
    }

    // === Typed accessors ===

    pub fn instruction(&self, handle: Handle) -> Result<Instruction> {
        match self.get(handle)? {
            Object::Instruction(instruction) => Ok(*instruction),
            other => Err(Error::TypeError(format!(
                "expected an instruction, got {}",
                other.type_name()
            ))),
        }
    }

    pub fn closure(&self, handle: Handle) -> Result<&Closure> {
        match self.get(handle)? {
            Object::Closure(closure) => Ok(closure),
            other => Err(Error::TypeError(format!(
                "expected a closure, got {}",
                other.type_name()
            ))),
        }
    }

    pub fn procedure(&self, handle: Handle) -> Result<Rc<Procedure>> {
        match self.get(handle)? {
            Object::Procedure(procedure) => Ok(Rc::clone(procedure)),
            other => Err(Error::TypeError(format!(
                "expected a procedure, got {}",
                other.type_name()
            ))),
        }
    }

    pub fn vector(&self, handle: Handle) -> Result<&[Handle]> {
        match self.get(handle)? {
            Object::Vector(items) => Ok(items),
            other => Err(Error::TypeError(format!(
                "expected a vector, got {}",
                other.type_name()
            ))),
        }
    }

    pub fn vector_set(&mut self, handle: Handle, index: usize, value: Handle) -> Result<()> {
        match self.get_mut(handle)? {
            Object::Vector(items) => {
                let len = items.len();
                let slot = items.get_mut(index).ok_or_else(|| {
                    Error::RuntimeError(format!("vector index {index} out of range for length {len}"))
                })?;
                *slot = value;
                Ok(())
            }
            other => Err(Error::TypeError(format!(
                "expected a vector, got {}",
                other.type_name()
            ))),
        }
    }

    // === Boxes ===

    pub fn make_box(&mut self, value: Handle) -> Result<Handle> {
        self.allocate(Object::Box(value))
    }

    pub fn unbox(&self, handle: Handle) -> Result<Handle> {
        match self.get(handle)? {
            Object::Box(value) => Ok(*value),
            other => Err(Error::TypeError(format!(
                "expected a box, got {}",
                other.type_name()
            ))),
        }
    }

    pub fn set_box(&mut self, handle: Handle, value: Handle) -> Result<()> {
        match self.get_mut(handle)? {
            Object::Box(contents) => {
                *contents = value;
                Ok(())
            }
            other => Err(Error::TypeError(format!(
                "expected a box, got {}",
                other.type_name()
            ))),
        }
    }

    // === Numbers ===

    /// Allocate a real, mapping NaN and the infinities to their singleton constants
    pub fn real(&mut self, value: f64) -> Result<Handle> {
        if value.is_nan() {
            Ok(Handle::NAN)
        } else if value == f64::INFINITY {
            Ok(Handle::POSITIVE_INFINITY)
        } else if value == f64::NEG_INFINITY {
            Ok(Handle::NEGATIVE_INFINITY)
        } else {
            self.allocate(Object::Real(value))
        }
    }

    /// Numeric value of a handle, if it is a number
    pub fn number(&self, handle: Handle) -> Option<Number> {
        match handle {
            Handle::Fixnum(n) => Some(Number::Exact(n)),
            Handle::Object(_) => match self.get(handle).ok()? {
                Object::Real(r) => Some(Number::Inexact(*r)),
                Object::Constant(c) => c.as_real().map(Number::Inexact),
                _ => None,
            },
        }
    }

    pub fn string(&mut self, value: impl Into<String>) -> Result<Handle> {
        self.allocate(Object::String(value.into()))
    }

    /// Allocate an error value carrying `error`'s category and message
    pub fn error_object(&mut self, error: &Error) -> Result<Handle> {
        self.allocate(Object::Error {
            kind: error.kind(),
            message: error.to_string(),
        })
    }
}

/// A number read out of a handle
#[derive(Clone, Copy, PartialEq, Debug)]
pub enum Number {
    Exact(i64),
    Inexact(f64),
}

impl Number {
    pub fn to_f64(self) -> f64 {
        match self {
            Number::Exact(n) => n as f64,
            Number::Inexact(r) => r,
        }
    }
}
