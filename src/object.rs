//! Values and heap objects shared by the compiler and the machine.
//!
//! A [`Handle`] is either an index into the object store or an inline exact
//! integer. Everything else - pairs, symbols, closures, boxes, compiled
//! instructions, library procedures - lives in the store as an [`Object`].
//! Handle index 0 is the empty list and never aliases a live object; the
//! singleton constants occupy the next few indices of every store.

use std::fmt;
use std::rc::Rc;

use smallvec::SmallVec;
use string_interner::DefaultSymbol;

use crate::Result;
use crate::syntax::{Macro, Syntax};
use crate::vm::Vm;

/// Inline exact integer type
pub type Fixnum = i64;

/// Reference to a value: an object-store index or an inline exact integer
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Handle {
    Object(u32),
    Fixnum(Fixnum),
}

impl Handle {
    /// The empty list; also the value of uninitialized slots
    pub const NIL: Handle = Handle::Object(0);
    pub const TRUE: Handle = Handle::Object(1);
    pub const FALSE: Handle = Handle::Object(2);
    /// Value of expressions with no useful result and of not-yet-initialized `letrec*` variables
    pub const UNDEFINED: Handle = Handle::Object(3);
    pub const NAN: Handle = Handle::Object(4);
    pub const POSITIVE_INFINITY: Handle = Handle::Object(5);
    pub const NEGATIVE_INFINITY: Handle = Handle::Object(6);

    /// Object-store index, if this handle is not an inline integer
    pub fn index(self) -> Option<usize> {
        match self {
            Handle::Object(index) => Some(index as usize),
            Handle::Fixnum(_) => None,
        }
    }

    pub fn is_nil(self) -> bool {
        self == Handle::NIL
    }

    pub fn from_bool(value: bool) -> Handle {
        if value { Handle::TRUE } else { Handle::FALSE }
    }

    /// Only the distinguished `#f` constant is false
    pub fn is_truthy(self) -> bool {
        self != Handle::FALSE
    }
}

impl From<Fixnum> for Handle {
    fn from(n: Fixnum) -> Self {
        Handle::Fixnum(n)
    }
}

/// Singleton constants, preallocated in every object store
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Constant {
    True,
    False,
    Undefined,
    NaN,
    PositiveInfinity,
    NegativeInfinity,
}

impl Constant {
    /// Constants in the order they are preallocated, starting at index 1
    pub const ALL: [Constant; 6] = [
        Constant::True,
        Constant::False,
        Constant::Undefined,
        Constant::NaN,
        Constant::PositiveInfinity,
        Constant::NegativeInfinity,
    ];

    /// Real value of the numeric constants
    pub fn as_real(self) -> Option<f64> {
        match self {
            Constant::NaN => Some(f64::NAN),
            Constant::PositiveInfinity => Some(f64::INFINITY),
            Constant::NegativeInfinity => Some(f64::NEG_INFINITY),
            Constant::True | Constant::False | Constant::Undefined => None,
        }
    }
}

/// Declared argument count of a closure or procedure
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Arity {
    /// Positional parameters
    pub required: usize,
    /// Whether excess arguments are collected into a rest list
    pub rest: bool,
}

impl Arity {
    pub const fn exactly(required: usize) -> Self {
        Arity {
            required,
            rest: false,
        }
    }

    pub const fn at_least(required: usize) -> Self {
        Arity {
            required,
            rest: true,
        }
    }

    pub fn accepts(self, argc: usize) -> bool {
        if self.rest {
            argc >= self.required
        } else {
            argc == self.required
        }
    }

    /// Stack slots a call occupies once arguments are adapted:
    /// the positional parameters plus one for the rest list.
    pub fn slots(self) -> usize {
        self.required + usize::from(self.rest)
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.rest {
            write!(f, "at least {}", self.required)
        } else {
            write!(f, "exactly {}", self.required)
        }
    }
}

/// Flat closure: entry instruction plus values copied at creation time
#[derive(Clone, Debug, PartialEq)]
pub struct Closure {
    pub body: Handle,
    pub arity: Arity,
    pub captured: Box<[Handle]>,
}

/// One node of the compiled instruction graph.
///
/// Successor operands are handles to other `Instruction` objects; the graph is
/// built once by the compiler and never mutated while it runs.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Instruction {
    Halt,
    Constant { value: Handle, next: Handle },
    ReferLocal { index: usize, next: Handle },
    ReferFree { index: usize, next: Handle },
    /// Replace a box in the accumulator with its contents
    Indirect { next: Handle },
    Close {
        free: usize,
        arity: Arity,
        body: Handle,
        next: Handle,
    },
    Box { index: usize, next: Handle },
    BoxRest { index: usize, next: Handle },
    Test { then: Handle, otherwise: Handle },
    AssignLocal { index: usize, next: Handle },
    AssignFree { index: usize, next: Handle },
    /// Capture the current stack; `depth` argument slots are dropped when the
    /// continuation returns (non-zero only in tail position)
    Conti { depth: usize, next: Handle },
    Nuate { stack: Handle, next: Handle },
    Frame { ret: Handle, next: Handle },
    Argument { next: Handle },
    Shift { count: usize, drop: usize, next: Handle },
    Apply { argc: usize },
    Return { slots: usize },
    /// Call a procedure's direct entry on the accumulator, without a frame
    Direct { procedure: Handle, next: Handle },
}

impl Instruction {
    pub fn name(&self) -> &'static str {
        match self {
            Instruction::Halt => "halt",
            Instruction::Constant { .. } => "constant",
            Instruction::ReferLocal { .. } => "refer-local",
            Instruction::ReferFree { .. } => "refer-free",
            Instruction::Indirect { .. } => "indirect",
            Instruction::Close { .. } => "close",
            Instruction::Box { .. } => "box",
            Instruction::BoxRest { .. } => "box-rest",
            Instruction::Test { .. } => "test",
            Instruction::AssignLocal { .. } => "assign-local",
            Instruction::AssignFree { .. } => "assign-free",
            Instruction::Conti { .. } => "conti",
            Instruction::Nuate { .. } => "nuate",
            Instruction::Frame { .. } => "frame",
            Instruction::Argument { .. } => "argument",
            Instruction::Shift { .. } => "shift",
            Instruction::Apply { .. } => "apply",
            Instruction::Return { .. } => "return",
            Instruction::Direct { .. } => "direct",
        }
    }

    /// Instructions control may reach from this one, in evaluation order.
    /// A closure body counts as a successor of its `Close`.
    pub fn successors(&self) -> SmallVec<[Handle; 2]> {
        let mut out = SmallVec::new();
        match *self {
            Instruction::Halt | Instruction::Apply { .. } | Instruction::Return { .. } => {}
            Instruction::Close { body, next, .. } => {
                out.push(next);
                out.push(body);
            }
            Instruction::Test { then, otherwise } => {
                out.push(then);
                out.push(otherwise);
            }
            Instruction::Frame { ret, next } => {
                out.push(next);
                out.push(ret);
            }
            Instruction::Constant { next, .. }
            | Instruction::ReferLocal { next, .. }
            | Instruction::ReferFree { next, .. }
            | Instruction::Indirect { next }
            | Instruction::Box { next, .. }
            | Instruction::BoxRest { next, .. }
            | Instruction::AssignLocal { next, .. }
            | Instruction::AssignFree { next, .. }
            | Instruction::Conti { next, .. }
            | Instruction::Nuate { next, .. }
            | Instruction::Argument { next }
            | Instruction::Shift { next, .. }
            | Instruction::Direct { next, .. } => out.push(next),
        }
        out
    }
}

/// Entry taking full control of the machine: it must finish with
/// [`Vm::proc_return`] or hand control to another procedure.
pub type ControlFn = fn(&mut Vm<'_>, usize) -> Result<()>;

/// Entry computing a result from evaluated arguments (in call order)
pub type ValueFn = fn(&mut crate::heap::Heap, &[Handle]) -> Result<Handle>;

/// Inline entry called on the accumulator by the `Direct` instruction
pub type DirectFn = fn(&mut Vm<'_>, Handle) -> Result<Handle>;

/// Calling convention of a built-in procedure's general entry
#[derive(Clone, Copy)]
pub enum NormalProc {
    /// Result-returning; the machine pops the call frame afterwards
    Value(ValueFn),
    /// Frame-managing; see [`ControlFn`]
    Control(ControlFn),
}

/// Built-in procedure
pub struct Procedure {
    pub name: &'static str,
    pub arity: Arity,
    pub normal: NormalProc,
    pub direct: Option<DirectFn>,
    /// Compile-time form used when the procedure's name heads an expression
    pub syntax: Option<Rc<dyn Syntax>>,
}

impl Procedure {
    pub fn new(name: &'static str, arity: Arity, normal: ValueFn) -> Self {
        Procedure {
            name,
            arity,
            normal: NormalProc::Value(normal),
            direct: None,
            syntax: None,
        }
    }

    pub fn control(name: &'static str, arity: Arity, normal: ControlFn) -> Self {
        Procedure {
            name,
            arity,
            normal: NormalProc::Control(normal),
            direct: None,
            syntax: None,
        }
    }

    pub fn with_direct(mut self, direct: DirectFn) -> Self {
        self.direct = Some(direct);
        self
    }

    pub fn with_syntax(mut self, syntax: Rc<dyn Syntax>) -> Self {
        self.syntax = Some(syntax);
        self
    }
}

impl fmt::Debug for Procedure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Procedure({}, {})", self.name, self.arity)
    }
}

/// Object-store entry
pub enum Object {
    /// Placeholder in slot 0, the empty list
    Nil,
    /// Immutable pair: source code and literal data
    Pair(Handle, Handle),
    /// Pair built at run time by `cons` and friends
    MutablePair { car: Handle, cdr: Handle },
    Symbol(DefaultSymbol),
    String(String),
    Char(char),
    Real(f64),
    Vector(Vec<Handle>),
    ByteVector(Vec<u8>),
    Closure(Closure),
    /// Shared cell for a variable that is assigned after capture
    Box(Handle),
    Procedure(Rc<Procedure>),
    Syntax(Rc<dyn Syntax>),
    Macro(Rc<dyn Macro>),
    Error { kind: &'static str, message: String },
    Instruction(Instruction),
    Constant(Constant),
}

impl Object {
    /// Variant name used in type errors
    pub fn type_name(&self) -> &'static str {
        match self {
            Object::Nil => "empty list",
            Object::Pair(..) | Object::MutablePair { .. } => "pair",
            Object::Symbol(_) => "symbol",
            Object::String(_) => "string",
            Object::Char(_) => "character",
            Object::Real(_) => "real",
            Object::Vector(_) => "vector",
            Object::ByteVector(_) => "bytevector",
            Object::Closure(_) => "closure",
            Object::Box(_) => "box",
            Object::Procedure(_) => "procedure",
            Object::Syntax(_) => "syntax",
            Object::Macro(_) => "macro",
            Object::Error { .. } => "error",
            Object::Instruction(_) => "instruction",
            Object::Constant(Constant::True | Constant::False) => "boolean",
            Object::Constant(Constant::Undefined) => "undefined",
            Object::Constant(_) => "real",
        }
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Object::Nil => write!(f, "Nil"),
            Object::Pair(car, cdr) => write!(f, "Pair({car:?}, {cdr:?})"),
            Object::MutablePair { car, cdr } => write!(f, "MutablePair({car:?}, {cdr:?})"),
            Object::Symbol(symbol) => write!(f, "Symbol({symbol:?})"),
            Object::String(s) => write!(f, "String({s:?})"),
            Object::Char(c) => write!(f, "Char({c:?})"),
            Object::Real(r) => write!(f, "Real({r})"),
            Object::Vector(items) => write!(f, "Vector({items:?})"),
            Object::ByteVector(bytes) => write!(f, "ByteVector({bytes:?})"),
            Object::Closure(closure) => write!(f, "{closure:?}"),
            Object::Box(value) => write!(f, "Box({value:?})"),
            Object::Procedure(procedure) => write!(f, "{procedure:?}"),
            Object::Syntax(syntax) => write!(f, "Syntax({})", syntax.name()),
            Object::Macro(transformer) => write!(f, "Macro({})", transformer.name()),
            Object::Error { kind, message } => write!(f, "Error({kind}: {message})"),
            Object::Instruction(instruction) => write!(f, "{instruction:?}"),
            Object::Constant(constant) => write!(f, "Constant({constant:?})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arity_acceptance() {
        let fixed = Arity::exactly(2);
        assert!(fixed.accepts(2));
        assert!(!fixed.accepts(1));
        assert!(!fixed.accepts(3));
        assert_eq!(fixed.slots(), 2);

        let variadic = Arity::at_least(1);
        assert!(!variadic.accepts(0));
        assert!(variadic.accepts(1));
        assert!(variadic.accepts(7));
        assert_eq!(variadic.slots(), 2);
        assert_eq!(variadic.to_string(), "at least 1");
    }

    #[test]
    fn test_handle_truthiness() {
        assert!(!Handle::FALSE.is_truthy());
        assert!(Handle::NIL.is_truthy());
        assert!(Handle::Fixnum(0).is_truthy());
        assert!(Handle::UNDEFINED.is_truthy());
        assert_eq!(Handle::from_bool(true), Handle::TRUE);
        assert_eq!(Handle::Fixnum(5).index(), None);
        assert_eq!(Handle::NIL.index(), Some(0));
    }

    #[test]
    fn test_instruction_successors() {
        let a = Handle::Object(10);
        let b = Handle::Object(11);
        assert!(Instruction::Halt.successors().is_empty());
        assert!(Instruction::Return { slots: 2 }.successors().is_empty());
        assert_eq!(
            Instruction::Test {
                then: a,
                otherwise: b
            }
            .successors()
            .as_slice(),
            &[a, b]
        );
        assert_eq!(
            Instruction::Argument { next: a }.successors().as_slice(),
            &[a]
        );
        assert_eq!(Instruction::Apply { argc: 1 }.name(), "apply");
    }
}
