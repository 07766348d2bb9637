//! StackScheme - a stack-based Scheme compiler and virtual machine
//!
//! This crate compiles symbolic-expression trees of a small Scheme dialect into a
//! graph of machine instructions and runs that graph on a single-threaded stack
//! machine. The design follows the classic stack-based model for Scheme: closures
//! are flat (captured values are copied at creation), assigned variables live in
//! boxes, tail calls reuse the current frame, and `call/cc` snapshots the whole
//! value stack so a continuation can be re-entered any number of times.
//!
//! ```scheme
//! (define fib
//!   (lambda (n) (if (< n 2) n (+ (fib (- n 1)) (fib (- n 2))))))
//! (fib 10)                                 ; => 55
//! (call/cc (lambda (k) (+ 1 (k 10))))      ; => 10
//! ((lambda (x . y) (list x y)) 1 2 3)      ; => (1 (2 3))
//! ```
//!
//! ## Pipeline
//!
//! 1. The reader (or any other producer) builds a tree of immutable pairs in the
//!    object store, rooted in a `(begin ...)` form.
//! 2. The compiler flattens internal definitions into `letrec*`, expands macros,
//!    and translates the tree into instructions, using free-variable and
//!    assigned-variable analysis to decide what closures capture and what gets boxed.
//! 3. The virtual machine runs the instruction graph until it reaches `Halt` and
//!    hands back the accumulator.
//!
//! ## Memory model
//!
//! The object store is a bounded, append-only arena: nothing is ever reclaimed and
//! exhausting it is a [`Error::CapacityError`]. Each [`Machine`] owns exactly one
//! store and one value stack, so unrelated programs never share mutable state.
//!
//! ## Modules
//!
//! - `object`: handles, heap object variants, closures and instructions
//! - `heap`: the object store
//! - `stack`: the value stack with frame-relative addressing and snapshots
//! - `sets`, `scope`: compile-time name sets and static environments
//! - `syntax`: capability interfaces for special forms, macros and procedures
//! - `compiler`: expression to instruction-graph translation
//! - `vm`: the abstract machine
//! - `library`: the standard special forms, derived forms and primitives
//! - `printer`: `write`/`display` rendering
//! - `reader`: source text to object-store trees (feature `reader`)

pub mod compiler;
pub mod heap;
pub mod library;
pub mod machine;
pub mod object;
pub mod printer;
pub mod scope;
pub mod sets;
pub mod stack;
pub mod syntax;
pub mod vm;

#[cfg(feature = "reader")]
pub mod reader;

pub use machine::Machine;
pub use object::{Arity, Handle};

use thiserror::Error as ThisError;

/// Default number of objects the object store can hold
pub const DEFAULT_HEAP_CAPACITY: usize = 10_000;

/// Default number of slots in the value stack
pub const DEFAULT_STACK_CAPACITY: usize = 1_000;

/// Maximum nesting depth accepted by the reader
/// This limits deeply nested source text before it can exhaust the native stack
pub const MAX_PARSE_DEPTH: usize = 256;

/// Maximum nesting of forms during expansion, analysis and compilation
/// Set higher than parse depth since derived forms expand into deeper trees
pub const MAX_COMPILE_DEPTH: usize = 512;

/// Environment variable overriding [`Config::heap_capacity`]
pub const HEAP_CAPACITY_VAR: &str = "STACKSCHEME_HEAP_CAPACITY";

/// Environment variable overriding [`Config::stack_capacity`]
pub const STACK_CAPACITY_VAR: &str = "STACKSCHEME_STACK_CAPACITY";

/// Error types for the compiler and the machine
#[derive(Debug, Clone, PartialEq, ThisError)]
pub enum Error {
    /// Source text could not be read into a tree
    #[error("ParseError: {0}")]
    ParseError(String),
    /// A special form has the wrong shape
    #[error("SyntaxError: {message}\n  In form: {form}")]
    SyntaxError { form: String, message: String },
    #[error("Unbound variable: {0}")]
    UnboundVariable(String),
    /// A value of the wrong variant reached a primitive, an instruction or the compiler
    #[error("Type error: {0}")]
    TypeError(String),
    #[error("{}", arity_message(.expected, .got, .expression))]
    ArityError {
        expected: Arity,
        got: usize,
        expression: Option<String>,
    },
    #[error("ArithmeticError: {0}")]
    ArithmeticError(String),
    /// The object store is full
    #[error("CapacityError: object store exhausted ({capacity} objects)")]
    CapacityError { capacity: usize },
    /// A handle points outside the allocated part of the object store
    #[error("InvalidHandle: no object at index {0}")]
    InvalidHandle(usize),
    #[error("StackOverflow: value stack exhausted ({capacity} slots)")]
    StackOverflow { capacity: usize },
    #[error("StackUnderflow: read below the bottom of the value stack")]
    StackUnderflow,
    /// Signalled by the `error` primitive or by misuse of the machine
    #[error("RuntimeError: {0}")]
    RuntimeError(String),
}

fn arity_message(expected: &Arity, got: &usize, expression: &Option<String>) -> String {
    match expression {
        Some(expr) => {
            format!("ArityError: {expr}: expected {expected} arguments, got {got}")
        }
        None => format!("ArityError: procedure expected {expected} arguments but got {got}"),
    }
}

impl Error {
    /// Create an ArityError without expression context
    pub fn arity_error(expected: Arity, got: usize) -> Self {
        Error::ArityError {
            expected,
            got,
            expression: None,
        }
    }

    /// Create an ArityError naming the procedure that rejected the call
    pub fn arity_error_with_expr(expected: Arity, got: usize, expression: impl Into<String>) -> Self {
        Error::ArityError {
            expected,
            got,
            expression: Some(expression.into()),
        }
    }

    /// Create a SyntaxError for a malformed special form
    pub fn syntax(form: impl Into<String>, message: impl Into<String>) -> Self {
        Error::SyntaxError {
            form: form.into(),
            message: message.into(),
        }
    }

    /// Short name of the error category, as used in error objects
    pub fn kind(&self) -> &'static str {
        match self {
            Error::ParseError(_) => "parse-error",
            Error::SyntaxError { .. } => "syntax-error",
            Error::UnboundVariable(_) => "unbound-variable",
            Error::TypeError(_) => "type-error",
            Error::ArityError { .. } => "arity-error",
            Error::ArithmeticError(_) => "arithmetic-error",
            Error::CapacityError { .. } => "capacity-error",
            Error::InvalidHandle(_) => "invalid-handle",
            Error::StackOverflow { .. } => "stack-overflow",
            Error::StackUnderflow => "stack-underflow",
            Error::RuntimeError(_) => "runtime-error",
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Sizing knobs for a [`Machine`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Objects the arena may hold before allocation fails
    pub heap_capacity: usize,
    /// Slots in the value stack
    pub stack_capacity: usize,
    /// Nesting limit for the reader
    pub max_parse_depth: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            heap_capacity: DEFAULT_HEAP_CAPACITY,
            stack_capacity: DEFAULT_STACK_CAPACITY,
            max_parse_depth: MAX_PARSE_DEPTH,
        }
    }
}

impl Config {
    /// Defaults, overridden by `STACKSCHEME_HEAP_CAPACITY` / `STACKSCHEME_STACK_CAPACITY`
    /// when those are set to valid numbers.
    pub fn from_env() -> Self {
        let read = |var: &str| {
            std::env::var(var)
                .ok()
                .and_then(|raw| raw.trim().parse::<usize>().ok())
        };
        let mut config = Config::default();
        if let Some(capacity) = read(HEAP_CAPACITY_VAR) {
            config.heap_capacity = capacity;
        }
        if let Some(capacity) = read(STACK_CAPACITY_VAR) {
            config.stack_capacity = capacity;
        }
        config
    }

    pub fn with_heap_capacity(mut self, capacity: usize) -> Self {
        self.heap_capacity = capacity;
        self
    }

    pub fn with_stack_capacity(mut self, capacity: usize) -> Self {
        self.stack_capacity = capacity;
        self
    }

    pub fn with_max_parse_depth(mut self, depth: usize) -> Self {
        self.max_parse_depth = depth;
        self
    }
}

/// Read, compile and run `source` on a fresh machine with the standard library,
/// returning the result in `write` form.
///
/// # Example
/// ```
/// assert_eq!(stackscheme::run("(+ 1 2)").unwrap(), "3");
/// assert_eq!(stackscheme::run("((lambda (x . y) (list x y)) 1 2 3)").unwrap(), "(1 (2 3))");
/// ```
#[cfg(feature = "reader")]
pub fn run(source: &str) -> Result<String> {
    let mut machine = Machine::new(Config::default())?;
    let value = machine.eval_str(source)?;
    Ok(machine.write(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arity_error_messages() {
        let plain = Error::arity_error(Arity::exactly(2), 3);
        assert_eq!(
            plain.to_string(),
            "ArityError: procedure expected exactly 2 arguments but got 3"
        );

        let named = Error::arity_error_with_expr(Arity::at_least(1), 0, "list-tail");
        assert_eq!(
            named.to_string(),
            "ArityError: list-tail: expected at least 1 arguments, got 0"
        );
    }

    #[test]
    fn test_config_builders() {
        let config = Config::default()
            .with_heap_capacity(64)
            .with_stack_capacity(32)
            .with_max_parse_depth(4);
        assert_eq!(config.heap_capacity, 64);
        assert_eq!(config.stack_capacity, 32);
        assert_eq!(config.max_parse_depth, 4);
        assert_eq!(Config::default().heap_capacity, DEFAULT_HEAP_CAPACITY);
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(Error::StackUnderflow.kind(), "stack-underflow");
        assert_eq!(Error::syntax("(if)", "bad").kind(), "syntax-error");
        assert_eq!(
            Error::CapacityError { capacity: 3 }.to_string(),
            "CapacityError: object store exhausted (3 objects)"
        );
    }
}
