//! One compile-and-run context.
//!
//! A [`Machine`] owns an object store, a value stack, the binding table of
//! the library it was created with, and a buffer collecting everything the
//! program printed. Values returned by its methods are handles into its own
//! store and are only meaningful for that machine.

use std::collections::{HashMap, VecDeque};

use crate::compiler::Compiler;
use crate::heap::Heap;
use crate::library::Library;
use crate::object::{Handle, Instruction};
use crate::printer;
use crate::stack::Stack;
use crate::syntax::Bindings;
use crate::vm::Vm;
use crate::{Config, Result};

pub struct Machine {
    heap: Heap,
    stack: Stack,
    bindings: Bindings,
    output: String,
    config: Config,
}

impl Machine {
    /// A machine with the standard library installed
    pub fn new(config: Config) -> Result<Self> {
        Machine::with_library(config, &Library::standard())
    }

    pub fn with_library(config: Config, library: &Library) -> Result<Self> {
        let mut heap = Heap::new(config.heap_capacity);
        let bindings = library.install(&mut heap)?;
        Ok(Machine {
            heap,
            stack: Stack::new(config.stack_capacity),
            bindings,
            output: String::new(),
            config,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    /// Mutable store access, for building programs without the reader
    pub fn heap_mut(&mut self) -> &mut Heap {
        &mut self.heap
    }

    pub fn bindings(&self) -> &Bindings {
        &self.bindings
    }

    /// Expand and compile a program tree rooted in `(begin ...)`; returns the entry instruction
    pub fn compile(&mut self, program: Handle) -> Result<Handle> {
        Compiler::new(&mut self.heap, &self.bindings)?.compile_program(program)
    }

    /// Run compiled code from `entry` to `Halt`
    pub fn execute(&mut self, entry: Handle) -> Result<Handle> {
        self.stack.reset_high_water();
        Vm::new(&mut self.heap, &mut self.stack, &mut self.output).evaluate(entry)
    }

    pub fn eval(&mut self, program: Handle) -> Result<Handle> {
        let entry = self.compile(program)?;
        self.execute(entry)
    }

    /// Like [`Machine::eval`], but a failure becomes an error object in the store.
    /// Fails only if the store has no room left for that object.
    pub fn eval_or_error(&mut self, program: Handle) -> Result<Handle> {
        match self.eval(program) {
            Ok(value) => Ok(value),
            Err(error) => {
                tracing::debug!(target: "stackscheme::vm", kind = error.kind(), "evaluation failed");
                self.heap.error_object(&error)
            }
        }
    }

    /// Read every top-level form of `source` into `(begin ...)`
    #[cfg(feature = "reader")]
    pub fn read(&mut self, source: &str) -> Result<Handle> {
        crate::reader::read_program(&mut self.heap, source, self.config.max_parse_depth)
    }

    #[cfg(feature = "reader")]
    pub fn eval_str(&mut self, source: &str) -> Result<Handle> {
        let program = self.read(source)?;
        self.eval(program)
    }

    pub fn write(&self, value: Handle) -> String {
        printer::write(&self.heap, value)
    }

    pub fn display(&self, value: Handle) -> String {
        printer::display(&self.heap, value)
    }

    /// Text printed by `display`, `write` and `newline` so far
    pub fn output(&self) -> &str {
        &self.output
    }

    pub fn take_output(&mut self) -> String {
        std::mem::take(&mut self.output)
    }

    /// Deepest stack pointer reached by the last [`Machine::execute`]
    pub fn stack_high_water(&self) -> usize {
        self.stack.high_water()
    }

    /// One line per instruction reachable from `entry`, labelled in
    /// breadth-first order: `L3: refer-local 0 -> L4`
    pub fn disassemble(&self, entry: Handle) -> Result<Vec<String>> {
        let mut labels = HashMap::from([(entry, 0)]);
        let mut order = vec![entry];
        let mut queue = VecDeque::from([entry]);
        while let Some(handle) = queue.pop_front() {
            for successor in self.heap.instruction(handle)?.successors() {
                if !labels.contains_key(&successor) {
                    labels.insert(successor, order.len());
                    order.push(successor);
                    queue.push_back(successor);
                }
            }
        }

        let label = |handle: Handle| {
            labels
                .get(&handle)
                .map_or_else(|| "?".to_string(), |n| format!("L{n}"))
        };
        order
            .iter()
            .enumerate()
            .map(|(n, &handle)| {
                let instruction = self.heap.instruction(handle)?;
                let name = instruction.name();
                let text = match instruction {
                    Instruction::Halt => name.to_string(),
                    Instruction::Constant { value, next } => {
                        format!("{name} {} -> {}", self.write(value), label(next))
                    }
                    Instruction::ReferLocal { index, next }
                    | Instruction::ReferFree { index, next }
                    | Instruction::Box { index, next }
                    | Instruction::BoxRest { index, next }
                    | Instruction::AssignLocal { index, next }
                    | Instruction::AssignFree { index, next } => {
                        format!("{name} {index} -> {}", label(next))
                    }
                    Instruction::Indirect { next } | Instruction::Argument { next } => {
                        format!("{name} -> {}", label(next))
                    }
                    Instruction::Close {
                        free,
                        arity,
                        body,
                        next,
                    } => format!(
                        "{name} free={free} arity=({arity}) body={} -> {}",
                        label(body),
                        label(next)
                    ),
                    Instruction::Test { then, otherwise } => {
                        format!("{name} then={} else={}", label(then), label(otherwise))
                    }
                    Instruction::Conti { depth, next } => {
                        format!("{name} {depth} -> {}", label(next))
                    }
                    Instruction::Nuate { stack, next } => {
                        let slots = self.heap.vector(stack).map_or(0, <[Handle]>::len);
                        format!("{name} [{slots} slots] -> {}", label(next))
                    }
                    Instruction::Frame { ret, next } => {
                        format!("{name} ret={} -> {}", label(ret), label(next))
                    }
                    Instruction::Shift { count, drop, next } => {
                        format!("{name} {count} {drop} -> {}", label(next))
                    }
                    Instruction::Apply { argc } => format!("{name} {argc}"),
                    Instruction::Return { slots } => format!("{name} {slots}"),
                    Instruction::Direct { procedure, next } => {
                        format!("{name} {} -> {}", self.write(procedure), label(next))
                    }
                };
                Ok(format!("L{n}: {text}"))
            })
            .collect()
    }
}
