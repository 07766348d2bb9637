//! The stack machine that runs compiled instruction graphs.
//!
//! Registers:
//!
//! - **accumulator**: the value of the last evaluated expression
//! - **next**: handle of the instruction to run
//! - **frame**: frame pointer; local `i` of the running procedure is stack slot `frame - i - 1`
//! - **closure**: the running closure, source of `ReferFree` values
//! - **sp**: stack pointer
//!
//! A call frame is three slots pushed by `Frame`: the caller's closure, the
//! caller's frame pointer (as an inline integer) and the return instruction,
//! which ends up on top. Arguments are pushed above the frame, last argument
//! first. `Return` pops the arguments and the frame and resumes the caller.

use std::rc::Rc;

use crate::heap::Heap;
use crate::object::{Arity, Closure, Handle, Instruction, NormalProc, Object, Procedure};
use crate::printer;
use crate::stack::Stack;
use crate::{Error, Result};

/// What the accumulator holds when `Apply` runs
enum Callee {
    Closure { arity: Arity, body: Handle },
    Procedure(Rc<Procedure>),
}

pub struct Vm<'a> {
    heap: &'a mut Heap,
    stack: &'a mut Stack,
    output: &'a mut String,
    accumulator: Handle,
    next: Handle,
    frame: usize,
    closure: Handle,
    sp: usize,
    steps: u64,
}

impl<'a> Vm<'a> {
    pub fn new(heap: &'a mut Heap, stack: &'a mut Stack, output: &'a mut String) -> Self {
        Vm {
            heap,
            stack,
            output,
            accumulator: Handle::NIL,
            next: Handle::NIL,
            frame: 0,
            closure: Handle::NIL,
            sp: 0,
            steps: 0,
        }
    }

    pub fn heap(&self) -> &Heap {
        self.heap
    }

    pub fn heap_mut(&mut self) -> &mut Heap {
        self.heap
    }

    /// Instructions executed by the last [`Vm::evaluate`]
    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Append text to the machine's output buffer
    pub fn print(&mut self, text: &str) {
        self.output.push_str(text);
    }

    pub fn accumulator(&self) -> Handle {
        self.accumulator
    }

    pub fn set_accumulator(&mut self, value: Handle) {
        self.accumulator = value;
    }

    /// Argument `i` of the call being applied (0 is the first argument)
    pub fn argument(&self, i: usize) -> Result<Handle> {
        self.stack.index(self.sp, i)
    }

    /// The top `argc` slots in call order
    pub fn arguments(&self, argc: usize) -> Result<Vec<Handle>> {
        (0..argc).map(|i| self.argument(i)).collect()
    }

    pub fn push(&mut self, value: Handle) -> Result<()> {
        self.sp = self.stack.push(self.sp, value)?;
        Ok(())
    }

    pub fn pop(&mut self, count: usize) -> Result<()> {
        self.sp = self.stack.pop(self.sp, count)?;
        Ok(())
    }

    /// Run the graph starting at `entry` until `Halt` and return the accumulator
    pub fn evaluate(&mut self, entry: Handle) -> Result<Handle> {
        let toplevel = self.heap.allocate(Object::Closure(Closure {
            body: entry,
            arity: Arity::exactly(0),
            captured: Box::new([]),
        }))?;
        self.accumulator = Handle::NIL;
        self.next = entry;
        self.closure = toplevel;
        self.frame = 0;
        self.sp = 0;
        self.steps = 0;

        loop {
            let instruction = self.heap.instruction(self.next)?;
            self.steps += 1;
            tracing::trace!(
                target: "stackscheme::vm",
                op = instruction.name(),
                sp = self.sp,
                fp = self.frame,
                "step"
            );
            if instruction == Instruction::Halt {
                tracing::debug!(
                    target: "stackscheme::vm",
                    steps = self.steps,
                    high_water = self.stack.high_water(),
                    "halt"
                );
                return Ok(self.accumulator);
            }
            self.step(instruction)?;
        }
    }

    fn step(&mut self, instruction: Instruction) -> Result<()> {
        match instruction {
            Instruction::Halt => {}
            Instruction::Constant { value, next } => {
                self.accumulator = value;
                self.next = next;
            }
            Instruction::ReferLocal { index, next } => {
                self.accumulator = self.stack.index(self.frame, index)?;
                self.next = next;
            }
            Instruction::ReferFree { index, next } => {
                self.accumulator = self.free(index)?;
                self.next = next;
            }
            Instruction::Indirect { next } => {
                self.accumulator = self.heap.unbox(self.accumulator)?;
                self.next = next;
            }
            Instruction::Close {
                free,
                arity,
                body,
                next,
            } => {
                let captured = self.stack.slice_as_array(self.sp, free)?;
                self.sp = self.stack.pop(self.sp, free)?;
                self.accumulator = self.heap.allocate(Object::Closure(Closure {
                    body,
                    arity,
                    captured,
                }))?;
                self.next = next;
            }
            Instruction::Box { index, next } | Instruction::BoxRest { index, next } => {
                let value = self.stack.index(self.frame, index)?;
                let boxed = self.heap.make_box(value)?;
                self.stack.set_index(self.frame, index, boxed)?;
                self.next = next;
            }
            Instruction::Test { then, otherwise } => {
                self.next = if self.accumulator.is_truthy() {
                    then
                } else {
                    otherwise
                };
            }
            Instruction::AssignLocal { index, next } => {
                let target = self.stack.index(self.frame, index)?;
                self.heap.set_box(target, self.accumulator)?;
                self.accumulator = Handle::UNDEFINED;
                self.next = next;
            }
            Instruction::AssignFree { index, next } => {
                let target = self.free(index)?;
                self.heap.set_box(target, self.accumulator)?;
                self.accumulator = Handle::UNDEFINED;
                self.next = next;
            }
            Instruction::Conti { depth, next } => {
                self.accumulator = self.capture_continuation(depth)?;
                self.next = next;
            }
            Instruction::Nuate { stack, next } => {
                self.sp = self.stack.restore(self.heap, stack)?;
                tracing::debug!(target: "stackscheme::vm", sp = self.sp, "reentered continuation");
                self.next = next;
            }
            Instruction::Frame { ret, next } => {
                self.push(self.closure)?;
                self.push(Handle::Fixnum(frame_value(self.frame)?))?;
                self.push(ret)?;
                self.next = next;
            }
            Instruction::Argument { next } => {
                self.push(self.accumulator)?;
                self.next = next;
            }
            Instruction::Shift { count, drop, next } => {
                self.sp = self.stack.shift(self.sp, count, drop)?;
                self.next = next;
            }
            Instruction::Apply { argc } => self.apply(argc)?,
            Instruction::Return { slots } => {
                self.pop(slots)?;
                self.return_from_frame()?;
            }
            Instruction::Direct { procedure, next } => {
                let procedure = self.heap.procedure(procedure)?;
                let direct = procedure.direct.ok_or_else(|| {
                    Error::TypeError(format!("{} has no direct entry", procedure.name))
                })?;
                let operand = self.accumulator;
                self.accumulator = direct(self, operand)?;
                self.next = next;
            }
        }
        Ok(())
    }

    /// Value captured at `index` by the running closure
    fn free(&self, index: usize) -> Result<Handle> {
        let closure = self.heap.closure(self.closure)?;
        closure.captured.get(index).copied().ok_or_else(|| {
            Error::RuntimeError(format!(
                "closure has {} captured values, no index {index}",
                closure.captured.len()
            ))
        })
    }

    /// Pop a call frame and resume the caller
    fn return_from_frame(&mut self) -> Result<()> {
        let ret = self.argument(0)?;
        let frame = match self.argument(1)? {
            Handle::Fixnum(fp) => usize::try_from(fp)
                .map_err(|_| Error::RuntimeError(format!("corrupt frame pointer {fp}")))?,
            other => {
                return Err(Error::TypeError(format!(
                    "expected a frame pointer, got {}",
                    self.heap.type_name(other)
                )));
            }
        };
        self.closure = self.argument(2)?;
        self.frame = frame;
        self.next = ret;
        self.pop(3)
    }

    /// Call the procedure in the accumulator with the top `argc` stack slots
    /// as arguments. Closures get a new frame pointer (after rest-argument
    /// adaptation); built-in procedures run immediately.
    pub fn apply(&mut self, argc: usize) -> Result<()> {
        let callee = match self.heap.get(self.accumulator) {
            Ok(Object::Closure(closure)) => Callee::Closure {
                arity: closure.arity,
                body: closure.body,
            },
            Ok(Object::Procedure(procedure)) => Callee::Procedure(Rc::clone(procedure)),
            _ => {
                return Err(Error::TypeError(format!(
                    "attempt to apply non-procedure {}",
                    printer::write(self.heap, self.accumulator)
                )));
            }
        };

        match callee {
            Callee::Closure { arity, body } => {
                if !arity.accepts(argc) {
                    return Err(Error::arity_error(arity, argc));
                }
                if arity.rest {
                    self.sp = if argc == arity.required {
                        self.stack.insert_trailing_null(self.sp, arity.required)?
                    } else {
                        let surplus = (arity.required..argc)
                            .map(|i| self.argument(i))
                            .collect::<Result<Vec<_>>>()?;
                        let rest = self.heap.list_mut(&surplus)?;
                        self.stack
                            .shift_args(self.sp, arity.required, argc, rest)?
                    };
                }
                self.closure = self.accumulator;
                self.frame = self.sp;
                self.next = body;
                Ok(())
            }
            Callee::Procedure(procedure) => {
                if !procedure.arity.accepts(argc) {
                    return Err(Error::arity_error_with_expr(
                        procedure.arity,
                        argc,
                        procedure.name,
                    ));
                }
                match procedure.normal {
                    NormalProc::Value(function) => {
                        let args = self.arguments(argc)?;
                        let result = function(self.heap, &args)?;
                        self.proc_return(result, argc)
                    }
                    NormalProc::Control(function) => function(self, argc),
                }
            }
        }
    }

    /// Finish a built-in call: discard its `argc` arguments and return `value`
    /// to the frame below them
    pub fn proc_return(&mut self, value: Handle, argc: usize) -> Result<()> {
        self.accumulator = value;
        self.pop(argc)?;
        self.return_from_frame()
    }

    /// Build a one-argument closure that reinstates the current stack and
    /// returns its argument, first dropping `depth` argument slots.
    pub fn capture_continuation(&mut self, depth: usize) -> Result<Handle> {
        let snapshot = self.stack.snapshot(self.heap, self.sp)?;
        let ret = self
            .heap
            .allocate(Object::Instruction(Instruction::Return { slots: depth }))?;
        let nuate = self.heap.allocate(Object::Instruction(Instruction::Nuate {
            stack: snapshot,
            next: ret,
        }))?;
        let body = self.heap.allocate(Object::Instruction(Instruction::ReferLocal {
            index: 0,
            next: nuate,
        }))?;
        tracing::debug!(target: "stackscheme::vm", sp = self.sp, depth, "captured continuation");
        self.heap.allocate(Object::Closure(Closure {
            body,
            arity: Arity::exactly(1),
            captured: Box::new([]),
        }))
    }
}

fn frame_value(frame: usize) -> Result<i64> {
    i64::try_from(frame).map_err(|_| Error::RuntimeError(format!("frame pointer {frame} out of range")))
}
