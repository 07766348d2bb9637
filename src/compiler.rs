//! Translation of expression trees into instruction graphs.
//!
//! Compilation is continuation-passing: every `compile` call receives the
//! already-built instruction `next` that consumes the expression's value and
//! returns the entry of the code that produces it. A call whose `next` is a
//! `Return` is in tail position and reuses the current frame with `Shift`
//! instead of building a new one with `Frame`.
//!
//! Before compiling, a program is expanded: internal definitions are
//! flattened into `letrec*` (see [`flatten`]) and macros are applied by
//! [`Compiler::transform`]. Free-variable and assignment analysis lives in
//! [`analysis`].

pub mod analysis;
pub mod flatten;

use std::cell::Cell;
use std::rc::Rc;

use crate::heap::Heap;
use crate::object::{Arity, Handle, Instruction, Object};
use crate::printer;
use crate::scope::{Location, Scope};
use crate::sets::NameSet;
use crate::syntax::{Binding, Bindings, Syntax};
use crate::{Error, MAX_COMPILE_DEPTH, Result};

/// Symbols the compiler itself has to recognise
#[derive(Clone, Copy, Debug)]
pub struct Keywords {
    pub quote: Handle,
    pub lambda: Handle,
    pub define: Handle,
    pub begin: Handle,
    pub set: Handle,
    pub letrec_star: Handle,
}

impl Keywords {
    fn intern(heap: &mut Heap) -> Result<Self> {
        Ok(Keywords {
            quote: heap.intern("quote")?,
            lambda: heap.intern("lambda")?,
            define: heap.intern("define")?,
            begin: heap.intern("begin")?,
            set: heap.intern("set!")?,
            letrec_star: heap.intern("letrec*")?,
        })
    }
}

pub struct Compiler<'a> {
    pub heap: &'a mut Heap,
    bindings: &'a Bindings,
    /// Parameters of the lambdas enclosing the current point, innermost last.
    /// A global binding is only visible when no enclosing lambda rebinds its name.
    lexical: Vec<NameSet>,
    keywords: Keywords,
    emitted: usize,
    /// Forms currently being expanded, analysed or compiled
    depth: Cell<usize>,
}

impl<'a> Compiler<'a> {
    pub fn new(heap: &'a mut Heap, bindings: &'a Bindings) -> Result<Self> {
        let keywords = Keywords::intern(heap)?;
        Ok(Compiler {
            heap,
            bindings,
            lexical: Vec::new(),
            keywords,
            emitted: 0,
            depth: Cell::new(0),
        })
    }

    pub fn keywords(&self) -> &Keywords {
        &self.keywords
    }

    /// Number of instructions emitted so far
    pub fn emitted(&self) -> usize {
        self.emitted
    }

    pub fn symbol(&mut self, name: &str) -> Result<Handle> {
        self.heap.intern(name)
    }

    pub fn gensym(&mut self, prefix: &str) -> Result<Handle> {
        self.heap.gensym(prefix)
    }

    /// `write` rendering of a form, for error messages
    pub fn form_text(&self, form: Handle) -> String {
        printer::write(self.heap, form)
    }

    pub fn syntax_error(&self, form: Handle, message: impl Into<String>) -> Error {
        Error::syntax(self.form_text(form), message)
    }

    /// Elements of a form that must be a proper list
    pub fn form_items(&self, form: Handle) -> Result<Vec<Handle>> {
        self.heap
            .list_to_vec(form)
            .ok_or_else(|| self.syntax_error(form, "improper list in form"))
    }

    /// Global binding of `name`, unless an enclosing lambda rebinds it
    pub fn global(&self, name: Handle) -> Option<Binding> {
        if self.lexical.iter().any(|names| names.member(name)) {
            return None;
        }
        self.bindings.lookup(name).cloned()
    }

    /// Syntax compiling `form`, if its head names one
    pub fn head_syntax(&self, form: Handle) -> Option<Rc<dyn Syntax>> {
        let head = self.heap.car(form).ok()?;
        if !self.heap.is_symbol(head) {
            return None;
        }
        self.global(head)?.syntax()
    }

    /// Whether `form` is headed by `keyword` and the keyword still means its global binding
    pub fn is_keyword_form(&self, form: Handle, keyword: Handle) -> bool {
        matches!(self.heap.car(form), Ok(head) if head == keyword)
            && matches!(self.global(keyword), Some(Binding::Syntax { .. }))
    }

    /// Run `body` with `names` lexically bound
    pub fn within<T>(
        &mut self,
        names: NameSet,
        body: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<T> {
        self.lexical.push(names);
        let result = body(self);
        self.lexical.pop();
        result
    }

    /// Count one more level of nesting below `form`, failing past [`MAX_COMPILE_DEPTH`].
    /// Every successful call is paired with [`Compiler::leave`].
    pub fn enter(&self, form: Handle) -> Result<()> {
        let depth = self.depth.get() + 1;
        if depth > MAX_COMPILE_DEPTH {
            return Err(self.syntax_error(
                form,
                format!("expression too deeply nested (max depth: {MAX_COMPILE_DEPTH})"),
            ));
        }
        self.depth.set(depth);
        Ok(())
    }

    pub fn leave(&self) {
        self.depth.set(self.depth.get().saturating_sub(1));
    }

    pub fn emit(&mut self, instruction: Instruction) -> Result<Handle> {
        self.emitted += 1;
        self.heap.allocate(Object::Instruction(instruction))
    }

    /// Frame size of the enclosing lambda if `next` returns from it
    pub fn tail_slots(&self, next: Handle) -> Result<Option<usize>> {
        Ok(match self.heap.instruction(next)? {
            Instruction::Return { slots } => Some(slots),
            _ => None,
        })
    }

    // === Expansion ===

    /// Flatten and macro-expand a whole program
    pub fn expand_program(&mut self, program: Handle) -> Result<Handle> {
        if self.heap.is_pair(program) && self.is_keyword_form(program, self.keywords.begin) {
            let items = self.form_items(program)?;
            let body = self.flatten_body(&items[1..])?;
            let body = body
                .into_iter()
                .map(|expr| self.transform(expr))
                .collect::<Result<Vec<_>>>()?;
            let mut rebuilt = vec![self.keywords.begin];
            rebuilt.extend(body);
            return self.heap.list(&rebuilt);
        }
        self.transform(program)
    }

    /// Expand every macro use in `expr`.
    ///
    /// Quoted data is left alone. Lambda bodies are flattened before their
    /// contents are expanded, and the lambda's parameters shadow global
    /// macro names inside the body. Pairs are rebuilt only where something changed.
    pub fn transform(&mut self, expr: Handle) -> Result<Handle> {
        if !self.heap.is_pair(expr) {
            return Ok(expr);
        }
        self.enter(expr)?;
        let result = self.transform_form(expr);
        self.leave();
        result
    }

    fn transform_form(&mut self, expr: Handle) -> Result<Handle> {
        let head = self.heap.car(expr)?;
        if self.heap.is_symbol(head) {
            match self.global(head) {
                Some(Binding::Macro { transformer, .. }) => {
                    return transformer.transform(self, expr);
                }
                Some(Binding::Syntax { .. }) if head == self.keywords.quote => {
                    return Ok(expr);
                }
                Some(Binding::Syntax { .. }) if head == self.keywords.lambda => {
                    return self.transform_lambda(expr);
                }
                _ => {}
            }
        }
        let (items, tail) = self.heap.list_parts(expr);
        let mut expanded = Vec::with_capacity(items.len());
        for &item in &items {
            expanded.push(self.transform(item)?);
        }
        if expanded == items {
            return Ok(expr);
        }
        self.heap.list_with_tail(&expanded, tail)
    }

    fn transform_lambda(&mut self, form: Handle) -> Result<Handle> {
        let items = self.form_items(form)?;
        let [head, formals, body @ ..] = items.as_slice() else {
            return Err(self.syntax_error(form, "lambda requires parameters and a body"));
        };
        let (params, _) = self.parse_params(*formals)?;
        let expanded = self.within(params.iter().copied().collect(), |c| {
            let flattened = c.flatten_body(body)?;
            let mut expanded = Vec::with_capacity(flattened.len());
            for expr in flattened {
                expanded.push(c.transform(expr)?);
            }
            Ok(expanded)
        })?;
        if expanded.as_slice() == body {
            return Ok(form);
        }
        let mut rebuilt = vec![*head, *formals];
        rebuilt.extend(expanded);
        self.heap.list(&rebuilt)
    }

    // === Compilation ===

    /// Expand and compile a program rooted in `(begin ...)`; returns the entry instruction
    pub fn compile_program(&mut self, program: Handle) -> Result<Handle> {
        let expanded = self.expand_program(program)?;
        let halt = self.emit(Instruction::Halt)?;
        let entry = self.compile(expanded, &Scope::empty(), &NameSet::new(), halt)?;
        tracing::debug!(
            target: "stackscheme::compiler",
            instructions = self.emitted,
            heap = self.heap.len(),
            "compiled program"
        );
        Ok(entry)
    }

    pub fn compile(
        &mut self,
        expr: Handle,
        scope: &Scope,
        sets: &NameSet,
        next: Handle,
    ) -> Result<Handle> {
        if self.heap.is_symbol(expr) {
            return self.compile_reference(expr, scope, sets, next);
        }
        if !self.heap.is_pair(expr) {
            return self.emit(Instruction::Constant { value: expr, next });
        }
        self.enter(expr)?;
        let result = self.compile_form(expr, scope, sets, next);
        self.leave();
        result
    }

    fn compile_form(
        &mut self,
        expr: Handle,
        scope: &Scope,
        sets: &NameSet,
        next: Handle,
    ) -> Result<Handle> {
        if let Some(syntax) = self.head_syntax(expr) {
            return syntax.compile(self, expr, scope, sets, next);
        }
        let head = self.heap.car(expr)?;
        if self.heap.is_symbol(head)
            && let Some(transformer) = self.global(head).and_then(|b| b.transformer())
        {
            let expanded = transformer.transform(self, expr)?;
            return self.compile(expanded, scope, sets, next);
        }
        self.compile_application(expr, scope, sets, next)
    }

    /// Variable reference: frame slot or captured value, unboxed if the
    /// variable is assigned; global syntax and procedures become constants.
    pub fn compile_reference(
        &mut self,
        name: Handle,
        scope: &Scope,
        sets: &NameSet,
        next: Handle,
    ) -> Result<Handle> {
        if let Some(location) = scope.lookup(name) {
            let next = if sets.member(name) {
                self.emit(Instruction::Indirect { next })?
            } else {
                next
            };
            return self.emit(match location {
                Location::Local(index) => Instruction::ReferLocal { index, next },
                Location::Free(index) => Instruction::ReferFree { index, next },
            });
        }
        match self.global(name) {
            Some(Binding::Syntax { object, .. } | Binding::Procedure { object, .. }) => {
                self.emit(Instruction::Constant {
                    value: object,
                    next,
                })
            }
            Some(Binding::Macro { .. }) => Err(self.syntax_error(name, "macro used as a value")),
            None => Err(Error::UnboundVariable(self.form_text(name))),
        }
    }

    /// `(set! name expr)` with `name` already known to be boxed
    pub fn compile_assign(
        &mut self,
        name: Handle,
        value: Handle,
        scope: &Scope,
        sets: &NameSet,
        next: Handle,
    ) -> Result<Handle> {
        let assign = match scope.lookup(name) {
            Some(Location::Local(index)) => Instruction::AssignLocal { index, next },
            Some(Location::Free(index)) => Instruction::AssignFree { index, next },
            None if self.global(name).is_some() => {
                return Err(self.syntax_error(name, "cannot assign a library binding"));
            }
            None => return Err(Error::UnboundVariable(self.form_text(name))),
        };
        let assign = self.emit(assign)?;
        self.compile(value, scope, sets, assign)
    }

    /// Evaluate `exprs` in order; the last one's value reaches `next`
    pub fn compile_sequence(
        &mut self,
        exprs: &[Handle],
        scope: &Scope,
        sets: &NameSet,
        next: Handle,
    ) -> Result<Handle> {
        if exprs.is_empty() {
            return self.emit(Instruction::Constant {
                value: Handle::UNDEFINED,
                next,
            });
        }
        exprs
            .iter()
            .rev()
            .try_fold(next, |code, &expr| self.compile(expr, scope, sets, code))
    }

    /// Procedure call. Operands are pushed last-first so the first argument
    /// ends up nearest the top; the operator is evaluated last into the accumulator.
    pub fn compile_application(
        &mut self,
        form: Handle,
        scope: &Scope,
        sets: &NameSet,
        next: Handle,
    ) -> Result<Handle> {
        let items = self.form_items(form)?;
        let Some((&operator, operands)) = items.split_first() else {
            return Err(self.syntax_error(form, "empty application"));
        };
        let argc = operands.len();
        let tail = self.tail_slots(next)?;

        let mut code = self.emit(Instruction::Apply { argc })?;
        if let Some(slots) = tail {
            code = self.emit(Instruction::Shift {
                count: argc,
                drop: slots,
                next: code,
            })?;
        }
        code = self.compile(operator, scope, sets, code)?;
        for &operand in operands {
            let push = self.emit(Instruction::Argument { next: code })?;
            code = self.compile(operand, scope, sets, push)?;
        }
        match tail {
            Some(_) => Ok(code),
            None => self.emit(Instruction::Frame { ret: next, next: code }),
        }
    }

    /// Parameter list: `(a b)`, `(a . rest)` or a bare `rest` symbol
    pub fn parse_params(&self, formals: Handle) -> Result<(Vec<Handle>, Arity)> {
        let (mut params, tail) = self.heap.list_parts(formals);
        let arity = if tail.is_nil() {
            Arity::exactly(params.len())
        } else if self.heap.is_symbol(tail) {
            let arity = Arity::at_least(params.len());
            params.push(tail);
            arity
        } else {
            return Err(Error::TypeError(format!(
                "lambda parameter list must end in a symbol, got {}",
                self.form_text(tail)
            )));
        };
        for (i, &param) in params.iter().enumerate() {
            if !self.heap.is_symbol(param) {
                return Err(Error::TypeError(format!(
                    "lambda parameter must be a symbol, got {}",
                    self.form_text(param)
                )));
            }
            if params[..i].contains(&param) {
                return Err(self.syntax_error(formals, "duplicate parameter"));
            }
        }
        Ok((params, arity))
    }

    /// Closure creation: push the captured values, then `Close` over a body
    /// that starts by boxing its assigned parameters.
    pub fn compile_lambda(
        &mut self,
        formals: Handle,
        body: &[Handle],
        scope: &Scope,
        sets: &NameSet,
        next: Handle,
    ) -> Result<Handle> {
        let (params, arity) = self.parse_params(formals)?;
        let bound: NameSet = params.iter().copied().collect();
        let free = self.find_free_all(body, &bound)?;
        let assigned = self.find_sets_all(body, &bound, &bound)?;
        let inner_sets = assigned.union(&sets.intersect(&free));
        let inner_scope = Scope::new(params.clone(), free.as_slice().to_vec());

        let entry = self.within(bound, |c| {
            let ret = c.emit(Instruction::Return {
                slots: arity.slots(),
            })?;
            let code = c.compile_sequence(body, &inner_scope, &inner_sets, ret)?;
            c.make_boxes(&assigned, &params, arity, code)
        })?;

        let close = self.emit(Instruction::Close {
            free: free.len(),
            arity,
            body: entry,
            next,
        })?;
        self.collect_free(&free, scope, close)
    }

    /// Push the current value of each free name, first name on top
    fn collect_free(&mut self, free: &NameSet, scope: &Scope, next: Handle) -> Result<Handle> {
        free.iter().try_fold(next, |code, name| {
            let push = self.emit(Instruction::Argument { next: code })?;
            // Boxes are captured as boxes, so no `Indirect` here
            self.compile_reference(name, scope, &NameSet::new(), push)
        })
    }

    fn make_boxes(
        &mut self,
        assigned: &NameSet,
        params: &[Handle],
        arity: Arity,
        next: Handle,
    ) -> Result<Handle> {
        params
            .iter()
            .enumerate()
            .rev()
            .filter(|&(_, &param)| assigned.member(param))
            .try_fold(next, |code, (index, _)| {
                self.emit(if arity.rest && index == arity.required {
                    Instruction::BoxRest { index, next: code }
                } else {
                    Instruction::Box { index, next: code }
                })
            })
    }

    /// `(call/cc f)`: capture the stack, then call `f` with the continuation.
    /// In tail position the continuation returns from the enclosing procedure.
    pub fn compile_call_cc(
        &mut self,
        operand: Handle,
        scope: &Scope,
        sets: &NameSet,
        next: Handle,
    ) -> Result<Handle> {
        let tail = self.tail_slots(next)?;
        let mut call = self.emit(Instruction::Apply { argc: 1 })?;
        if let Some(slots) = tail {
            call = self.emit(Instruction::Shift {
                count: 1,
                drop: slots,
                next: call,
            })?;
        }
        let receiver = self.compile(operand, scope, sets, call)?;
        let push = self.emit(Instruction::Argument { next: receiver })?;
        let conti = self.emit(Instruction::Conti {
            depth: tail.unwrap_or(0),
            next: push,
        })?;
        match tail {
            Some(_) => Ok(conti),
            None => self.emit(Instruction::Frame { ret: next, next: conti }),
        }
    }

    /// Inline call of `procedure`'s direct entry on `operand` (or on nothing)
    pub fn compile_direct(
        &mut self,
        procedure: Handle,
        operand: Option<Handle>,
        scope: &Scope,
        sets: &NameSet,
        next: Handle,
    ) -> Result<Handle> {
        let direct = self.emit(Instruction::Direct { procedure, next })?;
        match operand {
            Some(operand) => self.compile(operand, scope, sets, direct),
            None => self.emit(Instruction::Constant {
                value: Handle::UNDEFINED,
                next: direct,
            }),
        }
    }
}
