//! Special forms compiled directly to instructions

use crate::compiler::Compiler;
use crate::library::Library;
use crate::object::{Handle, Instruction};
use crate::scope::Scope;
use crate::sets::NameSet;
use crate::syntax::Syntax;
use crate::{Error, Result};

pub fn register(library: &mut Library) {
    library
        .syntax("quote", Quote)
        .syntax("if", If)
        .syntax("set!", Set)
        .syntax("lambda", Lambda)
        .syntax("begin", Begin)
        .syntax("define", Define);
}

/// `(quote datum)`
pub struct Quote;

impl Syntax for Quote {
    fn name(&self) -> &'static str {
        "quote"
    }

    fn compile(
        &self,
        c: &mut Compiler<'_>,
        form: Handle,
        _scope: &Scope,
        _sets: &NameSet,
        next: Handle,
    ) -> Result<Handle> {
        let items = c.form_items(form)?;
        let [_, datum] = items.as_slice() else {
            return Err(c.syntax_error(form, "quote expects exactly one datum"));
        };
        c.emit(Instruction::Constant {
            value: *datum,
            next,
        })
    }

    fn find_free(&self, _: &Compiler<'_>, _: Handle, _: &NameSet) -> Result<NameSet> {
        Ok(NameSet::new())
    }

    fn find_sets(
        &self,
        _: &Compiler<'_>,
        _: Handle,
        _: &NameSet,
        _: &NameSet,
    ) -> Result<NameSet> {
        Ok(NameSet::new())
    }
}

/// `(if test then)` or `(if test then else)`; a missing else yields the undefined value
pub struct If;

impl If {
    fn parts(c: &Compiler<'_>, form: Handle) -> Result<Vec<Handle>> {
        let items = c.form_items(form)?;
        if !(3..=4).contains(&items.len()) {
            return Err(c.syntax_error(
                form,
                "if expects a test, a consequent and an optional alternative",
            ));
        }
        Ok(items)
    }
}

impl Syntax for If {
    fn name(&self) -> &'static str {
        "if"
    }

    fn compile(
        &self,
        c: &mut Compiler<'_>,
        form: Handle,
        scope: &Scope,
        sets: &NameSet,
        next: Handle,
    ) -> Result<Handle> {
        let items = If::parts(c, form)?;
        let then = c.compile(items[2], scope, sets, next)?;
        let otherwise = c.compile(
            items.get(3).copied().unwrap_or(Handle::UNDEFINED),
            scope,
            sets,
            next,
        )?;
        let test = c.emit(Instruction::Test { then, otherwise })?;
        c.compile(items[1], scope, sets, test)
    }

    fn find_free(&self, c: &Compiler<'_>, form: Handle, bound: &NameSet) -> Result<NameSet> {
        let items = If::parts(c, form)?;
        c.find_free_all(&items[1..], bound)
    }

    fn find_sets(
        &self,
        c: &Compiler<'_>,
        form: Handle,
        candidates: &NameSet,
        bound: &NameSet,
    ) -> Result<NameSet> {
        let items = If::parts(c, form)?;
        c.find_sets_all(&items[1..], candidates, bound)
    }
}

/// `(set! name expr)`
pub struct Set;

impl Set {
    fn parts(c: &Compiler<'_>, form: Handle) -> Result<(Handle, Handle)> {
        let items = c.form_items(form)?;
        let [_, name, value] = items.as_slice() else {
            return Err(c.syntax_error(form, "set! expects a variable and an expression"));
        };
        if !c.heap.is_symbol(*name) {
            return Err(Error::TypeError(format!(
                "set! target must be a symbol, got {}",
                c.form_text(*name)
            )));
        }
        Ok((*name, *value))
    }
}

impl Syntax for Set {
    fn name(&self) -> &'static str {
        "set!"
    }

    fn compile(
        &self,
        c: &mut Compiler<'_>,
        form: Handle,
        scope: &Scope,
        sets: &NameSet,
        next: Handle,
    ) -> Result<Handle> {
        let (name, value) = Set::parts(c, form)?;
        c.compile_assign(name, value, scope, sets, next)
    }

    fn find_free(&self, c: &Compiler<'_>, form: Handle, bound: &NameSet) -> Result<NameSet> {
        let (name, value) = Set::parts(c, form)?;
        let target = if bound.member(name) || c.global(name).is_some() {
            NameSet::new()
        } else {
            NameSet::singleton(name)
        };
        Ok(target.union(&c.find_free(value, bound)?))
    }

    fn find_sets(
        &self,
        c: &Compiler<'_>,
        form: Handle,
        candidates: &NameSet,
        bound: &NameSet,
    ) -> Result<NameSet> {
        let (name, value) = Set::parts(c, form)?;
        let target = if candidates.member(name) {
            NameSet::singleton(name)
        } else {
            NameSet::new()
        };
        Ok(target.union(&c.find_sets(value, candidates, bound)?))
    }
}

/// `(lambda formals body ...)`
pub struct Lambda;

impl Lambda {
    fn parts(c: &Compiler<'_>, form: Handle) -> Result<(Handle, Vec<Handle>)> {
        let items = c.form_items(form)?;
        match items.as_slice() {
            [_, formals, body @ ..] if !body.is_empty() => Ok((*formals, body.to_vec())),
            _ => Err(c.syntax_error(form, "lambda expects parameters and a body")),
        }
    }
}

impl Syntax for Lambda {
    fn name(&self) -> &'static str {
        "lambda"
    }

    fn compile(
        &self,
        c: &mut Compiler<'_>,
        form: Handle,
        scope: &Scope,
        sets: &NameSet,
        next: Handle,
    ) -> Result<Handle> {
        let (formals, body) = Lambda::parts(c, form)?;
        c.compile_lambda(formals, &body, scope, sets, next)
    }

    fn find_free(&self, c: &Compiler<'_>, form: Handle, bound: &NameSet) -> Result<NameSet> {
        let (formals, body) = Lambda::parts(c, form)?;
        let (params, _) = c.parse_params(formals)?;
        let inner: NameSet = bound.iter().chain(params).collect();
        c.find_free_all(&body, &inner)
    }

    fn find_sets(
        &self,
        c: &Compiler<'_>,
        form: Handle,
        candidates: &NameSet,
        bound: &NameSet,
    ) -> Result<NameSet> {
        let (formals, body) = Lambda::parts(c, form)?;
        let (params, _) = c.parse_params(formals)?;
        let params: NameSet = params.into_iter().collect();
        c.find_sets_all(&body, &candidates.minus(&params), &bound.union(&params))
    }
}

/// `(begin expr ...)`
pub struct Begin;

impl Syntax for Begin {
    fn name(&self) -> &'static str {
        "begin"
    }

    fn compile(
        &self,
        c: &mut Compiler<'_>,
        form: Handle,
        scope: &Scope,
        sets: &NameSet,
        next: Handle,
    ) -> Result<Handle> {
        let items = c.form_items(form)?;
        c.compile_sequence(&items[1..], scope, sets, next)
    }

    fn find_free(&self, c: &Compiler<'_>, form: Handle, bound: &NameSet) -> Result<NameSet> {
        let items = c.form_items(form)?;
        c.find_free_all(&items[1..], bound)
    }

    fn find_sets(
        &self,
        c: &Compiler<'_>,
        form: Handle,
        candidates: &NameSet,
        bound: &NameSet,
    ) -> Result<NameSet> {
        let items = c.form_items(form)?;
        c.find_sets_all(&items[1..], candidates, bound)
    }
}

/// `define` only has meaning directly inside a body, where it is flattened
/// away before compilation. Anywhere else it is an error.
pub struct Define;

impl Syntax for Define {
    fn name(&self) -> &'static str {
        "define"
    }

    fn compile(
        &self,
        c: &mut Compiler<'_>,
        form: Handle,
        _scope: &Scope,
        _sets: &NameSet,
        _next: Handle,
    ) -> Result<Handle> {
        Err(c.syntax_error(form, "definition used as an expression"))
    }

    fn find_free(&self, c: &Compiler<'_>, form: Handle, bound: &NameSet) -> Result<NameSet> {
        let items = c.form_items(form)?;
        c.find_free_all(items.get(2..).unwrap_or_default(), bound)
    }

    fn find_sets(
        &self,
        c: &Compiler<'_>,
        form: Handle,
        candidates: &NameSet,
        bound: &NameSet,
    ) -> Result<NameSet> {
        let items = c.form_items(form)?;
        c.find_sets_all(items.get(2..).unwrap_or_default(), candidates, bound)
    }
}

/// Attached to `call/cc`: `(call/cc f)` captures the stack inline
pub struct CallCc;

impl Syntax for CallCc {
    fn name(&self) -> &'static str {
        "call/cc"
    }

    fn compile(
        &self,
        c: &mut Compiler<'_>,
        form: Handle,
        scope: &Scope,
        sets: &NameSet,
        next: Handle,
    ) -> Result<Handle> {
        let items = c.form_items(form)?;
        let [_, receiver] = items.as_slice() else {
            return Err(c.syntax_error(form, "call/cc expects exactly one procedure"));
        };
        c.compile_call_cc(*receiver, scope, sets, next)
    }

    fn find_free(&self, c: &Compiler<'_>, form: Handle, bound: &NameSet) -> Result<NameSet> {
        let items = c.form_items(form)?;
        c.find_free_all(&items[1..], bound)
    }

    fn find_sets(
        &self,
        c: &Compiler<'_>,
        form: Handle,
        candidates: &NameSet,
        bound: &NameSet,
    ) -> Result<NameSet> {
        let items = c.form_items(form)?;
        c.find_sets_all(&items[1..], candidates, bound)
    }
}

/// Attached to output procedures: a call with exactly `operands` operands runs
/// the procedure's direct entry on the accumulator instead of building a frame.
pub struct DirectCall {
    pub name: &'static str,
    pub operands: usize,
}

impl Syntax for DirectCall {
    fn name(&self) -> &'static str {
        self.name
    }

    fn compile(
        &self,
        c: &mut Compiler<'_>,
        form: Handle,
        scope: &Scope,
        sets: &NameSet,
        next: Handle,
    ) -> Result<Handle> {
        let items = c.form_items(form)?;
        let procedure = c.global(items[0]).map(|binding| binding.object());
        match procedure {
            Some(procedure) if items.len() == self.operands + 1 => {
                c.compile_direct(procedure, items.get(1).copied(), scope, sets, next)
            }
            _ => c.compile_application(form, scope, sets, next),
        }
    }

    fn find_free(&self, c: &Compiler<'_>, form: Handle, bound: &NameSet) -> Result<NameSet> {
        let items = c.form_items(form)?;
        c.find_free_all(&items[1..], bound)
    }

    fn find_sets(
        &self,
        c: &Compiler<'_>,
        form: Handle,
        candidates: &NameSet,
        bound: &NameSet,
    ) -> Result<NameSet> {
        let items = c.form_items(form)?;
        c.find_sets_all(&items[1..], candidates, bound)
    }
}

#[cfg(all(test, feature = "reader"))]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use crate::machine::Machine;
    use crate::{Config, Error};

    /// Test result variants for compiled special forms
    #[derive(Debug)]
    enum TestResult {
        Written(&'static str),       // Evaluation succeeds; `write` form of the result
        SpecificError(&'static str), // Evaluation fails with an error containing this string
        Error,                       // Evaluation fails (any error)
    }
    use TestResult::*;

    fn run_form_tests(test_cases: Vec<(&str, TestResult)>) {
        for (i, (input, expected)) in test_cases.iter().enumerate() {
            let test_id = format!("Form test #{}", i + 1);
            let mut machine = Machine::new(Config::default()).unwrap();
            let result = machine.eval_str(input);
            match (result, expected) {
                (Ok(value), Written(text)) => {
                    assert_eq!(machine.write(value), *text, "{test_id}: {input}");
                }
                (Err(e), SpecificError(fragment)) => {
                    let message = e.to_string();
                    assert!(
                        message.contains(fragment),
                        "{test_id}: expected error containing '{fragment}', got '{message}'"
                    );
                }
                (Err(_), Error) => {}
                (result, expected) => {
                    panic!("{test_id}: {input} gave {result:?}, expected {expected:?}")
                }
            }
        }
    }

    #[test]
    fn test_special_forms() {
        run_form_tests(vec![
            ("(quote (a b))", Written("(a b)")),
            ("'sym", Written("sym")),
            ("(quote)", SpecificError("quote expects exactly one datum")),
            ("(if #t 1 2)", Written("1")),
            ("(if #f 1 2)", Written("2")),
            ("(if '() 1 2)", Written("1")),
            ("(if 0 1 2)", Written("1")),
            ("(if #f #f)", Written("#<undefined>")),
            ("(if)", SpecificError("if expects")),
            ("(if 1 2 3 4)", Error),
            ("(begin 1 2 3)", Written("3")),
            ("(begin)", Written("#<undefined>")),
            ("((lambda (x) (set! x 2) x) 1)", Written("2")),
            ("((lambda (x) (set! x 2)) 1)", Written("#<undefined>")),
            ("(set! car 1)", SpecificError("cannot assign a library binding")),
            ("(set! nowhere 1)", SpecificError("Unbound variable: nowhere")),
            ("(set! 1 2)", SpecificError("set! target must be a symbol")),
            ("(lambda (x))", SpecificError("lambda expects parameters and a body")),
            ("((lambda args args) 1 2)", Written("(1 2)")),
            ("((lambda (a b . c) (list a b c)) 1 2)", Written("(1 2 ())")),
            ("(+ 1 (define x 2))", SpecificError("definition used as an expression")),
            ("(call/cc)", SpecificError("call/cc expects exactly one procedure")),
        ]);
    }

    #[test]
    fn test_direct_output_forms() {
        let mut machine = Machine::new(Config::default()).unwrap();
        let value = machine
            .eval_str(r#"(display "hi") (newline) (write "hi") (display 42)"#)
            .unwrap();
        assert_eq!(machine.write(value), "#<undefined>");
        assert_eq!(machine.output(), "hi\n\"hi\"42");

        // wrong operand count falls back to an ordinary call
        let mut machine = Machine::new(Config::default()).unwrap();
        assert!(matches!(
            machine.eval_str("(display 1 2)"),
            Err(Error::ArityError { .. })
        ));
    }

    #[test]
    fn test_shadowed_keyword_is_a_variable() {
        run_form_tests(vec![
            ("((lambda (if) (if 1 2)) (lambda (a b) (+ a b)))", Written("3")),
            // assignments under a rebound keyword still box the assigned variable
            (
                "((lambda (x) ((lambda (if) (if (set! x 5))) (lambda (v) v)) x) 1)",
                Written("5"),
            ),
            (
                "((lambda (x) ((lambda (quote) (quote (set! x 5) 0)) list) x) 1)",
                Written("5"),
            ),
            (
                "((lambda (x) ((lambda (lambda) (lambda x (set! x 5))) list) x) 1)",
                Written("5"),
            ),
            // a rebound define is a call, not an internal definition
            ("((lambda (define) (define 1 2)) list)", Written("(1 2)")),
            ("((lambda (begin) (begin 1 2)) list)", Written("(1 2)")),
        ]);
    }
}
