//! Derived forms, expanded into special forms before compilation.
//!
//! Each macro rewrites its form and passes the result back through
//! [`Compiler::transform`], so expansions may freely use other macros.
//! Temporaries introduced by an expansion are gensyms and can never capture
//! a user variable.

use crate::compiler::Compiler;
use crate::library::Library;
use crate::object::Handle;
use crate::syntax::Macro;
use crate::Result;

pub fn register(library: &mut Library) {
    library
        .transformer("let", Let)
        .transformer("let*", LetStar)
        .transformer("letrec", Letrec { name: "letrec" })
        .transformer("letrec*", Letrec { name: "letrec*" })
        .transformer("and", And)
        .transformer("or", Or)
        .transformer("when", When { negate: false })
        .transformer("unless", When { negate: true })
        .transformer("cond", Cond);
}

/// `((name init) ...)` as parallel name and init lists
fn bindings(c: &Compiler<'_>, form: Handle, list: Handle) -> Result<(Vec<Handle>, Vec<Handle>)> {
    let entries = c
        .heap
        .list_to_vec(list)
        .ok_or_else(|| c.syntax_error(form, "bindings must be a list"))?;
    let mut names = Vec::with_capacity(entries.len());
    let mut inits = Vec::with_capacity(entries.len());
    for entry in entries {
        match c.heap.list_to_vec(entry).as_deref() {
            Some(&[name, init]) if c.heap.is_symbol(name) => {
                names.push(name);
                inits.push(init);
            }
            _ => return Err(c.syntax_error(form, "each binding must be (name expression)")),
        }
    }
    Ok((names, inits))
}

/// `(head items...)`
fn build(c: &mut Compiler<'_>, head: &str, items: &[Handle]) -> Result<Handle> {
    let mut all = Vec::with_capacity(items.len() + 1);
    all.push(c.symbol(head)?);
    all.extend_from_slice(items);
    c.heap.list(&all)
}

/// `(lambda (params...) body...)`
fn lambda(c: &mut Compiler<'_>, params: &[Handle], body: &[Handle]) -> Result<Handle> {
    let formals = c.heap.list(params)?;
    let mut items = vec![formals];
    items.extend_from_slice(body);
    build(c, "lambda", &items)
}

/// `((lambda (params...) body...) args...)`
fn immediate(
    c: &mut Compiler<'_>,
    params: &[Handle],
    body: &[Handle],
    args: &[Handle],
) -> Result<Handle> {
    let operator = lambda(c, params, body)?;
    let mut call = vec![operator];
    call.extend_from_slice(args);
    c.heap.list(&call)
}

/// `(begin body...)`, or the single expression itself
fn sequence(c: &mut Compiler<'_>, body: &[Handle]) -> Result<Handle> {
    match body {
        [single] => Ok(*single),
        _ => build(c, "begin", body),
    }
}

/// `(let ((v e) ...) body ...)` and named `(let loop ((v e) ...) body ...)`
pub struct Let;

impl Macro for Let {
    fn name(&self) -> &'static str {
        "let"
    }

    fn transform(&self, c: &mut Compiler<'_>, form: Handle) -> Result<Handle> {
        let items = c.form_items(form)?;
        let expanded = match items.as_slice() {
            [_, name, list, body @ ..] if c.heap.is_symbol(*name) && !body.is_empty() => {
                let (names, inits) = bindings(c, form, *list)?;
                let procedure = lambda(c, &names, body)?;
                let binding = c.heap.list(&[*name, procedure])?;
                let binding_list = c.heap.list(&[binding])?;
                let letrec = build(c, "letrec", &[binding_list, *name])?;
                let mut call = vec![letrec];
                call.extend(inits);
                c.heap.list(&call)?
            }
            [_, list, body @ ..] if !body.is_empty() => {
                let (names, inits) = bindings(c, form, *list)?;
                immediate(c, &names, body, &inits)?
            }
            _ => return Err(c.syntax_error(form, "let expects bindings and a body")),
        };
        c.transform(expanded)
    }
}

/// `(let* ((v e) ...) body ...)`: one nested `let` per binding
pub struct LetStar;

impl Macro for LetStar {
    fn name(&self) -> &'static str {
        "let*"
    }

    fn transform(&self, c: &mut Compiler<'_>, form: Handle) -> Result<Handle> {
        let items = c.form_items(form)?;
        let [_, list, body @ ..] = items.as_slice() else {
            return Err(c.syntax_error(form, "let* expects bindings and a body"));
        };
        if body.is_empty() {
            return Err(c.syntax_error(form, "let* expects bindings and a body"));
        }
        let entries = c
            .heap
            .list_to_vec(*list)
            .ok_or_else(|| c.syntax_error(form, "bindings must be a list"))?;
        let expanded = match entries.split_first() {
            None => {
                let mut items = vec![Handle::NIL];
                items.extend_from_slice(body);
                build(c, "let", &items)?
            }
            Some((first, rest)) => {
                let inner_bindings = c.heap.list(rest)?;
                let mut inner = vec![inner_bindings];
                inner.extend_from_slice(body);
                let inner = build(c, "let*", &inner)?;
                let outer_bindings = c.heap.list(&[*first])?;
                build(c, "let", &[outer_bindings, inner])?
            }
        };
        c.transform(expanded)
    }
}

/// `letrec` and `letrec*`: bind every name to the undefined value, then assign
/// the inits in order before running the body
pub struct Letrec {
    name: &'static str,
}

impl Macro for Letrec {
    fn name(&self) -> &'static str {
        self.name
    }

    fn transform(&self, c: &mut Compiler<'_>, form: Handle) -> Result<Handle> {
        let items = c.form_items(form)?;
        let [_, list, body @ ..] = items.as_slice() else {
            return Err(c.syntax_error(form, format!("{} expects bindings and a body", self.name)));
        };
        if body.is_empty() {
            return Err(c.syntax_error(form, format!("{} expects bindings and a body", self.name)));
        }
        let (names, inits) = bindings(c, form, *list)?;
        let set = c.keywords().set;
        let mut statements = Vec::with_capacity(names.len() + body.len());
        for (&name, &init) in names.iter().zip(&inits) {
            statements.push(c.heap.list(&[set, name, init])?);
        }
        statements.extend_from_slice(body);
        let undefined = vec![Handle::UNDEFINED; names.len()];
        let expanded = immediate(c, &names, &statements, &undefined)?;
        c.transform(expanded)
    }
}

/// `(and e ...)`
pub struct And;

impl Macro for And {
    fn name(&self) -> &'static str {
        "and"
    }

    fn transform(&self, c: &mut Compiler<'_>, form: Handle) -> Result<Handle> {
        let items = c.form_items(form)?;
        let expanded = match &items[1..] {
            [] => Handle::TRUE,
            [single] => *single,
            [first, rest @ ..] => {
                let rest = build(c, "and", rest)?;
                build(c, "if", &[*first, rest, Handle::FALSE])?
            }
        };
        c.transform(expanded)
    }
}

/// `(or e ...)`; each value is computed once
pub struct Or;

impl Macro for Or {
    fn name(&self) -> &'static str {
        "or"
    }

    fn transform(&self, c: &mut Compiler<'_>, form: Handle) -> Result<Handle> {
        let items = c.form_items(form)?;
        let expanded = match &items[1..] {
            [] => Handle::FALSE,
            [single] => *single,
            [first, rest @ ..] => {
                let temp = c.gensym("or")?;
                let rest = build(c, "or", rest)?;
                let test = build(c, "if", &[temp, temp, rest])?;
                immediate(c, &[temp], &[test], &[*first])?
            }
        };
        c.transform(expanded)
    }
}

/// `(when test body ...)` and `(unless test body ...)`
pub struct When {
    negate: bool,
}

impl Macro for When {
    fn name(&self) -> &'static str {
        if self.negate { "unless" } else { "when" }
    }

    fn transform(&self, c: &mut Compiler<'_>, form: Handle) -> Result<Handle> {
        let items = c.form_items(form)?;
        let [_, test, body @ ..] = items.as_slice() else {
            return Err(c.syntax_error(form, format!("{} expects a test", self.name())));
        };
        let body = build(c, "begin", body)?;
        let expanded = if self.negate {
            build(c, "if", &[*test, Handle::UNDEFINED, body])?
        } else {
            build(c, "if", &[*test, body])?
        };
        c.transform(expanded)
    }
}

/// `(cond clause ...)` with `(test body ...)`, `(test)`, `(test => receiver)`
/// and a final `(else body ...)` clause
pub struct Cond;

impl Cond {
    /// Wrap one clause around the expansion of the clauses after it
    fn clause(
        c: &mut Compiler<'_>,
        form: Handle,
        parts: &[Handle],
        otherwise: Handle,
    ) -> Result<Handle> {
        let arrow = c.symbol("=>")?;
        match parts {
            [test] => build(c, "or", &[*test, otherwise]),
            [test, marker, receiver] if *marker == arrow => {
                let temp = c.gensym("cond")?;
                let call = c.heap.list(&[*receiver, temp])?;
                let test_temp = build(c, "if", &[temp, call, otherwise])?;
                immediate(c, &[temp], &[test_temp], &[*test])
            }
            [test, body @ ..] => {
                let body = sequence(c, body)?;
                build(c, "if", &[*test, body, otherwise])
            }
            [] => Err(c.syntax_error(form, "cond clause must be a non-empty list")),
        }
    }
}

impl Macro for Cond {
    fn name(&self) -> &'static str {
        "cond"
    }

    /// Clauses are folded from the last one outwards, so a long `cond`
    /// costs no native recursion until the result is transformed.
    fn transform(&self, c: &mut Compiler<'_>, form: Handle) -> Result<Handle> {
        let items = c.form_items(form)?;
        let clauses = &items[1..];
        let else_ = c.symbol("else")?;
        let mut expanded = Handle::UNDEFINED;
        for (position, &clause) in clauses.iter().enumerate().rev() {
            let parts = c
                .heap
                .list_to_vec(clause)
                .filter(|parts| !parts.is_empty())
                .ok_or_else(|| c.syntax_error(form, "cond clause must be a non-empty list"))?;
            if parts[0] == else_ {
                if position + 1 != clauses.len() {
                    return Err(c.syntax_error(form, "else must be the last cond clause"));
                }
                if parts.len() == 1 {
                    return Err(c.syntax_error(form, "else clause needs a body"));
                }
                expanded = sequence(c, &parts[1..])?;
                continue;
            }
            expanded = Cond::clause(c, form, &parts, expanded)?;
        }
        c.transform(expanded)
    }
}

#[cfg(all(test, feature = "reader"))]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use crate::machine::Machine;
    use crate::{Config, Error};

    #[derive(Debug)]
    enum TestResult {
        Written(&'static str),
        SpecificError(&'static str),
    }
    use TestResult::*;

    fn run_derived_tests(test_cases: Vec<(&str, TestResult)>) {
        for (i, (input, expected)) in test_cases.iter().enumerate() {
            let test_id = format!("Derived form test #{}", i + 1);
            let mut machine = Machine::new(Config::default()).unwrap();
            match (machine.eval_str(input), expected) {
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
                (result, expected) => {
                    panic!("{test_id}: {input} gave {result:?}, expected {expected:?}")
                }
            }
        }
    }

    #[test]
    fn test_binding_forms() {
        run_derived_tests(vec![
            ("(let ((x 1) (y 2)) (+ x y))", Written("3")),
            ("(let () 5)", Written("5")),
            ("(let ((x 1)) (let ((x 2) (y x)) y))", Written("1")),
            ("(let* ((x 1) (y (+ x 1))) (* x y))", Written("2")),
            ("(let* () 7)", Written("7")),
            (
                "(let loop ((i 0) (acc '())) (if (= i 3) acc (loop (+ i 1) (cons i acc))))",
                Written("(2 1 0)"),
            ),
            (
                "(letrec ((even? (lambda (n) (if (= n 0) #t (odd? (- n 1)))))
                          (odd? (lambda (n) (if (= n 0) #f (even? (- n 1))))))
                   (even? 100))",
                Written("#t"),
            ),
            ("(letrec* ((a 1) (b (+ a 1))) b)", Written("2")),
            ("(let ((x)) x)", SpecificError("each binding must be (name expression)")),
            ("(let ((1 2)) 3)", SpecificError("each binding must be (name expression)")),
            ("(let ((x 1)))", SpecificError("let expects bindings and a body")),
        ]);
    }

    #[test]
    fn test_conditional_forms() {
        run_derived_tests(vec![
            ("(and)", Written("#t")),
            ("(and 1 2 3)", Written("3")),
            ("(and 1 #f 3)", Written("#f")),
            ("(or)", Written("#f")),
            ("(or #f 2)", Written("2")),
            ("(or #f #f)", Written("#f")),
            ("(let ((n 0)) (or (begin (set! n (+ n 1)) #f) n))", Written("1")),
            ("(when (> 2 1) 'yes)", Written("yes")),
            ("(when (< 2 1) 'yes)", Written("#<undefined>")),
            ("(unless (< 2 1) 'no)", Written("no")),
            ("(cond (#f 1) ((= 1 1) 2) (else 3))", Written("2")),
            ("(cond (#f 1) (else 3))", Written("3")),
            ("(cond (#f 1))", Written("#<undefined>")),
            ("(cond ((car '(7)) => (lambda (x) (* x 2))) (else 0))", Written("14")),
            ("(cond (#f) (4))", Written("4")),
            ("(cond (else 1) (#t 2))", SpecificError("else must be the last cond clause")),
            ("(cond ())", SpecificError("cond clause must be a non-empty list")),
        ]);
    }

    #[test]
    fn test_or_temporary_does_not_capture() {
        let mut machine = Machine::new(Config::default()).unwrap();
        let value = machine
            .eval_str("(let ((t 5)) (or #f t))")
            .unwrap();
        assert_eq!(machine.write(value), "5");
        assert!(matches!(
            machine.eval_str("(when)"),
            Err(Error::SyntaxError { .. })
        ));
    }
}
