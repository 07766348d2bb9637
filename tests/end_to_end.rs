#![cfg(feature = "reader")]
#![expect(clippy::unwrap_used)] // test code OK

use stackscheme::{Config, Error, Machine, run};

/// Test result variants for whole-program evaluation
///
/// Every program runs on a fresh machine with the default configuration;
/// `Success` compares against the `write` form of the final value.
#[derive(Debug, Clone)]
enum TestResult {
    Success(&'static str),       // Evaluation should succeed with this written value
    SpecificError(&'static str), // Evaluation should fail with error containing this string
    Error,                       // Evaluation should fail (any error, any phase)
}
use TestResult::*;

fn run_tests(test_cases: Vec<(&str, TestResult)>) {
    for (i, (input, expected)) in test_cases.iter().enumerate() {
        let test_id = format!("End-to-end test #{}", i + 1);
        match (run(input), expected) {
            (Ok(actual), Success(text)) => {
                assert_eq!(actual, *text, "{test_id}: {input}");
            }
            (Err(_), Error) => {}
            (Err(err), SpecificError(fragment)) => {
                let message = err.to_string();
                assert!(
                    message.contains(fragment),
                    "{test_id}: error '{message}' should contain '{fragment}'"
                );
            }
            (Ok(actual), Error | SpecificError(_)) => {
                panic!("{test_id}: expected error for {input}, got {actual}");
            }
            (Err(err), Success(_)) => {
                panic!("{test_id}: expected success for {input}, got error {err}");
            }
        }
    }
}

#[test]
fn test_reference_scenarios() {
    run_tests(vec![
        ("(+ 1 2)", Success("3")),
        ("((lambda (x) (set! x (+ x 1)) x) 5)", Success("6")),
        ("(call/cc (lambda (k) (+ 1 (k 10))))", Success("10")),
        (
            "(define fib (lambda (n) (if (< n 2) n (+ (fib (- n 1)) (fib (- n 2)))))) (fib 10)",
            Success("55"),
        ),
        ("((lambda (x . y) (list x y)) 1 2 3)", Success("(1 (2 3))")),
    ]);
}

#[test]
fn test_procedures_and_arguments() {
    run_tests(vec![
        // rest parameters
        ("((lambda args args))", Success("()")),
        ("((lambda args args) 1 2)", Success("(1 2)")),
        ("((lambda (a b . c) c) 1 2)", Success("()")),
        ("((lambda (a b . c) (list a b c)) 1 2 3 4)", Success("(1 2 (3 4))")),
        ("(define (f . xs) (set! xs (cons 0 xs)) xs) (f 1)", Success("(0 1)")),
        // arity
        ("((lambda (x) x))", SpecificError("expected exactly 1 arguments but got 0")),
        ("((lambda (x . y) x))", SpecificError("at least 1")),
        ("(car 1 2)", SpecificError("car: expected exactly 1")),
        // application of non-procedures
        ("(5 1)", SpecificError("non-procedure")),
        ("('a)", Error),
        // apply
        ("(apply + 1 2 '(3 4))", Success("10")),
        ("(apply list '())", Success("()")),
        ("(apply (lambda (a . b) b) '(1 2 3))", Success("(2 3)")),
        ("(apply +)", Success("0")),
        ("(apply + 1 2)", SpecificError("expected a proper list")),
        ("(define (g x) (apply + x '(1))) (g 2)", Success("3")),
    ]);
}

#[test]
fn test_closures() {
    run_tests(vec![
        // captured by value
        ("(let ((x 1)) (let ((f (lambda () x))) (f)))", Success("1")),
        // assigned free variables share one box
        (
            "(define (counter) (let ((n 0)) (lambda () (set! n (+ n 1)) n))) \
             (define c (counter)) (c) (c) (c)",
            Success("3"),
        ),
        (
            "(define (counter) (let ((n 0)) (lambda () (set! n (+ n 1)) n))) \
             (define a (counter)) (define b (counter)) (a) (a) (list (a) (b))",
            Success("(3 1)"),
        ),
        (
            "(let ((x 1)) (let ((get (lambda () x)) (put (lambda (v) (set! x v)))) (put 5) (get)))",
            Success("5"),
        ),
        ("(let ((x 1)) (let ((get (lambda () x))) (set! x 2) (get)))", Success("2")),
        // closures capturing closures
        (
            "(define (compose f g) (lambda (x) (f (g x)))) \
             ((compose (lambda (x) (* x 2)) (lambda (x) (+ x 1))) 5)",
            Success("12"),
        ),
        // mutual recursion through internal definitions
        (
            "(define (parity n) \
               (define (ev? n) (if (= n 0) #t (od? (- n 1)))) \
               (define (od? n) (if (= n 0) #f (ev? (- n 1)))) \
               (if (ev? n) 'even 'odd)) \
             (list (parity 10) (parity 7))",
            Success("(even odd)"),
        ),
        // a parameter shadows a library procedure
        ("((lambda (car) (car 1)) (lambda (x) (+ x 1)))", Success("2")),
        // a parameter shadows a special form name
        ("((lambda (if) if) 4)", Success("4")),
    ]);
}

#[test]
fn test_continuations() {
    run_tests(vec![
        ("(+ 1 (call/cc (lambda (k) 2)))", Success("3")),
        ("(+ 1 (call/cc (lambda (k) (k 2) 100)))", Success("3")),
        (
            "(call-with-current-continuation (lambda (k) (+ 1 (k 41))))",
            Success("41"),
        ),
        // call/cc in tail position returns from the enclosing procedure
        (
            "(define (f x) (call/cc (lambda (k) (k (* x 2))))) (+ 1 (f 5))",
            Success("11"),
        ),
        // call/cc as a first-class procedure
        ("(define cc call/cc) (+ 1 (cc (lambda (k) (k 41))))", Success("42")),
        ("(apply call/cc (list (lambda (k) (k 7))))", Success("7")),
        // escaping from a loop
        (
            "(define (find-first pred lst) \
               (call/cc (lambda (return) \
                 (let loop ((l lst)) \
                   (cond ((null? l) #f) \
                         ((pred (car l)) (return (car l))) \
                         (else (loop (cdr l)))))))) \
             (find-first (lambda (x) (> x 2)) '(1 2 3 4))",
            Success("3"),
        ),
        // re-entry: the snapshot is restored, boxes keep their new values
        (
            "(define k #f) (define n 0) \
             (define v (call/cc (lambda (c) (set! k c) 0))) \
             (set! n (+ n 1)) \
             (if (< v 3) (k (+ v 1)) (list v n))",
            Success("(3 4)"),
        ),
        // multi-shot from inside nested calls
        (
            "(define r '()) (define k #f) \
             (set! r (append r (list (+ 100 (call/cc (lambda (c) (set! k c) 1)))))) \
             (if (< (length r) 3) (k (length r)) r)",
            Success("(101 101 102)"),
        ),
        ("(call/cc 5)", SpecificError("non-procedure")),
        ("((call/cc (lambda (k) k)) 1 2)", Error),
    ]);
}

#[test]
fn test_library_forms() {
    run_tests(vec![
        ("(let loop ((i 0) (acc '())) (if (= i 3) acc (loop (+ i 1) (cons i acc))))", Success("(2 1 0)")),
        ("(let* ((x 1) (y (+ x 1))) (* x y))", Success("2")),
        ("(letrec ((even? (lambda (n) (if (= n 0) #t (odd? (- n 1))))) (odd? (lambda (n) (if (= n 0) #f (even? (- n 1)))))) (even? 100))", Success("#t")),
        ("(and 1 2 3)", Success("3")),
        ("(and 1 #f 3)", Success("#f")),
        ("(or #f 2)", Success("2")),
        ("(or)", Success("#f")),
        ("(when (> 1 0) 'yes)", Success("yes")),
        ("(unless (> 1 0) 'yes)", Success("#<undefined>")),
        ("(cond ((assv 1 '()) 1) (else 2))", SpecificError("Unbound variable: assv")),
        ("(cond (#f 1) ((+ 1 1) => (lambda (x) (* x 10))))", Success("20")),
        ("(quote (1 . 2))", Success("(1 . 2)")),
        ("'#(1 (2))", Success("#(1 (2))")),
        ("(begin)", Success("#<undefined>")),
        ("(if #f #f)", Success("#<undefined>")),
        ("(if '() 'truthy 'falsy)", Success("truthy")),
    ]);
}

#[test]
fn test_data_and_arithmetic() {
    run_tests(vec![
        ("(/ 12 4)", Success("3")),
        ("(/ 1 2)", Success("0.5")),
        ("(+ 1.5 1.5)", Success("3.0")),
        ("(/ 1.0 0)", Success("+inf.0")),
        ("(/ 1 0)", SpecificError("Division by zero")),
        ("(* 9223372036854775807 2)", SpecificError("Integer overflow")),
        ("(modulo -7 2)", Success("1")),
        ("(equal? (list 1 (vector 2 \"x\")) '(1 #(2 \"x\")))", Success("#t")),
        ("(eq? '() '())", Success("#t")),
        ("(eqv? 2.0 2.0)", Success("#t")),
        ("(let ((v (make-vector 2 0))) (vector-set! v 0 'a) v)", Success("#(a 0)")),
        ("(vector-ref (vector 1 2) 2)", SpecificError("out of range")),
        ("(reverse '(1 2 3))", Success("(3 2 1)")),
        ("(length '(1 2 . 3))", SpecificError("expected a proper list")),
        ("(let ((p (cons 1 2))) (set-cdr! p 3) p)", Success("(1 . 3)")),
        ("(set-car! '(1 2) 3)", SpecificError("Type error")),
        ("(car '())", SpecificError("car: expected a pair")),
        ("(error \"bad value:\" 42)", SpecificError("bad value: 42")),
        ("(+ 'a 1)", SpecificError("+: expected a number")),
    ]);
}

#[test]
fn test_compile_errors() {
    run_tests(vec![
        ("undefined-name", SpecificError("Unbound variable: undefined-name")),
        ("(set! car 1)", SpecificError("cannot assign a library binding")),
        ("(set! nowhere 1)", SpecificError("Unbound variable: nowhere")),
        ("(lambda (x x) x)", SpecificError("duplicate parameter")),
        ("(lambda (1) 1)", SpecificError("parameter must be a symbol")),
        ("(if)", SpecificError("SyntaxError")),
        ("(quote 1 2)", SpecificError("quote expects exactly one datum")),
        ("(+ 1 (define x 2))", SpecificError("definition used as an expression")),
        ("let", SpecificError("macro used as a value")),
        ("(1 2", SpecificError("ParseError")),
    ]);
}

/// `(define x <value>) (cond ((= x 0) 0) ((= x 1) 1) ...)` with `clauses` clauses
fn long_cond(value: usize, clauses: usize) -> String {
    let body: String = (0..clauses).map(|i| format!(" ((= x {i}) {i})")).collect();
    format!("(define x {value}) (cond{body})")
}

#[test]
fn test_expansion_depth_is_limited() {
    let config = Config::default().with_heap_capacity(1_000_000);

    // a flat cond expands into one nested `if` per clause
    let mut machine = Machine::new(config).unwrap();
    let err = machine.eval_str(&long_cond(0, 10_000)).unwrap_err();
    assert!(
        matches!(&err, Error::SyntaxError { message, .. } if message.contains("too deeply nested")),
        "unexpected error {err}"
    );

    let mut machine = Machine::new(config).unwrap();
    let value = machine.eval_str(&long_cond(150, 200)).unwrap();
    assert_eq!(machine.write(value), "150");
}

#[test]
fn test_output_and_direct_calls() {
    let mut machine = Machine::new(Config::default()).unwrap();
    let value = machine
        .eval_str(
            "(define (show . items) (for-each-item items)) \
             (define (for-each-item items) \
               (if (null? items) 'done \
                   (begin (display (car items)) (newline) (for-each-item (cdr items))))) \
             (write \"q\") (show 1 \"two\" #\\3)",
        )
        .unwrap();
    assert_eq!(machine.write(value), "done");
    assert_eq!(machine.output(), "\"q\"1\ntwo\n3\n");

    // as values, the output procedures are ordinary procedures
    let mut machine = Machine::new(Config::default()).unwrap();
    machine.eval_str("(apply display '(7)) (let ((w write)) (w 'x))").unwrap();
    assert_eq!(machine.output(), "7x");
}

#[test]
fn test_tail_calls_run_in_constant_stack() {
    let config = Config::default().with_stack_capacity(64);
    let mut machine = Machine::new(config).unwrap();
    let value = machine
        .eval_str(
            "(define (count-down n) (if (= n 0) 'done (count-down (- n 1)))) \
             (count-down 100000)",
        )
        .unwrap();
    assert_eq!(machine.write(value), "done");
    assert!(
        machine.stack_high_water() < 32,
        "high water {}",
        machine.stack_high_water()
    );

    // mutual tail recursion through `cond` and `and`
    let mut machine = Machine::new(config).unwrap();
    let value = machine
        .eval_str(
            "(define (ev? n) (cond ((= n 0) #t) (else (od? (- n 1))))) \
             (define (od? n) (and (not (= n 0)) (ev? (- n 1)))) \
             (ev? 50001)",
        )
        .unwrap();
    assert_eq!(machine.write(value), "#f");
    assert!(machine.stack_high_water() < 32);
}

#[test]
fn test_deep_recursion_overflows_the_stack() {
    let mut machine = Machine::new(Config::default()).unwrap();
    let result = machine.eval_str(
        "(define (deep n) (if (= n 0) 0 (+ 1 (deep (- n 1))))) (deep 100000)",
    );
    assert_eq!(
        result,
        Err(Error::StackOverflow {
            capacity: stackscheme::DEFAULT_STACK_CAPACITY
        })
    );

    // within the stack's reach the same program succeeds
    let mut machine = Machine::new(Config::default()).unwrap();
    let value = machine
        .eval_str("(define (deep n) (if (= n 0) 0 (+ 1 (deep (- n 1))))) (deep 100)")
        .unwrap();
    assert_eq!(machine.write(value), "100");
}

#[test]
fn test_object_store_capacity() {
    assert!(matches!(
        Machine::new(Config::default().with_heap_capacity(10)),
        Err(Error::CapacityError { capacity: 10 })
    ));

    let mut machine = Machine::new(Config::default().with_heap_capacity(2_000)).unwrap();
    let result = machine.eval_str(
        "(define (build n acc) (if (= n 0) acc (build (- n 1) (cons n acc)))) (build 5000 '())",
    );
    assert_eq!(result, Err(Error::CapacityError { capacity: 2_000 }));
}

#[test]
fn test_eval_or_error_values() {
    let mut machine = Machine::new(Config::default()).unwrap();
    let program = machine.read("(vector-ref (vector) 0)").unwrap();
    let value = machine.eval_or_error(program).unwrap();
    assert!(machine.write(value).starts_with("#<error runtime-error:"));
}
