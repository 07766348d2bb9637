//! Built-in procedures.
//!
//! Most primitives are plain functions from evaluated arguments to a result
//! ([`ValueFn`]); the machine pops the call frame for them. `apply` and
//! `call/cc` take over the machine instead ([`ControlFn`]) because they
//! transfer control to another procedure.
//!
//! ## Error Handling
//!
//! - **Type Safety**: arguments of the wrong variant are rejected with a type error
//!   naming the primitive
//! - **Overflow Detection**: exact arithmetic that leaves the `i64` range is an
//!   arithmetic error, never a silent wrap or a switch to reals
//! - **Division**: exact division by zero is an arithmetic error; `/` of exact
//!   integers stays exact when the division is exact and is real otherwise

use std::rc::Rc;

use crate::heap::{Heap, Number};
use crate::library::forms::{CallCc, DirectCall};
use crate::library::Library;
use crate::object::{Arity, ControlFn, Handle, Object, Procedure, ValueFn};
use crate::printer;
use crate::vm::Vm;
use crate::{Error, Result};

pub fn register(library: &mut Library) {
    let value_procedures: &[(&'static str, Arity, ValueFn)] = &[
        // arithmetic
        ("+", Arity::at_least(0), builtin_add),
        ("-", Arity::at_least(1), builtin_sub),
        ("*", Arity::at_least(0), builtin_mul),
        ("/", Arity::at_least(1), builtin_div),
        ("quotient", Arity::exactly(2), builtin_quotient),
        ("remainder", Arity::exactly(2), builtin_remainder),
        ("modulo", Arity::exactly(2), builtin_modulo),
        ("abs", Arity::exactly(1), builtin_abs),
        // comparison
        ("=", Arity::at_least(1), builtin_num_eq),
        ("<", Arity::at_least(1), builtin_lt),
        (">", Arity::at_least(1), builtin_gt),
        ("<=", Arity::at_least(1), builtin_le),
        (">=", Arity::at_least(1), builtin_ge),
        // predicates
        ("zero?", Arity::exactly(1), builtin_zero),
        ("null?", Arity::exactly(1), builtin_null),
        ("pair?", Arity::exactly(1), builtin_pair),
        ("symbol?", Arity::exactly(1), builtin_symbol),
        ("string?", Arity::exactly(1), builtin_string),
        ("number?", Arity::exactly(1), builtin_number),
        ("integer?", Arity::exactly(1), builtin_integer),
        ("procedure?", Arity::exactly(1), builtin_procedure),
        ("vector?", Arity::exactly(1), builtin_vector_p),
        ("boolean?", Arity::exactly(1), builtin_boolean),
        ("eq?", Arity::exactly(2), builtin_eq),
        ("eqv?", Arity::exactly(2), builtin_eqv),
        ("equal?", Arity::exactly(2), builtin_equal),
        ("not", Arity::exactly(1), builtin_not),
        // pairs and lists
        ("car", Arity::exactly(1), builtin_car),
        ("cdr", Arity::exactly(1), builtin_cdr),
        ("cons", Arity::exactly(2), builtin_cons),
        ("list", Arity::at_least(0), builtin_list),
        ("length", Arity::exactly(1), builtin_length),
        ("append", Arity::at_least(0), builtin_append),
        ("reverse", Arity::exactly(1), builtin_reverse),
        ("set-car!", Arity::exactly(2), builtin_set_car),
        ("set-cdr!", Arity::exactly(2), builtin_set_cdr),
        // vectors
        ("vector", Arity::at_least(0), builtin_vector),
        ("make-vector", Arity::at_least(1), builtin_make_vector),
        ("vector-ref", Arity::exactly(2), builtin_vector_ref),
        ("vector-set!", Arity::exactly(3), builtin_vector_set),
        ("vector-length", Arity::exactly(1), builtin_vector_length),
        // errors
        ("error", Arity::at_least(0), builtin_error),
    ];
    for &(name, arity, function) in value_procedures {
        library.procedure(Procedure::new(name, arity, function));
    }

    let control: [(&'static str, Arity, ControlFn); 1] =
        [("apply", Arity::at_least(1), builtin_apply)];
    for (name, arity, function) in control {
        library.procedure(Procedure::control(name, arity, function));
    }

    library
        .procedure(
            Procedure::control("call/cc", Arity::exactly(1), builtin_call_cc)
                .with_syntax(Rc::new(CallCc)),
        )
        .alias("call-with-current-continuation", "call/cc")
        .procedure(
            Procedure::control("display", Arity::exactly(1), builtin_display)
                .with_direct(direct_display)
                .with_syntax(Rc::new(DirectCall {
                    name: "display",
                    operands: 1,
                })),
        )
        .procedure(
            Procedure::control("write", Arity::exactly(1), builtin_write)
                .with_direct(direct_write)
                .with_syntax(Rc::new(DirectCall {
                    name: "write",
                    operands: 1,
                })),
        )
        .procedure(
            Procedure::control("newline", Arity::exactly(0), builtin_newline)
                .with_direct(direct_newline)
                .with_syntax(Rc::new(DirectCall {
                    name: "newline",
                    operands: 0,
                })),
        );
}

//
// Argument helpers
//

fn number(heap: &Heap, name: &str, value: Handle) -> Result<Number> {
    heap.number(value).ok_or_else(|| {
        Error::TypeError(format!(
            "{name}: expected a number, got {}",
            heap.type_name(value)
        ))
    })
}

fn integer(heap: &Heap, name: &str, value: Handle) -> Result<i64> {
    match value {
        Handle::Fixnum(n) => Ok(n),
        _ => Err(Error::TypeError(format!(
            "{name}: expected an exact integer, got {}",
            heap.type_name(value)
        ))),
    }
}

fn index(heap: &Heap, name: &str, value: Handle) -> Result<usize> {
    let n = integer(heap, name, value)?;
    usize::try_from(n).map_err(|_| {
        Error::TypeError(format!("{name}: expected a non-negative index, got {n}"))
    })
}

fn pair(heap: &Heap, name: &str, value: Handle) -> Result<(Handle, Handle)> {
    heap.uncons(value).map_err(|_| {
        Error::TypeError(format!(
            "{name}: expected a pair, got {}",
            heap.type_name(value)
        ))
    })
}

fn proper_list(heap: &Heap, name: &str, value: Handle) -> Result<Vec<Handle>> {
    heap.list_to_vec(value).ok_or_else(|| {
        Error::TypeError(format!(
            "{name}: expected a proper list, got {}",
            printer::write(heap, value)
        ))
    })
}

fn vector<'h>(heap: &'h Heap, name: &str, value: Handle) -> Result<&'h [Handle]> {
    heap.vector(value).map_err(|_| {
        Error::TypeError(format!(
            "{name}: expected a vector, got {}",
            heap.type_name(value)
        ))
    })
}

fn to_handle(heap: &mut Heap, number: Number) -> Result<Handle> {
    match number {
        Number::Exact(n) => Ok(Handle::Fixnum(n)),
        Number::Inexact(r) => heap.real(r),
    }
}

//
// Arithmetic
//

fn exact(result: Option<i64>, operation: &str) -> Result<Number> {
    result
        .map(Number::Exact)
        .ok_or_else(|| Error::ArithmeticError(format!("Integer overflow in {operation}")))
}

fn add(a: Number, b: Number) -> Result<Number> {
    match (a, b) {
        (Number::Exact(x), Number::Exact(y)) => exact(x.checked_add(y), "addition"),
        _ => Ok(Number::Inexact(a.to_f64() + b.to_f64())),
    }
}

fn sub(a: Number, b: Number) -> Result<Number> {
    match (a, b) {
        (Number::Exact(x), Number::Exact(y)) => exact(x.checked_sub(y), "subtraction"),
        _ => Ok(Number::Inexact(a.to_f64() - b.to_f64())),
    }
}

fn mul(a: Number, b: Number) -> Result<Number> {
    match (a, b) {
        (Number::Exact(x), Number::Exact(y)) => exact(x.checked_mul(y), "multiplication"),
        _ => Ok(Number::Inexact(a.to_f64() * b.to_f64())),
    }
}

fn div(a: Number, b: Number) -> Result<Number> {
    match (a, b) {
        (Number::Exact(_), Number::Exact(0)) => {
            Err(Error::ArithmeticError("Division by zero".into()))
        }
        (Number::Exact(x), Number::Exact(y)) if x.checked_rem(y).is_none_or(|r| r == 0) => {
            exact(x.checked_div(y), "division")
        }
        _ => Ok(Number::Inexact(a.to_f64() / b.to_f64())),
    }
}

fn fold(
    heap: &mut Heap,
    name: &str,
    start: Number,
    args: &[Handle],
    op: fn(Number, Number) -> Result<Number>,
) -> Result<Handle> {
    let mut total = start;
    for &arg in args {
        total = op(total, number(heap, name, arg)?)?;
    }
    to_handle(heap, total)
}

fn builtin_add(heap: &mut Heap, args: &[Handle]) -> Result<Handle> {
    fold(heap, "+", Number::Exact(0), args, add)
}

fn builtin_mul(heap: &mut Heap, args: &[Handle]) -> Result<Handle> {
    fold(heap, "*", Number::Exact(1), args, mul)
}

fn builtin_sub(heap: &mut Heap, args: &[Handle]) -> Result<Handle> {
    match args {
        [only] => {
            let negated = match number(heap, "-", *only)? {
                Number::Exact(n) => exact(n.checked_neg(), "negation")?,
                Number::Inexact(r) => Number::Inexact(-r),
            };
            to_handle(heap, negated)
        }
        [first, rest @ ..] => {
            let first = number(heap, "-", *first)?;
            fold(heap, "-", first, rest, sub)
        }
        [] => Err(Error::arity_error_with_expr(Arity::at_least(1), 0, "-")),
    }
}

fn builtin_div(heap: &mut Heap, args: &[Handle]) -> Result<Handle> {
    match args {
        [only] => {
            let divisor = number(heap, "/", *only)?;
            let result = div(Number::Exact(1), divisor)?;
            to_handle(heap, result)
        }
        [first, rest @ ..] => {
            let first = number(heap, "/", *first)?;
            fold(heap, "/", first, rest, div)
        }
        [] => Err(Error::arity_error_with_expr(Arity::at_least(1), 0, "/")),
    }
}

/// Both operands as exact integers, rejecting a zero divisor
fn integer_division_operands(heap: &Heap, name: &str, args: &[Handle]) -> Result<(i64, i64)> {
    let [a, b] = args else {
        return Err(Error::arity_error_with_expr(Arity::exactly(2), args.len(), name));
    };
    let a = integer(heap, name, *a)?;
    let b = integer(heap, name, *b)?;
    if b == 0 {
        return Err(Error::ArithmeticError("Division by zero".into()));
    }
    Ok((a, b))
}

fn builtin_quotient(heap: &mut Heap, args: &[Handle]) -> Result<Handle> {
    let (a, b) = integer_division_operands(heap, "quotient", args)?;
    a.checked_div(b)
        .map(Handle::Fixnum)
        .ok_or_else(|| Error::ArithmeticError("Integer overflow in quotient".into()))
}

fn builtin_remainder(heap: &mut Heap, args: &[Handle]) -> Result<Handle> {
    let (a, b) = integer_division_operands(heap, "remainder", args)?;
    a.checked_rem(b)
        .map(Handle::Fixnum)
        .ok_or_else(|| Error::ArithmeticError("Integer overflow in remainder".into()))
}

/// Result has the sign of the divisor
fn builtin_modulo(heap: &mut Heap, args: &[Handle]) -> Result<Handle> {
    let (a, b) = integer_division_operands(heap, "modulo", args)?;
    let r = a
        .checked_rem(b)
        .ok_or_else(|| Error::ArithmeticError("Integer overflow in modulo".into()))?;
    Ok(Handle::Fixnum(if r != 0 && (r < 0) != (b < 0) { r + b } else { r }))
}

fn builtin_abs(heap: &mut Heap, args: &[Handle]) -> Result<Handle> {
    let result = match number(heap, "abs", args[0])? {
        Number::Exact(n) => exact(n.checked_abs(), "abs")?,
        Number::Inexact(r) => Number::Inexact(r.abs()),
    };
    to_handle(heap, result)
}

// Macro to generate numeric comparison functions
macro_rules! numeric_comparison {
    ($name:ident, $op:tt, $op_str:expr) => {
        fn $name(heap: &mut Heap, args: &[Handle]) -> Result<Handle> {
            let Some((first, rest)) = args.split_first() else {
                return Err(Error::arity_error_with_expr(Arity::at_least(1), 0, $op_str));
            };
            // Chain comparisons: every adjacent pair must satisfy the comparison,
            // and every argument must be a number even after the result is known.
            let mut prev = number(heap, $op_str, *first)?;
            let mut holds = true;
            for &arg in rest {
                let current = number(heap, $op_str, arg)?;
                holds &= match (prev, current) {
                    (Number::Exact(a), Number::Exact(b)) => a $op b,
                    (a, b) => a.to_f64() $op b.to_f64(),
                };
                prev = current;
            }
            Ok(Handle::from_bool(holds))
        }
    };
}

numeric_comparison!(builtin_num_eq, ==, "=");
numeric_comparison!(builtin_lt, <, "<");
numeric_comparison!(builtin_gt, >, ">");
numeric_comparison!(builtin_le, <=, "<=");
numeric_comparison!(builtin_ge, >=, ">=");

//
// Predicates
//

fn builtin_zero(heap: &mut Heap, args: &[Handle]) -> Result<Handle> {
    let zero = match number(heap, "zero?", args[0])? {
        Number::Exact(n) => n == 0,
        Number::Inexact(r) => r == 0.0,
    };
    Ok(Handle::from_bool(zero))
}

fn builtin_null(_: &mut Heap, args: &[Handle]) -> Result<Handle> {
    Ok(Handle::from_bool(args[0].is_nil()))
}

fn builtin_pair(heap: &mut Heap, args: &[Handle]) -> Result<Handle> {
    Ok(Handle::from_bool(heap.is_pair(args[0])))
}

fn builtin_symbol(heap: &mut Heap, args: &[Handle]) -> Result<Handle> {
    Ok(Handle::from_bool(heap.is_symbol(args[0])))
}

fn builtin_string(heap: &mut Heap, args: &[Handle]) -> Result<Handle> {
    Ok(Handle::from_bool(matches!(
        heap.get(args[0]),
        Ok(Object::String(_))
    )))
}

fn builtin_number(heap: &mut Heap, args: &[Handle]) -> Result<Handle> {
    Ok(Handle::from_bool(heap.number(args[0]).is_some()))
}

fn builtin_integer(heap: &mut Heap, args: &[Handle]) -> Result<Handle> {
    let integral = match heap.number(args[0]) {
        Some(Number::Exact(_)) => true,
        Some(Number::Inexact(r)) => r.is_finite() && r.fract() == 0.0,
        None => false,
    };
    Ok(Handle::from_bool(integral))
}

fn builtin_procedure(heap: &mut Heap, args: &[Handle]) -> Result<Handle> {
    Ok(Handle::from_bool(matches!(
        heap.get(args[0]),
        Ok(Object::Closure(_) | Object::Procedure(_))
    )))
}

fn builtin_vector_p(heap: &mut Heap, args: &[Handle]) -> Result<Handle> {
    Ok(Handle::from_bool(matches!(
        heap.get(args[0]),
        Ok(Object::Vector(_))
    )))
}

fn builtin_boolean(_: &mut Heap, args: &[Handle]) -> Result<Handle> {
    Ok(Handle::from_bool(
        args[0] == Handle::TRUE || args[0] == Handle::FALSE,
    ))
}

fn builtin_not(_: &mut Heap, args: &[Handle]) -> Result<Handle> {
    Ok(Handle::from_bool(!args[0].is_truthy()))
}

fn builtin_eq(_: &mut Heap, args: &[Handle]) -> Result<Handle> {
    Ok(Handle::from_bool(args[0] == args[1]))
}

/// Identity, plus numeric equality of reals and equality of characters
pub fn eqv(heap: &Heap, a: Handle, b: Handle) -> bool {
    if a == b {
        return true;
    }
    match (heap.get(a), heap.get(b)) {
        (Ok(Object::Real(x)), Ok(Object::Real(y))) => x == y,
        (Ok(Object::Char(x)), Ok(Object::Char(y))) => x == y,
        _ => false,
    }
}

/// Structural equality of pairs, vectors, strings and bytevectors
pub fn equal(heap: &Heap, a: Handle, b: Handle) -> bool {
    let mut pending = vec![(a, b)];
    // Cyclic structures compare unequal instead of looping forever
    let mut budget = heap.len().saturating_mul(2);
    while let Some((x, y)) = pending.pop() {
        if budget == 0 {
            return false;
        }
        budget -= 1;
        if eqv(heap, x, y) {
            continue;
        }
        if let (Ok((xa, xd)), Ok((ya, yd))) = (heap.uncons(x), heap.uncons(y)) {
            pending.push((xd, yd));
            pending.push((xa, ya));
            continue;
        }
        match (heap.get(x), heap.get(y)) {
            (Ok(Object::String(s)), Ok(Object::String(t))) if s == t => {}
            (Ok(Object::ByteVector(s)), Ok(Object::ByteVector(t))) if s == t => {}
            (Ok(Object::Vector(v)), Ok(Object::Vector(w))) if v.len() == w.len() => {
                pending.extend(v.iter().copied().zip(w.iter().copied()).rev());
            }
            _ => return false,
        }
    }
    true
}

fn builtin_eqv(heap: &mut Heap, args: &[Handle]) -> Result<Handle> {
    Ok(Handle::from_bool(eqv(heap, args[0], args[1])))
}

fn builtin_equal(heap: &mut Heap, args: &[Handle]) -> Result<Handle> {
    Ok(Handle::from_bool(equal(heap, args[0], args[1])))
}

//
// Pairs and lists
//

fn builtin_car(heap: &mut Heap, args: &[Handle]) -> Result<Handle> {
    pair(heap, "car", args[0]).map(|(car, _)| car)
}

fn builtin_cdr(heap: &mut Heap, args: &[Handle]) -> Result<Handle> {
    pair(heap, "cdr", args[0]).map(|(_, cdr)| cdr)
}

fn builtin_cons(heap: &mut Heap, args: &[Handle]) -> Result<Handle> {
    heap.cons(args[0], args[1])
}

fn builtin_list(heap: &mut Heap, args: &[Handle]) -> Result<Handle> {
    heap.list_mut(args)
}

fn builtin_length(heap: &mut Heap, args: &[Handle]) -> Result<Handle> {
    let items = proper_list(heap, "length", args[0])?;
    i64::try_from(items.len())
        .map(Handle::Fixnum)
        .map_err(|_| Error::ArithmeticError("Integer overflow in length".into()))
}

/// Copies every list but the last, which becomes the shared tail
fn builtin_append(heap: &mut Heap, args: &[Handle]) -> Result<Handle> {
    let Some((&last, init)) = args.split_last() else {
        return Ok(Handle::NIL);
    };
    let mut result = last;
    for &list in init.iter().rev() {
        let items = proper_list(heap, "append", list)?;
        for &item in items.iter().rev() {
            result = heap.cons(item, result)?;
        }
    }
    Ok(result)
}

fn builtin_reverse(heap: &mut Heap, args: &[Handle]) -> Result<Handle> {
    let items = proper_list(heap, "reverse", args[0])?;
    items
        .into_iter()
        .try_fold(Handle::NIL, |tail, item| heap.cons(item, tail))
}

fn builtin_set_car(heap: &mut Heap, args: &[Handle]) -> Result<Handle> {
    heap.set_car(args[0], args[1])?;
    Ok(Handle::UNDEFINED)
}

fn builtin_set_cdr(heap: &mut Heap, args: &[Handle]) -> Result<Handle> {
    heap.set_cdr(args[0], args[1])?;
    Ok(Handle::UNDEFINED)
}

//
// Vectors
//

fn builtin_vector(heap: &mut Heap, args: &[Handle]) -> Result<Handle> {
    heap.allocate(Object::Vector(args.to_vec()))
}

fn builtin_make_vector(heap: &mut Heap, args: &[Handle]) -> Result<Handle> {
    let (size, fill) = match args {
        [size] => (*size, Handle::UNDEFINED),
        [size, fill] => (*size, *fill),
        _ => {
            return Err(Error::arity_error_with_expr(
                Arity::at_least(1),
                args.len(),
                "make-vector",
            ));
        }
    };
    let size = index(heap, "make-vector", size)?;
    if size > heap.capacity() {
        return Err(Error::RuntimeError(format!(
            "make-vector: size {size} exceeds the object store capacity"
        )));
    }
    heap.allocate(Object::Vector(vec![fill; size]))
}

fn builtin_vector_ref(heap: &mut Heap, args: &[Handle]) -> Result<Handle> {
    let items = vector(heap, "vector-ref", args[0])?;
    let k = index(heap, "vector-ref", args[1])?;
    items.get(k).copied().ok_or_else(|| {
        Error::RuntimeError(format!(
            "vector-ref: index {k} out of range for length {}",
            items.len()
        ))
    })
}

fn builtin_vector_set(heap: &mut Heap, args: &[Handle]) -> Result<Handle> {
    vector(heap, "vector-set!", args[0])?;
    let k = index(heap, "vector-set!", args[1])?;
    heap.vector_set(args[0], k, args[2])?;
    Ok(Handle::UNDEFINED)
}

fn builtin_vector_length(heap: &mut Heap, args: &[Handle]) -> Result<Handle> {
    let items = vector(heap, "vector-length", args[0])?;
    i64::try_from(items.len())
        .map(Handle::Fixnum)
        .map_err(|_| Error::ArithmeticError("Integer overflow in vector-length".into()))
}

/// Message parts are rendered with `display` and joined by spaces
fn builtin_error(heap: &mut Heap, args: &[Handle]) -> Result<Handle> {
    let parts: Vec<String> = args.iter().map(|&arg| printer::display(heap, arg)).collect();
    let message = if parts.is_empty() {
        "Error".to_string()
    } else {
        parts.join(" ")
    };
    Err(Error::RuntimeError(message))
}

//
// Control
//

/// `(apply f a ... list)`: replace the call with `(f a ... list-items...)`
fn builtin_apply(vm: &mut Vm<'_>, argc: usize) -> Result<()> {
    let procedure = vm.argument(0)?;
    let mut args = Vec::with_capacity(argc);
    if argc > 1 {
        for i in 1..argc - 1 {
            args.push(vm.argument(i)?);
        }
        let spread = vm.argument(argc - 1)?;
        args.extend(proper_list(vm.heap(), "apply", spread)?);
    }
    vm.pop(argc)?;
    for &arg in args.iter().rev() {
        vm.push(arg)?;
    }
    vm.set_accumulator(procedure);
    vm.apply(args.len())
}

/// Call the receiver with a continuation that returns to this call's caller
fn builtin_call_cc(vm: &mut Vm<'_>, argc: usize) -> Result<()> {
    let receiver = vm.argument(0)?;
    vm.pop(argc)?;
    let continuation = vm.capture_continuation(0)?;
    vm.push(continuation)?;
    vm.set_accumulator(receiver);
    vm.apply(1)
}

fn builtin_display(vm: &mut Vm<'_>, argc: usize) -> Result<()> {
    let value = vm.argument(0)?;
    direct_display(vm, value)?;
    vm.proc_return(Handle::UNDEFINED, argc)
}

fn builtin_write(vm: &mut Vm<'_>, argc: usize) -> Result<()> {
    let value = vm.argument(0)?;
    direct_write(vm, value)?;
    vm.proc_return(Handle::UNDEFINED, argc)
}

fn builtin_newline(vm: &mut Vm<'_>, argc: usize) -> Result<()> {
    direct_newline(vm, Handle::UNDEFINED)?;
    vm.proc_return(Handle::UNDEFINED, argc)
}

fn direct_display(vm: &mut Vm<'_>, value: Handle) -> Result<Handle> {
    let text = printer::display(vm.heap(), value);
    vm.print(&text);
    Ok(Handle::UNDEFINED)
}

fn direct_write(vm: &mut Vm<'_>, value: Handle) -> Result<Handle> {
    let text = printer::write(vm.heap(), value);
    vm.print(&text);
    Ok(Handle::UNDEFINED)
}

fn direct_newline(vm: &mut Vm<'_>, _: Handle) -> Result<Handle> {
    vm.print("\n");
    Ok(Handle::UNDEFINED)
}
