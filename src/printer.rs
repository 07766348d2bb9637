//! External representations of values.
//!
//! [`write`] produces text the reader can read back for data (strings are
//! quoted and escaped, characters use `#\` syntax); [`display`] is the
//! human-readable form used by the `display` primitive.

use std::fmt::Write as _;

use crate::heap::Heap;
use crate::object::{Constant, Handle, Object};

/// Nesting beyond this prints as `...`, which also bounds cyclic structures
const MAX_PRINT_DEPTH: usize = 128;

#[derive(Clone, Copy, PartialEq)]
enum Style {
    Write,
    Display,
}

/// Machine-readable representation
pub fn write(heap: &Heap, value: Handle) -> String {
    let mut out = String::new();
    print(heap, value, Style::Write, 0, &mut out);
    out
}

/// Human-readable representation
pub fn display(heap: &Heap, value: Handle) -> String {
    let mut out = String::new();
    print(heap, value, Style::Display, 0, &mut out);
    out
}

fn print(heap: &Heap, value: Handle, style: Style, depth: usize, out: &mut String) {
    if depth > MAX_PRINT_DEPTH {
        out.push_str("...");
        return;
    }
    let object = match value {
        Handle::Fixnum(n) => {
            let _ = write!(out, "{n}");
            return;
        }
        Handle::Object(index) => match heap.get(value) {
            Ok(object) => object,
            Err(_) => {
                let _ = write!(out, "#<invalid {index}>");
                return;
            }
        },
    };
    match object {
        Object::Nil => out.push_str("()"),
        Object::Pair(..) | Object::MutablePair { .. } => {
            let (items, tail) = heap.list_parts(value);
            out.push('(');
            for (i, &item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(' ');
                }
                print(heap, item, style, depth + 1, out);
            }
            if !tail.is_nil() {
                out.push_str(" . ");
                print(heap, tail, style, depth + 1, out);
            }
            out.push(')');
        }
        Object::Symbol(_) => out.push_str(heap.symbol_name(value).unwrap_or("#<symbol>")),
        Object::String(s) => match style {
            Style::Display => out.push_str(s),
            Style::Write => write_string(s, out),
        },
        Object::Char(c) => match style {
            Style::Display => out.push(*c),
            Style::Write => match c {
                ' ' => out.push_str("#\\space"),
                '\n' => out.push_str("#\\newline"),
                '\t' => out.push_str("#\\tab"),
                c => {
                    let _ = write!(out, "#\\{c}");
                }
            },
        },
        Object::Real(r) => {
            let _ = write!(out, "{r:?}");
        }
        Object::Vector(items) => {
            out.push_str("#(");
            for (i, &item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(' ');
                }
                print(heap, item, style, depth + 1, out);
            }
            out.push(')');
        }
        Object::ByteVector(bytes) => {
            out.push_str("#u8(");
            for (i, byte) in bytes.iter().enumerate() {
                if i > 0 {
                    out.push(' ');
                }
                let _ = write!(out, "{byte}");
            }
            out.push(')');
        }
        Object::Closure(_) => out.push_str("#<closure>"),
        Object::Box(_) => out.push_str("#<box>"),
        Object::Procedure(procedure) => {
            let _ = write!(out, "#<procedure {}>", procedure.name);
        }
        Object::Syntax(syntax) => {
            let _ = write!(out, "#<syntax {}>", syntax.name());
        }
        Object::Macro(transformer) => {
            let _ = write!(out, "#<macro {}>", transformer.name());
        }
        Object::Error { kind, message } => {
            let _ = write!(out, "#<error {kind}: {message}>");
        }
        Object::Instruction(instruction) => {
            let _ = write!(out, "#<instruction {}>", instruction.name());
        }
        Object::Constant(constant) => out.push_str(match constant {
            Constant::True => "#t",
            Constant::False => "#f",
            Constant::Undefined => "#<undefined>",
            Constant::NaN => "+nan.0",
            Constant::PositiveInfinity => "+inf.0",
            Constant::NegativeInfinity => "-inf.0",
        }),
    }
}

fn write_string(s: &str, out: &mut String) {
    out.push('"');
    for ch in s.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    out.push('"');
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;
    use crate::object::Instruction;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_atoms() {
        let mut heap = Heap::new(64);
        let text = heap.string("a \"quoted\"\nline").unwrap();
        let ch = heap.allocate(Object::Char('x')).unwrap();
        let space = heap.allocate(Object::Char(' ')).unwrap();
        let real = heap.real(2.5).unwrap();
        let whole = heap.real(3.0).unwrap();
        let symbol = heap.intern("call/cc").unwrap();

        let test_cases = vec![
            (Handle::Fixnum(-42), "-42", "-42"),
            (Handle::TRUE, "#t", "#t"),
            (Handle::FALSE, "#f", "#f"),
            (Handle::NIL, "()", "()"),
            (Handle::UNDEFINED, "#<undefined>", "#<undefined>"),
            (Handle::NAN, "+nan.0", "+nan.0"),
            (Handle::NEGATIVE_INFINITY, "-inf.0", "-inf.0"),
            (text, "\"a \\\"quoted\\\"\\nline\"", "a \"quoted\"\nline"),
            (ch, "#\\x", "x"),
            (space, "#\\space", " "),
            (real, "2.5", "2.5"),
            (whole, "3.0", "3.0"),
            (symbol, "call/cc", "call/cc"),
        ];
        for (i, (value, written, displayed)) in test_cases.into_iter().enumerate() {
            assert_eq!(write(&heap, value), written, "write test #{}", i + 1);
            assert_eq!(display(&heap, value), displayed, "display test #{}", i + 1);
        }
    }

    #[test]
    fn test_compound_values() {
        let mut heap = Heap::new(64);
        let s = heap.string("s").unwrap();
        let inner = heap.list(&[Handle::Fixnum(2), s]).unwrap();
        let list = heap.list(&[Handle::Fixnum(1), inner]).unwrap();
        let dotted = heap.list_with_tail(&[Handle::Fixnum(1)], Handle::Fixnum(2)).unwrap();
        let vector = heap
            .allocate(Object::Vector(vec![Handle::TRUE, list]))
            .unwrap();
        let bytes = heap.allocate(Object::ByteVector(vec![1, 255])).unwrap();

        assert_eq!(write(&heap, list), "(1 (2 \"s\"))");
        assert_eq!(display(&heap, list), "(1 (2 s))");
        assert_eq!(write(&heap, dotted), "(1 . 2)");
        assert_eq!(write(&heap, vector), "#(#t (1 (2 \"s\")))");
        assert_eq!(write(&heap, bytes), "#u8(1 255)");
    }

    #[test]
    fn test_opaque_values() {
        let mut heap = Heap::new(64);
        let boxed = heap.make_box(Handle::Fixnum(1)).unwrap();
        let halt = heap.allocate(Object::Instruction(Instruction::Halt)).unwrap();
        let error = heap
            .error_object(&crate::Error::RuntimeError("boom".into()))
            .unwrap();
        assert_eq!(write(&heap, boxed), "#<box>");
        assert_eq!(write(&heap, halt), "#<instruction halt>");
        assert_eq!(
            write(&heap, error),
            "#<error runtime-error: RuntimeError: boom>"
        );
        assert_eq!(write(&heap, Handle::Object(999)), "#<invalid 999>");
    }

    #[test]
    fn test_cyclic_structure_terminates() {
        let mut heap = Heap::new(64);
        let cell = heap.cons(Handle::Fixnum(1), Handle::NIL).unwrap();
        heap.set_car(cell, cell).unwrap();
        let text = write(&heap, cell);
        assert!(text.contains("..."));
    }
}
