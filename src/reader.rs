//! Source text to trees in the object store.
//!
//! Parsing happens in two steps: nom combinators produce a [`Datum`] tree,
//! which is then allocated in the heap as immutable pairs, interned symbols
//! and literal objects. Nesting is limited so that deeply nested input is
//! rejected instead of overflowing the native stack.

use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::{tag, tag_no_case, take_while1},
    character::complete::{anychar, char, digit0, digit1, multispace1, not_line_ending, one_of},
    combinator::{opt, recognize, value},
    error::ErrorKind,
    multi::many0,
    sequence::{pair, preceded, terminated},
};

use crate::heap::Heap;
use crate::object::{Handle, Object};
use crate::{Error, Result};

/// Characters allowed in symbols besides alphanumerics
const SYMBOL_SPECIAL_CHARS: &str = "+-*/<>=!?_$%&:.^~@";

/// Valid: non-empty, no leading digit, no sign or dot followed by a digit,
/// not a lone `.`, alphanumeric + SYMBOL_SPECIAL_CHARS
fn is_valid_symbol(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        None => false,
        Some(first) if first.is_ascii_digit() => false,
        Some('-' | '+' | '.') if chars.next().is_some_and(|c| c.is_ascii_digit()) => false,
        Some(_) => {
            name != "."
                && name
                    .chars()
                    .all(|c| c.is_alphanumeric() || SYMBOL_SPECIAL_CHARS.contains(c))
        }
    }
}

/// Whether an atom may end here
fn at_delimiter(input: &str) -> bool {
    input
        .chars()
        .next()
        .is_none_or(|c| c.is_whitespace() || "()\";'".contains(c))
}

fn error(input: &str, kind: ErrorKind) -> nom::Err<nom::error::Error<&str>> {
    nom::Err::Error(nom::error::Error::new(input, kind))
}

/// Parsed form before allocation
#[derive(Debug, Clone, PartialEq)]
enum Datum {
    Integer(i64),
    Real(f64),
    Bool(bool),
    Str(String),
    Char(char),
    Symbol(String),
    List(Vec<Datum>, Option<Box<Datum>>),
    Vector(Vec<Datum>),
}

/// Convert nom parsing errors to user-friendly messages
fn parse_error_to_message(
    input: &str,
    error: nom::Err<nom::error::Error<&str>>,
    max_depth: usize,
) -> String {
    match error {
        nom::Err::Error(e) | nom::Err::Failure(e) => {
            let position = input.len().saturating_sub(e.input.len());
            match e.code {
                ErrorKind::Char => format!("Expected character at position {position}"),
                ErrorKind::Tag => format!("Unexpected token at position {position}"),
                ErrorKind::TooLarge => {
                    format!("Expression too deeply nested (max depth: {max_depth})")
                }
                _ => {
                    if position < input.len() {
                        let remaining_chars: String =
                            input.chars().skip(position).take(10).collect();
                        format!("Invalid syntax near '{remaining_chars}'")
                    } else {
                        "Unexpected end of input".into()
                    }
                }
            }
        }
        nom::Err::Incomplete(_) => "Incomplete input".into(),
    }
}

/// Whitespace and `;` comments
fn atmosphere(input: &str) -> IResult<&str, ()> {
    value(
        (),
        many0(alt((
            value((), multispace1),
            value((), pair(char(';'), not_line_ending)),
        ))),
    )
    .parse(input)
}

/// Parse a number: hexadecimal, decimal integer, real or a special real
fn parse_number(input: &str) -> IResult<&str, Datum> {
    let (rest, number) = alt((
        parse_special_real,
        parse_hexadecimal,
        parse_real,
        parse_decimal,
    ))
    .parse(input)?;
    if !at_delimiter(rest) {
        return Err(error(input, ErrorKind::Digit));
    }
    Ok((rest, number))
}

fn parse_special_real(input: &str) -> IResult<&str, Datum> {
    alt((
        value(Datum::Real(f64::NAN), tag("+nan.0")),
        value(Datum::Real(f64::INFINITY), tag("+inf.0")),
        value(Datum::Real(f64::NEG_INFINITY), tag("-inf.0")),
    ))
    .parse(input)
}

/// Parse a decimal integer. Values outside the `i64` range are rejected.
fn parse_decimal(input: &str) -> IResult<&str, Datum> {
    let (rest, number_str) = recognize(pair(opt(one_of("+-")), digit1)).parse(input)?;
    match number_str.parse::<i64>() {
        Ok(n) => Ok((rest, Datum::Integer(n))),
        Err(_) => Err(error(input, ErrorKind::Digit)),
    }
}

/// Parse a real with a fraction, an exponent or both
fn parse_real(input: &str) -> IResult<&str, Datum> {
    let exponent = || (one_of("eE"), opt(one_of("+-")), digit1);
    let (rest, number_str) = recognize((
        opt(one_of("+-")),
        digit1,
        alt((
            recognize((char('.'), digit0, opt(exponent()))),
            recognize(exponent()),
        )),
    ))
    .parse(input)?;
    match number_str.parse::<f64>() {
        Ok(r) => Ok((rest, Datum::Real(r))),
        Err(_) => Err(error(input, ErrorKind::Float)),
    }
}

/// Parse a hexadecimal number (#x or #X prefix)
fn parse_hexadecimal(input: &str) -> IResult<&str, Datum> {
    let (rest, _) = tag_no_case("#x").parse(input)?;
    let (rest, hex_digits) = take_while1(|c: char| c.is_ascii_hexdigit()).parse(rest)?;
    match i64::from_str_radix(hex_digits, 16) {
        Ok(n) => Ok((rest, Datum::Integer(n))),
        Err(_) => Err(error(input, ErrorKind::HexDigit)),
    }
}

/// Parse a boolean (#t, #f, #true or #false)
fn parse_bool(input: &str) -> IResult<&str, Datum> {
    let (rest, parsed) = alt((
        value(Datum::Bool(true), tag("#true")),
        value(Datum::Bool(false), tag("#false")),
        value(Datum::Bool(true), tag("#t")),
        value(Datum::Bool(false), tag("#f")),
    ))
    .parse(input)?;
    if !at_delimiter(rest) {
        return Err(error(input, ErrorKind::Tag));
    }
    Ok((rest, parsed))
}

/// Parse a character literal: `#\a`, `#\space`, `#\newline`, `#\tab`
fn parse_char(input: &str) -> IResult<&str, Datum> {
    let (rest, _) = tag("#\\").parse(input)?;
    let (after_first, first) = anychar(rest)?;
    let named: IResult<&str, &str> = take_while1(|c: char| c.is_alphanumeric()).parse(rest);
    let (after_name, name) = named.unwrap_or((after_first, ""));
    if name.chars().count() <= 1 {
        return Ok((after_first, Datum::Char(first)));
    }
    let named = match name {
        "space" => ' ',
        "newline" => '\n',
        "tab" => '\t',
        "nul" => '\0',
        _ => return Err(error(rest, ErrorKind::Char)),
    };
    Ok((after_name, Datum::Char(named)))
}

/// Parse a symbol (identifier)
fn parse_symbol(input: &str) -> IResult<&str, Datum> {
    let mut symbol_chars =
        take_while1(|c: char| c.is_alphanumeric() || SYMBOL_SPECIAL_CHARS.contains(c));

    let (remaining, candidate) = symbol_chars.parse(input)?;

    if is_valid_symbol(candidate) {
        Ok((remaining, Datum::Symbol(candidate.into())))
    } else {
        Err(error(input, ErrorKind::Alpha))
    }
}

/// Parse a string literal
fn parse_string(input: &str) -> IResult<&str, Datum> {
    let (mut remaining, _) = char('"').parse(input)?;
    let mut chars = String::new();

    loop {
        let mut char_iter = remaining.chars();
        match char_iter.next() {
            Some('"') => return Ok((char_iter.as_str(), Datum::Str(chars))),
            Some('\\') => {
                match char_iter.next() {
                    Some('n') => chars.push('\n'),
                    Some('t') => chars.push('\t'),
                    Some('r') => chars.push('\r'),
                    Some('\\') => chars.push('\\'),
                    Some('"') => chars.push('"'),
                    // Unknown escape, or a backslash at the end of input
                    Some(_) | None => return Err(error(remaining, ErrorKind::Char)),
                }
                remaining = char_iter.as_str();
            }
            Some(ch) => {
                chars.push(ch);
                remaining = char_iter.as_str();
            }
            None => return Err(error(remaining, ErrorKind::Char)),
        }
    }
}

/// Parse a list, possibly dotted
fn parse_list(input: &str, depth: usize, max_depth: usize) -> IResult<&str, Datum> {
    let (input, _) = char('(').parse(input)?;
    let (input, elements) =
        many0(preceded(atmosphere, |input| parse_sexpr(input, depth + 1, max_depth)))
            .parse(input)?;
    let (input, _) = atmosphere(input)?;

    let (input, tail) = if elements.is_empty() {
        (input, None)
    } else {
        opt(preceded(
            dot,
            preceded(atmosphere, |input| parse_sexpr(input, depth + 1, max_depth)),
        ))
        .parse(input)?
    };
    let (input, _) = atmosphere(input)?;
    let (input, _) = char(')').parse(input)?;
    Ok((input, Datum::List(elements, tail.map(Box::new))))
}

/// The `.` of a dotted list, which must stand alone
fn dot(input: &str) -> IResult<&str, char> {
    let (rest, dot) = char('.').parse(input)?;
    if !at_delimiter(rest) {
        return Err(error(input, ErrorKind::Char));
    }
    Ok((rest, dot))
}

/// Parse a vector literal `#( ... )`
fn parse_vector(input: &str, depth: usize, max_depth: usize) -> IResult<&str, Datum> {
    let (input, _) = tag("#(").parse(input)?;
    let (input, elements) =
        many0(preceded(atmosphere, |input| parse_sexpr(input, depth + 1, max_depth)))
            .parse(input)?;
    let (input, _) = atmosphere(input)?;
    let (input, _) = char(')').parse(input)?;
    Ok((input, Datum::Vector(elements)))
}

/// Parse quoted expression ('expr -> (quote expr))
fn parse_quote(input: &str, depth: usize, max_depth: usize) -> IResult<&str, Datum> {
    let (input, _) = char('\'').parse(input)?;
    let (input, _) = atmosphere(input)?;
    let (input, expr) = parse_sexpr(input, depth + 1, max_depth)?;
    Ok((
        input,
        Datum::List(vec![Datum::Symbol("quote".into()), expr], None),
    ))
}

/// Parse one datum at the current position (no leading whitespace)
fn parse_sexpr(input: &str, depth: usize, max_depth: usize) -> IResult<&str, Datum> {
    if depth >= max_depth {
        // Failure, so no alternative is tried and the depth error survives
        return Err(nom::Err::Failure(nom::error::Error::new(
            input,
            ErrorKind::TooLarge,
        )));
    }
    alt((
        |input| parse_quote(input, depth, max_depth),
        |input| parse_list(input, depth, max_depth),
        |input| parse_vector(input, depth, max_depth),
        parse_number,
        parse_bool,
        parse_char,
        parse_string,
        parse_symbol,
    ))
    .parse(input)
}

/// Allocate a parsed datum in the heap
fn build(heap: &mut Heap, datum: &Datum) -> Result<Handle> {
    match datum {
        Datum::Integer(n) => Ok(Handle::Fixnum(*n)),
        Datum::Real(r) => heap.real(*r),
        Datum::Bool(b) => Ok(Handle::from_bool(*b)),
        Datum::Str(s) => heap.string(s.as_str()),
        Datum::Char(c) => heap.allocate(Object::Char(*c)),
        Datum::Symbol(name) => heap.intern(name),
        Datum::List(elements, tail) => {
            let items = elements
                .iter()
                .map(|element| build(heap, element))
                .collect::<Result<Vec<_>>>()?;
            let tail = match tail {
                Some(tail) => build(heap, tail)?,
                None => Handle::NIL,
            };
            heap.list_with_tail(&items, tail)
        }
        Datum::Vector(elements) => {
            let items = elements
                .iter()
                .map(|element| build(heap, element))
                .collect::<Result<Vec<_>>>()?;
            heap.allocate(Object::Vector(items))
        }
    }
}

/// Read exactly one datum from `input`
pub fn read(heap: &mut Heap, input: &str, max_depth: usize) -> Result<Handle> {
    match terminated(
        preceded(atmosphere, |input| parse_sexpr(input, 0, max_depth)),
        atmosphere,
    )
    .parse(input)
    {
        Ok(("", datum)) => build(heap, &datum),
        Ok((remaining, _)) => Err(Error::ParseError(format!(
            "Unexpected remaining input: '{remaining}'"
        ))),
        Err(e) => Err(Error::ParseError(parse_error_to_message(input, e, max_depth))),
    }
}

/// Read every datum in `input` and wrap them in `(begin ...)`
pub fn read_program(heap: &mut Heap, input: &str, max_depth: usize) -> Result<Handle> {
    match terminated(
        many0(preceded(atmosphere, |input| parse_sexpr(input, 1, max_depth))),
        atmosphere,
    )
    .parse(input)
    {
        Ok(("", data)) => {
            let begin = heap.intern("begin")?;
            let mut items = vec![begin];
            for datum in &data {
                items.push(build(heap, datum)?);
            }
            heap.list(&items)
        }
        Ok((remaining, _)) => {
            // Re-read the leftover text on its own for a precise message
            let position = input.len() - remaining.len();
            match preceded(atmosphere, |input| parse_sexpr(input, 1, max_depth)).parse(remaining) {
                Err(e) => Err(Error::ParseError(parse_error_to_message(input, e, max_depth))),
                Ok(_) => Err(Error::ParseError(format!(
                    "Unexpected remaining input at position {position}"
                ))),
            }
        }
        Err(e) => Err(Error::ParseError(parse_error_to_message(input, e, max_depth))),
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;
    use crate::MAX_PARSE_DEPTH;
    use crate::printer;

    /// Test result variants for comprehensive parsing tests
    #[derive(Debug)]
    enum ParseTestResult {
        Success(&'static str),       // Parsing should succeed and write back as this text
        SpecificError(&'static str), // Parsing should fail with error containing this string
        Error,                       // Parsing should fail (any error)
    }
    use ParseTestResult::*;

    /// Run parse tests, comparing the written form and checking it reads back the same
    fn run_parse_tests(test_cases: Vec<(&str, ParseTestResult)>) {
        for (i, (input, expected)) in test_cases.iter().enumerate() {
            let test_id = format!("Parse test #{}", i + 1);
            let mut heap = Heap::new(1_000);
            let result = read(&mut heap, input, MAX_PARSE_DEPTH);

            match (result, expected) {
                (Ok(actual), Success(expected_text)) => {
                    let written = printer::write(&heap, actual);
                    assert_eq!(written, *expected_text, "{test_id}: value mismatch for '{input}'");

                    let reread = read(&mut heap, &written, MAX_PARSE_DEPTH).unwrap_or_else(|e| {
                        panic!("{test_id}: round-trip parse failed for '{written}': {e:?}")
                    });
                    assert_eq!(
                        printer::write(&heap, reread),
                        written,
                        "{test_id}: round-trip mismatch for '{input}'"
                    );
                }
                (Err(_), Error) => {}
                (Err(err), SpecificError(expected_text)) => {
                    let error_msg = format!("{err:?}");
                    assert!(
                        error_msg.contains(expected_text),
                        "{test_id}: error '{error_msg}' should contain '{expected_text}'"
                    );
                }
                (Ok(actual), Error | SpecificError(_)) => {
                    panic!(
                        "{test_id}: expected error for '{input}', got {}",
                        printer::write(&heap, actual)
                    );
                }
                (Err(err), Success(_)) => {
                    panic!("{test_id}: expected success for '{input}', got error {err:?}");
                }
            }
        }
    }

    #[test]
    fn test_parser_comprehensive() {
        let test_cases = vec![
            // ===== NUMBERS =====
            ("42", Success("42")),
            ("-5", Success("-5")),
            ("+7", Success("7")),
            ("-0", Success("0")),
            ("#x1F", Success("31")),
            ("#XfF", Success("255")),
            ("1.5", Success("1.5")),
            ("-2.", Success("-2.0")),
            ("1e3", Success("1000.0")),
            ("2.5E-1", Success("0.25")),
            ("+inf.0", Success("+inf.0")),
            ("-inf.0", Success("-inf.0")),
            ("+nan.0", Success("+nan.0")),
            ("9223372036854775807", Success("9223372036854775807")),
            ("9223372036854775808", Error),
            ("12abc", Error),
            // ===== BOOLEANS AND CHARACTERS =====
            ("#t", Success("#t")),
            ("#false", Success("#f")),
            ("#true", Success("#t")),
            ("#tru", Error),
            ("#\\a", Success("#\\a")),
            ("#\\space", Success("#\\space")),
            ("#\\newline", Success("#\\newline")),
            ("#\\(", Success("#\\(")),
            ("#\\bogus", Error),
            // ===== STRINGS =====
            ("\"hello\"", Success("\"hello\"")),
            ("\"a\\nb\\\"c\\\\\"", Success("\"a\\nb\\\"c\\\\\"")),
            ("\"\"", Success("\"\"")),
            ("\"unterminated", Error),
            ("\"bad \\q escape\"", Error),
            // ===== SYMBOLS =====
            ("foo", Success("foo")),
            ("call/cc", Success("call/cc")),
            ("set-car!", Success("set-car!")),
            ("letrec*", Success("letrec*")),
            ("+", Success("+")),
            ("...", Success("...")),
            ("->x", Success("->x")),
            ("-5x", Error),
            // ===== LISTS =====
            ("()", Success("()")),
            ("(1 2 3)", Success("(1 2 3)")),
            ("( 1  (2 3)\n 4 )", Success("(1 (2 3) 4)")),
            ("(a(b)c)", Success("(a (b) c)")),
            ("(1 . 2)", Success("(1 . 2)")),
            ("(1 2 . (3))", Success("(1 2 3)")),
            ("(. 1)", Error),
            ("(1 . 2 3)", Error),
            ("(1 2", SpecificError("ParseError")),
            (")", Error),
            ("", Error),
            // ===== VECTORS AND QUOTE =====
            ("#(1 \"a\" (b))", Success("#(1 \"a\" (b))")),
            ("#()", Success("#()")),
            ("'x", Success("(quote x)")),
            ("'(1 'b)", Success("(quote (1 (quote b)))")),
            ("' x", Success("(quote x)")),
            // ===== COMMENTS =====
            ("; leading\n(1 ; inner\n 2) ; trailing", Success("(1 2)")),
            ("1 2", SpecificError("Unexpected remaining input")),
        ];

        run_parse_tests(test_cases);
    }

    #[test]
    fn test_parser_depth_limits() {
        let parens_under_limit = format!(
            "{}x{}",
            "(".repeat(MAX_PARSE_DEPTH - 1),
            ")".repeat(MAX_PARSE_DEPTH - 1)
        );
        let quotes_under_limit = format!("{}x", "'".repeat(MAX_PARSE_DEPTH - 1));
        let deep_parens_at_limit = format!(
            "{}1{}",
            "(".repeat(MAX_PARSE_DEPTH),
            ")".repeat(MAX_PARSE_DEPTH)
        );
        let deep_quotes_at_limit = format!("{}a", "'".repeat(MAX_PARSE_DEPTH));

        run_parse_tests(vec![
            (
                deep_parens_at_limit.as_str(),
                SpecificError("too deeply nested"),
            ),
            (
                deep_quotes_at_limit.as_str(),
                SpecificError("too deeply nested"),
            ),
        ]);

        let mut heap = Heap::new(10_000);
        assert!(
            read(&mut heap, &parens_under_limit, MAX_PARSE_DEPTH).is_ok(),
            "Parens just under depth limit should parse successfully"
        );
        assert!(
            read(&mut heap, &quotes_under_limit, MAX_PARSE_DEPTH).is_ok(),
            "Quotes just under depth limit should parse successfully"
        );
        assert!(read(&mut heap, "((1))", 2).is_err());
    }

    #[test]
    fn test_read_program() {
        let mut heap = Heap::new(1_000);
        let program = read_program(&mut heap, "(define x 1)\n; note\n(+ x 2)", MAX_PARSE_DEPTH)
            .unwrap();
        assert_eq!(printer::write(&heap, program), "(begin (define x 1) (+ x 2))");

        let empty = read_program(&mut heap, "  ; nothing\n", MAX_PARSE_DEPTH).unwrap();
        assert_eq!(printer::write(&heap, empty), "(begin)");

        let err = read_program(&mut heap, "(+ 1 2) (oops", MAX_PARSE_DEPTH).unwrap_err();
        assert!(matches!(err, crate::Error::ParseError(_)));
    }

    #[test]
    fn test_symbols_are_interned() {
        let mut heap = Heap::new(1_000);
        let list = read(&mut heap, "(a a)", MAX_PARSE_DEPTH).unwrap();
        let items = heap.list_to_vec(list).unwrap();
        assert_eq!(items[0], items[1]);
        assert_eq!(items[0], heap.intern("a").unwrap());
    }
}
