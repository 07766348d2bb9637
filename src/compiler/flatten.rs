//! Internal definitions.
//!
//! A body such as
//!
//! ```scheme
//! (define (even? n) (if (= n 0) #t (odd? (- n 1))))
//! (define (odd? n) (if (= n 0) #f (even? (- n 1))))
//! (even? 10)
//! ```
//!
//! becomes `(letrec* ((even? (lambda ...)) (odd? (lambda ...))) (even? 10))`.
//! When definitions are interleaved with other expressions, every name starts
//! out undefined and each `define` turns into a `set!` at its original
//! position, so evaluation order is unchanged.

use crate::compiler::Compiler;
use crate::object::Handle;
use crate::Result;

struct Definition {
    name: Handle,
    value: Handle,
}

impl Compiler<'_> {
    /// Rewrite a body so that its definitions become one `letrec*` form.
    /// Nested `begin` forms are spliced into the body first.
    pub fn flatten_body(&mut self, body: &[Handle]) -> Result<Vec<Handle>> {
        let mut items = Vec::with_capacity(body.len());
        self.splice_begins(body, &mut items)?;

        let mut definitions = Vec::new();
        let mut positions = Vec::with_capacity(items.len());
        for &item in &items {
            match self.definition(item)? {
                Some(definition) => {
                    if definitions
                        .iter()
                        .any(|d: &Definition| d.name == definition.name)
                    {
                        return Err(self.syntax_error(item, "duplicate definition"));
                    }
                    positions.push(Some(definitions.len()));
                    definitions.push(definition);
                }
                None => positions.push(None),
            }
        }
        if definitions.is_empty() {
            return Ok(items);
        }

        let letrec = self.keywords().letrec_star;
        let prefix = positions.iter().take_while(|p| p.is_some()).count();
        let form = if prefix == definitions.len() {
            let bindings = definitions
                .iter()
                .map(|d| self.heap.list(&[d.name, d.value]))
                .collect::<Result<Vec<_>>>()?;
            let mut rebuilt = vec![letrec, self.heap.list(&bindings)?];
            match &items[prefix..] {
                [] => rebuilt.push(Handle::UNDEFINED),
                rest => rebuilt.extend_from_slice(rest),
            }
            self.heap.list(&rebuilt)?
        } else {
            let set = self.keywords().set;
            let bindings = definitions
                .iter()
                .map(|d| self.heap.list(&[d.name, Handle::UNDEFINED]))
                .collect::<Result<Vec<_>>>()?;
            let mut rebuilt = vec![letrec, self.heap.list(&bindings)?];
            for (&item, position) in items.iter().zip(&positions) {
                rebuilt.push(match position {
                    Some(index) => {
                        let d = &definitions[*index];
                        self.heap.list(&[set, d.name, d.value])?
                    }
                    None => item,
                });
            }
            self.heap.list(&rebuilt)?
        };
        Ok(vec![form])
    }

    fn splice_begins(&self, body: &[Handle], out: &mut Vec<Handle>) -> Result<()> {
        for &item in body {
            if self.heap.is_pair(item) && self.is_keyword_form(item, self.keywords().begin) {
                let nested = self.form_items(item)?;
                self.splice_begins(&nested[1..], out)?;
            } else {
                out.push(item);
            }
        }
        Ok(())
    }

    /// `(define name expr)`, `(define name)` or `(define (name . formals) body ...)`
    fn definition(&mut self, item: Handle) -> Result<Option<Definition>> {
        if !self.heap.is_pair(item) || !self.is_keyword_form(item, self.keywords().define) {
            return Ok(None);
        }
        let items = self.form_items(item)?;
        match items.as_slice() {
            [_, name] if self.heap.is_symbol(*name) => Ok(Some(Definition {
                name: *name,
                value: Handle::UNDEFINED,
            })),
            [_, name, value] if self.heap.is_symbol(*name) => Ok(Some(Definition {
                name: *name,
                value: *value,
            })),
            [_, signature, body @ ..] if self.heap.is_pair(*signature) && !body.is_empty() => {
                let (name, formals) = self.heap.uncons(*signature)?;
                if !self.heap.is_symbol(name) {
                    return Err(self.syntax_error(item, "procedure name must be a symbol"));
                }
                let mut lambda = vec![self.keywords().lambda, formals];
                lambda.extend_from_slice(body);
                let value = self.heap.list(&lambda)?;
                Ok(Some(Definition { name, value }))
            }
            _ => Err(self.syntax_error(item, "malformed definition")),
        }
    }
}
