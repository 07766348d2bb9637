//! Free-variable and assigned-variable analysis.
//!
//! Both walks run over fully expanded code. Forms headed by a syntax keyword
//! are handed to that syntax, which knows which sub-forms are expressions and
//! which names it binds; everything else is treated as an application. A
//! keyword rebound by an enclosing lambda is an ordinary variable, so both
//! walks carry the names bound so far and skip syntax dispatch for them.

use std::rc::Rc;

use crate::compiler::Compiler;
use crate::object::Handle;
use crate::sets::NameSet;
use crate::syntax::Syntax;
use crate::Result;

impl Compiler<'_> {
    /// Names referenced in `expr` that are not in `bound` and have no global binding
    pub fn find_free(&self, expr: Handle, bound: &NameSet) -> Result<NameSet> {
        if self.heap.is_symbol(expr) {
            if bound.member(expr) || self.global(expr).is_some() {
                return Ok(NameSet::new());
            }
            return Ok(NameSet::singleton(expr));
        }
        if !self.heap.is_pair(expr) {
            return Ok(NameSet::new());
        }
        self.enter(expr)?;
        let result = self.free_in_form(expr, bound);
        self.leave();
        result
    }

    fn free_in_form(&self, expr: Handle, bound: &NameSet) -> Result<NameSet> {
        if let Some(syntax) = self.unshadowed_syntax(expr, bound)? {
            return syntax.find_free(self, expr, bound);
        }
        let items = self.form_items(expr)?;
        self.find_free_all(&items, bound)
    }

    /// Union of `find_free` over several expressions
    pub fn find_free_all(&self, exprs: &[Handle], bound: &NameSet) -> Result<NameSet> {
        let mut free = NameSet::new();
        for &expr in exprs {
            free = free.union(&self.find_free(expr, bound)?);
        }
        Ok(free)
    }

    /// Members of `candidates` that are targets of `set!` somewhere in `expr`.
    /// `bound` holds every name bound around `expr`, candidates included.
    pub fn find_sets(&self, expr: Handle, candidates: &NameSet, bound: &NameSet) -> Result<NameSet> {
        if candidates.is_empty() || !self.heap.is_pair(expr) {
            return Ok(NameSet::new());
        }
        self.enter(expr)?;
        let result = self.sets_in_form(expr, candidates, bound);
        self.leave();
        result
    }

    fn sets_in_form(&self, expr: Handle, candidates: &NameSet, bound: &NameSet) -> Result<NameSet> {
        if let Some(syntax) = self.unshadowed_syntax(expr, bound)? {
            return syntax.find_sets(self, expr, candidates, bound);
        }
        let items = self.form_items(expr)?;
        self.find_sets_all(&items, candidates, bound)
    }

    pub fn find_sets_all(
        &self,
        exprs: &[Handle],
        candidates: &NameSet,
        bound: &NameSet,
    ) -> Result<NameSet> {
        let mut sets = NameSet::new();
        for &expr in exprs {
            sets = sets.union(&self.find_sets(expr, candidates, bound)?);
        }
        Ok(sets)
    }

    /// Syntax of `expr`'s head, unless a name in `bound` rebinds it
    fn unshadowed_syntax(
        &self,
        expr: Handle,
        bound: &NameSet,
    ) -> Result<Option<Rc<dyn Syntax>>> {
        let head = self.heap.car(expr)?;
        if bound.member(head) {
            return Ok(None);
        }
        Ok(self.head_syntax(expr))
    }
}
