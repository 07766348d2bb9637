//! Static environment of the lambda being compiled

use crate::object::Handle;

/// Where a variable lives at run time
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Location {
    /// Frame slot, relative to the frame pointer
    Local(usize),
    /// Index into the current closure's captured values
    Free(usize),
}

/// `locals` are the innermost lambda's parameters (rest parameter last),
/// `free` the names that lambda captures, in capture order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Scope {
    pub locals: Vec<Handle>,
    pub free: Vec<Handle>,
}

impl Scope {
    /// Scope of top-level code: nothing is lexically bound
    pub fn empty() -> Self {
        Scope::default()
    }

    pub fn new(locals: Vec<Handle>, free: Vec<Handle>) -> Self {
        Scope { locals, free }
    }

    /// Locals shadow captured names
    pub fn lookup(&self, name: Handle) -> Option<Location> {
        if let Some(index) = self.locals.iter().position(|&local| local == name) {
            return Some(Location::Local(index));
        }
        self.free
            .iter()
            .position(|&free| free == name)
            .map(Location::Free)
    }
}
