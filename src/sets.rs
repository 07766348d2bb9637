//! Compile-time sets of variable names.
//!
//! Names are symbol handles. Sets keep insertion order so that free-variable
//! lists, and with them closure layouts, are deterministic.

use smallvec::SmallVec;

use crate::object::Handle;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NameSet {
    names: SmallVec<[Handle; 8]>,
}

impl NameSet {
    pub fn new() -> Self {
        NameSet::default()
    }

    pub fn singleton(name: Handle) -> Self {
        let mut set = NameSet::new();
        set.names.push(name);
        set
    }

    pub fn member(&self, name: Handle) -> bool {
        self.names.contains(&name)
    }

    /// Add `name` unless already present; returns whether it was added
    pub fn insert(&mut self, name: Handle) -> bool {
        if self.member(name) {
            false
        } else {
            self.names.push(name);
            true
        }
    }

    pub fn union(&self, other: &NameSet) -> NameSet {
        let mut result = self.clone();
        for &name in &other.names {
            result.insert(name);
        }
        result
    }

    /// Names of `self` that are not in `other`
    pub fn minus(&self, other: &NameSet) -> NameSet {
        self.names
            .iter()
            .copied()
            .filter(|&name| !other.member(name))
            .collect()
    }

    pub fn intersect(&self, other: &NameSet) -> NameSet {
        self.names
            .iter()
            .copied()
            .filter(|&name| other.member(name))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = Handle> + '_ {
        self.names.iter().copied()
    }

    pub fn as_slice(&self) -> &[Handle] {
        &self.names
    }
}

impl FromIterator<Handle> for NameSet {
    fn from_iter<I: IntoIterator<Item = Handle>>(iter: I) -> Self {
        let mut set = NameSet::new();
        for name in iter {
            set.insert(name);
        }
        set
    }
}
