//! Value stack with pointer-relative addressing.
//!
//! Slot `i` counted back from pointer `s` is the absolute slot `s - i - 1`.
//! Pointers are owned by the caller (the machine keeps `sp` and `fp` in its
//! registers); the stack only checks that every access stays in bounds.

use crate::heap::Heap;
use crate::object::{Handle, Object};
use crate::{Error, Result};

pub struct Stack {
    slots: Vec<Handle>,
    high_water: usize,
}

impl Stack {
    pub fn new(capacity: usize) -> Self {
        Stack {
            slots: vec![Handle::NIL; capacity],
            high_water: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Highest stack pointer seen since creation or the last reset
    pub fn high_water(&self) -> usize {
        self.high_water
    }

    pub fn reset_high_water(&mut self) {
        self.high_water = 0;
    }

    fn overflow(&self) -> Error {
        Error::StackOverflow {
            capacity: self.slots.len(),
        }
    }

    fn mark(&mut self, pointer: usize) {
        self.high_water = self.high_water.max(pointer);
    }

    /// Absolute slot for offset `offset` back from `pointer`
    fn slot(&self, pointer: usize, offset: usize) -> Result<usize> {
        let slot = pointer
            .checked_sub(offset + 1)
            .ok_or(Error::StackUnderflow)?;
        if slot >= self.slots.len() {
            return Err(self.overflow());
        }
        Ok(slot)
    }

    /// Store `value` at `pointer` and return the new pointer
    pub fn push(&mut self, pointer: usize, value: Handle) -> Result<usize> {
        let overflow = self.overflow();
        let slot = self.slots.get_mut(pointer).ok_or(overflow)?;
        *slot = value;
        self.mark(pointer + 1);
        Ok(pointer + 1)
    }

    /// Pointer after discarding `count` slots
    pub fn pop(&self, pointer: usize, count: usize) -> Result<usize> {
        pointer.checked_sub(count).ok_or(Error::StackUnderflow)
    }

    pub fn index(&self, pointer: usize, offset: usize) -> Result<Handle> {
        let slot = self.slot(pointer, offset)?;
        Ok(self.slots[slot])
    }

    pub fn set_index(&mut self, pointer: usize, offset: usize, value: Handle) -> Result<()> {
        let slot = self.slot(pointer, offset)?;
        self.slots[slot] = value;
        Ok(())
    }

    /// The top `count` slots below `pointer`, nearest first
    pub fn slice_as_array(&self, pointer: usize, count: usize) -> Result<Box<[Handle]>> {
        (0..count)
            .map(|offset| self.index(pointer, offset))
            .collect()
    }

    /// Copy slots `[0, pointer)` into a fresh heap vector
    pub fn snapshot(&self, heap: &mut Heap, pointer: usize) -> Result<Handle> {
        let saved = self.slots.get(..pointer).ok_or_else(|| self.overflow())?;
        heap.allocate(Object::Vector(saved.to_vec()))
    }

    /// Copy a snapshot back to the bottom of the stack and return the restored pointer.
    /// The vector itself is left untouched so it can be restored again.
    pub fn restore(&mut self, heap: &Heap, snapshot: Handle) -> Result<usize> {
        let saved = match heap.get(snapshot) {
            Ok(Object::Vector(saved)) => saved,
            Ok(other) => {
                return Err(Error::TypeError(format!(
                    "cannot restore stack from {}",
                    other.type_name()
                )));
            }
            Err(_) => {
                return Err(Error::TypeError(format!(
                    "cannot restore stack from {snapshot:?}"
                )));
            }
        };
        let pointer = saved.len();
        let overflow = self.overflow();
        self.slots
            .get_mut(..pointer)
            .ok_or(overflow)?
            .copy_from_slice(saved);
        self.mark(pointer);
        Ok(pointer)
    }

    /// Move the top `count` slots down by `drop` slots, discarding what was
    /// between them. Returns the new pointer.
    pub fn shift(&mut self, pointer: usize, count: usize, drop: usize) -> Result<usize> {
        let start = pointer.checked_sub(count).ok_or(Error::StackUnderflow)?;
        let target = start.checked_sub(drop).ok_or(Error::StackUnderflow)?;
        if pointer > self.slots.len() {
            return Err(self.overflow());
        }
        self.slots.copy_within(start..pointer, target);
        Ok(pointer - drop)
    }

    /// Adapt a call with surplus arguments to a `required`-plus-rest frame:
    /// `rest` (the already-built list of surplus arguments) takes the slot of the
    /// last argument and the positional arguments are moved down next to it.
    pub fn shift_args(
        &mut self,
        pointer: usize,
        required: usize,
        argc: usize,
        rest: Handle,
    ) -> Result<usize> {
        let surplus = argc
            .checked_sub(required)
            .filter(|&surplus| surplus > 0)
            .ok_or(Error::StackUnderflow)?;
        self.set_index(pointer, argc - 1, rest)?;
        self.shift(pointer, required, surplus - 1)
    }

    /// Adapt a call with exactly `required` arguments to a frame with a rest
    /// parameter: the positional arguments move up one slot and an empty list
    /// takes the rest position.
    pub fn insert_trailing_null(&mut self, pointer: usize, required: usize) -> Result<usize> {
        if pointer >= self.slots.len() {
            return Err(self.overflow());
        }
        let start = pointer.checked_sub(required).ok_or(Error::StackUnderflow)?;
        self.slots.copy_within(start..pointer, start + 1);
        self.slots[start] = Handle::NIL;
        self.mark(pointer + 1);
        Ok(pointer + 1)
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn fix(n: i64) -> Handle {
        Handle::Fixnum(n)
    }

    /// Push values in order and return the resulting pointer
    fn filled(stack: &mut Stack, values: &[i64]) -> usize {
        values
            .iter()
            .fold(0, |sp, &n| stack.push(sp, fix(n)).unwrap())
    }

    #[test]
    fn test_push_and_index() {
        let mut stack = Stack::new(8);
        let sp = filled(&mut stack, &[1, 2, 3]);
        assert_eq!(sp, 3);
        assert_eq!(stack.index(sp, 0).unwrap(), fix(3));
        assert_eq!(stack.index(sp, 2).unwrap(), fix(1));
        stack.set_index(sp, 1, fix(20)).unwrap();
        assert_eq!(stack.index(sp, 1).unwrap(), fix(20));
        assert_eq!(stack.high_water(), 3);
    }

    #[test]
    fn test_bounds() {
        let mut stack = Stack::new(2);
        let sp = filled(&mut stack, &[1, 2]);
        assert_eq!(
            stack.push(sp, fix(3)).unwrap_err(),
            Error::StackOverflow { capacity: 2 }
        );
        assert_eq!(stack.index(sp, 2).unwrap_err(), Error::StackUnderflow);
        assert_eq!(stack.pop(sp, 3).unwrap_err(), Error::StackUnderflow);
    }

    #[test]
    fn test_slice_as_array() {
        let mut stack = Stack::new(8);
        let sp = filled(&mut stack, &[1, 2, 3]);
        assert_eq!(&*stack.slice_as_array(sp, 2).unwrap(), &[fix(3), fix(2)]);
    }

    #[test]
    fn test_shift_discards_middle() {
        let mut stack = Stack::new(8);
        // old args 1 2, new args 3 4
        let sp = filled(&mut stack, &[1, 2, 3, 4]);
        let sp = stack.shift(sp, 2, 2).unwrap();
        assert_eq!(sp, 2);
        assert_eq!(&*stack.slice_as_array(sp, 2).unwrap(), &[fix(4), fix(3)]);
    }

    #[test]
    fn test_snapshot_restore_is_repeatable() {
        let mut heap = Heap::new(32);
        let mut stack = Stack::new(8);
        let sp = filled(&mut stack, &[1, 2, 3]);
        let saved = stack.snapshot(&mut heap, sp).unwrap();

        let clobbered = filled(&mut stack, &[7, 7, 7, 7, 7]);
        assert_eq!(clobbered, 5);
        assert_eq!(stack.restore(&heap, saved).unwrap(), 3);
        assert_eq!(stack.index(3, 0).unwrap(), fix(3));

        filled(&mut stack, &[9, 9, 9]);
        assert_eq!(stack.restore(&heap, saved).unwrap(), 3);
        assert_eq!(&*stack.slice_as_array(3, 3).unwrap(), &[fix(3), fix(2), fix(1)]);
    }

    #[test]
    fn test_restore_rejects_foreign_values() {
        let heap = Heap::new(32);
        let mut stack = Stack::new(8);
        assert!(matches!(
            stack.restore(&heap, Handle::TRUE),
            Err(Error::TypeError(_))
        ));
        assert!(matches!(
            stack.restore(&heap, Handle::Fixnum(3)),
            Err(Error::TypeError(_))
        ));
    }

    #[test]
    fn test_rest_adaptation() {
        let mut heap = Heap::new(32);
        let mut stack = Stack::new(8);

        // Arguments are pushed last-first: (f 1 2 3) leaves 3 2 1 from the bottom
        let sp = filled(&mut stack, &[3, 2, 1]);
        let rest = heap.list_mut(&[fix(2), fix(3)]).unwrap();
        let sp = stack.shift_args(sp, 1, 3, rest).unwrap();
        assert_eq!(sp, 2);
        assert_eq!(stack.index(sp, 0).unwrap(), fix(1));
        assert_eq!(stack.index(sp, 1).unwrap(), rest);

        let mut stack = Stack::new(8);
        let sp = filled(&mut stack, &[1]);
        let sp = stack.insert_trailing_null(sp, 1).unwrap();
        assert_eq!(sp, 2);
        assert_eq!(stack.index(sp, 0).unwrap(), fix(1));
        assert_eq!(stack.index(sp, 1).unwrap(), Handle::NIL);
    }
}
