use crate::{error::ObjectError, value::Value};

/// Growable vector of values. Grows by at least half its capacity and never
/// shrinks.
#[derive(Debug, Clone, Default)]
pub struct ValueArray {
    items: Vec<Value>,
}

impl ValueArray {
    pub const fn new() -> Self {
        Self { items: Vec::new() }
    }

    pub fn with_capacity(capacity: usize) -> Result<Self, ObjectError> {
        let mut items = Vec::new();
        items
            .try_reserve_exact(capacity)
            .map_err(|_| ObjectError::OutOfMemory { what: "value array" })?;
        Ok(Self { items })
    }

    pub fn push(&mut self, value: Value) -> Result<(), ObjectError> {
        if self.items.len() == self.items.capacity() {
            let cap = self.items.capacity();
            let target = (cap + cap.div_ceil(2)).max(4);
            self.items
                .try_reserve_exact(target - self.items.len())
                .map_err(|_| ObjectError::OutOfMemory { what: "value array" })?;
        }
        self.items.push(value);
        Ok(())
    }

    #[inline(always)]
    pub fn pop(&mut self) -> Option<Value> {
        self.items.pop()
    }

    #[inline(always)]
    pub fn get(&self, index: usize) -> Option<Value> {
        self.items.get(index).copied()
    }

    pub fn set(&mut self, index: usize, value: Value) -> Result<Value, ObjectError> {
        let len = self.items.len();
        let slot = self
            .items
            .get_mut(index)
            .ok_or(ObjectError::IndexOutOfBounds { index, len })?;
        Ok(core::mem::replace(slot, value))
    }

    #[inline(always)]
    pub fn last(&self) -> Option<Value> {
        self.items.last().copied()
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[inline(always)]
    pub fn capacity(&self) -> usize {
        self.items.capacity()
    }

    /// Keeps the first `len` values. The allocation is untouched.
    pub fn truncate(&mut self, len: usize) {
        self.items.truncate(len);
    }

    #[inline(always)]
    pub fn as_slice(&self) -> &[Value] {
        &self.items
    }

    #[inline(always)]
    pub fn as_mut_slice(&mut self) -> &mut [Value] {
        &mut self.items
    }
}
