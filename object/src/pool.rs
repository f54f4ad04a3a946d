use std::collections::HashMap;

use crate::{
    error::ObjectError,
    string::{StrRef, StringHeap},
};

/// Content-deduplicating layer over a [`StringHeap`].
///
/// Entries are weak: the pool never keeps a string alive. A handle whose
/// string was freed (or whose slot now holds different bytes) is replaced
/// with a fresh allocation the next time its content is interned.
#[derive(Debug, Default)]
pub struct StringPool {
    mappings: HashMap<Box<[u8]>, StrRef, ahash::RandomState>,
}

impl StringPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the pooled handle for `bytes`, allocating when there is none.
    /// The flag is `true` when a new string was allocated.
    pub fn intern(
        &mut self,
        heap: &mut StringHeap,
        bytes: &[u8],
    ) -> Result<(StrRef, bool), ObjectError> {
        if let Some(&existing) = self.mappings.get(bytes)
            && heap.bytes(existing) == Some(bytes)
        {
            return Ok((existing, false));
        }
        let fresh = heap.alloc(bytes)?;
        self.mappings.insert(Box::from(bytes), fresh);
        Ok((fresh, true))
    }

    pub fn lookup(&self, heap: &StringHeap, bytes: &[u8]) -> Option<StrRef> {
        let &handle = self.mappings.get(bytes)?;
        (heap.bytes(handle) == Some(bytes)).then_some(handle)
    }

    /// Drops entries whose strings no longer exist. Returns how many.
    pub fn purge(&mut self, heap: &StringHeap) -> usize {
        let before = self.mappings.len();
        self.mappings.retain(|_, handle| heap.contains(*handle));
        before - self.mappings.len()
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    pub fn clear(&mut self) {
        self.mappings.clear();
    }
}
