use slotmap::{SlotMap, new_key_type};

use crate::error::ObjectError;

new_key_type! {
    /// Generational handle to a string in a [`StringHeap`].
    ///
    /// A handle whose string was freed never resolves again, even if the
    /// slot is reused.
    pub struct StrRef;
}

/// Longest representable string: the length must fit the `u32` prefix.
pub const MAX_STRING_LEN: usize = u32::MAX as usize;

/// An immutable byte string with its hash computed once at creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmString {
    bytes: Box<[u8]>,
    hash: u32,
}

impl VmString {
    #[inline(always)]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Never zero.
    #[inline(always)]
    pub fn hash(&self) -> u32 {
        self.hash
    }

    #[inline(always)]
    pub fn len(&self) -> u32 {
        self.bytes.len() as u32
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// FNV-1a over `bytes`. Zero means "unset" elsewhere, so it maps to 1.
pub fn hash_bytes(bytes: &[u8]) -> u32 {
    const OFFSET: u32 = 0x811c_9dc5;
    const PRIME: u32 = 0x0100_0193;

    let mut h = OFFSET;
    for &b in bytes {
        h ^= u32::from(b);
        h = h.wrapping_mul(PRIME);
    }
    if h == 0 { 1 } else { h }
}

/// Arena of every string a VM has allocated.
///
/// Allocation never deduplicates: equal contents get distinct handles. See
/// [`StringPool`](crate::StringPool) for the content-interning layer.
#[derive(Debug, Default)]
pub struct StringHeap {
    strings: SlotMap<StrRef, VmString>,
    allocated_bytes: usize,
}

impl StringHeap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copies `bytes` into a fresh string.
    pub fn alloc(&mut self, bytes: &[u8]) -> Result<StrRef, ObjectError> {
        if bytes.len() > MAX_STRING_LEN {
            return Err(ObjectError::TooLong { len: bytes.len() });
        }
        let mut buf = Vec::new();
        buf.try_reserve_exact(bytes.len())
            .map_err(|_| ObjectError::OutOfMemory { what: "string" })?;
        buf.extend_from_slice(bytes);

        self.allocated_bytes += bytes.len();
        Ok(self.strings.insert(VmString {
            hash: hash_bytes(bytes),
            bytes: buf.into_boxed_slice(),
        }))
    }

    /// Allocates the concatenation of two live strings.
    pub fn concat(&mut self, a: StrRef, b: StrRef) -> Result<StrRef, ObjectError> {
        let left = self.bytes(a).ok_or(ObjectError::StaleString)?;
        let right = self.bytes(b).ok_or(ObjectError::StaleString)?;
        let len = left.len() + right.len();
        if len > MAX_STRING_LEN {
            return Err(ObjectError::TooLong { len });
        }
        let mut joined = Vec::new();
        joined
            .try_reserve_exact(len)
            .map_err(|_| ObjectError::OutOfMemory { what: "string" })?;
        joined.extend_from_slice(left);
        joined.extend_from_slice(right);
        self.alloc(&joined)
    }

    #[inline(always)]
    pub fn get(&self, s: StrRef) -> Option<&VmString> {
        self.strings.get(s)
    }

    #[inline(always)]
    pub fn bytes(&self, s: StrRef) -> Option<&[u8]> {
        self.strings.get(s).map(VmString::as_bytes)
    }

    #[inline(always)]
    pub fn contains(&self, s: StrRef) -> bool {
        self.strings.contains_key(s)
    }

    /// Releases a string. Returns `false` for handles that were already
    /// freed, so a stale handle can never free twice.
    pub fn free(&mut self, s: StrRef) -> bool {
        match self.strings.remove(s) {
            Some(string) => {
                self.allocated_bytes -= string.bytes.len();
                true
            }
            None => false,
        }
    }

    /// Number of live strings.
    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }

    /// Payload bytes held by live strings.
    pub fn allocated_bytes(&self) -> usize {
        self.allocated_bytes
    }
}
