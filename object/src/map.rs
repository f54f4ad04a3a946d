use core::mem;

use crate::{
    error::ObjectError,
    string::{StrRef, StringHeap, hash_bytes},
};

const MIN_CAPACITY: usize = 8;

/// One bucket of a [`Map`].
#[derive(Debug, Clone)]
pub enum Slot<V> {
    Empty,
    /// A deleted entry. Probing continues past it; inserts may reuse it.
    Tombstone,
    Occupied { key: StrRef, hash: u32, value: V },
}

/// Open-addressing hash table keyed by heap strings.
///
/// Two keys are equal when they are the same handle, or when their hashes,
/// lengths and bytes all match. The first key stored for some content keeps
/// its identity across later `put`s with equal content.
///
/// Capacity is zero or a power of two; `len + tombstones` stays below 70%
/// of it between operations.
#[derive(Debug, Clone)]
pub struct Map<V> {
    slots: Vec<Slot<V>>,
    len: usize,
    tombstones: usize,
}

impl<V> Default for Map<V> {
    fn default() -> Self {
        Self::new()
    }
}

enum Probe {
    Found(usize),
    /// Where an insert would go: the first tombstone on the chain, or the
    /// empty slot that ended it.
    Vacant(usize),
}

impl<V> Map<V> {
    /// An empty map; the first insert allocates.
    pub const fn new() -> Self {
        Self {
            slots: Vec::new(),
            len: 0,
            tombstones: 0,
        }
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline(always)]
    pub fn tombstones(&self) -> usize {
        self.tombstones
    }

    #[inline(always)]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn get(&self, heap: &StringHeap, key: StrRef) -> Option<&V> {
        let string = heap.get(key)?;
        match self.probe(heap, key, string.hash(), string.as_bytes()) {
            Probe::Found(i) => self.value_at(i),
            Probe::Vacant(_) => None,
        }
    }

    /// Looks a key up by content without needing a handle for it.
    pub fn get_bytes(&self, heap: &StringHeap, bytes: &[u8]) -> Option<&V> {
        let i = self.find_bytes(heap, bytes)?;
        self.value_at(i)
    }

    /// The stored key handle whose content equals `bytes`.
    pub fn key_for_bytes(&self, heap: &StringHeap, bytes: &[u8]) -> Option<StrRef> {
        match self.slots.get(self.find_bytes(heap, bytes)?) {
            Some(Slot::Occupied { key, .. }) => Some(*key),
            _ => None,
        }
    }

    pub fn contains(&self, heap: &StringHeap, key: StrRef) -> bool {
        self.get(heap, key).is_some()
    }

    /// Inserts or replaces, returning the previous value. The key must be
    /// a live string.
    pub fn put(&mut self, heap: &StringHeap, key: StrRef, value: V) -> Result<Option<V>, ObjectError> {
        let string = heap.get(key).ok_or(ObjectError::StaleString)?;
        let hash = string.hash();
        if self.slots.is_empty() {
            self.resize(MIN_CAPACITY)?;
        }
        match self.probe(heap, key, hash, string.as_bytes()) {
            Probe::Found(i) => match &mut self.slots[i] {
                Slot::Occupied { value: old, .. } => Ok(Some(mem::replace(old, value))),
                _ => Ok(None),
            },
            Probe::Vacant(i) => {
                if matches!(self.slots[i], Slot::Tombstone) {
                    self.tombstones -= 1;
                }
                self.slots[i] = Slot::Occupied { key, hash, value };
                self.len += 1;
                if (self.len + self.tombstones) * 10 >= self.slots.len() * 7 {
                    self.grow()?;
                }
                Ok(None)
            }
        }
    }

    /// Removes a key, leaving a tombstone in its slot.
    pub fn del(&mut self, heap: &StringHeap, key: StrRef) -> Option<V> {
        let string = heap.get(key)?;
        match self.probe(heap, key, string.hash(), string.as_bytes()) {
            Probe::Found(i) => self.take(i),
            Probe::Vacant(_) => None,
        }
    }

    pub fn del_bytes(&mut self, heap: &StringHeap, bytes: &[u8]) -> Option<V> {
        let i = self.find_bytes(heap, bytes)?;
        self.take(i)
    }

    /// Removes every entry but keeps the allocation.
    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            *slot = Slot::Empty;
        }
        self.len = 0;
        self.tombstones = 0;
    }

    pub fn iter(&self) -> impl Iterator<Item = (StrRef, &V)> {
        self.slots.iter().filter_map(|slot| match slot {
            Slot::Occupied { key, value, .. } => Some((*key, value)),
            _ => None,
        })
    }

    pub fn keys(&self) -> impl Iterator<Item = StrRef> + '_ {
        self.iter().map(|(key, _)| key)
    }

    // ── internals ─────────────────────────────────────────────────

    #[inline(always)]
    fn value_at(&self, i: usize) -> Option<&V> {
        match &self.slots[i] {
            Slot::Occupied { value, .. } => Some(value),
            _ => None,
        }
    }

    fn take(&mut self, i: usize) -> Option<V> {
        match mem::replace(&mut self.slots[i], Slot::Tombstone) {
            Slot::Occupied { value, .. } => {
                self.len -= 1;
                self.tombstones += 1;
                Some(value)
            }
            other => {
                self.slots[i] = other;
                None
            }
        }
    }

    fn find_bytes(&self, heap: &StringHeap, bytes: &[u8]) -> Option<usize> {
        match self.probe_with(heap, hash_bytes(bytes), bytes, None) {
            Probe::Found(i) => Some(i),
            Probe::Vacant(_) => None,
        }
    }

    #[inline(always)]
    fn probe(&self, heap: &StringHeap, key: StrRef, hash: u32, bytes: &[u8]) -> Probe {
        self.probe_with(heap, hash, bytes, Some(key))
    }

    /// Linear probe from `hash`. Terminates because the load factor keeps
    /// at least one empty slot.
    fn probe_with(&self, heap: &StringHeap, hash: u32, bytes: &[u8], identity: Option<StrRef>) -> Probe {
        let cap = self.slots.len();
        if cap == 0 {
            return Probe::Vacant(0);
        }
        let mask = cap - 1;
        let mut i = hash as usize & mask;
        let mut first_tombstone = None;
        for _ in 0..cap {
            match &self.slots[i] {
                Slot::Empty => return Probe::Vacant(first_tombstone.unwrap_or(i)),
                Slot::Tombstone => {
                    first_tombstone.get_or_insert(i);
                }
                Slot::Occupied { key, hash: h, .. } => {
                    if Some(*key) == identity {
                        return Probe::Found(i);
                    }
                    if *h == hash && heap.bytes(*key).is_some_and(|k| k.len() == bytes.len() && k == bytes) {
                        return Probe::Found(i);
                    }
                }
            }
            i = (i + 1) & mask;
        }
        Probe::Vacant(first_tombstone.unwrap_or(0))
    }

    /// Rehashes in place when tombstones dominate, otherwise doubles.
    fn grow(&mut self) -> Result<(), ObjectError> {
        let cap = self.slots.len();
        let new_cap = if self.tombstones > self.len { cap } else { cap * 2 };
        self.resize(new_cap)
    }

    fn resize(&mut self, new_cap: usize) -> Result<(), ObjectError> {
        debug_assert!(new_cap.is_power_of_two());
        let mut fresh = Vec::new();
        fresh
            .try_reserve_exact(new_cap)
            .map_err(|_| ObjectError::OutOfMemory { what: "map slots" })?;
        fresh.resize_with(new_cap, || Slot::Empty);

        let mask = new_cap - 1;
        for slot in mem::replace(&mut self.slots, fresh) {
            if let Slot::Occupied { key, hash, value } = slot {
                let mut i = hash as usize & mask;
                while !matches!(self.slots[i], Slot::Empty) {
                    i = (i + 1) & mask;
                }
                self.slots[i] = Slot::Occupied { key, hash, value };
            }
        }
        self.tombstones = 0;
        log::trace!("map resized to {new_cap} slots ({} entries)", self.len);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check_load<V>(map: &Map<V>) {
        assert!(map.len() + map.tombstones() <= map.capacity());
        if map.capacity() > 0 {
            assert!((map.len() + map.tombstones()) * 10 < map.capacity() * 7);
        }
    }

    #[test]
    fn put_get_del() {
        let mut heap = StringHeap::new();
        let mut map = Map::new();
        let a = heap.alloc(b"alpha").unwrap();
        let b = heap.alloc(b"beta").unwrap();

        assert_eq!(map.put(&heap, a, 1).unwrap(), None);
        assert_eq!(map.put(&heap, b, 2).unwrap(), None);
        assert_eq!(map.get(&heap, a), Some(&1));
        assert_eq!(map.get_bytes(&heap, b"beta"), Some(&2));
        assert_eq!(map.capacity(), MIN_CAPACITY);

        assert_eq!(map.del(&heap, a), Some(1));
        assert_eq!(map.get(&heap, a), None);
        assert_eq!(map.del(&heap, a), None);
        assert_eq!(map.tombstones(), 1);
        assert_eq!(map.len(), 1);
        check_load(&map);
    }

    #[test]
    fn equal_content_is_the_same_key() {
        let mut heap = StringHeap::new();
        let mut map = Map::new();
        let first = heap.alloc(b"x").unwrap();
        let second = heap.alloc(b"x").unwrap();

        map.put(&heap, first, 1).unwrap();
        assert_eq!(map.put(&heap, second, 2).unwrap(), Some(1));
        assert_eq!(map.len(), 1);
        assert_eq!(map.get(&heap, first), Some(&2));
        assert_eq!(map.keys().collect::<Vec<_>>(), vec![first]);
        assert_eq!(map.key_for_bytes(&heap, b"x"), Some(first));
    }

    #[test]
    fn grows_and_keeps_entries() {
        let mut heap = StringHeap::new();
        let mut map = Map::new();
        let keys: Vec<_> = (0..200)
            .map(|i| heap.alloc(format!("k{i}").as_bytes()).unwrap())
            .collect();
        for (i, &k) in keys.iter().enumerate() {
            map.put(&heap, k, i).unwrap();
            check_load(&map);
        }
        assert_eq!(map.len(), 200);
        assert!(map.capacity().is_power_of_two());
        for (i, &k) in keys.iter().enumerate() {
            assert_eq!(map.get(&heap, k), Some(&i));
        }
    }

    #[test]
    fn tombstones_are_reused_and_purged() {
        let mut heap = StringHeap::new();
        let mut map = Map::new();
        let keys: Vec<_> = (0..5)
            .map(|i| heap.alloc(format!("t{i}").as_bytes()).unwrap())
            .collect();

        // Churn through many insert/delete cycles: capacity must stay bounded.
        for round in 0..100 {
            for &k in &keys {
                map.put(&heap, k, round).unwrap();
                check_load(&map);
            }
            for &k in &keys {
                assert_eq!(map.del(&heap, k), Some(round));
                check_load(&map);
            }
        }
        assert!(map.is_empty());
        assert!(map.capacity() <= 16);
    }

    #[test]
    fn stale_keys() {
        let mut heap = StringHeap::new();
        let mut map = Map::new();
        let k = heap.alloc(b"gone").unwrap();
        heap.free(k);
        assert_eq!(map.put(&heap, k, 1), Err(ObjectError::StaleString));
        assert_eq!(map.get(&heap, k), None);
    }

    #[test]
    fn clear_keeps_capacity() {
        let mut heap = StringHeap::new();
        let mut map = Map::new();
        let k = heap.alloc(b"k").unwrap();
        map.put(&heap, k, ()).unwrap();
        map.del(&heap, k);
        map.clear();
        assert_eq!(map.len(), 0);
        assert_eq!(map.tombstones(), 0);
        assert_eq!(map.capacity(), MIN_CAPACITY);
        assert_eq!(map.iter().count(), 0);
    }
}
