use object::{StrRef, StringHeap};
use slotmap::SecondaryMap;

// ── Public API types ──────────────────────────────────────────────────

/// Consumers implement this to provide GC roots.
///
/// Called once per collection. Every string handle reachable from VM state
/// must be passed to `visitor`; handles may repeat.
pub trait RootProvider {
    fn visit_roots(&self, visitor: &mut dyn FnMut(StrRef));
}

/// Whether the collector may free what it tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GcMode {
    /// Track and mark, never free. Unreachable strings leak until the VM
    /// is dropped.
    #[default]
    Observe,
    /// Free unreachable strings registered as owned.
    Own,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GcConfig {
    pub mode: GcMode,
    /// Collect automatically once this many strings were tracked since the
    /// previous cycle. `None` leaves collection to the host.
    pub threshold: Option<usize>,
}

/// A registry entry. Only `Owned` strings are ever freed by a sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tracked {
    Owned(StrRef),
    Borrowed(StrRef),
}

impl Tracked {
    #[inline(always)]
    pub fn handle(self) -> StrRef {
        match self {
            Tracked::Owned(s) | Tracked::Borrowed(s) => s,
        }
    }

    #[inline(always)]
    pub fn is_owned(self) -> bool {
        matches!(self, Tracked::Owned(_))
    }
}

/// Result of one collection, or the running totals from [`GcRegistry::stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GcStats {
    /// Entries in the registry when the cycle started.
    pub tracked: usize,
    /// Distinct tracked strings reached from the roots.
    pub marked: usize,
    pub freed: usize,
    pub retained: usize,
    /// Cycles run by this registry, including this one.
    pub collections: u64,
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    tracked: Tracked,
    marked: bool,
}

// ── Registry ──────────────────────────────────────────────────────────

/// Side table of every string the VM has told the collector about.
#[derive(Debug, Default)]
pub struct GcRegistry {
    entries: Vec<Entry>,
    index: SecondaryMap<StrRef, usize>,
    config: GcConfig,
    since_last: usize,
    last: GcStats,
    total_freed: usize,
}

impl GcRegistry {
    pub fn new(config: GcConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    #[inline(always)]
    pub fn mode(&self) -> GcMode {
        self.config.mode
    }

    /// Switching to `Observe` keeps existing `Owned` entries, but no sweep
    /// frees them until the mode is `Own` again.
    pub fn set_mode(&mut self, mode: GcMode) {
        self.config.mode = mode;
    }

    pub fn set_threshold(&mut self, threshold: Option<usize>) {
        self.config.threshold = threshold;
    }

    /// Registers a freshly allocated string. It is owned in `Own` mode and
    /// borrowed otherwise. Returns `false` if it was already tracked.
    pub fn track(&mut self, handle: StrRef) -> bool {
        let tracked = match self.config.mode {
            GcMode::Own => Tracked::Owned(handle),
            GcMode::Observe => Tracked::Borrowed(handle),
        };
        self.insert(tracked)
    }

    /// Registers a string something else is responsible for.
    pub fn track_borrowed(&mut self, handle: StrRef) -> bool {
        self.insert(Tracked::Borrowed(handle))
    }

    /// Hands a borrowed string over to the collector. Only takes effect in
    /// `Own` mode.
    pub fn adopt(&mut self, handle: StrRef) -> bool {
        if self.config.mode != GcMode::Own {
            return false;
        }
        match self.index.get(handle).and_then(|&i| self.entries.get_mut(i)) {
            Some(entry) if !entry.tracked.is_owned() => {
                entry.tracked = Tracked::Owned(handle);
                true
            }
            _ => false,
        }
    }

    /// Drops an entry without freeing its string.
    pub fn forget(&mut self, handle: StrRef) -> Option<Tracked> {
        let i = self.index.remove(handle)?;
        let entry = self.entries.swap_remove(i);
        if let Some(moved) = self.entries.get(i) {
            self.index.insert(moved.tracked.handle(), i);
        }
        Some(entry.tracked)
    }

    pub fn get(&self, handle: StrRef) -> Option<Tracked> {
        self.index.get(handle).map(|&i| self.entries[i].tracked)
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn owned_count(&self) -> usize {
        self.entries.iter().filter(|e| e.tracked.is_owned()).count()
    }

    /// Strings tracked since the previous collection.
    #[inline(always)]
    pub fn pending(&self) -> usize {
        self.since_last
    }

    /// Whether the configured threshold asks for a collection now.
    #[inline(always)]
    pub fn wants_collection(&self) -> bool {
        self.config.threshold.is_some_and(|t| self.since_last >= t)
    }

    /// The most recent cycle, with `freed` replaced by the running total.
    pub fn stats(&self) -> GcStats {
        GcStats {
            tracked: self.entries.len(),
            freed: self.total_freed,
            ..self.last
        }
    }

    /// Marks everything reachable from `roots`, then frees every unmarked
    /// owned string (in `Own` mode) and compacts the registry.
    pub fn collect(&mut self, roots: &dyn RootProvider, heap: &mut StringHeap) -> GcStats {
        let tracked = self.entries.len();

        let mut marked = 0;
        roots.visit_roots(&mut |handle| {
            if let Some(&i) = self.index.get(handle) {
                let entry = &mut self.entries[i];
                if !entry.marked {
                    entry.marked = true;
                    marked += 1;
                }
            }
        });

        let may_free = self.config.mode == GcMode::Own;
        let mut freed = 0;
        self.entries.retain_mut(|entry| {
            if entry.marked {
                entry.marked = false;
                return true;
            }
            match entry.tracked {
                Tracked::Owned(handle) if may_free => {
                    if heap.free(handle) {
                        freed += 1;
                    }
                    false
                }
                // Strings freed by someone else no longer need tracking.
                other => heap.contains(other.handle()),
            }
        });

        self.index.clear();
        for (i, entry) in self.entries.iter().enumerate() {
            self.index.insert(entry.tracked.handle(), i);
        }

        self.since_last = 0;
        self.total_freed += freed;
        self.last = GcStats {
            tracked,
            marked,
            freed,
            retained: self.entries.len(),
            collections: self.last.collections + 1,
        };
        log::debug!(
            "gc #{} ({:?}): tracked {tracked}, marked {marked}, freed {freed}, retained {}",
            self.last.collections,
            self.config.mode,
            self.last.retained,
        );
        self.last
    }

    fn insert(&mut self, tracked: Tracked) -> bool {
        let handle = tracked.handle();
        if self.index.contains_key(handle) {
            return false;
        }
        self.index.insert(handle, self.entries.len());
        self.entries.push(Entry {
            tracked,
            marked: false,
        });
        self.since_last += 1;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Roots(Vec<StrRef>);

    impl RootProvider for Roots {
        fn visit_roots(&self, visitor: &mut dyn FnMut(StrRef)) {
            for &s in &self.0 {
                visitor(s);
            }
        }
    }

    fn alloc_tracked(heap: &mut StringHeap, gc: &mut GcRegistry, n: usize) -> Vec<StrRef> {
        (0..n)
            .map(|i| {
                let s = heap.alloc(format!("s{i}").as_bytes()).unwrap();
                gc.track(s);
                s
            })
            .collect()
    }

    #[test]
    fn observe_mode_never_frees() {
        let mut heap = StringHeap::new();
        let mut gc = GcRegistry::new(GcConfig::default());
        let strings = alloc_tracked(&mut heap, &mut gc, 4);

        let roots = Roots(vec![strings[0], strings[0]]);
        for _ in 0..2 {
            let stats = gc.collect(&roots, &mut heap);
            assert_eq!(stats.marked, 1);
            assert_eq!(stats.freed, 0);
            assert_eq!(stats.retained, 4);
        }
        assert_eq!(heap.len(), 4);
        assert_eq!(gc.stats().collections, 2);
    }

    #[test]
    fn own_mode_frees_unreachable_once() {
        let mut heap = StringHeap::new();
        let mut gc = GcRegistry::new(GcConfig {
            mode: GcMode::Own,
            threshold: None,
        });
        let strings = alloc_tracked(&mut heap, &mut gc, 5);
        let roots = Roots(vec![strings[1], strings[3]]);

        let stats = gc.collect(&roots, &mut heap);
        assert_eq!(stats.tracked, 5);
        assert_eq!(stats.marked, 2);
        assert_eq!(stats.freed, 3);
        assert_eq!(stats.retained, 2);
        assert!(heap.contains(strings[1]) && heap.contains(strings[3]));
        assert!(!heap.contains(strings[0]));

        let again = gc.collect(&roots, &mut heap);
        assert_eq!(again.freed, 0);
        assert_eq!(gc.stats().freed, 3);
        assert_eq!(gc.get(strings[3]), Some(Tracked::Owned(strings[3])));
        assert_eq!(gc.get(strings[0]), None);
    }

    #[test]
    fn borrowed_survive_until_adopted() {
        let mut heap = StringHeap::new();
        let mut gc = GcRegistry::new(GcConfig {
            mode: GcMode::Own,
            threshold: None,
        });
        let konst = heap.alloc(b"const").unwrap();
        assert!(gc.track_borrowed(konst));
        assert!(!gc.track(konst));

        let none = Roots(Vec::new());
        assert_eq!(gc.collect(&none, &mut heap).freed, 0);
        assert!(heap.contains(konst));

        assert!(gc.adopt(konst));
        assert!(!gc.adopt(konst));
        assert_eq!(gc.collect(&none, &mut heap).freed, 1);
        assert!(!heap.contains(konst));
        assert!(gc.is_empty());
    }

    #[test]
    fn adopt_is_inert_when_observing() {
        let mut heap = StringHeap::new();
        let mut gc = GcRegistry::default();
        let s = heap.alloc(b"x").unwrap();
        gc.track(s);
        assert!(!gc.adopt(s));
        assert_eq!(gc.owned_count(), 0);
    }

    #[test]
    fn threshold_and_forget() {
        let mut heap = StringHeap::new();
        let mut gc = GcRegistry::new(GcConfig {
            mode: GcMode::Observe,
            threshold: Some(3),
        });
        let strings = alloc_tracked(&mut heap, &mut gc, 2);
        assert!(!gc.wants_collection());
        alloc_tracked(&mut heap, &mut gc, 1);
        assert!(gc.wants_collection());

        assert_eq!(gc.forget(strings[0]), Some(Tracked::Borrowed(strings[0])));
        assert_eq!(gc.len(), 2);
        assert!(gc.get(strings[1]).is_some());

        gc.collect(&Roots(Vec::new()), &mut heap);
        assert_eq!(gc.pending(), 0);
        assert!(!gc.wants_collection());
    }

    #[test]
    fn externally_freed_strings_drop_out() {
        let mut heap = StringHeap::new();
        let mut gc = GcRegistry::default();
        let s = heap.alloc(b"x").unwrap();
        gc.track(s);
        heap.free(s);
        let stats = gc.collect(&Roots(Vec::new()), &mut heap);
        assert_eq!(stats.freed, 0);
        assert_eq!(stats.retained, 0);
    }
}
