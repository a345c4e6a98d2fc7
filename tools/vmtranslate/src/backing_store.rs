// =============================================================================
// MinimalOS NextGen — Virtual Memory Translator: Backing Store
// =============================================================================
//
// spec.md treats the backing store as an external collaborator — a
// file-based page store the translator calls into via `evict`/`restore`
// but never implements itself. Nothing else in this workspace provides
// that collaborator, so this module supplies the deterministic in-memory
// stand-in the spec's open questions call for (uninitialized pages read
// as zero, not garbage) while keeping the seam (`BackingStore`) where a
// real file-backed implementation would plug in.
// =============================================================================

use std::collections::HashMap;

/// Per-virtual-page storage a [`crate::Translator`] evicts to and
/// restores from.
///
/// Pages are identified by their virtual page number (the virtual
/// address with the in-frame offset bits already shifted off).
pub trait BackingStore {
    /// Overwrites `page_words` (length `page_size`) with the stored
    /// contents of `page`. Pages never written before read as all zero —
    /// deterministic, per spec.md §9 note 4.
    fn restore(&mut self, page: u64, page_words: &mut [i64]);

    /// Persists `page_words` as the contents of `page`, replacing
    /// whatever was stored there before.
    fn evict(&mut self, page: u64, page_words: &[i64]);
}

/// A [`BackingStore`] backed by a `HashMap`, one entry per page that has
/// ever been evicted. Never-evicted pages restore as zero.
#[derive(Debug, Default)]
pub struct InMemoryBackingStore {
    pages: HashMap<u64, Vec<i64>>,
}

impl InMemoryBackingStore {
    /// Creates an empty backing store — every page restores as zero
    /// until it is first evicted.
    pub fn new() -> Self {
        Self::default()
    }
}

impl BackingStore for InMemoryBackingStore {
    fn restore(&mut self, page: u64, page_words: &mut [i64]) {
        match self.pages.get(&page) {
            Some(stored) => page_words.copy_from_slice(stored),
            None => page_words.fill(0),
        }
    }

    fn evict(&mut self, page: u64, page_words: &[i64]) {
        self.pages.insert(page, page_words.to_vec());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_written_page_restores_as_zero() {
        let mut store = InMemoryBackingStore::new();
        let mut buf = vec![-1i64; 4];
        store.restore(7, &mut buf);
        assert_eq!(buf, vec![0, 0, 0, 0]);
    }

    #[test]
    fn evict_then_restore_round_trips() {
        let mut store = InMemoryBackingStore::new();
        store.evict(3, &[1, 2, 3, 4]);
        let mut buf = vec![0i64; 4];
        store.restore(3, &mut buf);
        assert_eq!(buf, vec![1, 2, 3, 4]);
    }

    #[test]
    fn distinct_pages_do_not_alias() {
        let mut store = InMemoryBackingStore::new();
        store.evict(1, &[9, 9]);
        store.evict(2, &[5, 5]);
        let mut buf = vec![0i64; 2];
        store.restore(1, &mut buf);
        assert_eq!(buf, vec![9, 9]);
        store.restore(2, &mut buf);
        assert_eq!(buf, vec![5, 5]);
    }
}
