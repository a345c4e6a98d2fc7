// =============================================================================
// MinimalOS NextGen — Virtual Memory Translator: Physical Memory
// =============================================================================
//
// A flat array of `NUM_FRAMES` frames, each `PAGE_SIZE` signed words, plus
// the four primitives spec.md §6 lists as provided by an external
// collaborator: read-word, write-word, evict-frame, restore-frame. This
// module is the simulator side of that interface; the translator core
// never reaches past it into `BackingStore` directly.
// =============================================================================

use log::trace;

use crate::backing_store::BackingStore;
use crate::config::MemoryConfig;

/// The simulated physical memory: `NUM_FRAMES` frames of `PAGE_SIZE`
/// signed words each, plus the backing store pages are evicted to and
/// restored from.
pub struct PhysicalMemory<B: BackingStore> {
    config: MemoryConfig,
    words: Vec<i64>,
    backing: B,
}

impl<B: BackingStore> PhysicalMemory<B> {
    /// Allocates a zeroed physical memory of `NUM_FRAMES * PAGE_SIZE`
    /// words, paired with the given backing store.
    pub fn new(config: MemoryConfig, backing: B) -> Self {
        let total_words = (config.num_frames() * config.page_size()) as usize;
        Self {
            config,
            words: vec![0; total_words],
            backing,
        }
    }

    /// Reads one word at a physical word address.
    ///
    /// # Panics
    /// If `address` is outside `[0, NUM_FRAMES * PAGE_SIZE)`. Out-of-range
    /// physical addresses are a translator bug, not a caller-facing error
    /// condition — spec.md §7 treats them as programming errors.
    pub fn read_word(&self, address: u64) -> i64 {
        debug_assert!(
            (address as usize) < self.words.len(),
            "read_word({address:#x}) out of range (physical memory has {} words)",
            self.words.len()
        );
        let word = self.words[address as usize];
        trace!("read_word({address:#x}) -> {word}");
        word
    }

    /// Writes one word at a physical word address. See [`Self::read_word`]
    /// for the panic contract.
    pub fn write_word(&mut self, address: u64, value: i64) {
        debug_assert!(
            (address as usize) < self.words.len(),
            "write_word({address:#x}) out of range (physical memory has {} words)",
            self.words.len()
        );
        trace!("write_word({address:#x}, {value})");
        self.words[address as usize] = value;
    }

    /// Zeros all `PAGE_SIZE` words of `frame` (spec.md §4.3, table
    /// clearing). Used whenever a frame transitions to the interior-table
    /// role, and after a victim frame is evicted but before it is reused.
    pub fn clear_frame(&mut self, frame: u64) {
        let page_size = self.config.page_size() as usize;
        let start = (frame * self.config.page_size()) as usize;
        self.words[start..start + page_size].fill(0);
    }

    /// Persists `frame`'s contents to `page` in the backing store.
    pub fn evict(&mut self, frame: u64, page: u64) {
        let page_size = self.config.page_size() as usize;
        let start = (frame * self.config.page_size()) as usize;
        self.backing.evict(page, &self.words[start..start + page_size]);
    }

    /// Overwrites `frame`'s contents with `page`'s stored contents (or
    /// zero, if `page` was never evicted).
    pub fn restore(&mut self, frame: u64, page: u64) {
        let page_size = self.config.page_size() as usize;
        let start = (frame * self.config.page_size()) as usize;
        self.backing.restore(page, &mut self.words[start..start + page_size]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backing_store::InMemoryBackingStore;

    fn memory() -> PhysicalMemory<InMemoryBackingStore> {
        PhysicalMemory::new(MemoryConfig::EXAMPLE, InMemoryBackingStore::new())
    }

    #[test]
    fn starts_zeroed() {
        let mem = memory();
        assert_eq!(mem.read_word(0), 0);
        assert_eq!(mem.read_word(255), 0);
    }

    #[test]
    fn write_then_read_round_trips() {
        let mut mem = memory();
        mem.write_word(42, 7);
        assert_eq!(mem.read_word(42), 7);
    }

    #[test]
    fn clear_frame_zeros_only_that_frame() {
        let mut mem = memory();
        mem.write_word(0, 99); // frame 0
        mem.write_word(16, 99); // frame 1
        mem.clear_frame(0);
        assert_eq!(mem.read_word(0), 0);
        assert_eq!(mem.read_word(16), 99);
    }

    #[test]
    fn evict_then_restore_preserves_frame_contents() {
        let mut mem = memory();
        for i in 0..16 {
            mem.write_word(i, i as i64 * 2);
        }
        mem.evict(0, 0xAB);
        mem.clear_frame(0);
        assert_eq!(mem.read_word(0), 0);
        mem.restore(0, 0xAB);
        for i in 0..16 {
            assert_eq!(mem.read_word(i), i as i64 * 2);
        }
    }
}
