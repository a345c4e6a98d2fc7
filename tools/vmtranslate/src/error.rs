// =============================================================================
// MinimalOS NextGen — Virtual Memory Translator: Errors
// =============================================================================
//
// Configuration mistakes (widths that don't fit together, or that would
// overflow `usize` on this host) are the only recoverable error this crate
// surfaces — everything else (tree corruption, out-of-range slot writes)
// is a programmer error per the translator's contract and is handled with
// `debug_assert!` instead, matching the kernel crate's own split between
// `Option`-returning allocation failure and `assert!`-guarded invariants.
// =============================================================================

use thiserror::Error;

/// Reasons a [`crate::config::MemoryConfig`] can fail to validate.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// `OFFSET_WIDTH` must be nonzero — a zero-width offset means frames
    /// of size 1 and a page table with a single slot, which degenerates
    /// the whole scheme.
    #[error("offset_width must be nonzero")]
    ZeroOffsetWidth,

    /// The virtual address must be at least as wide as the in-frame offset,
    /// otherwise there is no room for even a single level of page table.
    #[error(
        "virtual_address_width ({virtual_address_width}) must be >= offset_width ({offset_width})"
    )]
    VirtualNarrowerThanOffset {
        virtual_address_width: u32,
        offset_width: u32,
    },

    /// Same constraint on the physical side: every frame index must be
    /// addressable by at least one table slot.
    #[error(
        "physical_address_width ({physical_address_width}) must be >= offset_width ({offset_width})"
    )]
    PhysicalNarrowerThanOffset {
        physical_address_width: u32,
        offset_width: u32,
    },

    /// The derived frame or page counts (`2^(width - offset_width)`) don't
    /// fit in a `usize` on this host. This crate indexes frames and pages
    /// with `usize`/`u64`, so widths must stay within that range.
    #[error("derived frame or page count overflows this platform's usize")]
    AddressSpaceTooLarge,
}
