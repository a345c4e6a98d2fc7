// =============================================================================
// MinimalOS NextGen — Virtual Memory Translator: Configuration
// =============================================================================
//
// The three fixed parameters from the spec (offset/virtual/physical
// address widths) plus their derived quantities (page size, frame count,
// table depth, page count). The original port treats these as compile-time
// macros; here they're a validated runtime value so the same binary can be
// exercised at the small width used by the worked examples (OFFSET_WIDTH=4,
// PHYSICAL_ADDRESS_WIDTH=8, VIRTUAL_ADDRESS_WIDTH=20) and at production-like
// widths in the same test binary.
//
// =============================================================================

use crate::error::ConfigError;

/// Fixed sizing parameters for a [`crate::Translator`] instance.
///
/// Constructed once via [`MemoryConfig::new`] and immutable thereafter —
/// every derived quantity (`page_size`, `num_frames`, `tables_depth`,
/// `num_pages`) is computed from the three widths on demand rather than
/// cached, since they're cheap shifts and this keeps the type trivially
/// `Copy`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryConfig {
    /// Bits indexing within a frame. Frame size is `2^offset_width` words.
    pub offset_width: u32,
    /// Total bits in a virtual address.
    pub virtual_address_width: u32,
    /// Total bits in a physical address.
    pub physical_address_width: u32,
}

impl MemoryConfig {
    /// The worked example from the spec: `OFFSET_WIDTH=4`,
    /// `PHYSICAL_ADDRESS_WIDTH=8`, `VIRTUAL_ADDRESS_WIDTH=20` —
    /// `PAGE_SIZE=16`, `NUM_FRAMES=16`, `NUM_PAGES=65536`, `TABLES_DEPTH=4`.
    pub const EXAMPLE: MemoryConfig = MemoryConfig {
        offset_width: 4,
        virtual_address_width: 20,
        physical_address_width: 8,
    };

    /// Validates and constructs a new configuration.
    ///
    /// # Errors
    /// See [`ConfigError`] for the individual width-compatibility and
    /// overflow checks performed.
    pub fn new(
        offset_width: u32,
        virtual_address_width: u32,
        physical_address_width: u32,
    ) -> Result<Self, ConfigError> {
        if offset_width == 0 {
            return Err(ConfigError::ZeroOffsetWidth);
        }
        if virtual_address_width < offset_width {
            return Err(ConfigError::VirtualNarrowerThanOffset {
                virtual_address_width,
                offset_width,
            });
        }
        if physical_address_width < offset_width {
            return Err(ConfigError::PhysicalNarrowerThanOffset {
                physical_address_width,
                offset_width,
            });
        }

        let config = MemoryConfig {
            offset_width,
            virtual_address_width,
            physical_address_width,
        };

        // Every derived quantity must fit in u64/usize on this host.
        if physical_address_width - offset_width >= u64::BITS
            || virtual_address_width - offset_width >= u64::BITS
            || virtual_address_width >= u64::BITS
            || config.num_frames() > usize::MAX as u64
        {
            return Err(ConfigError::AddressSpaceTooLarge);
        }

        Ok(config)
    }

    /// `PAGE_SIZE = 2^offset_width` words per frame.
    #[inline]
    pub fn page_size(&self) -> u64 {
        1u64 << self.offset_width
    }

    /// `NUM_FRAMES = 2^(physical_address_width - offset_width)`.
    #[inline]
    pub fn num_frames(&self) -> u64 {
        1u64 << (self.physical_address_width - self.offset_width)
    }

    /// `TABLES_DEPTH = ceil((virtual_address_width - offset_width) / offset_width)`.
    #[inline]
    pub fn tables_depth(&self) -> u32 {
        let bits_above_offset = self.virtual_address_width - self.offset_width;
        bits_above_offset.div_ceil(self.offset_width)
    }

    /// `NUM_PAGES = 2^(virtual_address_width - offset_width)`.
    #[inline]
    pub fn num_pages(&self) -> u64 {
        1u64 << (self.virtual_address_width - self.offset_width)
    }

    /// `VIRTUAL_MEMORY_SIZE = 2^virtual_address_width`.
    #[inline]
    pub fn virtual_memory_size(&self) -> u64 {
        1u64 << self.virtual_address_width
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn example_config_derives_spec_worked_example() {
        let config = MemoryConfig::EXAMPLE;
        assert_eq!(config.page_size(), 16);
        assert_eq!(config.num_frames(), 16);
        assert_eq!(config.tables_depth(), 4);
        assert_eq!(config.num_pages(), 65536);
        assert_eq!(config.virtual_memory_size(), 1 << 20);
    }

    #[test]
    fn rejects_zero_offset_width() {
        assert_eq!(MemoryConfig::new(0, 20, 8), Err(ConfigError::ZeroOffsetWidth));
    }

    #[test]
    fn rejects_virtual_narrower_than_offset() {
        assert_eq!(
            MemoryConfig::new(8, 4, 8),
            Err(ConfigError::VirtualNarrowerThanOffset {
                virtual_address_width: 4,
                offset_width: 8,
            })
        );
    }

    #[test]
    fn rejects_physical_narrower_than_offset() {
        assert_eq!(
            MemoryConfig::new(8, 20, 4),
            Err(ConfigError::PhysicalNarrowerThanOffset {
                physical_address_width: 4,
                offset_width: 8,
            })
        );
    }

    #[test]
    fn tables_depth_rounds_up() {
        // offset_width=4, virtual_address_width=21 -> 17 bits above offset -> ceil(17/4) = 5
        let config = MemoryConfig::new(4, 21, 8).unwrap();
        assert_eq!(config.tables_depth(), 5);
    }
}
