//! The application region of internal flash.

use storage::{Flash, MappedFlash};

use crate::{Error, Result};

/// The address range reserved for the application, along with the
/// granularity it has to be erased and programmed in.
///
/// The base is what the launcher jumps into: the word at `base` is the
/// initial stack pointer, and the word at `base + 4` is the reset vector.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FlashRegion {
    pub base: u32,
    pub length: u32,
    /// Erase granularity.
    pub row_size: u32,
    /// Program granularity.  Always divides `row_size`.
    pub page_size: u32,
}

impl FlashRegion {
    pub fn new(base: u32, length: u32, row_size: u32, page_size: u32) -> Result<FlashRegion> {
        if page_size == 0 || row_size == 0 || length == 0 {
            return Err(Error::Layout);
        }
        if row_size % page_size != 0 || length % row_size != 0 || base % row_size != 0 {
            return Err(Error::Layout);
        }
        base.checked_add(length).ok_or(Error::Layout)?;
        Ok(FlashRegion { base, length, row_size, page_size })
    }

    /// Describe the region a flash partition covers.
    pub fn of<F: Flash + MappedFlash>(flash: &F) -> Result<FlashRegion> {
        let narrow = |v: usize| u32::try_from(v).map_err(|_| Error::Layout);
        FlashRegion::new(
            narrow(flash.get_base())?,
            narrow(flash.capacity())?,
            narrow(flash.erase_size())?,
            narrow(flash.write_size())?,
        )
    }

    /// One past the last address of the region.
    pub fn end(&self) -> u32 {
        self.base + self.length
    }

    pub fn reset_vector_address(&self) -> u32 {
        self.base + 4
    }

    /// Rows needed to hold `size` bytes.
    pub fn rows_for(&self, size: u64) -> u64 {
        size.div_ceil(self.row_size as u64)
    }

    /// Pages needed to hold `size` bytes.
    pub fn pages_for(&self, size: u64) -> u64 {
        size.div_ceil(self.page_size as u64)
    }

    /// Does an image of `size` bytes fit?
    pub fn fits(&self, size: u64) -> bool {
        size <= self.length as u64
    }

    /// Offset of `address` into the partition, if it falls inside.
    pub(crate) fn offset_of(&self, address: u32) -> Option<usize> {
        if address < self.base || address >= self.end() {
            return None;
        }
        Some((address - self.base) as usize)
    }
}

/// How far this boot has modified the application region.
///
/// Only `Untouched` and `Verified` describe a region that holds a complete
/// image.  The others mean an attempt was abandoned part way, and whatever is
/// resident may not run.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FlashState {
    /// Nothing has been erased in this boot.
    Untouched,
    /// Erase has started, nothing has been programmed since.
    Erasing,
    /// Pages are being programmed.
    Programming,
    /// A full image was programmed and checked.
    Verified,
}

impl FlashState {
    /// Is the region known to hold a complete image (the old or the new one)?
    pub fn is_intact(&self) -> bool {
        matches!(self, FlashState::Untouched | FlashState::Verified)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMD: FlashRegion = FlashRegion {
        base: 0x12000,
        length: 0x2e000,
        row_size: 256,
        page_size: 64,
    };

    #[test]
    fn geometry() {
        assert_eq!(FlashRegion::new(0x12000, 0x2e000, 256, 64), Ok(SAMD));
        assert_eq!(FlashRegion::new(0x12000, 0x2e000, 256, 96), Err(Error::Layout));
        assert_eq!(FlashRegion::new(0x12080, 0x2e000, 256, 64), Err(Error::Layout));
        assert_eq!(FlashRegion::new(0x12000, 0x2e010, 256, 64), Err(Error::Layout));
        assert_eq!(FlashRegion::new(0xffff_ff00, 0x200, 256, 64), Err(Error::Layout));
        assert_eq!(SAMD.end(), 0x40000);
        assert_eq!(SAMD.reset_vector_address(), 0x12004);
    }

    #[test]
    fn unit_counts() {
        assert_eq!(SAMD.rows_for(2000), 8);
        assert_eq!(SAMD.pages_for(2000), 32);
        assert_eq!(SAMD.rows_for(2048), 8);
        assert_eq!(SAMD.rows_for(2049), 9);
        assert_eq!(SAMD.pages_for(1024), 16);
        assert_eq!(SAMD.rows_for(0), 0);
    }

    #[test]
    fn offsets() {
        assert_eq!(SAMD.offset_of(0x12000), Some(0));
        assert_eq!(SAMD.offset_of(0x12040), Some(0x40));
        assert_eq!(SAMD.offset_of(0x11fff), None);
        assert_eq!(SAMD.offset_of(0x40000), None);
        assert!(SAMD.fits(0x2e000));
        assert!(!SAMD.fits(0x2e001));
    }

    #[test]
    fn intact_states() {
        assert!(FlashState::Untouched.is_intact());
        assert!(FlashState::Verified.is_intact());
        assert!(!FlashState::Erasing.is_intact());
        assert!(!FlashState::Programming.is_intact());
    }
}
