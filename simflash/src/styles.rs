//! Flash styles
//!
//! Various microcontrollers have various types of flash memories available to
//! them.  Each layout here describes the application region the bootloader
//! programs, placed after the bootloader itself.

use anyhow::Result;

use crate::SimFlash;

/// The configuration of a single application region.
pub struct AreaLayout {
    pub base: usize,
    /// Page size.
    pub write_size: usize,
    /// Row size.
    pub erase_size: usize,
    pub rows: usize,
}

impl AreaLayout {
    pub fn build(&self) -> Result<SimFlash> {
        SimFlash::new(self.base, self.write_size, self.erase_size, self.rows)
    }

    pub fn capacity(&self) -> usize {
        self.erase_size * self.rows
    }
}

/// SAMD21-style, as on the SAMW25 module.  64 byte pages, four to a row.  The
/// bootloader takes the first 72k of the 256k flash.
pub static SAMD21: AreaLayout = AreaLayout {
    base: 0x12000,
    write_size: 64,
    erase_size: 256,
    rows: (0x40000 - 0x12000) / 256,
};

/// Page-style devices.  Based on the LPC55S69, where a page is both the erase
/// and the write unit.
pub static LPC: AreaLayout = AreaLayout {
    base: 0x20000,
    write_size: 512,
    erase_size: 512,
    rows: 128 * 2,
};

/// K64-style, small uniform sectors with a small write.
pub static K64: AreaLayout = AreaLayout {
    base: 0x20000,
    write_size: 8,
    erase_size: 4 * 1024,
    rows: 128 / 4,
};

/// Large write, based on the STM32H745.
pub static STM32H: AreaLayout = AreaLayout {
    base: 0x0802_0000,
    write_size: 32,
    erase_size: 128 * 1024,
    rows: 3,
};

/// All of the flash layouts.
pub static ALL_FLASHES: [&AreaLayout; 4] = [&SAMD21, &LPC, &K64, &STM32H];

/// An iterator that builds each of the layouts in turn.
pub fn all_flashes() -> impl Iterator<Item = Result<SimFlash>> {
    ALL_FLASHES.iter().map(|layout| layout.build())
}
