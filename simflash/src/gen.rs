//! Image generation.
//!
//! Application images as the bootloader sees them are raw binaries: the
//! Cortex-M vector table at the start, code and data after it.  The generated
//! images have a plausible initial stack pointer and reset vector, and
//! pseudo-random contents, so that misplaced or dropped pages show up when the
//! flash is compared against the file.

use rand::{RngCore, SeedableRng};
use rand_xoshiro::Xoshiro256Plus;

pub struct GeneratedImage {
    pub data: Vec<u8>,
}

impl GeneratedImage {
    /// The first word, the initial stack pointer.
    pub fn msp(&self) -> u32 {
        word(&self.data, 0)
    }

    /// The second word, the reset vector.
    pub fn reset(&self) -> u32 {
        word(&self.data, 4)
    }
}

fn word(data: &[u8], at: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&data[at..at + 4]);
    u32::from_le_bytes(raw)
}

pub struct GenBuilder {
    /// Total size of the image.
    size: usize,
    /// Seed for the PRNG
    seed: u64,
    /// Address the image is linked to run at.
    base: u32,
    /// Initial stack pointer.
    stack_top: u32,
}

impl Default for GenBuilder {
    fn default() -> Self {
        GenBuilder {
            size: 76_137,
            seed: 1,
            base: 0x12000,
            stack_top: 0x2000_8000,
        }
    }
}

impl GenBuilder {
    pub fn size(&mut self, size: usize) -> &mut Self {
        self.size = size;
        self
    }

    pub fn seed(&mut self, seed: u64) -> &mut Self {
        self.seed = seed;
        self
    }

    pub fn base(&mut self, base: u32) -> &mut Self {
        self.base = base;
        self
    }

    pub fn build(&self) -> GeneratedImage {
        let mut rng = Xoshiro256Plus::seed_from_u64(self.seed);
        let mut data = vec![0u8; self.size];
        rng.fill_bytes(&mut data);

        // Vector table head, if there is room for one.  The reset handler lives
        // just past a 48 entry table, with the thumb bit set.
        if self.size >= 8 {
            data[0..4].copy_from_slice(&self.stack_top.to_le_bytes());
            let reset = (self.base + 48 * 4) | 1;
            data[4..8].copy_from_slice(&reset.to_le_bytes());
        }

        GeneratedImage { data }
    }
}
