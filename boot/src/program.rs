//! Flash programming.
//!
//! An image is copied from a file into the application region in two passes
//! over flash.  First every row the image will occupy is erased, in ascending
//! order.  Then the file is read a page at a time, and each page is
//! programmed at the cursor, which starts at the region base and moves up one
//! page per write.  The last page is zero filled past the end of the file, so
//! only whole pages are ever written.
//!
//! Nothing is rolled back on failure.  Once the first erase has been issued,
//! the previous application is gone, and the region only holds something
//! runnable again when a pass completes.  [`FlashState`] tracks where we are.

use sha2::{Digest, Sha256};
use storage::{fs::Volume, Flash, MappedFlash};

use crate::log::{debug, error, info, trace};
use crate::{Error, FlashRegion, FlashState, Rejection, Result};

/// Emit a progress line every this many bytes.
const PROGRESS: u64 = 4096;

/// Position of a programming pass.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct WriteCursor {
    /// Address of the next page to program.
    pub address: u32,
    /// Bytes of the file consumed so far.
    pub consumed: u64,
    /// Size of the file.
    pub total: u64,
    /// Pages programmed so far.
    pub pages: u32,
}

impl WriteCursor {
    fn new(base: u32, total: u64) -> WriteCursor {
        WriteCursor { address: base, consumed: 0, total, pages: 0 }
    }

    /// Bytes still to come from the file.
    pub fn remaining(&self) -> u64 {
        self.total - self.consumed
    }
}

/// Owns the application region for the duration of the boot.  `PAGE` is the
/// program granularity of the device, and the size of the stack buffer used
/// for each write.
pub struct Programmer<'f, F, const PAGE: usize> {
    flash: &'f mut F,
    region: FlashRegion,
    state: FlashState,
    /// Rows erased by the current pass, counted from the base.
    erased_rows: u32,
    verify: bool,
}

impl<'f, F: Flash + MappedFlash, const PAGE: usize> Programmer<'f, F, PAGE> {
    pub fn new(flash: &'f mut F) -> Result<Self> {
        let region = FlashRegion::of(&*flash)?;
        if region.page_size as usize != PAGE {
            error!("Page buffer of {} bytes, device pages are {}", PAGE, region.page_size);
            return Err(Error::Layout);
        }
        Ok(Programmer {
            flash,
            region,
            state: FlashState::Untouched,
            erased_rows: 0,
            verify: true,
        })
    }

    /// Whether to read the image back after programming it.
    pub fn verify_readback(&mut self, verify: bool) {
        self.verify = verify;
    }

    pub fn region(&self) -> &FlashRegion {
        &self.region
    }

    pub fn state(&self) -> FlashState {
        self.state
    }

    /// Erase `rows` rows starting at the region base.  Stops at the first row
    /// that fails, leaving the earlier rows erased.
    pub fn erase(&mut self, rows: u32) -> Result<()> {
        let row_size = self.region.row_size;
        if rows as u64 * row_size as u64 > self.region.length as u64 {
            return Err(Error::Layout);
        }
        if rows == 0 {
            return Ok(());
        }

        self.state = FlashState::Erasing;
        self.erased_rows = 0;
        for row in 0..rows {
            let from = (row * row_size) as usize;
            if let Err(err) = self.flash.erase(from, from + row_size as usize) {
                error!("Erase failed at row {}: {:?}", row, err);
                return Err(Error::Erase { row, err });
            }
            self.erased_rows = row + 1;
        }
        debug!("Erased {} rows at {:#x}", rows, self.region.base);
        Ok(())
    }

    /// Program one page at `address`, which must be page aligned, inside the
    /// region, and in a row erased by the current pass.
    pub fn program(&mut self, address: u32, page: &[u8; PAGE]) -> Result<()> {
        let offset = self.region.offset_of(address).ok_or(Error::Layout)?;
        if offset % PAGE != 0 || offset + PAGE > self.region.length as usize {
            return Err(Error::Layout);
        }
        let row = (offset / self.region.row_size as usize) as u32;
        if row >= self.erased_rows {
            error!("Page at {:#x} has not been erased", address);
            return Err(Error::Layout);
        }

        self.state = FlashState::Programming;
        self.flash.write(offset, page).map_err(|err| {
            error!("Flash write error at {:#x}: {:?}", address, err);
            Error::Program { address, err }
        })
    }

    /// Copy `size` bytes of `file` into the region.  On success the region
    /// holds the image, zero padded to a page boundary, and the state is
    /// [`FlashState::Verified`].  The file is left open.  An empty file is
    /// refused before anything is erased.
    pub fn flash_image<V: Volume>(
        &mut self,
        volume: &mut V,
        file: &mut V::File,
        size: u64,
    ) -> Result<WriteCursor> {
        if size == 0 {
            return Err(Error::Invalid(Rejection::TooSmall(0)));
        }
        if !self.region.fits(size) {
            return Err(Error::Layout);
        }

        let rows = self.region.rows_for(size) as u32;
        info!("Erasing application area, {} rows", rows);
        self.erase(rows)?;

        info!("Flashing firmware");
        let mut cursor = WriteCursor::new(self.region.base, size);
        let mut hasher = Sha256::new();
        let mut page = [0u8; PAGE];
        while cursor.remaining() > 0 {
            page.fill(0);
            let todo = cursor.remaining().min(PAGE as u64) as usize;
            fill(volume, file, &mut page[..todo])?;

            self.program(cursor.address, &page)?;
            hasher.update(page);

            cursor.address += PAGE as u32;
            cursor.consumed += todo as u64;
            cursor.pages += 1;
            if cursor.consumed % PROGRESS == 0 {
                trace!("{} bytes flashed", cursor.consumed);
            }
        }

        if self.verify {
            let mut expect = [0u8; 32];
            expect.copy_from_slice(hasher.finalize().as_slice());
            if self.readback_sha256(cursor.pages)? != expect {
                error!("Flash contents do not match the image");
                return Err(Error::Verify);
            }
        }

        self.state = FlashState::Verified;
        info!("Flashed {} bytes to address {:#x}", cursor.consumed, self.region.base);
        Ok(cursor)
    }

    /// Hash the first `pages` pages of the region as they read back.
    fn readback_sha256(&mut self, pages: u32) -> Result<[u8; 32]> {
        let mut hasher = Sha256::new();
        let mut buffer = [0u8; PAGE];
        for page in 0..pages as usize {
            self.flash.read(page * PAGE, &mut buffer)?;
            hasher.update(buffer);
        }
        let mut result = [0u8; 32];
        result.copy_from_slice(hasher.finalize().as_slice());
        Ok(result)
    }
}

/// Fill `buf` from the file, across as many reads as it takes.  The file
/// ending early is an error, as the caller asked for bytes the file claimed to
/// have.
fn fill<V: Volume>(volume: &mut V, file: &mut V::File, buf: &mut [u8]) -> Result<()> {
    let mut pos = 0;
    while pos < buf.len() {
        match volume.read(file, &mut buf[pos..]) {
            Ok(0) => {
                error!("File ended {} bytes early", buf.len() - pos);
                return Err(Error::Truncated);
            }
            Ok(count) => pos += count,
            Err(err) => {
                error!("File read error: {:?}", err);
                return Err(Error::Read(err));
            }
        }
    }
    Ok(())
}
