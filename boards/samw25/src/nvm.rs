//! SAMD21 NVM controller driver.
//!
//! The internal flash is erased in rows of 256 bytes and written in pages of
//! 64 bytes, four to a row.  A write goes through the page buffer: it is
//! cleared, filled with 32-bit stores to the target address, and then
//! committed with the write page command.  Reads are plain memory accesses.
//!
//! The hal only uses the NVMCTRL for wait states, so the peripheral is handed
//! over once the clocks are up:
//!
//!     let clocks = GenericClockController::with_internal_32kosc(.., &mut dp.NVMCTRL);
//!     let flash = nvm::NvmPartition::new(dp.NVMCTRL, APP_BASE, length)?;

use atsamd_hal::pac::NVMCTRL;
use boot::MappedFlash;
use storage::{Error, Flash, ReadFlash, Result};

pub const ROW_SIZE: usize = 256;
pub const PAGE_SIZE: usize = 64;

const FLASH_SIZE: usize = 256 * 1024;

/// Controller commands used here.
#[derive(Clone, Copy)]
enum Command {
    EraseRow,
    WritePage,
    ClearPageBuffer,
}

/// A partition of the internal flash.
pub struct NvmPartition {
    nvm: NVMCTRL,
    base: usize,
    length: usize,
}

impl NvmPartition {
    /// Take over the partition at `base`.  Both ends must be row aligned and
    /// inside the device.
    pub fn new(nvm: NVMCTRL, base: usize, length: usize) -> Result<NvmPartition> {
        if length == 0 || base % ROW_SIZE != 0 || length % ROW_SIZE != 0 {
            return Err(Error::NotAligned);
        }
        let end = base.checked_add(length).ok_or(Error::OutOfBounds)?;
        if end > FLASH_SIZE {
            return Err(Error::OutOfBounds);
        }

        // Pages are only committed on an explicit write page command.
        nvm.ctrlb.modify(|_, w| w.manw().set_bit());

        Ok(NvmPartition { nvm, base, length })
    }

    fn wait_ready(&self) {
        while self.nvm.intflag.read().ready().bit_is_clear() {}
    }

    /// Issue `cmd`, operating on the absolute address `addr`.
    fn command(&mut self, cmd: Command, addr: usize) -> Result<()> {
        self.wait_ready();
        self.nvm
            .status
            .write(|w| w.proge().set_bit().locke().set_bit().nvme().set_bit());
        // ADDR holds a 16-bit word address.
        self.nvm.addr.write(|w| unsafe { w.addr().bits((addr >> 1) as u32) });
        self.nvm.ctrla.write(|w| {
            let w = w.cmdex().key();
            match cmd {
                Command::EraseRow => w.cmd().er(),
                Command::WritePage => w.cmd().wp(),
                Command::ClearPageBuffer => w.cmd().pbc(),
            }
        });
        self.wait_ready();

        let status = self.nvm.status.read();
        if status.proge().bit_is_set() || status.locke().bit_is_set() || status.nvme().bit_is_set() {
            defmt::error!("NVM command failed at {:#x}", addr);
            return Err(Error::Controller);
        }
        Ok(())
    }
}

impl ReadFlash for NvmPartition {
    fn read_size(&self) -> usize {
        1
    }

    fn read(&mut self, offset: usize, bytes: &mut [u8]) -> Result<()> {
        storage::check_read(self, offset, bytes.len())?;
        let memory =
            unsafe { core::slice::from_raw_parts((self.base + offset) as *const u8, bytes.len()) };
        bytes.copy_from_slice(memory);
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.length
    }
}

impl Flash for NvmPartition {
    fn write_size(&self) -> usize {
        PAGE_SIZE
    }

    fn erase_size(&self) -> usize {
        ROW_SIZE
    }

    fn erase(&mut self, from: usize, to: usize) -> Result<()> {
        storage::check_erase(self, from, to)?;
        for row in (from..to).step_by(ROW_SIZE) {
            self.command(Command::EraseRow, self.base + row)?;
        }
        Ok(())
    }

    fn write(&mut self, offset: usize, bytes: &[u8]) -> Result<()> {
        storage::check_write(self, offset, bytes.len())?;
        for (n, page) in bytes.chunks_exact(PAGE_SIZE).enumerate() {
            let addr = self.base + offset + n * PAGE_SIZE;
            self.command(Command::ClearPageBuffer, addr)?;
            // The page buffer is filled through the flash address space itself.
            for (i, word) in page.chunks_exact(4).enumerate() {
                let word = u32::from_le_bytes([word[0], word[1], word[2], word[3]]);
                unsafe { core::ptr::write_volatile((addr + i * 4) as *mut u32, word) };
            }
            self.command(Command::WritePage, addr)?;
        }
        Ok(())
    }
}

impl MappedFlash for NvmPartition {
    fn get_base(&self) -> usize {
        self.base
    }
}
