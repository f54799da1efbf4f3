//! Storage types.
//!
//! Two kinds of storage are involved in a firmware update: the internal
//! non-volatile memory that holds the application, described by the
//! [`ReadFlash`] and [`Flash`] traits, and the removable medium holding the
//! update files, described by the traits in [`fs`].

#![cfg_attr(not(any(feature = "std", test)), no_std)]

pub mod fs;

/// Errors reported by a flash device.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// Offset or length is not a multiple of the required unit.
    NotAligned,
    /// The operation reaches outside of the device.
    OutOfBounds,
    /// A read touched memory that has never been programmed.
    NotWritten,
    /// A write touched memory that has not been erased since it was last
    /// programmed.
    NotErased,
    /// The controller reported a failure (lock, programming error, ...).
    Controller,
}

pub type Result<T> = core::result::Result<T, Error>;

/// Read only interface into flash.
pub trait ReadFlash {
    /// What is the read size (alignment and size multiple).
    fn read_size(&self) -> usize;
    fn read(&mut self, offset: usize, bytes: &mut [u8]) -> Result<()>;
    fn capacity(&self) -> usize;
}

/// Flash that can be written to.
///
/// NOR memories used for internal program storage are erased in rows and
/// programmed in pages.  Programming can only clear bits, so a page must be
/// erased (as part of its row) before it is programmed again.  The row size is
/// always a multiple of the page size.
pub trait Flash: ReadFlash {
    /// Write size, the page (alignment and size multiple).
    fn write_size(&self) -> usize;
    /// Erase size, the row (alignment and size multiple).
    fn erase_size(&self) -> usize;

    /// Erase the rows covering `from..to`.
    fn erase(&mut self, from: usize, to: usize) -> Result<()>;
    /// Program whole pages starting at `offset`.
    fn write(&mut self, offset: usize, bytes: &[u8]) -> Result<()>;
}

/// Some kinds of flash can be mapped into memory.  This is needed for XIP
/// devices, which is every internal flash the bootloader jumps into.
pub trait MappedFlash {
    /// Return the base address of this flash partition, as mapped into memory.
    fn get_base(&self) -> usize;
}

// Utilities taken from embedded-storage for validating arguments.
pub fn check_read<T: ReadFlash>(
    flash: &T,
    offset: usize,
    length: usize,
) -> Result<()> {
    check_slice(flash, flash.read_size(), offset, length)
}

pub fn check_erase<T: Flash>(
    flash: &T,
    from: usize,
    to: usize,
) -> Result<()> {
    if from > to || to > flash.capacity() {
        return Err(Error::OutOfBounds);
    }
    if from % flash.erase_size() != 0 || to % flash.erase_size() != 0 {
        return Err(Error::NotAligned);
    }
    Ok(())
}

pub fn check_write<T: Flash>(
    flash: &T,
    offset: usize,
    length: usize,
) -> Result<()> {
    check_slice(flash, flash.write_size(), offset, length)
}

pub fn check_slice<T: ReadFlash>(
    flash: &T,
    align: usize,
    offset: usize,
    length: usize,
) -> Result<()> {
    if length > flash.capacity() || offset > flash.capacity() - length {
        return Err(Error::OutOfBounds);
    }
    if offset % align != 0 || length % align != 0 {
        return Err(Error::NotAligned);
    }
    Ok(())
}
