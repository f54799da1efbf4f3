//! Filesystem access on removable media.
//!
//! The bootloader never needs directories, seeking, or more than one open
//! file at a time, so the interface is a handle based subset of what a FAT
//! driver provides.  A [`Mount`] produces a [`Volume`], and all file
//! operations go through the volume with the file handle passed in, which
//! maps directly onto drivers that keep their open file table in the volume
//! manager.

/// Errors reported by a filesystem.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// The medium could not be brought up, or holds no usable filesystem.
    NoFilesystem,
    /// There is no file at the given path.
    NotFound,
    /// The path cannot be represented on this filesystem.
    BadPath,
    /// The underlying block device failed.
    Device,
    /// The medium is full.
    Full,
    /// The file was opened in a mode that does not permit the operation.
    Mode,
}

pub type Result<T> = core::result::Result<T, Error>;

/// How to open a file.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Mode {
    /// Open an existing file for reading.
    Read,
    /// Create the file, truncating it if it already exists, and open it for
    /// writing.
    Create,
}

/// Something that can be mounted to give a volume.
pub trait Mount {
    type Volume: Volume;

    fn mount(&mut self) -> Result<Self::Volume>;
}

/// A mounted filesystem.  Paths are relative to the root of the volume.
pub trait Volume {
    type File;

    fn open(&mut self, path: &str, mode: Mode) -> Result<Self::File>;

    /// Read from the current position.  Returns the number of bytes read, which
    /// is only zero at the end of the file.  Short reads are allowed.
    fn read(&mut self, file: &mut Self::File, buf: &mut [u8]) -> Result<usize>;

    /// Write at the current position, returning the number of bytes written.
    fn write(&mut self, file: &mut Self::File, buf: &[u8]) -> Result<usize>;

    /// Size of the file in bytes.
    fn size(&self, file: &Self::File) -> u64;

    fn exists(&mut self, path: &str) -> bool;
    fn delete(&mut self, path: &str) -> Result<()>;
    fn close(&mut self, file: Self::File);

    /// Flush and release the volume.
    fn unmount(self);
}
