//! This is a basic SD card update bootloader built for embedded rust.
//!
//! At every boot it checks the removable medium for an update flag.  When the
//! flag is present, the primary image is written into the application region
//! of the internal flash, falling back on the golden image if that fails.
//! Either way, control is then handed to whatever application is resident.
//!
//! The pieces, leaf first:
//!
//! - [`FlashRegion`] and [`Programmer`]: erase and program discipline for the
//!   application region.
//! - [`validate`]: plausibility checks on a candidate image file.
//! - [`Updater`]: the boot-time decision procedure.
//! - [`launch`]: the handoff into the application, and [`launch::boot`],
//!   which strings everything together.

#![cfg_attr(not(any(feature = "std", test)), no_std)]

mod log;

mod config;
pub mod flag;
pub mod launch;
pub mod program;
mod region;
pub mod update;
pub mod validate;

pub use config::{BootConfig, Path, GOLDEN_IMAGE, MIN_IMAGE_SIZE, PRIMARY_IMAGE, UPDATE_FLAG};
pub use program::Programmer;
pub use region::{FlashRegion, FlashState};
pub use update::{Report, Slot, Stage, Updater};
pub use validate::Rejection;

use storage::fs;
pub use storage::MappedFlash;

type Result<T> = core::result::Result<T, Error>;

// Use the error kind to avoid this depending on the particular flash.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// The removable medium could not be mounted.
    Mount(fs::Error),
    /// The candidate image is not usable.
    Invalid(Rejection),
    /// Reading the image file failed part way through.
    Read(fs::Error),
    /// The image file ended before the size it reported.
    Truncated,
    /// Erasing a row of the application region failed.
    Erase { row: u32, err: storage::Error },
    /// Programming a page failed.
    Program { address: u32, err: storage::Error },
    /// Flash read back after programming does not match what was written.
    Verify,
    /// Flash geometry or an address does not fit the application region.
    Layout,
    /// Any other flash failure, such as a read back error.
    Flash(storage::Error),
    /// Writing to the removable medium failed.
    Write(fs::Error),
}

/// The coarse classification of [`Error`], which decides how the boot
/// sequence reacts.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ErrorKind {
    /// Nothing more can be done in this boot; the device restarts.
    StorageFatal,
    /// The candidate is not usable; try the next one.
    ImageInvalid,
    /// The flashing attempt was aborted; try the next candidate.
    FlashOperationFailed,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Mount(_) => ErrorKind::StorageFatal,
            Error::Invalid(_) => ErrorKind::ImageInvalid,
            Error::Read(_)
            | Error::Truncated
            | Error::Erase { .. }
            | Error::Program { .. }
            | Error::Verify
            | Error::Layout
            | Error::Flash(_)
            | Error::Write(_) => ErrorKind::FlashOperationFailed,
        }
    }
}

/// Convert the flash error into our error type.
impl From<storage::Error> for Error {
    fn from(e: storage::Error) -> Self {
        Error::Flash(e)
    }
}

impl From<Rejection> for Error {
    fn from(r: Rejection) -> Self {
        Error::Invalid(r)
    }
}
