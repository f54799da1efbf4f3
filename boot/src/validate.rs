//! Candidate image checks.
//!
//! These only catch an image that is plainly unusable: missing, cut short by
//! an interrupted download, or too big for the region.  The contents are not
//! examined, there is no checksum or signature in the update files to check
//! them against.

use storage::fs::{self, Mode, Volume};

use crate::log::{info, warn};
use crate::{BootConfig, FlashRegion};

/// Why a candidate was turned down.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Rejection {
    /// The file could not be opened.
    Missing(fs::Error),
    /// Below the plausibility threshold.
    TooSmall(u64),
    /// Larger than the application region.
    TooLarge(u64),
}

/// An opened image file that passed the checks.
pub struct Candidate<F> {
    pub file: F,
    pub size: u64,
}

/// Open the image at `path` and check that it could be a complete image for
/// `region`.  On rejection the file has been closed again.
pub fn open_candidate<V: Volume>(
    volume: &mut V,
    path: &str,
    region: &FlashRegion,
    config: &BootConfig,
) -> Result<Candidate<V::File>, Rejection> {
    info!("Opening file: {}", path);
    let file = match volume.open(path, Mode::Read) {
        Ok(file) => file,
        Err(err) => {
            warn!("Failed to open file: {:?}", err);
            return Err(Rejection::Missing(err));
        }
    };

    let size = volume.size(&file);
    info!("File size: {} bytes", size);
    let verdict = check_size(size, region, config);
    if let Err(rejection) = verdict {
        match rejection {
            Rejection::TooLarge(_) => warn!("File too large for the application region"),
            _ => warn!("File too small to be valid firmware"),
        }
        volume.close(file);
        return Err(rejection);
    }
    Ok(Candidate { file, size })
}

/// The size rules on their own.  An empty file is never an image, whatever
/// the threshold.
pub fn check_size(size: u64, region: &FlashRegion, config: &BootConfig) -> Result<(), Rejection> {
    if size == 0 || size < config.min_image_size {
        return Err(Rejection::TooSmall(size));
    }
    if !region.fits(size) {
        return Err(Rejection::TooLarge(size));
    }
    Ok(())
}
