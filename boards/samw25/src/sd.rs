//! The update medium, a FAT formatted SD card.
//!
//! `embedded-sdmmc` only deals in 8.3 names, while the application, which
//! uses a long name aware FAT driver, writes the images under their long
//! names.  On the card those carry the short alias the long name driver
//! generates, which for the first file with a given stem is the first six
//! characters, upper cased, followed by `~1`.  Paths are translated to that
//! alias before they reach the driver.

use embedded_sdmmc::{
    BlockDevice, Mode as SdMode, RawDirectory, RawFile, RawVolume, TimeSource, Timestamp,
    VolumeIdx, VolumeManager,
};
use storage::fs::{Error, Mode, Mount, Result, Volume};

/// The short name of `path`, as a FAT driver with long names would have
/// stored it.
pub fn short_name(path: &str) -> Result<heapless::String<12>> {
    let path = path.trim_start_matches('/');
    let (stem, ext) = match path.rfind('.') {
        Some(dot) => (&path[..dot], &path[dot + 1..]),
        None => (path, ""),
    };
    if stem.is_empty() || ext.len() > 3 || !path.is_ascii() || path.contains('/') {
        return Err(Error::BadPath);
    }

    let mut name = heapless::String::new();
    let push = |name: &mut heapless::String<12>, c: char| {
        name.push(c.to_ascii_uppercase()).map_err(|_| Error::BadPath)
    };
    if stem.len() <= 8 {
        for c in stem.chars() {
            push(&mut name, c)?;
        }
    } else {
        for c in stem.chars().take(6) {
            push(&mut name, c)?;
        }
        name.push_str("~1").map_err(|_| Error::BadPath)?;
    }
    if !ext.is_empty() {
        push(&mut name, '.')?;
        for c in ext.chars() {
            push(&mut name, c)?;
        }
    }
    Ok(name)
}

fn sd_error<E: core::fmt::Debug>(err: embedded_sdmmc::Error<E>) -> Error {
    use embedded_sdmmc::Error as E;
    match err {
        E::NotFound => Error::NotFound,
        E::FilenameError(_) => Error::BadPath,
        E::NotEnoughSpace => Error::Full,
        E::ReadOnly => Error::Mode,
        E::FormatError(_) | E::NoSuchVolume => Error::NoFilesystem,
        _ => Error::Device,
    }
}

/// There is no real time clock; files the bootloader writes are dated to the
/// start of 2024.
pub struct FixedClock;

impl TimeSource for FixedClock {
    fn get_timestamp(&self) -> Timestamp {
        Timestamp {
            year_since_1970: 54,
            zero_indexed_month: 0,
            zero_indexed_day: 0,
            hours: 0,
            minutes: 0,
            seconds: 0,
        }
    }
}

/// The card slot.  Holds the volume manager while nothing is mounted.
pub struct SdSlot<D: BlockDevice, T: TimeSource> {
    manager: Option<VolumeManager<D, T>>,
}

impl<D: BlockDevice, T: TimeSource> SdSlot<D, T> {
    pub fn new(manager: VolumeManager<D, T>) -> Self {
        SdSlot { manager: Some(manager) }
    }
}

impl<D, T> Mount for SdSlot<D, T>
where
    D: BlockDevice,
    D::Error: core::fmt::Debug,
    T: TimeSource,
{
    type Volume = SdVolume<D, T>;

    fn mount(&mut self) -> Result<SdVolume<D, T>> {
        let mut manager = self.manager.take().ok_or(Error::NoFilesystem)?;
        let volume = match manager.open_raw_volume(VolumeIdx(0)) {
            Ok(volume) => volume,
            Err(err) => {
                defmt::warn!("Card not readable: {}", defmt::Debug2Format(&err));
                self.manager = Some(manager);
                return Err(Error::NoFilesystem);
            }
        };
        let root = match manager.open_root_dir(volume) {
            Ok(root) => root,
            Err(_) => {
                let _ = manager.close_volume(volume);
                self.manager = Some(manager);
                return Err(Error::NoFilesystem);
            }
        };
        Ok(SdVolume { manager, volume, root })
    }
}

pub struct SdVolume<D: BlockDevice, T: TimeSource> {
    manager: VolumeManager<D, T>,
    volume: RawVolume,
    root: RawDirectory,
}

impl<D, T> Volume for SdVolume<D, T>
where
    D: BlockDevice,
    D::Error: core::fmt::Debug,
    T: TimeSource,
{
    type File = RawFile;

    fn open(&mut self, path: &str, mode: Mode) -> Result<RawFile> {
        let name = short_name(path)?;
        let mode = match mode {
            Mode::Read => SdMode::ReadOnly,
            Mode::Create => SdMode::ReadWriteCreateOrTruncate,
        };
        self.manager
            .open_file_in_dir(self.root, name.as_str(), mode)
            .map_err(sd_error)
    }

    fn read(&mut self, file: &mut RawFile, buf: &mut [u8]) -> Result<usize> {
        if self.manager.file_eof(*file).map_err(sd_error)? {
            return Ok(0);
        }
        self.manager.read(*file, buf).map_err(sd_error)
    }

    fn write(&mut self, file: &mut RawFile, buf: &[u8]) -> Result<usize> {
        self.manager.write(*file, buf).map_err(sd_error)?;
        Ok(buf.len())
    }

    fn size(&self, file: &RawFile) -> u64 {
        match self.manager.file_length(*file) {
            Ok(length) => u64::from(length),
            Err(err) => {
                defmt::warn!("File length unavailable: {}", defmt::Debug2Format(&err));
                0
            }
        }
    }

    fn exists(&mut self, path: &str) -> bool {
        match short_name(path) {
            Ok(name) => self.manager.find_directory_entry(self.root, name.as_str()).is_ok(),
            Err(_) => false,
        }
    }

    fn delete(&mut self, path: &str) -> Result<()> {
        let name = short_name(path)?;
        self.manager
            .delete_file_in_dir(self.root, name.as_str())
            .map_err(sd_error)
    }

    fn close(&mut self, file: RawFile) {
        if let Err(err) = self.manager.close_file(file) {
            defmt::warn!("Close failed: {}", defmt::Debug2Format(&err));
        }
    }

    fn unmount(mut self) {
        let _ = self.manager.close_dir(self.root);
        let _ = self.manager.close_volume(self.volume);
    }
}
