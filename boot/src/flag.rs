//! The update flag and golden copy, from the application's side.
//!
//! The bootloader only acts on the presence of the flag file.  Its contents
//! are a note for whoever looks at the card.  The application raises the flag
//! once a new primary image has been written out in full, and can snapshot a
//! known good primary image as the golden one.

use core::fmt::Write as _;

use storage::fs::{self, Mode, Volume};

use crate::log::{info, warn};
use crate::{BootConfig, Error, Result};

/// Chunk size used for copying between files.
const COPY_CHUNK: usize = 256;

/// Is an update requested?
pub fn update_pending<V: Volume>(volume: &mut V, config: &BootConfig) -> bool {
    volume.exists(config.flag_path.as_str())
}

/// Raise the update flag.  `note` ends up in the flag file as text.
pub fn request_update<V: Volume>(volume: &mut V, config: &BootConfig, note: &str) -> Result<()> {
    let mut file = volume
        .open(config.flag_path.as_str(), Mode::Create)
        .map_err(Error::Write)?;

    let mut line: heapless::String<96> = heapless::String::new();
    if write!(line, "Firmware update requested: {}\r\n", note).is_err() {
        // Too long for the buffer, keep the fixed part.
        line.clear();
        let _ = line.push_str("Firmware update requested\r\n");
    }

    let result = write_all(volume, &mut file, line.as_bytes());
    volume.close(file);
    result?;
    info!("Flag file created: {}", config.flag_path.as_str());
    Ok(())
}

/// Copy the primary image to the golden path.  Returns the number of bytes
/// copied.
pub fn create_golden<V: Volume>(volume: &mut V, config: &BootConfig) -> Result<u64> {
    info!("Creating golden copy of {}", config.primary_path.as_str());

    let mut src = volume
        .open(config.primary_path.as_str(), Mode::Read)
        .map_err(Error::Read)?;
    let mut dst = match volume.open(config.golden_path.as_str(), Mode::Create) {
        Ok(dst) => dst,
        Err(err) => {
            volume.close(src);
            return Err(Error::Write(err));
        }
    };

    let mut buf = [0u8; COPY_CHUNK];
    let mut copied = 0u64;
    let result = loop {
        let count = match volume.read(&mut src, &mut buf) {
            Ok(0) => break Ok(copied),
            Ok(count) => count,
            Err(err) => break Err(Error::Read(err)),
        };
        if let Err(err) = write_all(volume, &mut dst, &buf[..count]) {
            break Err(err);
        }
        copied += count as u64;
    };

    volume.close(src);
    volume.close(dst);

    match result {
        Ok(copied) => info!("Golden copy created: {} ({} bytes)", config.golden_path.as_str(), copied),
        Err(err) => warn!("Copy failed: {:?}", err),
    }
    result
}

/// A write that comes up short counts as the medium being full.
fn write_all<V: Volume>(volume: &mut V, file: &mut V::File, data: &[u8]) -> Result<()> {
    let written = volume.write(file, data).map_err(Error::Write)?;
    if written != data.len() {
        return Err(Error::Write(fs::Error::Full));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use simflash::{fs::DirFs, gen::GenBuilder};
    use storage::fs::Mount;

    use super::*;

    #[test]
    fn raise_flag() {
        let mut card = DirFs::new().unwrap();
        let config = BootConfig::default();
        let mut vol = card.mount().unwrap();

        assert!(!update_pending(&mut vol, &config));
        request_update(&mut vol, &config, "OTAU").unwrap();
        assert!(update_pending(&mut vol, &config));
        assert_eq!(
            card.get("FlagA.txt").unwrap(),
            b"Firmware update requested: OTAU\r\n".to_vec()
        );
        assert_eq!(card.activity().open, 0);
    }

    #[test]
    fn long_note() {
        let mut card = DirFs::new().unwrap();
        let config = BootConfig::default();
        let mut vol = card.mount().unwrap();

        let note = [b'x'; 200];
        request_update(&mut vol, &config, core::str::from_utf8(&note).unwrap()).unwrap();
        assert_eq!(card.get("FlagA.txt").unwrap(), b"Firmware update requested\r\n".to_vec());
    }

    #[test]
    fn golden_copy() {
        let mut card = DirFs::new().unwrap();
        let img = GenBuilder::default().size(1000).build();
        card.put("Application.bin", &img.data).unwrap();
        let config = BootConfig::default();
        let mut vol = card.mount().unwrap();

        assert_eq!(create_golden(&mut vol, &config), Ok(1000));
        assert_eq!(card.get("g_application.bin").unwrap(), img.data);
        assert_eq!(card.activity().open, 0);
    }

    #[test]
    fn golden_copy_failures() {
        let mut card = DirFs::new().unwrap();
        let config = BootConfig::default();
        {
            let mut vol = card.mount().unwrap();
            assert_eq!(create_golden(&mut vol, &config), Err(Error::Read(fs::Error::NotFound)));
        }

        card.put("Application.bin", &[3u8; 1000]).unwrap();
        card.fail_read("Application.bin", 600);
        let mut vol = card.mount().unwrap();
        assert_eq!(create_golden(&mut vol, &config), Err(Error::Read(fs::Error::Device)));
        // The partial golden copy stays, as it would on the card.
        assert_eq!(card.get("g_application.bin").unwrap().len(), 600);
        assert_eq!(card.activity().open, 0);
    }
}
