//! Handoff to the application.
//!
//! The application is a plain Cortex-M image linked to run from the base of
//! the region: its vector table starts there, giving the initial stack pointer
//! in the first word and the reset vector in the second.  Handing over means
//! pointing VTOR at that table, loading the stack pointer, and branching to
//! the reset vector.  None of this returns.  If the image is not runnable, the
//! processor faults somewhere inside it, and the bootloader cannot notice.

use storage::{
    fs::{Mount, Volume},
    Flash, MappedFlash, ReadFlash,
};

use crate::log::{error, info, warn};
use crate::update::{Report, Updater};
use crate::{BootConfig, Result};

/// What the bootloader needs from the board.
pub trait Platform {
    fn delay_ms(&mut self, ms: u32);

    /// Shut down the peripherals the bootloader used (console, storage bus,
    /// SysTick) so the application finds them in their reset state.
    fn quiesce(&mut self);

    /// Restart the device.
    fn reset(&mut self) -> !;

    /// Start the image whose vector table is at `base`.
    ///
    /// # Safety
    ///
    /// `base` must be the address of a vector table in executable memory.
    /// Nothing the bootloader holds survives the call.
    unsafe fn jump(&mut self, base: u32) -> !;
}

/// The head of a Cortex-M vector table.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct VectorTable {
    /// Initial main stack pointer.
    pub msp: u32,
    /// Reset handler address, with the thumb bit.
    pub reset: u32,
}

impl VectorTable {
    /// Read the table head from the start of a flash partition.
    pub fn read<F: ReadFlash>(flash: &mut F) -> Result<VectorTable> {
        let mut raw = [0u8; 8];
        flash.read(0, &mut raw)?;
        let (msp, reset) = raw.split_at(4);
        Ok(VectorTable {
            msp: u32::from_le_bytes([msp[0], msp[1], msp[2], msp[3]]),
            reset: u32::from_le_bytes([reset[0], reset[1], reset[2], reset[3]]),
        })
    }
}

/// Hand off to the application resident in `flash`.
pub fn launch<V, F, P>(volume: V, flash: &mut F, platform: &mut P, config: &BootConfig) -> !
where
    V: Volume,
    F: ReadFlash + MappedFlash,
    P: Platform,
{
    let base = flash.get_base() as u32;
    match VectorTable::read(flash) {
        Ok(vector) => info!("chain {:#x}: msp {:#x}, reset {:#x}", base, vector.msp, vector.reset),
        Err(err) => warn!("Cannot read the vector table at {:#x}: {:?}", base, err),
    }
    info!("Exit bootloader");

    platform.delay_ms(config.exit_delay_ms);
    volume.unmount();
    platform.quiesce();

    unsafe { platform.jump(base) }
}

/// Run the update procedure against an already mounted volume.  A flash
/// whose geometry does not match `PAGE` is left alone.
pub fn update<V, F, const PAGE: usize>(volume: &mut V, flash: &mut F, config: &BootConfig) -> Report
where
    V: Volume,
    F: Flash + MappedFlash,
{
    match Updater::<_, _, PAGE>::new(volume, flash, config) {
        Ok(mut updater) => updater.run(),
        Err(err) => {
            error!("Application region unusable, skipping update: {:?}", err);
            Report::new()
        }
    }
}

/// The whole boot sequence: mount the update medium, apply a pending update,
/// and start the application.
pub fn boot<M, F, P, const PAGE: usize>(
    media: &mut M,
    flash: &mut F,
    platform: &mut P,
    config: &BootConfig,
) -> !
where
    M: Mount,
    F: Flash + MappedFlash,
    P: Platform,
{
    info!("Enter bootloader");

    let mut volume = match media.mount() {
        Ok(volume) => {
            info!("SD card mount success! Filesystem also mounted.");
            volume
        }
        Err(err) => {
            error!(
                "SD card failed: {:?}. System will restart in {} ms...",
                err, config.mount_retry_delay_ms
            );
            platform.delay_ms(config.mount_retry_delay_ms);
            platform.reset();
        }
    };

    let report = update::<_, _, PAGE>(&mut volume, flash, config);

    if !report.region_intact() {
        if config.halt_on_damaged_image {
            error!("Application region left {:?}, not starting it", report.state);
            volume.unmount();
            platform.delay_ms(config.mount_retry_delay_ms);
            platform.reset();
        }
        warn!("Application region left {:?}, starting it anyway", report.state);
    }

    launch(volume, flash, platform, config)
}

/// Cortex-M handoff and reset.
#[cfg(feature = "cortex-m")]
pub mod cortex {
    /// Point VTOR at `base`, load MSP from it, and branch to its reset vector.
    ///
    /// # Safety
    ///
    /// `base` must hold a valid vector table.  All interrupts should be
    /// disabled and cleared beforehand.
    pub unsafe fn jump(base: u32) -> ! {
        unsafe {
            let p = ::cortex_m::Peripherals::steal();
            p.SCB.vtor.write(base);
            ::cortex_m::asm::dsb();
            ::cortex_m::asm::isb();
            ::cortex_m::asm::bootload(base as *const u32)
        }
    }

    pub fn reset() -> ! {
        ::cortex_m::peripheral::SCB::sys_reset()
    }
}

#[cfg(test)]
mod tests {
    use simflash::{gen::GenBuilder, styles};

    use super::*;

    #[test]
    fn vector_table() {
        let mut flash = styles::SAMD21.build().unwrap();
        let img = GenBuilder::default().size(2048).build();
        flash.install(&img.data, 0).unwrap();
        assert_eq!(
            VectorTable::read(&mut flash),
            Ok(VectorTable { msp: 0x2000_8000, reset: 0x120c1 })
        );
    }

    #[test]
    fn blank_vector_table() {
        let mut flash = styles::SAMD21.build().unwrap();
        assert_eq!(
            VectorTable::read(&mut flash),
            Ok(VectorTable { msp: 0xffff_ffff, reset: 0xffff_ffff })
        );
    }
}
