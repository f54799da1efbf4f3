#![no_main]
#![no_std]

#[cfg(feature = "rtt")]
use panic_probe as _;
#[cfg(feature = "semihosting")]
extern crate panic_semihosting;

use defmt_rtt as _;

use atsamd_hal as hal;
use boot::{launch::Platform, BootConfig};
use cortex_m_rt::entry;
use defmt::{info, warn};
use embedded_hal::blocking::delay::{DelayMs, DelayUs};
use embedded_sdmmc::{SdCard, VolumeManager};
use fugit::{HertzU32, RateExtU32};
use hal::clock::GenericClockController;
use hal::delay::Delay;
use hal::gpio::Pins;
use hal::pac;
use hal::sercom::{spi, Sercom0};

mod nvm;
mod sd;

/// Start of the application, just past the bootloader.
const APP_BASE: usize = 0x0001_2000;
/// End of the internal flash.
const FLASH_END: usize = 0x0004_0000;

/// Busy wait delay for the card driver.  SysTick belongs to the board.
struct SpinDelay {
    /// Core cycles per microsecond.
    cycles_per_us: u32,
}

impl SpinDelay {
    fn new(core: HertzU32) -> SpinDelay {
        SpinDelay { cycles_per_us: core.to_MHz().max(1) }
    }
}

impl DelayUs<u8> for SpinDelay {
    fn delay_us(&mut self, us: u8) {
        cortex_m::asm::delay(self.cycles_per_us * us as u32);
    }
}

struct Board {
    delay: Delay,
}

impl Platform for Board {
    fn delay_ms(&mut self, ms: u32) {
        self.delay.delay_ms(ms);
    }

    fn quiesce(&mut self) {
        cortex_m::interrupt::disable();
        unsafe {
            // The card driver is gone with the volume, but SERCOM0 is still
            // running.  Put it back to its reset state.
            let dp = pac::Peripherals::steal();
            let sercom = dp.SERCOM0.spi();
            sercom.ctrla.write(|w| w.swrst().set_bit());
            while sercom.syncbusy.read().swrst().bit_is_set() {}

            let mut cp = cortex_m::Peripherals::steal();
            cp.SYST.disable_interrupt();
            cp.SYST.disable_counter();
            // Clear anything left pending, so the application does not take
            // an interrupt for us.
            cp.NVIC.icer[0].write(0xffff_ffff);
            cp.NVIC.icpr[0].write(0xffff_ffff);
        }
    }

    fn reset(&mut self) -> ! {
        boot::launch::cortex::reset()
    }

    unsafe fn jump(&mut self, base: u32) -> ! {
        boot::launch::cortex::jump(base)
    }
}

#[entry]
fn main() -> ! {
    let mut dp = pac::Peripherals::take().unwrap();
    let cp = pac::CorePeripherals::take().unwrap();

    #[cfg(feature = "semihosting")]
    cortex_m_semihosting::hprintln!("sdboot");

    // - clocks ---------------------------------------------------------------

    // GCLK0 and the core at 48 MHz.  This also sets the flash wait states.
    let mut clocks = GenericClockController::with_internal_32kosc(
        dp.GCLK,
        &mut dp.PM,
        &mut dp.SYSCTRL,
        &mut dp.NVMCTRL,
    );
    let gclk0 = clocks.gclk0();
    let sercom_clock = clocks.sercom0_core(&gclk0).unwrap();
    let core_hz = sercom_clock.freq();
    let mut board = Board { delay: Delay::new(cp.SYST, &mut clocks) };

    // - pins -----------------------------------------------------------------

    // The SD card slot, on the EXT1 header of the SAMW25 Xplained Pro:
    //
    //     PA04  SERCOM0/PAD0  MISO
    //     PA05  GPIO          CS
    //     PA06  SERCOM0/PAD2  MOSI
    //     PA07  SERCOM0/PAD3  SCK
    let pins = Pins::new(dp.PORT);
    let cs = pins.pa05.into_push_pull_output();
    let pads = spi::Pads::<Sercom0>::default()
        .data_in(pins.pa04)
        .data_out(pins.pa06)
        .sclk(pins.pa07);

    // - SD card --------------------------------------------------------------

    // Cards have to be brought up at 400 kHz or less.
    let spi = spi::Config::new(&dp.PM, dp.SERCOM0, pads, core_hz)
        .baud(400.kHz())
        .spi_mode(spi::MODE_0)
        .enable();
    let card = SdCard::new(spi, cs, SpinDelay::new(core_hz));
    match card.num_bytes() {
        Ok(bytes) => {
            info!("SD card: {} bytes", bytes);
            card.spi(|spi| spi.reconfigure(|config| config.set_baud(4.MHz())));
        }
        Err(err) => warn!("SD card init: {}", defmt::Debug2Format(&err)),
    }
    let mut slot = sd::SdSlot::new(VolumeManager::new(card, sd::FixedClock));

    // - flash ----------------------------------------------------------------

    let mut flash = nvm::NvmPartition::new(dp.NVMCTRL, APP_BASE, FLASH_END - APP_BASE).unwrap();
    let config = BootConfig::default();

    boot::launch::boot::<_, _, _, { nvm::PAGE_SIZE }>(&mut slot, &mut flash, &mut board, &config)
}
