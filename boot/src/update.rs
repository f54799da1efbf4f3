//! The update decision.
//!
//! At each boot the orchestrator walks the following stages.  Every path ends
//! in one of the two terminal stages, both of which lead on to the launcher.
//!
//! ```text
//!   CheckFlag --(no flag)--------------------------------+
//!      |                                                 |
//!   (flag)                                               v
//!      |                                      ContinueWithoutUpdate
//!      v                                                 ^
//!   FlashPrimary --(fail)--> FlashGolden --(fail)--------+
//!      |                        |
//!   (ok)                      (ok)
//!      |                        |
//!      +---> ClearFlagAndContinue <-+
//! ```
//!
//! The flag is only removed after an image went in completely.  After a
//! double failure it stays, so the next boot tries again.  Nothing is retried
//! within a boot beyond the one fall back to the golden image.

use storage::{fs::Volume, Flash, MappedFlash};

use crate::log::{error, info, warn};
use crate::validate::{self, Candidate};
use crate::{flag, BootConfig, Error, FlashRegion, FlashState, Programmer, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Stage {
    CheckFlag,
    FlashPrimary,
    FlashGolden,
    ClearFlagAndContinue,
    ContinueWithoutUpdate,
}

/// Which of the two candidate images.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Slot {
    Primary,
    Golden,
}

impl Slot {
    pub fn path<'c>(&self, config: &'c BootConfig) -> &'c str {
        match self {
            Slot::Primary => config.primary_path.as_str(),
            Slot::Golden => config.golden_path.as_str(),
        }
    }
}

/// What one run of the orchestrator did.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Report {
    /// Stages visited, in order.
    pub trace: heapless::Vec<Stage, 5>,
    pub flag_found: bool,
    pub flag_cleared: bool,
    /// The image now in flash, if one was written.
    pub installed: Option<Slot>,
    /// Each failed attempt, in order.
    pub failures: heapless::Vec<(Slot, Error), 2>,
    /// State of the application region at the end of the run.
    pub state: FlashState,
}

impl Report {
    pub(crate) fn new() -> Report {
        Report {
            trace: heapless::Vec::new(),
            flag_found: false,
            flag_cleared: false,
            installed: None,
            failures: heapless::Vec::new(),
            state: FlashState::Untouched,
        }
    }

    /// The stage the run finished in.
    pub fn outcome(&self) -> Option<Stage> {
        self.trace.last().copied()
    }

    /// Does the region hold a complete image, old or new?
    pub fn region_intact(&self) -> bool {
        self.state.is_intact()
    }
}

/// The orchestrator context: exclusive use of the update volume and of the
/// application region for one boot.
pub struct Updater<'a, 'f, V, F, const PAGE: usize> {
    volume: &'a mut V,
    programmer: Programmer<'f, F, PAGE>,
    config: &'a BootConfig,
}

impl<'a, 'f, V, F, const PAGE: usize> Updater<'a, 'f, V, F, PAGE>
where
    V: Volume,
    F: Flash + MappedFlash,
{
    pub fn new(volume: &'a mut V, flash: &'f mut F, config: &'a BootConfig) -> Result<Self> {
        let mut programmer = Programmer::new(flash)?;
        programmer.verify_readback(config.verify_readback);
        Ok(Updater { volume, programmer, config })
    }

    pub fn region(&self) -> &FlashRegion {
        self.programmer.region()
    }

    pub fn state(&self) -> FlashState {
        self.programmer.state()
    }

    /// Decide on, and carry out, this boot's update.
    pub fn run(&mut self) -> Report {
        let mut report = Report::new();
        let mut stage = Stage::CheckFlag;
        info!("Checking for firmware update flags...");

        loop {
            // There are never more stages in a run than the trace holds.
            let _ = report.trace.push(stage);

            let next = match stage {
                Stage::CheckFlag => {
                    if flag::update_pending(self.volume, self.config) {
                        info!("Update flag found. Proceeding with update...");
                        report.flag_found = true;
                        Some(Stage::FlashPrimary)
                    } else {
                        info!("No update flag found. Continuing with existing app.");
                        Some(Stage::ContinueWithoutUpdate)
                    }
                }
                Stage::FlashPrimary => match self.install(Slot::Primary) {
                    Ok(()) => {
                        info!("Main firmware updated successfully.");
                        report.installed = Some(Slot::Primary);
                        Some(Stage::ClearFlagAndContinue)
                    }
                    Err(err) => {
                        warn!("Main firmware update failed: {:?}. Trying golden image...", err);
                        let _ = report.failures.push((Slot::Primary, err));
                        Some(Stage::FlashGolden)
                    }
                },
                Stage::FlashGolden => match self.install(Slot::Golden) {
                    Ok(()) => {
                        info!("Golden image flashed successfully.");
                        report.installed = Some(Slot::Golden);
                        Some(Stage::ClearFlagAndContinue)
                    }
                    Err(err) => {
                        error!("Both firmware updates failed: {:?}. Continuing with existing app.", err);
                        let _ = report.failures.push((Slot::Golden, err));
                        Some(Stage::ContinueWithoutUpdate)
                    }
                },
                Stage::ClearFlagAndContinue => {
                    match self.volume.delete(self.config.flag_path.as_str()) {
                        Ok(()) => report.flag_cleared = true,
                        // The image is in, so the worst case is flashing it again next boot.
                        Err(err) => warn!("Could not remove update flag: {:?}", err),
                    }
                    None
                }
                Stage::ContinueWithoutUpdate => None,
            };

            match next {
                Some(n) => stage = n,
                None => break,
            }
        }

        report.state = self.programmer.state();
        report
    }

    /// Validate and write one candidate.  The file is closed either way.
    fn install(&mut self, slot: Slot) -> Result<()> {
        let region = *self.programmer.region();
        let Candidate { mut file, size } =
            validate::open_candidate(self.volume, slot.path(self.config), &region, self.config)?;
        let result = self.programmer.flash_image(self.volume, &mut file, size);
        self.volume.close(file);
        result.map(|_| ())
    }
}
