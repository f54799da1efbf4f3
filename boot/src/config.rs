//! Boot configuration.

/// A path on the update medium, relative to its root.
pub type Path = heapless::String<32>;

/// Where the update files live, and the knobs of the boot sequence.
///
/// The defaults are the layout the download and `gold` commands of the
/// application write to.
#[derive(Debug, Clone)]
pub struct BootConfig {
    /// Image written by the network download.
    pub primary_path: Path,
    /// Known good copy, written only by an explicit user action.
    pub golden_path: Path,
    /// Presence of this file means an update is pending.
    pub flag_path: Path,
    /// Images shorter than this are taken to be truncated downloads.
    pub min_image_size: u64,
    /// Read the whole image back after programming, and compare.
    pub verify_readback: bool,
    /// Reset instead of jumping when both candidates failed after flash was
    /// already modified.  Off by default, which launches whatever is left in
    /// the region.
    pub halt_on_damaged_image: bool,
    /// Wait before resetting after the medium failed to mount.
    pub mount_retry_delay_ms: u32,
    /// Wait before the handoff, giving the console time to drain.
    pub exit_delay_ms: u32,
}

pub const PRIMARY_IMAGE: &str = "Application.bin";
pub const GOLDEN_IMAGE: &str = "g_application.bin";
pub const UPDATE_FLAG: &str = "FlagA.txt";

/// Smallest image worth flashing.  Not an integrity check.
pub const MIN_IMAGE_SIZE: u64 = 1024;

impl Default for BootConfig {
    fn default() -> Self {
        BootConfig {
            primary_path: path(PRIMARY_IMAGE),
            golden_path: path(GOLDEN_IMAGE),
            flag_path: path(UPDATE_FLAG),
            min_image_size: MIN_IMAGE_SIZE,
            verify_readback: true,
            halt_on_damaged_image: false,
            mount_retry_delay_ms: 5000,
            exit_delay_ms: 100,
        }
    }
}

impl BootConfig {
    pub fn primary_path(&mut self, p: &str) -> &mut Self {
        self.primary_path = path(p);
        self
    }

    pub fn golden_path(&mut self, p: &str) -> &mut Self {
        self.golden_path = path(p);
        self
    }

    pub fn flag_path(&mut self, p: &str) -> &mut Self {
        self.flag_path = path(p);
        self
    }

    pub fn min_image_size(&mut self, size: u64) -> &mut Self {
        self.min_image_size = size;
        self
    }

    pub fn verify_readback(&mut self, verify: bool) -> &mut Self {
        self.verify_readback = verify;
        self
    }

    pub fn halt_on_damaged_image(&mut self, halt: bool) -> &mut Self {
        self.halt_on_damaged_image = halt;
        self
    }
}

/// Paths longer than a [`Path`] holds are cut at the capacity, which can
/// only come from a misconfigured board.
fn path(p: &str) -> Path {
    let mut result = Path::new();
    for c in p.chars() {
        if result.push(c).is_err() {
            break;
        }
    }
    result
}
