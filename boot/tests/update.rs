// Update decision testing.
//
// Each test lays out a card, runs one boot's worth of the orchestrator against
// a simulated application region, and checks both the report and what
// happened to the flash and the card.

use anyhow::{anyhow, Result};
use boot::{BootConfig, Error, FlashState, Rejection, Slot, Stage, Updater};
use simflash::{fs::DirFs, gen::GenBuilder, styles, SimFlash};
use storage::fs::{self, Mount};

const PAGE: usize = 64;

const PRIMARY: &str = "Application.bin";
const GOLDEN: &str = "g_application.bin";
const FLAG: &str = "FlagA.txt";

/// A resident application, so that touching it shows.
fn samd21() -> SimFlash {
    let mut flash = styles::SAMD21.build().unwrap();
    let old = GenBuilder::default().size(3000).seed(99).build();
    flash.install(&old.data, 0).unwrap();
    flash
}

fn run(card: &mut DirFs, flash: &mut SimFlash, config: &BootConfig) -> boot::Report {
    let mut vol = card.mount().unwrap();
    let report = Updater::<_, _, PAGE>::new(&mut vol, flash, config).unwrap().run();
    storage::fs::Volume::unmount(vol);
    report
}

fn stages(report: &boot::Report) -> Vec<Stage> {
    report.trace.iter().copied().collect()
}

#[test]
fn no_flag() {
    let mut card = DirFs::new().unwrap();
    card.put(PRIMARY, &GenBuilder::default().size(2000).build().data).unwrap();
    card.put(GOLDEN, &GenBuilder::default().size(2000).seed(2).build().data).unwrap();
    let mut flash = samd21();
    let before = flash.contents().to_vec();
    let config = BootConfig::default();

    // Nothing changes, however many times it boots.
    for _ in 0..2 {
        let report = run(&mut card, &mut flash, &config);
        assert_eq!(stages(&report), vec![Stage::CheckFlag, Stage::ContinueWithoutUpdate]);
        assert!(!report.flag_found);
        assert_eq!(report.installed, None);
        assert_eq!(report.state, FlashState::Untouched);
        assert!(report.region_intact());
    }
    assert!(flash.ops().is_empty());
    assert_eq!(flash.contents(), &before[..]);
    assert!(card.has(PRIMARY));
    assert!(card.has(GOLDEN));
}

#[test]
fn primary_update() {
    let mut card = DirFs::new().unwrap();
    let img = GenBuilder::default().size(2000).seed(5).build();
    card.put(PRIMARY, &img.data).unwrap();
    card.put(FLAG, b"x").unwrap();
    let mut flash = samd21();
    let config = BootConfig::default();

    let report = run(&mut card, &mut flash, &config);
    assert_eq!(
        stages(&report),
        vec![Stage::CheckFlag, Stage::FlashPrimary, Stage::ClearFlagAndContinue]
    );
    assert!(report.flag_found);
    assert!(report.flag_cleared);
    assert_eq!(report.installed, Some(Slot::Primary));
    assert!(report.failures.is_empty());
    assert_eq!(report.state, FlashState::Verified);

    // 8 rows, then 32 pages, both ascending from the base.
    assert_eq!(flash.erases(), (0..8).map(|r| r * 256).collect::<Vec<_>>());
    assert_eq!(flash.writes(), (0..32).map(|p| p * 64).collect::<Vec<_>>());
    assert!(flash.erases().len() + flash.writes().len() == flash.ops().len());
    assert_eq!(&flash.contents()[..2000], &img.data[..]);
    assert!(flash.contents()[2000..2048].iter().all(|&b| b == 0));

    assert!(!card.has(FLAG));
    assert_eq!(card.activity().deleted, vec![FLAG.to_string()]);
    assert_eq!(card.activity().open, 0);

    // The next boot leaves it alone.
    flash.clear_ops();
    let report = run(&mut card, &mut flash, &config);
    assert_eq!(report.outcome(), Some(Stage::ContinueWithoutUpdate));
    assert!(flash.ops().is_empty());
}

#[test]
fn golden_when_primary_missing() {
    let mut card = DirFs::new().unwrap();
    let gold = GenBuilder::default().size(4000).seed(6).build();
    card.put(GOLDEN, &gold.data).unwrap();
    card.put(FLAG, b"x").unwrap();
    let mut flash = samd21();
    let config = BootConfig::default();

    let report = run(&mut card, &mut flash, &config);
    assert_eq!(
        stages(&report),
        vec![
            Stage::CheckFlag,
            Stage::FlashPrimary,
            Stage::FlashGolden,
            Stage::ClearFlagAndContinue
        ]
    );
    assert_eq!(report.installed, Some(Slot::Golden));
    assert_eq!(
        report.failures.as_slice(),
        &[(Slot::Primary, Error::Invalid(Rejection::Missing(fs::Error::NotFound)))]
    );
    assert_eq!(report.state, FlashState::Verified);
    assert_eq!(&flash.contents()[..4000], &gold.data[..]);
    assert!(!card.has(FLAG));
}

#[test]
fn golden_when_primary_too_small() {
    let mut card = DirFs::new().unwrap();
    let gold = GenBuilder::default().size(2000).seed(7).build();
    card.put(PRIMARY, &[0x55; 500]).unwrap();
    card.put(GOLDEN, &gold.data).unwrap();
    card.put(FLAG, b"x").unwrap();
    let mut flash = samd21();
    let config = BootConfig::default();

    let report = run(&mut card, &mut flash, &config);
    assert_eq!(report.installed, Some(Slot::Golden));
    assert_eq!(
        report.failures.as_slice(),
        &[(Slot::Primary, Error::Invalid(Rejection::TooSmall(500)))]
    );
    // The rejected primary never touched flash.
    assert_eq!(flash.erases().len(), 8);
    assert_eq!(flash.writes().len(), 32);
    assert_eq!(&flash.contents()[..2000], &gold.data[..]);
    assert!(!card.has(FLAG));
    assert!(card.has(PRIMARY));
}

#[test]
fn both_rejected() {
    let mut card = DirFs::new().unwrap();
    card.put(PRIMARY, &[0x55; 500]).unwrap();
    card.put(FLAG, b"x").unwrap();
    let mut flash = samd21();
    let before = flash.contents().to_vec();
    let config = BootConfig::default();

    let report = run(&mut card, &mut flash, &config);
    assert_eq!(
        stages(&report),
        vec![
            Stage::CheckFlag,
            Stage::FlashPrimary,
            Stage::FlashGolden,
            Stage::ContinueWithoutUpdate
        ]
    );
    assert_eq!(report.installed, None);
    assert_eq!(report.failures.len(), 2);
    assert_eq!(report.failures[1].0, Slot::Golden);
    assert_eq!(report.failures[1].1.kind(), boot::ErrorKind::ImageInvalid);

    // Nothing was erased, so the old application is still there.
    assert_eq!(report.state, FlashState::Untouched);
    assert!(report.region_intact());
    assert!(flash.ops().is_empty());
    assert_eq!(flash.contents(), &before[..]);

    // The flag stays for the next boot.
    assert!(card.has(FLAG));
    assert!(card.activity().deleted.is_empty());
}

#[test]
fn both_fail_after_erase() {
    let mut card = DirFs::new().unwrap();
    card.put(PRIMARY, &GenBuilder::default().size(3000).build().data).unwrap();
    card.put(FLAG, b"x").unwrap();
    card.fail_read(PRIMARY, 1000);
    let mut flash = samd21();
    let config = BootConfig::default();

    let report = run(&mut card, &mut flash, &config);
    assert_eq!(report.outcome(), Some(Stage::ContinueWithoutUpdate));
    assert_eq!(report.failures[0], (Slot::Primary, Error::Read(fs::Error::Device)));
    assert_eq!(report.state, FlashState::Programming);
    assert!(!report.region_intact());
    assert!(card.has(FLAG));
    assert_eq!(card.activity().open, 0);
}

#[test]
fn golden_tried_once() {
    let mut card = DirFs::new().unwrap();
    let img = GenBuilder::default().size(3000).seed(8).build();
    card.put(PRIMARY, &img.data).unwrap();
    card.put(GOLDEN, &img.data).unwrap();
    card.put(FLAG, b"x").unwrap();
    let mut flash = samd21();
    // The 16th page of the region fails on every write.
    flash.fail_write(15 * 64);
    let config = BootConfig::default();

    let report = run(&mut card, &mut flash, &config);
    let golden = report.trace.iter().filter(|&&s| s == Stage::FlashGolden).count();
    assert_eq!(golden, 1);
    assert_eq!(report.failures.len(), 2);
    for (_, err) in report.failures.iter() {
        assert_eq!(*err, Error::Program { address: 0x12000 + 15 * 64, err: storage::Error::Controller });
        assert_eq!(err.kind(), boot::ErrorKind::FlashOperationFailed);
    }

    // Two passes, each cut off at the failing page.
    assert_eq!(flash.erases().len(), 24);
    assert_eq!(flash.writes().len(), 30);
    assert!(card.has(FLAG));
}

#[test]
fn golden_after_partial_primary() {
    let mut card = DirFs::new().unwrap();
    let gold = GenBuilder::default().size(1500).seed(9).build();
    card.put(PRIMARY, &GenBuilder::default().size(6000).build().data).unwrap();
    card.put(GOLDEN, &gold.data).unwrap();
    card.put(FLAG, b"x").unwrap();
    card.fail_read(PRIMARY, 2048);
    let mut flash = samd21();
    let config = BootConfig::default();

    let report = run(&mut card, &mut flash, &config);
    assert_eq!(report.installed, Some(Slot::Golden));
    assert_eq!(report.state, FlashState::Verified);
    // The golden pass starts again from the base.
    let writes = flash.writes();
    assert_eq!(writes[..32], (0..32).map(|p| p * 64).collect::<Vec<_>>()[..]);
    assert_eq!(writes[32..], (0..24).map(|p| p * 64).collect::<Vec<_>>()[..]);
    assert_eq!(&flash.contents()[..1500], &gold.data[..]);
    assert!(!card.has(FLAG));
}

#[test]
fn flag_delete_fails() {
    let mut card = DirFs::new().unwrap();
    let img = GenBuilder::default().size(2000).build();
    card.put(PRIMARY, &img.data).unwrap();
    card.put(FLAG, b"x").unwrap();
    card.fail_delete();
    let mut flash = samd21();
    let config = BootConfig::default();

    let report = run(&mut card, &mut flash, &config);
    assert_eq!(report.outcome(), Some(Stage::ClearFlagAndContinue));
    assert_eq!(report.installed, Some(Slot::Primary));
    assert!(!report.flag_cleared);
    assert_eq!(report.state, FlashState::Verified);
    assert!(card.has(FLAG));
}

#[test]
fn configured_paths() {
    let mut card = DirFs::new().unwrap();
    let img = GenBuilder::default().size(1024).build();
    card.put("new.bin", &img.data).unwrap();
    card.put("go.txt", b"").unwrap();
    card.put(FLAG, b"x").unwrap();
    let mut flash = samd21();
    let mut config = BootConfig::default();
    config.primary_path("new.bin").flag_path("go.txt");

    let report = run(&mut card, &mut flash, &config);
    assert_eq!(report.installed, Some(Slot::Primary));
    assert!(!card.has("go.txt"));
    assert!(card.has(FLAG));
    assert_eq!(&flash.contents()[..1024], &img.data[..]);
}

#[test]
fn too_large_for_region() {
    let mut card = DirFs::new().unwrap();
    card.put(PRIMARY, &vec![1u8; styles::SAMD21.capacity() + 1]).unwrap();
    card.put(FLAG, b"x").unwrap();
    let mut flash = samd21();
    let config = BootConfig::default();

    let report = run(&mut card, &mut flash, &config);
    assert_eq!(
        report.failures[0],
        (
            Slot::Primary,
            Error::Invalid(Rejection::TooLarge(styles::SAMD21.capacity() as u64 + 1))
        )
    );
    assert!(flash.ops().is_empty());
}

#[test]
fn image_fills_region() {
    let capacity = styles::SAMD21.capacity();
    assert_eq!(capacity, 0x2e000);
    let mut card = DirFs::new().unwrap();
    let img = GenBuilder::default().size(capacity).seed(12).build();
    card.put(PRIMARY, &img.data).unwrap();
    card.put(FLAG, b"x").unwrap();
    let mut flash = samd21();
    let config = BootConfig::default();

    let report = run(&mut card, &mut flash, &config);
    assert_eq!(report.installed, Some(Slot::Primary));
    assert_eq!(report.state, FlashState::Verified);
    assert_eq!(flash.writes().len(), capacity / 64);
    assert_eq!(flash.erases().len(), capacity / 256);
    // The last page sits right below the end of flash.
    assert_eq!(flash.writes().last().copied(), Some(capacity - 64));
    assert_eq!(flash.contents(), &img.data[..]);
    assert!(!card.has(FLAG));
}

#[test]
fn empty_primary_without_threshold() {
    let mut card = DirFs::new().unwrap();
    card.put(PRIMARY, b"").unwrap();
    card.put(FLAG, b"x").unwrap();
    let mut flash = samd21();
    let before = flash.contents().to_vec();
    let mut config = BootConfig::default();
    config.min_image_size(0);

    let report = run(&mut card, &mut flash, &config);
    assert_eq!(report.installed, None);
    assert_eq!(
        report.failures[0],
        (Slot::Primary, Error::Invalid(Rejection::TooSmall(0)))
    );
    assert_eq!(report.outcome(), Some(Stage::ContinueWithoutUpdate));
    assert_eq!(report.state, FlashState::Untouched);
    assert!(flash.ops().is_empty());
    assert_eq!(flash.contents(), &before[..]);
    assert!(card.has(FLAG));
}

#[test]
fn flag_raised_by_application() {
    let mut card = DirFs::new().unwrap();
    let img = GenBuilder::default().size(2000).seed(13).build();
    card.put(PRIMARY, &img.data).unwrap();
    let mut flash = samd21();
    let config = BootConfig::default();

    {
        let mut vol = card.mount().unwrap();
        boot::flag::request_update(&mut vol, &config, "v2").unwrap();
        storage::fs::Volume::unmount(vol);
    }
    assert!(card.has(FLAG));

    let report = run(&mut card, &mut flash, &config);
    assert!(report.flag_found);
    assert_eq!(report.installed, Some(Slot::Primary));
    assert!(!card.has(FLAG));
}

/// The same update on a device with a different geometry.
fn other_device<const P: usize>(mut flash: SimFlash, size: usize) -> Result<()> {
    let mut card = DirFs::new()?;
    let img = GenBuilder::default().size(size).build();
    card.put(PRIMARY, &img.data)?;
    card.put(FLAG, b"x")?;
    let config = BootConfig::default();

    let mut vol = card.mount().map_err(|e| anyhow!("mount: {:?}", e))?;
    let report = Updater::<_, _, P>::new(&mut vol, &mut flash, &config)
        .map_err(|e| anyhow!("updater: {:?}", e))?
        .run();
    assert_eq!(report.installed, Some(Slot::Primary));
    assert_eq!(report.state, FlashState::Verified);
    assert_eq!(flash.writes().len(), size.div_ceil(P));
    assert_eq!(&flash.contents()[..size], &img.data[..]);
    Ok(())
}

#[test]
fn other_devices() -> Result<()> {
    other_device::<512>(styles::LPC.build()?, 10_000)?;
    other_device::<8>(styles::K64.build()?, 9_000)?;
    other_device::<32>(styles::STM32H.build()?, 76_137)?;
    Ok(())
}

#[test]
fn wrong_page_buffer() {
    let mut card = DirFs::new().unwrap();
    let mut vol = card.mount().unwrap();
    let mut flash = styles::LPC.build().unwrap();
    let config = BootConfig::default();
    assert!(matches!(
        Updater::<_, _, 64>::new(&mut vol, &mut flash, &config),
        Err(Error::Layout)
    ));
}
