//! Simulated update medium.
//!
//! [`DirFs`] stands in for an SD card.  Each instance owns a fresh temporary
//! directory, which is the root of the volume it mounts.  Tests place files
//! there with [`DirFs::put`], run the bootloader, and then inspect what is
//! left.  Mount failures, read errors part way through a file, short reads,
//! and delete failures can be injected.

use std::{
    cell::RefCell,
    collections::BTreeMap,
    fs::{self, File},
    io::{self, Read, Write},
    path::{Path, PathBuf},
    rc::Rc,
};

use anyhow::Result;
use storage::fs::{Error, Mode, Mount, Volume};
use temp_dir::TempDir;

/// Injected faults.  Copied into the volume when it is mounted.
#[derive(Debug, Clone, Default)]
struct Faults {
    mount: bool,
    delete: bool,
    /// Reads of the named file fail once this many bytes have been returned.
    read_limit: BTreeMap<String, u64>,
    /// Upper bound on the bytes returned by any one read.
    chunk: Option<usize>,
}

/// What happened to the medium, shared between the filesystem and the volumes
/// it mounted.
#[derive(Debug, Default)]
pub struct Activity {
    pub mounts: usize,
    pub unmounts: usize,
    /// Files currently open.
    pub open: usize,
    /// Paths deleted, in order.
    pub deleted: Vec<String>,
}

pub struct DirFs {
    dir: TempDir,
    faults: Faults,
    activity: Rc<RefCell<Activity>>,
}

impl DirFs {
    pub fn new() -> Result<DirFs> {
        Ok(DirFs {
            dir: TempDir::new()?,
            faults: Faults::default(),
            activity: Rc::new(RefCell::new(Activity::default())),
        })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Create or replace a file on the medium.
    pub fn put(&self, name: &str, data: &[u8]) -> Result<()> {
        fs::write(self.dir.path().join(name), data)?;
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Vec<u8>> {
        fs::read(self.dir.path().join(name)).ok()
    }

    pub fn has(&self, name: &str) -> bool {
        self.dir.path().join(name).is_file()
    }

    pub fn activity(&self) -> std::cell::Ref<'_, Activity> {
        self.activity.borrow()
    }

    pub fn fail_mount(&mut self) {
        self.faults.mount = true;
    }

    pub fn fail_delete(&mut self) {
        self.faults.delete = true;
    }

    /// Reads of `name` fail after `after` bytes have been delivered.
    pub fn fail_read(&mut self, name: &str, after: u64) {
        self.faults.read_limit.insert(name.to_string(), after);
    }

    /// Deliver at most `max` bytes per read.
    pub fn short_reads(&mut self, max: usize) {
        self.faults.chunk = Some(max);
    }
}

impl Mount for DirFs {
    type Volume = DirVolume;

    fn mount(&mut self) -> storage::fs::Result<DirVolume> {
        if self.faults.mount {
            return Err(Error::NoFilesystem);
        }
        self.activity.borrow_mut().mounts += 1;
        Ok(DirVolume {
            root: self.dir.path().to_path_buf(),
            faults: self.faults.clone(),
            activity: self.activity.clone(),
        })
    }
}

pub struct DirVolume {
    root: PathBuf,
    faults: Faults,
    activity: Rc<RefCell<Activity>>,
}

pub struct DirFile {
    file: File,
    name: String,
    mode: Mode,
    /// Bytes delivered so far.
    pos: u64,
    size: u64,
}

impl DirVolume {
    fn resolve(&self, path: &str) -> storage::fs::Result<PathBuf> {
        let path = path.trim_start_matches('/');
        if path.is_empty() || path.contains("..") {
            return Err(Error::BadPath);
        }
        Ok(self.root.join(path))
    }
}

fn io_error(e: io::Error) -> Error {
    match e.kind() {
        io::ErrorKind::NotFound => Error::NotFound,
        _ => Error::Device,
    }
}

impl Volume for DirVolume {
    type File = DirFile;

    fn open(&mut self, path: &str, mode: Mode) -> storage::fs::Result<DirFile> {
        let full = self.resolve(path)?;
        let file = match mode {
            Mode::Read => File::open(&full),
            Mode::Create => File::create(&full),
        }
        .map_err(io_error)?;
        let size = file.metadata().map_err(io_error)?.len();
        self.activity.borrow_mut().open += 1;
        Ok(DirFile {
            file,
            name: path.trim_start_matches('/').to_string(),
            mode,
            pos: 0,
            size,
        })
    }

    fn read(&mut self, file: &mut DirFile, buf: &mut [u8]) -> storage::fs::Result<usize> {
        if file.mode != Mode::Read {
            return Err(Error::Mode);
        }
        let mut want = buf.len();
        if let Some(chunk) = self.faults.chunk {
            want = want.min(chunk);
        }
        if let Some(&limit) = self.faults.read_limit.get(&file.name) {
            if file.pos >= limit {
                return Err(Error::Device);
            }
            want = want.min((limit - file.pos) as usize);
        }
        let count = file.file.read(&mut buf[..want]).map_err(io_error)?;
        file.pos += count as u64;
        Ok(count)
    }

    fn write(&mut self, file: &mut DirFile, buf: &[u8]) -> storage::fs::Result<usize> {
        if file.mode != Mode::Create {
            return Err(Error::Mode);
        }
        file.file.write_all(buf).map_err(io_error)?;
        file.pos += buf.len() as u64;
        file.size = file.size.max(file.pos);
        Ok(buf.len())
    }

    fn size(&self, file: &DirFile) -> u64 {
        file.size
    }

    fn exists(&mut self, path: &str) -> bool {
        self.resolve(path).map(|p| p.is_file()).unwrap_or(false)
    }

    fn delete(&mut self, path: &str) -> storage::fs::Result<()> {
        if self.faults.delete {
            return Err(Error::Device);
        }
        fs::remove_file(self.resolve(path)?).map_err(io_error)?;
        self.activity.borrow_mut().deleted.push(path.to_string());
        Ok(())
    }

    fn close(&mut self, file: DirFile) {
        drop(file);
        self.activity.borrow_mut().open -= 1;
    }

    fn unmount(self) {
        self.activity.borrow_mut().unmounts += 1;
    }
}
