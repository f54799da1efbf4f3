//! Simulated flash
//!
//! The internal NOR flash of a microcontroller is erased in rows and
//! programmed in pages.  Programming can only clear bits, so writing a page
//! twice without an erase in between corrupts it.  This simulator enforces
//! that discipline, rejecting a write to a page that has not been erased
//! since it was last programmed, so that tests catch ordering mistakes that
//! real hardware would silently turn into garbage.
//!
//! Every erase and write is recorded, and faults can be injected into either,
//! so the bootloader's failure paths can be driven from tests.
//!
//! The [`fs`] module provides the matching simulation of the update medium.

use std::collections::BTreeSet;

use anyhow::{anyhow, Result};
use storage::{Flash, MappedFlash, ReadFlash};

pub mod fs;
pub mod gen;
pub mod styles;

/// The contents of erased flash.
pub const ERASED: u8 = 0xff;

/// A single operation performed on the simulated flash.  Offsets are relative
/// to the start of the partition.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Op {
    Erase { from: usize, to: usize },
    Write { offset: usize, len: usize },
}

pub struct SimFlash {
    base: usize,
    write_size: usize,
    erase_size: usize,
    data: Vec<u8>,
    /// Per page, whether it has been erased since it was last written.
    erased: Vec<bool>,
    ops: Vec<Op>,
    /// Row indices whose erase fails.
    bad_rows: BTreeSet<usize>,
    /// Page offsets whose write fails.
    bad_pages: BTreeSet<usize>,
    /// Page offsets whose write appears to succeed but stores the wrong data.
    flaky_pages: BTreeSet<usize>,
}

impl SimFlash {
    /// A blank partition of `rows` rows, mapped at `base`.
    pub fn new(base: usize, write_size: usize, erase_size: usize, rows: usize) -> Result<SimFlash> {
        if write_size == 0 || erase_size == 0 || rows == 0 {
            return Err(anyhow!("Empty flash geometry"));
        }
        if erase_size % write_size != 0 {
            return Err(anyhow!(
                "Erase size {} is not a multiple of write size {}",
                erase_size,
                write_size
            ));
        }
        let capacity = erase_size * rows;
        Ok(SimFlash {
            base,
            write_size,
            erase_size,
            data: vec![ERASED; capacity],
            erased: vec![true; capacity / write_size],
            ops: Vec::new(),
            bad_rows: BTreeSet::new(),
            bad_pages: BTreeSet::new(),
            flaky_pages: BTreeSet::new(),
        })
    }

    /// Place data into flash directly, as a programmer would.  Used to set up
    /// a resident application.  This is not recorded as an operation.
    pub fn install(&mut self, data: &[u8], offset: usize) -> Result<()> {
        let end = offset
            .checked_add(data.len())
            .filter(|&e| e <= self.data.len())
            .ok_or_else(|| anyhow!("Install does not fit in flash"))?;
        self.data[offset..end].copy_from_slice(data);
        let first = offset / self.write_size;
        let last = end.div_ceil(self.write_size);
        self.erased[first..last].fill(false);
        Ok(())
    }

    pub fn contents(&self) -> &[u8] {
        &self.data
    }

    pub fn ops(&self) -> &[Op] {
        &self.ops
    }

    pub fn clear_ops(&mut self) {
        self.ops.clear();
    }

    /// Offsets of every page written, in order.
    pub fn writes(&self) -> Vec<usize> {
        self.ops
            .iter()
            .filter_map(|op| match *op {
                Op::Write { offset, .. } => Some(offset),
                _ => None,
            })
            .collect()
    }

    /// Starting offsets of every row erased, in order.
    pub fn erases(&self) -> Vec<usize> {
        self.ops
            .iter()
            .flat_map(|op| match *op {
                Op::Erase { from, to } => (from..to).step_by(self.erase_size).collect(),
                _ => Vec::new(),
            })
            .collect()
    }

    /// Make the erase of the given row (counted from the partition start) fail.
    pub fn fail_erase(&mut self, row: usize) {
        self.bad_rows.insert(row);
    }

    /// Make the write of the page at `offset` fail.
    pub fn fail_write(&mut self, offset: usize) {
        self.bad_pages.insert(offset);
    }

    /// Make the write of the page at `offset` store inverted data, while
    /// reporting success.
    pub fn corrupt_write(&mut self, offset: usize) {
        self.flaky_pages.insert(offset);
    }

    /// Remove every injected fault.
    pub fn heal(&mut self) {
        self.bad_rows.clear();
        self.bad_pages.clear();
        self.flaky_pages.clear();
    }
}

impl ReadFlash for SimFlash {
    fn read_size(&self) -> usize {
        1
    }

    fn read(&mut self, offset: usize, bytes: &mut [u8]) -> storage::Result<()> {
        storage::check_read(self, offset, bytes.len())?;
        bytes.copy_from_slice(&self.data[offset..offset + bytes.len()]);
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.data.len()
    }
}

impl Flash for SimFlash {
    fn write_size(&self) -> usize {
        self.write_size
    }

    fn erase_size(&self) -> usize {
        self.erase_size
    }

    fn erase(&mut self, from: usize, to: usize) -> storage::Result<()> {
        storage::check_erase(self, from, to)?;
        for row in (from..to).step_by(self.erase_size) {
            if self.bad_rows.contains(&(row / self.erase_size)) {
                return Err(storage::Error::Controller);
            }
        }
        self.ops.push(Op::Erase { from, to });
        self.data[from..to].fill(ERASED);
        self.erased[from / self.write_size..to / self.write_size].fill(true);
        Ok(())
    }

    fn write(&mut self, offset: usize, bytes: &[u8]) -> storage::Result<()> {
        storage::check_write(self, offset, bytes.len())?;
        let pages = offset / self.write_size..(offset + bytes.len()) / self.write_size;
        if !self.erased[pages.clone()].iter().all(|&e| e) {
            return Err(storage::Error::NotErased);
        }
        for page in pages.clone() {
            if self.bad_pages.contains(&(page * self.write_size)) {
                return Err(storage::Error::Controller);
            }
        }
        self.ops.push(Op::Write { offset, len: bytes.len() });
        self.data[offset..offset + bytes.len()].copy_from_slice(bytes);
        for page in pages.clone() {
            let at = page * self.write_size;
            if self.flaky_pages.contains(&at) {
                for b in &mut self.data[at..at + self.write_size] {
                    *b = !*b;
                }
            }
        }
        self.erased[pages].fill(false);
        Ok(())
    }
}

impl MappedFlash for SimFlash {
    fn get_base(&self) -> usize {
        self.base
    }
}
