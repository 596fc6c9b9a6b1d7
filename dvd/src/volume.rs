/*
 * SPDX-FileCopyrightText: 2021 William Swartzendruber <wswartzendruber@gmail.com>
 *
 * SPDX-License-Identifier: OSL-3.0
 */

//! Validates and reads ISO 9660 volumes holding DVD-Video content.
//!
//! # Overview
//!
//! Opening a volume validates its volume descriptors, walks its directory tree and builds a
//! media layout: every sector of the volume is assigned to exactly one region, which is either
//! a file or a placeholder covering sectors that belong to no file.
//!
//! Reads are driven by that layout. A read never crosses from one region into the next without
//! the volume noticing, so that scrambled VOB files get their keys before their sectors are
//! decrypted.
//!
//! ## Bad Sectors
//!
//! When a batch read fails, the volume falls back to reading one sector at a time so that the
//! unreadable sector can be isolated. What happens to that sector is decided by the
//! [`BadSectorPolicy`](crate::BadSectorPolicy) passed to the read.

#[cfg(test)]
mod tests;

mod directory;
mod volumeread;

pub use volumeread::*;

use super::{device::SectorDevice, sectors_for_bytes, Config};
use std::path::PathBuf;

/// A file on the volume, or a placeholder region that belongs to no file.
#[derive(Clone, Debug, Default, Hash, PartialEq)]
pub struct DvdFile {
    /// Path relative to the volume root using `/` as a separator. Empty for placeholders.
    pub path: String,
    pub start_sector: u32,
    /// Size in bytes.
    pub size: u64,
}

impl DvdFile {

    fn placeholder(start_sector: u32, sector_count: u32) -> Self {
        Self {
            path: String::new(),
            start_sector,
            size: sector_count as u64 * super::SECTOR_SIZE as u64,
        }
    }

    pub fn name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or("")
    }

    pub fn is_placeholder(&self) -> bool {
        self.path.is_empty()
    }

    /// Returns whether this file holds video objects, and is therefore scrambled on protected
    /// media.
    pub fn is_vob(&self) -> bool {
        self.name().to_ascii_uppercase().ends_with(".VOB")
    }

    pub fn sector_count(&self) -> u32 {
        sectors_for_bytes(self.size) as u32
    }

    /// The first sector past the end of this file.
    pub fn end_sector(&self) -> u32 {
        self.start_sector.saturating_add(self.sector_count())
    }

    pub fn contains(&self, sector: u32) -> bool {
        self.start_sector <= sector && sector < self.end_sector()
    }

    pub fn description(&self) -> String {
        if self.is_placeholder() {
            format!(
                "unallocated sectors {} to {}",
                self.start_sector,
                self.end_sector().saturating_sub(1),
            )
        } else {
            self.path.clone()
        }
    }
}

/// A directory and everything beneath it.
#[derive(Clone, Debug, Default, Hash, PartialEq)]
pub struct Directory {
    pub entry: DvdFile,
    pub subdirectories: Vec<Directory>,
    pub files: Vec<DvdFile>,
}

impl Directory {

    pub fn name(&self) -> &str {
        self.entry.name()
    }

    /// Looks up a file by its path components, ignoring case.
    pub fn search_path(&self, components: &[&str]) -> Option<&DvdFile> {
        match components {
            [] => None,
            [name] => self.files.iter().find(|file| file.name().eq_ignore_ascii_case(name)),
            [name, rest @ ..] => self
                .subdirectories
                .iter()
                .find(|directory| directory.name().eq_ignore_ascii_case(name))
                .and_then(|directory| directory.search_path(rest)),
        }
    }

    pub fn subdirectory(&self, name: &str) -> Option<&Directory> {
        self.subdirectories.iter().find(|directory| directory.name().eq_ignore_ascii_case(name))
    }

    /// Calls `visit` on every file beneath this directory.
    pub fn walk<F: FnMut(&DvdFile)>(&self, visit: &mut F) {
        for file in self.files.iter() {
            visit(file);
        }
        for directory in self.subdirectories.iter() {
            directory.walk(visit);
        }
    }
}

/// The fields of the primary volume descriptor this crate relies on.
#[derive(Clone, Debug, Default, Hash, PartialEq)]
pub struct PrimaryVolumeDescriptor {
    pub volume_id: String,
    /// Size of the volume in sectors.
    pub volume_size: u32,
    pub root_sector: u32,
    /// Size of the root directory in bytes.
    pub root_size: u32,
}

/// An open DVD volume.
///
/// A volume starts out closed. It becomes open once its descriptors and root directory have
/// been read, after which reads are routed through the media layout.
pub struct Volume {
    device_name: PathBuf,
    root_name: Option<PathBuf>,
    device: Box<dyn SectorDevice>,
    config: Config,
    descriptor: Option<PrimaryVolumeDescriptor>,
    root: Directory,
    layout: Vec<DvdFile>,
    vts_count: usize,
    is_open: bool,
    next_sector: u32,
    current: Option<usize>,
    skipped_sectors: u64,
}
