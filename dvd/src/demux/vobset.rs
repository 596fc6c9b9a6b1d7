/*
 * SPDX-FileCopyrightText: 2021 William Swartzendruber <wswartzendruber@gmail.com>
 *
 * SPDX-License-Identifier: OSL-3.0
 */

use super::{DemuxError, DemuxResult};
use crate::{
    titleset::{Cell, VobFile},
    SectorRange,
    SECTOR_SIZE,
};
use std::{ops::Range, path::PathBuf};
use tracing::error;

/// The title VOB files of a title set, laid end to end as one run of sectors.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct VobSet {
    entries: Vec<VobEntry>,
}

#[derive(Clone, Debug, PartialEq)]
struct VobEntry {
    file: VobFile,
    first_sector: u32,
    sector_count: u32,
}

/// A run of sectors within a single VOB file.
#[derive(Clone, Debug, PartialEq)]
pub struct VobLocation {
    /// Index of the file within its VOB set.
    pub file_index: usize,
    pub name: String,
    pub path: Option<PathBuf>,
    /// First sector of the file on the volume, when known.
    pub file_disc_sector: Option<u32>,
    /// First sector of the run, relative to the start of the VOB set.
    pub sector: u32,
    /// First sector of the run, relative to the start of the file.
    pub file_sector: u32,
    pub sector_count: u32,
}

impl VobLocation {

    /// Byte offsets of the run within its file.
    pub fn byte_range(&self) -> Range<u64> {
        let start = self.file_sector as u64 * SECTOR_SIZE as u64;
        start..start + self.sector_count as u64 * SECTOR_SIZE as u64
    }

    /// First sector of the run on the volume, when known.
    pub fn disc_sector(&self) -> Option<u32> {
        self.file_disc_sector.map(|sector| sector + self.file_sector)
    }

    /// Takes the first `count` sectors off of this run.
    pub(super) fn split_front(&mut self, count: u32) -> VobLocation {

        let front = VobLocation { sector_count: count, ..self.clone() };

        self.sector += count;
        self.file_sector += count;
        self.sector_count -= count;

        front
    }
}

impl VobSet {

    /// Lays out `files` in order. A trailing partial sector of a file is not addressable.
    pub fn new(files: &[VobFile]) -> Self {

        let mut entries = Vec::with_capacity(files.len());
        let mut next = 0u32;

        for file in files {
            let sector_count = (file.size / SECTOR_SIZE as u64) as u32;
            entries.push(VobEntry { file: file.clone(), first_sector: next, sector_count });
            next = next.saturating_add(sector_count);
        }

        Self { entries }
    }

    pub fn files(&self) -> impl Iterator<Item = &VobFile> {
        self.entries.iter().map(|entry| &entry.file)
    }

    pub fn sector_count(&self) -> u32 {
        self.entries.iter().map(|entry| entry.sector_count).sum()
    }

    /// Finds the file holding `sector`. The returned run extends to the end of that file.
    pub fn locate(&self, sector: u32) -> DemuxResult<VobLocation> {

        let (file_index, entry) = self
            .entries
            .iter()
            .enumerate()
            .find(|(_, entry)| {
                entry.first_sector <= sector && sector - entry.first_sector < entry.sector_count
            })
            .ok_or_else(|| {
                error!("Sector {} not found in any VOB file", sector);
                DemuxError::SectorNotFoundInVob { sector }
            })?;
        let file_sector = sector - entry.first_sector;

        Ok(
            VobLocation {
                file_index,
                name: entry.file.name.clone(),
                path: entry.file.path.clone(),
                file_disc_sector: entry.file.disc_sector,
                sector,
                file_sector,
                sector_count: entry.sector_count - file_sector,
            }
        )
    }

    /// Splits `range` into runs that each lie within a single file, in ascending order.
    pub fn resolve(&self, range: SectorRange) -> DemuxResult<Vec<VobLocation>> {

        let mut locations = Vec::new();
        let mut sector = range.first;

        loop {

            let mut location = self.locate(sector)?;

            location.sector_count = location.sector_count.min(range.last - sector + 1);

            let next = sector as u64 + location.sector_count as u64;

            locations.push(location);

            if next > range.last as u64 {
                break
            }

            sector = next as u32;
        }

        Ok(locations)
    }

    /// Resolves every sector range of `cell`.
    pub fn resolve_cell(&self, cell: &Cell) -> DemuxResult<Vec<VobLocation>> {

        let mut locations = Vec::new();

        for range in cell.sectors.iter() {
            locations.extend(self.resolve(*range)?);
        }

        Ok(locations)
    }
}
