/*
 * SPDX-FileCopyrightText: 2021 William Swartzendruber <wswartzendruber@gmail.com>
 *
 * SPDX-License-Identifier: OSL-3.0
 */

//! Reads DVD-Video media and extracts its contents.
//!
//! # Overview
//!
//! A DVD-Video disc is an ISO 9660 volume holding a `VIDEO_TS` directory. Each title set in
//! that directory consists of an information file (`VTS_nn_0.IFO`) and up to nine video
//! object files (`VTS_nn_1.VOB` through `VTS_nn_9.VOB`). The information file describes the
//! titles as program chains (PGC) of cells, with each cell being a run of sectors within the
//! title set's VOB files.
//!
//! This crate is layered in the following way:
//!
//! 1. [`device`] reads raw 2048-byte sectors from an optical drive or disc image.
//! 2. [`volume`] validates the ISO 9660 structure and maps every sector of the volume to the
//!    file that contains it.
//! 3. [`titleset`] parses title set information files into program chains, cells and stream
//!    attributes.
//! 4. [`demux`] turns a title/angle selection into an ordered stream of VOB sectors.
//! 5. [`transfer`] moves batches of sectors from a source into a sink.
//! 6. [`session`] queues and runs multiple extraction tasks against a single volume.

pub mod config;
pub mod demux;
pub mod device;
pub mod session;
pub mod titleset;
pub mod transfer;
pub mod volume;


#[cfg(test)]
mod testdisc;

pub use config::{BadSectorPolicy, Config, DemuxPolicy};

/// Size in bytes of a single DVD sector.
pub const SECTOR_SIZE: usize = 2048;

/// Data rate in bytes per second of a DVD drive reading at 1x.
pub const DVD_TRANSFER_RATE: u64 = 1_385_000;

/// Default number of bytes moved per transfer batch.
pub const DEFAULT_TRANSFER_SIZE: usize = 512 * 1024;

/// An inclusive range of sectors.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct SectorRange {
    /// The first sector of the range.
    pub first: u32,
    /// The last sector of the range, which is included in it.
    pub last: u32,
}

impl SectorRange {

    /// Creates a range covering `first` through `last`, or `None` if `last` precedes `first`.
    pub fn new(first: u32, last: u32) -> Option<Self> {
        if first <= last {
            Some(Self { first, last })
        } else {
            None
        }
    }

    /// Creates a range of `count` sectors starting at `first`, or `None` if `count` is zero or
    /// the range would extend past the last addressable sector.
    pub fn with_count(first: u32, count: u32) -> Option<Self> {
        let last = first.checked_add(count.checked_sub(1)?)?;
        Some(Self { first, last })
    }

    pub fn count(&self) -> u32 {
        self.last - self.first + 1
    }

    pub fn contains(&self, sector: u32) -> bool {
        self.first <= sector && sector <= self.last
    }

    pub fn byte_len(&self) -> u64 {
        self.count() as u64 * SECTOR_SIZE as u64
    }
}

/// Merges consecutive ranges where one ends exactly before the next begins. Ordering is
/// preserved and ranges that are not adjacent stay separate.
pub fn merge_adjacent(ranges: &[SectorRange]) -> Vec<SectorRange> {

    let mut merged: Vec<SectorRange> = Vec::with_capacity(ranges.len());

    for range in ranges {
        match merged.last_mut() {
            Some(previous) if previous.last.checked_add(1) == Some(range.first) => {
                previous.last = range.last;
            }
            _ => merged.push(*range),
        }
    }

    merged
}

/// Returns the number of whole sectors needed to hold `size` bytes.
pub fn sectors_for_bytes(size: u64) -> u64 {
    (size + SECTOR_SIZE as u64 - 1) / SECTOR_SIZE as u64
}
