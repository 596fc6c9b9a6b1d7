/*
 * SPDX-FileCopyrightText: 2021 William Swartzendruber <wswartzendruber@gmail.com>
 *
 * SPDX-License-Identifier: OSL-3.0
 */

//! Settings shared by volume reads, demultiplexing and transfers.

#[cfg(test)]
mod tests;

use super::{
    volume::VolumeError,
    DEFAULT_TRANSFER_SIZE,
    SECTOR_SIZE,
};
use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    str::FromStr,
    time::Duration,
};

/// What to do when the device cannot read a sector.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum BadSectorPolicy {
    /// Abort the read with an error.
    Fail,
    /// Leave the sector out of the returned data.
    Skip,
    /// Reread the sector a bounded number of times, then fail.
    Retry,
    /// Substitute a sector of zeroes.
    ReadAsZero,
}

impl BadSectorPolicy {

    /// Decodes a policy from its stored numeric form.
    pub fn from_u8(value: u8) -> Result<Self, VolumeError> {
        match value {
            0 => Ok(BadSectorPolicy::Fail),
            1 => Ok(BadSectorPolicy::Skip),
            2 => Ok(BadSectorPolicy::ReadAsZero),
            3 => Ok(BadSectorPolicy::Retry),
            _ => Err(VolumeError::InvalidBadSectorPolicy { value: value.to_string() }),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            BadSectorPolicy::Fail => "fail",
            BadSectorPolicy::Skip => "skip",
            BadSectorPolicy::Retry => "retry",
            BadSectorPolicy::ReadAsZero => "zero",
        }
    }
}

impl Default for BadSectorPolicy {
    fn default() -> Self {
        BadSectorPolicy::Skip
    }
}

impl Display for BadSectorPolicy {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        write!(f, "{}", self.name())
    }
}

impl FromStr for BadSectorPolicy {

    type Err = VolumeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "fail" | "error" => Ok(BadSectorPolicy::Fail),
            "skip" => Ok(BadSectorPolicy::Skip),
            "retry" => Ok(BadSectorPolicy::Retry),
            "zero" | "read-as-zero" => Ok(BadSectorPolicy::ReadAsZero),
            _ => Err(VolumeError::InvalidBadSectorPolicy { value: value.to_string() }),
        }
    }
}

/// How navigation packs are handled while demultiplexing a program chain.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum DemuxPolicy {
    /// Keep navigation packs and rewrite their sector addresses to match the output.
    NavPacksFixed,
    /// Keep navigation packs as they are on the disc.
    NavPacksUnchanged,
    /// Drop navigation packs from the output.
    NavPacksRemoved,
}

impl Default for DemuxPolicy {
    fn default() -> Self {
        DemuxPolicy::NavPacksFixed
    }
}

impl FromStr for DemuxPolicy {

    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "fixed" => Ok(DemuxPolicy::NavPacksFixed),
            "unchanged" => Ok(DemuxPolicy::NavPacksUnchanged),
            "removed" => Ok(DemuxPolicy::NavPacksRemoved),
            _ => Err(format!("unrecognized navigation pack policy: {}", value)),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    /// Ask the drive for its maximum read speed when the volume is opened.
    pub use_max_read_speed: bool,
    pub bad_sector_policy: BadSectorPolicy,
    /// Rereads attempted per sector under [`BadSectorPolicy::Retry`].
    pub bad_sector_retries: u32,
    /// A run of unreadable sectors longer than this aborts the read under every policy.
    pub max_consecutive_bad_sectors: u32,
    /// Bytes moved per batch; rounded down to whole sectors.
    pub transfer_size: usize,
    pub bandwidth_report_interval: Duration,
    /// Bytes between two progress notifications.
    pub progress_interval: u64,
    pub demux_policy: DemuxPolicy,
}

impl Config {

    /// Number of sectors read per batch. Never less than one.
    pub fn batch_sectors(&self) -> usize {
        (self.transfer_size / SECTOR_SIZE).max(1)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            use_max_read_speed: true,
            bad_sector_policy: BadSectorPolicy::default(),
            bad_sector_retries: 4,
            max_consecutive_bad_sectors: 64,
            transfer_size: DEFAULT_TRANSFER_SIZE,
            bandwidth_report_interval: Duration::from_secs(30),
            progress_interval: 1024 * 1024,
            demux_policy: DemuxPolicy::default(),
        }
    }
}
