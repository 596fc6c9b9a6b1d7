/*
 * SPDX-FileCopyrightText: 2021 William Swartzendruber <wswartzendruber@gmail.com>
 *
 * SPDX-License-Identifier: OSL-3.0
 */

//! Moves batches of sectors from a source into a sink.
//!
//! A transfer is strictly sequential: a batch is pulled, written in full, and only then is the
//! cancel flag looked at. Whatever a sink receives is therefore always a whole number of
//! sectors.

#[cfg(test)]
mod tests;

mod bandwidth;
mod sink;

pub use bandwidth::*;
pub use sink::*;

use super::{
    config::Config,
    demux::DemuxError,
    volume::{Volume, VolumeError},
    BadSectorPolicy,
    SectorRange,
    SECTOR_SIZE,
};
use std::{
    io::Error as IoError,
    process::ExitStatus,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};
use thiserror::Error as ThisError;
use tracing::{debug, error, info};

pub type TransferResult<T> = Result<T, TransferError>;

#[derive(ThisError, Debug)]
pub enum TransferError {
    #[error("transfer I/O error")]
    IoError {
        #[from]
        source: IoError,
    },
    #[error("error writing to {name}")]
    WriteError {
        name: String,
        source: IoError,
    },
    #[error("error starting {command}")]
    PipeSpawnError {
        command: String,
        source: IoError,
    },
    #[error("{command} exited with {status}")]
    PipeExitError {
        command: String,
        status: ExitStatus,
    },
    #[error("unexpected end of media at sector {sector}")]
    UnexpectedEndOfMedia {
        sector: u32,
    },
    #[error("transfer volume error")]
    VolumeError {
        #[from]
        source: VolumeError,
    },
    #[error("transfer demuxer error")]
    DemuxError {
        #[from]
        source: DemuxError,
    },
}

/// Something that produces data in batches of whole sectors.
pub trait BatchSource {

    /// Returns the next batch, or `None` once the source is exhausted.
    fn next_batch(&mut self) -> TransferResult<Option<&[u8]>>;

    /// Expected number of bytes, when known up front.
    fn total_bytes(&self) -> Option<u64> {
        None
    }

    /// Whether the data comes straight off of the media, making bandwidth worth reporting.
    fn reads_media(&self) -> bool {
        false
    }

    /// Called once when a transfer stops early.
    fn cancel(&mut self) {}
}

/// A shared flag asking a running transfer to stop after its current batch.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {

    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Pulls ranges of sectors off of a volume, in order.
pub struct SectorPull<'v> {
    volume: &'v mut Volume,
    ranges: Vec<SectorRange>,
    range_index: usize,
    next_sector: Option<u32>,
    policy: BadSectorPolicy,
    batch: usize,
    buffer: Vec<u8>,
}

impl<'v> SectorPull<'v> {

    pub fn new(volume: &'v mut Volume, ranges: Vec<SectorRange>) -> Self {

        let policy = volume.config().bad_sector_policy;
        let batch = volume.config().batch_sectors();

        Self {
            volume,
            ranges,
            range_index: 0,
            next_sector: None,
            policy,
            batch,
            buffer: Vec::new(),
        }
    }

    pub fn with_policy(mut self, policy: BadSectorPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Sectors the ranges span.
    pub fn total_sectors(&self) -> u64 {
        self.ranges.iter().map(|range| range.count() as u64).sum()
    }
}

impl BatchSource for SectorPull<'_> {

    fn next_batch(&mut self) -> TransferResult<Option<&[u8]>> {

        loop {

            let range = match self.ranges.get(self.range_index) {
                Some(range) => *range,
                None => return Ok(None),
            };
            let sector = self.next_sector.unwrap_or(range.first);
            let count = ((range.last - sector) as usize + 1).min(self.batch);

            if self.buffer.len() < count * SECTOR_SIZE {
                self.buffer.resize(count * SECTOR_SIZE, 0);
            }

            let read = self.volume.read_sectors_into(
                &mut self.buffer[..count * SECTOR_SIZE],
                Some(sector),
                count,
                self.policy,
            )?;

            if read.consumed == 0 {
                error!("Unexpected end of media at sector {}", sector);
                return Err(TransferError::UnexpectedEndOfMedia { sector })
            }

            let next = sector as u64 + read.consumed as u64;

            if next > range.last as u64 {
                self.range_index += 1;
                self.next_sector = None;
            } else {
                self.next_sector = Some(next as u32);
            }

            if read.sectors > 0 {
                return Ok(Some(&self.buffer[..read.sectors * SECTOR_SIZE]))
            }
        }
    }

    fn total_bytes(&self) -> Option<u64> {
        Some(self.total_sectors() * SECTOR_SIZE as u64)
    }

    fn reads_media(&self) -> bool {
        true
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TransferOutcome {
    Completed,
    Cancelled,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TransferStats {
    pub bytes: u64,
    pub outcome: TransferOutcome,
    pub elapsed: Duration,
}

/// Progress of a running transfer.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Progress {
    pub bytes: u64,
    pub total_bytes: Option<u64>,
}

/// Copies `source` into `sink` until the source runs dry or `cancel` is set.
///
/// The sink is closed in every case except an error, where it is left as is. `progress` is
/// called every `progress_interval` bytes and once more at the end.
pub fn run<S, K, F>(
    source: &mut S,
    sink: &mut K,
    cancel: &CancelToken,
    config: &Config,
    mut progress: F,
) -> TransferResult<TransferStats>
where
    S: BatchSource + ?Sized,
    K: Sink + ?Sized,
    F: FnMut(Progress),
{

    let started = Instant::now();
    let total_bytes = source.total_bytes();
    let mut report = if source.reads_media() {
        Some(BandwidthReport::new(config.bandwidth_report_interval))
    } else {
        None
    };
    let mut bytes = 0u64;
    let mut next_progress = config.progress_interval.max(1);
    let mut outcome = TransferOutcome::Completed;

    debug!("Starting transfer to {}", sink.name());

    loop {

        if cancel.is_cancelled() {
            info!("Transfer to {} cancelled after {} bytes", sink.name(), bytes);
            source.cancel();
            outcome = TransferOutcome::Cancelled;
            break
        }

        let batch = match source.next_batch()? {
            Some(batch) => batch,
            None => break,
        };

        sink.write(batch)?;
        bytes += batch.len() as u64;

        if let Some(report) = report.as_mut() {
            if let Some(line) = report.transferred(batch.len() / SECTOR_SIZE) {
                info!("{}", line);
            }
        }

        if bytes >= next_progress {
            progress(Progress { bytes, total_bytes });
            next_progress = bytes - bytes % config.progress_interval.max(1)
                + config.progress_interval.max(1);
        }
    }

    sink.close()?;

    if let Some(line) = report.as_mut().and_then(|report| report.report()) {
        info!("{}", line);
    }

    progress(Progress { bytes, total_bytes });

    Ok(TransferStats { bytes, outcome, elapsed: started.elapsed() })
}
