/*
 * SPDX-FileCopyrightText: 2021 William Swartzendruber <wswartzendruber@gmail.com>
 *
 * SPDX-License-Identifier: OSL-3.0
 */

//! Demultiplexes a program chain out of its title set's VOB files.
//!
//! A title's cells are spread across the title VOB files, possibly interleaved with the cells
//! of other angles. Demuxing selects the cells to play, resolves their sectors to runs within
//! the VOB files and streams those runs in playback order. Navigation packs are used to drop
//! sectors that belong to another cell.


mod source;
mod vobset;

pub use source::*;
pub use vobset::*;

use super::{
    config::{Config, DemuxPolicy},
    titleset::{Cell, TitleSet},
    transfer::{BatchSource, TransferResult},
    volume::VolumeError,
    SECTOR_SIZE,
};
use byteorder::{BigEndian, ByteOrder};
use std::{
    collections::VecDeque,
    io::Error as IoError,
};
use thiserror::Error as ThisError;
use tracing::{debug, error, info, warn};

const PACK_START_CODE: u32 = 0x0000_01BA;
const PCI_START_CODE: u32 = 0x0000_01BB;
const DSI_START_CODE: u32 = 0x0000_01BF;
const PCI_OFFSET: usize = 0x0E;
const DSI_OFFSET: usize = 0x400;
const DSI_SUBSTREAM_OFFSET: usize = 0x406;
const DSI_VOB_ID_OFFSET: usize = 0x41F;
const DSI_CELL_ID_OFFSET: usize = 0x422;
const PCI_LBN_OFFSET: usize = 0x2D;
const DSI_LBN_OFFSET: usize = 0x40B;
const SCRAMBLING_CONTROL_OFFSET: usize = 0x14;
const SCRAMBLING_CONTROL_MASK: u8 = 0x30;

pub type DemuxResult<T> = Result<T, DemuxError>;

#[derive(ThisError, Debug)]
pub enum DemuxError {
    #[error("invalid title number {title}, title set has {count} titles")]
    InvalidTitleNumber {
        title: u8,
        count: usize,
    },
    #[error("no program chain found for title {title}")]
    ProgramChainNotFound {
        title: u8,
    },
    #[error("invalid angle {angle}, title has {count} angles")]
    InvalidAngle {
        angle: u8,
        count: u8,
    },
    #[error("no title selected")]
    NoSelection,
    #[error("sector {sector} not found in any VOB file")]
    SectorNotFoundInVob {
        sector: u32,
    },
    #[error("error opening VOB file {name}")]
    VobOpenError {
        name: String,
        source: IoError,
    },
    #[error("error seeking VOB file {name}")]
    VobSeekError {
        name: String,
        source: IoError,
    },
    #[error("error reading VOB file {name}, requested {requested} bytes, got {got}")]
    VobReadShortError {
        name: String,
        requested: usize,
        got: usize,
    },
    #[error("invalid pack start code 0x{code:08X} at sector {sector}")]
    InvalidPackStartCode {
        sector: u32,
        code: u32,
    },
    #[error("scrambled sector {sector} found, decryption failed")]
    ScrambledSector {
        sector: u32,
    },
    #[error("demuxer volume error")]
    VolumeError {
        #[from]
        source: VolumeError,
    },
}

/// Selects the cells of `title` to play for `angle`.
///
/// Angle 0 selects the cells outside of angle blocks only. Any other angle also selects that
/// angle's cells out of every angle block.
pub fn select_title_angle(title_set: &TitleSet, title: u8, angle: u8) -> DemuxResult<Vec<Cell>> {

    let count = title_set.title_count();

    if title == 0 || title as usize > count {
        error!("Invalid title number {} ({} titles)", title, count);
        return Err(DemuxError::InvalidTitleNumber { title, count })
    }

    let pgc = title_set.title(title).ok_or_else(|| {
        error!("No program chain found for title {}", title);
        DemuxError::ProgramChainNotFound { title }
    })?;

    if angle > pgc.angle_count {
        error!("Invalid angle {} ({} angles)", angle, pgc.angle_count);
        return Err(DemuxError::InvalidAngle { angle, count: pgc.angle_count })
    }

    Ok(
        pgc.cells
            .iter()
            .filter(|cell| cell.angle == 0 || cell.angle == angle)
            .cloned()
            .collect()
    )
}

/// What to demux out of a title set.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct Selection {
    pub title: u8,
    pub angle: u8,
    /// Title to use instead when `title` has no program chain.
    pub fallback_title: Option<u8>,
}

impl Selection {

    pub fn new(title: u8, angle: u8) -> Self {
        Self { title, angle, fallback_title: None }
    }

    pub fn with_fallback(self, fallback_title: u8) -> Self {
        Self { fallback_title: Some(fallback_title), ..self }
    }

    /// The title actually demuxed out of `title_set`.
    pub fn resolve_title(&self, title_set: &TitleSet) -> u8 {
        match self.fallback_title {
            Some(fallback) if title_set.title(self.title).is_none() => {
                warn!("Title {} not found, using title {} instead", self.title, fallback);
                fallback
            }
            _ => self.title,
        }
    }
}

/// A run of sectors to stream, tagged with the cell it belongs to.
#[derive(Clone, Debug, PartialEq)]
pub struct VobChunk {
    /// Index into the selected cells.
    pub cell_index: usize,
    pub location: VobLocation,
}

#[derive(Clone, Debug, Default)]
struct PlanCursor {
    next_cell: usize,
    pending: VecDeque<VobLocation>,
    unresolved: usize,
}

impl PlanCursor {

    fn next(&mut self, vobs: &VobSet, cells: &[Cell], batch: u32) -> Option<VobChunk> {

        loop {

            if let Some(location) = self.pending.front_mut() {

                let cell_index = self.next_cell - 1;
                let location = if location.sector_count > batch {
                    location.split_front(batch)
                } else {
                    self.pending.pop_front()?
                };

                return Some(VobChunk { cell_index, location })
            }

            let cell = cells.get(self.next_cell)?;

            self.next_cell += 1;

            match vobs.resolve_cell(cell) {
                Ok(locations) => self.pending = locations.into(),
                Err(err) => {
                    error!("Skipping cell #{}: {}", cell.cell_id, err);
                    self.unresolved += 1;
                }
            }
        }
    }
}

/// The runs of sectors holding a list of cells, at most `batch` sectors each, in playback
/// order. Cells whose sectors cannot be resolved are skipped.
#[derive(Clone, Debug)]
pub struct DemuxPlan<'a> {
    vobs: &'a VobSet,
    cells: &'a [Cell],
    batch: u32,
    cursor: PlanCursor,
}

impl<'a> DemuxPlan<'a> {

    pub fn new(vobs: &'a VobSet, cells: &'a [Cell], batch: u32) -> Self {
        Self { vobs, cells, batch: batch.max(1), cursor: PlanCursor::default() }
    }

    /// Cells skipped so far.
    pub fn unresolved_cells(&self) -> usize {
        self.cursor.unresolved
    }
}

impl Iterator for DemuxPlan<'_> {

    type Item = VobChunk;

    fn next(&mut self) -> Option<Self::Item> {
        self.cursor.next(self.vobs, self.cells, self.batch)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DemuxState {
    Idle,
    Resolving,
    Streaming,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct DemuxStats {
    pub read_sectors: u64,
    pub written_sectors: u64,
    pub nav_packs: u64,
    /// Sectors left out for belonging to another cell.
    pub dropped_sectors: u64,
    pub unresolved_cells: usize,
}

/// Streams the selected title and angle of a title set.
pub struct ProgramChainDemux<S> {
    title_set: TitleSet,
    vobs: VobSet,
    source: S,
    policy: DemuxPolicy,
    batch: u32,
    title: u8,
    angle: u8,
    cells: Vec<Cell>,
    cursor: PlanCursor,
    current_cell: Option<usize>,
    in_cell: bool,
    buffer: Vec<u8>,
    output: Vec<u8>,
    state: DemuxState,
    stats: DemuxStats,
}

impl<S: SectorSource> ProgramChainDemux<S> {

    pub fn new(title_set: &TitleSet, source: S, config: &Config) -> Self {
        Self {
            title_set: title_set.clone(),
            vobs: VobSet::new(&title_set.vob_files),
            source,
            policy: config.demux_policy,
            batch: config.batch_sectors() as u32,
            title: 0,
            angle: 0,
            cells: Vec::new(),
            cursor: PlanCursor::default(),
            current_cell: None,
            in_cell: false,
            buffer: Vec::new(),
            output: Vec::new(),
            state: DemuxState::Idle,
            stats: DemuxStats::default(),
        }
    }

    /// Selects what to stream and rewinds to its start.
    pub fn select(&mut self, selection: Selection) -> DemuxResult<()> {

        self.state = DemuxState::Resolving;

        let title = selection.resolve_title(&self.title_set);
        let angle = selection.angle;

        match select_title_angle(&self.title_set, title, angle) {
            Ok(cells) => {
                info!(
                    "Demuxing title {} angle {} of title set {}: {} cells, {} sectors",
                    title,
                    angle,
                    self.title_set.vts_number,
                    cells.len(),
                    cells.iter().map(|cell| cell.sector_count()).sum::<u64>(),
                );
                self.title = title;
                self.angle = angle;
                self.cells = cells;
                self.restart();
                Ok(())
            }
            Err(err) => {
                self.state = DemuxState::Failed;
                Err(err)
            }
        }
    }

    /// Rewinds to the start of the current selection.
    pub fn restart(&mut self) {

        self.cursor = PlanCursor::default();
        self.current_cell = None;
        self.in_cell = false;
        self.stats = DemuxStats::default();
        self.state = if self.cells.is_empty() && self.title == 0 {
            DemuxState::Idle
        } else {
            DemuxState::Streaming
        };
    }

    pub fn cancel(&mut self) {
        if self.state == DemuxState::Streaming {
            self.state = DemuxState::Cancelled;
        }
    }

    /// The runs of sectors the current selection reads from.
    pub fn plan(&self) -> DemuxPlan<'_> {
        DemuxPlan::new(&self.vobs, &self.cells, self.batch)
    }

    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    pub fn vob_set(&self) -> &VobSet {
        &self.vobs
    }

    pub fn state(&self) -> DemuxState {
        self.state
    }

    pub fn stats(&self) -> DemuxStats {
        self.stats
    }

    /// Bytes the selected cells span, before any filtering.
    pub fn total_bytes(&self) -> u64 {
        self.cells.iter().map(|cell| cell.sector_count()).sum::<u64>() * SECTOR_SIZE as u64
    }

    pub fn into_source(self) -> S {
        self.source
    }

    /// Produces the next run of whole sectors, or `None` once the selection is exhausted.
    pub fn next_batch(&mut self) -> DemuxResult<Option<&[u8]>> {

        match self.state {
            DemuxState::Streaming => {}
            DemuxState::Idle | DemuxState::Resolving => return Err(DemuxError::NoSelection),
            _ => return Ok(None),
        }

        loop {

            let chunk = match self.cursor.next(&self.vobs, &self.cells, self.batch) {
                Some(chunk) => chunk,
                None => {
                    self.stats.unresolved_cells = self.cursor.unresolved;
                    self.state = DemuxState::Completed;
                    info!(
                        "Demuxed title {}: {} sectors written, {} dropped",
                        self.title,
                        self.stats.written_sectors,
                        self.stats.dropped_sectors,
                    );
                    return Ok(None)
                }
            };

            if self.current_cell != Some(chunk.cell_index) {
                debug!("Demuxing cell #{}", self.cells[chunk.cell_index].cell_id);
                self.current_cell = Some(chunk.cell_index);
                self.in_cell = true;
            }

            let size = chunk.location.sector_count as usize * SECTOR_SIZE;

            if self.buffer.len() < size {
                self.buffer.resize(size, 0);
            }

            let delivered = match self.source.read_location(&chunk.location, &mut self.buffer) {
                Ok(delivered) => delivered.min(chunk.location.sector_count as usize),
                Err(err) => return Err(self.fail(err)),
            };

            self.output.clear();

            for index in 0..delivered {
                let sector_number = chunk.location.sector + index as u32;
                let sector = &mut self.buffer[index * SECTOR_SIZE..(index + 1) * SECTOR_SIZE];
                if let Err(err) = filter_sector(
                    sector,
                    sector_number,
                    &self.cells[chunk.cell_index],
                    self.policy,
                    &mut self.in_cell,
                    &mut self.stats,
                    &mut self.output,
                ) {
                    return Err(self.fail(err))
                }
            }

            if !self.output.is_empty() {
                return Ok(Some(&self.output))
            }
        }
    }

    fn fail(&mut self, err: DemuxError) -> DemuxError {
        error!("Demuxing title {} failed: {}", self.title, err);
        self.state = DemuxState::Failed;
        err
    }
}

fn filter_sector(
    sector: &mut [u8],
    sector_number: u32,
    cell: &Cell,
    policy: DemuxPolicy,
    in_cell: &mut bool,
    stats: &mut DemuxStats,
    output: &mut Vec<u8>,
) -> DemuxResult<()> {

    stats.read_sectors += 1;

    let code = BigEndian::read_u32(&sector[0..4]);

    if code != PACK_START_CODE {
        error!("Invalid pack start code encountered at sector {}", sector_number);
        return Err(DemuxError::InvalidPackStartCode { sector: sector_number, code })
    }

    if is_nav_pack(sector) {

        stats.nav_packs += 1;

        let vob_id = BigEndian::read_u16(&sector[DSI_VOB_ID_OFFSET..DSI_VOB_ID_OFFSET + 2]);
        let cell_id = sector[DSI_CELL_ID_OFFSET];

        *in_cell = vob_id == cell.vob_id && cell_id == cell.original_cell_id;

        if !*in_cell {
            stats.dropped_sectors += 1;
            return Ok(())
        }

        match policy {
            DemuxPolicy::NavPacksRemoved => return Ok(()),
            DemuxPolicy::NavPacksUnchanged => {}
            DemuxPolicy::NavPacksFixed => {
                let position = stats.written_sectors as u32;
                BigEndian::write_u32(&mut sector[PCI_LBN_OFFSET..PCI_LBN_OFFSET + 4], position);
                BigEndian::write_u32(&mut sector[DSI_LBN_OFFSET..DSI_LBN_OFFSET + 4], position);
            }
        }
    } else {

        if !*in_cell {
            stats.dropped_sectors += 1;
            return Ok(())
        }

        if sector[SCRAMBLING_CONTROL_OFFSET] & SCRAMBLING_CONTROL_MASK != 0 {
            error!("Scrambled sector {} found, decryption failed", sector_number);
            return Err(DemuxError::ScrambledSector { sector: sector_number })
        }
    }

    output.extend_from_slice(sector);
    stats.written_sectors += 1;

    Ok(())
}

/// Whether `sector` is a navigation pack, holding a PCI and a DSI packet.
pub fn is_nav_pack(sector: &[u8]) -> bool {
    sector.len() >= SECTOR_SIZE
        && BigEndian::read_u32(&sector[PCI_OFFSET..PCI_OFFSET + 4]) == PCI_START_CODE
        && BigEndian::read_u32(&sector[DSI_OFFSET..DSI_OFFSET + 4]) == DSI_START_CODE
        && sector[DSI_SUBSTREAM_OFFSET] == 1
}

impl<S: SectorSource> BatchSource for ProgramChainDemux<S> {

    fn next_batch(&mut self) -> TransferResult<Option<&[u8]>> {
        Ok(ProgramChainDemux::next_batch(self)?)
    }

    fn total_bytes(&self) -> Option<u64> {
        Some(ProgramChainDemux::total_bytes(self))
    }

    fn reads_media(&self) -> bool {
        self.source.reads_media()
    }

    fn cancel(&mut self) {
        ProgramChainDemux::cancel(self)
    }
}
