/*
 * SPDX-FileCopyrightText: 2021 William Swartzendruber <wswartzendruber@gmail.com>
 *
 * SPDX-License-Identifier: OSL-3.0
 */

//! Parses video title sets.
//!
//! # Overview
//!
//! A video title set (VTS) is described by its information file, `VTS_nn_0.IFO`. The parts of
//! it that matter here are:
//!
//! - The header, which carries the video, audio and subpicture attributes shared by all of the
//!   title set's titles.
//! - The program chain information table (VTS_PGCI), which lists the program chains. An entry
//!   program chain is flagged with the title number it starts.
//! - The cell address table (VTS_C_ADT), which maps each `(VOB ID, cell ID)` pair to the
//!   sectors holding it.
//!
//! Sector numbers found in both tables are relative to the first sector of the title set's
//! first title VOB file, `VTS_nn_1.VOB`.
//!
//! ## Angles
//!
//! Cells belonging to an angle block hold alternative footage for the same stretch of a title.
//! Every cell outside of a block has angle 0 and is played regardless of the selected angle.
//! Cells inside a block are numbered 1 and up in the order they appear.


mod titlesetread;

pub use titlesetread::*;

use super::SectorRange;
use std::{
    collections::{HashSet, VecDeque},
    fmt::{Display, Formatter, Result as FmtResult},
    path::PathBuf,
};

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum VideoStandard {
    Ntsc,
    Pal,
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum DisplayAspectRatio {
    Standard,
    Widescreen,
    Reserved(u8),
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct VideoAttributes {
    pub standard: VideoStandard,
    pub aspect_ratio: DisplayAspectRatio,
    /// Width and height in pixels, if the resolution code is a known one.
    pub frame_size: Option<(u16, u16)>,
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum AudioCoding {
    Ac3,
    Mpeg1,
    Mpeg2Extended,
    Lpcm,
    Dts,
    Unknown(u8),
}

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct AudioStream {
    /// MPEG stream ID, or the private stream 1 substream ID for AC-3, DTS and LPCM.
    pub stream_id: Option<u8>,
    pub coding: AudioCoding,
    pub channels: u8,
    pub language: Option<String>,
    pub hearing_impaired: bool,
    pub commentary: bool,
}

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct SubtitleStream {
    /// Private stream 1 substream ID.
    pub stream_id: u8,
    pub language: Option<String>,
    pub forced: bool,
    pub hearing_impaired: bool,
    pub commentary: bool,
}

/// A palette entry as stored in a program chain.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct PaletteEntry {
    pub y: u8,
    pub cr: u8,
    pub cb: u8,
}

#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct RgbColor {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
}

impl PaletteEntry {

    /// Converts to RGB using BT.601 studio swing coefficients.
    pub fn to_rgb(&self) -> RgbColor {

        let y = 1.164 * (self.y as f64 - 16.0);
        let cb = self.cb as f64 - 128.0;
        let cr = self.cr as f64 - 128.0;

        RgbColor {
            red: (y + 1.596 * cr).max(0.0).min(255.0).round() as u8,
            green: (y - 0.392 * cb - 0.813 * cr).max(0.0).min(255.0).round() as u8,
            blue: (y + 2.017 * cb).max(0.0).min(255.0).round() as u8,
        }
    }
}

impl Display for RgbColor {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        write!(f, "{:02x}{:02x}{:02x}", self.red, self.green, self.blue)
    }
}

#[derive(Clone, Debug, Default, Eq, Hash, PartialEq)]
pub struct Palette {
    pub entries: Vec<PaletteEntry>,
}

impl Palette {

    /// Formats the palette the way subtitle tools expect it: comma separated `rrggbb` values.
    pub fn to_rgb_string(&self) -> String {
        self.entries
            .iter()
            .map(|entry| entry.to_rgb().to_string())
            .collect::<Vec<String>>()
            .join(",")
    }
}

/// Something unusual found while parsing that did not prevent the parse.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum Warning {
    /// The reserved first byte of a palette entry was not zero.
    UnexpectedPaletteByte(u8),
    /// More than one entry program chain claimed the same title.
    DuplicateTitle(u8),
    /// A cell had no entry in the cell address table.
    CellNotInAddressTable { vob_id: u16, cell_id: u8 },
}

impl Display for Warning {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        match self {
            Warning::UnexpectedPaletteByte(value) => {
                write!(f, "palette conversion: unexpected value 0x{:02X}, should be 0", value)
            }
            Warning::DuplicateTitle(title) => {
                write!(f, "title {} has more than one entry program chain", title)
            }
            Warning::CellNotInAddressTable { vob_id, cell_id } => {
                write!(f, "cell {} of VOB {} not in cell address table", cell_id, vob_id)
            }
        }
    }
}

/// One entry of the cell address table.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct CellAddress {
    pub vob_id: u16,
    pub cell_id: u8,
    pub sectors: SectorRange,
}

/// A cell of a program chain.
#[derive(Clone, Debug, Default, Eq, Hash, PartialEq)]
pub struct Cell {
    /// Position of the cell within its program chain, starting at 1.
    pub cell_id: u8,
    /// 0 outside of an angle block.
    pub angle: u8,
    pub vob_id: u16,
    /// Cell ID within its VOB.
    pub original_cell_id: u8,
    /// Playback duration in seconds.
    pub duration: u32,
    pub first_sector: u32,
    pub last_sector: u32,
    /// The sectors holding the cell, which may be split by interleaving.
    pub sectors: Vec<SectorRange>,
}

impl Cell {
    pub fn sector_count(&self) -> u64 {
        self.sectors.iter().map(|range| range.count() as u64).sum()
    }
}

/// A chapter, which starts at a given cell.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct Chapter {
    pub number: u8,
    pub first_cell: u8,
}

#[derive(Clone, Debug, Default, Eq, Hash, PartialEq)]
pub struct ProgramChain {
    pub title_number: u8,
    /// Playback duration in seconds.
    pub duration: u32,
    pub next_pgc: u16,
    pub previous_pgc: u16,
    pub parent_pgc: u16,
    /// Always at least 1.
    pub angle_count: u8,
    pub palette: Palette,
    pub chapters: Vec<Chapter>,
    pub cells: Vec<Cell>,
}

impl ProgramChain {
    pub fn sector_count(&self) -> u64 {
        self.cells.iter().map(|cell| cell.sector_count()).sum()
    }
}

/// A title VOB file of a title set.
#[derive(Clone, Debug, Default, Eq, Hash, PartialEq)]
pub struct VobFile {
    pub name: String,
    /// Location on the host file system, when the file is reachable through one.
    pub path: Option<PathBuf>,
    /// First sector of the file on the volume, when known.
    pub disc_sector: Option<u32>,
    /// Size in bytes.
    pub size: u64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TitleSet {
    pub vts_number: u8,
    pub ifo_name: String,
    /// Identifier of the volume the title set was loaded from.
    pub volume_id: Option<String>,
    pub encrypted: bool,
    /// First sector of the title VOB files, relative to the information file.
    pub title_vobs_sector: u32,
    pub video: VideoAttributes,
    pub audio: Vec<AudioStream>,
    pub subtitles: Vec<SubtitleStream>,
    pub cell_addresses: Vec<CellAddress>,
    /// Entry program chains indexed by title number minus one.
    pub program_chains: Vec<Option<ProgramChain>>,
    pub vob_files: Vec<VobFile>,
    pub warnings: Vec<Warning>,
}

impl TitleSet {

    pub fn title_count(&self) -> usize {
        self.program_chains.len()
    }

    /// The entry program chain of `title`, counting from 1.
    pub fn title(&self, title: u8) -> Option<&ProgramChain> {
        match title {
            0 => None,
            title => self.program_chains.get(title as usize - 1).and_then(|pgc| pgc.as_ref()),
        }
    }

    /// All titles in order, with the longest one first when `longest_first` is set.
    pub fn titles(&self, longest_first: bool) -> Vec<&ProgramChain> {

        let mut titles: Vec<&ProgramChain> = self.program_chains.iter().flatten().collect();

        if longest_first {
            titles.sort_by(|a, b| b.duration.cmp(&a.duration));
        }

        titles
    }

    /// The title with the longest duration. The first one wins a tie.
    pub fn longest_title(&self) -> Option<&ProgramChain> {
        self.program_chains
            .iter()
            .flatten()
            .fold(None, |longest: Option<&ProgramChain>, pgc| match longest {
                Some(current) if current.duration >= pgc.duration => Some(current),
                _ => Some(pgc),
            })
    }

    /// The sequence of titles `title` belongs to, following the previous and next program
    /// chain links in both directions. A title never appears twice.
    pub fn all_titles(&self, title: u8) -> Vec<&ProgramChain> {

        let mut seen = HashSet::new();
        let mut result = VecDeque::new();
        let mut pgc = self.title(title);
        let next = pgc.map(|pgc| pgc.next_pgc);

        while let Some(current) = pgc.filter(|pgc| seen.insert(pgc.title_number)) {
            result.push_front(current);
            pgc = self.linked_title(current.previous_pgc);
        }

        pgc = next.and_then(|next| self.linked_title(next));

        while let Some(current) = pgc.filter(|pgc| seen.insert(pgc.title_number)) {
            result.push_back(current);
            pgc = self.linked_title(current.next_pgc);
        }

        result.into()
    }

    /// Playback duration in seconds of the sequence `title` belongs to.
    pub fn all_titles_duration(&self, title: u8) -> u32 {
        self.all_titles(title).iter().map(|pgc| pgc.duration).sum()
    }

    /// The longest playback duration of any sequence of titles.
    pub fn longest_duration(&self) -> u32 {
        (1..=self.title_count().min(u8::MAX as usize) as u8)
            .map(|title| self.all_titles_duration(title))
            .max()
            .unwrap_or(0)
    }

    fn linked_title(&self, pgc_number: u16) -> Option<&ProgramChain> {
        u8::try_from(pgc_number).ok().and_then(|title| self.title(title))
    }

    /// Total size of the title VOB files in bytes.
    pub fn vob_size(&self) -> u64 {
        self.vob_files.iter().map(|vob| vob.size).sum()
    }
}

/// Formats a duration in seconds as `hh:mm:ss`.
pub fn format_duration(seconds: u32) -> String {
    format!("{:02}:{:02}:{:02}", seconds / 3600, seconds / 60 % 60, seconds % 60)
}
