/*
 * SPDX-FileCopyrightText: 2021 William Swartzendruber <wswartzendruber@gmail.com>
 *
 * SPDX-License-Identifier: OSL-3.0
 */

use super::{
    AudioCoding,
    AudioStream,
    Cell,
    CellAddress,
    Chapter,
    DisplayAspectRatio,
    Palette,
    PaletteEntry,
    ProgramChain,
    SubtitleStream,
    TitleSet,
    VideoAttributes,
    VideoStandard,
    VobFile,
    Warning,
};
use crate::{
    merge_adjacent,
    volume::{Volume, VolumeError},
    SectorRange,
    SECTOR_SIZE,
};
use std::{
    fs,
    io::{Cursor, Error as IoError, Read},
    path::{Path, PathBuf},
};
use byteorder::{BigEndian, ByteOrder, ReadBytesExt};
use thiserror::Error as ThisError;
use tracing::{debug, error, info, warn};

const IFO_MAGIC: &[u8] = b"DVDVIDEO-VTS";
const IFO_HEADER_SIZE: usize = 0x3D8;
const MAX_AUDIO_STREAMS: usize = 8;
const MAX_SUBTITLE_STREAMS: usize = 32;
const PGC_HEADER_SIZE: usize = 0xEC;
const CELL_PLAYBACK_SIZE: usize = 24;
const CELL_POSITION_SIZE: usize = 4;
const CELL_ADDRESS_SIZE: usize = 12;
const ANGLE_BLOCK: u8 = 1;
const MAX_VOB_FILES: u8 = 9;

pub type TitleSetReadResult<T> = Result<T, ReadError>;

#[derive(ThisError, Debug)]
pub enum ReadError {
    #[error("title set IO error")]
    IoError {
        #[from]
        source: IoError,
    },
    #[error("title set volume error")]
    VolumeError {
        #[from]
        source: VolumeError,
    },
    #[error("information file does not start with DVDVIDEO-VTS")]
    InvalidIfoMagic,
    #[error("information file is only {size} bytes long")]
    IfoTooShort {
        size: usize,
    },
    #[error("unrecognized video standard {value}")]
    InvalidVideoStandard {
        value: u8,
    },
    #[error("palette size is {size} bytes, not a multiple of 4")]
    PaletteSizeInvalid {
        size: usize,
    },
    #[error("title number {title} is not within 1 to {count}")]
    InvalidTitleNumber {
        title: u8,
        count: usize,
    },
    #[error("error reading cell address table (VTS_C_ADT)")]
    CellAddressTableReadError,
    #[error("error reading program chain table (VTS_PGCI)")]
    ProgramChainTableReadError,
    #[error("invalid program chain for title {title}")]
    InvalidProgramChain {
        title: u8,
    },
    #[error("invalid DVD structure: {reason}")]
    InvalidDvdStructure {
        reason: String,
    },
    #[error("no VOB file found for {name}")]
    NoVobFile {
        name: String,
    },
    #[error("information file {name} not found")]
    IfoNotFound {
        name: String,
    },
}

/// The entry program chains of a title set, indexed by title number minus one.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ProgramChainTable {
    pub chains: Vec<Option<ProgramChain>>,
    pub warnings: Vec<Warning>,
}

pub trait ReadTitleSetExt {
    fn read_title_set(&mut self) -> TitleSetReadResult<TitleSet>;
}

impl<T: Read> ReadTitleSetExt for T {

    fn read_title_set(&mut self) -> TitleSetReadResult<TitleSet> {

        let mut ifo = Vec::new();

        self.read_to_end(&mut ifo)?;

        parse(&ifo)
    }
}

/// Parses the contents of a `VTS_nn_0.IFO` file.
///
/// The returned title set has no VOB files attached. [`TitleSet::load`] and
/// [`TitleSet::load_from_volume`] take care of that.
pub fn parse(ifo: &[u8]) -> TitleSetReadResult<TitleSet> {

    if ifo.len() < IFO_MAGIC.len() || &ifo[..IFO_MAGIC.len()] != IFO_MAGIC {
        return Err(ReadError::InvalidIfoMagic)
    }
    if ifo.len() < IFO_HEADER_SIZE {
        return Err(ReadError::IfoTooShort { size: ifo.len() })
    }

    let video = parse_video_attributes(ifo[0x200], ifo[0x201])?;
    let audio = parse_audio_streams(ifo)?;
    let subtitles = parse_subtitle_streams(ifo)?;
    let cell_addresses = parse_cell_address_table(ifo)?;
    let title_count = count_titles(ifo)?;
    let ProgramChainTable { chains, mut warnings } = parse_program_chains(ifo, title_count)?;
    let program_chains = chains
        .into_iter()
        .map(|chain| {
            chain.map(|mut chain| {
                locate_cells(&mut chain, &cell_addresses, &mut warnings);
                chain
            })
        })
        .collect();

    Ok(
        TitleSet {
            vts_number: 0,
            ifo_name: String::new(),
            volume_id: None,
            encrypted: false,
            title_vobs_sector: BigEndian::read_u32(&ifo[0x0C4..0x0C8]),
            video,
            audio,
            subtitles,
            cell_addresses,
            program_chains,
            vob_files: Vec::new(),
            warnings,
        }
    )
}

fn parse_video_attributes(first: u8, second: u8) -> TitleSetReadResult<VideoAttributes> {

    let standard = match (first >> 4) & 0x03 {
        0 => VideoStandard::Ntsc,
        1 => VideoStandard::Pal,
        value => return Err(ReadError::InvalidVideoStandard { value }),
    };
    let aspect_ratio = match (first >> 2) & 0x03 {
        0 => DisplayAspectRatio::Standard,
        3 => DisplayAspectRatio::Widescreen,
        value => DisplayAspectRatio::Reserved(value),
    };
    let height = match standard {
        VideoStandard::Ntsc => 480,
        VideoStandard::Pal => 576,
    };
    let frame_size = match (second >> 3) & 0x07 {
        0 => Some((720, height)),
        1 => Some((704, height)),
        2 => Some((352, height)),
        3 => Some((352, height / 2)),
        _ => None,
    };

    Ok(VideoAttributes { standard, aspect_ratio, frame_size })
}

fn parse_audio_streams(ifo: &[u8]) -> TitleSetReadResult<Vec<AudioStream>> {

    let count = (BigEndian::read_u16(&ifo[0x202..0x204]) as usize).min(MAX_AUDIO_STREAMS);
    let mut cursor = Cursor::new(&ifo[0x204..0x204 + count * 8]);
    let mut streams = Vec::with_capacity(count);

    for index in 0..count as u8 {

        let mut attributes = [0u8; 8];

        cursor.read_exact(&mut attributes)?;

        let (coding, stream_id) = match attributes[0] >> 5 {
            0 => (AudioCoding::Ac3, Some(0x80 + index)),
            2 => (AudioCoding::Mpeg1, Some(0xC0 + index)),
            3 => (AudioCoding::Mpeg2Extended, Some(0xC8 + index)),
            4 => (AudioCoding::Lpcm, Some(0xA0 + index)),
            6 => (AudioCoding::Dts, Some(0x88 + index)),
            value => (AudioCoding::Unknown(value), None),
        };
        let language = if attributes[0] & 0x0C == 0x04 {
            decode_language(&attributes[2..4])
        } else {
            None
        };

        streams.push(
            AudioStream {
                stream_id,
                coding,
                channels: (attributes[1] & 0x07) + 1,
                language,
                hearing_impaired: attributes[5] == 2,
                commentary: attributes[5] == 3 || attributes[5] == 4,
            }
        );
    }

    Ok(streams)
}

fn parse_subtitle_streams(ifo: &[u8]) -> TitleSetReadResult<Vec<SubtitleStream>> {

    let count = (BigEndian::read_u16(&ifo[0x254..0x256]) as usize).min(MAX_SUBTITLE_STREAMS);
    let mut cursor = Cursor::new(&ifo[0x256..0x256 + count * 6]);
    let mut streams = Vec::with_capacity(count);

    for index in 0..count as u8 {

        let mut attributes = [0u8; 6];

        cursor.read_exact(&mut attributes)?;

        let language = if attributes[0] & 0x03 == 0x01 {
            decode_language(&attributes[2..4])
        } else {
            None
        };
        let kind = attributes[5];

        streams.push(
            SubtitleStream {
                stream_id: 0x20 + index,
                language,
                forced: kind == 9,
                hearing_impaired: (1..=7).contains(&kind),
                commentary: (13..=15).contains(&kind),
            }
        );
    }

    Ok(streams)
}

fn decode_language(code: &[u8]) -> Option<String> {
    if code.iter().all(|byte| byte.is_ascii_alphabetic()) {
        Some(code.iter().map(|byte| byte.to_ascii_lowercase() as char).collect())
    } else {
        None
    }
}

/// Resolves a sector pointer stored in the header into a byte offset.
fn table_offset(ifo: &[u8], pointer: usize) -> Option<usize> {

    let offset = BigEndian::read_u32(&ifo[pointer..pointer + 4]) as usize * SECTOR_SIZE;

    if offset != 0 && offset + 8 <= ifo.len() {
        Some(offset)
    } else {
        None
    }
}

fn parse_cell_address_table(ifo: &[u8]) -> TitleSetReadResult<Vec<CellAddress>> {

    let start = table_offset(ifo, 0x0E0).ok_or_else(|| {
        error!("Error reading Cell Address Table (VTS_C_ADT)");
        ReadError::CellAddressTableReadError
    })?;
    let last_byte = BigEndian::read_u32(&ifo[start + 4..start + 8]) as usize;
    let end = start + last_byte + 1;

    if last_byte < 7 || end > ifo.len() {
        error!("Error reading Cell Address Table (VTS_C_ADT), invalid table size");
        return Err(ReadError::CellAddressTableReadError)
    }

    let mut addresses = Vec::new();
    let mut cursor = Cursor::new(&ifo[start + 8..end]);

    while (cursor.position() as usize) + CELL_ADDRESS_SIZE <= end - start - 8 {

        let vob_id = cursor.read_u16::<BigEndian>()?;
        let cell_id = cursor.read_u8()?;
        let _ = cursor.read_u8()?;
        let first = cursor.read_u32::<BigEndian>()?;
        let last = cursor.read_u32::<BigEndian>()?;

        match SectorRange::new(first, last) {
            Some(sectors) => addresses.push(CellAddress { vob_id, cell_id, sectors }),
            None => {
                error!("Error reading Cell Address Table (VTS_C_ADT), cell ends before it starts");
                return Err(ReadError::CellAddressTableReadError)
            }
        }
    }

    Ok(addresses)
}

/// Number of titles in the title set, taken from the part-of-title table when it is present.
fn count_titles(ifo: &[u8]) -> TitleSetReadResult<usize> {

    if let Some(offset) = table_offset(ifo, 0x0C8) {
        let count = BigEndian::read_u16(&ifo[offset..offset + 2]) as usize;
        if count > 0 {
            return Ok(count)
        }
    }

    let start = table_offset(ifo, 0x0CC).ok_or(ReadError::ProgramChainTableReadError)?;

    Ok(BigEndian::read_u16(&ifo[start..start + 2]) as usize)
}

/// Parses the program chain information table, keeping the entry program chain of each of
/// `title_count` titles.
pub fn parse_program_chains(
    ifo: &[u8],
    title_count: usize,
) -> TitleSetReadResult<ProgramChainTable> {

    let start = table_offset(ifo, 0x0CC).ok_or_else(|| {
        error!("Error reading Program Chain Table (VTS_PGCI)");
        ReadError::ProgramChainTableReadError
    })?;
    let mut cursor = Cursor::new(&ifo[start..]);
    let count = cursor.read_u16::<BigEndian>()? as usize;
    let _ = cursor.read_u16::<BigEndian>()?;
    let last_byte = cursor.read_u32::<BigEndian>()? as usize;
    let end = start + last_byte + 1;

    if last_byte < 7 || end > ifo.len() || 8 + 8 * count > end - start {
        error!("Error reading Program Chain Table (VTS_PGCI), table exceeds file");
        return Err(ReadError::ProgramChainTableReadError)
    }

    let table = &ifo[start..end];
    let mut chains: Vec<Option<ProgramChain>> = vec![None; title_count];
    let mut warnings = Vec::new();

    for _ in 0..count {

        let category = cursor.read_u8()?;
        let mut reserved = [0u8; 3];

        cursor.read_exact(&mut reserved)?;

        let offset = cursor.read_u32::<BigEndian>()? as usize;

        if category & 0x80 == 0 {
            continue
        }

        let title = category & 0x7F;

        if title == 0 || title as usize > title_count {
            error!("Invalid title number {} in Program Chain Table (VTS_PGCI)", title);
            return Err(ReadError::InvalidTitleNumber { title, count: title_count })
        }

        let (chain, palette_warnings) = parse_program_chain(table, offset, title)?;
        let slot = &mut chains[title as usize - 1];

        warnings.extend(palette_warnings);

        if slot.is_some() {
            warn!("Title {} has more than one entry program chain, keeping the last", title);
            warnings.push(Warning::DuplicateTitle(title));
        }

        *slot = Some(chain);
    }

    Ok(ProgramChainTable { chains, warnings })
}

fn parse_program_chain(
    table: &[u8],
    offset: usize,
    title: u8,
) -> TitleSetReadResult<(ProgramChain, Vec<Warning>)> {

    if offset + PGC_HEADER_SIZE > table.len() {
        error!("Program chain of title {} exceeds Program Chain Table", title);
        return Err(ReadError::InvalidProgramChain { title })
    }

    let pgc = &table[offset..];
    let program_count = pgc[2] as usize;
    let cell_count = pgc[3] as usize;
    let (palette, warnings) = parse_palette(&pgc[0xA4..0xE4])?;
    let program_map = BigEndian::read_u16(&pgc[0xE6..0xE8]) as usize;
    let cell_playback = BigEndian::read_u16(&pgc[0xE8..0xEA]) as usize;
    let cell_position = BigEndian::read_u16(&pgc[0xEA..0xEC]) as usize;

    if (program_count > 0 && (program_map == 0 || program_map + program_count > pgc.len()))
        || (cell_count > 0
            && (cell_playback == 0 || cell_playback + CELL_PLAYBACK_SIZE * cell_count > pgc.len()))
    {
        error!("Program chain of title {} has tables outside of it", title);
        return Err(ReadError::InvalidProgramChain { title })
    }

    let has_positions = cell_position != 0
        && cell_position + CELL_POSITION_SIZE * cell_count <= pgc.len();
    let mut cells = Vec::with_capacity(cell_count);
    let mut angle = 0u8;
    let mut angle_count = 1u8;

    for index in 0..cell_count {

        let entry = cell_playback + CELL_PLAYBACK_SIZE * index;
        let mut cursor = Cursor::new(&pgc[entry..entry + CELL_PLAYBACK_SIZE]);
        let category = cursor.read_u8()?;

        cursor.set_position(4);

        let duration = bcd_duration(cursor.read_u32::<BigEndian>()?);
        let first_sector = cursor.read_u32::<BigEndian>()?;

        cursor.set_position(0x14);

        let last_sector = cursor.read_u32::<BigEndian>()?;
        let sectors = SectorRange::new(first_sector, last_sector).ok_or_else(|| {
            error!("Cell {} of title {} ends before it starts", index + 1, title);
            ReadError::InvalidProgramChain { title }
        })?;

        angle = if (category >> 4) & 0x03 == ANGLE_BLOCK {
            match category >> 6 {
                1 => 1,
                2 | 3 => angle.saturating_add(1),
                _ => 0,
            }
        } else {
            0
        };
        angle_count = angle_count.max(angle);

        let (vob_id, original_cell_id) = if has_positions {
            let position = cell_position + CELL_POSITION_SIZE * index;
            (BigEndian::read_u16(&pgc[position..position + 2]), pgc[position + 3])
        } else {
            (0, 0)
        };

        cells.push(
            Cell {
                cell_id: index as u8 + 1,
                angle,
                vob_id,
                original_cell_id,
                duration,
                first_sector,
                last_sector,
                sectors: vec![sectors],
            }
        );
    }

    let mut chapters = Vec::with_capacity(program_count);

    for (index, entry) in pgc[program_map..program_map + program_count].iter().enumerate() {
        if *entry == 0 || *entry as usize > cell_count {
            error!("Chapter {} of title {} starts at missing cell {}", index + 1, title, entry);
            return Err(ReadError::InvalidProgramChain { title })
        }
        chapters.push(Chapter { number: index as u8 + 1, first_cell: *entry });
    }

    Ok(
        (
            ProgramChain {
                title_number: title,
                duration: bcd_duration(BigEndian::read_u32(&pgc[4..8])),
                next_pgc: BigEndian::read_u16(&pgc[0x9C..0x9E]),
                previous_pgc: BigEndian::read_u16(&pgc[0x9E..0xA0]),
                parent_pgc: BigEndian::read_u16(&pgc[0xA0..0xA2]),
                angle_count,
                palette,
                chapters,
                cells,
            },
            warnings,
        )
    )
}

/// Narrows each cell's sectors down to its entries in the cell address table.
fn locate_cells(chain: &mut ProgramChain, addresses: &[CellAddress], warnings: &mut Vec<Warning>) {

    for cell in chain.cells.iter_mut().filter(|cell| cell.vob_id != 0) {

        let mut ranges: Vec<SectorRange> = addresses
            .iter()
            .filter(|address| {
                address.vob_id == cell.vob_id && address.cell_id == cell.original_cell_id
            })
            .filter_map(|address| {
                SectorRange::new(
                    address.sectors.first.max(cell.first_sector),
                    address.sectors.last.min(cell.last_sector),
                )
            })
            .collect();

        if ranges.is_empty() {
            debug!(
                "Cell {} of VOB {} not in Cell Address Table, using its playback range",
                cell.original_cell_id,
                cell.vob_id,
            );
            warnings.push(
                Warning::CellNotInAddressTable {
                    vob_id: cell.vob_id,
                    cell_id: cell.original_cell_id,
                }
            );
            continue
        }

        ranges.sort();
        cell.sectors = merge_adjacent(&ranges);
    }
}

/// Parses a palette of `(0, Y, Cr, Cb)` entries.
pub fn parse_palette(data: &[u8]) -> TitleSetReadResult<(Palette, Vec<Warning>)> {

    if data.len() % 4 != 0 {
        error!("Palette conversion: palette size is {} bytes, not a multiple of 4", data.len());
        return Err(ReadError::PaletteSizeInvalid { size: data.len() })
    }

    let mut entries = Vec::with_capacity(data.len() / 4);
    let mut warnings = Vec::new();

    for entry in data.chunks_exact(4) {
        if entry[0] != 0 {
            warn!("Palette conversion: unexpected value 0x{:02X}, should be 0", entry[0]);
            warnings.push(Warning::UnexpectedPaletteByte(entry[0]));
        }
        entries.push(PaletteEntry { y: entry[1], cr: entry[2], cb: entry[3] });
    }

    Ok((Palette { entries }, warnings))
}

/// Converts a BCD `hhmmssff` playback time to seconds. Frames are dropped.
pub fn bcd_duration(value: u32) -> u32 {

    let bcd = |byte: u32| (byte >> 4 & 0x0F) * 10 + (byte & 0x0F);

    bcd(value >> 24) * 3600 + bcd(value >> 16 & 0xFF) * 60 + bcd(value >> 8 & 0xFF)
}

/// Returns whether `path` names a file of a video title set, such as `VTS_01_0.IFO` or
/// `VTS_01_1.VOB`.
pub fn is_title_set_file_name<P: AsRef<Path>>(path: P) -> bool {

    let name = match path.as_ref().file_name().and_then(|name| name.to_str()) {
        Some(name) => name.to_ascii_uppercase(),
        None => return false,
    };
    let bytes = name.as_bytes();

    bytes.len() == 12
        && name.starts_with("VTS_")
        && bytes[4].is_ascii_digit()
        && bytes[5].is_ascii_digit()
        && bytes[6] == b'_'
        && bytes[7].is_ascii_digit()
        && (name.ends_with(".IFO") || name.ends_with(".BUP") || name.ends_with(".VOB"))
}

/// The files making up a title set on the host file system.
#[derive(Clone, Debug, PartialEq)]
pub struct TitleSetFiles {
    pub vts_number: u8,
    pub ifo: PathBuf,
    pub vobs: Vec<PathBuf>,
}

/// Finds the information file and title VOB files of the title set that `path` belongs to.
pub fn title_set_files<P: AsRef<Path>>(path: P) -> TitleSetReadResult<TitleSetFiles> {

    let path = path.as_ref();

    if !is_title_set_file_name(path) {
        return Err(
            ReadError::InvalidDvdStructure {
                reason: format!("{} is not a title set file", path.display()),
            }
        )
    }

    let directory = path.parent().unwrap_or_else(|| Path::new(""));
    let name = path.file_name().and_then(|name| name.to_str()).unwrap_or("").to_ascii_uppercase();
    let base = &name[..6];
    let vts_number = name[4..6].parse::<u8>().map_err(|_| {
        ReadError::InvalidDvdStructure { reason: format!("{} has no title set number", name) }
    })?;
    let ifo = directory.join(format!("{}_0.IFO", base));
    let mut vobs = Vec::new();

    for part in 1..=MAX_VOB_FILES {
        let vob = directory.join(format!("{}_{}.VOB", base, part));
        if !vob.is_file() {
            break
        }
        vobs.push(vob);
    }

    if vobs.is_empty() {
        error!("No VOB file found for {}", name);
        return Err(ReadError::NoVobFile { name })
    }
    if !ifo.is_file() {
        error!("{} not found", ifo.display());
        return Err(ReadError::IfoNotFound { name: ifo.display().to_string() })
    }

    Ok(TitleSetFiles { vts_number, ifo, vobs })
}

impl TitleSet {

    /// Loads the title set that the file at `path` belongs to from the host file system.
    ///
    /// When the files live on an open volume, passing it in records where the VOB files start
    /// on the media.
    pub fn load<P: AsRef<Path>>(path: P, volume: Option<&Volume>) -> TitleSetReadResult<Self> {

        let files = title_set_files(path)?;
        let ifo = fs::read(&files.ifo)?;
        let mut title_set = parse(&ifo)?;

        title_set.vts_number = files.vts_number;
        title_set.ifo_name = file_name(&files.ifo);

        for vob in files.vobs.iter() {
            title_set.vob_files.push(
                VobFile {
                    name: file_name(vob),
                    path: Some(vob.clone()),
                    disc_sector: None,
                    size: fs::metadata(vob)?.len(),
                }
            );
        }

        if let Some(volume) = volume {
            title_set.volume_id = Some(volume.volume_id().to_string());
            title_set.encrypted = volume.is_encrypted();
            for vob in title_set.vob_files.iter_mut() {
                if let Some(path) = &vob.path {
                    vob.disc_sector = volume.search_file(path).map(|file| file.start_sector);
                }
            }
        }

        title_set.log_summary();

        Ok(title_set)
    }

    /// Loads title set `vts_number` directly from the media.
    pub fn load_from_volume(volume: &mut Volume, vts_number: u8) -> TitleSetReadResult<Self> {

        let name = format!("VTS_{:02}_0.IFO", vts_number);
        let file = volume.vts_information_file(vts_number).cloned().ok_or_else(|| {
            error!("{} not found on DVD", name);
            ReadError::IfoNotFound { name: name.clone() }
        })?;
        let ifo = volume.read_file(&file)?;
        let mut title_set = parse(&ifo)?;

        title_set.vts_number = vts_number;
        title_set.ifo_name = name.clone();
        title_set.volume_id = Some(volume.volume_id().to_string());
        title_set.encrypted = volume.is_encrypted();

        for part in 1..=MAX_VOB_FILES {
            match volume.vts_video_file(vts_number, part) {
                Some(vob) => title_set.vob_files.push(
                    VobFile {
                        name: vob.name().to_string(),
                        path: volume.root_name().map(|root| root.join(&vob.path)),
                        disc_sector: Some(vob.start_sector),
                        size: vob.size,
                    }
                ),
                None => break,
            }
        }

        if title_set.vob_files.is_empty() {
            error!("No VOB file found for {}", name);
            return Err(ReadError::NoVobFile { name })
        }

        title_set.log_summary();

        Ok(title_set)
    }

    fn log_summary(&self) {
        info!(
            "Title set {}: {} titles, {} VOB files, {} audio streams, {} subtitle streams",
            self.vts_number,
            self.program_chains.iter().flatten().count(),
            self.vob_files.len(),
            self.audio.len(),
            self.subtitles.len(),
        );
        for warning in self.warnings.iter() {
            debug!("Title set {}: {}", self.vts_number, warning);
        }
    }
}

fn file_name(path: &Path) -> String {
    path.file_name().map(|name| name.to_string_lossy().into_owned()).unwrap_or_default()
}
