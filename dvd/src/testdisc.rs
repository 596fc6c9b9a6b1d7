/*
 * SPDX-FileCopyrightText: 2021 William Swartzendruber <wswartzendruber@gmail.com>
 *
 * SPDX-License-Identifier: CC0-1.0
 */

//! Synthetic discs for tests.

use super::{
    device::{SectorDevice, SeekMode},
    SECTOR_SIZE,
};
use std::{
    collections::HashSet,
    io::{Error as IoError, ErrorKind, Result as IoResult},
    sync::{Arc, Mutex},
};
use byteorder::{BigEndian, ByteOrder, LittleEndian};

pub const ROOT_SECTOR: u32 = 18;
pub const VIDEO_TS_SECTOR: u32 = 19;
pub const FIRST_FILE_SECTOR: u32 = 20;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum DeviceCall {
    Seek(u32, SeekMode),
    Read(u32, usize),
}

/// A device backed by an in-memory image, with optional unreadable sectors.
pub struct MemoryDevice {
    data: Vec<u8>,
    position: u32,
    bad: HashSet<u32>,
    scrambled: bool,
    calls: Arc<Mutex<Vec<DeviceCall>>>,
}

impl MemoryDevice {

    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            position: 0,
            bad: HashSet::new(),
            scrambled: false,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_bad_sectors(mut self, sectors: &[u32]) -> Self {
        self.bad.extend(sectors.iter().copied());
        self
    }

    pub fn scrambled(mut self) -> Self {
        self.scrambled = true;
        self
    }

    pub fn calls(&self) -> Arc<Mutex<Vec<DeviceCall>>> {
        self.calls.clone()
    }
}

impl SectorDevice for MemoryDevice {

    fn seek(&mut self, sector: u32, mode: SeekMode) -> IoResult<()> {
        self.calls.lock().unwrap().push(DeviceCall::Seek(sector, mode));
        self.position = sector;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8], count: usize, _decrypt: bool) -> IoResult<usize> {

        self.calls.lock().unwrap().push(DeviceCall::Read(self.position, count));

        let mut got = 0;

        while got < count {
            let sector = self.position;
            let offset = sector as usize * SECTOR_SIZE;
            if offset + SECTOR_SIZE > self.data.len() {
                break
            }
            if self.bad.contains(&sector) {
                if got == 0 {
                    return Err(IoError::new(ErrorKind::Other, "unreadable sector"))
                }
                break
            }
            buf[got * SECTOR_SIZE..(got + 1) * SECTOR_SIZE]
                .copy_from_slice(&self.data[offset..offset + SECTOR_SIZE]);
            self.position += 1;
            got += 1;
        }

        Ok(got)
    }

    fn is_scrambled(&self) -> bool {
        self.scrambled
    }

    fn set_max_speed(&mut self) -> IoResult<()> {
        Ok(())
    }
}

/// Builds an ISO 9660 image with a single `VIDEO_TS` directory.
pub struct IsoBuilder {
    volume_id: String,
    files: Vec<(String, Vec<u8>)>,
    trailing_sectors: u32,
}

/// Where a file ended up in a built image.
#[derive(Clone, Debug, PartialEq)]
pub struct PlacedFile {
    pub name: String,
    pub start_sector: u32,
    pub size: u32,
}

impl IsoBuilder {

    pub fn new(volume_id: &str) -> Self {
        Self { volume_id: volume_id.to_string(), files: Vec::new(), trailing_sectors: 0 }
    }

    pub fn file(mut self, name: &str, content: Vec<u8>) -> Self {
        self.files.push((name.to_string(), content));
        self
    }

    pub fn trailing_sectors(mut self, count: u32) -> Self {
        self.trailing_sectors = count;
        self
    }

    pub fn build(&self) -> (Vec<u8>, Vec<PlacedFile>) {

        let mut placed = Vec::new();
        let mut next = FIRST_FILE_SECTOR;

        for (name, content) in self.files.iter() {
            placed.push(
                PlacedFile {
                    name: name.clone(),
                    start_sector: next,
                    size: content.len() as u32,
                }
            );
            next += ((content.len() + SECTOR_SIZE - 1) / SECTOR_SIZE) as u32;
        }

        let volume_size = next + self.trailing_sectors;
        let mut image = vec![0u8; volume_size as usize * SECTOR_SIZE];

        {
            let pvd = sector_mut(&mut image, 16);
            pvd[0] = 1;
            pvd[1..6].copy_from_slice(b"CD001");
            pvd[6] = 1;
            let mut volume_id = [b' '; 32];
            volume_id[..self.volume_id.len()].copy_from_slice(self.volume_id.as_bytes());
            pvd[40..72].copy_from_slice(&volume_id);
            LittleEndian::write_u32(&mut pvd[80..84], volume_size);
            BigEndian::write_u32(&mut pvd[84..88], volume_size);
            write_record(&mut pvd[156..190], &[0x00], ROOT_SECTOR, SECTOR_SIZE as u32, true);
        }
        {
            let terminator = sector_mut(&mut image, 17);
            terminator[0] = 255;
            terminator[1..6].copy_from_slice(b"CD001");
        }
        {
            let root = sector_mut(&mut image, ROOT_SECTOR);
            let mut offset = 0;
            offset += write_record(&mut root[offset..], &[0x00], ROOT_SECTOR, 2048, true);
            offset += write_record(&mut root[offset..], &[0x01], ROOT_SECTOR, 2048, true);
            write_record(&mut root[offset..], b"VIDEO_TS", VIDEO_TS_SECTOR, 2048, true);
        }
        {
            let directory = sector_mut(&mut image, VIDEO_TS_SECTOR);
            let mut offset = 0;
            offset += write_record(&mut directory[offset..], &[0x00], VIDEO_TS_SECTOR, 2048, true);
            offset += write_record(&mut directory[offset..], &[0x01], ROOT_SECTOR, 2048, true);
            for file in placed.iter() {
                let name = format!("{};1", file.name);
                offset += write_record(
                    &mut directory[offset..],
                    name.as_bytes(),
                    file.start_sector,
                    file.size,
                    false,
                );
            }
        }

        for ((_, content), file) in self.files.iter().zip(placed.iter()) {
            let start = file.start_sector as usize * SECTOR_SIZE;
            image[start..start + content.len()].copy_from_slice(content);
        }

        (image, placed)
    }
}

fn sector_mut(image: &mut [u8], sector: u32) -> &mut [u8] {
    let start = sector as usize * SECTOR_SIZE;
    &mut image[start..start + SECTOR_SIZE]
}

fn write_record(buf: &mut [u8], name: &[u8], sector: u32, size: u32, directory: bool) -> usize {

    let length = 33 + name.len() + (name.len() + 1) % 2;

    buf[0] = length as u8;
    LittleEndian::write_u32(&mut buf[2..6], sector);
    BigEndian::write_u32(&mut buf[6..10], sector);
    LittleEndian::write_u32(&mut buf[10..14], size);
    BigEndian::write_u32(&mut buf[14..18], size);
    buf[25] = if directory { 0x02 } else { 0x00 };
    buf[32] = name.len() as u8;
    buf[33..33 + name.len()].copy_from_slice(name);

    length
}

/// Position of a cell within an angle block.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum AngleBlock {
    None,
    First,
    Middle,
    Last,
}

#[derive(Clone, Debug)]
pub struct TestCell {
    pub vob_id: u16,
    pub cell_id: u8,
    pub first: u32,
    pub last: u32,
    pub block: AngleBlock,
}

impl TestCell {
    pub fn new(vob_id: u16, cell_id: u8, first: u32, last: u32) -> Self {
        Self { vob_id, cell_id, first, last, block: AngleBlock::None }
    }

    pub fn angle(mut self, block: AngleBlock) -> Self {
        self.block = block;
        self
    }
}

#[derive(Clone, Debug)]
pub struct TestPgc {
    pub title: u8,
    pub entry: bool,
    /// Duration as BCD `hhmmssff`.
    pub duration: u32,
    pub cells: Vec<TestCell>,
    pub programs: Vec<u8>,
    pub palette: Vec<[u8; 4]>,
    pub next_pgc: u16,
    pub previous_pgc: u16,
}

impl TestPgc {
    pub fn new(title: u8, cells: Vec<TestCell>) -> Self {
        Self {
            title,
            entry: true,
            duration: 0x0001_3000,
            programs: vec![1],
            palette: (0..16).map(|index| [0, 16 + index * 10, 128, 128]).collect(),
            next_pgc: 0,
            previous_pgc: 0,
            cells,
        }
    }
}

/// Builds a title set information file.
pub struct IfoBuilder {
    pub video: [u8; 2],
    pub audio: Vec<[u8; 8]>,
    pub subpictures: Vec<[u8; 6]>,
    pub pgcs: Vec<TestPgc>,
    /// `(vob id, cell id, first sector, last sector)`
    pub addresses: Vec<(u16, u8, u32, u32)>,
    pub title_count: u16,
}

impl IfoBuilder {

    pub fn new(pgcs: Vec<TestPgc>) -> Self {

        let addresses = pgcs
            .iter()
            .flat_map(|pgc| pgc.cells.iter())
            .map(|cell| (cell.vob_id, cell.cell_id, cell.first, cell.last))
            .collect();
        let title_count = pgcs.iter().map(|pgc| pgc.title as u16).max().unwrap_or(0);

        Self {
            video: [0x0C, 0x00],
            audio: vec![
                [0x04, 0x05, b'e', b'n', 0, 0, 0, 0],
                [0x84, 0x01, b'f', b'r', 0, 3, 0, 0],
            ],
            subpictures: vec![
                [0x01, 0, b'e', b'n', 0, 0],
                [0x01, 0, b'f', b'r', 0, 9],
            ],
            pgcs,
            addresses,
            title_count,
        }
    }

    pub fn build(&self) -> Vec<u8> {

        let pgci = self.build_pgci();
        let pgci_sectors = (pgci.len() + SECTOR_SIZE - 1) / SECTOR_SIZE;
        let ptt_sector = 1;
        let pgci_sector = 2;
        let c_adt_sector = pgci_sector + pgci_sectors;
        let mut ifo = vec![0u8; (c_adt_sector + 1) * SECTOR_SIZE];

        ifo[0..12].copy_from_slice(b"DVDVIDEO-VTS");
        BigEndian::write_u32(&mut ifo[0x0C4..0x0C8], 1024);
        BigEndian::write_u32(&mut ifo[0x0C8..0x0CC], ptt_sector as u32);
        BigEndian::write_u32(&mut ifo[0x0CC..0x0D0], pgci_sector as u32);
        BigEndian::write_u32(&mut ifo[0x0E0..0x0E4], c_adt_sector as u32);

        ifo[0x200..0x202].copy_from_slice(&self.video);
        BigEndian::write_u16(&mut ifo[0x202..0x204], self.audio.len() as u16);
        for (index, audio) in self.audio.iter().enumerate() {
            let offset = 0x204 + index * 8;
            ifo[offset..offset + 8].copy_from_slice(audio);
        }
        BigEndian::write_u16(&mut ifo[0x254..0x256], self.subpictures.len() as u16);
        for (index, subpicture) in self.subpictures.iter().enumerate() {
            let offset = 0x256 + index * 6;
            ifo[offset..offset + 6].copy_from_slice(subpicture);
        }

        let ptt = ptt_sector * SECTOR_SIZE;
        BigEndian::write_u16(&mut ifo[ptt..ptt + 2], self.title_count);

        let start = pgci_sector * SECTOR_SIZE;
        ifo[start..start + pgci.len()].copy_from_slice(&pgci);

        let c_adt = c_adt_sector * SECTOR_SIZE;
        BigEndian::write_u16(&mut ifo[c_adt..c_adt + 2], 1);
        BigEndian::write_u32(&mut ifo[c_adt + 4..c_adt + 8], 7 + 12 * self.addresses.len() as u32);
        for (index, (vob_id, cell_id, first, last)) in self.addresses.iter().enumerate() {
            let offset = c_adt + 8 + index * 12;
            BigEndian::write_u16(&mut ifo[offset..offset + 2], *vob_id);
            ifo[offset + 2] = *cell_id;
            BigEndian::write_u32(&mut ifo[offset + 4..offset + 8], *first);
            BigEndian::write_u32(&mut ifo[offset + 8..offset + 12], *last);
        }

        ifo
    }

    fn build_pgci(&self) -> Vec<u8> {

        let mut table = vec![0u8; 8 + 8 * self.pgcs.len()];
        let mut bodies = Vec::new();

        BigEndian::write_u16(&mut table[0..2], self.pgcs.len() as u16);

        for (index, pgc) in self.pgcs.iter().enumerate() {
            let descriptor = 8 + index * 8;
            let offset = table.len() + bodies.len();
            table[descriptor] = if pgc.entry { 0x80 | pgc.title } else { pgc.title };
            BigEndian::write_u32(&mut table[descriptor + 4..descriptor + 8], offset as u32);
            bodies.extend_from_slice(&build_pgc(pgc));
        }

        table.extend_from_slice(&bodies);

        let last_byte = table.len() as u32 - 1;
        BigEndian::write_u32(&mut table[4..8], last_byte);

        table
    }
}

pub fn build_pgc(pgc: &TestPgc) -> Vec<u8> {

    let program_map = 0xEC;
    let cell_playback = program_map + (pgc.programs.len() + 1) / 2 * 2;
    let cell_position = cell_playback + 24 * pgc.cells.len();
    let mut data = vec![0u8; cell_position + 4 * pgc.cells.len()];

    data[2] = pgc.programs.len() as u8;
    data[3] = pgc.cells.len() as u8;
    BigEndian::write_u32(&mut data[4..8], pgc.duration);
    BigEndian::write_u16(&mut data[0x9C..0x9E], pgc.next_pgc);
    BigEndian::write_u16(&mut data[0x9E..0xA0], pgc.previous_pgc);

    for (index, entry) in pgc.palette.iter().enumerate().take(16) {
        let offset = 0xA4 + index * 4;
        data[offset..offset + 4].copy_from_slice(entry);
    }

    BigEndian::write_u16(&mut data[0xE6..0xE8], program_map as u16);
    BigEndian::write_u16(&mut data[0xE8..0xEA], cell_playback as u16);
    BigEndian::write_u16(&mut data[0xEA..0xEC], cell_position as u16);

    data[program_map..program_map + pgc.programs.len()].copy_from_slice(&pgc.programs);

    for (index, cell) in pgc.cells.iter().enumerate() {

        let offset = cell_playback + index * 24;
        let (mode, kind) = match cell.block {
            AngleBlock::None => (0, 0),
            AngleBlock::First => (1, 1),
            AngleBlock::Middle => (2, 1),
            AngleBlock::Last => (3, 1),
        };

        data[offset] = (mode << 6) | (kind << 4);
        BigEndian::write_u32(&mut data[offset + 4..offset + 8], 0x0000_1000);
        BigEndian::write_u32(&mut data[offset + 8..offset + 12], cell.first);
        BigEndian::write_u32(&mut data[offset + 0x14..offset + 0x18], cell.last);

        let position = cell_position + index * 4;
        BigEndian::write_u16(&mut data[position..position + 2], cell.vob_id);
        data[position + 3] = cell.cell_id;
    }

    data
}

/// An MPEG program stream pack carrying `tag` so tests can tell sectors apart.
pub fn pack_sector(tag: u32) -> Vec<u8> {

    let mut sector = vec![0u8; SECTOR_SIZE];

    sector[0..4].copy_from_slice(&[0x00, 0x00, 0x01, 0xBA]);
    sector[4] = 0x44;
    sector[0x0E..0x12].copy_from_slice(&[0x00, 0x00, 0x01, 0xE0]);
    sector[0x14] = 0x80;
    BigEndian::write_u32(&mut sector[0x100..0x104], tag);

    sector
}

/// A navigation pack belonging to the given cell.
pub fn nav_pack(vob_id: u16, cell_id: u8) -> Vec<u8> {

    let mut sector = vec![0u8; SECTOR_SIZE];

    sector[0..4].copy_from_slice(&[0x00, 0x00, 0x01, 0xBA]);
    sector[4] = 0x44;
    sector[0x0E..0x12].copy_from_slice(&[0x00, 0x00, 0x01, 0xBB]);
    sector[0x26..0x2A].copy_from_slice(&[0x00, 0x00, 0x01, 0xBF]);
    sector[0x400..0x404].copy_from_slice(&[0x00, 0x00, 0x01, 0xBF]);
    sector[0x406] = 1;
    BigEndian::write_u16(&mut sector[0x41F..0x421], vob_id);
    sector[0x422] = cell_id;

    sector
}

pub fn pack_tag(sector: &[u8]) -> u32 {
    BigEndian::read_u32(&sector[0x100..0x104])
}

/// Three titles over twenty VOB sectors split across two VOB files.
///
/// | Title | Cells as (vob, cell, sectors)                              |
/// |-------|------------------------------------------------------------|
/// | 1     | (1, 1, 0-3) (1, 2, 4-7)                                    |
/// | 2     | (2, 1, 8-9) (2, 2, 10-11) (2, 3, 12-13) (2, 4, 14-15)      |
/// | 3     | (3, 1, 16-19)                                              |
///
/// Cells (2, 2) and (2, 3) form an angle block.
pub fn sample_pgcs() -> Vec<TestPgc> {
    vec![
        TestPgc::new(1, vec![TestCell::new(1, 1, 0, 3), TestCell::new(1, 2, 4, 7)]),
        TestPgc::new(
            2,
            vec![
                TestCell::new(2, 1, 8, 9),
                TestCell::new(2, 2, 10, 11).angle(AngleBlock::First),
                TestCell::new(2, 3, 12, 13).angle(AngleBlock::Last),
                TestCell::new(2, 4, 14, 15),
            ],
        ),
        TestPgc::new(3, vec![TestCell::new(3, 1, 16, 19)]),
    ]
}

/// VOB content for [`sample_pgcs`]: every cell opens with a navigation pack and every other
/// sector carries its own sector number as a tag.
pub fn sample_vob_sectors() -> Vec<Vec<u8>> {

    let cells: [(u16, u8, u32); 7] = [
        (1, 1, 0),
        (1, 2, 4),
        (2, 1, 8),
        (2, 2, 10),
        (2, 3, 12),
        (2, 4, 14),
        (3, 1, 16),
    ];

    (0..20)
        .map(|sector| match cells.iter().find(|(_, _, first)| *first == sector) {
            Some((vob_id, cell_id, _)) => nav_pack(*vob_id, *cell_id),
            None => pack_sector(sector),
        })
        .collect()
}

/// The sample title set as an image: `VTS_01_1.VOB` holds sectors 0-11 and `VTS_01_2.VOB`
/// holds sectors 12-19.
pub fn sample_disc() -> (Vec<u8>, Vec<PlacedFile>) {

    let ifo = IfoBuilder::new(sample_pgcs()).build();
    let sectors = sample_vob_sectors();

    IsoBuilder::new("SAMPLE_DISC")
        .file("VIDEO_TS.IFO", vec![0u8; SECTOR_SIZE])
        .file("VTS_01_0.IFO", ifo.clone())
        .file("VTS_01_1.VOB", sectors[..12].concat())
        .file("VTS_01_2.VOB", sectors[12..].concat())
        .file("VTS_01_0.BUP", ifo)
        .trailing_sectors(4)
        .build()
}
