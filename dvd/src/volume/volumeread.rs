/*
 * SPDX-FileCopyrightText: 2021 William Swartzendruber <wswartzendruber@gmail.com>
 *
 * SPDX-License-Identifier: OSL-3.0
 */

use super::{
    directory::{decode_name, parse_directory_records, MIN_RECORD_SIZE},
    Directory,
    DvdFile,
    PrimaryVolumeDescriptor,
    Volume,
};
use crate::{
    device::{resolve_device, FileDevice, SectorDevice, SeekMode},
    BadSectorPolicy,
    Config,
    SECTOR_SIZE,
};
use std::{
    io::{Error as IoError, ErrorKind},
    path::{Component, Path, PathBuf},
};
use byteorder::{ByteOrder, LittleEndian};
use thiserror::Error as ThisError;
use tracing::{debug, error, info, warn};

const FIRST_VOLUME_DESCRIPTOR: u32 = 16;
const MAX_VOLUME_DESCRIPTORS: u32 = 8;
const VOLUME_DESCRIPTOR_ID: &[u8] = b"CD001";
const PRIMARY_VOLUME_DESCRIPTOR: u8 = 1;
const VOLUME_DESCRIPTOR_TERMINATOR: u8 = 255;
const MAX_DIRECTORY_DEPTH: usize = 256;

pub type VolumeResult<T> = Result<T, VolumeError>;

#[derive(ThisError, Debug)]
pub enum VolumeError {
    #[error("no DVD device found for {path}")]
    DeviceNotFound {
        path: PathBuf,
    },
    /// The device could not be opened for sector access. With [`FileDevice`] this is the
    /// failure to open the file itself.
    #[error("error initializing DVD access on {device}")]
    DecryptionInitFailed {
        device: PathBuf,
        #[source]
        source: IoError,
    },
    #[error("invalid volume descriptor: found \"{actual}\", expected \"{expected}\"")]
    InvalidVolumeDescriptor {
        actual: String,
        expected: String,
    },
    #[error("primary volume descriptor not found")]
    PrimaryVolumeDescriptorNotFound,
    #[error("root directory not found")]
    RootDirectoryNotFound,
    #[error("too many directory levels")]
    DirectoryTooDeep,
    #[error("sector {sector} not found in media layout")]
    SectorNotInLayout {
        sector: u32,
    },
    #[error("error seeking DVD to sector {sector}")]
    SeekError {
        sector: u32,
        #[source]
        source: IoError,
    },
    #[error("error reading sector {sector}")]
    BadSector {
        sector: u32,
        #[source]
        source: IoError,
    },
    #[error("too many consecutive bad sectors, last one at sector {sector}")]
    TooManyBadSectors {
        sector: u32,
    },
    #[error("invalid bad sector policy: {value}")]
    InvalidBadSectorPolicy {
        value: String,
    },
    #[error("error getting CSS key for {file}")]
    KeyRetrievalFailed {
        file: String,
        #[source]
        source: IoError,
    },
    #[error("file not found on DVD: {path}")]
    FileNotFound {
        path: String,
    },
    #[error("DVD volume is not open")]
    NotOpen,
}

/// Outcome of a read into a caller-supplied buffer.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SectorRead {
    /// Sectors placed at the front of the buffer.
    pub sectors: usize,
    /// Sectors the read position advanced by, including skipped ones.
    pub consumed: u32,
    /// Sectors that could not be read.
    pub skipped: u32,
}

/// Sectors returned by [`Volume::read_sectors`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SectorData {
    pub data: Vec<u8>,
    pub skipped: u32,
}

impl SectorData {
    pub fn sector_count(&self) -> usize {
        self.data.len() / SECTOR_SIZE
    }
}

/// Returns the title set number named by a `VTS_nn_0.IFO` file name.
pub fn vts_number_of(name: &str) -> Option<u8> {

    let name = name.to_ascii_uppercase();

    if name.len() == 12 && name.starts_with("VTS_") && name.ends_with("_0.IFO") {
        name[4..6].parse().ok().filter(|number| *number > 0)
    } else {
        None
    }
}

impl Volume {

    /// Opens the DVD behind `path`, which may be a device, a disc image, a mount point or any
    /// file on a mounted disc.
    pub fn open<P: AsRef<Path>>(path: P, config: &Config) -> VolumeResult<Self> {

        let path = path.as_ref();
        let resolved = resolve_device(path).ok_or_else(|| {
            error!("No DVD device found for {}", path.display());
            VolumeError::DeviceNotFound { path: path.to_path_buf() }
        })?;
        let device = FileDevice::open(&resolved.device).map_err(|source| {
            error!("Error initializing DVD access on {}", resolved.device.display());
            VolumeError::DecryptionInitFailed { device: resolved.device.clone(), source }
        })?;
        let mut volume = Self::new(resolved.device, Box::new(device), config);

        volume.root_name = resolved.mount_point;
        volume.load()?;

        Ok(volume)
    }

    /// Opens a volume on an already initialized device.
    pub fn with_device(
        device_name: PathBuf,
        device: Box<dyn SectorDevice>,
        config: &Config,
    ) -> VolumeResult<Self> {

        let mut volume = Self::new(device_name, device, config);

        volume.load()?;

        Ok(volume)
    }

    fn new(device_name: PathBuf, device: Box<dyn SectorDevice>, config: &Config) -> Self {
        Self {
            device_name,
            root_name: None,
            device,
            config: config.clone(),
            descriptor: None,
            root: Directory::default(),
            layout: Vec::new(),
            vts_count: 0,
            is_open: false,
            next_sector: 0,
            current: None,
            skipped_sectors: 0,
        }
    }

    fn load(&mut self) -> VolumeResult<()> {

        self.validate_volume_descriptor()?;
        self.read_root_directory()?;
        self.build_layout();
        self.is_open = true;

        if self.config.use_max_read_speed {
            match self.device.set_max_speed() {
                Ok(()) => debug!("DVD set to maximum read speed"),
                Err(err) => {
                    debug!("Failed to set DVD to maximum read speed, using default speed: {}", err)
                }
            }
        }

        self.seek(0)?;

        info!(
            "Opened DVD volume \"{}\" on {}, {} sectors, {} title sets{}",
            self.volume_id(),
            self.device_name.display(),
            self.volume_size(),
            self.vts_count,
            if self.is_encrypted() { ", encrypted" } else { "" },
        );

        Ok(())
    }

    /// Scans the volume descriptors starting at sector 16 for the primary one.
    pub fn validate_volume_descriptor(&mut self) -> VolumeResult<&PrimaryVolumeDescriptor> {

        let mut data = vec![0u8; SECTOR_SIZE];

        for index in 0..MAX_VOLUME_DESCRIPTORS {

            let sector = FIRST_VOLUME_DESCRIPTOR + index;

            self.read_single_sector(&mut data, sector)?;

            if &data[1..6] != VOLUME_DESCRIPTOR_ID {
                error!("Invalid DVD volume descriptor at sector {}", sector);
                return Err(
                    VolumeError::InvalidVolumeDescriptor {
                        actual: decode_name(&data[1..6]),
                        expected: decode_name(VOLUME_DESCRIPTOR_ID),
                    }
                )
            }

            match data[0] {
                PRIMARY_VOLUME_DESCRIPTOR => {
                    let descriptor = parse_primary_volume_descriptor(&data)?;
                    debug!(
                        "Primary volume descriptor at sector {}: \"{}\", {} sectors",
                        sector,
                        descriptor.volume_id,
                        descriptor.volume_size,
                    );
                    return Ok(self.descriptor.insert(descriptor))
                }
                VOLUME_DESCRIPTOR_TERMINATOR => break,
                _ => { }
            }
        }

        error!("Primary volume descriptor not found");

        Err(VolumeError::PrimaryVolumeDescriptorNotFound)
    }

    /// Reads the full directory tree, counting the title sets found in `VIDEO_TS`.
    pub fn read_root_directory(&mut self) -> VolumeResult<&Directory> {

        let descriptor = match &self.descriptor {
            Some(descriptor) => descriptor.clone(),
            None => self.validate_volume_descriptor()?.clone(),
        };
        let mut root = Directory {
            entry: DvdFile {
                path: String::new(),
                start_sector: descriptor.root_sector,
                size: descriptor.root_size as u64,
            },
            ..Directory::default()
        };

        self.vts_count = 0;
        self.read_directory(&mut root, 0)?;
        self.root = root;

        Ok(&self.root)
    }

    fn read_directory(&mut self, directory: &mut Directory, depth: usize) -> VolumeResult<()> {

        if depth > MAX_DIRECTORY_DEPTH {
            error!("Too many directory levels");
            return Err(VolumeError::DirectoryTooDeep)
        }

        let sectors = directory.entry.sector_count() as usize;
        let mut data = vec![0u8; sectors * SECTOR_SIZE];
        let read = self.read_into(
            &mut data,
            Some(directory.entry.start_sector),
            sectors,
            BadSectorPolicy::Fail,
        )?;

        data.truncate((read.sectors * SECTOR_SIZE).min(directory.entry.size as usize));

        let in_video_ts = depth == 1 && directory.name().eq_ignore_ascii_case("VIDEO_TS");

        for record in parse_directory_records(&data) {

            let path = if directory.entry.path.is_empty() {
                record.name.clone()
            } else {
                format!("{}/{}", directory.entry.path, record.name)
            };
            let entry = DvdFile { path, start_sector: record.sector, size: record.size as u64 };

            if record.is_directory {
                let mut subdirectory = Directory { entry, ..Directory::default() };
                self.read_directory(&mut subdirectory, depth + 1)?;
                directory.subdirectories.push(subdirectory);
            } else {
                if in_video_ts && vts_number_of(&record.name).is_some() {
                    self.vts_count += 1;
                }
                directory.files.push(entry);
            }
        }

        Ok(())
    }

    fn build_layout(&mut self) {

        let mut files = Vec::new();

        self.root.walk(&mut |file: &DvdFile| {
            if file.size > 0 {
                files.push(file.clone());
            }
        });
        files.sort_by_key(|file| file.start_sector);

        let volume_size = self.volume_size();
        let mut layout = Vec::with_capacity(files.len() * 2 + 1);
        let mut next = 0;

        for file in files {
            if file.start_sector > next {
                layout.push(DvdFile::placeholder(next, file.start_sector - next));
            }
            next = next.max(file.end_sector());
            layout.push(file);
        }

        if next < volume_size {
            layout.push(DvdFile::placeholder(next, volume_size - next));
        }

        debug!("DVD media layout has {} regions", layout.len());

        self.layout = layout;
        self.current = None;
    }

    /// Positions the volume so that the next read starts at `sector`.
    pub fn seek(&mut self, sector: u32) -> VolumeResult<()> {

        let mut mode = SeekMode::Plain;
        let mut region = None;

        if self.is_open {

            let index = self.region_index(sector).ok_or_else(|| {
                error!("Error seeking DVD to sector {}, not found in media layout", sector);
                VolumeError::SectorNotInLayout { sector }
            })?;
            let file = &self.layout[index];

            if self.current != Some(index) {
                info!("Switching to {} on DVD", file.description());
            }
            if file.is_vob() {
                mode = if self.device.is_scrambled() && self.current != Some(index) {
                    SeekMode::Key
                } else {
                    SeekMode::Mpeg
                };
            }
            region = Some(index);
        }

        self.device.seek(sector, mode).map_err(|source| {
            error!("Error seeking DVD to sector {}", sector);
            VolumeError::SeekError { sector, source }
        })?;
        self.next_sector = sector;
        self.current = region;

        Ok(())
    }

    /// Reads `count` sectors starting at `start`.
    ///
    /// The returned data holds every sector that was read or, under
    /// [`BadSectorPolicy::ReadAsZero`], substituted. The read stops early at the end of the
    /// volume.
    pub fn read_sectors(
        &mut self,
        start: u32,
        count: usize,
        policy: BadSectorPolicy,
    ) -> VolumeResult<SectorData> {

        if !self.is_open {
            return Err(VolumeError::NotOpen)
        }

        let mut data = vec![0u8; count * SECTOR_SIZE];
        let read = self.read_into(&mut data, Some(start), count, policy)?;

        data.truncate(read.sectors * SECTOR_SIZE);

        Ok(SectorData { data, skipped: read.skipped })
    }

    /// Reads up to `count` sectors into `buf`, starting at `start` or, if `None`, wherever the
    /// previous read stopped.
    pub fn read_sectors_into(
        &mut self,
        buf: &mut [u8],
        start: Option<u32>,
        count: usize,
        policy: BadSectorPolicy,
    ) -> VolumeResult<SectorRead> {

        if !self.is_open {
            return Err(VolumeError::NotOpen)
        }

        self.read_into(buf, start, count, policy)
    }

    fn read_single_sector(&mut self, buf: &mut [u8], sector: u32) -> VolumeResult<()> {

        let read = self.read_into(buf, Some(sector), 1, BadSectorPolicy::Fail)?;

        if read.sectors == 1 {
            Ok(())
        } else {
            Err(
                VolumeError::BadSector {
                    sector,
                    source: IoError::new(ErrorKind::UnexpectedEof, "end of media"),
                }
            )
        }
    }

    fn read_into(
        &mut self,
        buf: &mut [u8],
        start: Option<u32>,
        count: usize,
        policy: BadSectorPolicy,
    ) -> VolumeResult<SectorRead> {

        if let Some(start) = start {
            if start != self.next_sector || (self.is_open && self.current.is_none()) {
                self.seek(start)?;
            }
        }

        let count = count.min(buf.len() / SECTOR_SIZE);
        let first = self.next_sector;
        let mut end = first as u64 + count as u64;

        if self.is_open {
            end = end.min(self.volume_size() as u64);
        }

        let mut read = SectorRead::default();
        let mut consecutive_bad = 0;
        let mut isolate_until = 0;

        while (self.next_sector as u64) < end {

            let mut wanted = (end - self.next_sector as u64) as usize;
            let mut decrypt = false;

            if self.is_open {
                let index = self.enter_region()?;
                let region = &self.layout[index];
                decrypt = region.is_vob() && self.device.is_scrambled();
                wanted = wanted.min((region.end_sector() - self.next_sector) as usize);
            }
            if self.next_sector < isolate_until {
                wanted = 1;
            }

            let offset = read.sectors * SECTOR_SIZE;
            let target = &mut buf[offset..offset + wanted * SECTOR_SIZE];

            match self.device.read(target, wanted, decrypt) {
                Ok(0) => break,
                Ok(got) => {
                    if consecutive_bad > 0 {
                        self.log_skipped(consecutive_bad);
                        consecutive_bad = 0;
                    }
                    self.next_sector += got as u32;
                    read.sectors += got;
                }
                Err(err) if wanted > 1 => {
                    debug!(
                        "Reading {} sectors at {} failed ({}), reading one sector at a time",
                        wanted,
                        self.next_sector,
                        err,
                    );
                    isolate_until = self.next_sector + wanted as u32;
                    self.reposition()?;
                }
                Err(err) => {

                    let sector = self.next_sector;
                    let target = &mut buf[offset..offset + SECTOR_SIZE];

                    if policy == BadSectorPolicy::Retry && self.retry_sector(target, decrypt)? {
                        self.next_sector += 1;
                        read.sectors += 1;
                        continue
                    }

                    consecutive_bad += 1;

                    match policy {
                        BadSectorPolicy::Fail | BadSectorPolicy::Retry => {
                            error!("Error reading sector {} in {}", sector, self.region_name());
                            return Err(VolumeError::BadSector { sector, source: err })
                        }
                        BadSectorPolicy::Skip => { }
                        BadSectorPolicy::ReadAsZero => {
                            target.fill(0);
                            read.sectors += 1;
                        }
                    }

                    if consecutive_bad > self.config.max_consecutive_bad_sectors {
                        error!("Too many consecutive bad sectors, giving up at sector {}", sector);
                        return Err(VolumeError::TooManyBadSectors { sector })
                    }

                    debug!("Bad sector {} in {}", sector, self.region_name());
                    read.skipped += 1;
                    self.skipped_sectors += 1;
                    self.next_sector += 1;

                    if (self.next_sector as u64) < end {
                        self.reposition()?;
                    }
                }
            }
        }

        if consecutive_bad > 0 {
            self.log_skipped(consecutive_bad);
        }

        read.consumed = self.next_sector - first;

        Ok(read)
    }

    /// Makes sure the region holding the next sector is current, retrieving its key if it is a
    /// scrambled file.
    fn enter_region(&mut self) -> VolumeResult<usize> {

        let sector = self.next_sector;

        if let Some(index) = self.current {
            if self.layout[index].contains(sector) {
                return Ok(index)
            }
        }

        let index = self.region_index(sector).ok_or_else(|| {
            error!("Sector {} not found in media layout", sector);
            VolumeError::SectorNotInLayout { sector }
        })?;
        let file = &self.layout[index];

        info!("Switching to {} on DVD", file.description());

        if file.is_vob() && self.device.is_scrambled() {
            self.device.seek(sector, SeekMode::Key).map_err(|source| {
                error!("Error seeking DVD to sector {}", sector);
                VolumeError::SeekError { sector, source }
            })?;
        }
        self.current = Some(index);

        Ok(index)
    }

    fn reposition(&mut self) -> VolumeResult<()> {

        let sector = self.next_sector;
        let mode = match self.current {
            Some(index) if self.layout[index].is_vob() => SeekMode::Mpeg,
            _ => SeekMode::Plain,
        };

        self.device.seek(sector, mode).map_err(|source| {
            error!("Error seeking DVD to sector {}", sector);
            VolumeError::SeekError { sector, source }
        })
    }

    fn retry_sector(&mut self, buf: &mut [u8], decrypt: bool) -> VolumeResult<bool> {

        for attempt in 1..=self.config.bad_sector_retries {
            self.reposition()?;
            match self.device.read(buf, 1, decrypt) {
                Ok(1) => {
                    debug!("Read sector {} on attempt {}", self.next_sector, attempt);
                    return Ok(true)
                }
                Ok(_) => break,
                Err(err) => debug!("Attempt {} on sector {}: {}", attempt, self.next_sector, err),
            }
        }

        self.reposition()?;

        Ok(false)
    }

    fn log_skipped(&self, count: u32) {
        warn!("Skipped {} bad sectors in {}", count, self.region_name());
    }

    fn region_name(&self) -> String {
        match self.current {
            Some(index) => self.layout[index].description(),
            None => self.device_name.display().to_string(),
        }
    }

    fn region_index(&self, sector: u32) -> Option<usize> {
        self.layout.iter().position(|file| file.contains(sector))
    }

    /// Retrieves the key of the VOB file at `path`, which is relative to the volume root.
    pub fn get_key(&mut self, path: &str) -> VolumeResult<()> {

        let file = self.search_file(path).cloned().ok_or_else(|| {
            VolumeError::FileNotFound { path: path.to_string() }
        })?;

        self.request_key(&file)
    }

    fn request_key(&mut self, file: &DvdFile) -> VolumeResult<()> {

        info!("Getting CSS key for {}", file.path);

        match self.device.seek(file.start_sector, SeekMode::Key) {
            Ok(()) => {
                self.next_sector = file.start_sector;
                self.current = self.region_index(file.start_sector);
                Ok(())
            }
            Err(source) => {
                warn!("Error getting CSS key for {}", file.path);
                self.current = None;
                Err(VolumeError::KeyRetrievalFailed { file: file.path.clone(), source })
            }
        }
    }

    /// Retrieves the keys of every title set's first VOB file and returns how many could not
    /// be retrieved. Does nothing on unscrambled media.
    pub fn load_all_keys(&mut self) -> usize {

        if !self.device.is_scrambled() {
            return 0
        }

        let mut files = Vec::new();

        self.root.walk(&mut |file: &DvdFile| {
            let name = file.name().to_ascii_uppercase();
            if name.ends_with("_TS.VOB") || name.ends_with("_0.VOB") || name.ends_with("_1.VOB") {
                files.push(file.clone());
            }
        });

        files.iter().filter(|file| self.request_key(file).is_err()).count()
    }

    /// Looks up a file by its path relative to the volume root, or by its full path under the
    /// mount point the volume was opened through.
    pub fn search_file<P: AsRef<Path>>(&self, path: P) -> Option<&DvdFile> {

        let path = path.as_ref();
        let relative = match &self.root_name {
            Some(root) => path.strip_prefix(root).unwrap_or(path),
            None => path,
        };
        let components: Vec<&str> = relative
            .components()
            .filter_map(|component| match component {
                Component::Normal(name) => name.to_str(),
                _ => None,
            })
            .collect();

        self.root.search_path(&components)
    }

    /// The `VTS_nn_0.IFO` file of title set `vts`.
    pub fn vts_information_file(&self, vts: u8) -> Option<&DvdFile> {
        self.root.search_path(&["VIDEO_TS", format!("VTS_{:02}_0.IFO", vts).as_str()])
    }

    /// The `VTS_nn_p.VOB` file of title set `vts`.
    pub fn vts_video_file(&self, vts: u8, part: u8) -> Option<&DvdFile> {
        self.root.search_path(&["VIDEO_TS", format!("VTS_{:02}_{}.VOB", vts, part).as_str()])
    }

    /// Reads the complete contents of a file on the volume.
    pub fn read_file(&mut self, file: &DvdFile) -> VolumeResult<Vec<u8>> {

        if !self.is_open {
            return Err(VolumeError::NotOpen)
        }

        let sectors = file.sector_count() as usize;
        let mut data = vec![0u8; sectors * SECTOR_SIZE];
        let read = self.read_into(
            &mut data,
            Some(file.start_sector),
            sectors,
            BadSectorPolicy::Fail,
        )?;

        data.truncate((read.sectors * SECTOR_SIZE).min(file.size as usize));

        Ok(data)
    }

    pub fn device_name(&self) -> &Path {
        &self.device_name
    }

    /// The mount point the volume was opened through, if any.
    pub fn root_name(&self) -> Option<&Path> {
        self.root_name.as_deref()
    }

    pub fn volume_id(&self) -> &str {
        self.descriptor.as_ref().map(|descriptor| descriptor.volume_id.as_str()).unwrap_or("")
    }

    /// Size of the volume in sectors.
    pub fn volume_size(&self) -> u32 {
        self.descriptor.as_ref().map(|descriptor| descriptor.volume_size).unwrap_or(0)
    }

    pub fn root_directory_sector(&self) -> u32 {
        self.root.entry.start_sector
    }

    pub fn root(&self) -> &Directory {
        &self.root
    }

    /// Every region of the volume in sector order, unallocated ones included.
    pub fn layout(&self) -> &[DvdFile] {
        &self.layout
    }

    /// Every file of the volume in sector order.
    pub fn all_files(&self) -> impl Iterator<Item = &DvdFile> {
        self.layout.iter().filter(|file| !file.is_placeholder())
    }

    pub fn vts_count(&self) -> usize {
        self.vts_count
    }

    pub fn is_open(&self) -> bool {
        self.is_open
    }

    pub fn is_encrypted(&self) -> bool {
        self.device.is_scrambled()
    }

    /// Total number of unreadable sectors met since the volume was opened.
    pub fn skipped_sectors(&self) -> u64 {
        self.skipped_sectors
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

fn parse_primary_volume_descriptor(data: &[u8]) -> VolumeResult<PrimaryVolumeDescriptor> {

    let root = &data[156..156 + MIN_RECORD_SIZE];

    if root[0] as usize != MIN_RECORD_SIZE {
        error!("Root directory record has unexpected size {}", root[0]);
        return Err(VolumeError::RootDirectoryNotFound)
    }

    let root_sector = LittleEndian::read_u32(&root[2..6]);
    let root_size = LittleEndian::read_u32(&root[10..14]);

    if root_sector == 0 || root_size == 0 {
        return Err(VolumeError::RootDirectoryNotFound)
    }

    Ok(
        PrimaryVolumeDescriptor {
            volume_id: decode_name(&data[40..72]).trim().to_string(),
            volume_size: LittleEndian::read_u32(&data[80..84]),
            root_sector,
            root_size,
        }
    )
}
