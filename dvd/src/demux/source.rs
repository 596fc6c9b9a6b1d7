/*
 * SPDX-FileCopyrightText: 2021 William Swartzendruber <wswartzendruber@gmail.com>
 *
 * SPDX-License-Identifier: OSL-3.0
 */

use super::{DemuxError, DemuxResult, VobLocation};
use crate::{
    volume::Volume,
    BadSectorPolicy,
    SECTOR_SIZE,
};
use std::{
    fs::File,
    io::{Error as IoError, ErrorKind, Read, Seek, SeekFrom},
};
use tracing::{debug, error, warn};

/// Delivers the sectors of VOB files.
pub trait SectorSource {

    /// Reads the run at `location` into the front of `buf` and returns the number of sectors
    /// delivered. Fewer sectors than requested means unreadable ones were left out.
    fn read_location(&mut self, location: &VobLocation, buf: &mut [u8]) -> DemuxResult<usize>;

    /// Whether the sectors come straight off of the media.
    fn reads_media(&self) -> bool {
        false
    }
}

/// Reads VOB files from the host file system.
#[derive(Debug, Default)]
pub struct VobFileReader {
    current: Option<(usize, File)>,
    position: u64,
}

impl VobFileReader {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SectorSource for VobFileReader {

    fn read_location(&mut self, location: &VobLocation, buf: &mut [u8]) -> DemuxResult<usize> {

        let path = location.path.as_ref().ok_or_else(|| {
            DemuxError::VobOpenError {
                name: location.name.clone(),
                source: IoError::new(ErrorKind::NotFound, "not on the host file system"),
            }
        })?;

        let file = match &mut self.current {
            Some((index, file)) if *index == location.file_index => file,
            current => {
                debug!("Opening {}", path.display());
                let file = File::open(path).map_err(|source| {
                    error!("Error opening VOB file {}", path.display());
                    DemuxError::VobOpenError { name: location.name.clone(), source }
                })?;
                self.position = 0;
                &mut current.insert((location.file_index, file)).1
            }
        };
        let range = location.byte_range();

        if self.position != range.start {
            file.seek(SeekFrom::Start(range.start)).map_err(|source| {
                error!("Error seeking VOB file {}", path.display());
                DemuxError::VobSeekError { name: location.name.clone(), source }
            })?;
            self.position = range.start;
        }

        let requested = (range.end - range.start) as usize;
        let target = &mut buf[..requested];
        let mut got = 0;

        while got < requested {
            match file.read(&mut target[got..]) {
                Ok(0) => break,
                Ok(size) => got += size,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }

        self.position += got as u64;

        if got != requested {
            error!(
                "Error reading VOB file {}, requested {} bytes, got {}",
                path.display(),
                requested,
                got,
            );
            return Err(
                DemuxError::VobReadShortError { name: location.name.clone(), requested, got }
            )
        }

        Ok(location.sector_count as usize)
    }
}

/// Reads VOB files straight from the media, retrieving each file's key as it is entered.
///
/// Unreadable sectors are always left out. A zero-filled stand-in is not a valid pack and
/// would stop the demuxer.
pub struct VolumeSource<'v> {
    volume: &'v mut Volume,
    current: Option<usize>,
}

impl<'v> VolumeSource<'v> {
    pub fn new(volume: &'v mut Volume) -> Self {
        Self { volume, current: None }
    }
}

impl SectorSource for VolumeSource<'_> {

    fn read_location(&mut self, location: &VobLocation, buf: &mut [u8]) -> DemuxResult<usize> {

        let start = location.disc_sector().ok_or_else(|| {
            DemuxError::VobOpenError {
                name: location.name.clone(),
                source: IoError::new(ErrorKind::NotFound, "not on the DVD volume"),
            }
        })?;

        if self.current != Some(location.file_index) {
            if self.volume.is_encrypted() {
                let path = format!("VIDEO_TS/{}", location.name);
                if let Err(err) = self.volume.get_key(&path) {
                    warn!("{}, reading without a key", err);
                }
            }
            self.current = Some(location.file_index);
        }

        let count = location.sector_count as usize;
        let read = self.volume.read_sectors_into(
            &mut buf[..count * SECTOR_SIZE],
            Some(start),
            count,
            BadSectorPolicy::Skip,
        )?;

        Ok(read.sectors)
    }

    fn reads_media(&self) -> bool {
        true
    }
}
