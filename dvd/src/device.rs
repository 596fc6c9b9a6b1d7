/*
 * SPDX-FileCopyrightText: 2021 William Swartzendruber <wswartzendruber@gmail.com>
 *
 * SPDX-License-Identifier: OSL-3.0
 */

//! Raw sector access to optical drives and disc images.
//!
//! The volume layer never touches files directly. It goes through [`SectorDevice`], which lets
//! drives with content scrambling, plain disc images and in-memory test discs share the same
//! read path.


use super::SECTOR_SIZE;
use std::{
    fs::{self, File},
    io::{Error as IoError, ErrorKind, Read, Result as IoResult, Seek, SeekFrom},
    path::{Path, PathBuf},
};
use tracing::debug;

/// How a seek prepares the device for the reads that follow it.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum SeekMode {
    /// Position only.
    Plain,
    /// Position within MPEG content whose key is already known.
    Mpeg,
    /// Position at the start of a scrambled file and retrieve its key.
    Key,
}

/// A source of 2048-byte sectors.
pub trait SectorDevice: Send {

    /// Positions the device so that the next read starts at `sector`.
    fn seek(&mut self, sector: u32, mode: SeekMode) -> IoResult<()>;

    /// Reads up to `count` sectors into the front of `buf`.
    ///
    /// Returns the number of whole sectors read, which is zero at the end of the media. An
    /// error means the sector at the current position could not be read, after which the
    /// position is unspecified until the next seek.
    fn read(&mut self, buf: &mut [u8], count: usize, decrypt: bool) -> IoResult<usize>;

    /// Returns whether the media carries scrambled content.
    fn is_scrambled(&self) -> bool;

    /// Asks the drive to read at its maximum speed.
    fn set_max_speed(&mut self) -> IoResult<()>;
}

/// Reads sectors from a disc image or an unscrambled block device.
///
/// There is no key exchange here. [`SeekMode::Key`] and `decrypt` are accepted and ignored,
/// so scrambled media needs a [`SectorDevice`] backed by a CSS library instead.
pub struct FileDevice {
    file: File,
}

impl FileDevice {

    pub fn open<P: AsRef<Path>>(path: P) -> IoResult<Self> {
        Ok(Self { file: File::open(path)? })
    }
}

impl SectorDevice for FileDevice {

    fn seek(&mut self, sector: u32, _mode: SeekMode) -> IoResult<()> {
        self.file.seek(SeekFrom::Start(sector as u64 * SECTOR_SIZE as u64))?;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8], count: usize, _decrypt: bool) -> IoResult<usize> {

        let wanted = (count * SECTOR_SIZE).min(buf.len() / SECTOR_SIZE * SECTOR_SIZE);
        let mut got = 0;

        while got < wanted {
            match self.file.read(&mut buf[got..wanted]) {
                Ok(0) => break,
                Ok(size) => got += size,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => {
                    if got < SECTOR_SIZE {
                        return Err(err)
                    }
                    break
                }
            }
        }

        let partial = got % SECTOR_SIZE;

        if partial != 0 {
            self.file.seek(SeekFrom::Current(-(partial as i64)))?;
        }

        Ok(got / SECTOR_SIZE)
    }

    fn is_scrambled(&self) -> bool {
        false
    }

    fn set_max_speed(&mut self) -> IoResult<()> {
        Err(IoError::new(ErrorKind::Unsupported, "read speed cannot be changed on a file"))
    }
}

/// Where the sectors behind a user-supplied path actually live.
#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedDevice {
    /// The block device or image to read sectors from.
    pub device: PathBuf,
    /// The directory the volume is mounted on, if it was reached through one.
    pub mount_point: Option<PathBuf>,
}

/// Resolves a device path, disc image, mount point or file on a mounted disc to the device
/// holding its sectors.
///
/// Block devices and regular files that are not on a mounted disc resolve to themselves.
/// Directories and files under a mount point resolve through the host's mount table.
pub fn resolve_device<P: AsRef<Path>>(path: P) -> Option<ResolvedDevice> {

    let path = path.as_ref();
    let metadata = fs::metadata(path).ok()?;

    if is_block_device(&metadata) {
        debug!("{} is a block device", path.display());
        return Some(ResolvedDevice { device: path.to_path_buf(), mount_point: None })
    }

    if let Some(resolved) = mounted_device(path) {
        debug!("{} resolved to {}", path.display(), resolved.device.display());
        return Some(resolved)
    }

    if metadata.is_file() {
        debug!("{} is a disc image", path.display());
        return Some(ResolvedDevice { device: path.to_path_buf(), mount_point: None })
    }

    None
}

/// Parses a Linux mount table into `(device, mount point)` pairs, keeping only entries backed
/// by a device node.
pub fn parse_mount_table(table: &str) -> Vec<(PathBuf, PathBuf)> {
    table
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let device = unescape_mount_field(fields.next()?);
            let mount_point = unescape_mount_field(fields.next()?);
            if device.starts_with("/dev/") {
                Some((PathBuf::from(device), PathBuf::from(mount_point)))
            } else {
                None
            }
        })
        .collect()
}

/// Picks the device whose mount point is the longest prefix of `path`.
pub fn find_mount<'a>(
    mounts: &'a [(PathBuf, PathBuf)],
    path: &Path,
) -> Option<&'a (PathBuf, PathBuf)> {
    mounts
        .iter()
        .filter(|(_, mount_point)| path.starts_with(mount_point))
        .max_by_key(|(_, mount_point)| mount_point.components().count())
}

fn unescape_mount_field(field: &str) -> String {

    let bytes = field.as_bytes();
    let mut output = Vec::with_capacity(bytes.len());
    let mut index = 0;

    while index < bytes.len() {
        if bytes[index] == b'\\' && index + 3 < bytes.len() {
            let octal = std::str::from_utf8(&bytes[index + 1..index + 4]).ok();
            if let Some(value) = octal.and_then(|octal| u8::from_str_radix(octal, 8).ok()) {
                output.push(value);
                index += 4;
                continue
            }
        }
        output.push(bytes[index]);
        index += 1;
    }

    String::from_utf8_lossy(&output).into_owned()
}

#[cfg(unix)]
fn is_block_device(metadata: &fs::Metadata) -> bool {
    use std::os::unix::fs::FileTypeExt;
    metadata.file_type().is_block_device()
}

#[cfg(not(unix))]
fn is_block_device(_metadata: &fs::Metadata) -> bool {
    false
}

#[cfg(target_os = "linux")]
fn mounted_device(path: &Path) -> Option<ResolvedDevice> {

    let path = fs::canonicalize(path).ok()?;
    let table = fs::read_to_string("/proc/mounts").ok()?;
    let mounts = parse_mount_table(&table);
    let (device, mount_point) = find_mount(&mounts, &path)?;

    // Disc images on a mounted hard drive are read as images.
    if path.is_file() && !is_optical_device(device) {
        return None
    }

    Some(ResolvedDevice { device: device.clone(), mount_point: Some(mount_point.clone()) })
}

#[cfg(target_os = "linux")]
fn is_optical_device(device: &Path) -> bool {
    device
        .file_name()
        .and_then(|name| name.to_str())
        .map(|name| name.starts_with("sr") || name.starts_with("cdrom") || name.starts_with("dvd"))
        .unwrap_or(false)
}

#[cfg(windows)]
fn mounted_device(path: &Path) -> Option<ResolvedDevice> {

    use std::path::{Component, Prefix};

    match path.components().next()? {
        Component::Prefix(prefix) => match prefix.kind() {
            Prefix::Disk(letter) | Prefix::VerbatimDisk(letter) => {
                let letter = letter as char;
                Some(
                    ResolvedDevice {
                        device: PathBuf::from(format!(r"\\.\{}:", letter)),
                        mount_point: Some(PathBuf::from(format!(r"{}:\", letter))),
                    }
                )
            }
            _ => None,
        },
        _ => None,
    }
}

#[cfg(not(any(target_os = "linux", windows)))]
fn mounted_device(_path: &Path) -> Option<ResolvedDevice> {
    None
}
