/*
 * SPDX-FileCopyrightText: 2021 William Swartzendruber <wswartzendruber@gmail.com>
 *
 * SPDX-License-Identifier: CC0-1.0
 */

use super::*;
use crate::{
    device::SeekMode,
    testdisc::{sample_disc, DeviceCall, MemoryDevice, PlacedFile, VIDEO_TS_SECTOR},
    BadSectorPolicy,
    Config,
    SECTOR_SIZE,
};
use std::{
    io::{Result as IoResult, Write},
    path::PathBuf,
    sync::{Arc, Mutex},
};
use tracing::Level;

fn open(image: Vec<u8>) -> Volume {
    open_device(MemoryDevice::new(image), &Config::default())
}

fn open_device(device: MemoryDevice, config: &Config) -> Volume {
    Volume::with_device(PathBuf::from("memory"), Box::new(device), config).unwrap()
}

fn placed<'a>(files: &'a [PlacedFile], name: &str) -> &'a PlacedFile {
    files.iter().find(|file| file.name == name).unwrap()
}

fn sector(image: &[u8], sector: u32) -> &[u8] {
    &image[sector as usize * SECTOR_SIZE..(sector as usize + 1) * SECTOR_SIZE]
}

#[test]
fn test_open_reads_structure() {

    let (image, files) = sample_disc();
    let volume_size = (image.len() / SECTOR_SIZE) as u32;
    let volume = open(image);
    let vob = placed(&files, "VTS_01_1.VOB");

    assert!(volume.is_open());
    assert_eq!(volume.volume_id(), "SAMPLE_DISC");
    assert_eq!(volume.volume_size(), volume_size);
    assert_eq!(volume.vts_count(), 1);
    assert_eq!(volume.root().subdirectories.len(), 1);
    assert_eq!(volume.root().subdirectories[0].files.len(), 5);

    let file = volume.search_file("VIDEO_TS/vts_01_1.vob").unwrap();

    assert_eq!(file.path, "VIDEO_TS/VTS_01_1.VOB");
    assert_eq!(file.start_sector, vob.start_sector);
    assert_eq!(file.size, vob.size as u64);
    assert_eq!(volume.vts_video_file(1, 2).unwrap().name(), "VTS_01_2.VOB");
    assert_eq!(volume.vts_information_file(1).unwrap().name(), "VTS_01_0.IFO");
    assert!(volume.vts_information_file(2).is_none());
}

#[test]
fn test_layout_covers_whole_volume() {

    let (image, _) = sample_disc();
    let volume_size = (image.len() / SECTOR_SIZE) as u32;
    let volume = open(image);
    let layout = volume.layout();

    assert_eq!(layout[0].start_sector, 0);
    assert!(layout[0].is_placeholder());
    for pair in layout.windows(2) {
        assert_eq!(pair[0].end_sector(), pair[1].start_sector);
    }
    assert_eq!(layout.last().unwrap().end_sector(), volume_size);
    assert!(layout.last().unwrap().is_placeholder());
    assert_eq!(
        volume.all_files().map(|file| file.name()).collect::<Vec<&str>>(),
        vec!["VIDEO_TS.IFO", "VTS_01_0.IFO", "VTS_01_1.VOB", "VTS_01_2.VOB", "VTS_01_0.BUP"],
    );
}

#[test]
fn test_corrupted_volume_descriptor() {

    let (mut image, _) = sample_disc();
    let offset = 16 * SECTOR_SIZE;

    image[offset + 1..offset + 6].copy_from_slice(b"CDXYZ");

    let device = MemoryDevice::new(image);
    let calls = device.calls();

    match Volume::with_device(PathBuf::from("memory"), Box::new(device), &Config::default()) {
        Err(VolumeError::InvalidVolumeDescriptor { actual, expected }) => {
            assert_eq!(actual, "CDXYZ");
            assert_eq!(expected, "CD001");
        }
        Err(err) => panic!("unexpected error: {}", err),
        Ok(_) => panic!("corrupted volume descriptor accepted"),
    }

    let reads: Vec<DeviceCall> = calls
        .lock()
        .unwrap()
        .iter()
        .copied()
        .filter(|call| matches!(call, DeviceCall::Read(..)))
        .collect();

    assert_eq!(reads, vec![DeviceCall::Read(16, 1)]);
}

#[test]
fn test_missing_primary_volume_descriptor() {

    let (mut image, _) = sample_disc();

    image[16 * SECTOR_SIZE] = 2;

    let result = Volume::with_device(
        PathBuf::from("memory"),
        Box::new(MemoryDevice::new(image)),
        &Config::default(),
    );

    assert!(matches!(result, Err(VolumeError::PrimaryVolumeDescriptorNotFound)));
}

#[test]
fn test_directory_loop_too_deep() {

    let (mut image, _) = sample_disc();
    let directory = VIDEO_TS_SECTOR as usize * SECTOR_SIZE;
    let mut offset = directory;

    while image[offset] != 0 {
        offset += image[offset] as usize;
    }

    // A subdirectory named LOOP pointing back at VIDEO_TS.
    image[offset] = 38;
    image[offset + 2..offset + 6].copy_from_slice(&VIDEO_TS_SECTOR.to_le_bytes());
    image[offset + 10..offset + 14].copy_from_slice(&(SECTOR_SIZE as u32).to_le_bytes());
    image[offset + 25] = 0x02;
    image[offset + 32] = 4;
    image[offset + 33..offset + 37].copy_from_slice(b"LOOP");

    let result = Volume::with_device(
        PathBuf::from("memory"),
        Box::new(MemoryDevice::new(image)),
        &Config::default(),
    );

    assert!(matches!(result, Err(VolumeError::DirectoryTooDeep)));
}

#[test]
fn test_read_sectors_skip_bad_sector() {

    let (image, files) = sample_disc();
    let start = placed(&files, "VTS_01_1.VOB").start_sector;
    let device = MemoryDevice::new(image.clone()).with_bad_sectors(&[start + 5]);
    let mut volume = open_device(device, &Config::default());
    let read = volume.read_sectors(start, 10, BadSectorPolicy::Skip).unwrap();

    assert_eq!(read.sector_count(), 9);
    assert_eq!(read.skipped, 1);
    assert_eq!(volume.skipped_sectors(), 1);

    let expected: Vec<u8> = (0..10)
        .filter(|index| *index != 5)
        .flat_map(|index| sector(&image, start + index).to_vec())
        .collect();

    assert_eq!(read.data, expected);
}

#[derive(Clone, Default)]
struct Captured(Arc<Mutex<Vec<u8>>>);

impl Write for Captured {

    fn write(&mut self, buf: &[u8]) -> IoResult<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> IoResult<()> {
        Ok(())
    }
}

#[test]
fn test_skipped_sectors_logged_as_warning() {

    let (image, files) = sample_disc();
    let start = placed(&files, "VTS_01_1.VOB").start_sector;
    let device = MemoryDevice::new(image).with_bad_sectors(&[start + 1, start + 2]);
    let mut volume = open_device(device, &Config::default());
    let captured = Captured::default();
    let writer = captured.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(Level::WARN)
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();

    tracing::subscriber::with_default(subscriber, || {
        volume.read_sectors(start, 4, BadSectorPolicy::Skip).unwrap();
    });

    let output = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();

    assert!(output.contains("WARN"));
    assert!(output.contains("Skipped 2 bad sectors"));
}

#[test]
fn test_read_sectors_as_zero() {

    let (image, files) = sample_disc();
    let start = placed(&files, "VTS_01_1.VOB").start_sector;
    let device = MemoryDevice::new(image.clone()).with_bad_sectors(&[start + 2]);
    let mut volume = open_device(device, &Config::default());
    let read = volume.read_sectors(start, 4, BadSectorPolicy::ReadAsZero).unwrap();

    assert_eq!(read.sector_count(), 4);
    assert_eq!(read.skipped, 1);
    assert_eq!(&read.data[..SECTOR_SIZE], sector(&image, start));
    assert!(read.data[2 * SECTOR_SIZE..3 * SECTOR_SIZE].iter().all(|byte| *byte == 0));
    assert_eq!(&read.data[3 * SECTOR_SIZE..], sector(&image, start + 3));
}

#[test]
fn test_read_sectors_fail_on_bad_sector() {

    let (image, files) = sample_disc();
    let start = placed(&files, "VTS_01_1.VOB").start_sector;
    let device = MemoryDevice::new(image).with_bad_sectors(&[start + 3]);
    let mut volume = open_device(device, &Config::default());

    match volume.read_sectors(start, 8, BadSectorPolicy::Fail) {
        Err(VolumeError::BadSector { sector, .. }) => assert_eq!(sector, start + 3),
        other => panic!("unexpected result: {:?}", other),
    }
}

#[test]
fn test_read_sectors_retry_escalates() {

    let (image, files) = sample_disc();
    let start = placed(&files, "VTS_01_1.VOB").start_sector;
    let device = MemoryDevice::new(image).with_bad_sectors(&[start]);
    let calls = device.calls();
    let config = Config { bad_sector_retries: 3, ..Config::default() };
    let mut volume = open_device(device, &config);

    calls.lock().unwrap().clear();

    assert!(matches!(
        volume.read_sectors(start, 2, BadSectorPolicy::Retry),
        Err(VolumeError::BadSector { .. }),
    ));

    let single_reads = calls
        .lock()
        .unwrap()
        .iter()
        .filter(|call| **call == DeviceCall::Read(start, 1))
        .count();

    assert_eq!(single_reads, 4);
}

#[test]
fn test_too_many_consecutive_bad_sectors() {

    let (image, files) = sample_disc();
    let start = placed(&files, "VTS_01_1.VOB").start_sector;
    let device = MemoryDevice::new(image).with_bad_sectors(&[start + 1, start + 2, start + 3]);
    let config = Config { max_consecutive_bad_sectors: 2, ..Config::default() };
    let mut volume = open_device(device, &config);

    match volume.read_sectors(start, 6, BadSectorPolicy::Skip) {
        Err(VolumeError::TooManyBadSectors { sector }) => assert_eq!(sector, start + 3),
        other => panic!("unexpected result: {:?}", other),
    }
}

#[test]
fn test_read_stops_at_end_of_volume() {

    let (image, _) = sample_disc();
    let volume_size = (image.len() / SECTOR_SIZE) as u32;
    let mut volume = open(image);
    let read = volume.read_sectors(volume_size - 2, 10, BadSectorPolicy::Fail).unwrap();

    assert_eq!(read.sector_count(), 2);
}

#[test]
fn test_seek_outside_layout() {

    let (image, _) = sample_disc();
    let volume_size = (image.len() / SECTOR_SIZE) as u32;
    let mut volume = open(image);

    assert!(matches!(
        volume.seek(volume_size + 10),
        Err(VolumeError::SectorNotInLayout { .. }),
    ));
}

#[test]
fn test_scrambled_vob_entry_gets_key() {

    let (image, files) = sample_disc();
    let start = placed(&files, "VTS_01_1.VOB").start_sector;
    let device = MemoryDevice::new(image).scrambled();
    let calls = device.calls();
    let mut volume = open_device(device, &Config::default());

    volume.read_sectors(start - 1, 3, BadSectorPolicy::Fail).unwrap();

    assert!(calls.lock().unwrap().contains(&DeviceCall::Seek(start, SeekMode::Key)));

    calls.lock().unwrap().clear();
    volume.get_key("VIDEO_TS/VTS_01_2.VOB").unwrap();

    let second = placed(&files, "VTS_01_2.VOB").start_sector;

    assert_eq!(*calls.lock().unwrap(), vec![DeviceCall::Seek(second, SeekMode::Key)]);
    assert_eq!(volume.load_all_keys(), 0);
    assert!(matches!(
        volume.get_key("VIDEO_TS/VTS_09_1.VOB"),
        Err(VolumeError::FileNotFound { .. }),
    ));
}

#[test]
fn test_read_file() {

    let (image, files) = sample_disc();
    let ifo = placed(&files, "VTS_01_0.IFO").clone();
    let mut volume = open(image.clone());
    let file = volume.vts_information_file(1).unwrap().clone();
    let data = volume.read_file(&file).unwrap();
    let offset = ifo.start_sector as usize * SECTOR_SIZE;

    assert_eq!(data.len(), ifo.size as usize);
    assert_eq!(&data[..], &image[offset..offset + ifo.size as usize]);
}

#[test]
fn test_vts_number_of() {

    assert_eq!(vts_number_of("VTS_01_0.IFO"), Some(1));
    assert_eq!(vts_number_of("vts_42_0.ifo"), Some(42));
    assert_eq!(vts_number_of("VTS_01_1.VOB"), None);
    assert_eq!(vts_number_of("VTS_00_0.IFO"), None);
    assert_eq!(vts_number_of("VIDEO_TS.IFO"), None);
}
