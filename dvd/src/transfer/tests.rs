/*
 * SPDX-FileCopyrightText: 2021 William Swartzendruber <wswartzendruber@gmail.com>
 *
 * SPDX-License-Identifier: CC0-1.0
 */

use super::*;
use crate::testdisc::{sample_disc, sample_vob_sectors, MemoryDevice};
use std::{fs, path::PathBuf};
use rand::{thread_rng, Rng};
use tempfile::tempdir;

struct VecSource {
    batches: Vec<Vec<u8>>,
    next: usize,
    cancelled: bool,
}

impl VecSource {
    fn new(batches: Vec<Vec<u8>>) -> Self {
        Self { batches, next: 0, cancelled: false }
    }
}

impl BatchSource for VecSource {

    fn next_batch(&mut self) -> TransferResult<Option<&[u8]>> {

        let batch = self.batches.get(self.next).map(|batch| batch.as_slice());

        self.next += 1;

        Ok(batch)
    }

    fn total_bytes(&self) -> Option<u64> {
        Some(self.batches.iter().map(|batch| batch.len() as u64).sum())
    }

    fn cancel(&mut self) {
        self.cancelled = true;
    }
}

/// Cancels the transfer as soon as it receives its first batch.
struct CancellingSink {
    token: CancelToken,
    data: Vec<u8>,
    closed: bool,
}

impl Sink for CancellingSink {

    fn name(&self) -> &str {
        "cancelling sink"
    }

    fn write(&mut self, data: &[u8]) -> TransferResult<()> {
        self.data.extend_from_slice(data);
        self.token.cancel();
        Ok(())
    }

    fn close(&mut self) -> TransferResult<()> {
        self.closed = true;
        Ok(())
    }
}

fn random_batches(count: usize, sectors: usize) -> Vec<Vec<u8>> {

    let mut rng = thread_rng();

    (0..count)
        .map(|_| (0..sectors * SECTOR_SIZE).map(|_| rng.gen()).collect())
        .collect()
}

fn open_sample(transfer_sectors: usize, device: MemoryDevice) -> Volume {

    let config = Config { transfer_size: transfer_sectors * SECTOR_SIZE, ..Config::default() };

    Volume::with_device(PathBuf::from("memory"), Box::new(device), &config).unwrap()
}

#[test]
fn test_transfer_rate_to_string() {

    assert_eq!(transfer_rate_to_string(2_770_000, Duration::from_secs(1)), "2.0x, 2770 kB/s");
    assert_eq!(transfer_rate_to_string(1_385_000, Duration::from_secs(2)), "0.5x, 692 kB/s");
    assert_eq!(transfer_rate_to_string(1_000, Duration::ZERO), "");
}

#[test]
fn test_bandwidth_report_interval() {

    let start = Instant::now();
    let mut report = BandwidthReport::new(Duration::from_secs(30));

    assert_eq!(report.transferred_at(100, start + Duration::from_secs(10)), None);

    let line = report.transferred_at(100, start + Duration::from_secs(31)).unwrap();

    assert!(line.starts_with("Transfer bandwidth after 200 sectors: "));
    assert!(line.contains("average: "));
    assert!(line.ends_with(" kB/s"));
    assert_eq!(report.transferred_at(1, start + Duration::from_secs(32)), None);
    assert_eq!(report.total_sectors(), 201);
}

#[test]
fn test_run_copies_everything() {

    let batches = random_batches(5, 3);
    let mut source = VecSource::new(batches.clone());
    let mut sink = WriteSink::new("memory", Vec::new());
    let config = Config { progress_interval: 4 * SECTOR_SIZE as u64, ..Config::default() };
    let mut updates = Vec::new();
    let stats = run(&mut source, &mut sink, &CancelToken::new(), &config, |progress| {
        updates.push(progress)
    })
    .unwrap();

    assert_eq!(stats.outcome, TransferOutcome::Completed);
    assert_eq!(stats.bytes, 15 * SECTOR_SIZE as u64);
    assert_eq!(sink.into_inner(), batches.concat());
    assert_eq!(
        updates.iter().map(|progress| progress.bytes / SECTOR_SIZE as u64).collect::<Vec<u64>>(),
        vec![6, 9, 12, 15],
    );
    assert!(updates.iter().all(|progress| progress.total_bytes == Some(15 * 2048)));
    assert!(!source.cancelled);
}

#[test]
fn test_cancel_between_batches() {

    let token = CancelToken::new();
    let mut source = VecSource::new(random_batches(4, 2));
    let mut sink = CancellingSink { token: token.clone(), data: Vec::new(), closed: false };
    let stats = run(&mut source, &mut sink, &token, &Config::default(), |_| {}).unwrap();

    assert_eq!(stats.outcome, TransferOutcome::Cancelled);
    assert_eq!(stats.bytes, 2 * SECTOR_SIZE as u64);
    assert_eq!(sink.data.len() % SECTOR_SIZE, 0);
    assert_eq!(sink.data, source.batches[0]);
    assert!(sink.closed);
    assert!(source.cancelled);
}

#[test]
fn test_cancel_before_start() {

    let token = CancelToken::new();

    token.cancel();

    let mut source = VecSource::new(random_batches(2, 1));
    let mut sink = WriteSink::new("memory", Vec::new());
    let stats = run(&mut source, &mut sink, &token, &Config::default(), |_| {}).unwrap();

    assert_eq!(stats.outcome, TransferOutcome::Cancelled);
    assert!(sink.into_inner().is_empty());
}

#[test]
fn test_sector_pull_from_volume() {

    let (image, files) = sample_disc();
    let mut volume = open_sample(5, MemoryDevice::new(image));
    let ranges: Vec<SectorRange> = files
        .iter()
        .filter(|file| file.name.ends_with(".VOB"))
        .map(|file| SectorRange::with_count(file.start_sector, file.size / 2048).unwrap())
        .collect();
    let mut pull = SectorPull::new(&mut volume, ranges);

    assert_eq!(pull.total_bytes(), Some(20 * SECTOR_SIZE as u64));
    assert!(pull.reads_media());

    let mut sink = WriteSink::new("memory", Vec::new());
    let stats = run(&mut pull, &mut sink, &CancelToken::new(), &Config::default(), |_| {})
        .unwrap();

    assert_eq!(stats.bytes, 20 * SECTOR_SIZE as u64);
    assert_eq!(sink.into_inner(), sample_vob_sectors().concat());
}

#[test]
fn test_sector_pull_skips_bad_sectors() {

    let (image, _) = sample_disc();
    let mut volume = open_sample(4, MemoryDevice::new(image.clone()).with_bad_sectors(&[27]));
    let mut pull = SectorPull::new(&mut volume, vec![SectorRange::new(25, 36).unwrap()])
        .with_policy(BadSectorPolicy::Skip);
    let mut data = Vec::new();

    while let Some(batch) = pull.next_batch().unwrap() {
        data.extend_from_slice(batch);
    }

    let expected = [
        &image[25 * SECTOR_SIZE..27 * SECTOR_SIZE],
        &image[28 * SECTOR_SIZE..37 * SECTOR_SIZE],
    ]
    .concat();

    assert_eq!(data, expected);
    assert_eq!(volume.skipped_sectors(), 1);
}

#[test]
fn test_sector_pull_unexpected_end_of_media() {

    let (mut image, _) = sample_disc();

    image.truncate(50 * SECTOR_SIZE);

    let mut volume = open_sample(16, MemoryDevice::new(image));
    let mut pull = SectorPull::new(&mut volume, vec![SectorRange::new(48, 52).unwrap()]);

    assert_eq!(pull.next_batch().unwrap().map(|batch| batch.len()), Some(2 * SECTOR_SIZE));
    assert!(matches!(
        pull.next_batch(),
        Err(TransferError::UnexpectedEndOfMedia { sector: 50 }),
    ));
}

#[test]
fn test_file_sink() {

    let directory = tempdir().unwrap();
    let path = directory.path().join("out.vob");
    let data = random_batches(1, 3).concat();
    let mut sink = FileSink::create(&path).unwrap();

    sink.write(&data).unwrap();
    sink.close().unwrap();

    assert_eq!(sink.name(), path.display().to_string());
    assert_eq!(fs::read(&path).unwrap(), data);
}

#[cfg(unix)]
#[test]
fn test_pipe_sink() {

    let directory = tempdir().unwrap();
    let path = directory.path().join("piped.vob");
    let data = random_batches(2, 4).concat();
    let mut sink = PipeSink::spawn(&format!("cat > '{}'", path.display())).unwrap();

    sink.write(&data).unwrap();
    sink.close().unwrap();

    assert_eq!(fs::read(&path).unwrap(), data);
    assert!(sink.write(&data).is_err());
}

#[cfg(unix)]
#[test]
fn test_pipe_sink_exit_status() {

    let mut sink = PipeSink::spawn("cat > /dev/null; exit 3").unwrap();

    sink.write(&[0u8; SECTOR_SIZE]).unwrap();

    assert!(matches!(sink.close(), Err(TransferError::PipeExitError { .. })));
}
