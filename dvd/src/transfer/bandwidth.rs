/*
 * SPDX-FileCopyrightText: 2021 William Swartzendruber <wswartzendruber@gmail.com>
 *
 * SPDX-License-Identifier: OSL-3.0
 */

use crate::{DVD_TRANSFER_RATE, SECTOR_SIZE};
use std::time::{Duration, Instant};

/// Tracks how fast sectors come off of the media.
#[derive(Clone, Debug)]
pub struct BandwidthReport {
    interval: Duration,
    started: Instant,
    instant_started: Instant,
    total_sectors: u64,
    instant_sectors: u64,
}

impl BandwidthReport {

    pub fn new(interval: Duration) -> Self {
        let now = Instant::now();
        Self {
            interval,
            started: now,
            instant_started: now,
            total_sectors: 0,
            instant_sectors: 0,
        }
    }

    /// Records `sectors` more sectors. Returns a report line once per interval.
    pub fn transferred(&mut self, sectors: usize) -> Option<String> {
        self.transferred_at(sectors, Instant::now())
    }

    /// Reports right away, resetting the instant rate.
    pub fn report(&mut self) -> Option<String> {
        self.report_at(Instant::now())
    }

    pub fn total_sectors(&self) -> u64 {
        self.total_sectors
    }

    pub(crate) fn transferred_at(&mut self, sectors: usize, now: Instant) -> Option<String> {

        self.total_sectors += sectors as u64;
        self.instant_sectors += sectors as u64;

        if now.saturating_duration_since(self.instant_started) >= self.interval {
            self.report_at(now)
        } else {
            None
        }
    }

    pub(crate) fn report_at(&mut self, now: Instant) -> Option<String> {

        let average = now.saturating_duration_since(self.started);
        let instant = now.saturating_duration_since(self.instant_started);
        let instant_bytes = self.instant_sectors * SECTOR_SIZE as u64;

        self.instant_started = now;
        self.instant_sectors = 0;

        if average.as_millis() == 0 {
            return None
        }

        let mut line = format!("Transfer bandwidth after {} sectors: ", self.total_sectors);

        if instant.as_millis() > 0 {
            line.push_str(&transfer_rate_to_string(instant_bytes, instant));
            line.push_str(", ");
        }

        line.push_str("average: ");
        line.push_str(&transfer_rate_to_string(
            self.total_sectors * SECTOR_SIZE as u64,
            average,
        ));

        Some(line)
    }
}

/// Formats a transfer rate as a DVD speed factor followed by kilobytes per second, such as
/// `"2.0x, 2770 kB/s"`. Empty when no time elapsed.
pub fn transfer_rate_to_string(bytes: u64, elapsed: Duration) -> String {

    let milliseconds = elapsed.as_millis() as u64;

    if milliseconds == 0 {
        return String::new()
    }

    let factor = (bytes as f64 * 1000.0) / (milliseconds as f64 * DVD_TRANSFER_RATE as f64);

    format!("{:.1}x, {} kB/s", factor, bytes / milliseconds)
}
