/*
 * SPDX-FileCopyrightText: 2021 William Swartzendruber <wswartzendruber@gmail.com>
 *
 * SPDX-License-Identifier: OSL-3.0
 */

use std::sync::mpsc::{Sender, SyncSender};
use tracing::{debug, error, info, warn};

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Severity {
    Debug,
    Info,
    Warning,
    Error,
}

/// Something a session reports to whoever drives it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SessionEvent {
    Log {
        severity: Severity,
        message: String,
    },
    /// Sectors done so far out of all sectors queued.
    Progress {
        completed_sectors: u64,
        total_sectors: u64,
    },
}

#[derive(Clone, Debug)]
enum Listener {
    Unbounded(Sender<SessionEvent>),
    Bounded(SyncSender<SessionEvent>),
}

/// Logs session messages and forwards them to an optional listener.
#[derive(Clone, Debug, Default)]
pub(super) struct Events {
    listener: Option<Listener>,
}

impl Events {

    pub(super) fn unbounded(sender: Sender<SessionEvent>) -> Self {
        Self { listener: Some(Listener::Unbounded(sender)) }
    }

    /// Sending blocks while the channel is full.
    pub(super) fn bounded(sender: SyncSender<SessionEvent>) -> Self {
        Self { listener: Some(Listener::Bounded(sender)) }
    }

    pub(super) fn log(&self, severity: Severity, message: String) {

        match severity {
            Severity::Debug => debug!("{}", message),
            Severity::Info => info!("{}", message),
            Severity::Warning => warn!("{}", message),
            Severity::Error => error!("{}", message),
        }

        self.send(SessionEvent::Log { severity, message });
    }

    pub(super) fn progress(&self, completed_sectors: u64, total_sectors: u64) {
        self.send(SessionEvent::Progress { completed_sectors, total_sectors });
    }

    fn send(&self, event: SessionEvent) {
        // A listener that went away only stops the notifications.
        let _ = match &self.listener {
            Some(Listener::Unbounded(sender)) => sender.send(event),
            Some(Listener::Bounded(sender)) => sender.send(event),
            None => Ok(()),
        };
    }
}
