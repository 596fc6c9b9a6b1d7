/*
 * SPDX-FileCopyrightText: 2021 William Swartzendruber <wswartzendruber@gmail.com>
 *
 * SPDX-License-Identifier: OSL-3.0
 */

//! Runs queued extractions against a single volume.
//!
//! Tasks run one after the other so that the media is read with a single, mostly sequential
//! read head. Once a task fails the remaining ones are abandoned. Files that were completed
//! before the failure stay on disk.


mod events;

pub use events::*;

use events::Events;
use super::{
    config::Config,
    demux::{
        select_title_angle,
        DemuxError,
        ProgramChainDemux,
        SectorSource,
        Selection,
        VobFileReader,
        VolumeSource,
    },
    titleset::TitleSet,
    transfer::{
        self,
        CancelToken,
        FileSink,
        PipeSink,
        SectorPull,
        Sink,
        TransferError,
        TransferOutcome,
        TransferStats,
        WriteSink,
    },
    volume::{Volume, VolumeError},
    BadSectorPolicy,
    SectorRange,
    SECTOR_SIZE,
};
use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    fs,
    io::{self, Error as IoError},
    panic,
    path::{Path, PathBuf},
    sync::mpsc::{Sender, SyncSender},
    thread::{self, JoinHandle},
};
use thiserror::Error as ThisError;

pub type SessionResult<T> = Result<T, SessionError>;

#[derive(ThisError, Debug)]
pub enum SessionError {
    #[error("internal error: adding a DVD transfer after start")]
    AddTaskAfterStart,
    #[error("extraction session already started")]
    AlreadyStarted,
    #[error("overwrite denied for {} existing files", paths.len())]
    OverwriteDenied {
        paths: Vec<PathBuf>,
    },
    #[error("error creating directory {}", path.display())]
    DirectoryCreateError {
        path: PathBuf,
        source: IoError,
    },
    #[error("error creating {}", path.display())]
    FileCreateError {
        path: PathBuf,
        source: IoError,
    },
    #[error("no file found for title set {vts}")]
    TitleSetNotFound {
        vts: u8,
    },
    #[error("session volume error")]
    VolumeError {
        #[from]
        source: VolumeError,
    },
    #[error("session demuxer error")]
    DemuxError {
        #[from]
        source: DemuxError,
    },
    #[error("session transfer error")]
    TransferError {
        #[from]
        source: TransferError,
    },
}

/// Where a task writes its data.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum Destination {
    File(PathBuf),
    /// The standard input of a shell command.
    Pipe(String),
    Stdout,
}

impl Destination {
    pub fn path(&self) -> Option<&Path> {
        match self {
            Destination::File(path) => Some(path),
            _ => None,
        }
    }
}

impl Display for Destination {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        match self {
            Destination::File(path) => write!(f, "{}", path.display()),
            Destination::Pipe(command) => write!(f, "| {}", command),
            Destination::Stdout => write!(f, "standard output"),
        }
    }
}

impl From<PathBuf> for Destination {
    fn from(path: PathBuf) -> Self {
        Destination::File(path)
    }
}

impl From<&Path> for Destination {
    fn from(path: &Path) -> Self {
        Destination::File(path.to_path_buf())
    }
}

impl From<&str> for Destination {
    fn from(path: &str) -> Self {
        Destination::File(PathBuf::from(path))
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum TaskSource {
    /// Raw sectors of the volume.
    Sectors(SectorRange),
    /// A demuxed title of a title set.
    Title {
        title_set: Box<TitleSet>,
        selection: Selection,
    },
}

/// One queued extraction.
#[derive(Clone, Debug, PartialEq)]
pub struct ExtractionTask {
    pub destination: Destination,
    pub source: TaskSource,
    /// Upper bound on the sectors the task produces.
    pub sector_count: u64,
    /// Applied to raw sector reads. Demuxed titles always leave unreadable sectors out.
    pub bad_sector_policy: BadSectorPolicy,
}

impl ExtractionTask {
    pub fn size_estimate(&self) -> u64 {
        self.sector_count * SECTOR_SIZE as u64
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SessionState {
    Idle,
    Queued,
    Running,
    Completed,
    /// Some tasks completed before one failed.
    PartiallyCompleted,
    Failed,
    Cancelled,
}

#[derive(Debug)]
pub enum TaskOutcome {
    Completed {
        bytes: u64,
    },
    /// Stopped on request after writing `bytes`, a whole number of sectors.
    Cancelled {
        bytes: u64,
    },
    Failed(SessionError),
    /// Never started because an earlier task failed or was cancelled.
    Abandoned,
}

#[derive(Debug)]
pub struct TaskReport {
    pub destination: Destination,
    pub outcome: TaskOutcome,
}

#[derive(Debug)]
pub struct SessionReport {
    pub state: SessionState,
    pub tasks: Vec<TaskReport>,
    /// Unreadable sectors met during the session.
    pub skipped_sectors: u64,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum OverwriteCheck {
    NoConflicts,
    /// Destination files that already exist.
    NeedsConfirmation(Vec<PathBuf>),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Overwrite {
    Deny,
    Allow,
}

pub struct ExtractionSession {
    volume: Volume,
    config: Config,
    tasks: Vec<ExtractionTask>,
    state: SessionState,
    cancel: CancelToken,
    events: Events,
}

impl ExtractionSession {

    pub fn new(volume: Volume, config: &Config) -> Self {
        Self {
            volume,
            config: config.clone(),
            tasks: Vec::new(),
            state: SessionState::Idle,
            cancel: CancelToken::new(),
            events: Events::default(),
        }
    }

    /// Sends log lines and progress to `sender` as well.
    pub fn with_events(mut self, sender: Sender<SessionEvent>) -> Self {
        self.events = Events::unbounded(sender);
        self
    }

    /// Like [`with_events`](Self::with_events), waiting on the listener when the channel is
    /// full.
    pub fn with_sync_events(mut self, sender: SyncSender<SessionEvent>) -> Self {
        self.events = Events::bounded(sender);
        self
    }

    /// Queues the extraction of `range` into `destination`, reading it under the configured
    /// bad sector policy.
    pub fn add_task<D: Into<Destination>>(
        &mut self,
        destination: D,
        range: SectorRange,
    ) -> SessionResult<()> {
        let policy = self.config.bad_sector_policy;
        self.add_task_with_policy(destination, range, policy)
    }

    /// Queues the extraction of `range` into `destination`, reading it under `policy`.
    pub fn add_task_with_policy<D: Into<Destination>>(
        &mut self,
        destination: D,
        range: SectorRange,
        policy: BadSectorPolicy,
    ) -> SessionResult<()> {

        let destination = destination.into();

        self.ensure_not_started()?;
        self.events.log(
            Severity::Debug,
            format!("Queued file {}, sectors {} to {}", destination, range.first, range.last),
        );
        self.queue(
            ExtractionTask {
                destination,
                source: TaskSource::Sectors(range),
                sector_count: range.count() as u64,
                bad_sector_policy: policy,
            }
        );

        Ok(())
    }

    /// Queues a raw image of the whole volume. Unreadable sectors are written as zeroes so
    /// that every sector keeps its offset in the image.
    pub fn add_iso_dump<D: Into<Destination>>(&mut self, destination: D) -> SessionResult<()> {

        self.ensure_not_started()?;

        let size = self.volume.volume_size();
        let range = SectorRange::with_count(0, size).ok_or_else(|| {
            VolumeError::NotOpen
        })?;

        self.add_task_with_policy(destination, range, BadSectorPolicy::ReadAsZero)
    }

    /// Queues every file of title set `vts` for extraction into `directory`, and returns how
    /// many were queued.
    pub fn add_title_set_files<P: AsRef<Path>>(
        &mut self,
        directory: P,
        vts: u8,
    ) -> SessionResult<usize> {

        self.ensure_not_started()?;

        let prefix = format!("VTS_{:02}_", vts);
        let files: Vec<(String, SectorRange)> = self
            .volume
            .all_files()
            .filter(|file| file.name().to_ascii_uppercase().starts_with(&prefix))
            .filter_map(|file| {
                SectorRange::with_count(file.start_sector, file.sector_count())
                    .map(|range| (file.name().to_string(), range))
            })
            .collect();

        if files.is_empty() {
            self.events.log(Severity::Error, format!("No file found for title set {}", vts));
            return Err(SessionError::TitleSetNotFound { vts })
        }

        for (name, range) in files.iter() {
            self.add_task(directory.as_ref().join(name), *range)?;
        }

        Ok(files.len())
    }

    /// Queues the demuxing of a title. The selection is checked right away.
    pub fn add_title<D: Into<Destination>>(
        &mut self,
        destination: D,
        title_set: &TitleSet,
        selection: Selection,
    ) -> SessionResult<()> {

        let destination = destination.into();

        self.ensure_not_started()?;

        let title = selection.resolve_title(title_set);
        let cells = select_title_angle(title_set, title, selection.angle)?;
        let sector_count = cells.iter().map(|cell| cell.sector_count()).sum();

        self.events.log(
            Severity::Debug,
            format!(
                "Queued title {} angle {} of title set {}, {} sectors to {}",
                title,
                selection.angle,
                title_set.vts_number,
                sector_count,
                destination,
            ),
        );
        self.queue(
            ExtractionTask {
                destination,
                source: TaskSource::Title { title_set: Box::new(title_set.clone()), selection },
                sector_count,
                bad_sector_policy: BadSectorPolicy::Skip,
            }
        );

        Ok(())
    }

    pub fn tasks(&self) -> &[ExtractionTask] {
        &self.tasks
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn volume(&self) -> &Volume {
        &self.volume
    }

    pub fn into_volume(self) -> Volume {
        self.volume
    }

    /// A handle that stops the session after the batch in flight.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Lists the destination files that already exist.
    pub fn check_overwrites(&self) -> OverwriteCheck {

        let existing: Vec<PathBuf> = self
            .tasks
            .iter()
            .filter_map(|task| task.destination.path())
            .filter(|path| path.exists())
            .map(|path| path.to_path_buf())
            .collect();

        if existing.is_empty() {
            OverwriteCheck::NoConflicts
        } else {
            OverwriteCheck::NeedsConfirmation(existing)
        }
    }

    /// Runs every queued task in order.
    ///
    /// With [`Overwrite::Deny`], nothing runs when a destination file already exists and the
    /// session stays queued.
    pub fn run(&mut self, overwrite: Overwrite) -> SessionResult<SessionReport> {

        match self.state {
            SessionState::Idle | SessionState::Queued => {}
            _ => return Err(SessionError::AlreadyStarted),
        }

        if let OverwriteCheck::NeedsConfirmation(paths) = self.check_overwrites() {
            if overwrite == Overwrite::Deny {
                self.events.log(
                    Severity::Error,
                    format!("Overwrite denied, {} files already exist", paths.len()),
                );
                return Err(SessionError::OverwriteDenied { paths })
            }
        }

        self.state = SessionState::Running;

        let total_sectors: u64 = self.tasks.iter().map(|task| task.sector_count).sum();
        let total_files = self.tasks.len();
        let skipped_before = self.volume.skipped_sectors();
        let mut completed_sectors = 0u64;
        let mut reports = Vec::with_capacity(total_files);
        let mut completed = 0;
        let mut failed = false;
        let mut cancelled = false;

        for (index, task) in self.tasks.iter().enumerate() {

            if failed || cancelled || self.cancel.is_cancelled() {
                cancelled |= !failed;
                reports.push(
                    TaskReport {
                        destination: task.destination.clone(),
                        outcome: TaskOutcome::Abandoned,
                    }
                );
                continue
            }

            let mut description = format!("Extracting {}", task.destination);

            if total_files > 1 {
                description.push_str(&format!(" ({}/{})", index + 1, total_files));
            }

            self.events.log(Severity::Info, description);

            let events = &self.events;
            let done = completed_sectors;
            let outcome = match extract(
                &mut self.volume,
                &self.config,
                &self.cancel,
                task,
                |bytes| events.progress(done + bytes / SECTOR_SIZE as u64, total_sectors),
            ) {
                Ok(TransferStats { bytes, outcome: TransferOutcome::Completed, .. }) => {
                    completed += 1;
                    TaskOutcome::Completed { bytes }
                }
                Ok(TransferStats { bytes, outcome: TransferOutcome::Cancelled, .. }) => {
                    cancelled = true;
                    TaskOutcome::Cancelled { bytes }
                }
                Err(err) => {
                    self.events.log(Severity::Error, format!("{}: {}", task.destination, err));
                    failed = true;
                    TaskOutcome::Failed(err)
                }
            };

            completed_sectors += task.sector_count;
            self.events.progress(completed_sectors, total_sectors);
            reports.push(TaskReport { destination: task.destination.clone(), outcome });
        }

        let skipped_sectors = self.volume.skipped_sectors() - skipped_before;

        if skipped_sectors > 0 {
            self.events.log(Severity::Warning, format!("Skipped {} bad sectors", skipped_sectors));
        }

        self.state = if cancelled {
            self.events.log(Severity::Error, "DVD extraction aborted".to_string());
            SessionState::Cancelled
        } else if failed && completed > 0 {
            self.events.log(
                Severity::Error,
                format!(
                    "DVD extraction partially failed, {} of {} files extracted",
                    completed,
                    total_files,
                ),
            );
            SessionState::PartiallyCompleted
        } else if failed {
            self.events.log(
                Severity::Error,
                "DVD extraction failed, see messages above.".to_string(),
            );
            SessionState::Failed
        } else {
            self.events.log(
                Severity::Info,
                format!("DVD extraction completed, {} files", total_files),
            );
            SessionState::Completed
        };

        Ok(SessionReport { state: self.state, tasks: reports, skipped_sectors })
    }

    /// Runs the session on a worker thread.
    pub fn spawn(mut self, overwrite: Overwrite) -> SessionHandle {

        let cancel = self.cancel.clone();
        let thread = thread::spawn(move || {
            let report = self.run(overwrite);
            (self, report)
        });

        SessionHandle { cancel, thread }
    }

    fn ensure_not_started(&self) -> SessionResult<()> {
        match self.state {
            SessionState::Idle | SessionState::Queued => Ok(()),
            _ => {
                self.events.log(
                    Severity::Error,
                    "Internal error: adding a DVD transfer after start".to_string(),
                );
                Err(SessionError::AddTaskAfterStart)
            }
        }
    }

    fn queue(&mut self, task: ExtractionTask) {
        self.tasks.push(task);
        self.state = SessionState::Queued;
    }
}

/// A session running on a worker thread.
pub struct SessionHandle {
    cancel: CancelToken,
    thread: JoinHandle<(ExtractionSession, SessionResult<SessionReport>)>,
}

impl SessionHandle {

    /// Asks the session to stop after the batch in flight.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Waits for the session to end and hands it back along with its outcome.
    pub fn join(self) -> (ExtractionSession, SessionResult<SessionReport>) {
        match self.thread.join() {
            Ok(result) => result,
            Err(payload) => panic::resume_unwind(payload),
        }
    }
}

fn extract<F: FnMut(u64)>(
    volume: &mut Volume,
    config: &Config,
    cancel: &CancelToken,
    task: &ExtractionTask,
    mut progress: F,
) -> SessionResult<TransferStats> {

    let mut sink = open_sink(&task.destination)?;
    let mut report = |update: transfer::Progress| progress(update.bytes);

    match &task.source {
        TaskSource::Sectors(range) => {
            let mut pull = SectorPull::new(volume, vec![*range])
                .with_policy(task.bad_sector_policy);
            Ok(transfer::run(&mut pull, &mut sink, cancel, config, &mut report)?)
        }
        TaskSource::Title { title_set, selection } => {
            let on_volume = title_set.vob_files.iter().all(|vob| vob.disc_sector.is_some());
            if on_volume {
                let source = VolumeSource::new(volume);
                demux(title_set, *selection, source, &mut sink, cancel, config, &mut report)
            } else {
                let source = VobFileReader::new();
                demux(title_set, *selection, source, &mut sink, cancel, config, &mut report)
            }
        }
    }
}

fn demux<S: SectorSource, F: FnMut(transfer::Progress)>(
    title_set: &TitleSet,
    selection: Selection,
    source: S,
    sink: &mut Box<dyn Sink>,
    cancel: &CancelToken,
    config: &Config,
    progress: F,
) -> SessionResult<TransferStats> {

    let mut demux = ProgramChainDemux::new(title_set, source, config);

    demux.select(selection)?;

    Ok(transfer::run(&mut demux, sink, cancel, config, progress)?)
}

fn open_sink(destination: &Destination) -> SessionResult<Box<dyn Sink>> {

    match destination {
        Destination::File(path) => {
            if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
                fs::create_dir_all(parent).map_err(|source| {
                    tracing::error!("Error creating directory {}", parent.display());
                    SessionError::DirectoryCreateError { path: parent.to_path_buf(), source }
                })?;
            }
            let sink = FileSink::create(path).map_err(|source| {
                tracing::error!("Error creating {}", path.display());
                SessionError::FileCreateError { path: path.clone(), source }
            })?;
            Ok(Box::new(sink))
        }
        Destination::Pipe(command) => Ok(Box::new(PipeSink::spawn(command)?)),
        Destination::Stdout => Ok(Box::new(WriteSink::new("standard output", io::stdout()))),
    }
}
