/*
 * SPDX-FileCopyrightText: 2021 William Swartzendruber <wswartzendruber@gmail.com>
 *
 * SPDX-License-Identifier: OSL-3.0
 */

use super::{TransferError, TransferResult};
use std::{
    fs::File,
    io::{BufWriter, Error as IoError, ErrorKind, Result as IoResult, Write},
    path::Path,
    process::{Child, ChildStdin, Command, Stdio},
};
use tracing::{debug, error};

/// Where transferred data ends up.
pub trait Sink {

    /// Describes the sink in log lines and errors.
    fn name(&self) -> &str;

    fn write(&mut self, data: &[u8]) -> TransferResult<()>;

    /// Flushes and releases the sink. Nothing may be written afterwards.
    fn close(&mut self) -> TransferResult<()>;
}

impl<S: Sink + ?Sized> Sink for Box<S> {

    fn name(&self) -> &str {
        (**self).name()
    }

    fn write(&mut self, data: &[u8]) -> TransferResult<()> {
        (**self).write(data)
    }

    fn close(&mut self) -> TransferResult<()> {
        (**self).close()
    }
}

/// A sink over any [`Write`] implementation.
#[derive(Debug)]
pub struct WriteSink<W: Write> {
    name: String,
    writer: W,
}

impl<W: Write> WriteSink<W> {

    pub fn new<N: Into<String>>(name: N, writer: W) -> Self {
        Self { name: name.into(), writer }
    }

    pub fn get_ref(&self) -> &W {
        &self.writer
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> Sink for WriteSink<W> {

    fn name(&self) -> &str {
        &self.name
    }

    fn write(&mut self, data: &[u8]) -> TransferResult<()> {
        self.writer.write_all(data).map_err(|source| {
            error!("Error writing to {}", self.name);
            TransferError::WriteError { name: self.name.clone(), source }
        })
    }

    fn close(&mut self) -> TransferResult<()> {
        self.writer.flush().map_err(|source| {
            error!("Error writing to {}", self.name);
            TransferError::WriteError { name: self.name.clone(), source }
        })
    }
}

/// A plain file on the host file system.
pub type FileSink = WriteSink<BufWriter<File>>;

impl WriteSink<BufWriter<File>> {

    /// Creates or truncates the file at `path`.
    pub fn create<P: AsRef<Path>>(path: P) -> IoResult<Self> {

        let path = path.as_ref();
        let file = File::create(path)?;

        debug!("Created {}", path.display());

        Ok(Self::new(path.display().to_string(), BufWriter::new(file)))
    }
}

/// The standard input of a downstream command, run through the shell.
#[derive(Debug)]
pub struct PipeSink {
    command: String,
    child: Child,
    stdin: Option<ChildStdin>,
}

impl PipeSink {

    pub fn spawn(command: &str) -> TransferResult<Self> {

        let mut child = shell_command(command)
            .stdin(Stdio::piped())
            .spawn()
            .map_err(|source| {
                error!("Error starting {}", command);
                TransferError::PipeSpawnError { command: command.to_string(), source }
            })?;
        let stdin = child.stdin.take();

        debug!("Started {}", command);

        Ok(Self { command: command.to_string(), child, stdin })
    }
}

#[cfg(windows)]
fn shell_command(command: &str) -> Command {
    let mut shell = Command::new("cmd");
    shell.arg("/C").arg(command);
    shell
}

#[cfg(not(windows))]
fn shell_command(command: &str) -> Command {
    let mut shell = Command::new("sh");
    shell.arg("-c").arg(command);
    shell
}

impl Sink for PipeSink {

    fn name(&self) -> &str {
        &self.command
    }

    fn write(&mut self, data: &[u8]) -> TransferResult<()> {

        let stdin = self.stdin.as_mut().ok_or_else(|| {
            TransferError::WriteError {
                name: self.command.clone(),
                source: IoError::new(ErrorKind::BrokenPipe, "pipe already closed"),
            }
        })?;

        stdin.write_all(data).map_err(|source| {
            error!("Error writing to {}", self.command);
            TransferError::WriteError { name: self.command.clone(), source }
        })
    }

    fn close(&mut self) -> TransferResult<()> {

        drop(self.stdin.take());

        let status = self.child.wait()?;

        if status.success() {
            debug!("{} completed", self.command);
            Ok(())
        } else {
            error!("{} exited with {}", self.command, status);
            Err(TransferError::PipeExitError { command: self.command.clone(), status })
        }
    }
}

impl Drop for PipeSink {
    fn drop(&mut self) {
        drop(self.stdin.take());
        let _ = self.child.wait();
    }
}
