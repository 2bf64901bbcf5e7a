// crates/gpu-triage-kmsg/src/source.rs
// ============================================================================
// Module: Kmsg Record Sources
// Description: Device and command backends yielding kernel log records.
// Purpose: Bounded, cancellable record collection with scoped handle
//          release.
// Dependencies: tokio, tokio-util, libc, thiserror
// ============================================================================

//! ## Overview
//! Both backends satisfy the same contract: a finite sequence of records
//! ordered by sequence number, bounded by a wall-time deadline, and
//! interruptible by cancellation. When cancellation fires the backend
//! returns whatever it has collected and releases its underlying handle
//! before the caller resumes; no background task outlives the call.
//!
//! The device backend opens the kmsg character device `O_NONBLOCK` so it
//! works inside minimal containers and never stalls the runtime: `EAGAIN`
//! means the buffer is drained. The command backend runs a one-shot
//! program producing the same logical records on stdout and kills it on
//! deadline or cancellation.

use std::io::Read;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;
use std::time::Instant;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncBufReadExt;
use tokio::io::BufReader;
use tokio::process::Child;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::record::KmsgRecord;
use crate::record::parse_record;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default kmsg character device path.
pub const DEFAULT_KMSG_PATH: &str = "/dev/kmsg";
/// Default wall-time budget for one collection pass.
pub const DEFAULT_READ_DEADLINE: Duration = Duration::from_secs(5);
/// Hard cap on records collected in one pass.
pub const MAX_RECORDS_PER_READ: usize = 10_000;
/// Read buffer size; one kmsg record never exceeds this.
const READ_BUFFER_BYTES: usize = 8_192;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised by record sources.
///
/// # Invariants
/// - Per-record parse failures are silent; only source-level failures are
///   surfaced here.
#[derive(Debug, Error)]
pub enum KmsgError {
    /// The source could not be opened or read.
    #[error("kmsg source unavailable: {path}: {detail}")]
    SourceUnavailable {
        /// Device path or command line that failed.
        path: String,
        /// Underlying failure description.
        detail: String,
    },
    /// The process lacks the privileges to read the source.
    #[error(
        "permission denied reading {path}; grant the agent CAP_SYSLOG or read access to the \
         kernel log device"
    )]
    Permission {
        /// Device path or command line that was denied.
        path: String,
    },
    /// Cancellation fired mid-collection; partial records ride along.
    #[error("kmsg collection cancelled after {} records", .records.len())]
    Cancelled {
        /// Records collected before cancellation.
        records: Vec<KmsgRecord>,
    },
}

// ============================================================================
// SECTION: Source Contract
// ============================================================================

/// Collection bounds for one read pass.
#[derive(Debug, Clone, Copy)]
pub struct SourceConfig {
    /// Wall-time budget; collection returns whatever it has at expiry.
    pub deadline: Duration,
    /// Maximum number of records collected in one pass.
    pub max_records: usize,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            deadline: DEFAULT_READ_DEADLINE,
            max_records: MAX_RECORDS_PER_READ,
        }
    }
}

/// A finite, ordered, cancellable producer of kernel log records.
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Collects records within the configured bounds.
    ///
    /// # Errors
    ///
    /// Returns [`KmsgError::Cancelled`] (carrying partial records) when the
    /// token fires, and [`KmsgError::SourceUnavailable`] or
    /// [`KmsgError::Permission`] when the backend cannot be read.
    async fn read_records(
        &self,
        config: &SourceConfig,
        cancel: &CancellationToken,
    ) -> Result<Vec<KmsgRecord>, KmsgError>;
}

/// Sorts collected records by kernel sequence before they leave a source.
fn order_records(mut records: Vec<KmsgRecord>) -> Vec<KmsgRecord> {
    records.sort_by_key(|record| record.sequence);
    records
}

// ============================================================================
// SECTION: Device Source
// ============================================================================

/// Record source backed by the kmsg character device.
#[derive(Debug, Clone)]
pub struct DeviceSource {
    /// Device path; normally [`DEFAULT_KMSG_PATH`].
    path: PathBuf,
}

impl DeviceSource {
    /// Creates a device source for the given path.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
        }
    }
}

impl Default for DeviceSource {
    fn default() -> Self {
        Self::new(DEFAULT_KMSG_PATH)
    }
}

#[async_trait]
impl RecordSource for DeviceSource {
    async fn read_records(
        &self,
        config: &SourceConfig,
        cancel: &CancellationToken,
    ) -> Result<Vec<KmsgRecord>, KmsgError> {
        let mut file = open_nonblocking(&self.path)?;
        let started = Instant::now();
        let mut records = Vec::new();
        let mut pending = String::new();
        let mut buf = [0u8; READ_BUFFER_BYTES];
        loop {
            if cancel.is_cancelled() {
                return Err(KmsgError::Cancelled {
                    records: order_records(records),
                });
            }
            if started.elapsed() >= config.deadline || records.len() >= config.max_records {
                break;
            }
            match file.read(&mut buf) {
                Ok(0) => break,
                Ok(read) => {
                    pending.push_str(&String::from_utf8_lossy(&buf[..read]));
                    drain_complete_lines(&mut pending, &mut records, config.max_records);
                }
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == std::io::ErrorKind::Interrupted => {}
                // EPIPE signals a record overwritten under the reader; skip it.
                Err(err) if err.raw_os_error() == Some(libc::EPIPE) => {}
                Err(err) => {
                    return Err(KmsgError::SourceUnavailable {
                        path: self.path.display().to_string(),
                        detail: err.to_string(),
                    });
                }
            }
        }
        if !pending.is_empty()
            && records.len() < config.max_records
            && let Some(record) = parse_record(&pending)
        {
            records.push(record);
        }
        Ok(order_records(records))
    }
}

/// Opens the device read-only with `O_NONBLOCK` set.
fn open_nonblocking(path: &Path) -> Result<std::fs::File, KmsgError> {
    use std::os::unix::fs::OpenOptionsExt;
    std::fs::OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_NONBLOCK)
        .open(path)
        .map_err(|err| match err.kind() {
            std::io::ErrorKind::PermissionDenied => KmsgError::Permission {
                path: path.display().to_string(),
            },
            _ => KmsgError::SourceUnavailable {
                path: path.display().to_string(),
                detail: err.to_string(),
            },
        })
}

/// Moves complete lines out of `pending` into parsed records.
fn drain_complete_lines(pending: &mut String, records: &mut Vec<KmsgRecord>, max_records: usize) {
    while let Some(newline) = pending.find('\n') {
        let line: String = pending.drain(..=newline).collect();
        if records.len() >= max_records {
            continue;
        }
        if let Some(record) = parse_record(line.trim_end_matches('\n')) {
            records.push(record);
        }
    }
}

// ============================================================================
// SECTION: Command Source
// ============================================================================

/// Record source backed by a one-shot command.
#[derive(Debug, Clone)]
pub struct CommandSource {
    /// Program to execute.
    program: String,
    /// Program arguments.
    args: Vec<String>,
}

impl CommandSource {
    /// Creates a command source for the given program and arguments.
    #[must_use]
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Human-readable command line used in error messages.
    fn command_line(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

#[async_trait]
impl RecordSource for CommandSource {
    async fn read_records(
        &self,
        config: &SourceConfig,
        cancel: &CancellationToken,
    ) -> Result<Vec<KmsgRecord>, KmsgError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| match err.kind() {
                std::io::ErrorKind::PermissionDenied => KmsgError::Permission {
                    path: self.command_line(),
                },
                _ => KmsgError::SourceUnavailable {
                    path: self.command_line(),
                    detail: err.to_string(),
                },
            })?;
        let stdout = child.stdout.take().ok_or_else(|| KmsgError::SourceUnavailable {
            path: self.command_line(),
            detail: "stdout unavailable".to_string(),
        })?;
        let mut lines = BufReader::new(stdout).lines();
        let deadline = tokio::time::Instant::now() + config.deadline;
        let mut records = Vec::new();
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    reap(&mut child).await;
                    return Err(KmsgError::Cancelled {
                        records: order_records(records),
                    });
                }
                () = tokio::time::sleep_until(deadline) => {
                    reap(&mut child).await;
                    return Ok(order_records(records));
                }
                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        if let Some(record) = parse_record(&line) {
                            records.push(record);
                        }
                        if records.len() >= config.max_records {
                            reap(&mut child).await;
                            return Ok(order_records(records));
                        }
                    }
                    Ok(None) => {
                        let _ = child.wait().await;
                        return Ok(order_records(records));
                    }
                    Err(err) => {
                        reap(&mut child).await;
                        return Err(KmsgError::SourceUnavailable {
                            path: self.command_line(),
                            detail: err.to_string(),
                        });
                    }
                }
            }
        }
    }
}

/// Kills and reaps the child so no subprocess outlives the read call.
async fn reap(child: &mut Child) {
    let _ = child.start_kill();
    let _ = child.wait().await;
}

// ============================================================================
// SECTION: Tests
// ============================================================================
