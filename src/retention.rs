//! Retention sweep: keep only the most recent output files.
//!
//! A dedicated thread wakes every clean interval, lists the output folder, and
//! deletes the oldest managed files beyond the keep count. Deletion is best
//! effort: a file that cannot be removed is logged and skipped. The sweeper
//! shares nothing with the capture path; it only needs a cancellation signal
//! and a join point.

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use std::path::{Path, PathBuf};
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime};
use std::{fs, io};

use crate::error::{CaptureError, Result};

/// Final character of the managed `.mp4` extension; any non-directory entry
/// whose name ends with it belongs to the rotation set.
pub const MANAGED_SUFFIX: char = '4';

/// Excess files tolerated without deleting anything.
pub const DELETE_MARGIN: usize = 1;

/// One directory entry as reported by a `FileCleaner`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileEntry {
    pub name: String,
    pub created: SystemTime,
    pub is_dir: bool,
}

/// A managed file ranked for deletion.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileRecord {
    pub name: String,
    pub created: SystemTime,
}

/// Directory listing and deletion.
pub trait FileCleaner: Send {
    fn enumerate(&self) -> io::Result<Vec<FileEntry>>;
    fn delete(&self, name: &str) -> io::Result<()>;
}

/// `FileCleaner` over a filesystem directory.
pub struct FsCleaner {
    dir: PathBuf,
}

impl FsCleaner {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl FileCleaner for FsCleaner {
    fn enumerate(&self) -> io::Result<Vec<FileEntry>> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    log::debug!("retention: skipping unreadable entry: {}", err);
                    continue;
                }
            };
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            let metadata = match entry.metadata() {
                Ok(metadata) => metadata,
                Err(err) => {
                    log::debug!("retention: skipping {}: {}", name, err);
                    continue;
                }
            };
            // not every filesystem records creation time
            let created = metadata
                .created()
                .or_else(|_| metadata.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            entries.push(FileEntry {
                name,
                created,
                is_dir: metadata.is_dir(),
            });
        }
        Ok(entries)
    }

    fn delete(&self, name: &str) -> io::Result<()> {
        fs::remove_file(self.dir.join(name))
    }
}

pub fn is_managed(name: &str) -> bool {
    name.ends_with(MANAGED_SUFFIX)
}

/// Outcome of one sweep.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Managed files found.
    pub managed: usize,
    pub attempted: usize,
    pub deleted: Vec<String>,
    pub failed: Vec<String>,
}

/// Managed files ordered oldest first.
pub fn ranked_records(entries: Vec<FileEntry>) -> Vec<FileRecord> {
    let mut records: Vec<FileRecord> = entries
        .into_iter()
        .filter(|entry| !entry.is_dir && is_managed(&entry.name))
        .map(|entry| FileRecord {
            name: entry.name,
            created: entry.created,
        })
        .collect();
    records.sort_by(|a, b| a.created.cmp(&b.created).then_with(|| a.name.cmp(&b.name)));
    records
}

/// Deletes the oldest managed files beyond `keep`.
///
/// Returns `None` when the directory cannot be listed. Nothing is deleted until
/// the excess exceeds `DELETE_MARGIN`; after that exactly the excess oldest
/// files are attempted, and a failed deletion is not substituted.
pub fn sweep(cleaner: &dyn FileCleaner, keep: usize) -> Option<SweepReport> {
    let entries = match cleaner.enumerate() {
        Ok(entries) => entries,
        Err(err) => {
            log::debug!("retention: directory unavailable, skipping sweep: {}", err);
            return None;
        }
    };
    let records = ranked_records(entries);
    let mut report = SweepReport {
        managed: records.len(),
        ..SweepReport::default()
    };

    let excess = records.len().saturating_sub(keep);
    if excess <= DELETE_MARGIN {
        return Some(report);
    }

    for record in records.into_iter().take(excess) {
        report.attempted += 1;
        match cleaner.delete(&record.name) {
            Ok(()) => {
                log::info!("retention: removed {}", record.name);
                report.deleted.push(record.name);
            }
            Err(err) => {
                log::warn!("retention: failed to remove {}: {}", record.name, err);
                report.failed.push(record.name);
            }
        }
    }
    Some(report)
}

/// Background sweep thread. Dropping the handle cancels and joins it.
pub struct RetentionSweeper {
    cancel: Option<Sender<()>>,
    join: Option<JoinHandle<()>>,
}

impl RetentionSweeper {
    pub fn spawn(cleaner: Box<dyn FileCleaner>, keep: usize, interval: Duration) -> Result<Self> {
        let (cancel, cancelled) = channel::bounded(1);
        let join = std::thread::Builder::new()
            .name("retention-sweep".to_string())
            .spawn(move || run_sweeper(cleaner, keep, interval, cancelled))
            .map_err(|e| CaptureError::platform("spawn retention thread", e))?;
        Ok(Self {
            cancel: Some(cancel),
            join: Some(join),
        })
    }

    /// Wakes the thread out of its sleep and waits for it to exit.
    pub fn shutdown(mut self) -> Result<()> {
        self.cancel_and_join()
    }

    fn cancel_and_join(&mut self) -> Result<()> {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.try_send(());
        }
        match self.join.take() {
            Some(join) => join
                .join()
                .map_err(|_| CaptureError::internal("retention thread panicked")),
            None => Ok(()),
        }
    }
}

impl Drop for RetentionSweeper {
    fn drop(&mut self) {
        if let Err(err) = self.cancel_and_join() {
            log::error!("retention sweeper teardown: {}", err);
        }
    }
}

fn run_sweeper(
    cleaner: Box<dyn FileCleaner>,
    keep: usize,
    interval: Duration,
    cancelled: Receiver<()>,
) {
    loop {
        match cancelled.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => {
                if let Some(report) = sweep(cleaner.as_ref(), keep) {
                    log::debug!(
                        "retention: {} managed, {} removed, {} failed",
                        report.managed,
                        report.deleted.len(),
                        report.failed.len()
                    );
                }
            }
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    log::debug!("retention: sweeper exiting");
}
