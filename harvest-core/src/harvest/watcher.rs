use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::Serialize;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::config::DownloadsSection;
use crate::poll::{poll_until, PollPolicy, Poller};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileStamp {
    pub path: PathBuf,
    pub modified: SystemTime,
}

/// Returns the most recently modified regular file in `dir` whose name does not
/// end with one of `ignore_suffixes`. A missing directory has no files.
pub fn newest_file(dir: &Path, ignore_suffixes: &[String]) -> io::Result<Option<FileStamp>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err),
    };

    let mut files = Vec::new();
    for entry in entries {
        let path = entry?.path();
        // Entries can vanish between listing and stat while a download is renamed.
        let Ok(metadata) = fs::metadata(&path) else {
            continue;
        };
        if !metadata.is_file() {
            continue;
        }
        files.push(FileStamp {
            path,
            modified: metadata.modified()?,
        });
    }
    files.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| a.path.cmp(&b.path)));
    Ok(files
        .into_iter()
        .find(|file| matching_suffix(&file.path, ignore_suffixes).is_none()))
}

fn matching_suffix<'a>(path: &Path, suffixes: &'a [String]) -> Option<&'a str> {
    let name = path.file_name()?.to_str()?;
    suffixes
        .iter()
        .map(String::as_str)
        .find(|suffix| name.ends_with(suffix))
}

/// Ephemeral record of one download click.
#[derive(Debug, Clone)]
pub struct DownloadAttempt {
    pub t0: SystemTime,
    pub baseline: Option<FileStamp>,
    pub discovered: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum DownloadStatus {
    Completed(PathBuf),
    TimedOut { in_progress: Option<PathBuf> },
}

/// Completion signal for downloads triggered by the browser.
#[async_trait(?Send)]
pub trait DownloadWatcher {
    /// Makes sure downloads have somewhere to land.
    fn prepare(&self) -> io::Result<()> {
        Ok(())
    }

    /// Records `t0` and the newest finished file; call right before the click.
    fn begin(&self) -> DownloadAttempt;

    async fn wait_for_download(&self, attempt: &mut DownloadAttempt) -> DownloadStatus;
}

/// Detects downloads purely from what appears in the download directory.
#[derive(Debug, Clone)]
pub struct DirectoryWatcher {
    dir: PathBuf,
    partial_suffixes: Vec<String>,
    settle: Duration,
    detect: PollPolicy,
    partial: PollPolicy,
    clock_skew: Duration,
}

enum Sighting {
    Finished(PathBuf),
    Partial(PathBuf),
}

impl DirectoryWatcher {
    pub fn new(dir: impl Into<PathBuf>, section: &DownloadsSection) -> Self {
        Self {
            dir: dir.into(),
            partial_suffixes: section.partial_suffixes.clone(),
            settle: section.settle(),
            detect: section.detect_policy(),
            partial: section.partial_policy(),
            clock_skew: section.clock_skew(),
        }
    }

    pub fn newest_finished(&self) -> Option<FileStamp> {
        match newest_file(&self.dir, &self.partial_suffixes) {
            Ok(stamp) => stamp,
            Err(err) => {
                warn!(dir = %self.dir.display(), error = %err, "could not list download directory");
                None
            }
        }
    }

    fn sight(&self, attempt: &DownloadAttempt) -> Option<Sighting> {
        let newest = match newest_file(&self.dir, &[]) {
            Ok(Some(stamp)) => stamp,
            Ok(None) => return None,
            Err(err) => {
                debug!(dir = %self.dir.display(), error = %err, "download directory probe failed");
                return None;
            }
        };
        let floor = attempt.t0.checked_sub(self.clock_skew).unwrap_or(UNIX_EPOCH);
        if newest.modified < floor {
            return None;
        }
        if let Some(baseline) = &attempt.baseline {
            if baseline.path == newest.path && newest.modified <= baseline.modified {
                return None;
            }
        }
        if matching_suffix(&newest.path, &self.partial_suffixes).is_some() {
            Some(Sighting::Partial(newest.path))
        } else {
            Some(Sighting::Finished(newest.path))
        }
    }

    fn final_path(&self, partial: &Path) -> Option<PathBuf> {
        let suffix = matching_suffix(partial, &self.partial_suffixes)?;
        let name = partial.file_name()?.to_str()?;
        let stem = name.strip_suffix(suffix)?;
        if stem.is_empty() {
            return None;
        }
        Some(partial.with_file_name(stem))
    }

    async fn wait_for_final(&self, partial: &Path, outer: &Poller) -> Option<PathBuf> {
        let final_path = self.final_path(partial)?;
        debug!(partial = %partial.display(), expected = %final_path.display(), "download in progress");
        poll_until(self.partial.start_within(outer), || {
            let found = final_path.is_file().then(|| final_path.clone());
            async move { found }
        })
        .await
    }
}

#[async_trait(?Send)]
impl DownloadWatcher for DirectoryWatcher {
    fn prepare(&self) -> io::Result<()> {
        fs::create_dir_all(&self.dir)
    }

    fn begin(&self) -> DownloadAttempt {
        DownloadAttempt {
            t0: SystemTime::now(),
            baseline: self.newest_finished(),
            discovered: None,
        }
    }

    async fn wait_for_download(&self, attempt: &mut DownloadAttempt) -> DownloadStatus {
        let mut detect = self.detect.start();
        let settle = self.settle.min(detect.remaining());
        if !settle.is_zero() {
            sleep(settle).await;
        }

        let mut in_progress = None;
        loop {
            match self.sight(attempt) {
                Some(Sighting::Finished(path)) => {
                    attempt.discovered = Some(path.clone());
                    return DownloadStatus::Completed(path);
                }
                Some(Sighting::Partial(partial)) => {
                    if let Some(path) = self.wait_for_final(&partial, &detect).await {
                        attempt.discovered = Some(path.clone());
                        return DownloadStatus::Completed(path);
                    }
                    in_progress = Some(partial);
                }
                None => {}
            }
            if !detect.tick().await {
                return DownloadStatus::TimedOut { in_progress };
            }
        }
    }
}
