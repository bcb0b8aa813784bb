//! The shared file and the coordinated read-modify-write cycle around it.
//!
//! The file lives in a folder that some sync provider copies between machines, so there is no way
//! to lock it against other devices. Writers on the same machine take an advisory lock on a
//! sidecar file; writers elsewhere are reconciled by [merging](super::merge) whatever they wrote.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use chrono::{NaiveDate, Utc};
use fs4::tokio::AsyncFileExt;
use tokio::{fs::File, sync::Mutex};
use tracing::{debug, instrument, warn};

use crate::fs::atomic::{read_optional, write_atomic};

use super::model::SyncData;

/// Consecutive coordinated updates that may find the file undecodable before it is moved aside.
const MAX_CORRUPT_ATTEMPTS: u32 = 3;

#[derive(Default)]
struct CoordinatorState {
    corrupt_attempts: u32,
}

pub struct SharedStore {
    path: PathBuf,
    lock_path: PathBuf,
    retention_days: u32,
    // Serializes updates of this process. The file lock alone would block the runtime thread when
    // two tasks of the same process contend for it.
    state: Mutex<CoordinatorState>,
}

impl SharedStore {
    pub fn new(path: PathBuf, retention_days: u32) -> Self {
        let lock_name = format!(
            ".{}.lock",
            path.file_name()
                .map(|v| v.to_string_lossy())
                .unwrap_or_default()
        );
        Self {
            lock_path: path.with_file_name(lock_name),
            path,
            retention_days,
            state: Mutex::new(CoordinatorState::default()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the current document without taking part in coordination. Writes are atomic renames,
    /// so the content is always a complete document. A missing file reads as empty, a corrupt one
    /// is an error.
    pub async fn read(&self) -> Result<SyncData> {
        let bytes = read_optional(&self.path).await?;
        decode(bytes.as_deref())
            .with_context(|| format!("Shared file {:?} is not readable", self.path))
    }

    /// Same as [SharedStore::read], but a corrupt file reads as empty.
    pub async fn load(&self) -> Result<SyncData> {
        match self.read().await {
            Ok(data) => Ok(data),
            Err(e) => {
                warn!("Using empty data: {e:?}");
                Ok(SyncData::default())
            }
        }
    }

    /// Runs `transform` over the current document and commits the result.
    ///
    /// If somebody else replaced the file between the initial read and the commit, their content
    /// is merged into the candidate and `transform` is applied once more, so neither write is
    /// lost and explicit resets survive the merge. The result is pruned to the retention window
    /// before it is written. Returns the document as it was committed.
    #[instrument(skip_all, fields(path = ?self.path))]
    pub async fn update<F>(&self, today: NaiveDate, transform: F) -> Result<SyncData>
    where
        F: Fn(&mut SyncData),
    {
        let mut state = self.state.lock().await;

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let lock = File::options()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&self.lock_path)
            .await
            .with_context(|| format!("Failed to open lock file {:?}", self.lock_path))?;

        // Semi-safe acquire-release for a file
        lock.lock_exclusive()?;
        let result = self.update_locked(&mut state, today, &transform).await;
        lock.unlock_async().await?;
        result
    }

    async fn update_locked<F>(
        &self,
        state: &mut CoordinatorState,
        today: NaiveDate,
        transform: &F,
    ) -> Result<SyncData>
    where
        F: Fn(&mut SyncData),
    {
        let mut initial = read_optional(&self.path).await?;
        let base = match decode(initial.as_deref()) {
            Ok(data) => {
                state.corrupt_attempts = 0;
                data
            }
            Err(e) => {
                state.corrupt_attempts += 1;
                if state.corrupt_attempts < MAX_CORRUPT_ATTEMPTS {
                    return Err(e.context(format!(
                        "Shared file is corrupt (attempt {}), skipping update",
                        state.corrupt_attempts
                    )));
                }
                self.quarantine().await?;
                state.corrupt_attempts = 0;
                initial = None;
                SyncData::default()
            }
        };

        let mut candidate = base;
        transform(&mut candidate);

        let fresh = read_optional(&self.path).await?;
        if fresh != initial {
            let fresh = decode(fresh.as_deref())
                .context("Shared file was replaced by an unreadable document during update")?;
            debug!("Shared file changed during update, merging concurrent write");
            candidate.merge(fresh);
            transform(&mut candidate);
        }

        candidate.prune(today, self.retention_days);

        let bytes = serde_json::to_vec_pretty(&candidate)?;
        write_atomic(&self.path, &bytes).await?;
        Ok(candidate)
    }

    /// Moves a file that keeps failing to decode out of the way, keeping it for manual recovery.
    async fn quarantine(&self) -> Result<()> {
        let name = self
            .path
            .file_name()
            .ok_or_else(|| anyhow!("{:?} has no file name", self.path))?
            .to_string_lossy();
        let target = self
            .path
            .with_file_name(format!("{name}.corrupt-{}", Utc::now().timestamp()));
        warn!("Moving corrupt shared file to {target:?}");
        match tokio::fs::rename(&self.path, &target).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Absent and blank files are an empty document. Anything else has to parse.
fn decode(bytes: Option<&[u8]>) -> Result<SyncData> {
    match bytes {
        None => Ok(SyncData::default()),
        Some(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Ok(SyncData::default()),
        Some(bytes) => Ok(serde_json::from_slice(bytes)?),
    }
}
