use std::{path::PathBuf, time::Duration};

use crate::sync::prune::DEFAULT_RETENTION_DAYS;

pub const DEFAULT_SNAPSHOT_EVERY: u64 = 50;
pub const DEFAULT_SYNC_EVERY: u64 = 1000;
pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_WATCH_DEBOUNCE: Duration = Duration::from_millis(200);

const LOCAL_SNAPSHOT_FILE: &str = "local-snapshot.json";
const DEVICE_ID_FILE: &str = "device-id";

/// Everything the sync engine needs to know about its environment.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    /// Directory with state private to this installation: device id, local snapshot, logs.
    pub app_dir: PathBuf,
    /// Document shared between devices.
    pub shared_file: PathBuf,
    pub retention_days: u32,
    /// Keystrokes between local snapshot writes.
    pub snapshot_every: u64,
    /// Keystrokes between shared file syncs, on top of the timer.
    pub sync_every: u64,
    pub sync_interval: Duration,
    pub watch_debounce: Duration,
}

impl SyncSettings {
    pub fn new(app_dir: PathBuf, shared_file: PathBuf) -> Self {
        Self {
            app_dir,
            shared_file,
            retention_days: DEFAULT_RETENTION_DAYS,
            snapshot_every: DEFAULT_SNAPSHOT_EVERY,
            sync_every: DEFAULT_SYNC_EVERY,
            sync_interval: DEFAULT_SYNC_INTERVAL,
            watch_debounce: DEFAULT_WATCH_DEBOUNCE,
        }
    }

    pub fn local_snapshot_path(&self) -> PathBuf {
        self.app_dir.join(LOCAL_SNAPSHOT_FILE)
    }

    pub fn device_id_path(&self) -> PathBuf {
        self.app_dir.join(DEVICE_ID_FILE)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.app_dir.join("logs")
    }
}
