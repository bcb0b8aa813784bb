use std::{path::PathBuf, sync::Arc};

use anyhow::Result;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::fs::atomic::{read_optional, write_atomic};

use super::model::{AppCounts, DailyCount};

/// Persisted form of [LocalCache]. It is only a hint for quick resumption and is always
/// reconciled against the shared file.
#[derive(PartialEq, Eq, Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct LocalSnapshot {
    pub date: NaiveDate,
    pub count: u64,
    #[serde(default, skip_serializing_if = "AppCounts::is_empty")]
    pub app_counts: AppCounts,
}

impl LocalSnapshot {
    fn empty(date: NaiveDate) -> Self {
        Self {
            date,
            count: 0,
            app_counts: AppCounts::new(),
        }
    }
}

/// This device's running count for the current day.
pub struct LocalCache {
    path: PathBuf,
    snapshot: LocalSnapshot,
    unsaved: u64,
}

impl LocalCache {
    /// Restores the count saved for `today`. A snapshot from another day, a missing one, or one
    /// that can't be read all start the day from zero.
    pub async fn load_or_reset(path: PathBuf, today: NaiveDate) -> Self {
        let stored = match read_optional(&path).await {
            Ok(Some(bytes)) => serde_json::from_slice::<LocalSnapshot>(&bytes)
                .inspect_err(|e| warn!("Local snapshot {path:?} is corrupt: {e}"))
                .ok(),
            Ok(None) => None,
            Err(e) => {
                warn!("Failed to read local snapshot {path:?}: {e:?}");
                None
            }
        };

        let snapshot = match stored {
            Some(snapshot) if snapshot.date == today => snapshot,
            Some(snapshot) => {
                debug!("Local snapshot is from {}, starting a new day", snapshot.date);
                LocalSnapshot::empty(today)
            }
            None => LocalSnapshot::empty(today),
        };

        Self {
            path,
            snapshot,
            unsaved: 0,
        }
    }

    pub fn increment(&mut self, app: Option<Arc<str>>) {
        self.snapshot.count += 1;
        if let Some(app) = app {
            *self.snapshot.app_counts.entry(app).or_default() += 1;
        }
        self.unsaved += 1;
    }

    pub fn count(&self) -> u64 {
        self.snapshot.count
    }

    pub fn date(&self) -> NaiveDate {
        self.snapshot.date
    }

    pub fn app_counts(&self) -> &AppCounts {
        &self.snapshot.app_counts
    }

    /// Increments recorded since the last successful [LocalCache::flush].
    pub fn unsaved(&self) -> u64 {
        self.unsaved
    }

    /// Adopts `slot` when it is ahead of the in-memory count. The slot was written by this device
    /// at some point, so its application tags replace the local ones. Returns whether anything
    /// changed.
    pub fn pull_up(&mut self, slot: &DailyCount) -> bool {
        if slot.count <= self.snapshot.count {
            return false;
        }
        debug!(
            "Pulling local count up from {} to {}",
            self.snapshot.count, slot.count
        );
        self.snapshot.count = slot.count;
        self.snapshot.app_counts = slot.app_counts.clone();
        true
    }

    pub fn reset(&mut self, today: NaiveDate) {
        self.snapshot = LocalSnapshot::empty(today);
        self.unsaved = 0;
    }

    pub async fn flush(&mut self) -> Result<()> {
        let bytes = serde_json::to_vec(&self.snapshot)?;
        write_atomic(&self.path, &bytes).await?;
        self.unsaved = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use chrono::{NaiveDate, TimeZone, Utc};
    use tempfile::tempdir;

    use crate::sync::model::{AppCounts, DailyCount};

    use super::LocalCache;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, d).unwrap()
    }

    #[tokio::test]
    async fn test_flush_and_resume_same_day() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("local.json");

        let mut cache = LocalCache::load_or_reset(path.clone(), day(1)).await;
        for _ in 0..3 {
            cache.increment(None);
        }
        cache.increment(Some("editor".into()));
        assert_eq!(cache.unsaved(), 4);
        cache.flush().await?;
        assert_eq!(cache.unsaved(), 0);

        let resumed = LocalCache::load_or_reset(path, day(1)).await;
        assert_eq!(resumed.count(), 4);
        assert_eq!(resumed.app_counts().get("editor"), Some(&1));
        Ok(())
    }

    #[tokio::test]
    async fn test_snapshot_from_previous_day_resets() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("local.json");
        std::fs::write(&path, r#"{"date": "2024-06-01", "count": 42}"#)?;

        let cache = LocalCache::load_or_reset(path.clone(), day(2)).await;
        assert_eq!(cache.count(), 0);
        assert_eq!(cache.date(), day(2));

        let same_day = LocalCache::load_or_reset(path, day(1)).await;
        assert_eq!(same_day.count(), 42);
        Ok(())
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_starts_from_zero() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("local.json");
        std::fs::write(&path, "not json")?;

        let cache = LocalCache::load_or_reset(path, day(1)).await;
        assert_eq!(cache.count(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_pull_up_only_moves_forward() -> Result<()> {
        let dir = tempdir()?;
        let mut cache = LocalCache::load_or_reset(dir.path().join("local.json"), day(1)).await;
        cache.increment(Some("shell".into()));
        let moment = Utc.timestamp_opt(0, 0).unwrap();

        assert!(!cache.pull_up(&DailyCount::new(1, moment)));
        assert_eq!(cache.app_counts().get("shell"), Some(&1));

        let apps = AppCounts::from([("editor".into(), 5)]);
        assert!(cache.pull_up(&DailyCount::new(9, moment).with_apps(apps.clone())));
        assert_eq!(cache.count(), 9);
        assert_eq!(cache.app_counts(), &apps);
        Ok(())
    }
}
