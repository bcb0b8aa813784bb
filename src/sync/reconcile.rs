//! Reconciliation of this device's local count with its record in the shared file.
//!
//! The local count is what this process has observed; the shared slot is what this device last
//! managed to publish (possibly from another run). Every entry point ends the same way: write the
//! canonical value of today's slot and recompute today's total.

use std::{collections::BTreeMap, sync::Arc};

use anyhow::Result;
use chrono::NaiveDate;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::{config::SyncSettings, utils::clock::Clock};

use super::{
    local::LocalCache,
    model::{DailyCount, SyncData},
    store::SharedStore,
};

/// What consumers (status line, menus) need to display about today.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TodayStats {
    pub date: NaiveDate,
    /// Keystrokes typed on this device.
    pub local: u64,
    /// Keystrokes typed on all known devices.
    pub total: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteMode {
    /// Publish the local count only if it is ahead of the stored one.
    Raise,
    /// Store the local count even if it is lower. Used after resets.
    Overwrite,
}

pub struct Reconciler {
    device_id: Arc<str>,
    local: LocalCache,
    store: SharedStore,
    clock: Box<dyn Clock>,
    snapshot_every: u64,
    sync_every: u64,
    unsynced: u64,
    /// Today's slot has to be replaced instead of raised: a reset or a fresh start is not in the
    /// shared file yet. While set, the stored slot is never pulled into the local cache.
    overwrite_pending: bool,
    /// Final counts of finished days that couldn't be written yet. They go out with the next
    /// successful write.
    closing: BTreeMap<NaiveDate, DailyCount>,
    stats: watch::Sender<TodayStats>,
}

impl Reconciler {
    pub fn new(
        device_id: Arc<str>,
        local: LocalCache,
        store: SharedStore,
        clock: Box<dyn Clock>,
        settings: &SyncSettings,
    ) -> Self {
        let (stats, _) = watch::channel(TodayStats {
            date: local.date(),
            local: local.count(),
            total: local.count(),
        });
        Self {
            device_id,
            local,
            store,
            clock,
            snapshot_every: settings.snapshot_every.max(1),
            sync_every: settings.sync_every.max(1),
            unsynced: 0,
            overwrite_pending: false,
            closing: BTreeMap::new(),
            stats,
        }
    }

    /// Builds a reconciler from settings, restoring the local snapshot for today.
    pub async fn open(settings: &SyncSettings, device_id: Arc<str>, clock: Box<dyn Clock>) -> Self {
        let local = LocalCache::load_or_reset(settings.local_snapshot_path(), clock.today()).await;
        let store = SharedStore::new(settings.shared_file.clone(), settings.retention_days);
        Self::new(device_id, local, store, clock, settings)
    }

    pub fn subscribe(&self) -> watch::Receiver<TodayStats> {
        self.stats.subscribe()
    }

    pub fn stats(&self) -> TodayStats {
        *self.stats.borrow()
    }

    pub fn local(&self) -> &LocalCache {
        &self.local
    }

    /// First pass after the process starts.
    ///
    /// A zero local count means the day (or the local state) was started afresh, and whatever the
    /// shared file holds for this device today is left over from a run we can no longer vouch
    /// for. It is overwritten with zero instead of being pulled back in. When that write fails,
    /// later syncs keep overwriting until one of them succeeds.
    pub async fn startup(&mut self) -> Result<()> {
        let today = self.clock.today();
        if self.local.date() != today {
            self.local.reset(today);
        }
        if self.local.count() == 0 {
            self.overwrite_pending = true;
        }

        self.write_today(today, self.write_mode()).await?;
        self.local.flush().await?;
        info!(
            "Startup reconciliation done, local {} total {}",
            self.local.count(),
            self.stats().total
        );
        Ok(())
    }

    /// Counts one keystroke. Saves the local snapshot and syncs with the shared file once enough
    /// keystrokes were collected since the previous time. The keystroke is counted even when
    /// closing the previous day fails.
    pub async fn record_keystroke(&mut self, app: Option<Arc<str>>) -> Result<()> {
        let rolled = self.check_day_change().await;

        self.local.increment(app);
        self.unsynced += 1;
        let local = self.local.count();
        self.stats.send_modify(|stats| {
            stats.local = local;
            stats.total += 1;
        });
        rolled?;

        if self.local.unsaved() >= self.snapshot_every {
            self.local.flush().await?;
        }
        if self.unsynced >= self.sync_every {
            self.sync().await?;
        }
        Ok(())
    }

    /// Publishes `max(local, shared)` for today. Never lowers the shared value unless a reset or
    /// a fresh start is still waiting to be written.
    pub async fn sync(&mut self) -> Result<()> {
        self.check_day_change().await?;
        let today = self.clock.today();
        if self.write_today(today, self.write_mode()).await? {
            self.local.flush().await?;
        }
        debug!("Synced, total for today {}", self.stats().total);
        Ok(())
    }

    /// Reacts to the shared file being replaced, usually by another device. Nothing is written.
    pub async fn on_shared_change(&mut self) -> Result<()> {
        self.check_day_change().await?;
        let today = self.clock.today();
        // A document that doesn't decode keeps the previous totals.
        let data = self.store.read().await?;
        if self.adopt(&data, today) {
            self.local.flush().await?;
        }
        Ok(())
    }

    /// Zeroes today's count of this device, locally and in the shared file. Other devices keep
    /// their counts.
    pub async fn reset_today(&mut self) -> Result<()> {
        let today = self.clock.today();
        info!("Resetting count for {today}");
        self.local.reset(today);
        self.overwrite_pending = true;
        self.publish(today, 0);
        let flushed = self.local.flush().await;
        self.sync().await?;
        flushed
    }

    /// Last chance to persist in-memory counts before the process exits.
    pub async fn shutdown(&mut self) -> Result<()> {
        let flushed = self.local.flush().await;
        self.sync().await?;
        info!("Final sync done, local {}", self.local.count());
        flushed
    }

    /// Closes the finished day when the calendar moved on while the process was running. Its
    /// final count is kept in memory and written along with the first slot of the new day.
    async fn check_day_change(&mut self) -> Result<()> {
        let today = self.clock.today();
        let finished = self.local.date();
        if finished == today {
            return Ok(());
        }
        info!("Day changed from {finished} to {today}");

        self.closing.insert(finished, self.local_slot());
        self.local.reset(today);
        self.unsynced = 0;
        self.overwrite_pending = false;
        self.publish(today, 0);
        self.startup().await
    }

    fn write_mode(&self) -> WriteMode {
        if self.overwrite_pending {
            WriteMode::Overwrite
        } else {
            WriteMode::Raise
        }
    }

    /// Writes today's slot and adopts the committed document. Returns whether the local count was
    /// pulled up to the shared one.
    async fn write_today(&mut self, today: NaiveDate, mode: WriteMode) -> Result<bool> {
        let slot = self.local_slot();
        let device_id = self.device_id.clone();
        let closing = self.closing.clone();
        let data = self
            .store
            .update(today, |data| {
                let device = data.device_mut(&device_id);
                for (date, slot) in &closing {
                    device.raise(*date, slot.clone());
                }
                match mode {
                    WriteMode::Raise => {
                        device.raise(today, slot.clone());
                    }
                    WriteMode::Overwrite => device.overwrite(today, slot.clone()),
                }
            })
            .await?;

        self.unsynced = 0;
        for date in std::mem::take(&mut self.closing).into_keys() {
            info!("Stored final count for {date}");
        }
        if mode == WriteMode::Overwrite {
            self.overwrite_pending = false;
        }
        Ok(self.adopt(&data, today))
    }

    /// Takes over what the shared document knows about today: a larger own slot is pulled into the
    /// local cache, and the total is recomputed with the local count standing in for this
    /// device's possibly outdated slot.
    fn adopt(&mut self, data: &SyncData, today: NaiveDate) -> bool {
        let pulled = match data.slot(&self.device_id, today) {
            Some(slot) if !self.overwrite_pending => self.local.pull_up(slot),
            _ => false,
        };
        let others = data.total_count(today) - data.device_count(&self.device_id, today);
        self.publish(today, others + self.local.count());
        pulled
    }

    fn publish(&self, date: NaiveDate, total: u64) {
        let next = TodayStats {
            date,
            local: self.local.count(),
            total,
        };
        self.stats.send_if_modified(|stats| {
            if *stats == next {
                false
            } else {
                debug!("Today's total is now {}", next.total);
                *stats = next;
                true
            }
        });
    }

    fn local_slot(&self) -> DailyCount {
        DailyCount::new(self.local.count(), self.clock.time())
            .with_apps(self.local.app_counts().clone())
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use anyhow::Result;
    use chrono::{NaiveDate, TimeZone, Utc};
    use tempfile::tempdir;

    use crate::{
        config::SyncSettings,
        sync::{
            model::{DailyCount, SyncData},
            store::SharedStore,
        },
        utils::{clock::TestClock, logging::TEST_LOGGING},
    };

    use super::Reconciler;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    fn settings(root: &Path, device: &str) -> SyncSettings {
        let mut settings =
            SyncSettings::new(root.join(device), root.join("cloud").join("shared.json"));
        settings.snapshot_every = 2;
        settings.sync_every = 5;
        settings
    }

    async fn open(root: &Path, device: &str, clock: &TestClock) -> Reconciler {
        Reconciler::open(&settings(root, device), device.into(), Box::new(clock.clone())).await
    }

    fn shared(root: &Path) -> SharedStore {
        SharedStore::new(root.join("cloud").join("shared.json"), 60)
    }

    async fn seed(root: &Path, device: &str, date: NaiveDate, count: u64) -> Result<()> {
        shared(root)
            .update(day(1), |data| {
                data.device_mut(device).raise(
                    date,
                    DailyCount::new(count, Utc.timestamp_opt(1_700_000_000, 0).unwrap()),
                );
            })
            .await?;
        Ok(())
    }

    fn write_local_snapshot(root: &Path, device: &str, date: NaiveDate, count: u64) {
        let path = settings(root, device).local_snapshot_path();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, format!(r#"{{"date": "{date}", "count": {count}}}"#)).unwrap();
    }

    async fn stored(root: &Path) -> Result<SyncData> {
        shared(root).load().await
    }

    async fn type_keys(reconciler: &mut Reconciler, n: u64) -> Result<()> {
        for _ in 0..n {
            reconciler.record_keystroke(None).await?;
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_fresh_day_overrides_stale_cloud_value() -> Result<()> {
        *TEST_LOGGING;
        let dir = tempdir()?;
        let clock = TestClock::at(day(1));
        seed(dir.path(), "me", day(1), 500).await?;

        let mut reconciler = open(dir.path(), "me", &clock).await;
        reconciler.startup().await?;

        assert_eq!(stored(dir.path()).await?.device_count("me", day(1)), 0);
        assert_eq!(reconciler.local().count(), 0);
        assert_eq!(reconciler.stats().total, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_startup_pulls_larger_cloud_value() -> Result<()> {
        let dir = tempdir()?;
        let clock = TestClock::at(day(1));
        write_local_snapshot(dir.path(), "me", day(1), 10);
        seed(dir.path(), "me", day(1), 40).await?;
        seed(dir.path(), "other", day(1), 5).await?;

        let mut reconciler = open(dir.path(), "me", &clock).await;
        reconciler.startup().await?;

        assert_eq!(reconciler.local().count(), 40);
        assert_eq!(reconciler.stats().total, 45);
        assert_eq!(stored(dir.path()).await?.device_count("me", day(1)), 40);
        Ok(())
    }

    #[tokio::test]
    async fn test_startup_publishes_larger_local_value() -> Result<()> {
        let dir = tempdir()?;
        let clock = TestClock::at(day(1));
        write_local_snapshot(dir.path(), "me", day(1), 70);
        seed(dir.path(), "me", day(1), 40).await?;

        let mut reconciler = open(dir.path(), "me", &clock).await;
        reconciler.startup().await?;

        assert_eq!(reconciler.local().count(), 70);
        assert_eq!(stored(dir.path()).await?.device_count("me", day(1)), 70);
        Ok(())
    }

    #[tokio::test]
    async fn test_keystrokes_flush_and_sync_on_thresholds() -> Result<()> {
        let dir = tempdir()?;
        let clock = TestClock::at(day(1));
        let settings = settings(dir.path(), "me");
        let mut reconciler = open(dir.path(), "me", &clock).await;
        reconciler.startup().await?;

        type_keys(&mut reconciler, 3).await?;
        let snapshot = std::fs::read_to_string(settings.local_snapshot_path())?;
        assert!(snapshot.contains("\"count\":2"), "{snapshot}");
        assert_eq!(stored(dir.path()).await?.device_count("me", day(1)), 0);
        assert_eq!(reconciler.stats().total, 3);

        type_keys(&mut reconciler, 2).await?;
        assert_eq!(stored(dir.path()).await?.device_count("me", day(1)), 5);
        Ok(())
    }

    #[tokio::test]
    async fn test_tagged_keystrokes_reach_shared_file() -> Result<()> {
        let dir = tempdir()?;
        let clock = TestClock::at(day(1));
        let mut reconciler = open(dir.path(), "me", &clock).await;
        reconciler.startup().await?;

        reconciler.record_keystroke(Some("editor".into())).await?;
        reconciler.record_keystroke(Some("editor".into())).await?;
        reconciler.record_keystroke(None).await?;
        reconciler.sync().await?;

        let data = stored(dir.path()).await?;
        assert_eq!(data.total_count(day(1)), 3);
        assert_eq!(data.total_app_counts(day(1)).get("editor"), Some(&2));
        Ok(())
    }

    #[tokio::test]
    async fn test_repeated_syncs_never_lower_shared_value() -> Result<()> {
        let dir = tempdir()?;
        let clock = TestClock::at(day(1));
        let mut reconciler = open(dir.path(), "me", &clock).await;
        reconciler.startup().await?;
        type_keys(&mut reconciler, 3).await?;

        // The same device published more from an earlier run that this process never saw.
        seed(dir.path(), "me", day(1), 100).await?;
        reconciler.sync().await?;
        reconciler.sync().await?;

        assert_eq!(stored(dir.path()).await?.device_count("me", day(1)), 100);
        assert_eq!(reconciler.local().count(), 100);
        Ok(())
    }

    #[tokio::test]
    async fn test_two_devices_converge() -> Result<()> {
        let dir = tempdir()?;
        let clock = TestClock::at(day(1));
        let mut a = open(dir.path(), "A", &clock).await;
        let mut b = open(dir.path(), "B", &clock).await;
        a.startup().await?;
        b.startup().await?;

        type_keys(&mut a, 50).await?;
        type_keys(&mut b, 30).await?;
        a.sync().await?;
        b.sync().await?;
        a.on_shared_change().await?;

        assert_eq!(stored(dir.path()).await?.total_count(day(1)), 80);
        assert_eq!(a.stats().total, 80);
        assert_eq!(b.stats().total, 80);
        Ok(())
    }

    #[tokio::test]
    async fn test_change_notification_only_pulls_forward() -> Result<()> {
        let dir = tempdir()?;
        let clock = TestClock::at(day(1));
        let mut reconciler = open(dir.path(), "me", &clock).await;
        reconciler.startup().await?;
        type_keys(&mut reconciler, 4).await?;

        seed(dir.path(), "other", day(1), 30).await?;
        reconciler.on_shared_change().await?;
        // Own slot in the file is still 0, the in-memory count must not regress.
        assert_eq!(reconciler.local().count(), 4);
        assert_eq!(reconciler.stats().total, 34);

        seed(dir.path(), "me", day(1), 20).await?;
        reconciler.on_shared_change().await?;
        assert_eq!(reconciler.local().count(), 20);
        assert_eq!(reconciler.stats().total, 50);
        Ok(())
    }

    #[tokio::test]
    async fn test_corrupt_file_keeps_previous_total() -> Result<()> {
        let dir = tempdir()?;
        let clock = TestClock::at(day(1));
        seed(dir.path(), "other", day(1), 30).await?;
        let mut reconciler = open(dir.path(), "me", &clock).await;
        reconciler.startup().await?;
        assert_eq!(reconciler.stats().total, 30);

        std::fs::write(shared(dir.path()).path(), "{ truncated")?;
        assert!(reconciler.on_shared_change().await.is_err());
        assert_eq!(reconciler.stats().total, 30);
        Ok(())
    }

    #[tokio::test]
    async fn test_reset_today_zeroes_only_this_device() -> Result<()> {
        let dir = tempdir()?;
        let clock = TestClock::at(day(1));
        let mut reconciler = open(dir.path(), "me", &clock).await;
        reconciler.startup().await?;
        type_keys(&mut reconciler, 5).await?;
        seed(dir.path(), "other", day(1), 9).await?;

        reconciler.reset_today().await?;

        let data = stored(dir.path()).await?;
        assert_eq!(data.device_count("me", day(1)), 0);
        assert_eq!(data.device_count("other", day(1)), 9);
        assert_eq!(reconciler.local().count(), 0);
        assert_eq!(reconciler.stats().total, 9);

        type_keys(&mut reconciler, 1).await?;
        reconciler.sync().await?;
        assert_eq!(stored(dir.path()).await?.device_count("me", day(1)), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_day_rollover_closes_previous_day() -> Result<()> {
        let dir = tempdir()?;
        let clock = TestClock::at(day(1));
        let mut reconciler = open(dir.path(), "me", &clock).await;
        reconciler.startup().await?;
        type_keys(&mut reconciler, 3).await?;

        clock.set_date(day(2));
        reconciler.record_keystroke(None).await?;
        reconciler.sync().await?;

        let data = stored(dir.path()).await?;
        assert_eq!(data.device_count("me", day(1)), 3);
        assert_eq!(data.device_count("me", day(2)), 1);
        assert_eq!(reconciler.stats().date, day(2));
        assert_eq!(reconciler.stats().total, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_shutdown_persists_everything() -> Result<()> {
        let dir = tempdir()?;
        let clock = TestClock::at(day(1));
        let mut reconciler = open(dir.path(), "me", &clock).await;
        reconciler.startup().await?;
        type_keys(&mut reconciler, 3).await?;

        reconciler.shutdown().await?;

        assert_eq!(stored(dir.path()).await?.device_count("me", day(1)), 3);
        let resumed = open(dir.path(), "me", &clock).await;
        assert_eq!(resumed.local().count(), 3);
        Ok(())
    }

    #[tokio::test]
    async fn test_subscribers_see_published_totals() -> Result<()> {
        let dir = tempdir()?;
        let clock = TestClock::at(day(1));
        let mut reconciler = open(dir.path(), "me", &clock).await;
        let mut stats = reconciler.subscribe();
        reconciler.startup().await?;

        type_keys(&mut reconciler, 1).await?;
        assert!(stats.has_changed()?);
        assert_eq!(stats.borrow_and_update().total, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_startup_keeps_overriding_stale_value() -> Result<()> {
        *TEST_LOGGING;
        let dir = tempdir()?;
        let clock = TestClock::at(day(1));
        let path = shared(dir.path()).path().to_owned();
        std::fs::create_dir_all(path.parent().unwrap())?;
        std::fs::write(&path, "{ truncated")?;

        let mut reconciler = open(dir.path(), "me", &clock).await;
        assert!(reconciler.startup().await.is_err());

        // Another run of this device shows up with a count we can't vouch for.
        std::fs::remove_file(&path)?;
        seed(dir.path(), "me", day(1), 500).await?;
        reconciler.on_shared_change().await?;
        assert_eq!(reconciler.local().count(), 0);

        reconciler.sync().await?;
        assert_eq!(reconciler.local().count(), 0);
        assert_eq!(stored(dir.path()).await?.device_count("me", day(1)), 0);

        type_keys(&mut reconciler, 2).await?;
        reconciler.sync().await?;
        assert_eq!(stored(dir.path()).await?.device_count("me", day(1)), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_rollover_keeps_finished_day() -> Result<()> {
        let dir = tempdir()?;
        let clock = TestClock::at(day(1));
        let mut reconciler = open(dir.path(), "me", &clock).await;
        reconciler.startup().await?;
        type_keys(&mut reconciler, 3).await?;

        let path = shared(dir.path()).path().to_owned();
        let intact = std::fs::read(&path)?;
        std::fs::write(&path, "{ truncated")?;
        clock.set_date(day(2));
        assert!(reconciler.record_keystroke(None).await.is_err());
        assert_eq!(reconciler.local().count(), 1);
        assert_eq!(reconciler.local().date(), day(2));

        std::fs::write(&path, intact)?;
        reconciler.record_keystroke(None).await?;
        reconciler.sync().await?;

        let data = stored(dir.path()).await?;
        assert_eq!(data.device_count("me", day(1)), 3);
        assert_eq!(data.device_count("me", day(2)), 2);
        assert_eq!(reconciler.stats().total, 2);
        Ok(())
    }
}
