use chrono::NaiveDate;

use crate::utils::time::days_before;

use super::model::SyncData;

pub const DEFAULT_RETENTION_DAYS: u32 = 60;

impl SyncData {
    /// Drops every date that is `keeping_days` or more days old, so the retained window is the
    /// last `keeping_days` calendar days including `today`. Devices left without any day are
    /// removed as well.
    ///
    /// Runs only right before a coordinated write, never on a plain read.
    pub fn prune(&mut self, today: NaiveDate, keeping_days: u32) {
        let cutoff = days_before(today, keeping_days);
        for device in self.devices.values_mut() {
            device.daily_counts.retain(|date, _| *date > cutoff);
        }
        self.devices
            .retain(|_, device| !device.daily_counts.is_empty());
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Days, NaiveDate, TimeZone, Utc};

    use crate::sync::model::{DailyCount, SyncData};

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
    }

    fn filled(device: &str, ages: &[u64]) -> SyncData {
        let mut data = SyncData::default();
        for age in ages {
            data.device_mut(device).raise(
                today() - Days::new(*age),
                DailyCount::new(age + 1, Utc.timestamp_opt(0, 0).unwrap()),
            );
        }
        data
    }

    #[test]
    fn test_boundary_day_is_removed_and_next_one_kept() {
        let mut data = filled("A", &[60, 59]);
        data.prune(today(), 60);

        assert_eq!(data.device_count("A", today() - Days::new(60)), 0);
        assert_eq!(data.device_count("A", today() - Days::new(59)), 60);
        assert_eq!(data.device("A").unwrap().daily_counts.len(), 1);
    }

    #[test]
    fn test_pruning_keeps_in_window_totals() {
        let mut data = filled("A", &[0, 3, 10, 70]);
        data.merge(filled("B", &[0, 10, 61]));
        let in_window = [0, 3, 10].map(|age| today() - Days::new(age));
        let before = in_window.map(|d| data.total_count(d));

        data.prune(today(), 60);

        assert_eq!(in_window.map(|d| data.total_count(d)), before);
        assert_eq!(data.total_count(today() - Days::new(70)), 0);
        assert_eq!(data.total_count(today() - Days::new(61)), 0);
    }

    #[test]
    fn test_devices_without_days_are_dropped() {
        let mut data = filled("old", &[90]);
        data.merge(filled("new", &[1]));
        data.prune(today(), 60);

        assert!(data.device("old").is_none());
        assert!(data.device("new").is_some());
    }
}
