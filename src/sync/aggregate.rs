use std::collections::BTreeSet;

use chrono::NaiveDate;

use crate::utils::time::trailing_days;

use super::model::{AppCounts, SyncData};

/// Combined count of a single day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayTotal {
    pub date: NaiveDate,
    pub total: u64,
}

impl SyncData {
    pub fn total_count(&self, date: NaiveDate) -> u64 {
        self.devices.values().map(|d| d.count(date)).sum()
    }

    /// Mean over the `days` calendar days ending at `from`. Days without any keystrokes are left
    /// out of the denominator, so a week with two active days averages those two days.
    pub fn average_count(&self, days: u32, from: NaiveDate) -> f64 {
        let (sum, active) = trailing_days(from, days)
            .map(|date| self.total_count(date))
            .filter(|total| *total > 0)
            .fold((0u64, 0u64), |(sum, active), total| (sum + total, active + 1));

        if active == 0 {
            0.
        } else {
            sum as f64 / active as f64
        }
    }

    /// Busiest day ever recorded. On equal totals the earliest date wins.
    pub fn record_day(&self) -> Option<DayTotal> {
        let dates = self
            .devices
            .values()
            .flat_map(|d| d.daily_counts.keys().copied())
            .collect::<BTreeSet<_>>();

        let mut record: Option<DayTotal> = None;
        for date in dates {
            let total = self.total_count(date);
            if total > record.map_or(0, |r| r.total) {
                record = Some(DayTotal { date, total });
            }
        }
        record
    }

    /// Keystrokes per application tag for one day, summed over devices. Untagged keystrokes are not
    /// included; the caller derives them from [`SyncData::total_count`].
    pub fn total_app_counts(&self, date: NaiveDate) -> AppCounts {
        let mut result = AppCounts::new();
        for slot in self.devices.values().filter_map(|d| d.slot(date)) {
            for (app, count) in &slot.app_counts {
                *result.entry(app.clone()).or_default() += count;
            }
        }
        result
    }

    /// Same as [`SyncData::total_app_counts`] over the `days` days ending at `from`.
    pub fn total_app_counts_for_days(&self, days: u32, from: NaiveDate) -> AppCounts {
        let mut result = AppCounts::new();
        for date in trailing_days(from, days) {
            for (app, count) in self.total_app_counts(date) {
                *result.entry(app).or_default() += count;
            }
        }
        result
    }

    /// Totals for the `days` days ending at `from`, newest first. Idle days are reported as zero.
    pub fn history(&self, days: u32, from: NaiveDate) -> Vec<DayTotal> {
        trailing_days(from, days)
            .map(|date| DayTotal {
                date,
                total: self.total_count(date),
            })
            .collect()
    }

    /// Contribution of every device to one day. Devices that didn't type that day are skipped.
    pub fn device_counts(&self, date: NaiveDate) -> Vec<(&str, u64)> {
        self.devices
            .iter()
            .map(|(id, device)| (id.as_str(), device.count(date)))
            .filter(|(_, count)| *count > 0)
            .collect()
    }
}
