use std::{collections::BTreeMap, sync::Arc};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Schema tag written into every shared file.
pub const SCHEMA_VERSION: u32 = 2;

/// Keystrokes attributed to an application identifier.
pub type AppCounts = BTreeMap<Arc<str>, u64>;

/// One device's keystroke count for one calendar day.
///
/// Field order matters: the derived ordering compares `count` first, then `last_modified`, then
/// `app_counts`. Merging keeps the greater slot, so equal counts still resolve to the same slot no
/// matter which side it came from.
#[derive(PartialEq, Eq, PartialOrd, Ord, Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct DailyCount {
    pub count: u64,
    #[serde(with = "epoch_seconds")]
    pub last_modified: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub app_counts: AppCounts,
}

impl DailyCount {
    pub fn new(count: u64, last_modified: DateTime<Utc>) -> Self {
        Self {
            count,
            last_modified,
            app_counts: AppCounts::new(),
        }
    }

    pub fn with_apps(self, app_counts: AppCounts) -> Self {
        Self { app_counts, ..self }
    }
}

/// `lastModified` is stored as fractional seconds since the epoch.
mod epoch_seconds {
    use chrono::{DateTime, Utc};
    use serde::{self, de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(moment: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_f64(moment.timestamp_micros() as f64 / 1_000_000.)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let seconds = f64::deserialize(deserializer)?;
        DateTime::from_timestamp_micros((seconds * 1_000_000.).round() as i64)
            .ok_or_else(|| D::Error::custom(format!("timestamp {seconds} is out of range")))
    }
}

/// Per-day counters written by a single device. Only the owning device mutates its entries,
/// everybody else just reads and merges them.
#[derive(PartialEq, Eq, Debug, Serialize, Deserialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct DeviceData {
    #[serde(default)]
    pub daily_counts: BTreeMap<NaiveDate, DailyCount>,
}

impl DeviceData {
    pub fn count(&self, date: NaiveDate) -> u64 {
        self.daily_counts.get(&date).map_or(0, |v| v.count)
    }

    pub fn slot(&self, date: NaiveDate) -> Option<&DailyCount> {
        self.daily_counts.get(&date)
    }

    /// Writes `slot` only when it carries a larger count than what is already stored. Returns
    /// whether the slot changed.
    pub fn raise(&mut self, date: NaiveDate, slot: DailyCount) -> bool {
        if slot.count > self.count(date) {
            self.daily_counts.insert(date, slot);
            true
        } else {
            false
        }
    }

    /// Replaces the slot regardless of what it held. Used only for explicit resets, the one case
    /// where a count may go down.
    pub fn overwrite(&mut self, date: NaiveDate, slot: DailyCount) {
        self.daily_counts.insert(date, slot);
    }

    pub fn reset(&mut self, date: NaiveDate, moment: DateTime<Utc>) {
        self.overwrite(date, DailyCount::new(0, moment));
    }
}

/// Content of the shared file: every known device with its per-day counters.
#[derive(PartialEq, Eq, Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct SyncData {
    pub devices: BTreeMap<String, DeviceData>,
    pub version: u32,
}

impl Default for SyncData {
    fn default() -> Self {
        Self {
            devices: BTreeMap::new(),
            version: SCHEMA_VERSION,
        }
    }
}

impl SyncData {
    pub fn device(&self, device_id: &str) -> Option<&DeviceData> {
        self.devices.get(device_id)
    }

    /// Returns the device entry, creating it on first write.
    pub fn device_mut(&mut self, device_id: &str) -> &mut DeviceData {
        self.devices.entry(device_id.to_owned()).or_default()
    }

    pub fn slot(&self, device_id: &str, date: NaiveDate) -> Option<&DailyCount> {
        self.device(device_id).and_then(|d| d.slot(date))
    }

    pub fn device_count(&self, device_id: &str, date: NaiveDate) -> u64 {
        self.device(device_id).map_or(0, |d| d.count(date))
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use chrono::{NaiveDate, TimeZone, Utc};

    use super::{DailyCount, DeviceData, SyncData, SCHEMA_VERSION};

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    #[test]
    fn test_decodes_documented_schema() -> Result<()> {
        let json = r#"{
            "version": 2,
            "devices": {
                "A1B2": {
                    "dailyCounts": {
                        "2024-01-01": { "count": 50, "lastModified": 1704103200.5 }
                    }
                }
            }
        }"#;
        let data: SyncData = serde_json::from_str(json)?;

        assert_eq!(data.version, SCHEMA_VERSION);
        assert_eq!(data.device_count("A1B2", day(1)), 50);
        let slot = data.slot("A1B2", day(1)).unwrap();
        assert_eq!(slot.last_modified.timestamp(), 1704103200);
        assert_eq!(slot.last_modified.timestamp_subsec_millis(), 500);
        assert!(slot.app_counts.is_empty());
        Ok(())
    }

    #[test]
    fn test_encoding_uses_camel_case_and_omits_empty_apps() -> Result<()> {
        let mut data = SyncData::default();
        data.device_mut("dev")
            .raise(day(2), DailyCount::new(3, Utc.timestamp_opt(10, 0).unwrap()));

        let value = serde_json::to_value(&data)?;
        let slot = &value["devices"]["dev"]["dailyCounts"]["2024-01-02"];
        assert_eq!(slot["count"], 3);
        assert_eq!(slot["lastModified"], 10.0);
        assert!(slot.get("appCounts").is_none());
        Ok(())
    }

    #[test]
    fn test_raise_never_lowers() {
        let moment = Utc.timestamp_opt(0, 0).unwrap();
        let mut device = DeviceData::default();

        assert!(device.raise(day(1), DailyCount::new(100, moment)));
        assert!(!device.raise(day(1), DailyCount::new(60, moment)));
        assert!(!device.raise(day(1), DailyCount::new(100, moment)));
        assert_eq!(device.count(day(1)), 100);

        device.reset(day(1), moment);
        assert_eq!(device.count(day(1)), 0);
    }

    #[test]
    fn test_missing_fields_fall_back_to_defaults() -> Result<()> {
        let data: SyncData = serde_json::from_str("{}")?;
        assert_eq!(data, SyncData::default());
        Ok(())
    }
}
