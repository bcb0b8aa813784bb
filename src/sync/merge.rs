//! Conflict resolution for the shared file.
//!
//! Every `(device, date)` pair is a max-register: two replicas combine by keeping the larger
//! slot. The combination is commutative, associative and idempotent, so any number of devices
//! writing without coordination converge to the same document once they have seen each other's
//! writes.

use std::collections::btree_map::Entry;

use super::model::{DeviceData, SyncData};

impl DeviceData {
    pub fn merge(&mut self, other: DeviceData) {
        for (date, slot) in other.daily_counts {
            match self.daily_counts.entry(date) {
                Entry::Vacant(entry) => {
                    entry.insert(slot);
                }
                Entry::Occupied(mut entry) => {
                    if slot > *entry.get() {
                        entry.insert(slot);
                    }
                }
            }
        }
    }
}

impl SyncData {
    /// Folds `other` into `self`. Nothing present in either side is ever dropped.
    pub fn merge(&mut self, other: SyncData) {
        self.version = self.version.max(other.version);
        for (device_id, device) in other.devices {
            self.devices.entry(device_id).or_default().merge(device);
        }
    }
}

pub fn merge(mut a: SyncData, b: SyncData) -> SyncData {
    a.merge(b);
    a
}
