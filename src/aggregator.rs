//! Advertisement aggregation.
//!
//! The [`Aggregator`] keeps one [`DeviceRecord`] per device address ever seen
//! and turns them into filtered, ranked [`Snapshot`]s on demand. Records are
//! never dropped on ingest; a device that stops advertising just falls out of
//! snapshots once it is stale, and picks up its old name if it comes back.
//!
//! Updates are last-write-wins by *arrival order*. An event that arrives late
//! with an older `observed_at` still overwrites the record.

use crate::advertisement::AdvertisementEvent;
use crate::mac_address::MacAddress;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime};

/// Shown in place of a name for devices that never advertised one.
pub const UNKNOWN_NAME: &str = "(Name Unknown)";

/// Default freshness window for snapshots.
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(300);

/// Last known state of a single advertiser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRecord {
    pub identity: MacAddress,
    /// Last non-empty name seen for this device
    pub name: Option<String>,
    /// Signal strength of the most recently arrived event, in dBm
    pub rssi: i16,
    /// Observation time of the most recently arrived event
    pub last_seen_at: SystemTime,
}

impl DeviceRecord {
    fn from_event(event: AdvertisementEvent) -> Self {
        Self {
            identity: event.identity,
            name: event.local_name.filter(|name| !name.is_empty()),
            rssi: event.rssi,
            last_seen_at: event.observed_at,
        }
    }

    fn update(&mut self, event: AdvertisementEvent) {
        if let Some(name) = event.local_name.filter(|name| !name.is_empty()) {
            self.name = Some(name);
        }
        self.rssi = event.rssi;
        self.last_seen_at = event.observed_at;
    }

    /// The learned name, or [`UNKNOWN_NAME`].
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(UNKNOWN_NAME)
    }

    fn is_named(&self) -> bool {
        self.name.as_deref().is_some_and(|name| !name.is_empty())
    }

    /// Time since the device was last seen. Zero if `last_seen_at` is ahead of `now`.
    pub fn age_at(&self, now: SystemTime) -> Duration {
        now.duration_since(self.last_seen_at).unwrap_or_default()
    }
}

/// Which records a snapshot shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotPolicy {
    /// Also list devices that never advertised a name
    pub include_unnamed: bool,
    /// Records seen longer ago than this are hidden
    pub stale_after: Duration,
}

impl Default for SnapshotPolicy {
    fn default() -> Self {
        Self {
            include_unnamed: false,
            stale_after: DEFAULT_STALE_AFTER,
        }
    }
}

impl SnapshotPolicy {
    fn admits(&self, record: &DeviceRecord, now: SystemTime) -> bool {
        (self.include_unnamed || record.is_named()) && record.age_at(now) <= self.stale_after
    }
}

/// An owned, ranked copy of the visible devices at `taken_at`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub taken_at: SystemTime,
    /// Strongest signal first, ties broken by ascending address
    pub devices: Vec<DeviceRecord>,
}

impl Snapshot {
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, DeviceRecord> {
        self.devices.iter()
    }
}

impl<'a> IntoIterator for &'a Snapshot {
    type Item = &'a DeviceRecord;
    type IntoIter = std::slice::Iter<'a, DeviceRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.devices.iter()
    }
}

#[derive(Debug, Default)]
struct Inner {
    records: HashMap<MacAddress, DeviceRecord>,
    ingested: u64,
}

/// Thread-safe store of every advertiser seen so far.
///
/// One lock guards the whole map, so a snapshot never observes a record
/// halfway through an update. Share it as `Arc<Aggregator>`.
#[derive(Debug, Default)]
pub struct Aggregator {
    inner: Mutex<Inner>,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    // Every critical section leaves the map consistent, so a poisoned lock
    // still guards valid data.
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fold one event into the device's record, creating it on first sight.
    pub fn ingest(&self, event: AdvertisementEvent) {
        let mut inner = self.lock();
        inner.ingested += 1;
        match inner.records.get_mut(&event.identity) {
            Some(record) => record.update(event),
            None => {
                let record = DeviceRecord::from_event(event);
                inner.records.insert(record.identity, record);
            }
        }
    }

    /// Fresh, ranked copy of the devices `policy` admits at `now`.
    pub fn snapshot(&self, now: SystemTime, policy: &SnapshotPolicy) -> Snapshot {
        let mut devices: Vec<DeviceRecord> = {
            let inner = self.lock();
            inner
                .records
                .values()
                .filter(|record| policy.admits(record, now))
                .cloned()
                .collect()
        };

        devices.sort_unstable_by(|a, b| {
            b.rssi
                .cmp(&a.rssi)
                .then_with(|| a.identity.cmp(&b.identity))
        });

        Snapshot {
            taken_at: now,
            devices,
        }
    }

    /// Copy of the record for `identity`, stale or not.
    pub fn get(&self, identity: &MacAddress) -> Option<DeviceRecord> {
        self.lock().records.get(identity).cloned()
    }

    /// Number of identities tracked, including ones too stale to show.
    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().records.is_empty()
    }

    /// Total events ingested.
    pub fn ingested(&self) -> u64 {
        self.lock().ingested
    }

    /// Forget devices not seen for longer than `older_than`. Returns how many
    /// were removed.
    ///
    /// Nothing calls this unless eviction is configured; by default the
    /// aggregator keeps every identity for the life of the process.
    pub fn evict_unseen(&self, now: SystemTime, older_than: Duration) -> usize {
        let mut inner = self.lock();
        let before = inner.records.len();
        inner
            .records
            .retain(|_, record| record.age_at(now) <= older_than);
        before - inner.records.len()
    }
}
