use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::debug;

/// Reports older than this are excluded from listings and swept on the next update.
pub const DEFAULT_FRESHNESS_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);

/// The last addresses reported by one host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressRecord {
    pub host: String,
    pub ipv6: String,
    pub ipv4: String,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Report {
    Changed,
    Unchanged,
}

/// Latest address report per host, held in memory only.
///
/// Every operation takes the same lock, so the compare-and-store in
/// [`AddressCache::report`] cannot interleave with another report or a sweep.
#[derive(Debug)]
pub struct AddressCache {
    window: Duration,
    records: Mutex<HashMap<String, AddressRecord>>,
}

impl AddressCache {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            records: Mutex::new(HashMap::new()),
        }
    }

    /// Stores the report unless it matches the host's fresh record.
    ///
    /// Empty addresses are ordinary values: an empty IPv6 following an empty
    /// IPv6 is unchanged.
    pub async fn report(&self, host: &str, ipv6: &str, ipv4: &str) -> Report {
        self.report_at(host, ipv6, ipv4, Utc::now()).await
    }

    pub async fn report_at(&self, host: &str, ipv6: &str, ipv4: &str, now: DateTime<Utc>) -> Report {
        let mut records = self.records.lock().await;

        if let Some(record) = records.get(host) {
            if self.is_fresh(record, now) && record.ipv6 == ipv6 && record.ipv4 == ipv4 {
                return Report::Unchanged;
            }
        }

        records.insert(
            host.to_owned(),
            AddressRecord {
                host: host.to_owned(),
                ipv6: ipv6.to_owned(),
                ipv4: ipv4.to_owned(),
                last_seen: now,
            },
        );

        Report::Changed
    }

    /// Snapshot of fresh records, most recently seen first.
    pub async fn list_fresh(&self) -> Vec<AddressRecord> {
        self.list_fresh_at(Utc::now()).await
    }

    pub async fn list_fresh_at(&self, now: DateTime<Utc>) -> Vec<AddressRecord> {
        let records = self.records.lock().await;

        let mut fresh: Vec<_> = records
            .values()
            .filter(|r| self.is_fresh(r, now))
            .cloned()
            .collect();
        fresh.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));

        fresh
    }

    /// Drops expired records, returning how many were removed.
    pub async fn sweep_expired(&self) -> usize {
        self.sweep_expired_at(Utc::now()).await
    }

    pub async fn sweep_expired_at(&self, now: DateTime<Utc>) -> usize {
        let mut records = self.records.lock().await;

        let before = records.len();
        records.retain(|_, r| self.is_fresh(r, now));
        let removed = before - records.len();

        if removed > 0 {
            debug!(removed, "swept expired address records");
        }
        removed
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    fn is_fresh(&self, record: &AddressRecord, now: DateTime<Utc>) -> bool {
        // A record from the future (clock stepped back) counts as fresh.
        match (now - record.last_seen).to_std() {
            Ok(age) => age <= self.window,
            Err(_) => true,
        }
    }
}

impl Default for AddressCache {
    fn default() -> Self {
        Self::new(DEFAULT_FRESHNESS_WINDOW)
    }
}
