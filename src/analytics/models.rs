//! Data models for the time-bucketed stats tree
//!
//! The persisted layout nests buckets directly under their parent's keys:
//!
//! ```json
//! {
//!   "misc": {"lastUpdate": 0, "oldestEntry": 0, "mostOnlineRecord": [0, 0]},
//!   "2024": {"nodes": 0, "geo": {}, "IPs": {},
//!     "03": {"nodes": 0, "geo": {}, "IPs": {},
//!       "15": {"nodes": 0, "geo": {}, "IPs": {},
//!         "10": {"nodes": 0, "geo": {}, "IPs": {},
//!           "25": {"nodes": 0, "geo": {}}}}}}
//! }
//! ```

use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::de::IgnoredAny;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};

/// Country code → number of unique peers
pub type GeoCounts = BTreeMap<String, u64>;

/// Global bookkeeping shared by every run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MiscStats {
    /// Timestamp of the newest log file ever processed (the watermark)
    pub last_update: i64,

    /// Timestamp of the oldest log file ever processed
    pub oldest_entry: i64,

    /// (timestamp, unique peers) of the busiest log file seen
    pub most_online_record: (i64, u64),
}

impl Default for MiscStats {
    fn default() -> Self {
        Self {
            last_update: 0,
            oldest_entry: i64::MAX,
            most_online_record: (0, 0),
        }
    }
}

impl MiscStats {
    /// Widen the processed time range to include `timestamp`
    pub fn observe(&mut self, timestamp: i64) {
        if timestamp < self.oldest_entry {
            self.oldest_entry = timestamp;
        }
        if timestamp > self.last_update {
            self.last_update = timestamp;
        }
    }

    /// Replace the record only on strict improvement
    pub fn record_online(&mut self, timestamp: i64, peer_count: u64) -> bool {
        if peer_count > self.most_online_record.1 {
            self.most_online_record = (timestamp, peer_count);
            true
        } else {
            false
        }
    }
}

/// Addresses already counted in a bucket
///
/// Persisted as `{"<address>": 1, ...}`; only key presence matters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IpCache(BTreeSet<String>);

impl IpCache {
    pub fn contains(&self, address: &str) -> bool {
        self.0.contains(address)
    }

    /// Returns true if the address was not cached before
    pub fn insert(&mut self, address: &str) -> bool {
        if self.0.contains(address) {
            return false;
        }
        self.0.insert(address.to_string())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }
}

impl Serialize for IpCache {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for address in &self.0 {
            map.serialize_entry(address, &1u8)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for IpCache {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let map = BTreeMap::<String, IgnoredAny>::deserialize(deserializer)?;
        Ok(IpCache(map.into_keys().collect()))
    }
}

/// A year, month, day or hour node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bucket<C> {
    /// Distinct peers ever seen in this bucket
    #[serde(default)]
    pub nodes: u64,

    #[serde(default)]
    pub geo: GeoCounts,

    #[serde(rename = "IPs", default)]
    pub ips: IpCache,

    #[serde(flatten)]
    pub children: BTreeMap<String, C>,
}

impl<C> Default for Bucket<C> {
    fn default() -> Self {
        Self {
            nodes: 0,
            geo: GeoCounts::new(),
            ips: IpCache::default(),
            children: BTreeMap::new(),
        }
    }
}

impl<C: Default> Bucket<C> {
    pub fn child_mut(&mut self, key: &str) -> &mut C {
        self.children.entry(key.to_string()).or_default()
    }
}

impl<C> Bucket<C> {
    /// Count a peer once per bucket
    ///
    /// Folding an address already in the cache is a no-op.
    pub fn fold_peer(&mut self, address: &str, country: &str) -> bool {
        if !self.ips.insert(address) {
            return false;
        }
        self.nodes += 1;
        *self.geo.entry(country.to_string()).or_insert(0) += 1;
        true
    }
}

/// Smallest bucket: averaged peer count, no IP cache
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickBucket {
    #[serde(default)]
    pub nodes: u64,

    #[serde(default)]
    pub geo: GeoCounts,
}

impl TickBucket {
    /// Merge one file's unique peer count into the running average
    pub fn fold_count(&mut self, peer_count: u64) {
        self.nodes = if self.nodes == 0 {
            peer_count
        } else {
            (self.nodes + peer_count) / 2
        };
    }

    pub fn count_country(&mut self, country: &str) {
        *self.geo.entry(country.to_string()).or_insert(0) += 1;
    }
}

pub type HourBucket = Bucket<TickBucket>;
pub type DayBucket = Bucket<HourBucket>;
pub type MonthBucket = Bucket<DayBucket>;
pub type YearBucket = Bucket<MonthBucket>;

/// Zero-padded path of a log timestamp through the tree (UTC)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BucketKey {
    pub year: String,
    pub month: String,
    pub day: String,
    pub hour: String,
    pub tick: String,
}

impl BucketKey {
    /// Returns None for timestamps chrono cannot represent
    pub fn from_timestamp(timestamp: i64, tick_interval_minutes: u32) -> Option<Self> {
        let time = DateTime::<Utc>::from_timestamp(timestamp, 0)?;
        let interval = tick_interval_minutes.clamp(1, 60);
        let minute = time.minute();

        Some(Self {
            year: format!("{:04}", time.year()),
            month: format!("{:02}", time.month()),
            day: format!("{:02}", time.day()),
            hour: format!("{:02}", time.hour()),
            tick: format!("{:02}", minute - minute % interval),
        })
    }
}

/// What folding one file changed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FoldSummary {
    /// The file created its tick bucket
    pub new_tick: bool,
    /// Peers not seen before in the file's hour
    pub new_in_hour: usize,
}

/// The whole persisted stats object
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsTree {
    #[serde(default)]
    pub misc: MiscStats,

    #[serde(flatten)]
    pub years: BTreeMap<String, YearBucket>,
}

impl StatsTree {
    /// True when no log file has ever been folded in
    pub fn is_empty(&self) -> bool {
        self.years.is_empty()
    }

    pub fn hour(&self, key: &BucketKey) -> Option<&HourBucket> {
        self.years
            .get(&key.year)?
            .children
            .get(&key.month)?
            .children
            .get(&key.day)?
            .children
            .get(&key.hour)
    }

    pub fn tick(&self, key: &BucketKey) -> Option<&TickBucket> {
        self.hour(key)?.children.get(&key.tick)
    }

    /// Fold one log file's deduplicated peer set into its buckets
    ///
    /// Year/month/day/hour count each address once via their IP caches.
    /// The tick is seeded by the first file that lands in it (which also
    /// sets its geo counts) and averaged with every later file.
    pub fn fold_file<F>(
        &mut self,
        key: &BucketKey,
        peers: &BTreeSet<String>,
        mut country_of: F,
    ) -> FoldSummary
    where
        F: FnMut(&str) -> String,
    {
        let hour = self.hour(key);
        let new_tick = hour.map_or(true, |h| !h.children.contains_key(&key.tick));

        // A peer already cached in the hour is cached in every enclosing
        // bucket too, so only the remaining ones need a lookup, unless the
        // tick is new and wants every peer's country.
        let unseen: BTreeSet<&str> = peers
            .iter()
            .map(String::as_str)
            .filter(|address| hour.map_or(true, |h| !h.ips.contains(address)))
            .collect();

        let countries: BTreeMap<&str, String> = peers
            .iter()
            .map(String::as_str)
            .filter(|address| new_tick || unseen.contains(address))
            .map(|address| (address, country_of(address)))
            .collect();

        let observations: Vec<(&str, &str)> = unseen
            .iter()
            .filter_map(|address| {
                countries
                    .get(address)
                    .map(|country| (*address, country.as_str()))
            })
            .collect();

        let year = self.years.entry(key.year.clone()).or_default();
        fold_all(year, &observations);
        let month = year.child_mut(&key.month);
        fold_all(month, &observations);
        let day = month.child_mut(&key.day);
        fold_all(day, &observations);
        let hour = day.child_mut(&key.hour);
        fold_all(hour, &observations);

        let peer_count = peers.len() as u64;
        match hour.children.entry(key.tick.clone()) {
            Entry::Vacant(slot) => {
                let tick = slot.insert(TickBucket::default());
                tick.fold_count(peer_count);
                for country in countries.values() {
                    tick.count_country(country);
                }
            }
            Entry::Occupied(mut slot) => slot.get_mut().fold_count(peer_count),
        }

        FoldSummary {
            new_tick,
            new_in_hour: observations.len(),
        }
    }

    /// Empty every IP cache, keeping counts and geo maps
    pub fn redact(&mut self) {
        for year in self.years.values_mut() {
            year.ips.clear();
            for month in year.children.values_mut() {
                month.ips.clear();
                for day in month.children.values_mut() {
                    day.ips.clear();
                    for hour in day.children.values_mut() {
                        hour.ips.clear();
                    }
                }
            }
        }
    }

    pub fn redacted(&self) -> Self {
        let mut tree = self.clone();
        tree.redact();
        tree
    }
}

fn fold_all<C>(bucket: &mut Bucket<C>, observations: &[(&str, &str)]) {
    for (address, country) in observations {
        bucket.fold_peer(address, country);
    }
}
