//! Peer statistics aggregation
//!
//! Crawler logs are folded into a year → month → day → hour → tick tree
//! of unique peer counts and per-country counters. GeoIP lookups go
//! through the [`GeoResolver`] trait so the aggregator can run against a
//! MaxMind database or a test double.

pub mod aggregator;
pub mod geoip;
pub mod models;

pub use aggregator::{RunOutcome, RunReport, StatsAggregator};
pub use geoip::{country_of, GeoIpService, GeoResolver, UNKNOWN_COUNTRY};
pub use models::{BucketKey, MiscStats, StatsTree, TickBucket};
