//! Country lookup for crawled peer addresses
//!
//! The aggregator only needs a country code per address, so the resolver
//! is a small trait that tests can fake. `GeoIpService` backs it with a
//! memory-mapped MaxMind Country or City database.

use anyhow::{Context, Result};
use maxminddb::{geoip2, Mmap, Reader};
use std::net::{IpAddr, Ipv4Addr};

/// Country code used whenever an address cannot be classified
pub const UNKNOWN_COUNTRY: &str = "??";

/// Maps a peer address to an ISO country code
pub trait GeoResolver {
    /// Returns None when the address is not in the database
    fn country_code(&self, ip: Ipv4Addr) -> Option<String>;
}

/// Resolve the country of a raw address string from a crawler log
///
/// Only IPv4 literals are looked up. Anything else (bracketed IPv6,
/// garbage) and every resolver miss maps to [`UNKNOWN_COUNTRY`].
pub fn country_of<R: GeoResolver + ?Sized>(resolver: &R, address: &str) -> String {
    address
        .parse::<Ipv4Addr>()
        .ok()
        .and_then(|ip| resolver.country_code(ip))
        .filter(|code| !code.is_empty())
        .unwrap_or_else(|| UNKNOWN_COUNTRY.to_string())
}

/// GeoIP lookup service backed by a MaxMind database
pub struct GeoIpService {
    reader: Option<Reader<Mmap>>,
}

impl GeoIpService {
    /// Create a new GeoIP service from an MMDB file path
    ///
    /// # Arguments
    /// * `db_path` - Optional path to a GeoLite2/GeoIP2 Country or City .mmdb file
    ///
    /// Without a database every lookup misses.
    pub fn new(db_path: Option<&str>) -> Result<Self> {
        let reader = if let Some(path) = db_path {
            let reader = unsafe { Reader::open_mmap(path) }
                .with_context(|| format!("Failed to open GeoIP database at {}", path))?;
            Some(reader)
        } else {
            None
        };

        Ok(Self { reader })
    }

    pub fn is_enabled(&self) -> bool {
        self.reader.is_some()
    }
}

impl GeoResolver for GeoIpService {
    fn country_code(&self, ip: Ipv4Addr) -> Option<String> {
        let reader = self.reader.as_ref()?;
        let result = reader.lookup(IpAddr::V4(ip)).ok()?;

        // City databases are a superset of Country data, so try the richer
        // record first and fall back to the country-only layout.
        if let Ok(Some(city)) = result.decode::<geoip2::City>() {
            if let Some(code) = city.country.iso_code {
                return Some(code.to_string());
            }
        }

        match result.decode::<geoip2::Country>() {
            Ok(Some(country)) => country.country.iso_code.map(|s| s.to_string()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct OneCountry;

    impl GeoResolver for OneCountry {
        fn country_code(&self, ip: Ipv4Addr) -> Option<String> {
            match ip.octets()[0] {
                1 => Some("US".to_string()),
                2 => Some(String::new()),
                _ => None,
            }
        }
    }

    #[test]
    fn test_geoip_service_creation_invalid_path() {
        let result = GeoIpService::new(Some("/nonexistent/path.mmdb"));
        assert!(result.is_err());
    }

    #[test]
    fn test_geoip_service_without_database_misses() {
        let service = GeoIpService::new(None).unwrap();
        assert!(!service.is_enabled());
        assert_eq!(service.country_code(Ipv4Addr::new(8, 8, 8, 8)), None);
        assert_eq!(country_of(&service, "8.8.8.8"), UNKNOWN_COUNTRY);
    }

    #[test]
    fn test_country_of_resolved_address() {
        assert_eq!(country_of(&OneCountry, "1.2.3.4"), "US");
    }

    #[test]
    fn test_country_of_unsupported_forms() {
        assert_eq!(country_of(&OneCountry, "[2001:db8::1]"), UNKNOWN_COUNTRY);
        assert_eq!(country_of(&OneCountry, "2001:db8::1"), UNKNOWN_COUNTRY);
        assert_eq!(country_of(&OneCountry, "not-an-ip"), UNKNOWN_COUNTRY);
        assert_eq!(country_of(&OneCountry, ""), UNKNOWN_COUNTRY);
    }

    #[test]
    fn test_country_of_resolver_miss() {
        assert_eq!(country_of(&OneCountry, "9.9.9.9"), UNKNOWN_COUNTRY);
        assert_eq!(country_of(&OneCountry, "2.0.0.1"), UNKNOWN_COUNTRY);
    }
}
