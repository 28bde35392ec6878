//! Time-bounded blacklist of IP addresses.
//!
//! Entries age out on their own; the size is approximate by design, which
//! is fine for a defensive structure (a stale positive only delays one
//! reconnect).

use mini_moka::sync::Cache;
use std::{net::IpAddr, time::Duration};

pub struct Blacklist {
    cache: Cache<IpAddr, ()>,
}

impl Blacklist {
    pub fn new(ttl: Duration) -> Self {
        Self {
            cache: Cache::builder().time_to_live(ttl).build(),
        }
    }

    /// Blocks an address for the configured TTL. Re-inserting restarts the
    /// clock.
    pub fn insert(&self, ip: IpAddr) {
        self.cache.insert(ip, ());
    }

    pub fn contains(&self, ip: IpAddr) -> bool {
        self.cache.contains_key(&ip)
    }

    pub fn remove(&self, ip: IpAddr) {
        self.cache.invalidate(&ip);
    }

    /// Approximate entry count, for observability.
    pub fn estimated_size(&self) -> u64 {
        self.cache.entry_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn insert_and_remove() {
        let blacklist = Blacklist::new(Duration::from_secs(60));
        let ip = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
        assert!(!blacklist.contains(ip));
        blacklist.insert(ip);
        assert!(blacklist.contains(ip));
        blacklist.remove(ip);
        assert!(!blacklist.contains(ip));
    }
}
