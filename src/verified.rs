//! The verified store: (IP, UUID) pairs that have passed verification.

use mini_moka::sync::Cache;
use std::{collections::HashSet, net::IpAddr, sync::Arc, time::Duration};
use uuid::Uuid;

/// Out-of-band persistence for the verified set. The gateway writes through
/// on every change; loading happens once at startup.
pub trait Persistence: Send + Sync {
    fn load(&self) -> anyhow::Result<Vec<(IpAddr, Uuid)>>;
    fn append(&self, ip: IpAddr, uuid: Uuid);
    fn remove(&self, ip: IpAddr);
}

/// Keeps the verified set in memory only.
pub struct NoPersistence;

impl Persistence for NoPersistence {
    fn load(&self) -> anyhow::Result<Vec<(IpAddr, Uuid)>> {
        Ok(Vec::new())
    }

    fn append(&self, _ip: IpAddr, _uuid: Uuid) {}

    fn remove(&self, _ip: IpAddr) {}
}

/// Bounded, time-expiring map of verified identities. An IP may hold
/// several UUIDs (several accounts behind one NAT).
pub struct VerifiedStore {
    cache: Cache<IpAddr, HashSet<Uuid>>,
    persistence: Arc<dyn Persistence>,
}

impl VerifiedStore {
    pub fn new(max_entries: u64, ttl: Duration, persistence: Arc<dyn Persistence>) -> Self {
        Self {
            cache: Cache::builder()
                .max_capacity(max_entries)
                .time_to_live(ttl)
                .build(),
            persistence,
        }
    }

    /// Loads the persisted set. Returns how many pairs were restored.
    pub fn restore(&self) -> anyhow::Result<usize> {
        let pairs = self.persistence.load()?;
        let count = pairs.len();
        for (ip, uuid) in pairs {
            self.insert_in_memory(ip, uuid);
        }
        Ok(count)
    }

    /// Records a successful verification and writes it through.
    pub fn insert(&self, ip: IpAddr, uuid: Uuid) {
        self.insert_in_memory(ip, uuid);
        self.persistence.append(ip, uuid);
    }

    fn insert_in_memory(&self, ip: IpAddr, uuid: Uuid) {
        let mut set = self.cache.get(&ip).unwrap_or_default();
        set.insert(uuid);
        self.cache.insert(ip, set);
    }

    /// The success predicate: has this exact pair verified before?
    pub fn contains(&self, ip: IpAddr, uuid: Uuid) -> bool {
        self.cache
            .get(&ip)
            .map_or(false, |set| set.contains(&uuid))
    }

    /// Whether any identity at this IP has verified.
    pub fn contains_ip(&self, ip: IpAddr) -> bool {
        self.cache.contains_key(&ip)
    }

    pub fn remove(&self, ip: IpAddr) {
        self.cache.invalidate(&ip);
        self.persistence.remove(ip);
    }

    pub fn estimated_size(&self) -> u64 {
        self.cache.entry_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn store() -> VerifiedStore {
        VerifiedStore::new(1024, Duration::from_secs(3600), Arc::new(NoPersistence))
    }

    fn ip(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, last))
    }

    #[test]
    fn membership_is_per_pair() {
        let store = store();
        let alice = Uuid::from_u128(1);
        let bob = Uuid::from_u128(2);

        store.insert(ip(1), alice);
        assert!(store.contains(ip(1), alice));
        assert!(!store.contains(ip(1), bob));
        assert!(!store.contains(ip(2), alice));

        // Second account behind the same IP.
        store.insert(ip(1), bob);
        assert!(store.contains(ip(1), alice));
        assert!(store.contains(ip(1), bob));
    }

    #[test]
    fn remove_drops_the_whole_ip() {
        let store = store();
        store.insert(ip(3), Uuid::from_u128(7));
        store.remove(ip(3));
        assert!(!store.contains_ip(ip(3)));
    }
}
