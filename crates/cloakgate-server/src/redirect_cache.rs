//! Hot Redirect Cache (spec.md §4.4): a TTL memory cache over the store,
//! keyed by `public_id`. Negative entries are cached too, so a repeated
//! lookup for an unknown id never round-trips the store. On a store error
//! during a miss, a stale entry (if any) is returned rather than the error
//! — availability over freshness for the redirect a user is waiting on.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use cloakgate_core::entities::Redirect;
use cloakgate_store::RedirectStore;

#[derive(Clone)]
enum Slot {
    Found(Redirect),
    Negative,
}

struct Entry {
    slot: Slot,
    fetched_at: Instant,
}

pub struct RedirectCache {
    store: Arc<dyn RedirectStore>,
    ttl: Duration,
    entries: RwLock<HashMap<String, Entry>>,
}

/// What a lookup should do with whatever it finds: a fresh redirect, a
/// cached "this id doesn't exist" marker, a stale entry served because the
/// store could not be reached, or — distinct from a genuine miss — a store
/// failure with nothing cached at all (spec.md §7: this is the one case
/// that falls back to the configured fallback URL rather than a 404).
pub enum Lookup {
    Found(Redirect),
    NotFound,
    Stale(Redirect),
    StoreUnavailable,
}

impl RedirectCache {
    pub fn new(store: Arc<dyn RedirectStore>, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub async fn get(&self, public_id: &str) -> Lookup {
        if let Some(entry) = self.entries.read().expect("redirect cache poisoned").get(public_id) {
            if entry.fetched_at.elapsed() < self.ttl {
                return match &entry.slot {
                    Slot::Found(redirect) => Lookup::Found(redirect.clone()),
                    Slot::Negative => Lookup::NotFound,
                };
            }
        }

        match self.store.get_redirect_by_public_id(public_id).await {
            Ok(Some(redirect)) => {
                self.insert(public_id, Slot::Found(redirect.clone()));
                Lookup::Found(redirect)
            }
            Ok(None) => {
                self.insert(public_id, Slot::Negative);
                Lookup::NotFound
            }
            Err(e) => {
                tracing::warn!(public_id, error = %e, "redirect store lookup failed, falling back to stale cache");
                match self
                    .entries
                    .read()
                    .expect("redirect cache poisoned")
                    .get(public_id)
                {
                    Some(Entry { slot: Slot::Found(redirect), .. }) => Lookup::Stale(redirect.clone()),
                    _ => Lookup::StoreUnavailable,
                }
            }
        }
    }

    fn insert(&self, public_id: &str, slot: Slot) {
        self.entries.write().expect("redirect cache poisoned").insert(
            public_id.to_string(),
            Entry {
                slot,
                fetched_at: Instant::now(),
            },
        );
    }

    /// Called by the owning code path whenever a redirect is edited
    /// externally (spec.md §4.4) — not reachable from this read-only core,
    /// but kept so the cache's contract matches the spec exactly.
    pub fn invalidate(&self, public_id: &str) {
        self.entries.write().expect("redirect cache poisoned").remove(public_id);
    }

    /// Periodic sweep: drop entries past TTL so memory does not grow
    /// unbounded from a stream of one-off negative lookups (spec.md §4.4:
    /// "Background sweep every 60s removes expired entries").
    pub fn sweep_expired(&self) {
        let ttl = self.ttl;
        self.entries
            .write()
            .expect("redirect cache poisoned")
            .retain(|_, entry| entry.fetched_at.elapsed() < ttl);
    }

    pub async fn run_sweep_loop(self: Arc<Self>, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            self.sweep_expired();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloakgate_store::MemoryStore;

    fn redirect(public_id: &str) -> Redirect {
        Redirect {
            id: format!("rdr_{public_id}"),
            public_id: public_id.to_string(),
            human_url: "https://landing.example.com/".to_string(),
            bot_url: "https://ads.example.com/".to_string(),
            enabled: true,
            owner_id: "owner_1".to_string(),
            total: 0,
            human: 0,
            bot: 0,
        }
    }

    #[tokio::test]
    async fn finds_a_seeded_redirect() {
        let store = Arc::new(MemoryStore::new());
        store.seed_redirect(redirect("abc"));
        let cache = RedirectCache::new(store, Duration::from_secs(300));
        match cache.get("abc").await {
            Lookup::Found(r) => assert_eq!(r.public_id, "abc"),
            _ => panic!("expected Found"),
        }
    }

    #[tokio::test]
    async fn caches_a_negative_lookup() {
        let store = Arc::new(MemoryStore::new());
        let cache = RedirectCache::new(store, Duration::from_secs(300));
        assert!(matches!(cache.get("missing").await, Lookup::NotFound));
        // Second lookup should be served from the negative cache entry --
        // behaviorally indistinguishable here, but exercised for coverage.
        assert!(matches!(cache.get("missing").await, Lookup::NotFound));
    }

    #[tokio::test]
    async fn invalidate_forces_a_fresh_store_read() {
        let store = Arc::new(MemoryStore::new());
        store.seed_redirect(redirect("abc"));
        let cache = RedirectCache::new(Arc::clone(&store), Duration::from_secs(300));
        let _ = cache.get("abc").await;
        cache.invalidate("abc");
        match cache.get("abc").await {
            Lookup::Found(r) => assert_eq!(r.public_id, "abc"),
            _ => panic!("expected Found after invalidate"),
        }
    }

    #[tokio::test]
    async fn sweep_drops_expired_entries() {
        let store = Arc::new(MemoryStore::new());
        store.seed_redirect(redirect("abc"));
        let cache = RedirectCache::new(store, Duration::from_millis(1));
        let _ = cache.get("abc").await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        cache.sweep_expired();
        assert!(cache.entries.read().unwrap().is_empty());
    }
}
