//! IP Cache (spec.md §3, §4.3 S2): a persistent, bot-only cache of prior
//! convictions, keyed by IP. An in-memory mirror absorbs the hot-path reads;
//! writes go through to the store so the conviction survives a restart.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::Utc;

use cloakgate_core::entities::IpCacheEntry;
use cloakgate_core::{Decision, TrustLevel};
use cloakgate_store::RedirectStore;

pub struct IpCache {
    store: Arc<dyn RedirectStore>,
    mirror: RwLock<HashMap<String, IpCacheEntry>>,
}

impl IpCache {
    pub fn new(store: Arc<dyn RedirectStore>) -> Self {
        Self {
            store,
            mirror: RwLock::new(HashMap::new()),
        }
    }

    /// Fast path: check the in-memory mirror first. On a miss, fall through
    /// to the store. Either way, a hit is refreshed — `hit_count` bumped and
    /// `last_hit` updated, written through to the store — matching the
    /// lifecycle spec.md §3 requires of this entity (and already followed by
    /// the CIDR blacklist's own `contains`).
    pub async fn get(&self, ip: &str) -> anyhow::Result<Option<IpCacheEntry>> {
        let mirrored = self
            .mirror
            .read()
            .expect("ip cache mirror poisoned")
            .get(ip)
            .cloned();
        if let Some(entry) = mirrored {
            return Ok(Some(self.refresh(entry).await?));
        }

        match self.store.get_ip_cache(ip).await? {
            Some(entry) => Ok(Some(self.refresh(entry).await?)),
            None => Ok(None),
        }
    }

    /// Bump `hit_count`/`last_hit` on an existing entry, write it through to
    /// the store, and refresh the mirror.
    async fn refresh(&self, mut entry: IpCacheEntry) -> anyhow::Result<IpCacheEntry> {
        entry.hit_count += 1;
        entry.last_hit = Utc::now();
        self.store.upsert_ip_cache(&entry).await?;
        self.mirror
            .write()
            .expect("ip cache mirror poisoned")
            .insert(entry.ip.clone(), entry.clone());
        Ok(entry)
    }

    /// Record a fresh BOT conviction (spec.md §8 invariant 3: only BOT rows
    /// ever appear here). Writes through to the store and refreshes the
    /// mirror so subsequent requests on this process see it immediately.
    pub async fn put(&self, ip: &str, decision: &Decision) -> anyhow::Result<()> {
        debug_assert!(decision.classification.is_bot());
        let now = Utc::now();
        let entry = IpCacheEntry {
            ip: ip.to_string(),
            reason: decision.reason.clone(),
            trust_level: TrustLevel::None,
            country: None,
            region: None,
            city: None,
            isp: None,
            usage_type: decision.usage_type.as_ref().map(|u| u.as_str().to_string()),
            cached_at: now,
            last_hit: now,
            hit_count: 1,
        };

        self.store.upsert_ip_cache(&entry).await?;
        self.mirror
            .write()
            .expect("ip cache mirror poisoned")
            .insert(ip.to_string(), entry);
        Ok(())
    }
}
