//! In-memory [`RedirectStore`] double for unit and integration tests,
//! mirroring the teacher's `NullBillingGate` stand-in pattern: same trait,
//! zero external dependencies, predictable behavior under test.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use cloakgate_core::entities::{
    CapturedEmail, CidrRangeEntry, IpCacheEntry, RealtimeEvent, Redirect, VisitorLog,
};

use crate::RedirectStore;

#[derive(Default)]
struct Inner {
    redirects: HashMap<String, Redirect>,
    ip_cache: HashMap<String, IpCacheEntry>,
    ip_ranges: Vec<CidrRangeEntry>,
    visitor_logs: Vec<VisitorLog>,
    realtime_events: Vec<RealtimeEvent>,
    captured_emails: Vec<CapturedEmail>,
}

/// Plain `Mutex`-guarded maps/vecs — tests never need more than one writer at
/// a time, so there is no reason to reach for anything fancier here.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a redirect for a test, keyed by its `public_id`.
    pub fn seed_redirect(&self, redirect: Redirect) {
        let mut inner = self.inner.lock().expect("memory store mutex poisoned");
        inner.redirects.insert(redirect.public_id.clone(), redirect);
    }

    pub fn seed_ip_range(&self, entry: CidrRangeEntry) {
        let mut inner = self.inner.lock().expect("memory store mutex poisoned");
        inner.ip_ranges.push(entry);
    }

    /// Snapshot of every visitor log recorded so far, for test assertions.
    pub fn visitor_logs(&self) -> Vec<VisitorLog> {
        self.inner
            .lock()
            .expect("memory store mutex poisoned")
            .visitor_logs
            .clone()
    }

    pub fn captured_emails(&self) -> Vec<CapturedEmail> {
        self.inner
            .lock()
            .expect("memory store mutex poisoned")
            .captured_emails
            .clone()
    }

    pub fn redirect_counters(&self, redirect_id: &str) -> Option<(i64, i64, i64)> {
        let inner = self.inner.lock().expect("memory store mutex poisoned");
        inner
            .redirects
            .values()
            .find(|r| r.id == redirect_id)
            .map(|r| (r.total, r.human, r.bot))
    }
}

#[async_trait]
impl RedirectStore for MemoryStore {
    async fn ping(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn get_redirect_by_public_id(&self, public_id: &str) -> anyhow::Result<Option<Redirect>> {
        let inner = self.inner.lock().expect("memory store mutex poisoned");
        Ok(inner.redirects.get(public_id).cloned())
    }

    async fn increment_redirect_counters(&self, redirect_id: &str, is_bot: bool) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().expect("memory store mutex poisoned");
        if let Some(redirect) = inner.redirects.values_mut().find(|r| r.id == redirect_id) {
            redirect.total += 1;
            if is_bot {
                redirect.bot += 1;
            } else {
                redirect.human += 1;
            }
        }
        Ok(())
    }

    async fn get_ip_cache(&self, ip: &str) -> anyhow::Result<Option<IpCacheEntry>> {
        let inner = self.inner.lock().expect("memory store mutex poisoned");
        Ok(inner.ip_cache.get(ip).cloned())
    }

    async fn upsert_ip_cache(&self, entry: &IpCacheEntry) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().expect("memory store mutex poisoned");
        match inner.ip_cache.get_mut(&entry.ip) {
            Some(existing) => {
                existing.reason = entry.reason.clone();
                existing.last_hit = Utc::now();
                existing.hit_count += 1;
            }
            None => {
                inner.ip_cache.insert(entry.ip.clone(), entry.clone());
            }
        }
        Ok(())
    }

    async fn list_ip_ranges(&self) -> anyhow::Result<Vec<CidrRangeEntry>> {
        let inner = self.inner.lock().expect("memory store mutex poisoned");
        Ok(inner.ip_ranges.clone())
    }

    async fn insert_visitor_logs(&self, rows: &[VisitorLog]) -> anyhow::Result<usize> {
        let mut inner = self.inner.lock().expect("memory store mutex poisoned");
        let existing: std::collections::HashSet<String> =
            inner.visitor_logs.iter().map(|r| r.id.clone()).collect();
        let mut inserted = 0;
        for row in rows {
            if existing.contains(&row.id) {
                continue;
            }
            inner.visitor_logs.push(row.clone());
            inserted += 1;
        }
        Ok(inserted)
    }

    async fn insert_realtime_events(&self, rows: &[RealtimeEvent]) -> anyhow::Result<usize> {
        let mut inner = self.inner.lock().expect("memory store mutex poisoned");
        let existing: std::collections::HashSet<String> =
            inner.realtime_events.iter().map(|r| r.id.clone()).collect();
        let mut inserted = 0;
        for row in rows {
            if existing.contains(&row.id) {
                continue;
            }
            inner.realtime_events.push(row.clone());
            inserted += 1;
        }
        Ok(inserted)
    }

    async fn truncate_realtime_events(&self, cap: usize) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().expect("memory store mutex poisoned");
        let len = inner.realtime_events.len();
        if len > cap {
            inner.realtime_events.drain(0..(len - cap));
        }
        Ok(())
    }

    async fn insert_captured_emails(&self, rows: &[CapturedEmail]) -> anyhow::Result<usize> {
        let mut inner = self.inner.lock().expect("memory store mutex poisoned");
        let existing: std::collections::HashSet<String> =
            inner.captured_emails.iter().map(|r| r.id.clone()).collect();
        let mut inserted = 0;
        for row in rows {
            if existing.contains(&row.id) {
                continue;
            }
            inner.captured_emails.push(row.clone());
            inserted += 1;
        }
        Ok(inserted)
    }
}
