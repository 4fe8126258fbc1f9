//! CIDR Range Blacklist (spec.md §4.2): an in-memory, binary-searchable set
//! of IPv4 networks with per-entry hit counters, snapshotted to a single
//! JSON file with a debounce. Lookup is the hot path — every request issues
//! one `contains` call before anything else happens.
//!
//! Concurrency follows the teacher's `bot_detection::mod` choice of a plain
//! `std::sync::Mutex` over an in-process structure rather than a database
//! round-trip: every `contains` call mutates a hit counter, so a `RwLock`
//! would buy nothing here.

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use cloakgate_core::cidr;
use cloakgate_core::entities::{AddedBy, CidrRangeEntry};
use cloakgate_core::Decision;

struct Row {
    start: u32,
    end: u32,
    entry: CidrRangeEntry,
}

fn ip_to_u32(ip: Ipv4Addr) -> u32 {
    u32::from(ip)
}

fn row_width(row: &Row) -> u32 {
    row.end.saturating_sub(row.start)
}

fn widest_row(rows: &[Row]) -> u32 {
    rows.iter().map(row_width).max().unwrap_or(0)
}

#[derive(Serialize, Deserialize, Default)]
struct SnapshotStats {
    total_ranges: usize,
    total_hits: u64,
}

#[derive(Serialize, Deserialize, Default)]
struct Snapshot {
    ranges: Vec<CidrRangeEntry>,
    stats: SnapshotStats,
}

pub struct CidrBlacklist {
    rows: Mutex<Vec<Row>>,
    snapshot_path: PathBuf,
    dirty: AtomicBool,
    /// Width (address count) of the widest row currently in the table.
    /// Bounds how far back a containment scan must look — imported rows can
    /// be wider than the /24 the auto-widening rule ever produces, so this
    /// is tracked from the actual table contents, not assumed.
    max_width: AtomicU32,
}

impl CidrBlacklist {
    /// Load the snapshot at `snapshot_path` if it exists; start empty
    /// otherwise (spec.md §4.2: "Load on startup; if the file is missing,
    /// start empty").
    pub fn load(snapshot_path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let snapshot_path = snapshot_path.as_ref().to_path_buf();
        let rows = match std::fs::read_to_string(&snapshot_path) {
            Ok(raw) => {
                let snapshot: Snapshot = serde_json::from_str(&raw)?;
                snapshot
                    .ranges
                    .into_iter()
                    .filter_map(row_from_entry)
                    .collect()
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        let mut rows = rows;
        rows.sort_by_key(|r| r.start);
        let max_width = widest_row(&rows);
        Ok(Self {
            rows: Mutex::new(rows),
            snapshot_path,
            dirty: AtomicBool::new(false),
            max_width: AtomicU32::new(max_width),
        })
    }

    /// Look up `ip`. A hit bumps the entry's `hit_count`/`last_hit` and
    /// returns a clone of the (updated) entry.
    pub fn contains(&self, ip: Ipv4Addr) -> Option<CidrRangeEntry> {
        let ip_addr = ip_to_u32(ip);
        let mut rows = self.rows.lock().expect("blacklist mutex poisoned");
        let upper = rows.partition_point(|r| r.start <= ip_addr);
        let max_width = self.max_width.load(Ordering::Relaxed).max(1);
        let floor = ip_addr.saturating_sub(max_width - 1);
        for idx in (0..upper).rev() {
            if rows[idx].start < floor {
                break;
            }
            if ip_addr < rows[idx].end {
                rows[idx].entry.hit_count += 1;
                rows[idx].entry.last_hit = Utc::now();
                let should_mark_dirty = rows[idx].entry.hit_count % 10 == 0;
                let result = rows[idx].entry.clone();
                drop(rows);
                if should_mark_dirty {
                    self.dirty.store(true, Ordering::Relaxed);
                }
                return Some(result);
            }
        }
        None
    }

    /// Auto-widen `ip` per the convicting decision's usage type (spec.md
    /// §4.2 table) and insert the resulting network, unless `ip` is already
    /// covered by an existing range (idempotent — spec.md §8: adding the
    /// same IP twice yields exactly one row).
    pub fn add(&self, ip: Ipv4Addr, decision: &Decision) -> anyhow::Result<CidrRangeEntry> {
        if let Some(existing) = self.contains(ip) {
            return Ok(existing);
        }

        let prefix = decision
            .usage_type
            .as_ref()
            .map(|u| u.blacklist_prefix())
            .unwrap_or(32);
        let network = cidr::widen(ip, prefix)?;
        let cidr_str = network.to_string();
        let now = Utc::now();

        let entry = CidrRangeEntry {
            cidr: cidr_str.clone(),
            origin_ip: ip.to_string(),
            reason: decision.reason.clone(),
            usage_type: decision.usage_type.as_ref().map(|u| u.as_str().to_string()),
            country: None,
            isp: None,
            ip_count: 1u64 << (32 - prefix as u32),
            hit_count: 1,
            last_hit: now,
            added_by: AddedBy::Auto,
        };

        self.insert(entry.clone());
        self.dirty.store(true, Ordering::Relaxed);
        Ok(entry)
    }

    /// Seed rows from an external source (spec.md §3 RuleTable, §6) without
    /// marking the snapshot dirty — these came from the store, not a fresh
    /// conviction.
    pub fn import(&self, ranges: Vec<CidrRangeEntry>) {
        for entry in ranges {
            self.insert(entry);
        }
    }

    fn insert(&self, entry: CidrRangeEntry) {
        if let Some(row) = row_from_entry(entry) {
            let width = row_width(&row);
            let mut rows = self.rows.lock().expect("blacklist mutex poisoned");
            if rows.iter().any(|r| r.entry.cidr == row.entry.cidr) {
                return;
            }
            let idx = rows.partition_point(|r| r.start <= row.start);
            rows.insert(idx, row);
            drop(rows);
            self.max_width.fetch_max(width, Ordering::Relaxed);
        }
    }

    pub fn remove(&self, cidr_str: &str) -> bool {
        let mut rows = self.rows.lock().expect("blacklist mutex poisoned");
        let before = rows.len();
        rows.retain(|r| r.entry.cidr != cidr_str);
        let removed = rows.len() != before;
        if removed {
            self.max_width.store(widest_row(&rows), Ordering::Relaxed);
        }
        drop(rows);
        if removed {
            self.dirty.store(true, Ordering::Relaxed);
        }
        removed
    }

    pub fn clear(&self) {
        let mut rows = self.rows.lock().expect("blacklist mutex poisoned");
        rows.clear();
        drop(rows);
        self.max_width.store(0, Ordering::Relaxed);
        self.dirty.store(true, Ordering::Relaxed);
    }

    pub fn list(&self) -> Vec<CidrRangeEntry> {
        self.rows
            .lock()
            .expect("blacklist mutex poisoned")
            .iter()
            .map(|r| r.entry.clone())
            .collect()
    }

    /// Write the snapshot file if it has changed since the last save
    /// (spec.md §4.2: debounce ~2s, deferred unless `hit_count % 10 == 0`).
    /// Called from a periodic background task; truncate-and-write is
    /// acceptable per spec.md §6.
    pub fn save_if_dirty(&self) -> anyhow::Result<bool> {
        if !self.dirty.swap(false, Ordering::Relaxed) {
            return Ok(false);
        }
        let ranges = self.list();
        let stats = SnapshotStats {
            total_ranges: ranges.len(),
            total_hits: ranges.iter().map(|r| r.hit_count).sum(),
        };
        let snapshot = Snapshot { ranges, stats };
        let json = serde_json::to_string_pretty(&snapshot)?;
        if let Some(parent) = self.snapshot_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.snapshot_path, json)?;
        Ok(true)
    }

    /// Background task: debounced snapshot persistence (spec.md §4.2).
    pub async fn run_snapshot_saver(self: std::sync::Arc<Self>, debounce: Duration) {
        let mut ticker = tokio::time::interval(debounce);
        loop {
            ticker.tick().await;
            if let Err(e) = self.save_if_dirty() {
                tracing::error!(error = %e, "cidr blacklist snapshot save failed");
            }
        }
    }
}

fn row_from_entry(entry: CidrRangeEntry) -> Option<Row> {
    let network = cidr::parse(&entry.cidr).ok()?;
    let start = ip_to_u32(network.network());
    let size = 1u32.checked_shl(32 - network.prefix_len() as u32).unwrap_or(0);
    let end = start.checked_add(size)?;
    Some(Row { start, end, entry })
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloakgate_core::UsageType;
    use std::sync::atomic::{AtomicU64, Ordering};

    static TEMP_PATH_COUNTER: AtomicU64 = AtomicU64::new(0);

    fn temp_path(name: &str) -> std::path::PathBuf {
        let id = TEMP_PATH_COUNTER.fetch_add(1, Ordering::Relaxed);
        std::env::temp_dir().join(format!("cloakgate-blacklist-test-{name}-{id}.json"))
    }

    fn datacenter_decision() -> Decision {
        Decision::bot_with_usage_type(2, "DATACENTER_USAGE_TYPE", UsageType::Dch)
    }

    fn stage1_decision() -> Decision {
        Decision::bot(1, "GENERIC_BOT")
    }

    #[test]
    fn missing_snapshot_file_starts_empty() {
        let blacklist = CidrBlacklist::load(temp_path("missing")).unwrap();
        assert!(blacklist.list().is_empty());
    }

    #[test]
    fn datacenter_conviction_widens_to_slash24() {
        let blacklist = CidrBlacklist::load(temp_path("dch")).unwrap();
        let ip: Ipv4Addr = "203.0.113.77".parse().unwrap();
        let entry = blacklist.add(ip, &datacenter_decision()).unwrap();
        assert_eq!(entry.cidr, "203.0.113.0/24");
        assert_eq!(entry.ip_count, 256);
    }

    #[test]
    fn stage1_conviction_with_no_usage_type_widens_to_slash32() {
        let blacklist = CidrBlacklist::load(temp_path("s1")).unwrap();
        let ip: Ipv4Addr = "198.51.100.9".parse().unwrap();
        let entry = blacklist.add(ip, &stage1_decision()).unwrap();
        assert_eq!(entry.cidr, "198.51.100.9/32");
        assert_eq!(entry.ip_count, 1);
    }

    #[test]
    fn contains_finds_ip_within_a_slash24_range() {
        let blacklist = CidrBlacklist::load(temp_path("contains24")).unwrap();
        blacklist
            .add("203.0.113.5".parse().unwrap(), &datacenter_decision())
            .unwrap();
        let hit = blacklist.contains("203.0.113.200".parse().unwrap());
        assert!(hit.is_some());
        assert_eq!(hit.unwrap().cidr, "203.0.113.0/24");
    }

    #[test]
    fn contains_does_not_match_ip_outside_the_range() {
        let blacklist = CidrBlacklist::load(temp_path("outside")).unwrap();
        blacklist
            .add("203.0.113.5".parse().unwrap(), &datacenter_decision())
            .unwrap();
        assert!(blacklist.contains("203.0.114.5".parse().unwrap()).is_none());
    }

    #[test]
    fn adding_the_same_ip_twice_results_in_exactly_one_row() {
        let blacklist = CidrBlacklist::load(temp_path("dedupe")).unwrap();
        let ip: Ipv4Addr = "198.51.100.9".parse().unwrap();
        blacklist.add(ip, &stage1_decision()).unwrap();
        blacklist.add(ip, &stage1_decision()).unwrap();
        assert_eq!(blacklist.list().len(), 1);
    }

    #[test]
    fn repeated_hits_increment_the_counter() {
        let blacklist = CidrBlacklist::load(temp_path("hits")).unwrap();
        let ip: Ipv4Addr = "198.51.100.9".parse().unwrap();
        blacklist.add(ip, &stage1_decision()).unwrap();
        blacklist.contains(ip);
        blacklist.contains(ip);
        let entry = blacklist.contains(ip).unwrap();
        assert_eq!(entry.hit_count, 4);
    }

    #[test]
    fn contains_finds_ip_in_an_imported_range_wider_than_a_slash24() {
        let blacklist = CidrBlacklist::load(temp_path("wide-import")).unwrap();
        blacklist.import(vec![CidrRangeEntry {
            cidr: "203.0.0.0/16".to_string(),
            origin_ip: "203.0.0.0".to_string(),
            reason: "IMPORTED".to_string(),
            usage_type: None,
            country: None,
            isp: None,
            ip_count: 65536,
            hit_count: 0,
            last_hit: Utc::now(),
            added_by: AddedBy::Import,
        }]);
        let hit = blacklist.contains("203.0.200.5".parse().unwrap());
        assert!(hit.is_some());
        assert_eq!(hit.unwrap().cidr, "203.0.0.0/16");
    }

    #[test]
    fn remove_deletes_a_row_and_clear_empties_the_table() {
        let blacklist = CidrBlacklist::load(temp_path("remove")).unwrap();
        blacklist
            .add("203.0.113.5".parse().unwrap(), &datacenter_decision())
            .unwrap();
        assert!(blacklist.remove("203.0.113.0/24"));
        assert!(blacklist.list().is_empty());

        blacklist
            .add("203.0.113.5".parse().unwrap(), &datacenter_decision())
            .unwrap();
        blacklist.clear();
        assert!(blacklist.list().is_empty());
    }

    #[test]
    fn save_and_reload_round_trips_entries() {
        let path = temp_path("roundtrip");
        {
            let blacklist = CidrBlacklist::load(&path).unwrap();
            blacklist
                .add("203.0.113.5".parse().unwrap(), &datacenter_decision())
                .unwrap();
            assert!(blacklist.save_if_dirty().unwrap());
        }
        let reloaded = CidrBlacklist::load(&path).unwrap();
        assert_eq!(reloaded.list().len(), 1);
        assert_eq!(reloaded.list()[0].cidr, "203.0.113.0/24");
        std::fs::remove_file(&path).ok();
    }
}
