//! Storage abstraction for the gateway: one trait, one shipping
//! implementation (Postgres), plus an in-memory double for tests. Mirrors
//! the teacher's `AnalyticsBackend` split between a core trait and backend
//! crates, collapsed to a single relational backend per the design notes.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;

use cloakgate_core::entities::{CapturedEmail, CidrRangeEntry, IpCacheEntry, Redirect, RealtimeEvent, VisitorLog};

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

/// Everything the gateway needs from durable storage. Every method that can
/// be called on the hot path is either O(1) against an indexed column or a
/// batched write; there is no query here that scans `visitor_logs`.
#[async_trait]
pub trait RedirectStore: Send + Sync + 'static {
    /// Cheap liveness probe for `/health` (spec.md §4.6).
    async fn ping(&self) -> anyhow::Result<()>;

    /// Look up a redirect by its public id. `None` means "does not exist",
    /// distinct from a store error.
    async fn get_redirect_by_public_id(&self, public_id: &str) -> anyhow::Result<Option<Redirect>>;

    /// Bump `total` and either `human` or `bot` by one (spec.md §3: counters
    /// are monotonic, eventually consistent with the logger).
    async fn increment_redirect_counters(&self, redirect_id: &str, is_bot: bool) -> anyhow::Result<()>;

    /// Load a cached IP verdict. Only BOT rows are ever stored (spec.md §8
    /// invariant 3), so a hit is always a BOT terminal.
    async fn get_ip_cache(&self, ip: &str) -> anyhow::Result<Option<IpCacheEntry>>;

    /// Insert a fresh BOT verdict, or if the row already exists, refresh
    /// `last_hit` and increment `hit_count` instead (the row is never
    /// allowed to expire automatically — spec.md §3).
    async fn upsert_ip_cache(&self, entry: &IpCacheEntry) -> anyhow::Result<()>;

    /// All statically-imported CIDR ranges (spec.md §3 RuleTable), used to
    /// seed the in-memory blacklist at startup alongside its own snapshot
    /// file. Read-only; the core never writes to this table.
    async fn list_ip_ranges(&self) -> anyhow::Result<Vec<CidrRangeEntry>>;

    /// Append-only, `ON CONFLICT DO NOTHING` (spec.md §4.7). Returns the
    /// number of rows actually inserted (duplicates are silently skipped,
    /// not an error).
    async fn insert_visitor_logs(&self, rows: &[VisitorLog]) -> anyhow::Result<usize>;

    async fn insert_realtime_events(&self, rows: &[RealtimeEvent]) -> anyhow::Result<usize>;

    /// Keep the realtime_events table bounded (spec.md §3: ring-buffered to
    /// ≤1000 rows). Deletes the oldest rows beyond `cap`.
    async fn truncate_realtime_events(&self, cap: usize) -> anyhow::Result<()>;

    async fn insert_captured_emails(&self, rows: &[CapturedEmail]) -> anyhow::Result<usize>;
}
