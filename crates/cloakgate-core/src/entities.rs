//! Durable entities (spec.md §3). Plain data — no I/O, no caching behavior.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::classification::{Classification, TrustLevel};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Redirect {
    pub id: String,
    pub public_id: String,
    pub human_url: String,
    pub bot_url: String,
    pub enabled: bool,
    pub owner_id: String,
    pub total: i64,
    pub human: i64,
    pub bot: i64,
}

/// Row in the IP cache. Only BOT classifications are ever stored here
/// (spec.md §3, §8 invariant 3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpCacheEntry {
    pub ip: String,
    pub reason: String,
    pub trust_level: TrustLevel,
    pub country: Option<String>,
    pub region: Option<String>,
    pub city: Option<String>,
    pub isp: Option<String>,
    pub usage_type: Option<String>,
    pub cached_at: DateTime<Utc>,
    pub last_hit: DateTime<Utc>,
    pub hit_count: u64,
}

impl IpCacheEntry {
    /// `classification` is not a stored field — every row is implicitly BOT
    /// (spec.md invariant 3) — but callers sometimes want the enum back.
    pub fn classification(&self) -> Classification {
        Classification::Bot
    }
}

/// Who put a CIDR row in the blacklist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddedBy {
    Auto,
    Admin,
    Import,
}

impl AddedBy {
    pub fn as_str(self) -> &'static str {
        match self {
            AddedBy::Auto => "auto",
            AddedBy::Admin => "admin",
            AddedBy::Import => "import",
        }
    }
}

/// A canonical IPv4 CIDR row in the blacklist (spec.md §3, §4.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CidrRangeEntry {
    /// Canonical `a.b.c.d/prefix` — network address, not an arbitrary host.
    pub cidr: String,
    pub origin_ip: String,
    pub reason: String,
    pub usage_type: Option<String>,
    pub country: Option<String>,
    pub isp: Option<String>,
    pub ip_count: u64,
    pub hit_count: u64,
    pub last_hit: DateTime<Utc>,
    pub added_by: AddedBy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisitorLog {
    pub id: String,
    pub redirect_id: Option<String>,
    pub ip: String,
    pub country: Option<String>,
    pub city: Option<String>,
    pub isp: Option<String>,
    pub ua: String,
    pub browser: Option<String>,
    pub device: Option<String>,
    pub classification: Classification,
    pub trust_level: TrustLevel,
    pub reason: String,
    pub redirected_to: String,
    pub ts: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeEvent {
    pub id: String,
    pub redirect_id: Option<String>,
    pub ip: String,
    pub country: Option<String>,
    pub city: Option<String>,
    pub isp: Option<String>,
    pub ua: String,
    pub browser: Option<String>,
    pub device: Option<String>,
    pub classification: Classification,
    pub trust_level: TrustLevel,
    pub reason: String,
    pub ts: DateTime<Utc>,
}

/// Created only when classification = HUMAN and an email was parsed from the
/// suffix (spec.md §3, §4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapturedEmail {
    pub id: String,
    pub email: String,
    pub parameter_format: String,
    pub redirect_id: String,
    pub ip: String,
    pub country: Option<String>,
    pub ts: DateTime<Utc>,
}
