//! Every tunable knob named in the design notes, as an explicit field with a
//! documented default — no free-form dictionary. Mirrors the teacher's
//! `Config::from_env` (env var → `.unwrap_or_else` default → `.parse()`).

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub public_url: String,

    /// Postgres connection string for the `RedirectStore`.
    pub database_url: String,
    /// Bounded pool size (spec.md §5: default 5–10).
    pub db_pool_size: u32,
    pub db_pool_acquire_timeout_ms: u64,

    /// Directory holding the on-disk CIDR blacklist snapshot.
    pub data_dir: String,
    /// Debounce between CIDR blacklist snapshot writes (spec.md §4.2).
    pub cidr_snapshot_debounce_ms: u64,

    /// Hot redirect cache TTL (spec.md §4.4).
    pub redirect_cache_ttl_secs: u64,
    /// Background sweep interval for the hot redirect cache.
    pub redirect_cache_sweep_interval_secs: u64,

    /// Write-behind logger tick interval (spec.md §4.7).
    pub write_behind_interval_ms: u64,
    /// Rows drained per queue per tick.
    pub write_behind_batch_size: usize,
    /// A queue at or above `write_behind_batch_size * this` triggers an
    /// immediate out-of-band flush instead of waiting for the next tick.
    pub write_behind_immediate_flush_multiplier: usize,
    /// Failed batches at or under this size are re-queued at the head; larger
    /// batches are dropped (spec.md §4.7).
    pub write_behind_requeue_max: usize,

    /// IP2Location API key (`IP2LOCATION_API_KEY`).
    pub ip2location_api_key: String,
    pub ip2location_region: Ip2LocationRegion,
    /// Wall-clock deadline for the Stage-2 call (spec.md §5, default 5s).
    pub ip_intel_timeout_ms: u64,

    /// Destination used by the dispatcher when an unhandled internal error
    /// occurs (spec.md §4.6) — the link must never look broken.
    pub fallback_url: String,

    /// Proxy headers consulted in priority order (spec.md §4.1).
    pub ip_header_priority: Vec<String>,

    /// Opportunistic Base64 decoding of long suffix tokens when hunting for
    /// emails (spec.md §4.5) is a false-positive risk; off unless enabled.
    pub email_base64_decode_enabled: bool,

    pub visitor_log_retention_days: u32,
    /// Realtime event ring buffer row cap (spec.md §3).
    pub realtime_event_cap: usize,

    /// UA substrings (lowercase) that earn an immediate 403 from the
    /// dispatcher, before the decision engine runs at all (spec.md §7: "Crawler
    /// UA (block-list in dispatcher)"). Distinct from the Stage-1 classifier:
    /// these are known vulnerability scanners, not search/preview bots, and
    /// get no redirect at all, not even to the bot destination.
    pub dispatcher_hard_block_signatures: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ip2LocationRegion {
    Us,
    Eu,
}

impl Ip2LocationRegion {
    pub fn api_host(self) -> &'static str {
        match self {
            Ip2LocationRegion::Us => "api.ip2location.io",
            Ip2LocationRegion::Eu => "api.eu.ip2location.io",
        }
    }
}

fn default_ip_header_priority() -> Vec<String> {
    [
        "CF-Connecting-IP",
        "True-Client-IP",
        "X-Real-IP",
        "X-Forwarded-For",
        "X-Envoy-External-Address",
        "X-Zeabur-Client-IP",
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}

fn default_hard_block_signatures() -> Vec<String> {
    ["sqlmap", "nikto", "nmap", "masscan", "nessus", "acunetix", "w3af", "dirbuster", "havij"]
        .into_iter()
        .map(str::to_string)
        .collect()
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_string_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        Ok(Self {
            port: env_or("CLOAKGATE_PORT", 3000u16),
            public_url: env_string_or("CLOAKGATE_PUBLIC_URL", "http://localhost:3000"),
            database_url: std::env::var("DATABASE_URL")
                .map_err(|_| "DATABASE_URL is required".to_string())?,
            db_pool_size: env_or("DB_POOL_SIZE", 10u32).clamp(1, 10),
            db_pool_acquire_timeout_ms: env_or("DB_POOL_ACQUIRE_TIMEOUT_MS", 500u64),
            data_dir: env_string_or("CLOAKGATE_DATA_DIR", "./data"),
            cidr_snapshot_debounce_ms: env_or("CLOAKGATE_CIDR_DEBOUNCE_MS", 2_000u64),
            redirect_cache_ttl_secs: env_or("CLOAKGATE_REDIRECT_CACHE_TTL_SECS", 300u64),
            redirect_cache_sweep_interval_secs: env_or(
                "CLOAKGATE_REDIRECT_CACHE_SWEEP_SECS",
                60u64,
            ),
            write_behind_interval_ms: env_or("CLOAKGATE_WRITE_BEHIND_INTERVAL_MS", 2_000u64),
            write_behind_batch_size: env_or("CLOAKGATE_WRITE_BEHIND_BATCH_SIZE", 100usize),
            write_behind_immediate_flush_multiplier: env_or(
                "CLOAKGATE_WRITE_BEHIND_IMMEDIATE_FLUSH_MULTIPLIER",
                2usize,
            ),
            write_behind_requeue_max: env_or("CLOAKGATE_WRITE_BEHIND_REQUEUE_MAX", 10usize),
            ip2location_api_key: std::env::var("IP2LOCATION_API_KEY").unwrap_or_default(),
            ip2location_region: {
                let raw = env_string_or("CLOAKGATE_IP2LOCATION_REGION", "us");
                match raw.as_str() {
                    "eu" => Ip2LocationRegion::Eu,
                    _ => Ip2LocationRegion::Us,
                }
            },
            ip_intel_timeout_ms: env_or("CLOAKGATE_IP_INTEL_TIMEOUT_MS", 5_000u64),
            fallback_url: env_string_or("CLOAKGATE_FALLBACK_URL", "https://example.com/"),
            ip_header_priority: std::env::var("CLOAKGATE_IP_HEADER_PRIORITY")
                .map(|v| v.split(',').map(str::trim).map(str::to_string).collect())
                .unwrap_or_else(|_| default_ip_header_priority()),
            email_base64_decode_enabled: env_or("CLOAKGATE_EMAIL_BASE64_DECODE", false),
            visitor_log_retention_days: env_or("CLOAKGATE_VISITOR_LOG_RETENTION_DAYS", 7u32),
            realtime_event_cap: env_or("CLOAKGATE_REALTIME_EVENT_CAP", 1_000usize),
            dispatcher_hard_block_signatures: std::env::var("CLOAKGATE_HARD_BLOCK_UA")
                .map(|v| v.split(',').map(str::trim).map(str::to_ascii_lowercase).collect())
                .unwrap_or_else(|_| default_hard_block_signatures()),
        })
    }

    pub fn redirect_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.redirect_cache_ttl_secs)
    }

    pub fn redirect_cache_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.redirect_cache_sweep_interval_secs)
    }

    pub fn write_behind_interval(&self) -> Duration {
        Duration::from_millis(self.write_behind_interval_ms)
    }

    pub fn ip_intel_timeout(&self) -> Duration {
        Duration::from_millis(self.ip_intel_timeout_ms)
    }

    pub fn write_behind_immediate_flush_threshold(&self) -> usize {
        self.write_behind_batch_size * self.write_behind_immediate_flush_multiplier
    }

    /// Whether `user_agent` matches a dispatcher-level hard block signature.
    /// Checked before the decision engine runs at all (spec.md §7).
    pub fn is_hard_blocked_user_agent(&self, user_agent: &str) -> bool {
        let lower = user_agent.to_ascii_lowercase();
        self.dispatcher_hard_block_signatures.iter().any(|sig| lower.contains(sig.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_picks_correct_host() {
        assert_eq!(Ip2LocationRegion::Us.api_host(), "api.ip2location.io");
        assert_eq!(Ip2LocationRegion::Eu.api_host(), "api.eu.ip2location.io");
    }

    #[test]
    fn hard_block_signatures_match_case_insensitively() {
        let cfg = Config {
            port: 3000,
            public_url: "http://localhost:3000".to_string(),
            database_url: "postgres://localhost/test".to_string(),
            db_pool_size: 5,
            db_pool_acquire_timeout_ms: 500,
            data_dir: "./data".to_string(),
            cidr_snapshot_debounce_ms: 2_000,
            redirect_cache_ttl_secs: 300,
            redirect_cache_sweep_interval_secs: 60,
            write_behind_interval_ms: 2_000,
            write_behind_batch_size: 100,
            write_behind_immediate_flush_multiplier: 2,
            write_behind_requeue_max: 10,
            ip2location_api_key: String::new(),
            ip2location_region: Ip2LocationRegion::Us,
            ip_intel_timeout_ms: 5_000,
            fallback_url: "https://example.com/".to_string(),
            ip_header_priority: default_ip_header_priority(),
            email_base64_decode_enabled: false,
            visitor_log_retention_days: 7,
            realtime_event_cap: 1_000,
            dispatcher_hard_block_signatures: default_hard_block_signatures(),
        };
        assert!(cfg.is_hard_blocked_user_agent("sqlmap/1.7.2#stable"));
        assert!(!cfg.is_hard_blocked_user_agent("Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15)"));
    }

    #[test]
    fn default_ip_header_priority_matches_spec_order() {
        let headers = default_ip_header_priority();
        assert_eq!(
            headers,
            vec![
                "CF-Connecting-IP",
                "True-Client-IP",
                "X-Real-IP",
                "X-Forwarded-For",
                "X-Envoy-External-Address",
                "X-Zeabur-Client-IP",
            ]
        );
    }
}
