//! The one shipping [`RedirectStore`] implementation, backed by Postgres
//! through a bounded `sqlx::PgPool` (spec.md §5: default pool size 5–10).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool, Row};
use std::time::Duration;

use cloakgate_core::entities::{
    AddedBy, CapturedEmail, CidrRangeEntry, IpCacheEntry, Redirect, RealtimeEvent, VisitorLog,
};

use crate::RedirectStore;

pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub async fn connect(database_url: &str, pool_size: u32, acquire_timeout: Duration) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(pool_size.clamp(1, 10))
            .acquire_timeout(acquire_timeout)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[derive(FromRow)]
struct RedirectRow {
    id: String,
    public_id: String,
    human_url: String,
    bot_url: String,
    enabled: bool,
    owner_id: String,
    total: i64,
    human: i64,
    bot: i64,
}

impl From<RedirectRow> for Redirect {
    fn from(row: RedirectRow) -> Self {
        Redirect {
            id: row.id,
            public_id: row.public_id,
            human_url: row.human_url,
            bot_url: row.bot_url,
            enabled: row.enabled,
            owner_id: row.owner_id,
            total: row.total,
            human: row.human,
            bot: row.bot,
        }
    }
}

fn trust_level_from_str(raw: &str) -> cloakgate_core::TrustLevel {
    use cloakgate_core::TrustLevel;
    match raw {
        "high" => TrustLevel::High,
        "low" => TrustLevel::Low,
        _ => TrustLevel::None,
    }
}

fn added_by_from_str(raw: &str) -> AddedBy {
    match raw {
        "admin" => AddedBy::Admin,
        "import" => AddedBy::Import,
        _ => AddedBy::Auto,
    }
}

#[async_trait]
impl RedirectStore for PostgresStore {
    async fn ping(&self) -> anyhow::Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn get_redirect_by_public_id(&self, public_id: &str) -> anyhow::Result<Option<Redirect>> {
        let row = sqlx::query_as::<_, RedirectRow>(
            "SELECT id, public_id, human_url, bot_url, enabled, owner_id, total, human, bot
             FROM redirects WHERE public_id = $1",
        )
        .bind(public_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Redirect::from))
    }

    async fn increment_redirect_counters(&self, redirect_id: &str, is_bot: bool) -> anyhow::Result<()> {
        if is_bot {
            sqlx::query(
                "UPDATE redirects SET total = total + 1, bot = bot + 1 WHERE id = $1",
            )
        } else {
            sqlx::query(
                "UPDATE redirects SET total = total + 1, human = human + 1 WHERE id = $1",
            )
        }
        .bind(redirect_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_ip_cache(&self, ip: &str) -> anyhow::Result<Option<IpCacheEntry>> {
        let row = sqlx::query(
            "SELECT ip, reason, trust_level, country, region, city, isp, usage_type, cached_at, last_hit, hit_count
             FROM ip_cache WHERE ip = $1",
        )
        .bind(ip)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| IpCacheEntry {
            ip: row.get("ip"),
            reason: row.get("reason"),
            trust_level: trust_level_from_str(row.get::<String, _>("trust_level").as_str()),
            country: row.get("country"),
            region: row.get("region"),
            city: row.get("city"),
            isp: row.get("isp"),
            usage_type: row.get("usage_type"),
            cached_at: row.get::<DateTime<Utc>, _>("cached_at"),
            last_hit: row.get::<DateTime<Utc>, _>("last_hit"),
            hit_count: row.get::<i64, _>("hit_count") as u64,
        }))
    }

    async fn upsert_ip_cache(&self, entry: &IpCacheEntry) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO ip_cache (ip, reason, trust_level, country, region, city, isp, usage_type, cached_at, last_hit, hit_count)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
             ON CONFLICT (ip) DO UPDATE SET
                reason = EXCLUDED.reason,
                last_hit = EXCLUDED.last_hit,
                hit_count = ip_cache.hit_count + 1",
        )
        .bind(&entry.ip)
        .bind(&entry.reason)
        .bind(entry.trust_level.as_str())
        .bind(&entry.country)
        .bind(&entry.region)
        .bind(&entry.city)
        .bind(&entry.isp)
        .bind(&entry.usage_type)
        .bind(entry.cached_at)
        .bind(entry.last_hit)
        .bind(entry.hit_count as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_ip_ranges(&self) -> anyhow::Result<Vec<CidrRangeEntry>> {
        let rows = sqlx::query(
            "SELECT cidr, origin_ip, reason, usage_type, country, isp, ip_count, hit_count, last_hit, added_by
             FROM ip_ranges",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| CidrRangeEntry {
                cidr: row.get("cidr"),
                origin_ip: row.get("origin_ip"),
                reason: row.get("reason"),
                usage_type: row.get("usage_type"),
                country: row.get("country"),
                isp: row.get("isp"),
                ip_count: row.get::<i64, _>("ip_count") as u64,
                hit_count: row.get::<i64, _>("hit_count") as u64,
                last_hit: row.get::<DateTime<Utc>, _>("last_hit"),
                added_by: added_by_from_str(row.get::<String, _>("added_by").as_str()),
            })
            .collect())
    }

    async fn insert_visitor_logs(&self, rows: &[VisitorLog]) -> anyhow::Result<usize> {
        let mut inserted = 0;
        for row in rows {
            let result = sqlx::query(
                "INSERT INTO visitor_logs (id, redirect_id, ip, country, city, isp, ua, browser, device, classification, trust_level, reason, redirected_to, ts)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
                 ON CONFLICT (id) DO NOTHING",
            )
            .bind(&row.id)
            .bind(&row.redirect_id)
            .bind(&row.ip)
            .bind(&row.country)
            .bind(&row.city)
            .bind(&row.isp)
            .bind(&row.ua)
            .bind(&row.browser)
            .bind(&row.device)
            .bind(row.classification.as_str())
            .bind(row.trust_level.as_str())
            .bind(&row.reason)
            .bind(&row.redirected_to)
            .bind(row.ts)
            .execute(&self.pool)
            .await?;
            inserted += result.rows_affected() as usize;
        }
        Ok(inserted)
    }

    async fn insert_realtime_events(&self, rows: &[RealtimeEvent]) -> anyhow::Result<usize> {
        let mut inserted = 0;
        for row in rows {
            let result = sqlx::query(
                "INSERT INTO realtime_events (id, redirect_id, ip, country, city, isp, ua, browser, device, classification, trust_level, reason, ts)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
                 ON CONFLICT (id) DO NOTHING",
            )
            .bind(&row.id)
            .bind(&row.redirect_id)
            .bind(&row.ip)
            .bind(&row.country)
            .bind(&row.city)
            .bind(&row.isp)
            .bind(&row.ua)
            .bind(&row.browser)
            .bind(&row.device)
            .bind(row.classification.as_str())
            .bind(row.trust_level.as_str())
            .bind(&row.reason)
            .bind(row.ts)
            .execute(&self.pool)
            .await?;
            inserted += result.rows_affected() as usize;
        }
        Ok(inserted)
    }

    async fn truncate_realtime_events(&self, cap: usize) -> anyhow::Result<()> {
        sqlx::query(
            "DELETE FROM realtime_events WHERE id IN (
                SELECT id FROM realtime_events ORDER BY ts DESC OFFSET $1
             )",
        )
        .bind(cap as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_captured_emails(&self, rows: &[CapturedEmail]) -> anyhow::Result<usize> {
        let mut inserted = 0;
        for row in rows {
            let result = sqlx::query(
                "INSERT INTO captured_emails (id, email, parameter_format, redirect_id, ip, country, ts)
                 VALUES ($1, $2, $3, $4, $5, $6, $7)
                 ON CONFLICT (id) DO NOTHING",
            )
            .bind(&row.id)
            .bind(&row.email)
            .bind(&row.parameter_format)
            .bind(&row.redirect_id)
            .bind(&row.ip)
            .bind(&row.country)
            .bind(row.ts)
            .execute(&self.pool)
            .await?;
            inserted += result.rows_affected() as usize;
        }
        Ok(inserted)
    }
}
