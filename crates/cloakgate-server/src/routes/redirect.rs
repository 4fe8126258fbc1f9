//! `GET /r/{idAndSuffix}` (spec.md §4.6, §6): the one hot-path endpoint. Runs
//! the decision engine, resolves the redirect through the hot cache, rewrites
//! the suffix onto the chosen destination, and enqueues the visit for the
//! write-behind logger — all before a 302 leaves the process.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use axum::extract::{ConnectInfo, FromRequestParts, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use uuid::Uuid;

use cloakgate_core::entities::{CapturedEmail, RealtimeEvent, VisitorLog};
use cloakgate_core::rewriter;

use crate::error::AppError;
use crate::ip_extract::extract_client_ip;
use crate::redirect_cache::Lookup;
use crate::state::AppState;

/// Mirrors the teacher's `collect::MaybeConnectInfo`: the peer address when
/// Axum was served with `into_make_service_with_connect_info`, `None`
/// otherwise (e.g. a `oneshot` call in a test with no real connection).
pub struct MaybeConnectInfo(pub Option<SocketAddr>);

impl<S> FromRequestParts<S> for MaybeConnectInfo
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut axum::http::request::Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self(parts.extensions.get::<ConnectInfo<SocketAddr>>().map(|info| info.0)))
    }
}

const ANTI_CRAWLER_ROBOTS_TAG: &str = "noindex, nofollow, noarchive, nosnippet";
const ANTI_CRAWLER_CACHE_CONTROL: &str = "no-cache, no-store, must-revalidate";

fn with_anti_crawler_headers(mut response: Response) -> Response {
    let headers = response.headers_mut();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static(ANTI_CRAWLER_CACHE_CONTROL));
    headers.insert("x-robots-tag", HeaderValue::from_static(ANTI_CRAWLER_ROBOTS_TAG));
    response
}

/// A 302 to `location`, with the anti-crawler headers spec.md §4.6 requires on
/// every redirect this dispatcher issues (human or bot).
fn found(location: &str) -> Response {
    let mut response = StatusCode::FOUND.into_response();
    match HeaderValue::from_str(location) {
        Ok(value) => {
            response.headers_mut().insert(header::LOCATION, value);
        }
        Err(_) => {
            // A destination URL that can't be encoded as a header value is
            // not something the dispatcher can serve; fail the same way a
            // store error would, rather than returning a broken redirect.
            return with_anti_crawler_headers(StatusCode::INTERNAL_SERVER_ERROR.into_response());
        }
    }
    with_anti_crawler_headers(response)
}

/// Known vulnerability scanner caught by the dispatcher's own block-list, not
/// the decision engine (spec.md §7) — no redirect issued at all.
fn hard_block() -> Response {
    with_anti_crawler_headers(StatusCode::FORBIDDEN.into_response())
}

pub async fn redirect(
    State(state): State<Arc<AppState>>,
    maybe_connect_info: MaybeConnectInfo,
    headers: HeaderMap,
    uri: Uri,
) -> Result<Response, AppError> {
    let raw_tail = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or_else(|| uri.path());
    let source = raw_tail.strip_prefix("/r/").unwrap_or(raw_tail);
    let split = rewriter::split_id(source);
    let public_id = split.public_id;
    let suffix = split.suffix;

    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    if state.config.is_hard_blocked_user_agent(&user_agent) {
        return Ok(hard_block());
    }

    let peer_ip = maybe_connect_info.0.map(|addr| addr.ip());
    let client_ip = extract_client_ip(&state.config.ip_header_priority, &headers, peer_ip);
    let ipv4 = client_ip.and_then(|ip| match ip {
        IpAddr::V4(v4) => Some(v4),
        IpAddr::V6(_) => None,
    });

    let outcome = crate::decision::decide(ipv4, &user_agent, &state.blacklist, &state.ip_cache, &state.ip_intel)
        .await
        .map_err(AppError::Internal)?;
    let decision = outcome.decision;

    let redirect_row = match state.redirect_cache.get(public_id).await {
        Lookup::Found(r) => r,
        Lookup::Stale(r) => r,
        Lookup::NotFound => return Err(AppError::NotFound),
        Lookup::StoreUnavailable => return Ok(found(&state.config.fallback_url)),
    };

    if !redirect_row.enabled {
        return Err(AppError::Gone);
    }

    let is_bot = decision.classification.is_bot();
    let destination = if is_bot { &redirect_row.bot_url } else { &redirect_row.human_url };
    let rewritten = rewriter::rewrite(destination, suffix, is_bot, state.config.email_base64_decode_enabled);

    let ip_string = client_ip.map(|ip| ip.to_string()).unwrap_or_else(|| "unknown".to_string());
    let now = Utc::now();

    let visitor_log = VisitorLog {
        id: Uuid::new_v4().to_string(),
        redirect_id: Some(redirect_row.id.clone()),
        ip: ip_string.clone(),
        country: None,
        city: None,
        isp: None,
        ua: user_agent.clone(),
        browser: outcome.ua_info.browser.clone(),
        device: outcome.ua_info.device_type.clone(),
        classification: decision.classification,
        trust_level: decision.trust,
        reason: decision.reason.clone(),
        redirected_to: rewritten.location.clone(),
        ts: now,
    };

    let realtime_event = RealtimeEvent {
        id: Uuid::new_v4().to_string(),
        redirect_id: Some(redirect_row.id.clone()),
        ip: ip_string.clone(),
        country: None,
        city: None,
        isp: None,
        ua: user_agent,
        browser: outcome.ua_info.browser,
        device: outcome.ua_info.device_type,
        classification: decision.classification,
        trust_level: decision.trust,
        reason: decision.reason,
        ts: now,
    };

    let captured_email = rewritten.captured_email.map(|email| CapturedEmail {
        id: Uuid::new_v4().to_string(),
        email,
        parameter_format: rewriter::parameter_format_for(suffix).to_string(),
        redirect_id: redirect_row.id.clone(),
        ip: ip_string,
        country: None,
        ts: now,
    });

    if state.logger.enqueue(visitor_log, realtime_event, captured_email).await {
        let logger = Arc::clone(&state.logger);
        tokio::spawn(async move { logger.flush_all().await });
    }

    // Counters are eventually consistent with the logger (spec.md §3); fire
    // and forget so a slow store write never delays the redirect itself.
    let store = Arc::clone(&state.store);
    let redirect_id = redirect_row.id;
    tokio::spawn(async move {
        if let Err(e) = store.increment_redirect_counters(&redirect_id, is_bot).await {
            tracing::warn!(error = %e, redirect_id, "failed to increment redirect counters");
        }
    });

    Ok(found(&rewritten.location))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blacklist::CidrBlacklist;
    use cloakgate_core::config::{Config, Ip2LocationRegion};
    use cloakgate_core::entities::Redirect;
    use cloakgate_store::MemoryStore;

    fn test_config() -> Config {
        Config {
            port: 3000,
            public_url: "http://localhost:3000".to_string(),
            database_url: "postgres://localhost/test".to_string(),
            db_pool_size: 5,
            db_pool_acquire_timeout_ms: 500,
            data_dir: std::env::temp_dir().to_string_lossy().to_string(),
            cidr_snapshot_debounce_ms: 2_000,
            redirect_cache_ttl_secs: 300,
            redirect_cache_sweep_interval_secs: 60,
            write_behind_interval_ms: 2_000,
            write_behind_batch_size: 100,
            write_behind_immediate_flush_multiplier: 2,
            write_behind_requeue_max: 10,
            ip2location_api_key: "test-key".to_string(),
            ip2location_region: Ip2LocationRegion::Us,
            ip_intel_timeout_ms: 50,
            fallback_url: "https://example.com/fallback".to_string(),
            ip_header_priority: vec!["X-Forwarded-For".to_string()],
            email_base64_decode_enabled: false,
            visitor_log_retention_days: 7,
            realtime_event_cap: 1_000,
            dispatcher_hard_block_signatures: vec!["sqlmap".to_string()],
        }
    }

    fn test_state() -> Arc<AppState> {
        let store = Arc::new(MemoryStore::new());
        store.seed_redirect(Redirect {
            id: "rdr_abc".to_string(),
            public_id: "abc".to_string(),
            human_url: "https://landing.example.com/".to_string(),
            bot_url: "https://ads.example.com/".to_string(),
            enabled: true,
            owner_id: "owner_1".to_string(),
            total: 0,
            human: 0,
            bot: 0,
        });
        let blacklist_path = std::env::temp_dir().join(format!("cloakgate-redirect-test-{}.json", Uuid::new_v4()));
        let blacklist = CidrBlacklist::load(blacklist_path).unwrap();
        let mut state = AppState::new(store, test_config(), blacklist);
        // Point the IP intelligence client at a closed port rather than the
        // real provider, so Stage 2 fails open deterministically and tests
        // never depend on network access.
        state.ip_intel = Arc::new(crate::ip_intel_client::IpIntelClient::new(
            "127.0.0.1:1",
            "test-key".to_string(),
            std::time::Duration::from_millis(200),
        ));
        Arc::new(state)
    }

    #[tokio::test]
    async fn hard_blocked_ua_gets_403_without_touching_the_decision_engine() {
        let state = test_state();
        let headers = {
            let mut h = HeaderMap::new();
            h.insert(header::USER_AGENT, HeaderValue::from_static("sqlmap/1.7.2"));
            h
        };
        let response = redirect(
            State(state),
            MaybeConnectInfo(None),
            headers,
            "/r/abc".parse().unwrap(),
        )
        .await
        .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn missing_redirect_is_a_404() {
        let state = test_state();
        let err = redirect(
            State(state),
            MaybeConnectInfo(None),
            HeaderMap::new(),
            "/r/does-not-exist".parse().unwrap(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::NotFound));
    }

    #[tokio::test]
    async fn disabled_redirect_is_a_410() {
        let state = test_state();
        state.store.seed_redirect(Redirect {
            id: "rdr_dead".to_string(),
            public_id: "dead".to_string(),
            human_url: "https://landing.example.com/".to_string(),
            bot_url: "https://ads.example.com/".to_string(),
            enabled: false,
            owner_id: "owner_1".to_string(),
            total: 0,
            human: 0,
            bot: 0,
        });
        let err = redirect(
            State(state),
            MaybeConnectInfo(None),
            HeaderMap::new(),
            "/r/dead".parse().unwrap(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Gone));
    }

    #[tokio::test]
    async fn bot_ua_is_redirected_to_the_bot_destination_with_email_stripped() {
        let state = test_state();
        let headers = {
            let mut h = HeaderMap::new();
            h.insert(header::USER_AGENT, HeaderValue::from_static("curl/8.5.0"));
            h
        };
        let response = redirect(
            State(Arc::clone(&state)),
            MaybeConnectInfo(None),
            headers,
            "/r/abc?email=x@y.io".parse().unwrap(),
        )
        .await
        .unwrap();
        assert_eq!(response.status(), StatusCode::FOUND);
        let location = response.headers().get(header::LOCATION).unwrap().to_str().unwrap();
        assert_eq!(location, "https://ads.example.com/");
        assert_eq!(response.headers().get("x-robots-tag").unwrap(), ANTI_CRAWLER_ROBOTS_TAG);
    }

    #[tokio::test]
    async fn human_browser_is_redirected_to_the_human_destination_with_email_preserved() {
        let state = test_state();
        let headers = {
            let mut h = HeaderMap::new();
            h.insert(
                header::USER_AGENT,
                HeaderValue::from_static(
                    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15) AppleWebKit/605.1.15 Safari/605.1.15",
                ),
            );
            h
        };
        let response = redirect(
            State(Arc::clone(&state)),
            MaybeConnectInfo(None),
            headers,
            "/r/abc?email=x@y.io".parse().unwrap(),
        )
        .await
        .unwrap();
        assert_eq!(response.status(), StatusCode::FOUND);
        let location = response.headers().get(header::LOCATION).unwrap().to_str().unwrap();
        assert_eq!(location, "https://landing.example.com/?email=x@y.io");
    }
}
