use std::sync::Arc;

use cloakgate_core::config::Config;

use crate::blacklist::CidrBlacklist;
use crate::ip_cache::IpCache;
use crate::ip_intel_client::IpIntelClient;
use crate::logger::WriteBehindLogger;
use crate::redirect_cache::RedirectCache;

/// Shared application state injected into every Axum handler via
/// [`axum::extract::State`], mirroring the teacher's `AppState`: heavy
/// resources wrapped in `Arc` so the struct itself is cheap to clone.
pub struct AppState {
    pub store: Arc<dyn cloakgate_store::RedirectStore>,
    pub config: Arc<Config>,
    pub blacklist: Arc<CidrBlacklist>,
    pub ip_cache: Arc<IpCache>,
    pub redirect_cache: Arc<RedirectCache>,
    pub ip_intel: Arc<IpIntelClient>,
    pub logger: Arc<WriteBehindLogger>,
}

impl AppState {
    pub fn new(store: Arc<dyn cloakgate_store::RedirectStore>, config: Config, blacklist: CidrBlacklist) -> Self {
        let config = Arc::new(config);
        let ip_cache = Arc::new(IpCache::new(Arc::clone(&store)));
        let redirect_cache = Arc::new(RedirectCache::new(Arc::clone(&store), config.redirect_cache_ttl()));
        let ip_intel = Arc::new(IpIntelClient::new(
            config.ip2location_region.api_host(),
            config.ip2location_api_key.clone(),
            config.ip_intel_timeout(),
        ));
        let logger = Arc::new(WriteBehindLogger::new(
            Arc::clone(&store),
            config.write_behind_batch_size,
            config.write_behind_immediate_flush_threshold(),
            config.write_behind_requeue_max,
            config.realtime_event_cap,
        ));

        Self {
            store,
            config,
            blacklist: Arc::new(blacklist),
            ip_cache,
            redirect_cache,
            ip_intel,
            logger,
        }
    }

    /// Spawn every background task this state owns: the write-behind flush
    /// loop, the hot redirect cache sweep, and the CIDR blacklist debounced
    /// snapshot saver (spec.md §4.2, §4.4, §4.7).
    pub fn spawn_background_tasks(self: &Arc<Self>) {
        let logger = Arc::clone(&self.logger);
        let flush_interval = self.config.write_behind_interval();
        tokio::spawn(async move { logger.run_flush_loop(flush_interval).await });

        let redirect_cache = Arc::clone(&self.redirect_cache);
        let sweep_interval = self.config.redirect_cache_sweep_interval();
        tokio::spawn(async move { redirect_cache.run_sweep_loop(sweep_interval).await });

        let blacklist = Arc::clone(&self.blacklist);
        let debounce = std::time::Duration::from_millis(self.config.cidr_snapshot_debounce_ms);
        tokio::spawn(async move { blacklist.run_snapshot_saver(debounce).await });
    }
}
