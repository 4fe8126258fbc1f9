//! Decision Engine (spec.md §4.3): composes the blacklist, the UA
//! classifier, and the IP-intelligence client into one verdict per request,
//! strictly ordered S0 -> S1 -> S2, feeding BOT convictions back into the
//! blacklist and IP cache before returning.

use std::net::Ipv4Addr;
use std::sync::Arc;

use cloakgate_core::useragent::{self, UaInfo};
use cloakgate_core::Decision;

use crate::blacklist::CidrBlacklist;
use crate::ip_cache::IpCache;
use crate::ip_intel_client::IpIntelClient;

pub struct DecisionOutcome {
    pub decision: Decision,
    pub ua_info: UaInfo,
}

/// Run the full S0 -> S1 -> S2 pipeline for one request. `ip` is `None` when
/// the IP extractor could not find a public address (e.g. a loopback-only
/// test harness); such requests skip S0/S2 and are judged on UA alone, same
/// as any other IP the blacklist and cache have never seen.
pub async fn decide(
    ip: Option<Ipv4Addr>,
    user_agent: &str,
    blacklist: &CidrBlacklist,
    ip_cache: &IpCache,
    ip_intel: &IpIntelClient,
) -> anyhow::Result<DecisionOutcome> {
    // S0: blacklist.
    if let Some(ip) = ip {
        if let Some(entry) = blacklist.contains(ip) {
            let decision = Decision::bot(0, format!("blacklist:{}", entry.cidr));
            return Ok(DecisionOutcome {
                decision,
                ua_info: UaInfo::default(),
            });
        }
    }

    // S1: user agent.
    let ua_info = match useragent::classify(user_agent) {
        useragent::Stage1Outcome::Bot(decision) => {
            if let Some(ip) = ip {
                convict(ip, &decision, blacklist, ip_cache).await?;
            }
            return Ok(DecisionOutcome {
                decision,
                ua_info: UaInfo::default(),
            });
        }
        useragent::Stage1Outcome::Continue(ua_info) => ua_info,
    };

    // S2: IP intelligence, via the cache first.
    let Some(ip) = ip else {
        // No extractable public IP: fail open rather than call an external
        // provider with nothing to look up.
        return Ok(DecisionOutcome {
            decision: cloakgate_core::ip_intel::lookup_failed(),
            ua_info,
        });
    };

    if let Some(cached) = ip_cache.get(&ip.to_string()).await? {
        let decision = Decision::bot(2, cached.reason.clone());
        return Ok(DecisionOutcome { decision, ua_info });
    }

    let decision = ip_intel.classify(&ip.to_string()).await;
    if decision.classification.is_bot() {
        convict(ip, &decision, blacklist, ip_cache).await?;
    }

    Ok(DecisionOutcome { decision, ua_info })
}

/// Common feedback loop for any non-S0 BOT terminal (spec.md §4.3: "On every
/// BOT terminal except S0 the engine calls IPCache.put(bot) and
/// CIDRBlacklist.add(ip, decision) before returning"). This also covers the
/// design note's retained Stage-1 behavior: a UA-only conviction still earns
/// a /32 blacklist entry and an IP-cache row.
async fn convict(
    ip: Ipv4Addr,
    decision: &Decision,
    blacklist: &CidrBlacklist,
    ip_cache: &IpCache,
) -> anyhow::Result<()> {
    ip_cache.put(&ip.to_string(), decision).await?;
    blacklist.add(ip, decision)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloakgate_store::MemoryStore;
    use std::time::Duration;

    fn blacklist() -> CidrBlacklist {
        CidrBlacklist::load(std::env::temp_dir().join(format!(
            "cloakgate-decision-test-{}.json",
            uuid::Uuid::new_v4()
        )))
        .unwrap()
    }

    fn unreachable_ip_intel() -> IpIntelClient {
        IpIntelClient::new("127.0.0.1:1", "test-key".to_string(), Duration::from_millis(100))
    }

    #[tokio::test]
    async fn blacklisted_ip_short_circuits_at_stage0() {
        let blacklist = blacklist();
        let ip_cache = IpCache::new(Arc::new(MemoryStore::new()));
        let ip: Ipv4Addr = "203.0.113.77".parse().unwrap();
        blacklist
            .add(ip, &Decision::bot_with_usage_type(2, "DATACENTER_USAGE_TYPE", cloakgate_core::UsageType::Dch))
            .unwrap();

        let outcome = decide(
            Some("203.0.113.99".parse().unwrap()),
            "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15) AppleWebKit/605.1.15 Safari/605.1.15",
            &blacklist,
            &ip_cache,
            &unreachable_ip_intel(),
        )
        .await
        .unwrap();

        assert!(outcome.decision.classification.is_bot());
        assert_eq!(outcome.decision.stage, 0);
    }

    #[tokio::test]
    async fn curl_is_convicted_at_stage1_and_auto_blacklisted() {
        let blacklist = blacklist();
        let ip_cache = IpCache::new(Arc::new(MemoryStore::new()));
        let ip: Ipv4Addr = "198.51.100.9".parse().unwrap();

        let outcome = decide(Some(ip), "curl/8.5.0", &blacklist, &ip_cache, &unreachable_ip_intel())
            .await
            .unwrap();

        assert!(outcome.decision.classification.is_bot());
        assert_eq!(outcome.decision.stage, 1);
        assert!(blacklist.contains(ip).is_some());
        assert!(ip_cache.get(&ip.to_string()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn real_browser_with_failed_provider_is_human_low_trust() {
        let blacklist = blacklist();
        let ip_cache = IpCache::new(Arc::new(MemoryStore::new()));
        let ip: Ipv4Addr = "198.51.100.20".parse().unwrap();

        let outcome = decide(
            Some(ip),
            "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
            &blacklist,
            &ip_cache,
            &unreachable_ip_intel(),
        )
        .await
        .unwrap();

        assert!(!outcome.decision.classification.is_bot());
        assert_eq!(outcome.decision.reason, "IP_LOOKUP_FAILED");
        assert_eq!(outcome.decision.trust, cloakgate_core::TrustLevel::Low);
    }
}
