//! Stage 2 of the decision engine (spec.md §4.3 S2): the pure rule evaluation
//! applied to whatever the IP-intelligence provider returned. The HTTP call
//! itself — and its timeout/fail-open handling — lives in the server crate;
//! this module only knows how to turn a parsed response into a [`Decision`].

use serde::Deserialize;

use crate::classification::{Decision, TrustLevel, UsageType};

/// Nested `proxy.*` object some provider responses carry
/// `is_residential_proxy` under, instead of (or in addition to) the top
/// level (spec.md §9 open question).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProxyInfo {
    #[serde(default)]
    pub is_residential_proxy: Option<bool>,
}

/// Fields consumed from the IP2Location-shaped response (spec.md §6). Every
/// field is optional: a provider that omits a field must not panic the
/// decision, just fail to match the rule that needed it.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IpIntelResponse {
    #[serde(default)]
    pub country_name: Option<String>,
    #[serde(default)]
    pub country_code: Option<String>,
    #[serde(default)]
    pub region_name: Option<String>,
    #[serde(default)]
    pub city_name: Option<String>,
    #[serde(default)]
    pub isp: Option<String>,
    #[serde(rename = "as", default)]
    pub asn: Option<String>,
    #[serde(default)]
    pub usage_type: Option<String>,
    #[serde(default)]
    pub ads_category_name: Option<String>,
    #[serde(default)]
    pub ads_category: Option<String>,
    #[serde(default)]
    pub proxy_type: Option<String>,
    #[serde(default)]
    pub is_vpn: bool,
    #[serde(default)]
    pub is_data_center: bool,
    #[serde(default)]
    pub is_public_proxy: bool,
    #[serde(default)]
    pub is_web_proxy: bool,
    #[serde(default)]
    pub is_web_crawler: bool,
    #[serde(default)]
    pub is_scanner: bool,
    #[serde(default)]
    pub is_consumer_privacy_network: bool,
    /// Top-level form. Some provider responses nest this under `proxy.*`
    /// instead (see [`ProxyInfo`]) — [`IpIntelResponse::residential_proxy`]
    /// checks both, spec.md §9 preserves the ambiguity rather than guessing.
    #[serde(default)]
    pub is_residential_proxy: Option<bool>,
    #[serde(default)]
    pub proxy: Option<ProxyInfo>,
    /// Stored for reference only — spec.md §4.3 explicit non-rule: must not
    /// influence the verdict.
    #[serde(default)]
    pub fraud_score: Option<f64>,
    /// Also stored for reference only, same non-rule.
    #[serde(default)]
    pub is_proxy: bool,
}

impl IpIntelResponse {
    fn residential_proxy(&self) -> bool {
        self.is_residential_proxy
            .or_else(|| self.proxy.as_ref().and_then(|p| p.is_residential_proxy))
            .unwrap_or(false)
    }

    fn icloud_private_relay(&self) -> bool {
        self.isp
            .as_deref()
            .map(|isp| isp.to_ascii_lowercase().contains("icloud private relay"))
            .unwrap_or(false)
    }

    fn usage_type(&self) -> UsageType {
        self.usage_type
            .as_deref()
            .map(UsageType::parse)
            .unwrap_or_else(|| UsageType::parse("UNKNOWN"))
    }

    fn datacenter_ads_category(&self) -> bool {
        self.ads_category_name
            .as_deref()
            .map(|name| name.eq_ignore_ascii_case("data centers"))
            .unwrap_or(false)
    }
}

/// Apply spec.md §4.3 S2's override rules (first match wins, short-circuits
/// to HUMAN), then its conviction rules (first match wins, short-circuits to
/// BOT). Neither list may be reordered without changing real outcomes.
pub fn evaluate(response: &IpIntelResponse) -> Decision {
    if response.is_consumer_privacy_network {
        return Decision::human(2, "CONSUMER_PRIVACY_NETWORK", TrustLevel::High);
    }
    if response.icloud_private_relay() {
        return Decision::human(2, "ICLOUD_PRIVATE_RELAY", TrustLevel::High);
    }
    if response.proxy_type.as_deref() == Some("RES") {
        return Decision::human(2, "RESIDENTIAL_PROXY_TYPE", TrustLevel::High);
    }
    let usage_type = response.usage_type();
    if response.residential_proxy()
        && matches!(
            usage_type,
            UsageType::Isp
                | UsageType::Mob
                | UsageType::Com
                | UsageType::Org
                | UsageType::Edu
                | UsageType::Gov
                | UsageType::Mil
                | UsageType::Lib
        )
        && !response.is_data_center
        && !response.is_vpn
    {
        return Decision::human(2, "RESIDENTIAL_PROXY_ISP", TrustLevel::Low);
    }

    if matches!(
        usage_type,
        UsageType::Rsv | UsageType::Ses | UsageType::Dch | UsageType::Cdn
    ) {
        return Decision::bot_with_usage_type(2, "DATACENTER_USAGE_TYPE", usage_type);
    }
    if response.datacenter_ads_category() {
        return Decision::bot_with_usage_type(2, "DATA_CENTER_ADS_CATEGORY", usage_type);
    }
    if response.proxy_type.as_deref() == Some("DCH")
        || response.is_vpn
        || response.is_data_center
        || response.is_public_proxy
        || response.is_web_proxy
        || response.is_web_crawler
        || response.is_scanner
    {
        return Decision::bot_with_usage_type(2, "PROXY_OR_CRAWLER_SIGNAL", usage_type);
    }

    Decision::human(2, "IP_LOOKUP_CLEAN", TrustLevel::None)
}

/// The fail-open verdict used when the Stage-2 call itself fails or times
/// out (spec.md §4.3 S3, §5, §7): never punish a real user for a provider
/// outage.
pub fn lookup_failed() -> Decision {
    Decision::human(2, "IP_LOOKUP_FAILED", TrustLevel::Low)
}
