//! Shared classification vocabulary: what a request was decided to be, why,
//! and how much the decision should be trusted.

use serde::{Deserialize, Serialize};

/// Final verdict for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Human,
    Bot,
}

impl Classification {
    pub fn is_bot(self) -> bool {
        matches!(self, Classification::Bot)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Classification::Human => "human",
            Classification::Bot => "bot",
        }
    }
}

/// Coarse confidence annotation attached to a verdict. Only ever meaningful
/// on HUMAN verdicts; BOT verdicts carry `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustLevel {
    High,
    Low,
    None,
}

impl TrustLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            TrustLevel::High => "high",
            TrustLevel::Low => "low",
            TrustLevel::None => "none",
        }
    }
}

/// IP2Location `usage_type` taxonomy (spec.md §4.2 / §4.3). `Unknown` carries
/// the raw string so operators can see exactly what the provider returned.
///
/// Parsed from the provider's plain-text field via [`UsageType::parse`];
/// serialized back to storage via [`UsageType::as_str`]. Not derived via
/// serde because `Unknown(String)` doesn't round-trip through a tagged enum
/// the way storage wants (a single TEXT column).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UsageType {
    Dch,
    Ses,
    Rsv,
    Cdn,
    Isp,
    Mob,
    Com,
    Org,
    Edu,
    Gov,
    Mil,
    Lib,
    Unknown(String),
}

impl UsageType {
    pub fn parse(raw: &str) -> Self {
        match raw.to_ascii_uppercase().as_str() {
            "DCH" => UsageType::Dch,
            "SES" => UsageType::Ses,
            "RSV" => UsageType::Rsv,
            "CDN" => UsageType::Cdn,
            "ISP" => UsageType::Isp,
            "MOB" => UsageType::Mob,
            "COM" => UsageType::Com,
            "ORG" => UsageType::Org,
            "EDU" => UsageType::Edu,
            "GOV" => UsageType::Gov,
            "MIL" => UsageType::Mil,
            "LIB" => UsageType::Lib,
            other => UsageType::Unknown(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            UsageType::Dch => "DCH",
            UsageType::Ses => "SES",
            UsageType::Rsv => "RSV",
            UsageType::Cdn => "CDN",
            UsageType::Isp => "ISP",
            UsageType::Mob => "MOB",
            UsageType::Com => "COM",
            UsageType::Org => "ORG",
            UsageType::Edu => "EDU",
            UsageType::Gov => "GOV",
            UsageType::Mil => "MIL",
            UsageType::Lib => "LIB",
            UsageType::Unknown(raw) => raw.as_str(),
        }
    }

    /// The auto-widening prefix width this usage type earns when the engine
    /// convicts an IP (spec.md §4.2 table). Datacenter-flavoured types are
    /// blocked a whole /24 at a time; consumer ISP space and anything
    /// unrecognised is blocked one IP at a time.
    pub fn blacklist_prefix(&self) -> u8 {
        match self {
            UsageType::Dch | UsageType::Ses | UsageType::Rsv | UsageType::Cdn => 24,
            _ => 32,
        }
    }
}

/// Outcome of the decision engine for a single request.
#[derive(Debug, Clone)]
pub struct Decision {
    pub classification: Classification,
    /// Pipeline stage that produced the terminal verdict: 0 = blacklist,
    /// 1 = user-agent, 2 = IP intelligence, 3 = default-allow.
    pub stage: u8,
    pub reason: String,
    pub trust: TrustLevel,
    /// Set only when stage 2 convicted the IP; drives CIDR auto-widening and
    /// the IP-cache write. `None` for stage 0/1 terminals and HUMAN verdicts.
    pub usage_type: Option<UsageType>,
}

impl Decision {
    pub fn bot(stage: u8, reason: impl Into<String>) -> Self {
        Decision {
            classification: Classification::Bot,
            stage,
            reason: reason.into(),
            trust: TrustLevel::None,
            usage_type: None,
        }
    }

    pub fn bot_with_usage_type(stage: u8, reason: impl Into<String>, usage_type: UsageType) -> Self {
        Decision {
            classification: Classification::Bot,
            stage,
            reason: reason.into(),
            trust: TrustLevel::None,
            usage_type: Some(usage_type),
        }
    }

    pub fn human(stage: u8, reason: impl Into<String>, trust: TrustLevel) -> Self {
        Decision {
            classification: Classification::Human,
            stage,
            reason: reason.into(),
            trust,
            usage_type: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn datacenter_usage_types_get_slash24() {
        for raw in ["DCH", "SES", "RSV", "CDN"] {
            assert_eq!(UsageType::parse(raw).blacklist_prefix(), 24);
        }
    }

    #[test]
    fn consumer_and_unknown_usage_types_get_slash32() {
        for raw in ["ISP", "MOB", "COM", "ORG", "EDU", "GOV", "MIL", "LIB", "WEIRD"] {
            assert_eq!(UsageType::parse(raw).blacklist_prefix(), 32);
        }
    }
}
