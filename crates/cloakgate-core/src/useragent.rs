//! Stage 1 of the decision engine: pure-function, signature-based bot
//! detection (spec.md §4.3 S1). No I/O, no state — a UA string in, a verdict
//! (or "keep going to stage 2") out.

use crate::classification::Decision;

/// Headless/automation tooling. Always BOT, reason `HEADLESS_BROWSER`.
const HEADLESS_SIGNATURES: &[&str] = &[
    "headlesschrome",
    "phantomjs",
    "puppeteer",
    "playwright",
    "selenium",
    "electron",
    "jsdom",
    "htmlunit",
];

/// Generic scripts and scraping libraries. Always BOT, reason `GENERIC_BOT`.
const GENERIC_BOT_SIGNATURES: &[&str] = &[
    "bot",
    "crawler",
    "spider",
    "curl/",
    "wget/",
    "python-requests",
    "go-http-client",
    "libwww-perl",
    "urllib",
    "httpclient",
    "scrapy",
    "java/",
    "okhttp",
    "node-fetch",
    "axios/",
    "ahrefsbot",
    "semrushbot",
    "mj12bot",
    "dotbot",
];

/// Link-unfurling / chat-preview fetchers. Always BOT, reason
/// `SOCIAL_PREVIEW_BOT`.
const SOCIAL_PREVIEW_SIGNATURES: &[&str] = &[
    "facebookexternalhit",
    "whatsapp",
    "telegrambot",
    "slackbot",
    "discordbot",
    "twitterbot",
    "linkedinbot",
    "skypeuripreview",
    "vkshare",
    "pinterest",
    "redditbot",
    "embedly",
];

/// Crawlers belonging to a recognised search engine. Always BOT, reason
/// `SEARCH_ENGINE_BOT`.
const SEARCH_ENGINE_SIGNATURES: &[&str] = &[
    "googlebot",
    "bingbot",
    "duckduckbot",
    "yandexbot",
    "baiduspider",
    "applebot",
    "sogou",
    "seznambot",
];

/// Substrings that mark a UA as one of the handful of mainstream desktop/
/// mobile browsers we know well. A match here means the request continues to
/// stage 2 rather than being judged further at stage 1.
const KNOWN_BROWSER_SIGNATURES: &[&str] = &[
    "chrome/",
    "crios/",
    "firefox/",
    "fxios/",
    "safari/",
    "edg/",
    "edge/",
    "opr/",
    "opera",
    "samsungbrowser",
    "ucbrowser",
    "vivaldi",
    "brave",
];

/// Parsed UA fields, carried through regardless of verdict so the dispatcher
/// can log `browser` / `device` on HUMAN verdicts too.
#[derive(Debug, Clone, Default)]
pub struct UaInfo {
    pub browser: Option<String>,
    pub os: Option<String>,
    pub device_type: Option<String>,
}

pub enum Stage1Outcome {
    /// Terminal BOT verdict — the engine stops here.
    Bot(Decision),
    /// Not conclusively a bot — proceed to stage 2, carrying parsed UA info.
    Continue(UaInfo),
}

fn matches_any(haystack: &str, signatures: &[&str]) -> bool {
    signatures.iter().any(|sig| haystack.contains(sig))
}

/// woothee device categories that count as a recognised device type. Anything
/// else (`"crawler"`, `"appliance"`, `"misc"`, or an empty category) is
/// `UNKNOWN_DEVICE`.
fn is_recognised_device_category(category: &str) -> bool {
    matches!(category, "pc" | "smartphone" | "mobilephone" | "tablet")
}

fn device_type_for_category(category: &str) -> &'static str {
    match category {
        "smartphone" | "mobilephone" => "mobile",
        "tablet" => "tablet",
        _ => "desktop",
    }
}

pub fn classify(user_agent: &str) -> Stage1Outcome {
    if user_agent.trim().is_empty() {
        return Stage1Outcome::Bot(Decision::bot(1, "NO_USER_AGENT"));
    }

    let lower = user_agent.to_ascii_lowercase();

    if matches_any(&lower, HEADLESS_SIGNATURES) {
        return Stage1Outcome::Bot(Decision::bot(1, "HEADLESS_BROWSER"));
    }
    if matches_any(&lower, GENERIC_BOT_SIGNATURES) {
        return Stage1Outcome::Bot(Decision::bot(1, "GENERIC_BOT"));
    }
    if matches_any(&lower, SOCIAL_PREVIEW_SIGNATURES) {
        return Stage1Outcome::Bot(Decision::bot(1, "SOCIAL_PREVIEW_BOT"));
    }
    if matches_any(&lower, SEARCH_ENGINE_SIGNATURES) {
        return Stage1Outcome::Bot(Decision::bot(1, "SEARCH_ENGINE_BOT"));
    }

    let parsed = woothee::parser::Parser::new().parse(user_agent);
    let is_known_browser = matches_any(&lower, KNOWN_BROWSER_SIGNATURES);

    let os = parsed.as_ref().map(|r| r.os.to_string()).filter(|os| {
        !os.is_empty() && !os.eq_ignore_ascii_case("unknown")
    });

    if !is_known_browser && os.is_none() {
        return Stage1Outcome::Bot(Decision::bot(1, "UNKNOWN_BROWSER"));
    }

    let category = parsed.as_ref().map(|r| r.category).unwrap_or("");
    if !is_recognised_device_category(category) {
        return Stage1Outcome::Bot(Decision::bot(1, "UNKNOWN_DEVICE"));
    }

    let browser = parsed.as_ref().map(|r| r.name.to_string()).filter(|n| {
        !n.is_empty() && !n.eq_ignore_ascii_case("unknown")
    });

    Stage1Outcome::Continue(UaInfo {
        browser,
        os,
        device_type: Some(device_type_for_category(category).to_string()),
    })
}
