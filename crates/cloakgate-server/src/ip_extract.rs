//! IP Extractor (spec.md §4.1): derive one public client IP from layered
//! proxy headers. Pure function over a header-name lookup closure so it is
//! testable without building a real `axum::HeaderMap`.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use axum::http::HeaderMap;

/// Vendor-specific header tried after the configured priority list but
/// before giving up and looking at `X-Forwarded-For` tail entries.
const VENDOR_FALLBACK_HEADERS: &[&str] = &["X-Envoy-External-Address", "X-Zeabur-Client-IP"];

fn is_private(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || *v4 == Ipv4Addr::UNSPECIFIED
        }
        IpAddr::V6(v6) => v6.is_loopback() || is_unique_local_v6(v6),
    }
}

fn is_unique_local_v6(v6: &Ipv6Addr) -> bool {
    (v6.segments()[0] & 0xfe00) == 0xfc00
}

/// Strip a `::ffff:a.b.c.d` IPv4-mapped prefix (spec.md §4.1) and return the
/// plain `IpAddr` it represents.
fn unwrap_mapped(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map(IpAddr::V4).unwrap_or(IpAddr::V6(v6)),
        other => other,
    }
}

fn parse_candidate(raw: &str) -> Option<IpAddr> {
    let trimmed = raw.trim().trim_start_matches('[');
    // Header values occasionally carry a trailing `:port` on an IPv4
    // candidate; strip it if present before attempting to parse. IPv6
    // addresses never reach here with a bracketed port in this header set,
    // so a single `:` split is safe for the common case.
    let candidate = match trimmed.rsplit_once(':') {
        Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) && host.contains('.') => {
            host
        }
        _ => trimmed,
    };
    let candidate = candidate.trim_end_matches(']');
    candidate.parse::<IpAddr>().ok().map(unwrap_mapped)
}

/// Try every header in `header_priority`, in order, returning the first
/// public (non-private, non-loopback) address found. `X-Forwarded-For` is
/// treated specially: it may carry a comma-separated chain, and the first
/// non-private entry in the chain is used (spec.md §4.1).
pub fn extract_ip<'a>(
    header_priority: &[String],
    lookup: impl Fn(&str) -> Option<&'a str>,
    peer: Option<IpAddr>,
) -> Option<IpAddr> {
    for header in header_priority {
        let Some(raw) = lookup(header) else { continue };
        if header.eq_ignore_ascii_case("x-forwarded-for") {
            for entry in raw.split(',') {
                if let Some(ip) = parse_candidate(entry) {
                    if !is_private(&ip) {
                        return Some(ip);
                    }
                }
            }
        } else if let Some(ip) = parse_candidate(raw) {
            if !is_private(&ip) {
                return Some(ip);
            }
        }
    }

    for header in VENDOR_FALLBACK_HEADERS {
        if let Some(raw) = lookup(header) {
            if let Some(ip) = parse_candidate(raw) {
                if !is_private(&ip) {
                    return Some(ip);
                }
            }
        }
    }

    peer.filter(|ip| !is_private(ip))
}

/// Convenience wrapper over [`extract_ip`] for real Axum requests.
pub fn extract_client_ip(header_priority: &[String], headers: &HeaderMap, peer: Option<IpAddr>) -> Option<IpAddr> {
    extract_ip(header_priority, |name| headers.get(name).and_then(|v| v.to_str().ok()), peer)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn priority() -> Vec<String> {
        vec![
            "CF-Connecting-IP".to_string(),
            "True-Client-IP".to_string(),
            "X-Real-IP".to_string(),
            "X-Forwarded-For".to_string(),
        ]
    }

    #[test]
    fn prefers_cf_connecting_ip_over_everything_else() {
        let ip = extract_ip(
            &priority(),
            |h| match h {
                "CF-Connecting-IP" => Some("203.0.113.7"),
                "X-Forwarded-For" => Some("198.51.100.9"),
                _ => None,
            },
            None,
        );
        assert_eq!(ip, Some("203.0.113.7".parse().unwrap()));
    }

    #[test]
    fn skips_private_header_value_and_tries_next_header() {
        let ip = extract_ip(
            &priority(),
            |h| match h {
                "CF-Connecting-IP" => Some("10.0.0.5"),
                "X-Real-IP" => Some("203.0.113.7"),
                _ => None,
            },
            None,
        );
        assert_eq!(ip, Some("203.0.113.7".parse().unwrap()));
    }

    #[test]
    fn takes_first_public_entry_in_x_forwarded_for_chain() {
        let ip = extract_ip(
            &priority(),
            |h| match h {
                "X-Forwarded-For" => Some("10.0.0.1, 203.0.113.7, 198.51.100.9"),
                _ => None,
            },
            None,
        );
        assert_eq!(ip, Some("203.0.113.7".parse().unwrap()));
    }

    #[test]
    fn strips_ipv4_mapped_prefix() {
        let ip = extract_ip(
            &priority(),
            |h| match h {
                "X-Real-IP" => Some("::ffff:203.0.113.7"),
                _ => None,
            },
            None,
        );
        assert_eq!(ip, Some("203.0.113.7".parse().unwrap()));
    }

    #[test]
    fn falls_back_to_peer_address_when_no_headers_present() {
        let peer: IpAddr = "203.0.113.7".parse().unwrap();
        let ip = extract_ip(&priority(), |_| None, Some(peer));
        assert_eq!(ip, Some(peer));
    }

    #[test]
    fn localhost_peer_never_resolves_to_a_classifiable_ip() {
        let peer: IpAddr = "127.0.0.1".parse().unwrap();
        let ip = extract_ip(&priority(), |_| None, Some(peer));
        assert_eq!(ip, None);
    }
}
