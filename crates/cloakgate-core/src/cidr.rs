//! CIDR math for the blacklist's auto-widening rule (spec.md §4.2). The
//! actual containment structure (a radix trie over these networks) lives in
//! the server crate; this module only knows how to turn one convicted IP
//! into the canonical network row that gets stored.

use std::net::Ipv4Addr;

use ipnet::Ipv4Net;

use crate::error::CoreError;

/// Widen a single convicted IPv4 address to its canonical blacklist network:
/// the address truncated to `prefix` bits, expressed as a network (not host)
/// address. `prefix` must be 0..=32.
pub fn widen(ip: Ipv4Addr, prefix: u8) -> Result<Ipv4Net, CoreError> {
    Ipv4Net::new(ip, prefix)
        .map(|net| net.trunc())
        .map_err(|_| CoreError::InvalidCidr(format!("{ip}/{prefix}")))
}

/// Parse a canonical `a.b.c.d/prefix` string as stored in the blacklist.
pub fn parse(cidr: &str) -> Result<Ipv4Net, CoreError> {
    cidr.parse::<Ipv4Net>()
        .map_err(|_| CoreError::InvalidCidr(cidr.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn widen_to_slash24_truncates_host_bits() {
        let net = widen(Ipv4Addr::new(203, 0, 113, 77), 24).unwrap();
        assert_eq!(net.to_string(), "203.0.113.0/24");
    }

    #[test]
    fn widen_to_slash32_keeps_the_full_address() {
        let net = widen(Ipv4Addr::new(203, 0, 113, 77), 32).unwrap();
        assert_eq!(net.to_string(), "203.0.113.77/32");
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(parse("not-a-cidr").is_err());
    }

    #[test]
    fn parse_round_trips_a_widened_network() {
        let net = widen(Ipv4Addr::new(198, 51, 100, 9), 24).unwrap();
        let reparsed = parse(&net.to_string()).unwrap();
        assert_eq!(net, reparsed);
    }
}
