//! Client address resolution behind trusted proxies.
//!
//! Forwarding headers are honoured only when the direct peer sits inside one
//! of the trusted subnets; everyone else is identified by the socket address.

use std::net::{IpAddr, SocketAddr};

use axum::http::HeaderMap;
use ipnet::IpNet;

/// Forwarding headers in lookup order, after `Forwarded`.
const FORWARDING_HEADERS: [&str; 4] = [
    "x-forwarded-for",
    "x-real-ip",
    "true-client-ip",
    "cf-connecting-ip",
];

#[derive(Debug, Clone, Default)]
pub struct TrustedResolver {
    subnets: Vec<IpNet>,
}

impl TrustedResolver {
    /// An empty subnet list trusts every peer.
    pub fn new(subnets: Vec<IpNet>) -> Self {
        Self { subnets }
    }

    pub fn is_trusted(&self, ip: IpAddr) -> bool {
        self.subnets.is_empty() || self.subnets.iter().any(|net| net.contains(&ip))
    }

    /// Remote address reported to the worker.
    pub fn resolve(&self, headers: &HeaderMap, peer: SocketAddr) -> String {
        let peer_ip = peer.ip().to_canonical();
        if !self.is_trusted(peer_ip) {
            return peer_ip.to_string();
        }
        forwarded_address(headers).unwrap_or_else(|| peer_ip.to_string())
    }
}

/// First client address announced by forwarding headers.
pub fn forwarded_address(headers: &HeaderMap) -> Option<String> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
    };

    if let Some(address) = header("forwarded").and_then(forwarded_for) {
        return Some(address);
    }

    FORWARDING_HEADERS.iter().find_map(|name| {
        let value = header(name)?;
        let first = match value.split_once(", ") {
            Some((first, _)) => first,
            None => value,
        };
        Some(first.trim().to_owned()).filter(|address| !address.is_empty())
    })
}

/// `for=` parameter of an RFC 7239 `Forwarded` header.
fn forwarded_for(value: &str) -> Option<String> {
    let lower = value.to_ascii_lowercase();
    let start = lower.find("for=")? + "for=".len();
    let address: String = value[start..]
        .chars()
        .take_while(|c| !matches!(c, ';' | ',' | ' ' | '(' | ')' | '|'))
        .collect();
    let address = address.trim_matches('"');
    (!address.is_empty()).then(|| address.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn header_map(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in pairs {
            headers.insert(*name, HeaderValue::from_static(value));
        }
        headers
    }

    fn peer(ip: &str) -> SocketAddr {
        SocketAddr::new(ip.parse().unwrap(), 5555)
    }

    fn private() -> TrustedResolver {
        TrustedResolver::new(vec!["10.0.0.0/8".parse().unwrap(), "::1/128".parse().unwrap()])
    }

    #[test]
    fn forwarded_header_wins() {
        let headers = header_map(&[
            ("forwarded", "for=\"192.0.2.60\";proto=http;by=203.0.113.43"),
            ("x-forwarded-for", "198.51.100.1"),
        ]);
        assert_eq!(private().resolve(&headers, peer("10.1.2.3")), "192.0.2.60");
    }

    #[test]
    fn x_forwarded_for_takes_first_entry() {
        let headers = header_map(&[("x-forwarded-for", "203.0.113.195, 70.41.3.18, 150.172.238.178")]);
        assert_eq!(private().resolve(&headers, peer("10.1.2.3")), "203.0.113.195");
    }

    #[test]
    fn falls_through_header_order() {
        let headers = header_map(&[("true-client-ip", "198.51.100.7"), ("cf-connecting-ip", "198.51.100.8")]);
        assert_eq!(private().resolve(&headers, peer("::1")), "198.51.100.7");

        let headers = header_map(&[("x-real-ip", "198.51.100.9")]);
        assert_eq!(private().resolve(&headers, peer("10.0.0.1")), "198.51.100.9");
    }

    #[test]
    fn untrusted_peer_ignores_headers() {
        let headers = header_map(&[("x-real-ip", "198.51.100.9")]);
        assert_eq!(private().resolve(&headers, peer("203.0.113.5")), "203.0.113.5");
    }

    #[test]
    fn empty_subnet_list_trusts_everyone() {
        let headers = header_map(&[("x-real-ip", "198.51.100.9")]);
        let resolver = TrustedResolver::new(Vec::new());
        assert_eq!(resolver.resolve(&headers, peer("203.0.113.5")), "198.51.100.9");
        assert_eq!(resolver.resolve(&HeaderMap::new(), peer("203.0.113.5")), "203.0.113.5");
    }
}
