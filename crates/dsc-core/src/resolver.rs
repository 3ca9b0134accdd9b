//! Domain shape and routability checks.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use tracing::debug;

pub const DEFAULT_DOH_URL: &str = "https://cloudflare-dns.com/dns-query";

/// Answers whether a domain resolves to a globally routable address.
#[async_trait]
pub trait DomainResolver: Send + Sync {
    async fn resolve(&self, domain: &str) -> bool;
}

fn domain_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(concat!(
            r"^(([a-zA-Z]{1})|([a-zA-Z]{1}[a-zA-Z]{1})|",
            r"([a-zA-Z]{1}[0-9]{1})|([0-9]{1}[a-zA-Z]{1})|",
            r"([a-zA-Z0-9][-_.a-zA-Z0-9]{0,61}[a-zA-Z0-9]))\.",
            r"([a-zA-Z]{2,13}|[a-zA-Z0-9-]{2,30}.[a-zA-Z]{2,3})$"
        ))
        .expect("domain pattern is valid")
    })
}

/// Whether `domain` is shaped like a hostname.
pub fn is_domain_name(domain: &str) -> bool {
    domain_pattern().is_match(domain)
}

/// Shape check first, DNS lookup only for well-formed names.
pub async fn validate_domain(resolver: &dyn DomainResolver, domain: &str) -> bool {
    is_domain_name(domain) && resolver.resolve(domain).await
}

#[derive(Debug, Deserialize)]
pub struct DohAnswer {
    pub data: String,
}

/// JSON body of a DNS-over-HTTPS query.
#[derive(Debug, Deserialize)]
pub struct DohResponse {
    #[serde(rename = "Status")]
    pub status: i64,
    #[serde(rename = "Answer", default)]
    pub answer: Vec<DohAnswer>,
}

/// Routable when the query succeeded and the last answer is a global IP.
pub fn routable_from_response(response: &DohResponse) -> bool {
    if response.status != 0 {
        return false;
    }
    response
        .answer
        .last()
        .and_then(|a| a.data.parse::<IpAddr>().ok())
        .map(|ip| is_global_ip(&ip))
        .unwrap_or(false)
}

/// Resolver querying a DNS-over-HTTPS JSON endpoint for `A` records.
pub struct DohResolver {
    inner: reqwest::Client,
    url: String,
}

impl DohResolver {
    pub fn new(url: &str) -> Self {
        Self {
            inner: reqwest::Client::new(),
            url: url.to_string(),
        }
    }

    async fn query(&self, domain: &str) -> reqwest::Result<DohResponse> {
        self.inner
            .get(&self.url)
            .header("accept", "application/dns-json")
            .query(&[("type", "A"), ("name", domain)])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
    }
}

impl Default for DohResolver {
    fn default() -> Self {
        Self::new(DEFAULT_DOH_URL)
    }
}

#[async_trait]
impl DomainResolver for DohResolver {
    async fn resolve(&self, domain: &str) -> bool {
        match self.query(domain).await {
            Ok(response) => routable_from_response(&response),
            Err(e) => {
                debug!(domain, error = %e, "DNS lookup failed");
                false
            }
        }
    }
}

pub fn is_global_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_global_v4(v4),
        IpAddr::V6(v6) => is_global_v6(v6),
    }
}

fn is_global_v4(ip: &Ipv4Addr) -> bool {
    let [a, b, ..] = ip.octets();
    !(ip.is_private()
        || ip.is_loopback()
        || ip.is_link_local()
        || ip.is_broadcast()
        || ip.is_documentation()
        || ip.is_unspecified()
        || a == 0
        // shared address space 100.64.0.0/10
        || (a == 100 && (b & 0b1100_0000) == 64)
        // benchmarking 198.18.0.0/15
        || (a == 198 && (b & 0xfe) == 18)
        // protocol assignments 192.0.0.0/24
        || (a == 192 && b == 0 && ip.octets()[2] == 0)
        // reserved 240.0.0.0/4
        || a >= 240)
}

fn is_global_v6(ip: &Ipv6Addr) -> bool {
    let segments = ip.segments();
    if let Some(v4) = ip.to_ipv4_mapped() {
        return is_global_v4(&v4);
    }
    !(ip.is_loopback()
        || ip.is_unspecified()
        || ip.is_multicast()
        // unique local fc00::/7
        || (segments[0] & 0xfe00) == 0xfc00
        // link local fe80::/10
        || (segments[0] & 0xffc0) == 0xfe80
        // documentation 2001:db8::/32
        || (segments[0] == 0x2001 && segments[1] == 0x0db8))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(status: i64, answers: &[&str]) -> DohResponse {
        DohResponse {
            status,
            answer: answers
                .iter()
                .map(|d| DohAnswer {
                    data: d.to_string(),
                })
                .collect(),
        }
    }

    struct Always(bool);

    #[async_trait]
    impl DomainResolver for Always {
        async fn resolve(&self, _domain: &str) -> bool {
            self.0
        }
    }

    #[test]
    fn domain_shape() {
        assert!(is_domain_name("example.com"));
        assert!(is_domain_name("sub.example.co.uk"));
        assert!(is_domain_name("a.io"));
        assert!(!is_domain_name("invalid_domain"));
        assert!(!is_domain_name("not-a-valid-domain"));
        assert!(!is_domain_name(""));
        assert!(!is_domain_name("-bad.com"));
    }

    #[test]
    fn routable_global_answer() {
        assert!(routable_from_response(&response(0, &["93.184.216.34"])));
    }

    #[test]
    fn dns_status_failure() {
        assert!(!routable_from_response(&response(3, &["93.184.216.34"])));
    }

    #[test]
    fn no_answer() {
        assert!(!routable_from_response(&response(0, &[])));
    }

    #[test]
    fn last_answer_decides() {
        assert!(!routable_from_response(&response(
            0,
            &["93.184.216.34", "192.168.1.1"]
        )));
        assert!(routable_from_response(&response(
            0,
            &["cdn.example.net.", "93.184.216.34"]
        )));
        assert!(!routable_from_response(&response(0, &["cdn.example.net."])));
    }

    #[test]
    fn missing_answer_field_deserializes() {
        let parsed: DohResponse = serde_json::from_str(r#"{"Status": 3}"#).unwrap();
        assert_eq!(parsed.status, 3);
        assert!(parsed.answer.is_empty());
    }

    #[test]
    fn global_ips() {
        for ip in ["93.184.216.34", "8.8.8.8", "2606:4700:4700::1111"] {
            assert!(is_global_ip(&ip.parse().unwrap()), "{ip} should be global");
        }
        for ip in [
            "192.168.1.1",
            "10.0.0.1",
            "172.16.5.4",
            "127.0.0.1",
            "169.254.1.1",
            "100.64.0.1",
            "198.18.0.1",
            "192.0.2.1",
            "0.0.0.0",
            "255.255.255.255",
            "::1",
            "fd00::1",
            "fe80::1",
            "2001:db8::1",
            "::ffff:192.168.1.1",
        ] {
            assert!(!is_global_ip(&ip.parse().unwrap()), "{ip} should not be global");
        }
    }

    #[tokio::test]
    async fn validate_skips_lookup_for_malformed_names() {
        assert!(!validate_domain(&Always(true), "invalid_domain").await);
        assert!(validate_domain(&Always(true), "example.com").await);
        assert!(!validate_domain(&Always(false), "example.com").await);
    }
}
