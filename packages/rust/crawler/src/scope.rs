//! URL admission: scheme and SSRF checks plus link priority scoring.

use std::net::IpAddr;

use url::Url;

use lexcrawl_shared::{LexCrawlError, Result, TargetKind};

/// Decides which URLs the crawler may request.
#[derive(Debug, Clone, Copy, Default)]
pub struct UrlGuard {
    allow_private_hosts: bool,
}

impl UrlGuard {
    pub fn new(allow_private_hosts: bool) -> Self {
        Self {
            allow_private_hosts,
        }
    }

    /// Reject non-HTTP schemes and, unless allowed, private or loopback hosts.
    pub fn check(&self, url: &Url) -> Result<()> {
        match url.scheme() {
            "http" | "https" => {}
            other => {
                return Err(LexCrawlError::permanent(
                    url.as_str(),
                    format!("disallowed scheme '{other}'"),
                ));
            }
        }
        if url.host_str().is_none() {
            return Err(LexCrawlError::permanent(url.as_str(), "missing host"));
        }
        if !self.allow_private_hosts && is_ssrf_target(url) {
            return Err(LexCrawlError::permanent(
                url.as_str(),
                "private or loopback host blocked",
            ));
        }
        Ok(())
    }
}

/// Check if a URL targets a potentially dangerous resource.
pub fn is_ssrf_target(url: &Url) -> bool {
    match url.scheme() {
        "http" | "https" => {}
        _ => return true,
    }

    match url.host() {
        Some(url::Host::Ipv4(v4)) => is_private_ip(&IpAddr::V4(v4)),
        Some(url::Host::Ipv6(v6)) => is_private_ip(&IpAddr::V6(v6)),
        Some(url::Host::Domain(host)) => {
            host == "localhost" || host.ends_with(".local") || host.ends_with(".internal")
        }
        None => true,
    }
}

/// Check if an IP is in a private/reserved range.
fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_unspecified()
                // 100.64.0.0/10 (Carrier-grade NAT)
                || (v4.octets()[0] == 100 && (v4.octets()[1] & 0xC0) == 64)
                // 192.0.0.0/24
                || (v4.octets()[0] == 192 && v4.octets()[1] == 0 && v4.octets()[2] == 0)
        }
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || v6.is_unspecified()
                // fc00::/7 unique local
                || (v6.segments()[0] & 0xfe00) == 0xfc00
                // fe80::/10 link local
                || (v6.segments()[0] & 0xffc0) == 0xfe80
        }
    }
}

/// Frontier priority score; lower is fetched first.
///
/// `depth * 10 + path_segments * 5`, with listing pages pulled forward by 20
/// so that pagination keeps feeding the queue.
pub fn priority_score(url: &Url, depth: u32, kind: TargetKind) -> i64 {
    let segments = url
        .path_segments()
        .map(|s| s.filter(|seg| !seg.is_empty()).count())
        .unwrap_or(0) as i64;

    let mut score = i64::from(depth) * 10 + segments * 5;
    if kind == TargetKind::Listing {
        score -= 20;
    }
    score
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_file_scheme() {
        let url = Url::parse("file:///etc/passwd").unwrap();
        assert!(is_ssrf_target(&url));
        assert!(UrlGuard::new(true).check(&url).is_err());
    }

    #[test]
    fn blocks_private_ips() {
        for raw in [
            "http://192.168.1.1/admin",
            "http://10.0.0.1/",
            "http://127.0.0.1:8080/",
            "http://[::1]/",
            "http://localhost:3000/api",
        ] {
            let url = Url::parse(raw).unwrap();
            assert!(is_ssrf_target(&url), "{raw} should be blocked");
        }
    }

    #[test]
    fn allows_public_hosts() {
        let url = Url::parse("https://law.example.ir/laws/1").unwrap();
        assert!(!is_ssrf_target(&url));
        assert!(UrlGuard::default().check(&url).is_ok());
    }

    #[test]
    fn guard_can_allow_private_hosts() {
        let url = Url::parse("http://127.0.0.1:9000/laws").unwrap();
        let err = UrlGuard::new(false).check(&url).unwrap_err();
        assert!(!err.is_retryable());
        assert!(UrlGuard::new(true).check(&url).is_ok());
    }

    #[test]
    fn listing_pages_score_lower() {
        let listing = Url::parse("https://law.example.ir/laws?page=2").unwrap();
        let doc = Url::parse("https://law.example.ir/laws/12").unwrap();
        assert_eq!(priority_score(&listing, 0, TargetKind::Listing), -15);
        assert_eq!(priority_score(&doc, 1, TargetKind::Document), 20);
        assert!(
            priority_score(&listing, 1, TargetKind::Listing)
                < priority_score(&doc, 1, TargetKind::Document)
        );
    }
}
