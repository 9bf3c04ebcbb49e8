//! Push-delivery target hardening.
//!
//! A delivery endpoint is attacker-supplied input that the provider will
//! POST to from inside its own network. Before any push, the URL must pass
//! this guard: http(s) scheme only, and no loopback, private-range, or
//! link-local targets unless the deployment explicitly allows them (local
//! development against a callback server on 127.0.0.1).
//!
//! Only literal addresses and the `localhost` name are checked; resolution
//! of other hostnames is left to the deployment's egress policy.

use std::net::{Ipv4Addr, Ipv6Addr};
use url::{Host, Url};

use crate::error::ProviderError;

/// Validate a push-delivery target.
pub fn validate_delivery_url(url: &Url, allow_private: bool) -> Result<(), ProviderError> {
    match url.scheme() {
        "http" | "https" => {}
        other => {
            return Err(ProviderError::InvalidDeliveryUrl(format!(
                "scheme '{other}' is not allowed"
            )));
        }
    }
    if allow_private {
        return Ok(());
    }
    let Some(host) = url.host() else {
        return Err(ProviderError::InvalidDeliveryUrl(
            "URL has no host".to_string(),
        ));
    };
    match host {
        Host::Domain(domain) => {
            if domain.eq_ignore_ascii_case("localhost") {
                return Err(ProviderError::InvalidDeliveryUrl(
                    "loopback host is not allowed".to_string(),
                ));
            }
        }
        Host::Ipv4(address) => {
            if is_forbidden_ipv4(address) {
                return Err(ProviderError::InvalidDeliveryUrl(format!(
                    "address {address} is not routable from this provider"
                )));
            }
        }
        Host::Ipv6(address) => {
            if is_forbidden_ipv6(address) {
                return Err(ProviderError::InvalidDeliveryUrl(format!(
                    "address {address} is not routable from this provider"
                )));
            }
        }
    }
    Ok(())
}

fn is_forbidden_ipv4(address: Ipv4Addr) -> bool {
    let [a, b, _, _] = address.octets();
    a == 127
        || a == 10
        || (a == 172 && (16..=31).contains(&b))
        || (a == 192 && b == 168)
        || (a == 169 && b == 254)
        || a == 0
}

fn is_forbidden_ipv6(address: Ipv6Addr) -> bool {
    address.is_loopback() || address.is_unspecified()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(url: &str, allow_private: bool) -> Result<(), ProviderError> {
        validate_delivery_url(&Url::parse(url).unwrap(), allow_private)
    }

    #[test]
    fn test_public_targets_pass() {
        assert!(check("https://client.example.com/ivxp/callback", false).is_ok());
        assert!(check("http://203.0.113.10:8080/cb", false).is_ok());
        assert!(check("https://8.8.8.8/cb", false).is_ok());
    }

    #[test]
    fn test_scheme_allowlist() {
        assert!(check("ftp://example.com/cb", false).is_err());
        assert!(check("file:///etc/passwd", false).is_err());
        // Scheme stays enforced even in dev mode.
        assert!(check("gopher://127.0.0.1/cb", true).is_err());
    }

    #[test]
    fn test_loopback_rejected() {
        assert!(check("http://localhost:9000/cb", false).is_err());
        assert!(check("http://LOCALHOST/cb", false).is_err());
        assert!(check("http://127.0.0.1/cb", false).is_err());
        assert!(check("http://127.8.8.8/cb", false).is_err());
        assert!(check("http://[::1]/cb", false).is_err());
    }

    #[test]
    fn test_private_ranges_rejected() {
        assert!(check("http://10.0.0.5/cb", false).is_err());
        assert!(check("http://172.16.0.1/cb", false).is_err());
        assert!(check("http://172.31.255.255/cb", false).is_err());
        assert!(check("http://192.168.1.1/cb", false).is_err());
        assert!(check("http://169.254.169.254/metadata", false).is_err());
        assert!(check("http://0.1.2.3/cb", false).is_err());
        // 172.32.x is outside the private block.
        assert!(check("http://172.32.0.1/cb", false).is_ok());
    }

    #[test]
    fn test_dev_flag_allows_private() {
        assert!(check("http://127.0.0.1:9000/cb", true).is_ok());
        assert!(check("http://localhost:9000/cb", true).is_ok());
        assert!(check("http://192.168.1.1/cb", true).is_ok());
    }
}
