//! Provider configuration.
//!
//! Configuration is an explicit record threaded through the builder; there
//! are no process-wide defaults. The server binary loads it from the
//! environment (`.env` values are read at startup):
//!
//! - `IVXP_PRIVATE_KEY` — provider wallet key, `0x` + 64 hex chars (required)
//! - `IVXP_RPC_URL` — EVM RPC endpoint (required unless a payment service is injected)
//! - `IVXP_NETWORK` — `base-sepolia` (default) or `base-mainnet`
//! - `HOST` — bind address, default `127.0.0.1`
//! - `PORT` — bind port, default `3001`; `0` asks the OS for one
//! - `IVXP_PROVIDER_NAME` — display name, default `IVXP Provider`
//! - `IVXP_ALLOW_PRIVATE_DELIVERY_URLS` — dev-only SSRF override, default off

use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use url::Url;

use ivxp_types::amount::UsdcAmount;
use ivxp_types::network::Network;

use crate::error::ProviderError;

/// Upper bound on a service's base price, in whole USDC.
const MAX_BASE_PRICE_USDC: u64 = 1_000_000;
/// Upper bound on estimated delivery, in hours (one year).
const MAX_DELIVERY_HOURS: u32 = 8760;

/// One service the provider advertises and quotes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceDefinition {
    /// The service type key clients request by.
    #[serde(rename = "type")]
    pub service_type: String,
    /// Quoted price.
    pub base_price_usdc: UsdcAmount,
    /// Estimated hours until delivery; bounds the quoted ETA.
    pub estimated_delivery_hours: u32,
    /// Human-readable description for the catalog.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ServiceDefinition {
    /// Check price and delivery-hour bounds.
    pub fn validate(&self) -> Result<(), ProviderError> {
        if self.service_type.is_empty() {
            return Err(ProviderError::InvalidConfig(
                "service type must not be empty".to_string(),
            ));
        }
        if self.base_price_usdc > UsdcAmount::from_usdc(MAX_BASE_PRICE_USDC) {
            return Err(ProviderError::InvalidConfig(format!(
                "base price for '{}' exceeds {MAX_BASE_PRICE_USDC} USDC",
                self.service_type
            )));
        }
        if self.estimated_delivery_hours == 0 || self.estimated_delivery_hours > MAX_DELIVERY_HOURS
        {
            return Err(ProviderError::InvalidConfig(format!(
                "estimated delivery hours for '{}' must be in (0, {MAX_DELIVERY_HOURS}]",
                self.service_type
            )));
        }
        Ok(())
    }
}

/// Everything a provider runtime needs to start.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    /// Provider wallet private key, `0x` + 64 hex chars.
    pub private_key: String,
    /// Advertised services.
    pub services: Vec<ServiceDefinition>,
    /// Settlement network.
    #[serde(default = "config_defaults::network")]
    pub network: Network,
    /// EVM RPC endpoint for on-chain verification.
    #[serde(default)]
    pub rpc_url: Option<Url>,
    /// Bind address.
    #[serde(default = "config_defaults::host")]
    pub host: IpAddr,
    /// Bind port; `0` asks the OS for one.
    #[serde(default = "config_defaults::port")]
    pub port: u16,
    /// Display name in catalogs and quotes.
    #[serde(default = "config_defaults::provider_name")]
    pub provider_name: String,
    /// Allow loopback/private push targets. Development only.
    #[serde(default)]
    pub allow_private_delivery_urls: bool,
}

mod config_defaults {
    use super::*;

    pub fn network() -> Network {
        Network::BaseSepolia
    }

    pub fn host() -> IpAddr {
        IpAddr::from([127, 0, 0, 1])
    }

    pub fn port() -> u16 {
        3001
    }

    pub fn provider_name() -> String {
        "IVXP Provider".to_string()
    }
}

impl ProviderConfig {
    /// A config with defaults for everything but the key and services.
    pub fn new(private_key: impl Into<String>, services: Vec<ServiceDefinition>) -> Self {
        ProviderConfig {
            private_key: private_key.into(),
            services,
            network: config_defaults::network(),
            rpc_url: None,
            host: config_defaults::host(),
            port: config_defaults::port(),
            provider_name: config_defaults::provider_name(),
            allow_private_delivery_urls: false,
        }
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ProviderError> {
        let private_key = std::env::var("IVXP_PRIVATE_KEY")
            .map_err(|_| ProviderError::InvalidConfig("IVXP_PRIVATE_KEY is not set".to_string()))?;
        let rpc_url = match std::env::var("IVXP_RPC_URL") {
            Ok(raw) => Some(Url::parse(&raw).map_err(|e| {
                ProviderError::InvalidConfig(format!("IVXP_RPC_URL is not a URL: {e}"))
            })?),
            Err(_) => None,
        };
        let network = match std::env::var("IVXP_NETWORK") {
            Ok(raw) => raw
                .parse()
                .map_err(|e| ProviderError::InvalidConfig(format!("{e}")))?,
            Err(_) => config_defaults::network(),
        };
        let host = match std::env::var("HOST") {
            Ok(raw) => raw
                .parse()
                .map_err(|_| ProviderError::InvalidConfig("HOST is not an IP".to_string()))?,
            Err(_) => config_defaults::host(),
        };
        let port = match std::env::var("PORT") {
            Ok(raw) => raw
                .parse()
                .map_err(|_| ProviderError::InvalidConfig("PORT is not a number".to_string()))?,
            Err(_) => config_defaults::port(),
        };
        let provider_name =
            std::env::var("IVXP_PROVIDER_NAME").unwrap_or_else(|_| config_defaults::provider_name());
        let allow_private_delivery_urls = std::env::var("IVXP_ALLOW_PRIVATE_DELIVERY_URLS")
            .map(|raw| raw == "1" || raw.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        Ok(ProviderConfig {
            private_key,
            services: Vec::new(),
            network,
            rpc_url,
            host,
            port,
            provider_name,
            allow_private_delivery_urls,
        })
    }

    /// Add an advertised service.
    pub fn with_service(mut self, service: ServiceDefinition) -> Self {
        self.services.push(service);
        self
    }

    /// Check the whole config; called by the builder before startup.
    pub fn validate(&self) -> Result<(), ProviderError> {
        for service in &self.services {
            service.validate()?;
        }
        Ok(())
    }

    /// Look up an advertised service by type.
    pub fn service(&self, service_type: &str) -> Option<&ServiceDefinition> {
        self.services
            .iter()
            .find(|s| s.service_type == service_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn echo_service() -> ServiceDefinition {
        ServiceDefinition {
            service_type: "echo".to_string(),
            base_price_usdc: UsdcAmount::from_usdc(5),
            estimated_delivery_hours: 1,
            description: None,
        }
    }

    #[test]
    fn test_defaults() {
        let config = ProviderConfig::new("0xkey", vec![echo_service()]);
        assert_eq!(config.network, Network::BaseSepolia);
        assert_eq!(config.port, 3001);
        assert_eq!(config.host, IpAddr::from([127, 0, 0, 1]));
        assert_eq!(config.provider_name, "IVXP Provider");
        assert!(!config.allow_private_delivery_urls);
    }

    #[test]
    fn test_service_bounds() {
        let mut service = echo_service();
        assert!(service.validate().is_ok());

        service.estimated_delivery_hours = 0;
        assert!(service.validate().is_err());
        service.estimated_delivery_hours = 8761;
        assert!(service.validate().is_err());
        service.estimated_delivery_hours = 8760;
        assert!(service.validate().is_ok());

        service.base_price_usdc = UsdcAmount::from_usdc(1_000_001);
        assert!(service.validate().is_err());
        service.base_price_usdc = UsdcAmount::from_usdc(1_000_000);
        assert!(service.validate().is_ok());
        service.base_price_usdc = UsdcAmount::ZERO;
        assert!(service.validate().is_ok());
    }

    #[test]
    fn test_lookup() {
        let config = ProviderConfig::new("0xkey", vec![echo_service()]);
        assert!(config.service("echo").is_some());
        assert!(config.service("translate").is_none());
    }
}
