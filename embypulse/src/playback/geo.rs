//! Best-effort IP geolocation.

use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::Result;
use crate::error::Error;

pub const LOCAL_NETWORK: &str = "Local network";
pub const UNKNOWN_LOCATION: &str = "Unknown location";

const IP_API_BASE: &str = "http://ip-api.com/json";
const LOOKUP_TIMEOUT: Duration = Duration::from_secs(3);

#[async_trait]
pub trait GeoLocator: Send + Sync {
    /// Human-readable location for a public address.
    async fn locate(&self, ip: IpAddr) -> Result<String>;
}

/// Location label for a `RemoteEndPoint` value. Never fails.
pub async fn describe_address(locator: &dyn GeoLocator, address: Option<&str>) -> String {
    let Some(ip) = address.and_then(parse_endpoint) else {
        return match address.map(str::trim).filter(|a| !a.is_empty()) {
            None => LOCAL_NETWORK.to_string(),
            Some(_) => UNKNOWN_LOCATION.to_string(),
        };
    };
    if ip.is_loopback() || ip.is_unspecified() {
        return LOCAL_NETWORK.to_string();
    }

    match tokio::time::timeout(LOOKUP_TIMEOUT, locator.locate(ip)).await {
        Ok(Ok(location)) if !location.trim().is_empty() => location,
        Ok(Ok(_)) => UNKNOWN_LOCATION.to_string(),
        Ok(Err(e)) => {
            debug!(%ip, error = %e, "Geolocation failed");
            UNKNOWN_LOCATION.to_string()
        }
        Err(_) => {
            debug!(%ip, "Geolocation timed out");
            UNKNOWN_LOCATION.to_string()
        }
    }
}

/// Parse `1.2.3.4`, `1.2.3.4:8096`, `[::1]:8096` or a bare IPv6 address.
fn parse_endpoint(raw: &str) -> Option<IpAddr> {
    let raw = raw.trim();
    if let Ok(ip) = raw.parse::<IpAddr>() {
        return Some(ip);
    }
    if let Ok(addr) = raw.parse::<std::net::SocketAddr>() {
        return Some(addr.ip());
    }
    raw.rsplit_once(':')
        .and_then(|(host, _)| host.trim_matches(['[', ']']).parse().ok())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IpApiResponse {
    status: String,
    #[serde(default)]
    country: String,
    #[serde(default)]
    region_name: String,
    #[serde(default)]
    city: String,
}

/// ip-api.com lookups.
pub struct IpApiLocator {
    client: Client,
    base: String,
}

impl IpApiLocator {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            base: IP_API_BASE.to_string(),
        }
    }
}

#[async_trait]
impl GeoLocator for IpApiLocator {
    async fn locate(&self, ip: IpAddr) -> Result<String> {
        let response: IpApiResponse = self
            .client
            .get(format!("{}/{}", self.base, ip))
            .timeout(LOOKUP_TIMEOUT)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if response.status != "success" {
            return Err(Error::malformed(format!("ip-api status {}", response.status)));
        }

        Ok([response.country, response.region_name, response.city]
            .into_iter()
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(" "))
    }
}
