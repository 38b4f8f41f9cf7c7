//! Public IP and geolocation lookup.
//!
//! Purely informational: any failure degrades the affected fields to
//! [`UNAVAILABLE`] and never fails the measurement.

use crate::http::client::Client;
use crate::http::requests::lookup::{GeoLookup, GeoResponse, PublicIp};
use log::{debug, warn};
use serde::Serialize;

pub const UNAVAILABLE: &str = "Unavailable";

/// Where the client appears to be on the network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkInfo {
    pub ip: String,
    pub country: String,
    pub city: String,
    pub region: String,
    pub timezone: String,
    pub isp: String,
}

impl NetworkInfo {
    pub fn unavailable() -> Self {
        Self {
            ip: UNAVAILABLE.to_string(),
            country: UNAVAILABLE.to_string(),
            city: UNAVAILABLE.to_string(),
            region: UNAVAILABLE.to_string(),
            timezone: UNAVAILABLE.to_string(),
            isp: UNAVAILABLE.to_string(),
        }
    }

    /// Merge whatever the two lookups produced.
    ///
    /// A geo record flagged `success: false` is treated as missing.
    pub(crate) fn from_lookups(ip: Option<String>, geo: Option<GeoResponse>) -> Self {
        let geo = geo.filter(|g| g.success).unwrap_or_default();
        let or_unavailable =
            |value: Option<&str>| value.unwrap_or(UNAVAILABLE).to_string();

        Self {
            ip: ip.unwrap_or_else(|| UNAVAILABLE.to_string()),
            country: or_unavailable(geo.country.as_deref()),
            city: or_unavailable(geo.city.as_deref()),
            region: or_unavailable(geo.region.as_deref()),
            timezone: or_unavailable(
                geo.timezone.as_ref().and_then(|t| t.id.as_deref()),
            ),
            isp: or_unavailable(geo.isp()),
        }
    }

    pub fn is_available(&self) -> bool {
        self.ip != UNAVAILABLE
    }
}

/// Look up the public IP, then geolocate it.
pub async fn lookup(client: &Client) -> NetworkInfo {
    let urls = client.urls();

    let ip = match client.send(PublicIp { url: &urls.public_ip }).await {
        Ok(response) => Some(response.ip),
        Err(e) => {
            warn!("Public IP lookup failed: {}", e.message);
            None
        }
    };

    let geo = match ip.as_deref() {
        Some(ip) => match client.send(GeoLookup { base: &urls.geo, ip }).await {
            Ok(geo) => {
                if !geo.success {
                    debug!(
                        "Geolocation unavailable: {}",
                        geo.message.as_deref().unwrap_or("no reason given")
                    );
                }
                Some(geo)
            }
            Err(e) => {
                warn!("Geolocation lookup failed: {}", e.message);
                None
            }
        },
        None => None,
    };

    NetworkInfo::from_lookups(ip, geo)
}
