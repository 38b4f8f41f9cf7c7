extern crate serde;

use crate::http::requests::Request;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

/// Lookups give up after this long; they are informational only.
pub(crate) const LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
pub(crate) struct PublicIpResponse {
    pub ip: String,
}

pub(crate) struct PublicIp<'a> {
    pub url: &'a Url,
}

impl Request for PublicIp<'_> {
    type Response = PublicIpResponse;

    fn url(&self) -> Url {
        self.url.clone()
    }

    fn timeout(&self) -> Option<Duration> {
        Some(LOOKUP_TIMEOUT)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct GeoTimezone {
    #[serde(default)]
    pub id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct GeoConnection {
    #[serde(default)]
    pub isp: Option<String>,
    #[serde(default)]
    pub org: Option<String>,
}

/// Geolocation record. The service reports `success: false` with a
/// `message` instead of an error status when it cannot resolve an address.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct GeoResponse {
    #[serde(default = "default_success")]
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub timezone: Option<GeoTimezone>,
    #[serde(default)]
    pub connection: Option<GeoConnection>,
}

fn default_success() -> bool {
    true
}

impl GeoResponse {
    pub fn isp(&self) -> Option<&str> {
        let connection = self.connection.as_ref()?;
        connection.isp.as_deref().or(connection.org.as_deref())
    }
}

pub(crate) struct GeoLookup<'a> {
    pub base: &'a Url,
    pub ip: &'a str,
}

impl Request for GeoLookup<'_> {
    type Response = GeoResponse;

    fn url(&self) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(self.ip);
        }
        url
    }

    fn timeout(&self) -> Option<Duration> {
        Some(LOOKUP_TIMEOUT)
    }
}
