//! Best-effort geolocation of the host.
//!
//! Lookups never fail: any network, status or parse problem degrades to the
//! all-`None` `LocationInfo`.

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::time::Duration;

use crate::LocationInfo;

pub const DEFAULT_LOCATION_ENDPOINT: &str = "https://ipinfo.io/json";
pub const DEFAULT_LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);

pub trait LocationResolver: Send + Sync {
    fn lookup(&self) -> LocationInfo;
}

/// Resolver that never looks anything up.
#[derive(Clone, Copy, Debug, Default)]
pub struct DisabledLocationResolver;

impl LocationResolver for DisabledLocationResolver {
    fn lookup(&self) -> LocationInfo {
        LocationInfo::unknown()
    }
}

/// Resolver backed by an ipinfo-style JSON endpoint.
pub struct HttpLocationResolver {
    endpoint: String,
    agent: ureq::Agent,
}

impl HttpLocationResolver {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self> {
        let parsed = url::Url::parse(endpoint)
            .with_context(|| format!("invalid location endpoint {}", endpoint))?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(anyhow!(
                "location endpoint must be http(s), got {}",
                parsed.scheme()
            ));
        }
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Ok(Self {
            endpoint: endpoint.to_string(),
            agent,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn fetch(&self) -> Result<LocationInfo> {
        let body = self
            .agent
            .get(&self.endpoint)
            .call()
            .with_context(|| format!("location lookup {}", self.endpoint))?
            .into_string()
            .context("read location response")?;
        parse_location(&body)
    }
}

impl LocationResolver for HttpLocationResolver {
    fn lookup(&self) -> LocationInfo {
        match self.fetch() {
            Ok(location) => location,
            Err(err) => {
                log::debug!("location unavailable: {:#}", err);
                LocationInfo::unknown()
            }
        }
    }
}

#[derive(Deserialize)]
struct IpInfoResponse {
    loc: Option<String>,
    city: Option<String>,
    region: Option<String>,
}

/// Parse an ipinfo-style body: `loc` is `"lat,lon"`; `city` and `region` are
/// copied through. Missing or empty fields become `None`.
pub fn parse_location(body: &str) -> Result<LocationInfo> {
    let response: IpInfoResponse =
        serde_json::from_str(body).context("parse location response")?;

    let (lat, lon) = match response.loc.as_deref().and_then(|loc| loc.split_once(',')) {
        Some((lat, lon)) => (non_empty(lat), non_empty(lon)),
        None => (None, None),
    };

    Ok(LocationInfo {
        lat,
        lon,
        city: response.city.as_deref().and_then(non_empty),
        region: response.region.as_deref().and_then(non_empty),
    })
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}
