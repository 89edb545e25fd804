//! HTTP client for the intel map
//!
//! Wraps a reqwest client carrying the session cookie and CSRF header, and a
//! governor rate limiter shared by every request made through it.

use async_trait::async_trait;
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use regex::Regex;
use reqwest::{
    header::{
        HeaderMap, HeaderName, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, CONTENT_TYPE, COOKIE, ORIGIN,
        REFERER, USER_AGENT,
    },
    Client,
};
use serde_json::json;
use std::num::NonZeroU32;
use std::sync::OnceLock;
use url::Url;

use super::payload::{decode_entities_response, decode_portal_detail, EntityMap};
use super::MapTransport;
use crate::config::IntelConfig;
use crate::models::PortalDetail;
use crate::utils::error::{EntitiesError, FetchError};
use crate::utils::parse_cookie;

/// Extract the dashboard version the API expects in every request body
pub fn extract_version(html: &str) -> Option<String> {
    static VERSION_RE: OnceLock<Regex> = OnceLock::new();

    let re = VERSION_RE.get_or_init(|| {
        Regex::new(r#"/jsc/gen_dashboard_(\w+)\.js""#).expect("Invalid regex pattern")
    });

    re.captures(html).map(|caps| caps[1].to_string())
}

/// Intel map client with an established session
pub struct IntelClient {
    /// HTTP client with session headers
    client: Client,

    /// Base URL of the intel map
    base_url: Url,

    /// Dashboard version sent as `v`
    version: String,

    /// Rate limiter to control request frequency
    rate_limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
}

impl IntelClient {
    /// Establish a session from the configured cookie
    ///
    /// Loads the intel page once to read the dashboard version. A page
    /// without the version marker means the cookie was rejected.
    ///
    /// # Errors
    ///
    /// Returns `FetchError::SessionExpired` if the cookie lacks a CSRF token
    /// or the dashboard version cannot be found.
    pub async fn connect(config: &IntelConfig, requests_per_second: u32) -> Result<Self, FetchError> {
        let base_url =
            Url::parse(&config.base_url).map_err(|e| FetchError::InvalidUrl(e.to_string()))?;
        let headers = Self::build_headers(config, &base_url)?;

        let mut builder = Client::builder()
            .default_headers(headers)
            .timeout(std::time::Duration::from_secs(config.request_timeout_secs))
            .gzip(true);

        if let Some(proxy) = &config.proxy {
            builder = builder.proxy(reqwest::Proxy::all(proxy)?);
        }
        let client = builder.build()?;

        let page_url = Self::join(&base_url, "intel")?;
        let response = client.get(page_url).send().await.map_err(Self::classify)?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::ServerError(status.as_u16()));
        }
        let page = response.text().await?;

        let version = extract_version(&page).ok_or(FetchError::SessionExpired)?;
        tracing::debug!(version = %version, "Intel session established");

        let rate = NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN);
        let rate_limiter = RateLimiter::direct(Quota::per_second(rate));

        Ok(Self {
            client,
            base_url,
            version,
            rate_limiter,
        })
    }

    /// Dashboard version of the current session
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Build the static headers of a session
    fn build_headers(config: &IntelConfig, base_url: &Url) -> Result<HeaderMap, FetchError> {
        let cookies = parse_cookie(&config.cookie);
        let csrf_token = cookies
            .get("csrftoken")
            .ok_or(FetchError::SessionExpired)?
            .clone();
        let cookie_header = cookies
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("; ");

        let origin = base_url.origin().ascii_serialization();
        let referer = format!("{origin}/intel");

        let value = |s: &str| {
            HeaderValue::from_str(s).map_err(|e| FetchError::Decode(format!("bad header: {e}")))
        };

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.8"));
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/json; charset=UTF-8"),
        );
        headers.insert(USER_AGENT, value(&config.user_agent)?);
        headers.insert(ORIGIN, value(&origin)?);
        headers.insert(REFERER, value(&referer)?);
        headers.insert(COOKIE, value(&cookie_header)?);
        headers.insert(HeaderName::from_static("x-csrftoken"), value(&csrf_token)?);

        Ok(headers)
    }

    fn join(base_url: &Url, path: &str) -> Result<Url, FetchError> {
        base_url
            .join(path)
            .map_err(|e| FetchError::InvalidUrl(e.to_string()))
    }

    fn classify(err: reqwest::Error) -> FetchError {
        if err.is_timeout() {
            FetchError::Timeout
        } else {
            FetchError::Http(err)
        }
    }

    /// POST a JSON body to an `/r/` endpoint and return the raw response text
    async fn post(&self, endpoint: &str, body: serde_json::Value) -> Result<String, FetchError> {
        self.rate_limiter.until_ready().await;

        let url = Self::join(&self.base_url, &format!("r/{endpoint}"))?;
        let response = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(Self::classify)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::ServerError(status.as_u16()));
        }

        response.text().await.map_err(Self::classify)
    }
}

#[async_trait]
impl MapTransport for IntelClient {
    async fn fetch_entities(&self, tile_keys: &[String]) -> Result<EntityMap, EntitiesError> {
        let body = json!({ "v": self.version, "tileKeys": tile_keys });
        let text = self.post("getEntities", body).await?;
        Ok(decode_entities_response(&text)?)
    }

    async fn fetch_portal_detail(&self, guid: &str) -> Result<PortalDetail, FetchError> {
        let body = json!({ "v": self.version, "guid": guid });
        let text = self.post("getPortalDetails", body).await?;
        decode_portal_detail(&text)
    }
}
