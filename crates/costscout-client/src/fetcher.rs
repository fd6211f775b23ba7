use std::sync::Arc;
use std::time::Duration;

use costscout_core::config::SourceConfig;
use costscout_core::error::AppError;
use costscout_core::models::FetchedPage;
use costscout_core::traits::Fetcher;
use reqwest::Client;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use url::Url;

/// HTTP fetcher using reqwest, configured from a [`SourceConfig`].
///
/// Each request carries a user agent picked from the source's list, the
/// source's extra headers and browser-like `Accept` headers. Non-2xx
/// responses come back as pages so the anti-bot detector can classify them;
/// only transport failures are errors.
#[derive(Clone)]
pub struct ReqwestFetcher {
    client: Client,
    config: Arc<SourceConfig>,
    timeout: Duration,
}

impl ReqwestFetcher {
    pub fn new() -> Result<Self, AppError> {
        Self::from_config(&SourceConfig::default())
    }

    pub fn from_config(config: &SourceConfig) -> Result<Self, AppError> {
        let timeout = config.effective_timeout();
        let mut builder = Client::builder()
            .timeout(timeout)
            .default_headers(default_headers(config)?);

        // Without an explicit proxy, connect directly; environment proxies are ignored.
        builder = match config.proxy.as_deref() {
            Some(proxy) => {
                let proxy = reqwest::Proxy::all(proxy)
                    .map_err(|e| AppError::ConfigError(format!("Invalid proxy '{proxy}': {e}")))?;
                builder.proxy(proxy)
            }
            None => builder.no_proxy(),
        };

        let client = builder
            .build()
            .map_err(|e| AppError::ConfigError(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            config: Arc::new(config.clone()),
            timeout,
        })
    }
}

fn default_headers(config: &SourceConfig) -> Result<HeaderMap, AppError> {
    let mut headers = HeaderMap::new();
    headers.insert(
        ACCEPT,
        HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
    );
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));

    for (name, value) in &config.extra_headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| AppError::ConfigError(format!("Invalid header name '{name}': {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| AppError::ConfigError(format!("Invalid value for header '{name}': {e}")))?;
        headers.insert(name, value);
    }
    Ok(headers)
}

impl Fetcher for ReqwestFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, AppError> {
        validate_url(url)?;

        let user_agent = self.config.effective_user_agent();
        tracing::debug!(%url, %user_agent, "Fetching");

        let response = self
            .client
            .get(url)
            .header(USER_AGENT, user_agent)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AppError::Timeout(self.timeout.as_secs())
                } else if e.is_connect() {
                    AppError::FetchError(format!("Connection failed: {e}"))
                } else {
                    AppError::FetchError(e.to_string())
                }
            })?;

        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let body = response
            .text()
            .await
            .map_err(|e| AppError::FetchError(format!("Failed to read response body: {e}")))?;

        tracing::debug!(url = %final_url, status, bytes = body.len(), "Fetched");
        Ok(FetchedPage::new(final_url, status, body))
    }
}

/// Only `http` and `https` URLs with a host are fetched.
fn validate_url(url: &str) -> Result<(), AppError> {
    let parsed =
        Url::parse(url).map_err(|e| AppError::ConfigError(format!("Invalid URL '{url}': {e}")))?;

    match parsed.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(AppError::ConfigError(format!(
                "URL scheme '{scheme}' is not allowed (only http/https)"
            )));
        }
    }

    if parsed.host_str().is_none_or(str::is_empty) {
        return Err(AppError::ConfigError(format!("URL '{url}' has no host")));
    }
    Ok(())
}
