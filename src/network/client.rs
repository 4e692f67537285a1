//! HTTP client for forwarding requests to the remote origin

use std::time::Duration;

use bytes::BytesMut;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method};
use tracing::{debug, warn};

use crate::config::Config;
use crate::storage::{Headers, SerializableRequest, SerializableResponse};
use crate::{ReelError, Result};

/// Forwards captured requests to the one configured origin
pub struct UpstreamClient {
    client: Client,
    base_url: String,
    forward_headers: Vec<String>,
    forward_body: bool,
    max_response_size: usize,
}

impl UpstreamClient {
    /// Create a client for the configured remote origin
    ///
    /// # Errors
    ///
    /// Returns error if no remote URL is configured or the client cannot be built
    pub fn new(config: &Config) -> Result<Self> {
        let base_url = config
            .remote_base()
            .ok_or_else(|| ReelError::ConfigError("remote_url is not set".to_string()))?
            .to_string();

        let timeout = Duration::from_millis(config.upstream.timeout_ms);
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(10)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| ReelError::ConfigError(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url,
            forward_headers: config.upstream.forward_headers.clone(),
            forward_body: config.upstream.forward_body,
            max_response_size: config.limits.max_response_size,
        })
    }

    /// Origin base URL
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Send an equivalent request to the origin and buffer its full response
    ///
    /// # Errors
    ///
    /// Returns `UpstreamUnavailable` on transport failure or timeout,
    /// `DataTooLarge` if the response body exceeds the limit
    pub async fn fetch(&self, request: &SerializableRequest) -> Result<SerializableResponse> {
        let url = build_url(&self.base_url, &request.uri);
        let method = Method::from_bytes(request.method.as_bytes()).map_err(|e| {
            ReelError::InvalidRequest(format!("Invalid HTTP method '{}': {e}", request.method))
        })?;

        debug!("Forwarding {} to {}", method, url);

        let mut outbound = self
            .client
            .request(method, &url)
            .headers(self.outbound_headers(request));
        if self.forward_body && !request.body.is_empty() {
            outbound = outbound.body(request.body.clone());
        }

        let mut response = outbound.send().await.map_err(|e| {
            warn!("Upstream request failed: {e}");
            ReelError::UpstreamUnavailable(format!("{url}: {e}"))
        })?;

        let status = response.status().as_u16();
        let headers = capture_headers(response.headers());

        if let Some(length) = response.content_length() {
            if length > self.max_response_size as u64 {
                return Err(ReelError::DataTooLarge {
                    size: length as usize,
                    limit: self.max_response_size,
                });
            }
        }

        let mut body = BytesMut::new();
        while let Some(chunk) = response.chunk().await.map_err(|e| {
            warn!("Failed to read upstream body: {e}");
            ReelError::UpstreamUnavailable(format!("{url}: failed to read body: {e}"))
        })? {
            let received = body.len() + chunk.len();
            if received > self.max_response_size {
                return Err(ReelError::DataTooLarge {
                    size: received,
                    limit: self.max_response_size,
                });
            }
            body.extend_from_slice(&chunk);
        }

        Ok(SerializableResponse {
            status,
            headers,
            body: body.freeze(),
        })
    }

    /// Inbound headers selected for forwarding
    fn outbound_headers(&self, request: &SerializableRequest) -> HeaderMap {
        let mut headers = HeaderMap::new();

        for name in &self.forward_headers {
            let Some(values) = request.headers.get(name) else {
                continue;
            };
            let Ok(header_name) = HeaderName::from_bytes(name.as_bytes()) else {
                warn!("Skipping invalid forward header name '{name}'");
                continue;
            };
            for value in values {
                match HeaderValue::from_str(value) {
                    Ok(value) => {
                        headers.append(header_name.clone(), value);
                    }
                    Err(_) => warn!("Skipping invalid value for header '{name}'"),
                }
            }
        }

        headers
    }
}

/// Join the origin base URL and the inbound path/query
fn build_url(base_url: &str, uri: &str) -> String {
    if uri.starts_with('/') {
        format!("{base_url}{uri}")
    } else {
        format!("{base_url}/{uri}")
    }
}

/// Response headers in arrival order, grouped by name
fn capture_headers(headers: &HeaderMap) -> Headers {
    headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect()
}
