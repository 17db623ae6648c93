//! Plain HTTP executor
//!
//! Fetches a page with a single GET request, following up to ten redirects.
//! Only HTML and JSON bodies are accepted.

use super::{FetchOptions, Method, PageKind, RawPage, StrategyExecutor};
use crate::{KumoError, Result};
use async_trait::async_trait;
use reqwest::{redirect::Policy, Client, StatusCode};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use url::Url;

const MAX_REDIRECTS: usize = 10;

/// Builds the HTTP client shared by the static and API executors
///
/// The per-request timeout comes from the session configuration; the client
/// only bounds connection setup.
pub fn build_http_client(user_agent: &str) -> std::result::Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(user_agent)
        .connect_timeout(Duration::from_secs(10))
        .redirect(Policy::limited(MAX_REDIRECTS))
        .gzip(true)
        .brotli(true)
        .build()
}

/// Classifies a transport-level reqwest error
pub(crate) fn network_error(url: &Url, error: reqwest::Error) -> KumoError {
    if error.is_timeout() {
        KumoError::Timeout {
            url: url.to_string(),
        }
    } else if error.is_redirect() {
        KumoError::Network {
            url: url.to_string(),
            reason: format!("too many redirects (limit {})", MAX_REDIRECTS),
            status: None,
        }
    } else if error.is_connect() {
        KumoError::Network {
            url: url.to_string(),
            reason: "connection refused".to_string(),
            status: None,
        }
    } else {
        KumoError::Network {
            url: url.to_string(),
            reason: error.to_string(),
            status: error.status().map(|s| s.as_u16()),
        }
    }
}

/// Maps a Content-Type header to the payload kinds the extractor understands
pub(crate) fn page_kind(content_type: &str) -> Option<PageKind> {
    let content_type = content_type.to_ascii_lowercase();
    if content_type.is_empty()
        || content_type.contains("text/html")
        || content_type.contains("application/xhtml")
    {
        Some(PageKind::Html)
    } else if content_type.contains("json") {
        Some(PageKind::Json)
    } else {
        None
    }
}

pub(crate) fn header_map(headers: &reqwest::header::HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
        })
        .collect()
}

/// Applies auth headers and cookies to a request
pub(crate) fn decorate(
    mut request: reqwest::RequestBuilder,
    options: &FetchOptions,
) -> reqwest::RequestBuilder {
    request = request.timeout(options.timeout);
    for (name, value) in &options.headers {
        request = request.header(name.as_str(), value.as_str());
    }
    if let Some(cookie) = options.cookie_header() {
        request = request.header(reqwest::header::COOKIE, cookie);
    }
    request
}

/// `static` strategy: one HTTP GET per page
#[derive(Debug, Clone)]
pub struct StaticExecutor {
    client: Client,
}

impl StaticExecutor {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl StrategyExecutor for StaticExecutor {
    fn method(&self) -> Method {
        Method::Static
    }

    async fn fetch(&self, url: &Url, options: &FetchOptions) -> Result<RawPage> {
        let started = Instant::now();
        let response = decorate(self.client.get(url.as_str()), options)
            .send()
            .await
            .map_err(|e| network_error(url, e))?;

        let status = response.status();
        let final_url = response.url().clone();
        let headers = header_map(response.headers());

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(KumoError::Network {
                url: url.to_string(),
                reason: "rate limited (HTTP 429)".to_string(),
                status: Some(status.as_u16()),
            });
        }

        let content_type = headers.get("content-type").cloned().unwrap_or_default();
        let kind = page_kind(&content_type);

        let body = response.text().await.map_err(|e| network_error(url, e))?;

        if !status.is_success() {
            tracing::debug!("{} returned HTTP {}", url, status);
            let mut reason = format!("HTTP {}", status.as_u16());
            if super::detect_antibot(status.as_u16(), &body) {
                reason = format!("{} ({})", reason, super::signals::ANTIBOT_HINT);
            }
            return Err(KumoError::Network {
                url: url.to_string(),
                reason,
                status: Some(status.as_u16()),
            });
        }

        let Some(kind) = kind else {
            return Err(KumoError::Network {
                url: url.to_string(),
                reason: format!("unsupported content type: {}", content_type),
                status: Some(status.as_u16()),
            });
        };

        Ok(RawPage {
            final_url,
            status: status.as_u16(),
            html: body,
            kind,
            headers,
            timing_ms: started.elapsed().as_millis() as u64,
            method: Method::Static,
        })
    }
}
