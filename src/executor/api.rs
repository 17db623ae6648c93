//! JSON endpoint executor
//!
//! Tries a few same-origin places where a site commonly serves the page's
//! data as JSON:
//! 1. the page URL itself with `Accept: application/json`
//! 2. the page path with a `.json` suffix
//! 3. the WordPress REST API, looked up by the last path segment
//!
//! The first endpoint that answers with a non-empty JSON document wins.

use super::static_http::{decorate, header_map, network_error};
use super::{FetchOptions, Method, PageKind, RawPage, StrategyExecutor};
use crate::{KumoError, Result};
use async_trait::async_trait;
use reqwest::header::ACCEPT;
use reqwest::Client;
use std::time::Instant;
use url::Url;

/// `api` strategy
#[derive(Debug, Clone)]
pub struct ApiExecutor {
    client: Client,
}

impl ApiExecutor {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Candidate endpoints for a page, in the order they are tried
    pub fn candidates(url: &Url) -> Vec<Url> {
        let mut candidates = vec![url.clone()];

        let path = url.path().trim_end_matches('/');
        if !path.is_empty() && !path.ends_with(".json") {
            let mut suffixed = url.clone();
            suffixed.set_path(&format!("{}.json", path));
            candidates.push(suffixed);
        }

        if let Some(slug) = url
            .path_segments()
            .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
        {
            if let Ok(mut wp) = url.join("/wp-json/wp/v2/pages") {
                wp.query_pairs_mut().append_pair("slug", slug);
                candidates.push(wp);
            }
        }

        candidates
    }

    /// Returns the JSON body if the endpoint serves a non-empty document
    async fn try_endpoint(
        &self,
        endpoint: &Url,
        options: &FetchOptions,
    ) -> Result<Option<RawPage>> {
        let started = Instant::now();
        let response = decorate(self.client.get(endpoint.as_str()), options)
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| network_error(endpoint, e))?;

        let status = response.status();
        let headers = header_map(response.headers());
        let is_json = headers
            .get("content-type")
            .map(|ct| ct.to_ascii_lowercase().contains("json"))
            .unwrap_or(false);

        if !status.is_success() || !is_json {
            tracing::trace!("API endpoint {} rejected (HTTP {})", endpoint, status);
            return Ok(None);
        }

        let final_url = response.url().clone();
        let body = response.text().await.map_err(|e| network_error(endpoint, e))?;
        let non_empty = match serde_json::from_str::<serde_json::Value>(&body) {
            Ok(serde_json::Value::Array(items)) => !items.is_empty(),
            Ok(serde_json::Value::Object(fields)) => !fields.is_empty(),
            Ok(serde_json::Value::Null) | Err(_) => false,
            Ok(_) => true,
        };
        if !non_empty {
            return Ok(None);
        }

        Ok(Some(RawPage {
            final_url,
            status: status.as_u16(),
            html: body,
            kind: PageKind::Json,
            headers,
            timing_ms: started.elapsed().as_millis() as u64,
            method: Method::Api,
        }))
    }
}

#[async_trait]
impl StrategyExecutor for ApiExecutor {
    fn method(&self) -> Method {
        Method::Api
    }

    async fn fetch(&self, url: &Url, options: &FetchOptions) -> Result<RawPage> {
        let mut last_error = None;

        for endpoint in Self::candidates(url) {
            match self.try_endpoint(&endpoint, options).await {
                Ok(Some(page)) => {
                    tracing::debug!("API endpoint for {} found at {}", url, endpoint);
                    return Ok(page);
                }
                Ok(None) => {}
                Err(e) => last_error = Some(e),
            }
        }

        Err(match last_error {
            Some(KumoError::Timeout { .. }) => KumoError::Timeout {
                url: url.to_string(),
            },
            _ => KumoError::Network {
                url: url.to_string(),
                reason: "no JSON endpoint found".to_string(),
                status: None,
            },
        })
    }
}
