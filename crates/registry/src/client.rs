//! SmartAPI registry HTTP client.
//!
//! Two endpoints matter here:
//! - `GET {base}/query?q=<query>&size=<limit>` — full-text search, returns
//!   `{ "hits": [ { "_id": ..., "info": { "title": ... } }, ... ] }`
//! - `GET {base}/metadata/{id}` — the registered OpenAPI document itself
//!   (JSON, occasionally YAML).
//!
//! The registry is untrusted input: absent or oddly-typed fields degrade to
//! defaults instead of failing the whole call.

use crate::error::{Result, SpecFetchError};
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use url::Url;

/// One search hit, reduced to the fields callers actually use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiSummary {
    /// Registry identifier (`_id`).
    pub id: String,
    /// `info.title`, or the id when the registry omitted it.
    pub title: String,
    /// Optional link back to the registry entry.
    pub url: Option<String>,
}

/// Client for a SmartAPI-style registry.
#[derive(Debug, Clone)]
pub struct RegistryClient {
    base_url: Url,
    client: Client,
    timeout: Duration,
}

impl RegistryClient {
    /// Create a client for the given registry base URL (e.g.
    /// `https://smart-api.info/api`).
    ///
    /// # Errors
    ///
    /// Returns an error if `base_url` is not a valid absolute URL.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(base_url.trim_end_matches('/')).map_err(|e| {
            SpecFetchError::BaseUrl {
                url: base_url.to_string(),
                message: e.to_string(),
            }
        })?;
        Ok(Self {
            base_url,
            client: Client::new(),
            timeout,
        })
    }

    /// Search the registry.
    ///
    /// Hits with no usable `_id` are dropped; a response without a `hits`
    /// array yields an empty list.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the registry answers with a
    /// non-success status.
    pub async fn search(&self, query: &str, limit: usize) -> Result<Vec<ApiSummary>> {
        let url = self.endpoint(&["query"])?;
        let resp = self
            .client
            .get(url.clone())
            .query(&[("q", query), ("size", &limit.to_string())])
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| SpecFetchError::Request {
                url: url.to_string(),
                message: e.to_string(),
            })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(SpecFetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body: Value = resp.json().await.map_err(|e| SpecFetchError::Request {
            url: url.to_string(),
            message: e.to_string(),
        })?;

        Ok(parse_hits(&body))
    }

    /// Fetch the raw OpenAPI document registered under `api_id`.
    ///
    /// The body is parsed as JSON first, then YAML (some registrations are
    /// served as YAML text).
    ///
    /// # Errors
    ///
    /// Returns `NotFound` on 404, `Status` on other non-success statuses,
    /// `Request` on transport failures and `Parse` on unparseable bodies.
    pub async fn fetch_document(&self, api_id: &str) -> Result<Value> {
        let url = self.endpoint(&["metadata", api_id])?;
        tracing::debug!(api_id, %url, "fetching spec document from registry");

        let resp = self
            .client
            .get(url.clone())
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| SpecFetchError::Request {
                url: url.to_string(),
                message: e.to_string(),
            })?;

        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(SpecFetchError::NotFound {
                api_id: api_id.to_string(),
            });
        }
        if !status.is_success() {
            return Err(SpecFetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let text = resp.text().await.map_err(|e| SpecFetchError::Request {
            url: url.to_string(),
            message: e.to_string(),
        })?;

        serde_json::from_str(&text)
            .or_else(|_| serde_yaml::from_str(&text))
            .map_err(|e: serde_yaml::Error| SpecFetchError::Parse {
                api_id: api_id.to_string(),
                message: e.to_string(),
            })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|()| SpecFetchError::BaseUrl {
                    url: self.base_url.to_string(),
                    message: "registry base URL cannot be a base".to_string(),
                })?;
            path.pop_if_empty();
            for s in segments {
                path.push(s);
            }
        }
        Ok(url)
    }
}

fn parse_hits(body: &Value) -> Vec<ApiSummary> {
    let Some(hits) = body.get("hits").and_then(Value::as_array) else {
        return Vec::new();
    };

    hits.iter()
        .filter_map(|hit| {
            let id = hit.get("_id").and_then(Value::as_str)?;
            let title = hit
                .pointer("/info/title")
                .and_then(Value::as_str)
                .unwrap_or(id);
            let url = hit
                .get("_meta")
                .and_then(|m| m.get("url"))
                .and_then(Value::as_str)
                .map(str::to_string);
            Some(ApiSummary {
                id: id.to_string(),
                title: title.to_string(),
                url,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_hits_tolerates_missing_fields() {
        let body = json!({
            "hits": [
                { "_id": "abc123", "info": { "title": "MyGene.info API" } },
                { "_id": "def456" },
                { "info": { "title": "no id, dropped" } },
                "not-an-object"
            ]
        });

        let hits = parse_hits(&body);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].title, "MyGene.info API");
        assert_eq!(hits[1].id, "def456");
        assert_eq!(hits[1].title, "def456");
    }

    #[test]
    fn parse_hits_without_hits_array_is_empty() {
        assert!(parse_hits(&json!({})).is_empty());
        assert!(parse_hits(&json!({ "hits": "nope" })).is_empty());
    }

    #[test]
    fn endpoint_joins_segments() {
        let client =
            RegistryClient::new("https://smart-api.info/api/", Duration::from_secs(5)).unwrap();
        let url = client.endpoint(&["metadata", "abc123"]).unwrap();
        assert_eq!(url.as_str(), "https://smart-api.info/api/metadata/abc123");
    }

    #[test]
    fn invalid_base_url_is_rejected() {
        let err = RegistryClient::new("not a url", Duration::from_secs(5)).unwrap_err();
        assert!(matches!(err, SpecFetchError::BaseUrl { .. }));
    }
}
