use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::header::ACCEPT;
use tracing::debug;

use crate::response::parse_time_response;
use crate::source::{SourceError, TimeSource};
use crate::EpochMillis;

/// JSON-over-HTTP(S) time source (worldtimeapi, timeapi.io, ...).
///
/// The body shape is resolved by [`parse_time_response`]; nothing here is
/// provider specific beyond the URL.
#[derive(Debug, Clone)]
pub struct HttpTimeSource {
    name: String,
    url: String,
    timeout: Duration,
    http: reqwest::Client,
}

impl HttpTimeSource {
    pub fn new(name: impl Into<String>, url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let name = name.into();
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .with_context(|| format!("build http client for time source '{name}'"))?;
        Ok(Self {
            name,
            url: url.into(),
            timeout,
            http,
        })
    }
}

#[async_trait::async_trait]
impl TimeSource for HttpTimeSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_server_millis(&self) -> Result<EpochMillis, SourceError> {
        let resp = self
            .http
            .get(&self.url)
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SourceError::Timeout(self.timeout)
                } else {
                    SourceError::Transport(e.to_string())
                }
            })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(SourceError::Status(status.as_u16()));
        }

        let body: serde_json::Value = resp.json().await.map_err(|e| {
            if e.is_timeout() {
                SourceError::Timeout(self.timeout)
            } else {
                SourceError::Malformed(format!("body is not JSON: {e}"))
            }
        })?;

        let ms = parse_time_response(&body).map_err(|e| SourceError::Malformed(e.to_string()))?;
        debug!(source = %self.name, url = %self.url, server_ms = ms, "time source answered");
        Ok(ms)
    }
}
