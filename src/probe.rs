//! HTTP(S) liveness probing.
//!
//! A probe tries `https://host/` first and falls back to `http://host/`.
//! Redirects are followed by hand so the full URL chain can be reported, and
//! only the first few KiB of the final body are read to extract `<title>`.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::{Client, Url, redirect::Policy};
use thiserror::Error;
use tracing::trace;

/// Why a probe produced no HTTP status.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProbeError {
    #[error("timed out")]
    Timeout,
    #[error("{0}")]
    Request(String),
}

impl ProbeError {
    pub fn label(&self) -> &'static str {
        match self {
            ProbeError::Timeout => "timeout",
            ProbeError::Request(_) => "error",
        }
    }
}

/// Outcome of probing one host.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeOutcome {
    pub status: Option<u16>,
    pub title: Option<String>,
    /// Every URL requested, starting with the initial one.
    pub redirect_chain: Vec<String>,
    pub final_url: Option<String>,
    pub error: Option<ProbeError>,
}

impl ProbeOutcome {
    pub fn failed(error: ProbeError) -> Self {
        Self {
            error: Some(error),
            ..Self::default()
        }
    }
}

#[async_trait]
pub trait HttpProber: Send + Sync {
    async fn probe(&self, host: &str) -> ProbeOutcome;
}

/// Settings for [`ReqwestProber`].
#[derive(Debug, Clone)]
pub struct ProbeSettings {
    pub timeout: Duration,
    pub max_redirects: usize,
    pub max_body_bytes: usize,
    pub user_agent: String,
}

/// reqwest-backed prober with manual redirect handling.
pub struct ReqwestProber {
    client: Client,
    settings: ProbeSettings,
}

impl ReqwestProber {
    pub fn new(settings: ProbeSettings) -> reqwest::Result<Self> {
        let client = Client::builder()
            .timeout(settings.timeout)
            .redirect(Policy::none())
            .user_agent(settings.user_agent.clone())
            .danger_accept_invalid_certs(true)
            .build()?;
        Ok(Self { client, settings })
    }

    async fn fetch_chain(&self, start: Url) -> Result<ProbeOutcome, ProbeError> {
        let mut chain = vec![start.to_string()];
        let mut current = start;
        let mut hops = 0usize;

        loop {
            let resp = self
                .client
                .get(current.clone())
                .send()
                .await
                .map_err(classify)?;
            let status = resp.status();

            if status.is_redirection() && hops < self.settings.max_redirects {
                let next = resp
                    .headers()
                    .get(reqwest::header::LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|loc| current.join(loc).ok());
                if let Some(next) = next {
                    trace!(from = %current, to = %next, "following redirect");
                    chain.push(next.to_string());
                    current = next;
                    hops += 1;
                    continue;
                }
            }

            let title = if status.is_redirection() {
                None
            } else {
                read_title(resp, self.settings.max_body_bytes).await
            };
            return Ok(ProbeOutcome {
                status: Some(status.as_u16()),
                title,
                final_url: Some(current.to_string()),
                redirect_chain: chain,
                error: None,
            });
        }
    }
}

#[async_trait]
impl HttpProber for ReqwestProber {
    async fn probe(&self, host: &str) -> ProbeOutcome {
        let mut last_error = ProbeError::Request("no scheme attempted".into());
        for scheme in ["https", "http"] {
            let url = match Url::parse(&format!("{scheme}://{host}/")) {
                Ok(u) => u,
                Err(e) => return ProbeOutcome::failed(ProbeError::Request(e.to_string())),
            };
            match self.fetch_chain(url).await {
                Ok(outcome) => return outcome,
                Err(e) => {
                    trace!(host, scheme, error = %e, "probe attempt failed");
                    last_error = e;
                }
            }
        }
        ProbeOutcome::failed(last_error)
    }
}

fn classify(e: reqwest::Error) -> ProbeError {
    if e.is_timeout() {
        ProbeError::Timeout
    } else {
        ProbeError::Request(e.to_string())
    }
}

async fn read_title(mut resp: reqwest::Response, limit: usize) -> Option<String> {
    let mut body = Vec::new();
    while body.len() < limit {
        match resp.chunk().await {
            Ok(Some(chunk)) => body.extend_from_slice(&chunk),
            _ => break,
        }
    }
    body.truncate(limit);
    extract_title(&String::from_utf8_lossy(&body))
}

/// Extract and tidy the first `<title>` of an HTML document.
pub fn extract_title(html: &str) -> Option<String> {
    static RE: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").expect("static regex"));
    let raw = RE.captures(html)?.get(1)?.as_str();
    let title: String = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if title.is_empty() {
        return None;
    }
    Some(title.chars().take(200).collect())
}

/// Canned responses keyed by host; hosts without an entry fail to connect.
#[derive(Default)]
pub struct StaticProber {
    responses: HashMap<String, ProbeOutcome>,
    latency: Duration,
}

impl StaticProber {
    pub fn new() -> Self {
        Self::default()
    }

    /// Host answers `https://host/` with `status` and an optional title.
    pub fn with_response(mut self, host: &str, status: u16, title: Option<&str>) -> Self {
        let url = format!("https://{host}/");
        self.responses.insert(
            host.to_string(),
            ProbeOutcome {
                status: Some(status),
                title: title.map(str::to_string),
                redirect_chain: vec![url.clone()],
                final_url: Some(url),
                error: None,
            },
        );
        self
    }

    pub fn with_outcome(mut self, host: &str, outcome: ProbeOutcome) -> Self {
        self.responses.insert(host.to_string(), outcome);
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }
}

#[async_trait]
impl HttpProber for StaticProber {
    async fn probe(&self, host: &str) -> ProbeOutcome {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.responses
            .get(host)
            .cloned()
            .unwrap_or_else(|| ProbeOutcome::failed(ProbeError::Request("connection refused".into())))
    }
}
