//! Passive HTTP APIs: certificate transparency, passive DNS and web archives.
//!
//! Each API is one GET request whose body is parsed by a pure function; the
//! parsers are lenient and leave scope/syntax filtering to the normalizer.

use std::time::Duration;

use async_trait::async_trait;
use futures::{StreamExt, stream};
use regex::Regex;
use serde::Deserialize;
use tracing::debug;

use super::{NameStream, Priority, SourceAdapter, SourceContext, SourceDescriptor, SourceKind};
use crate::domain_utils::{Target, extract_host};
use crate::errors::{Result, SweepError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassiveApi {
    CrtSh,
    CertSpotter,
    HackerTarget,
    SubdomainCenter,
    AlienVault,
    RapidDns,
    Wayback,
}

impl PassiveApi {
    pub const ALL: [PassiveApi; 7] = [
        PassiveApi::CrtSh,
        PassiveApi::CertSpotter,
        PassiveApi::HackerTarget,
        PassiveApi::SubdomainCenter,
        PassiveApi::AlienVault,
        PassiveApi::RapidDns,
        PassiveApi::Wayback,
    ];

    pub fn id(&self) -> &'static str {
        match self {
            PassiveApi::CrtSh => "crtsh",
            PassiveApi::CertSpotter => "certspotter",
            PassiveApi::HackerTarget => "hackertarget",
            PassiveApi::SubdomainCenter => "subdomain-center",
            PassiveApi::AlienVault => "alienvault",
            PassiveApi::RapidDns => "rapiddns",
            PassiveApi::Wayback => "wayback",
        }
    }

    pub fn priority(&self) -> Priority {
        match self {
            PassiveApi::CrtSh => Priority::High,
            PassiveApi::RapidDns | PassiveApi::Wayback => Priority::Low,
            _ => Priority::Medium,
        }
    }

    pub fn default_budget(&self) -> Duration {
        match self {
            PassiveApi::CrtSh | PassiveApi::Wayback => Duration::from_secs(120),
            _ => Duration::from_secs(60),
        }
    }

    pub fn url(&self, target: &Target) -> String {
        let t = target.as_str();
        match self {
            PassiveApi::CrtSh => format!("https://crt.sh/?q=%25.{t}&output=json"),
            PassiveApi::CertSpotter => format!(
                "https://api.certspotter.com/v1/issuances?domain={t}&include_subdomains=true&expand=dns_names"
            ),
            PassiveApi::HackerTarget => format!("https://api.hackertarget.com/hostsearch/?q={t}"),
            PassiveApi::SubdomainCenter => format!("https://api.subdomain.center/?domain={t}"),
            PassiveApi::AlienVault => {
                format!("https://otx.alienvault.com/api/v1/indicators/domain/{t}/passive_dns")
            }
            PassiveApi::RapidDns => format!("https://rapiddns.io/subdomain/{t}?full=1"),
            PassiveApi::Wayback => format!(
                "http://web.archive.org/cdx/search/cdx?url=*.{t}/*&output=text&fl=original&collapse=urlkey"
            ),
        }
    }

    /// Extract raw names from a response body.
    pub fn parse(&self, body: &str, target: &Target) -> std::result::Result<Vec<String>, String> {
        match self {
            PassiveApi::CrtSh => parse_crtsh(body),
            PassiveApi::CertSpotter => parse_certspotter(body),
            PassiveApi::HackerTarget => parse_hackertarget(body),
            PassiveApi::SubdomainCenter => serde_json::from_str::<Vec<String>>(body)
                .map_err(|e| format!("malformed response: {e}")),
            PassiveApi::AlienVault => parse_alienvault(body),
            PassiveApi::RapidDns => Ok(parse_rapiddns(body, target)),
            PassiveApi::Wayback => Ok(parse_wayback(body)),
        }
    }
}

#[derive(Deserialize)]
struct CrtEntry {
    #[serde(default)]
    name_value: String,
}

fn parse_crtsh(body: &str) -> std::result::Result<Vec<String>, String> {
    let entries: Vec<CrtEntry> =
        serde_json::from_str(body).map_err(|e| format!("malformed response: {e}"))?;
    Ok(entries
        .iter()
        .flat_map(|e| e.name_value.split('\n'))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect())
}

#[derive(Deserialize)]
struct CertSpotterIssuance {
    #[serde(default)]
    dns_names: Vec<String>,
}

fn parse_certspotter(body: &str) -> std::result::Result<Vec<String>, String> {
    let issuances: Vec<CertSpotterIssuance> =
        serde_json::from_str(body).map_err(|e| format!("malformed response: {e}"))?;
    Ok(issuances.into_iter().flat_map(|i| i.dns_names).collect())
}

fn parse_hackertarget(body: &str) -> std::result::Result<Vec<String>, String> {
    let trimmed = body.trim();
    if trimmed.starts_with("error") || trimmed.contains("API count exceeded") {
        return Err(trimmed.lines().next().unwrap_or_default().to_string());
    }
    Ok(trimmed
        .lines()
        .filter_map(|line| line.split(',').next())
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
        .collect())
}

#[derive(Deserialize)]
struct OtxResponse {
    #[serde(default)]
    passive_dns: Vec<OtxRecord>,
}

#[derive(Deserialize)]
struct OtxRecord {
    #[serde(default)]
    hostname: String,
}

fn parse_alienvault(body: &str) -> std::result::Result<Vec<String>, String> {
    let resp: OtxResponse =
        serde_json::from_str(body).map_err(|e| format!("malformed response: {e}"))?;
    Ok(resp
        .passive_dns
        .into_iter()
        .map(|r| r.hostname)
        .filter(|h| !h.is_empty())
        .collect())
}

fn parse_rapiddns(body: &str, target: &Target) -> Vec<String> {
    let pattern = format!(
        r"(?i)\b(?:[a-z0-9](?:[a-z0-9-]{{0,61}}[a-z0-9])?\.)+{}\b",
        regex::escape(target.as_str())
    );
    let Ok(re) = Regex::new(&pattern) else {
        return Vec::new();
    };
    let mut out: Vec<String> = re.find_iter(body).map(|m| m.as_str().to_string()).collect();
    out.sort();
    out.dedup();
    out
}

fn parse_wayback(body: &str) -> Vec<String> {
    body.lines().filter_map(extract_host).collect()
}

/// Adapter wrapping one [`PassiveApi`].
pub struct PassiveApiAdapter {
    api: PassiveApi,
    descriptor: SourceDescriptor,
}

impl PassiveApiAdapter {
    pub fn new(api: PassiveApi, budget: Duration) -> Self {
        Self {
            api,
            descriptor: SourceDescriptor::new(api.id(), SourceKind::PassiveApi, api.priority(), budget),
        }
    }
}

async fn fetch(api: PassiveApi, ctx: SourceContext) -> Result<Vec<String>> {
    let url = api.url(&ctx.target);
    debug!(source = api.id(), %url, "querying passive API");
    let resp = ctx
        .http
        .get(&url)
        .send()
        .await
        .map_err(|e| SweepError::source_failed(api.id(), format!("request failed: {e}")))?;
    let status = resp.status();
    if !status.is_success() {
        return Err(SweepError::source_failed(api.id(), format!("HTTP {status}")));
    }
    let body = resp
        .text()
        .await
        .map_err(|e| SweepError::source_failed(api.id(), format!("body read failed: {e}")))?;
    api.parse(&body, &ctx.target)
        .map_err(|reason| SweepError::source_failed(api.id(), reason))
}

#[async_trait]
impl SourceAdapter for PassiveApiAdapter {
    fn descriptor(&self) -> &SourceDescriptor {
        &self.descriptor
    }

    fn run(&self, ctx: SourceContext) -> NameStream {
        let api = self.api;
        stream::once(fetch(api, ctx))
            .flat_map(|res| match res {
                Ok(names) => stream::iter(names.into_iter().map(Ok)).left_stream(),
                Err(e) => stream::once(async move { Err(e) }).right_stream(),
            })
            .boxed()
    }

    fn manual_command(&self, target: &Target) -> Option<String> {
        Some(format!("curl -s '{}'", self.api.url(target)))
    }
}
