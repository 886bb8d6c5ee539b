// src/fetch/mod.rs
//! One fetcher per external source, behind a common trait.
//!
//! Dispatch is an explicit key → fetcher table resolved once at startup, not
//! by name convention. Fetchers catch their own transport and shape errors
//! and encode them into a failed `SearchResult`; only `fetch_detail` returns
//! a `Result`, because the reconciler needs the error text.

pub mod comprasnet;
pub mod html;
pub mod licitacoes_e;
pub mod pncp;
pub mod portal_transparencia;

use std::collections::HashMap;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use tracing::warn;

use crate::config::AppConfig;
use crate::model::{NormalizedBiddingRecord, SearchFilters, SearchResult};

pub const USER_AGENT: &str = concat!(
    "licita-radar/",
    env!("CARGO_PKG_VERSION"),
    " (+procurement listing aggregator)"
);

#[async_trait]
pub trait SourceFetcher: Send + Sync {
    /// Stable source key; must match a registry descriptor.
    fn key(&self) -> &'static str;

    /// Listing search. Failures are encoded in the result, never panicked
    /// or propagated, so one broken source cannot abort its siblings.
    async fn fetch(&self, filters: &SearchFilters) -> SearchResult;

    /// Fetch one record by its source-native identifier.
    async fn fetch_detail(&self, identifier: &str) -> Result<NormalizedBiddingRecord>;
}

pub type FetcherSet = HashMap<&'static str, Box<dyn SourceFetcher>>;

/// Build the production fetcher table. Sources that are permanently gated
/// (captcha, disabled) have a descriptor but no fetcher; the aggregator
/// skips them before lookup.
pub fn default_fetchers(config: &AppConfig) -> FetcherSet {
    let client = build_client(config);
    let mut set: FetcherSet = HashMap::new();
    for fetcher in [
        Box::new(pncp::PncpFetcher::new(client.clone(), config.clone())) as Box<dyn SourceFetcher>,
        Box::new(comprasnet::ComprasnetFetcher::new(client.clone(), config.clone())),
        Box::new(portal_transparencia::TransparenciaFetcher::new(
            client.clone(),
            config.clone(),
        )),
        Box::new(licitacoes_e::LicitacoesEFetcher::new(client, config.clone())),
    ] {
        set.insert(fetcher.key(), fetcher);
    }
    set
}

/// Shared HTTP client: bounded timeouts, descriptive UA, TLS verification
/// left on. Builder failure means the TLS backend cannot initialize, which
/// is fatal at startup.
pub fn build_client(config: &AppConfig) -> Client {
    Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(config.connect_timeout)
        .timeout(config.request_timeout)
        .build()
        .expect("reqwest client")
}

/// Send with a bounded retry count and fixed backoff. Retries transport
/// errors and 5xx; a 4xx is a contract problem and fails immediately.
pub async fn send_with_retry(
    builder: RequestBuilder,
    attempts: u32,
    backoff: std::time::Duration,
) -> Result<Response> {
    let attempts = attempts.max(1);
    let mut last_err: Option<anyhow::Error> = None;

    for attempt in 1..=attempts {
        let req = match builder.try_clone() {
            Some(b) => b,
            None => bail!("request body is not cloneable for retry"),
        };
        match req.send().await {
            Ok(resp) if resp.status().is_success() => return Ok(resp),
            Ok(resp) => {
                let status = resp.status();
                if status.is_server_error() && attempt < attempts {
                    warn!(%status, attempt, "server error, retrying");
                    last_err = Some(anyhow::anyhow!("HTTP {status}"));
                } else {
                    bail!("HTTP {status}");
                }
            }
            Err(e) => {
                if attempt < attempts {
                    warn!(error = %e, attempt, "transport error, retrying");
                    last_err = Some(e.into());
                } else {
                    return Err(e).context("request failed after retries");
                }
            }
        }
        tokio::time::sleep(backoff).await;
    }

    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("request failed")))
}
