// src/aggregate.rs
//! Multi-source search orchestration.
//!
//! Resolves the requested source set against the registry (applying status
//! gating), consults the cache, fans the query out to each source's fetcher
//! with per-source failure isolation, merges and post-processes the output,
//! and writes non-empty results back to the cache. One broken source never
//! aborts its siblings; the caller always gets a structured result.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use serde::Deserialize;
use tracing::{info, warn};

use crate::cache::{self, ResultCache};
use crate::config::AppConfig;
use crate::fetch::FetcherSet;
use crate::model::{NormalizedBiddingRecord, SearchFilters, SearchResult};
use crate::process;
use crate::sources::{self, SourceDescriptor};
use crate::store::BiddingStore;

/// Which sources a search should cover.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum SourceSelector {
    /// Every non-gated registered source.
    All(AllTag),
    Keys(Vec<String>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AllTag {
    All,
}

impl SourceSelector {
    pub fn all() -> Self {
        SourceSelector::All(AllTag::All)
    }

    /// Parse the web layer's `sources` parameter: `all` or a comma list.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("all") {
            return Self::all();
        }
        SourceSelector::Keys(
            trimmed
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
        )
    }
}

pub struct Aggregator {
    config: AppConfig,
    fetchers: Arc<FetcherSet>,
    cache: ResultCache,
}

impl Aggregator {
    pub fn new(config: AppConfig, fetchers: Arc<FetcherSet>) -> Self {
        let cache = ResultCache::new(config.cache_ttl_secs);
        Self {
            config,
            fetchers,
            cache,
        }
    }

    /// Resolve a selector into dispatchable descriptors plus human-readable
    /// skip reasons for everything gated away.
    fn resolve_sources(
        &self,
        selector: &SourceSelector,
    ) -> (Vec<&'static SourceDescriptor>, Vec<String>) {
        let mut resolved = Vec::new();
        let mut skipped = Vec::new();

        let candidates: Vec<&'static SourceDescriptor> = match selector {
            SourceSelector::All(_) => sources::list_all().iter().collect(),
            SourceSelector::Keys(keys) => {
                let mut out = Vec::new();
                for key in keys {
                    match sources::get(key) {
                        Some(desc) => out.push(desc),
                        None => skipped.push(format!("source '{key}' skipped: unknown key")),
                    }
                }
                out
            }
        };

        for desc in candidates {
            if desc.status.is_blocked() {
                skipped.push(format!(
                    "source '{}' skipped: {}",
                    desc.key,
                    match desc.status {
                        sources::SourceStatus::RequiresCaptcha => "requires captcha",
                        _ => "disabled",
                    }
                ));
            } else if desc.status.is_fragile() && !self.config.allow_fragile {
                skipped.push(format!(
                    "source '{}' skipped: marked {:?} and fragile sources are not allowed",
                    desc.key, desc.status
                ));
            } else {
                resolved.push(desc);
            }
        }

        (resolved, skipped)
    }

    /// Aggregated multi-source search. Always returns a structured result.
    pub async fn search(&self, selector: &SourceSelector, filters: &SearchFilters) -> SearchResult {
        let (resolved, skipped) = self.resolve_sources(selector);
        for reason in &skipped {
            info!("{reason}");
        }

        if resolved.is_empty() {
            let mut result = SearchResult::failed(if skipped.is_empty() {
                "no sources requested".to_string()
            } else {
                format!("no dispatchable sources: {}", skipped.join("; "))
            });
            result.details = skipped;
            return result;
        }

        let source_keys: Vec<String> = resolved.iter().map(|d| d.key.to_string()).collect();
        let cache_key = cache::generate_key(&source_keys, &filters.as_key_pairs());

        if let Some(data) = self.cache.get(&cache_key) {
            let mut result = SearchResult::ok(
                format!("{} listings (cached)", data.len()),
                data,
            );
            result.details = skipped;
            return result;
        }

        let mut merged: Vec<NormalizedBiddingRecord> = Vec::new();
        let mut details = skipped;
        let mut sources_ok = 0usize;
        let mut sources_failed = 0usize;

        for desc in &resolved {
            let Some(fetcher) = self.fetchers.get(desc.key) else {
                warn!(source = desc.key, "descriptor without registered fetcher");
                details.push(format!("source '{}' skipped: no fetcher registered", desc.key));
                continue;
            };
            let outcome = fetcher.fetch(filters).await;
            if outcome.success {
                sources_ok += 1;
                details.push(outcome.message);
                merged.extend(outcome.data);
            } else {
                sources_failed += 1;
                warn!(source = desc.key, message = %outcome.message, "source fetch failed");
                details.push(format!("source '{}' failed: {}", desc.key, outcome.message));
            }
        }

        let data = process::process(merged, filters);
        let count = data.len();
        // "Searched correctly, nothing there" still counts as success;
        // only a total wipe-out of every source is a failure.
        let success = count > 0 || sources_ok > 0;

        let message = if sources_failed == 0 && sources_ok > 0 {
            format!("{count} listings from {sources_ok} source(s)")
        } else if sources_ok > 0 {
            format!(
                "{count} listings from {sources_ok} source(s); {sources_failed} source(s) failed"
            )
        } else {
            "all sources failed".to_string()
        };

        info!(count, sources_ok, sources_failed, "aggregated search done");

        if count > 0 {
            self.cache.put(&cache_key, data.clone());
        }

        let mut result = if success {
            SearchResult::ok(message, data)
        } else {
            SearchResult::failed(message)
        };
        result.details = details;
        result
    }

    /// Detail lookup on one explicitly named source, honoring gating.
    pub async fn get_details(
        &self,
        source_key: &str,
        identifier: &str,
    ) -> Result<NormalizedBiddingRecord> {
        let desc =
            sources::get(source_key).ok_or_else(|| anyhow!("unknown source '{source_key}'"))?;
        if desc.status.is_blocked() {
            return Err(anyhow!(
                "source '{source_key}' is {:?} and cannot be queried",
                desc.status
            ));
        }
        if desc.status.is_fragile() && !self.config.allow_fragile {
            return Err(anyhow!(
                "source '{source_key}' is {:?}; fragile sources are not allowed",
                desc.status
            ));
        }
        let fetcher = self
            .fetchers
            .get(desc.key)
            .ok_or_else(|| anyhow!("no fetcher registered for source '{source_key}'"))?;
        fetcher.fetch_detail(identifier).await
    }

    /// Persist search results that are not yet in the store. Returns
    /// (created, skipped-as-existing).
    pub async fn import(
        &self,
        store: &dyn BiddingStore,
        records: &[NormalizedBiddingRecord],
    ) -> Result<(usize, usize)> {
        let mut created = 0usize;
        let mut skipped = 0usize;
        for rec in records {
            if store.exists(&rec.bidding_number).await? {
                skipped += 1;
                continue;
            }
            store.create(rec).await?;
            created += 1;
        }
        info!(created, skipped, "import finished");
        Ok((created, skipped))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_parses_all_and_lists() {
        assert_eq!(SourceSelector::parse("all"), SourceSelector::all());
        assert_eq!(SourceSelector::parse(""), SourceSelector::all());
        assert_eq!(
            SourceSelector::parse("pncp, comprasnet"),
            SourceSelector::Keys(vec!["pncp".into(), "comprasnet".into()])
        );
    }
}
