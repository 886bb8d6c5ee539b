// tests/aggregate_e2e.rs
//! End-to-end aggregation over mock fetchers: partial failure isolation,
//! segment filtering, limits, gating and cache behavior.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use licita_radar::aggregate::{Aggregator, SourceSelector};
use licita_radar::fetch::{FetcherSet, SourceFetcher};
use licita_radar::model::{NormalizedBiddingRecord, SearchFilters, SearchResult};
use licita_radar::AppConfig;

fn record(source: &str, number: &str, title: &str, opening: &str) -> NormalizedBiddingRecord {
    let mut r = NormalizedBiddingRecord::for_source(source, source);
    r.bidding_number = number.to_string();
    r.title = title.to_string();
    r.description = title.to_string();
    r.opening_date = licita_radar::normalize::parse_datetime(opening);
    r
}

/// Registered under a real registry key so gating resolves it.
struct CannedFetcher {
    key: &'static str,
    records: Vec<NormalizedBiddingRecord>,
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl SourceFetcher for CannedFetcher {
    fn key(&self) -> &'static str {
        self.key
    }

    async fn fetch(&self, _filters: &SearchFilters) -> SearchResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        SearchResult::ok(
            format!("{}: {} listings", self.key, self.records.len()),
            self.records.clone(),
        )
    }

    async fn fetch_detail(&self, identifier: &str) -> Result<NormalizedBiddingRecord> {
        self.records
            .iter()
            .find(|r| r.bidding_number == identifier)
            .cloned()
            .ok_or_else(|| anyhow!("not found"))
    }
}

struct TimeoutFetcher {
    key: &'static str,
}

#[async_trait]
impl SourceFetcher for TimeoutFetcher {
    fn key(&self) -> &'static str {
        self.key
    }

    async fn fetch(&self, _filters: &SearchFilters) -> SearchResult {
        SearchResult::failed("request failed: operation timed out")
    }

    async fn fetch_detail(&self, _identifier: &str) -> Result<NormalizedBiddingRecord> {
        Err(anyhow!("operation timed out"))
    }
}

fn health_records() -> Vec<NormalizedBiddingRecord> {
    let mut out = Vec::new();
    for i in 1..=8 {
        out.push(record(
            "pncp",
            &format!("{i}/2025"),
            "Aquisição de medicamentos e insumos de enfermagem",
            &format!("2025-03-{:02} 09:00:00", i),
        ));
    }
    out.push(record("pncp", "9/2025", "Pneus para frota", "2025-03-09 09:00:00"));
    out.push(record("pncp", "10/2025", "Mobiliário escolar", "2025-03-10 09:00:00"));
    out
}

fn build_aggregator(
    config: AppConfig,
    fetchers: Vec<Box<dyn SourceFetcher>>,
) -> (Aggregator, Arc<FetcherSet>) {
    let mut set: FetcherSet = FetcherSet::new();
    for f in fetchers {
        set.insert(f.key(), f);
    }
    let set = Arc::new(set);
    (Aggregator::new(config, set.clone()), set)
}

#[tokio::test]
async fn partial_failure_does_not_block_sibling_sources() {
    let calls = Arc::new(AtomicUsize::new(0));
    let (agg, _) = build_aggregator(
        AppConfig {
            cache_ttl_secs: 0,
            ..Default::default()
        },
        vec![
            Box::new(CannedFetcher {
                key: "pncp",
                records: health_records(),
                calls: calls.clone(),
            }),
            Box::new(TimeoutFetcher { key: "comprasnet" }),
        ],
    );

    let filters = SearchFilters {
        segment: Some("saude".into()),
        limit: 5,
        ..Default::default()
    };
    let result = agg.search(&SourceSelector::all(), &filters).await;

    assert!(result.success);
    assert!(result.count <= 5);
    assert!(result.count > 0);
    for rec in &result.data {
        assert!(
            licita_radar::segments::matches(
                &format!("{} {}", rec.title, rec.description),
                "saude"
            ),
            "non-health record leaked: {}",
            rec.title
        );
    }
    assert!(
        result.details.iter().any(|d| d.contains("comprasnet")),
        "missing failure note for comprasnet: {:?}",
        result.details
    );
}

#[tokio::test]
async fn all_sources_failing_is_a_failure() {
    let (agg, _) = build_aggregator(
        AppConfig {
            cache_ttl_secs: 0,
            ..Default::default()
        },
        vec![
            Box::new(TimeoutFetcher { key: "pncp" }),
            Box::new(TimeoutFetcher { key: "comprasnet" }),
        ],
    );
    let result = agg
        .search(&SourceSelector::all(), &SearchFilters::default())
        .await;
    assert!(!result.success);
    assert!(result.message.contains("all sources failed"));
}

#[tokio::test]
async fn empty_but_successful_source_is_still_success() {
    let calls = Arc::new(AtomicUsize::new(0));
    let (agg, _) = build_aggregator(
        AppConfig {
            cache_ttl_secs: 0,
            ..Default::default()
        },
        vec![Box::new(CannedFetcher {
            key: "pncp",
            records: Vec::new(),
            calls,
        })],
    );
    let result = agg
        .search(&SourceSelector::all(), &SearchFilters::default())
        .await;
    assert!(result.success);
    assert_eq!(result.count, 0);
}

#[tokio::test]
async fn gated_sources_are_skipped_with_reasons() {
    let calls = Arc::new(AtomicUsize::new(0));
    let (agg, _) = build_aggregator(
        AppConfig {
            cache_ttl_secs: 0,
            allow_fragile: false,
            ..Default::default()
        },
        vec![Box::new(CannedFetcher {
            key: "pncp",
            records: health_records(),
            calls: calls.clone(),
        })],
    );

    let result = agg
        .search(&SourceSelector::all(), &SearchFilters::default())
        .await;
    assert!(result.success);
    // captcha + disabled + fragile/experimental all noted
    assert!(result.details.iter().any(|d| d.contains("bec_sp")));
    assert!(result.details.iter().any(|d| d.contains("e_negocios")));
    assert!(result.details.iter().any(|d| d.contains("licitacoes_e")));
}

#[tokio::test]
async fn explicitly_requesting_only_gated_sources_fails_fast() {
    let (agg, _) = build_aggregator(
        AppConfig {
            cache_ttl_secs: 0,
            ..Default::default()
        },
        Vec::new(),
    );
    let result = agg
        .search(
            &SourceSelector::Keys(vec!["bec_sp".into(), "e_negocios".into()]),
            &SearchFilters::default(),
        )
        .await;
    assert!(!result.success);
    assert!(result.message.contains("no dispatchable sources"));
}

#[tokio::test]
async fn unknown_source_key_is_reported() {
    let (agg, _) = build_aggregator(
        AppConfig {
            cache_ttl_secs: 0,
            ..Default::default()
        },
        Vec::new(),
    );
    let result = agg
        .search(
            &SourceSelector::Keys(vec!["comprasnot".into()]),
            &SearchFilters::default(),
        )
        .await;
    assert!(!result.success);
    assert!(result.details.iter().any(|d| d.contains("unknown key")));
}

#[tokio::test]
async fn second_identical_search_is_served_from_cache() {
    let calls = Arc::new(AtomicUsize::new(0));
    let (agg, _) = build_aggregator(
        AppConfig {
            cache_ttl_secs: 3600,
            ..Default::default()
        },
        vec![Box::new(CannedFetcher {
            key: "pncp",
            records: health_records(),
            calls: calls.clone(),
        })],
    );

    let filters = SearchFilters::default();
    let selector = SourceSelector::Keys(vec!["pncp".into()]);

    let first = agg.search(&selector, &filters).await;
    assert!(first.success);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let second = agg.search(&selector, &filters).await;
    assert!(second.success);
    assert_eq!(second.count, first.count);
    assert_eq!(calls.load(Ordering::SeqCst), 1, "cache miss triggered a refetch");
    assert!(second.message.contains("cached"));
}

#[tokio::test]
async fn different_filters_do_not_share_cache_entries() {
    let calls = Arc::new(AtomicUsize::new(0));
    let (agg, _) = build_aggregator(
        AppConfig {
            cache_ttl_secs: 3600,
            ..Default::default()
        },
        vec![Box::new(CannedFetcher {
            key: "pncp",
            records: health_records(),
            calls: calls.clone(),
        })],
    );
    let selector = SourceSelector::Keys(vec!["pncp".into()]);

    agg.search(&selector, &SearchFilters::default()).await;
    agg.search(
        &selector,
        &SearchFilters {
            segment: Some("saude".into()),
            ..Default::default()
        },
    )
    .await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}
