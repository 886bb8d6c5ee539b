// tests/import_flow.rs
//! Importing aggregated listings into the persistence boundary.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use licita_radar::aggregate::{Aggregator, SourceSelector};
use licita_radar::fetch::{FetcherSet, SourceFetcher};
use licita_radar::model::{NormalizedBiddingRecord, SearchFilters, SearchResult};
use licita_radar::store::{BiddingStore, MemoryStore};
use licita_radar::AppConfig;

struct CannedFetcher {
    records: Vec<NormalizedBiddingRecord>,
}

#[async_trait]
impl SourceFetcher for CannedFetcher {
    fn key(&self) -> &'static str {
        "pncp"
    }

    async fn fetch(&self, _filters: &SearchFilters) -> SearchResult {
        SearchResult::ok("ok", self.records.clone())
    }

    async fn fetch_detail(&self, _identifier: &str) -> Result<NormalizedBiddingRecord> {
        Err(anyhow!("not used"))
    }
}

fn rec(number: &str) -> NormalizedBiddingRecord {
    let mut r = NormalizedBiddingRecord::for_source("pncp", "PNCP");
    r.bidding_number = number.to_string();
    r.title = format!("Objeto {number}");
    r
}

#[tokio::test]
async fn import_creates_new_and_skips_existing() {
    let mut set = FetcherSet::new();
    set.insert(
        "pncp",
        Box::new(CannedFetcher {
            records: vec![rec("1/2025"), rec("2/2025"), rec("3/2025")],
        }) as Box<dyn SourceFetcher>,
    );
    let agg = Aggregator::new(
        AppConfig {
            cache_ttl_secs: 0,
            ..Default::default()
        },
        Arc::new(set),
    );
    let store = MemoryStore::new();
    store.create(&rec("2/2025")).await.unwrap();

    let result = agg
        .search(
            &SourceSelector::Keys(vec!["pncp".into()]),
            &SearchFilters::default(),
        )
        .await;
    assert!(result.success);

    let (created, skipped) = agg.import(&store, &result.data).await.unwrap();
    assert_eq!(created, 2);
    assert_eq!(skipped, 1);
    assert_eq!(store.snapshot().len(), 3);

    // Second import is a pure no-op.
    let (created, skipped) = agg.import(&store, &result.data).await.unwrap();
    assert_eq!(created, 0);
    assert_eq!(skipped, 3);
}
