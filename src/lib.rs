// src/lib.rs
// Public library surface for integration tests (and the web layer).

pub mod aggregate;
pub mod api;
pub mod cache;
pub mod config;
pub mod fetch;
pub mod model;
pub mod normalize;
pub mod process;
pub mod reconcile;
pub mod segments;
pub mod sources;
pub mod store;

use std::sync::Arc;

// ---- Re-exports for a stable public API ----
pub use crate::aggregate::{Aggregator, SourceSelector};
pub use crate::api::{create_router, AppState};
pub use crate::config::AppConfig;
pub use crate::model::{NormalizedBiddingRecord, SearchFilters, SearchResult};
pub use crate::reconcile::Reconciler;

/// Wire the whole stack with the given store: fetcher table, aggregator,
/// reconciler, router. This is what the binary and the router tests use.
pub fn build_app(config: AppConfig, store: Arc<dyn store::BiddingStore>) -> axum::Router {
    let fetchers = Arc::new(fetch::default_fetchers(&config));
    let aggregator = Arc::new(Aggregator::new(config.clone(), fetchers.clone()));
    let reconciler = Arc::new(Reconciler::new(config, fetchers, store.clone()));
    api::create_router(AppState {
        aggregator,
        reconciler,
        store,
    })
}
