// src/api.rs
//! Thin HTTP surface for the external web layer. Handlers only translate
//! query/body shapes into core calls; no aggregation logic lives here.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::aggregate::{Aggregator, SourceSelector};
use crate::model::{NormalizedBiddingRecord, SearchFilters, SearchResult, DEFAULT_LIMIT};
use crate::normalize::parse_datetime;
use crate::reconcile::{ReconcileReport, Reconciler};
use crate::store::BiddingStore;
use crate::{segments, sources};

#[derive(Clone)]
pub struct AppState {
    pub aggregator: Arc<Aggregator>,
    pub reconciler: Arc<Reconciler>,
    pub store: Arc<dyn BiddingStore>,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/search", get(search))
        .route("/sources", get(list_sources))
        .route("/segments", get(list_segments))
        .route("/details/{source}/{id}", get(details))
        .route("/update-from-source", post(update_from_source))
        .route("/import", post(import))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct SearchQuery {
    #[serde(default)]
    sources: Option<String>,
    #[serde(default)]
    bidding_number: Option<String>,
    #[serde(default)]
    start_date: Option<String>,
    #[serde(default)]
    end_date: Option<String>,
    #[serde(default)]
    segment: Option<String>,
    #[serde(default)]
    limit: Option<usize>,
    #[serde(default)]
    page: Option<u32>,
}

impl SearchQuery {
    fn selector(&self) -> SourceSelector {
        SourceSelector::parse(self.sources.as_deref().unwrap_or("all"))
    }

    fn filters(&self) -> SearchFilters {
        SearchFilters {
            bidding_number: self.bidding_number.clone().filter(|s| !s.trim().is_empty()),
            start_date: self.start_date.as_deref().and_then(parse_datetime),
            end_date: self.end_date.as_deref().and_then(parse_datetime),
            segment: self.segment.clone().filter(|s| !s.trim().is_empty()),
            limit: self.limit.unwrap_or(DEFAULT_LIMIT),
            page: self.page,
        }
    }
}

async fn search(State(state): State<AppState>, Query(q): Query<SearchQuery>) -> Json<SearchResult> {
    let result = state.aggregator.search(&q.selector(), &q.filters()).await;
    Json(result)
}

#[derive(Serialize)]
struct SourceOut {
    key: &'static str,
    display_name: &'static str,
    kind: sources::IntegrationKind,
    status: sources::SourceStatus,
}

async fn list_sources() -> Json<Vec<SourceOut>> {
    Json(
        sources::list_all()
            .iter()
            .map(|s| SourceOut {
                key: s.key,
                display_name: s.display_name,
                kind: s.kind,
                status: s.status,
            })
            .collect(),
    )
}

#[derive(Serialize)]
struct SegmentOut {
    key: &'static str,
    display_name: &'static str,
    keywords: Vec<&'static str>,
}

async fn list_segments() -> Json<Vec<SegmentOut>> {
    Json(
        segments::list_all()
            .iter()
            .map(|s| SegmentOut {
                key: s.key,
                display_name: s.display_name,
                keywords: s.keywords.to_vec(),
            })
            .collect(),
    )
}

#[derive(Serialize)]
struct ErrorOut {
    success: bool,
    message: String,
}

fn error_response(status: StatusCode, message: String) -> (StatusCode, Json<ErrorOut>) {
    (
        status,
        Json(ErrorOut {
            success: false,
            message,
        }),
    )
}

async fn details(
    State(state): State<AppState>,
    Path((source, id)): Path<(String, String)>,
) -> Result<Json<NormalizedBiddingRecord>, (StatusCode, Json<ErrorOut>)> {
    state
        .aggregator
        .get_details(&source, &id)
        .await
        .map(Json)
        .map_err(|e| error_response(StatusCode::BAD_GATEWAY, format!("{e:#}")))
}

#[derive(Debug, Deserialize)]
struct UpdateReq {
    bidding_number: String,
}

async fn update_from_source(
    State(state): State<AppState>,
    Json(req): Json<UpdateReq>,
) -> Result<Json<ReconcileReport>, (StatusCode, Json<ErrorOut>)> {
    let stored = state
        .store
        .find_by_number(&req.bidding_number)
        .await
        .map_err(|e| error_response(StatusCode::INTERNAL_SERVER_ERROR, format!("{e:#}")))?
        .ok_or_else(|| {
            error_response(
                StatusCode::NOT_FOUND,
                format!("bidding '{}' not found", req.bidding_number),
            )
        })?;

    state
        .reconciler
        .update_from_source(&stored)
        .await
        .map(Json)
        .map_err(|e| error_response(StatusCode::BAD_GATEWAY, format!("{e:#}")))
}

#[derive(Serialize)]
struct ImportOut {
    success: bool,
    message: String,
    created: usize,
    skipped: usize,
    details: Vec<String>,
}

/// Search and persist the listings that are not yet stored.
async fn import(
    State(state): State<AppState>,
    Query(q): Query<SearchQuery>,
) -> Result<Json<ImportOut>, (StatusCode, Json<ErrorOut>)> {
    let result = state.aggregator.search(&q.selector(), &q.filters()).await;
    if !result.success {
        return Err(error_response(StatusCode::BAD_GATEWAY, result.message));
    }
    let (created, skipped) = state
        .aggregator
        .import(state.store.as_ref(), &result.data)
        .await
        .map_err(|e| error_response(StatusCode::INTERNAL_SERVER_ERROR, format!("{e:#}")))?;
    Ok(Json(ImportOut {
        success: true,
        message: format!("{created} created, {skipped} already stored"),
        created,
        skipped,
        details: result.details,
    }))
}
