// src/reconcile.rs
//! Reconciliation: re-fetch one stored record's source of truth and persist
//! field-level drift.
//!
//! Comparison is type-aware so noise does not register as change: money is
//! compared at two decimal places, dates as parsed timestamps, strings
//! trimmed. A no-drift run still writes `last_checked_at`; if that
//! lightweight write fails we log and report success anyway, because the
//! detail fetch itself succeeded.

use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::fetch::FetcherSet;
use crate::model::NormalizedBiddingRecord;
use crate::sources::{self, SourceDescriptor};
use crate::store::{BiddingStore, ChangeSet, StoredBidding};

#[derive(Debug, Clone, Serialize)]
pub struct ReconcileReport {
    pub bidding_number: String,
    pub source: String,
    /// Names of fields that drifted; empty means timestamp-only refresh.
    pub changed_fields: Vec<String>,
    pub checked_at: DateTime<Utc>,
}

pub struct Reconciler {
    config: AppConfig,
    fetchers: Arc<FetcherSet>,
    store: Arc<dyn BiddingStore>,
}

impl Reconciler {
    pub fn new(config: AppConfig, fetchers: Arc<FetcherSet>, store: Arc<dyn BiddingStore>) -> Self {
        Self {
            config,
            fetchers,
            store,
        }
    }

    /// Resolve which source a stored record belongs to: explicit tag first,
    /// URL host detection as fallback. Gated sources are rejected.
    fn resolve_source(&self, stored: &StoredBidding) -> Result<&'static SourceDescriptor> {
        let desc = match stored.source.as_deref().filter(|s| !s.trim().is_empty()) {
            Some(key) => sources::get(key).ok_or_else(|| anyhow!("unknown source '{key}'"))?,
            None => stored
                .url_source
                .as_deref()
                .and_then(sources::detect_from_url)
                .ok_or_else(|| anyhow!("record has no source tag and no recognizable URL"))?,
        };

        if desc.status.is_blocked() {
            bail!("source '{}' is {:?} and cannot be reconciled", desc.key, desc.status);
        }
        if desc.status.is_fragile() && !self.config.allow_fragile {
            bail!(
                "source '{}' is {:?}; enable LICITA_ALLOW_FRAGILE to reconcile against it",
                desc.key,
                desc.status
            );
        }
        Ok(desc)
    }

    /// Fetch fresh detail for a stored record and persist a minimal
    /// changeset of drifted fields.
    pub async fn update_from_source(&self, stored: &StoredBidding) -> Result<ReconcileReport> {
        let desc = self.resolve_source(stored)?;

        let identifier = stored
            .source_item_id
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .or_else(|| Some(stored.bidding_number.as_str()).filter(|s| !s.trim().is_empty()))
            .ok_or_else(|| anyhow!("record has no identifier to fetch detail with"))?;

        let fetcher = self
            .fetchers
            .get(desc.key)
            .ok_or_else(|| anyhow!("no fetcher registered for source '{}'", desc.key))?;

        let fresh = fetcher.fetch_detail(identifier).await?;
        let mut changes = diff_record(stored, &fresh);
        let changed_fields: Vec<String> = changes.keys().cloned().collect();
        let now = Utc::now();
        changes.insert("last_checked_at".into(), json!(now.to_rfc3339()));

        if changed_fields.is_empty() {
            // Timestamp-only refresh; a failed write here is not worth
            // failing the call for.
            if let Err(e) = self.store.update(stored.id, &changes).await {
                warn!(id = stored.id, error = %e, "last_checked_at refresh failed");
            }
        } else {
            self.store.update(stored.id, &changes).await?;
            info!(
                id = stored.id,
                fields = ?changed_fields,
                "reconciled drifted fields"
            );
        }

        Ok(ReconcileReport {
            bidding_number: stored.bidding_number.clone(),
            source: desc.key.to_string(),
            changed_fields,
            checked_at: now,
        })
    }
}

/// Compare the fresh normalized detail against the stored row and collect
/// fields whose value drifted, keyed by stored-field name, valued with the
/// new value.
pub fn diff_record(stored: &StoredBidding, fresh: &NormalizedBiddingRecord) -> ChangeSet {
    let mut changes = ChangeSet::new();

    diff_string(&mut changes, "title", &stored.title, &fresh.title);
    diff_string(
        &mut changes,
        "description",
        &stored.description,
        &fresh.description,
    );
    diff_date(
        &mut changes,
        "opening_date",
        stored.opening_date,
        fresh.opening_date,
    );
    diff_date(
        &mut changes,
        "closing_date",
        stored.closing_date,
        fresh.closing_date,
    );
    diff_date(
        &mut changes,
        "publication_date",
        stored.publication_date,
        fresh.publication_date,
    );
    if stored.modality != fresh.modality {
        changes.insert("modality".into(), json!(fresh.modality));
    }
    if stored.status != fresh.status {
        changes.insert("status".into(), json!(fresh.status));
    }
    diff_money(
        &mut changes,
        "estimated_value",
        stored.estimated_value,
        fresh.estimated_value,
    );
    diff_opt_string(
        &mut changes,
        "url_source",
        stored.url_source.as_deref(),
        fresh.url_source.as_deref(),
    );

    changes
}

fn diff_string(changes: &mut ChangeSet, field: &str, stored: &str, fresh: &str) {
    // Fresh detail pages sometimes omit a field the listing had; an empty
    // fresh value is "not present", not a drift to blank.
    if fresh.trim().is_empty() {
        return;
    }
    if stored.trim() != fresh.trim() {
        changes.insert(field.to_string(), json!(fresh.trim()));
    }
}

fn diff_opt_string(changes: &mut ChangeSet, field: &str, stored: Option<&str>, fresh: Option<&str>) {
    let Some(fresh) = fresh.map(str::trim).filter(|s| !s.is_empty()) else {
        return;
    };
    if stored.map(str::trim) != Some(fresh) {
        changes.insert(field.to_string(), json!(fresh));
    }
}

fn diff_date(
    changes: &mut ChangeSet,
    field: &str,
    stored: Option<DateTime<Utc>>,
    fresh: Option<DateTime<Utc>>,
) {
    let Some(fresh) = fresh else { return };
    if stored != Some(fresh) {
        changes.insert(field.to_string(), json!(fresh.to_rfc3339()));
    }
}

/// Money drifts only beyond two decimal places of rounding; null on either
/// side compares as null.
fn diff_money(changes: &mut ChangeSet, field: &str, stored: Option<f64>, fresh: Option<f64>) {
    let round2 = |v: f64| (v * 100.0).round() / 100.0;
    match (stored, fresh) {
        (Some(a), Some(b)) => {
            if (round2(a) - round2(b)).abs() > f64::EPSILON {
                changes.insert(field.to_string(), json!(round2(b)));
            }
        }
        (None, Some(b)) => {
            changes.insert(field.to_string(), json!(round2(b)));
        }
        _ => {}
    }
}
