// src/store.rs
//! Persistence boundary consumed by the aggregation core.
//!
//! The core never issues SQL; it only needs create / update / exists
//! semantics keyed by bidding number. The real web application supplies its
//! own implementation; `MemoryStore` backs tests and the demo binary.

use std::collections::BTreeMap;
use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::{BiddingStatus, Modality, NormalizedBiddingRecord};

/// A bidding record as persisted by the (external) storage layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredBidding {
    pub id: u64,
    pub bidding_number: String,
    pub title: String,
    pub description: String,
    pub opening_date: Option<DateTime<Utc>>,
    pub closing_date: Option<DateTime<Utc>>,
    pub publication_date: Option<DateTime<Utc>>,
    pub modality: Modality,
    pub status: BiddingStatus,
    pub estimated_value: Option<f64>,
    pub url_source: Option<String>,
    /// Source key; may be absent for records imported before provenance
    /// tracking, in which case the reconciler recovers it from the URL.
    pub source: Option<String>,
    /// Source-native detail identifier (control number, record id...).
    pub source_item_id: Option<String>,
    pub last_checked_at: Option<DateTime<Utc>>,
}

impl StoredBidding {
    pub fn from_record(id: u64, rec: &NormalizedBiddingRecord) -> Self {
        Self {
            id,
            bidding_number: rec.bidding_number.clone(),
            title: rec.title.clone(),
            description: rec.description.clone(),
            opening_date: rec.opening_date,
            closing_date: rec.closing_date,
            publication_date: rec.publication_date,
            modality: rec.modality,
            status: rec.status,
            estimated_value: rec.estimated_value,
            url_source: rec.url_source.clone(),
            source: Some(rec.source.clone()),
            source_item_id: None,
            last_checked_at: None,
        }
    }
}

/// Field-level partial update, produced by the reconciler and applied by the
/// store as one write. Keys are stored-field names; ordering is stable so
/// change reports read deterministically.
pub type ChangeSet = BTreeMap<String, Value>;

#[async_trait]
pub trait BiddingStore: Send + Sync {
    async fn create(&self, record: &NormalizedBiddingRecord) -> Result<StoredBidding>;
    async fn update(&self, id: u64, changes: &ChangeSet) -> Result<()>;
    async fn exists(&self, bidding_number: &str) -> Result<bool>;
    async fn find_by_number(&self, bidding_number: &str) -> Result<Option<StoredBidding>>;
}

/// In-memory store for tests and demos. Applies changesets field-by-field
/// the way the relational layer would.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Vec<StoredBidding>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Vec<StoredBidding> {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl BiddingStore for MemoryStore {
    async fn create(&self, record: &NormalizedBiddingRecord) -> Result<StoredBidding> {
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let id = guard.len() as u64 + 1;
        let stored = StoredBidding::from_record(id, record);
        guard.push(stored.clone());
        Ok(stored)
    }

    async fn update(&self, id: u64, changes: &ChangeSet) -> Result<()> {
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let row = guard
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| anyhow!("bidding {id} not found"))?;
        for (field, value) in changes {
            apply_field(row, field, value)?;
        }
        Ok(())
    }

    async fn exists(&self, bidding_number: &str) -> Result<bool> {
        let guard = self.inner.read().unwrap_or_else(|e| e.into_inner());
        Ok(guard.iter().any(|r| r.bidding_number == bidding_number))
    }

    async fn find_by_number(&self, bidding_number: &str) -> Result<Option<StoredBidding>> {
        let guard = self.inner.read().unwrap_or_else(|e| e.into_inner());
        Ok(guard
            .iter()
            .find(|r| r.bidding_number == bidding_number)
            .cloned())
    }
}

fn apply_field(row: &mut StoredBidding, field: &str, value: &Value) -> Result<()> {
    match field {
        "title" => row.title = as_string(value),
        "description" => row.description = as_string(value),
        "opening_date" => row.opening_date = as_datetime(value),
        "closing_date" => row.closing_date = as_datetime(value),
        "publication_date" => row.publication_date = as_datetime(value),
        "modality" => row.modality = serde_json::from_value(value.clone())?,
        "status" => row.status = serde_json::from_value(value.clone())?,
        "estimated_value" => row.estimated_value = value.as_f64(),
        "url_source" => row.url_source = value.as_str().map(str::to_string),
        "source" => row.source = value.as_str().map(str::to_string),
        "last_checked_at" => row.last_checked_at = as_datetime(value),
        other => return Err(anyhow!("unknown field in changeset: {other}")),
    }
    Ok(())
}

fn as_string(value: &Value) -> String {
    value.as_str().unwrap_or_default().to_string()
}

fn as_datetime(value: &Value) -> Option<DateTime<Utc>> {
    value
        .as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|d| d.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn create_exists_update_cycle() {
        let store = MemoryStore::new();
        let mut rec = NormalizedBiddingRecord::for_source("pncp", "PNCP");
        rec.bidding_number = "7/2025".into();
        rec.title = "old title".into();

        let stored = store.create(&rec).await.unwrap();
        assert!(store.exists("7/2025").await.unwrap());
        assert!(!store.exists("8/2025").await.unwrap());

        let mut changes = ChangeSet::new();
        changes.insert("title".into(), json!("new title"));
        changes.insert("estimated_value".into(), json!(10.5));
        store.update(stored.id, &changes).await.unwrap();

        let found = store.find_by_number("7/2025").await.unwrap().unwrap();
        assert_eq!(found.title, "new title");
        assert_eq!(found.estimated_value, Some(10.5));
    }

    #[tokio::test]
    async fn update_unknown_id_errors() {
        let store = MemoryStore::new();
        let changes = ChangeSet::new();
        assert!(store.update(99, &changes).await.is_err());
    }
}
