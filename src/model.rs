// src/model.rs
//! Canonical record shapes shared by every fetcher, the aggregator and the
//! reconciler. Every external source, whatever its native schema, is
//! normalized into `NormalizedBiddingRecord` before anything else sees it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Procurement method. Closed set; anything a source reports that we cannot
/// map lands in `Unknown` rather than failing the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    PregaoEletronico,
    PregaoPresencial,
    Concorrencia,
    TomadaPrecos,
    Convite,
    Leilao,
    Concurso,
    Dispensa,
    Inexigibilidade,
    Rdc,
    Credenciamento,
    DialogoCompetitivo,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BiddingStatus {
    Pending,
    Active,
    Finished,
    Canceled,
    Unknown,
}

/// The canonical output unit of every fetcher.
///
/// `(source, bidding_number)` is the dedup identity within one aggregated
/// result set; it is not required to be globally unique across sources.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedBiddingRecord {
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
    pub source: String,
    pub source_name: String,
}

impl NormalizedBiddingRecord {
    /// Blank record with provenance filled in; fetchers populate the rest.
    pub fn for_source(key: &str, name: &str) -> Self {
        Self {
            bidding_number: String::new(),
            title: String::new(),
            description: String::new(),
            opening_date: None,
            closing_date: None,
            publication_date: None,
            modality: Modality::Unknown,
            status: BiddingStatus::Unknown,
            estimated_value: None,
            url_source: None,
            source: key.to_string(),
            source_name: name.to_string(),
        }
    }

    pub fn dedup_key(&self) -> (String, String) {
        (self.source.clone(), self.bidding_number.clone())
    }
}

pub const DEFAULT_LIMIT: usize = 100;

/// Search filters as supplied by the caller. Passed by reference to fetchers,
/// never mutated by them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchFilters {
    #[serde(default)]
    pub bidding_number: Option<String>,
    #[serde(default)]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub segment: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Per-source page offset; sources that paginate start at 1.
    #[serde(default)]
    pub page: Option<u32>,
}

fn default_limit() -> usize {
    DEFAULT_LIMIT
}

impl Default for SearchFilters {
    fn default() -> Self {
        Self {
            bidding_number: None,
            start_date: None,
            end_date: None,
            segment: None,
            limit: DEFAULT_LIMIT,
            page: None,
        }
    }
}

impl SearchFilters {
    /// Effective limit: caller value clamped to at least 1.
    pub fn effective_limit(&self) -> usize {
        self.limit.max(1)
    }

    /// Deterministic key/value projection used for cache-key derivation.
    /// Only set filters appear; keys are later sorted by the cache layer.
    pub fn as_key_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = Vec::new();
        if let Some(n) = &self.bidding_number {
            pairs.push(("bidding_number".to_string(), n.clone()));
        }
        if let Some(d) = &self.start_date {
            pairs.push(("start_date".to_string(), d.to_rfc3339()));
        }
        if let Some(d) = &self.end_date {
            pairs.push(("end_date".to_string(), d.to_rfc3339()));
        }
        if let Some(s) = &self.segment {
            pairs.push(("segment".to_string(), s.clone()));
        }
        pairs.push(("limit".to_string(), self.effective_limit().to_string()));
        if let Some(p) = self.page {
            pairs.push(("page".to_string(), p.to_string()));
        }
        pairs
    }
}

/// Outcome of one search call, or of one fetcher within it. Constructed
/// fresh per call and never persisted; only `data` may be cached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub success: bool,
    pub message: String,
    pub count: usize,
    pub data: Vec<NormalizedBiddingRecord>,
    /// Per-source diagnostics ("source X skipped: disabled", ...).
    #[serde(default)]
    pub details: Vec<String>,
}

impl SearchResult {
    pub fn ok(message: impl Into<String>, data: Vec<NormalizedBiddingRecord>) -> Self {
        Self {
            success: true,
            message: message.into(),
            count: data.len(),
            data,
            details: Vec::new(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            count: 0,
            data: Vec::new(),
            details: Vec::new(),
        }
    }
}
