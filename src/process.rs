// src/process.rs
//! Post-merge result processing: dedup, segment filter, sort, limit.
//!
//! `process` is a pure function and its steps run in a fixed order — dedup
//! first so the segment filter and limit operate on unique records, sort
//! before truncation so the limit keeps the most recent items.

use std::collections::HashSet;

use chrono::{DateTime, Utc};

use crate::model::{NormalizedBiddingRecord, SearchFilters};
use crate::segments;

pub fn process(
    records: Vec<NormalizedBiddingRecord>,
    filters: &SearchFilters,
) -> Vec<NormalizedBiddingRecord> {
    // 1) Dedup by (source, bidding_number), first occurrence wins.
    //    Records without a bidding number are dropped outright.
    let mut seen: HashSet<(String, String)> = HashSet::new();
    let mut unique = Vec::with_capacity(records.len());
    for rec in records {
        if rec.bidding_number.trim().is_empty() {
            continue;
        }
        if seen.insert(rec.dedup_key()) {
            unique.push(rec);
        }
    }

    // 2) Segment filter over title + description.
    if let Some(segment) = &filters.segment {
        unique.retain(|rec| {
            let text = format!("{} {}", rec.title, rec.description);
            segments::matches(&text, segment)
        });
    }

    // 3) Sort by opening date, newest first. Missing or unparseable dates
    //    sort as the epoch and sink to the bottom.
    unique.sort_by_key(|rec| {
        std::cmp::Reverse(rec.opening_date.unwrap_or(DateTime::<Utc>::UNIX_EPOCH))
    });

    // 4) Truncate after sorting.
    unique.truncate(filters.effective_limit());
    unique
}
