//! Event cleanup for `hackle_events`.
//!
//! Two stages, always in this order:
//!
//! 1. drop events whose `event_key` is in the exclusion set
//! 2. drop repeated `(session_id, event_datetime, event_key)` triples,
//!    keeping the first occurrence
//!
//! Excluded events are removed first so they never count as duplicates.

use polars::prelude::*;
use std::collections::{HashMap, HashSet};
use tracing::info;

use super::{Transformation, ensure_not_emptied, rate, require_columns};
use crate::config::{DEFAULT_EXCLUDED_EVENTS, EtlConfig};
use crate::error::Result;
use crate::types::TransformReport;

const EVENT_KEY_COLUMN: &str = "event_key";

/// Columns that identify a logged event.
pub const DEDUP_KEYS: [&str; 3] = ["session_id", "event_datetime", EVENT_KEY_COLUMN];

/// Removes excluded event types and duplicate events.
#[derive(Debug, Clone)]
pub struct EventCleanup {
    excluded: HashSet<String>,
    top_n: usize,
}

impl Default for EventCleanup {
    fn default() -> Self {
        Self::new(DEFAULT_EXCLUDED_EVENTS, 10)
    }
}

impl EventCleanup {
    pub fn new<I, S>(excluded: I, top_n: usize) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            excluded: excluded.into_iter().map(Into::into).collect(),
            top_n,
        }
    }

    pub fn from_config(config: &EtlConfig) -> Self {
        Self::new(config.excluded_events.iter().cloned(), config.top_event_types)
    }

    fn key_column(df: &DataFrame, name: &str) -> Result<StringChunked> {
        let column = df.column(name)?.cast(&DataType::String)?;
        Ok(column.str()?.clone())
    }

    fn exclude(&self, df: DataFrame) -> Result<DataFrame> {
        if self.excluded.is_empty() {
            return Ok(df);
        }
        let keys = Self::key_column(&df, EVENT_KEY_COLUMN)?;
        let keep: Vec<bool> = keys
            .into_iter()
            .map(|key| !key.is_some_and(|k| self.excluded.contains(k)))
            .collect();
        let mask = BooleanChunked::from_slice("mask".into(), &keep);
        Ok(df.filter(&mask)?)
    }

    fn deduplicate(df: DataFrame) -> Result<DataFrame> {
        let [session, datetime, event] = DEDUP_KEYS.map(|name| Self::key_column(&df, name));
        let (session, datetime, event) = (session?, datetime?, event?);

        let mut seen = HashSet::with_capacity(df.height());
        let keep: Vec<bool> = session
            .into_iter()
            .zip(datetime.into_iter())
            .zip(event.into_iter())
            .map(|((s, d), e)| seen.insert((s, d, e)))
            .collect();
        drop(seen);

        let mask = BooleanChunked::from_slice("mask".into(), &keep);
        Ok(df.filter(&mask)?)
    }

    /// Most frequent event keys, descending by count then by key.
    fn top_events(&self, df: &DataFrame) -> Result<Vec<(String, usize)>> {
        let keys = Self::key_column(df, EVENT_KEY_COLUMN)?;
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for key in keys.into_iter().flatten() {
            *counts.entry(key).or_default() += 1;
        }
        let mut counts: Vec<(String, usize)> = counts
            .into_iter()
            .map(|(k, n)| (k.to_string(), n))
            .collect();
        counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        counts.truncate(self.top_n);
        Ok(counts)
    }
}

impl Transformation for EventCleanup {
    fn name(&self) -> &str {
        "event-cleanup"
    }

    fn apply(&self, df: DataFrame) -> Result<(DataFrame, TransformReport)> {
        require_columns(&df, &DEDUP_KEYS)?;

        let rows_in = df.height();
        let mut report = TransformReport::new(self.name(), rows_in);

        let df = self.exclude(df)?;
        let after_exclusion = df.height();
        let excluded = rows_in - after_exclusion;
        info!(
            "Removed {} excluded events ({:.2}%)",
            excluded,
            rate(excluded, rows_in)
        );

        info!("Deduplicating on {:?}", DEDUP_KEYS);
        let df = Self::deduplicate(df)?;
        let duplicates = after_exclusion - df.height();
        info!(
            "Removed {} duplicate events ({:.2}%), {} remaining",
            duplicates,
            rate(duplicates, after_exclusion),
            df.height()
        );

        ensure_not_emptied(rows_in, &df)?;

        let top = self.top_events(&df)?;
        if !top.is_empty() {
            info!("Top {} event types:", top.len());
        }
        for (key, count) in &top {
            info!("  {}: {} ({:.2}%)", key, count, rate(*count, df.height()));
        }

        report.rows_out = df.height();
        report.removed = excluded + duplicates;
        report.note(format!(
            "excluded events: {} ({:.2}%)",
            excluded,
            rate(excluded, rows_in)
        ));
        report.note(format!(
            "duplicate events: {} ({:.2}%)",
            duplicates,
            rate(duplicates, after_exclusion)
        ));
        report.note(format!(
            "top events: {}",
            top.iter()
                .map(|(k, n)| format!("{}={}", k, n))
                .collect::<Vec<_>>()
                .join(", ")
        ));
        Ok((df, report))
    }
}
