//! Self-block removal for `accounts_blockrecord`.

use polars::prelude::*;
use tracing::info;

use super::{Transformation, ensure_not_emptied, equal_mask, rate, require_columns};
use crate::error::Result;
use crate::types::{TransformReport, round_to};

/// Drops rows where a user blocked themselves (`user_id == block_user_id`).
///
/// Rows with a null on either side are kept.
#[derive(Debug, Clone, Copy, Default)]
pub struct SelfRelationFilter;

impl SelfRelationFilter {
    pub const SUBJECT_COLUMN: &'static str = "user_id";
    pub const TARGET_COLUMN: &'static str = "block_user_id";
}

impl Transformation for SelfRelationFilter {
    fn name(&self) -> &str {
        "self-relation-filter"
    }

    fn apply(&self, df: DataFrame) -> Result<(DataFrame, TransformReport)> {
        require_columns(&df, &[Self::SUBJECT_COLUMN, Self::TARGET_COLUMN])?;

        let rows_in = df.height();
        let mut report = TransformReport::new(self.name(), rows_in);

        let keep: Vec<bool> = equal_mask(&df, Self::SUBJECT_COLUMN, Self::TARGET_COLUMN)?
            .into_iter()
            .map(|is_self| !is_self)
            .collect();
        let mask = BooleanChunked::from_slice("mask".into(), &keep);
        let df = df.filter(&mask)?;

        let removed = rows_in - df.height();
        let removal_rate = round_to(rate(removed, rows_in), 2);
        info!(
            "Removed {} self-block rows ({:.2}%): {} -> {} rows",
            removed,
            removal_rate,
            rows_in,
            df.height()
        );

        ensure_not_emptied(rows_in, &df)?;

        report.rows_out = df.height();
        report.removed = removed;
        report.note(format!("self-block removal rate: {:.2}%", removal_rate));
        Ok((df, report))
    }
}
