//! Per-table cleaning rules.
//!
//! Each table in the pipeline has exactly one [`Transformation`]. A
//! transformation consumes a whole table and returns the cleaned table plus a
//! [`TransformReport`] of what it removed or flagged. Transformations never
//! add rows, and an empty result from a non-empty input is an error.

mod blockrecord;
mod hackle;
mod questionrecord;
mod user;

pub use blockrecord::SelfRelationFilter;
pub use hackle::EventCleanup;
pub use questionrecord::SelfVoteFlag;
pub use user::{ListParseError, SpecialistClassifier, parse_list_literal, quantile_sorted};

use polars::prelude::*;

use crate::error::{EtlError, Result};
use crate::types::TransformReport;

/// A pure table-in, table-out cleaning step.
///
/// Implementations must be `Send + Sync`; parallel runs share them between
/// pool workers.
pub trait Transformation: Send + Sync {
    /// Short name used in logs and reports.
    fn name(&self) -> &str;

    /// Apply the rule to `df`.
    fn apply(&self, df: DataFrame) -> Result<(DataFrame, TransformReport)>;
}

/// Fail with `Validation` naming every column in `required` that `df` lacks.
pub(crate) fn require_columns(df: &DataFrame, required: &[&str]) -> Result<()> {
    let missing: Vec<&str> = required
        .iter()
        .copied()
        .filter(|name| df.column(name).is_err())
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(EtlError::Validation(format!(
            "missing required columns: {:?}",
            missing
        )))
    }
}

/// Fail with `Validation` if a non-empty input was reduced to nothing.
pub(crate) fn ensure_not_emptied(rows_in: usize, df: &DataFrame) -> Result<()> {
    if rows_in > 0 && df.height() == 0 {
        return Err(EtlError::Validation(
            "table is empty after preprocessing".to_string(),
        ));
    }
    Ok(())
}

/// Row-wise `left == right`, with any null comparison counted as not equal.
pub(crate) fn equal_mask(df: &DataFrame, left: &str, right: &str) -> Result<Vec<bool>> {
    let left = df.column(left)?.as_materialized_series();
    let right = df.column(right)?.as_materialized_series();
    let eq = left.equal(right)?;
    Ok(eq.into_iter().map(|v| v == Some(true)).collect())
}

/// Percentage of `part` in `whole`, or 0 for an empty whole.
pub(crate) fn rate(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_columns_lists_all_missing() {
        let df = df! { "user_id" => [1i64] }.unwrap();
        let err = require_columns(&df, &["user_id", "block_user_id", "created_at"]).unwrap_err();

        let message = err.to_string();
        assert!(message.contains("block_user_id"));
        assert!(message.contains("created_at"));
        assert!(!message.contains("\"user_id\""));
    }

    #[test]
    fn test_equal_mask_nulls_are_not_equal() {
        let df = df! {
            "a" => [Some(1i64), None, Some(3), None],
            "b" => [Some(1i64), Some(2), None, None],
        }
        .unwrap();

        assert_eq!(equal_mask(&df, "a", "b").unwrap(), vec![true, false, false, false]);
    }

    #[test]
    fn test_ensure_not_emptied() {
        let empty = df! { "a" => Vec::<i64>::new() }.unwrap();
        assert!(ensure_not_emptied(0, &empty).is_ok());
        assert_eq!(
            ensure_not_emptied(3, &empty).unwrap_err().error_code(),
            "VALIDATION_ERROR"
        );
    }

    #[test]
    fn test_rate() {
        assert_eq!(rate(0, 0), 0.0);
        assert_eq!(rate(1, 4), 25.0);
    }
}
