//! Self-vote flag for `accounts_userquestionrecord`.

use polars::prelude::*;
use tracing::info;

use super::{Transformation, ensure_not_emptied, equal_mask, rate, require_columns};
use crate::error::Result;
use crate::types::TransformReport;

/// Adds `is_self_love`: whether the voter chose themselves.
///
/// Never removes rows. An existing `is_self_love` column is recomputed.
#[derive(Debug, Clone, Copy, Default)]
pub struct SelfVoteFlag;

impl SelfVoteFlag {
    pub const FLAG_COLUMN: &'static str = "is_self_love";
}

impl Transformation for SelfVoteFlag {
    fn name(&self) -> &str {
        "self-vote-flag"
    }

    fn apply(&self, mut df: DataFrame) -> Result<(DataFrame, TransformReport)> {
        require_columns(&df, &["user_id", "chosen_user_id"])?;

        let rows_in = df.height();
        let mut report = TransformReport::new(self.name(), rows_in);

        let flags = equal_mask(&df, "user_id", "chosen_user_id")?;
        let self_votes = flags.iter().filter(|&&f| f).count();
        df.with_column(Series::new(Self::FLAG_COLUMN.into(), flags))?;

        let self_vote_rate = rate(self_votes, rows_in);
        info!(
            "Flagged {} self-votes out of {} records ({:.3}%)",
            self_votes, rows_in, self_vote_rate
        );

        ensure_not_emptied(rows_in, &df)?;

        report.rows_out = df.height();
        report.flagged = self_votes;
        report.note(format!("self-vote rate: {:.3}%", self_vote_rate));
        Ok((df, report))
    }
}
