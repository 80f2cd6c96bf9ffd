//! Specialist classification for `accounts_user`.
//!
//! Users are outliers ("specialists") by point total, by friend count, or
//! both. Thresholds are fitted to the table being processed:
//!
//! - point: upper fence `Q3 + 3 * IQR` over non-null `point` values
//! - friends: 99th percentile of `friend_count`
//!
//! Quantiles use linear interpolation between closest ranks.

use polars::prelude::*;
use std::collections::HashMap;
use tracing::{debug, info, warn};

use super::{Transformation, ensure_not_emptied, rate, require_columns};
use crate::error::Result;
use crate::types::TransformReport;

const FRIEND_LIST_COLUMN: &str = "friend_id_list";
const POINT_COLUMN: &str = "point";
const FRIEND_COUNT_COLUMN: &str = "friend_count";

/// Linear-interpolated quantile of an ascending slice.
///
/// Returns NaN for an empty slice; every comparison against NaN is false, so
/// no row is classified from an empty distribution.
pub fn quantile_sorted(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return f64::NAN;
    }
    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = pos.floor() as usize;
    let upper = pos.ceil() as usize;
    let frac = pos - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * frac
}

/// Error from [`parse_list_literal`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("invalid list literal at byte {position}: {message}")]
pub struct ListParseError {
    pub position: usize,
    pub message: String,
}

/// Count the elements of a textual list literal.
///
/// Accepts JSON arrays as well as Python-style literals (single-quoted
/// strings, `None`/`True`/`False`, tuples, trailing commas). Blank input and
/// `[]` count as zero.
pub fn parse_list_literal(text: &str) -> std::result::Result<usize, ListParseError> {
    let trimmed = text.trim();
    if trimmed.is_empty() || trimmed == "[]" {
        return Ok(0);
    }

    let mut parser = LiteralParser::new(trimmed);
    let count = match parser.peek() {
        Some(b'[') | Some(b'(') => parser.sequence()?,
        _ => return Err(parser.error("expected a list")),
    };
    parser.skip_whitespace();
    if parser.pos != parser.bytes.len() {
        return Err(parser.error("trailing characters"));
    }
    Ok(count)
}

struct LiteralParser<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> LiteralParser<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            bytes: text.as_bytes(),
            pos: 0,
        }
    }

    fn error(&self, message: &str) -> ListParseError {
        ListParseError {
            position: self.pos,
            message: message.to_string(),
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.peek(), Some(b' ' | b'\t' | b'\n' | b'\r')) {
            self.pos += 1;
        }
    }

    /// Parse `[...]` or `(...)` and return the number of top-level items.
    fn sequence(&mut self) -> std::result::Result<usize, ListParseError> {
        let close = match self.peek() {
            Some(b'[') => b']',
            Some(b'(') => b')',
            _ => return Err(self.error("expected '[' or '('")),
        };
        self.pos += 1;

        let mut count = 0;
        loop {
            self.skip_whitespace();
            if self.peek() == Some(close) {
                self.pos += 1;
                return Ok(count);
            }
            self.value()?;
            count += 1;
            self.skip_whitespace();
            match self.peek() {
                Some(b',') => self.pos += 1,
                Some(c) if c == close => {
                    self.pos += 1;
                    return Ok(count);
                }
                Some(_) => return Err(self.error("expected ',' or closing bracket")),
                None => return Err(self.error("unterminated list")),
            }
        }
    }

    fn value(&mut self) -> std::result::Result<(), ListParseError> {
        match self.peek() {
            Some(b'[') | Some(b'(') => self.sequence().map(|_| ()),
            Some(q @ (b'\'' | b'"')) => self.string(q),
            Some(c) if c == b'-' || c == b'+' || c.is_ascii_digit() || c == b'.' => self.number(),
            Some(c) if c.is_ascii_alphabetic() => self.keyword(),
            Some(_) => Err(self.error("unexpected character")),
            None => Err(self.error("unexpected end of input")),
        }
    }

    fn string(&mut self, quote: u8) -> std::result::Result<(), ListParseError> {
        self.pos += 1;
        while let Some(c) = self.peek() {
            self.pos += 1;
            if c == b'\\' {
                self.pos += 1;
            } else if c == quote {
                return Ok(());
            }
        }
        Err(self.error("unterminated string"))
    }

    fn number(&mut self) -> std::result::Result<(), ListParseError> {
        let start = self.pos;
        while matches!(
            self.peek(),
            Some(b'0'..=b'9' | b'.' | b'-' | b'+' | b'e' | b'E' | b'_')
        ) {
            self.pos += 1;
        }
        let token = std::str::from_utf8(&self.bytes[start..self.pos])
            .map_err(|_| self.error("invalid number"))?
            .replace('_', "");
        token
            .parse::<f64>()
            .map(|_| ())
            .map_err(|_| self.error("invalid number"))
    }

    fn keyword(&mut self) -> std::result::Result<(), ListParseError> {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_alphanumeric() || c == b'_') {
            self.pos += 1;
        }
        match &self.bytes[start..self.pos] {
            b"None" | b"True" | b"False" | b"null" | b"true" | b"false" => Ok(()),
            _ => {
                self.pos = start;
                Err(self.error("unknown identifier"))
            }
        }
    }
}

/// Per-row friend counts from `friend_id_list`.
///
/// List columns use the list length. String columns are parsed as list
/// literals; a parse failure logs a warning and counts as zero.
fn friend_counts(df: &DataFrame) -> Result<Vec<u32>> {
    let column = df.column(FRIEND_LIST_COLUMN)?;
    match column.dtype() {
        DataType::List(_) => Ok(column
            .list()?
            .into_iter()
            .map(|item| item.map(|s| s.len() as u32).unwrap_or(0))
            .collect()),
        DataType::String => {
            let mut failures = 0usize;
            let counts: Vec<u32> = column
                .str()?
                .into_iter()
                .map(|item| match item {
                    None => 0,
                    Some(text) => parse_list_literal(text).unwrap_or_else(|e| {
                        failures += 1;
                        warn!("Failed to parse friend list {:?} ({}); using an empty list", text, e);
                        0
                    }) as u32,
                })
                .collect();
            if failures > 0 {
                warn!("{} friend lists could not be parsed", failures);
            }
            Ok(counts)
        }
        other => {
            warn!(
                "Unsupported dtype {} for {}; all friend counts set to 0",
                other, FRIEND_LIST_COLUMN
            );
            Ok(vec![0; df.height()])
        }
    }
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if n == 0 { f64::NAN } else { sum / n as f64 }
}

/// Flags point and friend-count outliers.
///
/// Adds `friend_count`, `is_point_specialist`, `is_friend_specialist`,
/// `is_specialist` and `specialist_type`. Existing columns with these names
/// are replaced, so reprocessing an output table yields identical values.
#[derive(Debug, Clone, Copy, Default)]
pub struct SpecialistClassifier;

impl SpecialistClassifier {
    /// Multiplier on the IQR for the point fence.
    pub const IQR_MULTIPLIER: f64 = 3.0;
    /// Quantile of `friend_count` used as the friend threshold.
    pub const FRIEND_QUANTILE: f64 = 0.99;
}

impl Transformation for SpecialistClassifier {
    fn name(&self) -> &str {
        "specialist-classification"
    }

    fn apply(&self, mut df: DataFrame) -> Result<(DataFrame, TransformReport)> {
        require_columns(&df, &[FRIEND_LIST_COLUMN, POINT_COLUMN])?;

        let rows_in = df.height();
        let mut report = TransformReport::new(self.name(), rows_in);

        debug!("Counting friends");
        let friends = friend_counts(&df)?;
        let points_col = df.column(POINT_COLUMN)?.cast(&DataType::Float64)?;
        let points: Vec<Option<f64>> = points_col.f64()?.into_iter().collect();

        let mut sorted_points: Vec<f64> = points.iter().flatten().copied().collect();
        sorted_points.sort_by(|a, b| a.total_cmp(b));
        let mut sorted_friends: Vec<f64> = friends.iter().map(|&f| f as f64).collect();
        sorted_friends.sort_by(|a, b| a.total_cmp(b));

        if let (Some(min), Some(max)) = (sorted_points.first(), sorted_points.last()) {
            info!(
                "Point stats: min={}, max={}, mean={:.1}",
                min,
                max,
                mean(sorted_points.iter().copied())
            );
        }
        if let (Some(min), Some(max)) = (sorted_friends.first(), sorted_friends.last()) {
            info!(
                "Friend count stats: min={}, max={}, mean={:.1}",
                min,
                max,
                mean(sorted_friends.iter().copied())
            );
        }

        let q1 = quantile_sorted(&sorted_points, 0.25);
        let q3 = quantile_sorted(&sorted_points, 0.75);
        let point_threshold = q3 + Self::IQR_MULTIPLIER * (q3 - q1);
        let friend_threshold = quantile_sorted(&sorted_friends, Self::FRIEND_QUANTILE);
        info!(
            "Specialist thresholds: point >= {:.1}, friends >= {:.1}",
            point_threshold, friend_threshold
        );

        let is_point: Vec<bool> = points
            .iter()
            .map(|p| p.is_some_and(|p| p >= point_threshold))
            .collect();
        let is_friend: Vec<bool> = friends
            .iter()
            .map(|&f| f as f64 >= friend_threshold)
            .collect();
        let is_specialist: Vec<bool> = is_point
            .iter()
            .zip(&is_friend)
            .map(|(&p, &f)| p || f)
            .collect();
        let specialist_type: Vec<&str> = is_point
            .iter()
            .zip(&is_friend)
            .map(|(&p, &f)| match (p, f) {
                (true, true) => "both",
                (true, false) => "point",
                (false, true) => "friend",
                (false, false) => "normal",
            })
            .collect();

        let specialists = is_specialist.iter().filter(|&&s| s).count();
        let point_specialists = is_point.iter().filter(|&&s| s).count();
        let friend_specialists = is_friend.iter().filter(|&&s| s).count();

        info!(
            "Specialists: {} ({:.2}%), point: {}, friend: {}, normal: {}",
            specialists,
            rate(specialists, rows_in),
            point_specialists,
            friend_specialists,
            rows_in - specialists
        );

        let mut by_type: HashMap<&str, usize> = HashMap::new();
        for t in &specialist_type {
            *by_type.entry(t).or_default() += 1;
        }
        let mut by_type: Vec<(&str, usize)> = by_type.into_iter().collect();
        by_type.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
        for (kind, count) in &by_type {
            info!("  {}: {} ({:.2}%)", kind, count, rate(*count, rows_in));
            report.note(format!("{}: {} ({:.2}%)", kind, count, rate(*count, rows_in)));
        }

        if specialists > 0 {
            let group_mean = |want: bool, values: &dyn Fn(usize) -> Option<f64>| {
                mean(
                    (0..rows_in)
                        .filter(|&i| is_specialist[i] == want)
                        .filter_map(values),
                )
            };
            let point_at = |i: usize| points[i];
            let friends_at = |i: usize| Some(friends[i] as f64);
            info!(
                "Mean point: specialists {:.1}, others {:.1}",
                group_mean(true, &point_at),
                group_mean(false, &point_at)
            );
            info!(
                "Mean friend count: specialists {:.1}, others {:.1}",
                group_mean(true, &friends_at),
                group_mean(false, &friends_at)
            );
        }

        df.with_column(Series::new(FRIEND_COUNT_COLUMN.into(), friends))?;
        df.with_column(Series::new("is_point_specialist".into(), is_point))?;
        df.with_column(Series::new("is_friend_specialist".into(), is_friend))?;
        df.with_column(Series::new("is_specialist".into(), is_specialist))?;
        df.with_column(Series::new("specialist_type".into(), specialist_type))?;

        ensure_not_emptied(rows_in, &df)?;

        report.rows_out = df.height();
        report.flagged = specialists;
        report.note(format!(
            "thresholds: point >= {:.1}, friends >= {:.1}",
            point_threshold, friend_threshold
        ));
        Ok((df, report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==== quantiles ====

    #[test]
    fn test_quantile_linear_interpolation() {
        let data = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(quantile_sorted(&data, 0.25), 1.75);
        assert_eq!(quantile_sorted(&data, 0.5), 2.5);
        assert_eq!(quantile_sorted(&data, 0.75), 3.25);
        assert_eq!(quantile_sorted(&data, 1.0), 4.0);
        assert!(quantile_sorted(&[], 0.5).is_nan());
    }

    // ==== list literal parsing ====

    #[test]
    fn test_parse_json_and_python_lists() {
        assert_eq!(parse_list_literal("[1, 2, 3]"), Ok(3));
        assert_eq!(parse_list_literal("['a', \"b\"]"), Ok(2));
        assert_eq!(parse_list_literal("[None, True, false, null]"), Ok(4));
        assert_eq!(parse_list_literal("[1, 2,]"), Ok(2));
        assert_eq!(parse_list_literal("[[1, 2], [3]]"), Ok(2));
        assert_eq!(parse_list_literal("(7, 8)"), Ok(2));
        assert_eq!(parse_list_literal("['it\\'s', 'x,y']"), Ok(2));
    }

    #[test]
    fn test_parse_empty_inputs() {
        assert_eq!(parse_list_literal(""), Ok(0));
        assert_eq!(parse_list_literal("   "), Ok(0));
        assert_eq!(parse_list_literal("[]"), Ok(0));
        assert_eq!(parse_list_literal(" [ ] "), Ok(0));
    }

    #[test]
    fn test_parse_failures() {
        assert!(parse_list_literal("[1, 2").is_err());
        assert!(parse_list_literal("not a list").is_err());
        assert!(parse_list_literal("[abc]").is_err());
        assert!(parse_list_literal("42").is_err());
        assert!(parse_list_literal("[1] extra").is_err());
    }

    // ==== classification ====

    fn users() -> DataFrame {
        let lists: Vec<String> = (0..20)
            .map(|i| {
                let n = if i == 19 { 50 } else { i % 3 };
                let ids: Vec<String> = (0..n).map(|k| k.to_string()).collect();
                format!("[{}]", ids.join(", "))
            })
            .collect();
        let mut points: Vec<i64> = (0..20).map(|i| 100 + i).collect();
        points[0] = 10_000;
        points[19] = 20_000;

        df! {
            "id" => (0..20i64).collect::<Vec<_>>(),
            "friend_id_list" => lists,
            "point" => points,
        }
        .unwrap()
    }

    fn bools(df: &DataFrame, name: &str) -> Vec<bool> {
        df.column(name)
            .unwrap()
            .bool()
            .unwrap()
            .into_iter()
            .map(|v| v.unwrap())
            .collect()
    }

    fn types(df: &DataFrame) -> Vec<String> {
        df.column("specialist_type")
            .unwrap()
            .str()
            .unwrap()
            .into_iter()
            .map(|v| v.unwrap().to_string())
            .collect()
    }

    #[test]
    fn test_classification_categories() {
        let (out, report) = SpecialistClassifier.apply(users()).unwrap();

        assert_eq!(out.height(), 20);
        let types = types(&out);
        assert_eq!(types[0], "point");
        assert_eq!(types[19], "both");
        assert!(types[1..19].iter().all(|t| t == "normal"));
        assert_eq!(report.flagged, 2);

        let friend_count: Vec<u32> = out
            .column("friend_count")
            .unwrap()
            .u32()
            .unwrap()
            .into_iter()
            .map(|v| v.unwrap())
            .collect();
        assert_eq!(friend_count[19], 50);
        assert_eq!(friend_count[4], 1);
    }

    #[test]
    fn test_flags_are_consistent() {
        let (out, _) = SpecialistClassifier.apply(users()).unwrap();

        let point = bools(&out, "is_point_specialist");
        let friend = bools(&out, "is_friend_specialist");
        let any = bools(&out, "is_specialist");
        let types = types(&out);

        for i in 0..out.height() {
            assert_eq!(any[i], point[i] || friend[i]);
            assert_eq!(types[i] == "both", point[i] && friend[i]);
            assert_eq!(types[i] == "normal", !point[i] && !friend[i]);
        }
    }

    #[test]
    fn test_rerun_is_idempotent() {
        let (once, _) = SpecialistClassifier.apply(users()).unwrap();
        let (twice, _) = SpecialistClassifier.apply(once.clone()).unwrap();

        assert_eq!(once.get_column_names(), twice.get_column_names());
        assert!(once.equals(&twice));
    }

    #[test]
    fn test_unparseable_and_null_lists_count_zero() {
        let df = df! {
            "friend_id_list" => [Some("[1, 2]"), Some("garbage"), None, Some("")],
            "point" => [Some(1i64), Some(2), None, Some(4)],
        }
        .unwrap();

        let (out, _) = SpecialistClassifier.apply(df).unwrap();
        let counts: Vec<Option<u32>> = out
            .column("friend_count")
            .unwrap()
            .u32()
            .unwrap()
            .into_iter()
            .collect();
        assert_eq!(counts, vec![Some(2), Some(0), Some(0), Some(0)]);
        // A null point is never a point specialist.
        assert!(!bools(&out, "is_point_specialist")[2]);
    }

    #[test]
    fn test_list_typed_friend_column() {
        let lists = Series::new(
            "friend_id_list".into(),
            [
                Series::new("".into(), [1i64, 2, 3]),
                Series::new("".into(), Vec::<i64>::new()),
            ],
        );
        let points = Series::new("point".into(), [5i64, 6]);
        let df = DataFrame::new(vec![lists.into(), points.into()]).unwrap();

        let (out, _) = SpecialistClassifier.apply(df).unwrap();
        let counts: Vec<Option<u32>> = out
            .column("friend_count")
            .unwrap()
            .u32()
            .unwrap()
            .into_iter()
            .collect();
        assert_eq!(counts, vec![Some(3), Some(0)]);
    }

    #[test]
    fn test_missing_point_column() {
        let df = df! { "friend_id_list" => ["[]"] }.unwrap();
        let err = SpecialistClassifier.apply(df).unwrap_err();
        assert!(err.to_string().contains("point"));
    }
}
