//! Frozen in-memory growth reference table.
//!
//! # Responsibility
//! - Accept reference rows through a single load path (`ReferenceTableLoader`).
//! - Validate, sort and seal them into an immutable `ReferenceTable`.
//! - Answer bracketing lookups for the z-score calculator.
//!
//! # Invariants
//! - `ReferenceTable` exposes no mutation API; the loader is consumed by
//!   `seal`, so no rows can be added once a table exists.
//! - Within one (indicator, gender) series keys are unique and ascending.
//! - Every sealed row has finite LMS values, `M > 0`, `S > 0` and strictly
//!   increasing SD cutoffs.

use crate::model::growth::{Gender, GrowthReferenceRow, Indicator};
use log::{error, info};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Rejected reference data.
#[derive(Debug, Clone, PartialEq)]
pub enum ReferenceError {
    /// A row violates a data-integrity rule.
    CorruptReferenceRow {
        indicator: Indicator,
        gender: Gender,
        key: String,
        reason: String,
    },
    /// Sealing was attempted without any rows.
    EmptyTable,
}

impl Display for ReferenceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CorruptReferenceRow {
                indicator,
                gender,
                key,
                reason,
            } => write!(
                f,
                "corrupt reference row {indicator}/{gender} at {key}: {reason}"
            ),
            Self::EmptyTable => write!(f, "reference table has no rows"),
        }
    }
}

impl Error for ReferenceError {}

/// LMS parameters at one key of a series.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReferencePoint {
    pub key: f64,
    pub l: f64,
    pub m: f64,
    pub s: f64,
}

/// Position of a lookup value inside a series.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Bracket {
    Exact(ReferencePoint),
    Between(ReferencePoint, ReferencePoint),
    OutOfRange { min: f64, max: f64 },
}

/// Accumulates rows before sealing. This is the only way rows enter a table.
#[derive(Debug, Default)]
pub struct ReferenceTableLoader {
    rows: Vec<GrowthReferenceRow>,
}

impl ReferenceTableLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues rows for sealing.
    ///
    /// Re-loading rows identical to already queued ones is a no-op at seal
    /// time; conflicting duplicates are rejected there.
    pub fn load(&mut self, rows: impl IntoIterator<Item = GrowthReferenceRow>) -> &mut Self {
        self.rows.extend(rows);
        self
    }

    /// Validates queued rows and freezes them into a `ReferenceTable`.
    pub fn seal(self) -> Result<ReferenceTable, ReferenceError> {
        let queued = self.rows.len();
        match build_table(self.rows) {
            Ok(table) => {
                info!(
                    "event=reference_seal module=growth status=ok queued_rows={} rows={} series={} fingerprint={}",
                    queued,
                    table.row_count,
                    table.series.len(),
                    table.fingerprint
                );
                Ok(table)
            }
            Err(err) => {
                error!(
                    "event=reference_seal module=growth status=error queued_rows={} error={}",
                    queued, err
                );
                Err(err)
            }
        }
    }
}

/// Sealed, read-only reference table shared across evaluations.
#[derive(Debug)]
pub struct ReferenceTable {
    series: HashMap<(Indicator, Gender), Vec<ReferencePoint>>,
    row_count: usize,
    fingerprint: String,
}

impl ReferenceTable {
    /// Builds a sealed table in one step.
    pub fn from_rows(
        rows: impl IntoIterator<Item = GrowthReferenceRow>,
    ) -> Result<Self, ReferenceError> {
        let mut loader = ReferenceTableLoader::new();
        loader.load(rows);
        loader.seal()
    }

    pub fn len(&self) -> usize {
        self.row_count
    }

    pub fn is_empty(&self) -> bool {
        self.row_count == 0
    }

    /// SHA-256 over the canonical row set; equal data yields equal fingerprints.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn has_series(&self, indicator: Indicator, gender: Gender) -> bool {
        self.series.contains_key(&(indicator, gender))
    }

    /// Returns `(min, max)` keys of one series.
    pub fn bounds(&self, indicator: Indicator, gender: Gender) -> Option<(f64, f64)> {
        let points = self.series.get(&(indicator, gender))?;
        Some((points.first()?.key, points.last()?.key))
    }

    /// Locates `value` among the keys of one series.
    ///
    /// Returns `None` when no series exists for (indicator, gender).
    pub fn bracket(&self, indicator: Indicator, gender: Gender, value: f64) -> Option<Bracket> {
        let points = self.series.get(&(indicator, gender))?;
        let (first, last) = (points.first()?, points.last()?);
        if !(first.key..=last.key).contains(&value) {
            return Some(Bracket::OutOfRange {
                min: first.key,
                max: last.key,
            });
        }

        let upper = points.partition_point(|point| point.key < value);
        let upper_point = points[upper];
        if upper_point.key == value {
            return Some(Bracket::Exact(upper_point));
        }
        // `value` is strictly above `first.key` here, so `upper >= 1`.
        Some(Bracket::Between(points[upper - 1], upper_point))
    }
}

/// Computes the fingerprint of a row set without sealing it.
///
/// Matches `ReferenceTable::fingerprint` for any row set that seals cleanly.
pub fn fingerprint_rows(rows: &[GrowthReferenceRow]) -> String {
    let mut sorted = rows.to_vec();
    sort_rows(&mut sorted);
    sorted.dedup();
    hash_sorted_rows(&sorted)
}

fn build_table(mut rows: Vec<GrowthReferenceRow>) -> Result<ReferenceTable, ReferenceError> {
    if rows.is_empty() {
        return Err(ReferenceError::EmptyTable);
    }
    for row in &rows {
        validate_row(row)?;
    }

    sort_rows(&mut rows);
    let mut unique: Vec<GrowthReferenceRow> = Vec::with_capacity(rows.len());
    for row in rows {
        if let Some(previous) = unique.last() {
            if same_key(previous, &row) {
                if *previous == row {
                    continue;
                }
                return Err(corrupt(&row, "conflicting duplicate key"));
            }
        }
        unique.push(row);
    }

    let mut series: HashMap<(Indicator, Gender), Vec<ReferencePoint>> = HashMap::new();
    for row in &unique {
        let key = row.key().ok_or_else(|| corrupt(row, "missing key"))?;
        series
            .entry((row.indicator, row.gender))
            .or_default()
            .push(ReferencePoint {
                key,
                l: row.l,
                m: row.m,
                s: row.s,
            });
    }

    Ok(ReferenceTable {
        series,
        row_count: unique.len(),
        fingerprint: hash_sorted_rows(&unique),
    })
}

fn validate_row(row: &GrowthReferenceRow) -> Result<(), ReferenceError> {
    let key = match row.key() {
        Some(key) => key,
        None if row.indicator.is_age_indexed() => {
            return Err(corrupt(row, "age-indexed row requires age_days only"))
        }
        None => return Err(corrupt(row, "length-indexed row requires length_height_cm only")),
    };
    if !key.is_finite() || key < 0.0 {
        return Err(corrupt(row, "key must be finite and non-negative"));
    }
    if !(row.l.is_finite() && row.m.is_finite() && row.s.is_finite()) {
        return Err(corrupt(row, "LMS parameters must be finite"));
    }
    if row.m <= 0.0 {
        return Err(corrupt(row, "M must be positive"));
    }
    if row.s <= 0.0 {
        return Err(corrupt(row, "S must be positive"));
    }
    if !row.sd.as_array().iter().all(|value| value.is_finite()) || !row.sd.is_strictly_increasing()
    {
        return Err(corrupt(row, "SD cutoffs must be finite and strictly increasing"));
    }
    Ok(())
}

fn sort_rows(rows: &mut [GrowthReferenceRow]) {
    rows.sort_by(|left, right| {
        (left.indicator, left.gender)
            .cmp(&(right.indicator, right.gender))
            .then_with(|| {
                let left_key = left.key().unwrap_or(f64::NAN);
                let right_key = right.key().unwrap_or(f64::NAN);
                left_key.total_cmp(&right_key)
            })
    });
}

fn same_key(left: &GrowthReferenceRow, right: &GrowthReferenceRow) -> bool {
    left.indicator == right.indicator && left.gender == right.gender && left.key() == right.key()
}

fn hash_sorted_rows(rows: &[GrowthReferenceRow]) -> String {
    let mut hasher = Sha256::new();
    for row in rows {
        hasher.update(
            format!(
                "{}|{}|{}|{}|{:e}|{:e}|{:e}|{:?}\n",
                row.indicator,
                row.gender,
                row.age_days.map_or_else(String::new, |age| age.to_string()),
                row.length_height_cm
                    .map_or_else(String::new, |cm| format!("{cm:e}")),
                row.l,
                row.m,
                row.s,
                row.sd.as_array(),
            )
            .as_bytes(),
        );
    }
    hex::encode(hasher.finalize())
}

fn corrupt(row: &GrowthReferenceRow, reason: &str) -> ReferenceError {
    ReferenceError::CorruptReferenceRow {
        indicator: row.indicator,
        gender: row.gender,
        key: row.key_label(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::{Bracket, ReferenceError, ReferenceTable, ReferenceTableLoader};
    use crate::model::growth::{Gender, GrowthReferenceRow, Indicator, SdCutoffs};

    fn row(age_days: u32, m: f64) -> GrowthReferenceRow {
        GrowthReferenceRow {
            indicator: Indicator::WeightForAge,
            gender: Gender::Female,
            age_days: Some(age_days),
            length_height_cm: None,
            l: 1.0,
            m,
            s: 0.1,
            sd: SdCutoffs {
                sd3neg: m * 0.7,
                sd2neg: m * 0.8,
                sd1neg: m * 0.9,
                sd0: m,
                sd1: m * 1.1,
                sd2: m * 1.2,
                sd3: m * 1.3,
            },
        }
    }

    #[test]
    fn seal_sorts_rows_and_brackets_lookups() {
        let table = ReferenceTable::from_rows(vec![row(20, 4.0), row(0, 3.0), row(10, 3.5)])
            .unwrap();

        assert_eq!(table.len(), 3);
        assert_eq!(
            table.bounds(Indicator::WeightForAge, Gender::Female),
            Some((0.0, 20.0))
        );
        match table.bracket(Indicator::WeightForAge, Gender::Female, 10.0) {
            Some(Bracket::Exact(point)) => assert_eq!(point.m, 3.5),
            other => panic!("unexpected bracket: {other:?}"),
        }
        match table.bracket(Indicator::WeightForAge, Gender::Female, 15.0) {
            Some(Bracket::Between(lower, upper)) => {
                assert_eq!(lower.key, 10.0);
                assert_eq!(upper.key, 20.0);
            }
            other => panic!("unexpected bracket: {other:?}"),
        }
        assert!(matches!(
            table.bracket(Indicator::WeightForAge, Gender::Female, 21.0),
            Some(Bracket::OutOfRange { .. })
        ));
        assert!(table
            .bracket(Indicator::WeightForAge, Gender::Male, 10.0)
            .is_none());
    }

    #[test]
    fn identical_reload_is_a_no_op() {
        let mut loader = ReferenceTableLoader::new();
        loader.load(vec![row(0, 3.0), row(10, 3.5)]);
        loader.load(vec![row(0, 3.0), row(10, 3.5)]);
        let reloaded = loader.seal().unwrap();

        let once = ReferenceTable::from_rows(vec![row(0, 3.0), row(10, 3.5)]).unwrap();
        assert_eq!(reloaded.len(), 2);
        assert_eq!(reloaded.fingerprint(), once.fingerprint());
    }

    #[test]
    fn conflicting_duplicate_is_rejected() {
        let err = ReferenceTable::from_rows(vec![row(0, 3.0), row(0, 3.1)]).unwrap_err();
        assert!(matches!(err, ReferenceError::CorruptReferenceRow { .. }));
    }

    #[test]
    fn rows_with_wrong_key_or_bad_lms_are_rejected() {
        let mut wrong_key = row(0, 3.0);
        wrong_key.length_height_cm = Some(50.0);
        assert!(ReferenceTable::from_rows(vec![wrong_key]).is_err());

        let mut zero_m = row(0, 3.0);
        zero_m.m = 0.0;
        let err = ReferenceTable::from_rows(vec![zero_m]).unwrap_err();
        assert!(err.to_string().contains("M must be positive"));

        let mut flat_sd = row(0, 3.0);
        flat_sd.sd.sd1 = flat_sd.sd.sd0;
        assert!(ReferenceTable::from_rows(vec![flat_sd]).is_err());

        assert_eq!(
            ReferenceTable::from_rows(Vec::new()).unwrap_err(),
            ReferenceError::EmptyTable
        );
    }
}
