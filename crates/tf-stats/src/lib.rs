#![forbid(unsafe_code)]

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tf_types::{DType, ErrorKind, Scalar};

/// Inputs at or above this length use quickselect under the default
/// strategy.
pub const DEFAULT_QUICKSELECT_MIN_LEN: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggFunc {
    Count,
    Mean,
    Median,
    Std,
    Min,
    Max,
    Q1,
    Q2,
    Q3,
}

impl AggFunc {
    pub const ALL: [Self; 9] = [
        Self::Count,
        Self::Mean,
        Self::Median,
        Self::Std,
        Self::Min,
        Self::Max,
        Self::Q1,
        Self::Q2,
        Self::Q3,
    ];

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Count => "count",
            Self::Mean => "mean",
            Self::Median => "median",
            Self::Std => "std",
            Self::Min => "min",
            Self::Max => "max",
            Self::Q1 => "q1",
            Self::Q2 => "q2",
            Self::Q3 => "q3",
        }
    }

    #[must_use]
    pub fn func(self) -> StatsFunc {
        match self {
            Self::Count => count,
            Self::Mean => mean,
            Self::Median => median,
            Self::Std => std,
            Self::Min => min,
            Self::Max => max,
            Self::Q1 => q1,
            Self::Q2 => q2,
            Self::Q3 => q3,
        }
    }

    pub fn compute_with(
        self,
        values: &[Scalar],
        options: &StatsOptions,
    ) -> Result<StatsResult, StatsError> {
        match self {
            Self::Median | Self::Q2 | Self::Q1 | Self::Q3 => quartile_with(self, values, options),
            other => other.func()(values),
        }
    }
}

impl fmt::Display for AggFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for AggFunc {
    type Err = StatsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|func| func.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| StatsError::UnknownFunction {
                name: s.to_owned(),
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StatsResult {
    pub used_func: AggFunc,
    pub result: f64,
}

/// Aggregation callback: one value column slice in, one number out.
pub type StatsFunc = fn(&[Scalar]) -> Result<StatsResult, StatsError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StatsError {
    #[error("{func}: no elements left after removing missing values")]
    EmptyDataset { func: AggFunc },
    #[error("{func}: needs at least {required} elements, found {actual}")]
    InsufficientData {
        func: AggFunc,
        required: usize,
        actual: usize,
    },
    #[error("{func}: value {value:?} of dtype {dtype} is not numeric")]
    NonNumeric {
        func: AggFunc,
        value: String,
        dtype: DType,
    },
    #[error("unknown aggregation function {name:?}")]
    UnknownFunction { name: String },
}

impl StatsError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::EmptyDataset { .. } => ErrorKind::EmptyDataset,
            Self::InsufficientData { .. } => ErrorKind::InsufficientData,
            Self::NonNumeric { .. } | Self::UnknownFunction { .. } => ErrorKind::TypeMismatch,
        }
    }
}

/// How order statistics are located.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SelectionStrategy {
    Sort,
    Quickselect,
    Auto { min_len: usize },
}

impl SelectionStrategy {
    fn uses_quickselect(self, len: usize) -> bool {
        match self {
            Self::Sort => false,
            Self::Quickselect => true,
            Self::Auto { min_len } => len >= min_len,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsOptions {
    pub selection: SelectionStrategy,
}

impl Default for StatsOptions {
    fn default() -> Self {
        Self {
            selection: SelectionStrategy::Auto {
                min_len: DEFAULT_QUICKSELECT_MIN_LEN,
            },
        }
    }
}

// ── Input handling ─────────────────────────────────────────────────────

fn numeric_values(func: AggFunc, values: &[Scalar]) -> Result<Vec<f64>, StatsError> {
    let mut out = Vec::with_capacity(values.len());
    for value in values.iter().filter(|v| !v.is_missing()) {
        match value {
            Scalar::Int64(v) => out.push(*v as f64),
            Scalar::Float64(v) => out.push(*v),
            other => {
                return Err(StatsError::NonNumeric {
                    func,
                    value: other.canonical_string(),
                    dtype: other.dtype().unwrap_or(DType::Utf8),
                });
            }
        }
    }
    if out.is_empty() {
        return Err(StatsError::EmptyDataset { func });
    }
    Ok(out)
}

/// Round to three decimals, halves away from zero.
#[must_use]
pub fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

fn done(used_func: AggFunc, result: f64) -> Result<StatsResult, StatsError> {
    Ok(StatsResult { used_func, result })
}

// ── Aggregators ────────────────────────────────────────────────────────

pub fn count(values: &[Scalar]) -> Result<StatsResult, StatsError> {
    let n = values.iter().filter(|v| !v.is_missing()).count();
    done(AggFunc::Count, n as f64)
}

pub fn mean(values: &[Scalar]) -> Result<StatsResult, StatsError> {
    let data = numeric_values(AggFunc::Mean, values)?;
    done(AggFunc::Mean, round3(raw_mean(&data)))
}

fn raw_mean(data: &[f64]) -> f64 {
    data.iter().sum::<f64>() / data.len() as f64
}

/// Sample standard deviation (n − 1 denominator).
pub fn std(values: &[Scalar]) -> Result<StatsResult, StatsError> {
    let data = numeric_values(AggFunc::Std, values)?;
    if data.len() < 2 {
        return Err(StatsError::InsufficientData {
            func: AggFunc::Std,
            required: 2,
            actual: data.len(),
        });
    }
    let center = raw_mean(&data);
    let sum_sq: f64 = data.iter().map(|v| (v - center).powi(2)).sum();
    done(
        AggFunc::Std,
        round3((sum_sq / (data.len() - 1) as f64).sqrt()),
    )
}

pub fn min(values: &[Scalar]) -> Result<StatsResult, StatsError> {
    let data = numeric_values(AggFunc::Min, values)?;
    let mut best = data[0];
    for &v in &data[1..] {
        if v < best {
            best = v;
        }
    }
    done(AggFunc::Min, best)
}

pub fn max(values: &[Scalar]) -> Result<StatsResult, StatsError> {
    let data = numeric_values(AggFunc::Max, values)?;
    let mut best = data[0];
    for &v in &data[1..] {
        if v > best {
            best = v;
        }
    }
    done(AggFunc::Max, best)
}

pub fn median(values: &[Scalar]) -> Result<StatsResult, StatsError> {
    quartile_with(AggFunc::Median, values, &StatsOptions::default())
}

pub fn q1(values: &[Scalar]) -> Result<StatsResult, StatsError> {
    quartile_with(AggFunc::Q1, values, &StatsOptions::default())
}

pub fn q2(values: &[Scalar]) -> Result<StatsResult, StatsError> {
    quartile_with(AggFunc::Q2, values, &StatsOptions::default())
}

pub fn q3(values: &[Scalar]) -> Result<StatsResult, StatsError> {
    quartile_with(AggFunc::Q3, values, &StatsOptions::default())
}

/// Median and quartiles with an explicit selection strategy.
///
/// Q1/Q3 use the exclusive convention: the median of the lower/upper half,
/// leaving out the middle element when the count is odd. Median/Q2 are
/// rounded to three decimals, Q1/Q3 are exact.
pub fn quartile_with(
    func: AggFunc,
    values: &[Scalar],
    options: &StatsOptions,
) -> Result<StatsResult, StatsError> {
    if !matches!(
        func,
        AggFunc::Median | AggFunc::Q1 | AggFunc::Q2 | AggFunc::Q3
    ) {
        return func.func()(values);
    }
    let data = numeric_values(func, values)?;
    let n = data.len();
    let (start, span) = match func {
        AggFunc::Q1 => (0, n / 2),
        AggFunc::Q3 => (n - n / 2, n / 2),
        _ => (0, n),
    };
    if span == 0 {
        return Err(StatsError::InsufficientData {
            func,
            required: 2,
            actual: n,
        });
    }

    let mut picker = if options.selection.uses_quickselect(n) {
        OrderStatistics::Selecting(data)
    } else {
        let mut sorted = data;
        sorted.sort_by(f64::total_cmp);
        OrderStatistics::Sorted(sorted)
    };
    let value = picker.median_of_span(start, span);
    let value = if matches!(func, AggFunc::Median | AggFunc::Q2) {
        round3(value)
    } else {
        value
    };
    done(func, value)
}

// ── Order statistics ───────────────────────────────────────────────────

enum OrderStatistics {
    Sorted(Vec<f64>),
    Selecting(Vec<f64>),
}

impl OrderStatistics {
    /// The k-th smallest value.
    fn nth(&mut self, k: usize) -> f64 {
        match self {
            Self::Sorted(sorted) => sorted[k],
            Self::Selecting(buf) => quickselect(buf, k),
        }
    }

    /// The (k−1)-th and k-th smallest values, `k >= 1`.
    fn adjacent(&mut self, k: usize) -> (f64, f64) {
        match self {
            Self::Sorted(sorted) => (sorted[k - 1], sorted[k]),
            Self::Selecting(buf) => {
                let upper = quickselect(buf, k);
                let lower = buf[..k]
                    .iter()
                    .copied()
                    .max_by(f64::total_cmp)
                    .unwrap_or(upper);
                (lower, upper)
            }
        }
    }

    /// Median of the globally ordered values at `start..start + span`.
    fn median_of_span(&mut self, start: usize, span: usize) -> f64 {
        let mid = start + span / 2;
        if span % 2 == 1 {
            self.nth(mid)
        } else {
            let (lower, upper) = self.adjacent(mid);
            (lower + upper) / 2.0
        }
    }
}

/// Place the k-th smallest value (under `f64::total_cmp`) at `values[k]` and
/// return it. Everything before `k` ends up `<=` it and everything after
/// `>=` it. Expected linear time.
///
/// # Panics
///
/// Panics if `k >= values.len()`.
pub fn quickselect(values: &mut [f64], k: usize) -> f64 {
    assert!(k < values.len(), "quickselect rank {k} out of bounds");
    let (mut lo, mut hi) = (0, values.len() - 1);
    while lo < hi {
        let pivot = values[lo + (hi - lo) / 2];
        let split = hoare_partition(values, lo, hi, pivot);
        if k <= split {
            hi = split;
        } else {
            lo = split + 1;
        }
    }
    values[k]
}

/// Hoare partition of `values[lo..=hi]` around `pivot` (taken from inside
/// the range). Returns `j` with `values[lo..=j] <= pivot <= values[j+1..=hi]`
/// and `lo <= j < hi`.
fn hoare_partition(values: &mut [f64], lo: usize, hi: usize, pivot: f64) -> usize {
    let (mut i, mut j) = (lo, hi);
    loop {
        while values[i].total_cmp(&pivot).is_lt() {
            i += 1;
        }
        while values[j].total_cmp(&pivot).is_gt() {
            j -= 1;
        }
        if i >= j {
            return j;
        }
        values.swap(i, j);
        i += 1;
        j -= 1;
    }
}

/// Every aggregator over one slice, skipping the ones that fail.
#[must_use]
pub fn describe(values: &[Scalar], options: &StatsOptions) -> Vec<StatsResult> {
    AggFunc::ALL
        .into_iter()
        .filter_map(|func| func.compute_with(values, options).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use tf_types::{ErrorKind, Scalar};

    use super::{
        AggFunc, SelectionStrategy, StatsOptions, count, describe, max, mean, median, min, q1, q2,
        q3, quartile_with, quickselect, std,
    };

    fn nums(values: &[f64]) -> Vec<Scalar> {
        values.iter().copied().map(Scalar::float).collect()
    }

    fn sorted_opts() -> StatsOptions {
        StatsOptions {
            selection: SelectionStrategy::Sort,
        }
    }

    fn select_opts() -> StatsOptions {
        StatsOptions {
            selection: SelectionStrategy::Quickselect,
        }
    }

    // ── Reference values ───────────────────────────────────────────────

    #[test]
    fn mean_of_one_to_four() {
        let out = mean(&nums(&[1.0, 2.0, 3.0, 4.0])).expect("mean");
        assert_eq!(out.result, 2.5);
        assert_eq!(out.used_func, AggFunc::Mean);
    }

    #[test]
    fn mean_rounds_to_three_decimals() {
        let out = mean(&nums(&[1.0, 1.0, 2.0])).expect("mean");
        assert_eq!(out.result, 1.333);
        let negative = mean(&nums(&[-1.0, -1.0, -2.0])).expect("mean");
        assert_eq!(negative.result, -1.333);
    }

    #[test]
    fn median_even_and_odd() {
        assert_eq!(median(&nums(&[4.0, 1.0, 3.0, 2.0])).expect("even").result, 2.5);
        assert_eq!(median(&nums(&[3.0, 1.0, 2.0])).expect("odd").result, 2.0);
    }

    #[test]
    fn sample_std_matches_reference() {
        let out = std(&nums(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0])).expect("std");
        assert_eq!(out.result, 2.138);
    }

    #[test]
    fn std_of_single_value_is_insufficient() {
        let err = std(&nums(&[5.0])).expect_err("n=1");
        assert_eq!(err.kind(), ErrorKind::InsufficientData);
    }

    #[test]
    fn min_max_of_all_negative_values() {
        let data = nums(&[-5.0, -1.0, -9.0]);
        assert_eq!(min(&data).expect("min").result, -9.0);
        assert_eq!(max(&data).expect("max").result, -1.0);
    }

    #[test]
    fn min_above_float_max_sentinel_range() {
        let data = nums(&[f64::MAX, f64::INFINITY]);
        assert_eq!(min(&data).expect("min").result, f64::MAX);
    }

    // ── Missing and type handling ──────────────────────────────────────

    #[test]
    fn missing_values_are_filtered_first() {
        let data = vec![Scalar::Int64(2), Scalar::Missing, Scalar::Float64(4.0)];
        assert_eq!(mean(&data).expect("mean").result, 3.0);
        assert_eq!(count(&data).expect("count").result, 2.0);
    }

    #[test]
    fn all_missing_is_an_empty_dataset() {
        let err = median(&[Scalar::Missing]).expect_err("empty");
        assert_eq!(err.kind(), ErrorKind::EmptyDataset);
        assert_eq!(count(&[]).expect("count").result, 0.0);
    }

    #[test]
    fn strings_are_rejected() {
        let err = mean(&[Scalar::from("a")]).expect_err("string");
        assert_eq!(err.kind(), ErrorKind::TypeMismatch);
        assert_eq!(
            err.to_string(),
            "mean: value \"a\" of dtype string is not numeric"
        );
    }

    #[test]
    fn count_accepts_any_present_cell() {
        let data = vec![Scalar::from("a"), Scalar::Bool(true), Scalar::Missing];
        assert_eq!(count(&data).expect("count").result, 2.0);
    }

    // ── Quartiles ──────────────────────────────────────────────────────

    #[test]
    fn exclusive_quartiles_even_count() {
        let data = nums(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]);
        assert_eq!(q1(&data).expect("q1").result, 2.5);
        assert_eq!(q2(&data).expect("q2").result, 4.5);
        assert_eq!(q3(&data).expect("q3").result, 6.5);
    }

    #[test]
    fn exclusive_quartiles_odd_count_skip_the_median() {
        let data = nums(&[7.0, 1.0, 5.0, 3.0, 9.0, 11.0, 13.0]);
        // sorted: 1 3 5 7 9 11 13 -> lower 1 3 5, upper 9 11 13
        assert_eq!(q1(&data).expect("q1").result, 3.0);
        assert_eq!(q3(&data).expect("q3").result, 11.0);
    }

    #[test]
    fn quartiles_of_single_value_are_insufficient() {
        let err = q1(&nums(&[1.0])).expect_err("n=1");
        assert_eq!(err.kind(), ErrorKind::InsufficientData);
        assert_eq!(q2(&nums(&[1.0])).expect("median").result, 1.0);
    }

    #[test]
    fn quickselect_matches_sort_on_duplicates_and_negatives() {
        let data = nums(&[3.0, -1.0, 3.0, 0.0, -0.0, 8.0, 3.0, -7.5, 2.0, 2.0]);
        for func in [AggFunc::Median, AggFunc::Q1, AggFunc::Q3] {
            let sorted = quartile_with(func, &data, &sorted_opts()).expect("sort");
            let selected = quartile_with(func, &data, &select_opts()).expect("select");
            assert_eq!(sorted.result.to_bits(), selected.result.to_bits(), "{func}");
        }
    }

    #[test]
    fn quickselect_places_kth_value() {
        let mut values = vec![9.0, 1.0, 8.0, 2.0, 7.0, 3.0];
        assert_eq!(quickselect(&mut values, 0), 1.0);
        assert_eq!(quickselect(&mut values, 5), 9.0);
        assert_eq!(quickselect(&mut values, 3), 7.0);
        assert!(values[..3].iter().all(|v| *v <= 7.0));
    }

    // ── Dispatch ───────────────────────────────────────────────────────

    #[test]
    fn agg_func_parses_names() {
        assert_eq!("Mean".parse::<AggFunc>().expect("mean"), AggFunc::Mean);
        assert!("mode".parse::<AggFunc>().is_err());
    }

    #[test]
    fn describe_skips_failing_aggregators() {
        let out = describe(&nums(&[4.0]), &StatsOptions::default());
        let funcs: Vec<AggFunc> = out.iter().map(|r| r.used_func).collect();
        assert!(funcs.contains(&AggFunc::Mean));
        assert!(!funcs.contains(&AggFunc::Std));
        assert!(!funcs.contains(&AggFunc::Q1));
    }
}
