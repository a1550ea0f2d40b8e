#![forbid(unsafe_code)]

//! Property-based checks over arbitrary frames and numeric columns.
//!
//! Strategies keep dtypes consistent per column so construction succeeds;
//! properties then exercise selection, merging, missing-value handling and
//! the two order-statistic strategies against each other.

use proptest::prelude::*;

use tf_frame::DataFrame;
use tf_runtime::{EvidenceLedger, RuntimePolicy};
use tf_stats::{AggFunc, SelectionStrategy, StatsOptions, count, max, mean, quartile_with};
use tf_types::Scalar;

// ---------------------------------------------------------------------------
// Strategy generators
// ---------------------------------------------------------------------------

fn arb_float_cell() -> impl Strategy<Value = Scalar> {
    prop_oneof![
        4 => (-1e6_f64..1e6_f64).prop_map(Scalar::Float64),
        1 => Just(Scalar::Missing),
    ]
}

fn arb_key_cell() -> impl Strategy<Value = Scalar> {
    prop_oneof![
        3 => (0i64..5).prop_map(Scalar::Int64),
        1 => Just(Scalar::Missing),
    ]
}

/// Numeric values with at least one present element.
fn arb_numeric_values(max_len: usize) -> impl Strategy<Value = Vec<Scalar>> {
    proptest::collection::vec(
        prop_oneof![
            3 => (-1_000i64..1_000).prop_map(Scalar::Int64),
            3 => (-1e4_f64..1e4_f64).prop_map(Scalar::Float64),
            1 => Just(Scalar::Missing),
        ],
        1..=max_len,
    )
    .prop_filter("needs a present value", |values| {
        values.iter().any(|v| !v.is_missing())
    })
}

/// A frame of `ncols` float columns `c0..`, plus an int `key` column.
fn arb_frame(max_rows: usize, ncols: usize) -> impl Strategy<Value = DataFrame> {
    (0..=max_rows).prop_flat_map(move |nrows| {
        (
            proptest::collection::vec(arb_key_cell(), nrows),
            proptest::collection::vec(proptest::collection::vec(arb_float_cell(), nrows), ncols),
        )
            .prop_filter_map("frame must construct", |(keys, mut data)| {
                let mut names: Vec<String> = (0..data.len()).map(|i| format!("c{i}")).collect();
                names.push("key".to_owned());
                data.push(keys);
                DataFrame::new(data, names, None).ok()
            })
    })
}

fn value_of(result: Result<tf_stats::StatsResult, tf_stats::StatsError>) -> Option<f64> {
    result.ok().map(|r| r.result)
}

// ---------------------------------------------------------------------------
// Property: order statistics agree across selection strategies
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    /// Median and quartiles via quickselect equal those via a full sort.
    #[test]
    fn prop_quickselect_matches_sort(values in arb_numeric_values(80)) {
        let sorted = StatsOptions { selection: SelectionStrategy::Sort };
        let selecting = StatsOptions { selection: SelectionStrategy::Quickselect };
        for func in [AggFunc::Median, AggFunc::Q1, AggFunc::Q2, AggFunc::Q3] {
            prop_assert_eq!(
                value_of(quartile_with(func, &values, &sorted)),
                value_of(quartile_with(func, &values, &selecting)),
                "{} disagrees", func
            );
        }
    }

    /// The median lies between min and max of the present values.
    #[test]
    fn prop_median_is_bounded(values in arb_numeric_values(40)) {
        let present: Vec<f64> = values.iter().filter_map(|v| v.to_f64().ok()).collect();
        let lo = present.iter().copied().fold(f64::INFINITY, f64::min);
        let hi = present.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let median = value_of(quartile_with(AggFunc::Median, &values, &StatsOptions::default()))
            .expect("median of non-empty input");
        prop_assert!(median >= lo - 0.001 && median <= hi + 0.001);
    }

    /// Count ignores missing cells, mean needs at least one present value.
    #[test]
    fn prop_count_and_mean(values in arb_numeric_values(40)) {
        let present = values.iter().filter(|v| !v.is_missing()).count();
        prop_assert_eq!(count(&values).expect("count").result, present as f64);
        prop_assert!(mean(&values).is_ok());
        prop_assert!(max(&values).is_ok());
    }
}

// ---------------------------------------------------------------------------
// Property: frame selection and merging
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Selecting a subset of a selection equals selecting the subset directly.
    #[test]
    fn prop_select_columns_composes(frame in arb_frame(12, 3)) {
        let outer = frame.select_columns(&["c2", "key", "c0"]).expect("outer");
        let nested = outer.select_columns(&["c0", "key"]).expect("nested");
        let direct = frame.select_columns(&["c0", "key"]).expect("direct");
        prop_assert_eq!(nested, direct);
    }

    /// Appending then selecting every id reproduces both inputs in order.
    #[test]
    fn prop_merge_vertical_preserves_rows(
        top in arb_frame(10, 2),
        bottom in arb_frame(10, 2),
    ) {
        // Columns that end up all-missing infer as strings; skip those.
        let dtypes = |f: &DataFrame| f.columns().iter().map(|c| c.dtype()).collect::<Vec<_>>();
        prop_assume!(dtypes(&top) == dtypes(&bottom));

        let merged = top.merge_vertical(&bottom).expect("merge");
        prop_assert_eq!(merged.nrows(), top.nrows() + bottom.nrows());
        let ids: Vec<usize> = merged.index().ids().collect();
        let reselected = merged.select_ids(&ids).expect("ids");
        let mut expected = top.rows();
        expected.extend(bottom.rows());
        prop_assert_eq!(reselected.rows(), expected);
    }

    /// Row-wise drop keeps exactly the complete rows and is idempotent.
    #[test]
    fn prop_drop_missing_rows(frame in arb_frame(15, 3)) {
        let dropped = frame.drop_missing(0).expect("axis 0");
        let complete = frame
            .rows()
            .into_iter()
            .filter(|row| row.iter().all(|cell| !cell.is_missing()))
            .collect::<Vec<_>>();
        prop_assert_eq!(dropped.rows(), complete);
        prop_assert_eq!(dropped.drop_missing(0).expect("again"), dropped);
    }
}

// ---------------------------------------------------------------------------
// Property: parallel aggregation
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Serial and parallel group aggregation agree, including the ledger.
    #[test]
    fn prop_parallel_aggregation_matches_serial(frame in arb_frame(40, 1)) {
        let groups = frame.group_by(&["key"]).expect("groupby");
        let hardened = RuntimePolicy::hardened();

        let mut serial_ledger = EvidenceLedger::new();
        let serial = frame.aggregate(&groups, "c0", mean, &hardened, &mut serial_ledger);
        let mut parallel_ledger = EvidenceLedger::new();
        let parallel = frame.aggregate(
            &groups,
            "c0",
            mean,
            &hardened.with_parallel_aggregation(true),
            &mut parallel_ledger,
        );
        prop_assert_eq!(serial.ok(), parallel.ok());
        prop_assert_eq!(serial_ledger.len(), parallel_ledger.len());
    }
}
