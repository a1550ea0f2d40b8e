#![forbid(unsafe_code)]

//! End-to-end scenarios crossing the reader, frame, grouping and statistics
//! layers, plus a full run of the bundled fixture suite.

use tf_conformance::{CaseStatus, HarnessConfig, SuiteReport, run_suite};
use tf_frame::DataFrame;
use tf_index::IndexLabel;
use tf_io::{
    read_csv_str, read_json_columns_str, read_json_records_str, write_csv_string,
    write_json_string,
};
use tf_runtime::{DecisionAction, EvidenceLedger, RuntimePolicy};
use tf_stats::{AggFunc, StatsOptions, mean, median};
use tf_types::{DType, ErrorKind, Scalar};

const SALES_CSV: &str = "\
region,quarter,amount
east,q1,10.0
west,q1,4.0
east,q2,7.5
west,q1,6.0
east,q1,20.0
north,q2,
";

fn s(value: &str) -> Scalar {
    Scalar::Utf8(value.to_owned())
}

// ---------------------------------------------------------------------------
// Scenario 1: CSV in, pivot table, CSV out
// ---------------------------------------------------------------------------

#[test]
fn e2e_csv_pivot_table_round_trip() {
    let frame = read_csv_str(SALES_CSV, Some(&[])).expect("read csv");
    assert_eq!(frame.shape(), (6, 3));
    assert_eq!(frame.column("amount").expect("amount").dtype(), DType::Float64);

    let mut ledger = EvidenceLedger::new();
    let table = frame
        .pivot_table_with_policy(
            "region",
            "quarter",
            "amount",
            mean,
            &RuntimePolicy::hardened(),
            &mut ledger,
        )
        .expect("pivot table");
    assert_eq!(ledger.count_action(DecisionAction::Repair), 1);
    assert_eq!(
        table.index().labels().cloned().collect::<Vec<_>>(),
        vec![
            IndexLabel::from("east"),
            IndexLabel::from("north"),
            IndexLabel::from("west"),
        ]
    );

    let written = write_csv_string(&table).expect("write csv");
    assert_eq!(written, "q1,q2\n15.0,7.5\n,\n5.0,\n");

    let reread = read_csv_str(&written, Some(&[])).expect("reread");
    assert_eq!(reread.rows(), table.rows());

    let json: serde_json::Value =
        serde_json::from_str(&serde_json::to_string(&ledger).expect("ledger json")).expect("parse");
    assert_eq!(json["records"][0]["action"], "repair");
}

// ---------------------------------------------------------------------------
// Scenario 2: JSON records, group-by median, exported cells
// ---------------------------------------------------------------------------

#[test]
fn e2e_json_records_group_median_export() {
    let input = r#"
        {"team": "a", "score": 3}
        {"team": "b", "score": 5}
        {"team": "a", "score": 1}
        {"team": "a"}
        {"team": "b", "score": 4}
    "#;
    let frame = read_json_records_str(input, None).expect("records");
    assert_eq!(frame.column_names(), &["team".to_owned(), "score".to_owned()]);
    assert_eq!(frame.column("score").expect("score").dtype(), DType::Float64);

    let groups = frame.group_by(&["team"]).expect("groupby");
    let mut ledger = EvidenceLedger::new();
    let out = frame
        .aggregate(&groups, "score", median, &RuntimePolicy::strict(), &mut ledger)
        .expect("aggregate");
    assert!(ledger.is_empty());
    assert_eq!(
        out.rows(),
        vec![
            vec![s("a"), Scalar::Float64(2.0)],
            vec![s("b"), Scalar::Float64(4.5)],
        ]
    );

    let exported = serde_json::to_value(frame.export_columns()).expect("export");
    assert_eq!(exported[1]["name"], "score");
    assert_eq!(exported[1]["cells"][3], serde_json::Value::Null);

    let written = write_json_string(&out).expect("write json");
    assert!(written.starts_with(r#"{"series":[{"name":"team","dtype":"utf8""#));
}

// ---------------------------------------------------------------------------
// Scenario 3: labeled lookup feeding the statistics engine
// ---------------------------------------------------------------------------

#[test]
fn e2e_labeled_selection_then_describe() {
    let frame = read_csv_str(SALES_CSV, None).expect("first column index");
    assert_eq!(frame.index().names(), &["region".to_owned()]);

    let east = frame
        .select_rows(&[IndexLabel::from("east")])
        .expect("east rows");
    assert_eq!(east.nrows(), 3);

    let amounts = east.loc_col("amount").expect("amount");
    let std = amounts
        .aggregate_with(AggFunc::Std, &StatsOptions::default())
        .expect("std");
    assert_eq!(std.result, 6.614);

    let summary = amounts.describe(&StatsOptions::default());
    assert_eq!(summary.len(), AggFunc::ALL.len());
    assert_eq!(summary[0].used_func, AggFunc::Count);
    assert_eq!(summary[0].result, 3.0);

    let err = frame
        .select_rows(&[IndexLabel::from("south")])
        .expect_err("unknown label");
    assert_eq!(err.kind(), ErrorKind::LabelNotFound);
}

// ---------------------------------------------------------------------------
// Scenario 4: JSON columns, pivot, melt back
// ---------------------------------------------------------------------------

#[test]
fn e2e_json_columns_pivot_then_melt() {
    let input = r#"{"id": [2, 1, 1], "cat": ["a", "a", "b"], "val": [30, 10, 20]}"#;
    let frame = read_json_columns_str(input, Some(&["id"])).expect("columns");
    assert_eq!(
        frame.column("id").expect("id").values(),
        &[Scalar::Int64(1), Scalar::Int64(1), Scalar::Int64(2)]
    );

    let wide = frame.pivot("cat", "val").expect("pivot");
    assert_eq!(wide.column_names(), &["a".to_owned(), "b".to_owned()]);

    let long: DataFrame = wide.melt("cat", "val").expect("melt");
    let complete = long.drop_missing(0).expect("drop");
    assert_eq!(complete.nrows(), 3);
    assert_eq!(
        complete.column("val").expect("val").values(),
        &[Scalar::Float64(10.0), Scalar::Float64(20.0), Scalar::Float64(30.0)]
    );
}

// ---------------------------------------------------------------------------
// Scenario 5: bundled fixture suite
// ---------------------------------------------------------------------------

#[test]
fn e2e_fixture_suite_is_green_and_serializable() {
    let report = run_suite(&HarnessConfig::default_paths()).expect("suite");
    let failing: Vec<_> = report
        .cases
        .iter()
        .filter(|case| case.status == CaseStatus::Fail)
        .collect();
    assert!(failing.is_empty(), "failing fixtures: {failing:?}");

    let json = serde_json::to_string(&report).expect("report json");
    let back: SuiteReport = serde_json::from_str(&json).expect("report back");
    assert_eq!(back.passed, report.fixture_count);
}
