#![forbid(unsafe_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tf_columnar::ArithmeticOp;
use tf_frame::{DataFrame, FrameError};
use tf_index::IndexLabel;
use tf_io::{IoError, read_csv_str};
use tf_runtime::{EvidenceLedger, RuntimeMode, RuntimePolicy};
use tf_stats::{AggFunc, StatsOptions};
use tf_types::{ErrorKind, Scalar};
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct HarnessConfig {
    pub fixture_root: PathBuf,
    /// Run only fixtures whose `case_id` starts with this prefix.
    pub case_filter: Option<String>,
}

impl HarnessConfig {
    #[must_use]
    pub fn default_paths() -> Self {
        Self {
            fixture_root: PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures"),
            case_filter: None,
        }
    }
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self::default_paths()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixtureOperation {
    Construct,
    SelectColumns,
    SelectRows,
    MergeVertical,
    MergeHorizontal,
    DropMissing,
    SortByValues,
    SortByIndex,
    ColArithmetic,
    Pivot,
    PivotTable,
    Melt,
    GroupByAggregate,
    ColumnStat,
    ReadCsv,
}

/// Frame input: column-major cells plus optional index column names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixtureFrame {
    pub columns: Vec<String>,
    pub data: Vec<Vec<Scalar>>,
    #[serde(default)]
    pub index_columns: Option<Vec<String>>,
}

impl FixtureFrame {
    pub fn build(&self) -> Result<DataFrame, FrameError> {
        DataFrame::new(
            self.data.clone(),
            self.columns.clone(),
            self.index_columns.clone(),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixtureExpectedFrame {
    pub index: Vec<IndexLabel>,
    pub columns: Vec<String>,
    pub data: Vec<Vec<Scalar>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fixture {
    pub case_id: String,
    pub mode: RuntimeMode,
    pub operation: FixtureOperation,
    #[serde(default)]
    pub frame: Option<FixtureFrame>,
    #[serde(default)]
    pub frame_right: Option<FixtureFrame>,
    #[serde(default)]
    pub columns: Option<Vec<String>>,
    #[serde(default)]
    pub labels: Option<Vec<IndexLabel>>,
    #[serde(default)]
    pub axis: Option<i64>,
    #[serde(default)]
    pub ascending: Option<bool>,
    #[serde(default)]
    pub index_key: Option<String>,
    #[serde(default)]
    pub column_key: Option<String>,
    #[serde(default)]
    pub value_key: Option<String>,
    #[serde(default)]
    pub func: Option<AggFunc>,
    #[serde(default)]
    pub arithmetic: Option<ArithmeticOp>,
    #[serde(default)]
    pub rhs: Option<f64>,
    #[serde(default)]
    pub csv_input: Option<String>,
    #[serde(default)]
    pub expected_frame: Option<FixtureExpectedFrame>,
    #[serde(default)]
    pub expected_scalar: Option<Scalar>,
    #[serde(default)]
    pub expected_error_kind: Option<ErrorKind>,
    #[serde(default)]
    pub expected_evidence_records: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseStatus {
    Pass,
    Fail,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseResult {
    pub case_id: String,
    pub mode: RuntimeMode,
    pub operation: FixtureOperation,
    pub status: CaseStatus,
    pub mismatch: Option<String>,
    pub elapsed_us: u64,
    pub evidence_records: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuiteReport {
    pub suite: String,
    pub fixture_count: usize,
    pub passed: usize,
    pub failed: usize,
    pub cases: Vec<CaseResult>,
}

impl SuiteReport {
    #[must_use]
    pub fn is_green(&self) -> bool {
        self.failed == 0
    }
}

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("fixture {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

pub fn load_fixtures(config: &HarnessConfig) -> Result<Vec<Fixture>, HarnessError> {
    let mut fixtures = Vec::new();
    for path in list_fixture_files(&config.fixture_root)? {
        let fixture = load_fixture(&path)?;
        if config
            .case_filter
            .as_deref()
            .is_none_or(|prefix| fixture.case_id.starts_with(prefix))
        {
            fixtures.push(fixture);
        }
    }
    fixtures.sort_by(|a, b| a.case_id.cmp(&b.case_id));
    Ok(fixtures)
}

fn load_fixture(path: &Path) -> Result<Fixture, HarnessError> {
    let body = fs::read_to_string(path)?;
    serde_json::from_str(&body).map_err(|source| HarnessError::Json {
        path: path.display().to_string(),
        source,
    })
}

fn list_fixture_files(root: &Path) -> Result<Vec<PathBuf>, HarnessError> {
    if !root.exists() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(current) = stack.pop() {
        for entry in fs::read_dir(current)? {
            let path = entry?.path();
            if path.is_dir() {
                stack.push(path);
            } else if path.extension().is_some_and(|ext| ext == "json") {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}

pub fn run_suite(config: &HarnessConfig) -> Result<SuiteReport, HarnessError> {
    let fixtures = load_fixtures(config)?;
    let cases: Vec<CaseResult> = fixtures.iter().map(run_fixture).collect();
    let passed = cases
        .iter()
        .filter(|case| case.status == CaseStatus::Pass)
        .count();
    Ok(SuiteReport {
        suite: config
            .case_filter
            .as_deref()
            .map_or_else(|| "fixtures".to_owned(), |f| format!("fixtures:{f}")),
        fixture_count: cases.len(),
        passed,
        failed: cases.len() - passed,
        cases,
    })
}

#[must_use]
pub fn run_fixture(fixture: &Fixture) -> CaseResult {
    let policy = match fixture.mode {
        RuntimeMode::Strict => RuntimePolicy::strict(),
        RuntimeMode::Hardened => RuntimePolicy::hardened(),
    };
    let mut ledger = EvidenceLedger::new();
    let started = Instant::now();
    let outcome = execute(fixture, &policy, &mut ledger);
    let mismatch = check(fixture, outcome, &ledger).err();
    let elapsed_us = (started.elapsed().as_micros() as u64).max(1);

    CaseResult {
        case_id: fixture.case_id.clone(),
        mode: fixture.mode,
        operation: fixture.operation,
        status: if mismatch.is_none() {
            CaseStatus::Pass
        } else {
            CaseStatus::Fail
        },
        mismatch,
        elapsed_us,
        evidence_records: ledger.len(),
    }
}

enum Outcome {
    Frame(DataFrame),
    Scalar(Scalar),
}

/// An operation failure reduced to what fixtures can assert on.
#[derive(Debug)]
struct Failure {
    kind: Option<ErrorKind>,
    message: String,
}

impl Failure {
    fn format(message: impl Into<String>) -> Self {
        Self {
            kind: None,
            message: message.into(),
        }
    }
}

impl From<FrameError> for Failure {
    fn from(err: FrameError) -> Self {
        Self {
            kind: Some(err.kind()),
            message: err.to_string(),
        }
    }
}

impl From<IoError> for Failure {
    fn from(err: IoError) -> Self {
        Self {
            kind: Some(err.kind()),
            message: err.to_string(),
        }
    }
}

fn require<'a, T>(value: Option<&'a T>, field: &str, fixture: &Fixture) -> Result<&'a T, Failure> {
    value.ok_or_else(|| {
        Failure::format(format!(
            "{field} is required for {:?} (case {})",
            fixture.operation, fixture.case_id
        ))
    })
}

fn require_str<'a>(
    value: Option<&'a String>,
    field: &str,
    fixture: &Fixture,
) -> Result<&'a str, Failure> {
    require(value, field, fixture).map(String::as_str)
}

fn column_names(fixture: &Fixture) -> Result<Vec<&str>, Failure> {
    Ok(require(fixture.columns.as_ref(), "columns", fixture)?
        .iter()
        .map(String::as_str)
        .collect())
}

fn execute(
    fixture: &Fixture,
    policy: &RuntimePolicy,
    ledger: &mut EvidenceLedger,
) -> Result<Outcome, Failure> {
    if fixture.operation == FixtureOperation::ReadCsv {
        let input = require(fixture.csv_input.as_ref(), "csv_input", fixture)?;
        let index_cols: Option<Vec<&str>> = fixture
            .columns
            .as_ref()
            .map(|cols| cols.iter().map(String::as_str).collect());
        return Ok(Outcome::Frame(read_csv_str(input, index_cols.as_deref())?));
    }

    let frame = require(fixture.frame.as_ref(), "frame", fixture)?.build()?;
    let ascending = fixture.ascending.unwrap_or(true);

    let out = match fixture.operation {
        FixtureOperation::Construct => frame,
        FixtureOperation::SelectColumns => frame.select_columns(&column_names(fixture)?)?,
        FixtureOperation::SelectRows => {
            frame.select_rows(require(fixture.labels.as_ref(), "labels", fixture)?)?
        }
        FixtureOperation::MergeVertical | FixtureOperation::MergeHorizontal => {
            let right = require(fixture.frame_right.as_ref(), "frame_right", fixture)?.build()?;
            if fixture.operation == FixtureOperation::MergeVertical {
                frame.merge_vertical(&right)?
            } else {
                frame.merge_horizontal(&right)
            }
        }
        FixtureOperation::DropMissing => {
            frame.drop_missing(*require(fixture.axis.as_ref(), "axis", fixture)?)?
        }
        FixtureOperation::SortByValues => {
            let names = column_names(fixture)?;
            let by = names
                .first()
                .ok_or_else(|| Failure::format("sort_by_values needs one column"))?;
            frame.sort_by_values(by, ascending)?
        }
        FixtureOperation::SortByIndex => frame.sort_by_index(ascending)?,
        FixtureOperation::ColArithmetic => {
            let names = column_names(fixture)?;
            let name = names
                .first()
                .ok_or_else(|| Failure::format("col_arithmetic needs one column"))?;
            frame.col_arithmetic(
                name,
                *require(fixture.arithmetic.as_ref(), "arithmetic", fixture)?,
                *require(fixture.rhs.as_ref(), "rhs", fixture)?,
            )?
        }
        FixtureOperation::Pivot => frame.pivot(
            require_str(fixture.column_key.as_ref(), "column_key", fixture)?,
            require_str(fixture.value_key.as_ref(), "value_key", fixture)?,
        )?,
        FixtureOperation::PivotTable => frame.pivot_table_with_policy(
            require_str(fixture.index_key.as_ref(), "index_key", fixture)?,
            require_str(fixture.column_key.as_ref(), "column_key", fixture)?,
            require_str(fixture.value_key.as_ref(), "value_key", fixture)?,
            require(fixture.func.as_ref(), "func", fixture)?.func(),
            policy,
            ledger,
        )?,
        FixtureOperation::Melt => frame.melt(
            require_str(fixture.column_key.as_ref(), "column_key", fixture)?,
            require_str(fixture.value_key.as_ref(), "value_key", fixture)?,
        )?,
        FixtureOperation::GroupByAggregate => {
            let groups = frame.group_by(&column_names(fixture)?)?;
            frame.aggregate(
                &groups,
                require_str(fixture.value_key.as_ref(), "value_key", fixture)?,
                require(fixture.func.as_ref(), "func", fixture)?.func(),
                policy,
                ledger,
            )?
        }
        FixtureOperation::ColumnStat => {
            let series = frame.loc_col(require_str(
                fixture.value_key.as_ref(),
                "value_key",
                fixture,
            )?)?;
            let func = *require(fixture.func.as_ref(), "func", fixture)?;
            let result = series.aggregate_with(func, &StatsOptions::default())?;
            return Ok(Outcome::Scalar(Scalar::float(result.result)));
        }
        FixtureOperation::ReadCsv => {
            return Err(Failure::format("read_csv takes csv_input, not a frame"));
        }
    };
    Ok(Outcome::Frame(out))
}

fn check(
    fixture: &Fixture,
    outcome: Result<Outcome, Failure>,
    ledger: &EvidenceLedger,
) -> Result<(), String> {
    if let Some(expected) = fixture.expected_evidence_records
        && ledger.len() != expected
    {
        return Err(format!(
            "evidence record mismatch: actual={}, expected={expected}",
            ledger.len()
        ));
    }

    match (outcome, fixture.expected_error_kind) {
        (Err(failure), Some(kind)) if failure.kind == Some(kind) => Ok(()),
        (Err(failure), Some(kind)) => Err(format!(
            "expected {kind:?} failure, got {:?}: {}",
            failure.kind, failure.message
        )),
        (Ok(_), Some(kind)) => Err(format!("expected {kind:?} failure but operation succeeded")),
        (Err(failure), None) => Err(failure.message),
        (Ok(Outcome::Frame(frame)), None) => match &fixture.expected_frame {
            Some(expected) => compare_frame(&frame, expected),
            None => Err("expected_frame is required for frame operations".to_owned()),
        },
        (Ok(Outcome::Scalar(actual)), None) => match &fixture.expected_scalar {
            Some(expected) if actual.semantic_eq(expected) => Ok(()),
            Some(expected) => Err(format!(
                "scalar mismatch: actual={actual:?}, expected={expected:?}"
            )),
            None => Err("expected_scalar is required for column_stat".to_owned()),
        },
    }
}

fn compare_frame(actual: &DataFrame, expected: &FixtureExpectedFrame) -> Result<(), String> {
    let labels: Vec<IndexLabel> = actual.index().labels().cloned().collect();
    if labels.len() != expected.index.len()
        || labels
            .iter()
            .zip(&expected.index)
            .any(|(left, right)| left.key() != right.key())
    {
        return Err(format!(
            "index mismatch: actual={labels:?}, expected={:?}",
            expected.index
        ));
    }
    if actual.column_names() != expected.columns.as_slice() {
        return Err(format!(
            "column mismatch: actual={:?}, expected={:?}",
            actual.column_names(),
            expected.columns
        ));
    }
    for ((name, column), expected_values) in actual
        .column_names()
        .iter()
        .zip(actual.columns())
        .zip(&expected.data)
    {
        if column.len() != expected_values.len() {
            return Err(format!(
                "column {name:?} length mismatch: actual={}, expected={}",
                column.len(),
                expected_values.len()
            ));
        }
        if let Some((idx, (left, right))) = column
            .values()
            .iter()
            .zip(expected_values)
            .enumerate()
            .find(|(_, (left, right))| !left.semantic_eq(right))
        {
            return Err(format!(
                "column {name:?} mismatch at idx={idx}: actual={left:?}, expected={right:?}"
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use tf_runtime::RuntimeMode;
    use tf_types::{ErrorKind, Scalar};

    use super::{
        CaseStatus, Fixture, FixtureFrame, FixtureOperation, HarnessConfig, run_fixture,
        run_suite,
    };

    fn bare(operation: FixtureOperation) -> Fixture {
        Fixture {
            case_id: "inline".to_owned(),
            mode: RuntimeMode::Strict,
            operation,
            frame: Some(FixtureFrame {
                columns: vec!["x".to_owned()],
                data: vec![vec![Scalar::Int64(1), Scalar::Int64(2)]],
                index_columns: None,
            }),
            frame_right: None,
            columns: None,
            labels: None,
            axis: None,
            ascending: None,
            index_key: None,
            column_key: None,
            value_key: None,
            func: None,
            arithmetic: None,
            rhs: None,
            csv_input: None,
            expected_frame: None,
            expected_scalar: None,
            expected_error_kind: None,
            expected_evidence_records: None,
        }
    }

    #[test]
    fn bundled_fixtures_are_green() {
        let report = run_suite(&HarnessConfig::default_paths()).expect("suite");
        assert!(report.fixture_count >= 8, "fixtures found: {}", report.fixture_count);
        let failures: Vec<_> = report
            .cases
            .iter()
            .filter(|case| case.status == CaseStatus::Fail)
            .map(|case| (case.case_id.clone(), case.mismatch.clone()))
            .collect();
        assert!(report.is_green(), "failing cases: {failures:?}");
    }

    #[test]
    fn case_filter_narrows_the_suite() {
        let config = HarnessConfig {
            case_filter: Some("pivot".to_owned()),
            ..HarnessConfig::default_paths()
        };
        let report = run_suite(&config).expect("suite");
        assert!(report.fixture_count > 0);
        assert!(report.cases.iter().all(|case| case.case_id.starts_with("pivot")));
    }

    #[test]
    fn missing_inputs_fail_the_case() {
        let result = run_fixture(&bare(FixtureOperation::DropMissing));
        assert_eq!(result.status, CaseStatus::Fail);
        assert!(result.mismatch.expect("mismatch").contains("axis is required"));
    }

    #[test]
    fn expected_error_kinds_are_matched() {
        let mut fixture = bare(FixtureOperation::DropMissing);
        fixture.axis = Some(3);
        fixture.expected_error_kind = Some(ErrorKind::InvalidAxis);
        assert_eq!(run_fixture(&fixture).status, CaseStatus::Pass);

        fixture.expected_error_kind = Some(ErrorKind::SchemaMismatch);
        assert_eq!(run_fixture(&fixture).status, CaseStatus::Fail);
    }

    #[test]
    fn fixture_json_uses_snake_case() {
        let fixture = bare(FixtureOperation::PivotTable);
        let json = serde_json::to_string(&fixture).expect("serialize");
        assert!(json.contains(r#""operation":"pivot_table""#));
        assert!(json.contains(r#""mode":"strict""#));
        let back: Fixture = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, fixture);
    }
}
