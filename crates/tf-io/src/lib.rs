#![forbid(unsafe_code)]

use csv::{ReaderBuilder, WriterBuilder};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use tf_frame::{DataFrame, FrameError};
use tf_types::{DType, ErrorKind, Scalar};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IoError {
    #[error("csv input has no headers")]
    MissingHeaders,
    #[error("json input must be an object of column arrays")]
    NotColumnar,
    #[error("column {column:?} holds a nested json {found}")]
    UnsupportedJsonValue { column: String, found: &'static str },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error(transparent)]
    Frame(#[from] FrameError),
}

impl IoError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Frame(err) => err.kind(),
            _ => ErrorKind::Io,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CsvOptions {
    pub delimiter: u8,
    /// Without headers, columns are named `A`, `B`, …, `Z`, `AA`, ….
    pub has_headers: bool,
}

impl Default for CsvOptions {
    fn default() -> Self {
        Self {
            delimiter: b',',
            has_headers: true,
        }
    }
}

fn owned_names(names: &[&str]) -> Vec<String> {
    names.iter().map(|name| (*name).to_owned()).collect()
}

/// Spreadsheet-style name for the 1-based column `n`.
fn column_letters(n: usize) -> String {
    let mut n = n;
    let mut out = Vec::new();
    while n > 0 {
        n -= 1;
        out.push(b'A' + (n % 26) as u8);
        n /= 26;
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}

// ── CSV ────────────────────────────────────────────────────────────────

/// Parse CSV text with default options.
///
/// `index_cols` of `None` indexes the frame by its first column; an empty
/// slice gives a range index.
pub fn read_csv_str(input: &str, index_cols: Option<&[&str]>) -> Result<DataFrame, IoError> {
    read_csv_with_options(input, index_cols, &CsvOptions::default())
}

pub fn read_csv_with_options(
    input: &str,
    index_cols: Option<&[&str]>,
    options: &CsvOptions,
) -> Result<DataFrame, IoError> {
    let mut reader = ReaderBuilder::new()
        .delimiter(options.delimiter)
        .has_headers(options.has_headers)
        .from_reader(input.as_bytes());

    let mut names = if options.has_headers {
        let headers = reader.headers()?;
        if headers.is_empty() {
            return Err(IoError::MissingHeaders);
        }
        headers.iter().map(str::to_owned).collect::<Vec<_>>()
    } else {
        Vec::new()
    };

    let row_hint = input.len() / (names.len().max(1) * 8).max(1);
    let mut columns: Vec<Vec<Scalar>> = (0..names.len())
        .map(|_| Vec::with_capacity(row_hint))
        .collect();

    for row in reader.records() {
        let record = row?;
        if names.is_empty() {
            names = (1..=record.len()).map(column_letters).collect();
            columns = vec![Vec::new(); names.len()];
        }
        for (idx, column) in columns.iter_mut().enumerate() {
            column.push(parse_scalar(record.get(idx).unwrap_or_default()));
        }
    }

    let index_names = match index_cols {
        Some(cols) => owned_names(cols),
        None => names.first().cloned().into_iter().collect(),
    };
    Ok(DataFrame::new(columns, names, Some(index_names))?)
}

/// Header row plus one line per row. Missing cells are written empty;
/// floats keep a decimal point so they re-read as floats.
pub fn write_csv_string(frame: &DataFrame) -> Result<String, IoError> {
    let mut writer = WriterBuilder::new().from_writer(Vec::new());
    writer.write_record(frame.column_names())?;
    for row in frame.rows() {
        writer.write_record(row.iter().map(scalar_to_csv))?;
    }
    let bytes = writer.into_inner().map_err(|err| err.into_error())?;
    Ok(String::from_utf8(bytes)?)
}

/// Bool for the six spellings `true/True/TRUE/false/False/FALSE`, then int,
/// then float (`NaN` or empty is missing), else string.
fn parse_scalar(field: &str) -> Scalar {
    let trimmed = field.trim();
    match trimmed {
        "" | "NaN" => return Scalar::Missing,
        "true" | "True" | "TRUE" => return Scalar::Bool(true),
        "false" | "False" | "FALSE" => return Scalar::Bool(false),
        _ => {}
    }
    if let Ok(value) = trimmed.parse::<i64>() {
        return Scalar::Int64(value);
    }
    if let Ok(value) = trimmed.parse::<f64>() {
        return Scalar::float(value);
    }
    Scalar::Utf8(trimmed.to_owned())
}

fn scalar_to_csv(scalar: &Scalar) -> String {
    match scalar {
        Scalar::Missing => String::new(),
        Scalar::Float64(v) => format!("{v:?}"),
        other => other.canonical_string(),
    }
}

// ── JSON ───────────────────────────────────────────────────────────────

/// `{"col": [v, …], …}` with columns kept in document order and `null` read
/// as missing. With index columns the frame comes back sorted by its index.
pub fn read_json_columns_str(
    input: &str,
    index_cols: Option<&[&str]>,
) -> Result<DataFrame, IoError> {
    let decoded: Map<String, Value> =
        serde_json::from_str(input).map_err(|err| match err.classify() {
            serde_json::error::Category::Data => IoError::NotColumnar,
            _ => IoError::Json(err),
        })?;

    let mut names = Vec::with_capacity(decoded.len());
    let mut columns = Vec::with_capacity(decoded.len());
    for (name, cells) in decoded {
        let Value::Array(cells) = cells else {
            return Err(IoError::NotColumnar);
        };
        let column = cells
            .into_iter()
            .map(|cell| json_to_scalar(&name, cell))
            .collect::<Result<Vec<_>, _>>()?;
        names.push(name);
        columns.push(column);
    }

    let frame = DataFrame::new(columns, names, index_cols.map(owned_names))?;
    if index_cols.is_some_and(|cols| !cols.is_empty()) {
        return Ok(frame.sort_by_index(true)?);
    }
    Ok(frame)
}

/// A stream of `{"col": v, …}` objects, one per row. Columns appear in
/// first-seen key order; a row lacking a key gets a missing cell there.
pub fn read_json_records_str(
    input: &str,
    index_cols: Option<&[&str]>,
) -> Result<DataFrame, IoError> {
    let mut names: Vec<String> = Vec::new();
    let mut columns: Vec<Vec<Scalar>> = Vec::new();
    let mut nrows = 0_usize;

    for record in serde_json::Deserializer::from_str(input).into_iter::<Map<String, Value>>() {
        for (name, cell) in record? {
            let value = json_to_scalar(&name, cell)?;
            let slot = match names.iter().position(|known| *known == name) {
                Some(slot) => slot,
                None => {
                    names.push(name);
                    columns.push(vec![Scalar::Missing; nrows]);
                    columns.len() - 1
                }
            };
            columns[slot].push(value);
        }
        nrows += 1;
        for column in &mut columns {
            column.resize(nrows, Scalar::Missing);
        }
    }

    Ok(DataFrame::new(columns, names, index_cols.map(owned_names))?)
}

#[derive(Serialize)]
struct JsonFrame<'a> {
    series: Vec<JsonSeries<'a>>,
    columns: &'a [String],
}

#[derive(Serialize)]
struct JsonSeries<'a> {
    name: &'a str,
    dtype: DType,
    data: Vec<Value>,
}

/// `{"series": [{"name", "dtype", "data"}, …], "columns": [...]}` with
/// missing cells as `null`.
pub fn write_json_string(frame: &DataFrame) -> Result<String, IoError> {
    let series = frame
        .columns()
        .iter()
        .zip(frame.column_names())
        .map(|(column, name)| JsonSeries {
            name,
            dtype: column.dtype(),
            data: column.values().iter().map(scalar_to_json).collect(),
        })
        .collect();
    let payload = JsonFrame {
        series,
        columns: frame.column_names(),
    };
    Ok(serde_json::to_string(&payload)?)
}

fn json_to_scalar(column: &str, value: Value) -> Result<Scalar, IoError> {
    match value {
        Value::Null => Ok(Scalar::Missing),
        Value::Bool(v) => Ok(Scalar::Bool(v)),
        Value::Number(n) => Ok(match n.as_i64() {
            Some(v) => Scalar::Int64(v),
            None => Scalar::float(n.as_f64().unwrap_or(f64::NAN)),
        }),
        Value::String(v) => Ok(Scalar::Utf8(v)),
        Value::Array(_) => Err(IoError::UnsupportedJsonValue {
            column: column.to_owned(),
            found: "array",
        }),
        Value::Object(_) => Err(IoError::UnsupportedJsonValue {
            column: column.to_owned(),
            found: "object",
        }),
    }
}

fn scalar_to_json(value: &Scalar) -> Value {
    match value {
        Scalar::Missing => Value::Null,
        Scalar::Bool(v) => Value::Bool(*v),
        Scalar::Int64(v) => Value::from(*v),
        Scalar::Float64(v) => Number::from_f64(*v).map_or(Value::Null, Value::Number),
        Scalar::Utf8(v) => Value::String(v.clone()),
    }
}
