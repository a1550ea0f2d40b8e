#![forbid(unsafe_code)]

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DType {
    Bool,
    Int64,
    Float64,
    Utf8,
}

impl DType {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Int64 => "int",
            Self::Float64 => "float",
            Self::Utf8 => "string",
        }
    }

    #[must_use]
    pub fn supports_missing(self) -> bool {
        !matches!(self, Self::Int64)
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One cell of a column.
///
/// `Missing` is a value in its own right. A float NaN is never stored as a
/// real float: every constructor in the workspace routes through
/// [`Scalar::normalized`], which turns `Float64(NaN)` into `Missing`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Scalar {
    Bool(bool),
    Int64(i64),
    Float64(f64),
    Utf8(String),
    Missing,
}

impl Scalar {
    #[must_use]
    pub fn float(value: f64) -> Self {
        if value.is_nan() {
            Self::Missing
        } else {
            Self::Float64(value)
        }
    }

    #[must_use]
    pub fn normalized(self) -> Self {
        match self {
            Self::Float64(v) if v.is_nan() => Self::Missing,
            other => other,
        }
    }

    /// `None` for missing cells.
    #[must_use]
    pub fn dtype(&self) -> Option<DType> {
        match self {
            Self::Bool(_) => Some(DType::Bool),
            Self::Int64(_) => Some(DType::Int64),
            Self::Float64(_) => Some(DType::Float64),
            Self::Utf8(_) => Some(DType::Utf8),
            Self::Missing => None,
        }
    }

    #[must_use]
    pub fn is_missing(&self) -> bool {
        match self {
            Self::Missing => true,
            Self::Float64(v) => v.is_nan(),
            _ => false,
        }
    }

    #[must_use]
    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Int64(_) | Self::Float64(_))
    }

    /// Missing-aware equality: two missing cells are equal.
    #[must_use]
    pub fn semantic_eq(&self, other: &Self) -> bool {
        match (self.is_missing(), other.is_missing()) {
            (true, true) => true,
            (false, false) => self == other,
            _ => false,
        }
    }

    pub fn to_f64(&self) -> Result<f64, TypeError> {
        match self {
            Self::Int64(v) => Ok(*v as f64),
            Self::Float64(v) if !v.is_nan() => Ok(*v),
            Self::Float64(_) | Self::Missing => Err(TypeError::ValueIsMissing),
            Self::Bool(v) => Err(TypeError::NonNumericValue {
                value: v.to_string(),
                dtype: DType::Bool,
            }),
            Self::Utf8(v) => Err(TypeError::NonNumericValue {
                value: v.clone(),
                dtype: DType::Utf8,
            }),
        }
    }

    /// Stringification used wherever labels must become names or be ordered
    /// textually: bool `true`/`false`, ints in decimal, floats in their
    /// shortest round-trip form (`2.5`, `10`), strings verbatim, missing `NaN`.
    #[must_use]
    pub fn canonical_string(&self) -> String {
        match self {
            Self::Bool(v) => v.to_string(),
            Self::Int64(v) => v.to_string(),
            Self::Float64(v) if v.is_nan() => "NaN".to_owned(),
            Self::Float64(v) => v.to_string(),
            Self::Utf8(v) => v.clone(),
            Self::Missing => "NaN".to_owned(),
        }
    }

    #[must_use]
    pub fn key_part(&self) -> KeyPart {
        match self {
            Self::Bool(v) => KeyPart::Bool(*v),
            Self::Int64(v) => KeyPart::Int64(*v),
            Self::Float64(v) if v.is_nan() => KeyPart::Missing,
            Self::Float64(v) => KeyPart::Float64(normalized_float_bits(*v)),
            Self::Utf8(v) => KeyPart::Utf8(v.clone()),
            Self::Missing => KeyPart::Missing,
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical_string())
    }
}

impl From<bool> for Scalar {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Self::Int64(value)
    }
}

impl From<f64> for Scalar {
    fn from(value: f64) -> Self {
        Self::float(value)
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Self::Utf8(value.to_owned())
    }
}

impl From<String> for Scalar {
    fn from(value: String) -> Self {
        Self::Utf8(value)
    }
}

impl<T: Into<Scalar>> From<Option<T>> for Scalar {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Missing, Into::into)
    }
}

// ── Structural keys ────────────────────────────────────────────────────

fn normalized_float_bits(value: f64) -> u64 {
    if value == 0.0 { 0.0_f64.to_bits() } else { value.to_bits() }
}

/// Hashable projection of one cell. Floats are keyed by their bit pattern
/// with `-0.0` folded onto `0.0`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum KeyPart {
    Missing,
    Bool(bool),
    Int64(i64),
    Float64(u64),
    Utf8(String),
}

/// Structural key over a tuple of cells (one per key column or index level).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CompositeKey(Vec<KeyPart>);

impl CompositeKey {
    #[must_use]
    pub fn from_values<'a>(values: impl IntoIterator<Item = &'a Scalar>) -> Self {
        Self(values.into_iter().map(Scalar::key_part).collect())
    }

    #[must_use]
    pub fn parts(&self) -> &[KeyPart] {
        &self.0
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// ── Ordering ───────────────────────────────────────────────────────────

fn dtype_rank(value: &Scalar) -> u8 {
    match value {
        Scalar::Bool(_) => 0,
        Scalar::Int64(_) | Scalar::Float64(_) => 1,
        Scalar::Utf8(_) => 2,
        Scalar::Missing => 3,
    }
}

/// Total order over present values: numbers compare numerically across
/// int/float, strings lexically, and differing kinds by a fixed rank.
#[must_use]
pub fn compare_present(left: &Scalar, right: &Scalar) -> Ordering {
    match (left, right) {
        (Scalar::Bool(a), Scalar::Bool(b)) => a.cmp(b),
        (Scalar::Int64(a), Scalar::Int64(b)) => a.cmp(b),
        (Scalar::Float64(a), Scalar::Float64(b)) => a.total_cmp(b),
        (Scalar::Int64(a), Scalar::Float64(b)) => (*a as f64).total_cmp(b),
        (Scalar::Float64(a), Scalar::Int64(b)) => a.total_cmp(&(*b as f64)),
        (Scalar::Utf8(a), Scalar::Utf8(b)) => a.cmp(b),
        _ => dtype_rank(left).cmp(&dtype_rank(right)),
    }
}

/// Directional comparison that places missing cells last whatever the
/// direction.
#[must_use]
pub fn compare_na_last(left: &Scalar, right: &Scalar, ascending: bool) -> Ordering {
    match (left.is_missing(), right.is_missing()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => {
            let ord = compare_present(left, right);
            if ascending { ord } else { ord.reverse() }
        }
    }
}

// ── Inference ──────────────────────────────────────────────────────────

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Observed {
    bool: bool,
    int: bool,
    float: bool,
    string: bool,
    missing: bool,
}

impl Observed {
    fn scan(values: &[Scalar]) -> Self {
        let mut seen = Self::default();
        for value in values {
            match value {
                Scalar::Bool(_) => seen.bool = true,
                Scalar::Int64(_) => seen.int = true,
                Scalar::Float64(v) if v.is_nan() => seen.missing = true,
                Scalar::Float64(_) => seen.float = true,
                Scalar::Utf8(_) => seen.string = true,
                Scalar::Missing => seen.missing = true,
            }
        }
        seen
    }

    fn describe(self) -> String {
        let mut kinds = Vec::new();
        for (flag, name) in [
            (self.bool, "bool"),
            (self.int, "int"),
            (self.float, "float"),
            (self.string, "string"),
        ] {
            if flag {
                kinds.push(name);
            }
        }
        kinds.join("+")
    }
}

/// Resolve the dtype of a raw cell sequence.
///
/// bool alone stays bool, ints stay int only when nothing is missing, any
/// float (or int plus missing) becomes float, any string present makes a
/// string column, and an empty or all-missing sequence is a string column.
/// Bool mixed with anything else is rejected.
pub fn infer_dtype(values: &[Scalar]) -> Result<DType, TypeError> {
    let seen = Observed::scan(values);
    if seen.bool && (seen.int || seen.float || seen.string) {
        return Err(TypeError::InvalidColumnType {
            observed: seen.describe(),
        });
    }

    let dtype = if seen.bool {
        DType::Bool
    } else if seen.string {
        DType::Utf8
    } else if seen.float || (seen.int && seen.missing) {
        DType::Float64
    } else if seen.int {
        DType::Int64
    } else {
        DType::Utf8
    };
    Ok(dtype)
}

/// Convert a cell into a column of the given dtype. Only widening is
/// performed: int → float, and int or float → their canonical string.
/// Missing passes through.
pub fn cast_scalar(value: Scalar, target: DType) -> Result<Scalar, TypeError> {
    let value = value.normalized();
    match (value.dtype(), target) {
        (None, dtype) if dtype.supports_missing() => Ok(Scalar::Missing),
        (None, _) => Err(TypeError::MissingInIntColumn),
        (Some(from), to) if from == to => Ok(value),
        (Some(DType::Int64), DType::Float64) => Ok(Scalar::float(value.to_f64()?)),
        (Some(DType::Int64 | DType::Float64), DType::Utf8) => {
            Ok(Scalar::Utf8(value.canonical_string()))
        }
        (Some(from), to) => Err(TypeError::InvalidCast { from, to }),
    }
}

// ── Errors ─────────────────────────────────────────────────────────────

/// Closed failure taxonomy shared by every crate in the workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    DimensionMismatch,
    InvalidColumnType,
    ColumnNotFound,
    LabelNotFound,
    TypeMismatch,
    SchemaMismatch,
    InvalidAxis,
    AmbiguousPivot,
    EmptyDataset,
    InsufficientData,
    Io,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TypeError {
    #[error("column mixes incompatible cell types ({observed})")]
    InvalidColumnType { observed: String },
    #[error("cannot cast scalar of dtype {from} to {to}")]
    InvalidCast { from: DType, to: DType },
    #[error("int columns cannot hold missing values")]
    MissingInIntColumn,
    #[error("value {value:?} has non-numeric dtype {dtype}")]
    NonNumericValue { value: String, dtype: DType },
    #[error("value is missing")]
    ValueIsMissing,
}

impl TypeError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidColumnType { .. } => ErrorKind::InvalidColumnType,
            Self::InvalidCast { .. }
            | Self::MissingInIntColumn
            | Self::NonNumericValue { .. }
            | Self::ValueIsMissing => ErrorKind::TypeMismatch,
        }
    }
}
