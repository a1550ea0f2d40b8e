#![forbid(unsafe_code)]

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tf_types::{DType, ErrorKind, Scalar, TypeError, cast_scalar, compare_na_last, infer_dtype};

/// Packed presence bitmap, one bit per cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidityMask {
    words: Vec<u64>,
    len: usize,
}

impl ValidityMask {
    #[must_use]
    pub fn from_values(values: &[Scalar]) -> Self {
        let len = values.len();
        let mut words = vec![0_u64; len.div_ceil(64)];
        for (idx, value) in values.iter().enumerate() {
            if !value.is_missing() {
                words[idx / 64] |= 1_u64 << (idx % 64);
            }
        }
        Self { words, len }
    }

    #[must_use]
    pub fn get(&self, idx: usize) -> bool {
        if idx >= self.len {
            return false;
        }
        (self.words[idx / 64] >> (idx % 64)) & 1 == 1
    }

    #[must_use]
    pub fn count_valid(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    #[must_use]
    pub fn all_valid(&self) -> bool {
        self.count_valid() == self.len
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn bits(&self) -> impl Iterator<Item = bool> + '_ {
        (0..self.len).map(|idx| self.get(idx))
    }
}

impl Serialize for ValidityMask {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;
        let bits: Vec<bool> = self.bits().collect();
        let mut state = serializer.serialize_struct("ValidityMask", 1)?;
        state.serialize_field("bits", &bits)?;
        state.end()
    }
}

impl<'de> Deserialize<'de> for ValidityMask {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Raw {
            bits: Vec<bool>,
        }
        let raw = Raw::deserialize(deserializer)?;
        let len = raw.bits.len();
        let mut words = vec![0_u64; len.div_ceil(64)];
        for (idx, valid) in raw.bits.into_iter().enumerate() {
            if valid {
                words[idx / 64] |= 1_u64 << (idx % 64);
            }
        }
        Ok(Self { words, len })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArithmeticOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl ArithmeticOp {
    #[must_use]
    pub fn apply(self, left: f64, right: f64) -> f64 {
        match self {
            Self::Add => left + right,
            Self::Sub => left - right,
            Self::Mul => left * right,
            Self::Div => left / right,
            Self::Mod => left % right,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonOp {
    Gt,
    Lt,
    Eq,
}

impl ComparisonOp {
    #[must_use]
    pub fn apply(self, left: f64, right: f64) -> bool {
        match self {
            Self::Gt => left > right,
            Self::Lt => left < right,
            Self::Eq => left == right,
        }
    }
}

impl fmt::Display for ArithmeticOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Add => "add",
            Self::Sub => "sub",
            Self::Mul => "mul",
            Self::Div => "div",
            Self::Mod => "mod",
        })
    }
}

impl fmt::Display for ComparisonOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Gt => "gt",
            Self::Lt => "lt",
            Self::Eq => "eq",
        })
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ColumnError {
    #[error("{op} requires a float column, found {dtype}")]
    NonFloatOperand { op: String, dtype: DType },
    #[error("position {position} out of bounds for column of length {len}")]
    PositionOutOfBounds { position: usize, len: usize },
    #[error("cannot concatenate {right} column onto {left} column")]
    DtypeMismatch { left: DType, right: DType },
    #[error("expected {expected} row ids, found {actual}")]
    LengthMismatch { expected: usize, actual: usize },
    #[error(transparent)]
    Type(#[from] TypeError),
}

impl ColumnError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NonFloatOperand { .. } => ErrorKind::TypeMismatch,
            Self::PositionOutOfBounds { .. } | Self::LengthMismatch { .. } => {
                ErrorKind::DimensionMismatch
            }
            Self::DtypeMismatch { .. } => ErrorKind::SchemaMismatch,
            Self::Type(err) => err.kind(),
        }
    }
}

/// Dtype-homogeneous cell vector. Int columns never hold missing cells.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    dtype: DType,
    values: Vec<Scalar>,
    validity: ValidityMask,
}

impl Column {
    /// Infer the dtype and coerce every cell into it.
    pub fn new(values: Vec<Scalar>) -> Result<Self, ColumnError> {
        let dtype = infer_dtype(&values)?;
        Self::with_dtype(dtype, values)
    }

    /// Coerce every cell into `dtype`; only int → float widening is allowed.
    pub fn with_dtype(dtype: DType, values: Vec<Scalar>) -> Result<Self, ColumnError> {
        let values = values
            .into_iter()
            .map(|value| cast_scalar(value, dtype))
            .collect::<Result<Vec<_>, _>>()?;
        let validity = ValidityMask::from_values(&values);
        Ok(Self {
            dtype,
            values,
            validity,
        })
    }

    /// All-missing column; int requests become float.
    #[must_use]
    pub fn missing(dtype: DType, len: usize) -> Self {
        let dtype = if dtype.supports_missing() {
            dtype
        } else {
            DType::Float64
        };
        let values = vec![Scalar::Missing; len];
        let validity = ValidityMask::from_values(&values);
        Self {
            dtype,
            values,
            validity,
        }
    }

    #[must_use]
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    #[must_use]
    pub fn values(&self) -> &[Scalar] {
        &self.values
    }

    #[must_use]
    pub fn into_values(self) -> Vec<Scalar> {
        self.values
    }

    #[must_use]
    pub fn value(&self, idx: usize) -> Option<&Scalar> {
        self.values.get(idx)
    }

    #[must_use]
    pub fn validity(&self) -> &ValidityMask {
        &self.validity
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    #[must_use]
    pub fn has_missing(&self) -> bool {
        !self.validity.all_valid()
    }

    pub fn take(&self, positions: &[usize]) -> Result<Self, ColumnError> {
        let values = positions
            .iter()
            .map(|&position| {
                self.values
                    .get(position)
                    .cloned()
                    .ok_or(ColumnError::PositionOutOfBounds {
                        position,
                        len: self.values.len(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let validity = ValidityMask::from_values(&values);
        Ok(Self {
            dtype: self.dtype,
            values,
            validity,
        })
    }

    /// Extend with missing cells up to `len`. Padding an int column turns it
    /// into a float column.
    #[must_use]
    pub fn padded(&self, len: usize) -> Self {
        if len <= self.values.len() {
            return self.clone();
        }
        let dtype = if self.dtype.supports_missing() {
            self.dtype
        } else {
            DType::Float64
        };
        let mut values: Vec<Scalar> = self
            .values
            .iter()
            .map(|value| match value {
                Scalar::Int64(v) if dtype == DType::Float64 => Scalar::Float64(*v as f64),
                other => other.clone(),
            })
            .collect();
        values.resize(len, Scalar::Missing);
        let validity = ValidityMask::from_values(&values);
        Self {
            dtype,
            values,
            validity,
        }
    }

    pub fn concat(&self, other: &Self) -> Result<Self, ColumnError> {
        if self.dtype != other.dtype {
            return Err(ColumnError::DtypeMismatch {
                left: self.dtype,
                right: other.dtype,
            });
        }
        let mut values = Vec::with_capacity(self.len() + other.len());
        values.extend_from_slice(&self.values);
        values.extend_from_slice(&other.values);
        let validity = ValidityMask::from_values(&values);
        Ok(Self {
            dtype: self.dtype,
            values,
            validity,
        })
    }

    fn require_float(&self, op: impl fmt::Display) -> Result<(), ColumnError> {
        if self.dtype == DType::Float64 {
            Ok(())
        } else {
            Err(ColumnError::NonFloatOperand {
                op: op.to_string(),
                dtype: self.dtype,
            })
        }
    }

    /// Element-wise `cell op rhs`. Only float columns qualify; missing cells
    /// stay missing.
    pub fn binary_scalar(&self, op: ArithmeticOp, rhs: f64) -> Result<Self, ColumnError> {
        self.require_float(op)?;
        let values = self
            .values
            .iter()
            .map(|value| match value {
                Scalar::Float64(v) => Scalar::float(op.apply(*v, rhs)),
                _ => Scalar::Missing,
            })
            .collect::<Vec<_>>();
        let validity = ValidityMask::from_values(&values);
        Ok(Self {
            dtype: DType::Float64,
            values,
            validity,
        })
    }

    /// Element-wise comparison yielding a bool column. Missing cells compare
    /// false.
    pub fn compare_scalar(&self, op: ComparisonOp, rhs: f64) -> Result<Self, ColumnError> {
        self.require_float(op)?;
        let values = self
            .values
            .iter()
            .map(|value| match value {
                Scalar::Float64(v) => Scalar::Bool(op.apply(*v, rhs)),
                _ => Scalar::Bool(false),
            })
            .collect::<Vec<_>>();
        let validity = ValidityMask::from_values(&values);
        Ok(Self {
            dtype: DType::Bool,
            values,
            validity,
        })
    }

    /// Positions in value order. Missing cells go last in both directions and
    /// ties fall back to `ids` ascending.
    pub fn argsort(&self, ascending: bool, ids: &[usize]) -> Result<Vec<usize>, ColumnError> {
        if ids.len() != self.values.len() {
            return Err(ColumnError::LengthMismatch {
                expected: self.values.len(),
                actual: ids.len(),
            });
        }
        let mut order: Vec<usize> = (0..self.values.len()).collect();
        order.sort_by(|&a, &b| {
            compare_na_last(&self.values[a], &self.values[b], ascending)
                .then_with(|| ids[a].cmp(&ids[b]))
        });
        Ok(order)
    }

    #[must_use]
    pub fn semantic_eq(&self, other: &Self) -> bool {
        self.dtype == other.dtype
            && self.values.len() == other.values.len()
            && self
                .values
                .iter()
                .zip(&other.values)
                .all(|(a, b)| a.semantic_eq(b))
    }
}
