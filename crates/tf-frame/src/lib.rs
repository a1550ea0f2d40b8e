#![forbid(unsafe_code)]

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use tf_columnar::{ArithmeticOp, Column, ColumnError, ComparisonOp};
use tf_groupby::{GroupBy, GroupByError, GroupByOptions};
use tf_index::{Index, IndexError, IndexLabel, RowDescriptor};
use tf_runtime::{EvidenceLedger, RuntimePolicy};
use tf_stats::{AggFunc, StatsError, StatsFunc, StatsOptions, StatsResult, describe};
use tf_types::{CompositeKey, DType, ErrorKind, Scalar, infer_dtype};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("got {names} column names for {columns} columns")]
    NameCountMismatch { names: usize, columns: usize },
    #[error("column {column:?} has {actual} rows, expected {expected}")]
    LengthMismatch {
        column: String,
        expected: usize,
        actual: usize,
    },
    #[error("column {name:?} does not exist")]
    ColumnNotFound { name: String },
    #[error("axis can only be 0 (rows) or 1 (columns), got {axis}")]
    InvalidAxis { axis: i64 },
    #[error("schemas differ: {detail}")]
    SchemaMismatch { detail: String },
    #[error("pivot is ambiguous: row ({row}) has more than one value for column {column:?}")]
    AmbiguousPivot { row: String, column: String },
    #[error(transparent)]
    Column(#[from] ColumnError),
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error(transparent)]
    GroupBy(#[from] GroupByError),
    #[error(transparent)]
    Stats(#[from] StatsError),
}

impl FrameError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NameCountMismatch { .. } | Self::LengthMismatch { .. } => {
                ErrorKind::DimensionMismatch
            }
            Self::ColumnNotFound { .. } => ErrorKind::ColumnNotFound,
            Self::InvalidAxis { .. } => ErrorKind::InvalidAxis,
            Self::SchemaMismatch { .. } => ErrorKind::SchemaMismatch,
            Self::AmbiguousPivot { .. } => ErrorKind::AmbiguousPivot,
            Self::Column(err) => err.kind(),
            Self::Index(err) => err.kind(),
            Self::GroupBy(err) => err.kind(),
            Self::Stats(err) => err.kind(),
        }
    }
}

// ── Series ─────────────────────────────────────────────────────────────

/// A named column paired with its own copy of the row index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Series {
    name: String,
    index: Index,
    column: Column,
}

impl Series {
    pub fn new(name: impl Into<String>, index: Index, column: Column) -> Result<Self, FrameError> {
        let name = name.into();
        if index.len() != column.len() {
            return Err(FrameError::LengthMismatch {
                column: name,
                expected: index.len(),
                actual: column.len(),
            });
        }
        Ok(Self {
            name,
            index,
            column,
        })
    }

    /// Infer the dtype and attach a range index.
    pub fn from_values(name: impl Into<String>, values: Vec<Scalar>) -> Result<Self, FrameError> {
        let column = Column::new(values)?;
        Self::new(name, Index::range(column.len()), column)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn index(&self) -> &Index {
        &self.index
    }

    #[must_use]
    pub fn column(&self) -> &Column {
        &self.column
    }

    #[must_use]
    pub fn values(&self) -> &[Scalar] {
        self.column.values()
    }

    #[must_use]
    pub fn dtype(&self) -> DType {
        self.column.dtype()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.column.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.column.is_empty()
    }

    #[must_use]
    pub fn renamed(&self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            index: self.index.clone(),
            column: self.column.clone(),
        }
    }

    fn take(&self, positions: &[usize]) -> Result<Self, FrameError> {
        Ok(Self {
            name: self.name.clone(),
            index: self.index.take(positions)?,
            column: self.column.take(positions)?,
        })
    }

    /// Every cell whose label matches one of `labels`, in argument order.
    pub fn loc(&self, labels: &[IndexLabel]) -> Result<Self, FrameError> {
        let mut positions = Vec::new();
        for label in labels {
            positions.extend_from_slice(self.index.locate_positions(label)?);
        }
        self.take(&positions)
    }

    /// Missing values sort last in both directions; equal values keep id
    /// order.
    pub fn sort_by_values(&self, ascending: bool) -> Result<Self, FrameError> {
        let ids: Vec<usize> = self.index.ids().collect();
        let order = self.column.argsort(ascending, &ids)?;
        self.take(&order)
    }

    pub fn sort_by_index(&self, ascending: bool) -> Result<Self, FrameError> {
        let order = self.index.argsort(ascending);
        self.take(&order)
    }

    /// Reorder rows to follow the id sequence of `order`, which must be a
    /// permutation of this series' ids.
    pub fn sort_by_given_index(&self, order: &Index) -> Result<Self, FrameError> {
        let ids: Vec<usize> = order.ids().collect();
        let positions = self.index.positions_of_ids(&ids)?;
        Ok(Self {
            name: self.name.clone(),
            index: self.index.with_permutation(&positions)?,
            column: self.column.take(&positions)?,
        })
    }

    pub fn binary_scalar(&self, op: ArithmeticOp, rhs: f64) -> Result<Self, FrameError> {
        Ok(Self {
            name: self.name.clone(),
            index: self.index.clone(),
            column: self.column.binary_scalar(op, rhs)?,
        })
    }

    pub fn compare_scalar(&self, op: ComparisonOp, rhs: f64) -> Result<Self, FrameError> {
        Ok(Self {
            name: self.name.clone(),
            index: self.index.clone(),
            column: self.column.compare_scalar(op, rhs)?,
        })
    }

    pub fn aggregate(&self, func: StatsFunc) -> Result<StatsResult, FrameError> {
        Ok(func(self.values())?)
    }

    pub fn aggregate_with(
        &self,
        func: AggFunc,
        options: &StatsOptions,
    ) -> Result<StatsResult, FrameError> {
        Ok(func.compute_with(self.values(), options)?)
    }

    /// Every aggregator that succeeds on this series, in [`AggFunc::ALL`]
    /// order.
    #[must_use]
    pub fn describe(&self, options: &StatsOptions) -> Vec<StatsResult> {
        describe(self.values(), options)
    }
}

// ── DataFrame ──────────────────────────────────────────────────────────

/// One column as handed to serializers. Missing cells are `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnExport {
    pub name: String,
    pub dtype: DType,
    pub cells: Vec<Option<Scalar>>,
}

/// Same-length named columns sharing one index.
///
/// Every operation returns a new frame. Column names may repeat; name
/// lookups resolve to the first match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataFrame {
    index: Index,
    columns: Vec<Column>,
    column_names: Vec<String>,
}

impl DataFrame {
    /// Build a frame from parsed columnar data.
    ///
    /// `index_column_names` picks the columns whose (coerced) values form the
    /// label tuples; those columns stay in the frame as data. `None` or an
    /// empty list yields a range index.
    pub fn new(
        columns: Vec<Vec<Scalar>>,
        column_names: Vec<String>,
        index_column_names: Option<Vec<String>>,
    ) -> Result<Self, FrameError> {
        if columns.len() != column_names.len() {
            return Err(FrameError::NameCountMismatch {
                names: column_names.len(),
                columns: columns.len(),
            });
        }
        let nrows = columns.first().map_or(0, Vec::len);
        let columns = columns
            .into_iter()
            .zip(&column_names)
            .map(|(values, name)| {
                if values.len() != nrows {
                    return Err(FrameError::LengthMismatch {
                        column: name.clone(),
                        expected: nrows,
                        actual: values.len(),
                    });
                }
                Ok(Column::new(values)?)
            })
            .collect::<Result<Vec<_>, _>>()?;

        let index = match index_column_names {
            Some(names) if !names.is_empty() => {
                let levels = names
                    .iter()
                    .map(|name| {
                        column_names
                            .iter()
                            .position(|candidate| candidate == name)
                            .map(|pos| columns[pos].values().to_vec())
                            .ok_or_else(|| FrameError::ColumnNotFound { name: name.clone() })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Index::from_label_columns(&levels, names)?
            }
            _ => Index::range(nrows),
        };

        Ok(Self {
            index,
            columns,
            column_names,
        })
    }

    fn from_parts(
        index: Index,
        columns: Vec<Column>,
        column_names: Vec<String>,
    ) -> Result<Self, FrameError> {
        if columns.len() != column_names.len() {
            return Err(FrameError::NameCountMismatch {
                names: column_names.len(),
                columns: columns.len(),
            });
        }
        if let Some((column, name)) = columns
            .iter()
            .zip(&column_names)
            .find(|(column, _)| column.len() != index.len())
        {
            return Err(FrameError::LengthMismatch {
                column: name.clone(),
                expected: index.len(),
                actual: column.len(),
            });
        }
        Ok(Self {
            index,
            columns,
            column_names,
        })
    }

    #[must_use]
    pub fn index(&self) -> &Index {
        &self.index
    }

    #[must_use]
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    #[must_use]
    pub fn column_names(&self) -> &[String] {
        &self.column_names
    }

    #[must_use]
    pub fn nrows(&self) -> usize {
        self.index.len()
    }

    #[must_use]
    pub fn ncols(&self) -> usize {
        self.columns.len()
    }

    /// `(rows, columns)`.
    #[must_use]
    pub fn shape(&self) -> (usize, usize) {
        (self.nrows(), self.ncols())
    }

    #[must_use]
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.column_position(name).map(|pos| &self.columns[pos])
    }

    fn column_position(&self, name: &str) -> Option<usize> {
        self.column_names.iter().position(|candidate| candidate == name)
    }

    fn require_position(&self, name: &str) -> Result<usize, FrameError> {
        self.column_position(name)
            .ok_or_else(|| FrameError::ColumnNotFound {
                name: name.to_owned(),
            })
    }

    fn require_column(&self, name: &str) -> Result<&Column, FrameError> {
        self.require_position(name).map(|pos| &self.columns[pos])
    }

    fn ids(&self) -> Vec<usize> {
        self.index.ids().collect()
    }

    // ── Extraction ─────────────────────────────────────────────────────

    #[must_use]
    pub fn export_columns(&self) -> Vec<ColumnExport> {
        self.columns
            .iter()
            .zip(&self.column_names)
            .map(|(column, name)| ColumnExport {
                name: name.clone(),
                dtype: column.dtype(),
                cells: column
                    .values()
                    .iter()
                    .map(|value| (!value.is_missing()).then(|| value.clone()))
                    .collect(),
            })
            .collect()
    }

    /// Row-major cells, one inner vector per row in index order.
    #[must_use]
    pub fn rows(&self) -> Vec<Vec<Scalar>> {
        (0..self.nrows())
            .map(|row| {
                self.columns
                    .iter()
                    .map(|column| column.values()[row].clone())
                    .collect()
            })
            .collect()
    }

    /// One name → value map per row. A repeated column name keeps its first
    /// column's value.
    #[must_use]
    pub fn records(&self) -> Vec<BTreeMap<String, Scalar>> {
        (0..self.nrows())
            .map(|row| {
                let mut record = BTreeMap::new();
                for (column, name) in self.columns.iter().zip(&self.column_names) {
                    record
                        .entry(name.clone())
                        .or_insert_with(|| column.values()[row].clone());
                }
                record
            })
            .collect()
    }

    // ── Selection ──────────────────────────────────────────────────────

    pub fn loc_col(&self, name: &str) -> Result<Series, FrameError> {
        let column = self.require_column(name)?;
        Series::new(name, self.index.clone(), column.clone())
    }

    /// Columns in the requested order; the index is kept whole.
    pub fn select_columns(&self, names: &[&str]) -> Result<Self, FrameError> {
        let columns = names
            .iter()
            .map(|name| self.require_column(name).cloned())
            .collect::<Result<Vec<_>, _>>()?;
        let column_names = names.iter().map(|name| (*name).to_owned()).collect();
        Self::from_parts(self.index.clone(), columns, column_names)
    }

    /// All rows matching each label, concatenated in argument order.
    pub fn select_rows(&self, labels: &[IndexLabel]) -> Result<Self, FrameError> {
        let mut positions = Vec::new();
        for label in labels {
            positions.extend_from_slice(self.index.locate_positions(label)?);
        }
        self.take(&positions)
    }

    /// Rows by stable id, in argument order.
    pub fn select_ids(&self, ids: &[usize]) -> Result<Self, FrameError> {
        let positions = self.index.positions_of_ids(ids)?;
        self.take(&positions)
    }

    pub fn loc(&self, columns: &[&str], rows: &[IndexLabel]) -> Result<Self, FrameError> {
        self.select_columns(columns)?.select_rows(rows)
    }

    /// Subset/reorder rows by position.
    pub fn take(&self, positions: &[usize]) -> Result<Self, FrameError> {
        let columns = self
            .columns
            .iter()
            .map(|column| column.take(positions))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            index: self.index.take(positions)?,
            columns,
            column_names: self.column_names.clone(),
        })
    }

    // ── Column arithmetic ──────────────────────────────────────────────

    fn replace_column(&self, position: usize, column: Column) -> Self {
        let mut out = self.clone();
        out.columns[position] = column;
        out
    }

    /// Apply `cell op rhs` to the named float column.
    pub fn col_arithmetic(
        &self,
        name: &str,
        op: ArithmeticOp,
        rhs: f64,
    ) -> Result<Self, FrameError> {
        let position = self.require_position(name)?;
        let column = self.columns[position].binary_scalar(op, rhs)?;
        Ok(self.replace_column(position, column))
    }

    pub fn col_add(&self, name: &str, rhs: f64) -> Result<Self, FrameError> {
        self.col_arithmetic(name, ArithmeticOp::Add, rhs)
    }

    pub fn col_sub(&self, name: &str, rhs: f64) -> Result<Self, FrameError> {
        self.col_arithmetic(name, ArithmeticOp::Sub, rhs)
    }

    pub fn col_mul(&self, name: &str, rhs: f64) -> Result<Self, FrameError> {
        self.col_arithmetic(name, ArithmeticOp::Mul, rhs)
    }

    pub fn col_div(&self, name: &str, rhs: f64) -> Result<Self, FrameError> {
        self.col_arithmetic(name, ArithmeticOp::Div, rhs)
    }

    pub fn col_mod(&self, name: &str, rhs: f64) -> Result<Self, FrameError> {
        self.col_arithmetic(name, ArithmeticOp::Mod, rhs)
    }

    /// Replace the named float column with the bool column `cell op rhs`.
    pub fn col_compare(
        &self,
        name: &str,
        op: ComparisonOp,
        rhs: f64,
    ) -> Result<Self, FrameError> {
        let position = self.require_position(name)?;
        let column = self.columns[position].compare_scalar(op, rhs)?;
        Ok(self.replace_column(position, column))
    }

    pub fn col_gt(&self, name: &str, rhs: f64) -> Result<Self, FrameError> {
        self.col_compare(name, ComparisonOp::Gt, rhs)
    }

    pub fn col_lt(&self, name: &str, rhs: f64) -> Result<Self, FrameError> {
        self.col_compare(name, ComparisonOp::Lt, rhs)
    }

    pub fn col_eq(&self, name: &str, rhs: f64) -> Result<Self, FrameError> {
        self.col_compare(name, ComparisonOp::Eq, rhs)
    }

    // ── Editing ────────────────────────────────────────────────────────

    /// Append a column. `None` appends an all-missing float column.
    pub fn with_column(
        &self,
        name: impl Into<String>,
        values: Option<Vec<Scalar>>,
    ) -> Result<Self, FrameError> {
        let name = name.into();
        let column = match values {
            Some(values) => Column::new(values)?,
            None => Column::missing(DType::Float64, self.nrows()),
        };
        if column.len() != self.nrows() {
            return Err(FrameError::LengthMismatch {
                column: name,
                expected: self.nrows(),
                actual: column.len(),
            });
        }
        let mut out = self.clone();
        out.columns.push(column);
        out.column_names.push(name);
        Ok(out)
    }

    /// Append a copy of `source` under a new name.
    pub fn with_derived_column(
        &self,
        name: impl Into<String>,
        source: &str,
    ) -> Result<Self, FrameError> {
        let column = self.require_column(source)?.clone();
        let mut out = self.clone();
        out.columns.push(column);
        out.column_names.push(name.into());
        Ok(out)
    }

    /// Rename every column (and index level) whose name is a key of
    /// `mapping`. Fails without renaming anything if a key matches no
    /// column.
    pub fn renamed(&self, mapping: &BTreeMap<String, String>) -> Result<Self, FrameError> {
        if let Some(missing) = mapping
            .keys()
            .find(|old| self.column_position(old).is_none())
        {
            return Err(FrameError::ColumnNotFound {
                name: missing.clone(),
            });
        }
        let column_names = self
            .column_names
            .iter()
            .map(|name| mapping.get(name).cloned().unwrap_or_else(|| name.clone()))
            .collect();
        Ok(Self {
            index: self.index.rename_levels(mapping),
            columns: self.columns.clone(),
            column_names,
        })
    }

    pub fn rename_columns(&mut self, mapping: &BTreeMap<String, String>) -> Result<(), FrameError> {
        *self = self.renamed(mapping)?;
        Ok(())
    }

    // ── Missing values ─────────────────────────────────────────────────

    /// Axis 0 drops rows holding any missing cell; axis 1 drops columns
    /// holding any missing cell.
    pub fn drop_missing(&self, axis: i64) -> Result<Self, FrameError> {
        match axis {
            0 => {
                let keep: Vec<usize> = (0..self.nrows())
                    .filter(|&row| {
                        self.columns
                            .iter()
                            .all(|column| column.validity().get(row))
                    })
                    .collect();
                self.take(&keep)
            }
            1 => {
                let (columns, column_names): (Vec<Column>, Vec<String>) = self
                    .columns
                    .iter()
                    .zip(&self.column_names)
                    .filter(|(column, _)| !column.has_missing())
                    .map(|(column, name)| (column.clone(), name.clone()))
                    .unzip();
                Ok(Self {
                    index: self.index.clone(),
                    columns,
                    column_names,
                })
            }
            _ => Err(FrameError::InvalidAxis { axis }),
        }
    }

    // ── Merging ────────────────────────────────────────────────────────

    /// Side-by-side concatenation aligned by position. The shorter frame is
    /// padded with missing cells and the result gets a fresh range index.
    #[must_use]
    pub fn merge_horizontal(&self, other: &Self) -> Self {
        let len = self.nrows().max(other.nrows());
        let columns = self
            .columns
            .iter()
            .chain(&other.columns)
            .map(|column| column.padded(len))
            .collect();
        let column_names = self
            .column_names
            .iter()
            .chain(&other.column_names)
            .cloned()
            .collect();
        Self {
            index: Index::range(len),
            columns,
            column_names,
        }
    }

    /// Stack `other` below `self`. Names, dtypes and index depth must match;
    /// `other`'s ids are shifted past `self`'s.
    pub fn merge_vertical(&self, other: &Self) -> Result<Self, FrameError> {
        if self.column_names != other.column_names {
            return Err(FrameError::SchemaMismatch {
                detail: format!(
                    "column names {:?} vs {:?}",
                    self.column_names, other.column_names
                ),
            });
        }
        if let Some(((left, right), name)) = self
            .columns
            .iter()
            .zip(&other.columns)
            .zip(&self.column_names)
            .find(|((left, right), _)| left.dtype() != right.dtype())
        {
            return Err(FrameError::SchemaMismatch {
                detail: format!(
                    "column {name:?} is {} on the left and {} on the right",
                    left.dtype(),
                    right.dtype()
                ),
            });
        }
        let index = self.index.append(&other.index, self.index.next_id())?;
        let columns = self
            .columns
            .iter()
            .zip(&other.columns)
            .map(|(left, right)| left.concat(right))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            index,
            columns,
            column_names: self.column_names.clone(),
        })
    }

    // ── Sorting ────────────────────────────────────────────────────────

    pub fn sort_by_index(&self, ascending: bool) -> Result<Self, FrameError> {
        let order = self.index.argsort(ascending);
        self.take(&order)
    }

    /// Order rows by one column's values (missing last, ties by id); every
    /// other column follows.
    pub fn sort_by_values(&self, column: &str, ascending: bool) -> Result<Self, FrameError> {
        let order = self.require_column(column)?.argsort(ascending, &self.ids())?;
        self.take(&order)
    }

    pub fn sort_by_index_in_place(&mut self, ascending: bool) -> Result<(), FrameError> {
        *self = self.sort_by_index(ascending)?;
        Ok(())
    }

    pub fn sort_by_values_in_place(
        &mut self,
        column: &str,
        ascending: bool,
    ) -> Result<(), FrameError> {
        *self = self.sort_by_values(column, ascending)?;
        Ok(())
    }

    /// Lexicographic column order; rows are untouched.
    #[must_use]
    pub fn sort_by_column_names(&self) -> Self {
        let mut order: Vec<usize> = (0..self.ncols()).collect();
        order.sort_by(|&a, &b| self.column_names[a].cmp(&self.column_names[b]));
        self.reorder_columns(&order)
    }

    /// Move the columns backing index levels to the front, in level order.
    #[must_use]
    pub fn sort_index_columns_first(&self) -> Self {
        let mut order = Vec::with_capacity(self.ncols());
        for level in self.index.names() {
            for pos in 0..self.ncols() {
                if &self.column_names[pos] == level && !order.contains(&pos) {
                    order.push(pos);
                }
            }
        }
        let rest: Vec<usize> = (0..self.ncols()).filter(|pos| !order.contains(pos)).collect();
        order.extend(rest);
        self.reorder_columns(&order)
    }

    fn reorder_columns(&self, order: &[usize]) -> Self {
        Self {
            index: self.index.clone(),
            columns: order.iter().map(|&pos| self.columns[pos].clone()).collect(),
            column_names: order
                .iter()
                .map(|&pos| self.column_names[pos].clone())
                .collect(),
        }
    }

    // ── Reshaping ──────────────────────────────────────────────────────

    /// Spread `value_key` across one column per distinct `column_key` value.
    ///
    /// Rows are the distinct index labels in first-seen order. Each (row,
    /// column) cell takes at most one value; a second one is an
    /// [`FrameError::AmbiguousPivot`]. Absent combinations are missing, so an
    /// int value column comes back as float when any hole exists.
    pub fn pivot(&self, column_key: &str, value_key: &str) -> Result<Self, FrameError> {
        let keys = self.require_column(column_key)?;
        let values = self.require_column(value_key)?;

        let row_labels = self.index.unique_labels();
        let row_slots: HashMap<CompositeKey, usize> = row_labels
            .iter()
            .enumerate()
            .map(|(slot, label)| (label.key(), slot))
            .collect();

        let mut column_names = Vec::<String>::new();
        let mut column_slots = HashMap::<String, usize>::new();
        let mut grid: Vec<Vec<Option<Scalar>>> = Vec::new();
        for (pos, row) in self.index.rows().iter().enumerate() {
            let name = keys.values()[pos].canonical_string();
            let col = *column_slots.entry(name.clone()).or_insert_with(|| {
                column_names.push(name.clone());
                grid.push(vec![None; row_labels.len()]);
                grid.len() - 1
            });
            let Some(&slot) = row_slots.get(&row.label.key()) else {
                continue;
            };
            let cell = &mut grid[col][slot];
            if cell.is_some() {
                return Err(FrameError::AmbiguousPivot {
                    row: row.label.canonical_string(),
                    column: name,
                });
            }
            *cell = Some(values.values()[pos].clone());
        }

        let has_holes = grid.iter().flatten().any(Option::is_none);
        let dtype = match values.dtype() {
            DType::Int64 if has_holes => DType::Float64,
            dtype => dtype,
        };
        let columns = grid
            .into_iter()
            .map(|cells| {
                Column::with_dtype(
                    dtype,
                    cells.into_iter().map(|cell| cell.unwrap_or(Scalar::Missing)).collect(),
                )
            })
            .collect::<Result<Vec<_>, _>>()?;
        let index = Index::from_descriptors(
            row_labels
                .into_iter()
                .enumerate()
                .map(|(id, label)| RowDescriptor { id, label })
                .collect(),
            self.index.names().to_vec(),
        )?;
        Self::from_parts(index, columns, column_names)
    }

    /// [`DataFrame::pivot_table_with_policy`] under the hardened policy:
    /// groups whose aggregation fails become missing cells.
    pub fn pivot_table(
        &self,
        index_key: &str,
        column_key: &str,
        value_key: &str,
        func: StatsFunc,
    ) -> Result<Self, FrameError> {
        let mut ledger = EvidenceLedger::new();
        self.pivot_table_with_policy(
            index_key,
            column_key,
            value_key,
            func,
            &RuntimePolicy::hardened(),
            &mut ledger,
        )
    }

    /// Aggregate `value_key` over every (`index_key`, `column_key`) pair.
    ///
    /// Missing values are dropped before `func` runs. The distinct index and
    /// column values are laid out sorted by their canonical strings; the new
    /// index has one level named `index_key`. Pairs that never occur are
    /// missing and leave no ledger entry; pairs whose aggregation fails are
    /// handled by `policy`.
    pub fn pivot_table_with_policy(
        &self,
        index_key: &str,
        column_key: &str,
        value_key: &str,
        func: StatsFunc,
        policy: &RuntimePolicy,
        ledger: &mut EvidenceLedger,
    ) -> Result<Self, FrameError> {
        let row_keys = self.require_column(index_key)?;
        let col_keys = self.require_column(column_key)?;
        let values = self.require_column(value_key)?;
        let ids = self.ids();

        let groups = GroupBy::build(
            vec![index_key.to_owned(), column_key.to_owned()],
            &[row_keys.values(), col_keys.values()],
            &ids,
            GroupByOptions::default(),
        )?;
        let results = groups.aggregate(values.values(), &ids, func, policy, ledger)?;

        let mut row_labels = BTreeMap::<String, Scalar>::new();
        let mut column_names = BTreeSet::<String>::new();
        for group in groups.groups() {
            row_labels
                .entry(group.key[0].canonical_string())
                .or_insert_with(|| group.key[0].clone());
            column_names.insert(group.key[1].canonical_string());
        }
        let row_slot: HashMap<&str, usize> = row_labels
            .keys()
            .enumerate()
            .map(|(slot, name)| (name.as_str(), slot))
            .collect();
        let column_slot: HashMap<&str, usize> = column_names
            .iter()
            .enumerate()
            .map(|(slot, name)| (name.as_str(), slot))
            .collect();

        let mut grid = vec![vec![Scalar::Missing; row_labels.len()]; column_names.len()];
        for (group, result) in groups.groups().iter().zip(results) {
            let row = row_slot[group.key[0].canonical_string().as_str()];
            let col = column_slot[group.key[1].canonical_string().as_str()];
            grid[col][row] = result;
        }

        let columns = grid
            .into_iter()
            .map(|cells| Column::with_dtype(DType::Float64, cells))
            .collect::<Result<Vec<_>, _>>()?;
        let index = Index::from_label_columns(
            &[row_labels.into_values().collect()],
            vec![index_key.to_owned()],
        )?;
        Self::from_parts(index, columns, column_names.into_iter().collect())
    }

    /// Wide to long: one row per (row, column) cell holding the row's index
    /// labels, the column name and the cell value. Every column is melted,
    /// including ones that also back an index level. A value column that
    /// would mix incompatible dtypes is rendered as strings.
    pub fn melt(&self, column_label_name: &str, value_label_name: &str) -> Result<Self, FrameError> {
        let levels = self.index.names();
        let capacity = self.nrows() * self.ncols();
        let mut level_values = vec![Vec::with_capacity(capacity); levels.len()];
        let mut names = Vec::with_capacity(capacity);
        let mut values = Vec::with_capacity(capacity);
        for (row, descriptor) in self.index.rows().iter().enumerate() {
            for pos in 0..self.ncols() {
                for (level, part) in level_values.iter_mut().zip(descriptor.label.parts()) {
                    level.push(part.clone());
                }
                names.push(Scalar::Utf8(self.column_names[pos].clone()));
                values.push(self.columns[pos].values()[row].clone());
            }
        }
        if infer_dtype(&values).is_err() {
            values = values
                .into_iter()
                .map(|value| match value {
                    Scalar::Missing => Scalar::Missing,
                    other => Scalar::Utf8(other.canonical_string()),
                })
                .collect();
        }

        let mut data = level_values;
        data.push(names);
        data.push(values);
        let mut column_names = levels.to_vec();
        column_names.push(column_label_name.to_owned());
        column_names.push(value_label_name.to_owned());
        Self::new(data, column_names, Some(levels.to_vec()))
    }

    // ── Grouping ───────────────────────────────────────────────────────

    /// Group row ids by the tuple of the named columns. Rows with missing
    /// keys form their own group.
    pub fn group_by(&self, names: &[&str]) -> Result<GroupBy, FrameError> {
        self.group_by_with(names, GroupByOptions::default())
    }

    pub fn group_by_with(
        &self,
        names: &[&str],
        options: GroupByOptions,
    ) -> Result<GroupBy, FrameError> {
        let key_columns = names
            .iter()
            .map(|name| self.require_column(name).map(Column::values))
            .collect::<Result<Vec<_>, _>>()?;
        let labels = names.iter().map(|name| (*name).to_owned()).collect();
        Ok(GroupBy::build(labels, &key_columns, &self.ids(), options)?)
    }

    /// One row per group: the key columns followed by the float result of
    /// `func` over `value_column`. The key columns also form the index.
    pub fn aggregate(
        &self,
        groups: &GroupBy,
        value_column: &str,
        func: StatsFunc,
        policy: &RuntimePolicy,
        ledger: &mut EvidenceLedger,
    ) -> Result<Self, FrameError> {
        let values = self.require_column(value_column)?;
        let results = groups.aggregate(values.values(), &self.ids(), func, policy, ledger)?;

        let key_data: Vec<Vec<Scalar>> = (0..groups.labels().len())
            .map(|level| groups.keys().map(|key| key[level].clone()).collect())
            .collect();
        let index = Index::from_label_columns(&key_data, groups.labels().to_vec())?;

        let mut columns = key_data
            .into_iter()
            .map(Column::new)
            .collect::<Result<Vec<_>, _>>()?;
        columns.push(Column::with_dtype(DType::Float64, results)?);
        let mut column_names = groups.labels().to_vec();
        column_names.push(value_column.to_owned());
        Self::from_parts(index, columns, column_names)
    }
}
