#![forbid(unsafe_code)]

use std::cell::OnceCell;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tf_types::{CompositeKey, ErrorKind, Scalar, compare_na_last};

pub const DEFAULT_LEVEL_NAME: &str = "index";

/// Label tuple of one row. Single-level indexes carry one part.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IndexLabel(Vec<Scalar>);

impl IndexLabel {
    #[must_use]
    pub fn new(parts: Vec<Scalar>) -> Self {
        Self(parts.into_iter().map(Scalar::normalized).collect())
    }

    #[must_use]
    pub fn parts(&self) -> &[Scalar] {
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

    #[must_use]
    pub fn key(&self) -> CompositeKey {
        CompositeKey::from_values(&self.0)
    }

    /// Parts joined with `", "` using [`Scalar::canonical_string`].
    #[must_use]
    pub fn canonical_string(&self) -> String {
        self.0
            .iter()
            .map(Scalar::canonical_string)
            .collect::<Vec<_>>()
            .join(", ")
    }

    #[must_use]
    pub fn compare(&self, other: &Self, ascending: bool) -> Ordering {
        for (left, right) in self.0.iter().zip(&other.0) {
            let ord = compare_na_last(left, right, ascending);
            if ord != Ordering::Equal {
                return ord;
            }
        }
        self.0.len().cmp(&other.0.len())
    }
}

impl From<Scalar> for IndexLabel {
    fn from(value: Scalar) -> Self {
        Self::new(vec![value])
    }
}

impl From<i64> for IndexLabel {
    fn from(value: i64) -> Self {
        Self(vec![Scalar::Int64(value)])
    }
}

impl From<&str> for IndexLabel {
    fn from(value: &str) -> Self {
        Self(vec![Scalar::from(value)])
    }
}

impl From<String> for IndexLabel {
    fn from(value: String) -> Self {
        Self(vec![Scalar::Utf8(value)])
    }
}

impl From<Vec<Scalar>> for IndexLabel {
    fn from(parts: Vec<Scalar>) -> Self {
        Self::new(parts)
    }
}

impl fmt::Display for IndexLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical_string())
    }
}

/// A row: its stable id plus its label tuple.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowDescriptor {
    pub id: usize,
    pub label: IndexLabel,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IndexError {
    #[error("index needs at least one level")]
    NoLevels,
    #[error("index levels have mismatched lengths: expected {expected}, found {actual}")]
    LengthMismatch { expected: usize, actual: usize },
    #[error("got {names} level names for {levels} levels")]
    NameCountMismatch { names: usize, levels: usize },
    #[error("label has {actual} parts but index has {expected} levels")]
    LabelArity { expected: usize, actual: usize },
    #[error("order of length {actual} is not a permutation of {expected} rows")]
    InvalidPermutation { expected: usize, actual: usize },
    #[error("position {position} out of bounds for length {len}")]
    PositionOutOfBounds { position: usize, len: usize },
    #[error("label ({label}) not found in index")]
    LabelNotFound { label: String },
    #[error("row id {id} not found in index")]
    IdNotFound { id: usize },
    #[error("cannot append index with {right} levels to index with {left} levels")]
    LevelMismatch { left: usize, right: usize },
}

impl IndexError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NoLevels
            | Self::LengthMismatch { .. }
            | Self::NameCountMismatch { .. }
            | Self::LabelArity { .. }
            | Self::InvalidPermutation { .. }
            | Self::PositionOutOfBounds { .. } => ErrorKind::DimensionMismatch,
            Self::LabelNotFound { .. } | Self::IdNotFound { .. } => ErrorKind::LabelNotFound,
            Self::LevelMismatch { .. } => ErrorKind::SchemaMismatch,
        }
    }
}

/// Ordered row descriptors plus level names.
///
/// Ids are assigned once, when the rows are first created, and travel with
/// their row through every reorder, filter and concatenation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Index {
    rows: Vec<RowDescriptor>,
    names: Vec<String>,
    #[serde(skip)]
    lookup_cache: OnceCell<HashMap<CompositeKey, Vec<usize>>>,
}

impl PartialEq for Index {
    fn eq(&self, other: &Self) -> bool {
        self.rows == other.rows && self.names == other.names
    }
}

impl Index {
    fn from_rows(rows: Vec<RowDescriptor>, names: Vec<String>) -> Self {
        Self {
            rows,
            names,
            lookup_cache: OnceCell::new(),
        }
    }

    /// Ids `0..n` with a single `"index"` level whose label is the id.
    #[must_use]
    pub fn range(n: usize) -> Self {
        let rows = (0..n)
            .map(|id| RowDescriptor {
                id,
                label: IndexLabel::from(id as i64),
            })
            .collect();
        Self::from_rows(rows, vec![DEFAULT_LEVEL_NAME.to_owned()])
    }

    /// Build label tuples row-wise from parallel level columns. Ids are the
    /// row positions.
    pub fn from_label_columns(
        columns: &[Vec<Scalar>],
        names: Vec<String>,
    ) -> Result<Self, IndexError> {
        let Some(first) = columns.first() else {
            return Err(IndexError::NoLevels);
        };
        if names.len() != columns.len() {
            return Err(IndexError::NameCountMismatch {
                names: names.len(),
                levels: columns.len(),
            });
        }
        let len = first.len();
        if let Some(bad) = columns.iter().find(|col| col.len() != len) {
            return Err(IndexError::LengthMismatch {
                expected: len,
                actual: bad.len(),
            });
        }

        let rows = (0..len)
            .map(|id| RowDescriptor {
                id,
                label: IndexLabel::new(columns.iter().map(|col| col[id].clone()).collect()),
            })
            .collect();
        Ok(Self::from_rows(rows, names))
    }

    /// Assemble an index from explicit descriptors, e.g. the unique rows of a
    /// reshape.
    pub fn from_descriptors(
        rows: Vec<RowDescriptor>,
        names: Vec<String>,
    ) -> Result<Self, IndexError> {
        if names.is_empty() {
            return Err(IndexError::NoLevels);
        }
        if let Some(bad) = rows.iter().find(|row| row.label.len() != names.len()) {
            return Err(IndexError::LabelArity {
                expected: names.len(),
                actual: bad.label.len(),
            });
        }
        Ok(Self::from_rows(rows, names))
    }

    #[must_use]
    pub fn hash(label: &IndexLabel) -> CompositeKey {
        label.key()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    #[must_use]
    pub fn nlevels(&self) -> usize {
        self.names.len()
    }

    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.names
    }

    #[must_use]
    pub fn rows(&self) -> &[RowDescriptor] {
        &self.rows
    }

    pub fn ids(&self) -> impl Iterator<Item = usize> + '_ {
        self.rows.iter().map(|row| row.id)
    }

    pub fn labels(&self) -> impl Iterator<Item = &IndexLabel> + '_ {
        self.rows.iter().map(|row| &row.label)
    }

    /// Values of one level, in row order.
    #[must_use]
    pub fn level_values(&self, level: usize) -> Vec<Scalar> {
        self.rows
            .iter()
            .map(|row| row.label.parts().get(level).cloned().unwrap_or(Scalar::Missing))
            .collect()
    }

    /// One past the largest id, so appended rows never collide.
    #[must_use]
    pub fn next_id(&self) -> usize {
        self.rows.iter().map(|row| row.id + 1).max().unwrap_or(0)
    }

    fn lookup(&self) -> &HashMap<CompositeKey, Vec<usize>> {
        self.lookup_cache.get_or_init(|| {
            let mut map = HashMap::<CompositeKey, Vec<usize>>::with_capacity(self.rows.len());
            for (pos, row) in self.rows.iter().enumerate() {
                map.entry(row.label.key()).or_default().push(pos);
            }
            map
        })
    }

    /// Positions of every row carrying `label`, in index order.
    #[must_use]
    pub fn positions_of(&self, label: &IndexLabel) -> &[usize] {
        self.lookup()
            .get(&label.key())
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Like [`Index::positions_of`], but an arity mismatch or an absent
    /// label is an error.
    pub fn locate_positions(&self, label: &IndexLabel) -> Result<&[usize], IndexError> {
        if label.len() != self.nlevels() {
            return Err(IndexError::LabelArity {
                expected: self.nlevels(),
                actual: label.len(),
            });
        }
        let positions = self.positions_of(label);
        if positions.is_empty() {
            return Err(IndexError::LabelNotFound {
                label: label.canonical_string(),
            });
        }
        Ok(positions)
    }

    /// Ids of every row carrying `label`, in index order.
    pub fn locate(&self, label: &IndexLabel) -> Result<Vec<usize>, IndexError> {
        let positions = self.locate_positions(label)?;
        Ok(positions.iter().map(|&pos| self.rows[pos].id).collect())
    }

    #[must_use]
    pub fn position_of_id(&self, id: usize) -> Option<usize> {
        self.rows.iter().position(|row| row.id == id)
    }

    pub fn positions_of_ids(&self, ids: &[usize]) -> Result<Vec<usize>, IndexError> {
        let by_id: HashMap<usize, usize> = self
            .rows
            .iter()
            .enumerate()
            .map(|(pos, row)| (row.id, pos))
            .collect();
        ids.iter()
            .map(|id| by_id.get(id).copied().ok_or(IndexError::IdNotFound { id: *id }))
            .collect()
    }

    /// Subset/reorder by position; positions may repeat.
    pub fn take(&self, positions: &[usize]) -> Result<Self, IndexError> {
        let rows = positions
            .iter()
            .map(|&position| {
                self.rows
                    .get(position)
                    .cloned()
                    .ok_or(IndexError::PositionOutOfBounds {
                        position,
                        len: self.rows.len(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::from_rows(rows, self.names.clone()))
    }

    /// Reorder rows; `order[i]` is the old position of the new i-th row.
    pub fn with_permutation(&self, order: &[usize]) -> Result<Self, IndexError> {
        let mut used = vec![false; self.rows.len()];
        let valid = order.len() == self.rows.len()
            && order
                .iter()
                .all(|&pos| pos < used.len() && !std::mem::replace(&mut used[pos], true));
        if !valid {
            return Err(IndexError::InvalidPermutation {
                expected: self.rows.len(),
                actual: order.len(),
            });
        }
        self.take(order)
    }

    /// Vertical concatenation; `other`'s ids are shifted by `id_offset`.
    pub fn append(&self, other: &Self, id_offset: usize) -> Result<Self, IndexError> {
        if self.nlevels() != other.nlevels() {
            return Err(IndexError::LevelMismatch {
                left: self.nlevels(),
                right: other.nlevels(),
            });
        }
        let mut rows = Vec::with_capacity(self.rows.len() + other.rows.len());
        rows.extend(self.rows.iter().cloned());
        rows.extend(other.rows.iter().map(|row| RowDescriptor {
            id: row.id + id_offset,
            label: row.label.clone(),
        }));
        Ok(Self::from_rows(rows, self.names.clone()))
    }

    /// Positions in label order, missing last, ties by id ascending.
    #[must_use]
    pub fn argsort(&self, ascending: bool) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.rows.len()).collect();
        order.sort_by(|&a, &b| {
            let (left, right) = (&self.rows[a], &self.rows[b]);
            left.label
                .compare(&right.label, ascending)
                .then(left.id.cmp(&right.id))
        });
        order
    }

    /// Distinct label tuples in first-seen order.
    #[must_use]
    pub fn unique_labels(&self) -> Vec<IndexLabel> {
        let mut seen = HashMap::<CompositeKey, ()>::new();
        self.rows
            .iter()
            .filter(|row| seen.insert(row.label.key(), ()).is_none())
            .map(|row| row.label.clone())
            .collect()
    }

    #[must_use]
    pub fn rename_levels(&self, mapping: &BTreeMap<String, String>) -> Self {
        let names = self
            .names
            .iter()
            .map(|name| mapping.get(name).cloned().unwrap_or_else(|| name.clone()))
            .collect();
        Self::from_rows(self.rows.clone(), names)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use tf_types::{ErrorKind, Scalar};

    use super::{Index, IndexError, IndexLabel, RowDescriptor};

    fn two_level() -> Index {
        Index::from_label_columns(
            &[
                vec![Scalar::from("a"), Scalar::from("b"), Scalar::from("a")],
                vec![Scalar::Int64(1), Scalar::Int64(2), Scalar::Int64(1)],
            ],
            vec!["k".to_owned(), "n".to_owned()],
        )
        .expect("index")
    }

    #[test]
    fn range_index_labels_equal_ids() {
        let index = Index::range(3);
        assert_eq!(index.ids().collect::<Vec<_>>(), vec![0, 1, 2]);
        assert_eq!(index.names(), &["index".to_owned()]);
        assert_eq!(index.locate(&IndexLabel::from(2)).expect("locate"), vec![2]);
        assert_eq!(index.next_id(), 3);
    }

    #[test]
    fn from_label_columns_rejects_ragged_levels() {
        let err = Index::from_label_columns(
            &[vec![Scalar::Int64(1)], vec![Scalar::Int64(1), Scalar::Int64(2)]],
            vec!["a".to_owned(), "b".to_owned()],
        )
        .expect_err("ragged");
        assert_eq!(err.kind(), ErrorKind::DimensionMismatch);
    }

    #[test]
    fn locate_returns_all_duplicates_in_order() {
        let index = two_level();
        let label = IndexLabel::new(vec![Scalar::from("a"), Scalar::Int64(1)]);
        assert_eq!(index.locate(&label).expect("locate"), vec![0, 2]);
        assert_eq!(label.canonical_string(), "a, 1");
    }

    #[test]
    fn locate_missing_label_fails() {
        let index = two_level();
        let label = IndexLabel::new(vec![Scalar::from("z"), Scalar::Int64(1)]);
        let err = index.locate(&label).expect_err("absent");
        assert_eq!(err.kind(), ErrorKind::LabelNotFound);
        assert_eq!(err.to_string(), "label (z, 1) not found in index");
    }

    #[test]
    fn permutation_moves_ids_with_rows() {
        let index = two_level();
        let permuted = index.with_permutation(&[2, 0, 1]).expect("permute");
        assert_eq!(permuted.ids().collect::<Vec<_>>(), vec![2, 0, 1]);
        assert_eq!(
            permuted.rows()[2].label,
            IndexLabel::new(vec![Scalar::from("b"), Scalar::Int64(2)])
        );
    }

    #[test]
    fn invalid_permutations_are_rejected() {
        let index = Index::range(3);
        assert!(matches!(
            index.with_permutation(&[0, 0, 1]),
            Err(IndexError::InvalidPermutation { .. })
        ));
        assert!(index.with_permutation(&[0, 1]).is_err());
    }

    #[test]
    fn append_offsets_other_ids() {
        let merged = Index::range(2).append(&Index::range(2), 2).expect("append");
        assert_eq!(merged.ids().collect::<Vec<_>>(), vec![0, 1, 2, 3]);
        assert_eq!(merged.locate(&IndexLabel::from(0)).expect("dup"), vec![0, 2]);
    }

    #[test]
    fn hash_is_structural_and_ids_stay_findable() {
        let index = two_level();
        let first = index.labels().next().expect("first label");
        let third = index.labels().nth(2).expect("third label");
        assert_eq!(Index::hash(first), Index::hash(third));
        assert_ne!(
            Index::hash(&IndexLabel::from(1)),
            Index::hash(&IndexLabel::from("1"))
        );

        let permuted = index.with_permutation(&[2, 0, 1]).expect("permute");
        assert_eq!(permuted.position_of_id(0), Some(1));
        assert_eq!(permuted.position_of_id(7), None);
    }

    #[test]
    fn append_rejects_level_mismatch() {
        let err = Index::range(1).append(&two_level(), 1).expect_err("levels");
        assert_eq!(err.kind(), ErrorKind::SchemaMismatch);
    }

    #[test]
    fn argsort_places_missing_last_and_breaks_ties_by_id() {
        let index = Index::from_label_columns(
            &[vec![
                Scalar::Int64(3),
                Scalar::Missing,
                Scalar::Int64(1),
                Scalar::Int64(3),
            ]],
            vec!["k".to_owned()],
        )
        .expect("index");
        assert_eq!(index.argsort(true), vec![2, 0, 3, 1]);
        assert_eq!(index.argsort(false), vec![0, 3, 2, 1]);
    }

    #[test]
    fn unique_labels_keep_first_seen_order() {
        let uniques = two_level().unique_labels();
        assert_eq!(uniques.len(), 2);
        assert_eq!(uniques[0].canonical_string(), "a, 1");
    }

    #[test]
    fn descriptors_must_match_level_count() {
        let rows = vec![RowDescriptor {
            id: 0,
            label: IndexLabel::from(1),
        }];
        assert!(Index::from_descriptors(rows.clone(), vec!["a".into(), "b".into()]).is_err());
        assert!(Index::from_descriptors(rows, vec!["a".into()]).is_ok());
    }

    #[test]
    fn positions_of_ids_reports_unknown_id() {
        let index = Index::range(2).take(&[1]).expect("take");
        assert_eq!(index.positions_of_ids(&[1]).expect("known"), vec![0]);
        let err = index.positions_of_ids(&[0]).expect_err("filtered out");
        assert_eq!(err.kind(), ErrorKind::LabelNotFound);
    }

    #[test]
    fn rename_levels_keeps_rows() {
        let mapping = BTreeMap::from([("k".to_owned(), "key".to_owned())]);
        let renamed = two_level().rename_levels(&mapping);
        assert_eq!(renamed.names(), &["key".to_owned(), "n".to_owned()]);
        assert_eq!(renamed.len(), 3);
    }
}
