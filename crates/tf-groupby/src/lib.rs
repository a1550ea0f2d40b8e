#![forbid(unsafe_code)]

use std::collections::HashMap;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tf_runtime::{DecisionAction, EvidenceLedger, RuntimePolicy};
use tf_stats::{StatsError, StatsFunc};
use tf_types::{CompositeKey, ErrorKind, Scalar};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupByOptions {
    /// Skip rows whose key tuple contains a missing cell.
    pub dropna: bool,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum GroupByError {
    #[error("groupby needs at least one key column")]
    NoKeys,
    #[error("column {column} has {actual} rows, expected {expected}")]
    LengthMismatch {
        column: String,
        expected: usize,
        actual: usize,
    },
    #[error("got {labels} key labels for {columns} key columns")]
    LabelCountMismatch { labels: usize, columns: usize },
    #[error("row id {id} is not part of the value column")]
    UnknownId { id: usize },
    #[error("aggregation failed for group ({group}): {source}")]
    Aggregation {
        group: String,
        #[source]
        source: StatsError,
    },
}

impl GroupByError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NoKeys | Self::LengthMismatch { .. } | Self::LabelCountMismatch { .. } => {
                ErrorKind::DimensionMismatch
            }
            Self::UnknownId { .. } => ErrorKind::LabelNotFound,
            Self::Aggregation { source, .. } => source.kind(),
        }
    }
}

/// One distinct key tuple and the ids of its member rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub key: Vec<Scalar>,
    pub ids: Vec<usize>,
}

/// Rows partitioned by the structural key of their key-column cells.
///
/// Groups keep the first-seen order of their key tuples; members keep row
/// order.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupBy {
    labels: Vec<String>,
    groups: Vec<Group>,
    slots: HashMap<CompositeKey, usize>,
}

impl GroupBy {
    /// `key_columns[c][r]` is the cell of key column `c` in row `r`; `ids[r]`
    /// is that row's stable id.
    pub fn build(
        labels: Vec<String>,
        key_columns: &[&[Scalar]],
        ids: &[usize],
        options: GroupByOptions,
    ) -> Result<Self, GroupByError> {
        if key_columns.is_empty() {
            return Err(GroupByError::NoKeys);
        }
        if labels.len() != key_columns.len() {
            return Err(GroupByError::LabelCountMismatch {
                labels: labels.len(),
                columns: key_columns.len(),
            });
        }
        for (label, column) in labels.iter().zip(key_columns) {
            if column.len() != ids.len() {
                return Err(GroupByError::LengthMismatch {
                    column: label.clone(),
                    expected: ids.len(),
                    actual: column.len(),
                });
            }
        }

        let mut groups = Vec::<Group>::new();
        let mut slots = HashMap::<CompositeKey, usize>::new();
        for (row, &id) in ids.iter().enumerate() {
            let tuple: Vec<Scalar> = key_columns.iter().map(|col| col[row].clone()).collect();
            if options.dropna && tuple.iter().any(Scalar::is_missing) {
                continue;
            }
            let key = CompositeKey::from_values(&tuple);
            let slot = *slots.entry(key).or_insert_with(|| {
                groups.push(Group {
                    key: tuple,
                    ids: Vec::new(),
                });
                groups.len() - 1
            });
            groups[slot].ids.push(id);
        }

        Ok(Self {
            labels,
            groups,
            slots,
        })
    }

    #[must_use]
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    #[must_use]
    pub fn groups(&self) -> &[Group] {
        &self.groups
    }

    /// Distinct key tuples in first-seen order.
    pub fn keys(&self) -> impl Iterator<Item = &[Scalar]> + '_ {
        self.groups.iter().map(|g| g.key.as_slice())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    #[must_use]
    pub fn ids_for(&self, key: &[Scalar]) -> Option<&[usize]> {
        let slot = *self.slots.get(&CompositeKey::from_values(key))?;
        Some(self.groups[slot].ids.as_slice())
    }

    /// Per-group value slices with missing cells removed, in group order.
    ///
    /// `values[r]` belongs to the row whose id is `ids[r]`.
    pub fn value_slices(
        &self,
        values: &[Scalar],
        ids: &[usize],
    ) -> Result<Vec<Vec<Scalar>>, GroupByError> {
        if values.len() != ids.len() {
            return Err(GroupByError::LengthMismatch {
                column: "values".to_owned(),
                expected: ids.len(),
                actual: values.len(),
            });
        }
        let position: HashMap<usize, usize> =
            ids.iter().enumerate().map(|(pos, &id)| (id, pos)).collect();
        self.groups
            .iter()
            .map(|group| {
                group
                    .ids
                    .iter()
                    .filter_map(|id| match position.get(id) {
                        Some(&pos) if values[pos].is_missing() => None,
                        Some(&pos) => Some(Ok(values[pos].clone())),
                        None => Some(Err(GroupByError::UnknownId { id: *id })),
                    })
                    .collect()
            })
            .collect()
    }

    /// Feed each group's value slice to `func`, one result per group.
    ///
    /// Failures follow `policy`: strict mode returns the first failing group
    /// (in group order) as an error, hardened mode yields `Scalar::Missing`
    /// for that group. Every failure is recorded in `ledger`. With
    /// `policy.parallel_aggregation` the groups are evaluated on the rayon
    /// pool; results are identical to the serial path.
    pub fn aggregate(
        &self,
        values: &[Scalar],
        ids: &[usize],
        func: StatsFunc,
        policy: &RuntimePolicy,
        ledger: &mut EvidenceLedger,
    ) -> Result<Vec<Scalar>, GroupByError> {
        let slices = self.value_slices(values, ids)?;
        let outcomes = evaluate_slices(&slices, func, policy.parallel_aggregation);

        let mut out = Vec::with_capacity(outcomes.len());
        for (group, outcome) in self.groups.iter().zip(outcomes) {
            match outcome {
                Ok(result) => out.push(Scalar::float(result)),
                Err(source) => {
                    let group = group
                        .key
                        .iter()
                        .map(Scalar::canonical_string)
                        .collect::<Vec<_>>()
                        .join(", ");
                    let action = policy.decide_aggregation_failure(
                        "groupby_aggregate",
                        format!("group ({group}): {source}"),
                        ledger,
                    );
                    if action == DecisionAction::Reject {
                        return Err(GroupByError::Aggregation { group, source });
                    }
                    out.push(Scalar::Missing);
                }
            }
        }
        Ok(out)
    }
}

/// Run `func` over every slice. Each task reads its own slice and writes its
/// own output slot.
#[must_use]
pub fn evaluate_slices(
    slices: &[Vec<Scalar>],
    func: StatsFunc,
    parallel: bool,
) -> Vec<Result<f64, StatsError>> {
    if parallel {
        slices
            .par_iter()
            .map(|slice| func(slice).map(|r| r.result))
            .collect()
    } else {
        slices
            .iter()
            .map(|slice| func(slice).map(|r| r.result))
            .collect()
    }
}
