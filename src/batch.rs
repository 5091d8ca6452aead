//! The in-memory row-set model.
//!
//! A [`RowBatch`] is a small columnar table: an ordered list of column names
//! plus rows of JSON values in the same order. Batches are what the venue
//! poller hands to the staging store, what a staged file deserializes back
//! into, and what the flush engine projects and inserts downstream.
//!
//! Column names must round-trip exactly through serialization, because the
//! schema reconciler intersects them against live destination schemas.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// An immutable unit of staged rows: ordered columns plus row tuples.
///
/// Invariant: every row has exactly `columns.len()` values, positionally
/// aligned with `columns`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowBatch {
    /// Column names, in insertion order.
    pub columns: Vec<String>,
    /// Row tuples, positionally aligned with `columns`.
    pub rows: Vec<Vec<Value>>,
}

impl RowBatch {
    /// Create a batch from columns and rows.
    ///
    /// Rows with a value count that does not match the column count are
    /// rejected; a batch must be positionally consistent before it is staged.
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> crate::error::Result<Self> {
        for (i, row) in rows.iter().enumerate() {
            if row.len() != columns.len() {
                return Err(crate::error::RelayError::Internal(format!(
                    "row {} has {} values for {} columns",
                    i,
                    row.len(),
                    columns.len()
                )));
            }
        }
        Ok(Self { columns, rows })
    }

    /// An empty batch with no columns and no rows.
    pub fn empty() -> Self {
        Self {
            columns: Vec::new(),
            rows: Vec::new(),
        }
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// True if the batch holds no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Append another batch's rows, aligning columns by name.
    ///
    /// Columns present in `other` but not in `self` are added (filled with
    /// `null` for existing rows); columns missing from `other` are filled
    /// with `null` for its rows. This mirrors how staged files written at
    /// different times can carry slightly different column sets.
    pub fn extend(&mut self, other: RowBatch) {
        if self.columns.is_empty() && self.rows.is_empty() {
            *self = other;
            return;
        }

        for col in &other.columns {
            if !self.columns.contains(col) {
                self.columns.push(col.clone());
                for row in &mut self.rows {
                    row.push(Value::Null);
                }
            }
        }

        let index: HashMap<&str, usize> = other
            .columns
            .iter()
            .enumerate()
            .map(|(i, c)| (c.as_str(), i))
            .collect();

        for row in other.rows {
            let mut aligned = Vec::with_capacity(self.columns.len());
            for col in &self.columns {
                match index.get(col.as_str()) {
                    Some(&i) => aligned.push(row[i].clone()),
                    None => aligned.push(Value::Null),
                }
            }
            self.rows.push(aligned);
        }
    }

    /// Project the batch down to the given columns, in the given order.
    ///
    /// Columns absent from the batch yield `null` values; callers are
    /// expected to project to a reconciled subset of this batch's columns,
    /// so that case does not arise on the flush path.
    pub fn project(&self, columns: &[String]) -> RowBatch {
        let indices: Vec<Option<usize>> = columns
            .iter()
            .map(|c| self.columns.iter().position(|own| own == c))
            .collect();

        let rows = self
            .rows
            .iter()
            .map(|row| {
                indices
                    .iter()
                    .map(|idx| match idx {
                        Some(i) => row[*i].clone(),
                        None => Value::Null,
                    })
                    .collect()
            })
            .collect();

        RowBatch {
            columns: columns.to_vec(),
            rows,
        }
    }
}
