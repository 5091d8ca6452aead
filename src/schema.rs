//! Schema reconciliation.
//!
//! Destinations are allowed to diverge in schema (one may carry an extra
//! derived column) without breaking ingestion. Before every insert the
//! flush engine intersects the batch's columns with what each destination
//! actually reports, and only the common subset is written anywhere.
//!
//! The trade-off is explicit: a column present in the batch but missing
//! from one destination is silently written to *no* destination until all
//! of them gain it. Losing one column's data everywhere is preferred over
//! blocking the entire flush.

use std::collections::HashSet;

/// Ordered intersection of every destination's columns and the batch's own.
///
/// Output order follows the first destination's column list, so generated
/// INSERT statements are reproducible across runs. Computed fresh per
/// flush — destination schemas can evolve between runs, so nothing here is
/// cached.
///
/// An empty `describes` slice yields an empty set: with no destination
/// schema to validate against, no column is known-safe.
pub fn common_columns(describes: &[Vec<String>], batch_columns: &[String]) -> Vec<String> {
    let Some((first, rest)) = describes.split_first() else {
        return Vec::new();
    };

    let batch: HashSet<&str> = batch_columns.iter().map(|s| s.as_str()).collect();
    let others: Vec<HashSet<&str>> = rest
        .iter()
        .map(|cols| cols.iter().map(|s| s.as_str()).collect())
        .collect();

    first
        .iter()
        .filter(|col| {
            batch.contains(col.as_str()) && others.iter().all(|o| o.contains(col.as_str()))
        })
        .cloned()
        .collect()
}
