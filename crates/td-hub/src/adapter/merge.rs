//! # Result Merge
//!
//! Concatenate per-platform rows in platform order, apply the query's
//! ordering with a stable sort, then cut the offset/limit window.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use td_core::{NormalizedRow, OrderBy, PlatformId, SortDirection, UnifiedQuery};

pub struct Merged {
    pub rows: Vec<NormalizedRow>,
    /// Rows available before offset/limit.
    pub total_rows: u64,
    /// Rows in the final window, per platform.
    pub returned: BTreeMap<PlatformId, u64>,
}

/// `batches` must already be in platform order; rows inside a batch keep
/// upstream order. Ties under the ordering keep that order, so equal keys
/// break by platform and then by position.
pub fn merge(batches: Vec<Vec<NormalizedRow>>, query: &UnifiedQuery) -> Merged {
    let mut rows: Vec<NormalizedRow> = batches.into_iter().flatten().collect();

    if !query.order_by().is_empty() {
        rows.sort_by(|a, b| compare(a, b, query.order_by()));
    }

    let total_rows = rows.len() as u64;
    let rows: Vec<NormalizedRow> = rows
        .into_iter()
        .skip(query.offset())
        .take(query.limit())
        .collect();

    let mut returned = BTreeMap::new();
    for row in &rows {
        *returned.entry(row.platform).or_insert(0) += 1;
    }

    Merged {
        rows,
        total_rows,
        returned,
    }
}

fn compare(a: &NormalizedRow, b: &NormalizedRow, keys: &[OrderBy]) -> Ordering {
    for key in keys {
        let ord = match (a.get(&key.field), b.get(&key.field)) {
            (Some(x), Some(y)) => x.total_cmp(y),
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        let ord = match key.direction {
            SortDirection::Ascending => ord,
            SortDirection::Descending => ord.reverse(),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}
