//! # Catalog Interface
//!
//! The catalog is the planner's window onto storage: table row types, statistics and a few
//! placement hints. Everything it returns is treated as an opaque, already-resolved input.
//! The optimizer never computes these values itself and performs no I/O while planning.
//!
//! ## Key Lookups
//!
//! - `get_table_stats`: row count, total size and per-column statistics keyed by table
//!   ordinal. `None` if the table is unknown.
//! - `get_table_columns`: the table's row type.
//! - `row_count_estimate`: defaults to the statistics row count.
//! - `distribution_affinity`: whether the storage plugin wants the scan to run in one
//!   fragment. `Hard` forces a singleton scan, `Soft` only prefers one.
//! - `scan_cost`: an optional plugin-supplied cost that replaces the default scan formula.

use crate::cost::Cost;
use crate::expr::TableRef;
use crate::stats::Statistics;
use crate::types::RowType;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// How strongly a table's scan is tied to a single execution fragment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DistributionAffinity {
    /// Scan may be split freely across units.
    #[default]
    None,
    /// Single-fragment execution is preferred but not required.
    Soft,
    /// Scan must run in a single fragment.
    Hard,
}

/// Catalog provides schema and statistics information.
pub trait Catalog: Send + Sync {
    fn get_table_stats(&self, table: &TableRef) -> Option<Statistics>;

    fn get_table_columns(&self, table: &TableRef) -> Option<RowType>;

    fn row_count_estimate(&self, table: &TableRef) -> Option<f64> {
        self.get_table_stats(table).map(|s| s.row_count)
    }

    fn distribution_affinity(&self, _table: &TableRef) -> DistributionAffinity {
        DistributionAffinity::None
    }

    fn scan_cost(&self, _table: &TableRef) -> Option<Cost> {
        None
    }
}

#[derive(Debug, Clone)]
struct TableEntry {
    row_type: RowType,
    stats: Statistics,
    affinity: DistributionAffinity,
    scan_cost: Option<Cost>,
}

/// In-memory catalog for testing and development.
///
/// Tables are keyed by their fully-qualified name (`schema.table`) and populated
/// programmatically.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalog {
    tables: HashMap<String, TableEntry>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_table(&mut self, table: &TableRef, row_type: RowType, stats: Statistics) {
        self.tables.insert(
            table.to_string(),
            TableEntry {
                row_type,
                stats,
                affinity: DistributionAffinity::None,
                scan_cost: None,
            },
        );
    }

    pub fn set_affinity(&mut self, table: &TableRef, affinity: DistributionAffinity) {
        if let Some(entry) = self.tables.get_mut(&table.to_string()) {
            entry.affinity = affinity;
        }
    }

    pub fn set_scan_cost(&mut self, table: &TableRef, cost: Cost) {
        if let Some(entry) = self.tables.get_mut(&table.to_string()) {
            entry.scan_cost = Some(cost);
        }
    }
}

impl Catalog for InMemoryCatalog {
    fn get_table_stats(&self, table: &TableRef) -> Option<Statistics> {
        self.tables.get(&table.to_string()).map(|e| e.stats.clone())
    }

    fn get_table_columns(&self, table: &TableRef) -> Option<RowType> {
        self.tables.get(&table.to_string()).map(|e| e.row_type.clone())
    }

    fn distribution_affinity(&self, table: &TableRef) -> DistributionAffinity {
        self.tables
            .get(&table.to_string())
            .map(|e| e.affinity)
            .unwrap_or_default()
    }

    fn scan_cost(&self, table: &TableRef) -> Option<Cost> {
        self.tables.get(&table.to_string()).and_then(|e| e.scan_cost)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DataType, Field};

    #[test]
    fn test_in_memory_catalog_lookups() {
        let emp = TableRef::new("hr", "emp");
        let mut catalog = InMemoryCatalog::new();
        catalog.add_table(
            &emp,
            RowType::new(vec![Field::new("empno", DataType::Int32, false)]),
            Statistics::new(14.0, 1400.0),
        );
        catalog.set_affinity(&emp, DistributionAffinity::Hard);

        assert_eq!(catalog.row_count_estimate(&emp), Some(14.0));
        assert_eq!(catalog.distribution_affinity(&emp), DistributionAffinity::Hard);
        assert!(catalog.scan_cost(&emp).is_none());
        assert!(catalog.get_table_columns(&TableRef::new("hr", "dept")).is_none());
    }
}
