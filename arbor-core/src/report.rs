use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{assembler::TreeEntity, defects::DefectEntity, error::Result, store::RecordStore};

/// A tree together with its defects, as handed to the report renderer.
#[derive(Debug, Clone, Serialize)]
pub struct TreeReport {
    #[serde(flatten)]
    pub tree: TreeEntity,
    pub defects: Vec<DefectEntity>,
}

/// Snapshot of the whole inventory.
#[derive(Debug, Clone, Serialize)]
pub struct InventoryReport {
    pub generated_at: DateTime<Utc>,
    pub tree_count: usize,
    pub defect_count: usize,
    pub trees: Vec<TreeReport>,
}

/// Gather every tree and its defects from the store.
pub fn build_report(store: &RecordStore) -> Result<InventoryReport> {
    let _guard = arbor_utils::timing_guard("arbor_core::build_report", log::Level::Debug);
    let mut trees = Vec::new();
    for tree in store.trees()? {
        let defects = match tree.id {
            Some(id) => store.defects_for_tree(id)?,
            None => Vec::new(),
        };
        trees.push(TreeReport { tree, defects });
    }

    let defect_count = trees.iter().map(|t| t.defects.len()).sum();
    Ok(InventoryReport {
        generated_at: Utc::now(),
        tree_count: trees.len(),
        defect_count,
        trees,
    })
}
