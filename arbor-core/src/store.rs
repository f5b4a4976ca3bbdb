//! SQLite record store for trees and their defects.
//!
//! Every mutation is a single statement or a single transaction, so no caller ever observes a
//! half-applied update. Deleting a tree cascades to its defects through the foreign key.

use std::{fs, path::Path};

use arbor_utils::timing_guard;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params, types::Type};

use crate::{
    assembler::TreeEntity,
    defects::DefectEntity,
    error::{PipelineError, Result},
    geometry::{BoxRecord, CornerBox},
};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS trees (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        image_path TEXT NOT NULL,
        x REAL NOT NULL,
        y REAL NOT NULL,
        width REAL NOT NULL,
        height REAL NOT NULL,
        captured_at TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        auxiliary_images TEXT NOT NULL DEFAULT '[]',
        crop_path TEXT,
        taxon TEXT
    );
    CREATE TABLE IF NOT EXISTS defects (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        tree_id INTEGER NOT NULL REFERENCES trees(id) ON DELETE CASCADE,
        xtl REAL NOT NULL,
        ytl REAL NOT NULL,
        xbr REAL NOT NULL,
        ybr REAL NOT NULL,
        image_path TEXT NOT NULL,
        crop_path TEXT,
        defect_type TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS defects_tree_id ON defects(tree_id);
";

const TREE_COLUMNS: &str = "id, image_path, x, y, width, height, captured_at, description, \
    auxiliary_images, crop_path, taxon";

const DEFECT_COLUMNS: &str = "id, tree_id, xtl, ytl, xbr, ybr, image_path, crop_path, defect_type";

/// Persistent store of tree and defect records.
#[derive(Debug)]
pub struct RecordStore {
    conn: Connection,
}

impl RecordStore {
    /// Open (creating if needed) the database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|e| PipelineError::io(parent, e))?;
        }
        Self::from_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", true)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Insert a batch of trees in one transaction and return them with their new ids.
    pub fn insert_trees(&mut self, trees: &[TreeEntity]) -> Result<Vec<TreeEntity>> {
        let _guard = timing_guard("arbor_core::store::insert_trees", log::Level::Debug);
        let tx = self.conn.transaction()?;
        let mut saved = Vec::with_capacity(trees.len());
        {
            let mut stmt = tx.prepare(
                "INSERT INTO trees (image_path, x, y, width, height, captured_at, description, \
                 auxiliary_images, crop_path, taxon) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            )?;
            for tree in trees {
                let auxiliary = serde_json::to_string(&tree.auxiliary_images)
                    .map_err(|e| PipelineError::Validation(format!("auxiliary images: {e}")))?;
                stmt.execute(params![
                    tree.image_path,
                    f64::from(tree.bbox.x),
                    f64::from(tree.bbox.y),
                    f64::from(tree.bbox.width),
                    f64::from(tree.bbox.height),
                    tree.captured_at,
                    tree.description,
                    auxiliary,
                    tree.crop_path,
                    tree.taxon,
                ])?;
                let mut stored = tree.clone();
                stored.id = Some(tx.last_insert_rowid());
                saved.push(stored);
            }
        }
        tx.commit()?;
        log::info!("saved {} tree record(s)", saved.len());
        Ok(saved)
    }

    pub fn tree(&self, id: i64) -> Result<Option<TreeEntity>> {
        let sql = format!("SELECT {TREE_COLUMNS} FROM trees WHERE id = ?1");
        Ok(self.conn.query_row(&sql, [id], tree_from_row).optional()?)
    }

    /// All trees in insertion order.
    pub fn trees(&self) -> Result<Vec<TreeEntity>> {
        let sql = format!("SELECT {TREE_COLUMNS} FROM trees ORDER BY id");
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], tree_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Returns `false` when no tree has this id.
    pub fn update_description(&self, id: i64, description: &str) -> Result<bool> {
        let changed = self.conn.execute(
            "UPDATE trees SET description = ?1 WHERE id = ?2",
            params![description, id],
        )?;
        Ok(changed > 0)
    }

    pub fn update_taxon(&self, id: i64, taxon: Option<&str>) -> Result<bool> {
        let changed = self.conn.execute(
            "UPDATE trees SET taxon = ?1 WHERE id = ?2",
            params![taxon, id],
        )?;
        Ok(changed > 0)
    }

    /// Append one auxiliary image reference in a single statement.
    pub fn add_auxiliary_image(&self, id: i64, image_path: &str) -> Result<bool> {
        let changed = self.conn.execute(
            "UPDATE trees SET auxiliary_images = json_insert(auxiliary_images, '$[#]', ?1) \
             WHERE id = ?2",
            params![image_path, id],
        )?;
        Ok(changed > 0)
    }

    /// Delete a tree and, through the cascade, all of its defects.
    pub fn delete_tree(&self, id: i64) -> Result<bool> {
        let changed = self
            .conn
            .execute("DELETE FROM trees WHERE id = ?1", [id])?;
        Ok(changed > 0)
    }

    /// Replace every defect of `tree_id` with `defects` in one transaction.
    ///
    /// The `tree_id` field of each entity is ignored in favour of the argument.
    pub fn replace_defects(
        &mut self,
        tree_id: i64,
        defects: &[DefectEntity],
    ) -> Result<Vec<DefectEntity>> {
        let _guard = timing_guard("arbor_core::store::replace_defects", log::Level::Debug);
        let tx = self.conn.transaction()?;
        let exists: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM trees WHERE id = ?1)",
            [tree_id],
            |row| row.get(0),
        )?;
        if !exists {
            return Err(PipelineError::Validation(format!("tree {tree_id} does not exist")));
        }

        let removed = tx.execute("DELETE FROM defects WHERE tree_id = ?1", [tree_id])?;
        let mut saved = Vec::with_capacity(defects.len());
        {
            let mut stmt = tx.prepare(
                "INSERT INTO defects (tree_id, xtl, ytl, xbr, ybr, image_path, crop_path, \
                 defect_type) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;
            for defect in defects {
                stmt.execute(params![
                    tree_id,
                    f64::from(defect.bbox.xtl),
                    f64::from(defect.bbox.ytl),
                    f64::from(defect.bbox.xbr),
                    f64::from(defect.bbox.ybr),
                    defect.image_path,
                    defect.crop_path,
                    defect.defect_type,
                ])?;
                let mut stored = defect.clone();
                stored.id = Some(tx.last_insert_rowid());
                stored.tree_id = tree_id;
                saved.push(stored);
            }
        }
        tx.commit()?;
        log::info!(
            "replaced {removed} defect(s) of tree {tree_id} with {}",
            saved.len()
        );
        Ok(saved)
    }

    pub fn defects_for_tree(&self, tree_id: i64) -> Result<Vec<DefectEntity>> {
        let sql = format!("SELECT {DEFECT_COLUMNS} FROM defects WHERE tree_id = ?1 ORDER BY id");
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map([tree_id], defect_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

fn real(row: &Row<'_>, idx: usize) -> rusqlite::Result<f32> {
    row.get::<_, f64>(idx).map(|v| v as f32)
}

fn tree_from_row(row: &Row<'_>) -> rusqlite::Result<TreeEntity> {
    let auxiliary: String = row.get(8)?;
    let auxiliary_images: Vec<String> = serde_json::from_str(&auxiliary)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(8, Type::Text, Box::new(e)))?;
    let captured_at: DateTime<Utc> = row.get(6)?;

    Ok(TreeEntity {
        id: Some(row.get(0)?),
        image_path: row.get(1)?,
        bbox: BoxRecord {
            x: real(row, 2)?,
            y: real(row, 3)?,
            width: real(row, 4)?,
            height: real(row, 5)?,
        },
        captured_at,
        description: row.get(7)?,
        auxiliary_images,
        crop_path: row.get(9)?,
        taxon: row.get(10)?,
    })
}

fn defect_from_row(row: &Row<'_>) -> rusqlite::Result<DefectEntity> {
    Ok(DefectEntity {
        id: Some(row.get(0)?),
        tree_id: row.get(1)?,
        bbox: CornerBox {
            xtl: real(row, 2)?,
            ytl: real(row, 3)?,
            xbr: real(row, 4)?,
            ybr: real(row, 5)?,
        },
        image_path: row.get(6)?,
        crop_path: row.get(7)?,
        defect_type: row.get(8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree(image: &str) -> TreeEntity {
        TreeEntity {
            id: None,
            image_path: image.to_string(),
            bbox: BoxRecord {
                x: 0.25,
                y: 0.5,
                width: 0.125,
                height: 0.25,
            },
            captured_at: Utc::now(),
            description: String::new(),
            auxiliary_images: Vec::new(),
            crop_path: Some("crops/a.jpg".into()),
            taxon: None,
        }
    }

    fn defect(label: &str) -> DefectEntity {
        DefectEntity {
            id: None,
            tree_id: 0,
            bbox: CornerBox {
                xtl: 0.1,
                ytl: 0.2,
                xbr: 0.3,
                ybr: 0.4,
            },
            image_path: "photo.jpg".into(),
            crop_path: None,
            defect_type: label.into(),
        }
    }

    #[test]
    fn inserted_trees_read_back() {
        let mut store = RecordStore::open_in_memory().expect("store");
        let saved = store
            .insert_trees(&[tree("a.jpg"), tree("b.jpg")])
            .expect("insert");
        assert_eq!(saved.len(), 2);
        let id = saved[1].id.expect("id assigned");

        let loaded = store.tree(id).expect("query").expect("present");
        assert_eq!(loaded.image_path, "b.jpg");
        assert_eq!(loaded.bbox, saved[1].bbox);
        assert_eq!(loaded.captured_at, saved[1].captured_at);
        assert_eq!(store.trees().expect("all").len(), 2);
        assert!(store.tree(id + 100).expect("query").is_none());
    }

    #[test]
    fn edits_apply_in_place() {
        let mut store = RecordStore::open_in_memory().expect("store");
        let id = store.insert_trees(&[tree("a.jpg")]).expect("insert")[0]
            .id
            .expect("id");

        assert!(store.update_description(id, "leaning oak").expect("describe"));
        assert!(store.update_taxon(id, Some("Quercus robur")).expect("taxon"));
        assert!(store.add_auxiliary_image(id, "bark.jpg").expect("aux"));
        assert!(store.add_auxiliary_image(id, "crown.jpg").expect("aux"));
        assert!(!store.update_description(id + 1, "nobody").expect("describe"));

        let loaded = store.tree(id).expect("query").expect("present");
        assert_eq!(loaded.description, "leaning oak");
        assert_eq!(loaded.taxon.as_deref(), Some("Quercus robur"));
        assert_eq!(loaded.auxiliary_images, ["bark.jpg", "crown.jpg"]);
    }

    #[test]
    fn defects_are_replaced_not_merged() {
        let mut store = RecordStore::open_in_memory().expect("store");
        let id = store.insert_trees(&[tree("a.jpg")]).expect("insert")[0]
            .id
            .expect("id");

        store
            .replace_defects(id, &[defect("crack"), defect("hollow")])
            .expect("first batch");
        let saved = store.replace_defects(id, &[defect("fungus")]).expect("second batch");
        assert_eq!(saved[0].tree_id, id);

        let defects = store.defects_for_tree(id).expect("defects");
        assert_eq!(defects.len(), 1);
        assert_eq!(defects[0].defect_type, "fungus");
        assert_eq!(defects[0].bbox, saved[0].bbox);
    }

    #[test]
    fn deleting_a_tree_cascades_to_defects() {
        let mut store = RecordStore::open_in_memory().expect("store");
        let id = store.insert_trees(&[tree("a.jpg")]).expect("insert")[0]
            .id
            .expect("id");
        store.replace_defects(id, &[defect("crack")]).expect("defects");

        assert!(store.delete_tree(id).expect("delete"));
        assert!(store.defects_for_tree(id).expect("defects").is_empty());
        assert!(!store.delete_tree(id).expect("second delete"));
    }

    #[test]
    fn defects_for_unknown_tree_are_rejected() {
        let mut store = RecordStore::open_in_memory().expect("store");
        let err = store.replace_defects(42, &[defect("crack")]).expect_err("must fail");
        assert!(matches!(err, PipelineError::Validation(_)));
    }

    #[test]
    fn opens_file_database_in_new_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested/arbor.db");
        {
            let mut store = RecordStore::open(&path).expect("open");
            store.insert_trees(&[tree("a.jpg")]).expect("insert");
        }
        let store = RecordStore::open(&path).expect("reopen");
        assert_eq!(store.trees().expect("trees").len(), 1);
    }
}
