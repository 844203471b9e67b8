//! Metadata registry for human-facing table metadata
//!
//! Stores the display comment, per-column comments with original-name
//! provenance, and up to four ordered sample questions for each physical
//! table. The registry lives in its own database, apart from business data.

use crate::db::connection::open_connection;
use crate::error::{IntakeError, Result};
use crate::naming::MAX_SAMPLE_QUESTIONS;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Durable human metadata for one physical table
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataRecord {
    pub table_comment_cn: String,
    pub column_comments: BTreeMap<String, String>,
    pub column_original_names: BTreeMap<String, String>,
    pub sample_questions: Vec<String>,
}

pub struct MetadataRegistry {
    db: Mutex<Connection>,
}

impl MetadataRegistry {
    /// Open the registry at `url` and make sure its schema exists
    pub fn open(url: &str) -> Result<Self> {
        let conn = open_connection(url)?;
        let registry = Self { db: Mutex::new(conn) };
        registry.init_schema()?;
        Ok(registry)
    }

    fn init_schema(&self) -> Result<()> {
        let db = self.db.lock();
        db.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS table_metadata (
                table_name TEXT PRIMARY KEY,
                table_comment_cn TEXT NOT NULL,
                updated_at TEXT DEFAULT CURRENT_TIMESTAMP
            );
            CREATE TABLE IF NOT EXISTS column_metadata (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                table_name TEXT NOT NULL,
                column_name TEXT NOT NULL,
                column_comment_cn TEXT NOT NULL,
                original_name TEXT,
                UNIQUE(table_name, column_name)
            );
            CREATE TABLE IF NOT EXISTS sample_questions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                table_name TEXT NOT NULL,
                question_order INTEGER NOT NULL,
                question_text TEXT NOT NULL,
                UNIQUE(table_name, question_order)
            );
            "#,
        )
        .map_err(|e| IntakeError::Registry(format!("Failed to create metadata schema: {}", e)))?;
        Ok(())
    }

    /// Replace everything stored for `table_name` with `record`.
    ///
    /// The table row is upserted; column and question rows are deleted and
    /// reinserted, all inside one transaction. Only the first four questions
    /// are kept, numbered from 1.
    pub fn upsert(&self, table_name: &str, record: &MetadataRecord) -> Result<()> {
        let mut db = self.db.lock();
        let tx = db
            .transaction()
            .map_err(|e| IntakeError::Registry(format!("Failed to start transaction: {}", e)))?;

        tx.execute(
            r#"
            INSERT INTO table_metadata(table_name, table_comment_cn, updated_at)
            VALUES(?1, ?2, CURRENT_TIMESTAMP)
            ON CONFLICT(table_name) DO UPDATE SET
                table_comment_cn = excluded.table_comment_cn,
                updated_at = CURRENT_TIMESTAMP
            "#,
            params![table_name, record.table_comment_cn],
        )
        .map_err(registry_err("upsert table metadata"))?;

        tx.execute("DELETE FROM column_metadata WHERE table_name = ?1", params![table_name])
            .map_err(registry_err("clear column metadata"))?;
        {
            let mut insert = tx
                .prepare(
                    "INSERT INTO column_metadata(table_name, column_name, column_comment_cn, original_name) \
                     VALUES(?1, ?2, ?3, ?4)",
                )
                .map_err(registry_err("prepare column insert"))?;
            for (column_name, comment) in &record.column_comments {
                let original = record.column_original_names.get(column_name);
                insert
                    .execute(params![table_name, column_name, comment, original])
                    .map_err(registry_err("insert column metadata"))?;
            }
        }

        tx.execute("DELETE FROM sample_questions WHERE table_name = ?1", params![table_name])
            .map_err(registry_err("clear sample questions"))?;
        {
            let mut insert = tx
                .prepare(
                    "INSERT INTO sample_questions(table_name, question_order, question_text) \
                     VALUES(?1, ?2, ?3)",
                )
                .map_err(registry_err("prepare question insert"))?;
            for (idx, question) in record.sample_questions.iter().take(MAX_SAMPLE_QUESTIONS).enumerate() {
                insert
                    .execute(params![table_name, (idx + 1) as i64, question])
                    .map_err(registry_err("insert sample question"))?;
            }
        }

        tx.commit()
            .map_err(|e| IntakeError::Registry(format!("Failed to commit metadata: {}", e)))?;
        Ok(())
    }

    /// `None` when no table-level row exists
    pub fn fetch(&self, table_name: &str) -> Result<Option<MetadataRecord>> {
        let db = self.db.lock();

        let table_comment_cn: Option<String> = db
            .query_row(
                "SELECT table_comment_cn FROM table_metadata WHERE table_name = ?1",
                params![table_name],
                |row| row.get(0),
            )
            .optional()
            .map_err(registry_err("read table metadata"))?;
        let Some(table_comment_cn) = table_comment_cn else {
            return Ok(None);
        };

        let mut record = MetadataRecord {
            table_comment_cn,
            ..MetadataRecord::default()
        };

        let mut stmt = db
            .prepare(
                "SELECT column_name, column_comment_cn, COALESCE(original_name, column_name) \
                 FROM column_metadata WHERE table_name = ?1",
            )
            .map_err(registry_err("prepare column query"))?;
        let columns = stmt
            .query_map(params![table_name], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?))
            })
            .map_err(registry_err("read column metadata"))?;
        for column in columns {
            let (name, comment, original) = column.map_err(registry_err("read column row"))?;
            record.column_original_names.insert(name.clone(), original);
            record.column_comments.insert(name, comment);
        }

        let mut stmt = db
            .prepare(
                "SELECT question_text FROM sample_questions \
                 WHERE table_name = ?1 ORDER BY question_order ASC",
            )
            .map_err(registry_err("prepare question query"))?;
        let questions = stmt
            .query_map(params![table_name], |row| row.get::<_, String>(0))
            .map_err(registry_err("read sample questions"))?;
        for question in questions {
            record
                .sample_questions
                .push(question.map_err(registry_err("read question row"))?);
        }

        Ok(Some(record))
    }

    /// Remove all rows for `table_name`; unknown tables are a no-op
    pub fn delete(&self, table_name: &str) -> Result<()> {
        let mut db = self.db.lock();
        let tx = db
            .transaction()
            .map_err(|e| IntakeError::Registry(format!("Failed to start transaction: {}", e)))?;
        for sql in [
            "DELETE FROM table_metadata WHERE table_name = ?1",
            "DELETE FROM column_metadata WHERE table_name = ?1",
            "DELETE FROM sample_questions WHERE table_name = ?1",
        ] {
            tx.execute(sql, params![table_name])
                .map_err(registry_err("delete metadata"))?;
        }
        tx.commit()
            .map_err(|e| IntakeError::Registry(format!("Failed to commit delete: {}", e)))?;
        Ok(())
    }
}

fn registry_err(action: &'static str) -> impl Fn(rusqlite::Error) -> IntakeError {
    move |e| IntakeError::Registry(format!("Failed to {}: {}", action, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> MetadataRegistry {
        MetadataRegistry::open("sqlite://:memory:").unwrap()
    }

    fn record() -> MetadataRecord {
        MetadataRecord {
            table_comment_cn: "销售订单".to_string(),
            column_comments: [("order_id", "订单编号"), ("amount", "金额")]
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            column_original_names: [("order_id", "订单号")]
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            sample_questions: (1..=5).map(|i| format!("问题{}", i)).collect(),
        }
    }

    #[test]
    fn test_upsert_and_fetch() {
        let registry = registry();
        registry.upsert("sales_orders", &record()).unwrap();

        let fetched = registry.fetch("sales_orders").unwrap().unwrap();
        assert_eq!(fetched.table_comment_cn, "销售订单");
        assert_eq!(fetched.column_comments["amount"], "金额");
        assert_eq!(fetched.column_original_names["order_id"], "订单号");
        // unset original name defaults to the column name
        assert_eq!(fetched.column_original_names["amount"], "amount");
        assert_eq!(fetched.sample_questions, vec!["问题1", "问题2", "问题3", "问题4"]);
    }

    #[test]
    fn test_upsert_is_full_replace() {
        let registry = registry();
        registry.upsert("t", &record()).unwrap();

        let replacement = MetadataRecord {
            table_comment_cn: "新表".to_string(),
            column_comments: [("x".to_string(), "X".to_string())].into_iter().collect(),
            column_original_names: BTreeMap::new(),
            sample_questions: vec!["q".to_string()],
        };
        registry.upsert("t", &replacement).unwrap();

        let fetched = registry.fetch("t").unwrap().unwrap();
        assert_eq!(fetched.table_comment_cn, "新表");
        assert_eq!(fetched.column_comments.len(), 1);
        assert_eq!(fetched.sample_questions, vec!["q"]);
    }

    #[test]
    fn test_fetch_absent() {
        assert!(registry().fetch("missing").unwrap().is_none());
    }

    #[test]
    fn test_delete_removes_everything_and_is_idempotent() {
        let registry = registry();
        registry.upsert("t", &record()).unwrap();
        registry.upsert("other", &record()).unwrap();

        registry.delete("t").unwrap();
        registry.delete("t").unwrap();
        registry.delete("never_existed").unwrap();

        assert!(registry.fetch("t").unwrap().is_none());
        assert!(registry.fetch("other").unwrap().is_some());

        let db = registry.db.lock();
        let leftover: i64 = db
            .query_row(
                "SELECT (SELECT COUNT(*) FROM column_metadata WHERE table_name = 't') + \
                 (SELECT COUNT(*) FROM sample_questions WHERE table_name = 't')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(leftover, 0);
    }

    #[test]
    fn test_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite:///{}", dir.path().join("metadata.db").display());
        MetadataRegistry::open(&url).unwrap().upsert("t", &record()).unwrap();

        let reopened = MetadataRegistry::open(&url).unwrap();
        assert_eq!(reopened.fetch("t").unwrap().unwrap().table_comment_cn, "销售订单");
    }
}
