//! Template database
//!
//! Creating tables in thousands of fresh SQLite files is slow. The schema is
//! built once into a template, kept in memory, and each directory's database
//! starts as a byte copy of it.

use crate::db::schema;
use crate::error::{DbError, DbResult};
use rusqlite::Connection;
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::debug;

/// An empty, fully-initialized per-directory database
#[derive(Debug, Clone)]
pub struct TemplateDb {
    bytes: Vec<u8>,
}

impl TemplateDb {
    /// Build the template in a scratch file and load it into memory
    ///
    /// The scratch file is unique per call and removed when this returns.
    pub fn create() -> DbResult<Self> {
        let scratch = NamedTempFile::new().map_err(|e| DbError::CreateFailed {
            path: std::env::temp_dir(),
            source: e,
        })?;
        Self::build(scratch.path())
    }

    fn build(scratch: &Path) -> DbResult<Self> {
        {
            let conn = Connection::open(scratch)?;
            schema::create_tables(&conn)?;
            conn.close().map_err(|(_, e)| DbError::Sqlite(e))?;
        }

        let bytes = fs::read(scratch).map_err(|e| DbError::CreateFailed {
            path: scratch.to_path_buf(),
            source: e,
        })?;
        if bytes.is_empty() {
            return Err(DbError::Template(format!(
                "template at '{}' is empty",
                scratch.display()
            )));
        }

        debug!("Template database is {} bytes", bytes.len());
        Ok(Self { bytes })
    }

    /// Write a copy of the template to `dst`, replacing any existing file
    pub fn copy_to(&self, dst: &Path) -> DbResult<()> {
        let mut file = File::create(dst).map_err(|e| DbError::CreateFailed {
            path: dst.to_path_buf(),
            source: e,
        })?;
        file.write_all(&self.bytes)
            .map_err(|e| DbError::CreateFailed {
                path: dst.to_path_buf(),
                source: e,
            })
    }

    /// Size of the template in bytes
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Check if the template holds no bytes
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_template_copy_opens() {
        let template = TemplateDb::create().unwrap();
        assert!(!template.is_empty());

        let dir = tempdir().unwrap();
        let dst = dir.path().join(schema::DB_NAME);
        template.copy_to(&dst).unwrap();

        let conn = Connection::open(&dst).unwrap();
        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM entries", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, 0);
        assert_eq!(
            schema::get_info(&conn, schema::keys::SCHEMA_VERSION).unwrap(),
            Some(schema::SCHEMA_VERSION.to_string())
        );
    }

    #[test]
    fn test_concurrent_templates_do_not_share_scratch() {
        let handles: Vec<_> = (0..8).map(|_| std::thread::spawn(TemplateDb::create)).collect();
        let templates: Vec<TemplateDb> = handles.into_iter().map(|h| h.join().unwrap().unwrap()).collect();

        for t in &templates {
            assert_eq!(t.len(), templates[0].len());
        }
    }
}
