use rusqlite::params;

use crate::Db;
use crate::error::Result;
use crate::types::IngestCursor;

impl Db {
    pub fn get_cursor(&self, file_path: &str) -> Result<Option<IngestCursor>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT file_path, inode, mtime, byte_offset, updated_at
            FROM ingest_cursor
            WHERE file_path = ?1
            "#,
        )?;
        let mut rows = stmt.query(params![file_path])?;
        if let Some(row) = rows.next()? {
            Ok(Some(IngestCursor {
                file_path: row.get(0)?,
                inode: row.get::<_, Option<i64>>(1)?.map(|value| value as u64),
                mtime: row.get(2)?,
                byte_offset: row.get::<_, i64>(3)? as u64,
                updated_at: row.get(4)?,
            }))
        } else {
            Ok(None)
        }
    }

    pub fn upsert_cursor(&self, cursor: &IngestCursor) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO ingest_cursor (
              file_path, inode, mtime, byte_offset, updated_at
            ) VALUES (
              ?1, ?2, ?3, ?4, ?5
            )
            ON CONFLICT(file_path) DO UPDATE SET
              inode = excluded.inode,
              mtime = excluded.mtime,
              byte_offset = excluded.byte_offset,
              updated_at = excluded.updated_at
            "#,
            params![
                cursor.file_path,
                cursor.inode.map(|value| value as i64),
                cursor.mtime,
                cursor.byte_offset as i64,
                cursor.updated_at
            ],
        )?;
        Ok(())
    }
}
