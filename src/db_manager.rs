use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use crate::protocol::{Memory, MemoryKind, MemoryPhoto, Scrapbook};

const SCRAPBOOK_COLUMNS: &str = "id, user_id, title, name_a, name_b, share_token, created_at";
const MEMORY_COLUMNS: &str = "id, scrapbook_id, type, date, note, song_title, song_artist, \
     song_url, song_album_art_url, sort_order, created_at";
const PHOTO_COLUMNS: &str = "id, memory_id, storage_path, caption, created_at";

/// Column values written by a memory edit.
pub struct MemoryFields<'a> {
    pub date: Option<NaiveDate>,
    pub note: &'a str,
    pub song_title: Option<&'a str>,
    pub song_artist: Option<&'a str>,
    pub song_url: Option<&'a str>,
    pub song_album_art_url: Option<&'a str>,
}

pub struct DbManager {
    conn: Connection,
}

impl DbManager {
    /// Opens (or creates) the database file. The parent directory must exist.
    pub fn new(db_path: &Path) -> Result<Self, rusqlite::Error> {
        Self::from_connection(Connection::open(db_path)?)
    }

    pub fn new_in_memory() -> Result<Self, rusqlite::Error> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, rusqlite::Error> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        let db_manager = Self { conn };
        db_manager.initialize_schema()?;
        db_manager.migrate()?;
        db_manager.create_indexes()?;
        Ok(db_manager)
    }

    fn initialize_schema(&self) -> Result<(), rusqlite::Error> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS scrapbooks (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                title TEXT NOT NULL,
                name_a TEXT NOT NULL,
                name_b TEXT NOT NULL,
                share_token TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
            [],
        )?;

        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS memories (
                id TEXT PRIMARY KEY,
                scrapbook_id TEXT NOT NULL,
                type TEXT NOT NULL DEFAULT 'note',
                date TEXT,
                note TEXT NOT NULL DEFAULT '',
                song_title TEXT,
                song_artist TEXT,
                song_url TEXT,
                song_album_art_url TEXT,
                sort_order INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                FOREIGN KEY(scrapbook_id) REFERENCES scrapbooks(id) ON DELETE CASCADE
            )",
            [],
        )?;

        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS memory_photos (
                id TEXT PRIMARY KEY,
                memory_id TEXT NOT NULL,
                storage_path TEXT NOT NULL,
                caption TEXT,
                created_at TEXT NOT NULL,
                FOREIGN KEY(memory_id) REFERENCES memories(id) ON DELETE CASCADE
            )",
            [],
        )?;
        Ok(())
    }

    fn table_columns(&self, table: &str) -> Result<Vec<String>, rusqlite::Error> {
        let mut stmt = self.conn.prepare(&format!("PRAGMA table_info({table})"))?;
        let columns = stmt.query_map([], |row| row.get::<_, String>(1))?;
        columns.collect()
    }

    /// Brings databases created before song cards, manual ordering, or share links up to date.
    fn migrate(&self) -> Result<(), rusqlite::Error> {
        let memory_columns = self.table_columns("memories")?;
        let has_memory_column = |name: &str| memory_columns.iter().any(|col| col == name);

        if !has_memory_column("type") {
            self.conn.execute(
                "ALTER TABLE memories ADD COLUMN type TEXT NOT NULL DEFAULT 'note'",
                [],
            )?;
        }
        if !has_memory_column("song_album_art_url") {
            self.conn
                .execute("ALTER TABLE memories ADD COLUMN song_album_art_url TEXT", [])?;
        }
        if !has_memory_column("sort_order") {
            self.conn.execute(
                "ALTER TABLE memories ADD COLUMN sort_order INTEGER NOT NULL DEFAULT 0",
                [],
            )?;
        }

        let scrapbook_columns = self.table_columns("scrapbooks")?;
        if !scrapbook_columns.iter().any(|col| col == "share_token") {
            self.conn
                .execute("ALTER TABLE scrapbooks ADD COLUMN share_token TEXT", [])?;
        }

        // Every scrapbook needs a token before the unique index goes on.
        let missing_tokens: Vec<String> = {
            let mut stmt = self
                .conn
                .prepare("SELECT id FROM scrapbooks WHERE share_token IS NULL OR share_token = ''")?;
            let ids = stmt.query_map([], |row| row.get::<_, String>(0))?;
            ids.collect::<Result<_, _>>()?
        };
        for id in missing_tokens {
            self.set_share_token(&id, &Uuid::new_v4().to_string())?;
        }
        Ok(())
    }

    fn create_indexes(&self) -> Result<(), rusqlite::Error> {
        self.conn.execute_batch(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_scrapbooks_share_token ON scrapbooks(share_token);
             CREATE INDEX IF NOT EXISTS idx_scrapbooks_user ON scrapbooks(user_id);
             CREATE INDEX IF NOT EXISTS idx_memories_scrapbook ON memories(scrapbook_id);
             CREATE INDEX IF NOT EXISTS idx_memory_photos_memory ON memory_photos(memory_id);",
        )
    }

    pub fn insert_scrapbook(&self, scrapbook: &Scrapbook) -> Result<(), rusqlite::Error> {
        self.conn.execute(
            "INSERT INTO scrapbooks (id, user_id, title, name_a, name_b, share_token, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                scrapbook.id,
                scrapbook.user_id,
                scrapbook.title,
                scrapbook.name_a,
                scrapbook.name_b,
                scrapbook.share_token,
                scrapbook.created_at
            ],
        )?;
        Ok(())
    }

    pub fn get_scrapbook(&self, id: &str) -> Result<Option<Scrapbook>, rusqlite::Error> {
        self.conn
            .query_row(
                &format!("SELECT {SCRAPBOOK_COLUMNS} FROM scrapbooks WHERE id = ?1"),
                params![id],
                scrapbook_from_row,
            )
            .optional()
    }

    pub fn get_scrapbook_by_share_token(
        &self,
        share_token: &str,
    ) -> Result<Option<Scrapbook>, rusqlite::Error> {
        self.conn
            .query_row(
                &format!("SELECT {SCRAPBOOK_COLUMNS} FROM scrapbooks WHERE share_token = ?1"),
                params![share_token],
                scrapbook_from_row,
            )
            .optional()
    }

    /// Newest first.
    pub fn get_scrapbooks_for_user(&self, user_id: &str) -> Result<Vec<Scrapbook>, rusqlite::Error> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {SCRAPBOOK_COLUMNS} FROM scrapbooks WHERE user_id = ?1
             ORDER BY created_at DESC, rowid DESC"
        ))?;
        let scrapbooks = stmt.query_map(params![user_id], scrapbook_from_row)?;
        scrapbooks.collect()
    }

    pub fn update_scrapbook_names(
        &self,
        id: &str,
        title: &str,
        name_a: &str,
        name_b: &str,
    ) -> Result<(), rusqlite::Error> {
        self.conn.execute(
            "UPDATE scrapbooks SET title = ?1, name_a = ?2, name_b = ?3 WHERE id = ?4",
            params![title, name_a, name_b, id],
        )?;
        Ok(())
    }

    pub fn set_share_token(&self, id: &str, share_token: &str) -> Result<(), rusqlite::Error> {
        self.conn.execute(
            "UPDATE scrapbooks SET share_token = ?1 WHERE id = ?2",
            params![share_token, id],
        )?;
        Ok(())
    }

    /// Memories and photo rows go with it through the cascade.
    pub fn delete_scrapbook(&self, id: &str) -> Result<(), rusqlite::Error> {
        self.conn
            .execute("DELETE FROM scrapbooks WHERE id = ?1", params![id])?;
        Ok(())
    }

    pub fn insert_memory(&self, memory: &Memory) -> Result<(), rusqlite::Error> {
        self.conn.execute(
            &format!(
                "INSERT INTO memories ({MEMORY_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
            ),
            params![
                memory.id,
                memory.scrapbook_id,
                memory.kind.as_str(),
                memory.date,
                memory.note,
                memory.song_title,
                memory.song_artist,
                memory.song_url,
                memory.song_album_art_url,
                memory.sort_order,
                memory.created_at
            ],
        )?;
        Ok(())
    }

    pub fn get_memory(&self, id: &str) -> Result<Option<Memory>, rusqlite::Error> {
        let memory = self
            .conn
            .query_row(
                &format!("SELECT {MEMORY_COLUMNS} FROM memories WHERE id = ?1"),
                params![id],
                memory_from_row,
            )
            .optional()?;
        match memory {
            Some(mut memory) => {
                memory.photos = self.get_photos_for_memory(&memory.id)?;
                Ok(Some(memory))
            }
            None => Ok(None),
        }
    }

    /// Memories in stored display order with their photos attached.
    pub fn get_memories_for_scrapbook(
        &self,
        scrapbook_id: &str,
    ) -> Result<Vec<Memory>, rusqlite::Error> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {MEMORY_COLUMNS} FROM memories WHERE scrapbook_id = ?1
             ORDER BY sort_order ASC, created_at ASC, rowid ASC"
        ))?;
        let mut memories = stmt
            .query_map(params![scrapbook_id], memory_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        let mut photo_stmt = self.conn.prepare(
            "SELECT p.id, p.memory_id, p.storage_path, p.caption, p.created_at
             FROM memory_photos p JOIN memories m ON m.id = p.memory_id
             WHERE m.scrapbook_id = ?1
             ORDER BY p.created_at ASC, p.rowid ASC",
        )?;
        let mut photos_by_memory: HashMap<String, Vec<MemoryPhoto>> = HashMap::new();
        for photo in photo_stmt.query_map(params![scrapbook_id], photo_from_row)? {
            let photo = photo?;
            photos_by_memory
                .entry(photo.memory_id.clone())
                .or_default()
                .push(photo);
        }

        for memory in &mut memories {
            memory.photos = photos_by_memory.remove(&memory.id).unwrap_or_default();
        }
        Ok(memories)
    }

    pub fn get_sort_orders(&self, scrapbook_id: &str) -> Result<Vec<i64>, rusqlite::Error> {
        let mut stmt = self
            .conn
            .prepare("SELECT sort_order FROM memories WHERE scrapbook_id = ?1")?;
        let keys = stmt.query_map(params![scrapbook_id], |row| row.get::<_, i64>(0))?;
        keys.collect()
    }

    pub fn update_memory_fields(
        &self,
        id: &str,
        fields: &MemoryFields<'_>,
    ) -> Result<(), rusqlite::Error> {
        self.conn.execute(
            "UPDATE memories SET date = ?1, note = ?2, song_title = ?3, song_artist = ?4,
             song_url = ?5, song_album_art_url = ?6 WHERE id = ?7",
            params![
                fields.date,
                fields.note,
                fields.song_title,
                fields.song_artist,
                fields.song_url,
                fields.song_album_art_url,
                id
            ],
        )?;
        Ok(())
    }

    /// Writes every key in one transaction so a reorder lands whole or not at all.
    pub fn update_sort_orders(&mut self, orders: &[(String, i64)]) -> Result<(), rusqlite::Error> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare("UPDATE memories SET sort_order = ?1 WHERE id = ?2")?;
            for (id, sort_order) in orders {
                stmt.execute(params![sort_order, id])?;
            }
        }
        tx.commit()
    }

    pub fn delete_memory(&self, id: &str) -> Result<(), rusqlite::Error> {
        self.conn
            .execute("DELETE FROM memories WHERE id = ?1", params![id])?;
        Ok(())
    }

    pub fn insert_photo(&self, photo: &MemoryPhoto) -> Result<(), rusqlite::Error> {
        self.conn.execute(
            &format!("INSERT INTO memory_photos ({PHOTO_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5)"),
            params![
                photo.id,
                photo.memory_id,
                photo.storage_path,
                photo.caption,
                photo.created_at
            ],
        )?;
        Ok(())
    }

    pub fn get_photo(&self, id: &str) -> Result<Option<MemoryPhoto>, rusqlite::Error> {
        self.conn
            .query_row(
                &format!("SELECT {PHOTO_COLUMNS} FROM memory_photos WHERE id = ?1"),
                params![id],
                photo_from_row,
            )
            .optional()
    }

    pub fn get_photos_for_memory(&self, memory_id: &str) -> Result<Vec<MemoryPhoto>, rusqlite::Error> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {PHOTO_COLUMNS} FROM memory_photos WHERE memory_id = ?1
             ORDER BY created_at ASC, rowid ASC"
        ))?;
        let photos = stmt.query_map(params![memory_id], photo_from_row)?;
        photos.collect()
    }

    /// Object keys of every photo in a scrapbook, for bucket cleanup before a delete.
    pub fn get_storage_paths_for_scrapbook(
        &self,
        scrapbook_id: &str,
    ) -> Result<Vec<String>, rusqlite::Error> {
        let mut stmt = self.conn.prepare(
            "SELECT p.storage_path FROM memory_photos p JOIN memories m ON m.id = p.memory_id
             WHERE m.scrapbook_id = ?1",
        )?;
        let paths = stmt.query_map(params![scrapbook_id], |row| row.get::<_, String>(0))?;
        paths.collect()
    }

    pub fn update_photo_caption(
        &self,
        id: &str,
        caption: Option<&str>,
    ) -> Result<(), rusqlite::Error> {
        self.conn.execute(
            "UPDATE memory_photos SET caption = ?1 WHERE id = ?2",
            params![caption, id],
        )?;
        Ok(())
    }

    pub fn delete_photo(&self, id: &str) -> Result<(), rusqlite::Error> {
        self.conn
            .execute("DELETE FROM memory_photos WHERE id = ?1", params![id])?;
        Ok(())
    }
}

fn scrapbook_from_row(row: &Row<'_>) -> Result<Scrapbook, rusqlite::Error> {
    Ok(Scrapbook {
        id: row.get(0)?,
        user_id: row.get(1)?,
        title: row.get(2)?,
        name_a: row.get(3)?,
        name_b: row.get(4)?,
        share_token: row.get(5)?,
        created_at: row.get::<_, DateTime<Utc>>(6)?,
    })
}

fn memory_from_row(row: &Row<'_>) -> Result<Memory, rusqlite::Error> {
    Ok(Memory {
        id: row.get(0)?,
        scrapbook_id: row.get(1)?,
        kind: MemoryKind::from_db(&row.get::<_, String>(2)?),
        date: row.get::<_, Option<NaiveDate>>(3)?,
        note: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
        song_title: row.get(5)?,
        song_artist: row.get(6)?,
        song_url: row.get(7)?,
        song_album_art_url: row.get(8)?,
        sort_order: row.get(9)?,
        created_at: row.get::<_, DateTime<Utc>>(10)?,
        photos: Vec::new(),
    })
}

fn photo_from_row(row: &Row<'_>) -> Result<MemoryPhoto, rusqlite::Error> {
    Ok(MemoryPhoto {
        id: row.get(0)?,
        memory_id: row.get(1)?,
        storage_path: row.get(2)?,
        caption: row.get(3)?,
        created_at: row.get::<_, DateTime<Utc>>(4)?,
        public_url: None,
    })
}
