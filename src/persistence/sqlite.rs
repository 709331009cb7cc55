//! SQLite persistence backend

use super::traits::{Persistence, PersistenceError, PersistenceResult, UserSnapshot};
use crate::model::{Assignment, Source, Tag, TagId, Text, TextId, UserId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// SQLite-backed persistence
///
/// Uses a single database file with `texts`, `tags`, and `assignments`
/// tables. Every row carries an `owner` column and every query filters on it.
/// Thread-safe via internal mutex on the connection.
///
/// Constraints live in the schema: `(text_id, tag_id)` is the assignment
/// primary key, deletes cascade through foreign keys, and CHECK constraints
/// enforce the confidence range and the manual ⇒ 1.0 rule.
pub struct SqlitePersistence {
    conn: Mutex<Connection>,
}

impl SqlitePersistence {
    /// Open or create a database at the given path
    pub fn open(path: impl AsRef<Path>) -> PersistenceResult<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path.as_ref())?;
        Self::init_schema(&conn)?;
        tracing::debug!(path = %path.as_ref().display(), "opened sqlite persistence");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory database (useful for testing)
    pub fn open_in_memory() -> PersistenceResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init_schema(conn: &Connection) -> PersistenceResult<()> {
        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;
            PRAGMA journal_mode = WAL;

            CREATE TABLE IF NOT EXISTS texts (
                id TEXT PRIMARY KEY,
                owner TEXT NOT NULL,
                content TEXT NOT NULL CHECK (length(trim(content)) > 0),
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_texts_owner_created
                ON texts(owner, created_at);

            CREATE TABLE IF NOT EXISTS tags (
                id TEXT PRIMARY KEY,
                owner TEXT NOT NULL,
                name TEXT NOT NULL,
                created_at TEXT NOT NULL,
                UNIQUE (owner, name)
            );

            CREATE TABLE IF NOT EXISTS assignments (
                text_id TEXT NOT NULL,
                tag_id TEXT NOT NULL,
                owner TEXT NOT NULL,
                confidence REAL NOT NULL CHECK (confidence >= 0.0 AND confidence <= 1.0),
                source TEXT NOT NULL CHECK (source IN ('ai', 'manual')),
                PRIMARY KEY (text_id, tag_id),
                CHECK (source = 'ai' OR confidence = 1.0),
                FOREIGN KEY (text_id) REFERENCES texts(id) ON DELETE CASCADE,
                FOREIGN KEY (tag_id) REFERENCES tags(id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_assignments_tag
                ON assignments(owner, tag_id);
            "#,
        )?;
        Ok(())
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn parse_time(raw: &str) -> PersistenceResult<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(raw)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| PersistenceError::DateParse(e.to_string()))
    }

    fn row_to_assignment(
        text_id: String,
        tag_id: String,
        confidence: f64,
        source: String,
    ) -> PersistenceResult<Assignment> {
        let source: Source = source
            .parse()
            .map_err(|e: crate::model::ValidationError| PersistenceError::InvalidRow(e.to_string()))?;
        Assignment::from_parts(
            TextId::from_string(text_id),
            TagId::from_string(tag_id),
            confidence,
            source,
        )
        .map_err(|e| PersistenceError::InvalidRow(e.to_string()))
    }

    fn is_unique_violation(err: &rusqlite::Error) -> bool {
        matches!(
            err,
            rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation
        )
    }

    fn owns_text(conn: &Connection, user: &UserId, id: &TextId) -> PersistenceResult<bool> {
        Ok(conn
            .query_row(
                "SELECT 1 FROM texts WHERE id = ?1 AND owner = ?2",
                params![id.as_str(), user.as_str()],
                |_| Ok(()),
            )
            .optional()?
            .is_some())
    }

    fn owns_tag(conn: &Connection, user: &UserId, id: &TagId) -> PersistenceResult<bool> {
        Ok(conn
            .query_row(
                "SELECT 1 FROM tags WHERE id = ?1 AND owner = ?2",
                params![id.as_str(), user.as_str()],
                |_| Ok(()),
            )
            .optional()?
            .is_some())
    }

    fn query_assignments(
        conn: &Connection,
        sql: &str,
        args: &[&dyn rusqlite::ToSql],
    ) -> PersistenceResult<Vec<Assignment>> {
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(args, |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, f64>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (text_id, tag_id, confidence, source) = row?;
            out.push(Self::row_to_assignment(text_id, tag_id, confidence, source)?);
        }
        Ok(out)
    }
}

#[async_trait]
impl Persistence for SqlitePersistence {
    async fn create_text(
        &self,
        user: &UserId,
        content: &str,
        created_at: Option<DateTime<Utc>>,
    ) -> PersistenceResult<Text> {
        let text = Text::with_id(TextId::new(), content, created_at.unwrap_or_else(Utc::now));
        self.conn().execute(
            "INSERT INTO texts (id, owner, content, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                text.id.as_str(),
                user.as_str(),
                text.content,
                text.created_at.to_rfc3339()
            ],
        )?;
        Ok(text)
    }

    async fn delete_text(&self, user: &UserId, id: &TextId) -> PersistenceResult<bool> {
        let removed = self.conn().execute(
            "DELETE FROM texts WHERE id = ?1 AND owner = ?2",
            params![id.as_str(), user.as_str()],
        )?;
        Ok(removed > 0)
    }

    async fn list_texts(&self, user: &UserId) -> PersistenceResult<Vec<Text>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, content, created_at FROM texts WHERE owner = ?1 ORDER BY created_at DESC, id",
        )?;
        let rows = stmt.query_map(params![user.as_str()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;
        let mut texts = Vec::new();
        for row in rows {
            let (id, content, created_at) = row?;
            texts.push(Text::with_id(
                TextId::from_string(id),
                content,
                Self::parse_time(&created_at)?,
            ));
        }
        Ok(texts)
    }

    async fn create_tag(&self, user: &UserId, name: &str) -> PersistenceResult<Tag> {
        let tag = Tag::new(name);
        let result = self.conn().execute(
            "INSERT INTO tags (id, owner, name, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                tag.id.as_str(),
                user.as_str(),
                tag.name,
                tag.created_at.to_rfc3339()
            ],
        );
        match result {
            Ok(_) => Ok(tag),
            Err(e) if Self::is_unique_violation(&e) => {
                Err(PersistenceError::DuplicateTagName(name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn rename_tag(&self, user: &UserId, id: &TagId, name: &str) -> PersistenceResult<Tag> {
        let conn = self.conn();
        let result = conn.execute(
            "UPDATE tags SET name = ?1 WHERE id = ?2 AND owner = ?3",
            params![name, id.as_str(), user.as_str()],
        );
        match result {
            Ok(0) => return Err(PersistenceError::TagNotFound(id.clone())),
            Ok(_) => {}
            Err(e) if Self::is_unique_violation(&e) => {
                return Err(PersistenceError::DuplicateTagName(name.to_string()))
            }
            Err(e) => return Err(e.into()),
        }
        let created_at: String = conn.query_row(
            "SELECT created_at FROM tags WHERE id = ?1 AND owner = ?2",
            params![id.as_str(), user.as_str()],
            |row| row.get(0),
        )?;
        Ok(Tag::with_id(id.clone(), name, Self::parse_time(&created_at)?))
    }

    async fn delete_tag(&self, user: &UserId, id: &TagId) -> PersistenceResult<bool> {
        let removed = self.conn().execute(
            "DELETE FROM tags WHERE id = ?1 AND owner = ?2",
            params![id.as_str(), user.as_str()],
        )?;
        Ok(removed > 0)
    }

    async fn list_tags(&self, user: &UserId) -> PersistenceResult<Vec<Tag>> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare("SELECT id, name, created_at FROM tags WHERE owner = ?1 ORDER BY name")?;
        let rows = stmt.query_map(params![user.as_str()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;
        let mut tags = Vec::new();
        for row in rows {
            let (id, name, created_at) = row?;
            tags.push(Tag::with_id(
                TagId::from_string(id),
                name,
                Self::parse_time(&created_at)?,
            ));
        }
        Ok(tags)
    }

    async fn list_assignments(
        &self,
        user: &UserId,
        text_id: &TextId,
    ) -> PersistenceResult<Vec<Assignment>> {
        Self::query_assignments(
            &self.conn(),
            "SELECT text_id, tag_id, confidence, source FROM assignments
             WHERE owner = ?1 AND text_id = ?2 ORDER BY tag_id",
            &[&user.as_str(), &text_id.as_str()],
        )
    }

    async fn list_all_assignments(&self, user: &UserId) -> PersistenceResult<Vec<Assignment>> {
        Self::query_assignments(
            &self.conn(),
            "SELECT text_id, tag_id, confidence, source FROM assignments
             WHERE owner = ?1 ORDER BY text_id, tag_id",
            &[&user.as_str()],
        )
    }

    async fn upsert_assignment(
        &self,
        user: &UserId,
        assignment: &Assignment,
    ) -> PersistenceResult<()> {
        let conn = self.conn();
        if !Self::owns_text(&conn, user, &assignment.text_id)? {
            return Err(PersistenceError::TextNotFound(assignment.text_id.clone()));
        }
        if !Self::owns_tag(&conn, user, &assignment.tag_id)? {
            return Err(PersistenceError::TagNotFound(assignment.tag_id.clone()));
        }
        conn.execute(
            r#"
            INSERT INTO assignments (text_id, tag_id, owner, confidence, source)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(text_id, tag_id) DO UPDATE SET
                confidence = excluded.confidence,
                source = excluded.source
            "#,
            params![
                assignment.text_id.as_str(),
                assignment.tag_id.as_str(),
                user.as_str(),
                assignment.confidence,
                assignment.source.as_str(),
            ],
        )?;
        Ok(())
    }

    async fn delete_assignment(
        &self,
        user: &UserId,
        text_id: &TextId,
        tag_id: &TagId,
    ) -> PersistenceResult<bool> {
        let removed = self.conn().execute(
            "DELETE FROM assignments WHERE owner = ?1 AND text_id = ?2 AND tag_id = ?3",
            params![user.as_str(), text_id.as_str(), tag_id.as_str()],
        )?;
        Ok(removed > 0)
    }

    async fn delete_assignments_where(
        &self,
        user: &UserId,
        text_id: &TextId,
        source: Source,
    ) -> PersistenceResult<usize> {
        let removed = self.conn().execute(
            "DELETE FROM assignments WHERE owner = ?1 AND text_id = ?2 AND source = ?3",
            params![user.as_str(), text_id.as_str(), source.as_str()],
        )?;
        Ok(removed)
    }

    async fn count_assignments_by_tag(
        &self,
        user: &UserId,
        tag_id: &TagId,
    ) -> PersistenceResult<usize> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM assignments WHERE owner = ?1 AND tag_id = ?2",
            params![user.as_str(), tag_id.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    async fn load_snapshot(&self, user: &UserId) -> PersistenceResult<UserSnapshot> {
        Ok(UserSnapshot {
            texts: self.list_texts(user).await?,
            tags: self.list_tags(user).await?,
            assignments: self.list_all_assignments(user).await?,
        })
    }
}
