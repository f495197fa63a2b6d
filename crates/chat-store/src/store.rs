//! Chat and message tables.
//!
//! All timestamps are stored as INTEGER Unix milliseconds. Listings order by
//! timestamp descending and break ties by insertion order (`rowid`)
//! descending, so pages stay stable across repeated calls.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::types::ToSql;
use rusqlite::{params, Connection, Row};
use tracing::debug;

use crate::address::{local_part, GROUP_SUFFIX};
use crate::error::{Result, StoreError};
use crate::types::{
    AddressPatterns, Chat, Contact, ListChatsParams, ListMessagesParams, MediaDownloadInfo,
    Message, MessageRecord, SearchContactsParams,
};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS chats (
        jid                TEXT PRIMARY KEY,
        name               TEXT,
        last_message_time  INTEGER
    );
    CREATE INDEX IF NOT EXISTS idx_chats_activity ON chats(last_message_time);

    CREATE TABLE IF NOT EXISTS messages (
        id               TEXT NOT NULL,
        chat_jid         TEXT NOT NULL,
        sender           TEXT NOT NULL,
        content          TEXT NOT NULL DEFAULT '',
        timestamp        INTEGER NOT NULL,
        is_from_me       INTEGER NOT NULL DEFAULT 0,
        media_type       TEXT,
        filename         TEXT,
        url              TEXT,
        direct_path      TEXT,
        mime_type        TEXT,
        media_key        BLOB,
        file_sha256      BLOB,
        file_enc_sha256  BLOB,
        file_length      INTEGER,
        local_path       TEXT,
        downloaded_at    INTEGER,
        PRIMARY KEY (id, chat_jid)
    );
    CREATE INDEX IF NOT EXISTS idx_messages_chat_time ON messages(chat_jid, timestamp);
    CREATE INDEX IF NOT EXISTS idx_messages_time ON messages(timestamp);
";

/// SQLite-backed store of chats and messages.
///
/// The connection sits behind a `parking_lot::Mutex`; every method takes the
/// lock for the duration of one statement batch and never across an await.
pub struct ChatStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl ChatStore {
    /// Open (or create) the database at `path`, creating parent directories.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous  = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )?;
        conn.execute_batch(SCHEMA)?;

        debug!(path = %path.display(), "opened chat store");
        Ok(Self {
            conn: Mutex::new(conn),
            path: Some(path.to_path_buf()),
        })
    }

    /// In-memory store, mainly for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: None,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    // ── Writes ───────────────────────────────────────────────────

    /// Upsert a chat.
    ///
    /// A name equal to the address is a placeholder: it never replaces a
    /// name that is already stored. Any other name replaces the stored one.
    /// The activity time is always taken from the latest call.
    pub fn store_chat(&self, jid: &str, name: &str, last_message_time: DateTime<Utc>) -> Result<()> {
        let name = if name.trim().is_empty() { jid } else { name };

        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO chats (jid, name, last_message_time)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(jid) DO UPDATE SET
                name = CASE
                    WHEN excluded.name = excluded.jid AND chats.name IS NOT NULL THEN chats.name
                    ELSE excluded.name
                END,
                last_message_time = excluded.last_message_time",
            params![jid, name, to_millis(last_message_time)],
        )?;
        Ok(())
    }

    /// Upsert a message keyed by `(id, chat_jid)`.
    ///
    /// The chat row is not required to exist. Download state is never
    /// touched here. A record without media keeps whatever media columns
    /// the row already has; a record with media replaces them.
    pub fn store_message(&self, record: &MessageRecord) -> Result<()> {
        let media = record.media.as_ref();
        let file_length = media.map(|m| i64::try_from(m.file_length).unwrap_or(i64::MAX));

        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO messages
                (id, chat_jid, sender, content, timestamp, is_from_me,
                 media_type, filename, url, direct_path, mime_type,
                 media_key, file_sha256, file_enc_sha256, file_length)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
             ON CONFLICT(id, chat_jid) DO UPDATE SET
                sender          = excluded.sender,
                content         = excluded.content,
                timestamp       = excluded.timestamp,
                is_from_me      = excluded.is_from_me,
                media_type      = COALESCE(excluded.media_type, messages.media_type),
                filename        = COALESCE(excluded.filename, messages.filename),
                url             = COALESCE(excluded.url, messages.url),
                direct_path     = COALESCE(excluded.direct_path, messages.direct_path),
                mime_type       = COALESCE(excluded.mime_type, messages.mime_type),
                media_key       = COALESCE(excluded.media_key, messages.media_key),
                file_sha256     = COALESCE(excluded.file_sha256, messages.file_sha256),
                file_enc_sha256 = COALESCE(excluded.file_enc_sha256, messages.file_enc_sha256),
                file_length     = COALESCE(excluded.file_length, messages.file_length)",
            params![
                record.id,
                record.chat_jid,
                record.sender,
                record.content,
                to_millis(record.timestamp),
                record.is_from_me,
                media.map(|m| m.media_type.as_str()),
                media.map(|m| m.filename.as_str()),
                media.map(|m| m.url.as_str()),
                media.map(|m| m.direct_path.as_str()),
                media.map(|m| m.mime_type.as_str()),
                media.map(|m| m.media_key.as_slice()),
                media.map(|m| m.file_sha256.as_slice()),
                media.map(|m| m.file_enc_sha256.as_slice()),
                file_length,
            ],
        )?;
        Ok(())
    }

    /// Record where a message's media was saved.
    ///
    /// Download state is written once: calling again for a row that already
    /// has it succeeds without changing anything.
    pub fn mark_media_downloaded(
        &self,
        id: &str,
        chat_jid: &str,
        local_path: &str,
        downloaded_at: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE messages SET local_path = ?3, downloaded_at = ?4
             WHERE id = ?1 AND chat_jid = ?2 AND local_path IS NULL",
            params![id, chat_jid, local_path, to_millis(downloaded_at)],
        )?;
        if changed > 0 {
            return Ok(());
        }

        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM messages WHERE id = ?1 AND chat_jid = ?2)",
            params![id, chat_jid],
            |row| row.get(0),
        )?;
        if !exists {
            return Err(StoreError::NotFound(format!("message {id} in chat {chat_jid}")));
        }
        debug!(id, chat_jid, "media already marked as downloaded");
        Ok(())
    }

    /// Drop the recorded download state, so the next
    /// [`mark_media_downloaded`](Self::mark_media_downloaded) takes effect.
    pub fn forget_media_download(&self, id: &str, chat_jid: &str) -> Result<()> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE messages SET local_path = NULL, downloaded_at = NULL
             WHERE id = ?1 AND chat_jid = ?2",
            params![id, chat_jid],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("message {id} in chat {chat_jid}")));
        }
        Ok(())
    }

    // ── Reads ────────────────────────────────────────────────────

    pub fn list_messages(&self, params: &ListMessagesParams) -> Result<Vec<Message>> {
        let mut sql = String::from(
            "SELECT m.id, m.chat_jid, c.name, m.sender, m.content, m.timestamp,
                    m.is_from_me, m.media_type, m.filename
             FROM messages m
             LEFT JOIN chats c ON c.jid = m.chat_jid
             WHERE 1=1",
        );
        let mut values: Vec<Box<dyn ToSql>> = Vec::new();

        if let Some(chat) = &params.chat_jid {
            values.push(Box::new(chat.clone()));
            sql.push_str(&format!(" AND m.chat_jid = ?{}", values.len()));
        }
        if let Some(query) = params.query.as_deref().filter(|q| !q.is_empty()) {
            values.push(Box::new(like_pattern(query)));
            sql.push_str(&format!(" AND m.content LIKE ?{} ESCAPE '\\'", values.len()));
        }
        if let Some(after) = params.after {
            values.push(Box::new(to_millis(after)));
            sql.push_str(&format!(" AND m.timestamp > ?{}", values.len()));
        }
        push_address_patterns(&mut sql, &mut values, "m.chat_jid", &params.patterns);
        sql.push_str(" ORDER BY m.timestamp DESC, m.rowid DESC");
        push_page(&mut sql, &mut values, params.limit, params.page);

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql)?;
        let params_ref: Vec<&dyn ToSql> = values.iter().map(|p| p.as_ref()).collect();
        let rows = stmt.query_map(params_ref.as_slice(), message_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn list_chats(&self, params: &ListChatsParams) -> Result<Vec<Chat>> {
        let mut sql = String::from(
            "SELECT c.jid, c.name, c.last_message_time,
                    lm.content, lm.sender, lm.is_from_me
             FROM chats c
             LEFT JOIN messages lm ON lm.rowid = (
                 SELECT m.rowid FROM messages m
                 WHERE m.chat_jid = c.jid
                 ORDER BY m.timestamp DESC, m.rowid DESC
                 LIMIT 1
             )
             WHERE 1=1",
        );
        let mut values: Vec<Box<dyn ToSql>> = Vec::new();

        if let Some(query) = params.query.as_deref().filter(|q| !q.is_empty()) {
            values.push(Box::new(like_pattern(query)));
            sql.push_str(&format!(" AND c.name LIKE ?{} ESCAPE '\\'", values.len()));
        }
        push_address_patterns(&mut sql, &mut values, "c.jid", &params.patterns);
        sql.push_str(" ORDER BY c.last_message_time DESC, c.rowid DESC");
        push_page(&mut sql, &mut values, params.limit, params.page);

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql)?;
        let params_ref: Vec<&dyn ToSql> = values.iter().map(|p| p.as_ref()).collect();
        let rows = stmt.query_map(params_ref.as_slice(), |row| {
            let jid: String = row.get(0)?;
            let name: Option<String> = row.get(1)?;
            Ok(Chat {
                name: name.unwrap_or_else(|| jid.clone()),
                jid,
                last_message_time: row.get::<_, Option<i64>>(2)?.map(from_millis),
                last_message: row.get(3)?,
                last_sender: row.get(4)?,
                last_is_from_me: row.get(5)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Direct-chat contacts whose name contains the query. Group addresses
    /// never appear, whatever the patterns say.
    pub fn search_contacts(&self, params: &SearchContactsParams) -> Result<Vec<Contact>> {
        let mut sql = format!(
            "SELECT c.jid, c.name FROM chats c WHERE c.jid NOT GLOB '*{GROUP_SUFFIX}'"
        );
        let mut values: Vec<Box<dyn ToSql>> = Vec::new();

        if !params.query.is_empty() {
            values.push(Box::new(like_pattern(&params.query)));
            sql.push_str(&format!(" AND c.name LIKE ?{} ESCAPE '\\'", values.len()));
        }
        push_address_patterns(&mut sql, &mut values, "c.jid", &params.patterns);
        sql.push_str(" ORDER BY c.name, c.jid");

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql)?;
        let params_ref: Vec<&dyn ToSql> = values.iter().map(|p| p.as_ref()).collect();
        let rows = stmt.query_map(params_ref.as_slice(), |row| {
            let jid: String = row.get(0)?;
            let name: Option<String> = row.get(1)?;
            Ok(Contact {
                phone_number: local_part(&jid).to_string(),
                name: name.unwrap_or_else(|| jid.clone()),
                jid,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Media descriptor and download state of one message.
    ///
    /// Without a chat address the id alone must identify a single row;
    /// otherwise the lookup fails with [`StoreError::Ambiguous`].
    pub fn get_message_for_download(
        &self,
        id: &str,
        chat_jid: Option<&str>,
    ) -> Result<MediaDownloadInfo> {
        let mut sql = String::from(
            "SELECT id, chat_jid, media_type, filename, url, direct_path, mime_type,
                    media_key, file_sha256, file_enc_sha256, file_length,
                    local_path, downloaded_at
             FROM messages WHERE id = ?1",
        );
        let mut values: Vec<Box<dyn ToSql>> = vec![Box::new(id.to_string())];
        if let Some(chat) = chat_jid {
            values.push(Box::new(chat.to_string()));
            sql.push_str(" AND chat_jid = ?2");
        }

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql)?;
        let params_ref: Vec<&dyn ToSql> = values.iter().map(|p| p.as_ref()).collect();
        let mut rows = stmt
            .query_map(params_ref.as_slice(), download_info_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        match rows.len() {
            0 => Err(StoreError::NotFound(match chat_jid {
                Some(chat) => format!("message {id} in chat {chat}"),
                None => format!("message {id}"),
            })),
            1 => Ok(rows.remove(0)),
            matches => Err(StoreError::Ambiguous {
                id: id.to_string(),
                matches,
            }),
        }
    }

    pub fn count_messages(&self) -> Result<u64> {
        let conn = self.conn.lock();
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?;
        Ok(n.max(0) as u64)
    }

    pub fn count_chats(&self) -> Result<u64> {
        let conn = self.conn.lock();
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM chats", [], |row| row.get(0))?;
        Ok(n.max(0) as u64)
    }
}

// ── Helpers ──────────────────────────────────────────────────────

fn to_millis(t: DateTime<Utc>) -> i64 {
    t.timestamp_millis()
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

/// `%query%` with LIKE metacharacters escaped, so the match is literal.
fn like_pattern(query: &str) -> String {
    let escaped = query
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

/// Append include/exclude substring conditions on `column`.
///
/// `instr` keeps the match literal and case-sensitive, unlike LIKE.
fn push_address_patterns(
    sql: &mut String,
    values: &mut Vec<Box<dyn ToSql>>,
    column: &str,
    patterns: &AddressPatterns,
) {
    if let Some(include) = patterns.include() {
        let mut clauses = Vec::with_capacity(include.len());
        for pattern in include {
            values.push(Box::new(pattern.clone()));
            clauses.push(format!("instr({column}, ?{}) > 0", values.len()));
        }
        sql.push_str(&format!(" AND ({})", clauses.join(" OR ")));
    }
    if let Some(exclude) = patterns.exclude() {
        for pattern in exclude {
            values.push(Box::new(pattern.clone()));
            sql.push_str(&format!(" AND instr({column}, ?{}) = 0", values.len()));
        }
    }
}

fn push_page(sql: &mut String, values: &mut Vec<Box<dyn ToSql>>, limit: usize, page: usize) {
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    let offset = limit.saturating_mul(i64::try_from(page).unwrap_or(i64::MAX));
    values.push(Box::new(limit));
    sql.push_str(&format!(" LIMIT ?{}", values.len()));
    values.push(Box::new(offset));
    sql.push_str(&format!(" OFFSET ?{}", values.len()));
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        id: row.get(0)?,
        chat_jid: row.get(1)?,
        chat_name: row.get(2)?,
        sender: row.get(3)?,
        content: row.get(4)?,
        timestamp: from_millis(row.get(5)?),
        is_from_me: row.get(6)?,
        media_type: row.get::<_, Option<String>>(7)?.filter(|t| !t.is_empty()),
        filename: row.get::<_, Option<String>>(8)?.filter(|f| !f.is_empty()),
    })
}

fn download_info_from_row(row: &Row<'_>) -> rusqlite::Result<MediaDownloadInfo> {
    Ok(MediaDownloadInfo {
        id: row.get(0)?,
        chat_jid: row.get(1)?,
        media_type: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
        filename: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
        url: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
        direct_path: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
        mime_type: row.get::<_, Option<String>>(6)?.unwrap_or_default(),
        media_key: row.get::<_, Option<Vec<u8>>>(7)?.unwrap_or_default(),
        file_sha256: row.get::<_, Option<Vec<u8>>>(8)?.unwrap_or_default(),
        file_enc_sha256: row.get::<_, Option<Vec<u8>>>(9)?.unwrap_or_default(),
        file_length: row.get::<_, Option<i64>>(10)?.unwrap_or_default().max(0) as u64,
        local_path: row.get(11)?,
        downloaded_at: row.get::<_, Option<i64>>(12)?.map(from_millis),
    })
}
