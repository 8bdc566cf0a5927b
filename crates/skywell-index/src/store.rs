//! Row types and SQL for the `users`, `files`, and `file_keys` relations.
//!
//! Everything here is synchronous and takes a borrowed connection so that
//! callers can compose several statements inside one transaction. Async
//! callers reach these through [`run_blocking`].

use rusqlite::{params, Connection, OptionalExtension, Row};
use skywell_db::DbPool;

use crate::error::IndexError;

/// A row of the `users` relation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRow {
    /// Surrogate key.
    pub id: i64,
    /// Account DID.
    pub did: String,
    /// Handle at last refresh.
    pub handle: String,
    /// Display name at last refresh.
    pub display_name: String,
    /// Avatar URI at last refresh; empty when unset.
    pub avatar: String,
}

/// A row of the `files` relation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRow {
    /// Surrogate key.
    pub id: i64,
    /// Record URI (natural key).
    pub uri: String,
    /// Record CID.
    pub cid: String,
    /// Owner.
    pub user_id: i64,
    /// Author-claimed creation time.
    pub created_at: String,
    /// Server-observed index time in nanoseconds; ordering key only.
    pub indexed_at: i64,
    /// Display name.
    pub name: String,
    /// Description; empty when unset.
    pub description: String,
    /// Blob CID.
    pub blob_ref: String,
    /// Blob MIME type.
    pub mime_type: String,
    /// Blob size in bytes.
    pub size: i64,
}

/// Profile fields written to a `users` row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileFields {
    /// Handle.
    pub handle: String,
    /// Display name.
    pub display_name: String,
    /// Avatar URI, or empty.
    pub avatar: String,
}

/// The mutable subset of a file, overwritten on update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileFields<'a> {
    /// Display name.
    pub name: &'a str,
    /// Description.
    pub description: &'a str,
    /// Blob CID.
    pub blob_ref: &'a str,
    /// Blob MIME type.
    pub mime_type: &'a str,
    /// Blob size.
    pub size: i64,
}

/// Runs `f` with a pooled connection on the blocking thread pool.
///
/// # Errors
///
/// Returns whatever `f` returns, [`IndexError::Pool`] if no connection is
/// available, or [`IndexError::Join`] if the task panicked.
pub async fn run_blocking<T, F>(pool: &DbPool, f: F) -> Result<T, IndexError>
where
    T: Send + 'static,
    F: FnOnce(&mut Connection) -> Result<T, IndexError> + Send + 'static,
{
    let pool = pool.clone();
    tokio::task::spawn_blocking(move || {
        let mut conn = pool.get()?;
        f(&mut *conn)
    })
    .await?
}

const USER_COLUMNS: &str = "id, did, handle, display_name, avatar";

const FILE_COLUMNS: &str =
    "id, uri, cid, user_id, created_at, indexed_at, name, description, blob_ref, mime_type, size";

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        did: row.get(1)?,
        handle: row.get(2)?,
        display_name: row.get(3)?,
        avatar: row.get(4)?,
    })
}

fn file_from_row(row: &Row<'_>) -> rusqlite::Result<FileRow> {
    Ok(FileRow {
        id: row.get(0)?,
        uri: row.get(1)?,
        cid: row.get(2)?,
        user_id: row.get(3)?,
        created_at: row.get(4)?,
        indexed_at: row.get(5)?,
        name: row.get(6)?,
        description: row.get(7)?,
        blob_ref: row.get(8)?,
        mime_type: row.get(9)?,
        size: row.get(10)?,
    })
}

/// Looks up a user by DID.
pub fn user_by_did(conn: &Connection, did: &str) -> rusqlite::Result<Option<UserRow>> {
    conn.query_row(
        &format!("SELECT {USER_COLUMNS} FROM users WHERE did = ?1"),
        params![did],
        user_from_row,
    )
    .optional()
}

/// Looks up a user by surrogate key.
pub fn user_by_id(conn: &Connection, id: i64) -> rusqlite::Result<Option<UserRow>> {
    conn.query_row(
        &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
        params![id],
        user_from_row,
    )
    .optional()
}

/// Inserts a user unless one with the DID already exists, and returns the
/// user's id either way. The existing row's profile is left untouched.
pub fn insert_user(conn: &Connection, did: &str, profile: &ProfileFields) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO users (did, handle, display_name, avatar) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(did) DO NOTHING",
        params![did, profile.handle, profile.display_name, profile.avatar],
    )?;
    conn.query_row("SELECT id FROM users WHERE did = ?1", params![did], |row| {
        row.get(0)
    })
}

/// Overwrites the profile of an existing user. Returns `false` if no row
/// matched.
pub fn update_user_profile(
    conn: &Connection,
    did: &str,
    profile: &ProfileFields,
) -> rusqlite::Result<bool> {
    let changed = conn.execute(
        "UPDATE users SET handle = ?2, display_name = ?3, avatar = ?4, updated_at = datetime('now')
         WHERE did = ?1",
        params![did, profile.handle, profile.display_name, profile.avatar],
    )?;
    Ok(changed > 0)
}

/// Inserts the user, or overwrites the profile if it already exists.
pub fn upsert_user(conn: &Connection, did: &str, profile: &ProfileFields) -> rusqlite::Result<i64> {
    conn.query_row(
        "INSERT INTO users (did, handle, display_name, avatar) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(did) DO UPDATE SET
            handle = excluded.handle,
            display_name = excluded.display_name,
            avatar = excluded.avatar,
            updated_at = datetime('now')
         RETURNING id",
        params![did, profile.handle, profile.display_name, profile.avatar],
        |row| row.get(0),
    )
}

/// Looks up a file by record URI.
pub fn file_by_uri(conn: &Connection, uri: &str) -> rusqlite::Result<Option<FileRow>> {
    conn.query_row(
        &format!("SELECT {FILE_COLUMNS} FROM files WHERE uri = ?1"),
        params![uri],
        file_from_row,
    )
    .optional()
}

/// Looks up the file bound to a slug.
pub fn file_by_key(conn: &Connection, key: &str) -> rusqlite::Result<Option<FileRow>> {
    conn.query_row(
        "SELECT f.id, f.uri, f.cid, f.user_id, f.created_at, f.indexed_at, f.name,
                f.description, f.blob_ref, f.mime_type, f.size
         FROM file_keys k JOIN files f ON f.id = k.file_id
         WHERE k.key = ?1",
        params![key],
        file_from_row,
    )
    .optional()
}

/// Returns the slug bound to a file, if any.
pub fn key_for_file(conn: &Connection, file_id: i64) -> rusqlite::Result<Option<String>> {
    conn.query_row(
        "SELECT key FROM file_keys WHERE file_id = ?1",
        params![file_id],
        |row| row.get(0),
    )
    .optional()
}

/// Whether a slug is currently bound to any file.
pub fn key_exists(conn: &Connection, key: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM file_keys WHERE key = ?1)",
        params![key],
        |row| row.get(0),
    )
}

/// Binds a slug to a file. Fails with a constraint violation if the slug or
/// the file is already bound.
pub fn insert_key(conn: &Connection, key: &str, file_id: i64) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO file_keys (key, file_id) VALUES (?1, ?2)",
        params![key, file_id],
    )?;
    Ok(())
}

/// Picks an `indexed_at` for a new row: the current time, bumped past the
/// newest existing value so that the ordering key stays unique.
pub fn next_indexed_at(conn: &Connection, now_ns: i64) -> rusqlite::Result<i64> {
    let newest: Option<i64> =
        conn.query_row("SELECT MAX(indexed_at) FROM files", [], |row| row.get(0))?;
    Ok(match newest {
        Some(newest) if newest >= now_ns => newest + 1,
        _ => now_ns,
    })
}

/// Inserts a new file row and returns its id.
pub fn insert_file(
    conn: &Connection,
    uri: &str,
    cid: &str,
    user_id: i64,
    created_at: &str,
    indexed_at: i64,
    fields: &FileFields<'_>,
) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO files
            (uri, cid, user_id, created_at, indexed_at, name, description, blob_ref, mime_type, size)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            uri,
            cid,
            user_id,
            created_at,
            indexed_at,
            fields.name,
            fields.description,
            fields.blob_ref,
            fields.mime_type,
            fields.size,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Overwrites the mutable fields of an existing file. Identity, owner,
/// creation time, and index time are never touched.
pub fn update_file(conn: &Connection, file_id: i64, fields: &FileFields<'_>) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE files SET name = ?2, description = ?3, blob_ref = ?4, mime_type = ?5, size = ?6
         WHERE id = ?1",
        params![
            file_id,
            fields.name,
            fields.description,
            fields.blob_ref,
            fields.mime_type,
            fields.size,
        ],
    )?;
    Ok(())
}

/// Deletes a file and its slug. Must run inside a transaction.
pub fn delete_file(conn: &Connection, file_id: i64) -> rusqlite::Result<()> {
    conn.execute("DELETE FROM file_keys WHERE file_id = ?1", params![file_id])?;
    conn.execute("DELETE FROM files WHERE id = ?1", params![file_id])?;
    Ok(())
}

/// Counts the files owned by a user.
pub fn count_files(conn: &Connection, user_id: i64) -> rusqlite::Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM files WHERE user_id = ?1",
        params![user_id],
        |row| row.get(0),
    )
}

/// Lists a user's files newest first, optionally strictly older than
/// `before` (an `indexed_at` value), at most `limit` rows.
pub fn list_files(
    conn: &Connection,
    user_id: i64,
    before: Option<i64>,
    limit: u32,
) -> rusqlite::Result<Vec<FileRow>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {FILE_COLUMNS} FROM files
         WHERE user_id = ?1 AND (?2 IS NULL OR indexed_at < ?2)
         ORDER BY indexed_at DESC
         LIMIT ?3"
    ))?;
    let rows = stmt.query_map(params![user_id, before, limit], file_from_row)?;
    let files = rows.collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(files)
}
