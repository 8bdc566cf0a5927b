//! Deterministic short-key allocation for files.
//!
//! A slug is a prefix of `base64url(sha256(blob_ref ++ uri))`. The blob CID
//! goes first: blob contents are nearly always distinct while URIs from the
//! same author share most of their bytes.
//!
//! Collisions are resolved by appending a decimal counter to the prefix
//! (`Ab3f9K`, `Ab3f9K1`, `Ab3f9K2`, ...). After `max_attempts` candidates on
//! one prefix the prefix grows by one character and the counter restarts,
//! which bounds the work per prefix without ever giving up while digest
//! characters remain.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use rusqlite::{Connection, ErrorCode};
use sha2::{Digest, Sha256};

use crate::error::IndexError;
use crate::store;

/// Default slug length.
pub const SLUG_LENGTH: usize = 6;

/// Default number of candidates tried on a single prefix.
pub const MAX_SLUG_ATTEMPTS: u32 = 100;

/// How many times a lost insert race is retried before the event is dropped.
const MAX_INSERT_RETRIES: u32 = 8;

/// Allocates and binds slugs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlugAllocator {
    length: usize,
    max_attempts: u32,
}

impl Default for SlugAllocator {
    fn default() -> Self {
        Self::new(SLUG_LENGTH, MAX_SLUG_ATTEMPTS)
    }
}

impl SlugAllocator {
    /// Creates an allocator producing `length`-character base slugs and
    /// trying at most `max_attempts` candidates per prefix length.
    pub fn new(length: usize, max_attempts: u32) -> Self {
        Self {
            length: length.max(1),
            max_attempts: max_attempts.max(1),
        }
    }

    /// The URL-safe digest slugs are cut from.
    pub fn digest(blob_ref: &str, uri: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(blob_ref.as_bytes());
        hasher.update(uri.as_bytes());
        URL_SAFE_NO_PAD.encode(hasher.finalize())
    }

    /// Candidate keys for a digest, in the order they are tried.
    pub fn candidates<'a>(&self, digest: &'a str) -> impl Iterator<Item = String> + 'a {
        let start = self.length.min(digest.len());
        let max_attempts = self.max_attempts;
        (start..=digest.len()).flat_map(move |len| {
            let prefix = &digest[..len];
            (0..max_attempts).map(move |counter| {
                if counter == 0 {
                    prefix.to_string()
                } else {
                    format!("{prefix}{counter}")
                }
            })
        })
    }

    /// Returns the first candidate not currently bound to any file.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::Store`] if a lookup fails, or
    /// [`IndexError::SlugExhausted`] if every candidate is taken.
    pub fn allocate(&self, conn: &Connection, digest: &str) -> Result<String, IndexError> {
        for candidate in self.candidates(digest) {
            if !store::key_exists(conn, &candidate)? {
                return Ok(candidate);
            }
            tracing::debug!(slug = %candidate, "slug taken, probing next candidate");
        }
        Err(IndexError::SlugExhausted(digest.to_string()))
    }

    /// Allocates a slug for `file_id` and binds it.
    ///
    /// The lookup and the insert are not atomic on their own; the unique
    /// constraint on `file_keys.key` catches a concurrent writer that took
    /// the same candidate, and the allocation is retried.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::Store`] on any failure other than a lost race,
    /// and [`IndexError::SlugExhausted`] if no candidate is free or the race
    /// keeps being lost.
    pub fn assign(
        &self,
        conn: &Connection,
        file_id: i64,
        blob_ref: &str,
        uri: &str,
    ) -> Result<String, IndexError> {
        self.assign_from_digest(conn, file_id, &Self::digest(blob_ref, uri))
    }

    /// [`SlugAllocator::assign`] with a precomputed digest.
    ///
    /// # Errors
    ///
    /// See [`SlugAllocator::assign`].
    pub fn assign_from_digest(
        &self,
        conn: &Connection,
        file_id: i64,
        digest: &str,
    ) -> Result<String, IndexError> {
        self.assign_with(conn, file_id, digest, |conn, digest| self.allocate(conn, digest))
    }

    /// Binds the slugs `propose` returns until one insert sticks.
    pub(crate) fn assign_with(
        &self,
        conn: &Connection,
        file_id: i64,
        digest: &str,
        mut propose: impl FnMut(&Connection, &str) -> Result<String, IndexError>,
    ) -> Result<String, IndexError> {
        for _ in 0..MAX_INSERT_RETRIES {
            let slug = propose(conn, digest)?;
            match store::insert_key(conn, &slug, file_id) {
                Ok(()) => return Ok(slug),
                Err(rusqlite::Error::SqliteFailure(err, msg))
                    if err.code == ErrorCode::ConstraintViolation =>
                {
                    // The file may already carry a key; that one stands.
                    if let Some(existing) = store::key_for_file(conn, file_id)? {
                        return Ok(existing);
                    }
                    if !store::key_exists(conn, &slug)? {
                        return Err(rusqlite::Error::SqliteFailure(err, msg).into());
                    }
                    tracing::warn!(slug = %slug, file_id, "slug taken concurrently, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(IndexError::SlugExhausted(digest.to_string()))
    }
}
