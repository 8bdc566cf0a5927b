//! Read-side views over the index.

use std::sync::Arc;

use skywell_db::DbPool;
use skywell_types::{ActorFilesOutput, Blob, Did, FileFromSlugOutput, FileView, ProfileView};

use crate::error::IndexError;
use crate::identity::{IdentityError, IdentityResolver};
use crate::store::{self, run_blocking, FileRow, UserRow};

/// Page size used when the caller gives none.
pub const DEFAULT_PAGE_SIZE: u32 = 50;

/// Largest accepted page size.
pub const MAX_PAGE_SIZE: u32 = 100;

/// One page of a user's files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePage {
    /// `indexed_at` of the last row, or `None` at end of list.
    pub cursor: Option<String>,
    /// Files in descending `indexed_at` order.
    pub files: Vec<FileView>,
}

/// Parses a pagination cursor. An empty string means "first page".
///
/// # Errors
///
/// Returns [`IndexError::Validation`] if the cursor is not an integer.
pub fn parse_cursor(cursor: Option<&str>) -> Result<Option<i64>, IndexError> {
    match cursor {
        None | Some("") => Ok(None),
        Some(raw) => raw
            .parse::<i64>()
            .map(Some)
            .map_err(|_| IndexError::Validation(format!("invalid cursor {raw:?}"))),
    }
}

/// Parses a page size, applying the default when absent.
///
/// # Errors
///
/// Returns [`IndexError::Validation`] unless the value is an integer in
/// `1..=MAX_PAGE_SIZE`.
pub fn parse_limit(limit: Option<&str>) -> Result<u32, IndexError> {
    let Some(raw) = limit else {
        return Ok(DEFAULT_PAGE_SIZE);
    };
    match raw.parse::<u32>() {
        Ok(n) if (1..=MAX_PAGE_SIZE).contains(&n) => Ok(n),
        _ => Err(IndexError::Validation(format!(
            "limit must be an integer between 1 and {MAX_PAGE_SIZE}, got {raw:?}"
        ))),
    }
}

/// Builds the wire view of a file row.
pub fn file_view(file: &FileRow, slug: Option<String>) -> FileView {
    FileView {
        uri: file.uri.clone(),
        cid: file.cid.clone(),
        blob: Blob::new(&file.blob_ref, &file.mime_type, file.size),
        created_at: file.created_at.clone(),
        name: file.name.clone(),
        description: non_empty(&file.description),
        slug,
    }
}

fn profile_view(handle: String, user: &UserRow, file_count: i64) -> ProfileView {
    ProfileView {
        did: user.did.clone(),
        handle,
        display_name: non_empty(&user.display_name),
        avatar: non_empty(&user.avatar),
        file_count: Some(file_count),
    }
}

fn non_empty(s: &str) -> Option<String> {
    (!s.is_empty()).then(|| s.to_string())
}

/// Assembles profile and file views for the query endpoints.
#[derive(Clone)]
pub struct ViewMaterializer {
    pool: DbPool,
    resolver: Arc<dyn IdentityResolver>,
}

impl std::fmt::Debug for ViewMaterializer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ViewMaterializer").finish_non_exhaustive()
    }
}

impl ViewMaterializer {
    /// Creates a materializer reading through `pool`.
    pub fn new(pool: DbPool, resolver: Arc<dyn IdentityResolver>) -> Self {
        Self { pool, resolver }
    }

    /// The profile of an indexed user, with a fresh handle and file count.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::NotFound`] if the DID is unknown to the
    /// resolver or has no user row, and [`IndexError::Upstream`] if the
    /// resolver fails otherwise.
    pub async fn profile_view(&self, did: &Did) -> Result<ProfileView, IndexError> {
        let identity = match self.resolver.lookup(did).await {
            Ok(identity) => identity,
            Err(IdentityError::NotFound(_)) => {
                return Err(IndexError::NotFound(format!("actor {did}")));
            }
            Err(e) => {
                tracing::error!(did = %did, error = %e, "identity lookup failed");
                return Err(IndexError::upstream(did, e));
            }
        };

        let key = identity.did.to_string();
        let (user, count) = run_blocking(&self.pool, move |conn| {
            let user = store::user_by_did(conn, &key)?
                .ok_or_else(|| IndexError::NotFound(format!("actor {key}")))?;
            let count = store::count_files(conn, user.id)?;
            Ok((user, count))
        })
        .await?;

        Ok(profile_view(identity.handle, &user, count))
    }

    /// Resolves a slug to its file and owner.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::NotFound`] if no file carries the slug.
    pub async fn file_from_slug(&self, slug: &str) -> Result<FileFromSlugOutput, IndexError> {
        let key = slug.to_string();
        let (file, owner) = run_blocking(&self.pool, move |conn| {
            let file = store::file_by_key(conn, &key)?
                .ok_or_else(|| IndexError::NotFound(format!("slug {key}")))?;
            let owner = store::user_by_id(conn, file.user_id)?
                .ok_or_else(|| IndexError::NotFound(format!("owner of {}", file.uri)))?;
            Ok((file, owner))
        })
        .await?;

        let did = Did::parse(&owner.did)?;
        let actor = self.profile_view(&did).await?;
        tracing::debug!(slug, file_id = file.id, did = %did, "resolved slug");

        Ok(FileFromSlugOutput {
            cid: file.cid.clone(),
            uri: file.uri.clone(),
            file: file_view(&file, Some(slug.to_string())),
            actor,
        })
    }

    /// One page of a user's files, newest first, strictly older than
    /// `before` when given.
    ///
    /// Files without a slug are logged and left out of the page; the cursor
    /// still advances past them.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::NotFound`] if the user is not indexed.
    pub async fn file_list(
        &self,
        did: &Did,
        before: Option<i64>,
        limit: u32,
    ) -> Result<FilePage, IndexError> {
        let key = did.to_string();
        let rows = run_blocking(&self.pool, move |conn| {
            let user = store::user_by_did(conn, &key)?
                .ok_or_else(|| IndexError::NotFound(format!("actor {key}")))?;
            let files = store::list_files(conn, user.id, before, limit)?;
            let mut rows = Vec::with_capacity(files.len());
            for file in files {
                let slug = store::key_for_file(conn, file.id)?;
                rows.push((file, slug));
            }
            Ok(rows)
        })
        .await?;

        let cursor = match rows.last() {
            Some((last, _)) if rows.len() >= limit as usize => Some(last.indexed_at.to_string()),
            _ => None,
        };

        let files = rows
            .iter()
            .filter_map(|(file, slug)| match slug {
                Some(slug) => Some(file_view(file, Some(slug.clone()))),
                None => {
                    tracing::warn!(file_id = file.id, uri = %file.uri, "file has no slug, skipping");
                    None
                }
            })
            .collect();

        Ok(FilePage { cursor, files })
    }

    /// The authenticated owner's profile and one page of files.
    ///
    /// Parameters are checked before anything is read.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::Validation`] for a bad cursor or limit and
    /// [`IndexError::NotFound`] if the user is not indexed.
    pub async fn actor_files(
        &self,
        did: &Did,
        cursor: Option<&str>,
        limit: Option<&str>,
    ) -> Result<ActorFilesOutput, IndexError> {
        let before = parse_cursor(cursor)?;
        let limit = parse_limit(limit)?;

        let actor = self.profile_view(did).await?;
        let page = self.file_list(did, before, limit).await?;

        Ok(ActorFilesOutput {
            actor,
            cursor: page.cursor,
            files: page.files,
        })
    }
}
