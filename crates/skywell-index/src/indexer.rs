//! Applies stream events to the index.
//!
//! Each file is either absent or present. Create and update commits are
//! upserts keyed by record URI, delete commits remove the file together
//! with its slug, and profile or identity signals refresh the owning user.
//! Every write runs in a single `IMMEDIATE` transaction so that a file is
//! never visible without its slug, and the slug lookup cannot interleave with
//! another writer.

use std::sync::Arc;

use rusqlite::TransactionBehavior;
use skywell_db::DbPool;
use skywell_types::{
    AtUri, Cid, Collection, CommitEvent, CommitOperation, Did, Event, FileRecord, ParseError,
    ValidatedFile,
};

use crate::error::IndexError;
use crate::identity::IdentityResolver;
use crate::slug::SlugAllocator;
use crate::store::{self, run_blocking, FileFields, ProfileFields};

/// What applying one event did to the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// A new file and its slug were inserted.
    Created {
        /// Row id of the new file.
        file_id: i64,
        /// The slug bound to it.
        slug: String,
    },
    /// An existing file's mutable fields were overwritten.
    Updated {
        /// Row id of the file.
        file_id: i64,
    },
    /// A file and its slug were removed.
    Deleted {
        /// Row id of the removed file.
        file_id: i64,
        /// The slug that was bound to it, if any.
        slug: Option<String>,
    },
    /// A delete named a file that is not indexed.
    NotPresent,
    /// A user's profile fields were refreshed.
    ProfileRefreshed,
    /// A profile refresh was skipped because the user owns no files.
    UserUnknown,
    /// The event carries nothing the index tracks.
    Ignored,
}

/// Applies events to the `users`, `files`, and `file_keys` relations.
#[derive(Clone)]
pub struct RecordIndexer {
    pool: DbPool,
    resolver: Arc<dyn IdentityResolver>,
    slugs: SlugAllocator,
}

impl std::fmt::Debug for RecordIndexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordIndexer")
            .field("slugs", &self.slugs)
            .finish_non_exhaustive()
    }
}

impl RecordIndexer {
    /// Creates an indexer writing through `pool`.
    pub fn new(pool: DbPool, resolver: Arc<dyn IdentityResolver>, slugs: SlugAllocator) -> Self {
        Self {
            pool,
            resolver,
            slugs,
        }
    }

    /// Applies a single decoded stream event.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError`] when the event is malformed, the owner cannot
    /// be resolved, or the write fails. Nothing is written in any of those
    /// cases; the caller logs and moves on to the next event.
    pub async fn handle_event(&self, event: &Event) -> Result<Outcome, IndexError> {
        match event {
            Event::Commit(commit) => self.apply_commit(commit).await,
            Event::Identity(identity) => self.update_identity(&identity.did).await,
            Event::Account(account) => {
                tracing::debug!(
                    did = %account.did,
                    active = account.active,
                    status = account.status.as_deref().unwrap_or(""),
                    "account status change ignored"
                );
                Ok(Outcome::Ignored)
            }
        }
    }

    /// Applies a repo commit.
    ///
    /// # Errors
    ///
    /// See [`RecordIndexer::handle_event`].
    pub async fn apply_commit(&self, commit: &CommitEvent) -> Result<Outcome, IndexError> {
        match Collection::from_nsid(&commit.collection) {
            Some(Collection::File) => match commit.operation {
                CommitOperation::Create | CommitOperation::Update => self.upsert_file(commit).await,
                CommitOperation::Delete => self.delete_file(&commit.uri()?).await,
            },
            Some(Collection::Profile) => match commit.operation {
                CommitOperation::Delete => Ok(Outcome::Ignored),
                CommitOperation::Create | CommitOperation::Update => {
                    self.refresh_user(&commit.did, false).await
                }
            },
            None => {
                tracing::warn!(
                    did = %commit.did,
                    collection = %commit.collection,
                    operation = commit.operation.as_str(),
                    "commit for unknown collection dropped"
                );
                Ok(Outcome::Ignored)
            }
        }
    }

    /// Inserts or updates the file named by a create or update commit.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::Parse`] or [`IndexError::Record`] for a bad
    /// payload, [`IndexError::Upstream`] if a new owner cannot be resolved,
    /// and a store error if the transaction fails.
    pub async fn upsert_file(&self, commit: &CommitEvent) -> Result<Outcome, IndexError> {
        let uri = commit.uri()?;
        let record = commit
            .record
            .as_ref()
            .ok_or(ParseError::MissingField("record"))?;
        let file = FileRecord::from_value(record)?.validate()?;
        let cid = Cid::parse(
            commit
                .cid
                .as_deref()
                .ok_or(ParseError::MissingField("cid"))?,
        )?;

        let did = commit.did.clone();
        let new_owner = self.profile_for_new_owner(&did).await?;

        let slugs = self.slugs;
        let now_ns = now_ns();
        let outcome = run_blocking(&self.pool, move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let user_id = match &new_owner {
                Some(profile) => store::insert_user(&tx, did.as_str(), profile)?,
                None => store::user_by_did(&tx, did.as_str())?
                    .map(|user| user.id)
                    .ok_or_else(|| IndexError::NotFound(format!("user {did}")))?,
            };
            let outcome = write_file(&tx, slugs, &uri, &cid, user_id, &file, now_ns)?;
            tx.commit()?;
            Ok(outcome)
        })
        .await?;

        match &outcome {
            Outcome::Created { file_id, slug } => tracing::info!(
                did = %commit.did,
                file_id,
                slug = %slug,
                name = %record_name(record),
                "file indexed"
            ),
            Outcome::Updated { file_id } => {
                tracing::info!(did = %commit.did, file_id, "file updated")
            }
            _ => {}
        }
        Ok(outcome)
    }

    /// Removes a file and its slug. Deleting a file that is not indexed is a
    /// no-op.
    ///
    /// # Errors
    ///
    /// Returns a store error if the transaction fails; nothing is removed in
    /// that case.
    pub async fn delete_file(&self, uri: &AtUri) -> Result<Outcome, IndexError> {
        let key = uri.to_string();
        let removed = run_blocking(&self.pool, move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let Some(file) = store::file_by_uri(&tx, &key)? else {
                return Ok(None);
            };
            let slug = store::key_for_file(&tx, file.id)?;
            store::delete_file(&tx, file.id)?;
            tx.commit()?;
            Ok(Some((file.id, slug)))
        })
        .await?;

        match removed {
            Some((file_id, slug)) => {
                if slug.is_none() {
                    tracing::warn!(uri = %uri, file_id, "deleted file had no slug");
                }
                tracing::info!(
                    uri = %uri,
                    file_id,
                    slug = slug.as_deref().unwrap_or(""),
                    "file deleted"
                );
                Ok(Outcome::Deleted { file_id, slug })
            }
            None => {
                tracing::warn!(uri = %uri, "delete for a file that is not indexed");
                Ok(Outcome::NotPresent)
            }
        }
    }

    /// Refreshes a user's profile fields from the resolver.
    ///
    /// Without `force`, users that own no files are left alone. With
    /// `force`, the user row is created if it is missing.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::Upstream`] if the profile cannot be fetched and
    /// a store error if the write fails.
    pub async fn refresh_user(&self, did: &Did, force: bool) -> Result<Outcome, IndexError> {
        if !force {
            let key = did.to_string();
            let known =
                run_blocking(&self.pool, move |conn| Ok(store::user_by_did(conn, &key)?.is_some()))
                    .await?;
            if !known {
                tracing::debug!(did = %did, "profile refresh skipped for unknown user");
                return Ok(Outcome::UserUnknown);
            }
        }

        let profile: ProfileFields = self
            .resolver
            .profile(did)
            .await
            .map_err(|e| IndexError::upstream(did, e))?
            .into();

        let key = did.to_string();
        let written = run_blocking(&self.pool, move |conn| {
            if force {
                store::upsert_user(conn, &key, &profile)?;
                Ok(true)
            } else {
                Ok(store::update_user_profile(conn, &key, &profile)?)
            }
        })
        .await?;

        if written {
            tracing::info!(did = %did, force, "user profile refreshed");
            Ok(Outcome::ProfileRefreshed)
        } else {
            Ok(Outcome::UserUnknown)
        }
    }

    /// Handles an identity change: drops the cached identity, then refreshes
    /// the user if one exists.
    ///
    /// # Errors
    ///
    /// See [`RecordIndexer::refresh_user`].
    pub async fn update_identity(&self, did: &Did) -> Result<Outcome, IndexError> {
        self.resolver.purge(did).await;
        self.refresh_user(did, false).await
    }

    /// Creates the user if missing and refreshes its profile unconditionally.
    ///
    /// # Errors
    ///
    /// See [`RecordIndexer::refresh_user`].
    pub async fn index_actor_profile(&self, did: &Did) -> Result<Outcome, IndexError> {
        self.refresh_user(did, true).await
    }

    /// Returns the profile to create the owner with, or `None` if the owner
    /// is already indexed.
    async fn profile_for_new_owner(&self, did: &Did) -> Result<Option<ProfileFields>, IndexError> {
        let key = did.to_string();
        let known =
            run_blocking(&self.pool, move |conn| Ok(store::user_by_did(conn, &key)?.is_some()))
                .await?;
        if known {
            return Ok(None);
        }

        tracing::debug!(did = %did, "first file from user, fetching profile");
        let profile = self
            .resolver
            .profile(did)
            .await
            .map_err(|e| IndexError::upstream(did, e))?;
        Ok(Some(profile.into()))
    }
}

/// Upserts a validated file inside an open transaction.
fn write_file(
    conn: &rusqlite::Connection,
    slugs: SlugAllocator,
    uri: &AtUri,
    cid: &Cid,
    user_id: i64,
    file: &ValidatedFile,
    now_ns: i64,
) -> Result<Outcome, IndexError> {
    let uri = uri.to_string();
    let fields = FileFields {
        name: &file.name,
        description: &file.description,
        blob_ref: file.blob_ref.as_str(),
        mime_type: &file.mime_type,
        size: file.size,
    };

    match store::file_by_uri(conn, &uri)? {
        Some(existing) => {
            store::update_file(conn, existing.id, &fields)?;
            if store::key_for_file(conn, existing.id)?.is_none() {
                let slug = slugs.assign(conn, existing.id, fields.blob_ref, &uri)?;
                tracing::warn!(uri = %uri, file_id = existing.id, slug = %slug, "re-bound missing slug");
            }
            Ok(Outcome::Updated {
                file_id: existing.id,
            })
        }
        None => {
            let indexed_at = store::next_indexed_at(conn, now_ns)?;
            let file_id = store::insert_file(
                conn,
                &uri,
                cid.as_str(),
                user_id,
                &file.created_at,
                indexed_at,
                &fields,
            )?;
            let slug = slugs.assign(conn, file_id, fields.blob_ref, &uri)?;
            Ok(Outcome::Created { file_id, slug })
        }
    }
}

fn record_name(record: &serde_json::Value) -> &str {
    record
        .get("name")
        .and_then(serde_json::Value::as_str)
        .unwrap_or_default()
}

fn now_ns() -> i64 {
    chrono::Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX)
}
