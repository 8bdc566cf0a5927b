//! Jetstream event model.
//!
//! Jetstream frames are JSON objects with a `kind` discriminator and a
//! kind-specific body under a key of the same name:
//!
//! ```json
//! {"did":"did:plc:abc","time_us":1725911162329308,"kind":"commit",
//!  "commit":{"rev":"3l3qo2vutsw2b","operation":"create",
//!            "collection":"dev.skywell.file","rkey":"3l3qo2vuowo2b",
//!            "record":{...},"cid":"bafyrei..."}}
//! ```
//!
//! Frames are decoded into the [`Event`] enum so that dispatch is an
//! exhaustive `match` rather than string comparison.

use serde::Deserialize;
use thiserror::Error;

use crate::ident::{AtUri, Did, ParseError};

/// Errors produced while decoding a Jetstream frame.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The frame is not valid JSON or does not match the envelope shape.
    #[error("malformed event frame: {0}")]
    Json(#[from] serde_json::Error),
    /// The envelope names a kind but the matching body is absent.
    #[error("event of kind {0} has no {0} body")]
    MissingBody(&'static str),
    /// The envelope carries an invalid identifier.
    #[error("invalid identifier in event: {0}")]
    Identifier(#[from] ParseError),
}

/// A decoded stream event, one variant per kind.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// The account's identity (handle or DID document) changed.
    Identity(IdentityEvent),
    /// The account's hosting status changed (active, takendown, ...).
    Account(AccountEvent),
    /// A record was created, updated, or deleted in the account's repo.
    Commit(CommitEvent),
}

impl Event {
    /// Decodes a single JSON frame.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError`] if the frame is malformed, if the body for the
    /// declared kind is missing, or if the DID is invalid.
    pub fn decode(frame: &str) -> Result<Self, DecodeError> {
        let raw: RawEvent = serde_json::from_str(frame)?;
        let did = Did::parse(&raw.did)?;

        match raw.kind {
            RawKind::Identity => {
                let body = raw.identity.ok_or(DecodeError::MissingBody("identity"))?;
                Ok(Self::Identity(IdentityEvent {
                    did,
                    time_us: raw.time_us,
                    handle: body.handle,
                    seq: body.seq,
                }))
            }
            RawKind::Account => {
                let body = raw.account.ok_or(DecodeError::MissingBody("account"))?;
                Ok(Self::Account(AccountEvent {
                    did,
                    time_us: raw.time_us,
                    active: body.active,
                    status: body.status,
                    seq: body.seq,
                }))
            }
            RawKind::Commit => {
                let body = raw.commit.ok_or(DecodeError::MissingBody("commit"))?;
                Ok(Self::Commit(CommitEvent {
                    did,
                    time_us: raw.time_us,
                    rev: body.rev,
                    operation: body.operation,
                    collection: body.collection,
                    rkey: body.rkey,
                    record: body.record,
                    cid: body.cid,
                }))
            }
        }
    }

    /// The DID the event is about.
    pub fn did(&self) -> &Did {
        match self {
            Self::Identity(e) => &e.did,
            Self::Account(e) => &e.did,
            Self::Commit(e) => &e.did,
        }
    }

    /// Short label for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Identity(_) => "identity",
            Self::Account(_) => "account",
            Self::Commit(_) => "commit",
        }
    }
}

/// Body of an identity-change event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityEvent {
    /// Account whose identity changed.
    pub did: Did,
    /// Relay timestamp in microseconds.
    pub time_us: i64,
    /// The new handle, when the relay included it.
    pub handle: Option<String>,
    /// Upstream sequence number.
    pub seq: Option<i64>,
}

/// Body of an account-status-change event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountEvent {
    /// Account whose status changed.
    pub did: Did,
    /// Relay timestamp in microseconds.
    pub time_us: i64,
    /// Whether the account is active.
    pub active: bool,
    /// Reason for inactivity (`takendown`, `suspended`, ...).
    pub status: Option<String>,
    /// Upstream sequence number.
    pub seq: Option<i64>,
}

/// Operation carried by a commit event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommitOperation {
    /// A new record.
    Create,
    /// A replacement of an existing record.
    Update,
    /// A removal.
    Delete,
}

impl CommitOperation {
    /// Returns the wire label for this operation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

/// Body of a repo-commit event.
#[derive(Debug, Clone, PartialEq)]
pub struct CommitEvent {
    /// Repository owner.
    pub did: Did,
    /// Relay timestamp in microseconds.
    pub time_us: i64,
    /// Repo revision.
    pub rev: String,
    /// What happened to the record.
    pub operation: CommitOperation,
    /// Collection NSID of the record.
    pub collection: String,
    /// Record key within the collection.
    pub rkey: String,
    /// Opaque record JSON; absent for deletes.
    pub record: Option<serde_json::Value>,
    /// CID of the new record version; absent for deletes.
    pub cid: Option<String>,
}

impl CommitEvent {
    /// Builds the `at://` URI of the record this commit touches.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError`] if the collection or record key is malformed.
    pub fn uri(&self) -> Result<AtUri, ParseError> {
        AtUri::new(self.did.clone(), &self.collection, &self.rkey)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum RawKind {
    Identity,
    Account,
    Commit,
}

#[derive(Debug, Deserialize)]
struct RawEvent {
    did: String,
    #[serde(default)]
    time_us: i64,
    kind: RawKind,
    #[serde(default)]
    identity: Option<RawIdentity>,
    #[serde(default)]
    account: Option<RawAccount>,
    #[serde(default)]
    commit: Option<RawCommit>,
}

#[derive(Debug, Deserialize)]
struct RawIdentity {
    #[serde(default)]
    handle: Option<String>,
    #[serde(default)]
    seq: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct RawAccount {
    #[serde(default)]
    active: bool,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    seq: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct RawCommit {
    #[serde(default)]
    rev: String,
    operation: CommitOperation,
    collection: String,
    rkey: String,
    #[serde(default)]
    record: Option<serde_json::Value>,
    #[serde(default)]
    cid: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_commit() {
        let frame = r#"{
            "did": "did:plc:abc",
            "time_us": 1725911162329308,
            "kind": "commit",
            "commit": {
                "rev": "3l3qo2vutsw2b",
                "operation": "create",
                "collection": "dev.skywell.file",
                "rkey": "xyz",
                "record": {"name": "a.pdf"},
                "cid": "bafyreib2rxk3rybk3aobmv5cjuql3bm2twh4jo5uxgf5fpqutb5axz7ey4"
            }
        }"#;

        let event = Event::decode(frame).unwrap();
        assert_eq!(event.kind(), "commit");
        let Event::Commit(commit) = event else {
            panic!("expected commit event");
        };
        assert_eq!(commit.operation, CommitOperation::Create);
        assert_eq!(commit.collection, "dev.skywell.file");
        assert_eq!(
            commit.uri().unwrap().to_string(),
            "at://did:plc:abc/dev.skywell.file/xyz"
        );
        assert_eq!(commit.record.unwrap()["name"], "a.pdf");
    }

    #[test]
    fn decodes_delete_without_record() {
        let frame = r#"{"did":"did:plc:abc","time_us":1,"kind":"commit",
            "commit":{"rev":"r","operation":"delete","collection":"dev.skywell.file","rkey":"xyz"}}"#;
        let Event::Commit(commit) = Event::decode(frame).unwrap() else {
            panic!("expected commit event");
        };
        assert_eq!(commit.operation, CommitOperation::Delete);
        assert!(commit.record.is_none());
        assert!(commit.cid.is_none());
    }

    #[test]
    fn decodes_identity_and_account() {
        let identity = r#"{"did":"did:plc:abc","time_us":2,"kind":"identity",
            "identity":{"did":"did:plc:abc","handle":"alice.test","seq":9,"time":"2024-01-01T00:00:00Z"}}"#;
        match Event::decode(identity).unwrap() {
            Event::Identity(e) => assert_eq!(e.handle.as_deref(), Some("alice.test")),
            other => panic!("unexpected event: {other:?}"),
        }

        let account = r#"{"did":"did:plc:abc","time_us":3,"kind":"account",
            "account":{"active":false,"did":"did:plc:abc","seq":10,"status":"takendown","time":"2024-01-01T00:00:00Z"}}"#;
        match Event::decode(account).unwrap() {
            Event::Account(e) => {
                assert!(!e.active);
                assert_eq!(e.status.as_deref(), Some("takendown"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn rejects_malformed_frames() {
        assert!(matches!(Event::decode("not json"), Err(DecodeError::Json(_))));
        assert!(matches!(
            Event::decode(r#"{"did":"did:plc:abc","kind":"nonsense"}"#),
            Err(DecodeError::Json(_))
        ));
        assert!(matches!(
            Event::decode(r#"{"did":"did:plc:abc","kind":"commit"}"#),
            Err(DecodeError::MissingBody("commit"))
        ));
        assert!(matches!(
            Event::decode(r#"{"did":"bogus","kind":"identity","identity":{}}"#),
            Err(DecodeError::Identifier(_))
        ));
        assert!(matches!(
            Event::decode(
                r#"{"did":"did:plc:abc","kind":"commit","commit":{"operation":"patch","collection":"a.b.c","rkey":"k"}}"#
            ),
            Err(DecodeError::Json(_))
        ));
    }
}
