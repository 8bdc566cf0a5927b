//! AT Protocol identifier newtypes.
//!
//! Parsing is syntactic only: a [`Did`] that parses may still fail to resolve.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum length of a DID accepted by the network.
const MAX_DID_LEN: usize = 2048;

/// Maximum length of a record key.
const MAX_RKEY_LEN: usize = 512;

/// Errors produced when an identifier or payload fails syntactic validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// The string is not a syntactically valid DID.
    #[error("invalid DID: {0:?}")]
    InvalidDid(String),
    /// The string is not a syntactically valid `at://` URI.
    #[error("invalid AT URI: {0:?}")]
    InvalidUri(String),
    /// The string is not a syntactically valid CID.
    #[error("invalid CID: {0:?}")]
    InvalidCid(String),
    /// The string is not a syntactically valid record key.
    #[error("invalid record key: {0:?}")]
    InvalidRecordKey(String),
    /// The author-supplied `createdAt` is not an RFC 3339 datetime.
    #[error("invalid datetime: {0:?}")]
    InvalidDatetime(String),
    /// A required record field is absent.
    #[error("missing required field: {0}")]
    MissingField(&'static str),
}

/// A decentralized identifier, e.g. `did:plc:ewvi7nxzyoun6zhxrhs64oiz`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Did(String);

impl Did {
    /// Parses and validates a DID string.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::InvalidDid`] if the method is not lowercase ASCII
    /// letters or the method-specific identifier contains disallowed bytes.
    pub fn parse(s: &str) -> Result<Self, ParseError> {
        let invalid = || ParseError::InvalidDid(s.to_string());

        if s.len() > MAX_DID_LEN {
            return Err(invalid());
        }
        let rest = s.strip_prefix("did:").ok_or_else(invalid)?;
        let (method, id) = rest.split_once(':').ok_or_else(invalid)?;

        if method.is_empty() || !method.bytes().all(|b| b.is_ascii_lowercase()) {
            return Err(invalid());
        }
        if id.is_empty()
            || id.ends_with(':')
            || id.ends_with('%')
            || !id
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b':' | b'%' | b'-'))
        {
            return Err(invalid());
        }

        Ok(Self(s.to_string()))
    }

    /// Returns the DID method (`plc`, `web`, ...).
    pub fn method(&self) -> &str {
        self.0[4..].split(':').next().unwrap_or_default()
    }

    /// Returns the method-specific identifier.
    pub fn identifier(&self) -> &str {
        self.0[4..].split_once(':').map(|(_, id)| id).unwrap_or_default()
    }

    /// Returns the DID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Did {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for Did {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Did {
    type Error = ParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<Did> for String {
    fn from(did: Did) -> Self {
        did.0
    }
}

/// A content identifier in its string (multibase) form.
///
/// Only CIDv1 in base32 (`b...`) and CIDv0 (`Qm...`) string forms are
/// accepted, which covers everything the network emits for records and blobs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Cid(String);

impl Cid {
    /// Parses a CID string.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::InvalidCid`] if the string is not a plausible
    /// base32 CIDv1 or base58 CIDv0.
    pub fn parse(s: &str) -> Result<Self, ParseError> {
        let valid = if let Some(body) = s.strip_prefix('b') {
            body.len() >= 8
                && body
                    .bytes()
                    .all(|b| b.is_ascii_lowercase() || (b'2'..=b'7').contains(&b))
        } else if s.starts_with("Qm") {
            s.len() == 46 && s.bytes().all(|b| b.is_ascii_alphanumeric() && !matches!(b, b'0' | b'O' | b'I' | b'l'))
        } else {
            false
        };

        if valid {
            Ok(Self(s.to_string()))
        } else {
            Err(ParseError::InvalidCid(s.to_string()))
        }
    }

    /// Returns the CID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Cid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Cid {
    type Error = ParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<Cid> for String {
    fn from(cid: Cid) -> Self {
        cid.0
    }
}

/// An `at://<did>/<collection>/<rkey>` record URI.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AtUri {
    did: Did,
    collection: String,
    rkey: String,
}

impl AtUri {
    /// Builds a record URI from its parts, validating the collection and key.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::InvalidUri`] for a malformed collection NSID and
    /// [`ParseError::InvalidRecordKey`] for a malformed record key.
    pub fn new(did: Did, collection: &str, rkey: &str) -> Result<Self, ParseError> {
        if !is_valid_nsid(collection) {
            return Err(ParseError::InvalidUri(format!("at://{did}/{collection}/{rkey}")));
        }
        if !is_valid_rkey(rkey) {
            return Err(ParseError::InvalidRecordKey(rkey.to_string()));
        }
        Ok(Self {
            did,
            collection: collection.to_string(),
            rkey: rkey.to_string(),
        })
    }

    /// Parses a full `at://` record URI. Handle authorities are rejected; the
    /// index only ever stores DID-authority URIs.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::InvalidUri`] if the string is not of the form
    /// `at://<did>/<collection>/<rkey>`.
    pub fn parse(s: &str) -> Result<Self, ParseError> {
        let invalid = || ParseError::InvalidUri(s.to_string());
        let rest = s.strip_prefix("at://").ok_or_else(invalid)?;
        let mut parts = rest.splitn(3, '/');
        let authority = parts.next().ok_or_else(invalid)?;
        let collection = parts.next().ok_or_else(invalid)?;
        let rkey = parts.next().ok_or_else(invalid)?;
        let did = Did::parse(authority).map_err(|_| invalid())?;
        Self::new(did, collection, rkey).map_err(|_| invalid())
    }

    /// The repository owner.
    pub fn did(&self) -> &Did {
        &self.did
    }

    /// The collection NSID.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// The record key.
    pub fn rkey(&self) -> &str {
        &self.rkey
    }
}

impl std::fmt::Display for AtUri {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "at://{}/{}/{}", self.did, self.collection, self.rkey)
    }
}

impl std::str::FromStr for AtUri {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn is_valid_nsid(s: &str) -> bool {
    let segments: Vec<&str> = s.split('.').collect();
    segments.len() >= 3
        && s.len() <= 317
        && segments.iter().all(|seg| {
            !seg.is_empty()
                && seg.len() <= 63
                && seg.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
        })
}

fn is_valid_rkey(s: &str) -> bool {
    !s.is_empty()
        && s.len() <= MAX_RKEY_LEN
        && s != "."
        && s != ".."
        && s
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'-' | b'_' | b':' | b'~'))
}
