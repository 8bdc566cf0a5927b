//! Shared types for the Skywell AppView.
//!
//! This crate holds everything that crosses a crate boundary: the AT Protocol
//! identifier newtypes ([`Did`], [`AtUri`], [`Cid`]), the Jetstream event
//! model consumed by the indexer, the `dev.skywell.file` record schema, and
//! the view types returned by the XRPC query endpoints.
//!
//! No crate in the workspace depends on anything *except* `skywell-types` for
//! cross-cutting type definitions.

mod event;
mod ident;
mod record;
mod view;

pub use event::{
    AccountEvent, CommitEvent, CommitOperation, DecodeError, Event, IdentityEvent,
};
pub use ident::{AtUri, Cid, Did, ParseError};
pub use record::{Blob, CidLink, FileRecord, ValidatedFile};
pub use view::{ActorFilesOutput, FileFromSlugOutput, FileView, ProfileView};

/// Collection NSID of Skywell file records.
pub const FILE_COLLECTION: &str = "dev.skywell.file";

/// Collection NSID of Bluesky profile records; commits here refresh a user.
pub const PROFILE_COLLECTION: &str = "app.bsky.actor.profile";

/// Collections the indexer understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collection {
    /// `dev.skywell.file`
    File,
    /// `app.bsky.actor.profile`
    Profile,
}

impl Collection {
    /// Maps an NSID to a known collection, or `None` for anything else.
    pub fn from_nsid(nsid: &str) -> Option<Self> {
        match nsid {
            FILE_COLLECTION => Some(Self::File),
            PROFILE_COLLECTION => Some(Self::Profile),
            _ => None,
        }
    }

    /// Returns the NSID for this collection.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::File => FILE_COLLECTION,
            Self::Profile => PROFILE_COLLECTION,
        }
    }
}
