//! The indexing pipeline and query materialization for the Skywell AppView.
//!
//! [`RecordIndexer`] applies Jetstream events to the SQLite projection,
//! binding every new file to a short slug from [`SlugAllocator`].
//! [`ViewMaterializer`] reads the projection back out as the profile and
//! file views served by the XRPC endpoints. Both reach account data only
//! through the [`IdentityResolver`] trait.
//!
//! Store access is synchronous `rusqlite` wrapped in
//! `tokio::task::spawn_blocking`; see [`store::run_blocking`].

pub mod error;
pub mod identity;
pub mod indexer;
pub mod mock;
pub mod slug;
pub mod store;
pub mod views;

pub use error::IndexError;
pub use identity::{
    HttpIdentityResolver, Identity, IdentityError, IdentityResolver, Profile, ResolverSettings,
};
pub use indexer::{Outcome, RecordIndexer};
pub use slug::SlugAllocator;
pub use views::{FilePage, ViewMaterializer};
