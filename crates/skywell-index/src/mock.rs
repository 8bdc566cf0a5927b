//! In-memory [`IdentityResolver`] implementations for tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use skywell_types::Did;

use crate::identity::{Identity, IdentityError, IdentityResolver, Profile};

/// A resolver answering from a fixed table of profiles.
///
/// Unknown DIDs fail with [`IdentityError::NotFound`]. Call counters and the
/// purge log let tests check which upstream paths ran.
#[derive(Debug, Default)]
pub struct StaticIdentityResolver {
    profiles: Mutex<HashMap<String, Profile>>,
    signing_keys: Mutex<HashMap<String, String>>,
    purged: Mutex<Vec<String>>,
    lookups: AtomicUsize,
    profile_calls: AtomicUsize,
}

impl StaticIdentityResolver {
    /// An empty resolver.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a profile; the display name falls back to the handle.
    pub fn with_profile(self, did: &str, handle: &str, display_name: Option<&str>) -> Self {
        self.set_profile(
            did,
            Profile {
                handle: handle.to_string(),
                display_name: display_name.unwrap_or(handle).to_string(),
                avatar: None,
            },
        );
        self
    }

    /// Publishes a `#atproto` key (multibase) in the DID's identity.
    pub fn with_signing_key(self, did: &str, multibase: &str) -> Self {
        self.signing_keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(did.to_string(), multibase.to_string());
        self
    }

    /// Inserts or replaces the profile for `did`.
    pub fn set_profile(&self, did: &str, profile: Profile) {
        self.profiles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(did.to_string(), profile);
    }

    /// Number of [`IdentityResolver::lookup`] calls so far.
    pub fn lookup_count(&self) -> usize {
        self.lookups.load(Ordering::Relaxed)
    }

    /// Number of [`IdentityResolver::profile`] calls so far.
    pub fn profile_count(&self) -> usize {
        self.profile_calls.load(Ordering::Relaxed)
    }

    /// DIDs passed to [`IdentityResolver::purge`], in call order.
    pub fn purged(&self) -> Vec<String> {
        self.purged
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn get(&self, did: &Did) -> Result<Profile, IdentityError> {
        self.profiles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(did.as_str())
            .cloned()
            .ok_or_else(|| IdentityError::NotFound(did.to_string()))
    }
}

#[async_trait]
impl IdentityResolver for StaticIdentityResolver {
    async fn lookup(&self, did: &Did) -> Result<Identity, IdentityError> {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        let profile = self.get(did)?;
        let signing_key = self
            .signing_keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(did.as_str())
            .cloned();
        Ok(Identity {
            did: did.clone(),
            handle: profile.handle,
            signing_key,
        })
    }

    async fn purge(&self, did: &Did) {
        self.purged
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(did.to_string());
    }

    async fn profile(&self, did: &Did) -> Result<Profile, IdentityError> {
        self.profile_calls.fetch_add(1, Ordering::Relaxed);
        self.get(did)
    }
}

/// A resolver whose every lookup fails.
#[derive(Debug, Default)]
pub struct FailingIdentityResolver;

#[async_trait]
impl IdentityResolver for FailingIdentityResolver {
    async fn lookup(&self, did: &Did) -> Result<Identity, IdentityError> {
        Err(IdentityError::InvalidDocument(format!("mock failure for {did}")))
    }

    async fn purge(&self, _did: &Did) {}

    async fn profile(&self, did: &Did) -> Result<Profile, IdentityError> {
        Err(IdentityError::InvalidDocument(format!("mock failure for {did}")))
    }
}
