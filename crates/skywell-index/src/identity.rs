//! DID to handle and profile resolution.
//!
//! The indexer and the view layer only see the [`IdentityResolver`] trait.
//! [`HttpIdentityResolver`] is the production implementation: it resolves
//! DID documents from the PLC directory (or `/.well-known/did.json` for
//! `did:web`), keeps the result in a TTL cache, and fetches profile records
//! from the public Bluesky AppView.

use std::time::Duration;

use async_trait::async_trait;
use moka::future::Cache;
use serde::Deserialize;
use skywell_types::Did;

use crate::store::ProfileFields;

/// Handle reported when a DID document carries no `at://` alias.
pub const INVALID_HANDLE: &str = "handle.invalid";

/// Errors from identity or profile resolution.
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    /// The upstream request failed or returned a non-success status.
    #[error("identity request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The upstream has no record of the DID.
    #[error("{0} not found")]
    NotFound(String),

    /// The upstream answered with something that is not a usable document.
    #[error("invalid identity document: {0}")]
    InvalidDocument(String),

    /// The DID uses a method this resolver cannot resolve.
    #[error("unsupported DID method: {0}")]
    UnsupportedMethod(String),
}

/// A resolved identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// The DID that was resolved.
    pub did: Did,
    /// Primary handle from the DID document, or [`INVALID_HANDLE`].
    pub handle: String,
    /// `publicKeyMultibase` of the `#atproto` verification method, used to
    /// check service-auth signatures.
    pub signing_key: Option<String>,
}

/// Public profile data for an account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    /// Current handle.
    pub handle: String,
    /// Display name; the handle when the account has none.
    pub display_name: String,
    /// Avatar URL, when present and well-formed.
    pub avatar: Option<String>,
}

impl From<Profile> for ProfileFields {
    fn from(profile: Profile) -> Self {
        Self {
            handle: profile.handle,
            display_name: profile.display_name,
            avatar: profile.avatar.unwrap_or_default(),
        }
    }
}

/// Resolves DIDs to identities and profiles.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    /// Resolves a DID to its current identity, cache-first.
    async fn lookup(&self, did: &Did) -> Result<Identity, IdentityError>;

    /// Drops any cached identity for the DID.
    async fn purge(&self, did: &Did);

    /// Fetches the account's public profile.
    async fn profile(&self, did: &Did) -> Result<Profile, IdentityError>;
}

/// Settings for [`HttpIdentityResolver`].
#[derive(Debug, Clone)]
pub struct ResolverSettings {
    /// Base URL of the PLC directory.
    pub plc_url: String,
    /// Base URL of the service answering `app.bsky.actor.getProfile`.
    pub profile_service_url: String,
    /// How long a resolved identity stays cached.
    pub cache_ttl: Duration,
    /// Maximum cached identities.
    pub cache_capacity: u64,
    /// `User-Agent` sent upstream.
    pub user_agent: String,
    /// Per-request timeout.
    pub request_timeout: Duration,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            plc_url: "https://plc.directory".to_string(),
            profile_service_url: "https://public.api.bsky.app".to_string(),
            cache_ttl: Duration::from_secs(3600),
            cache_capacity: 100_000,
            user_agent: concat!("Skywell AppView v", env!("CARGO_PKG_VERSION")).to_string(),
            request_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DidDocument {
    id: String,
    #[serde(default)]
    also_known_as: Vec<String>,
    #[serde(default)]
    verification_method: Vec<VerificationMethod>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VerificationMethod {
    id: String,
    #[serde(default)]
    public_key_multibase: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProfileResponse {
    handle: String,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    avatar: Option<String>,
}

/// [`IdentityResolver`] backed by HTTP lookups and a TTL cache.
pub struct HttpIdentityResolver {
    client: reqwest::Client,
    settings: ResolverSettings,
    cache: Cache<String, Identity>,
}

impl HttpIdentityResolver {
    /// Builds a resolver with its own HTTP client.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::Http`] if the TLS backend cannot initialize.
    pub fn new(settings: ResolverSettings) -> Result<Self, IdentityError> {
        let client = reqwest::Client::builder()
            .user_agent(settings.user_agent.clone())
            .timeout(settings.request_timeout)
            .build()?;
        let cache = Cache::builder()
            .max_capacity(settings.cache_capacity)
            .time_to_live(settings.cache_ttl)
            .build();
        Ok(Self {
            client,
            settings,
            cache,
        })
    }

    async fn resolve(&self, did: &Did) -> Result<Identity, IdentityError> {
        let url = document_url(&self.settings.plc_url, did)?;
        tracing::debug!(did = %did, url = %url, "resolving DID document");

        let response = self.client.get(&url).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND
            || response.status() == reqwest::StatusCode::GONE
        {
            return Err(IdentityError::NotFound(did.to_string()));
        }
        let document: DidDocument = response.error_for_status()?.json().await?;

        if document.id != did.as_str() {
            return Err(IdentityError::InvalidDocument(format!(
                "document id {} does not match {}",
                document.id, did
            )));
        }

        Ok(Identity {
            did: did.clone(),
            handle: handle_from_aliases(&document.also_known_as),
            signing_key: atproto_key(did, &document.verification_method),
        })
    }
}

impl std::fmt::Debug for HttpIdentityResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpIdentityResolver")
            .field("plc_url", &self.settings.plc_url)
            .field("profile_service_url", &self.settings.profile_service_url)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl IdentityResolver for HttpIdentityResolver {
    async fn lookup(&self, did: &Did) -> Result<Identity, IdentityError> {
        if let Some(hit) = self.cache.get(did.as_str()).await {
            return Ok(hit);
        }
        let identity = self.resolve(did).await?;
        self.cache
            .insert(did.as_str().to_string(), identity.clone())
            .await;
        Ok(identity)
    }

    async fn purge(&self, did: &Did) {
        self.cache.invalidate(did.as_str()).await;
    }

    async fn profile(&self, did: &Did) -> Result<Profile, IdentityError> {
        let url = format!(
            "{}/xrpc/app.bsky.actor.getProfile",
            self.settings.profile_service_url.trim_end_matches('/')
        );
        let response = self
            .client
            .get(&url)
            .query(&[("actor", did.as_str())])
            .send()
            .await?;

        // The AppView answers 400 InvalidRequest for unknown actors.
        if response.status() == reqwest::StatusCode::NOT_FOUND
            || response.status() == reqwest::StatusCode::BAD_REQUEST
        {
            return Err(IdentityError::NotFound(did.to_string()));
        }
        let body: ProfileResponse = response.error_for_status()?.json().await?;
        profile_from_response(body)
    }
}

/// Where the DID document for `did` lives.
fn document_url(plc_url: &str, did: &Did) -> Result<String, IdentityError> {
    match did.method() {
        "plc" => Ok(format!("{}/{}", plc_url.trim_end_matches('/'), did)),
        "web" => {
            let host = did.identifier().replace("%3A", ":");
            // Path-based did:web is not used by atproto.
            if let Some((name, port)) = host.split_once(':') {
                if name.is_empty() || port.is_empty() || !port.bytes().all(|b| b.is_ascii_digit())
                {
                    return Err(IdentityError::UnsupportedMethod(did.to_string()));
                }
            }
            Ok(format!("https://{host}/.well-known/did.json"))
        }
        other => Err(IdentityError::UnsupportedMethod(other.to_string())),
    }
}

fn handle_from_aliases(aliases: &[String]) -> String {
    aliases
        .iter()
        .filter_map(|alias| alias.strip_prefix("at://"))
        .find(|handle| is_valid_handle(handle))
        .map(str::to_ascii_lowercase)
        .unwrap_or_else(|| INVALID_HANDLE.to_string())
}

/// The `#atproto` key, whether its id is relative or fully qualified.
fn atproto_key(did: &Did, methods: &[VerificationMethod]) -> Option<String> {
    let qualified = format!("{did}#atproto");
    methods
        .iter()
        .find(|m| m.id == "#atproto" || m.id == qualified)
        .and_then(|m| m.public_key_multibase.clone())
}

fn is_valid_handle(handle: &str) -> bool {
    if handle.is_empty() || handle.len() > 253 {
        return false;
    }
    let labels: Vec<&str> = handle.split('.').collect();
    labels.len() >= 2
        && labels.iter().all(|label| {
            !label.is_empty()
                && label.len() <= 63
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
        })
        && labels
            .last()
            .is_some_and(|tld| tld.as_bytes()[0].is_ascii_alphabetic())
}

fn profile_from_response(body: ProfileResponse) -> Result<Profile, IdentityError> {
    if !is_valid_handle(&body.handle) {
        return Err(IdentityError::InvalidDocument(format!(
            "invalid handle {:?}",
            body.handle
        )));
    }
    let handle = body.handle.to_ascii_lowercase();

    let avatar = body
        .avatar
        .filter(|avatar| reqwest::Url::parse(avatar).is_ok());

    let display_name = match body.display_name {
        Some(name) => name,
        None => handle.clone(),
    };

    Ok(Profile {
        handle,
        display_name,
        avatar,
    })
}
