//! Service-auth bearer tokens.
//!
//! Authenticated XRPC calls carry an inter-service JWT minted by the
//! caller's PDS and signed with the `#atproto` key from the caller's DID
//! document. Handlers only see the [`AuthGate`] trait, which turns a token
//! into the issuing DID.

use async_trait::async_trait;
use axum::http::{header::AUTHORIZATION, HeaderMap};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use serde::Deserialize;
use skywell_index::{Identity, IdentityResolver};
use skywell_types::Did;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Multicodec prefix of a compressed secp256k1 public key.
const SECP256K1_PREFIX: [u8; 2] = [0xe7, 0x01];

/// Multicodec prefix of a compressed P-256 public key.
const P256_PREFIX: [u8; 2] = [0x80, 0x24];

/// Reasons a request is treated as unauthenticated.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    /// No `Authorization` header.
    #[error("authorization header missing")]
    MissingHeader,

    /// The header is not `Bearer <token>`.
    #[error("invalid authorization header format")]
    MalformedHeader,

    /// The token is not a three-part JWT with JSON header and claims.
    #[error("malformed token: {0}")]
    MalformedToken(String),

    /// The token is signed with an algorithm we do not accept.
    #[error("unsupported token algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// `iss` is not a DID.
    #[error("invalid token issuer: {0}")]
    InvalidIssuer(String),

    /// `aud` names another service.
    #[error("token audience {0} does not match this service")]
    WrongAudience(String),

    /// `exp` is in the past, beyond the allowed leeway.
    #[error("token expired")]
    Expired,

    /// The issuer's signing key could not be resolved or decoded.
    #[error("signing key unavailable for {0}")]
    KeyUnavailable(String),

    /// The token's algorithm does not match the issuer's key type.
    #[error("token algorithm {0} does not match the issuer key")]
    KeyMismatch(String),

    /// The signature does not verify against the issuer's key.
    #[error("invalid token signature")]
    BadSignature,
}

/// Extracts the bearer token from request headers.
///
/// # Errors
///
/// Returns [`AuthError::MissingHeader`] or [`AuthError::MalformedHeader`].
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, AuthError> {
    let value = headers.get(AUTHORIZATION).ok_or(AuthError::MissingHeader)?;
    let value = value.to_str().map_err(|_| AuthError::MalformedHeader)?;
    match value.strip_prefix("Bearer ") {
        Some(token) if !token.trim().is_empty() => Ok(token.trim()),
        _ => Err(AuthError::MalformedHeader),
    }
}

/// Validates a bearer token and returns the DID that issued it.
#[async_trait]
pub trait AuthGate: Send + Sync {
    /// Validates `token`.
    async fn validate(&self, token: &str) -> Result<Did, AuthError>;
}

/// Signature algorithms atproto service auth uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenAlgorithm {
    /// ECDSA over P-256 with SHA-256.
    Es256,
    /// ECDSA over secp256k1 with SHA-256.
    Es256k,
}

impl TokenAlgorithm {
    fn parse(alg: &str) -> Result<Self, AuthError> {
        match alg {
            "ES256" => Ok(Self::Es256),
            "ES256K" => Ok(Self::Es256k),
            other => Err(AuthError::UnsupportedAlgorithm(other.to_string())),
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Es256 => "ES256",
            Self::Es256k => "ES256K",
        }
    }
}

/// A public key from a DID document's `#atproto` verification method.
#[derive(Debug, Clone)]
pub enum IssuerKey {
    /// NIST P-256.
    P256(p256::PublicKey),
    /// secp256k1.
    K256(k256::ecdsa::VerifyingKey),
}

impl IssuerKey {
    /// Decodes a `z`-prefixed base58btc multikey.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::KeyUnavailable`] for any other encoding, an
    /// unknown multicodec, or bytes that are not a curve point.
    pub fn from_multibase(multibase: &str) -> Result<Self, AuthError> {
        let unusable = || AuthError::KeyUnavailable(format!("unusable key {multibase:?}"));
        let encoded = multibase.strip_prefix('z').ok_or_else(unusable)?;
        let bytes = bs58::decode(encoded).into_vec().map_err(|_| unusable())?;

        if let Some(point) = bytes.strip_prefix(&SECP256K1_PREFIX[..]) {
            let key = k256::ecdsa::VerifyingKey::from_sec1_bytes(point).map_err(|_| unusable())?;
            return Ok(Self::K256(key));
        }
        if let Some(point) = bytes.strip_prefix(&P256_PREFIX[..]) {
            let key = p256::PublicKey::from_sec1_bytes(point).map_err(|_| unusable())?;
            return Ok(Self::P256(key));
        }
        Err(unusable())
    }

    fn algorithm(&self) -> TokenAlgorithm {
        match self {
            Self::P256(_) => TokenAlgorithm::Es256,
            Self::K256(_) => TokenAlgorithm::Es256k,
        }
    }
}

#[derive(Debug, Deserialize)]
struct JwtHeader {
    alg: String,
}

#[derive(Debug, Deserialize)]
struct ServiceClaims {
    iss: String,
    aud: String,
    exp: i64,
}

/// A token whose structure and claims passed, awaiting signature checks.
#[derive(Debug, Clone)]
pub struct InspectedToken {
    /// DID named by `iss`, with any service fragment dropped.
    pub issuer: Did,
    /// Declared signing algorithm.
    pub algorithm: TokenAlgorithm,
    signing_input: String,
    signature: Vec<u8>,
}

/// [`AuthGate`] for atproto inter-service tokens.
///
/// The token must be a JWT with an accepted `alg`, an `iss` that is a DID
/// (an optional `#fragment` naming the service is dropped), `aud` equal to
/// this service's DID, and an `exp` no further in the past than the
/// leeway. The signature must verify against the issuer's `#atproto` key;
/// a missing or unusable key rejects the token.
pub struct ServiceAuthGate {
    service_did: String,
    leeway: Duration,
    resolver: Arc<dyn IdentityResolver>,
}

impl std::fmt::Debug for ServiceAuthGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAuthGate")
            .field("service_did", &self.service_did)
            .field("leeway", &self.leeway)
            .finish_non_exhaustive()
    }
}

impl ServiceAuthGate {
    /// Creates a gate for tokens addressed to `service_did`, looking up
    /// issuer keys through `resolver`.
    pub fn new(
        service_did: impl Into<String>,
        leeway: Duration,
        resolver: Arc<dyn IdentityResolver>,
    ) -> Self {
        Self {
            service_did: service_did.into(),
            leeway,
            resolver,
        }
    }

    /// Checks structure and claims against the clock reading `now` (Unix
    /// seconds). The signature is not looked at.
    ///
    /// # Errors
    ///
    /// Returns the first [`AuthError`] the token fails.
    pub fn inspect(&self, token: &str, now: i64) -> Result<InspectedToken, AuthError> {
        let mut parts = token.split('.');
        let (Some(header), Some(claims), Some(signature), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(AuthError::MalformedToken("expected three segments".to_string()));
        };

        // jsonwebtoken has no ES256K, so the header is read here.
        let header: JwtHeader = decode_json(header)?;
        let algorithm = TokenAlgorithm::parse(&header.alg)?;

        let claims: ServiceClaims = decode_json(claims)?;
        if claims.aud != self.service_did {
            return Err(AuthError::WrongAudience(claims.aud));
        }
        let leeway = i64::try_from(self.leeway.as_secs()).unwrap_or(i64::MAX);
        if claims.exp.saturating_add(leeway) < now {
            return Err(AuthError::Expired);
        }

        let issuer = claims.iss.split('#').next().unwrap_or_default();
        let issuer =
            Did::parse(issuer).map_err(|_| AuthError::InvalidIssuer(claims.iss.clone()))?;

        let signature = decode_segment(signature)?;
        let signing_input = token
            .rsplit_once('.')
            .map(|(input, _)| input.to_string())
            .unwrap_or_default();

        Ok(InspectedToken {
            issuer,
            algorithm,
            signing_input,
            signature,
        })
    }

    /// Verifies the signature of an inspected token against `key`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::KeyMismatch`] if the algorithm does not fit the
    /// key and [`AuthError::BadSignature`] if verification fails.
    pub fn verify_signature(
        &self,
        token: &str,
        inspected: &InspectedToken,
        key: &IssuerKey,
    ) -> Result<(), AuthError> {
        if key.algorithm() != inspected.algorithm {
            return Err(AuthError::KeyMismatch(inspected.algorithm.as_str().to_string()));
        }

        match key {
            IssuerKey::P256(public) => {
                let point = public.to_encoded_point(false);
                let (Some(x), Some(y)) = (point.x(), point.y()) else {
                    return Err(AuthError::KeyUnavailable(inspected.issuer.to_string()));
                };
                let decoding = DecodingKey::from_ec_components(
                    &URL_SAFE_NO_PAD.encode(x),
                    &URL_SAFE_NO_PAD.encode(y),
                )
                .map_err(|e| AuthError::KeyUnavailable(e.to_string()))?;

                let mut validation = Validation::new(Algorithm::ES256);
                validation.set_audience(&[&self.service_did]);
                validation.leeway = self.leeway.as_secs();
                jsonwebtoken::decode::<ServiceClaims>(token, &decoding, &validation)
                    .map(|_| ())
                    .map_err(|e| match e.kind() {
                        ErrorKind::InvalidSignature => AuthError::BadSignature,
                        ErrorKind::ExpiredSignature => AuthError::Expired,
                        ErrorKind::InvalidAudience => {
                            AuthError::WrongAudience(self.service_did.clone())
                        }
                        _ => AuthError::MalformedToken(e.to_string()),
                    })
            }
            IssuerKey::K256(public) => {
                use k256::ecdsa::signature::Verifier;

                let signature = k256::ecdsa::Signature::from_slice(&inspected.signature)
                    .map_err(|_| AuthError::BadSignature)?;
                public
                    .verify(inspected.signing_input.as_bytes(), &signature)
                    .map_err(|_| AuthError::BadSignature)
            }
        }
    }

    fn issuer_key(identity: &Identity) -> Result<IssuerKey, AuthError> {
        let multibase = identity
            .signing_key
            .as_deref()
            .ok_or_else(|| AuthError::KeyUnavailable(identity.did.to_string()))?;
        IssuerKey::from_multibase(multibase)
    }

    async fn lookup(&self, did: &Did) -> Result<Identity, AuthError> {
        self.resolver.lookup(did).await.map_err(|e| {
            tracing::debug!(did = %did, error = %e, "issuer resolution failed");
            AuthError::KeyUnavailable(did.to_string())
        })
    }
}

#[async_trait]
impl AuthGate for ServiceAuthGate {
    async fn validate(&self, token: &str) -> Result<Did, AuthError> {
        let inspected = self.inspect(token, chrono::Utc::now().timestamp())?;
        let issuer = inspected.issuer.clone();

        let identity = self.lookup(&issuer).await?;
        let key = Self::issuer_key(&identity)?;
        match self.verify_signature(token, &inspected, &key) {
            Err(AuthError::BadSignature) => {
                // The key may have rotated since the document was cached.
                self.resolver.purge(&issuer).await;
                let fresh = self.lookup(&issuer).await?;
                if fresh.signing_key == identity.signing_key {
                    return Err(AuthError::BadSignature);
                }
                let key = Self::issuer_key(&fresh)?;
                self.verify_signature(token, &inspected, &key)?;
            }
            other => other?,
        }

        tracing::debug!(issuer = %issuer, "service token accepted");
        Ok(issuer)
    }
}

fn decode_segment(segment: &str) -> Result<Vec<u8>, AuthError> {
    URL_SAFE_NO_PAD
        .decode(segment.trim_end_matches('='))
        .map_err(|e| AuthError::MalformedToken(e.to_string()))
}

fn decode_json<T: serde::de::DeserializeOwned>(segment: &str) -> Result<T, AuthError> {
    serde_json::from_slice(&decode_segment(segment)?)
        .map_err(|e| AuthError::MalformedToken(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use k256::ecdsa::signature::Signer;
    use serde_json::json;
    use skywell_index::mock::StaticIdentityResolver;

    const SERVICE: &str = "did:plc:tsaj4ffwyj5z6rjqaxmg5cp4";
    const ALICE: &str = "did:plc:alice234567abcdefghijklm";
    const NOW: i64 = 1_750_000_000;

    fn k256_key() -> k256::ecdsa::SigningKey {
        k256::ecdsa::SigningKey::from_slice(&[0x11; 32]).unwrap()
    }

    fn p256_key() -> p256::ecdsa::SigningKey {
        p256::ecdsa::SigningKey::from_slice(&[0x22; 32]).unwrap()
    }

    fn multikey(prefix: [u8; 2], point: &[u8]) -> String {
        let bytes = [&prefix[..], point].concat();
        format!("z{}", bs58::encode(bytes).into_string())
    }

    fn k256_multikey(key: &k256::ecdsa::SigningKey) -> String {
        multikey(SECP256K1_PREFIX, key.verifying_key().to_encoded_point(true).as_bytes())
    }

    fn p256_multikey(key: &p256::ecdsa::SigningKey) -> String {
        multikey(P256_PREFIX, key.verifying_key().to_encoded_point(true).as_bytes())
    }

    fn unsigned(header: serde_json::Value, claims: serde_json::Value) -> String {
        format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(header.to_string()),
            URL_SAFE_NO_PAD.encode(claims.to_string())
        )
    }

    fn token(header: serde_json::Value, claims: serde_json::Value) -> String {
        format!("{}.c2lnbmF0dXJl", unsigned(header, claims))
    }

    fn es256k(claims: serde_json::Value, key: &k256::ecdsa::SigningKey) -> String {
        let input = unsigned(json!({ "alg": "ES256K", "typ": "JWT" }), claims);
        let signature: k256::ecdsa::Signature = key.sign(input.as_bytes());
        format!("{input}.{}", URL_SAFE_NO_PAD.encode(signature.to_bytes()))
    }

    fn es256(claims: serde_json::Value, key: &p256::ecdsa::SigningKey) -> String {
        let input = unsigned(json!({ "alg": "ES256", "typ": "JWT" }), claims);
        let signature: p256::ecdsa::Signature = key.sign(input.as_bytes());
        format!("{input}.{}", URL_SAFE_NO_PAD.encode(signature.to_bytes()))
    }

    fn claims(iss: &str, aud: &str, exp: i64) -> serde_json::Value {
        json!({ "iss": iss, "aud": aud, "exp": exp, "lxm": "dev.skywell.getActorFiles" })
    }

    fn live_claims(iss: &str) -> serde_json::Value {
        claims(iss, SERVICE, chrono::Utc::now().timestamp() + 600)
    }

    fn gate_with(resolver: StaticIdentityResolver) -> ServiceAuthGate {
        ServiceAuthGate::new(SERVICE, Duration::from_secs(10), Arc::new(resolver))
    }

    fn gate() -> ServiceAuthGate {
        gate_with(StaticIdentityResolver::new())
    }

    fn alice_resolver(multibase: &str) -> StaticIdentityResolver {
        StaticIdentityResolver::new()
            .with_profile(ALICE, "alice.bsky.social", Some("Alice"))
            .with_signing_key(ALICE, multibase)
    }

    #[test]
    fn inspect_yields_issuer() {
        let t = token(json!({ "alg": "ES256K", "typ": "JWT" }), claims("did:plc:abc", SERVICE, NOW + 60));
        let inspected = gate().inspect(&t, NOW).unwrap();
        assert_eq!(inspected.issuer.as_str(), "did:plc:abc");
        assert_eq!(inspected.algorithm, TokenAlgorithm::Es256k);
    }

    #[test]
    fn issuer_fragment_is_dropped() {
        let t = token(
            json!({ "alg": "ES256" }),
            claims("did:plc:abc#atproto_labeler", SERVICE, NOW + 60),
        );
        assert_eq!(gate().inspect(&t, NOW).unwrap().issuer.as_str(), "did:plc:abc");
    }

    #[test]
    fn expiry_respects_leeway() {
        let t = token(json!({ "alg": "ES256K" }), claims("did:plc:abc", SERVICE, NOW - 5));
        assert!(gate().inspect(&t, NOW).is_ok(), "within leeway");

        let t = token(json!({ "alg": "ES256K" }), claims("did:plc:abc", SERVICE, NOW - 11));
        assert_eq!(gate().inspect(&t, NOW).unwrap_err(), AuthError::Expired);
    }

    #[test]
    fn wrong_audience_is_rejected() {
        let t = token(json!({ "alg": "ES256K" }), claims("did:plc:abc", "did:web:other.example", NOW + 60));
        assert_eq!(
            gate().inspect(&t, NOW).unwrap_err(),
            AuthError::WrongAudience("did:web:other.example".to_string())
        );
    }

    #[test]
    fn bad_algorithm_and_structure_are_rejected() {
        let t = token(json!({ "alg": "none" }), claims("did:plc:abc", SERVICE, NOW + 60));
        assert!(matches!(
            gate().inspect(&t, NOW),
            Err(AuthError::UnsupportedAlgorithm(_))
        ));

        for bad in ["", "abc", "a.b", "a.b.c.d", "!!!.???.sig"] {
            assert!(
                matches!(gate().inspect(bad, NOW), Err(AuthError::MalformedToken(_))),
                "{bad:?} should be malformed"
            );
        }
    }

    #[test]
    fn non_did_issuer_is_rejected() {
        let t = token(json!({ "alg": "ES256K" }), claims("alice.bsky.social", SERVICE, NOW + 60));
        assert!(matches!(
            gate().inspect(&t, NOW),
            Err(AuthError::InvalidIssuer(_))
        ));
    }

    #[test]
    fn multikeys_decode_by_codec() {
        assert!(matches!(
            IssuerKey::from_multibase(&k256_multikey(&k256_key())),
            Ok(IssuerKey::K256(_))
        ));
        assert!(matches!(
            IssuerKey::from_multibase(&p256_multikey(&p256_key())),
            Ok(IssuerKey::P256(_))
        ));
        let ed25519 = multikey([0xed, 0x01], &[0u8; 32]);
        for bad in ["", "uAAAA", "z0OIl", ed25519.as_str()] {
            assert!(
                matches!(IssuerKey::from_multibase(bad), Err(AuthError::KeyUnavailable(_))),
                "{bad:?} should be unusable"
            );
        }
    }

    #[tokio::test]
    async fn es256k_signed_token_is_accepted() {
        let key = k256_key();
        let gate = gate_with(alice_resolver(&k256_multikey(&key)));
        let did = gate.validate(&es256k(live_claims(ALICE), &key)).await.unwrap();
        assert_eq!(did.as_str(), ALICE);
    }

    #[tokio::test]
    async fn es256_signed_token_is_accepted() {
        let key = p256_key();
        let gate = gate_with(alice_resolver(&p256_multikey(&key)));
        let did = gate.validate(&es256(live_claims(ALICE), &key)).await.unwrap();
        assert_eq!(did.as_str(), ALICE);
    }

    #[tokio::test]
    async fn forged_signature_is_rejected() {
        let resolver = Arc::new(alice_resolver(&k256_multikey(&k256_key())));
        let gate = ServiceAuthGate::new(SERVICE, Duration::from_secs(10), resolver.clone());

        // Claims Alice's identity with garbage in the signature slot.
        let forged = format!(
            "{}.bm90LWEtc2lnbmF0dXJl",
            unsigned(json!({ "alg": "ES256K" }), live_claims(ALICE))
        );
        assert_eq!(gate.validate(&forged).await, Err(AuthError::BadSignature));
        // The cached document is dropped once in case the key rotated.
        assert_eq!(resolver.purged(), vec![ALICE.to_string()]);
        assert_eq!(resolver.lookup_count(), 2);

        // A well-formed signature from someone else's key.
        let other = k256::ecdsa::SigningKey::from_slice(&[0x33; 32]).unwrap();
        assert_eq!(
            gate.validate(&es256k(live_claims(ALICE), &other)).await,
            Err(AuthError::BadSignature)
        );
    }

    #[tokio::test]
    async fn es256_with_wrong_key_is_rejected() {
        let gate = gate_with(alice_resolver(&p256_multikey(&p256_key())));
        let other = p256::ecdsa::SigningKey::from_slice(&[0x44; 32]).unwrap();
        assert_eq!(
            gate.validate(&es256(live_claims(ALICE), &other)).await,
            Err(AuthError::BadSignature)
        );
    }

    #[tokio::test]
    async fn algorithm_must_match_key_type() {
        let gate = gate_with(alice_resolver(&p256_multikey(&p256_key())));
        assert_eq!(
            gate.validate(&es256k(live_claims(ALICE), &k256_key())).await,
            Err(AuthError::KeyMismatch("ES256K".to_string()))
        );
    }

    #[tokio::test]
    async fn issuer_without_key_fails_closed() {
        let no_key =
            StaticIdentityResolver::new().with_profile(ALICE, "alice.bsky.social", None);
        let gate = gate_with(no_key);
        assert_eq!(
            gate.validate(&es256k(live_claims(ALICE), &k256_key())).await,
            Err(AuthError::KeyUnavailable(ALICE.to_string()))
        );

        // Unresolvable issuer.
        let gate = self::gate();
        assert!(matches!(
            gate.validate(&es256k(live_claims(ALICE), &k256_key())).await,
            Err(AuthError::KeyUnavailable(_))
        ));
    }

    #[test]
    fn bearer_token_extraction() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), Err(AuthError::MissingHeader));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic dXNlcjpwYXNz"));
        assert_eq!(bearer_token(&headers), Err(AuthError::MalformedHeader));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert_eq!(bearer_token(&headers), Err(AuthError::MalformedHeader));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc.def.ghi"));
        assert_eq!(bearer_token(&headers), Ok("abc.def.ghi"));
    }
}
