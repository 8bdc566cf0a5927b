#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{Method, Request, Response},
    Router,
};
use serde_json::{json, Value};
use skywell_db::{open_index, DbPool, DbRuntimeSettings};
use skywell_index::mock::StaticIdentityResolver;
use skywell_index::{Outcome, RecordIndexer, SlugAllocator, ViewMaterializer};
use skywell_server::auth::{AuthError, AuthGate, ServiceAuthGate};
use skywell_server::{app, middleware::RateLimiter, AppState};
use skywell_types::{CommitEvent, CommitOperation, Did, Event};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;

pub const ALICE: &str = "did:plc:alice234567abcdefghijklm";
pub const BOB: &str = "did:plc:bob234567abcdefghijklmnop";
pub const SERVICE_DID: &str = "did:web:skywell.test";

/// Accepts tokens of the form `token-for:<did>`.
pub struct StaticAuthGate;

#[async_trait]
impl AuthGate for StaticAuthGate {
    async fn validate(&self, token: &str) -> Result<Did, AuthError> {
        let did = token
            .strip_prefix("token-for:")
            .ok_or_else(|| AuthError::MalformedToken("unknown test token".to_string()))?;
        Did::parse(did).map_err(|_| AuthError::InvalidIssuer(did.to_string()))
    }
}

pub fn token_for(did: &str) -> String {
    format!("Bearer token-for:{did}")
}

pub struct TestServer {
    _dir: TempDir,
    pub pool: DbPool,
    pub resolver: Arc<StaticIdentityResolver>,
    pub indexer: RecordIndexer,
    pub app: Router,
}

pub fn server() -> TestServer {
    server_with_limit(0)
}

/// Builds the router over a fresh store, with Alice and Bob resolvable.
pub fn server_with_limit(rate_limit: u32) -> TestServer {
    build(rate_limit, alice_and_bob(), |_| Arc::new(StaticAuthGate))
}

/// Like [`server`], but tokens go through [`ServiceAuthGate`] and Alice's
/// DID document publishes `alice_key` as its `#atproto` key.
pub fn signed_server(alice_key: &str) -> TestServer {
    let resolver = alice_and_bob().with_signing_key(ALICE, alice_key);
    build(0, resolver, |resolver| {
        Arc::new(ServiceAuthGate::new(
            SERVICE_DID,
            Duration::from_secs(10),
            resolver,
        ))
    })
}

fn alice_and_bob() -> StaticIdentityResolver {
    StaticIdentityResolver::new()
        .with_profile(ALICE, "alice.bsky.social", Some("Alice"))
        .with_profile(BOB, "bob.bsky.social", None)
}

fn build(
    rate_limit: u32,
    resolver: StaticIdentityResolver,
    auth: impl FnOnce(Arc<StaticIdentityResolver>) -> Arc<dyn AuthGate>,
) -> TestServer {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("index.db");
    let pool = open_index(path.to_str().unwrap(), DbRuntimeSettings::default()).unwrap();
    let resolver = Arc::new(resolver);
    let indexer = RecordIndexer::new(pool.clone(), resolver.clone(), SlugAllocator::default());
    let views = ViewMaterializer::new(pool.clone(), resolver.clone());

    let state = AppState {
        indexer: indexer.clone(),
        views,
        auth: auth(resolver.clone()),
        rate_limiter: RateLimiter::new(),
        rate_limit,
    };

    TestServer {
        _dir: dir,
        pool,
        resolver,
        indexer,
        app: app(state),
    }
}

fn peer() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 12345)
}

impl TestServer {
    /// Indexes a file record for `owner` and returns its slug.
    pub async fn publish(&self, owner: &str, rkey: &str, name: &str, n: usize) -> String {
        let blob = format!("bafkrei{}", letters(n));
        let event = Event::Commit(CommitEvent {
            did: Did::parse(owner).unwrap(),
            time_us: 1_725_911_162_329_308,
            rev: "3l3qo2vutsw2b".to_string(),
            operation: CommitOperation::Create,
            collection: "dev.skywell.file".to_string(),
            rkey: rkey.to_string(),
            record: Some(json!({
                "$type": "dev.skywell.file",
                "name": name,
                "createdAt": "2025-06-01T12:00:00.000Z",
                "blobRef": {
                    "$type": "blob",
                    "ref": { "$link": blob },
                    "mimeType": "application/pdf",
                    "size": 1024
                }
            })),
            cid: Some(format!("bafyrei{}", letters(n))),
        });
        match self.indexer.handle_event(&event).await.unwrap() {
            Outcome::Created { slug, .. } => slug,
            other => panic!("expected Created, got {other:?}"),
        }
    }

    pub async fn get(&self, uri: &str, authorization: Option<&str>) -> (u16, Value) {
        let mut builder = Request::builder().method(Method::GET).uri(uri);
        if let Some(value) = authorization {
            builder = builder.header("authorization", value);
        }
        self.send(builder.body(Body::empty()).unwrap()).await
    }

    pub async fn post_json(&self, uri: &str, body: &str) -> (u16, Value) {
        let request = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        self.send(request).await
    }

    pub async fn raw(&self, mut request: Request<Body>) -> Response<Body> {
        request.extensions_mut().insert(ConnectInfo(peer()));
        self.app.clone().oneshot(request).await.unwrap()
    }

    async fn send(&self, request: Request<Body>) -> (u16, Value) {
        let response = self.raw(request).await;
        let status = response.status().as_u16();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body).unwrap()
        };
        (status, json)
    }
}

/// Base32-safe suffix unique per `n`.
fn letters(n: usize) -> String {
    format!("{n:012}")
        .bytes()
        .map(|b| char::from(b'a' + (b - b'0')))
        .collect()
}
