mod common;

use common::{server, BOB};

const INDEX_PROFILE: &str = "/xrpc/dev.skywell.indexActorProfile";

#[tokio::test]
async fn index_actor_profile_creates_user_without_files() {
    let server = server();

    let (status, json) = server
        .post_json(INDEX_PROFILE, &format!(r#"{{"actor":"{BOB}"}}"#))
        .await;
    assert_eq!(status, 200, "{json}");
    assert_eq!(json["did"], BOB);
    assert_eq!(json["indexed"], true);

    let (status, profile) = server
        .get(&format!("/xrpc/dev.skywell.getActorProfile?actor={BOB}"), None)
        .await;
    assert_eq!(status, 200);
    assert_eq!(profile["handle"], "bob.bsky.social");
    // Display name falls back to the handle.
    assert_eq!(profile["displayName"], "bob.bsky.social");
    assert_eq!(profile["fileCount"], 0);

    let conn = server.pool.get().unwrap();
    let users: i64 = conn
        .query_row("SELECT COUNT(*) FROM users WHERE did = ?1", [BOB], |row| row.get(0))
        .unwrap();
    assert_eq!(users, 1);
}

#[tokio::test]
async fn index_actor_profile_is_idempotent() {
    let server = server();
    let body = format!(r#"{{"actor":"{BOB}"}}"#);
    for _ in 0..2 {
        let (status, _) = server.post_json(INDEX_PROFILE, &body).await;
        assert_eq!(status, 200);
    }

    let conn = server.pool.get().unwrap();
    let users: i64 = conn
        .query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))
        .unwrap();
    assert_eq!(users, 1);
}

#[tokio::test]
async fn index_actor_profile_rejects_bad_input() {
    let server = server();

    for body in ["not json", "{}", r#"{"actor":"bob.bsky.social"}"#, r#"{"actor":""}"#] {
        let (status, json) = server.post_json(INDEX_PROFILE, body).await;
        assert_eq!(status, 400, "{body} should be rejected");
        assert_eq!(json["error"], "InvalidRequest");
    }
}

#[tokio::test]
async fn index_actor_profile_for_unresolvable_did_fails_upstream() {
    let server = server();
    let (status, json) = server
        .post_json(INDEX_PROFILE, r#"{"actor":"did:plc:nobody234567abcdefghijk"}"#)
        .await;
    assert_eq!(status, 500);
    assert_eq!(json["error"], "InternalServerError");
}

#[tokio::test]
async fn index_actor_profile_rejects_get() {
    let server = server();
    let (status, _) = server.get(INDEX_PROFILE, None).await;
    assert_eq!(status, 405);
}
