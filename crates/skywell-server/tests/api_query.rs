mod common;

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
};
use common::{server, token_for, ALICE, BOB};

#[tokio::test]
async fn health_check_returns_ok() {
    let server = server();
    let (status, json) = server.get("/health", None).await;
    assert_eq!(status, 200);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn responses_carry_request_id() {
    let server = server();
    let response = server
        .raw(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await;
    let id = response
        .headers()
        .get("x-request-id")
        .expect("x-request-id header")
        .to_str()
        .unwrap();
    assert_eq!(id.len(), 16);
    assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
}

#[tokio::test]
async fn actor_profile_includes_file_count() {
    let server = server();
    server.publish(ALICE, "3kaaaaaaaaa01", "a.pdf", 1).await;
    server.publish(ALICE, "3kaaaaaaaaa02", "b.pdf", 2).await;

    let (status, json) = server
        .get(&format!("/xrpc/dev.skywell.getActorProfile?actor={ALICE}"), None)
        .await;
    assert_eq!(status, 200);
    assert_eq!(json["did"], ALICE);
    assert_eq!(json["handle"], "alice.bsky.social");
    assert_eq!(json["displayName"], "Alice");
    assert_eq!(json["fileCount"], 2);
    assert!(json.get("avatar").is_none());
}

#[tokio::test]
async fn actor_profile_errors() {
    let server = server();

    let (status, json) = server.get("/xrpc/dev.skywell.getActorProfile", None).await;
    assert_eq!(status, 400);
    assert_eq!(json["error"], "InvalidRequest");

    let (status, _) = server
        .get("/xrpc/dev.skywell.getActorProfile?actor=alice.bsky.social", None)
        .await;
    assert_eq!(status, 400);

    // Resolvable but never indexed.
    let (status, json) = server
        .get(&format!("/xrpc/dev.skywell.getActorProfile?actor={BOB}"), None)
        .await;
    assert_eq!(status, 404);
    assert_eq!(json["error"], "NotFound");

    // Unknown to the resolver.
    let (status, _) = server
        .get("/xrpc/dev.skywell.getActorProfile?actor=did:plc:nobody234567abcdefghijk", None)
        .await;
    assert_eq!(status, 404);
}

#[tokio::test]
async fn file_from_slug_resolves_file_and_owner() {
    let server = server();
    let slug = server.publish(ALICE, "3kaaaaaaaaa01", "report.pdf", 1).await;

    let (status, json) = server
        .get(&format!("/xrpc/dev.skywell.getFileFromSlug?slug={slug}"), None)
        .await;
    assert_eq!(status, 200);
    let uri = format!("at://{ALICE}/dev.skywell.file/3kaaaaaaaaa01");
    assert_eq!(json["uri"], uri);
    assert_eq!(json["file"]["uri"], uri);
    assert_eq!(json["file"]["name"], "report.pdf");
    assert_eq!(json["file"]["slug"], slug);
    assert_eq!(json["file"]["blob"]["mimeType"], "application/pdf");
    assert_eq!(json["actor"]["did"], ALICE);
    assert_eq!(json["actor"]["fileCount"], 1);
    assert_eq!(json["cid"], json["file"]["cid"]);
}

#[tokio::test]
async fn file_from_slug_errors() {
    let server = server();

    let (status, _) = server.get("/xrpc/dev.skywell.getFileFromSlug", None).await;
    assert_eq!(status, 400);

    let (status, json) = server
        .get("/xrpc/dev.skywell.getFileFromSlug?slug=ZZZZZZ", None)
        .await;
    assert_eq!(status, 404);
    assert_eq!(json["error"], "NotFound");
    assert!(json["message"].as_str().unwrap().contains("ZZZZZZ"));
}

#[tokio::test]
async fn actor_files_pages_to_exhaustion() {
    let server = server();
    for n in 0..5 {
        server
            .publish(ALICE, &format!("3kaaaaaaaaa{n:02}"), &format!("{n}.pdf"), n)
            .await;
    }
    let auth = token_for(ALICE);

    let mut seen = Vec::new();
    let mut cursor: Option<String> = None;
    let mut pages = 0;
    loop {
        let mut uri = format!("/xrpc/dev.skywell.getActorFiles?actor={ALICE}&limit=2");
        if let Some(c) = &cursor {
            uri.push_str(&format!("&cursor={c}"));
        }
        let (status, json) = server.get(&uri, Some(&auth)).await;
        assert_eq!(status, 200, "{json}");
        assert_eq!(json["actor"]["did"], ALICE);
        pages += 1;

        for file in json["files"].as_array().unwrap() {
            seen.push(file["name"].as_str().unwrap().to_string());
        }
        match json.get("cursor").and_then(|c| c.as_str()) {
            Some(c) => cursor = Some(c.to_string()),
            None => break,
        }
    }

    assert_eq!(pages, 3);
    assert_eq!(seen, vec!["4.pdf", "3.pdf", "2.pdf", "1.pdf", "0.pdf"]);
}

#[tokio::test]
async fn actor_files_rejects_bad_paging_parameters() {
    let server = server();
    server.publish(ALICE, "3kaaaaaaaaa01", "a.pdf", 1).await;
    let auth = token_for(ALICE);

    for query in ["limit=0", "limit=101", "limit=many", "cursor=yesterday"] {
        let (status, json) = server
            .get(
                &format!("/xrpc/dev.skywell.getActorFiles?actor={ALICE}&{query}"),
                Some(&auth),
            )
            .await;
        assert_eq!(status, 400, "{query} should be rejected");
        assert_eq!(json["error"], "InvalidRequest");
    }
}

#[tokio::test]
async fn cors_preflight_allows_any_origin() {
    let server = server();
    let response = server
        .raw(
            Request::builder()
                .method(Method::OPTIONS)
                .uri("/xrpc/dev.skywell.getActorFiles")
                .header(header::ORIGIN, "https://skywell.dev")
                .header(header::ACCESS_CONTROL_REQUEST_METHOD, "GET")
                .header(header::ACCESS_CONTROL_REQUEST_HEADERS, "authorization")
                .body(Body::empty())
                .unwrap(),
        )
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers();
    assert_eq!(headers.get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(), "*");
    let methods = headers
        .get(header::ACCESS_CONTROL_ALLOW_METHODS)
        .unwrap()
        .to_str()
        .unwrap();
    assert!(methods.contains("GET") && methods.contains("POST"));
    let allowed = headers
        .get(header::ACCESS_CONTROL_ALLOW_HEADERS)
        .unwrap()
        .to_str()
        .unwrap()
        .to_ascii_lowercase();
    assert!(allowed.contains("authorization"));
}
