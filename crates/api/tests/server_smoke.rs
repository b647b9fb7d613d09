use axum::{
    body::Body,
    extract::RawQuery,
    http::{Request, StatusCode},
    routing::get,
    Json, Router,
};
use http_body_util::BodyExt;
use std::{net::SocketAddr, time::Duration};
use tempfile::TempDir;
use tower::ServiceExt;
use trustgraph_api::server::{build_app, ApiRuntimeConfig};
use trustgraph_core::TrustLine;
use trustgraph_indexer::{RemoteSink, TrustLineSink};

const ALICE: &str = "0x1111111111111111111111111111111111111111";
const BOB: &str = "0x2222222222222222222222222222222222222222";
const CAROL: &str = "0x3333333333333333333333333333333333333333";

async fn json_body(app: &Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&body).unwrap())
}

fn submit(truster: &str, trustee: &str, amount: u64, block: u64) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(format!("/trust/{}/{}/{}/{}", truster, trustee, amount, block))
        .header("TCB-ID", "secret")
        .body(Body::empty())
        .unwrap()
}

fn query(truster: &str, trustee: &str, amount: u64) -> Request<Body> {
    Request::builder()
        .uri(format!("/trust/{}/{}/{}", truster, trustee, amount))
        .body(Body::empty())
        .unwrap()
}

fn addresses(json: &serde_json::Value) -> Vec<String> {
    json.as_array()
        .unwrap()
        .iter()
        .map(|p| p["safeAddress"].as_str().unwrap().to_string())
        .collect()
}

async fn serve(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

#[tokio::test]
async fn submitted_lines_survive_restart() {
    let dir = TempDir::new().unwrap();
    let database_url = format!("sqlite://{}", dir.path().join("graph.db").display());
    let config = ApiRuntimeConfig::for_test(Some(database_url), "secret");

    {
        let app = build_app(&config).await.unwrap();
        let (status, _) = json_body(&app, submit(ALICE, BOB, 50, 10)).await;
        assert_eq!(status, StatusCode::CREATED);
        json_body(&app, submit(BOB, CAROL, 20, 11)).await;
        // Latest wins: the edge drops to 5.
        json_body(&app, submit(BOB, CAROL, 5, 12)).await;
    }

    let app = build_app(&config).await.unwrap();

    let (_, json) = json_body(&app, query(ALICE, CAROL, 5)).await;
    assert_eq!(addresses(&json), vec![ALICE, BOB, CAROL]);

    let (_, json) = json_body(&app, query(ALICE, CAROL, 6)).await;
    assert_eq!(json, serde_json::json!([]));

    let (_, json) = json_body(
        &app,
        Request::builder().uri("/stats").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(json["latestBlock"], "12");

    // Replayed history is stale against the restored state.
    let (status, json) = json_body(&app, submit(BOB, CAROL, 20, 11)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["reason"], "stale");
}

#[tokio::test]
async fn remote_sink_forwards_into_running_api() {
    let app = build_app(&ApiRuntimeConfig::for_test(None, "secret"))
        .await
        .unwrap();
    let addr = serve(app.clone()).await;

    let sink = RemoteSink::new(format!("http://{}", addr), "secret", Duration::from_secs(2), 0)
        .unwrap();
    sink.accept_trust_line(&TrustLine::from_parts(ALICE, BOB, 30, 7).unwrap())
        .await
        .unwrap();
    // A stale resend is still a successful delivery.
    sink.accept_trust_line(&TrustLine::from_parts(ALICE, BOB, 1, 6).unwrap())
        .await
        .unwrap();

    let (_, json) = json_body(&app, query(ALICE, BOB, 30)).await;
    assert_eq!(addresses(&json), vec![ALICE, BOB]);

    let intruder = RemoteSink::new(format!("http://{}", addr), "wrong", Duration::from_secs(2), 3)
        .unwrap()
        .with_backoff(Duration::from_millis(1));
    let err = intruder
        .accept_trust_line(&TrustLine::from_parts(BOB, CAROL, 1, 8).unwrap())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("403"));
}

async fn fake_users(RawQuery(query): RawQuery) -> Json<serde_json::Value> {
    let query = query.unwrap_or_default();
    if query.contains(ALICE) {
        Json(serde_json::json!({
            "status": "ok",
            "data": [{
                "id": 1,
                "username": "alice",
                "safeAddress": ALICE,
                "avatarUrl": "https://img.example/alice.png"
            }]
        }))
    } else {
        Json(serde_json::json!({ "status": "ok", "data": [] }))
    }
}

#[tokio::test]
async fn responses_are_enriched_from_profile_directory() {
    let directory = serve(Router::new().route("/api/users/", get(fake_users))).await;
    let config = ApiRuntimeConfig::for_test(None, "secret")
        .with_enrichment_url(format!("http://{}", directory));
    let app = build_app(&config).await.unwrap();

    json_body(&app, submit(ALICE, BOB, 10, 1)).await;

    let (_, json) = json_body(&app, query(ALICE, BOB, 10)).await;
    assert_eq!(json[0]["username"], "alice");
    assert_eq!(json[0]["avatarUrl"], "https://img.example/alice.png");
    assert_eq!(json[1]["safeAddress"], BOB);
    assert!(json[1]["username"].is_null());

    let response = app
        .oneshot(Request::builder().uri("/export").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert_eq!(
        text.lines().nth(1).unwrap(),
        format!("1,{},alice,https://img.example/alice.png,{},,,10", ALICE, BOB)
    );
}
