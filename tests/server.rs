mod common;

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use liveset_index::indexer::Indexer;
use liveset_index::progress::NoProgress;
use liveset_index::{scan, server};

use common::{live_set, write_set, TestEnv};

async fn indexed(env: &TestEnv) -> Indexer {
    let indexer = Indexer::open(&env.config()).await.unwrap();
    scan::scan(&indexer, None, Arc::new(NoProgress), &CancellationToken::new())
        .await
        .unwrap();
    indexer
}

async fn call(indexer: &Indexer, req: Request<Body>) -> (StatusCode, Value) {
    let resp = server::router(indexer.clone()).oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

async fn get(indexer: &Indexer, uri: &str) -> (StatusCode, Value) {
    call(indexer, Request::get(uri).body(Body::empty()).unwrap()).await
}

#[tokio::test]
async fn health_reports_counts() {
    let env = TestEnv::new("");
    write_set(&env.music.join("A/A.als"), &live_set(120.0, &["Serum"], &[]));
    let indexer = indexed(&env).await;

    let (status, body) = get(&indexer, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["counts"]["projects"], 1);
}

#[tokio::test]
async fn project_lookup_and_errors() {
    let env = TestEnv::new("");
    write_set(&env.music.join("A/A.als"), &live_set(120.0, &["Serum"], &[]));
    let indexer = indexed(&env).await;
    let id = indexer.snapshot().await.unwrap()[0].id;

    let (status, body) = get(&indexer, &format!("/projects/{}", id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["project"]["name"], "A");
    assert_eq!(body["project"]["status"], "ACTIVE");
    assert!(body["exports"].as_array().unwrap().is_empty());

    let (status, body) = get(&indexer, "/projects/not-a-uuid").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "bad_request");

    let (status, body) = get(
        &indexer,
        "/projects/00000000-0000-0000-0000-000000000000/similar",
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "not_found");
}

#[tokio::test]
async fn list_filters_by_status() {
    let env = TestEnv::new("");
    write_set(&env.music.join("A/A.als"), &live_set(120.0, &[], &[]));
    std::fs::write(env.music.join("A/Bad.als"), b"junk").unwrap();
    let indexer = indexed(&env).await;

    let (_, all) = get(&indexer, "/projects").await;
    assert_eq!(all.as_array().unwrap().len(), 2);

    let (status, failed) = get(&indexer, "/projects?status=PARSE_FAILED").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(failed.as_array().unwrap().len(), 1);
    assert_eq!(failed[0]["name"], "Bad");

    let (status, _) = get(&indexer, "/projects?status=sideways").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn similar_and_duplicates_routes() {
    let env = TestEnv::new("");
    let xml = live_set(120.0, &["Serum"], &["Eq8"]);
    write_set(&env.music.join("A/A.als"), &xml);
    write_set(&env.music.join("B/A.als"), &xml);
    let indexer = indexed(&env).await;
    let id = indexer.snapshot().await.unwrap()[0].id;

    let (status, body) = get(&indexer, &format!("/projects/{}/similar?k=3", id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);
    assert!(body[0]["score"].as_f64().unwrap() > 0.99);

    let (status, _) = get(&indexer, &format!("/projects/{}/similar?min_score=2", id)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = get(&indexer, "/duplicates").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["kind"], "exact");
}

#[tokio::test]
async fn rescan_route_picks_up_new_file() {
    let env = TestEnv::new("");
    let indexer = indexed(&env).await;
    let path = env.music.join("New/New.als");
    write_set(&path, &live_set(100.0, &[], &[]));

    let req = Request::post("/rescan")
        .header("content-type", "application/json")
        .body(Body::from(
            serde_json::json!({ "path": path.display().to_string() }).to_string(),
        ))
        .unwrap();
    let (status, body) = call(&indexer, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["added"], 1);

    let req = Request::post("/rescan")
        .header("content-type", "application/json")
        .body(Body::from(r#"{"path": "/definitely/elsewhere.als"}"#))
        .unwrap();
    let (status, _) = call(&indexer, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let req = Request::post("/locations/00000000-0000-0000-0000-000000000000/rescan")
        .body(Body::empty())
        .unwrap();
    let (status, body) = call(&indexer, req).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "not_found");
}
