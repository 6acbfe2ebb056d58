//! Router tests for the offline endpoints.

mod common;

use axum::{
  body::Body,
  http::{Request, StatusCode},
};
use bimo_offline::db::Operation;
use bimo_offline::network::NetworkStatus;
use bimo_offline::queue::Mutation;
use bimo_offline::server::create_router;
use serde_json::{json, Value};
use tower::ServiceExt; // for oneshot

use common::world;

async fn response_json(response: axum::response::Response) -> Value {
  let body = axum::body::to_bytes(response.into_body(), 1024 * 1024).await.unwrap();
  serde_json::from_slice(&body).unwrap()
}

fn get(uri: &str) -> Request<Body> {
  Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post(uri: &str) -> Request<Body> {
  Request::builder()
    .method("POST")
    .uri(uri)
    .body(Body::empty())
    .unwrap()
}

#[tokio::test]
async fn status_reports_network_and_queue() {
  let w = world(NetworkStatus::Offline);
  w.queue
    .enqueue(&Mutation::new(Operation::Create, "flights", "u1", json!({})))
    .unwrap();

  let response = create_router(w.service.clone())
    .oneshot(get("/offline/status"))
    .await
    .unwrap();
  assert_eq!(response.status(), StatusCode::OK);

  let body = response_json(response).await;
  assert_eq!(body["network_status"], "offline");
  assert_eq!(body["is_online"], false);
  assert_eq!(body["pending_count"], 1);
  assert_eq!(
    body["queue_stats"],
    json!({"pending": 1, "processing": 0, "completed": 0, "total": 1})
  );
}

#[tokio::test]
async fn sync_while_offline_reports_offline() {
  let w = world(NetworkStatus::Offline);
  let response = create_router(w.service.clone())
    .oneshot(post("/offline/sync"))
    .await
    .unwrap();
  assert_eq!(response.status(), StatusCode::OK);
  assert_eq!(response_json(response).await, json!({"status": "offline"}));
}

#[tokio::test]
async fn sync_drains_pending_items() {
  let w = world(NetworkStatus::Offline);
  for payload in [json!({"n": 1}), json!({"fail": true})] {
    w.queue
      .enqueue(&Mutation::new(Operation::Create, "flights", "u1", payload))
      .unwrap();
  }
  w.monitor.set_status(NetworkStatus::Online);

  let response = create_router(w.service.clone())
    .oneshot(post("/offline/sync"))
    .await
    .unwrap();
  assert_eq!(
    response_json(response).await,
    json!({"status": "drained", "total": 2, "success": 1, "failed": 1})
  );
}

#[tokio::test]
async fn storage_failure_is_a_generic_500() {
  let w = world(NetworkStatus::Online);
  let conn = rusqlite::Connection::open(w.store.path()).unwrap();
  conn.execute_batch("DROP TABLE sync_queue").unwrap();

  let response = create_router(w.service.clone())
    .oneshot(get("/offline/status"))
    .await
    .unwrap();
  assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
  assert_eq!(
    response_json(response).await,
    json!({"error": "internal server error"})
  );
}

#[tokio::test]
async fn unknown_route_is_404() {
  let w = world(NetworkStatus::Online);
  let response = create_router(w.service.clone())
    .oneshot(get("/offline/nope"))
    .await
    .unwrap();
  assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
