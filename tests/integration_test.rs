//! Integration tests for the route endpoints
//!
//! These tests drive the full router (routing, extraction, services and the
//! redb-backed store) against a temporary database file.

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;
use tower::ServiceExt;

use routeshare::database::Store;
use routeshare::route::create_app;
use routeshare::state::AppState;

/// Helper function to create a test application with a temporary database
fn setup_test_app() -> (Router, NamedTempFile) {
    let temp_db = NamedTempFile::new().expect("Failed to create temp file");
    let db_path = temp_db.path().to_str().unwrap();

    let store = Store::open(db_path).expect("Failed to initialize test database");
    let app = create_app(AppState::new(Arc::new(store)));

    (app, temp_db)
}

/// Sends a request and returns the status with the parsed JSON body
async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("Failed to read response body")
        .to_bytes();

    (status, serde_json::from_slice(&bytes).expect("Failed to parse JSON"))
}

fn loop_a() -> Value {
    json!({
        "name": "Loop A",
        "city": "Ghent",
        "distance_km": 10,
        "elevation_m": 50,
        "creator": "bob",
        "checkpoints": [
            { "name": "Start", "latitude": 0, "longitude": 0, "order": 0 },
            { "name": "End", "latitude": 1, "longitude": 1, "order": 1 }
        ]
    })
}

fn route_payload(name: &str, city: &str, distance_km: f64) -> Value {
    let mut payload = loop_a();
    payload["name"] = json!(name);
    payload["city"] = json!(city);
    payload["distance_km"] = json!(distance_km);
    payload
}

async fn create(app: &Router, payload: Value) -> String {
    let (status, body) = send(app, "POST", "/routes", Some(payload)).await;
    assert_eq!(status, StatusCode::CREATED, "unexpected body: {body}");
    body["route_id"].as_str().unwrap().to_string()
}

fn names(body: &Value) -> Vec<&str> {
    body["routes"]
        .as_array()
        .unwrap()
        .iter()
        .map(|route| route["name"].as_str().unwrap())
        .collect()
}

#[tokio::test]
async fn test_create_then_get_route() {
    let (app, _temp_db) = setup_test_app();

    let (status, body) = send(&app, "POST", "/routes", Some(loop_a())).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["message"], "Route created successfully");
    let route_id = body["route_id"].as_str().unwrap();
    assert_eq!(route_id.len(), 24);

    let (status, body) = send(&app, "GET", &format!("/routes/{route_id}"), None).await;
    assert_eq!(status, StatusCode::OK);

    let route = &body["route"];
    assert_eq!(route["_id"], route_id);
    assert_eq!(route["name"], "Loop A");
    assert_eq!(route["city"], "Ghent");
    assert_eq!(route["distance_km"], 10.0);
    assert_eq!(route["elevation_m"], 50.0);
    assert_eq!(route["creator"], "bob");
    assert_eq!(route["description"], "");
    assert_eq!(route["popularity"], 0);
    assert_eq!(route["likedBy"], json!([]));
    assert!(route["created_at"].is_string());
    assert_eq!(route["checkpoints"][0]["name"], "Start");
    assert_eq!(route["checkpoints"][1]["latitude"], 1.0);
    assert_eq!(route["checkpoints"][1]["order"], 1);
}

#[tokio::test]
async fn test_create_route_missing_fields() {
    let (app, _temp_db) = setup_test_app();

    for field in ["name", "city", "distance_km", "elevation_m", "creator", "checkpoints"] {
        let mut payload = loop_a();
        payload.as_object_mut().unwrap().remove(field);

        let (status, body) = send(&app, "POST", "/routes", Some(payload)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "missing {field}");
        assert!(body["error"].as_str().unwrap().starts_with("Missing required fields"));
    }

    // null counts as absent
    let mut payload = loop_a();
    payload["creator"] = Value::Null;
    let (status, _) = send(&app, "POST", "/routes", Some(payload)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_create_route_rejects_too_few_checkpoints() {
    let (app, _temp_db) = setup_test_app();

    let single = json!([{ "name": "Start", "latitude": 0, "longitude": 0, "order": 0 }]);
    for checkpoints in [json!([]), single, json!("not a list")] {
        let mut payload = loop_a();
        payload["checkpoints"] = checkpoints;

        let (status, body) = send(&app, "POST", "/routes", Some(payload)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            body["error"],
            "Checkpoints must be an array with at least 2 items"
        );
    }

    let (_, body) = send(&app, "GET", "/routes", None).await;
    assert_eq!(body["routes"], json!([]));
}

#[tokio::test]
async fn test_create_route_rejects_incomplete_checkpoint() {
    let (app, _temp_db) = setup_test_app();

    let mut payload = loop_a();
    payload["checkpoints"][1]
        .as_object_mut()
        .unwrap()
        .remove("order");
    let (status, body) = send(&app, "POST", "/routes", Some(payload)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body["error"],
        "Each checkpoint must have name, latitude, longitude and order"
    );

    let mut payload = loop_a();
    payload["checkpoints"][0]["latitude"] = Value::Null;
    let (status, body) = send(&app, "POST", "/routes", Some(payload)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body["error"],
        "Each checkpoint must have name, latitude, longitude and order"
    );
}

#[tokio::test]
async fn test_create_route_numeric_coercion() {
    let (app, _temp_db) = setup_test_app();

    let mut payload = loop_a();
    payload["distance_km"] = json!("12.5");
    payload["elevation_m"] = json!(" 80 ");
    payload["checkpoints"][0]["order"] = json!("3");
    let route_id = create(&app, payload).await;

    let (_, body) = send(&app, "GET", &format!("/routes/{route_id}"), None).await;
    assert_eq!(body["route"]["distance_km"], 12.5);
    assert_eq!(body["route"]["elevation_m"], 80.0);
    assert_eq!(body["route"]["checkpoints"][0]["order"], 3);

    let mut payload = loop_a();
    payload["distance_km"] = json!("far");
    let (status, body) = send(&app, "POST", "/routes", Some(payload)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "distance_km and elevation_m must be numeric");

    let mut payload = loop_a();
    payload["elevation_m"] = json!(-5);
    let (status, _) = send(&app, "POST", "/routes", Some(payload)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_create_route_keeps_description() {
    let (app, _temp_db) = setup_test_app();

    let mut payload = loop_a();
    payload["description"] = json!("Flat loop along the canal");
    let route_id = create(&app, payload).await;

    let (_, body) = send(&app, "GET", &format!("/routes/{route_id}"), None).await;
    assert_eq!(body["route"]["description"], "Flat loop along the canal");
}

#[tokio::test]
async fn test_malformed_json_body() {
    let (app, _temp_db) = setup_test_app();

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/routes")
                .header("content-type", "application/json")
                .body(Body::from("{ not json"))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_get_route_invalid_and_missing_id() {
    let (app, _temp_db) = setup_test_app();

    let (status, body) = send(&app, "GET", "/routes/not-an-id", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Invalid route id");

    let (status, body) = send(&app, "GET", "/routes/65f1c0ffee0000000000abcd", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Route not found");
}

#[tokio::test]
async fn test_list_routes_with_city_filter() {
    let (app, _temp_db) = setup_test_app();

    create(&app, route_payload("Canal", "Ghent", 8.0)).await;
    create(&app, route_payload("Harbour", "Antwerp", 15.0)).await;
    create(&app, route_payload("Castle", "Ghent", 4.0)).await;

    let (status, body) = send(&app, "GET", "/routes", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(names(&body), vec!["Canal", "Harbour", "Castle"]);

    let (_, body) = send(&app, "GET", "/routes?city=Ghent", None).await;
    assert_eq!(names(&body), vec!["Canal", "Castle"]);

    // Exact match only
    let (_, body) = send(&app, "GET", "/routes?city=ghent", None).await;
    assert_eq!(body["routes"], json!([]));

    // An empty value means no filter
    let (_, body) = send(&app, "GET", "/routes?city=", None).await;
    assert_eq!(body["routes"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn test_list_routes_sorted_by_distance_and_date() {
    let (app, _temp_db) = setup_test_app();

    create(&app, route_payload("Medium", "Ghent", 10.0)).await;
    tokio::time::sleep(Duration::from_millis(5)).await;
    create(&app, route_payload("Long", "Ghent", 21.1)).await;
    tokio::time::sleep(Duration::from_millis(5)).await;
    create(&app, route_payload("Short", "Ghent", 5.0)).await;

    let (_, body) = send(&app, "GET", "/routes?sortBy=distance", None).await;
    assert_eq!(names(&body), vec!["Short", "Medium", "Long"]);

    let (_, body) = send(&app, "GET", "/routes?sortBy=date", None).await;
    assert_eq!(names(&body), vec!["Short", "Long", "Medium"]);

    let (_, body) = send(&app, "GET", "/routes?sortBy=distance&city=Antwerp", None).await;
    assert_eq!(body["routes"], json!([]));
}

#[tokio::test]
async fn test_list_routes_sorted_by_popularity() {
    let (app, _temp_db) = setup_test_app();

    let quiet = create(&app, route_payload("Quiet", "Ghent", 3.0)).await;
    let busy = create(&app, route_payload("Busy", "Ghent", 3.0)).await;
    create(&app, route_payload("Untouched", "Ghent", 3.0)).await;
    let also_quiet = create(&app, route_payload("Also quiet", "Ghent", 3.0)).await;

    for user in ["ann", "ben", "cy"] {
        send(&app, "POST", &format!("/routes/{busy}/like"), Some(json!({ "user": user }))).await;
    }
    send(&app, "POST", &format!("/routes/{quiet}/like"), Some(json!({ "user": "ann" }))).await;
    send(&app, "POST", &format!("/routes/{also_quiet}/like"), Some(json!({ "user": "ben" }))).await;

    let (status, body) = send(&app, "GET", "/routes?sortBy=popularity", None).await;
    assert_eq!(status, StatusCode::OK);
    // Ties keep the natural (insertion) order
    assert_eq!(names(&body), vec!["Busy", "Quiet", "Also quiet", "Untouched"]);

    let popularity: Vec<i64> = body["routes"]
        .as_array()
        .unwrap()
        .iter()
        .map(|route| route["popularity"].as_i64().unwrap())
        .collect();
    assert_eq!(popularity, vec![3, 1, 1, 0]);
}

#[tokio::test]
async fn test_list_routes_invalid_sort() {
    let (app, _temp_db) = setup_test_app();

    let (status, body) = send(&app, "GET", "/routes?sortBy=name", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body["error"],
        "Invalid sortBy value. Use distance, date or popularity"
    );
}

#[tokio::test]
async fn test_update_route_merges_fields() {
    let (app, _temp_db) = setup_test_app();
    let route_id = create(&app, loop_a()).await;

    let (status, body) = send(
        &app,
        "PUT",
        &format!("/routes/{route_id}"),
        Some(json!({ "name": "Loop B", "surface": "gravel" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Route updated successfully");

    let (_, body) = send(&app, "GET", &format!("/routes/{route_id}"), None).await;
    assert_eq!(body["route"]["name"], "Loop B");
    assert_eq!(body["route"]["surface"], "gravel");
    assert_eq!(body["route"]["city"], "Ghent");
    assert_eq!(body["route"]["distance_km"], 10.0);
}

#[tokio::test]
async fn test_update_route_errors() {
    let (app, _temp_db) = setup_test_app();
    let route_id = create(&app, loop_a()).await;

    let (status, body) = send(&app, "PUT", &format!("/routes/{route_id}"), Some(json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "No fields provided for update");

    // Empty payload is reported before the malformed id
    let (status, body) = send(&app, "PUT", "/routes/nope", Some(json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "No fields provided for update");

    let (status, body) = send(&app, "PUT", "/routes/nope", Some(json!({ "name": "x" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Invalid route id");

    let (status, _) = send(
        &app,
        "PUT",
        "/routes/65f1c0ffee0000000000abcd",
        Some(json!({ "name": "x" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(
        &app,
        "PUT",
        &format!("/routes/{route_id}"),
        Some(json!({ "_id": "65f1c0ffee0000000000abcd" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_update_with_identical_values_still_succeeds() {
    let (app, _temp_db) = setup_test_app();
    let route_id = create(&app, loop_a()).await;

    let (status, _) = send(
        &app,
        "PUT",
        &format!("/routes/{route_id}"),
        Some(json!({ "name": "Loop A" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_delete_route() {
    let (app, _temp_db) = setup_test_app();
    let route_id = create(&app, loop_a()).await;

    let (status, body) = send(&app, "DELETE", &format!("/routes/{route_id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Route deleted successfully");

    let (status, _) = send(&app, "GET", &format!("/routes/{route_id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, "DELETE", &format!("/routes/{route_id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send(&app, "DELETE", "/routes/123", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Invalid route id");
}

#[tokio::test]
async fn test_unconnected_store_reports_internal_error() {
    let app = create_app(AppState::new(Arc::new(Store::new())));

    let (status, body) = send(&app, "GET", "/routes", None).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "Internal server error");

    // Validation still happens before the store is touched
    let (status, _) = send(&app, "GET", "/routes/bad", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_bad_query_string_uses_error_shape() {
    let (app, _temp_db) = setup_test_app();

    let (status, body) = send(&app, "GET", "/routes?sortBy=date&sortBy=popularity", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"]
        .as_str()
        .unwrap()
        .contains("Failed to deserialize query string"));
}

#[tokio::test]
async fn test_bad_path_segment_uses_error_shape() {
    let (app, _temp_db) = setup_test_app();

    // Not valid UTF-8 once percent-decoded
    let (status, body) = send(&app, "GET", "/routes/%FF", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    let (status, body) = send(
        &app,
        "POST",
        "/routes/%FF/like",
        Some(json!({ "user": "carol" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
}
