mod common;

use axum::http::{Method, StatusCode};
use common::TestApp;
use serde_json::json;

#[tokio::test]
async fn protected_routes_require_a_token() {
    let app = TestApp::new().await;

    let (status, _) = app.request(Method::GET, "/api/v1/items", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app
        .request(Method::GET, "/api/v1/items", None, Some("not-a-real-token"))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // Health and status stay open
    let (status, body) = app.request(Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["database"], "connected");

    let (status, body) = app.request(Method::GET, "/api/v1/status", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "running");
}

#[tokio::test]
async fn register_login_logout_flow() {
    let app = TestApp::new().await;

    let (status, body) = app
        .request(
            Method::POST,
            "/api/v1/auth/register",
            Some(json!({
                "name": "Ada",
                "email": "ada@example.com",
                "password": "analytical engine"
            })),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["user"]["email"], "ada@example.com");
    let registered_token = body["token"].as_str().expect("token").to_string();

    // Token from registration works
    let (status, me) = app
        .request(Method::GET, "/api/v1/auth/me", None, Some(&registered_token))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["name"], "Ada");

    // Duplicate email is a field-level validation failure
    let (status, body) = app
        .request(
            Method::POST,
            "/api/v1/auth/register",
            Some(json!({
                "name": "Ada again",
                "email": "ada@example.com",
                "password": "analytical engine"
            })),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["errors"][0]["field"], "email");

    // Wrong password is rejected without leaking which part was wrong
    let (status, body) = app
        .request(
            Method::POST,
            "/api/v1/auth/login",
            Some(json!({ "email": "ada@example.com", "password": "difference engine" })),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["message"]
        .as_str()
        .unwrap_or_default()
        .contains("Invalid credentials"));

    let (status, body) = app
        .request(
            Method::POST,
            "/api/v1/auth/login",
            Some(json!({ "email": "ada@example.com", "password": "analytical engine" })),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let login_token = body["token"].as_str().expect("token").to_string();

    // Logout revokes exactly the presented token
    let (status, _) = app
        .request(Method::POST, "/api/v1/auth/logout", None, Some(&login_token))
        .await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = app
        .request(Method::GET, "/api/v1/auth/me", None, Some(&login_token))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = app
        .request(Method::GET, "/api/v1/auth/me", None, Some(&registered_token))
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn item_crud_over_http() {
    let app = TestApp::new().await;

    let (status, item) = app
        .post(
            "/api/v1/items",
            json!({
                "sku": "ABC-DEF-123",
                "name": "Boxed widget",
                "description": "A widget in a box",
                "initial_quantity": 4
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(item["quantity"], 4);
    assert_eq!(item["baseline_quantity"], 4);
    let item_id = item["id"].as_str().expect("id").to_string();

    // Bad SKU format
    let (status, body) = app
        .post(
            "/api/v1/items",
            json!({ "sku": "lowercase-sku-1", "name": "Nope" }),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["errors"][0]["field"], "sku");

    // Duplicate SKU
    let (status, body) = app
        .post(
            "/api/v1/items",
            json!({ "sku": "ABC-DEF-123", "name": "Copycat" }),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["errors"][0]["field"], "sku");

    let (status, fetched) = app.get(&format!("/api/v1/items/{item_id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["name"], "Boxed widget");

    let (status, updated) = app
        .put(
            &format!("/api/v1/items/{item_id}"),
            json!({ "name": "Renamed widget" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["name"], "Renamed widget");
    assert_eq!(updated["quantity"], 4);

    // Search finds it case-insensitively
    let (status, listing) = app.get("/api/v1/items?search=renamed").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listing["total"], 1);
    assert_eq!(listing["data"][0]["sku"], "ABC-DEF-123");

    let (status, _) = app.delete(&format!("/api/v1/items/{item_id}")).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = app.get(&format!("/api/v1/items/{item_id}")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn movements_over_http() {
    let app = TestApp::new().await;
    let item = app.seed_item("MOV-API-001", "Tracked widget", 10).await;

    let (status, body) = app
        .post(
            "/api/v1/stock-movements",
            json!({
                "item_id": item.id,
                "kind": "increase",
                "amount": 5,
                "note": "delivery"
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["item"]["quantity"], 15);
    assert_eq!(body["movement"]["kind"], "increase");
    assert_eq!(body["movement"]["amount"], 5);
    let movement_id = body["movement"]["id"].as_str().expect("id").to_string();

    // Insufficient stock surfaces as a field error with both quantities
    let (status, body) = app
        .post(
            "/api/v1/stock-movements",
            json!({ "item_id": item.id, "kind": "decrease", "amount": 100 }),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["errors"][0]["field"], "amount");
    let message = body["errors"][0]["message"].as_str().unwrap_or_default();
    assert!(message.contains("15"), "advisory message names current stock: {message}");
    assert!(message.contains("100"), "advisory message names request: {message}");

    // Bad kind and non-positive amount
    let (status, body) = app
        .post(
            "/api/v1/stock-movements",
            json!({ "item_id": item.id, "kind": "transfer", "amount": 0 }),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    let fields: Vec<&str> = body["errors"]
        .as_array()
        .expect("errors")
        .iter()
        .filter_map(|e| e["field"].as_str())
        .collect();
    assert!(fields.contains(&"kind"));
    assert!(fields.contains(&"amount"));

    // Over-long note
    let (status, body) = app
        .post(
            "/api/v1/stock-movements",
            json!({
                "item_id": item.id,
                "kind": "increase",
                "amount": 1,
                "note": "x".repeat(1001)
            }),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["errors"][0]["field"], "note");
    assert!(body["errors"][0]["message"]
        .as_str()
        .unwrap_or_default()
        .contains("1000"));

    // Unknown item
    let (status, body) = app
        .post(
            "/api/v1/stock-movements",
            json!({
                "item_id": uuid::Uuid::new_v4(),
                "kind": "increase",
                "amount": 1
            }),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["errors"][0]["field"], "item_id");

    // History includes resolved item and actor
    let (status, listing) = app
        .get(&format!("/api/v1/stock-movements?item_id={}", item.id))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listing["total"], 1);
    assert_eq!(listing["data"][0]["item"]["sku"], "MOV-API-001");
    assert_eq!(
        listing["data"][0]["actor"]["id"].as_str(),
        Some(app.user_id.to_string().as_str())
    );

    let (status, record) = app.get(&format!("/api/v1/stock-movements/{movement_id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(record["note"], "delivery");

    // Nested per-item history matches the flat listing
    let (status, nested) = app
        .get(&format!("/api/v1/items/{}/stock-movements", item.id))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(nested["total"], 1);
    assert_eq!(nested["data"][0]["id"].as_str(), Some(movement_id.as_str()));

    let (status, _) = app
        .get(&format!(
            "/api/v1/items/{}/stock-movements",
            uuid::Uuid::new_v4()
        ))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Items with history cannot be deleted
    let (status, body) = app.delete(&format!("/api/v1/items/{}", item.id)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["message"]
        .as_str()
        .unwrap_or_default()
        .contains("cannot be deleted"));
}
