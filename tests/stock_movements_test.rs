mod common;

use axum::http::{Method, StatusCode};
use common::TestApp;
use serde_json::json;

#[tokio::test]
async fn outbound_within_stock_applies_without_alert() {
    let app = TestApp::new().await;
    let product = app.create_product("Drill Bit", "3.20", 5).await;
    let id = product["id"].as_str().unwrap();

    let (status, _) = app.record_movement(id, "inbound", 10).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = app.record_movement(id, "outbound", 3).await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["data"]["movement"]["kind"], "outbound");
    assert_eq!(body["data"]["movement"]["quantity"], 3);
    assert_eq!(body["data"]["stock_alert"], false);
    assert!(body["data"]["alert_message"].is_null());
    assert_eq!(app.stock_of(id).await, 8);

    // 10 out of 8 is refused and leaves stock alone
    let (status, body) = app.record_movement(id, "outbound", 10).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "Unprocessable Entity");
    assert!(body["message"].as_str().unwrap().contains("available stock 8"));
    assert_eq!(app.stock_of(id).await, 8);
}

#[tokio::test]
async fn movement_is_stamped_with_acting_user() {
    let app = TestApp::new().await;
    let product = app.create_product("Pulley", "9.00", 0).await;
    let id = product["id"].as_str().unwrap();

    let (_, body) = app.record_movement(id, "inbound", 1).await;
    let movement = &body["data"]["movement"];
    let user_id = movement["user_id"].as_str().unwrap();

    let movement_id = movement["id"].as_str().unwrap();

    let (status, fetched) = app
        .call(Method::GET, &format!("/api/v1/movements/{movement_id}"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["data"]["user_id"], user_id);
    assert!(fetched["data"]["created_at"].is_string());
}

#[tokio::test]
async fn dropping_below_minimum_raises_alert() {
    let app = TestApp::new().await;
    let product = app.create_product("Valve", "15.00", 5).await;
    let id = product["id"].as_str().unwrap();
    app.record_movement(id, "inbound", 6).await;

    let (status, body) = app.record_movement(id, "outbound", 2).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["stock_alert"], true);
    assert_eq!(
        body["data"]["alert_message"],
        "Stock for product 'Valve' is below the configured minimum (5)"
    );
}

#[tokio::test]
async fn deleting_inbound_reverts_stock() {
    let app = TestApp::new().await;
    let product = app.create_product("Nozzle", "2.00", 0).await;
    let id = product["id"].as_str().unwrap();
    app.record_movement(id, "inbound", 8).await;

    let (_, body) = app.record_movement(id, "inbound", 5).await;
    let movement_id = body["data"]["movement"]["id"].as_str().unwrap().to_string();
    assert_eq!(app.stock_of(id).await, 13);

    let (status, body) = app
        .call(Method::DELETE, &format!("/api/v1/movements/{movement_id}"), None)
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(body.is_null());
    assert_eq!(app.stock_of(id).await, 8);

    let (status, _) = app
        .call(Method::GET, &format!("/api/v1/movements/{movement_id}"), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn deleting_inbound_that_was_consumed_is_refused() {
    let app = TestApp::new().await;
    let product = app.create_product("Clamp", "1.10", 0).await;
    let id = product["id"].as_str().unwrap();

    let (_, body) = app.record_movement(id, "inbound", 5).await;
    let inbound_id = body["data"]["movement"]["id"].as_str().unwrap().to_string();
    app.record_movement(id, "outbound", 4).await;

    let (status, _) = app
        .call(Method::DELETE, &format!("/api/v1/movements/{inbound_id}"), None)
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(app.stock_of(id).await, 1);
}

#[tokio::test]
async fn updating_movement_rebases_stock() {
    let app = TestApp::new().await;
    let product = app.create_product("Belt", "6.50", 0).await;
    let id = product["id"].as_str().unwrap();
    app.record_movement(id, "inbound", 10).await;

    let (_, body) = app.record_movement(id, "outbound", 4).await;
    let movement_id = body["data"]["movement"]["id"].as_str().unwrap().to_string();
    let movement_id = movement_id.as_str();
    assert_eq!(app.stock_of(id).await, 6);
    let (_, before) = app
        .call(Method::GET, &format!("/api/v1/movements/{movement_id}"), None)
        .await;

    let (status, body) = app
        .call(
            Method::PUT,
            &format!("/api/v1/movements/{movement_id}"),
            Some(json!({ "kind": "inbound" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["movement"]["kind"], "inbound");
    assert_eq!(body["data"]["movement"]["quantity"], 4);
    assert_eq!(app.stock_of(id).await, 14);
    let (_, after) = app
        .call(Method::GET, &format!("/api/v1/movements/{movement_id}"), None)
        .await;
    assert_eq!(after["data"]["created_at"], before["data"]["created_at"]);

    // inbound 4 -> outbound 15 needs 15 from 10
    let (status, body) = app
        .call(
            Method::PUT,
            &format!("/api/v1/movements/{movement_id}"),
            Some(json!({ "kind": "outbound", "quantity": 15 })),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "Unprocessable Entity");
    assert!(body["message"]
        .as_str()
        .unwrap()
        .starts_with("Insufficient stock: "));
    assert!(body["request_id"].is_string());
    assert_eq!(app.stock_of(id).await, 14);

    let (status, _) = app
        .call(
            Method::PUT,
            &format!("/api/v1/movements/{movement_id}"),
            Some(json!({ "quantity": 0 })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // the product a movement belongs to cannot be changed
    let other = app.create_product("Other Belt", "6.50", 0).await;
    let (status, body) = app
        .call(
            Method::PUT,
            &format!("/api/v1/movements/{movement_id}"),
            Some(json!({ "product_id": other["id"] })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].as_str().unwrap().contains("product_id"));
    assert_eq!(app.stock_of(id).await, 14);
}

#[tokio::test]
async fn invalid_movements_are_rejected() {
    let app = TestApp::new().await;
    let product = app.create_product("Hinge", "2.40", 0).await;
    let id = product["id"].as_str().unwrap();

    let (status, _) = app.record_movement(id, "inbound", 0).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app.record_movement(id, "inbound", -3).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = app.record_movement(id, "sideways", 3).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Bad Request");
    assert!(body["message"].as_str().unwrap().contains("sideways"));

    let (status, body) = app
        .call(
            Method::POST,
            "/api/v1/movements",
            Some(json!({ "product_id": id, "kind": "inbound" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Bad Request");

    let (status, body) = app
        .call(Method::GET, "/api/v1/movements/not-a-uuid", None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].is_string());

    let (status, body) = app
        .call(Method::GET, "/api/v1/movements?kind=sideways", None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Bad Request");

    let (status, _) = app
        .record_movement("5f1e4a8e-0000-4000-8000-000000000000", "inbound", 3)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    assert_eq!(app.stock_of(id).await, 0);
}

#[tokio::test]
async fn list_is_newest_first_with_filters() {
    let app = TestApp::new().await;
    let a = app.create_product("Alpha", "1.00", 0).await;
    let b = app.create_product("Beta", "1.00", 0).await;
    let a_id = a["id"].as_str().unwrap();
    let b_id = b["id"].as_str().unwrap();

    app.record_movement(a_id, "inbound", 5).await;
    app.record_movement(b_id, "inbound", 7).await;
    let (_, last) = app.record_movement(a_id, "outbound", 2).await;

    let (status, body) = app.call(Method::GET, "/api/v1/movements", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["pagination"]["total"], 3);
    assert_eq!(
        body["data"]["data"][0]["id"],
        last["data"]["movement"]["id"]
    );

    let (_, body) = app
        .call(
            Method::GET,
            &format!("/api/v1/movements?product_id={a_id}&kind=inbound"),
            None,
        )
        .await;
    let rows = body["data"]["data"].as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["quantity"], 5);

    let (_, body) = app
        .call(Method::GET, "/api/v1/movements?per_page=2&page=2", None)
        .await;
    assert_eq!(body["data"]["data"].as_array().unwrap().len(), 1);
    assert_eq!(body["data"]["pagination"]["total_pages"], 2);
}

#[tokio::test]
async fn stock_matches_net_of_recorded_movements() {
    let app = TestApp::new().await;
    let product = app.create_product("Sprocket", "4.75", 0).await;
    let id = product["id"].as_str().unwrap();

    let script = [
        ("inbound", 12),
        ("outbound", 5),
        ("outbound", 9),
        ("inbound", 3),
        ("outbound", 10),
        ("outbound", 1),
    ];
    for (kind, quantity) in script {
        app.record_movement(id, kind, quantity).await;
    }

    let (_, body) = app
        .call(
            Method::GET,
            &format!("/api/v1/movements?product_id={id}&per_page=100"),
            None,
        )
        .await;
    let net: i64 = body["data"]["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| {
            let qty = m["quantity"].as_i64().unwrap();
            if m["kind"] == "inbound" {
                qty
            } else {
                -qty
            }
        })
        .sum();
    assert_eq!(net, 12 - 5 + 3 - 10);
    assert_eq!(app.stock_of(id).await, net);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_outbound_never_oversells() {
    use stockroom_api::{
        entities::MovementKind, errors::ServiceError, services::stock_movements::CreateMovement,
    };

    let app = TestApp::with_pool_size(8).await;
    let product = app.create_product("Socket Set", "40.00", 0).await;
    let id = product["id"].as_str().unwrap();
    app.record_movement(id, "inbound", 10).await;

    let product_id = id.parse().unwrap();
    let user = app
        .state
        .auth
        .validate_access_token(&app.access_token)
        .await
        .unwrap();

    let mut tasks = Vec::new();
    for _ in 0..20 {
        let service = app.state.movements.clone();
        let user_id = user.user_id;
        tasks.push(tokio::spawn(async move {
            service
                .create_movement(
                    user_id,
                    CreateMovement {
                        product_id,
                        kind: MovementKind::Outbound,
                        quantity: 1,
                    },
                )
                .await
        }));
    }

    let mut accepted = 0;
    let mut insufficient = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => accepted += 1,
            Err(ServiceError::InsufficientStock(_)) => insufficient += 1,
            Err(other) => panic!("movement failed instead of queueing: {other}"),
        }
    }
    assert_eq!(accepted, 10, "exactly 10 single-unit outbounds fit in stock 10");
    assert_eq!(insufficient, 10);
    assert_eq!(app.stock_of(id).await, 0);
}
