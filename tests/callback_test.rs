mod common;

use axum::http::StatusCode;
use invoice_gateway::models::invoice::InvoiceState;
use invoice_gateway::services::invoice_store::StateUpdate;
use uuid::Uuid;

use common::{create_body, response_json, response_text, TestApp};

#[tokio::test]
async fn callback_marks_invoice_paid_and_notifies_caller() {
    let app = TestApp::new().await;
    app.create(create_body("CB-1")).await;
    let invoice = app.live_invoice("CB-1").await;

    let response = app.callback(&invoice.id.to_string()).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response_text(response).await, "SUCCESS");

    assert_eq!(app.live_invoice("CB-1").await.state, InvoiceState::Paid);
    assert_eq!(
        app.notifier.urls(),
        vec!["https://shop.example.com/orders/42/paid".to_string()]
    );
}

#[tokio::test]
async fn duplicate_callbacks_are_accepted() {
    let app = TestApp::new().await;
    app.create(create_body("CB-2")).await;
    let id = app.live_invoice("CB-2").await.id.to_string();

    assert_eq!(app.callback(&id).await.status(), StatusCode::OK);
    assert_eq!(app.callback(&id).await.status(), StatusCode::OK);
    assert_eq!(app.live_invoice("CB-2").await.state, InvoiceState::Paid);
}

#[tokio::test]
async fn malformed_callback_id_is_rejected() {
    let app = TestApp::new().await;

    let response = app.callback("not-a-uuid").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(response_json(response).await["code"], "validation_error");
    assert!(app.notifier.urls().is_empty());
}

#[tokio::test]
async fn unknown_callback_id_is_not_found() {
    let app = TestApp::new().await;

    let response = app.callback(&Uuid::new_v4().to_string()).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(response_json(response).await["code"], "not_found");
}

#[tokio::test]
async fn callback_overrides_failed_state() {
    let app = TestApp::new().await;
    app.create(create_body("CB-3")).await;
    let invoice = app.live_invoice("CB-3").await;
    app.store()
        .update_state(&invoice, InvoiceState::Failed, StateUpdate::default())
        .await
        .unwrap();

    assert_eq!(
        app.callback(&invoice.id.to_string()).await.status(),
        StatusCode::OK
    );
    assert_eq!(app.live_invoice("CB-3").await.state, InvoiceState::Paid);
}

#[tokio::test]
async fn callback_without_caller_url_sends_no_notification() {
    let app = TestApp::new().await;
    let mut body = create_body("CB-4");
    body["callbackURL"] = serde_json::json!("");
    app.create(body).await;
    let invoice = app.live_invoice("CB-4").await;
    assert!(invoice.callback_url.is_none());

    assert_eq!(
        app.callback(&invoice.id.to_string()).await.status(),
        StatusCode::OK
    );
    assert!(app.notifier.urls().is_empty());
}

#[tokio::test]
async fn callback_for_superseded_invoice_is_still_recorded() {
    let app = TestApp::new().await;
    app.create(create_body("CB-5")).await;
    let old = app.live_invoice("CB-5").await;
    app.expire_now("CB-5").await;
    app.create(create_body("CB-5")).await;

    assert_eq!(
        app.callback(&old.id.to_string()).await.status(),
        StatusCode::OK
    );

    let recorded = app.store().find_by_id(old.id).await.unwrap().unwrap();
    assert_eq!(recorded.state, InvoiceState::Paid);
    assert!(recorded.deleted_at.is_some());
    assert_eq!(app.live_invoice("CB-5").await.state, InvoiceState::Unpaid);
}

#[tokio::test]
async fn status_check_after_callback_skips_provider() {
    let app = TestApp::new().await;
    let created = response_json(app.create(create_body("CB-6")).await).await;
    let invoice = app.live_invoice("CB-6").await;
    app.callback(&invoice.id.to_string()).await;

    let body = response_json(app.check(created["invoice_id"].as_str().unwrap()).await).await;
    assert_eq!(body["data"]["isPaid"], true);
    assert_eq!(app.provider.check_calls(), 0);
}
