//! Sign-in over HTTP.

#![allow(clippy::unwrap_used)]

use quickpoll_integration_tests::{TestServer, json_body};
use reqwest::StatusCode;
use serde_json::json;

#[tokio::test]
async fn test_one_client_per_email() {
    let server = TestServer::spawn().await;
    let laptop = TestServer::client();
    let phone = TestServer::client();

    let response = server
        .post(&laptop, "/auth/signin", &json!({ "email": "A@x.com" }))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let session = json_body(response).await;
    assert_eq!(session["session"]["email"], "a@x.com");
    assert_eq!(session["session"]["name"], "a");

    let response = server
        .post(&phone, "/auth/signin", &json!({ "email": "a@x.com" }))
        .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let error = json_body(response).await;
    assert_eq!(error["error"]["code"], "ALREADY_SIGNED_IN");
    assert!(error["error"]["details"]["signedInAt"].is_string());

    let response = server
        .post(&laptop, "/auth/signin", &json!({ "email": "a@x.com", "name": "Ann" }))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_sign_out_frees_the_email() {
    let server = TestServer::spawn().await;
    let laptop = TestServer::client();
    let phone = TestServer::client();

    server
        .post(&laptop, "/auth/signin", &json!({ "email": "b@x.com" }))
        .await;

    let status = json_body(server.get(&laptop, "/auth/status").await).await;
    assert_eq!(status["signedIn"], true);
    assert_eq!(status["email"], "b@x.com");

    let response = server.post(&laptop, "/auth/signout", &json!({})).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["hadSession"], true);

    let again = server.post(&laptop, "/auth/signout", &json!({ "email": "b@x.com" })).await;
    assert_eq!(again.status(), StatusCode::OK);
    assert_eq!(json_body(again).await["hadSession"], false);

    let status = json_body(server.get(&phone, "/auth/status?email=b@x.com").await).await;
    assert_eq!(status["signedIn"], false);

    let response = server
        .post(&phone, "/auth/signin", &json!({ "email": "b@x.com" }))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_invalid_email() {
    let server = TestServer::spawn().await;
    let response = server
        .post(&TestServer::client(), "/auth/signin", &json!({ "email": "nope" }))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"]["code"], "VALIDATION_FAILED");
}
