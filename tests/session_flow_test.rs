// Integration tests for magic-link sign-in over HTTP

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use keyway::api::{create_router, AppState};
use keyway::credentials::{Cipher, CredentialStore, CredentialVault, InMemoryCredentialStore};
use keyway::identity::LocalIdentityGateway;
use keyway::oauth::{HttpTokenEndpoint, ProviderRegistry, StateManager};
use keyway::queue::InMemoryQueue;
use keyway::session::SessionIssuer;
use keyway::webhook::WebhookGateway;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

struct TestApp {
    app: Router,
    sessions: SessionIssuer,
    store: Arc<InMemoryCredentialStore>,
}

fn create_test_app(cookie_secure: bool) -> TestApp {
    let store = Arc::new(InMemoryCredentialStore::new());
    let identity =
        Arc::new(LocalIdentityGateway::new(b"0123456789abcdef0123456789abcdef").unwrap());
    let providers = Arc::new(ProviderRegistry::default());

    let sessions = SessionIssuer::new(
        identity,
        store.clone(),
        "http://localhost:8080",
        Duration::from_secs(1_209_600),
        true,
        Duration::from_secs(5),
    );

    let app = create_router(AppState {
        sessions: sessions.clone(),
        vault: CredentialVault::new(
            store.clone(),
            Arc::new(Cipher::from_bytes(&[7u8; 32]).unwrap()),
            providers.clone(),
            Arc::new(HttpTokenEndpoint::new(Duration::from_secs(5)).unwrap()),
            Duration::from_secs(5),
        ),
        webhooks: WebhookGateway::new(
            b"whsec",
            300,
            Arc::new(InMemoryQueue::new()),
            Duration::from_secs(1),
        ),
        providers,
        oauth_states: StateManager::new(600),
        base_url: "http://localhost:8080".to_string(),
        cookie_secure,
    });

    TestApp {
        app,
        sessions,
        store,
    }
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn get_with_cookie(uri: &str, cookie: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(header::COOKIE, cookie)
        .body(Body::empty())
        .unwrap()
}

fn set_cookie(response: &axum::response::Response) -> String {
    response
        .headers()
        .get(header::SET_COOKIE)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string()
}

/// "session=<value>" from a Set-Cookie header
fn cookie_pair(set_cookie: &str) -> String {
    set_cookie.split(';').next().unwrap().to_string()
}

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

/// Link callback sets the session cookie and the dashboard accepts it.
#[tokio::test]
async fn test_magic_link_sign_in() {
    let test = create_test_app(false);

    let link = test.sessions.request_login("a@x.com").await.unwrap();
    let path = link.url.trim_start_matches("http://localhost:8080");

    let response = test.app.clone().oneshot(get(path)).await.unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(response.headers()[header::LOCATION], "/dashboard");

    let cookie = set_cookie(&response);
    assert!(cookie.contains("HttpOnly"));
    assert!(cookie.contains("SameSite=Lax"));
    assert!(cookie.contains("Path=/"));
    assert!(cookie.contains("Max-Age=1209600"));
    assert!(!cookie.contains("Secure"));

    let response = test
        .app
        .oneshot(get_with_cookie("/dashboard", &cookie_pair(&cookie)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["email"], "a@x.com");

    let uid = body["uid"].as_str().unwrap();
    assert!(test.store.get_user(uid).await.unwrap().is_some());
}

/// Secure flag is set when configured.
#[tokio::test]
async fn test_secure_cookie() {
    let test = create_test_app(true);

    let link = test.sessions.request_login("a@x.com").await.unwrap();
    let uri = format!("/auth/magic/callback?code={}&email=a%40x.com", link.code);

    let response = test.app.oneshot(get(&uri)).await.unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);
    assert!(set_cookie(&response).contains("Secure"));
}

/// A redeemed link cannot be used twice.
#[tokio::test]
async fn test_link_is_single_use() {
    let test = create_test_app(false);

    let link = test.sessions.request_login("a@x.com").await.unwrap();
    let path = link.url.trim_start_matches("http://localhost:8080").to_string();

    let first = test.app.clone().oneshot(get(&path)).await.unwrap();
    assert_eq!(first.status(), StatusCode::FOUND);

    let second = test.app.oneshot(get(&path)).await.unwrap();
    assert_eq!(second.status(), StatusCode::UNAUTHORIZED);
}

/// Missing or invalid email on the callback: 400.
#[tokio::test]
async fn test_callback_bad_request() {
    let test = create_test_app(false);

    let missing_email = test
        .app
        .clone()
        .oneshot(get("/auth/magic/callback?oobCode=abc"))
        .await
        .unwrap();
    assert_eq!(missing_email.status(), StatusCode::BAD_REQUEST);

    let invalid_email = test
        .app
        .clone()
        .oneshot(get("/auth/magic/callback?oobCode=abc&email=nope"))
        .await
        .unwrap();
    assert_eq!(invalid_email.status(), StatusCode::BAD_REQUEST);

    let missing_code = test
        .app
        .oneshot(get("/auth/magic/callback?email=a%40x.com"))
        .await
        .unwrap();
    assert_eq!(missing_code.status(), StatusCode::BAD_REQUEST);
}

/// The send endpoint never echoes the link.
#[tokio::test]
async fn test_send_link_does_not_leak_code() {
    let test = create_test_app(false);

    let response = test
        .app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/auth/magic/send")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"email":"a@x.com"}"#))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    let text = body.to_string();
    assert!(!text.contains("oobCode"));
    assert!(!text.contains("http"));
}

/// Dashboard without a valid session: 401.
#[tokio::test]
async fn test_dashboard_requires_session() {
    let test = create_test_app(false);

    let anonymous = test.app.clone().oneshot(get("/dashboard")).await.unwrap();
    assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED);

    let forged = test
        .app
        .oneshot(get_with_cookie("/dashboard", "session=forged.token.value"))
        .await
        .unwrap();
    assert_eq!(forged.status(), StatusCode::UNAUTHORIZED);
}

/// Logout clears the cookie.
#[tokio::test]
async fn test_logout_clears_cookie() {
    let test = create_test_app(false);

    let response = test
        .app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/auth/logout")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let cookie = set_cookie(&response);
    assert!(cookie.starts_with("session=;"));
    assert!(cookie.contains("Max-Age=0"));
}
