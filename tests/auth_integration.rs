//! Integration tests for the `clientlogin` flow against a mock API.

use std::sync::{Arc, Mutex};

use serde_json::json;
use tracing::field::{Field, Visit};
use tracing::span::{Attributes, Id};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry::LookupSpan;
use wiremock::matchers::{body_string_contains, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use commons_mwapi::session::{KEY_AUTH_COOKIE, KEY_IS_USER_LOGGED_IN};
use commons_mwapi::{
    ApiError, AuthController, AuthState, AuthStatus, ClientConfig, MemorySessionStore, MwApi,
    SessionStore,
};
mod support;
use support::socket_guard::start_mock_server_or_skip;

const API_PATH: &str = "/w/api.php";

fn controller(server: &MockServer, store: Arc<MemorySessionStore>) -> (Arc<MwApi>, AuthController) {
    controller_with(&ClientConfig::with_base_url(&server.uri()), store)
}

fn controller_with(
    config: &ClientConfig,
    store: Arc<MemorySessionStore>,
) -> (Arc<MwApi>, AuthController) {
    let api = Arc::new(MwApi::new(&config.commons_api_url, config).unwrap());
    let auth = AuthController::new(Arc::clone(&api), store, config);
    (api, auth)
}

fn two_factor_prompt() -> serde_json::Value {
    json!({"clientlogin": {
        "status": "UI",
        "message": "Enter a verification code from your authenticator app.",
        "requests": [{
            "id": "TOTPAuthenticationRequest",
            "provider": "Two-factor authentication (OATH).",
            "account": "Alice"
        }]
    }})
}

async fn mount_login_token(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path(API_PATH))
        .and(query_param("action", "query"))
        .and(query_param("meta", "tokens"))
        .and(query_param("type", "login"))
        .and(query_param("format", "json"))
        .and(query_param("formatversion", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "batchcomplete": true,
            "query": {"tokens": {"logintoken": "abc+\\"}}
        })))
        .mount(server)
        .await;
}

async fn mount_clientlogin(server: &MockServer, body: serde_json::Value) {
    Mock::given(method("POST"))
        .and(path(API_PATH))
        .and(body_string_contains("action=clientlogin"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

// ---- PASS persists flag and cookie ----

#[tokio::test]
async fn test_login_pass_persists_session_cookie() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    mount_login_token(&server).await;
    Mock::given(method("POST"))
        .and(path(API_PATH))
        .and(body_string_contains("action=clientlogin"))
        .and(body_string_contains("username=Alice"))
        .and(body_string_contains("logintoken=abc%2B%5C"))
        .and(body_string_contains("rememberMe=1"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("set-cookie", "commonswikiSession=sess123; path=/; HttpOnly")
                .set_body_json(json!({"clientlogin": {"status": "PASS", "username": "Alice"}})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let store = Arc::new(MemorySessionStore::new());
    let (_api, auth) = controller(&server, Arc::clone(&store));

    let status = auth.login("Alice", "hunter2").await.unwrap();

    assert_eq!(status, AuthStatus::Pass);
    assert_eq!(auth.state(), AuthState::Authenticated);
    assert!(store.get_bool(KEY_IS_USER_LOGGED_IN));
    let cookie = store.get_string(KEY_AUTH_COOKIE).unwrap_or_default();
    assert!(
        cookie.contains("commonswikiSession=sess123"),
        "persisted cookie should come from the jar, got: {cookie:?}"
    );
}

// ---- FAIL clears state ----

#[tokio::test]
async fn test_login_fail_returns_message_code_and_clears_cookie() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    mount_login_token(&server).await;
    mount_clientlogin(
        &server,
        json!({"clientlogin": {"status": "FAIL", "message": "Incorrect username or password", "messagecode": "wrongpassword"}}),
    )
    .await;

    let store = Arc::new(MemorySessionStore::new());
    store.put_bool(KEY_IS_USER_LOGGED_IN, true).unwrap();
    store.put_string(KEY_AUTH_COOKIE, "stale=1").unwrap();
    let (api, auth) = controller(&server, Arc::clone(&store));
    assert!(api.auth_cookie().is_some());

    let status = auth.login("Alice", "wrong").await.unwrap();

    assert_eq!(status, AuthStatus::Fail("wrongpassword".to_string()));
    assert_eq!(auth.state(), AuthState::Failed);
    assert!(!store.get_bool(KEY_IS_USER_LOGGED_IN));
    assert_eq!(store.get_string(KEY_AUTH_COOKIE), None);
    assert_eq!(api.auth_cookie(), None);
}

// ---- Two-factor continuation ----

#[tokio::test]
async fn test_two_factor_prompt_then_code_login() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    mount_login_token(&server).await;
    Mock::given(method("POST"))
        .and(path(API_PATH))
        .and(body_string_contains("action=clientlogin"))
        .and(body_string_contains("OATHToken=123456"))
        .and(body_string_contains("logincontinue=1"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("set-cookie", "commonswikiSession=after2fa; path=/")
                .set_body_json(json!({"clientlogin": {"status": "PASS", "username": "Alice"}})),
        )
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;
    mount_clientlogin(&server, two_factor_prompt()).await;

    let store = Arc::new(MemorySessionStore::new());
    let (_api, auth) = controller(&server, Arc::clone(&store));

    let first = auth.login("Alice", "hunter2").await.unwrap();
    assert_eq!(first, AuthStatus::TwoFactorRequired);
    assert_eq!(auth.state(), AuthState::TwoFactorPending);
    assert!(!store.get_bool(KEY_IS_USER_LOGGED_IN));

    let second = auth
        .login_with_code("Alice", "hunter2", "123456")
        .await
        .unwrap();
    assert_eq!(second, AuthStatus::Pass);
    assert_eq!(auth.state(), AuthState::Authenticated);
    assert!(store.get_bool(KEY_IS_USER_LOGGED_IN));
}

#[tokio::test]
async fn test_code_can_be_resubmitted_after_server_error() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    mount_login_token(&server).await;
    Mock::given(method("POST"))
        .and(path(API_PATH))
        .and(body_string_contains("OATHToken=123456"))
        .respond_with(ResponseTemplate::new(502))
        .with_priority(1)
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(API_PATH))
        .and(body_string_contains("OATHToken=123456"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"clientlogin": {"status": "PASS", "username": "Alice"}})),
        )
        .with_priority(2)
        .expect(1)
        .mount(&server)
        .await;
    mount_clientlogin(&server, two_factor_prompt()).await;

    let store = Arc::new(MemorySessionStore::new());
    let (_api, auth) = controller(&server, Arc::clone(&store));

    assert_eq!(
        auth.login("Alice", "hunter2").await.unwrap(),
        AuthStatus::TwoFactorRequired
    );

    let error = auth
        .login_with_code("Alice", "hunter2", "123456")
        .await
        .unwrap_err();
    assert!(matches!(error, ApiError::HttpStatus { status: 502, .. }), "got {error:?}");
    assert_eq!(auth.state(), AuthState::TwoFactorPending);

    let retried = auth
        .login_with_code("Alice", "hunter2", "123456")
        .await
        .unwrap();
    assert_eq!(retried, AuthStatus::Pass);
    assert_eq!(auth.state(), AuthState::Authenticated);
    assert!(store.get_bool(KEY_IS_USER_LOGGED_IN));
}

#[tokio::test]
async fn test_login_sends_configured_return_url() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    mount_login_token(&server).await;
    Mock::given(method("POST"))
        .and(path(API_PATH))
        .and(body_string_contains(
            "loginreturnurl=https%3A%2F%2Fbeta.example.org%2Fwiki",
        ))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"clientlogin": {"status": "PASS", "username": "Alice"}})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let config = ClientConfig {
        login_return_url: "https://beta.example.org/wiki".to_string(),
        ..ClientConfig::with_base_url(&server.uri())
    };
    let (_api, auth) = controller_with(&config, Arc::new(MemorySessionStore::new()));

    assert_eq!(auth.login("Alice", "hunter2").await.unwrap(), AuthStatus::Pass);
}

// ---- Other statuses ----

#[tokio::test]
async fn test_redirect_is_generic_error_and_store_untouched() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    mount_login_token(&server).await;
    mount_clientlogin(
        &server,
        json!({"clientlogin": {"status": "REDIRECT", "redirecttarget": "https://idp.example"}}),
    )
    .await;

    let store = Arc::new(MemorySessionStore::new());
    store.put_bool(KEY_IS_USER_LOGGED_IN, true).unwrap();
    let (_api, auth) = controller(&server, Arc::clone(&store));

    let status = auth.login("Alice", "hunter2").await.unwrap();

    assert_eq!(
        status,
        AuthStatus::GenericError("genericerror-REDIRECT".to_string())
    );
    assert!(store.get_bool(KEY_IS_USER_LOGGED_IN), "generic errors persist nothing");
}

#[tokio::test]
async fn test_token_fetch_failure_propagates() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path(API_PATH))
        .respond_with(ResponseTemplate::new(500).set_body_string("internal error"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(API_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(0)
        .mount(&server)
        .await;

    let (_api, auth) = controller(&server, Arc::new(MemorySessionStore::new()));

    let error = auth.login("Alice", "hunter2").await.unwrap_err();

    assert!(
        matches!(error, ApiError::HttpStatus { status: 500, .. }),
        "unexpected error: {error:?}"
    );
    assert_eq!(auth.state(), AuthState::Unauthenticated);
}

// ---- Logout ----

#[tokio::test]
async fn test_logout_posts_csrf_token_and_clears_session() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path(API_PATH))
        .and(query_param("meta", "tokens"))
        .and(query_param("type", "csrf"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "query": {"tokens": {"csrftoken": "csrf123+\\"}}
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(API_PATH))
        .and(body_string_contains("action=logout"))
        .and(body_string_contains("token=csrf123%2B%5C"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    let store = Arc::new(MemorySessionStore::new());
    store.put_bool(KEY_IS_USER_LOGGED_IN, true).unwrap();
    store
        .put_string(KEY_AUTH_COOKIE, "commonswikiSession=abc")
        .unwrap();
    let (api, auth) = controller(&server, Arc::clone(&store));
    assert!(api.auth_cookie().is_some());

    auth.logout().await;

    assert!(!auth.is_logged_in());
    assert_eq!(store.get_string(KEY_AUTH_COOKIE), None);
    assert_eq!(api.auth_cookie(), None);
    assert_eq!(auth.state(), AuthState::Unauthenticated);
}

#[tokio::test]
async fn test_logout_clears_local_state_when_server_fails() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path(API_PATH))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let store = Arc::new(MemorySessionStore::new());
    store.put_bool(KEY_IS_USER_LOGGED_IN, true).unwrap();
    store
        .put_string(KEY_AUTH_COOKIE, "commonswikiSession=abc")
        .unwrap();
    let (api, auth) = controller(&server, Arc::clone(&store));

    auth.logout().await;

    assert!(!store.get_bool(KEY_IS_USER_LOGGED_IN));
    assert_eq!(store.get_string(KEY_AUTH_COOKIE), None);
    assert_eq!(api.auth_cookie(), None);
}

// ---- Secrets never reach the logs ----

#[derive(Default)]
struct TextVisitor(Vec<String>);

impl Visit for TextVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.0.push(format!("{}={value}", field.name()));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.0.push(format!("{}={value:?}", field.name()));
    }
}

#[derive(Clone, Default)]
struct CaptureLayer {
    lines: Arc<Mutex<Vec<String>>>,
}

impl<S> Layer<S> for CaptureLayer
where
    S: Subscriber + for<'lookup> LookupSpan<'lookup>,
{
    fn on_new_span(&self, attrs: &Attributes<'_>, _id: &Id, _ctx: Context<'_, S>) {
        let mut visitor = TextVisitor::default();
        attrs.record(&mut visitor);
        self.lines.lock().unwrap().extend(visitor.0);
    }

    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = TextVisitor::default();
        event.record(&mut visitor);
        self.lines.lock().unwrap().extend(visitor.0);
    }
}

#[tokio::test]
async fn test_login_does_not_log_password_token_or_cookie() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    mount_login_token(&server).await;
    Mock::given(method("POST"))
        .and(path(API_PATH))
        .and(body_string_contains("action=clientlogin"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("set-cookie", "commonswikiSession=cookievalue42; path=/")
                .set_body_json(json!({"clientlogin": {"status": "PASS", "username": "Alice"}})),
        )
        .mount(&server)
        .await;

    let capture = CaptureLayer::default();
    let subscriber = tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new("trace"))
        .with(capture.clone());
    let _guard = tracing::subscriber::set_default(subscriber);

    let (_api, auth) = controller(&server, Arc::new(MemorySessionStore::new()));
    let status = auth.login("Alice", "sup3r-secret-pw").await.unwrap();
    assert_eq!(status, AuthStatus::Pass);

    let lines = capture.lines.lock().unwrap().join("\n");
    assert!(lines.contains("Alice"), "expected the username to be logged");
    for secret in ["sup3r-secret-pw", "abc+", "cookievalue42"] {
        assert!(!lines.contains(secret), "{secret} leaked into logs:\n{lines}");
    }
}
