//! Integration tests for sign-in: code exchange, token persistence, logout.
//!
//! The mock server plays both the OAuth provider and the API.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use imagefeed::auth::{AuthError, ExchangePhase, FileTokenStore, TokenStore};
use imagefeed::{Config, Event, EventKind, LoginError, Session};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate, Times};

fn test_config(server: &MockServer) -> Config {
    Config {
        api_base_url: server.uri(),
        auth_base_url: server.uri(),
        access_key: Some("client-id".into()),
        secret_key: Some("client-secret".into()),
        ..Config::default()
    }
}

fn temp_config_dir(name: &str) -> std::path::PathBuf {
    let dir = std::env::temp_dir().join(format!("imagefeed_auth_flow_{name}"));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

async fn mount_token(
    server: &MockServer,
    code: &str,
    token: &str,
    delay: Duration,
    times: impl Into<Times>,
) {
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .and(query_param("code", code))
        .and(query_param("client_id", "client-id"))
        .and(query_param("client_secret", "client-secret"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(format!(r#"{{"access_token":"{token}"}}"#))
                .set_delay(delay),
        )
        .expect(times)
        .mount(server)
        .await;
}

async fn mount_profile(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/me"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"{"username":"ansel","first_name":"Ansel","last_name":"Adams","bio":"Yosemite"}"#,
        ))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/users/ansel"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(r#"{"profile_image":{"small":"https://images.example/ansel-s"}}"#),
        )
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_login_persists_token_to_disk() {
    let server = MockServer::start().await;
    mount_token(&server, "code-1", "bearer-abc", Duration::ZERO, 1).await;
    mount_profile(&server).await;

    let dir = temp_config_dir("persist");
    let session = Session::new(&test_config(&server), Arc::new(FileTokenStore::new(&dir))).unwrap();

    let avatars = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&avatars);
    let _sub = session.bus().subscribe(EventKind::AvatarChanged, move |event| {
        if let Event::AvatarChanged { url } = event {
            sink.lock().unwrap().push(url.clone());
        }
    });

    let profile = session.login("code-1").await.unwrap();
    assert_eq!(profile.name, "Ansel Adams");
    assert_eq!(profile.login_name, "@ansel");
    assert_eq!(profile.bio.as_deref(), Some("Yosemite"));
    assert_eq!(*avatars.lock().unwrap(), vec!["https://images.example/ansel-s".to_string()]);

    // A fresh store over the same directory sees the token
    let reopened = FileTokenStore::new(&dir);
    assert_eq!(reopened.get().unwrap().expose(), "bearer-abc");

    std::fs::remove_dir_all(&dir).ok();
}

#[tokio::test]
async fn test_replayed_code_is_rejected_without_request() {
    let server = MockServer::start().await;
    mount_token(&server, "once", "bearer-1", Duration::ZERO, 1).await;
    mount_profile(&server).await;

    let dir = temp_config_dir("replay");
    let session = Session::new(&test_config(&server), Arc::new(FileTokenStore::new(&dir))).unwrap();
    session.login("once").await.unwrap();

    let err = session.login("once").await.unwrap_err();
    assert!(matches!(err, LoginError::Auth(AuthError::DuplicateRequest)));

    std::fs::remove_dir_all(&dir).ok();
}

#[tokio::test]
async fn test_superseded_exchange_never_writes_token() {
    let server = MockServer::start().await;
    // Superseded before it may even be sent
    mount_token(&server, "slow", "stale-token", Duration::from_millis(300), 0..=1).await;
    mount_token(&server, "fast", "fresh-token", Duration::ZERO, 1).await;

    let dir = temp_config_dir("supersede");
    let store = Arc::new(FileTokenStore::new(&dir));
    let session = Session::new(&test_config(&server), store.clone()).unwrap();
    let auth = session.auth().unwrap();

    let slow = auth.exchange("slow");
    assert_eq!(auth.phase(), ExchangePhase::Exchanging);
    let fast = auth.exchange("fast");

    assert_eq!(fast.await.unwrap().expose(), "fresh-token");
    assert!(matches!(slow.await, Err(AuthError::Cancelled)));
    assert_eq!(auth.phase(), ExchangePhase::Succeeded);

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(store.get().unwrap().expose(), "fresh-token");

    std::fs::remove_dir_all(&dir).ok();
}

#[tokio::test]
async fn test_logout_removes_token_file() {
    let server = MockServer::start().await;
    mount_token(&server, "code", "bearer", Duration::ZERO, 1).await;
    mount_profile(&server).await;

    let dir = temp_config_dir("logout");
    let store = Arc::new(FileTokenStore::new(&dir));
    let session = Session::new(&test_config(&server), store.clone()).unwrap();
    session.login("code").await.unwrap();
    assert!(store.path().exists());

    session.logout();
    assert!(!store.path().exists());
    assert!(!session.is_authenticated());
    assert!(session.profile().profile().is_none());

    std::fs::remove_dir_all(&dir).ok();
}
