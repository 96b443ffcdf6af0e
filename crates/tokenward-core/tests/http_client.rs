mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{credential, expired_token, valid_token};
use tokenward_core::api::{ApiClient, ApiError, HttpTransport, Transport};
use tokenward_core::auth::AuthState;
use tokenward_core::models::ProfileUpdate;
use tokenward_core::navigation::{Navigator, PathNavigator};
use tokenward_core::storage::{MemoryStore, Persistence, ACCESS_CREDENTIAL_KEY, REFRESH_CREDENTIAL_KEY};
use tokenward_core::SessionStore;

fn profile_json() -> serde_json::Value {
    json!({
        "id": "c1700000000000abcdef",
        "email": "ada@example.com",
        "name": "Ada",
        "role": "USER",
        "points": 40,
        "created_at": "2024-01-01T00:00:00Z",
        "updated_at": "2024-01-01T00:00:00Z"
    })
}

struct Setup {
    persistence: Arc<MemoryStore>,
    navigator: Arc<PathNavigator>,
    client: ApiClient,
}

fn client_for(server: &MockServer, persistence: MemoryStore) -> Setup {
    let transport: Arc<dyn Transport> = Arc::new(
        HttpTransport::new(format!("{}/api", server.uri()), Duration::from_secs(5)).unwrap(),
    );
    let persistence = Arc::new(persistence);
    let navigator = Arc::new(PathNavigator::new("/orders"));
    let session = Arc::new(SessionStore::restored(persistence.clone()));
    let client = ApiClient::new(transport, session, navigator.clone());
    Setup {
        persistence,
        navigator,
        client,
    }
}

#[tokio::test]
async fn test_login_stores_credentials_and_profile() {
    let server = MockServer::start().await;
    let access = valid_token();
    Mock::given(method("POST"))
        .and(path("/api/auth/login/"))
        .and(body_json(json!({ "email": "ada@example.com", "password": "pw" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access": access,
            "refresh": "refresh-token",
            "user": profile_json(),
        })))
        .expect(1)
        .mount(&server)
        .await;

    let setup = client_for(&server, MemoryStore::new());
    let profile = setup.client.login("ada@example.com", "pw").await.unwrap();

    assert_eq!(profile.name, "Ada");
    let session = setup.client.session();
    assert_eq!(session.auth_state(), AuthState::Authenticated);
    assert_eq!(session.profile(), Some(profile));
    assert_eq!(
        setup.persistence.get(ACCESS_CREDENTIAL_KEY).unwrap().as_deref(),
        Some(access.as_str())
    );
    assert_eq!(
        setup.persistence.get(REFRESH_CREDENTIAL_KEY).unwrap().as_deref(),
        Some("refresh-token")
    );
}

#[tokio::test]
async fn test_bad_password_is_not_treated_as_expiry() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/auth/login/"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "detail": "No active account found with the given credentials"
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/auth/token/refresh/"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let setup = client_for(&server, MemoryStore::new());
    let err = setup.client.login("ada@example.com", "wrong").await.unwrap_err();

    assert!(matches!(err, ApiError::Unauthorized(_)));
    assert_eq!(setup.navigator.redirect_count(), 0);
}

#[tokio::test]
async fn test_profile_fetch_renews_expired_access_over_http() {
    let server = MockServer::start().await;
    let old = expired_token();
    let refresh = valid_token();

    Mock::given(method("GET"))
        .and(path("/api/auth/profile/"))
        .and(header("Authorization", format!("Bearer {}", old).as_str()))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/auth/token/refresh/"))
        .and(body_json(json!({ "refresh": refresh })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "access": "new" })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/auth/profile/"))
        .and(header("Authorization", "Bearer new"))
        .respond_with(ResponseTemplate::new(200).set_body_json(profile_json()))
        .expect(1)
        .mount(&server)
        .await;

    let setup = client_for(
        &server,
        MemoryStore::with_entries([
            (ACCESS_CREDENTIAL_KEY, old.as_str()),
            (REFRESH_CREDENTIAL_KEY, refresh.as_str()),
        ]),
    );

    let profile = setup.client.fetch_profile().await.unwrap();

    assert_eq!(profile.email, "ada@example.com");
    let session = setup.client.session();
    assert_eq!(session.access_credential(), credential("new"));
    assert_eq!(session.refresh_credential(), credential(&refresh));
    assert_eq!(session.profile().map(|p| p.points), Some(40));
}

#[tokio::test]
async fn test_rejected_refresh_over_http_expires_session() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/auth/profile/"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/auth/token/refresh/"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "detail": "Token is blacklisted",
            "code": "token_not_valid"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let setup = client_for(
        &server,
        MemoryStore::with_entries([
            (ACCESS_CREDENTIAL_KEY, expired_token().as_str()),
            (REFRESH_CREDENTIAL_KEY, valid_token().as_str()),
        ]),
    );

    let err = setup.client.fetch_profile().await.unwrap_err();

    assert!(err.is_session_expired());
    assert!(setup.navigator.current_path_is_login());
    assert_eq!(setup.client.session().auth_state(), AuthState::Expired);
    assert!(setup.persistence.is_empty());
}

#[tokio::test]
async fn test_update_profile_patches_and_stores_result() {
    let server = MockServer::start().await;
    let access = valid_token();
    let mut updated = profile_json();
    updated["name"] = json!("Ada L.");

    Mock::given(method("PATCH"))
        .and(path("/api/auth/profile/update/"))
        .and(header("Authorization", format!("Bearer {}", access).as_str()))
        .and(body_json(json!({ "name": "Ada L." })))
        .respond_with(ResponseTemplate::new(200).set_body_json(updated))
        .expect(1)
        .mount(&server)
        .await;

    let setup = client_for(
        &server,
        MemoryStore::with_entries([
            (ACCESS_CREDENTIAL_KEY, access.as_str()),
            (REFRESH_CREDENTIAL_KEY, "r"),
        ]),
    );

    let profile = setup
        .client
        .update_profile(&ProfileUpdate {
            name: Some("Ada L.".to_string()),
        })
        .await
        .unwrap();

    assert_eq!(profile.display_name(), "Ada L.");
    assert_eq!(setup.client.session().profile(), Some(profile));
}

#[tokio::test]
async fn test_register_starts_session() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/auth/register/"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "user": profile_json(),
            "tokens": { "access": "a.b.c", "refresh": "d.e.f" }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let setup = client_for(&server, MemoryStore::new());
    setup
        .client
        .register("ada@example.com", "Ada", "longpassword", "longpassword")
        .await
        .unwrap();

    assert!(setup.client.session().is_authenticated());
    assert_eq!(
        setup.persistence.get(REFRESH_CREDENTIAL_KEY).unwrap().as_deref(),
        Some("d.e.f")
    );

    setup.client.logout();
    assert_eq!(setup.client.session().auth_state(), AuthState::Anonymous);
    assert!(!setup.client.session().take_expired_notice());
    assert!(setup.persistence.is_empty());
    assert_eq!(setup.navigator.redirect_count(), 0);
}

#[tokio::test]
async fn test_unreachable_server_is_a_transport_error() {
    let transport = HttpTransport::new("http://127.0.0.1:9/api", Duration::from_secs(2)).unwrap();
    let request = tokenward_core::ApiRequest::get("/auth/profile/");

    assert!(transport.send(&request).await.is_err());
}
