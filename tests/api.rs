//! HTTP-level tests over the full router with in-memory stores.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt; // For oneshot()
use uuid::Uuid;

use userdesk::app::build_app;
use userdesk::auth::password::{hash_password, verify_password};
use userdesk::mail::MemoryMailer;
use userdesk::state::AppState;
use userdesk::users::{InMemoryUserStore, NewUser, ProfileChanges, User, UserStore};

/// Every record it hands out is marked inactive.
struct DeactivatedUsers(InMemoryUserStore);

#[async_trait::async_trait]
impl UserStore for DeactivatedUsers {
    async fn create(&self, user: NewUser) -> anyhow::Result<User> {
        self.0.create(user).await
    }

    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>> {
        Ok(self.0.find_by_id(id).await?.map(deactivate))
    }

    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        Ok(self.0.find_by_email(email).await?.map(deactivate))
    }

    async fn update_profile(&self, id: Uuid, changes: ProfileChanges) -> anyhow::Result<User> {
        self.0.update_profile(id, changes).await.map(deactivate)
    }

    async fn set_password_hash(&self, id: Uuid, password_hash: &str) -> anyhow::Result<()> {
        self.0.set_password_hash(id, password_hash).await
    }
}

fn deactivate(mut user: User) -> User {
    user.is_active = false;
    user
}

struct TestApp {
    app: Router,
    state: AppState,
    mailer: MemoryMailer,
}

impl TestApp {
    fn new() -> Self {
        let mailer = MemoryMailer::new();
        Self::from_state(AppState::fake(mailer.clone()), mailer)
    }

    fn with_users(users: Arc<dyn UserStore>) -> Self {
        let mailer = MemoryMailer::new();
        let base = AppState::fake(mailer.clone());
        let state = AppState::from_parts(base.config, users, base.tokens, base.mailer);
        Self::from_state(state, mailer)
    }

    fn from_state(state: AppState, mailer: MemoryMailer) -> Self {
        Self {
            app: build_app(state.clone()),
            state,
            mailer,
        }
    }

    async fn create_user(&self, email: &str, password: &str) -> User {
        self.state
            .users
            .create(NewUser {
                email: email.into(),
                password_hash: hash_password(password).unwrap(),
                first_name: "Test".into(),
                last_name: "User".into(),
            })
            .await
            .unwrap()
    }

    async fn token_for(&self, user: &User) -> String {
        self.state.tokens.get_or_create(user.id).await.unwrap()
    }

    async fn stored(&self, user: &User) -> User {
        self.state.users.find_by_id(user.id).await.unwrap().unwrap()
    }

    async fn send(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let authorization = token.map(|token| format!("Token {token}"));
        self.send_with_auth(method, uri, authorization.as_deref(), body)
            .await
    }

    async fn send_with_auth(
        &self,
        method: Method,
        uri: &str,
        authorization: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(authorization) = authorization {
            builder = builder.header(header::AUTHORIZATION, authorization);
        }
        let body = match body {
            Some(value) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(serde_json::to_vec(&value).unwrap())
            }
            None => Body::empty(),
        };

        let response = self
            .app
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }
}

#[tokio::test]
async fn create_token_for_user() {
    let t = TestApp::new();
    t.create_user("test@test.com", "testpassword").await;

    let (status, body) = t
        .send(
            Method::POST,
            "/token/",
            None,
            Some(json!({"email": "test@test.com", "password": "testpassword"})),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert!(body["token"].is_string());
}

#[tokio::test]
async fn token_is_reused_across_logins() {
    let t = TestApp::new();
    t.create_user("test@test.com", "testpassword").await;
    let payload = json!({"email": "test@test.com", "password": "testpassword"});

    let (_, first) = t.send(Method::POST, "/token/", None, Some(payload.clone())).await;
    let (_, second) = t.send(Method::POST, "/token/", None, Some(payload)).await;

    assert_eq!(first["token"], second["token"]);
}

#[tokio::test]
async fn create_token_invalid_credentials() {
    let t = TestApp::new();
    t.create_user("test@test.com", "testpassword").await;

    let (status, body) = t
        .send(
            Method::POST,
            "/token/",
            None,
            Some(json!({"email": "test@test.com", "password": "wrong"})),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.get("token").is_none());
    assert_eq!(
        body["non_field_errors"][0],
        "Unable to authenticate with provided credentials."
    );
}

#[tokio::test]
async fn create_token_no_user_looks_like_wrong_password() {
    let t = TestApp::new();
    t.create_user("test@test.com", "testpassword").await;
    let (wrong_status, wrong_body) = t
        .send(
            Method::POST,
            "/token/",
            None,
            Some(json!({"email": "test@test.com", "password": "wrong"})),
        )
        .await;

    let (status, body) = t
        .send(
            Method::POST,
            "/token/",
            None,
            Some(json!({"email": "nobody@test.com", "password": "testpassword"})),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(status, wrong_status);
    assert_eq!(body, wrong_body);
}

#[tokio::test]
async fn create_token_missing_field() {
    let t = TestApp::new();

    let (status, body) = t
        .send(
            Method::POST,
            "/token/",
            None,
            Some(json!({"email": "test@test.com", "password": ""})),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.get("token").is_none());
    assert_eq!(body["password"][0], "This field may not be blank.");
}

#[tokio::test]
async fn malformed_json_is_a_bad_request() {
    let t = TestApp::new();
    let request = Request::builder()
        .method(Method::POST)
        .uri("/token/")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();

    let response = t.app.clone().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn register_then_login() {
    let t = TestApp::new();

    let (status, body) = t
        .send(
            Method::POST,
            "/create/",
            None,
            Some(json!({
                "email": "New@Test.com",
                "password": "testpassword",
                "first_name": "New",
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(
        body,
        json!({"email": "new@test.com", "first_name": "New", "last_name": ""})
    );

    let (status, _) = t
        .send(
            Method::POST,
            "/token/",
            None,
            Some(json!({"email": "new@test.com", "password": "testpassword"})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn retrieve_user_profile_unauthorized() {
    let t = TestApp::new();

    let (status, _) = t.send(Method::GET, "/me/", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = t
        .send(Method::PATCH, "/me/", None, Some(json!({"first_name": "x"})))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = t.send(Method::GET, "/me/", Some("bogus"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn token_scheme_is_case_insensitive_and_accepts_bearer() {
    let t = TestApp::new();
    let user = t.create_user("test@test.com", "testpassword").await;
    let token = t.token_for(&user).await;

    for scheme in ["Token", "token", "TOKEN", "Bearer", "bearer"] {
        let authorization = format!("{scheme} {token}");
        let (status, body) = t
            .send_with_auth(Method::GET, "/me/", Some(authorization.as_str()), None)
            .await;
        assert_eq!(status, StatusCode::OK, "scheme {scheme}");
        assert_eq!(body["email"], "test@test.com");
    }

    let (status, _) = t
        .send_with_auth(Method::GET, "/me/", Some(format!("Basic {token}").as_str()), None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn inactive_user_token_is_rejected() {
    let t = TestApp::with_users(Arc::new(DeactivatedUsers(InMemoryUserStore::new())));
    let user = t.create_user("test@test.com", "testpassword").await;
    let token = t.token_for(&user).await;

    let (status, body) = t.send(Method::GET, "/me/", Some(&token), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["detail"], "User inactive or deleted.");

    let (status, _) = t
        .send(
            Method::PATCH,
            "/change_password/",
            Some(&token),
            Some(json!({
                "old_password": "testpassword",
                "new_password": "12345",
                "new_password2": "12345",
            })),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn retrieve_profile_success() {
    let t = TestApp::new();
    let user = t.create_user("test@test.com", "testpassword").await;
    let token = t.token_for(&user).await;

    let (status, body) = t.send(Method::GET, "/me/", Some(&token), None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({"email": "test@test.com", "first_name": "Test", "last_name": "User"})
    );
}

#[tokio::test]
async fn post_me_not_allowed() {
    let t = TestApp::new();
    let user = t.create_user("test@test.com", "testpassword").await;
    let token = t.token_for(&user).await;

    let (status, _) = t.send(Method::POST, "/me/", Some(&token), Some(json!({}))).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);

    let (status, _) = t.send(Method::POST, "/me/", None, Some(json!({}))).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn update_user_profile() {
    let t = TestApp::new();
    let user = t.create_user("test@test.com", "testpassword").await;
    let token = t.token_for(&user).await;

    let (status, body) = t
        .send(
            Method::PATCH,
            "/me/",
            Some(&token),
            Some(json!({
                "email": "testing@test.cl",
                "password": "1234567",
                "first_name": "test2",
                "last_name": "test2",
            })),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({"email": "testing@test.cl", "first_name": "test2", "last_name": "test2"})
    );
    let stored = t.stored(&user).await;
    assert!(verify_password("1234567", &stored.password_hash).unwrap());
}

#[tokio::test]
async fn put_user_profile() {
    let t = TestApp::new();
    let user = t.create_user("test@test.com", "testpassword").await;
    let token = t.token_for(&user).await;

    let (status, body) = t
        .send(
            Method::PUT,
            "/me/",
            Some(&token),
            Some(json!({"first_name": "Put"})),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({"email": "test@test.com", "first_name": "Put", "last_name": "User"})
    );
}

#[tokio::test]
async fn change_password_unauthorized() {
    let t = TestApp::new();

    let (status, _) = t
        .send(
            Method::PATCH,
            "/change_password/",
            None,
            Some(json!({
                "old_password": "testpassword",
                "new_password": "12345",
                "new_password2": "12345",
            })),
        )
        .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn change_password_fails_passwords_do_not_match() {
    let t = TestApp::new();
    let user = t.create_user("test@test.com", "testpassword").await;
    let token = t.token_for(&user).await;

    let (status, body) = t
        .send(
            Method::PATCH,
            "/change_password/",
            Some(&token),
            Some(json!({
                "old_password": "testpassword",
                "new_password": "12345",
                "new_password2": "123456",
            })),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["new_password"][0], "Passwords do not match.");
}

#[tokio::test]
async fn change_password_fails_wrong_old_password() {
    let t = TestApp::new();
    let user = t.create_user("test@test.com", "testpassword").await;
    let token = t.token_for(&user).await;

    let (status, body) = t
        .send(
            Method::PATCH,
            "/change_password/",
            Some(&token),
            Some(json!({
                "old_password": "testpassword123",
                "new_password": "12345",
                "new_password2": "123456",
            })),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["old_password"][0], "Wrong password.");
    assert!(body.get("new_password").is_none());
}

#[tokio::test]
async fn change_password_success() {
    let t = TestApp::new();
    let user = t.create_user("test@test.com", "testpassword").await;
    let token = t.token_for(&user).await;

    let (status, body) = t
        .send(
            Method::PATCH,
            "/change_password/",
            Some(&token),
            Some(json!({
                "old_password": "testpassword",
                "new_password": "12345",
                "new_password2": "12345",
            })),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!("Success."));
    let stored = t.stored(&user).await;
    assert_ne!(stored.password_hash, user.password_hash);
    assert!(verify_password("12345", &stored.password_hash).unwrap());
}

#[tokio::test]
async fn change_password_with_put() {
    let t = TestApp::new();
    let user = t.create_user("test@test.com", "testpassword").await;
    let token = t.token_for(&user).await;

    let (status, body) = t
        .send(
            Method::PUT,
            "/change_password/",
            Some(&token),
            Some(json!({
                "old_password": "testpassword",
                "new_password": "12345",
                "new_password2": "123456",
            })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["new_password"][0], "Passwords do not match.");

    let (status, _) = t
        .send(
            Method::PUT,
            "/change_password/",
            Some(&token),
            Some(json!({
                "old_password": "testpassword",
                "new_password": "12345",
                "new_password2": "12345",
            })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(verify_password("12345", &t.stored(&user).await.password_hash).unwrap());
}

#[tokio::test]
async fn password_recovery_user_exists() {
    let t = TestApp::new();
    let user = t.create_user("test2@test.com", "testpassword").await;

    let (status, body) = t
        .send(
            Method::POST,
            "/password_recovery/",
            None,
            Some(json!({"email": "test2@test.com"})),
        )
        .await;

    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(body, Value::Null);
    assert_ne!(t.stored(&user).await.password_hash, user.password_hash);
    assert_eq!(t.mailer.outbox().await.len(), 1);
}

#[tokio::test]
async fn password_recovery_user_not_exists() {
    let t = TestApp::new();

    let (status, body) = t
        .send(
            Method::POST,
            "/password_recovery/",
            None,
            Some(json!({"email": "nobody@test.com"})),
        )
        .await;

    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(body, Value::Null);
    assert!(t.mailer.outbox().await.is_empty());
}

#[tokio::test]
async fn password_recovery_requires_valid_email() {
    let t = TestApp::new();

    let (status, body) = t
        .send(
            Method::POST,
            "/password_recovery/",
            None,
            Some(json!({"email": "nope"})),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["email"][0], "Enter a valid email address.");
}

#[tokio::test]
async fn password_recovery_delivery_failure_keeps_password() {
    let t = TestApp::new();
    let user = t.create_user("test@test.com", "testpassword").await;
    t.mailer.set_failing(true);

    let (status, _) = t
        .send(
            Method::POST,
            "/password_recovery/",
            None,
            Some(json!({"email": "test@test.com"})),
        )
        .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(t.stored(&user).await.password_hash, user.password_hash);
}

#[tokio::test]
async fn health() {
    let t = TestApp::new();
    let response = t
        .app
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
