//! Shared helpers for integration tests

#![allow(dead_code)]

use std::net::TcpListener;
use std::sync::Arc;

use authgate::auth::{Claims, TokenType};
use authgate::configuration::{AuthSettings, JwtSettings};
use authgate::startup::run;
use authgate::store::{CredentialStore, InMemoryCredentialStore};
use authgate::user::{Role, UserChanges};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::{json, Value};
use uuid::Uuid;

pub struct TestApp {
    pub address: String,
    pub store: Arc<InMemoryCredentialStore>,
    pub jwt: JwtSettings,
    pub client: reqwest::Client,
}

pub fn test_jwt_settings() -> JwtSettings {
    JwtSettings {
        access_secret: "integration-access-secret-at-least-32-chars".to_string(),
        refresh_secret: "integration-refresh-secret-at-least-32-chars".to_string(),
        access_token_expiry: 3600,
        refresh_token_expiry: 604800,
        issuer: "authgate-test".to_string(),
    }
}

pub async fn spawn_app() -> TestApp {
    spawn_app_with(AuthSettings {
        password_hash_cost: 4,
        max_refresh_tokens_per_user: None,
        bootstrap_admin: None,
    })
    .await
}

pub async fn spawn_app_with(auth: AuthSettings) -> TestApp {
    let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind random port");
    let port = listener.local_addr().unwrap().port();
    let address = format!("http://127.0.0.1:{}", port);

    let store = Arc::new(InMemoryCredentialStore::new());
    let jwt = test_jwt_settings();
    let server = run(listener, store.clone(), jwt.clone(), auth).expect("Failed to bind address");
    let _ = tokio::spawn(server);

    TestApp {
        address,
        store,
        jwt,
        client: reqwest::Client::new(),
    }
}

impl TestApp {
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.address, path)
    }

    pub async fn post_register(&self, name: &str, email: &str, password: &str) -> reqwest::Response {
        self.client
            .post(self.url("/auth/register"))
            .json(&json!({ "name": name, "email": email, "password": password }))
            .send()
            .await
            .expect("Failed to execute request.")
    }

    pub async fn post_login(&self, email: &str, password: &str) -> reqwest::Response {
        self.client
            .post(self.url("/auth/login"))
            .json(&json!({ "email": email, "password": password }))
            .send()
            .await
            .expect("Failed to execute request.")
    }

    pub async fn post_refresh(&self, refresh_token: &str) -> reqwest::Response {
        self.client
            .post(self.url("/auth/refresh"))
            .json(&json!({ "refreshToken": refresh_token }))
            .send()
            .await
            .expect("Failed to execute request.")
    }

    pub async fn post_logout(&self, access_token: &str, refresh_token: &str) -> reqwest::Response {
        self.client
            .post(self.url("/auth/logout"))
            .bearer_auth(access_token)
            .json(&json!({ "refreshToken": refresh_token }))
            .send()
            .await
            .expect("Failed to execute request.")
    }

    pub async fn get_me(&self, access_token: &str) -> reqwest::Response {
        self.client
            .get(self.url("/me"))
            .bearer_auth(access_token)
            .send()
            .await
            .expect("Failed to execute request.")
    }

    pub async fn put_me(&self, access_token: &str, body: &Value) -> reqwest::Response {
        self.client
            .put(self.url("/me"))
            .bearer_auth(access_token)
            .json(body)
            .send()
            .await
            .expect("Failed to execute request.")
    }

    /// Register a user and return the parsed response body
    pub async fn register_user(&self, name: &str, email: &str, password: &str) -> Value {
        let response = self.post_register(name, email, password).await;
        assert_eq!(201, response.status().as_u16());
        response.json().await.expect("Failed to parse response")
    }

    /// Register a user, promote them to admin in the store and return a
    /// fresh access token
    pub async fn register_admin(&self, email: &str) -> (Uuid, String) {
        let body = self.register_user("Admin", email, "admin-pass").await;
        let id = Uuid::parse_str(body["user"]["id"].as_str().unwrap()).unwrap();
        self.set_role(id, Role::Admin).await;

        let login: Value = self
            .post_login(email, "admin-pass")
            .await
            .json()
            .await
            .expect("Failed to parse response");
        (id, login["accessToken"].as_str().unwrap().to_string())
    }

    pub async fn set_role(&self, id: Uuid, role: Role) {
        self.store
            .update(
                id,
                UserChanges {
                    role: Some(role),
                    ..Default::default()
                },
            )
            .await
            .expect("store update failed")
            .expect("user exists");
    }

    /// Sign arbitrary access-token claims with the given secret
    pub fn forge_access_token(&self, user_id: Uuid, expiry_seconds: i64, secret: &str) -> String {
        let claims = Claims::new(
            user_id,
            Role::Admin,
            TokenType::Access,
            expiry_seconds,
            self.jwt.issuer.clone(),
        );
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .expect("Failed to encode token")
    }
}

pub fn token(body: &Value, field: &str) -> String {
    body[field]
        .as_str()
        .unwrap_or_else(|| panic!("No {} in response", field))
        .to_string()
}
