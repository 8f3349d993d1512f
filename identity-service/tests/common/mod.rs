//! Test helpers for identity-service integration tests.
//!
//! Drives the full router in-process with `oneshot` over the in-memory
//! store, so no PostgreSQL or Redis is needed.

#![allow(dead_code)]

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use identity_service::{
    build_router,
    config::{
        CryptoConfig, DatabaseConfig, Environment, IdentityConfig, JwtConfig, LookupConfig,
        NotificationConfig, RateLimitConfig, RegistrationConfig, RoleCacheBackend,
        RoleCacheConfig, SecurityConfig, SwaggerConfig, SwaggerMode,
    },
    services::{InMemoryRoleCache, InMemoryStore, RecordingNotifier, RoleCache},
    AppState,
};
use secrecy::Secret;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::util::ServiceExt;

pub const DOMAIN: &str = "wmsu.edu.ph";
pub const ADMIN_IDENTITY: &str = "registrar@wmsu.edu.ph";
pub const ADMIN_SECRET: &str = "registrar-secret";
pub const MEMBER_SECRET: &str = "correct horse battery";

pub fn test_config() -> IdentityConfig {
    IdentityConfig {
        common: service_core::config::Config::default(),
        environment: Environment::Dev,
        service_name: "identity-service-test".to_string(),
        service_version: "0.1.0".to_string(),
        log_level: "error".to_string(),
        otlp_endpoint: None,
        database: DatabaseConfig {
            url: Secret::new("postgres://unused".to_string()),
            max_connections: 2,
            min_connections: 1,
            query_timeout_ms: 2000,
        },
        crypto: CryptoConfig {
            encryption_key: Secret::new("0f".repeat(32)),
            index_key: Secret::new("a7".repeat(32)),
        },
        jwt: JwtConfig {
            signing_secret: Secret::new("integration-test-signing-secret-0123456789".to_string()),
            token_lifetime_minutes: 60,
            issuer: "identity-service".to_string(),
        },
        registration: RegistrationConfig {
            identity_domain: DOMAIN.to_string(),
            identity_prefix_len: 9,
            external_id_len: 9,
        },
        lookup: LookupConfig {
            member_scan_cap: 50,
            administrator_scan_cap: 50,
        },
        role_cache: RoleCacheConfig {
            backend: RoleCacheBackend::Memory,
            ttl_seconds: 30,
            redis_url: None,
        },
        notification: NotificationConfig {
            enabled: false,
            smtp_host: String::new(),
            smtp_port: 587,
            smtp_username: String::new(),
            smtp_password: Secret::new(String::new()),
            from_address: String::new(),
            reviewer_address: String::new(),
        },
        security: SecurityConfig {
            allowed_origins: vec!["http://localhost:3000".to_string()],
        },
        swagger: SwaggerConfig {
            enabled: SwaggerMode::Disabled,
        },
        rate_limit: RateLimitConfig {
            login_attempts: 1000,
            login_window_seconds: 60,
            register_attempts: 1000,
            register_window_seconds: 60,
            global_ip_limit: 10_000,
            global_ip_window_seconds: 60,
            trust_forwarded_for: true,
            prune_interval_seconds: 60,
        },
        bootstrap_admin: None,
    }
}

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub store: Arc<InMemoryStore>,
    pub notifier: Arc<RecordingNotifier>,
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::spawn_with(test_config()).await
    }

    pub async fn spawn_with(config: IdentityConfig) -> Self {
        Self::spawn_with_notifier(config, Arc::new(RecordingNotifier::new())).await
    }

    pub async fn spawn_with_notifier(
        config: IdentityConfig,
        notifier: Arc<RecordingNotifier>,
    ) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let role_cache: Arc<dyn RoleCache> = Arc::new(InMemoryRoleCache::new(Duration::from_secs(
            config.role_cache.ttl_seconds,
        )));

        let state = AppState::build(config, store.clone(), role_cache, notifier.clone(), None)
            .expect("Failed to build app state");
        let router = build_router(state.clone());

        Self {
            router,
            state,
            store,
            notifier,
        }
    }

    /// Send one request and return the status and JSON body (`Null` when
    /// the body is empty or not JSON).
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let body = match body {
            Some(value) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(value.to_string())
            }
            None => Body::empty(),
        };

        self.send(builder.body(body).expect("Failed to build request"))
            .await
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to execute request");
        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to read body")
            .to_bytes();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    pub async fn get(&self, uri: &str, token: Option<&str>) -> (StatusCode, Value) {
        self.request(Method::GET, uri, token, None).await
    }

    pub async fn post(&self, uri: &str, token: Option<&str>, body: Value) -> (StatusCode, Value) {
        self.request(Method::POST, uri, token, Some(body)).await
    }

    pub async fn register(&self, external_id: &str) -> (StatusCode, Value) {
        self.post(
            "/register",
            None,
            json!({
                "externalId": external_id,
                "identity": member_identity(external_id),
                "secret": MEMBER_SECRET,
                "firstName": "Maria",
                "lastName": "Santos",
                "acceptPrivacyPolicy": true
            }),
        )
        .await
    }

    pub async fn login(&self, identity: &str, secret: &str) -> (StatusCode, Value) {
        self.post("/login", None, json!({ "identity": identity, "secret": secret }))
            .await
    }

    /// Register a member and return `(member_id, token)`.
    pub async fn member(&self, external_id: &str) -> (i64, String) {
        let (status, body) = self.register(external_id).await;
        assert_eq!(status, StatusCode::CREATED, "register failed: {}", body);
        let member_id = body["memberId"].as_i64().expect("memberId");
        let token = self.token_for(&member_identity(external_id), MEMBER_SECRET).await;
        (member_id, token)
    }

    /// Seed the administrator on first use and return a token for it.
    pub async fn admin_token(&self) -> String {
        self.state
            .auth
            .bootstrap_administrator(ADMIN_IDENTITY, ADMIN_SECRET, "Registrar")
            .await
            .expect("Failed to bootstrap administrator");
        self.token_for(ADMIN_IDENTITY, ADMIN_SECRET).await
    }

    pub async fn token_for(&self, identity: &str, secret: &str) -> String {
        let (status, body) = self.login(identity, secret).await;
        assert_eq!(status, StatusCode::OK, "login failed: {}", body);
        body["token"].as_str().expect("token").to_string()
    }

    pub async fn organization(&self, label: &str) -> i64 {
        self.store.insert_organization(label).await
    }

    /// File a role request and return its id.
    pub async fn submit_request(&self, token: &str, organization_id: i64) -> i64 {
        let (status, body) = self
            .post(
                "/roles/request",
                Some(token),
                json!({ "organizationId": organization_id, "requestedPosition": "secretary" }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "submit failed: {}", body);
        body["requestId"].as_i64().expect("requestId")
    }

    pub async fn verify(&self, token: &str) -> (StatusCode, Value) {
        self.get("/verify", Some(token)).await
    }
}

pub fn member_identity(external_id: &str) -> String {
    format!("{}@{}", external_id, DOMAIN)
}

pub fn roles_of(principal: &Value) -> Vec<String> {
    principal["roles"]
        .as_array()
        .map(|roles| {
            roles
                .iter()
                .filter_map(|r| r.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}
