pub mod config;
pub mod crypto;
pub mod db;
pub mod dtos;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod utils;

use axum::{
    extract::Request,
    http::{header, HeaderValue, Method},
    middleware::{from_fn, from_fn_with_state, Next},
    routing::{get, post},
    Json, Router,
};
use secrecy::ExposeSecret;
use service_core::error::AppError;
use service_core::middleware::{
    metrics::metrics_middleware,
    rate_limit::{ip_rate_limit_middleware, IpRateLimiter},
    security_headers::security_headers_middleware,
    tracing::request_id_middleware,
};
use service_core::observability::PrometheusHandle;
use service_core::retry::RetryConfig;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

use crate::config::{Environment, IdentityConfig, SwaggerMode};
use crate::crypto::{BlindIndex, FieldCipher};
use crate::middleware::{auth_middleware, require_roles, MEMBER_ROLES, REVIEWER_ROLES};
use crate::services::{
    AuthService, CredentialDirectory, IdentityStore, JwtService, ReviewerNotifier, RoleCache,
    RoleRequestService, RoleResolver, StoreGateway,
};

#[derive(OpenApi)]
#[openapi(
    paths(
        health_check,
        handlers::auth::login,
        handlers::auth::register,
        handlers::auth::verify,
        handlers::auth::accept_privacy_policy,
        handlers::roles::submit_role_request,
        handlers::roles::approve_role_request,
        handlers::roles::reject_role_request,
        handlers::roles::list_role_requests,
        handlers::roles::list_my_role_requests,
        handlers::roles::deactivate_membership,
    ),
    components(
        schemas(
            dtos::ErrorResponse,
            dtos::MessageResponse,
            dtos::auth::LoginRequest,
            dtos::auth::LoginResponse,
            dtos::auth::RegisterRequest,
            dtos::auth::RegisterResponse,
            dtos::auth::PrivacyAcceptanceResponse,
            dtos::roles::SubmitRoleRequest,
            dtos::roles::ReviewRoleRequest,
            dtos::roles::RoleRequestListResponse,
            dtos::roles::ApproveRoleRequestResponse,
            models::PrincipalView,
            models::AccountKind,
            models::Affiliation,
            models::RoleRequest,
            models::RoleRequestStatus,
            models::Membership,
            models::Organization,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Authentication", description = "Login, registration, and token verification"),
        (name = "Role Requests", description = "Officer role request workflow"),
        (name = "Memberships", description = "Organization membership management"),
        (name = "Observability", description = "Service health and monitoring"),
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: IdentityConfig,
    pub jwt: JwtService,
    pub auth: AuthService,
    pub resolver: RoleResolver,
    pub role_requests: RoleRequestService,
    pub gateway: StoreGateway,
    pub metrics: Option<PrometheusHandle>,
    pub login_rate_limiter: IpRateLimiter,
    pub register_rate_limiter: IpRateLimiter,
    pub ip_rate_limiter: IpRateLimiter,
}

impl AppState {
    /// Wire services over the given store, role cache, and notifier.
    pub fn build(
        config: IdentityConfig,
        store: Arc<dyn IdentityStore>,
        role_cache: Arc<dyn RoleCache>,
        notifier: Arc<dyn ReviewerNotifier>,
        metrics: Option<PrometheusHandle>,
    ) -> Result<Self, AppError> {
        let cipher = FieldCipher::from_hex_key(config.crypto.encryption_key.expose_secret())
            .map_err(|e| AppError::ConfigError(anyhow::Error::new(e)))?;
        let blind_index = BlindIndex::from_hex_key(config.crypto.index_key.expose_secret())
            .map_err(|e| AppError::ConfigError(anyhow::Error::new(e)))?;

        let gateway = StoreGateway::new(
            store,
            config.database.query_timeout(),
            RetryConfig::default(),
        );
        let directory = CredentialDirectory::new(
            gateway.clone(),
            Arc::new(cipher),
            Arc::new(blind_index),
            config.lookup.clone(),
        );
        let resolver = RoleResolver::new(gateway.clone(), role_cache);
        let jwt = JwtService::new(&config.jwt);
        let auth = AuthService::new(
            directory,
            resolver.clone(),
            jwt.clone(),
            gateway.clone(),
            config.registration.clone(),
        )?;
        let role_requests = RoleRequestService::new(gateway.clone(), resolver.clone(), notifier);

        let limits = &config.rate_limit;
        let trust = limits.trust_forwarded_for;
        let login_rate_limiter =
            IpRateLimiter::new(limits.login_attempts, limits.login_window_seconds, trust);
        let register_rate_limiter =
            IpRateLimiter::new(limits.register_attempts, limits.register_window_seconds, trust);
        let ip_rate_limiter =
            IpRateLimiter::new(limits.global_ip_limit, limits.global_ip_window_seconds, trust);

        Ok(Self {
            config,
            jwt,
            auth,
            resolver,
            role_requests,
            gateway,
            metrics,
            login_rate_limiter,
            register_rate_limiter,
            ip_rate_limiter,
        })
    }

    pub fn rate_limiters(&self) -> Vec<IpRateLimiter> {
        vec![
            self.login_rate_limiter.clone(),
            self.register_rate_limiter.clone(),
            self.ip_rate_limiter.clone(),
        ]
    }
}

pub fn build_router(state: AppState) -> Router {
    let login_route = Router::new()
        .route("/login", post(handlers::auth::login))
        .layer(from_fn_with_state(
            state.login_rate_limiter.clone(),
            ip_rate_limit_middleware,
        ));

    let register_route = Router::new()
        .route("/register", post(handlers::auth::register))
        .layer(from_fn_with_state(
            state.register_rate_limiter.clone(),
            ip_rate_limit_middleware,
        ));

    // Any authenticated principal
    let session_routes = Router::new()
        .route("/verify", get(handlers::auth::verify))
        .route(
            "/me/privacy-acceptance",
            post(handlers::auth::accept_privacy_policy),
        )
        .route(
            "/roles/requests/mine",
            get(handlers::roles::list_my_role_requests),
        )
        .layer(from_fn_with_state(state.clone(), auth_middleware));

    let member_routes = Router::new()
        .route("/roles/request", post(handlers::roles::submit_role_request))
        .layer(from_fn(|req: Request, next: Next| {
            require_roles(MEMBER_ROLES, req, next)
        }))
        .layer(from_fn_with_state(state.clone(), auth_middleware));

    let reviewer_routes = Router::new()
        .route(
            "/roles/approve/:id",
            post(handlers::roles::approve_role_request),
        )
        .route(
            "/roles/reject/:id",
            post(handlers::roles::reject_role_request),
        )
        .route("/roles/requests", get(handlers::roles::list_role_requests))
        .route(
            "/memberships/:id/deactivate",
            post(handlers::roles::deactivate_membership),
        )
        .layer(from_fn(|req: Request, next: Next| {
            require_roles(REVIEWER_ROLES, req, next)
        }))
        .layer(from_fn_with_state(state.clone(), auth_middleware));

    let mut app = Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(handlers::metrics::metrics));

    let swagger_enabled = state.config.environment == Environment::Dev
        || state.config.swagger.enabled == SwaggerMode::Public;

    if swagger_enabled {
        app = app.merge(SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()));
    } else {
        app = app.route("/openapi.json", get(|| async { Json(ApiDoc::openapi()) }));
    }

    let request_timeout = Duration::from_secs(state.config.common.request_timeout_seconds);
    let cors = cors_layer(&state.config.security.allowed_origins);

    app.merge(login_route)
        .merge(register_route)
        .merge(session_routes)
        .merge(member_routes)
        .merge(reviewer_routes)
        .with_state(state.clone())
        .layer(from_fn_with_state(
            state.ip_rate_limiter.clone(),
            ip_rate_limit_middleware,
        ))
        .layer(TimeoutLayer::new(request_timeout))
        .layer(from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http().make_span_with(
            |request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    version = ?request.version(),
                )
            },
        ))
        .layer(from_fn(request_id_middleware))
        .layer(from_fn(security_headers_middleware))
        .layer(cors)
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    if allowed_origins.iter().any(|o| o == "*") {
        return cors.allow_origin(Any);
    }

    let origins = allowed_origins
        .iter()
        .filter_map(|o| match o.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::error!(origin = %o, error = %e, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect::<Vec<HeaderValue>>();

    cors.allow_origin(origins)
}

/// Service health check
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy"),
        (status = 503, description = "Service is unhealthy")
    ),
    tag = "Observability"
)]
pub async fn health_check(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    let store = state.gateway.store();
    state
        .gateway
        .read("ping", || store.ping())
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Store health check failed");
            AppError::ServiceUnavailable
        })?;

    state.resolver.cache_health().await.map_err(|e| {
        tracing::error!(error = %e, "Role cache health check failed");
        AppError::ServiceUnavailable
    })?;

    Ok(Json(serde_json::json!({
        "status": "healthy",
        "service": state.config.service_name,
        "version": state.config.service_version,
        "environment": format!("{:?}", state.config.environment),
        "checks": {
            "store": "up",
            "role_cache": "up"
        }
    })))
}
