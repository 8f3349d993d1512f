use secrecy::{ExposeSecret, Secret};
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct IdentityConfig {
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub crypto: CryptoConfig,
    pub jwt: JwtConfig,
    pub registration: RegistrationConfig,
    pub lookup: LookupConfig,
    pub role_cache: RoleCacheConfig,
    pub notification: NotificationConfig,
    pub security: SecurityConfig,
    pub swagger: SwaggerConfig,
    pub rate_limit: RateLimitConfig,
    pub bootstrap_admin: Option<BootstrapAdminConfig>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: Secret<String>,
    pub max_connections: u32,
    pub min_connections: u32,
    /// Deadline applied to every store call made by the services.
    pub query_timeout_ms: u64,
}

impl DatabaseConfig {
    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }
}

/// Both keys are 64 hex characters (256 bits) and must differ.
#[derive(Debug, Clone)]
pub struct CryptoConfig {
    pub encryption_key: Secret<String>,
    pub index_key: Secret<String>,
}

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub signing_secret: Secret<String>,
    pub token_lifetime_minutes: i64,
    pub issuer: String,
}

/// Accepted identity shape: `<prefix_len digits>@<identity_domain>`.
#[derive(Debug, Clone)]
pub struct RegistrationConfig {
    pub identity_domain: String,
    pub identity_prefix_len: usize,
    pub external_id_len: usize,
}

/// Caps on the decrypt-and-compare scan over rows without a blind index.
#[derive(Debug, Clone)]
pub struct LookupConfig {
    pub member_scan_cap: i64,
    pub administrator_scan_cap: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RoleCacheBackend {
    Memory,
    Redis,
    Disabled,
}

/// Role cache settings.
///
/// Approval and deactivation through this service invalidate entries
/// immediately. Membership changes written by other systems are only seen
/// once the entry expires, so `ttl_seconds` is the longest a revoked
/// officer role can outlive its membership. `0` disables caching.
#[derive(Debug, Clone)]
pub struct RoleCacheConfig {
    pub backend: RoleCacheBackend,
    pub ttl_seconds: u64,
    pub redis_url: Option<Secret<String>>,
}

#[derive(Debug, Clone)]
pub struct NotificationConfig {
    pub enabled: bool,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_username: String,
    pub smtp_password: Secret<String>,
    pub from_address: String,
    pub reviewer_address: String,
}

#[derive(Debug, Clone)]
pub struct SecurityConfig {
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct SwaggerConfig {
    pub enabled: SwaggerMode,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SwaggerMode {
    Public,
    Disabled,
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub login_attempts: u32,
    pub login_window_seconds: u64,
    pub register_attempts: u32,
    pub register_window_seconds: u64,
    pub global_ip_limit: u32,
    pub global_ip_window_seconds: u64,
    /// Key limits on the first `x-forwarded-for` hop. Only safe behind a
    /// proxy that overwrites the header.
    pub trust_forwarded_for: bool,
    pub prune_interval_seconds: u64,
}

/// Seeds one administrator at startup when none exists.
#[derive(Debug, Clone)]
pub struct BootstrapAdminConfig {
    pub identity: String,
    pub secret: Secret<String>,
    pub display_name: String,
}

impl IdentityConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;

        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;

        let role_cache_backend: RoleCacheBackend =
            get_env("ROLE_CACHE_BACKEND", Some("memory"), false)?
                .parse()
                .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let config = IdentityConfig {
            common: common_config,
            environment: environment.clone(),
            service_name: get_env("SERVICE_NAME", Some("identity-service"), false)?,
            service_version: get_env("SERVICE_VERSION", Some(env!("CARGO_PKG_VERSION")), false)?,
            log_level: get_env("LOG_LEVEL", Some("info"), false)?,
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok().filter(|v| !v.is_empty()),
            database: DatabaseConfig {
                url: Secret::new(get_env("DATABASE_URL", None, is_prod)?),
                max_connections: get_parsed("DATABASE_MAX_CONNECTIONS", "10")?,
                min_connections: get_parsed("DATABASE_MIN_CONNECTIONS", "1")?,
                query_timeout_ms: get_parsed("DATABASE_QUERY_TIMEOUT_MS", "5000")?,
            },
            crypto: CryptoConfig {
                encryption_key: Secret::new(get_env("ENCRYPTION_KEY", None, is_prod)?),
                index_key: Secret::new(get_env("BLIND_INDEX_KEY", None, is_prod)?),
            },
            jwt: JwtConfig {
                signing_secret: Secret::new(get_env("JWT_SECRET", None, is_prod)?),
                token_lifetime_minutes: get_parsed("JWT_EXPIRY_MINUTES", "1440")?,
                issuer: get_env("JWT_ISSUER", Some("identity-service"), false)?,
            },
            registration: RegistrationConfig {
                identity_domain: get_env("REGISTRATION_IDENTITY_DOMAIN", Some("wmsu.edu.ph"), false)?
                    .trim()
                    .to_lowercase(),
                identity_prefix_len: get_parsed("REGISTRATION_IDENTITY_PREFIX_LEN", "9")?,
                external_id_len: get_parsed("REGISTRATION_EXTERNAL_ID_LEN", "9")?,
            },
            lookup: LookupConfig {
                member_scan_cap: get_parsed("LOOKUP_MEMBER_SCAN_CAP", "5000")?,
                administrator_scan_cap: get_parsed("LOOKUP_ADMIN_SCAN_CAP", "1000")?,
            },
            role_cache: RoleCacheConfig {
                redis_url: match role_cache_backend {
                    RoleCacheBackend::Redis => Some(Secret::new(get_env("REDIS_URL", None, false)?)),
                    _ => None,
                },
                backend: role_cache_backend,
                ttl_seconds: get_parsed("ROLE_CACHE_TTL_SECONDS", "10")?,
            },
            notification: {
                let enabled = get_env("NOTIFICATIONS_ENABLED", Some("false"), false)?
                    .parse()
                    .unwrap_or(false);
                // SMTP settings are only mandatory when notifications are on.
                let smtp = |key: &str, default: Option<&str>| {
                    if enabled {
                        get_env(key, default, false)
                    } else {
                        Ok(env::var(key).unwrap_or_else(|_| default.unwrap_or_default().to_string()))
                    }
                };
                NotificationConfig {
                    enabled,
                    smtp_host: smtp("SMTP_HOST", None)?,
                    smtp_port: smtp("SMTP_PORT", Some("587"))?.parse().unwrap_or(587),
                    smtp_username: smtp("SMTP_USERNAME", None)?,
                    smtp_password: Secret::new(smtp("SMTP_PASSWORD", None)?),
                    from_address: smtp("NOTIFICATION_FROM", None)?,
                    reviewer_address: smtp("NOTIFICATION_REVIEWER_ADDRESS", None)?,
                }
            },
            security: SecurityConfig {
                allowed_origins: get_env("ALLOWED_ORIGINS", Some("http://localhost:3000"), false)?
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
            },
            swagger: SwaggerConfig {
                enabled: get_env("ENABLE_SWAGGER", Some("public"), false)?
                    .parse()
                    .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?,
            },
            rate_limit: RateLimitConfig {
                login_attempts: get_parsed("RATE_LIMIT_LOGIN_ATTEMPTS", "10")?,
                login_window_seconds: get_parsed("RATE_LIMIT_LOGIN_WINDOW_SECONDS", "900")?,
                register_attempts: get_parsed("RATE_LIMIT_REGISTER_ATTEMPTS", "5")?,
                register_window_seconds: get_parsed("RATE_LIMIT_REGISTER_WINDOW_SECONDS", "3600")?,
                global_ip_limit: get_parsed("RATE_LIMIT_GLOBAL_IP_LIMIT", "300")?,
                global_ip_window_seconds: get_parsed("RATE_LIMIT_GLOBAL_IP_WINDOW_SECONDS", "60")?,
                trust_forwarded_for: get_parsed("RATE_LIMIT_TRUST_FORWARDED_FOR", "false")?,
                prune_interval_seconds: get_parsed("RATE_LIMIT_PRUNE_INTERVAL_SECONDS", "60")?,
            },
            bootstrap_admin: match (
                env::var("BOOTSTRAP_ADMIN_IDENTITY"),
                env::var("BOOTSTRAP_ADMIN_SECRET"),
            ) {
                (Ok(identity), Ok(secret)) if !identity.is_empty() && !secret.is_empty() => {
                    Some(BootstrapAdminConfig {
                        identity,
                        secret: Secret::new(secret),
                        display_name: get_env(
                            "BOOTSTRAP_ADMIN_NAME",
                            Some("Administrator"),
                            false,
                        )?,
                    })
                }
                _ => None,
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.common.port == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "PORT must be greater than 0"
            )));
        }

        validate_hex_key("ENCRYPTION_KEY", self.crypto.encryption_key.expose_secret())?;
        validate_hex_key("BLIND_INDEX_KEY", self.crypto.index_key.expose_secret())?;

        if self
            .crypto
            .encryption_key
            .expose_secret()
            .eq_ignore_ascii_case(self.crypto.index_key.expose_secret())
        {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "BLIND_INDEX_KEY must differ from ENCRYPTION_KEY"
            )));
        }

        if self.jwt.signing_secret.expose_secret().len() < 32 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "JWT_SECRET must be at least 32 characters"
            )));
        }

        if self.jwt.token_lifetime_minutes <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "JWT_EXPIRY_MINUTES must be positive"
            )));
        }

        if self.lookup.member_scan_cap <= 0 || self.lookup.administrator_scan_cap <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "Lookup scan caps must be positive"
            )));
        }

        if self.database.query_timeout_ms == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "DATABASE_QUERY_TIMEOUT_MS must be positive"
            )));
        }

        if self.registration.identity_domain.is_empty() {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "REGISTRATION_IDENTITY_DOMAIN must not be empty"
            )));
        }

        if self.environment == Environment::Prod {
            if self.security.allowed_origins.iter().any(|o| o == "*") {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "Wildcard CORS origin not allowed in production"
                )));
            }

            if self.swagger.enabled == SwaggerMode::Public {
                tracing::error!("Swagger is publicly accessible in production - consider setting ENABLE_SWAGGER=disabled");
            }
        }

        Ok(())
    }
}

fn validate_hex_key(name: &str, value: &str) -> Result<(), AppError> {
    if value.len() != 64 || !value.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(AppError::ConfigError(anyhow::anyhow!(
            "{} must be 64 hex characters (256 bits)",
            name
        )));
    }
    Ok(())
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required in production but not set",
                    key
                ))))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required but not set",
                    key
                ))))
            }
        }
    }
}

fn get_parsed<T>(key: &str, default: &str) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    get_env(key, Some(default), false)?
        .trim()
        .parse()
        .map_err(|e: T::Err| AppError::ConfigError(anyhow::anyhow!("{}: {}", key, e)))
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}

impl FromStr for SwaggerMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "public" => Ok(SwaggerMode::Public),
            "disabled" => Ok(SwaggerMode::Disabled),
            _ => Err(format!("Invalid swagger mode: {}", s)),
        }
    }
}

impl FromStr for RoleCacheBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memory" => Ok(RoleCacheBackend::Memory),
            "redis" => Ok(RoleCacheBackend::Redis),
            "disabled" | "none" => Ok(RoleCacheBackend::Disabled),
            _ => Err(format!("Invalid role cache backend: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> IdentityConfig {
        IdentityConfig {
            common: core_config::Config::default(),
            environment: Environment::Dev,
            service_name: "identity-service".to_string(),
            service_version: "0.1.0".to_string(),
            log_level: "info".to_string(),
            otlp_endpoint: None,
            database: DatabaseConfig {
                url: Secret::new("postgres://localhost/identity".to_string()),
                max_connections: 5,
                min_connections: 1,
                query_timeout_ms: 1000,
            },
            crypto: CryptoConfig {
                encryption_key: Secret::new("11".repeat(32)),
                index_key: Secret::new("22".repeat(32)),
            },
            jwt: JwtConfig {
                signing_secret: Secret::new("s".repeat(40)),
                token_lifetime_minutes: 60,
                issuer: "identity-service".to_string(),
            },
            registration: RegistrationConfig {
                identity_domain: "wmsu.edu.ph".to_string(),
                identity_prefix_len: 9,
                external_id_len: 9,
            },
            lookup: LookupConfig {
                member_scan_cap: 100,
                administrator_scan_cap: 100,
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
                login_attempts: 10,
                login_window_seconds: 900,
                register_attempts: 5,
                register_window_seconds: 3600,
                global_ip_limit: 300,
                global_ip_window_seconds: 60,
                trust_forwarded_for: false,
                prune_interval_seconds: 60,
            },
            bootstrap_admin: None,
        }
    }

    #[test]
    fn valid_config_passes() {
        assert!(base().validate().is_ok());
    }

    #[test]
    fn short_encryption_key_is_fatal() {
        let mut config = base();
        config.crypto.encryption_key = Secret::new("abcd".to_string());
        assert!(matches!(config.validate(), Err(AppError::ConfigError(_))));
    }

    #[test]
    fn non_hex_key_is_fatal() {
        let mut config = base();
        config.crypto.index_key = Secret::new("zz".repeat(32));
        assert!(config.validate().is_err());
    }

    #[test]
    fn shared_keys_are_rejected() {
        let mut config = base();
        config.crypto.index_key = Secret::new("11".repeat(32));
        assert!(config.validate().is_err());
    }

    #[test]
    fn short_jwt_secret_is_fatal() {
        let mut config = base();
        config.jwt.signing_secret = Secret::new("short".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn wildcard_origin_rejected_in_prod() {
        let mut config = base();
        config.environment = Environment::Prod;
        config.security.allowed_origins = vec!["*".to_string()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn parses_cache_backend_names() {
        assert_eq!("Redis".parse::<RoleCacheBackend>(), Ok(RoleCacheBackend::Redis));
        assert_eq!("none".parse::<RoleCacheBackend>(), Ok(RoleCacheBackend::Disabled));
        assert!("memcached".parse::<RoleCacheBackend>().is_err());
    }
}
