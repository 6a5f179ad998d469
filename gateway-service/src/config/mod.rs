use secrecy::{ExposeSecret, Secret};
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;

pub const DEFAULT_CACHE_TTL_SECONDS: u64 = 1800;

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub cache: CacheConfig,
    pub queue: QueueConfig,
    pub jwt: JwtConfig,
    pub authz: AuthzConfig,
    pub security: SecurityConfig,
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
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub host: String,
    pub port: u16,
    pub db: i64,
    pub username: Option<String>,
    pub password: Option<Secret<String>>,
    pub default_ttl_seconds: u64,
    /// TTL for the "explicitly denied" sentinel; 0 disables negative caching.
    pub negative_ttl_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub url: Secret<String>,
}

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub signing_key: Secret<String>,
}

#[derive(Debug, Clone, Default)]
pub struct AuthzConfig {
    /// Accounts whose email ends with `@<domain>` are granted the superuser role.
    pub superuser_email_domain: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SecurityConfig {
    pub allowed_origins: Vec<String>,
}

impl CacheConfig {
    /// Connection URL in the form accepted by `redis::Client::open`.
    pub fn connection_url(&self) -> String {
        let auth = match (&self.username, &self.password) {
            (Some(user), Some(pass)) => format!("{}:{}@", user, pass.expose_secret()),
            (None, Some(pass)) => format!(":{}@", pass.expose_secret()),
            (Some(user), None) => format!("{}@", user),
            (None, None) => String::new(),
        };
        format!("redis://{}{}:{}/{}", auth, self.host, self.port, self.db)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 6379,
            db: 1,
            username: None,
            password: None,
            default_ttl_seconds: DEFAULT_CACHE_TTL_SECONDS,
            negative_ttl_seconds: DEFAULT_CACHE_TTL_SECONDS,
        }
    }
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;

        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let config = GatewayConfig {
            common: common_config,
            environment: environment.clone(),
            service_name: get_env("SERVICE_NAME", Some("gateway-service"))?,
            service_version: get_env("SERVICE_VERSION", Some(env!("CARGO_PKG_VERSION")))?,
            log_level: get_env("LOG_LEVEL", Some("info"))?,
            otlp_endpoint: get_optional_env("OTLP_ENDPOINT"),
            database: DatabaseConfig {
                url: Secret::new(get_env("DATABASE_URL", None)?),
                max_connections: parse_env("DATABASE_MAX_CONNECTIONS", "10")?,
                min_connections: parse_env("DATABASE_MIN_CONNECTIONS", "1")?,
            },
            cache: CacheConfig {
                host: get_env("CACHE_REDIS_HOST", Some("localhost"))?,
                port: parse_env("CACHE_REDIS_PORT", "6379")?,
                db: parse_env("CACHE_REDIS_DB", "1")?,
                username: get_optional_env("CACHE_REDIS_USERNAME"),
                password: get_optional_env("CACHE_REDIS_PASSWORD").map(Secret::new),
                default_ttl_seconds: parse_env("CACHE_TTL_SECONDS", "1800")?,
                negative_ttl_seconds: parse_env("CACHE_NEGATIVE_TTL_SECONDS", "1800")?,
            },
            queue: QueueConfig {
                url: Secret::new(get_env(
                    "QUEUE_REDIS_URL",
                    Some("redis://localhost:6379/0"),
                )?),
            },
            // The signing key has no default in any environment.
            jwt: JwtConfig {
                signing_key: Secret::new(get_env("JWT_TOKEN_KEY", None)?),
            },
            authz: AuthzConfig {
                superuser_email_domain: get_optional_env("SUPERUSER_EMAIL_DOMAIN")
                    .map(|d| d.trim_start_matches('@').to_lowercase()),
            },
            security: SecurityConfig {
                allowed_origins: get_env("ALLOWED_ORIGINS", Some("*"))?
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.jwt.signing_key.expose_secret().trim().is_empty() {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "JWT_TOKEN_KEY must not be empty"
            )));
        }

        if self.cache.default_ttl_seconds == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "CACHE_TTL_SECONDS must be positive"
            )));
        }

        if self.database.max_connections == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "DATABASE_MAX_CONNECTIONS must be positive"
            )));
        }

        if self.environment == Environment::Prod
            && self.security.allowed_origins.iter().any(|o| o == "*")
        {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "Wildcard CORS origin not allowed in production"
            )));
        }

        Ok(())
    }
}

fn get_optional_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn get_env(key: &str, default: Option<&str>) -> Result<String, AppError> {
    match get_optional_env(key) {
        Some(val) => Ok(val),
        None => default.map(str::to_string).ok_or_else(|| {
            AppError::ConfigError(anyhow::anyhow!("{} is required but not set", key))
        }),
    }
}

fn parse_env<T>(key: &str, default: &str) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    get_env(key, Some(default))?
        .parse()
        .map_err(|e: T::Err| AppError::ConfigError(anyhow::anyhow!("{} is invalid: {}", key, e)))
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}
