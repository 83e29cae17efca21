use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct RecoveryConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub recovery: RecoveryPolicyConfig,
    pub downstream: DownstreamConfig,
    pub timeouts: TimeoutConfig,
    pub background: BackgroundConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecoveryPolicyConfig {
    /// HMAC secret for recovery tokens. Empty disables token issuance.
    pub token_secret: String,
    pub expiry_minutes: i64,
    pub template_id: String,
    pub frontend_url: String,
    pub queue_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DownstreamConfig {
    pub mail_service_url: String,
    pub permission_service_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TimeoutConfig {
    pub auth_call_seconds: u64,
    pub recovery_step_seconds: u64,
}

impl TimeoutConfig {
    /// Budget for calls on the authentication hot path (user lookup).
    pub fn auth_call(&self) -> Duration {
        Duration::from_secs(self.auth_call_seconds)
    }

    /// Budget for each downstream call made by a recovery step.
    pub fn recovery_step(&self) -> Duration {
        Duration::from_secs(self.recovery_step_seconds)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackgroundConfig {
    pub workers: usize,
    pub queue_depth: usize,
    pub sweep_interval_seconds: u64,
}

impl RecoveryConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;

        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;

        let config = RecoveryConfig {
            common: common_config,
            environment: environment.clone(),
            service_name: get_env("SERVICE_NAME", Some("recovery-service"), is_prod)?,
            service_version: get_env("SERVICE_VERSION", Some(env!("CARGO_PKG_VERSION")), is_prod)?,
            log_level: get_env("LOG_LEVEL", Some("info"), is_prod)?,
            database: DatabaseConfig {
                url: get_env("DATABASE_URL", None, is_prod)?,
                max_connections: parse_env("DATABASE_MAX_CONNECTIONS", "10", is_prod)?,
                min_connections: parse_env("DATABASE_MIN_CONNECTIONS", "1", is_prod)?,
            },
            redis: RedisConfig {
                url: get_env("REDIS_URL", None, is_prod)?,
            },
            recovery: RecoveryPolicyConfig {
                token_secret: get_env("RECOVERY_TOKEN_SECRET", Some(""), is_prod)?,
                expiry_minutes: parse_env("RECOVERY_EXPIRY_MINUTES", "15", is_prod)?,
                template_id: get_env("RECOVERY_TEMPLATE_ID", Some("forgot-password"), is_prod)?,
                frontend_url: get_env("FRONTEND_URL", Some("http://localhost:3000"), is_prod)?,
                queue_name: get_env("RECOVERY_QUEUE_NAME", Some("mail"), is_prod)?,
            },
            downstream: DownstreamConfig {
                mail_service_url: get_env(
                    "MAIL_SERVICE_URL",
                    Some("http://localhost:8090"),
                    is_prod,
                )?,
                permission_service_url: get_env(
                    "PERMISSION_SERVICE_URL",
                    Some("http://localhost:8091"),
                    is_prod,
                )?,
            },
            timeouts: TimeoutConfig {
                auth_call_seconds: parse_env("AUTH_CALL_TIMEOUT_SECONDS", "3", is_prod)?,
                recovery_step_seconds: parse_env("RECOVERY_STEP_TIMEOUT_SECONDS", "10", is_prod)?,
            },
            background: BackgroundConfig {
                workers: parse_env("BACKGROUND_WORKERS", "8", is_prod)?,
                queue_depth: parse_env("BACKGROUND_QUEUE_DEPTH", "1024", is_prod)?,
                sweep_interval_seconds: parse_env("SESSION_SWEEP_INTERVAL_SECONDS", "300", is_prod)?,
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

        if self.recovery.expiry_minutes <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "RECOVERY_EXPIRY_MINUTES must be positive"
            )));
        }

        if self.timeouts.auth_call_seconds == 0 || self.timeouts.recovery_step_seconds == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "Call timeouts must be positive"
            )));
        }

        if self.background.workers == 0 || self.background.queue_depth == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "BACKGROUND_WORKERS and BACKGROUND_QUEUE_DEPTH must be positive"
            )));
        }

        if self.environment == Environment::Prod {
            if self.recovery.token_secret.len() < 32 {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "RECOVERY_TOKEN_SECRET must be at least 32 bytes in production"
                )));
            }
        } else if self.recovery.token_secret.is_empty() {
            tracing::warn!("RECOVERY_TOKEN_SECRET is empty; token recovery will fail to sign");
        }

        Ok(())
    }
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

fn parse_env<T>(key: &str, default: &str, is_prod: bool) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    get_env(key, Some(default), is_prod)?
        .parse()
        .map_err(|e: T::Err| AppError::ConfigError(anyhow::anyhow!("{}: {}", key, e)))
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
