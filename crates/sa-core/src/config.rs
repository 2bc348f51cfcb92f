//! Environment-driven configuration (`SPEC_FULL.md` §4.10, §6).
//!
//! One sub-struct per external collaborator, assembled once into a top-level
//! [`Config`] at process startup. Loading is fail-open for collaborators whose
//! credentials are absent (that collaborator's syncer contribution is disabled
//! and a warning is logged by the caller) and fail-closed only for malformed
//! numeric/duration settings.

use std::env;
use std::fmt;
use std::time::Duration;

/// A config value whose `Debug` impl never prints the underlying secret.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl From<String> for Secret {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            write!(f, "<unset>")
        } else {
            write!(f, "<redacted>")
        }
    }
}

#[derive(Debug, Clone)]
pub struct SafetyAmpConfig {
    pub domain: String,
    pub fqdn: String,
    pub token: Secret,
}

#[derive(Debug, Clone)]
pub struct SamsaraConfig {
    pub domain: String,
    pub api_key: Secret,
}

#[derive(Debug, Clone)]
pub struct GraphConfig {
    pub client_id: String,
    pub client_secret: Secret,
    pub tenant_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlAuthMode {
    ManagedIdentity,
    SqlAuth,
}

#[derive(Debug, Clone)]
pub struct ErpConfig {
    pub server: String,
    pub database: String,
    pub driver: String,
    pub auth_mode: SqlAuthMode,
}

#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
    pub db: u8,
    pub password: Option<Secret>,
}

impl RedisConfig {
    pub fn url(&self) -> String {
        match &self.password {
            Some(pw) if !pw.expose().is_empty() => {
                format!("redis://:{}@{}:{}/{}", pw.expose(), self.host, self.port, self.db)
            }
            _ => format!("redis://{}:{}/{}", self.host, self.port, self.db),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CachePolicyConfig {
    pub ttl_hours: u64,
    pub refresh_interval_hours: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct HttpPolicyConfig {
    pub rate_limit_calls: u32,
    pub rate_limit_period: Duration,
    pub max_retry_attempts: u32,
    pub retry_delay: Duration,
    pub request_timeout: Duration,
}

#[derive(Debug, Clone, Copy)]
pub struct OrchestratorConfig {
    pub sync_interval: Duration,
    pub vista_refresh: Duration,
}

#[derive(Debug, Clone, Copy)]
pub struct FailureMemoryConfig {
    pub enabled: bool,
    pub ttl_days: u64,
}

#[derive(Debug, Clone)]
pub struct DashboardConfig {
    pub token: Option<Secret>,
}

impl DashboardConfig {
    pub fn auth_enabled(&self) -> bool {
        self.token.as_ref().is_some_and(|t| !t.expose().is_empty())
    }
}

#[derive(Debug, Clone)]
pub struct ListenConfig {
    pub bind_address: String,
    pub port: u16,
    pub metrics_port: u16,
}

/// Vehicle-asset defaults; §9 Open Questions preserves the hardcoded override
/// but makes it configurable.
#[derive(Debug, Clone, Copy)]
pub struct VehicleDefaults {
    pub default_site_id: i64,
    pub default_vehicle_asset_type_id: i64,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub safetyamp: SafetyAmpConfig,
    pub samsara: Option<SamsaraConfig>,
    pub graph: Option<GraphConfig>,
    pub erp: Option<ErpConfig>,
    pub redis: RedisConfig,
    pub cache_policy: CachePolicyConfig,
    pub http_policy: HttpPolicyConfig,
    pub orchestrator: OrchestratorConfig,
    pub failure_memory: FailureMemoryConfig,
    pub dashboard: DashboardConfig,
    pub listen: ListenConfig,
    pub vehicle_defaults: VehicleDefaults,
}

#[derive(Debug, Clone)]
pub struct ConfigError(pub String);

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "configuration error: {}", self.0)
    }
}

impl std::error::Error for ConfigError {}

fn var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

fn var_or(key: &str, default: &str) -> String {
    var(key).unwrap_or_else(|| default.to_string())
}

fn var_u64(key: &str, default: u64) -> Result<u64, ConfigError> {
    match var(key) {
        None => Ok(default),
        Some(v) => v
            .parse()
            .map_err(|_| ConfigError(format!("{key} must be an integer, got {v:?}"))),
    }
}

fn var_u32(key: &str, default: u32) -> Result<u32, ConfigError> {
    match var(key) {
        None => Ok(default),
        Some(v) => v
            .parse()
            .map_err(|_| ConfigError(format!("{key} must be an integer, got {v:?}"))),
    }
}

fn var_u16(key: &str, default: u16) -> Result<u16, ConfigError> {
    match var(key) {
        None => Ok(default),
        Some(v) => v
            .parse()
            .map_err(|_| ConfigError(format!("{key} must be an integer, got {v:?}"))),
    }
}

fn var_u8(key: &str, default: u8) -> Result<u8, ConfigError> {
    match var(key) {
        None => Ok(default),
        Some(v) => v
            .parse()
            .map_err(|_| ConfigError(format!("{key} must be an integer, got {v:?}"))),
    }
}

fn var_bool(key: &str, default: bool) -> bool {
    match var(key) {
        None => default,
        Some(v) => matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
    }
}

impl Config {
    /// Assemble the full config from the process environment. `SAFETYAMP_*`
    /// are the only settings with no safe default beyond the dashboard token
    /// (itself optional — absence means "auth disabled").
    pub fn from_env() -> Result<Self, ConfigError> {
        let safetyamp = SafetyAmpConfig {
            domain: var("SAFETYAMP_DOMAIN").unwrap_or_default(),
            fqdn: var("SAFETYAMP_FQDN").unwrap_or_default(),
            token: Secret::from(var("SAFETYAMP_TOKEN").unwrap_or_default()),
        };

        let samsara = match (var("SAMSARA_DOMAIN"), var("SAMSARA_API_KEY")) {
            (Some(domain), Some(api_key)) => Some(SamsaraConfig {
                domain,
                api_key: Secret::from(api_key),
            }),
            _ => None,
        };

        let graph = match (
            var("MS_GRAPH_CLIENT_ID"),
            var("MS_GRAPH_CLIENT_SECRET"),
            var("MS_GRAPH_TENANT_ID"),
        ) {
            (Some(client_id), Some(client_secret), Some(tenant_id)) => Some(GraphConfig {
                client_id,
                client_secret: Secret::from(client_secret),
                tenant_id,
            }),
            _ => None,
        };

        let erp = match (var("SQL_SERVER"), var("SQL_DATABASE")) {
            (Some(server), Some(database)) => {
                let driver = var_or("SQL_DRIVER", "ODBC Driver 18 for SQL Server");
                let auth_mode = match var_or("SQL_AUTH_MODE", "managed_identity").as_str() {
                    "sql_auth" => SqlAuthMode::SqlAuth,
                    _ => SqlAuthMode::ManagedIdentity,
                };
                Some(ErpConfig {
                    server,
                    database,
                    driver,
                    auth_mode,
                })
            }
            _ => None,
        };

        let redis = RedisConfig {
            host: var_or("REDIS_HOST", "localhost"),
            port: var_u16("REDIS_PORT", 6379)?,
            db: var_u8("REDIS_DB", 0)?,
            password: var("REDIS_PASSWORD").map(Secret::from),
        };

        let cache_policy = CachePolicyConfig {
            ttl_hours: var_u64("CACHE_TTL_HOURS", 4)?,
            refresh_interval_hours: var_u64("CACHE_REFRESH_INTERVAL_HOURS", 4)?,
        };

        let http_policy = HttpPolicyConfig {
            rate_limit_calls: var_u32("API_RATE_LIMIT_CALLS", 60)?,
            rate_limit_period: Duration::from_secs(var_u64("API_RATE_LIMIT_PERIOD", 61)?),
            max_retry_attempts: var_u32("MAX_RETRY_ATTEMPTS", 6)?,
            retry_delay: Duration::from_secs(var_u64("RETRY_DELAY_SECONDS", 1)?),
            request_timeout: Duration::from_secs(var_u64("HTTP_REQUEST_TIMEOUT", 15)?),
        };

        let orchestrator = OrchestratorConfig {
            sync_interval: Duration::from_secs(60 * var_u64("SYNC_INTERVAL_MINUTES", 60)?),
            vista_refresh: Duration::from_secs(60 * var_u64("VISTA_REFRESH_MINUTES", 30)?),
        };

        let failure_memory = FailureMemoryConfig {
            enabled: var_bool("FAILED_SYNC_TRACKER_ENABLED", true),
            ttl_days: var_u64("FAILED_SYNC_TTL_DAYS", 7)?,
        };

        let dashboard = DashboardConfig {
            token: var("DASHBOARD_API_TOKEN").map(Secret::from),
        };

        let listen = ListenConfig {
            bind_address: var_or("BIND_ADDRESS", "0.0.0.0"),
            port: var_u16("PORT", 8080)?,
            metrics_port: var_u16("METRICS_PORT", 9090)?,
        };

        let vehicle_defaults = VehicleDefaults {
            default_site_id: var_u64("DEFAULT_VEHICLE_SITE_ID", 5145)? as i64,
            default_vehicle_asset_type_id: var_u64("DEFAULT_VEHICLE_ASSET_TYPE_ID", 3183)? as i64,
        };

        Ok(Config {
            safetyamp,
            samsara,
            graph,
            erp,
            redis,
            cache_policy,
            http_policy,
            orchestrator,
            failure_memory,
            dashboard,
            listen,
            vehicle_defaults,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_debug_never_prints_value() {
        let s = Secret::from("super-secret-token".to_string());
        assert_eq!(format!("{s:?}"), "<redacted>");
    }

    #[test]
    fn empty_secret_debug_prints_unset() {
        let s = Secret::default();
        assert_eq!(format!("{s:?}"), "<unset>");
    }

    #[test]
    fn redis_url_without_password() {
        let cfg = RedisConfig {
            host: "localhost".into(),
            port: 6379,
            db: 0,
            password: None,
        };
        assert_eq!(cfg.url(), "redis://localhost:6379/0");
    }

    #[test]
    fn redis_url_with_password() {
        let cfg = RedisConfig {
            host: "localhost".into(),
            port: 6379,
            db: 2,
            password: Some(Secret::from("hunter2".to_string())),
        };
        assert_eq!(cfg.url(), "redis://:hunter2@localhost:6379/2");
    }
}
