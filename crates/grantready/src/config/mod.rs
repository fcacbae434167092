use std::env;
use std::fmt;
use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use crate::workflows::grant::budget::CatalogError;
use crate::workflows::grant::{ComplianceRules, InstituteCatalog, OverlayPolicy};

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub engine: EngineConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            engine: EngineConfig::from_env()?,
        })
    }
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Tracing controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

/// Rules engine inputs: where institute caps come from and the overlay policy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineConfig {
    /// TOML `[[institutes]]` catalog; the built-in catalog is used when unset.
    pub institutes_path: Option<PathBuf>,
    pub legacy_aims_fallback: bool,
}

impl EngineConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let institutes_path = env::var("GRANT_INSTITUTES_PATH")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .map(PathBuf::from);

        let legacy_aims_fallback = match env::var("GRANT_LEGACY_AIMS_FALLBACK") {
            Ok(value) => parse_flag("GRANT_LEGACY_AIMS_FALLBACK", &value)?,
            Err(_) => false,
        };

        Ok(Self {
            institutes_path,
            legacy_aims_fallback,
        })
    }

    /// Build the rule set, reading the institute catalog from disk when configured.
    pub fn rules(&self) -> Result<ComplianceRules, ConfigError> {
        let catalog = match &self.institutes_path {
            Some(path) => {
                let raw = fs::read_to_string(path).map_err(|source| ConfigError::CatalogRead {
                    path: path.clone(),
                    source,
                })?;
                InstituteCatalog::from_toml_str(&raw).map_err(ConfigError::Catalog)?
            }
            None => InstituteCatalog::standard(),
        };

        Ok(ComplianceRules::new(
            catalog,
            OverlayPolicy {
                legacy_aims_fallback: self.legacy_aims_fallback,
            },
        ))
    }
}

fn parse_flag(name: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::InvalidFlag {
            name,
            value: value.to_string(),
        }),
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidFlag { name: &'static str, value: String },
    CatalogRead { path: PathBuf, source: std::io::Error },
    Catalog(CatalogError),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidFlag { name, value } => {
                write!(f, "{name} must be true or false (found '{value}')")
            }
            ConfigError::CatalogRead { path, .. } => {
                write!(f, "unable to read institute catalog {}", path.display())
            }
            ConfigError::Catalog(err) => write!(f, "invalid institute catalog: {err}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidPort | ConfigError::InvalidFlag { .. } => None,
            ConfigError::InvalidHost { source } => Some(source),
            ConfigError::CatalogRead { source, .. } => Some(source),
            ConfigError::Catalog(err) => Some(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::{Mutex, OnceLock};

    fn env_guard() -> &'static Mutex<()> {
        static GUARD: OnceLock<Mutex<()>> = OnceLock::new();
        GUARD.get_or_init(|| Mutex::new(()))
    }

    fn reset_env() {
        env::remove_var("APP_ENV");
        env::remove_var("APP_HOST");
        env::remove_var("APP_PORT");
        env::remove_var("APP_LOG_LEVEL");
        env::remove_var("GRANT_INSTITUTES_PATH");
        env::remove_var("GRANT_LEGACY_AIMS_FALLBACK");
    }

    #[test]
    fn load_uses_defaults_when_env_missing() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        let config = AppConfig::load().expect("config loads with defaults");
        assert_eq!(config.environment, AppEnvironment::Development);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.telemetry.log_level, "info");
        assert_eq!(config.engine, EngineConfig::default());

        let rules = config.engine.rules().expect("built-in catalog");
        assert!(!rules.overlay.legacy_aims_fallback);
        assert!(rules.catalog.get("NCI").is_some());
    }

    #[test]
    fn accepts_localhost_host() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("APP_HOST", "localhost");
        let config = AppConfig::load().expect("config loads");
        let addr = config.server.socket_addr().expect("localhost resolves");
        assert_eq!(addr, SocketAddr::new(IpAddr::from([127, 0, 0, 1]), 3000));
    }

    #[test]
    fn legacy_aims_flag_parses_and_rejects_garbage() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("GRANT_LEGACY_AIMS_FALLBACK", "TRUE");
        let config = AppConfig::load().expect("config loads");
        assert!(config.engine.legacy_aims_fallback);

        env::set_var("GRANT_LEGACY_AIMS_FALLBACK", "sometimes");
        assert!(matches!(
            AppConfig::load(),
            Err(ConfigError::InvalidFlag { name: "GRANT_LEGACY_AIMS_FALLBACK", .. })
        ));
        reset_env();
    }

    #[test]
    fn missing_catalog_file_is_reported() {
        let engine = EngineConfig {
            institutes_path: Some(PathBuf::from("/nonexistent/institutes.toml")),
            legacy_aims_fallback: false,
        };
        assert!(matches!(
            engine.rules(),
            Err(ConfigError::CatalogRead { .. })
        ));
    }

    #[test]
    fn catalog_file_replaces_built_in_institutes() {
        let path = env::temp_dir().join(format!("grantready-catalog-{}.toml", std::process::id()));
        fs::write(
            &path,
            "[[institutes]]\ncode = \"nidcr\"\nname = \"Dental\"\nphase1_cap = 250000\nphase2_cap = 1500000\n",
        )
        .expect("write catalog");

        let engine = EngineConfig {
            institutes_path: Some(path.clone()),
            legacy_aims_fallback: true,
        };
        let rules = engine.rules().expect("catalog parses");
        fs::remove_file(&path).ok();

        assert!(rules.catalog.get("NIDCR").is_some());
        assert!(rules.catalog.get("NCI").is_none());
        assert!(rules.overlay.legacy_aims_fallback);
    }
}
