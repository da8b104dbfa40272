use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::OnceLock;

static CONFIG: OnceLock<AppConfig> = OnceLock::new();

/// Web server configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// API key expected in the X-API-Key header on every /api and
    /// /frontend request.
    pub api_key: String,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8686
}

/// Locations of the persisted state files.
#[derive(Debug, Deserialize, Clone)]
pub struct PathsConfig {
    #[serde(default = "default_credentials_path")]
    pub credentials: PathBuf,
    #[serde(default = "default_access_path")]
    pub access: PathBuf,
    #[serde(default = "default_domain_path")]
    pub domain: PathBuf,
}

fn default_credentials_path() -> PathBuf {
    PathBuf::from("/etc/keywarden/credentials.json")
}

fn default_access_path() -> PathBuf {
    PathBuf::from("/etc/keywarden/access.json")
}

fn default_domain_path() -> PathBuf {
    PathBuf::from("/etc/keywarden/domain")
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            credentials: default_credentials_path(),
            access: default_access_path(),
            domain: default_domain_path(),
        }
    }
}

/// Values used to seed access.json when it does not exist yet.
/// Once the file exists it is the sole source of truth.
#[derive(Debug, Deserialize, Clone)]
pub struct AccessSeedConfig {
    #[serde(default = "default_mode")]
    pub mode: String,
    pub admin: String,
    #[serde(default = "default_daily_price")]
    pub daily_price: u64,
    #[serde(default = "default_min_price")]
    pub min_price: u64,
}

fn default_mode() -> String {
    "private".to_string()
}

fn default_daily_price() -> u64 {
    1000
}

fn default_min_price() -> u64 {
    500
}

/// Payment provider configuration
#[derive(Debug, Deserialize, Clone)]
pub struct PaymentConfig {
    pub base_url: String,
    pub slug: String,
    pub api_key: String,
    #[serde(default = "default_poll_secs")]
    pub poll_secs: u64,
    #[serde(default = "default_intent_max_age_secs")]
    pub intent_max_age_secs: u64,
    #[serde(default = "default_provider_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_poll_secs() -> u64 {
    60
}

fn default_intent_max_age_secs() -> u64 {
    1800
}

fn default_provider_timeout_secs() -> u64 {
    15
}

/// Expiry sweeper configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SweeperConfig {
    #[serde(default = "default_sweep_secs")]
    pub interval_secs: u64,
}

fn default_sweep_secs() -> u64 {
    3600
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_sweep_secs(),
        }
    }
}

/// Protected service identity and control commands.
///
/// The reload/restart commands are argv vectors run as-is; an empty
/// vector disables that side effect (useful in development).
#[derive(Debug, Deserialize, Clone)]
pub struct ServiceConfig {
    #[serde(default = "default_service_name")]
    pub name: String,
    #[serde(default = "default_service_port")]
    pub port: u16,
    #[serde(default)]
    pub reload_command: Vec<String>,
    #[serde(default)]
    pub restart_frontend_command: Vec<String>,
    #[serde(default = "default_restart_delay_secs")]
    pub restart_delay_secs: u64,
}

fn default_service_name() -> String {
    "keywarden".to_string()
}

fn default_service_port() -> u16 {
    5667
}

fn default_restart_delay_secs() -> u64 {
    2
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            port: default_service_port(),
            reload_command: Vec::new(),
            restart_frontend_command: Vec::new(),
            restart_delay_secs: default_restart_delay_secs(),
        }
    }
}

/// IP/geo enrichment lookup
#[derive(Debug, Deserialize, Clone)]
pub struct IpInfoConfig {
    #[serde(default = "default_ipinfo_url")]
    pub url: String,
    #[serde(default = "default_ipinfo_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_ipinfo_url() -> String {
    "http://ip-api.com/json/".to_string()
}

fn default_ipinfo_timeout_secs() -> u64 {
    2
}

impl Default for IpInfoConfig {
    fn default() -> Self {
        Self {
            url: default_ipinfo_url(),
            timeout_secs: default_ipinfo_timeout_secs(),
        }
    }
}

/// Root application configuration
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    pub access: AccessSeedConfig,
    pub payment: PaymentConfig,
    #[serde(default)]
    pub sweeper: SweeperConfig,
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub ipinfo: IpInfoConfig,
}

impl AppConfig {
    /// Load configuration from files and environment variables
    pub fn load() -> Result<Self, ConfigError> {
        let config = Config::builder()
            // Start with default config file
            .add_source(File::with_name("config/default").required(false))
            // Override with local config if present
            .add_source(File::with_name("config/local").required(false))
            // Override with environment variables (prefix: KEYWARDEN_)
            // e.g., KEYWARDEN_SERVER__API_KEY, KEYWARDEN_PAYMENT__SLUG
            .add_source(
                Environment::with_prefix("KEYWARDEN")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Initialize the global config singleton
    pub fn init() -> Result<&'static Self, ConfigError> {
        let config = Self::load()?;
        Ok(CONFIG.get_or_init(|| config))
    }

    /// Get reference to the global config
    pub fn get() -> &'static Self {
        CONFIG
            .get()
            .expect("Config not initialized. Call AppConfig::init() first.")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seed_defaults() {
        let seed: AccessSeedConfig =
            serde_json::from_str(r#"{"admin": "actor:1"}"#).unwrap();
        assert_eq!(seed.mode, "private");
        assert_eq!(seed.daily_price, 1000);
        assert_eq!(seed.min_price, 500);
    }

    #[test]
    fn service_commands_default_empty() {
        let service = ServiceConfig::default();
        assert!(service.reload_command.is_empty());
        assert_eq!(service.restart_delay_secs, 2);
    }
}
