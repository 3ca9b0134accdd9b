use std::path::PathBuf;

use dsc_types::{DiscoveryError, Result};
use tracing::warn;

/// Sandbox policy and engine endpoint settings.
///
/// Loaded once at startup and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct DockerConfig {
    pub allowed_images: Vec<String>,
    pub security_options: Vec<String>,
    pub network_mode: String,
    pub volumes_path: PathBuf,
    pub memory_limit: String,
    pub cpu_limit: Option<f64>,
    pub change_owner: bool,
    pub fail_on_nonzero_exit: bool,
    pub wait_timeout: Option<u64>,

    // Remote engine endpoint
    pub host: Option<String>,
    pub client_cert: Option<PathBuf>,
    pub client_key: Option<PathBuf>,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            allowed_images: Vec::new(),
            security_options: Vec::new(),
            network_mode: "bridge".to_string(),
            volumes_path: std::env::temp_dir(),
            memory_limit: "50M".to_string(),
            cpu_limit: None,
            change_owner: true,
            fail_on_nonzero_exit: false,
            wait_timeout: None,
            host: None,
            client_cert: None,
            client_key: None,
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    // Project settings
    pub project_name: String,
    pub version: String,
    pub debug: bool,

    // Paths
    pub base_dir: PathBuf,
    pub data_dir: PathBuf,
    pub storage_dir: PathBuf,
    pub db_path: PathBuf,

    // Sandbox
    pub docker: DockerConfig,

    // Domain validation
    pub dns_resolver_url: String,

    // Performance
    pub db_connection_pool_size: u32,

    // Logging
    pub log_level: String,
    pub log_json: bool,
    pub log_file: Option<PathBuf>,
}

impl Config {
    /// Load configuration from environment variables (with dotenvy).
    pub fn load() -> Result<Self> {
        // Load .env file if it exists (ignore errors, file may not exist)
        let _ = dotenvy::dotenv();

        let base_dir = env_or("BASE_DIR", || {
            std::env::current_dir()
                .unwrap_or_default()
                .to_string_lossy()
                .to_string()
        });
        let base = PathBuf::from(&base_dir);

        let data_dir = env_path_or("DATA_DIR", || base.join("data"));
        let storage_dir = env_path_or("STORAGE_DIR", || data_dir.join("storage"));

        let docker = DockerConfig {
            allowed_images: env_list("DOCKER_ALLOWED_IMAGES"),
            security_options: env_list("DOCKER_SECURITY_OPTIONS"),
            network_mode: env_or("DOCKER_NETWORK_MODE", || "bridge".to_string()),
            volumes_path: env_path_or("DOCKER_VOLUMES_PATH", std::env::temp_dir),
            memory_limit: env_or("DOCKER_LIMITS_MEMORY", || "50M".to_string()),
            cpu_limit: env_parse("DOCKER_LIMITS_CPU")?,
            change_owner: env_bool("DOCKER_CHANGE_OWNER", true),
            fail_on_nonzero_exit: env_bool("DOCKER_FAIL_ON_NONZERO_EXIT", false),
            wait_timeout: env_parse("DOCKER_WAIT_TIMEOUT")?,
            host: env_opt("DOCKER_HOST"),
            client_cert: env_opt("DOCKER_CLIENT_CERT").map(PathBuf::from),
            client_key: env_opt("DOCKER_CLIENT_KEY").map(PathBuf::from),
        };

        let config = Config {
            project_name: env_or("PROJECT_NAME", || "Discovery".to_string()),
            version: env_or("VERSION", || "0.1.0-alpha".to_string()),
            debug: env_bool("DEBUG", false),

            base_dir: base.clone(),
            data_dir: data_dir.clone(),
            storage_dir,
            db_path: env_path_or("DB_PATH", || data_dir.join("discovery.db")),

            docker,

            dns_resolver_url: env_or("DNS_RESOLVER_URL", || {
                "https://cloudflare-dns.com/dns-query".to_string()
            }),

            db_connection_pool_size: env_u32("DB_CONNECTION_POOL_SIZE", 5),

            log_level: env_or("LOG_LEVEL", || "info".to_string()),
            log_json: env_bool("LOG_JSON", false),
            log_file: env_opt("LOG_FILE").map(PathBuf::from),
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject combinations the sandbox engine cannot work with.
    pub fn validate(&self) -> Result<()> {
        let docker = &self.docker;
        if docker.client_cert.is_some() != docker.client_key.is_some() {
            return Err(DiscoveryError::Config(
                "DOCKER_CLIENT_CERT and DOCKER_CLIENT_KEY must be set together".to_string(),
            ));
        }
        if docker.client_cert.is_some() && docker.host.is_none() {
            return Err(DiscoveryError::Config(
                "DOCKER_HOST is required when client certificates are configured".to_string(),
            ));
        }
        if docker.network_mode.trim().is_empty() {
            return Err(DiscoveryError::Config(
                "DOCKER_NETWORK_MODE must not be empty".to_string(),
            ));
        }
        if let Some(cpus) = docker.cpu_limit {
            if !cpus.is_finite() || cpus <= 0.0 {
                return Err(DiscoveryError::Config(format!(
                    "DOCKER_LIMITS_CPU must be a positive number, got {cpus}"
                )));
            }
        }
        if docker.wait_timeout == Some(0) {
            return Err(DiscoveryError::Config(
                "DOCKER_WAIT_TIMEOUT must be at least one second".to_string(),
            ));
        }
        if docker.allowed_images.is_empty() {
            warn!("DOCKER_ALLOWED_IMAGES is empty; every run will be rejected");
        }
        Ok(())
    }

    /// Create required directories.
    pub fn create_directories(&self) -> Result<()> {
        let mut dirs = vec![
            self.data_dir.clone(),
            self.storage_dir.clone(),
            self.docker.volumes_path.clone(),
        ];
        if let Some(parent) = self.db_path.parent() {
            dirs.push(parent.to_path_buf());
        }

        for dir in &dirs {
            std::fs::create_dir_all(dir).map_err(|e| {
                DiscoveryError::Config(format!(
                    "Failed to create directory {}: {e}",
                    dir.display()
                ))
            })?;
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Env helpers
// ---------------------------------------------------------------------------

fn env_or(key: &str, default: impl FnOnce() -> String) -> String {
    std::env::var(key).unwrap_or_else(|_| default())
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|s| !s.is_empty())
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Optional typed value; a set but unparsable value is a configuration error.
fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    parse_opt(key, env_opt(key))
}

fn parse_opt<T: std::str::FromStr>(key: &str, value: Option<String>) -> Result<Option<T>> {
    value
        .map(|v| {
            v.trim()
                .parse()
                .map_err(|_| DiscoveryError::Config(format!("{key} has an invalid value: {v}")))
        })
        .transpose()
}

/// Comma-separated list; blank entries are dropped.
fn env_list(key: &str) -> Vec<String> {
    env_opt(key)
        .map(|v| parse_list(&v))
        .unwrap_or_default()
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn env_path_or(key: &str, default: impl FnOnce() -> PathBuf) -> PathBuf {
    std::env::var(key)
        .ok()
        .map(PathBuf::from)
        .unwrap_or_else(default)
}
