//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! Service-account passwords are read from the env var named by
//! `password_env` or from `password_file`, never from the TOML itself.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use central_auth::{Credential, TokenPolicy};
use central_client::{LocalProject, RetryPolicy, Role, RolePolicy};
use common::Secret;
use serde::Deserialize;

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub central: CentralConfig,
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub access: Vec<AccessGrant>,
    #[serde(default)]
    pub projects: Vec<LocalProject>,
}

/// Central API connection, retry and token settings
#[derive(Debug, Deserialize)]
pub struct CentralConfig {
    pub base_url: String,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_attempt_timeout")]
    pub attempt_timeout_secs: u64,
    #[serde(default = "default_backoff_base")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_cap")]
    pub backoff_cap_secs: u64,
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_secs: u64,
    #[serde(default = "default_verify_tls")]
    pub verify_tls: bool,
    #[serde(default = "default_token_lifetime")]
    pub token_lifetime_secs: u64,
    #[serde(default = "default_token_safety_margin")]
    pub token_safety_margin_secs: u64,
    #[serde(default = "default_lease_warn")]
    pub lease_warn_secs: u64,
    #[serde(default)]
    pub credentials: Vec<CredentialConfig>,
}

/// One service account. The password is resolved at load time.
#[derive(Debug, Deserialize)]
pub struct CredentialConfig {
    pub id: u32,
    pub email: String,
    #[serde(default)]
    pub password_env: Option<String>,
    #[serde(default)]
    pub password_file: Option<PathBuf>,
    #[serde(skip)]
    pub password: Option<Secret<String>>,
}

/// HTTP listener settings
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

/// Local files. Both are optional.
#[derive(Debug, Default, Deserialize)]
pub struct StorageConfig {
    /// JSON-lines audit log. Audit records go to the log stream when unset.
    #[serde(default)]
    pub audit_log: Option<PathBuf>,
    /// Session tracking file, keyed by local user.
    #[serde(default)]
    pub session_file: Option<PathBuf>,
}

/// Role grant for one actor
#[derive(Debug, Clone, Deserialize)]
pub struct AccessGrant {
    pub actor: String,
    pub role: Role,
    #[serde(default)]
    pub projects: Vec<u64>,
}

fn default_max_attempts() -> u32 {
    5
}

fn default_attempt_timeout() -> u64 {
    120
}

fn default_backoff_base() -> u64 {
    1000
}

fn default_backoff_cap() -> u64 {
    30
}

fn default_acquire_timeout() -> u64 {
    30
}

fn default_verify_tls() -> bool {
    true
}

fn default_token_lifetime() -> u64 {
    24 * 60 * 60
}

fn default_token_safety_margin() -> u64 {
    60 * 60
}

fn default_lease_warn() -> u64 {
    60
}

fn default_max_connections() -> usize {
    1000
}

fn config_error(message: impl Into<String>) -> common::Error {
    common::Error::Config(message.into())
}

impl Config {
    /// Load configuration from a TOML file, validate it, then overlay
    /// environment variables and resolve credential passwords.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;
        config.validate()?;

        if let Ok(value) = std::env::var("CENTRAL_VERIFY_TLS") {
            config.central.verify_tls = parse_flag(&value);
        }

        for credential in &mut config.central.credentials {
            credential.password = Some(credential.resolve_password()?);
        }

        Ok(config)
    }

    fn validate(&self) -> common::Result<()> {
        let central = &self.central;
        if !central.base_url.starts_with("http://") && !central.base_url.starts_with("https://") {
            return Err(config_error(format!(
                "central.base_url must start with http:// or https://, got: {}",
                central.base_url
            )));
        }
        if central.max_attempts == 0 {
            return Err(config_error("central.max_attempts must be greater than 0"));
        }
        if central.attempt_timeout_secs == 0 {
            return Err(config_error(
                "central.attempt_timeout_secs must be greater than 0",
            ));
        }
        if central.token_safety_margin_secs >= central.token_lifetime_secs {
            return Err(config_error(
                "central.token_safety_margin_secs must be less than token_lifetime_secs",
            ));
        }
        if central.credentials.is_empty() {
            return Err(config_error(
                "at least one [[central.credentials]] entry is required",
            ));
        }
        let mut ids = HashSet::new();
        for credential in &central.credentials {
            if !ids.insert(credential.id) {
                return Err(config_error(format!(
                    "duplicate credential id {}",
                    credential.id
                )));
            }
        }

        if self.server.max_connections == 0 {
            return Err(config_error("server.max_connections must be greater than 0"));
        }

        let mut local_ids = HashSet::new();
        for project in &self.projects {
            if !local_ids.insert(project.id) {
                return Err(config_error(format!(
                    "duplicate local project id {}",
                    project.id
                )));
            }
        }
        Ok(())
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("central-gateway.toml")
    }

    /// Service accounts with their resolved passwords.
    pub fn credentials(&self) -> common::Result<Vec<Credential>> {
        self.central
            .credentials
            .iter()
            .map(|c| {
                let password = c.password.as_ref().ok_or_else(|| {
                    config_error(format!("password for credential {} not resolved", c.id))
                })?;
                Ok(Credential::new(
                    c.id,
                    c.email.as_str(),
                    password.expose().as_str(),
                ))
            })
            .collect()
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.central.max_attempts,
            attempt_timeout: Duration::from_secs(self.central.attempt_timeout_secs),
            backoff_base: Duration::from_millis(self.central.backoff_base_ms),
            backoff_cap: Duration::from_secs(self.central.backoff_cap_secs),
        }
    }

    pub fn token_policy(&self) -> TokenPolicy {
        TokenPolicy {
            lifetime: Duration::from_secs(self.central.token_lifetime_secs),
            safety_margin: Duration::from_secs(self.central.token_safety_margin_secs),
        }
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.central.acquire_timeout_secs)
    }

    pub fn lease_warn_after(&self) -> Duration {
        Duration::from_secs(self.central.lease_warn_secs)
    }

    pub fn access_policy(&self) -> RolePolicy {
        self.access.iter().fold(RolePolicy::new(), |policy, grant| {
            policy.grant(grant.actor.as_str(), grant.role, grant.projects.iter().copied())
        })
    }
}

impl CredentialConfig {
    /// Password from `password_env` if named, otherwise from `password_file`.
    fn resolve_password(&self) -> common::Result<Secret<String>> {
        if let Some(var) = &self.password_env {
            let value = std::env::var(var)
                .map_err(|_| common::Error::MissingEnv { var: var.clone() })?;
            return Ok(Secret::new(value));
        }
        if let Some(file) = &self.password_file {
            let contents = std::fs::read_to_string(file).map_err(|e| {
                config_error(format!(
                    "failed to read password_file {}: {e}",
                    file.display()
                ))
            })?;
            let password = contents.trim().to_owned();
            if password.is_empty() {
                return Err(config_error(format!(
                    "password_file {} is empty",
                    file.display()
                )));
            }
            return Ok(Secret::new(password));
        }
        Err(config_error(format!(
            "credential {} needs password_env or password_file",
            self.id
        )))
    }
}

/// `true`, `1` and `t` (any case) enable a flag; anything else disables it.
fn parse_flag(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "true" | "1" | "t")
}
