use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;

use crate::generation::AcceptancePolicy;
use crate::orchestrator::OrchestratorConfig;

/// Root configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub generation: GenerationConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}

fn default_port() -> u16 {
    8080
}

/// Database configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("nexus.db")
}

/// External generation service configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GenerationConfig {
    /// Webhook URL receiving generation requests
    pub endpoint: String,
    /// Request timeout in seconds (default: 120)
    #[serde(default = "default_timeout")]
    pub timeout_secs: u32,
    /// How a response is judged successful
    #[serde(default)]
    pub acceptance: AcceptancePolicy,
    /// Optional bearer token sent with each request
    #[serde(default)]
    pub auth_token: Option<String>,
}

fn default_timeout() -> u32 {
    120
}

/// Sanitized config for API responses (secrets redacted)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub generation: SanitizedGenerationConfig,
    pub orchestrator: OrchestratorConfig,
}

/// Sanitized generation config (token hidden)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedGenerationConfig {
    pub endpoint: String,
    pub timeout_secs: u32,
    pub acceptance: AcceptancePolicy,
    pub auth_token_configured: bool,
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        Self {
            server: config.server.clone(),
            database: config.database.clone(),
            generation: SanitizedGenerationConfig {
                endpoint: config.generation.endpoint.clone(),
                timeout_secs: config.generation.timeout_secs,
                acceptance: config.generation.acceptance,
                auth_token_configured: config
                    .generation
                    .auth_token
                    .as_deref()
                    .is_some_and(|t| !t.is_empty()),
            },
            orchestrator: config.orchestrator.clone(),
        }
    }
}
