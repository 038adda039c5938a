use livebridge_core::retry::RetryPolicy;
use regex::Regex;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
    #[error("Could not read deployment metadata from {0}: {1}")]
    MetadataFile(PathBuf, String),
}

/// How sessions reach the agent.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AgentMode {
    /// The agent lives in this process.
    Local,
    /// The agent is reached through a managed streaming session.
    Remote,
}

/// A fully resolved remote agent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteTarget {
    /// `projects/{project}/locations/{location}/reasoningEngines/{id}`.
    pub resource: String,
    pub project: String,
    pub location: String,
    /// `wss://` URL of the streaming service.
    pub endpoint: String,
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub log_level: Level,
    pub mode: AgentMode,
    pub local_warmup: Duration,
    pub remote: Option<RemoteTarget>,
    pub remote_access_token: Option<String>,
    pub retry: RetryPolicy,
}

const DEFAULT_LOCATION: &str = "us-central1";

static RESOURCE_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^projects/(?P<project>[^/]+)/locations/(?P<location>[^/]+)/reasoningEngines/(?P<engine>[^/]+)$",
    )
    .expect("resource path pattern is valid")
});

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let bind_address_str =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8000".to_string());
        let bind_address = bind_address_str
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string()))?;

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let mode_str = std::env::var("AGENT_MODE").unwrap_or_else(|_| "local".to_string());
        let mode = match mode_str.to_lowercase().as_str() {
            "local" => AgentMode::Local,
            "remote" => AgentMode::Remote,
            other => {
                return Err(ConfigError::InvalidValue(
                    "AGENT_MODE".to_string(),
                    format!("'{}' is neither 'local' nor 'remote'", other),
                ));
            }
        };

        let local_warmup = Duration::from_millis(env_millis("LOCAL_WARMUP_MS", 2000)?);

        let retry = RetryPolicy {
            max_retries: env_parse("RECONNECT_MAX_RETRIES", 10)?,
            base_delay: Duration::from_millis(env_millis("RECONNECT_BASE_DELAY_MS", 1000)?),
            max_delay: Duration::from_millis(env_millis("RECONNECT_MAX_DELAY_MS", 60_000)?),
            ..RetryPolicy::default()
        };

        let remote = match mode {
            AgentMode::Local => None,
            AgentMode::Remote => {
                let metadata_path = std::env::var("DEPLOYMENT_METADATA_PATH")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| PathBuf::from("deployment_metadata.json"));
                Some(resolve_remote_target(
                    std::env::var("REMOTE_AGENT_ENGINE_ID").ok(),
                    &metadata_path,
                    std::env::var("GOOGLE_CLOUD_PROJECT").ok(),
                    std::env::var("GOOGLE_CLOUD_LOCATION").ok(),
                    std::env::var("REMOTE_ENDPOINT").ok(),
                )?)
            }
        };

        Ok(Self {
            bind_address,
            log_level,
            mode,
            local_warmup,
            remote,
            remote_access_token: std::env::var("REMOTE_ACCESS_TOKEN").ok(),
            retry,
        })
    }
}

fn env_millis(name: &str, default: u64) -> Result<u64, ConfigError> {
    env_parse(name, default)
}

fn env_parse<T>(name: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string())),
        Err(_) => Ok(default),
    }
}

/// Reads `remote_agent_engine_id` from a deployment metadata side-file.
///
/// A missing file is not an error; an unreadable or malformed one is.
pub fn read_engine_id_from_metadata(path: &Path) -> Result<Option<String>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::MetadataFile(path.to_path_buf(), e.to_string()))?;
    let metadata: serde_json::Value = serde_json::from_str(&raw)
        .map_err(|e| ConfigError::MetadataFile(path.to_path_buf(), e.to_string()))?;
    Ok(metadata
        .get("remote_agent_engine_id")
        .and_then(|v| v.as_str())
        .map(str::to_string))
}

/// Resolves which remote agent to talk to.
///
/// The identifier is taken from `explicit` or, failing that, from the
/// metadata side-file. A full resource path supplies its own project and
/// location; a bare id falls back to the ambient project and location.
pub fn resolve_remote_target(
    explicit: Option<String>,
    metadata_path: &Path,
    ambient_project: Option<String>,
    ambient_location: Option<String>,
    endpoint_override: Option<String>,
) -> Result<RemoteTarget, ConfigError> {
    let engine_id = match explicit.filter(|id| !id.trim().is_empty()) {
        Some(id) => id,
        None => read_engine_id_from_metadata(metadata_path)?.ok_or_else(|| {
            ConfigError::MissingVar(format!(
                "REMOTE_AGENT_ENGINE_ID must be set (or remote_agent_engine_id present in {}) for 'remote' mode",
                metadata_path.display()
            ))
        })?,
    };

    let (resource, project, location) = match RESOURCE_PATH.captures(engine_id.trim()) {
        Some(caps) => (
            engine_id.trim().to_string(),
            caps["project"].to_string(),
            caps["location"].to_string(),
        ),
        None => {
            let project = ambient_project.ok_or_else(|| {
                ConfigError::MissingVar(
                    "GOOGLE_CLOUD_PROJECT must be set when the engine id is not a resource path"
                        .to_string(),
                )
            })?;
            let location = ambient_location.unwrap_or_else(|| DEFAULT_LOCATION.to_string());
            let resource = format!(
                "projects/{}/locations/{}/reasoningEngines/{}",
                project,
                location,
                engine_id.trim()
            );
            (resource, project, location)
        }
    };

    let endpoint = endpoint_override.unwrap_or_else(|| {
        format!(
            "wss://{}-aiplatform.googleapis.com/ws/google.cloud.aiplatform.v1beta1.ReasoningEngineExecutionService/BidiStreamQuery",
            location
        )
    });

    Ok(RemoteTarget {
        resource,
        project,
        location,
        endpoint,
    })
}
