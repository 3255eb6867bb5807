//! Gateway configuration: environment-driven, with defaults matching the
//! operational envelope described for the worker pool.

use std::path::PathBuf;
use std::time::Duration;

use rand::RngCore;
use thiserror::Error;

pub const DEFAULT_MANAGEMENT_LABEL: &str = "managed-by=sandbox-gateway";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },
    #[error("proxy_timeout ({proxy_timeout:?}) must exceed execution_timeout + 20s ({execution_timeout:?})")]
    ProxyTimeoutTooLow {
        proxy_timeout: Duration,
        execution_timeout: Duration,
    },
    #[error("failed to resolve or persist auth token: {0}")]
    Token(String),
}

type Result<T> = std::result::Result<T, ConfigError>;

/// Pool sizing and recycling knobs.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub min_idle_workers: usize,
    pub max_total_workers: usize,
    pub worker_idle_timeout: Duration,
    pub recycling_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_idle_workers: 5,
            max_total_workers: 30,
            worker_idle_timeout: Duration::from_secs(3600),
            recycling_interval: Duration::from_secs(300),
        }
    }
}

/// Timeouts governing a single execution request.
#[derive(Debug, Clone)]
pub struct ExecutionConfig {
    pub execution_timeout: Duration,
    pub proxy_timeout: Duration,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        let execution_timeout = Duration::from_secs(10);
        Self {
            execution_timeout,
            proxy_timeout: execution_timeout + Duration::from_secs(20),
        }
    }
}

/// Health-probing cadence for newly created and in-service sandboxes.
#[derive(Debug, Clone)]
pub struct HealthConfig {
    pub health_timeout: Duration,
    pub probe_interval: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            health_timeout: Duration::from_secs(30),
            probe_interval: Duration::from_millis(500),
        }
    }
}

/// The container image used for every sandbox, plus resource caps applied
/// to each container and the internal network sandboxes attach to.
#[derive(Debug, Clone)]
pub struct WorkerImageConfig {
    pub image: String,
    pub internal_network_name: String,
    pub memory_limit_bytes: i64,
    pub cpu_quota: Option<i64>,
    /// Per-container writable-layer size cap in bytes, if the storage
    /// driver supports one (spec §4.1's "disk/size cap").
    pub disk_limit_bytes: Option<i64>,
    pub management_label: String,
}

impl Default for WorkerImageConfig {
    fn default() -> Self {
        Self {
            image: "sandbox-gateway/worker:latest".to_string(),
            internal_network_name: "sandbox-gateway-internal".to_string(),
            memory_limit_bytes: 512 * 1024 * 1024,
            cpu_quota: None,
            disk_limit_bytes: Some(1024 * 1024 * 1024),
            management_label: DEFAULT_MANAGEMENT_LABEL.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Top-level, fully-resolved configuration for one gateway process.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub pool: PoolConfig,
    pub execution: ExecutionConfig,
    pub health: HealthConfig,
    pub worker_image: WorkerImageConfig,
    pub bind_addr: String,
    pub auth_token: String,
    pub log_format: LogFormat,
}

impl GatewayConfig {
    /// Loads configuration from the environment (after an attempted, ignored
    /// `.env` load), applying the documented defaults and resolving the
    /// auth token from `GATEWAY_AUTH_TOKEN` or a persisted/generated file.
    pub fn from_env() -> Result<Self> {
        let pool = PoolConfig {
            min_idle_workers: env_parse("MIN_IDLE_WORKERS", 5)?,
            max_total_workers: env_parse("MAX_TOTAL_WORKERS", 30)?,
            worker_idle_timeout: Duration::from_secs(env_parse("WORKER_IDLE_TIMEOUT_SECS", 3600)?),
            recycling_interval: Duration::from_secs(env_parse("RECYCLING_INTERVAL_SECS", 300)?),
        };

        let execution_timeout = Duration::from_secs(env_parse("EXECUTION_TIMEOUT_SECS", 10)?);
        let proxy_timeout = Duration::from_secs(env_parse(
            "PROXY_TIMEOUT_SECS",
            execution_timeout.as_secs() + 20,
        )?);
        if proxy_timeout < execution_timeout + Duration::from_secs(20) {
            return Err(ConfigError::ProxyTimeoutTooLow {
                proxy_timeout,
                execution_timeout,
            });
        }
        let execution = ExecutionConfig {
            execution_timeout,
            proxy_timeout,
        };

        let health = HealthConfig {
            health_timeout: Duration::from_secs(env_parse("HEALTH_TIMEOUT_SECS", 30)?),
            probe_interval: Duration::from_millis(env_parse("PROBE_INTERVAL_MS", 500)?),
        };

        let worker_image = WorkerImageConfig {
            image: std::env::var("WORKER_IMAGE")
                .unwrap_or_else(|_| WorkerImageConfig::default().image),
            internal_network_name: std::env::var("INTERNAL_NETWORK_NAME")
                .unwrap_or_else(|_| WorkerImageConfig::default().internal_network_name),
            memory_limit_bytes: env_parse(
                "WORKER_MEMORY_LIMIT_BYTES",
                WorkerImageConfig::default().memory_limit_bytes,
            )?,
            cpu_quota: std::env::var("WORKER_CPU_QUOTA").ok().and_then(|v| v.parse().ok()),
            disk_limit_bytes: std::env::var("WORKER_DISK_LIMIT_BYTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .or(WorkerImageConfig::default().disk_limit_bytes),
            management_label: DEFAULT_MANAGEMENT_LABEL.to_string(),
        };

        let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
        let log_format = match std::env::var("LOG_FORMAT").as_deref() {
            Ok("json") => LogFormat::Json,
            _ => LogFormat::Pretty,
        };

        let auth_token = resolve_auth_token()?;

        Ok(Self {
            pool,
            execution,
            health,
            worker_image,
            bind_addr,
            auth_token,
            log_format,
        })
    }

    /// A config sufficient for tests: no env lookups, token fixed.
    pub fn for_tests() -> Self {
        Self {
            pool: PoolConfig {
                min_idle_workers: 1,
                max_total_workers: 4,
                worker_idle_timeout: Duration::from_secs(60),
                recycling_interval: Duration::from_secs(30),
            },
            execution: ExecutionConfig {
                execution_timeout: Duration::from_millis(500),
                proxy_timeout: Duration::from_millis(700),
            },
            health: HealthConfig {
                health_timeout: Duration::from_secs(5),
                probe_interval: Duration::from_millis(20),
            },
            worker_image: WorkerImageConfig::default(),
            bind_addr: "127.0.0.1:0".to_string(),
            auth_token: "test-token".to_string(),
            log_format: LogFormat::Pretty,
        }
    }

    /// Config with the auth token redacted, suitable for `gateway config show`.
    pub fn redacted(&self) -> Self {
        let mut c = self.clone();
        c.auth_token = "<redacted>".to_string();
        c
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(v) => v.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            reason: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}

/// Resolves the X-Auth-Token credential: explicit env var wins, otherwise a
/// token is generated once and persisted to the gateway's state directory
/// so it survives process restarts.
fn resolve_auth_token() -> Result<String> {
    if let Ok(token) = std::env::var("GATEWAY_AUTH_TOKEN") {
        return Ok(token);
    }

    let path = token_file_path()?;
    if let Ok(existing) = std::fs::read_to_string(&path) {
        let trimmed = existing.trim();
        if !trimmed.is_empty() {
            return Ok(trimmed.to_string());
        }
    }

    let token = generate_token();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ConfigError::Token(e.to_string()))?;
    }
    std::fs::write(&path, &token).map_err(|e| ConfigError::Token(e.to_string()))?;
    Ok(token)
}

fn token_file_path() -> Result<PathBuf> {
    // GATEWAY_STATE_DIR lets tests (and operators with an unusual layout)
    // override where the generated token is persisted.
    if let Ok(dir) = std::env::var("GATEWAY_STATE_DIR") {
        return Ok(PathBuf::from(dir).join("auth_token"));
    }
    let base = dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .ok_or_else(|| ConfigError::Token("could not locate a state directory".to_string()))?;
    Ok(base.join("sandbox-gateway").join("auth_token"))
}

fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().fold(String::with_capacity(64), |mut s, b| {
        use std::fmt::Write;
        let _ = write!(s, "{b:02x}");
        s
    })
}
