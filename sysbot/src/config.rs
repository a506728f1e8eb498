#[cfg(feature = "ssh")]
use crate::TryIntoTarget;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_BASE_PATH: &str = ".sysbot";
pub const DEFAULT_COLLECT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);
pub const DEFAULT_CHUNK_SIZE: usize = 4096;
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);
pub const SCRIPT_PERMISSIONS: u32 = 0o755;

/// Well-known port for a protocol family, `None` when the protocol needs an explicit one.
pub fn default_port(protocol: &str) -> Option<u16> {
    match protocol.to_ascii_lowercase().as_str() {
        "ssh" => Some(22),
        "winrm" => Some(5986),
        "http" => Some(80),
        "https" => Some(443),
        _ => None,
    }
}

/// How the output collector's deadline behaves while data keeps arriving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "mode")]
pub enum DeadlineMode {
    /// One budget measured from the start of collection.
    Fixed,
    /// The budget restarts after every successful read, never past `ceiling` in total.
    ResetOnRead {
        #[serde(with = "millis", rename = "ceiling_ms")]
        ceiling: Duration,
    },
}

impl Default for DeadlineMode {
    fn default() -> Self {
        DeadlineMode::Fixed
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectorConfig {
    pub timeout: Duration,
    pub poll_interval: Duration,
    pub chunk_size: usize,
    pub deadline: DeadlineMode,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_COLLECT_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            chunk_size: DEFAULT_CHUNK_SIZE,
            deadline: DeadlineMode::Fixed,
        }
    }
}

/// Remote paths used by the file transport. Script and result paths are
/// optional: unset means "generate one per run" for the executor and
/// "no default" for direct `read_file` calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    pub base_path: String,
    pub script_path: Option<String>,
    pub result_path: Option<String>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            base_path: DEFAULT_BASE_PATH.to_string(),
            script_path: None,
            result_path: None,
        }
    }
}

/// An SSH host to tunnel through on the way to the target, as written on disk.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JumpHostConfig {
    /// `host` or `host:port`.
    pub host: String,
    pub port: Option<u16>,
    pub login: Option<String>,
    pub password: Option<String>,
}

impl std::fmt::Debug for JumpHostConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JumpHostConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("login", &self.login)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

/// On-disk configuration, every field optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SysbotConfig {
    pub collect_timeout_ms: Option<u64>,
    pub poll_interval_ms: Option<u64>,
    pub chunk_size: Option<usize>,
    pub deadline: Option<DeadlineMode>,
    pub base_path: Option<String>,
    pub script_path: Option<String>,
    pub result_path: Option<String>,
    pub handshake_timeout_ms: Option<u64>,
    pub inactivity_timeout_ms: Option<u64>,
    pub key_paths: Option<Vec<PathBuf>>,
    /// Hops in order, the first one dialled directly.
    pub jump_hosts: Option<Vec<JumpHostConfig>>,
}

impl SysbotConfig {
    pub fn from_json(raw: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    pub async fn load<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
            crate::Error::ConfigError(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json(&raw)
    }

    pub fn collector(&self) -> crate::Result<CollectorConfig> {
        let defaults = CollectorConfig::default();
        let config = CollectorConfig {
            timeout: self
                .collect_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.timeout),
            poll_interval: self
                .poll_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_interval),
            chunk_size: self.chunk_size.unwrap_or(defaults.chunk_size),
            deadline: self.deadline.unwrap_or(defaults.deadline),
        };
        if config.chunk_size == 0 {
            return Err(crate::Error::ConfigError("chunk_size must be positive".to_string()));
        }
        if config.poll_interval.is_zero() {
            return Err(crate::Error::ConfigError(
                "poll_interval_ms must be positive".to_string(),
            ));
        }
        Ok(config)
    }

    pub fn transport(&self) -> TransportConfig {
        TransportConfig {
            base_path: self
                .base_path
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_PATH.to_string()),
            script_path: self.script_path.clone(),
            result_path: self.result_path.clone(),
        }
    }

    #[cfg(feature = "ssh")]
    pub fn ssh(&self) -> crate::Result<crate::ssh::SshConfig> {
        let mut config = crate::ssh::SshConfig::default();
        if let Some(ms) = self.handshake_timeout_ms {
            config.handshake_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = self.inactivity_timeout_ms {
            config.inactivity_timeout = Some(Duration::from_millis(ms));
        }
        if let Some(paths) = &self.key_paths {
            config.key_paths = paths.clone();
        }
        for hop in self.jump_hosts.iter().flatten() {
            let port = hop.port.or_else(|| default_port("ssh")).unwrap_or(22);
            config.jump_hosts.push(crate::ssh::JumpHost {
                target: hop.host.as_str().try_into_target(port)?,
                credentials: crate::Credentials::from_parts(hop.login.clone(), hop.password.clone()),
            });
        }
        Ok(config)
    }
}

mod millis {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
