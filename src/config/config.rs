//! Configuration structures and loading.
//!
//! Shape and path-resolution behavior follow the teacher's
//! `Configuration::load`: relative paths resolve against the config file's
//! own directory, runtime directories are created eagerly, and defaults are
//! scattered across `#[serde(default = "fn")]` per field.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Configuration {
    #[serde(default)]
    pub debug: bool,

    pub agent: AgentConfiguration,
    pub api: ApiConfiguration,
    pub docker: DockerConfiguration,

    #[serde(default)]
    pub system: SystemConfiguration,
}

impl Configuration {
    pub fn load(path: &str) -> Result<Self> {
        let config_path = std::path::Path::new(path);
        let content = std::fs::read_to_string(config_path)
            .with_context(|| format!("failed to read config file: {path}"))?;

        let mut config: Configuration =
            toml::from_str(&content).with_context(|| "failed to parse configuration")?;

        let base_dir = config_path
            .parent()
            .and_then(|p| if p.as_os_str().is_empty() { None } else { Some(p) })
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

        config.system.resolve_paths(&base_dir);

        std::fs::create_dir_all(&config.system.data_directory)?;
        std::fs::create_dir_all(&config.system.tmp_directory)?;
        std::fs::create_dir_all(&config.system.log_directory)?;

        if config.agent.register_token.is_empty() {
            anyhow::bail!("agent.register_token must not be empty");
        }
        if config.agent.server.is_empty() {
            anyhow::bail!("agent.server must not be empty");
        }

        Ok(config)
    }
}

/// Agent identity and behavior tuning — spec.md's Open Questions around the
/// log-line cap and kill grace are resolved here as configurable fields with
/// the original hardcoded values as defaults (SPEC_FULL.md §9).
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfiguration {
    /// Bootstrap token presented to `POST /api/register`.
    pub register_token: String,

    /// Control-plane base URL (e.g. `https://cp.example.com`).
    pub server: String,

    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_log_line_cap")]
    pub log_line_cap: u32,

    #[serde(default = "default_kill_grace_secs")]
    pub kill_grace_secs: u64,
}

fn default_heartbeat_interval_secs() -> u64 {
    30
}

fn default_request_timeout_secs() -> u64 {
    20
}

fn default_log_line_cap() -> u32 {
    10_000
}

fn default_kill_grace_secs() -> u64 {
    5
}

/// mTLS listener configuration. Unlike the teacher's `ApiConfiguration`, SSL
/// is mandatory (spec.md §6), so there is no `enabled` toggle.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfiguration {
    #[serde(default = "default_api_host")]
    pub host: String,

    #[serde(default = "default_api_port")]
    pub port: u16,
}

fn default_api_host() -> String {
    "0.0.0.0".into()
}

fn default_api_port() -> u16 {
    9443
}

/// Docker engine connection and port-allocation configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DockerConfiguration {
    #[serde(default = "default_docker_socket")]
    pub socket: String,

    #[serde(default = "default_network_name")]
    pub network: String,

    #[serde(default = "default_ephemeral_port_start")]
    pub ephemeral_port_start: u16,

    #[serde(default = "default_ephemeral_port_end")]
    pub ephemeral_port_end: u16,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_docker_socket() -> String {
    #[cfg(target_os = "windows")]
    {
        "npipe:////./pipe/docker_engine".into()
    }
    #[cfg(not(target_os = "windows"))]
    {
        if let Some(home) = std::env::var_os("HOME") {
            let colima_socket = std::path::Path::new(&home).join(".colima/default/docker.sock");
            if colima_socket.exists() {
                return format!("unix://{}", colima_socket.display());
            }
            let desktop_socket = std::path::Path::new(&home).join(".docker/run/docker.sock");
            if desktop_socket.exists() {
                return format!("unix://{}", desktop_socket.display());
            }
        }
        "/var/run/docker.sock".into()
    }
}

fn default_network_name() -> String {
    "bridge".into()
}

fn default_ephemeral_port_start() -> u16 {
    32768
}

fn default_ephemeral_port_end() -> u16 {
    60999
}

/// Data/tmp/log directories, resolved relative to the config file's location.
#[derive(Debug, Clone, Deserialize)]
pub struct SystemConfiguration {
    #[serde(default = "default_data_directory")]
    pub data_directory: PathBuf,

    #[serde(default = "default_tmp_directory")]
    pub tmp_directory: PathBuf,

    #[serde(default = "default_log_directory")]
    pub log_directory: PathBuf,
}

impl Default for SystemConfiguration {
    fn default() -> Self {
        Self {
            data_directory: default_data_directory(),
            tmp_directory: default_tmp_directory(),
            log_directory: default_log_directory(),
        }
    }
}

impl SystemConfiguration {
    pub fn resolve_paths(&mut self, base_dir: &std::path::Path) {
        self.data_directory = Self::resolve_path(&self.data_directory, base_dir);
        self.tmp_directory = Self::resolve_path(&self.tmp_directory, base_dir);
        self.log_directory = Self::resolve_path(&self.log_directory, base_dir);
    }

    fn resolve_path(path: &std::path::Path, base_dir: &std::path::Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            let resolved = base_dir.join(path);
            resolved
                .canonicalize()
                .unwrap_or_else(|_| Self::normalize_path(&resolved))
        }
    }

    fn normalize_path(path: &std::path::Path) -> PathBuf {
        let mut components = Vec::new();
        for component in path.components() {
            match component {
                std::path::Component::ParentDir => {
                    components.pop();
                }
                std::path::Component::CurDir => {}
                c => components.push(c),
            }
        }
        components.iter().collect()
    }
}

fn default_data_directory() -> PathBuf {
    PathBuf::from(".stellar-agent/volumes")
}

fn default_tmp_directory() -> PathBuf {
    PathBuf::from(".stellar-agent/tmp")
}

fn default_log_directory() -> PathBuf {
    PathBuf::from(".stellar-agent/logs")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_minimal_config_with_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            [agent]
            register_token = "boot-xyz"
            server = "https://cp.example.com"

            [api]

            [docker]
            "#
        )
        .unwrap();

        let config = Configuration::load(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.agent.heartbeat_interval_secs, 30);
        assert_eq!(config.agent.log_line_cap, 10_000);
        assert_eq!(config.api.port, 9443);
        assert_eq!(config.docker.network, "bridge");
    }

    #[test]
    fn rejects_empty_register_token() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            [agent]
            register_token = ""
            server = "https://cp.example.com"

            [api]
            [docker]
            "#
        )
        .unwrap();

        assert!(Configuration::load(file.path().to_str().unwrap()).is_err());
    }
}
