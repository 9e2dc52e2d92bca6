use anyhow::{Context, Result};
use directories::UserDirs;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;

/// Environment variable that overrides the config directory.
pub const CONFIG_DIR_ENV: &str = "ALICE_RELAY_CONFIG_DIR";

// ── Top-level config ──────────────────────────────────────────────

/// Top-level relay configuration, loaded from `config.toml`.
///
/// Resolution order: `--config-dir` → `ALICE_RELAY_CONFIG_DIR` → `~/.alice-relay/config.toml`.
/// A missing file is not an error; defaults apply and env overrides still work.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct Config {
    /// Path to config.toml - computed, not serialized
    #[serde(skip)]
    pub config_path: PathBuf,

    /// Webhook + agent listener settings (`[gateway]`).
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Agent client settings (`[agent]`), used by `alice-relay agent`.
    #[serde(default)]
    pub agent: AgentClientConfig,
}

// ── Gateway ───────────────────────────────────────────────────────

/// Relay server configuration (`[gateway]` section).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct GatewayConfig {
    /// Gateway host (default: 0.0.0.0; the Alice webhook must be reachable)
    #[serde(default = "default_gateway_host")]
    pub host: String,
    /// Gateway port (default: 8443)
    #[serde(default = "default_gateway_port")]
    pub port: u16,
    /// PEM certificate chain. TLS is enabled only when both cert and key are set.
    #[serde(default)]
    pub tls_cert: Option<PathBuf>,
    /// PEM private key.
    #[serde(default)]
    pub tls_key: Option<PathBuf>,
    /// Shared secret the agent must present as `?key=` on `/ws`.
    /// Unset means any agent may connect.
    #[serde(default)]
    pub api_key: Option<String>,
    /// How long a webhook request waits for the agent's reply.
    #[serde(default = "default_reply_timeout_secs")]
    pub reply_timeout_secs: u64,
}

fn default_gateway_host() -> String {
    "0.0.0.0".into()
}

fn default_gateway_port() -> u16 {
    8443
}

fn default_reply_timeout_secs() -> u64 {
    4
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_gateway_host(),
            port: default_gateway_port(),
            tls_cert: None,
            tls_key: None,
            api_key: None,
            reply_timeout_secs: default_reply_timeout_secs(),
        }
    }
}

impl GatewayConfig {
    /// Certificate and key paths, when TLS is fully configured.
    pub fn tls_paths(&self) -> Option<(&Path, &Path)> {
        match (&self.tls_cert, &self.tls_key) {
            (Some(cert), Some(key)) => Some((cert.as_path(), key.as_path())),
            _ => None,
        }
    }

    /// Configured shared secret, ignoring blank values.
    pub fn shared_secret(&self) -> Option<&str> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
    }
}

// ── Agent client ──────────────────────────────────────────────────

/// Agent-side connection settings (`[agent]` section).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AgentClientConfig {
    /// Relay WebSocket endpoint, e.g. `wss://relay.example.com:8443/ws`.
    #[serde(default = "default_agent_server_url")]
    pub server_url: String,
    /// Shared secret sent as `?key=`.
    #[serde(default)]
    pub api_key: String,
    /// Delay before reconnecting after the relay connection drops.
    #[serde(default = "default_reconnect_delay_secs")]
    pub reconnect_delay_secs: u64,
}

fn default_agent_server_url() -> String {
    "ws://127.0.0.1:8443/ws".into()
}

fn default_reconnect_delay_secs() -> u64 {
    5
}

impl Default for AgentClientConfig {
    fn default() -> Self {
        Self {
            server_url: default_agent_server_url(),
            api_key: String::new(),
            reconnect_delay_secs: default_reconnect_delay_secs(),
        }
    }
}

// ── Loading ───────────────────────────────────────────────────────

fn default_config_dir() -> Result<PathBuf> {
    let home = UserDirs::new()
        .map(|u| u.home_dir().to_path_buf())
        .context("Could not find home directory")?;
    Ok(home.join(".alice-relay"))
}

/// Config directory: explicit env override first, then `~/.alice-relay`.
pub fn resolve_config_dir() -> Result<PathBuf> {
    match std::env::var(CONFIG_DIR_ENV) {
        Ok(dir) if !dir.trim().is_empty() => Ok(PathBuf::from(dir)),
        _ => default_config_dir(),
    }
}

/// Parse `host:port` or Go-style `:port` into its parts.
fn parse_listen_addr(value: &str) -> Option<(Option<String>, u16)> {
    let (host, port) = value.trim().rsplit_once(':')?;
    let port = port.parse::<u16>().ok()?;
    let host = host.trim_matches(['[', ']']);
    let host = (!host.is_empty()).then(|| host.to_string());
    Some((host, port))
}

fn env_non_empty(primary: &str, legacy: &str) -> Option<String> {
    std::env::var(primary)
        .or_else(|_| std::env::var(legacy))
        .ok()
        .filter(|value| !value.trim().is_empty())
}

impl Config {
    /// Load `config.toml` from the resolved config directory, apply env
    /// overrides, and validate.
    pub async fn load() -> Result<Self> {
        let config_dir = resolve_config_dir()?;
        Self::load_from_dir(&config_dir).await
    }

    pub async fn load_from_dir(config_dir: &Path) -> Result<Self> {
        let config_path = config_dir.join("config.toml");

        let (mut config, from_file) = if config_path.exists() {
            let contents = fs::read_to_string(&config_path)
                .await
                .with_context(|| format!("Failed to read config file {}", config_path.display()))?;
            let config: Config =
                toml::from_str(&contents).context("Failed to parse config file")?;
            (config, true)
        } else {
            (Config::default(), false)
        };
        config.config_path = config_path;

        config.apply_env_overrides();
        config.validate()?;
        tracing::info!(
            path = %config.config_path.display(),
            from_file,
            "Config loaded"
        );
        Ok(config)
    }

    /// Apply environment overrides. Prefixed names win over the bare legacy
    /// names used by container deployments (`LISTEN_ADDR`, `API_KEY`, ...).
    pub fn apply_env_overrides(&mut self) {
        if let Some(addr) = env_non_empty("ALICE_RELAY_LISTEN_ADDR", "LISTEN_ADDR") {
            match parse_listen_addr(&addr) {
                Some((host, port)) => {
                    if let Some(host) = host {
                        self.gateway.host = host;
                    }
                    self.gateway.port = port;
                }
                None => tracing::warn!("Ignoring invalid LISTEN_ADDR value: {addr}"),
            }
        }

        if let Some(cert) = env_non_empty("ALICE_RELAY_TLS_CERT", "TLS_CERT") {
            self.gateway.tls_cert = Some(PathBuf::from(cert));
        }
        if let Some(key) = env_non_empty("ALICE_RELAY_TLS_KEY", "TLS_KEY") {
            self.gateway.tls_key = Some(PathBuf::from(key));
        }

        // One secret shared by both ends of the agent channel.
        if let Some(key) = env_non_empty("ALICE_RELAY_API_KEY", "API_KEY") {
            self.gateway.api_key = Some(key.clone());
            self.agent.api_key = key;
        }

        if let Ok(url) = std::env::var("ALICE_RELAY_SERVER_URL") {
            if !url.trim().is_empty() {
                self.agent.server_url = url;
            }
        }
    }

    /// Reject values that would only fail later at runtime.
    pub fn validate(&self) -> Result<()> {
        if self.gateway.host.trim().is_empty() {
            anyhow::bail!("gateway.host must not be empty");
        }
        if self.gateway.reply_timeout_secs == 0 {
            anyhow::bail!("gateway.reply_timeout_secs must be greater than 0");
        }
        if self.gateway.tls_cert.is_some() != self.gateway.tls_key.is_some() {
            anyhow::bail!("gateway.tls_cert and gateway.tls_key must be set together");
        }
        if self.agent.server_url.trim().is_empty() {
            anyhow::bail!("agent.server_url must not be empty");
        }
        Ok(())
    }
}
