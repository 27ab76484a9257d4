use figment::{
    providers::{Env, Format, Json, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use crate::controller::{PoolTarget, Strategy};

pub const DEFAULT_API_BASE_URL: &str = "https://api.cloudflare.com/client/v4";

/// Which remote resources the controller manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Keep a load balancer pool in sync with the cluster nodes.
    Pool,
    /// Manage one DNS record per node.
    Dns,
}

/// A value that must not end up in logs.
#[derive(Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<String> for Secret {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[redacted]")
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub mode: Mode,
    pub api_key: Secret,
    pub api_email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,
    pub api_base_url: String,
    pub lb_name: String,
    pub pool_name: String,
    pub zone: String,
    pub monitor_path: String,
    pub interval_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_selector: Option<String>,
    pub watch_nodes: bool,
    pub debounce_secs: u64,
    pub metrics_bind: SocketAddr,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: Mode::Pool,
            api_key: Secret::default(),
            api_email: String::new(),
            organization_id: None,
            api_base_url: DEFAULT_API_BASE_URL.into(),
            lb_name: String::new(),
            pool_name: String::new(),
            zone: String::new(),
            monitor_path: String::new(),
            interval_secs: 900,
            node_selector: None,
            watch_nodes: false,
            debounce_secs: 30,
            metrics_bind: SocketAddr::from(([0, 0, 0, 0], 9101)),
        }
    }
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let mut config: Config = Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file("lbsync.toml"))
            .merge(Json::file("lbsync.json"))
            .merge(Env::prefixed("LBSYNC_").ignore(&["api_key_file"]))
            .extract()
            .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;

        // Support Docker-style secrets
        if let Ok(secret_file) = std::env::var("LBSYNC_API_KEY_FILE") {
            config.api_key = std::fs::read_to_string(secret_file)?.trim().to_string().into();
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let required = [
            ("api_key", self.api_key.is_empty()),
            ("api_email", self.api_email.is_empty()),
            ("lb_name", self.lb_name.is_empty()),
            ("pool_name", self.pool_name.is_empty()),
            ("zone", self.zone.is_empty()),
            ("monitor_path", self.monitor_path.is_empty()),
        ];
        let missing: Vec<&str> = required
            .iter()
            .filter(|(_, empty)| *empty)
            .map(|(key, _)| *key)
            .collect();
        if !missing.is_empty() {
            anyhow::bail!("Missing required configuration: {}", missing.join(", "));
        }
        if !self.monitor_path.starts_with('/') {
            anyhow::bail!("monitor_path must start with '/': {}", self.monitor_path);
        }
        if self.interval_secs == 0 {
            anyhow::bail!("interval_secs must be greater than zero");
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_secs(self.debounce_secs)
    }

    pub fn strategy(&self) -> Strategy {
        match self.mode {
            Mode::Pool => Strategy::Pool(PoolTarget {
                pool_name: self.pool_name.clone(),
                lb_name: self.lb_name.clone(),
                zone: self.zone.clone(),
                monitor_path: self.monitor_path.clone(),
            }),
            Mode::Dns => Strategy::Dns {
                zone: self.zone.clone(),
            },
        }
    }
}
