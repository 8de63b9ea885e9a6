use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

use crate::models::errors::ConfigError;
use crate::utils::retry::RetryConfig;

pub const DEFAULT_RPC_URL: &str = "http://localhost:8545";

/// Named set of overrides, selected with `profile` or `--profile`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Profile {
    pub rpc_url: Option<String>,
    pub network_id: Option<u64>,
    pub abi_dir: Option<PathBuf>,
    pub tokenlist_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub rpc_url: String,
    pub network_id: u64,
    pub abi_dir: Option<PathBuf>,
    pub tokenlist_dir: Option<PathBuf>,
    pub tracer: TracerKind,
    pub compact: bool,
    pub json: bool,
    pub strict: bool,
    pub timeout: String,
    pub retry: RetryConfig,
    pub profile: Option<String>,
    pub profiles: HashMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rpc_url: DEFAULT_RPC_URL.to_string(),
            network_id: 1,
            abi_dir: None,
            tokenlist_dir: None,
            tracer: TracerKind::Custom,
            compact: true,
            json: false,
            strict: false,
            timeout: "30s".to_string(),
            retry: RetryConfig::default(),
            profile: None,
            profiles: HashMap::new(),
        }
    }
}

impl Config {
    /// Applies the named profile (or the one selected in the file) on top of the
    /// top-level values.
    pub fn with_profile(mut self, name: Option<&str>) -> Result<Self> {
        let Some(name) = name.map(str::to_owned).or_else(|| self.profile.clone()) else {
            return Ok(self);
        };
        let profile = self
            .profiles
            .get(&name)
            .cloned()
            .ok_or(ConfigError::UnknownProfile { name })?;

        if let Some(rpc_url) = profile.rpc_url {
            self.rpc_url = rpc_url;
        }
        if let Some(network_id) = profile.network_id {
            self.network_id = network_id;
        }
        if profile.abi_dir.is_some() {
            self.abi_dir = profile.abi_dir;
        }
        if profile.tokenlist_dir.is_some() {
            self.tokenlist_dir = profile.tokenlist_dir;
        }
        Ok(self)
    }
}

/// Which node tracer produces the raw trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TracerKind {
    /// Default struct logger: one entry per executed opcode.
    #[serde(alias = "structlog")]
    Opcode,
    /// Bundled JS tracer: pre-aggregated call frames with events.
    #[serde(alias = "call")]
    Custom,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BuildOptions {
    /// Treat a missing parent frame or short stack as fatal instead of recording an anomaly.
    pub strict: bool,
}
