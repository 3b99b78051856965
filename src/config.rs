use crate::collectors::Inputs;
use anyhow::Context;
use clap::Parser;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Parser, Debug, Clone)]
#[command(name = "apistats-agent", version, about)]
pub struct Config {
    /// Plugin configuration file (TOML).
    #[arg(long, env = "APISTATS_CONFIG", default_value = "apistats.toml")]
    pub config: PathBuf,

    /// Unique identifier for this agent instance, reported as the `host` tag.
    /// if none provided, default to hostname.
    #[arg(long, env = "APISTATS_AGENT_ID")]
    pub agent_id: Option<String>,

    /// Collection interval in milliseconds.
    #[arg(long, env = "APISTATS_COLLECT_INTERVAL_MS", default_value_t = 60_000)]
    pub collect_interval_ms: u64,

    /// Result channel buffer size (bounded to enforce backpressure).
    #[arg(long, env = "APISTATS_CHANNEL_BUFFER", default_value_t = 256)]
    pub channel_buffer_size: usize,

    /// Enable JSON structured logging.
    #[arg(long, env = "APISTATS_JSON_LOGS", default_value_t = false)]
    pub json_logs: bool,

    /// Run a single collection round and exit.
    #[arg(long, default_value_t = false)]
    pub once: bool,

    /// Do not add the `host` tag to emitted metrics.
    #[arg(long, env = "APISTATS_OMIT_HOSTNAME", default_value_t = false)]
    pub omit_hostname: bool,
}

impl Config {
    /// get agent ID, upon failure fallback to hostname.
    pub fn resolved_agent_id(&self) -> String {
        self.agent_id.clone().unwrap_or_else(|| {
            hostname::get()
                .map(|h| h.to_string_lossy().into_owned())
                .unwrap_or_else(|_| "unknown-agent".to_string())
        })
    }

    pub fn collect_interval(&self) -> Duration {
        Duration::from_millis(self.collect_interval_ms.max(1))
    }
}

/// Contents of the plugin file.
#[derive(Debug, Default, Deserialize)]
pub struct PluginFile {
    /// Added to every metric unless the plugin already set the tag.
    #[serde(default)]
    pub global_tags: BTreeMap<String, String>,
    #[serde(default)]
    pub inputs: Inputs,
}

impl PluginFile {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Global tags plus `host`, unless omitted or already set globally.
    pub fn effective_tags(&self, config: &Config) -> BTreeMap<String, String> {
        let mut tags = self.global_tags.clone();
        if !config.omit_hostname {
            tags.entry("host".to_string())
                .or_insert_with(|| config.resolved_agent_id());
        }
        tags
    }
}
