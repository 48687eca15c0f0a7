//! Console configuration

use anyhow::{ensure, Context, Result};
use flowmeter_lib::classifier::ManagerConfig;
use flowmeter_lib::controller::{ControllerSettings, DEFAULT_FLOW_PRIORITY, DEFAULT_TABLE_ID};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable naming an optional TOML config file
pub const CONFIG_PATH_ENV: &str = "FLOWMETER_CONFIG";

/// Console configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ConsoleConfig {
    /// Instance name used in logs and stats lease owners
    #[serde(default = "default_instance_name")]
    pub instance_name: String,

    /// API server port
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// JSON array of model configurations imported at startup
    #[serde(default)]
    pub models_file: Option<PathBuf>,

    /// Model activated after import
    #[serde(default)]
    pub active_model: Option<String>,

    /// Seed files for the lookup sets
    #[serde(default)]
    pub dns_seed_file: Option<PathBuf>,
    #[serde(default)]
    pub vpn_seed_file: Option<PathBuf>,
    #[serde(default)]
    pub asn_seed_file: Option<PathBuf>,

    #[serde(default = "default_batch_size")]
    pub lookup_batch_size: usize,

    #[serde(default)]
    pub controller: ControllerSettings,

    /// OpenFlow table and priority for installed flow rules
    #[serde(default = "default_flow_table")]
    pub flow_table_id: u8,
    #[serde(default = "default_flow_priority")]
    pub flow_priority: u16,

    /// Stats drain interval in seconds
    #[serde(default = "default_stats_interval")]
    pub stats_interval_secs: u64,

    #[serde(default = "default_stats_lease_ttl")]
    pub stats_lease_ttl_secs: u64,

    #[serde(default = "default_load_timeout")]
    pub load_timeout_secs: u64,

    #[serde(default = "default_inference_timeout")]
    pub inference_timeout_ms: u64,

    /// Bound on one ASN lookup during fallback
    #[serde(default = "default_asn_timeout")]
    pub asn_lookup_timeout_ms: u64,

    /// Directory holding meters.json and stats.json
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

fn default_instance_name() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "flowmeter-console".to_string())
}

fn default_api_port() -> u16 {
    8080
}

fn default_batch_size() -> usize {
    1000
}

fn default_flow_table() -> u8 {
    DEFAULT_TABLE_ID
}

fn default_flow_priority() -> u16 {
    DEFAULT_FLOW_PRIORITY
}

fn default_stats_interval() -> u64 {
    300
}

fn default_stats_lease_ttl() -> u64 {
    30
}

fn default_load_timeout() -> u64 {
    30
}

fn default_inference_timeout() -> u64 {
    500
}

fn default_asn_timeout() -> u64 {
    50
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

impl ConsoleConfig {
    /// Load from the optional config file, then `FLOWMETER_*` environment
    /// variables. Nested keys use `__`, e.g. `FLOWMETER_CONTROLLER__USERNAME`.
    pub fn load() -> Result<Self> {
        let file = std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from);
        Self::load_from(file)
    }

    pub fn load_from(file: Option<PathBuf>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = &file {
            builder = builder.add_source(config::File::from(path.as_path()).required(true));
        }

        let config = builder
            .add_source(
                config::Environment::with_prefix("FLOWMETER")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("failed to read console configuration")?;

        let config: Self = config
            .try_deserialize()
            .context("invalid console configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Cross-field checks that deserialization cannot express
    pub fn validate(&self) -> Result<()> {
        ensure!(self.stats_interval_secs > 0, "stats_interval_secs must be greater than 0");
        ensure!(
            self.stats_lease_ttl_secs > 0,
            "stats_lease_ttl_secs must be greater than 0"
        );
        ensure!(
            self.stats_lease_ttl_secs < self.stats_interval_secs,
            "stats_lease_ttl_secs ({}) must be shorter than stats_interval_secs ({})",
            self.stats_lease_ttl_secs,
            self.stats_interval_secs
        );
        ensure!(self.lookup_batch_size > 0, "lookup_batch_size must be greater than 0");
        Ok(())
    }

    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            load_timeout: Duration::from_secs(self.load_timeout_secs),
            inference_timeout: Duration::from_millis(self.inference_timeout_ms),
            stats_lease_ttl: Duration::from_secs(self.stats_lease_ttl_secs),
        }
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats_interval_secs)
    }

    pub fn asn_lookup_timeout(&self) -> Duration {
        Duration::from_millis(self.asn_lookup_timeout_ms)
    }

    pub fn meters_path(&self) -> PathBuf {
        self.data_dir.join("meters.json")
    }

    pub fn stats_path(&self) -> PathBuf {
        self.data_dir.join("stats.json")
    }
}
