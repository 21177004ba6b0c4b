use crate::electricity_meter::{DEFAULT_MEASUREMENT_INTERVAL, DEFAULT_POLL_INTERVAL};
use crate::register_read::RegisterReadSpec;
use anyhow::Context;
use serde_derive::{Deserialize, Serialize};
use std::env;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Configuration of one metered appliance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeterConfig {
    pub appliance_id: String,
    pub modbus_address: SocketAddr,
    #[serde(default)]
    pub slave_id: Option<u8>,
    /// Seconds.
    #[serde(default)]
    pub poll_interval: Option<u64>,
    /// Seconds.
    #[serde(default)]
    pub measurement_interval: Option<u64>,
    #[serde(default)]
    pub register_reads: Vec<RegisterReadSpec>,
}

impl MeterConfig {
    pub fn from_json_str(json: &str) -> anyhow::Result<Self> {
        serde_json::from_str(json).context("failed to parse the meter configuration")
    }

    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read `{}`", path.display()))?;
        Self::from_json_str(&json)
    }

    /// Loads the file named by `METER_CONFIG`; `METER_MODBUS` overrides the device address.
    pub fn from_env() -> anyhow::Result<Self> {
        let path = env::var("METER_CONFIG")
            .context("Required to add the meter configuration file (METER_CONFIG env var)")?;
        let mut config = Self::from_file(path)?;
        if let Ok(modbus_address) = env::var("METER_MODBUS") {
            config.modbus_address = modbus_address
                .parse()
                .context("Invalid METER_MODBUS address format")?;
        }
        Ok(config)
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
            .map_or(DEFAULT_POLL_INTERVAL, Duration::from_secs)
    }

    pub fn measurement_interval(&self) -> Duration {
        self.measurement_interval
            .map_or(DEFAULT_MEASUREMENT_INTERVAL, Duration::from_secs)
    }
}
