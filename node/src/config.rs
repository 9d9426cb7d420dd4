//! Node Configuration
//! 
//! File-based configuration of the L1 node. TOML and YAML are accepted, chosen
//! by file extension; every section falls back to defaults when absent.

use anyhow::{anyhow, Context};
use interfaces::QueueConfig;
use layers::phy::PipelineConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct NodeConfig {
    /// Slot pipeline parameters
    #[serde(default)]
    pub pipeline: PipelineConfig,
    /// Indication queue capacities
    #[serde(default)]
    pub queues: QueueConfig,
    /// Logging configuration
    #[serde(default)]
    pub log: LogConfig,
    /// Synthetic scheduler traffic
    #[serde(default)]
    pub traffic: TrafficConfig,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct LogConfig {
    /// Default filter when RUST_LOG is not set
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Seconds between statistics reports, 0 disables them
    #[serde(default = "default_stats_interval")]
    pub stats_interval_s: u64,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_stats_interval() -> u64 {
    5
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            stats_interval_s: default_stats_interval(),
        }
    }
}

/// Traffic generated by the built-in scheduler
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TrafficConfig {
    /// UEs served round-robin, C-RNTIs counting up from 0x4601
    #[serde(default = "default_num_ues")]
    pub num_ues: u16,
    /// Transport block size of every grant
    #[serde(default = "default_payload_bytes")]
    pub payload_bytes: usize,
    #[serde(default = "default_ssb_period")]
    pub ssb_period_slots: u32,
    #[serde(default = "default_prach_period")]
    pub prach_period_slots: u32,
    #[serde(default = "default_pucch_period")]
    pub pucch_period_slots: u32,
    /// Slots between MAC-CE timing-advance commands, 0 disables them
    #[serde(default)]
    pub ta_period_slots: u32,
    /// Emulated decode failure every n-th data channel, 0 for never
    #[serde(default)]
    pub crc_failure_period: u64,
}

fn default_num_ues() -> u16 {
    2
}

fn default_payload_bytes() -> usize {
    64
}

fn default_ssb_period() -> u32 {
    40
}

fn default_prach_period() -> u32 {
    160
}

fn default_pucch_period() -> u32 {
    10
}

impl Default for TrafficConfig {
    fn default() -> Self {
        Self {
            num_ues: default_num_ues(),
            payload_bytes: default_payload_bytes(),
            ssb_period_slots: default_ssb_period(),
            prach_period_slots: default_prach_period(),
            pucch_period_slots: default_pucch_period(),
            ta_period_slots: 0,
            crc_failure_period: 0,
        }
    }
}

impl NodeConfig {
    /// Load configuration from a TOML or YAML file
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Self::from_toml_str(&contents),
            Some("yaml") | Some("yml") => Self::from_yaml_str(&contents),
            _ => Err(anyhow!("Unsupported configuration format: {}", path.display())),
        }
    }

    pub fn from_toml_str(contents: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    pub fn from_yaml_str(contents: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(contents)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::types::{DuplexMode, SubcarrierSpacing, TddPattern};
    
    #[test]
    fn test_toml_config() {
        let config = NodeConfig::from_toml_str(
            r#"
            [pipeline]
            scs = "Scs15"
            worker_threads = 2

            [pipeline.capacities]
            dci = 4

            [queues]
            uci_capacity = 8

            [traffic]
            num_ues = 4
            crc_failure_period = 10
            "#,
        )
        .unwrap();
        
        assert_eq!(config.pipeline.scs, SubcarrierSpacing::Scs15);
        assert_eq!(config.pipeline.worker_threads, 2);
        assert_eq!(config.pipeline.capacities.dci, 4);
        assert_eq!(config.pipeline.capacities.ssb, 64);
        assert_eq!(config.queues.uci_capacity, 8);
        assert_eq!(config.queues.rx_data_capacity, 64);
        assert_eq!(config.traffic.num_ues, 4);
        assert_eq!(config.traffic.crc_failure_period, 10);
        assert_eq!(config.log, LogConfig::default());
    }
    
    #[test]
    fn test_yaml_config() {
        let config = NodeConfig::from_yaml_str(
            r#"
pipeline:
  duplex: !Tdd
    dl_slots: 7
    mixed_slots: 1
    ul_slots: 2
  slot_contexts: 4
log:
  level: debug
"#,
        )
        .unwrap();
        
        assert_eq!(
            config.pipeline.duplex,
            DuplexMode::Tdd(TddPattern { dl_slots: 7, mixed_slots: 1, ul_slots: 2 })
        );
        assert_eq!(config.pipeline.slot_contexts, 4);
        assert_eq!(config.log.level, "debug");
        assert_eq!(config.traffic, TrafficConfig::default());
    }
    
    #[test]
    fn test_empty_config_is_default() {
        assert_eq!(NodeConfig::from_toml_str("").unwrap(), NodeConfig::default());
    }
    
    #[test]
    fn test_unsupported_extension() {
        assert!(NodeConfig::from_file(Path::new("/nonexistent/config.ini")).is_err());
    }
}
