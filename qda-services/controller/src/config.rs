// std
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
// crates
use qda_core::{BlobVersion, BlobVersionParameters, QuorumId, RelayKey};
use qda_encoding::ProofBackendKind;
use qda_tracing::LoggingSettings;
use serde::{Deserialize, Serialize};
use thiserror::Error;
// internal

pub const DEFAULT_CONFIRMATION_THRESHOLD: u8 = 55;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error("{field} must be within 1..=100, got {value}")]
    Percentage { field: String, value: u8 },
    #[error("{required} relays requested per blob but only {available} available")]
    NotEnoughRelays { required: usize, available: usize },
    #[error("No blob version configured")]
    NoBlobVersions,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EncodingManagerConfig {
    #[serde(with = "humantime_serde")]
    pub pull_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub encoding_request_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub store_timeout: Duration,
    pub num_encoding_retries: u32,
    pub num_concurrent_requests: usize,
    pub max_num_blobs_per_iteration: usize,
    pub num_relay_assignment: usize,
    #[serde(default)]
    pub available_relays: Vec<RelayKey>,
    #[serde(with = "humantime_serde")]
    pub retry_backoff: Duration,
    #[serde(default)]
    pub proof_backend: ProofBackendKind,
}

impl EncodingManagerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        non_zero_duration("encoding_manager.pull_interval", self.pull_interval)?;
        non_zero_duration(
            "encoding_manager.encoding_request_timeout",
            self.encoding_request_timeout,
        )?;
        non_zero_duration("encoding_manager.store_timeout", self.store_timeout)?;
        if self.num_concurrent_requests == 0 {
            return Err(ConfigError::Zero("encoding_manager.num_concurrent_requests"));
        }
        if self.max_num_blobs_per_iteration == 0 {
            return Err(ConfigError::Zero(
                "encoding_manager.max_num_blobs_per_iteration",
            ));
        }
        let distinct = {
            let mut relays = self.available_relays.clone();
            relays.sort();
            relays.dedup();
            relays.len()
        };
        if self.num_relay_assignment > distinct {
            return Err(ConfigError::NotEnoughRelays {
                required: self.num_relay_assignment,
                available: distinct,
            });
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DispatcherConfig {
    #[serde(with = "humantime_serde")]
    pub pull_interval: Duration,
    pub finalization_block_delay: u64,
    /// Bound on a single request to one operator.
    #[serde(with = "humantime_serde")]
    pub attestation_timeout: Duration,
    /// Bound on the whole signature collection window of a batch.
    #[serde(with = "humantime_serde")]
    pub batch_attestation_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub signature_tick_interval: Duration,
    pub num_request_retries: u32,
    pub num_concurrent_requests: usize,
    pub max_batch_size: usize,
    pub significant_signing_threshold_percentage: u8,
    #[serde(default = "default_confirmation_threshold")]
    pub default_confirmation_threshold: u8,
    #[serde(default)]
    pub quorum_confirmation_thresholds: BTreeMap<QuorumId, u8>,
    #[serde(default)]
    pub disperser_id: u32,
}

fn default_confirmation_threshold() -> u8 {
    DEFAULT_CONFIRMATION_THRESHOLD
}

impl DispatcherConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        non_zero_duration("dispatcher.pull_interval", self.pull_interval)?;
        non_zero_duration("dispatcher.attestation_timeout", self.attestation_timeout)?;
        non_zero_duration(
            "dispatcher.batch_attestation_timeout",
            self.batch_attestation_timeout,
        )?;
        non_zero_duration(
            "dispatcher.signature_tick_interval",
            self.signature_tick_interval,
        )?;
        if self.num_concurrent_requests == 0 {
            return Err(ConfigError::Zero("dispatcher.num_concurrent_requests"));
        }
        if self.max_batch_size == 0 {
            return Err(ConfigError::Zero("dispatcher.max_batch_size"));
        }
        percentage(
            "dispatcher.significant_signing_threshold_percentage",
            self.significant_signing_threshold_percentage,
        )?;
        percentage(
            "dispatcher.default_confirmation_threshold",
            self.default_confirmation_threshold,
        )?;
        for (quorum, threshold) in &self.quorum_confirmation_thresholds {
            percentage(
                &format!("dispatcher.quorum_confirmation_thresholds.{quorum}"),
                *threshold,
            )?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChainStateConfig {
    #[serde(with = "humantime_serde")]
    pub refresh_interval: Duration,
    /// Quorums kept in the operator state snapshot.
    #[serde(default)]
    pub quorums: Vec<QuorumId>,
}

impl ChainStateConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        non_zero_duration("chain_state.refresh_interval", self.refresh_interval)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ControllerConfig {
    pub encoding_manager: EncodingManagerConfig,
    pub dispatcher: DispatcherConfig,
    pub chain_state: ChainStateConfig,
    pub blob_versions: BTreeMap<BlobVersion, BlobVersionParameters>,
    pub max_symbols_per_chunk: u32,
    #[serde(default)]
    pub logging: LoggingSettings,
}

impl ControllerConfig {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let file = std::fs::File::open(path)?;
        let config: Self = serde_yaml::from_reader(file)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.encoding_manager.validate()?;
        self.dispatcher.validate()?;
        self.chain_state.validate()?;
        if self.blob_versions.is_empty() {
            return Err(ConfigError::NoBlobVersions);
        }
        if self.max_symbols_per_chunk == 0 {
            return Err(ConfigError::Zero("max_symbols_per_chunk"));
        }
        Ok(())
    }
}

fn non_zero_duration(field: &'static str, duration: Duration) -> Result<(), ConfigError> {
    if duration.is_zero() {
        return Err(ConfigError::Zero(field));
    }
    Ok(())
}

fn percentage(field: &str, value: u8) -> Result<(), ConfigError> {
    if !(1..=100).contains(&value) {
        return Err(ConfigError::Percentage {
            field: field.to_string(),
            value,
        });
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::{ConfigError, ControllerConfig};
    use qda_encoding::ProofBackendKind;
    use std::io::Write;
    use std::time::Duration;

    const CONFIG: &str = r#"
encoding_manager:
  pull_interval: 2s
  encoding_request_timeout: 10s
  store_timeout: 5s
  num_encoding_retries: 3
  num_concurrent_requests: 16
  max_num_blobs_per_iteration: 128
  num_relay_assignment: 2
  available_relays: [0, 1, 2, 3]
  retry_backoff: 500ms
dispatcher:
  pull_interval: 1s
  finalization_block_delay: 75
  attestation_timeout: 20s
  batch_attestation_timeout: 25s
  signature_tick_interval: 50ms
  num_request_retries: 2
  num_concurrent_requests: 32
  max_batch_size: 32
  significant_signing_threshold_percentage: 70
  quorum_confirmation_thresholds:
    1: 67
chain_state:
  refresh_interval: 1m
  quorums: [0, 1]
blob_versions:
  0:
    coding_rate: 8
    max_num_operators: 3537
    num_chunks: 8192
max_symbols_per_chunk: 65536
logging:
  logger: Stdout
  level: INFO
"#;

    #[test]
    fn load_yaml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(CONFIG.as_bytes()).unwrap();
        let config = ControllerConfig::from_yaml_file(file.path()).unwrap();
        assert_eq!(
            config.encoding_manager.retry_backoff,
            Duration::from_millis(500)
        );
        assert_eq!(config.encoding_manager.proof_backend, ProofBackendKind::Fk20);
        assert_eq!(config.dispatcher.default_confirmation_threshold, 55);
        assert_eq!(config.dispatcher.quorum_confirmation_thresholds[&1], 67);
        assert_eq!(config.chain_state.refresh_interval, Duration::from_secs(60));
        assert_eq!(config.blob_versions[&0].num_chunks, 8192);
    }

    #[test]
    fn reject_invalid_values() {
        let mut config: ControllerConfig = serde_yaml::from_str(CONFIG).unwrap();
        config.dispatcher.quorum_confirmation_thresholds.insert(0, 101);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Percentage { value: 101, .. })
        ));

        let mut config: ControllerConfig = serde_yaml::from_str(CONFIG).unwrap();
        config.encoding_manager.num_relay_assignment = 5;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::NotEnoughRelays {
                required: 5,
                available: 4
            })
        ));

        let mut config: ControllerConfig = serde_yaml::from_str(CONFIG).unwrap();
        config.dispatcher.signature_tick_interval = Duration::ZERO;
        assert!(matches!(config.validate(), Err(ConfigError::Zero(_))));
    }
}
