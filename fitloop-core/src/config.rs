//! Configuration for experiment runs.
//!
//! Uses `figment` for layered configuration: defaults -> user config -> explicit
//! config file -> environment -> CLI overrides. The user config lives at
//! `~/.config/fitloop/config.toml`; environment variables use the `FITLOOP_`
//! prefix with `__` as the nesting separator (`FITLOOP_TRAINING__EPOCHS=5`).

use crate::device::Device;
use crate::error::HarnessError;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HarnessConfig {
    /// Epoch loop and batching.
    #[serde(default)]
    pub training: TrainingConfig,
    /// Optimizer hyperparameters.
    #[serde(default)]
    pub optimizer: OptimizerConfig,
    /// Step-decay learning-rate schedule.
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// Best-model checkpointing.
    #[serde(default)]
    pub checkpoint: CheckpointConfig,
}

/// Epoch loop configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// Fixed number of epochs; the run never stops early.
    #[serde(default = "default_epochs")]
    pub epochs: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Emit a progress event every N training batches.
    #[serde(default = "default_log_interval")]
    pub log_interval: usize,
    /// Fraction of the training data kept for optimization; the rest validates.
    #[serde(default = "default_train_split")]
    pub train_split: f64,
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default)]
    pub device: Device,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: default_epochs(),
            batch_size: default_batch_size(),
            log_interval: default_log_interval(),
            train_split: default_train_split(),
            seed: default_seed(),
            device: Device::default(),
        }
    }
}

fn default_epochs() -> usize {
    50
}

fn default_batch_size() -> usize {
    32
}

fn default_log_interval() -> usize {
    10
}

fn default_train_split() -> f64 {
    0.9
}

fn default_seed() -> u64 {
    42
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizerKind {
    #[default]
    Adam,
    Sgd,
}

/// Optimizer configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizerConfig {
    #[serde(default)]
    pub kind: OptimizerKind,
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
    #[serde(default)]
    pub weight_decay: f64,
    #[serde(default = "default_beta1")]
    pub beta1: f64,
    #[serde(default = "default_beta2")]
    pub beta2: f64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            kind: OptimizerKind::default(),
            learning_rate: default_learning_rate(),
            weight_decay: 0.0,
            beta1: default_beta1(),
            beta2: default_beta2(),
        }
    }
}

fn default_learning_rate() -> f64 {
    1e-3
}

fn default_beta1() -> f64 {
    0.9
}

fn default_beta2() -> f64 {
    0.999
}

/// Step-decay schedule: multiply the rate by `decay_factor` every `interval` epochs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_interval")]
    pub interval: usize,
    #[serde(default = "default_decay_factor")]
    pub decay_factor: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: default_interval(),
            decay_factor: default_decay_factor(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_interval() -> usize {
    5
}

fn default_decay_factor() -> f64 {
    0.9
}

/// Checkpoint configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointConfig {
    /// Single fixed location, overwritten on every improvement.
    #[serde(default = "default_checkpoint_path")]
    pub path: PathBuf,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            path: default_checkpoint_path(),
        }
    }
}

fn default_checkpoint_path() -> PathBuf {
    PathBuf::from("checkpoints/best_model.json")
}

impl HarnessConfig {
    /// Reject values that would make a run meaningless or divide by zero.
    pub fn validate(&self) -> Result<(), HarnessError> {
        let t = &self.training;
        if t.batch_size == 0 {
            return Err(HarnessError::config("training.batch_size must be > 0"));
        }
        if t.log_interval == 0 {
            return Err(HarnessError::config("training.log_interval must be > 0"));
        }
        if !(t.train_split > 0.0 && t.train_split <= 1.0) {
            return Err(HarnessError::config(format!(
                "training.train_split must be within (0, 1], got {}",
                t.train_split
            )));
        }

        let o = &self.optimizer;
        if !(o.learning_rate.is_finite() && o.learning_rate > 0.0) {
            return Err(HarnessError::config(format!(
                "optimizer.learning_rate must be positive, got {}",
                o.learning_rate
            )));
        }
        if !(o.weight_decay.is_finite() && o.weight_decay >= 0.0) {
            return Err(HarnessError::config("optimizer.weight_decay must be >= 0"));
        }
        for (name, beta) in [("beta1", o.beta1), ("beta2", o.beta2)] {
            if !(0.0..1.0).contains(&beta) {
                return Err(HarnessError::config(format!(
                    "optimizer.{name} must be within [0, 1), got {beta}"
                )));
            }
        }

        let s = &self.scheduler;
        if s.enabled {
            if s.interval == 0 {
                return Err(HarnessError::config("scheduler.interval must be > 0"));
            }
            if !(s.decay_factor.is_finite() && s.decay_factor > 0.0) {
                return Err(HarnessError::config(format!(
                    "scheduler.decay_factor must be positive, got {}",
                    s.decay_factor
                )));
            }
        }

        if self.checkpoint.path.as_os_str().is_empty() {
            return Err(HarnessError::config("checkpoint.path must not be empty"));
        }
        Ok(())
    }
}

/// Command-line values that take precedence over every other source.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub epochs: Option<usize>,
    pub learning_rate: Option<f64>,
    pub checkpoint_path: Option<PathBuf>,
    pub device: Option<Device>,
}

/// Load configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Explicit overrides
/// 2. Environment variables (prefixed with `FITLOOP_`)
/// 3. Explicit config file
/// 4. User config (`~/.config/fitloop/config.toml`)
/// 5. Built-in defaults
pub fn load_config(
    config_file: Option<&Path>,
    overrides: &ConfigOverrides,
) -> Result<HarnessConfig, Box<figment::Error>> {
    let mut figment = Figment::from(Serialized::defaults(HarnessConfig::default()));

    if let Some(dirs) = directories::ProjectDirs::from("dev", "fitloop", "fitloop") {
        let user_config = dirs.config_dir().join("config.toml");
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    if let Some(path) = config_file {
        figment = figment.merge(Toml::file(path));
    }

    figment = figment.merge(Env::prefixed("FITLOOP_").split("__"));

    if let Some(epochs) = overrides.epochs {
        figment = figment.merge(Serialized::default("training.epochs", epochs));
    }
    if let Some(lr) = overrides.learning_rate {
        figment = figment.merge(Serialized::default("optimizer.learning_rate", lr));
    }
    if let Some(path) = &overrides.checkpoint_path {
        figment = figment.merge(Serialized::default("checkpoint.path", path));
    }
    if let Some(device) = overrides.device {
        figment = figment.merge(Serialized::default("training.device", device));
    }

    figment.extract().map_err(Box::new)
}

/// Write `config` as TOML to `path`, replacing any existing file.
pub fn write_config(path: &Path, config: &HarnessConfig) -> Result<(), HarnessError> {
    let text = toml::to_string_pretty(config)
        .map_err(|e| HarnessError::config(format!("failed to serialize config: {e}")))?;
    crate::persistence::atomic_write(path, text.as_bytes())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_defaults_validate() {
        let config = HarnessConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.training.epochs, 50);
        assert_eq!(config.scheduler.interval, 5);
        assert_eq!(config.scheduler.decay_factor, 0.9);
    }

    #[test]
    fn test_validate_rejects_zero_interval() {
        let mut config = HarnessConfig::default();
        config.scheduler.interval = 0;
        assert!(matches!(config.validate(), Err(HarnessError::Config(_))));

        config.scheduler.enabled = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_learning_rate() {
        let mut config = HarnessConfig::default();
        config.optimizer.learning_rate = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_layered_loading() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "fitloop.toml",
                r#"
                [training]
                epochs = 12
                batch_size = 8

                [optimizer]
                kind = "sgd"
                learning_rate = 0.05
                "#,
            )?;
            jail.set_env("FITLOOP_TRAINING__BATCH_SIZE", "16");

            let overrides = ConfigOverrides {
                learning_rate: Some(0.01),
                ..Default::default()
            };
            let config = load_config(Some(Path::new("fitloop.toml")), &overrides)
                .map_err(|e| e.to_string())?;

            assert_eq!(config.training.epochs, 12);
            assert_eq!(config.training.batch_size, 16);
            assert_eq!(config.optimizer.kind, OptimizerKind::Sgd);
            assert_eq!(config.optimizer.learning_rate, 0.01);
            assert_eq!(config.training.log_interval, 10);
            Ok(())
        });
    }

    #[test]
    fn test_written_config_loads_back() {
        Jail::expect_with(|jail| {
            let mut config = HarnessConfig::default();
            config.training.epochs = 3;
            config.scheduler.enabled = false;
            let path = jail.directory().join("written.toml");
            write_config(&path, &config).map_err(|e| e.to_string())?;

            let loaded = load_config(Some(&path), &ConfigOverrides::default())
                .map_err(|e| e.to_string())?;
            assert_eq!(loaded, config);
            Ok(())
        });
    }
}
