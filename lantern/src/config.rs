//! TOML configuration for `lantern transfer`.
//!
//! ```toml
//! epochs = 200
//! seed = 42
//! log_interval = 20
//!
//! [optim]
//! kind = "adam"
//! lr = 0.01
//! ```
//!
//! Absent keys take the defaults below.

use std::fs;
use std::path::Path;

use lanternrt::OptimizerConfig;
use serde::{Deserialize, Serialize};

use crate::error::{CliError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    pub epochs: usize,
    pub seed: i64,
    pub log_interval: usize,
    pub optim: OptimConfig,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            epochs: 100,
            seed: 0,
            log_interval: 10,
            optim: OptimConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimKind {
    Sgd,
    Adam,
    RmsProp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimConfig {
    pub kind: OptimKind,
    pub lr: f64,
    pub momentum: f64,
    pub dampening: f64,
    pub nesterov: bool,
    pub weight_decay: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub alpha: f64,
    pub eps: f64,
    pub centered: bool,
}

impl Default for OptimConfig {
    fn default() -> Self {
        Self {
            kind: OptimKind::Sgd,
            lr: 1e-3,
            momentum: 0.0,
            dampening: 0.0,
            nesterov: false,
            weight_decay: 0.0,
            beta1: 0.9,
            beta2: 0.999,
            alpha: 0.99,
            eps: 1e-8,
            centered: false,
        }
    }
}

impl OptimConfig {
    pub fn to_optimizer_config(&self) -> OptimizerConfig {
        match self.kind {
            OptimKind::Sgd => OptimizerConfig::Sgd {
                momentum: self.momentum,
                dampening: self.dampening,
                weight_decay: self.weight_decay,
                nesterov: self.nesterov,
            },
            OptimKind::Adam => OptimizerConfig::Adam {
                beta1: self.beta1,
                beta2: self.beta2,
                weight_decay: self.weight_decay,
            },
            OptimKind::RmsProp => OptimizerConfig::RmsProp {
                alpha: self.alpha,
                eps: self.eps,
                weight_decay: self.weight_decay,
                momentum: self.momentum,
                centered: self.centered,
            },
        }
    }
}

impl TrainConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|source| CliError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: TrainConfig = toml::from_str(&text).map_err(|source| CliError::Config {
            path: path.to_path_buf(),
            source,
        })?;
        if config.log_interval == 0 {
            return Err(CliError::Data("log_interval must be at least 1".into()));
        }
        Ok(config)
    }
}
