//! Configuration types for the link-state routing policy
//!
//! Every field has a default, so a configuration file only needs to name
//! what it overrides. Instances are validated once, when the policy is built.

use crate::error::{ConfigError, Result};
use crate::routing::{QosId, DEFAULT_QOS_ID};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Default period of the aging tick
pub const DEFAULT_AGE_TICK_MS: u64 = 997;

/// Default period of the propagation tick
pub const DEFAULT_PROPAGATION_MS: u64 = 101;

/// Default age at which objects expire
pub const DEFAULT_MAX_AGE: u32 = 100_000;

/// Default number of objects per flood message
pub const DEFAULT_MAX_OBJECTS_PER_UPDATE: usize = 15;

/// Default number of full-state pull retries
pub const DEFAULT_PULL_RETRIES: u32 = 3;

/// How flow state objects become graph edges
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LinkModel {
    /// An edge is usable only when both ends announce it UP
    #[default]
    Bidirectional,

    /// Every UP object is an edge on its own
    Directed,
}

/// How link weights are derived
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LinkWeights {
    /// Weight is the object cost; one topology for every QoS class
    #[default]
    Uniform,

    /// One topology per QoS class, weight is cost times the class multiplier
    PerQos(BTreeMap<QosId, u32>),
}

impl LinkWeights {
    /// QoS classes to compute routes for, with their weight multipliers
    pub fn classes(&self) -> Vec<(QosId, u64)> {
        match self {
            Self::Uniform => vec![(DEFAULT_QOS_ID, 1)],
            Self::PerQos(table) => table
                .iter()
                .map(|(qos_id, multiplier)| (*qos_id, u64::from(*multiplier)))
                .collect(),
        }
    }
}

/// Complete routing policy configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Period of the aging tick in milliseconds
    pub age_tick_ms: u64,

    /// Period of the propagation tick in milliseconds
    pub propagation_ms: u64,

    /// Age (in aging ticks) at which an object expires
    pub max_age: u32,

    /// Maximum objects carried by one flood or read response message
    pub max_objects_per_update: usize,

    /// How long to wait for the last full-state batch
    ///
    /// Defaults to twice the propagation period.
    pub pull_timeout_ms: Option<u64>,

    /// Extra attempts after a full-state pull times out
    pub pull_retries: u32,

    /// Cost given to locally originated adjacencies
    pub default_link_cost: u32,

    /// Edge construction rule
    pub link_model: LinkModel,

    /// Weight derivation rule
    pub link_weights: LinkWeights,

    /// Compute loop-free alternates on top of the primary next hops
    pub loop_free_alternates: bool,

    /// Re-originate own objects before they can expire elsewhere
    pub refresh_local_objects: bool,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            age_tick_ms: DEFAULT_AGE_TICK_MS,
            propagation_ms: DEFAULT_PROPAGATION_MS,
            max_age: DEFAULT_MAX_AGE,
            max_objects_per_update: DEFAULT_MAX_OBJECTS_PER_UPDATE,
            pull_timeout_ms: None,
            pull_retries: DEFAULT_PULL_RETRIES,
            default_link_cost: 1,
            link_model: LinkModel::default(),
            link_weights: LinkWeights::default(),
            loop_free_alternates: false,
            refresh_local_objects: true,
        }
    }
}

impl RoutingConfig {
    /// Parse a JSON document and validate it
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&contents)
    }

    /// Set the aging period
    pub fn with_age_tick_ms(mut self, ms: u64) -> Self {
        self.age_tick_ms = ms;
        self
    }

    /// Set the propagation period
    pub fn with_propagation_ms(mut self, ms: u64) -> Self {
        self.propagation_ms = ms;
        self
    }

    /// Set the expiry age
    pub fn with_max_age(mut self, max_age: u32) -> Self {
        self.max_age = max_age;
        self
    }

    /// Set the batch size
    pub fn with_max_objects_per_update(mut self, max: usize) -> Self {
        self.max_objects_per_update = max;
        self
    }

    /// Set the full-state pull timeout
    pub fn with_pull_timeout_ms(mut self, ms: u64) -> Self {
        self.pull_timeout_ms = Some(ms);
        self
    }

    /// Set the number of pull retries
    pub fn with_pull_retries(mut self, retries: u32) -> Self {
        self.pull_retries = retries;
        self
    }

    /// Set the cost of local adjacencies
    pub fn with_default_link_cost(mut self, cost: u32) -> Self {
        self.default_link_cost = cost;
        self
    }

    /// Set the link model
    pub fn with_link_model(mut self, model: LinkModel) -> Self {
        self.link_model = model;
        self
    }

    /// Set the link weights
    pub fn with_link_weights(mut self, weights: LinkWeights) -> Self {
        self.link_weights = weights;
        self
    }

    /// Enable or disable loop-free alternates
    pub fn with_loop_free_alternates(mut self, enabled: bool) -> Self {
        self.loop_free_alternates = enabled;
        self
    }

    /// Enable or disable refreshing of own objects
    pub fn with_refresh_local_objects(mut self, enabled: bool) -> Self {
        self.refresh_local_objects = enabled;
        self
    }

    /// Aging period
    pub fn age_tick(&self) -> Duration {
        Duration::from_millis(self.age_tick_ms)
    }

    /// Propagation period
    pub fn propagation_period(&self) -> Duration {
        Duration::from_millis(self.propagation_ms)
    }

    /// Full-state pull timeout
    pub fn pull_timeout(&self) -> Duration {
        Duration::from_millis(
            self.pull_timeout_ms
                .unwrap_or_else(|| self.propagation_ms.saturating_mul(2)),
        )
    }

    /// Age at which own objects are re-originated
    pub fn refresh_threshold(&self) -> u32 {
        (self.max_age / 2).max(1)
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if a period, age, batch size or cost is zero,
    /// or if a per-QoS weight table is empty or has a zero multiplier.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("age_tick_ms", self.age_tick_ms),
            ("propagation_ms", self.propagation_ms),
            ("max_age", u64::from(self.max_age)),
            ("max_objects_per_update", self.max_objects_per_update as u64),
            ("default_link_cost", u64::from(self.default_link_cost)),
            ("pull_timeout_ms", self.pull_timeout_ms.unwrap_or(1)),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(ConfigError::MustBePositive {
                    field: field.to_string(),
                }
                .into());
            }
        }

        if let LinkWeights::PerQos(table) = &self.link_weights {
            if table.is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "link_weights".to_string(),
                    reason: "per-QoS weight table is empty".to_string(),
                }
                .into());
            }
            if let Some((qos_id, _)) = table.iter().find(|(_, m)| **m == 0) {
                return Err(ConfigError::InvalidValue {
                    field: "link_weights".to_string(),
                    reason: format!("multiplier for QoS {} is zero", qos_id),
                }
                .into());
            }
        }

        Ok(())
    }
}
