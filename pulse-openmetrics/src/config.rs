// pulse - bitdrift's observability proxy
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./config_test.rs"]
mod config_test;

use crate::counter_cache::CounterCache;
use crate::filter::{MetricsFilter, MetricsFilterConfig};
use crate::mapping::MetricsMapping;
use crate::typed::TypedGenerator;
use pulse_common::config::{yaml_file_to_config, yaml_to_config};
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

//
// ConfigError
//

// Setup time errors. A collector with an invalid configuration never fetches.
#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("invalid metric filter pattern '{pattern}': {source}")]
  InvalidPattern {
    pattern: String,
    source: regex::Error,
  },
  #[error("pattern '{0}' is both included and excluded")]
  ConflictingPattern(String),
  #[error("metric '{0}' stores non mapped labels without a placement")]
  MissingPlacement(String),
  #[error("label '{0}' maps to an empty field")]
  EmptyLabelField(String),
  #[error("field '{0}' is used by both key and plain labels")]
  ConflictingLabelField(String),
  #[error("metric '{0}' maps to an empty field")]
  EmptyMetricField(String),
  #[error("metric '{metric}' has an invalid bucket multiplier {multiplier}")]
  InvalidMultiplier { metric: String, multiplier: f64 },
}

const fn default_true() -> bool {
  true
}

const fn default_counter_cache_timeout() -> Duration {
  Duration::from_secs(30 * 60)
}

//
// CollectorConfig
//

#[derive(Clone, Debug, Deserialize)]
pub struct CollectorConfig {
  // Namespace used for typed documents. Mapped documents use the mapping's namespace.
  #[serde(default)]
  pub namespace: String,
  #[serde(default)]
  pub mapping: MetricsMapping,
  #[serde(default)]
  pub metrics_filters: MetricsFilterConfig,
  // Produce typed documents instead of mapped ones.
  #[serde(default = "default_true")]
  pub use_types: bool,
  #[serde(default = "default_true")]
  pub rate_counters: bool,
  #[serde(with = "humantime_serde", default = "default_counter_cache_timeout")]
  pub counter_cache_timeout: Duration,
}

impl Default for CollectorConfig {
  fn default() -> Self {
    Self {
      namespace: String::new(),
      mapping: MetricsMapping::default(),
      metrics_filters: MetricsFilterConfig::default(),
      use_types: true,
      rate_counters: true,
      counter_cache_timeout: default_counter_cache_timeout(),
    }
  }
}

impl CollectorConfig {
  pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
    let config: Self = yaml_to_config(yaml)?;
    config.validate()?;
    Ok(config)
  }

  pub fn from_file(path: &Path) -> anyhow::Result<Self> {
    let config: Self = yaml_file_to_config(path)?;
    config.validate()?;
    Ok(config)
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    self.mapping.validate()?;
    self.filter().map(|_| ())
  }

  pub fn filter(&self) -> Result<MetricsFilter, ConfigError> {
    MetricsFilter::new(&self.metrics_filters)
  }

  #[must_use]
  pub fn counter_cache(&self) -> Arc<CounterCache> {
    CounterCache::new(self.counter_cache_timeout)
  }

  #[must_use]
  pub fn typed_generator(&self, cache: Arc<CounterCache>) -> TypedGenerator {
    TypedGenerator::new(self.rate_counters, cache)
  }
}
