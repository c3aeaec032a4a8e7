// pulse - bitdrift's observability proxy
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./filter_test.rs"]
mod filter_test;

use crate::config::ConfigError;
use crate::family::MetricFamily;
use itertools::Itertools;
use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct MetricsFilterConfig {
  // When not empty, only families matching one of these patterns are kept.
  pub include: Vec<String>,
  // Families matching one of these patterns are dropped.
  pub exclude: Vec<String>,
}

pub fn compile_pattern_list(patterns: &[String]) -> Result<Vec<Regex>, ConfigError> {
  patterns
    .iter()
    .map(|pattern| {
      Regex::new(pattern).map_err(|source| ConfigError::InvalidPattern {
        pattern: pattern.clone(),
        source,
      })
    })
    .collect()
}

// Whether a family name matches any pattern. Patterns are not anchored.
#[must_use]
pub fn match_metric_family(family: &str, patterns: &[Regex]) -> bool {
  patterns.iter().any(|pattern| pattern.is_match(family))
}

//
// MetricsFilter
//

#[derive(Clone, Debug, Default)]
pub struct MetricsFilter {
  include: Vec<Regex>,
  exclude: Vec<Regex>,
}

impl MetricsFilter {
  pub fn new(config: &MetricsFilterConfig) -> Result<Self, ConfigError> {
    if let Some(pattern) = config
      .include
      .iter()
      .filter(|pattern| config.exclude.contains(pattern))
      .sorted()
      .next()
    {
      return Err(ConfigError::ConflictingPattern(pattern.clone()));
    }

    Ok(Self {
      include: compile_pattern_list(&config.include)?,
      exclude: compile_pattern_list(&config.exclude)?,
    })
  }

  #[must_use]
  pub fn is_empty(&self) -> bool {
    self.include.is_empty() && self.exclude.is_empty()
  }

  #[must_use]
  pub fn matches(&self, family: &str) -> bool {
    if !self.include.is_empty() && !match_metric_family(family, &self.include) {
      return false;
    }
    !match_metric_family(family, &self.exclude)
  }

  #[must_use]
  pub fn filter(&self, families: Vec<MetricFamily>) -> Vec<MetricFamily> {
    if self.is_empty() {
      return families;
    }
    families
      .into_iter()
      .filter(|family| {
        let keep = self.matches(&family.name);
        if !keep {
          log::trace!("filtered out metric family '{}'", family.name);
        }
        keep
      })
      .collect()
  }
}
