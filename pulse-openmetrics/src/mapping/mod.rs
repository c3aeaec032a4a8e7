// pulse - bitdrift's observability proxy
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt


pub mod option;
pub mod value;

use crate::config::ConfigError;
use crate::event::{EventGrouper, Fields};
use crate::exposition::{MetricType, label_value};
use crate::family::{Metric, MetricFamily};
pub use option::{LabelSet, MappedMetric, MetricOption};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

//
// LabelMap
//

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LabelMap {
  // Copied into the document.
  Plain { field: String },
  // Copied into the document and part of its identity.
  Key { field: String },
}

impl LabelMap {
  #[must_use]
  pub fn plain(field: &str) -> Self {
    Self::Plain {
      field: field.to_string(),
    }
  }

  #[must_use]
  pub fn key(field: &str) -> Self {
    Self::Key {
      field: field.to_string(),
    }
  }

  #[must_use]
  pub fn field(&self) -> &str {
    match self {
      Self::Plain { field } | Self::Key { field } => field,
    }
  }

  #[must_use]
  pub const fn is_key(&self) -> bool {
    matches!(self, Self::Key { .. })
  }
}

//
// Configuration
//

// Per metric settings carried by extended mappings.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Configuration {
  // Keep labels that have no label mapping, under non_mapped_labels_placement.
  pub store_non_mapped_labels: bool,
  pub non_mapped_labels_placement: String,
  pub options: Vec<MetricOption>,
  // Added to the labels of every matching metric. Keys are dotted paths.
  pub extra_fields: BTreeMap<String, Value>,
}

//
// ExtendedKind
//

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExtendedKind {
  Common { field: String },
  Info,
}

//
// MetricMap
//

// How one exposition metric turns into a document field.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MetricMap {
  Common {
    field: String,
    #[serde(default)]
    options: Vec<MetricOption>,
  },
  // The literal keyword when the gauge is 1.
  Keyword {
    field: String,
    keyword: String,
    #[serde(default)]
    options: Vec<MetricOption>,
  },
  // Whether the gauge is 1.
  Boolean {
    field: String,
    #[serde(default)]
    options: Vec<MetricOption>,
  },
  // The value of another label when the gauge is 1.
  LabelRef {
    field: String,
    label: String,
    #[serde(default)]
    options: Vec<MetricOption>,
  },
  // Produces no field. Its labels enrich the documents sharing its key labels.
  Info,
  Extended {
    metric: ExtendedKind,
    #[serde(default)]
    configuration: Configuration,
  },
}

impl MetricMap {
  #[must_use]
  pub fn common(field: &str) -> Self {
    Self::Common {
      field: field.to_string(),
      options: Vec::new(),
    }
  }

  #[must_use]
  pub fn keyword(field: &str, keyword: &str) -> Self {
    Self::Keyword {
      field: field.to_string(),
      keyword: keyword.to_string(),
      options: Vec::new(),
    }
  }

  #[must_use]
  pub fn boolean(field: &str) -> Self {
    Self::Boolean {
      field: field.to_string(),
      options: Vec::new(),
    }
  }

  #[must_use]
  pub fn label_ref(field: &str, label: &str) -> Self {
    Self::LabelRef {
      field: field.to_string(),
      label: label.to_string(),
      options: Vec::new(),
    }
  }

  #[must_use]
  pub fn extended_common(field: &str, configuration: Configuration) -> Self {
    Self::Extended {
      metric: ExtendedKind::Common {
        field: field.to_string(),
      },
      configuration,
    }
  }

  #[must_use]
  pub const fn extended_info(configuration: Configuration) -> Self {
    Self::Extended {
      metric: ExtendedKind::Info,
      configuration,
    }
  }

  // Replace the option pipeline. Extended mappings keep theirs in the configuration.
  #[must_use]
  pub fn with_options(mut self, new_options: Vec<MetricOption>) -> Self {
    match &mut self {
      Self::Common { options, .. }
      | Self::Keyword { options, .. }
      | Self::Boolean { options, .. }
      | Self::LabelRef { options, .. } => *options = new_options,
      Self::Extended { configuration, .. } => configuration.options = new_options,
      Self::Info => {},
    }
    self
  }

  // The target field. Info mappings have none.
  #[must_use]
  pub fn field(&self) -> &str {
    match self {
      Self::Common { field, .. }
      | Self::Keyword { field, .. }
      | Self::Boolean { field, .. }
      | Self::LabelRef { field, .. }
      | Self::Extended {
        metric: ExtendedKind::Common { field },
        ..
      } => field,
      Self::Info
      | Self::Extended {
        metric: ExtendedKind::Info,
        ..
      } => "",
    }
  }

  #[must_use]
  pub fn options(&self) -> &[MetricOption] {
    match self {
      Self::Common { options, .. }
      | Self::Keyword { options, .. }
      | Self::Boolean { options, .. }
      | Self::LabelRef { options, .. } => options,
      Self::Extended { configuration, .. } => &configuration.options,
      Self::Info => &[],
    }
  }

  #[must_use]
  pub const fn configuration(&self) -> Option<&Configuration> {
    match self {
      Self::Extended { configuration, .. } => Some(configuration),
      _ => None,
    }
  }

  #[must_use]
  pub const fn is_info(&self) -> bool {
    matches!(
      self,
      Self::Info
        | Self::Extended {
          metric: ExtendedKind::Info,
          ..
        }
    )
  }

  // Extract the field value from a metric. None drops the metric.
  #[must_use]
  pub fn value(&self, metric: &Metric) -> Option<Value> {
    match self {
      Self::Common { .. }
      | Self::Extended {
        metric: ExtendedKind::Common { .. },
        ..
      } => value::common_value(&metric.value),
      Self::Keyword { keyword, .. } => value::keyword_value(&metric.value, keyword),
      Self::Boolean { .. } => value::boolean_value(&metric.value),
      Self::LabelRef { label, .. } => {
        value::label_value(&metric.value, label_value(&metric.labels, label))
      },
      Self::Info
      | Self::Extended {
        metric: ExtendedKind::Info,
        ..
      } => Some(Value::String(String::new())),
    }
  }
}

//
// MetricsMapping
//

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct MetricsMapping {
  // Exposition metric name to field mapping.
  pub metrics: BTreeMap<String, MetricMap>,
  // Exposition label name to field mapping.
  pub labels: BTreeMap<String, LabelMap>,
  pub namespace: String,
  // Added verbatim to every document.
  pub extra_fields: BTreeMap<String, String>,
}

impl MetricsMapping {
  // The mapping for a family. Counters and info families are also found under their sample name,
  // i.e. with the "_total" or "_info" suffix put back.
  #[must_use]
  pub fn metric_map(&self, family: &MetricFamily) -> Option<&MetricMap> {
    if let Some(metric_map) = self.metrics.get(&family.name) {
      return Some(metric_map);
    }
    let suffix = match family.metric_type {
      MetricType::Counter => "_total",
      MetricType::Info => "_info",
      _ => return None,
    };
    self.metrics.get(&format!("{}{suffix}", family.name))
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    if let Some(label) = self
      .labels
      .iter()
      .find_map(|(label, label_map)| label_map.field().is_empty().then_some(label))
    {
      return Err(ConfigError::EmptyLabelField(label.clone()));
    }

    let key_fields: BTreeSet<&str> = self
      .labels
      .values()
      .filter(|l| l.is_key())
      .map(LabelMap::field)
      .collect();
    if let Some(field) = self
      .labels
      .values()
      .filter(|l| !l.is_key())
      .map(LabelMap::field)
      .find(|field| key_fields.contains(field))
    {
      return Err(ConfigError::ConflictingLabelField(field.to_string()));
    }

    for (name, metric_map) in &self.metrics {
      if !metric_map.is_info() && metric_map.field().is_empty() {
        return Err(ConfigError::EmptyMetricField(name.clone()));
      }

      let missing_placement = metric_map
        .configuration()
        .is_some_and(|c| c.store_non_mapped_labels && c.non_mapped_labels_placement.is_empty());
      if missing_placement {
        return Err(ConfigError::MissingPlacement(name.clone()));
      }

      for option in metric_map.options() {
        match option {
          MetricOption::MultiplyBuckets { multiplier }
            if !multiplier.is_finite() || *multiplier == 0.0 =>
          {
            return Err(ConfigError::InvalidMultiplier {
              metric: name.clone(),
              multiplier: *multiplier,
            });
          },
          _ => {},
        }
      }
    }

    Ok(())
  }

  // Split metric labels into key labels and plain labels according to the label mappings.
  fn translate_labels(
    &self,
    labels: &LabelSet,
    configuration: Option<&Configuration>,
  ) -> (Fields, Fields) {
    let placement = configuration
      .filter(|c| c.store_non_mapped_labels)
      .map(|c| c.non_mapped_labels_placement.as_str());

    let mut key_labels = Fields::new();
    let mut plain_labels = Fields::new();
    for (name, value) in labels {
      let value = Value::String(value.clone());
      match (self.labels.get(name), placement) {
        (Some(LabelMap::Key { field }), _) => key_labels.put(field, value),
        (Some(LabelMap::Plain { field }), _) => plain_labels.put(field, value),
        (None, Some(placement)) => plain_labels.put(&format!("{placement}.{name}"), value),
        (None, None) => {},
      }
    }
    (key_labels, plain_labels)
  }
}

// Labels with an empty name or value are not carried into documents.
fn label_set(metric: &Metric) -> LabelSet {
  metric
    .labels
    .iter()
    .filter(|l| !l.name.is_empty() && !l.value.is_empty())
    .map(|l| (l.name.clone(), l.value.clone()))
    .collect()
}

struct InfoRecord {
  key_labels: Fields,
  meta: Fields,
}

// Turn metric families into grouped documents. Metrics without a mapping, without a value, or
// dropped by an option never reach a document. Info mappings produce no document of their own:
// their labels are merged into every document that carries all of their key labels.
#[must_use]
pub fn process_metrics(families: &[MetricFamily], mapping: &MetricsMapping) -> Vec<Fields> {
  let mut grouper = EventGrouper::new();
  let mut info_records = Vec::new();

  for family in families {
    let Some(metric_map) = mapping.metric_map(family) else {
      log::trace!("no mapping for metric family '{}'", family.name);
      continue;
    };
    let configuration = metric_map.configuration();

    for metric in &family.metrics {
      let Some(value) = metric_map.value(metric) else {
        continue;
      };

      let mapped = MappedMetric {
        field: metric_map.field().to_string(),
        value,
        labels: label_set(metric),
      };
      let Some(mapped) = metric_map
        .options()
        .iter()
        .try_fold(mapped, |mapped, option| option.apply(mapped))
      else {
        log::trace!("metric of family '{}' dropped by an option", family.name);
        continue;
      };

      let (key_labels, mut labels) = mapping.translate_labels(&mapped.labels, configuration);
      if let Some(configuration) = configuration {
        for (key, value) in &configuration.extra_fields {
          labels.put(key, value.clone());
        }
      }

      if metric_map.is_info() {
        labels.deep_update(key_labels.clone());
        info_records.push(InfoRecord {
          key_labels,
          meta: labels,
        });
        continue;
      }

      if mapped.field.is_empty() {
        continue;
      }

      let mut update = Fields::new();
      update.put(&mapped.field, mapped.value);
      let event = grouper.event_for(&key_labels);
      event.deep_update(update);
      event.deep_update(labels);
    }
  }

  let mut events = grouper.into_events();
  for event in &mut events {
    for (key, value) in &mapping.extra_fields {
      event.insert(key.clone(), Value::String(value.clone()));
    }
  }

  // Every info record is checked against every document, so this is O(documents * info records *
  // key labels). Fine for typical endpoints but a hot spot at high cardinality.
  for record in &info_records {
    let key_labels = record.key_labels.flatten();
    for event in &mut events {
      let matches = key_labels
        .iter()
        .all(|(path, value)| event.get_value(path) == Some(*value));
      if matches {
        event.deep_update(record.meta.clone());
      }
    }
  }

  events
}
