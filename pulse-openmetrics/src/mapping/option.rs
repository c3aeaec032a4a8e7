// pulse - bitdrift's observability proxy
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./option_test.rs"]
mod option_test;

use super::value::format_float;
use crate::exposition::parser::parse_float;
use pulse_common::LossyFloatToInt;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

// Metric labels by name, as seen by the option pipeline.
pub type LabelSet = BTreeMap<String, String>;

//
// MappedMetric
//

// A metric on its way through the option pipeline.
#[derive(Clone, Debug, PartialEq)]
pub struct MappedMetric {
  pub field: String,
  pub value: Value,
  pub labels: LabelSet,
}

//
// MetricOption
//

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MetricOption {
  // Route the field to "field.<mapped>" using the value of a label. Metrics whose label value is
  // not in the map are dropped.
  Filter {
    label: String,
    filter_map: BTreeMap<String, String>,
  },
  Lowercase,
  // Float seconds since the epoch to an RFC 3339 timestamp. Fractional seconds are truncated.
  UnixTimestamp,
  // Scale histogram bucket bounds and the sum.
  MultiplyBuckets {
    multiplier: f64,
  },
  SetSuffix {
    suffix: String,
  },
  StripPrefix {
    prefix: String,
  },
}

impl MetricOption {
  // Apply the option. None drops the metric.
  #[must_use]
  pub fn apply(&self, mut metric: MappedMetric) -> Option<MappedMetric> {
    match self {
      Self::Filter { label, filter_map } => {
        let mapped = metric.labels.get(label).and_then(|v| filter_map.get(v))?;
        metric.field = format!("{}.{mapped}", metric.field);
      },
      Self::Lowercase => {
        if let Value::String(value) = &mut metric.value {
          *value = value.to_lowercase();
        }
      },
      Self::UnixTimestamp => {
        if let Some(timestamp) = metric.value.as_f64().and_then(unix_seconds_to_rfc3339) {
          metric.value = Value::String(timestamp);
        }
      },
      Self::MultiplyBuckets { multiplier } => {
        if let Value::Object(histogram) = &mut metric.value {
          multiply_buckets(histogram, *multiplier);
        }
      },
      Self::SetSuffix { suffix } => {
        if metric.value.is_f64() {
          metric.field = format!("{}.{suffix}", metric.field);
        }
      },
      Self::StripPrefix { prefix } => {
        metric.labels = std::mem::take(&mut metric.labels)
          .into_iter()
          .map(|(name, value)| match name.strip_prefix(prefix.as_str()) {
            Some(stripped) => (stripped.to_string(), value),
            None => (name, value),
          })
          .collect();
      },
    }

    Some(metric)
  }
}

fn unix_seconds_to_rfc3339(seconds: f64) -> Option<String> {
  if !seconds.is_finite() {
    return None;
  }
  OffsetDateTime::from_unix_timestamp(seconds.trunc().lossy_to_i64())
    .ok()?
    .format(&Rfc3339)
    .ok()
}

fn multiply_buckets(histogram: &mut Map<String, Value>, multiplier: f64) {
  let Some(Value::Object(buckets)) = histogram.get_mut("bucket") else {
    return;
  };

  *buckets = std::mem::take(buckets)
    .into_iter()
    .map(|(bound, count)| match parse_float(&bound) {
      Some(bound) => (format_float(bound * multiplier), count),
      None => (bound, count),
    })
    .collect();

  for key in ["sum", "gsum"] {
    let scaled = histogram
      .get(key)
      .and_then(Value::as_f64)
      .and_then(|sum| serde_json::Number::from_f64(sum * multiplier));
    if let Some(scaled) = scaled {
      histogram.insert(key.to_string(), Value::Number(scaled));
    }
  }
}
