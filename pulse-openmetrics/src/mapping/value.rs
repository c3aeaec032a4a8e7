// pulse - bitdrift's observability proxy
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./value_test.rs"]
mod value_test;

use crate::family::{HistogramData, MetricValue, SummaryData};
use pulse_common::LossyFloatToInt;
use serde_json::{Map, Value};

// Render a float the way map keys expect it: shortest round trip representation without an
// exponent, and "+Inf", "-Inf", "NaN" for the special values.
#[must_use]
pub fn format_float(value: f64) -> String {
  if value.is_nan() {
    "NaN".to_string()
  } else if value == f64::INFINITY {
    "+Inf".to_string()
  } else if value == f64::NEG_INFINITY {
    "-Inf".to_string()
  } else {
    format!("{value}")
  }
}

fn float_value(value: f64) -> Option<Value> {
  serde_json::Number::from_f64(value).map(Value::Number)
}

// The value produced by plain field mappings. The first populated payload wins, in the order
// info, stateset, unknown, counter, gauge, summary, histogram. Non-finite scalars produce nothing.
#[must_use]
pub fn common_value(value: &MetricValue) -> Option<Value> {
  if let Some(info) = value.valid_info() {
    return Some(Value::from(info));
  }
  if let Some(state) = value.valid_stateset() {
    return Some(Value::from(state));
  }

  match value {
    MetricValue::Unknown(v) | MetricValue::Gauge(v) if v.is_finite() => float_value(*v),
    MetricValue::Counter(v) if v.is_finite() => {
      if v.fract() == 0.0 {
        Some(Value::from(v.lossy_to_i64()))
      } else {
        float_value(*v)
      }
    },
    MetricValue::Summary(summary) => summary_value(summary),
    MetricValue::Histogram(histogram) => histogram_value(histogram),
    _ => None,
  }
}

fn summary_value(summary: &SummaryData) -> Option<Value> {
  let mut value = Map::new();
  if let Some(sum) = summary.sample_sum.filter(|sum| sum.is_finite()) {
    value.insert("sum".to_string(), float_value(sum)?);
    if let Some(count) = summary.sample_count {
      value.insert("count".to_string(), Value::from(count));
    }
  }

  let percentiles: Map<String, Value> = summary
    .quantiles
    .iter()
    .filter(|q| q.value.is_finite())
    .filter_map(|q| Some((format_float(100.0 * q.quantile), float_value(q.value)?)))
    .collect();
  if !percentiles.is_empty() {
    value.insert("percentile".to_string(), Value::Object(percentiles));
  }

  (!value.is_empty()).then_some(Value::Object(value))
}

fn histogram_value(histogram: &HistogramData) -> Option<Value> {
  let (sum_key, count_key) = if histogram.is_gauge_histogram {
    ("gsum", "gcount")
  } else {
    ("sum", "count")
  };

  let mut value = Map::new();
  if let Some(sum) = histogram.sample_sum.filter(|sum| sum.is_finite()) {
    value.insert(sum_key.to_string(), float_value(sum)?);
    if let Some(count) = histogram.sample_count {
      value.insert(count_key.to_string(), Value::from(count));
    }
  }

  let buckets: Map<String, Value> = histogram
    .buckets
    .iter()
    .map(|b| (format_float(b.upper_bound), Value::from(b.cumulative_count)))
    .collect();
  if !buckets.is_empty() {
    value.insert("bucket".to_string(), Value::Object(buckets));
  }

  (!value.is_empty()).then_some(Value::Object(value))
}

// Finite gauges only.
fn finite_gauge(value: &MetricValue) -> Option<f64> {
  value.gauge().filter(|v| v.is_finite())
}

#[must_use]
pub fn keyword_value(value: &MetricValue, keyword: &str) -> Option<Value> {
  (finite_gauge(value)? == 1.0).then(|| Value::String(keyword.to_string()))
}

#[must_use]
pub fn boolean_value(value: &MetricValue) -> Option<Value> {
  Some(Value::Bool(finite_gauge(value)? == 1.0))
}

// The value of another label of the same metric, only when the gauge is set.
#[must_use]
pub fn label_value(value: &MetricValue, label: Option<&str>) -> Option<Value> {
  if finite_gauge(value)? != 1.0 {
    return None;
  }
  label.map(|label| Value::String(label.to_string()))
}
