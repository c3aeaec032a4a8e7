// pulse - bitdrift's observability proxy
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

pub mod reconstruct;

use crate::exposition::{Exemplar, Label, MetricType};
use pulse_common::LossyFloatToInt;
pub use reconstruct::{FamilyReconstructor, parse_metric_families};

// Integer counts cannot carry NaN, infinities or negative values. Such samples leave the count
// unset.
#[must_use]
pub fn count_from_sample(value: f64) -> Option<u64> {
  (value.is_finite() && value >= 0.0).then(|| value.lossy_to_u64())
}

//
// Quantile
//

#[derive(Clone, Debug, PartialEq)]
pub struct Quantile {
  pub quantile: f64,
  pub value: f64,
}

//
// Bucket
//

#[derive(Clone, Debug, PartialEq)]
pub struct Bucket {
  pub upper_bound: f64,
  pub cumulative_count: u64,
  pub exemplar: Option<Exemplar>,
}

//
// SummaryData
//

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SummaryData {
  pub sample_count: Option<u64>,
  pub sample_sum: Option<f64>,
  // Ordered by quantile.
  pub quantiles: Vec<Quantile>,
}

impl SummaryData {
  // Insert keeping quantile order. A repeated quantile replaces the earlier value.
  pub fn insert_quantile(&mut self, quantile: Quantile) {
    match self
      .quantiles
      .binary_search_by(|q| q.quantile.total_cmp(&quantile.quantile))
    {
      Ok(index) => self.quantiles[index] = quantile,
      Err(index) => self.quantiles.insert(index, quantile),
    }
  }
}

//
// HistogramData
//

#[derive(Clone, Debug, Default, PartialEq)]
pub struct HistogramData {
  pub sample_count: Option<u64>,
  pub sample_sum: Option<f64>,
  // Ordered by upper bound.
  pub buckets: Vec<Bucket>,
  pub is_gauge_histogram: bool,
}

impl HistogramData {
  // Insert keeping upper bound order. A repeated bound replaces the earlier bucket.
  pub fn insert_bucket(&mut self, bucket: Bucket) {
    match self
      .buckets
      .binary_search_by(|b| b.upper_bound.total_cmp(&bucket.upper_bound))
    {
      Ok(index) => self.buckets[index] = bucket,
      Err(index) => self.buckets.insert(index, bucket),
    }
  }
}

//
// MetricValue
//

// Exactly one payload per metric.
#[derive(Clone, Debug, PartialEq)]
pub enum MetricValue {
  Gauge(f64),
  Counter(f64),
  Unknown(f64),
  Info(f64),
  Stateset(f64),
  Summary(SummaryData),
  Histogram(HistogramData),
}

impl MetricValue {
  // Info metrics are only meaningful with a value of exactly 1.
  #[must_use]
  pub fn valid_info(&self) -> Option<i64> {
    match self {
      Self::Info(value) if *value == 1.0 => Some(1),
      _ => None,
    }
  }

  // Stateset metrics carry 0 or 1.
  #[must_use]
  pub fn valid_stateset(&self) -> Option<i64> {
    match self {
      Self::Stateset(value) if *value == 0.0 || *value == 1.0 => Some(value.lossy_to_i64()),
      _ => None,
    }
  }

  // The single scalar of gauge, counter, unknown, info and stateset payloads.
  #[must_use]
  pub const fn scalar(&self) -> Option<f64> {
    match self {
      Self::Gauge(value)
      | Self::Counter(value)
      | Self::Unknown(value)
      | Self::Info(value)
      | Self::Stateset(value) => Some(*value),
      Self::Summary(_) | Self::Histogram(_) => None,
    }
  }

  #[must_use]
  pub const fn gauge(&self) -> Option<f64> {
    match self {
      Self::Gauge(value) => Some(*value),
      _ => None,
    }
  }
}

//
// Metric
//

#[derive(Clone, Debug, PartialEq)]
pub struct Metric {
  // Sample labels in textual order. Composite metrics never carry "quantile" or "le".
  pub labels: Vec<Label>,
  pub value: MetricValue,
  pub timestamp_ms: Option<i64>,
  pub exemplar: Option<Exemplar>,
}

impl Metric {
  #[must_use]
  pub const fn new(labels: Vec<Label>, value: MetricValue) -> Self {
    Self {
      labels,
      value,
      timestamp_ms: None,
      exemplar: None,
    }
  }
}

//
// MetricFamily
//

#[derive(Clone, Debug, PartialEq)]
pub struct MetricFamily {
  pub name: String,
  pub help: Option<String>,
  pub unit: Option<String>,
  pub metric_type: MetricType,
  pub metrics: Vec<Metric>,
}

impl MetricFamily {
  #[must_use]
  pub const fn new(name: String, metric_type: MetricType) -> Self {
    Self {
      name,
      help: None,
      unit: None,
      metric_type,
      metrics: Vec::new(),
    }
  }
}
