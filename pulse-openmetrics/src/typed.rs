// pulse - bitdrift's observability proxy
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./typed_test.rs"]
mod typed_test;

use crate::counter_cache::CounterCache;
use crate::event::{EventGrouper, Fields};
use crate::family::{HistogramData, Metric, MetricFamily, MetricValue, SummaryData};
use crate::label_hash::LabelHasher;
use crate::mapping::value::format_float;
use serde_json::{Map, Value};
use std::sync::Arc;

const QUANTILE_LABEL: &str = "quantile";

fn float_value(value: f64) -> Option<Value> {
  serde_json::Number::from_f64(value).map(Value::Number)
}

// Labels of a metric as a document key. Empty names and values are skipped.
fn key_labels(metric: &Metric, extra: Option<(&str, String)>) -> Fields {
  let mut labels: Map<String, Value> = metric
    .labels
    .iter()
    .filter(|l| !l.name.is_empty() && !l.value.is_empty())
    .map(|l| (l.name.clone(), Value::String(l.value.clone())))
    .collect();
  if let Some((name, value)) = extra {
    labels.insert(name.to_string(), Value::String(value));
  }

  let mut key = Fields::new();
  key.insert("labels".to_string(), Value::Object(labels));
  key
}

fn single(name: &str, field: &str, value: Value) -> Fields {
  let mut inner = Map::new();
  inner.insert(field.to_string(), value);
  let mut update = Fields::new();
  update.insert(name.to_string(), Value::Object(inner));
  update
}

//
// TypedGenerator
//

// Turns metric families into one document per distinct label set, keeping each metric's type:
// counters carry their value and rate, gauges their value, histograms their bucket centroids and
// per bucket counts. Rates come from a counter cache shared across cycles.
pub struct TypedGenerator {
  rate_counters: bool,
  cache: Arc<CounterCache>,
}

impl TypedGenerator {
  #[must_use]
  pub const fn new(rate_counters: bool, cache: Arc<CounterCache>) -> Self {
    Self {
      rate_counters,
      cache,
    }
  }

  #[must_use]
  pub const fn cache(&self) -> &Arc<CounterCache> {
    &self.cache
  }

  // Start expiring idle counters. Nothing to do when rates are disabled.
  pub fn start(&self) {
    if self.rate_counters {
      self.cache.start();
    }
  }

  pub async fn stop(&self) {
    self.cache.stop().await;
  }

  #[must_use]
  pub fn generate(&self, families: &[MetricFamily]) -> Vec<Fields> {
    let mut cycle = Cycle {
      generator: self,
      grouper: EventGrouper::new(),
      hasher: LabelHasher::new(),
    };
    for family in families {
      for metric in &family.metrics {
        cycle.metric(&family.name, metric);
      }
    }
    cycle.grouper.into_events()
  }
}

// State for one generate() call.
struct Cycle<'a> {
  generator: &'a TypedGenerator,
  grouper: EventGrouper,
  hasher: LabelHasher,
}

impl Cycle<'_> {
  fn metric(&mut self, name: &str, metric: &Metric) {
    match &metric.value {
      MetricValue::Counter(value) => self.counter(name, metric, *value),
      MetricValue::Gauge(value) | MetricValue::Unknown(value) => {
        if let Some(value) = float_value(*value) {
          self.merge(metric, None, single(name, "value", value));
        }
      },
      MetricValue::Info(_) | MetricValue::Stateset(_) => {
        if let Some(value) = metric
          .value
          .valid_info()
          .or_else(|| metric.value.valid_stateset())
        {
          self.merge(metric, None, single(name, "value", Value::from(value)));
        }
      },
      MetricValue::Summary(summary) => self.summary(name, metric, summary),
      MetricValue::Histogram(histogram) => self.histogram(name, metric, histogram),
    }
  }

  fn merge(&mut self, metric: &Metric, extra_label: Option<(&str, String)>, update: Fields) {
    let key = key_labels(metric, extra_label);
    self.grouper.merge(&key, update);
  }

  // Cache key for a counter: its name and the fingerprint of its labels.
  fn rate_key(&mut self, name: &str, metric: &Metric) -> String {
    let hash = self.hasher.hash_str(
      metric
        .labels
        .iter()
        .map(|l| (l.name.as_str(), l.value.as_str())),
    );
    format!("{name}{hash:016x}")
  }

  fn counter_fields(&mut self, name: &str, metric: &Metric, counter: Value, rate: Option<Value>) {
    let mut inner = Map::new();
    inner.insert("counter".to_string(), counter);
    if let Some(rate) = rate {
      inner.insert("rate".to_string(), rate);
    }
    let mut update = Fields::new();
    update.insert(name.to_string(), Value::Object(inner));
    self.merge(metric, None, update);
  }

  fn counter(&mut self, name: &str, metric: &Metric, value: f64) {
    let Some(counter) = float_value(value) else {
      return;
    };
    let rate = if self.generator.rate_counters {
      let key = self.rate_key(name, metric);
      float_value(self.generator.cache.rate_f64(&key, value))
    } else {
      None
    };
    self.counter_fields(name, metric, counter, rate);
  }

  fn summary(&mut self, name: &str, metric: &Metric, summary: &SummaryData) {
    if let Some(sum) = summary.sample_sum.and_then(float_value) {
      let sum_name = format!("{name}_sum");
      let rate = if self.generator.rate_counters {
        let key = self.rate_key(&sum_name, metric);
        summary
          .sample_sum
          .and_then(|sum| float_value(self.generator.cache.rate_f64(&key, sum)))
      } else {
        None
      };
      self.counter_fields(&sum_name, metric, sum, rate);

      if let Some(count) = summary.sample_count {
        let count_name = format!("{name}_count");
        let rate = if self.generator.rate_counters {
          let key = self.rate_key(&count_name, metric);
          Some(Value::from(self.generator.cache.rate_u64(&key, count)))
        } else {
          None
        };
        self.counter_fields(&count_name, metric, Value::from(count), rate);
      }
    }

    for quantile in &summary.quantiles {
      let Some(value) = float_value(quantile.value) else {
        continue;
      };
      self.merge(
        metric,
        Some((QUANTILE_LABEL, format_float(quantile.quantile))),
        single(name, "value", value),
      );
    }
  }

  fn histogram(&mut self, name: &str, metric: &Metric, histogram: &HistogramData) {
    if histogram.buckets.is_empty() {
      return;
    }

    let rated = self.generator.rate_counters && !histogram.is_gauge_histogram;
    let key = if rated {
      self.rate_key(name, metric)
    } else {
      String::new()
    };

    let mut values = Vec::with_capacity(histogram.buckets.len());
    let mut counts = Vec::with_capacity(histogram.buckets.len());
    let mut last_upper = 0.0;
    let mut prev_upper = 0.0;
    let mut sum_count: u64 = 0;
    let mut prev_count: u64 = 0;

    for bucket in &histogram.buckets {
      // The +Inf bucket is reported as a point past the last bound.
      let centroid = if bucket.upper_bound == f64::INFINITY {
        last_upper + (last_upper - prev_upper)
      } else {
        let centroid = last_upper + (bucket.upper_bound - last_upper) / 2.0;
        prev_upper = last_upper;
        last_upper = bucket.upper_bound;
        centroid
      };
      let Some(centroid) = float_value(centroid) else {
        continue;
      };
      values.push(centroid);

      let cumulative = bucket.cumulative_count;
      if rated {
        let bucket_key = format!("{key}{}", format_float(bucket.upper_bound));
        match self.generator.cache.try_rate_u64(&bucket_key, cumulative) {
          // New bucket. Count it as zero but keep the running sum so later buckets are
          // de-accumulated correctly.
          None => {
            counts.push(0);
            sum_count = sum_count.saturating_add(cumulative.saturating_sub(prev_count));
          },
          Some(rate) if rate < sum_count => counts.push(0),
          Some(rate) => {
            counts.push(rate - sum_count);
            sum_count = rate;
          },
        }
      } else {
        counts.push(cumulative.saturating_sub(prev_count));
      }
      prev_count = cumulative;
    }

    let mut inner = Map::new();
    inner.insert("values".to_string(), Value::Array(values));
    inner.insert(
      "counts".to_string(),
      Value::Array(counts.into_iter().map(Value::from).collect()),
    );
    self.merge(
      metric,
      None,
      single(name, "histogram", Value::Object(inner)),
    );
  }
}
