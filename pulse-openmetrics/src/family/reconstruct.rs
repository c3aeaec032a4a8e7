// pulse - bitdrift's observability proxy
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./reconstruct_test.rs"]
mod reconstruct_test;

use super::{
  Bucket,
  HistogramData,
  Metric,
  MetricFamily,
  MetricValue,
  Quantile,
  SummaryData,
  count_from_sample,
};
use crate::exposition::parser::parse_float;
use crate::exposition::{ContentType, Entry, Label, MetricType, ParseError, Sample, parse};
use hashbrown::{HashMap, HashSet};

const QUANTILE_LABEL: &str = "quantile";
const BUCKET_LABEL: &str = "le";

const SUFFIX_TOTAL: &str = "_total";
const SUFFIX_CREATED: &str = "_created";
const SUFFIX_INFO: &str = "_info";
const SUFFIX_COUNT: &str = "_count";
const SUFFIX_SUM: &str = "_sum";
const SUFFIX_GCOUNT: &str = "_gcount";
const SUFFIX_GSUM: &str = "_gsum";
const SUFFIX_BUCKET: &str = "_bucket";

const ALL_SUFFIXES: [&str; 8] = [
  SUFFIX_TOTAL,
  SUFFIX_CREATED,
  SUFFIX_INFO,
  SUFFIX_COUNT,
  SUFFIX_SUM,
  SUFFIX_GCOUNT,
  SUFFIX_GSUM,
  SUFFIX_BUCKET,
];

// Logical metric name plus its label set without "quantile"/"le", sorted by label name.
type CompositeKey = (String, Vec<Label>);

enum Slot {
  Direct(Metric),
  Composite(usize),
}

struct FamilyBuilder {
  family: MetricFamily,
  slots: Vec<Slot>,
}

struct Composite {
  metric: Option<Metric>,
  emitted: bool,
}

// Which part of a composite metric a sample carries.
enum CompositePart {
  Count(f64),
  Sum(f64),
  Quantile(Quantile),
  Bucket(f64, f64),
}

impl CompositePart {
  const fn closes(&self) -> bool {
    matches!(self, Self::Sum(_))
  }
}

//
// FamilyReconstructor
//

// Folds a stream of exposition entries into metric families. Summary, histogram and
// gauge-histogram samples are stitched together per (logical name, label set) in an arena that
// lives for one payload. A composite is appended to its family once, when its sum sample is seen;
// samples arriving afterwards still merge into it.
pub struct FamilyReconstructor {
  content_type: ContentType,
  families: Vec<FamilyBuilder>,
  families_by_name: HashMap<String, usize, ahash::RandomState>,
  composites: Vec<Composite>,
  composites_by_key: HashMap<CompositeKey, usize, ahash::RandomState>,
  rejected_types: HashSet<String, ahash::RandomState>,
  current_type: MetricType,
}

impl FamilyReconstructor {
  #[must_use]
  pub fn new(content_type: ContentType) -> Self {
    Self {
      content_type,
      families: Vec::new(),
      families_by_name: HashMap::default(),
      composites: Vec::new(),
      composites_by_key: HashMap::default(),
      rejected_types: HashSet::default(),
      current_type: MetricType::Unknown,
    }
  }

  pub fn push(&mut self, entry: Result<Entry, ParseError>) {
    match entry {
      Ok(Entry::Type { name, metric_type }) => {
        self.rejected_types.remove(&name);
        let index = self.family_for_metadata(name);
        self.families[index].family.metric_type = metric_type;
        self.current_type = metric_type;
      },
      Ok(Entry::Help { name, text }) => {
        let index = self.family_for_metadata(name);
        self.families[index].family.help = Some(text);
      },
      Ok(Entry::Unit { name, unit }) => {
        let index = self.family_for_metadata(name);
        self.families[index].family.unit = Some(unit);
      },
      Ok(Entry::Sample(sample)) => self.push_sample(sample),
      Err(ParseError::InvalidMetricType { name, metric_type }) => {
        log::debug!("ignored invalid metric type '{metric_type}' for '{name}'");
        self.rejected_types.insert(name);
      },
      Err(e) => log::debug!("skipping malformed exposition line: {e}"),
    }
  }

  // Resolve every emitted composite and return families in first seen order. Families that ended
  // up without metrics are dropped.
  #[must_use]
  pub fn finish(mut self) -> Vec<MetricFamily> {
    let mut families = Vec::with_capacity(self.families.len());
    for builder in self.families {
      let mut family = builder.family;
      family.metrics = builder
        .slots
        .into_iter()
        .filter_map(|slot| match slot {
          Slot::Direct(metric) => Some(metric),
          Slot::Composite(index) => self.composites[index].metric.take(),
        })
        .collect();
      if !family.metrics.is_empty() {
        families.push(family);
      }
    }
    families
  }

  fn family_for_metadata(&mut self, name: String) -> usize {
    if let Some(index) = self.families_by_name.get(&name) {
      return *index;
    }
    self.new_family(name, MetricType::Unknown)
  }

  fn new_family(&mut self, name: String, metric_type: MetricType) -> usize {
    let index = self.families.len();
    self.families_by_name.insert(name.clone(), index);
    self.families.push(FamilyBuilder {
      family: MetricFamily::new(name, metric_type),
      slots: Vec::new(),
    });
    index
  }

  // The family a sample belongs to: the suffix stripped name, then the raw sample name, then a
  // new family named after the sample.
  fn family_for_sample(&mut self, lookup_name: &str, sample_name: &str) -> usize {
    if let Some(index) = self.families_by_name.get(lookup_name) {
      return *index;
    }
    if let Some(index) = self.families_by_name.get(sample_name) {
      return *index;
    }
    self.new_family(sample_name.to_string(), self.current_type)
  }

  fn is_rejected(&self, name: &str) -> bool {
    if self.rejected_types.is_empty() {
      return false;
    }
    self.rejected_types.contains(name)
      || ALL_SUFFIXES.iter().any(|suffix| {
        name
          .strip_suffix(suffix)
          .is_some_and(|base| self.rejected_types.contains(base))
      })
  }

  fn push_sample(&mut self, sample: Sample) {
    if self.is_rejected(&sample.name) {
      log::trace!("skipping sample '{}' of a rejected type", sample.name);
      return;
    }

    let openmetrics = self.content_type.is_openmetrics();
    let value = sample.value;
    match self.current_type {
      MetricType::Counter => {
        let lookup_name = if openmetrics {
          match sample.name.strip_suffix(SUFFIX_TOTAL) {
            Some(base) => base.to_string(),
            None => {
              log::trace!("skipping counter sample '{}' without _total", sample.name);
              return;
            },
          }
        } else {
          sample.name.clone()
        };
        self.push_direct(&lookup_name, sample, MetricValue::Counter(value));
      },
      MetricType::Gauge => {
        let lookup_name = sample.name.clone();
        self.push_direct(&lookup_name, sample, MetricValue::Gauge(value));
      },
      MetricType::Unknown => {
        let lookup_name = sample.name.clone();
        self.push_direct(&lookup_name, sample, MetricValue::Unknown(value));
      },
      MetricType::Stateset => {
        let lookup_name = sample.name.clone();
        self.push_direct(&lookup_name, sample, MetricValue::Stateset(value));
      },
      MetricType::Info => {
        let Some(base) = sample.name.strip_suffix(SUFFIX_INFO) else {
          log::trace!("skipping info sample '{}' without _info", sample.name);
          return;
        };
        let lookup_name = base.to_string();
        self.push_direct(&lookup_name, sample, MetricValue::Info(value));
      },
      MetricType::Summary => self.push_summary(sample),
      MetricType::Histogram => self.push_histogram(sample, false),
      MetricType::GaugeHistogram => self.push_histogram(sample, true),
    }
  }

  fn push_direct(&mut self, lookup_name: &str, sample: Sample, value: MetricValue) {
    let index = self.family_for_sample(lookup_name, &sample.name);
    self.families[index].slots.push(Slot::Direct(Metric {
      labels: sample.labels,
      value,
      timestamp_ms: sample.timestamp_ms,
      exemplar: sample.exemplar,
    }));
  }

  fn push_summary(&mut self, sample: Sample) {
    if sample.name.ends_with(SUFFIX_CREATED) {
      return;
    }

    let (logical_name, part) = if let Some(base) = sample.name.strip_suffix(SUFFIX_COUNT) {
      (base, CompositePart::Count(sample.value))
    } else if let Some(base) = sample.name.strip_suffix(SUFFIX_SUM) {
      (base, CompositePart::Sum(sample.value))
    } else {
      let Some(quantile) = label_float(&sample.labels, QUANTILE_LABEL) else {
        log::trace!("skipping summary sample '{}' without a quantile", sample.name);
        return;
      };
      (
        sample.name.as_str(),
        CompositePart::Quantile(Quantile {
          quantile,
          value: sample.value,
        }),
      )
    };
    let logical_name = logical_name.to_string();

    let empty = || MetricValue::Summary(SummaryData::default());
    self.merge_composite(logical_name, sample, part, empty);
  }

  fn push_histogram(&mut self, sample: Sample, is_gauge_histogram: bool) {
    if sample.name.ends_with(SUFFIX_CREATED) {
      return;
    }

    let (count_suffix, sum_suffix) = if is_gauge_histogram {
      (SUFFIX_GCOUNT, SUFFIX_GSUM)
    } else {
      (SUFFIX_COUNT, SUFFIX_SUM)
    };
    let bucket_bound = || label_float(&sample.labels, BUCKET_LABEL);

    let (logical_name, part) = if let Some(base) = sample.name.strip_suffix(count_suffix) {
      (base, CompositePart::Count(sample.value))
    } else if let Some(base) = sample.name.strip_suffix(sum_suffix) {
      (base, CompositePart::Sum(sample.value))
    } else if let Some(base) = sample.name.strip_suffix(SUFFIX_BUCKET) {
      let Some(upper_bound) = bucket_bound() else {
        log::trace!("skipping bucket '{}' without a valid bound", sample.name);
        return;
      };
      (base, CompositePart::Bucket(upper_bound, sample.value))
    } else if let Some(upper_bound) = bucket_bound() {
      (
        sample.name.as_str(),
        CompositePart::Bucket(upper_bound, sample.value),
      )
    } else {
      log::trace!("skipping histogram sample '{}'", sample.name);
      return;
    };
    let logical_name = logical_name.to_string();

    let empty = || {
      MetricValue::Histogram(HistogramData {
        is_gauge_histogram,
        ..Default::default()
      })
    };
    self.merge_composite(logical_name, sample, part, empty);
  }

  fn merge_composite(
    &mut self,
    logical_name: String,
    sample: Sample,
    part: CompositePart,
    empty: impl FnOnce() -> MetricValue,
  ) {
    let labels: Vec<Label> = sample
      .labels
      .into_iter()
      .filter(|l| l.name != QUANTILE_LABEL && l.name != BUCKET_LABEL)
      .collect();
    let mut sorted_labels = labels.clone();
    sorted_labels.sort_unstable();

    let key = (logical_name, sorted_labels);
    let index = if let Some(index) = self.composites_by_key.get(&key) {
      *index
    } else {
      let index = self.composites.len();
      self.composites.push(Composite {
        metric: Some(Metric::new(labels, empty())),
        emitted: false,
      });
      self.composites_by_key.insert(key.clone(), index);
      index
    };

    let closes = part.closes();
    let Some(metric) = self.composites[index].metric.as_mut() else {
      return;
    };
    if sample.timestamp_ms.is_some() {
      metric.timestamp_ms = sample.timestamp_ms;
    }

    match (&mut metric.value, part) {
      (MetricValue::Summary(summary), CompositePart::Count(value)) => {
        summary.sample_count = count_from_sample(value);
      },
      (MetricValue::Summary(summary), CompositePart::Sum(value)) => {
        summary.sample_sum = Some(value);
      },
      (MetricValue::Summary(summary), CompositePart::Quantile(quantile)) => {
        summary.insert_quantile(quantile);
        if sample.exemplar.is_some() {
          metric.exemplar = sample.exemplar;
        }
      },
      (MetricValue::Histogram(histogram), CompositePart::Count(value)) => {
        histogram.sample_count = count_from_sample(value);
      },
      (MetricValue::Histogram(histogram), CompositePart::Sum(value)) => {
        histogram.sample_sum = Some(value);
      },
      (MetricValue::Histogram(histogram), CompositePart::Bucket(upper_bound, value)) => {
        match count_from_sample(value) {
          Some(cumulative_count) => histogram.insert_bucket(Bucket {
            upper_bound,
            cumulative_count,
            exemplar: sample.exemplar,
          }),
          None => log::trace!("dropping bucket {upper_bound} with count {value}"),
        }
      },
      _ => {},
    }

    if closes && !self.composites[index].emitted {
      self.composites[index].emitted = true;
      let sample_name = sample.name;
      let family = self.family_for_sample(&key.0, &sample_name);
      self.families[family].slots.push(Slot::Composite(index));
    }
  }
}

fn label_float(labels: &[Label], name: &str) -> Option<f64> {
  labels
    .iter()
    .find(|l| l.name == name)
    .and_then(|l| parse_float(&l.value))
}

// Parse a complete payload into metric families. The result only depends on the input.
#[must_use]
pub fn parse_metric_families(input: &[u8], content_type: ContentType) -> Vec<MetricFamily> {
  let mut reconstructor = FamilyReconstructor::new(content_type);
  for entry in parse(input, content_type) {
    reconstructor.push(entry);
  }
  reconstructor.finish()
}
