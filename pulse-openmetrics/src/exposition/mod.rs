// pulse - bitdrift's observability proxy
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt


pub mod parser;

pub use parser::{ExpositionParser, parse};
use std::fmt;
use thiserror::Error;

// Accept header sent when scraping. OpenMetrics is preferred, legacy text is the fallback.
pub const ACCEPT_HEADER: &str =
  "application/openmetrics-text; version=1.0.0; charset=utf-8,text/plain";

const OPENMETRICS_MEDIA_TYPE: &str = "application/openmetrics-text";
const TEXT_MEDIA_TYPE: &str = "text/plain";
const TEXT_VERSION: &str = "0.0.4";

//
// ContentType
//

// The two supported text dialects.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ContentType {
  #[default]
  PrometheusText,
  OpenMetricsText,
}

impl ContentType {
  // Resolve a Content-Type header value. Anything that is not a well formed OpenMetrics or
  // version 0.0.4 text header is parsed as legacy text.
  #[must_use]
  pub fn from_header(header: Option<&str>) -> Self {
    let Some(header) = header else {
      log::debug!("no content type, falling back to prometheus text");
      return Self::PrometheusText;
    };

    let media_type = header
      .split(';')
      .next()
      .unwrap_or_default()
      .trim()
      .to_ascii_lowercase();
    let param = |name: &str| {
      header
        .split(';')
        .skip(1)
        .filter_map(|p| p.split_once('='))
        .find(|(k, _)| k.trim().eq_ignore_ascii_case(name))
        .map(|(_, v)| v.trim().trim_matches('"').to_string())
    };

    match media_type.as_str() {
      OPENMETRICS_MEDIA_TYPE => match param("encoding") {
        Some(encoding) if encoding != "delimited" => {
          log::debug!("unsupported openmetrics encoding '{encoding}', falling back to prometheus text");
          Self::PrometheusText
        },
        _ => Self::OpenMetricsText,
      },
      TEXT_MEDIA_TYPE => {
        if let Some(version) = param("version").filter(|v| v != TEXT_VERSION) {
          log::debug!("unsupported text version '{version}', parsing as prometheus text");
        }
        Self::PrometheusText
      },
      other => {
        log::debug!("unknown content type '{other}', falling back to prometheus text");
        Self::PrometheusText
      },
    }
  }

  #[must_use]
  pub const fn is_openmetrics(self) -> bool {
    matches!(self, Self::OpenMetricsText)
  }
}

//
// MetricType
//

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum MetricType {
  Gauge,
  Counter,
  Summary,
  Histogram,
  GaugeHistogram,
  Info,
  Stateset,
  #[default]
  Unknown,
}

impl MetricType {
  // Resolve the type token of a "# TYPE" line. The legacy dialect only knows the classic four
  // types plus "untyped".
  #[must_use]
  pub fn from_token(token: &str, content_type: ContentType) -> Option<Self> {
    match (token, content_type) {
      ("counter", _) => Some(Self::Counter),
      ("gauge", _) => Some(Self::Gauge),
      ("histogram", _) => Some(Self::Histogram),
      ("summary", _) => Some(Self::Summary),
      ("untyped", ContentType::PrometheusText)
      | ("unknown", ContentType::OpenMetricsText) => Some(Self::Unknown),
      ("gaugehistogram", ContentType::OpenMetricsText) => Some(Self::GaugeHistogram),
      ("info", ContentType::OpenMetricsText) => Some(Self::Info),
      ("stateset", ContentType::OpenMetricsText) => Some(Self::Stateset),
      _ => None,
    }
  }

  #[must_use]
  pub const fn as_str(self) -> &'static str {
    match self {
      Self::Gauge => "gauge",
      Self::Counter => "counter",
      Self::Summary => "summary",
      Self::Histogram => "histogram",
      Self::GaugeHistogram => "gaugehistogram",
      Self::Info => "info",
      Self::Stateset => "stateset",
      Self::Unknown => "unknown",
    }
  }
}

impl fmt::Display for MetricType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

//
// Label
//

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Label {
  pub name: String,
  pub value: String,
}

impl Label {
  pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      value: value.into(),
    }
  }
}

// Find the value of a label by name.
#[must_use]
pub fn label_value<'a>(labels: &'a [Label], name: &str) -> Option<&'a str> {
  labels
    .iter()
    .find(|l| l.name == name)
    .map(|l| l.value.as_str())
}

//
// Exemplar
//

#[derive(Clone, Debug, PartialEq)]
pub struct Exemplar {
  pub labels: Vec<Label>,
  pub value: f64,
  pub timestamp_ms: Option<i64>,
}

//
// Sample
//

#[derive(Clone, Debug, PartialEq)]
pub struct Sample {
  pub name: String,
  pub labels: Vec<Label>,
  pub value: f64,
  pub timestamp_ms: Option<i64>,
  pub exemplar: Option<Exemplar>,
}

//
// Entry
//

// One meaningful line of an exposition payload. Comments and blank lines produce no entry.
#[derive(Clone, Debug, PartialEq)]
pub enum Entry {
  Type { name: String, metric_type: MetricType },
  Help { name: String, text: String },
  Unit { name: String, unit: String },
  Sample(Sample),
}

// Errors that arise while parsing a single exposition line. The parser reports the error and
// moves on to the next line.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
  #[error("line is not valid utf-8")]
  InvalidUtf8,
  #[error("invalid metric name")]
  InvalidMetricName,
  #[error("invalid label set")]
  InvalidLabels,
  #[error("duplicate label '{0}'")]
  DuplicateLabel(String),
  #[error("invalid sample value")]
  InvalidValue,
  #[error("invalid timestamp")]
  InvalidTimestamp,
  #[error("invalid exemplar")]
  InvalidExemplar,
  #[error("unexpected trailing data")]
  TrailingData,
  #[error("invalid metric type '{metric_type}' for '{name}'")]
  InvalidMetricType { name: String, metric_type: String },
}
