// pulse - bitdrift's observability proxy
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

use crate::client::{Exposition, MockFetcher};
use crate::event::{Event, Fields, Reporter};
use bytes::Bytes;
use serde_json::Value;

pub const OPENMETRICS_CONTENT_TYPE: &str = "application/openmetrics-text; version=1.0.0";
pub const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4";

pub const OPENMETRICS_SAMPLES: &str = r#"# TYPE first_metric gauge
first_metric{label1="value1",label2="value2",label3="Value3",label4="FOO"} 1
# TYPE second_metric gauge
second_metric{label1="value1",label3="othervalue"} 0
# TYPE summary_metric summary
summary_metric{quantile="0.5"} 29735
summary_metric{quantile="0.9"} 47103
summary_metric{quantile="0.99"} 50681
summary_metric_sum 234892394
summary_metric_count 44000
# TYPE histogram_metric histogram
histogram_metric_bucket{le="1000"} 1
histogram_metric_bucket{le="10000"} 1
histogram_metric_bucket{le="100000"} 1
histogram_metric_bucket{le="1e+06"} 1
histogram_metric_bucket{le="1e+08"} 1
histogram_metric_bucket{le="1e+09"} 1
histogram_metric_bucket{le="+Inf"} 1
histogram_metric_sum 117
histogram_metric_count 1
# TYPE histogram_decimal_metric histogram
histogram_decimal_metric_bucket{le="0.001"} 1
histogram_decimal_metric_bucket{le="0.01"} 1
histogram_decimal_metric_bucket{le="0.1"} 2
histogram_decimal_metric_bucket{le="1"} 3
histogram_decimal_metric_bucket{le="+Inf"} 5
histogram_decimal_metric_sum 4.31
histogram_decimal_metric_count 5
# TYPE gaugehistogram_metric gaugehistogram
gaugehistogram_metric_bucket{le="0.01"} 20.0
gaugehistogram_metric_bucket{le="0.1"} 25.0
gaugehistogram_metric_bucket{le="1"} 34.0
gaugehistogram_metric_bucket{le="10"} 34.0
gaugehistogram_metric_bucket{le="+Inf"} 42.0
gaugehistogram_metric_gcount 42.0
gaugehistogram_metric_gsum 3289.3
gaugehistogram_metric_created 1520430000.123
# TYPE target info
target_info 1
# TYPE target_with_labels info
target_with_labels_info{env="prod",hostname="myhost"} 1
"#;

// Documents ordered by their serialized form.
#[must_use]
pub fn sorted(documents: impl IntoIterator<Item = Fields>) -> Vec<Value> {
  let mut documents: Vec<(String, Value)> = documents
    .into_iter()
    .map(|fields| {
      let value = Value::from(fields);
      (value.to_string(), value)
    })
    .collect();
  documents.sort_by(|lhs, rhs| lhs.0.cmp(&rhs.0));
  documents.into_iter().map(|(_, value)| value).collect()
}

//
// CapturingReporter
//

#[derive(Default)]
pub struct CapturingReporter {
  pub events: Vec<Event>,
  // Start refusing events once this many were accepted.
  pub capacity: Option<usize>,
}

impl CapturingReporter {
  #[must_use]
  pub fn closing_after(capacity: usize) -> Self {
    Self {
      events: Vec::new(),
      capacity: Some(capacity),
    }
  }

  #[must_use]
  pub fn sorted_fields(&self) -> Vec<Value> {
    sorted(self.events.iter().map(|event| event.fields.clone()))
  }
}

impl Reporter for CapturingReporter {
  fn event(&mut self, event: Event) -> bool {
    if self.capacity.is_some_and(|capacity| self.events.len() >= capacity) {
      return false;
    }
    self.events.push(event);
    true
  }
}

// A mock fetcher that answers every fetch with the given response.
#[must_use]
pub fn fetcher(status: u16, content_type: Option<&str>, body: &str) -> MockFetcher {
  let exposition = Exposition {
    status,
    content_type: content_type.map(ToString::to_string),
    body: Bytes::copy_from_slice(body.as_bytes()),
  };
  let mut fetcher = MockFetcher::new();
  fetcher
    .expect_fetch()
    .returning(move || Ok(exposition.clone()));
  fetcher
}

#[must_use]
pub fn openmetrics_fetcher(body: &str) -> MockFetcher {
  fetcher(200, Some(OPENMETRICS_CONTENT_TYPE), body)
}

#[must_use]
pub fn prometheus_fetcher(body: &str) -> MockFetcher {
  fetcher(200, Some(PROMETHEUS_CONTENT_TYPE), body)
}
