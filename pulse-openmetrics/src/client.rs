// pulse - bitdrift's observability proxy
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./client_test.rs"]
mod client_test;

use crate::config::{CollectorConfig, ConfigError};
use crate::event::{Fields, Reporter, report_all};
use crate::exposition::{ACCEPT_HEADER, ContentType};
use crate::family::{MetricFamily, parse_metric_families};
use crate::filter::MetricsFilter;
use crate::mapping::{MetricsMapping, process_metrics};
use crate::typed::TypedGenerator;
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use std::time::Duration;
use thiserror::Error;

//
// FetchError
//

// Errors that abort a collection cycle. Nothing is reported for a failed cycle.
#[derive(Error, Debug)]
pub enum FetchError {
  #[error("unexpected status code {0} from server")]
  Status(u16),
  #[error("transport error: {0}")]
  Transport(String),
}

//
// Exposition
//

// A fetched, already decompressed, exposition payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Exposition {
  pub status: u16,
  pub content_type: Option<String>,
  pub body: Bytes,
}

//
// Fetcher
//

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Fetcher: Send + Sync {
  async fn fetch(&self) -> Result<Exposition, FetchError>;
}

//
// HttpFetcher
//

// Fetches an endpoint over HTTP, negotiating OpenMetrics first. Gzip bodies are decoded by the
// client.
pub struct HttpFetcher {
  client: reqwest::Client,
  url: String,
}

impl HttpFetcher {
  pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, FetchError> {
    let client = reqwest::Client::builder()
      .gzip(true)
      .timeout(timeout)
      .build()
      .map_err(|e| FetchError::Transport(e.to_string()))?;
    Ok(Self {
      client,
      url: url.into(),
    })
  }
}

#[async_trait]
impl Fetcher for HttpFetcher {
  async fn fetch(&self) -> Result<Exposition, FetchError> {
    let response = self
      .client
      .get(&self.url)
      .header(ACCEPT, ACCEPT_HEADER)
      .send()
      .await
      .map_err(|e| FetchError::Transport(e.to_string()))?;

    let status = response.status().as_u16();
    let content_type = response
      .headers()
      .get(CONTENT_TYPE)
      .and_then(|value| value.to_str().ok())
      .map(ToString::to_string);
    let body = response
      .bytes()
      .await
      .map_err(|e| FetchError::Transport(e.to_string()))?;

    Ok(Exposition {
      status,
      content_type,
      body,
    })
  }
}

//
// OpenMetricsClient
//

pub struct OpenMetricsClient<F> {
  fetcher: F,
  filter: MetricsFilter,
}

impl<F: Fetcher> OpenMetricsClient<F> {
  pub fn new(fetcher: F) -> Self {
    Self::with_filter(fetcher, MetricsFilter::default())
  }

  pub fn with_filter(fetcher: F, filter: MetricsFilter) -> Self {
    Self { fetcher, filter }
  }

  // Fetch and parse the endpoint. Families dropped by the filter are not returned.
  pub async fn get_families(&self) -> Result<Vec<MetricFamily>, FetchError> {
    let exposition = self.fetcher.fetch().await?;
    if exposition.status >= 400 {
      log::debug!(
        "error received from openmetrics endpoint: {}",
        String::from_utf8_lossy(&exposition.body)
      );
      return Err(FetchError::Status(exposition.status));
    }

    let content_type = ContentType::from_header(exposition.content_type.as_deref());
    let families = parse_metric_families(&exposition.body, content_type);
    log::trace!(
      "parsed {} metric families from a {} byte payload",
      families.len(),
      exposition.body.len()
    );
    Ok(self.filter.filter(families))
  }

  #[must_use]
  pub fn process_metrics(
    &self,
    families: &[MetricFamily],
    mapping: &MetricsMapping,
  ) -> Vec<Fields> {
    process_metrics(families, mapping)
  }

  pub async fn get_processed_metrics(
    &self,
    mapping: &MetricsMapping,
  ) -> Result<Vec<Fields>, FetchError> {
    let families = self.get_families().await?;
    Ok(self.process_metrics(&families, mapping))
  }

  // Fetch, map and report. Returns how many documents the reporter accepted.
  pub async fn report_processed_metrics(
    &self,
    mapping: &MetricsMapping,
    reporter: &mut impl Reporter,
  ) -> Result<usize, FetchError> {
    let documents = self.get_processed_metrics(mapping).await?;
    Ok(report_all(&mapping.namespace, documents, reporter))
  }

  pub async fn report_typed_metrics(
    &self,
    generator: &TypedGenerator,
    namespace: &str,
    reporter: &mut impl Reporter,
  ) -> Result<usize, FetchError> {
    let families = self.get_families().await?;
    Ok(report_all(namespace, generator.generate(&families), reporter))
  }
}

//
// Collector
//

// A configured collection loop body: typed documents when types are enabled, mapped documents
// otherwise.
pub struct Collector<F> {
  client: OpenMetricsClient<F>,
  config: CollectorConfig,
  typed: Option<TypedGenerator>,
}

impl<F: Fetcher> Collector<F> {
  pub fn new(fetcher: F, config: CollectorConfig) -> Result<Self, ConfigError> {
    config.validate()?;
    let client = OpenMetricsClient::with_filter(fetcher, config.filter()?);
    let typed = config
      .use_types
      .then(|| config.typed_generator(config.counter_cache()));
    Ok(Self {
      client,
      config,
      typed,
    })
  }

  #[must_use]
  pub const fn client(&self) -> &OpenMetricsClient<F> {
    &self.client
  }

  pub fn start(&self) {
    if let Some(typed) = &self.typed {
      typed.start();
    }
  }

  pub async fn stop(&self) {
    if let Some(typed) = &self.typed {
      typed.stop().await;
    }
  }

  pub async fn collect(&self, reporter: &mut impl Reporter) -> Result<usize, FetchError> {
    match &self.typed {
      Some(typed) => {
        self
          .client
          .report_typed_metrics(typed, &self.config.namespace, reporter)
          .await
      },
      None => {
        self
          .client
          .report_processed_metrics(&self.config.mapping, reporter)
          .await
      },
    }
  }
}
