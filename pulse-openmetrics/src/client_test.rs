// pulse - bitdrift's observability proxy
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

use super::*;
use crate::counter_cache::CounterCache;
use crate::filter::MetricsFilterConfig;
use crate::mapping::{LabelMap, MetricMap};
use crate::test::{
  CapturingReporter,
  OPENMETRICS_SAMPLES,
  fetcher,
  openmetrics_fetcher,
  prometheus_fetcher,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

fn first_and_second() -> MetricsMapping {
  MetricsMapping {
    metrics: [
      ("first_metric".to_string(), MetricMap::common("first.metric")),
      (
        "second_metric".to_string(),
        MetricMap::common("second.metric"),
      ),
    ]
    .into(),
    labels: [("label3".to_string(), LabelMap::key("labels.label3"))].into(),
    namespace: "openmetrics".to_string(),
    ..Default::default()
  }
}

#[tokio::test]
async fn families_follow_content_type() {
  let input = "# TYPE requests counter\nrequests_total 1\n";

  let client = OpenMetricsClient::new(openmetrics_fetcher(input));
  let families = client.get_families().await.unwrap();
  assert_eq!(1, families.len());
  assert_eq!("requests", families[0].name);

  // Legacy text keeps the raw sample name.
  let client = OpenMetricsClient::new(prometheus_fetcher(input));
  let families = client.get_families().await.unwrap();
  assert_eq!("requests_total", families[0].name);

  // No content type parses as legacy text.
  let client = OpenMetricsClient::new(fetcher(200, None, input));
  let families = client.get_families().await.unwrap();
  assert_eq!("requests_total", families[0].name);
}

#[tokio::test]
async fn families_are_filtered() {
  let filter = MetricsFilter::new(&MetricsFilterConfig {
    include: vec!["_metric$".to_string()],
    exclude: vec!["^histogram".to_string()],
  })
  .unwrap();
  let client =
    OpenMetricsClient::with_filter(openmetrics_fetcher(OPENMETRICS_SAMPLES), filter);
  let names: Vec<String> = client
    .get_families()
    .await
    .unwrap()
    .into_iter()
    .map(|f| f.name)
    .collect();
  assert_eq!(
    vec!["first_metric", "second_metric", "summary_metric", "gaugehistogram_metric"],
    names
  );
}

#[tokio::test]
async fn error_status() {
  let client = OpenMetricsClient::new(fetcher(503, None, "unavailable"));
  assert!(matches!(
    client.get_families().await,
    Err(FetchError::Status(503))
  ));

  let mut reporter = CapturingReporter::default();
  assert!(
    client
      .report_processed_metrics(&first_and_second(), &mut reporter)
      .await
      .is_err()
  );
  assert!(reporter.events.is_empty());
}

#[tokio::test]
async fn transport_error() {
  let mut fetcher = MockFetcher::new();
  fetcher
    .expect_fetch()
    .times(1)
    .returning(|| Err(FetchError::Transport("connection refused".to_string())));
  let client = OpenMetricsClient::new(fetcher);
  let error = client.get_families().await.unwrap_err();
  assert_eq!("transport error: connection refused", error.to_string());
}

#[tokio::test]
async fn report_processed_metrics() {
  let client = OpenMetricsClient::new(openmetrics_fetcher(OPENMETRICS_SAMPLES));
  let mut reporter = CapturingReporter::default();
  let reported = client
    .report_processed_metrics(&first_and_second(), &mut reporter)
    .await
    .unwrap();
  assert_eq!(2, reported);
  assert!(
    reporter
      .events
      .iter()
      .all(|event| event.namespace == "openmetrics")
  );
  assert_eq!(
    vec![
      json!({"first": {"metric": 1.0}, "labels": {"label3": "Value3"}}),
      json!({"labels": {"label3": "othervalue"}, "second": {"metric": 0.0}}),
    ],
    reporter.sorted_fields()
  );
}

#[tokio::test]
async fn reporter_closing_stops_the_cycle() {
  let client = OpenMetricsClient::new(openmetrics_fetcher(OPENMETRICS_SAMPLES));
  let mut reporter = CapturingReporter::closing_after(1);
  let reported = client
    .report_processed_metrics(&first_and_second(), &mut reporter)
    .await
    .unwrap();
  assert_eq!(1, reported);
  assert_eq!(1, reporter.events.len());
}

#[tokio::test]
async fn report_typed_metrics() {
  let input = "# TYPE temperature gauge\ntemperature{room=\"a\"} 21.5\n";
  let client = OpenMetricsClient::new(prometheus_fetcher(input));
  let generator = TypedGenerator::new(true, CounterCache::new(Duration::from_secs(60)));
  let mut reporter = CapturingReporter::default();
  let reported = client
    .report_typed_metrics(&generator, "prometheus", &mut reporter)
    .await
    .unwrap();
  assert_eq!(1, reported);
  assert_eq!("prometheus", reporter.events[0].namespace);
  assert_eq!(
    vec![json!({"labels": {"room": "a"}, "temperature": {"value": 21.5}})],
    reporter.sorted_fields()
  );
}

#[tokio::test]
async fn collector_modes() {
  let typed = CollectorConfig {
    namespace: "prometheus".to_string(),
    ..Default::default()
  };
  let collector = Collector::new(openmetrics_fetcher(OPENMETRICS_SAMPLES), typed).unwrap();
  collector.start();
  let mut reporter = CapturingReporter::default();
  assert!(collector.collect(&mut reporter).await.unwrap() > 0);
  assert!(
    reporter
      .events
      .iter()
      .all(|event| event.namespace == "prometheus")
  );
  collector.stop().await;

  let mapped = CollectorConfig {
    use_types: false,
    mapping: first_and_second(),
    ..Default::default()
  };
  let collector = Collector::new(openmetrics_fetcher(OPENMETRICS_SAMPLES), mapped).unwrap();
  let mut reporter = CapturingReporter::default();
  assert_eq!(2, collector.collect(&mut reporter).await.unwrap());
  assert!(
    reporter
      .events
      .iter()
      .all(|event| event.namespace == "openmetrics")
  );
}

#[tokio::test]
async fn collector_rejects_invalid_config() {
  let config = CollectorConfig {
    metrics_filters: MetricsFilterConfig {
      include: vec!["a".to_string()],
      exclude: vec!["a".to_string()],
    },
    ..Default::default()
  };
  assert!(matches!(
    Collector::new(openmetrics_fetcher(""), config),
    Err(ConfigError::ConflictingPattern(_))
  ));
}

// Serve one canned HTTP response and return the request that was received.
async fn serve_once(listener: TcpListener, response: String) -> String {
  let (mut socket, _) = listener.accept().await.unwrap();
  let mut request = Vec::new();
  let mut buffer = [0; 1024];
  while !request.ends_with(b"\r\n\r\n") {
    let read = socket.read(&mut buffer).await.unwrap();
    if read == 0 {
      break;
    }
    request.extend_from_slice(&buffer[.. read]);
  }
  socket.write_all(response.as_bytes()).await.unwrap();
  socket.shutdown().await.unwrap();
  String::from_utf8(request).unwrap()
}

#[tokio::test]
async fn http_fetcher() {
  let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
  let address = listener.local_addr().unwrap();
  let body = "# TYPE up gauge\nup 1\n# EOF\n";
  let response = format!(
    "HTTP/1.1 200 OK\r\ncontent-type: {}\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
    crate::test::OPENMETRICS_CONTENT_TYPE,
    body.len()
  );
  let server = tokio::spawn(serve_once(listener, response));

  let fetcher =
    HttpFetcher::new(format!("http://{address}/metrics"), Duration::from_secs(5)).unwrap();
  let client = OpenMetricsClient::new(fetcher);
  let families = client.get_families().await.unwrap();
  assert_eq!(1, families.len());
  assert_eq!("up", families[0].name);

  let request = server.await.unwrap().to_lowercase();
  assert!(request.starts_with("get /metrics http/1.1"));
  assert!(request.contains("accept: application/openmetrics-text"));
}
