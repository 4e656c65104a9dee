/// Producer/consumer pipeline tests against a mock exporter
use httpmock::prelude::*;
use prost::Message;
use promgraph::{
    config::FetchConfig,
    emit::{collect, render_json},
    error::AppError,
    model::{proto, Metric, MetricFamily, MetricType},
    pipeline::Fetcher,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

const PROTOBUF_CONTENT_TYPE: &str =
    "application/vnd.google.protobuf; proto=io.prometheus.client.MetricFamily; encoding=delimited";

fn counter_family(index: usize) -> MetricFamily {
    MetricFamily {
        name: Some(format!("family_{}", index)),
        help: Some(format!("family number {}", index)),
        r#type: Some(MetricType::Counter as i32),
        metric: vec![Metric {
            counter: Some(proto::Counter {
                value: Some(index as f64),
            }),
            ..Default::default()
        }],
    }
}

fn fetcher(channel_capacity: usize) -> Arc<Fetcher> {
    let config = FetchConfig {
        channel_capacity,
        ..FetchConfig::default()
    };
    Arc::new(Fetcher::new(config).unwrap())
}

#[tokio::test]
async fn test_families_arrive_in_stream_order_through_small_channel() {
    let server = MockServer::start_async().await;
    let mut body = Vec::new();
    for i in 0..250 {
        counter_family(i).encode_length_delimited(&mut body).unwrap();
    }
    server
        .mock_async(|when, then| {
            when.method(GET).path("/metrics");
            then.status(200)
                .header("content-type", PROTOBUF_CONTENT_TYPE)
                .body(body.clone());
        })
        .await;

    // capacity 1 forces the decoder to wait on the consumer for every record
    let handle = fetcher(1).spawn(server.url("/metrics"));
    let records = collect(handle).await.unwrap();

    assert_eq!(records.len(), 250);
    for (i, record) in records.iter().enumerate() {
        assert_eq!(record.name, format!("family_{}", i));
        assert_eq!(record.help, format!("family number {}", i));
    }
}

#[tokio::test]
async fn test_text_families_keep_encounter_order() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/metrics");
            then.status(200)
                .header("content-type", "text/plain; version=0.0.4")
                .body(
                    "# HELP zeta last letter\n# TYPE zeta gauge\nzeta 1\n\
                     # TYPE alpha counter\nalpha{code=\"200\"} 5\nalpha{code=\"500\"} 1\n\
                     middle 7 1700000000000\n",
                );
        })
        .await;

    let handle = fetcher(4).spawn(server.url("/metrics"));
    let records = collect(handle).await.unwrap();

    let names: Vec<&str> = records.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["zeta", "alpha", "middle"]);
    assert_eq!(records[0].help, "last letter");
    assert_eq!(records[1].metrics.len(), 2);
    assert_eq!(records[1].metrics[1].labels().get("code").unwrap(), "500");
}

#[tokio::test]
async fn test_empty_body_yields_empty_array() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/metrics");
            then.status(200).header("content-type", PROTOBUF_CONTENT_TYPE).body("");
        })
        .await;

    let handle = fetcher(8).spawn(server.url("/metrics"));
    let records = collect(handle).await.unwrap();

    assert!(records.is_empty());
    assert_eq!(render_json(&records).unwrap(), b"[]");
}

#[tokio::test]
async fn test_failure_after_partial_stream_discards_everything() {
    let server = MockServer::start_async().await;
    let mut body = Vec::new();
    for i in 0..3 {
        counter_family(i).encode_length_delimited(&mut body).unwrap();
    }
    // length prefix promising 100 bytes, followed by only two
    body.extend_from_slice(&[100, 0x0a, 0x01]);
    server
        .mock_async(|when, then| {
            when.method(GET).path("/metrics");
            then.status(200)
                .header("content-type", PROTOBUF_CONTENT_TYPE)
                .body(body.clone());
        })
        .await;

    let handle = fetcher(8).spawn(server.url("/metrics"));
    let result = collect(handle).await;

    assert!(matches!(result, Err(AppError::Decode(_))));
}

#[tokio::test]
async fn test_oversized_record_is_rejected() {
    let server = MockServer::start_async().await;
    let mut body = Vec::new();
    counter_family(0).encode_length_delimited(&mut body).unwrap();
    server
        .mock_async(|when, then| {
            when.method(GET).path("/metrics");
            then.status(200)
                .header("content-type", PROTOBUF_CONTENT_TYPE)
                .body(body.clone());
        })
        .await;

    let config = FetchConfig {
        max_record_bytes: 4,
        ..FetchConfig::default()
    };
    let handle = Arc::new(Fetcher::new(config).unwrap()).spawn(server.url("/metrics"));

    assert!(matches!(collect(handle).await, Err(AppError::Decode(_))));
}

#[tokio::test]
async fn test_dropping_consumer_stops_producer() {
    let server = MockServer::start_async().await;
    let mut body = Vec::new();
    for i in 0..100 {
        counter_family(i).encode_length_delimited(&mut body).unwrap();
    }
    server
        .mock_async(|when, then| {
            when.method(GET).path("/metrics");
            then.status(200)
                .header("content-type", PROTOBUF_CONTENT_TYPE)
                .body(body.clone());
        })
        .await;

    let handle = fetcher(1).spawn(server.url("/metrics"));
    drop(handle.families);

    let outcome = handle.outcome.await.unwrap();
    assert!(outcome.is_err());
}

/// Serve a 200 whose declared body is longer than what is sent, then stall
async fn stalling_exporter(first_chunk: Vec<u8>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = Vec::new();
        let mut buf = [0u8; 1024];
        while !request.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = socket.read(&mut buf).await.unwrap();
            if n == 0 {
                return;
            }
            request.extend_from_slice(&buf[..n]);
        }

        let head = format!(
            "HTTP/1.1 200 OK\r\ncontent-type: {}\r\ncontent-length: {}\r\n\r\n",
            PROTOBUF_CONTENT_TYPE,
            first_chunk.len() + 4096
        );
        socket.write_all(head.as_bytes()).await.unwrap();
        socket.write_all(&first_chunk).await.unwrap();
        socket.flush().await.unwrap();

        // keep the connection open well past the scrape deadline
        tokio::time::sleep(Duration::from_secs(30)).await;
        drop(socket);
    });

    format!("http://{}/metrics", addr)
}

#[tokio::test]
async fn test_stall_mid_body_times_out_and_discards_records() {
    let mut first_chunk = Vec::new();
    counter_family(0).encode_length_delimited(&mut first_chunk).unwrap();
    let url = stalling_exporter(first_chunk).await;

    let config = FetchConfig {
        timeout_seconds: 1,
        ..FetchConfig::default()
    };
    let mut handle = Arc::new(Fetcher::new(config).unwrap()).spawn(url);

    // the complete record is forwarded before the stall
    let first = handle.families.recv().await.unwrap();
    assert_eq!(first.name(), "family_0");

    let result = tokio::time::timeout(Duration::from_secs(10), collect(handle))
        .await
        .expect("deadline must abort the stalled body read");
    assert!(matches!(result, Err(AppError::Timeout { .. })), "got {:?}", result);
}

#[tokio::test]
async fn test_repeated_text_quantile_keeps_last_value() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/metrics");
            then.status(200).body(
                "# TYPE rpc summary\n\
                 rpc{quantile=\"0.99\"} 9\n\
                 rpc{quantile=\"0.5\"} 5\n\
                 rpc{quantile=\"0.5\"} 6\n\
                 rpc_sum 20\nrpc_count 3\n",
            );
        })
        .await;

    let handle = fetcher(4).spawn(server.url("/metrics"));
    let records = collect(handle).await.unwrap();
    let json = String::from_utf8(render_json(&records).unwrap()).unwrap();

    assert!(json.contains(r#""quantiles":{"0.5":"6","0.99":"9"}"#), "got {}", json);
}
