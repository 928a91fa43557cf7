//! Prometheus metrics for the mbroker server.
//!
//! This module provides:
//! - Metrics registry with broker counters and gauges
//! - HTTP server to expose metrics at `/metrics` endpoint

use crate::error::ServerError;
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use prometheus::{Counter, CounterVec, Encoder, Gauge, Opts, Registry, TextEncoder};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

/// Prometheus metrics for the broker.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    /// Total connections accepted.
    pub connections_total: Counter,
    /// Currently active connections.
    pub connections_active: Gauge,
    /// Frames received, by method.
    pub frames_total: CounterVec,
    /// Envelopes enqueued to subscribers, by method.
    pub deliveries_total: CounterVec,
    /// Connections closed because of a protocol error.
    pub protocol_errors_total: Counter,
    /// Known topics.
    pub topics: Gauge,
}

impl Metrics {
    /// Creates a new Metrics instance with all metrics registered.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        // Connections
        let connections_total = Counter::with_opts(Opts::new(
            "mbroker_connections_total",
            "Total number of connections accepted",
        ))?;
        registry.register(Box::new(connections_total.clone()))?;

        let connections_active = Gauge::with_opts(Opts::new(
            "mbroker_connections_active",
            "Number of currently active connections",
        ))?;
        registry.register(Box::new(connections_active.clone()))?;

        // Traffic
        let frames_total = CounterVec::new(
            Opts::new("mbroker_frames_total", "Total frames received by method"),
            &["method"],
        )?;
        registry.register(Box::new(frames_total.clone()))?;

        let deliveries_total = CounterVec::new(
            Opts::new(
                "mbroker_deliveries_total",
                "Total envelopes delivered to clients by method",
            ),
            &["method"],
        )?;
        registry.register(Box::new(deliveries_total.clone()))?;

        // Errors
        let protocol_errors_total = Counter::with_opts(Opts::new(
            "mbroker_protocol_errors_total",
            "Total connections closed by a protocol error",
        ))?;
        registry.register(Box::new(protocol_errors_total.clone()))?;

        // Topics
        let topics = Gauge::with_opts(Opts::new("mbroker_topics", "Number of known topics"))?;
        registry.register(Box::new(topics.clone()))?;

        Ok(Self {
            registry,
            connections_total,
            connections_active,
            frames_total,
            deliveries_total,
            protocol_errors_total,
            topics,
        })
    }

    /// Encodes all metrics in Prometheus text format.
    pub fn encode(&self) -> Result<Vec<u8>, prometheus::Error> {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(buffer)
    }
}

/// Runs the HTTP metrics server.
///
/// The server listens on the given address and serves metrics at `/metrics`.
pub async fn run_metrics_server(
    addr: SocketAddr,
    metrics: Arc<Metrics>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<(), ServerError> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Metrics server listening on http://{}/metrics", addr);

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _)) => {
                        let metrics = metrics.clone();
                        tokio::spawn(async move {
                            let io = TokioIo::new(stream);
                            let service = service_fn(move |req| {
                                let metrics = metrics.clone();
                                async move { handle_request(req, metrics).await }
                            });
                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                tracing::debug!("Metrics connection error: {}", e);
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!("Metrics server accept error: {}", e);
                    }
                }
            }
            _ = shutdown.recv() => {
                tracing::info!("Metrics server shutting down");
                break;
            }
        }
    }

    Ok(())
}

fn text_response(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
}

/// Handles an HTTP request to the metrics server.
async fn handle_request(
    req: Request<hyper::body::Incoming>,
    metrics: Arc<Metrics>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let response = match req.uri().path() {
        "/metrics" => match metrics.encode() {
            Ok(body) => {
                let mut response = text_response(StatusCode::OK, body);
                response.headers_mut().insert(
                    hyper::header::CONTENT_TYPE,
                    hyper::header::HeaderValue::from_static(
                        "text/plain; version=0.0.4; charset=utf-8",
                    ),
                );
                response
            }
            Err(e) => {
                tracing::warn!("Failed to encode metrics: {}", e);
                text_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
        },
        "/health" | "/healthz" => text_response(StatusCode::OK, "OK"),
        _ => text_response(StatusCode::NOT_FOUND, "Not Found"),
    };

    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new().unwrap();

        metrics.connections_total.inc();
        metrics.connections_active.inc();
        metrics.frames_total.with_label_values(&["PUBLISH"]).inc();
        metrics.deliveries_total.with_label_values(&["MESSAGE"]).inc();
        metrics.protocol_errors_total.inc();

        let encoded = String::from_utf8(metrics.encode().unwrap()).unwrap();

        assert!(encoded.contains("mbroker_connections_total"));
        assert!(encoded.contains("mbroker_connections_active"));
        assert!(encoded.contains("mbroker_frames_total"));
        assert!(encoded.contains("mbroker_deliveries_total"));
        assert!(encoded.contains("mbroker_protocol_errors_total 1"));
    }

    #[test]
    fn test_gauges() {
        let metrics = Metrics::new().unwrap();
        metrics.connections_active.set(5.0);
        metrics.topics.set(12.0);

        let encoded = String::from_utf8(metrics.encode().unwrap()).unwrap();
        assert!(encoded.contains("mbroker_connections_active 5"));
        assert!(encoded.contains("mbroker_topics 12"));
    }

    #[test]
    fn test_labels_are_per_method() {
        let metrics = Metrics::new().unwrap();
        metrics.frames_total.with_label_values(&["PUBLISH"]).inc();
        metrics.frames_total.with_label_values(&["PUBLISH"]).inc();
        metrics.frames_total.with_label_values(&["SUBSCRIBE"]).inc();

        let encoded = String::from_utf8(metrics.encode().unwrap()).unwrap();
        assert!(encoded.contains(r#"mbroker_frames_total{method="PUBLISH"} 2"#));
        assert!(encoded.contains(r#"mbroker_frames_total{method="SUBSCRIBE"} 1"#));
    }
}
