//! # HTTP Transport
//!
//! Production [`RequestSender`] that posts lift rides to the ingestion
//! endpoint over one shared connection pool.
//!
//! ## Resource Model
//!
//! A single `hyper-util` client is built per run and shared by every worker
//! of every phase. Connections are kept alive and reused; idle connections
//! per host are capped at `max_connections` and reaped after `idle_timeout`.
//! A semaphore with `max_connections` permits bounds the number of requests
//! in flight, so the pool never opens more than that many connections
//! regardless of worker count.
//!
//! ## Timeouts
//!
//! The connect timeout is applied by the connector; the whole exchange
//! (connect, send, response head and body) is bounded by `request_timeout`.
//! Neither relies on OS or library defaults.

use crate::error::{HarnessError, SendError};
use crate::payload::LiftRide;
use crate::sender::RequestSender;
use async_trait::async_trait;
use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http_body_util::{BodyExt as _, Full};
use hyper::{Method, Request};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::{TokioExecutor, TokioTimer};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::debug;

/// Connection pool and timeout settings for [`HttpSender`].
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Base URL the ride path is appended to, e.g. `http://host:8080/Server_war/skiers`
    pub base_url: String,
    pub max_connections: usize,
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    pub idle_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            base_url: crate::defaults::BASE_URL.to_string(),
            max_connections: crate::defaults::MAX_CONNECTIONS,
            request_timeout: crate::defaults::REQUEST_TIMEOUT,
            connect_timeout: crate::defaults::CONNECT_TIMEOUT,
            idle_timeout: crate::defaults::IDLE_TIMEOUT,
        }
    }
}

/// Pooled HTTP/1.1 sender for the lift-ride endpoint.
#[derive(Clone)]
pub struct HttpSender {
    client: Client<HttpConnector, Full<Bytes>>,
    base_url: String,
    in_flight: Arc<Semaphore>,
    request_timeout: Duration,
}

impl HttpSender {
    pub fn new(config: &TransportConfig) -> Result<Self, HarnessError> {
        let base_url = validate_base_url(&config.base_url)?;
        if config.max_connections == 0 {
            return Err(HarnessError::Config(
                "max_connections must be at least 1".to_string(),
            ));
        }
        if config.request_timeout.is_zero() {
            return Err(HarnessError::Config(
                "request timeout must be greater than zero".to_string(),
            ));
        }

        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(config.connect_timeout));
        connector.set_keepalive(Some(config.idle_timeout));
        connector.set_nodelay(true);

        let client = Client::builder(TokioExecutor::new())
            .pool_timer(TokioTimer::new())
            .pool_idle_timeout(config.idle_timeout)
            .pool_max_idle_per_host(config.max_connections)
            .build(connector);

        debug!(
            "HTTP transport ready: base={} max_connections={} timeout={:?}",
            base_url, config.max_connections, config.request_timeout
        );

        Ok(Self {
            client,
            base_url,
            in_flight: Arc::new(Semaphore::new(config.max_connections)),
            request_timeout: config.request_timeout,
        })
    }

    fn build_request(&self, ride: &LiftRide) -> Result<Request<Full<Bytes>>, SendError> {
        let body = serde_json::to_vec(&ride.body())
            .map_err(|e| SendError::InvalidRequest(e.to_string()))?;
        Request::builder()
            .method(Method::POST)
            .uri(format!("{}{}", self.base_url, ride.path()))
            .header(CONTENT_TYPE, "application/json")
            .body(Full::new(Bytes::from(body)))
            .map_err(|e| SendError::InvalidRequest(e.to_string()))
    }

    async fn exchange(&self, request: Request<Full<Bytes>>) -> Result<u16, SendError> {
        let response = self
            .client
            .request(request)
            .await
            .map_err(|e| SendError::Transport(e.to_string()))?;
        let status = response.status().as_u16();
        // Drain the body so the connection can go back to the pool.
        response
            .into_body()
            .collect()
            .await
            .map_err(|e| SendError::Transport(e.to_string()))?;
        Ok(status)
    }
}

#[async_trait]
impl RequestSender for HttpSender {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn send(&self, ride: &LiftRide) -> Result<u16, SendError> {
        let request = self.build_request(ride)?;
        let _permit = self
            .in_flight
            .acquire()
            .await
            .map_err(|_| SendError::Transport("connection pool closed".to_string()))?;

        let status = tokio::time::timeout(self.request_timeout, self.exchange(request))
            .await
            .map_err(|_| SendError::Timeout(self.request_timeout))??;

        if (200..300).contains(&status) {
            Ok(status)
        } else {
            Err(SendError::Protocol { status })
        }
    }
}

/// Check the base URL is an absolute `http://` URL and strip any trailing slash.
pub fn validate_base_url(base_url: &str) -> Result<String, HarnessError> {
    let trimmed = base_url.trim().trim_end_matches('/');
    let uri: hyper::Uri = trimmed
        .parse()
        .map_err(|e| HarnessError::Config(format!("invalid base URL '{}': {}", base_url, e)))?;
    match uri.scheme_str() {
        Some("http") => {}
        Some(other) => {
            return Err(HarnessError::Config(format!(
                "unsupported scheme '{}' in base URL, only http is supported",
                other
            )))
        }
        None => {
            return Err(HarnessError::Config(format!(
                "base URL '{}' must be absolute (http://host[:port]/path)",
                base_url
            )))
        }
    }
    if uri.host().is_none() {
        return Err(HarnessError::Config(format!(
            "base URL '{}' has no host",
            base_url
        )));
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::PayloadFactory;
    use std::net::SocketAddr;
    use std::time::Instant;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Minimal HTTP/1.1 responder answering every request with `status_line`.
    async fn spawn_responder(status_line: &'static str) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut buf = Vec::new();
                    let mut chunk = [0u8; 1024];
                    loop {
                        let n = match stream.read(&mut chunk).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => n,
                        };
                        buf.extend_from_slice(&chunk[..n]);
                        let text = String::from_utf8_lossy(&buf).to_lowercase();
                        if let Some(end) = text.find("\r\n\r\n") {
                            let length = text[..end]
                                .lines()
                                .find_map(|l| l.strip_prefix("content-length:"))
                                .and_then(|v| v.trim().parse::<usize>().ok())
                                .unwrap_or(0);
                            if buf.len() >= end + 4 + length {
                                break;
                            }
                        }
                    }
                    let response = format!(
                        "HTTP/1.1 {}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                        status_line
                    );
                    let _ = stream.write_all(response.as_bytes()).await;
                    let _ = stream.shutdown().await;
                });
            }
        });
        addr
    }

    fn config_for(addr: SocketAddr) -> TransportConfig {
        TransportConfig {
            base_url: format!("http://{}/skiers/", addr),
            max_connections: 4,
            request_timeout: Duration::from_secs(2),
            connect_timeout: Duration::from_millis(500),
            idle_timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn test_validate_base_url() {
        assert_eq!(
            validate_base_url("http://localhost:8080/Server_war/skiers/").unwrap(),
            "http://localhost:8080/Server_war/skiers"
        );
        assert!(validate_base_url("https://localhost/skiers").is_err());
        assert!(validate_base_url("/skiers").is_err());
        assert!(validate_base_url("not a url").is_err());
    }

    #[test]
    fn test_zero_connections_rejected() {
        let config = TransportConfig {
            max_connections: 0,
            ..Default::default()
        };
        assert!(matches!(
            HttpSender::new(&config),
            Err(HarnessError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_created_status_is_success() {
        let addr = spawn_responder("201 Created").await;
        let sender = HttpSender::new(&config_for(addr)).unwrap();
        let ride = PayloadFactory::seeded(3, "2024").next_ride();

        assert_eq!(sender.send(&ride).await, Ok(201));
    }

    #[tokio::test]
    async fn test_server_error_maps_to_protocol_error() {
        let addr = spawn_responder("500 Internal Server Error").await;
        let sender = HttpSender::new(&config_for(addr)).unwrap();
        let ride = PayloadFactory::seeded(3, "2024").next_ride();

        assert_eq!(
            sender.send(&ride).await,
            Err(SendError::Protocol { status: 500 })
        );
    }

    #[tokio::test]
    async fn test_unreachable_host_fails_fast() {
        let config = TransportConfig {
            base_url: "http://192.0.2.1:81/skiers".to_string(),
            max_connections: 1,
            request_timeout: Duration::from_millis(500),
            connect_timeout: Duration::from_millis(200),
            idle_timeout: Duration::from_secs(5),
        };
        let sender = HttpSender::new(&config).unwrap();
        let ride = PayloadFactory::seeded(3, "2024").next_ride();

        let started = Instant::now();
        assert!(sender.send(&ride).await.is_err());
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
