//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use pollguard::config::GuardConfig;
use pollguard::{PollGuard, TimerPort, TokioTimer, UpstreamError};

/// Canned HTTP response for the programmable backend.
pub struct MockResponse {
    pub status: u16,
    pub headers: Vec<(&'static str, String)>,
    pub body: String,
}

impl MockResponse {
    pub fn json(status: u16, body: &str) -> Self {
        Self {
            status,
            headers: vec![("Content-Type", "application/json".to_string())],
            body: body.to_string(),
        }
    }

    pub fn with_header(mut self, name: &'static str, value: &str) -> Self {
        self.headers.push((name, value.to_string()));
        self
    }
}

/// Start a programmable mock backend on an ephemeral port.
pub async fn start_programmable_backend<F, Fut>(f: F) -> SocketAddr
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = MockResponse> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let f = Arc::new(f);

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let f = f.clone();
                    tokio::spawn(async move {
                        let mut request = [0u8; 4096];
                        let _ = socket.read(&mut request).await;

                        let response = f().await;
                        let mut raw = format!(
                            "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nConnection: close\r\n",
                            response.status,
                            reason(response.status),
                            response.body.len()
                        );
                        for (name, value) in &response.headers {
                            raw.push_str(&format!("{name}: {value}\r\n"));
                        }
                        raw.push_str("\r\n");
                        raw.push_str(&response.body);

                        let _ = socket.write_all(raw.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    addr
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        401 => "Unauthorized",
        404 => "Not Found",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}

/// An address nothing listens on.
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

/// Config with short, jitter-free delays.
pub fn fast_config() -> GuardConfig {
    let mut config = GuardConfig::default();
    config.retries.max_retries = 3;
    config.retries.base_delay_ms = 10;
    config.retries.max_delay_ms = 100;
    config.retries.max_jitter_ms = 0;
    config.circuit_breaker.failure_threshold = 5;
    config.circuit_breaker.reset_timeout_ms = 1_000;
    config
}

pub fn guard<V>(config: &GuardConfig) -> (PollGuard<V>, Arc<TokioTimer>)
where
    V: Clone + Send + Sync + 'static,
{
    let timer = Arc::new(TokioTimer::new());
    let port: Arc<dyn TimerPort> = timer.clone();
    (PollGuard::new(config, port), timer)
}

pub type ScriptedCall = Pin<Box<dyn Future<Output = Result<u32, UpstreamError>> + Send>>;

/// In-process upstream: fails with `status` for the first `failures`
/// calls, then returns the call number.
#[derive(Clone)]
pub struct Scripted {
    calls: Arc<AtomicU32>,
    failures: u32,
    status: u16,
    latency: Duration,
}

impl Scripted {
    pub fn new(failures: u32, status: u16) -> Self {
        Self {
            calls: Arc::new(AtomicU32::new(0)),
            failures,
            status,
            latency: Duration::ZERO,
        }
    }

    pub fn healthy() -> Self {
        Self::new(0, 200)
    }

    pub fn always_failing(status: u16) -> Self {
        Self::new(u32::MAX, status)
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// The upstream operation to hand to `PollGuard`.
    pub fn op(&self) -> impl Fn() -> ScriptedCall + Send + Sync + 'static {
        let script = self.clone();
        move || -> ScriptedCall {
            let script = script.clone();
            Box::pin(async move {
                let n = script.calls.fetch_add(1, Ordering::SeqCst);
                if !script.latency.is_zero() {
                    tokio::time::sleep(script.latency).await;
                }
                if n < script.failures {
                    Err(UpstreamError::new("scripted failure").with_status(script.status))
                } else {
                    Ok(n + 1)
                }
            })
        }
    }
}
