//! Shared utilities for integration and load testing.

use axum::{
    body::{Body, Bytes},
    http::{HeaderMap, Method, Uri},
    Router,
};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use failover_proxy::config::BalancerConfig;
use failover_proxy::lifecycle::Shutdown;
use failover_proxy::{HttpServer, LoadBalancer};

/// A backend running on an ephemeral port.
pub struct MockBackend {
    pub addr: SocketAddr,
    hits: Arc<AtomicUsize>,
    stop: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

#[allow(dead_code)]
impl MockBackend {
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Requests that reached the handler.
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    /// Stop accepting connections and wait until the listener is gone.
    pub async fn stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

/// Start a backend that answers every request with its name.
#[allow(dead_code)]
pub async fn start_backend(name: &'static str) -> MockBackend {
    start_slow_backend(name, Duration::ZERO).await
}

/// Start a backend that waits `delay` before answering with its name.
#[allow(dead_code)]
pub async fn start_slow_backend(name: &'static str, delay: Duration) -> MockBackend {
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    let app = Router::new().fallback(move || {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            name
        }
    });
    spawn_backend(app, hits).await
}

/// Start a backend that echoes method, path, the `x-test` header and the body.
#[allow(dead_code)]
pub async fn start_echo_backend() -> MockBackend {
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    let app = Router::new().fallback(move |method: Method, uri: Uri, headers: HeaderMap, body: String| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            let test_header = headers
                .get("x-test")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("-")
                .to_string();
            format!("{} {} {} {}", method, uri, test_header, body)
        }
    });
    spawn_backend(app, hits).await
}

/// A backend whose body ends `delay` after its first chunk. Tracks
/// how many responses are in progress at once.
pub struct StreamingBackend {
    pub backend: MockBackend,
    max_active: Arc<AtomicUsize>,
}

#[allow(dead_code)]
impl StreamingBackend {
    /// Highest number of responses that were in progress simultaneously.
    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

#[allow(dead_code)]
pub async fn start_streaming_backend(delay: Duration) -> StreamingBackend {
    let hits = Arc::new(AtomicUsize::new(0));
    let active = Arc::new(AtomicUsize::new(0));
    let max_active = Arc::new(AtomicUsize::new(0));

    let counter = hits.clone();
    let peak = max_active.clone();
    let app = Router::new().fallback(move || {
        let counter = counter.clone();
        let active = active.clone();
        let peak = peak.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);

            let chunks = futures_util::stream::unfold(0u8, move |step| {
                let active = active.clone();
                async move {
                    match step {
                        0 => Some((Ok::<_, std::io::Error>(Bytes::from_static(b"do")), 1)),
                        1 => {
                            tokio::time::sleep(delay).await;
                            Some((Ok(Bytes::from_static(b"ne")), 2))
                        }
                        _ => {
                            active.fetch_sub(1, Ordering::SeqCst);
                            None
                        }
                    }
                }
            });
            Body::from_stream(chunks)
        }
    });

    StreamingBackend {
        backend: spawn_backend(app, hits).await,
        max_active,
    }
}

async fn spawn_backend(app: Router, hits: Arc<AtomicUsize>) -> MockBackend {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();

    let handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = stop_rx.await;
            })
            .await
            .unwrap();
    });

    MockBackend {
        addr,
        hits,
        stop: Some(stop_tx),
        handle: Some(handle),
    }
}

/// An address nothing listens on.
#[allow(dead_code)]
pub async fn dead_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}", addr)
}

/// Configuration with short probe timeouts for the given backend URLs.
#[allow(dead_code)]
pub fn config_for(urls: Vec<String>) -> BalancerConfig {
    let mut config = BalancerConfig::default();
    config.service.name = "test-balancer".into();
    config.backends = urls;
    config.health_check.request_timeout_ms = 500;
    config.health_check.startup_timeout_ms = 1_000;
    config
}

/// A running balancer behind an ephemeral port.
pub struct Proxy {
    pub addr: SocketAddr,
    pub balancer: Arc<LoadBalancer>,
    pub shutdown: Shutdown,
    client: reqwest::Client,
}

#[allow(dead_code)]
impl Proxy {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub async fn get(&self, path: &str) -> (u16, String) {
        let res = self.client.get(self.url(path)).send().await.expect("Proxy unreachable");
        let status = res.status().as_u16();
        (status, res.text().await.unwrap())
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }
}

/// Build the balancer, run the startup sweep, start workers and serve HTTP.
pub async fn start_proxy(config: BalancerConfig) -> Proxy {
    let balancer = LoadBalancer::new(&config).unwrap();
    balancer.initial_sweep().await.unwrap();
    let _fatal = balancer.start().unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new();
    let server = HttpServer::new(balancer.clone());
    let server_shutdown = shutdown.subscribe();
    tokio::spawn(async move {
        let _ = server.run(listener, server_shutdown).await;
    });

    let client = reqwest::Client::builder().no_proxy().build().unwrap();
    Proxy {
        addr,
        balancer,
        shutdown,
        client,
    }
}

/// Poll `check` until it holds or `timeout` elapses.
#[allow(dead_code)]
pub async fn eventually<F: Fn() -> bool>(timeout: Duration, check: F) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
