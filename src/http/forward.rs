//! Forwarding a request to a backend.
//!
//! # Responsibilities
//! - Point the request URI at the chosen backend
//! - Relay method, headers and body as received
//! - Stream the backend response back unchanged
//! - Report when the response body has been fully delivered
//!
//! # Design Decisions
//! - Transport errors become 502 for the caller; they do not count as a
//!   backend health failure (only the dial probe decides that)
//! - The inbound Host header is kept
//! - A response is finished at end of stream, on a body error, or when the
//!   caller drops it; the instance worker waits for that before moving on

use axum::body::Body;
use axum::http::uri::{Authority, PathAndQuery, Scheme};
use axum::http::{Request, Response, StatusCode, Uri, Version};
use hyper::body::{Body as HttpBody, Bytes, Frame, Incoming, SizeHint};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use std::pin::Pin;
use std::str::FromStr;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

use crate::load_balancer::work::plain_response;
use crate::load_balancer::Target;

/// Relays requests to backends over a shared HTTP client.
#[derive(Debug, Clone)]
pub struct Forwarder {
    client: Client<HttpConnector, Body>,
}

impl Forwarder {
    pub fn new() -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        Self { client }
    }

    /// Send `request` to `target` and return whatever the backend answered,
    /// together with a [`Delivery`] that resolves once the body is done.
    pub async fn forward(&self, target: &Target, request: Request<Body>) -> (Response<Body>, Delivery) {
        let (mut parts, body) = request.into_parts();

        parts.uri = match rewrite_uri(&parts.uri, target) {
            Ok(uri) => uri,
            Err(e) => {
                tracing::error!(target = %target, error = %e, "Cannot build upstream URI");
                return (
                    plain_response(StatusCode::BAD_GATEWAY, "Invalid upstream address"),
                    Delivery::done(),
                );
            }
        };
        // Backend connections are HTTP/1.1.
        if parts.version == Version::HTTP_2 {
            parts.version = Version::HTTP_11;
        }

        match self.client.request(Request::from_parts(parts, body)).await {
            Ok(response) => {
                let (parts, body) = response.into_parts();
                let (body, delivery) = TrackedBody::new(body);
                (Response::from_parts(parts, Body::new(body)), delivery)
            }
            Err(e) => {
                tracing::error!(target = %target, error = %e, "Upstream error");
                (
                    plain_response(StatusCode::BAD_GATEWAY, "Upstream request failed"),
                    Delivery::done(),
                )
            }
        }
    }
}

impl Default for Forwarder {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolves when a forwarded response body has been fully sent or dropped.
#[derive(Debug)]
pub struct Delivery {
    rx: Option<oneshot::Receiver<()>>,
}

impl Delivery {
    fn done() -> Self {
        Self { rx: None }
    }

    pub async fn finished(self) {
        if let Some(rx) = self.rx {
            // A dropped sender also means the body is gone.
            let _ = rx.await;
        }
    }
}

/// Backend response body that signals its [`Delivery`] when it ends.
struct TrackedBody {
    inner: Incoming,
    done: Option<oneshot::Sender<()>>,
}

impl TrackedBody {
    fn new(inner: Incoming) -> (Self, Delivery) {
        let (tx, rx) = oneshot::channel();
        let body = Self {
            inner,
            done: Some(tx),
        };
        (body, Delivery { rx: Some(rx) })
    }

    fn finish(&mut self) {
        if let Some(done) = self.done.take() {
            let _ = done.send(());
        }
    }
}

impl HttpBody for TrackedBody {
    type Data = Bytes;
    type Error = hyper::Error;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let polled = Pin::new(&mut self.inner).poll_frame(cx);
        if matches!(polled, Poll::Ready(None) | Poll::Ready(Some(Err(_)))) {
            self.finish();
        }
        polled
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl Drop for TrackedBody {
    fn drop(&mut self) {
        self.finish();
    }
}

fn rewrite_uri(original: &Uri, target: &Target) -> Result<Uri, axum::http::Error> {
    let mut uri_parts = original.clone().into_parts();
    uri_parts.scheme = Some(Scheme::HTTP);
    uri_parts.authority = Some(Authority::from_str(target.authority())?);
    if uri_parts.path_and_query.is_none() {
        uri_parts.path_and_query = Some(PathAndQuery::from_static("/"));
    }
    Ok(Uri::from_parts(uri_parts)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rewrite_uri_keeps_path_and_query() {
        let target = Target::parse("http://127.0.0.1:3000").unwrap();
        let original: Uri = "/api/items?page=2".parse().unwrap();
        let rewritten = rewrite_uri(&original, &target).unwrap();
        assert_eq!(rewritten.to_string(), "http://127.0.0.1:3000/api/items?page=2");
    }

    #[tokio::test]
    async fn test_unreachable_upstream_is_502() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let target = Target::parse(&format!("http://{}", listener.local_addr().unwrap())).unwrap();
        drop(listener);

        let request = Request::builder().uri("/").body(Body::empty()).unwrap();
        let (response, delivery) = Forwarder::new().forward(&target, request).await;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        delivery.finished().await;
    }

    async fn hello_backend() -> Target {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let target = Target::parse(&format!("http://{}", listener.local_addr().unwrap())).unwrap();
        let app = axum::Router::new().fallback(|| async { "hello" });
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        target
    }

    #[tokio::test]
    async fn test_delivery_waits_for_body() {
        let target = hello_backend().await;
        let request = Request::builder().uri("/").body(Body::empty()).unwrap();
        let (response, delivery) = Forwarder::new().forward(&target, request).await;
        assert_eq!(response.status(), StatusCode::OK);

        let delivered = tokio::spawn(delivery.finished());
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(!delivered.is_finished());

        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(&body[..], b"hello");
        tokio::time::timeout(std::time::Duration::from_secs(1), delivered)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_dropped_response_counts_as_delivered() {
        let target = hello_backend().await;
        let request = Request::builder().uri("/").body(Body::empty()).unwrap();
        let (response, delivery) = Forwarder::new().forward(&target, request).await;

        drop(response);
        tokio::time::timeout(std::time::Duration::from_secs(1), delivery.finished())
            .await
            .unwrap();
    }
}
