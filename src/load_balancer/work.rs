//! Work items: one inbound request travelling through the balancer.
//!
//! The response sink and the completion signal are a single oneshot channel.
//! Delivering the backend response is what releases the waiting caller, so
//! the response is always in place before the caller resumes.

use axum::body::Body;
use axum::http::{Request, Response, StatusCode};
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::http::X_REQUEST_ID;

/// A request awaiting or undergoing forwarding.
#[derive(Debug)]
pub struct WorkItem {
    request_id: String,
    request: Request<Body>,
    sink: oneshot::Sender<Response<Body>>,
    reroutes: u32,
}

/// The caller's side of a [`WorkItem`].
#[derive(Debug)]
pub struct Completion {
    rx: oneshot::Receiver<Response<Body>>,
}

impl WorkItem {
    /// Wrap a request, returning the item and the completion to wait on.
    pub fn new(request: Request<Body>) -> (Self, Completion) {
        let request_id = request
            .headers()
            .get(X_REQUEST_ID)
            .and_then(|v| v.to_str().ok())
            .map(String::from)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let (sink, rx) = oneshot::channel();
        let item = Self {
            request_id,
            request,
            sink,
            reroutes: 0,
        };
        (item, Completion { rx })
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn request(&self) -> &Request<Body> {
        &self.request
    }

    /// How many times this item went through the emergency path.
    pub fn reroutes(&self) -> u32 {
        self.reroutes
    }

    pub(crate) fn mark_rerouted(&mut self) {
        self.reroutes += 1;
    }

    /// The caller stopped waiting (client disconnected).
    pub fn is_abandoned(&self) -> bool {
        self.sink.is_closed()
    }

    /// Split into the request to forward and the responder to complete.
    pub(crate) fn into_parts(self) -> (Request<Body>, Responder) {
        let responder = Responder {
            request_id: self.request_id,
            sink: self.sink,
        };
        (self.request, responder)
    }

    /// Answer the caller without forwarding.
    pub fn reject(self, status: StatusCode, message: &'static str) {
        let (_, responder) = self.into_parts();
        responder.respond(plain_response(status, message));
    }
}

/// Completes a work item once its request has been forwarded.
#[derive(Debug)]
pub(crate) struct Responder {
    request_id: String,
    sink: oneshot::Sender<Response<Body>>,
}

impl Responder {
    pub(crate) fn respond(self, response: Response<Body>) {
        if self.sink.send(response).is_err() {
            tracing::debug!(request_id = %self.request_id, "Caller went away before completion");
        }
    }
}

impl Completion {
    /// Wait until some instance forwarded the item (or it was rejected).
    ///
    /// A work item dropped without a response means a worker died mid-item;
    /// the caller gets a 500 rather than hanging.
    pub async fn wait(self) -> Response<Body> {
        match self.rx.await {
            Ok(response) => response,
            Err(_) => {
                tracing::error!("Work item dropped without a response");
                plain_response(StatusCode::INTERNAL_SERVER_ERROR, "Request was lost")
            }
        }
    }
}

pub(crate) fn plain_response(status: StatusCode, message: &'static str) -> Response<Body> {
    let mut response = Response::new(Body::from(message));
    *response.status_mut() = status;
    response
}

#[cfg(test)]
pub(crate) fn test_item(path: &str) -> (WorkItem, Completion) {
    let request = Request::builder()
        .uri(path)
        .body(Body::empty())
        .expect("valid test request");
    WorkItem::new(request)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_completion_receives_response() {
        let (item, completion) = test_item("/hello");
        assert_eq!(item.request().uri().path(), "/hello");

        let (_, responder) = item.into_parts();
        responder.respond(plain_response(StatusCode::OK, "done"));

        let response = completion.wait().await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(&body[..], b"done");
    }

    #[tokio::test]
    async fn test_reject_and_drop() {
        let (item, completion) = test_item("/");
        item.reject(StatusCode::SERVICE_UNAVAILABLE, "busy");
        assert_eq!(completion.wait().await.status(), StatusCode::SERVICE_UNAVAILABLE);

        let (item, completion) = test_item("/");
        drop(item);
        assert_eq!(completion.wait().await.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_request_id_from_header() {
        let request = Request::builder()
            .uri("/")
            .header(X_REQUEST_ID, "abc-123")
            .body(Body::empty())
            .unwrap();
        let (item, completion) = WorkItem::new(request);
        assert_eq!(item.request_id(), "abc-123");
        assert!(!item.is_abandoned());

        drop(completion);
        assert!(item.is_abandoned());
    }
}
