// mock_broadcaster: A mock transcoder endpoint for testing the dispatcher.
//
// Accepts segment POSTs on /{manifest}/{segment}, records what it saw, and
// responds according to a per-instance behavior: well-formed multipart
// renditions, an HTTP error, or one of the protocol violations the
// dispatcher must survive.

use axum::Router;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

/// Fixed multipart boundary used in every mock response.
pub const BOUNDARY: &str = "mockbroadcasterboundary";

// ---------------------------------------------------------------------------
// Behavior
// ---------------------------------------------------------------------------

/// How a mock instance answers dispatches.
#[derive(Debug, Clone)]
pub enum BroadcasterBehavior {
    /// 200 `multipart/mixed`, one part per rendition name; part bodies are
    /// `encoded:<name>`.
    Renditions(Vec<String>),
    /// A bare HTTP error status (e.g. 502).
    Reject(u16),
    /// 200 with a JSON body — a protocol violation the dispatcher must
    /// treat as a dead broadcaster.
    NonMultipart,
    /// 200 multipart whose single part carries no filename.
    MissingFilename,
    /// 200 multipart whose single part filename tries to escape the work
    /// directory (e.g. `../secret`).
    PathEscape(String),
}

/// One dispatch as the mock saw it.
#[derive(Debug, Clone)]
pub struct ReceivedDispatch {
    pub manifest_id: String,
    /// Path tail, e.g. `1.ts`.
    pub segment: String,
    pub accept: Option<String>,
    pub content_duration: Option<String>,
    pub content_resolution: Option<String>,
    pub transcode_config: Option<String>,
    pub authorization: Option<String>,
    pub body_len: usize,
}

// ---------------------------------------------------------------------------
// MockBroadcaster
// ---------------------------------------------------------------------------

struct Inner {
    behavior: BroadcasterBehavior,
    received: Mutex<Vec<ReceivedDispatch>>,
}

/// A mock broadcaster bound to a random local port.
///
/// Each test spins up its own isolated instances; requests are handled in a
/// background tokio task that is dropped with the mock.
pub struct MockBroadcaster {
    addr: SocketAddr,
    inner: Arc<Inner>,
    _task: tokio::task::JoinHandle<()>,
}

impl MockBroadcaster {
    /// Start a mock answering every dispatch with `behavior`.
    pub async fn start(
        behavior: BroadcasterBehavior,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let inner = Arc::new(Inner {
            behavior,
            received: Mutex::new(Vec::new()),
        });
        let router = Router::new()
            .route("/{manifest}/{segment}", post(handle_dispatch))
            .with_state(inner.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let task = tokio::spawn(async move {
            // In tests, serve errors mean the test is tearing down.
            // Swallow silently.
            let _ = axum::serve(listener, router).await;
        });
        Ok(MockBroadcaster {
            addr,
            inner,
            _task: task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Base URL for a broadcaster list entry.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// A ready-made `url|user|password` line with empty credentials.
    pub fn list_line(&self) -> String {
        format!("{}||", self.url())
    }

    /// Every dispatch received so far, in arrival order.
    pub fn received(&self) -> Vec<ReceivedDispatch> {
        self.inner
            .received
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    pub fn request_count(&self) -> usize {
        self.inner
            .received
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }
}

// ---------------------------------------------------------------------------
// Handler
// ---------------------------------------------------------------------------

async fn handle_dispatch(
    State(inner): State<Arc<Inner>>,
    Path((manifest_id, segment)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let header_str = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned)
    };
    let dispatch = ReceivedDispatch {
        manifest_id,
        segment,
        accept: header_str("accept"),
        content_duration: header_str(tc_protocol::CONTENT_DURATION),
        content_resolution: header_str(tc_protocol::CONTENT_RESOLUTION),
        transcode_config: header_str(tc_protocol::TRANSCODE_CONFIGURATION),
        authorization: header_str("authorization"),
        body_len: body.len(),
    };
    inner
        .received
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
        .push(dispatch);

    match &inner.behavior {
        BroadcasterBehavior::Renditions(names) => {
            let parts: Vec<(Option<String>, String)> = names
                .iter()
                .map(|name| (Some(name.clone()), format!("encoded:{name}")))
                .collect();
            multipart_response(&parts)
        }
        BroadcasterBehavior::Reject(status) => (
            StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY),
            "rejected",
        )
            .into_response(),
        BroadcasterBehavior::NonMultipart => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/json")],
            r#"{"error": "not multipart"}"#,
        )
            .into_response(),
        BroadcasterBehavior::MissingFilename => {
            multipart_response(&[(None, "nameless".to_owned())])
        }
        BroadcasterBehavior::PathEscape(name) => {
            multipart_response(&[(Some(name.clone()), "escaped".to_owned())])
        }
    }
}

fn multipart_response(parts: &[(Option<String>, String)]) -> Response {
    let mut body = String::new();
    for (filename, contents) in parts {
        body.push_str(&format!("--{BOUNDARY}\r\n"));
        match filename {
            Some(name) => body.push_str(&format!(
                "Content-Disposition: attachment; filename=\"{name}\"\r\n\r\n"
            )),
            None => body.push_str("Content-Disposition: attachment\r\n\r\n"),
        }
        body.push_str(contents);
        body.push_str("\r\n");
    }
    body.push_str(&format!("--{BOUNDARY}--\r\n"));

    (
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            format!("{}; boundary={BOUNDARY}", tc_protocol::MULTIPART_MIXED),
        )],
        body,
    )
        .into_response()
}
