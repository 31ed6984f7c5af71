//! In-process bulk-get backend for tests.

use std::sync::Arc;

use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::{TokioExecutor, TokioIo};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use url::Url;

/// Builds the single doc variant for `(endpoint, id)`, e.g.
/// `json!({"ok": {"v": 1}})` or `json!({"error": "not_found"})`.
pub type Responder = Arc<dyn Fn(&str, &str) -> Value + Send + Sync>;

/// How the mock answers, before the responder is even consulted.
#[derive(Clone, Copy, PartialEq)]
pub enum MockMode {
    Normal,
    /// Valid JSON without a `results` field.
    NoResults,
    /// A 500 with an error payload.
    Failing,
}

#[derive(Clone, Debug)]
pub struct BulkCall {
    pub endpoint: String,
    pub ids: Vec<String>,
}

pub struct MockBackend {
    url: Url,
    calls: Arc<Mutex<Vec<BulkCall>>>,
}

impl MockBackend {
    pub async fn start(responder: impl Fn(&str, &str) -> Value + Send + Sync + 'static) -> Self {
        Self::start_with_mode(MockMode::Normal, responder).await
    }

    pub async fn start_with_mode(
        mode: MockMode,
        responder: impl Fn(&str, &str) -> Value + Send + Sync + 'static,
    ) -> Self {
        let responder: Responder = Arc::new(responder);
        let calls: Arc<Mutex<Vec<BulkCall>>> = Arc::new(Mutex::new(Vec::new()));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server_calls = calls.clone();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let io = TokioIo::new(stream);
                let responder = responder.clone();
                let calls = server_calls.clone();

                tokio::spawn(async move {
                    let service = service_fn(move |req| {
                        let responder = responder.clone();
                        let calls = calls.clone();
                        async move { handle(req, mode, responder, calls).await }
                    });
                    let _ = hyper_util::server::conn::auto::Builder::new(TokioExecutor::new())
                        .serve_connection(io, service)
                        .await;
                });
            }
        });

        let url = Url::parse(&format!("http://{addr}")).unwrap();
        Self { url, calls }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn calls(&self) -> Vec<BulkCall> {
        self.calls.lock().clone()
    }

    /// Ids requested from one endpoint, packet per packet, in arrival order.
    pub fn packets_for(&self, endpoint: &str) -> Vec<Vec<String>> {
        self.calls
            .lock()
            .iter()
            .filter(|call| call.endpoint == endpoint)
            .map(|call| call.ids.clone())
            .collect()
    }
}

async fn handle(
    req: Request<Incoming>,
    mode: MockMode,
    responder: Responder,
    calls: Arc<Mutex<Vec<BulkCall>>>,
) -> Result<Response<Full<Bytes>>, std::convert::Infallible> {
    let endpoint = req
        .uri()
        .path()
        .trim_start_matches('/')
        .trim_end_matches("/_bulk_get")
        .to_string();

    let body = req.into_body().collect().await.unwrap().to_bytes();
    let request: Value = serde_json::from_slice(&body).unwrap();
    let ids: Vec<String> = request["docs"]
        .as_array()
        .unwrap()
        .iter()
        .map(|doc| doc["id"].as_str().unwrap().to_string())
        .collect();

    calls.lock().push(BulkCall {
        endpoint: endpoint.clone(),
        ids: ids.clone(),
    });

    let (status, payload) = match mode {
        MockMode::Failing => (
            StatusCode::INTERNAL_SERVER_ERROR,
            json!({"error": "backend_down", "reason": "synthetic failure"}),
        ),
        MockMode::NoResults => (StatusCode::OK, json!({"rows": []})),
        MockMode::Normal => {
            let results: Vec<Value> = ids
                .iter()
                .map(|id| json!({"id": id, "docs": [responder(&endpoint, id)]}))
                .collect();
            (StatusCode::OK, json!({"results": results}))
        }
    };

    let mut response = Response::new(Full::new(Bytes::from(payload.to_string())));
    *response.status_mut() = status;
    Ok(response)
}
