//! Route bindings: each bound route drives one dispatcher load/flush cycle
//! per matching request.

use std::collections::HashMap;
use std::sync::Arc;

use dispatcher::{DispatchError, Dispatcher, ResultMap};
use hyper::body::Bytes;
use hyper::header::{CONTENT_TYPE, HeaderValue};
use hyper::{Method, Request, Response, StatusCode};
use serde::Serialize;
use serde_json::Value;

use crate::errors::BrokerError;
use crate::metrics_defs;

/// Methods a route binding may use. Binding any other method is refused at
/// configuration time, not per request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl HttpMethod {
    fn as_method(self) -> Method {
        match self {
            HttpMethod::Get => Method::GET,
            HttpMethod::Post => Method::POST,
            HttpMethod::Put => Method::PUT,
            HttpMethod::Delete => Method::DELETE,
        }
    }

    fn matches(self, method: &Method) -> bool {
        self.as_method() == *method
    }
}

impl TryFrom<&Method> for HttpMethod {
    type Error = BrokerError;

    fn try_from(method: &Method) -> Result<Self, BrokerError> {
        if *method == Method::GET {
            Ok(HttpMethod::Get)
        } else if *method == Method::POST {
            Ok(HttpMethod::Post)
        } else if *method == Method::PUT {
            Ok(HttpMethod::Put)
        } else if *method == Method::DELETE {
            Ok(HttpMethod::Delete)
        } else {
            Err(BrokerError::UnsupportedMethod(method.to_string()))
        }
    }
}

/// Per-request scratch space shared between the extract and respond hooks.
pub type Scratch = HashMap<String, Value>;

/// Outcome of a key-extraction hook.
pub enum Extraction {
    /// Keys to run through one load/flush cycle.
    Keys(Vec<String>),
    /// The hook already built the response; the cycle is skipped.
    Done(Response<Bytes>),
}

pub type ExtractFn = Arc<dyn Fn(&Request<Bytes>, &mut Scratch) -> Extraction + Send + Sync>;
pub type RespondFn = Arc<dyn Fn(ResultMap, &Scratch) -> Response<Bytes> + Send + Sync>;
pub type ErrorFn = Arc<dyn Fn(&DispatchError) -> Response<Bytes> + Send + Sync>;

/// Where a binding's keys are forcibly routed, bypassing the accepter scan.
#[derive(Clone)]
pub enum ForcedEndpoint {
    Literal(String),
    FromRequest(Arc<dyn Fn(&Request<Bytes>) -> Option<String> + Send + Sync>),
}

pub struct RouteBinding {
    method: HttpMethod,
    path: String,
    extract: ExtractFn,
    respond: RespondFn,
    on_error: Option<ErrorFn>,
    forced: Option<ForcedEndpoint>,
}

impl std::fmt::Debug for RouteBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteBinding")
            .field("method", &self.method)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl RouteBinding {
    pub fn new(
        method: &Method,
        path: &str,
        extract: impl Fn(&Request<Bytes>, &mut Scratch) -> Extraction + Send + Sync + 'static,
        respond: impl Fn(ResultMap, &Scratch) -> Response<Bytes> + Send + Sync + 'static,
    ) -> Result<Self, BrokerError> {
        Ok(Self {
            method: HttpMethod::try_from(method)?,
            path: path.to_string(),
            extract: Arc::new(extract),
            respond: Arc::new(respond),
            on_error: None,
            forced: None,
        })
    }

    pub fn with_error(
        mut self,
        on_error: impl Fn(&DispatchError) -> Response<Bytes> + Send + Sync + 'static,
    ) -> Self {
        self.on_error = Some(Arc::new(on_error));
        self
    }

    pub fn with_forced(mut self, endpoint: &str) -> Self {
        self.forced = Some(ForcedEndpoint::Literal(endpoint.to_string()));
        self
    }

    pub fn with_forced_fn(
        mut self,
        derive: impl Fn(&Request<Bytes>) -> Option<String> + Send + Sync + 'static,
    ) -> Self {
        self.forced = Some(ForcedEndpoint::FromRequest(Arc::new(derive)));
        self
    }
}

/// Matches requests against the registered bindings and runs the cycle.
#[derive(Clone)]
pub struct Router {
    dispatcher: Arc<Dispatcher>,
    bindings: Arc<Vec<RouteBinding>>,
}

impl Router {
    pub fn new(dispatcher: Arc<Dispatcher>, bindings: Vec<RouteBinding>) -> Self {
        Self {
            dispatcher,
            bindings: Arc::new(bindings),
        }
    }

    pub async fn route(&self, req: Request<Bytes>) -> Response<Bytes> {
        let Some(binding) = self.find_binding(&req) else {
            tracing::warn!(
                method = %req.method(),
                path = %req.uri().path(),
                "no route matched"
            );
            return plain_response(StatusCode::NOT_FOUND, "no route matched\n");
        };

        metrics::counter!(metrics_defs::REQUESTS_SERVED.name).increment(1);
        self.run_cycle(binding, req).await
    }

    fn find_binding(&self, req: &Request<Bytes>) -> Option<&RouteBinding> {
        self.bindings
            .iter()
            .find(|binding| binding.method.matches(req.method()) && binding.path == req.uri().path())
    }

    async fn run_cycle(&self, binding: &RouteBinding, req: Request<Bytes>) -> Response<Bytes> {
        let mut scratch = Scratch::new();

        let keys = match (binding.extract)(&req, &mut scratch) {
            Extraction::Keys(keys) => keys,
            Extraction::Done(response) => return response,
        };

        let forced = match &binding.forced {
            Some(ForcedEndpoint::Literal(name)) => Some(name.clone()),
            Some(ForcedEndpoint::FromRequest(derive)) => derive(&req),
            None => None,
        };

        metrics::counter!(metrics_defs::KEYS_LOADED.name).increment(keys.len() as u64);
        let batch = self.dispatcher.load(&keys, forced.as_deref());

        match self.dispatcher.p_flush(batch).await {
            Ok(results) => {
                tracing::debug!(
                    path = %binding.path,
                    requested = keys.len(),
                    returned = results.len(),
                    "batch served"
                );
                (binding.respond)(results, &scratch)
            }
            Err(error) => {
                metrics::counter!(metrics_defs::BATCHES_FAILED.name).increment(1);
                tracing::error!(path = %binding.path, error = %error, "batch flush failed");
                match &binding.on_error {
                    Some(hook) => hook(&error),
                    // No error hook registered; the client gets a bare 500.
                    None => plain_response(StatusCode::INTERNAL_SERVER_ERROR, ""),
                }
            }
        }
    }
}

pub fn plain_response(status: StatusCode, body: &str) -> Response<Bytes> {
    let mut response = Response::new(Bytes::from(body.to_string()));
    *response.status_mut() = status;
    response
}

pub fn json_response<T: Serialize>(status: StatusCode, value: &T) -> Response<Bytes> {
    match serde_json::to_vec(value) {
        Ok(body) => {
            let mut response = Response::new(Bytes::from(body));
            *response.status_mut() = status;
            response
                .headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            response
        }
        Err(error) => {
            tracing::error!(error = %error, "response serialization failed");
            plain_response(StatusCode::INTERNAL_SERVER_ERROR, "")
        }
    }
}
