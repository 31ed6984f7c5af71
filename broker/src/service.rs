//! Hyper glue: collects request bodies under the configured cap and hands
//! complete requests to the router.

use std::pin::Pin;

use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full, Limited};
use hyper::body::{Bytes, Incoming};
use hyper::service::Service;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder;
use tokio::net::TcpListener;

use crate::errors::BrokerError;
use crate::routes::{Router, plain_response};

#[derive(Clone)]
pub struct BrokerService {
    router: Router,
    max_body_bytes: usize,
}

impl BrokerService {
    pub fn new(router: Router, max_body_bytes: usize) -> Self {
        Self {
            router,
            max_body_bytes,
        }
    }
}

impl Service<Request<Incoming>> for BrokerService {
    type Response = Response<BoxBody<Bytes, BrokerError>>;
    type Error = BrokerError;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let router = self.router.clone();
        let limit = self.max_body_bytes;

        Box::pin(async move {
            let (parts, body) = req.into_parts();

            // Limited errors out once the cap is crossed.
            let bytes = match Limited::new(body, limit).collect().await {
                Ok(collected) => collected.to_bytes(),
                Err(error) => {
                    tracing::warn!(error = %error, limit, "refusing request body");
                    return Ok(boxed(plain_response(
                        StatusCode::PAYLOAD_TOO_LARGE,
                        "request body too large\n",
                    )));
                }
            };

            let response = router.route(Request::from_parts(parts, bytes)).await;
            Ok(boxed(response))
        })
    }
}

fn boxed(response: Response<Bytes>) -> Response<BoxBody<Bytes, BrokerError>> {
    let (parts, body) = response.into_parts();
    Response::from_parts(parts, Full::new(body).map_err(|e| match e {}).boxed())
}

/// Binds the listener and serves connections until the process is stopped.
pub async fn run(host: &str, port: u16, service: BrokerService) -> Result<(), BrokerError> {
    let listener = TcpListener::bind(format!("{host}:{port}")).await?;
    tracing::info!(host, port, "broker listening");

    serve(listener, service).await
}

pub async fn serve(listener: TcpListener, service: BrokerService) -> Result<(), BrokerError> {
    loop {
        let (stream, _peer_addr) = listener.accept().await?;
        let _ = stream.set_nodelay(true);
        let io = TokioIo::new(stream);
        let svc = service.clone();

        // Hand the connection to hyper; auto-detect h1/h2 on this socket
        tokio::spawn(async move {
            let _ = Builder::new(TokioExecutor::new())
                .serve_connection(io, svc)
                .await;
        });
    }
}
