//! Request-batching broker: accepts key sets over HTTP, fans them out to a
//! bulk-get document store in bounded packets, and answers with one merged
//! id-keyed map.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use dispatcher::{Accepter, DispatchError, Dispatcher, ResultMap};
use hyper::body::Bytes;
use hyper::{Method, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing_subscriber::EnvFilter;

mod config;
mod errors;
mod metrics_defs;
mod routes;
mod service;

use config::Config;
use errors::BrokerError;
use routes::{Extraction, RouteBinding, Router, Scratch, json_response};
use service::BrokerService;

#[derive(Parser)]
#[command(
    name = "broker",
    version,
    about = "Request-batching broker for a bulk-get document store"
)]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(short, long)]
    config: PathBuf,

    /// Tracing filter, e.g. "debug" or "broker=trace" (overrides RUST_LOG)
    #[arg(long)]
    log: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log.as_deref());

    if let Err(error) = run(&cli).await {
        tracing::error!(error = %error, "broker exited");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

fn init_tracing(filter: Option<&str>) {
    let filter = match filter {
        Some(directives) => EnvFilter::new(directives),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run(cli: &Cli) -> Result<(), BrokerError> {
    let config = Config::from_file(&cli.config)?;
    let service = build_service(&config)?;
    service::run(&config.listener.host, config.listener.port, service).await
}

/// Wires the dispatcher and the route bindings out of a loaded config.
fn build_service(config: &Config) -> Result<BrokerService, BrokerError> {
    let dispatcher = Arc::new(Dispatcher::with_packet_size(
        config.backend.url.clone(),
        config.backend.packet_size,
    ));

    for endpoint in &config.endpoints {
        dispatcher.set(
            &endpoint.name,
            Accepter::Rule(endpoint.rule.clone()),
            endpoint.packet_size,
            endpoint.hidden,
        );
    }

    let bindings = vec![
        handshake_binding()?,
        bulk_request_binding()?,
        direct_request_binding()?,
    ];

    let router = Router::new(dispatcher, bindings);
    Ok(BrokerService::new(router, config.limits.max_body_bytes))
}

#[derive(Deserialize)]
struct BulkRequestBody {
    keys: Vec<String>,
}

#[derive(Deserialize)]
struct DirectRequestBody {
    keys: Vec<String>,
    endpoint: String,
}

fn handshake_binding() -> Result<RouteBinding, BrokerError> {
    RouteBinding::new(
        &Method::GET,
        "/handshake",
        |_req, _scratch| Extraction::Done(handshake_answer()),
        |_results, _scratch| handshake_answer(),
    )
}

fn handshake_answer() -> Response<Bytes> {
    json_response(StatusCode::OK, &json!({"handshake": true}))
}

fn bulk_request_binding() -> Result<RouteBinding, BrokerError> {
    Ok(RouteBinding::new(
        &Method::POST,
        "/bulk_request",
        |req, scratch| match serde_json::from_slice::<BulkRequestBody>(req.body()) {
            Ok(body) if !body.keys.is_empty() => {
                scratch.insert("requested".to_string(), json!(body.keys.len()));
                Extraction::Keys(body.keys)
            }
            _ => malformed_request(),
        },
        respond_with_request_map,
    )?
    .with_error(database_error))
}

/// Like `/bulk_request`, but every key is forced into the endpoint the
/// request names, bypassing the accepter scan.
fn direct_request_binding() -> Result<RouteBinding, BrokerError> {
    Ok(RouteBinding::new(
        &Method::POST,
        "/direct_request",
        |req, scratch| match serde_json::from_slice::<DirectRequestBody>(req.body()) {
            Ok(body) if !body.keys.is_empty() => {
                scratch.insert("requested".to_string(), json!(body.keys.len()));
                Extraction::Keys(body.keys)
            }
            _ => malformed_request(),
        },
        respond_with_request_map,
    )?
    .with_error(database_error)
    .with_forced_fn(|req| {
        serde_json::from_slice::<DirectRequestBody>(req.body())
            .ok()
            .map(|body| body.endpoint)
    }))
}

fn malformed_request() -> Extraction {
    Extraction::Done(json_response(
        StatusCode::BAD_REQUEST,
        &json!({"error": "malformed request"}),
    ))
}

fn respond_with_request_map(results: ResultMap, scratch: &Scratch) -> Response<Bytes> {
    tracing::debug!(
        requested = ?scratch.get("requested"),
        returned = results.len(),
        "answering bulk request"
    );
    json_response(StatusCode::OK, &json!({"request": results}))
}

fn database_error(_error: &DispatchError) -> Response<Bytes> {
    json_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        &json!({"error": "database error"}),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Backend, EndpointConfig, Limits, Listener};
    use dispatcher::AcceptRule;
    use http_body_util::BodyExt;
    use hyper::Request;
    use hyper::service::service_fn;
    use hyper_util::rt::{TokioExecutor, TokioIo};
    use serde_json::Value;
    use tokio::net::TcpListener;
    use url::Url;

    /// Answers every requested id with `{"key": <id>}`.
    async fn start_mock_backend() -> Url {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let io = TokioIo::new(stream);
                tokio::spawn(async move {
                    let service =
                        service_fn(|req: Request<hyper::body::Incoming>| async move {
                            let body = req.into_body().collect().await.unwrap().to_bytes();
                            let request: Value = serde_json::from_slice(&body).unwrap();
                            let results: Vec<Value> = request["docs"]
                                .as_array()
                                .unwrap()
                                .iter()
                                .map(|doc| {
                                    let id = doc["id"].as_str().unwrap();
                                    json!({"id": id, "docs": [{"ok": {"key": id}}]})
                                })
                                .collect();
                            let payload = json!({"results": results}).to_string();
                            Ok::<_, std::convert::Infallible>(Response::new(
                                http_body_util::Full::new(Bytes::from(payload)),
                            ))
                        });
                    let _ = hyper_util::server::conn::auto::Builder::new(TokioExecutor::new())
                        .serve_connection(io, service)
                        .await;
                });
            }
        });

        Url::parse(&format!("http://{addr}")).unwrap()
    }

    async fn start_broker(config: Config) -> String {
        let service = build_service(&config).unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let _ = service::serve(listener, service).await;
        });

        format!("http://{addr}")
    }

    fn test_config(backend: Url, max_body_bytes: usize) -> Config {
        Config {
            listener: Listener {
                host: "127.0.0.1".to_string(),
                port: 3280,
            },
            backend: Backend {
                url: backend,
                packet_size: 2,
            },
            limits: Limits { max_body_bytes },
            endpoints: vec![EndpointConfig {
                name: "docs".to_string(),
                rule: AcceptRule::Any,
                packet_size: None,
                hidden: false,
            }],
        }
    }

    const MB: usize = 1024 * 1024;

    #[tokio::test]
    async fn handshake_answers() {
        let backend = start_mock_backend().await;
        let base = start_broker(test_config(backend, MB)).await;

        let response = reqwest::get(format!("{base}/handshake")).await.unwrap();

        assert_eq!(response.status().as_u16(), 200);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body, json!({"handshake": true}));
    }

    #[tokio::test]
    async fn bulk_request_round_trip() {
        let backend = start_mock_backend().await;
        let base = start_broker(test_config(backend, MB)).await;

        let response = reqwest::Client::new()
            .post(format!("{base}/bulk_request"))
            .json(&json!({"keys": ["k1", "k2", "k3"]}))
            .send()
            .await
            .unwrap();

        assert_eq!(response.status().as_u16(), 200);
        let body: Value = response.json().await.unwrap();
        assert_eq!(
            body,
            json!({"request": {
                "k1": {"key": "k1"},
                "k2": {"key": "k2"},
                "k3": {"key": "k3"},
            }})
        );
    }

    #[tokio::test]
    async fn malformed_bulk_request_is_a_400() {
        let backend = start_mock_backend().await;
        let base = start_broker(test_config(backend, MB)).await;

        let response = reqwest::Client::new()
            .post(format!("{base}/bulk_request"))
            .json(&json!({"ids": ["k1"]}))
            .send()
            .await
            .unwrap();

        assert_eq!(response.status().as_u16(), 400);
    }

    #[tokio::test]
    async fn unknown_route_is_a_404() {
        let backend = start_mock_backend().await;
        let base = start_broker(test_config(backend, MB)).await;

        let response = reqwest::get(format!("{base}/nope")).await.unwrap();

        assert_eq!(response.status().as_u16(), 404);
    }

    #[tokio::test]
    async fn oversized_body_is_a_413() {
        let backend = start_mock_backend().await;
        let base = start_broker(test_config(backend, 64)).await;

        let keys: Vec<String> = (0..64).map(|n| format!("key-{n}")).collect();
        let response = reqwest::Client::new()
            .post(format!("{base}/bulk_request"))
            .json(&json!({"keys": keys}))
            .send()
            .await
            .unwrap();

        assert_eq!(response.status().as_u16(), 413);
    }

    #[tokio::test]
    async fn direct_request_forces_the_endpoint() {
        let backend = start_mock_backend().await;
        let base = start_broker(test_config(backend, MB)).await;

        let response = reqwest::Client::new()
            .post(format!("{base}/direct_request"))
            .json(&json!({"keys": ["k9"], "endpoint": "special"}))
            .send()
            .await
            .unwrap();

        assert_eq!(response.status().as_u16(), 200);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body, json!({"request": {"k9": {"key": "k9"}}}));
    }
}
