//! Prometheus metrics HTTP server.
//!
//! Serves metrics and a liveness endpoint on a configurable address.

use crate::backend::BackendRegistry;
use crate::metrics::MetricsCollector;
use crate::pool::PoolSet;
use crate::util::ShutdownReceiver;
use bytes::Bytes;
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use prometheus_client::encoding::text::encode;
use std::convert::Infallible;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

/// State shared by every metrics request.
struct Endpoint {
    path: String,
    collector: MetricsCollector,
    backends: Arc<BackendRegistry>,
    pools: Arc<PoolSet>,
}

/// Prometheus metrics HTTP server.
pub struct MetricsServer {
    listener: TcpListener,
    endpoint: Arc<Endpoint>,
}

impl MetricsServer {
    /// Bind the metrics server.
    ///
    /// `/health` answers 200 while `backends` has at least one healthy
    /// member and 503 otherwise.
    pub async fn bind(
        address: SocketAddr,
        path: String,
        collector: MetricsCollector,
        backends: Arc<BackendRegistry>,
        pools: Arc<PoolSet>,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(address).await?;
        Ok(Self {
            listener,
            endpoint: Arc::new(Endpoint {
                path,
                collector,
                backends,
                pools,
            }),
        })
    }

    /// Address the server is listening on.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Run the metrics server until shutdown.
    pub async fn run(self, mut shutdown: ShutdownReceiver) {
        if let Ok(address) = self.local_addr() {
            info!(address = %address, path = %self.endpoint.path, "metrics server started");
        }

        loop {
            tokio::select! {
                accept_result = self.listener.accept() => {
                    match accept_result {
                        Ok((stream, _addr)) => {
                            let endpoint = Arc::clone(&self.endpoint);

                            tokio::spawn(async move {
                                let io = TokioIo::new(stream);
                                let service = service_fn(move |req| {
                                    let endpoint = Arc::clone(&endpoint);
                                    async move { handle_request(req, &endpoint).await }
                                });

                                if let Err(e) = http1::Builder::new()
                                    .serve_connection(io, service)
                                    .await
                                {
                                    debug!(error = %e, "metrics connection error");
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "failed to accept metrics connection");
                        }
                    }
                }

                _ = shutdown.recv() => {
                    info!("metrics server shutting down");
                    break;
                }
            }
        }
    }
}

fn text_response(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
}

/// Handle an incoming metrics request.
async fn handle_request<B>(
    req: Request<B>,
    endpoint: &Endpoint,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let path = req.uri().path();
    let method = req.method();

    debug!(path = %path, method = %method, "metrics request");

    if method != Method::GET {
        return Ok(text_response(
            StatusCode::METHOD_NOT_ALLOWED,
            "Method not allowed\n",
        ));
    }

    if path == endpoint.path {
        endpoint.collector.refresh_pool_gauges(&endpoint.pools);

        let mut buffer = String::new();
        if let Err(e) = encode(&mut buffer, endpoint.collector.registry()) {
            error!(error = %e, "failed to encode metrics");
            return Ok(text_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to encode metrics\n",
            ));
        }

        let mut response = text_response(StatusCode::OK, buffer);
        response.headers_mut().insert(
            hyper::header::CONTENT_TYPE,
            hyper::header::HeaderValue::from_static("text/plain; version=0.0.4; charset=utf-8"),
        );
        Ok(response)
    } else if path == "/health" {
        let healthy = endpoint.backends.healthy_count();
        if healthy > 0 {
            Ok(text_response(
                StatusCode::OK,
                format!("OK: {} of {} backends healthy\n", healthy, endpoint.backends.len()),
            ))
        } else {
            Ok(text_response(
                StatusCode::SERVICE_UNAVAILABLE,
                "No healthy backends\n",
            ))
        }
    } else if path == "/" {
        let body = format!(
            "tcplb metrics server\n\nEndpoints:\n  {} - Prometheus metrics\n  /health - Backend availability\n",
            endpoint.path
        );
        Ok(text_response(StatusCode::OK, body))
    } else {
        Ok(text_response(StatusCode::NOT_FOUND, "Not found\n"))
    }
}
