//! Shared fixtures: a stub origin and a proxy running on ephemeral ports

#![allow(dead_code)]

use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use reel::config::{Config, Mode};
use reel::network::{NetworkHandler, ShutdownHandle};
use reel::proxy::VcrProxy;

/// Minimal origin server counting the requests it answers
///
/// - `GET /ping` answers `{"ok":true}` as JSON
/// - `GET /whoami` echoes the `Authorization` header
/// - `POST /echo` echoes the request body
/// - anything else is 404
pub struct StubOrigin {
    addr: SocketAddr,
    hits: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

impl StubOrigin {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&hits);
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let counter = Arc::clone(&counter);
                tokio::spawn(async move {
                    let service = service_fn(move |request| {
                        counter.fetch_add(1, Ordering::SeqCst);
                        async move { Ok::<_, Infallible>(respond(request).await) }
                    });
                    http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), service)
                        .await
                        .ok();
                });
            }
        });

        Self { addr, hits, task }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

impl Drop for StubOrigin {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn respond(request: Request<Incoming>) -> Response<Full<Bytes>> {
    let path = request.uri().path().to_string();
    let method = request.method().clone();

    let (status, content_type, body) = match (method.as_str(), path.as_str()) {
        ("GET", "/ping") => (
            StatusCode::OK,
            "application/json",
            Bytes::from_static(b"{\"ok\":true}"),
        ),
        ("GET", "/whoami") => {
            let who = request
                .headers()
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("anonymous")
                .to_string();
            (StatusCode::OK, "text/plain", Bytes::from(who))
        }
        ("POST", "/echo") => {
            let body = request.into_body().collect().await.unwrap().to_bytes();
            (StatusCode::OK, "application/octet-stream", body)
        }
        _ => (
            StatusCode::NOT_FOUND,
            "text/plain",
            Bytes::from_static(b"not found"),
        ),
    };

    Response::builder()
        .status(status)
        .header("content-type", content_type)
        .header("x-origin", "stub")
        .body(Full::new(body))
        .unwrap()
}

/// Proxy serving on an ephemeral port
pub struct RunningProxy {
    pub addr: SocketAddr,
    pub proxy: Arc<VcrProxy>,
    shutdown: ShutdownHandle,
    task: JoinHandle<reel::Result<()>>,
}

impl RunningProxy {
    pub async fn start(config: Config) -> Self {
        let config = Arc::new(config);
        let proxy = Arc::new(VcrProxy::start(Arc::clone(&config)).unwrap());
        let handler = NetworkHandler::bind(config, Arc::clone(&proxy))
            .await
            .unwrap();

        Self {
            addr: handler.local_addr(),
            proxy,
            shutdown: handler.shutdown_handle(),
            task: tokio::spawn(handler.run()),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Shut the listener down and wait for the session to be finalized
    pub async fn stop(self) {
        self.shutdown.shutdown();
        self.task.await.unwrap().unwrap();
    }
}

pub fn record_config(cassette: &Path, origin: &str) -> Config {
    let mut config = Config::new(Mode::Record, cassette, "127.0.0.1:0");
    config.remote_url = Some(origin.to_string());
    config.upstream.timeout_ms = 5_000;
    config
}

pub fn replay_config(cassette: &Path) -> Config {
    Config::new(Mode::Replay, cassette, "127.0.0.1:0")
}

/// Plain pooled client; idle keep-alive connections are closed by the proxy on shutdown
pub fn client() -> reqwest::Client {
    reqwest::Client::new()
}
