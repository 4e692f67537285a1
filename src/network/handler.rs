//! Main network handler

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::proxy::VcrProxy;
use crate::{ReelError, Result};

use super::{HttpHandler, SHUTDOWN_TIMEOUT_MS};

/// Stops a running [`NetworkHandler`]
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: broadcast::Sender<()>,
}

impl ShutdownHandle {
    /// Ask the handler to stop accepting and finalize the session
    pub fn shutdown(&self) {
        self.tx.send(()).ok();
    }
}

/// Accepts connections and serves them through the proxy
pub struct NetworkHandler {
    config: Arc<Config>,
    proxy: Arc<VcrProxy>,
    listener: TcpListener,
    local_addr: SocketAddr,
    connections: Arc<Semaphore>,
    shutdown_tx: broadcast::Sender<()>,
    shutdown_rx: broadcast::Receiver<()>,
}

impl NetworkHandler {
    /// Bind the configured listen address
    ///
    /// # Errors
    ///
    /// Returns error if the address is invalid or cannot be bound
    pub async fn bind(config: Arc<Config>, proxy: Arc<VcrProxy>) -> Result<Self> {
        let addr = config.listen_addr()?;
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        info!("Listening on {} ({} mode)", local_addr, proxy.mode());

        Ok(Self {
            connections: Arc::new(Semaphore::new(config.limits.max_connections)),
            config,
            proxy,
            listener,
            local_addr,
            shutdown_tx,
            shutdown_rx,
        })
    }

    /// Address actually bound (useful with port 0)
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Handle that stops [`NetworkHandler::run`]
    #[must_use]
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: self.shutdown_tx.clone(),
        }
    }

    /// Serve until Ctrl-C or a shutdown request, then finalize the session
    ///
    /// # Errors
    ///
    /// Returns error if the recorder cannot be finalized
    pub async fn run(self) -> Result<()> {
        let Self {
            config,
            proxy,
            listener,
            connections,
            shutdown_tx: _shutdown_tx,
            mut shutdown_rx,
            ..
        } = self;
        let mut tasks = JoinSet::new();
        let (drain_tx, _) = broadcast::channel(1);

        let shutdown_signal = async {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("Received SIGINT, shutting down");
                }
                Ok(()) = shutdown_rx.recv() => {
                    info!("Received shutdown signal");
                }
            }
        };
        tokio::pin!(shutdown_signal);

        loop {
            tokio::select! {
                () = &mut shutdown_signal => break,
                Some(result) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = result {
                        warn!("Connection task failed: {}", e);
                    }
                }
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            let Ok(permit) = Arc::clone(&connections).try_acquire_owned() else {
                                warn!("Connection limit reached, rejecting {}", peer_addr);
                                drop(stream);
                                continue;
                            };

                            let config = Arc::clone(&config);
                            let proxy = Arc::clone(&proxy);
                            let drain = drain_tx.subscribe();
                            tasks.spawn(async move {
                                let _permit = permit;
                                serve_connection(stream, peer_addr, config, proxy, drain).await;
                            });
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
            }
        }

        drop(listener);
        drain_tx.send(()).ok();

        // Give in-flight requests a chance to finish
        let shutdown_timeout = Duration::from_millis(SHUTDOWN_TIMEOUT_MS);
        let drained = tokio::time::timeout(shutdown_timeout, async {
            while let Some(result) = tasks.join_next().await {
                if let Err(e) = result {
                    warn!("Task cleanup error: {}", e);
                }
            }
        })
        .await;
        if drained.is_err() {
            warn!("Aborting {} connections still open", tasks.len());
            tasks.shutdown().await;
        }

        proxy.finalize().await?;
        info!("Shutdown complete");
        Ok(())
    }
}

/// Serve one HTTP/1.1 connection
///
/// Once `drain` fires the connection finishes the request in flight, if any,
/// and then closes instead of waiting for the next one.
async fn serve_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    config: Arc<Config>,
    proxy: Arc<VcrProxy>,
    mut drain: broadcast::Receiver<()>,
) {
    let service = service_fn(move |request| {
        let config = Arc::clone(&config);
        let proxy = Arc::clone(&proxy);
        async move { Ok::<_, Infallible>(route(request, &config, &proxy).await) }
    });

    let conn = http1::Builder::new().serve_connection(TokioIo::new(stream), service);
    tokio::pin!(conn);

    let mut draining = false;
    let result = loop {
        tokio::select! {
            result = conn.as_mut() => break result,
            Ok(()) = drain.recv(), if !draining => {
                draining = true;
                conn.as_mut().graceful_shutdown();
            }
        }
    };

    if let Err(e) = result {
        debug!("Connection from {} closed: {}", peer_addr, e);
    }
}

/// Dispatch a request to the control endpoint or the proxy
async fn route(
    request: Request<Incoming>,
    config: &Config,
    proxy: &VcrProxy,
) -> Response<Full<Bytes>> {
    if request.uri().path() == config.control_path {
        return stop_recording(proxy).await;
    }

    let captured = match HttpHandler::capture_request(request, &config.limits).await {
        Ok(captured) => captured,
        Err(e) => {
            warn!("Rejected request: {}", e);
            return HttpHandler::error_response(&e);
        }
    };

    let method = captured.method.clone();
    let uri = captured.uri.clone();

    match proxy.handle_request(captured).await {
        Ok(response) => {
            debug!("{} {} -> {}", method, uri, response.status);
            HttpHandler::build_response(&response, config.response.headers)
        }
        Err(e) => {
            warn!("{} {} failed: {}", method, uri, e);
            HttpHandler::error_response(&e)
        }
    }
}

async fn stop_recording(proxy: &VcrProxy) -> Response<Full<Bytes>> {
    if proxy.mode().is_replay() {
        return HttpHandler::create_response(StatusCode::CONFLICT, "Not recording\n");
    }

    match proxy.stop_recording().await {
        Ok(count) => {
            info!("Recording stopped via control endpoint ({} interactions)", count);
            HttpHandler::create_response(
                StatusCode::OK,
                &format!("Recording stopped: {count} interactions\n"),
            )
        }
        Err(e @ ReelError::ConfigError(_)) => {
            HttpHandler::create_response(StatusCode::CONFLICT, &format!("{e}\n"))
        }
        Err(e) => HttpHandler::error_response(&e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Mode;
    use crate::storage::{Cassette, Interaction, SerializableRequest, SerializableResponse};
    use tempfile::TempDir;

    async fn replay_handler(temp_dir: &TempDir) -> NetworkHandler {
        let path = temp_dir.path().join("handler.jsonl");
        let mut cassette = Cassette::new(&path);
        cassette.interactions.push(Interaction {
            request: SerializableRequest::new("GET", "/ping"),
            response: SerializableResponse::new(200, "pong"),
        });
        std::fs::write(&path, cassette.encode().unwrap()).unwrap();

        let mut config = Config::new(Mode::Replay, &path, "127.0.0.1:0");
        config.limits.max_connections = 10;
        let config = Arc::new(config);
        let proxy = Arc::new(VcrProxy::start(Arc::clone(&config)).unwrap());

        NetworkHandler::bind(config, proxy).await.unwrap()
    }

    #[tokio::test]
    async fn test_bind_ephemeral_port() {
        let temp_dir = TempDir::new().unwrap();
        let handler = replay_handler(&temp_dir).await;

        assert_ne!(handler.local_addr().port(), 0);
        assert_eq!(handler.connections.available_permits(), 10);
    }

    #[tokio::test]
    async fn test_shutdown_signal() {
        let temp_dir = TempDir::new().unwrap();
        let handler = replay_handler(&temp_dir).await;
        let shutdown = handler.shutdown_handle();

        // Sent before run starts; the receiver already exists
        shutdown.shutdown();

        let result = tokio::time::timeout(Duration::from_secs(2), handler.run()).await;
        assert!(result.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_serves_replay_and_control_conflict() {
        let temp_dir = TempDir::new().unwrap();
        let handler = replay_handler(&temp_dir).await;
        let addr = handler.local_addr();
        let shutdown = handler.shutdown_handle();
        let server = tokio::spawn(handler.run());

        let client = reqwest::Client::new();

        let response = client
            .get(format!("http://{addr}/ping"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 200);
        assert_eq!(response.text().await.unwrap(), "pong");

        let response = client
            .post(format!("http://{addr}/vcr/stop"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 409);

        let response = client
            .get(format!("http://{addr}/ping"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 500);

        shutdown.shutdown();
        let result = tokio::time::timeout(Duration::from_secs(10), server).await;
        assert!(result.unwrap().unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_idle_keep_alive_connection_does_not_delay_shutdown() {
        let temp_dir = TempDir::new().unwrap();
        let handler = replay_handler(&temp_dir).await;
        let addr = handler.local_addr();
        let shutdown = handler.shutdown_handle();
        let server = tokio::spawn(handler.run());

        // Pooled client: the connection stays open and idle after the response
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(1)
            .build()
            .unwrap();
        let response = client
            .get(format!("http://{addr}/ping"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.text().await.unwrap(), "pong");

        let started = std::time::Instant::now();
        shutdown.shutdown();
        let result = tokio::time::timeout(Duration::from_secs(2), server).await;
        assert!(result.unwrap().unwrap().is_ok());
        assert!(started.elapsed() < Duration::from_millis(SHUTDOWN_TIMEOUT_MS));
        drop(client);
    }
}
