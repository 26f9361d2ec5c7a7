//! HTTP server and graceful shutdown.
//!
//! # Shutdown sequence
//!
//! On **SIGTERM** or **SIGINT** (Ctrl-C) the server:
//! 1. Keeps serving for the configured shutdown delay, so an external load
//!    balancer has time to stop routing traffic here.
//! 2. Stops `listener.accept()`; no new connections are made.
//! 3. Tells every open connection to close once its in-flight request is
//!    answered, and waits up to the grace period for that to happen.
//! 4. Aborts whatever is still running and returns from [`Server::serve`].
//!
//! Closing the store is left to the caller, after `serve` returns.

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::Full;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use hyper_util::server::graceful::GracefulShutdown;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::error::Error;
use crate::request::Request;
use crate::router::Router;
use crate::status::Status;

pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(15);
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(15);

/// The HTTP server.
pub struct Server {
    addr: SocketAddr,
    shutdown_delay: Duration,
    grace_period: Duration,
    read_timeout: Duration,
}

impl Server {
    /// Configures the server to bind to `addr` when [`serve`](Server::serve)
    /// is called.
    pub fn bind(addr: SocketAddr) -> Self {
        Self {
            addr,
            shutdown_delay: Duration::ZERO,
            grace_period: DEFAULT_GRACE_PERIOD,
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }

    /// How long to keep serving after the shutdown signal arrives.
    pub fn shutdown_delay(mut self, delay: Duration) -> Self {
        self.shutdown_delay = delay;
        self
    }

    /// How long in-flight requests get to finish once accepting has stopped.
    pub fn grace_period(mut self, grace: Duration) -> Self {
        self.grace_period = grace;
        self
    }

    /// Deadline for a client to send the request headers.
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Serves `router` until SIGTERM or Ctrl-C, then shuts down gracefully.
    pub async fn serve(self, router: Router) -> Result<(), Error> {
        self.serve_with_shutdown(router, shutdown_signal()).await
    }

    /// Serves `router` until `signal` resolves, then shuts down gracefully.
    pub async fn serve_with_shutdown<F>(self, router: Router, signal: F) -> Result<(), Error>
    where
        F: Future<Output = ()>,
    {
        let listener = TcpListener::bind(self.addr).await?;
        let router = Arc::new(router);

        info!(addr = %listener.local_addr()?, "worker-api listening");

        let mut builder = ConnBuilder::new(TokioExecutor::new());
        builder
            .http1()
            .timer(TokioTimer::new())
            .header_read_timeout(self.read_timeout);

        // Signals every watched connection to finish its current request and
        // close when shutdown begins.
        let graceful = GracefulShutdown::new();
        let mut tasks = JoinSet::new();

        let delay = self.shutdown_delay;
        let shutdown = async move {
            signal.await;
            info!(delay = ?delay, "shutdown signal received, shutting down the server");
            tokio::time::sleep(delay).await;
        };
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                // Shutdown is checked first so that once it fires no queued
                // connection is accepted.
                biased;

                () = &mut shutdown => {
                    info!(in_flight = tasks.len(), "no longer accepting connections, draining");
                    break;
                }

                res = listener.accept() => {
                    let (stream, remote_addr) = match res {
                        Ok(v) => v,
                        Err(e) => {
                            error!("accept error: {e}");
                            continue;
                        }
                    };

                    let router = Arc::clone(&router);
                    let svc = service_fn(move |req| {
                        let router = Arc::clone(&router);
                        async move { dispatch(router, req, remote_addr).await }
                    });

                    let conn = builder.serve_connection_with_upgrades(TokioIo::new(stream), svc);
                    let conn = graceful.watch(conn.into_owned());
                    tasks.spawn(async move {
                        if let Err(e) = conn.await {
                            debug!(peer = %remote_addr, "connection error: {e}");
                        }
                    });
                }

                // Reap finished connection tasks so the JoinSet does not grow
                // without bound on long-running servers.
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        }

        drop(listener);

        let drained = tokio::time::timeout(self.grace_period, async {
            graceful.shutdown().await;
            while tasks.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(
                remaining = tasks.len(),
                grace_period = ?self.grace_period,
                "grace period elapsed, aborting remaining connections"
            );
            tasks.shutdown().await;
        }

        info!("the server has been shut down");
        Ok(())
    }
}

// ── Request dispatch ──────────────────────────────────────────────────────────

/// Buffers one request and runs it through the router.
///
/// The error type is [`Infallible`]: every failure becomes a status code
/// here, so hyper never sees an error.
async fn dispatch(
    router: Arc<Router>,
    req: hyper::Request<hyper::body::Incoming>,
    remote_addr: SocketAddr,
) -> Result<http::Response<Full<Bytes>>, Infallible> {
    let method = req.method().clone();

    let response = match Request::from_hyper(req).await {
        Ok(req) => router.handle(req).await,
        Err(e) => {
            warn!(peer = %remote_addr, "failed to read request body: {e}");
            router.reject(method.as_str(), Status::BadRequest)
        }
    };

    Ok(response.into_inner())
}

// ── Shutdown signal ───────────────────────────────────────────────────────────

/// Resolves on the first shutdown signal the process receives.
///
/// On Unix this listens for both **SIGTERM** and **SIGINT** (Ctrl-C).
/// On Windows only Ctrl-C is available. A handler that cannot be installed
/// is logged and treated as a signal that never arrives.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to install Ctrl-C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c   => {}
        () = sigterm  => {}
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio::sync::oneshot;

    use super::*;
    use crate::app::App;
    use crate::auth::{AuthGate, Credentials};
    use crate::method::Method;
    use crate::metrics::Metrics;
    use crate::response::Response;
    use crate::store::MemoryWorkerStore;

    fn app() -> Arc<App> {
        Arc::new(App::new(
            Arc::new(MemoryWorkerStore::new()),
            AuthGate::new(Credentials::operators(), false),
            Metrics::new().unwrap(),
        ))
    }

    async fn quick(_app: Arc<App>, _req: Request) -> Response {
        Response::text("quick")
    }

    async fn slow(_app: Arc<App>, _req: Request) -> Response {
        tokio::time::sleep(Duration::from_millis(300)).await;
        Response::text("slow")
    }

    async fn stuck(_app: Arc<App>, _req: Request) -> Response {
        tokio::time::sleep(Duration::from_secs(10)).await;
        Response::text("stuck")
    }

    fn timing_router() -> Router {
        Router::new(app())
            .on(Method::Get, "/quick", quick)
            .on(Method::Get, "/slow", slow)
            .on(Method::Get, "/stuck", stuck)
    }

    /// A loopback address nothing is listening on yet.
    async fn free_addr() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    }

    /// Sends one `GET` over a fresh connection and reads until the server
    /// closes it. Retries the connect while the server is still binding.
    async fn get(addr: SocketAddr, path: &str) -> std::io::Result<String> {
        let mut attempts = 0;
        let mut stream = loop {
            match TcpStream::connect(addr).await {
                Ok(stream) => break stream,
                Err(e) if attempts >= 50 => return Err(e),
                Err(_) => {
                    attempts += 1;
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            }
        };

        let head = format!("GET {path} HTTP/1.1\r\nhost: localhost\r\nconnection: close\r\n\r\n");
        stream.write_all(head.as_bytes()).await?;
        let mut raw = String::new();
        stream.read_to_string(&mut raw).await?;
        Ok(raw)
    }

    #[tokio::test]
    async fn returns_after_the_shutdown_signal() {
        let server = Server::bind(([127, 0, 0, 1], 0).into())
            .shutdown_delay(Duration::from_millis(10))
            .grace_period(Duration::from_millis(100));

        let served = server.serve_with_shutdown(crate::api::router(app()), async {}).await;
        assert!(served.is_ok());
    }

    #[tokio::test]
    async fn keeps_accepting_during_the_shutdown_delay() {
        let addr = free_addr().await;
        let (stop, stopped) = oneshot::channel::<()>();
        let server = Server::bind(addr)
            .shutdown_delay(Duration::from_millis(500))
            .grace_period(Duration::from_secs(1));

        let client = async {
            let before = get(addr, "/quick").await.unwrap();
            stop.send(()).unwrap();
            tokio::time::sleep(Duration::from_millis(50)).await;
            let during = get(addr, "/quick").await.unwrap();
            (before, during)
        };

        let (served, (before, during)) = tokio::join!(
            server.serve_with_shutdown(timing_router(), async { stopped.await.ok(); }),
            client,
        );
        assert!(served.is_ok());
        assert!(before.starts_with("HTTP/1.1 200"), "{before}");
        assert!(during.starts_with("HTTP/1.1 200"), "{during}");
        assert!(during.ends_with("quick"));
    }

    #[tokio::test]
    async fn in_flight_requests_finish_within_the_grace_period() {
        let addr = free_addr().await;
        let (stop, stopped) = oneshot::channel::<()>();
        let server = Server::bind(addr).grace_period(Duration::from_secs(5));

        let client = async {
            let request = tokio::spawn(get(addr, "/slow"));
            // The request is inside the handler when the signal arrives.
            tokio::time::sleep(Duration::from_millis(100)).await;
            stop.send(()).unwrap();
            request.await.unwrap()
        };

        let (served, response) = tokio::join!(
            server.serve_with_shutdown(timing_router(), async { stopped.await.ok(); }),
            client,
        );
        assert!(served.is_ok());
        let response = response.unwrap();
        assert!(response.starts_with("HTTP/1.1 200"), "{response}");
        assert!(response.ends_with("slow"));
    }

    #[tokio::test]
    async fn stragglers_are_cut_off_when_the_grace_period_runs_out() {
        let addr = free_addr().await;
        let (stop, stopped) = oneshot::channel::<()>();
        let server = Server::bind(addr).grace_period(Duration::from_millis(100));

        let client = async {
            let request = tokio::spawn(get(addr, "/stuck"));
            tokio::time::sleep(Duration::from_millis(100)).await;
            stop.send(()).unwrap();
            request.await.unwrap()
        };

        let started = std::time::Instant::now();
        let (served, response) = tokio::join!(
            server.serve_with_shutdown(timing_router(), async { stopped.await.ok(); }),
            client,
        );
        assert!(served.is_ok());
        assert!(started.elapsed() < Duration::from_secs(5));
        // The connection is dropped without an answer.
        if let Ok(raw) = response {
            assert!(!raw.starts_with("HTTP/1.1"), "{raw}");
        }
    }
}
