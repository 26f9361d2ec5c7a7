//! Radix-tree request router.
//!
//! One tree per HTTP method, O(path-length) lookup. A path that misses only
//! by a trailing slash is routed as if it had (or lacked) one, and path
//! parameters reach handlers percent-decoded. The router is also the
//! single place where a request is timed, checked against the auth gate
//! (for routes registered with [`Router::protected`]) and recorded in the
//! metrics. Handlers never touch either concern, so every outcome,
//! including `401`s, unknown paths and timeouts, is recorded exactly once
//! with the status code actually sent.

use std::collections::HashMap;
use std::str::Utf8Error;
use std::sync::Arc;
use std::time::{Duration, Instant};

use matchit::Router as MatchitRouter;
use percent_encoding::percent_decode_str;
use tracing::{debug, warn};

use crate::app::App;
use crate::error::ApiError;
use crate::handler::{BoxedHandler, Handler};
use crate::method::Method;
use crate::request::Request;
use crate::response::{IntoResponse, Response};
use crate::status::Status;

/// Route label used for requests that matched no registered route.
pub const UNMATCHED: &str = "unmatched";

/// Method label used for method tokens outside [`Method`].
const OTHER_METHOD: &str = "OTHER";

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Clone)]
struct Route {
    pattern: Arc<str>,
    handler: BoxedHandler,
    protected: bool,
}

/// The application router.
///
/// Build it once at startup with the shared [`App`]; pass it to
/// [`Server::serve`](crate::Server::serve). Registrations chain.
pub struct Router {
    app: Arc<App>,
    routes: HashMap<Method, MatchitRouter<Route>>,
    request_timeout: Duration,
}

impl Router {
    pub fn new(app: Arc<App>) -> Self {
        Self { app, routes: HashMap::new(), request_timeout: DEFAULT_REQUEST_TIMEOUT }
    }

    /// Register an open route. Path parameters use `{name}` syntax.
    ///
    /// ```rust,ignore
    /// Router::new(app)
    ///     .on(Method::Get, "/appscode/workers/{username}", get_worker)
    ///     .protected(Method::Delete, "/appscode/workers/{username}", delete_worker);
    /// ```
    pub fn on(self, method: Method, path: &str, handler: impl Handler) -> Self {
        self.add(method, path, handler, false)
    }

    /// Register a route that requires the caller to pass the auth gate.
    pub fn protected(self, method: Method, path: &str, handler: impl Handler) -> Self {
        self.add(method, path, handler, true)
    }

    /// Upper bound on a single handler run. Exceeding it answers `503`.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn app(&self) -> &Arc<App> {
        &self.app
    }

    fn add(mut self, method: Method, path: &str, handler: impl Handler, protected: bool) -> Self {
        let route = Route {
            pattern: Arc::from(path),
            handler: handler.into_boxed_handler(),
            protected,
        };
        self.routes
            .entry(method)
            .or_default()
            .insert(path, route)
            .unwrap_or_else(|e| panic!("invalid route `{path}`: {e}"));
        self
    }

    /// Routes, authorizes, runs and records one request.
    pub async fn handle(&self, req: Request) -> Response {
        let started = Instant::now();
        let method = req.method.parse::<Method>().ok();
        let method_label = method.map_or(OTHER_METHOD, Method::as_str);
        let path = req.path.clone();

        let (route, response) = match method {
            Some(method) => self.dispatch(method, req).await,
            None => (Arc::from(UNMATCHED), Status::MethodNotAllowed.into_response()),
        };

        let elapsed = started.elapsed();
        self.app.metrics.record_request(&route, method_label, response.status, elapsed);
        debug!(
            method = method_label,
            path = %path,
            route = %route,
            status = response.status,
            elapsed_ms = elapsed.as_millis() as u64,
            "request completed"
        );
        response
    }

    /// Answers a request that never made it to routing (e.g. its body could
    /// not be read), still recording it.
    pub(crate) fn reject(&self, method: &str, status: Status) -> Response {
        let method_label = method.parse::<Method>().map_or(OTHER_METHOD, Method::as_str);
        self.app.metrics.record_request(UNMATCHED, method_label, status.as_u16(), Duration::ZERO);
        Response::status(status)
    }

    async fn dispatch(&self, method: Method, mut req: Request) -> (Arc<str>, Response) {
        let Some((route, params)) = self.lookup(method, &req.path) else {
            return (Arc::from(UNMATCHED), Status::NotFound.into_response());
        };

        if route.protected {
            match self.app.auth.authorize(req.header("authorization")) {
                Ok(access) => debug!(?access, route = %route.pattern, "authorized"),
                Err(e) => {
                    warn!(route = %route.pattern, method = %method, "rejected: {e}");
                    return (route.pattern, ApiError::from(e).into_response());
                }
            }
        }

        req.params = match params {
            Ok(params) => params,
            Err(e) => {
                debug!(route = %route.pattern, "undecodable path parameter: {e}");
                let response = Response::builder()
                    .status(Status::BadRequest)
                    .text("path parameters must be percent-encoded UTF-8");
                return (route.pattern, response);
            }
        };
        let call = route.handler.call(Arc::clone(&self.app), req);
        let response = match tokio::time::timeout(self.request_timeout, call).await {
            Ok(response) => response,
            Err(_) => {
                warn!(route = %route.pattern, timeout = ?self.request_timeout, "request timed out");
                Response::builder()
                    .status(Status::ServiceUnavailable)
                    .text("request timed out")
            }
        };
        (route.pattern, response)
    }

    /// Finds the route for `path`, tolerating a missing or extra trailing
    /// slash, and percent-decodes its parameters.
    fn lookup(&self, method: Method, path: &str) -> Option<(Route, Result<Params, Utf8Error>)> {
        let tree = self.routes.get(&method)?;
        let alternate = toggle_trailing_slash(path);
        let matched = match tree.at(path) {
            Ok(matched) => matched,
            Err(_) => tree.at(alternate.as_deref()?).ok()?,
        };

        let route = matched.value.clone();
        let params = matched.params.iter()
            .map(|(k, v)| percent_decode_str(v).decode_utf8().map(|v| (k.to_owned(), v.into_owned())))
            .collect();
        Some((route, params))
    }
}

type Params = HashMap<String, String>;

fn toggle_trailing_slash(path: &str) -> Option<String> {
    match path.strip_suffix('/') {
        Some("") => None,
        Some(trimmed) => Some(trimmed.to_owned()),
        None => Some(format!("{path}/")),
    }
}
