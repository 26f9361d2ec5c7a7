//! # worker-api
//!
//! A small HTTP service for worker records: list, read, create, update and
//! soft-delete, with basic auth on the writes and Prometheus metrics on
//! everything.
//!
//! ## Layout
//!
//! - [`store`]: the [`WorkerStore`] trait plus PostgreSQL and in-memory
//!   implementations. Writes are single-row transactions.
//! - [`auth`]: the basic-auth gate over an injected credential table.
//! - [`metrics`]: request counter and duration histogram on a private
//!   registry.
//! - [`api`]: one handler per endpoint and the routing table.
//! - [`Router`] / [`Server`]: radix-tree routing via [`matchit`], hyper
//!   connections, graceful shutdown.
//!
//! Nothing is global: [`App`] bundles the store, gate and metrics and is
//! handed to the router once at startup.
//!
//! ## Driving the API in-process
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use worker_api::{App, AuthGate, Credentials, MemoryWorkerStore, Metrics, Request, api};
//!
//! # async fn run() {
//! let app = App::new(
//!     Arc::new(MemoryWorkerStore::new()),
//!     AuthGate::new(Credentials::operators(), false),
//!     Metrics::new().unwrap(),
//! );
//! let router = api::router(Arc::new(app));
//!
//! let res = router.handle(Request::new("GET", "/appscode/workers/")).await;
//! assert_eq!(res.status_code(), 200);
//! # }
//! ```

mod app;
mod error;
mod handler;
mod method;
mod request;
mod response;
mod router;
mod server;
mod status;

pub mod api;
pub mod auth;
pub mod config;
pub mod logging;
pub mod metrics;
pub mod store;
pub mod worker;

pub use app::App;
pub use auth::{Access, AuthError, AuthGate, Credentials};
pub use error::{ApiError, Error};
pub use handler::Handler;
pub use method::Method;
pub use metrics::Metrics;
pub use request::Request;
pub use response::{IntoResponse, Response, ResponseBuilder};
pub use router::{Router, UNMATCHED};
pub use server::Server;
pub use status::Status;
pub use store::{MemoryWorkerStore, PgWorkerStore, StoreError, WorkerStore};
pub use worker::{Worker, WorkerInput};
