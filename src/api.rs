//! The worker HTTP surface.
//!
//! | Method | Path | Auth |
//! |---|---|---|
//! | GET | `/` | none |
//! | GET | `/appscode/` | none |
//! | GET | `/appscode/workers/` | none |
//! | GET | `/appscode/workers/{username}` | none |
//! | POST | `/appscode/workers/` | basic |
//! | PUT | `/appscode/workers/{username}` | basic |
//! | DELETE | `/appscode/workers/{username}` | basic |
//! | GET | `/metrics` | none |

use std::sync::Arc;

use tracing::{error, info};

use crate::app::App;
use crate::error::ApiError;
use crate::method::Method;
use crate::request::Request;
use crate::response::Response;
use crate::router::Router;
use crate::status::Status;
use crate::worker::{Worker, WorkerInput};

const WELCOME: &str = "Congratulations...! Your API Server is up and running... :) ";
const WELCOME_APPSCODE: &str =
    "Welcome to AppsCode Ltd.. Available Links are : `/appscode/workers`, `/appscode/workers/{username}`";

/// Builds the router with every endpoint registered.
pub fn router(app: Arc<App>) -> Router {
    Router::new(app)
        .on(Method::Get, "/", welcome)
        .on(Method::Get, "/appscode/", welcome_appscode)
        .on(Method::Get, "/appscode/workers/", list_workers)
        .on(Method::Get, "/appscode/workers/{username}", get_worker)
        .protected(Method::Post, "/appscode/workers/", create_worker)
        .protected(Method::Put, "/appscode/workers/{username}", update_worker)
        .protected(Method::Delete, "/appscode/workers/{username}", delete_worker)
        .on(Method::Get, "/metrics", metrics)
}

fn username(req: &Request) -> String {
    req.param("username").unwrap_or_default().to_owned()
}

async fn welcome(_app: Arc<App>, _req: Request) -> Response {
    Response::serialize(Status::Ok, WELCOME)
}

async fn welcome_appscode(_app: Arc<App>, _req: Request) -> Response {
    Response::serialize(Status::Ok, WELCOME_APPSCODE)
}

async fn list_workers(app: Arc<App>, _req: Request) -> Result<Response, ApiError> {
    let workers = app.store.list().await?;
    Ok(Response::serialize(Status::Ok, &workers))
}

async fn get_worker(app: Arc<App>, req: Request) -> Result<Response, ApiError> {
    let username = username(&req);
    let worker = app.store.get(&username).await?.ok_or(ApiError::NotFound(username))?;
    Ok(Response::serialize(Status::Ok, &worker))
}

async fn create_worker(app: Arc<App>, req: Request) -> Result<Response, ApiError> {
    let input: WorkerInput = req.json().map_err(ApiError::MalformedBody)?;
    if input.username.is_empty() {
        return Err(ApiError::Validation("Username must be provided".to_owned()));
    }

    // Soft-deleted rows still own their username.
    if app.store.exists_any_scope(&input.username).await? {
        return Err(ApiError::Conflict(format!("worker `{}` already exists", input.username)));
    }

    let stored = app.store.insert(Worker::new(input)).await?;
    info!(username = %stored.username, "worker created");
    Ok(Response::serialize(Status::Created, &stored))
}

async fn update_worker(app: Arc<App>, req: Request) -> Result<Response, ApiError> {
    let username = username(&req);
    let mut worker = app.store.get(&username).await?.ok_or_else(|| ApiError::NotFound(username.clone()))?;

    let input: WorkerInput = req.json().map_err(ApiError::MalformedBody)?;
    // An omitted username means "unchanged"; any other value must match.
    if !input.username.is_empty() && input.username != worker.username {
        return Err(ApiError::UsernameChange {
            current: worker.username,
            requested: input.username,
        });
    }

    worker.apply(input);
    let updated = app.store.update(&username, worker).await?;
    info!(username = %updated.username, version = updated.version, "worker updated");
    Ok(Response::serialize(Status::Ok, &updated))
}

async fn delete_worker(app: Arc<App>, req: Request) -> Result<Response, ApiError> {
    let username = username(&req);
    if app.store.get(&username).await?.is_none() {
        return Err(ApiError::NotFound(username));
    }

    app.store.soft_delete(&username).await?;
    info!(username = %username, "worker deleted");
    Ok(Response::status(Status::Ok))
}

async fn metrics(app: Arc<App>, _req: Request) -> Response {
    match app.metrics.render() {
        Ok(body) => Response::builder().bytes(&app.metrics.content_type(), body),
        Err(e) => {
            error!("metrics encoding failed: {e}");
            Response::status(Status::InternalServerError)
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD;
    use serde_json::{Value, json};

    use super::*;
    use crate::auth::{AuthGate, Credentials};
    use crate::metrics::Metrics;
    use crate::store::{MemoryWorkerStore, StoreError, WorkerStore};

    const WORKERS: &str = "/appscode/workers/";
    const WORKER: &str = "/appscode/workers/{username}";

    fn router_with(store: Arc<dyn WorkerStore>, bypass: bool) -> Router {
        let auth = AuthGate::new(Credentials::operators(), bypass);
        router(Arc::new(App::new(store, auth, Metrics::new().unwrap())))
    }

    fn test_router() -> Router {
        router_with(Arc::new(MemoryWorkerStore::new()), false)
    }

    fn admin(req: Request) -> Request {
        req.with_header("Authorization", &format!("Basic {}", STANDARD.encode("admin:admin")))
    }

    fn body(res: &Response) -> Value {
        serde_json::from_slice(res.body()).unwrap()
    }

    async fn create(router: &Router, doc: Value) -> Response {
        router.handle(admin(Request::new("POST", WORKERS).with_body(doc.to_string()))).await
    }

    /// Fails every call the way an unreachable database would.
    struct DownStore;

    #[async_trait]
    impl WorkerStore for DownStore {
        async fn ensure_schema(&self) -> Result<(), StoreError> { Err(sqlx::Error::PoolTimedOut.into()) }
        async fn get(&self, _: &str) -> Result<Option<Worker>, StoreError> { Err(sqlx::Error::PoolTimedOut.into()) }
        async fn exists_any_scope(&self, _: &str) -> Result<bool, StoreError> { Err(sqlx::Error::PoolTimedOut.into()) }
        async fn list(&self) -> Result<Vec<Worker>, StoreError> { Err(sqlx::Error::PoolTimedOut.into()) }
        async fn insert(&self, _: Worker) -> Result<Worker, StoreError> { Err(sqlx::Error::PoolTimedOut.into()) }
        async fn update(&self, _: &str, _: Worker) -> Result<Worker, StoreError> { Err(sqlx::Error::PoolTimedOut.into()) }
        async fn soft_delete(&self, _: &str) -> Result<(), StoreError> { Err(sqlx::Error::PoolTimedOut.into()) }
        async fn close(&self) -> Result<(), StoreError> { Ok(()) }
    }

    #[tokio::test]
    async fn welcome_routes_are_open() {
        let router = test_router();
        for path in ["/", "/appscode/"] {
            let res = router.handle(Request::new("GET", path)).await;
            assert_eq!(res.status_code(), 200);
            assert!(body(&res).is_string());
        }
    }

    #[tokio::test]
    async fn list_starts_empty() {
        let router = test_router();
        let res = router.handle(Request::new("GET", WORKERS)).await;
        assert_eq!(res.status_code(), 200);
        assert_eq!(body(&res), json!([]));
    }

    #[tokio::test]
    async fn create_then_get_returns_the_same_record() {
        let router = test_router();
        let doc = json!({
            "username": "carol", "firstname": "Carol", "lastname": "Khan",
            "city": "Sylhet", "division": "Sylhet", "position": "SRE", "salary": 70
        });

        let created = create(&router, doc).await;
        assert_eq!(created.status_code(), 201);

        let fetched = router.handle(Request::new("GET", "/appscode/workers/carol")).await;
        assert_eq!(fetched.status_code(), 200);
        assert_eq!(body(&fetched), body(&created));
        assert_eq!(body(&fetched)["position"], "SRE");
        assert_eq!(body(&fetched)["salary"], 70);
    }

    #[tokio::test]
    async fn usernames_that_need_encoding_are_reachable_by_path() {
        let router = test_router();
        assert_eq!(create(&router, json!({"username": "john doe"})).await.status_code(), 201);
        assert_eq!(create(&router, json!({"username": "José"})).await.status_code(), 201);

        let res = router.handle(Request::new("GET", "/appscode/workers/john%20doe")).await;
        assert_eq!(res.status_code(), 200);
        assert_eq!(body(&res)["username"], "john doe");

        let put = Request::new("PUT", "/appscode/workers/Jos%C3%A9")
            .with_body(json!({"city": "Dhaka"}).to_string());
        assert_eq!(router.handle(admin(put)).await.status_code(), 200);

        let del = Request::new("DELETE", "/appscode/workers/Jos%C3%A9");
        assert_eq!(router.handle(admin(del)).await.status_code(), 200);
        let gone = router.handle(Request::new("GET", "/appscode/workers/Jos%C3%A9")).await;
        assert_eq!(gone.status_code(), 404);
    }

    #[tokio::test]
    async fn paths_work_with_or_without_the_trailing_slash() {
        let router = test_router();
        create(&router, json!({"username": "kim"})).await;

        for path in ["/appscode", "/appscode/workers", "/appscode/workers/kim/"] {
            let res = router.handle(Request::new("GET", path)).await;
            assert_eq!(res.status_code(), 200, "GET {path}");
        }
        assert_eq!(router.app().metrics.request_count(WORKER, "GET", 200), 1);
    }

    #[tokio::test]
    async fn create_validates_its_input() {
        let router = test_router();
        assert_eq!(create(&router, json!({"firstname": "Nobody"})).await.status_code(), 406);

        let garbage = admin(Request::new("POST", WORKERS).with_body("{not json"));
        assert_eq!(router.handle(garbage).await.status_code(), 400);
    }

    #[tokio::test]
    async fn soft_deleted_usernames_cannot_be_reused() {
        let router = test_router();
        create(&router, json!({"username": "dave"})).await;
        let del = router.handle(admin(Request::new("DELETE", "/appscode/workers/dave"))).await;
        assert_eq!(del.status_code(), 200);

        assert_eq!(create(&router, json!({"username": "dave"})).await.status_code(), 409);
    }

    #[tokio::test]
    async fn update_copies_fields_and_bumps_version() {
        let router = test_router();
        create(&router, json!({"username": "erin", "city": "Khulna"})).await;

        let put = Request::new("PUT", "/appscode/workers/erin")
            .with_body(json!({"city": "Rajshahi", "position": "Lead", "salary": 80}).to_string());
        let res = router.handle(admin(put)).await;
        assert_eq!(res.status_code(), 200);

        let updated = body(&res);
        assert_eq!(updated["username"], "erin");
        assert_eq!(updated["city"], "Rajshahi");
        assert_eq!(updated["position"], "Lead");
        assert_eq!(updated["version"], 2);
    }

    #[tokio::test]
    async fn update_with_omitted_or_empty_username_keeps_it() {
        let router = test_router();
        create(&router, json!({"username": "lena", "city": "Khulna"})).await;

        for doc in [json!({"city": "Barishal"}), json!({"username": "", "city": "Comilla"})] {
            let put = Request::new("PUT", "/appscode/workers/lena").with_body(doc.to_string());
            let res = router.handle(admin(put)).await;
            assert_eq!(res.status_code(), 200);
            assert_eq!(body(&res)["username"], "lena");
        }

        let fetched = router.handle(Request::new("GET", "/appscode/workers/lena")).await;
        assert_eq!(body(&fetched)["city"], "Comilla");
        assert_eq!(body(&fetched)["version"], 3);
    }

    #[tokio::test]
    async fn update_and_delete_of_missing_workers_are_not_found() {
        let router = test_router();
        let put = Request::new("PUT", "/appscode/workers/ghost").with_body("{}");
        assert_eq!(router.handle(admin(put)).await.status_code(), 404);

        let del = Request::new("DELETE", "/appscode/workers/ghost");
        assert_eq!(router.handle(admin(del)).await.status_code(), 404);
    }

    #[tokio::test]
    async fn second_delete_is_not_found() {
        let router = test_router();
        create(&router, json!({"username": "finn"})).await;

        let first = router.handle(admin(Request::new("DELETE", "/appscode/workers/finn"))).await;
        assert_eq!(first.status_code(), 200);
        assert!(first.body().is_empty());

        let second = router.handle(admin(Request::new("DELETE", "/appscode/workers/finn"))).await;
        assert_eq!(second.status_code(), 404);
    }

    #[tokio::test]
    async fn mutations_require_credentials() {
        let router = test_router();
        let res = router
            .handle(Request::new("POST", WORKERS).with_body(r#"{"username":"gus"}"#))
            .await;
        assert_eq!(res.status_code(), 401);

        let wrong = Request::new("DELETE", "/appscode/workers/masud")
            .with_header("Authorization", &format!("Basic {}", STANDARD.encode("admin:nope")));
        assert_eq!(router.handle(wrong).await.status_code(), 401);

        // Reads stay open.
        assert_eq!(router.handle(Request::new("GET", WORKERS)).await.status_code(), 200);
    }

    #[tokio::test]
    async fn bypass_opens_mutations() {
        let router = router_with(Arc::new(MemoryWorkerStore::new()), true);
        let res = router
            .handle(Request::new("POST", WORKERS).with_body(r#"{"username":"hana"}"#))
            .await;
        assert_eq!(res.status_code(), 201);
    }

    #[tokio::test]
    async fn store_failures_are_internal_errors() {
        let router = router_with(Arc::new(DownStore), false);
        assert_eq!(router.handle(Request::new("GET", WORKERS)).await.status_code(), 500);
        assert_eq!(
            router.handle(Request::new("GET", "/appscode/workers/x")).await.status_code(),
            500
        );
        assert_eq!(create(&router, json!({"username": "x"})).await.status_code(), 500);
    }

    #[tokio::test]
    async fn every_request_is_recorded_once_with_its_real_status() {
        let router = test_router();
        create(&router, json!({"username": "ivy"})).await;
        create(&router, json!({"username": "ivy"})).await;
        router.handle(Request::new("GET", "/appscode/workers/nobody")).await;
        router.handle(Request::new("GET", "/appscode/workers/ivy")).await;

        let metrics = &router.app().metrics;
        assert_eq!(metrics.request_count(WORKERS, "POST", 201), 1);
        assert_eq!(metrics.request_count(WORKERS, "POST", 409), 1);
        assert_eq!(metrics.request_count(WORKERS, "POST", 200), 0);
        assert_eq!(metrics.duration_count(WORKERS, "POST"), 2);
        assert_eq!(metrics.request_count(WORKER, "GET", 404), 1);
        assert_eq!(metrics.request_count(WORKER, "GET", 200), 1);
        assert_eq!(metrics.duration_count(WORKER, "GET"), 2);
    }

    #[tokio::test]
    async fn metrics_endpoint_exposes_recorded_requests() {
        let router = test_router();
        router.handle(Request::new("GET", "/")).await;

        let res = router.handle(Request::new("GET", "/metrics")).await;
        assert_eq!(res.status_code(), 200);
        assert!(res.header("content-type").unwrap().starts_with("text/plain"));
        let text = String::from_utf8(res.body().to_vec()).unwrap();
        assert!(text.contains(r#"worker_api_http_request_total{code="200",method="GET",url="/"} 1"#));
    }

    #[tokio::test]
    async fn full_lifecycle_scenario() {
        let router = test_router();

        let created = create(&router, json!({"username": "alice", "firstname": "Alice"})).await;
        assert_eq!(created.status_code(), 201);
        let stored = body(&created);
        assert_eq!(stored["firstname"], "Alice");
        assert!(stored["created_at"].is_string());
        assert!(stored["updated_at"].is_string());

        let again = create(&router, json!({"username": "alice", "firstname": "Alice"})).await;
        assert_eq!(again.status_code(), 409);

        let fetched = router.handle(Request::new("GET", "/appscode/workers/alice")).await;
        assert_eq!(fetched.status_code(), 200);
        assert_eq!(body(&fetched), stored);

        let rename = Request::new("PUT", "/appscode/workers/alice")
            .with_body(json!({"username": "bob", "firstname": "Bob"}).to_string());
        assert_eq!(router.handle(admin(rename)).await.status_code(), 405);

        let deleted = router.handle(admin(Request::new("DELETE", "/appscode/workers/alice"))).await;
        assert_eq!(deleted.status_code(), 200);

        let gone = router.handle(Request::new("GET", "/appscode/workers/alice")).await;
        assert_eq!(gone.status_code(), 404);
    }
}
