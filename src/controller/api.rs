use axum::body::Bytes;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, Request, State};
use axum::http::{Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::runtime::{Builder, Runtime};
use tokio::sync::mpsc::Sender;
use tower::limit::GlobalConcurrencyLimitLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, info_span, warn};
use tracing_futures::Instrument;

use crate::controller::ControllerError;
use crate::datastore::{DataStoreError, StorageError};
use crate::model::task::{item_id, parse_item};
use crate::model::{BoardRef, BoardResolver, CorrelationId, ModelError, TaskId, TaskList};

use super::storage::{self, RequestResponse, StorageServiceRequest};

pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub concurrent: Option<usize>,
    pub timeout: Duration,
    pub strict_status: bool,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Method is not allowed")]
    MethodNotAllowed,
    #[error("no {name} in {location}")]
    MissingParameter {
        name: &'static str,
        location: &'static str,
    },
    #[error("{0}")]
    MalformedItem(String),
    #[error("malformed request: {0}")]
    MalformedRequest(String),
    #[error("invalid id '{0}'")]
    InvalidId(String),
    #[error("Failed to write task. {0}")]
    StoreWrite(String),
    #[error("Failed to retrieve board tasks. {0}")]
    StoreRead(String),
    #[error("storage did not answer in time")]
    Timeout,
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    fn from_model(err: ModelError, location: &'static str) -> Self {
        match err {
            ModelError::MissingParameter(name) => ApiError::MissingParameter { name, location },
            ModelError::MalformedItem(reason) => ApiError::MalformedItem(reason),
            ModelError::InvalidId(id) => ApiError::InvalidId(id),
            ModelError::InvalidBoard(board) => ApiError::Internal(format!("invalid board {}", board)),
        }
    }

    fn strict_status(&self) -> StatusCode {
        match self {
            ApiError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ApiError::MissingParameter { .. }
            | ApiError::MalformedItem(_)
            | ApiError::MalformedRequest(_)
            | ApiError::InvalidId(_) => StatusCode::BAD_REQUEST,
            ApiError::StoreWrite(_) | ApiError::StoreRead(_) => StatusCode::BAD_GATEWAY,
            ApiError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<ControllerError> for ApiError {
    fn from(err: ControllerError) -> Self {
        match err {
            ControllerError::DataStore(DataStoreError::Write {
                source: StorageError::InvalidKey(key),
                ..
            }) => ApiError::MalformedItem(format!("invalid field name '{}'", key)),
            ControllerError::DataStore(err @ DataStoreError::Read { .. }) => {
                ApiError::StoreRead(err.to_string())
            }
            ControllerError::DataStore(err) => ApiError::StoreWrite(err.to_string()),
            ControllerError::StorageServiceError(reason) => ApiError::Internal(reason),
        }
    }
}

/// An endpoint's error rendered as `{ message }`.
#[derive(Debug)]
pub struct Failure {
    operation: &'static str,
    error: ApiError,
    strict_status: bool,
}

impl IntoResponse for Failure {
    fn into_response(self) -> Response {
        let status = if self.strict_status {
            self.error.strict_status()
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        let message = match &self.error {
            ApiError::MethodNotAllowed => self.error.to_string(),
            error => format!("Error in {}: {}.", self.operation, error),
        };
        warn!(operation = self.operation, reason = %self.error, "request failed");
        (status, Json(json!({ "message": message }))).into_response()
    }
}

#[derive(Clone)]
pub struct ApiState {
    tx_storage: Sender<RequestResponse>,
    resolver: Arc<BoardResolver>,
    timeout: Duration,
    strict_status: bool,
}

impl ApiState {
    pub fn new(
        tx_storage: Sender<RequestResponse>,
        resolver: Arc<BoardResolver>,
        timeout: Duration,
        strict_status: bool,
    ) -> Self {
        Self {
            tx_storage,
            resolver,
            timeout,
            strict_status,
        }
    }

    fn board(&self, name: Option<&str>, location: &'static str) -> Result<BoardRef, ApiError> {
        self.resolver
            .resolve(name)
            .map_err(|err| ApiError::from_model(err, location))
    }

    async fn call(&self, request: StorageServiceRequest) -> Result<TaskList, ApiError> {
        match tokio::time::timeout(
            self.timeout,
            storage::send::<TaskList>(self.tx_storage.clone(), request),
        )
        .await
        {
            Ok(response) => Ok(response?),
            Err(_) => Err(ApiError::Timeout),
        }
    }

    fn respond(&self, operation: &'static str, result: Result<TaskList, ApiError>) -> Response {
        match result {
            Ok(tasks) => Json(tasks).into_response(),
            Err(error) => Failure {
                operation,
                error,
                strict_status: self.strict_status,
            }
            .into_response(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct BoardQuery {
    board: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DeleteQuery {
    id: Option<String>,
    board: Option<String>,
}

fn expect_method(method: &Method, expected: Method) -> Result<(), ApiError> {
    if *method == expected {
        Ok(())
    } else {
        Err(ApiError::MethodNotAllowed)
    }
}

/// JSON object body; an empty body reads as `{}`.
fn parse_body(body: &Bytes) -> Result<Map<String, Value>, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Map::new());
    }
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(fields)) => Ok(fields),
        Ok(_) => Err(ApiError::MalformedRequest("body must be a JSON object".into())),
        Err(err) => Err(ApiError::MalformedRequest(err.to_string())),
    }
}

fn query<T>(query: Result<Query<T>, QueryRejection>) -> Result<T, ApiError> {
    query
        .map(|Query(query)| query)
        .map_err(|rejection| ApiError::MalformedRequest(rejection.body_text()))
}

async fn add_task(State(state): State<ApiState>, method: Method, body: Bytes) -> Response {
    let result = async {
        expect_method(&method, Method::POST)?;
        let body = parse_body(&body)?;
        let board = state.board(body.get("board").and_then(Value::as_str), "body")?;
        let item = parse_item(body.get("item")).map_err(|err| ApiError::from_model(err, "body"))?;
        state.call(StorageServiceRequest::Create(board, item)).await
    }
    .await;
    state.respond("addTask", result)
}

async fn get_tasks(
    State(state): State<ApiState>,
    method: Method,
    params: Result<Query<BoardQuery>, QueryRejection>,
) -> Response {
    let result = async {
        expect_method(&method, Method::GET)?;
        let params = query(params)?;
        let board = state.board(params.board.as_deref(), "query")?;
        state.call(StorageServiceRequest::List(board)).await
    }
    .await;
    state.respond("getTasks", result)
}

async fn delete_task(
    State(state): State<ApiState>,
    method: Method,
    params: Result<Query<DeleteQuery>, QueryRejection>,
) -> Response {
    let result = async {
        expect_method(&method, Method::DELETE)?;
        let params = query(params)?;
        let board = state.board(params.board.as_deref(), "query")?;
        let id = TaskId::parse(params.id.as_deref().unwrap_or_default())
            .map_err(|err| ApiError::from_model(err, "query"))?;
        state.call(StorageServiceRequest::Delete(board, id)).await
    }
    .await;
    state.respond("deleteTask", result)
}

async fn update_task(State(state): State<ApiState>, method: Method, body: Bytes) -> Response {
    let result = async {
        expect_method(&method, Method::POST)?;
        let body = parse_body(&body)?;
        let board = state.board(body.get("board").and_then(Value::as_str), "body")?;
        let item = parse_item(body.get("item")).map_err(|err| ApiError::from_model(err, "body"))?;
        let id = item_id(&item).map_err(|err| ApiError::from_model(err, "body"))?;
        state
            .call(StorageServiceRequest::Update(board, id, item))
            .await
    }
    .await;
    state.respond("updateTask", result)
}

/// Tags the request span with a correlation-id and echoes it back.
async fn correlation_id(request: Request, next: Next) -> Response {
    let correlation_id = CorrelationId::from_header_map_or_new(request.headers());
    let span = info_span!("request", correlation_id = %correlation_id);
    let mut response = next.run(request).instrument(span).await;
    if let Err(err) = correlation_id.insert_into_header_map(response.headers_mut()) {
        warn!(reason = %err, "Unable to set correlation-id header.");
    }
    response
}

pub fn router(state: ApiState, concurrent: Option<usize>) -> Router {
    let router = Router::new()
        .route("/addTask", any(add_task))
        .route("/getTasks", any(get_tasks))
        .route("/deleteTask", any(delete_task))
        .route("/updateTask", any(update_task))
        .layer(middleware::from_fn(correlation_id))
        .layer(TraceLayer::new_for_http());

    // one semaphore shared by every route
    let router = match concurrent {
        Some(limit) => router.layer(GlobalConcurrencyLimitLayer::new(limit)),
        None => router,
    };

    router
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

pub fn build_runtime(
    cfg: ServerConfig,
    tx_storage: Sender<RequestResponse>,
    resolver: Arc<BoardResolver>,
) -> anyhow::Result<Runtime> {
    let runtime = Builder::new_multi_thread()
        .thread_name("http-api")
        .enable_all()
        .build()?;

    let addr = format!("{}:{}", cfg.host, cfg.port);
    let listener = runtime.block_on(TcpListener::bind(&addr))?;
    let state = ApiState::new(tx_storage, resolver, cfg.timeout, cfg.strict_status);
    let app = router(state, cfg.concurrent);

    runtime.handle().spawn(async move {
        info!(addr = addr.as_str(), "Starting api...");
        if let Err(err) = axum::serve(listener, app).await {
            error!(reason = %err, "Unable to serve API.");
        }
    });
    Ok(runtime)
}
