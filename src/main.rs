mod config;
mod http;
mod idempotency;
mod import;
mod jobs;
mod llm;
mod metrics;
mod models;
mod store;

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use config::AppConfig;
use idempotency::IdempotencyCache;
use import::{ImportError, ImportErrorKind, ImportPipeline};
use jobs::{ImportPermit, JobQueue};
use llm::{LlmClient, Oracle};
use metrics_exporter_prometheus::PrometheusHandle;
use models::{ApiError, CategoryProfit, CreateItem, ImportResponse, Item, ItemPatch, SellItem};
use serde::Serialize;
use serde_json::json;
use std::{net::SocketAddr, sync::Arc};
use store::{ItemStore, SqliteStore, StoreError};
use tokio::sync::Mutex;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        error!(target = "resale.api", "server crashed: {err:#}");
        std::process::exit(1);
    }
}

async fn run() -> eyre::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = AppConfig::from_env();
    let store: Arc<dyn ItemStore> = Arc::new(SqliteStore::connect(&config.database_url).await?);
    let oracle: Arc<dyn Oracle> = Arc::new(LlmClient::new(config.oracle.clone(), &config.http));
    let pipeline = ImportPipeline::new(oracle, store, config.import.clone());

    let import_permit: ImportPermit = Arc::new(Mutex::new(()));
    let (queue, _worker) =
        JobQueue::spawn(pipeline.clone(), import_permit.clone(), config.queue_capacity);
    let redis = config
        .redis_url
        .as_deref()
        .and_then(|url| redis::Client::open(url).ok());

    let state = AppState {
        pipeline,
        queue,
        import_permit,
        idempotency: Arc::new(IdempotencyCache::new(redis, config.idempotency_ttl_secs)),
        prometheus_handle: metrics::prometheus_handle(),
        metrics_key: config.metrics_key.clone(),
    };
    let app = router(state, config.request_max_bytes);

    let addr: SocketAddr = ([0, 0, 0, 0], config.port).into();
    info!(target = "resale.api", "listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

#[derive(Clone)]
struct AppState {
    pipeline: ImportPipeline,
    queue: JobQueue,
    import_permit: ImportPermit,
    idempotency: Arc<IdempotencyCache>,
    prometheus_handle: PrometheusHandle,
    metrics_key: Option<String>,
}

fn router(state: AppState, max_body_bytes: usize) -> Router {
    let cors = CorsLayer::new()
        .allow_headers(Any)
        .allow_methods(Any)
        .allow_origin(Any);

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .nest(
            "/api",
            Router::new()
                .route("/import", post(import_file))
                .route("/items", get(list_items).post(create_item))
                .route(
                    "/items/{id}",
                    get(get_item)
                        .put(sell_item)
                        .patch(edit_item)
                        .delete(delete_item),
                )
                .route("/analysis", get(profit_analysis)),
        )
        .nest(
            "/jobs",
            Router::new()
                .route("/imports", post(enqueue_import_job))
                .route("/{id}", get(get_job_status)),
        )
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(max_body_bytes))
}

/// Health and readiness check.
///
/// - Method: `GET`
/// - Path: `/health`
async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "resale-import-rs",
    }))
}

async fn metrics_endpoint(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Some(secret) = &state.metrics_key {
        let presented = headers
            .get("X-Metrics-Key")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if presented != secret {
            return (StatusCode::UNAUTHORIZED, "unauthorized").into_response();
        }
    }
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.prometheus_handle.render(),
    )
        .into_response()
}

/// Import a spreadsheet of items.
///
/// - Method: `POST`
/// - Path: `/api/import`
/// - Body: multipart form with a `file` field (`.csv` or `.xlsx`)
/// - Headers: optional `Idempotency-Key`
/// - Response: `201` with `ImportResponse` (message, inserted count, report, stage transcript)
async fn import_file(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Result<(StatusCode, Json<ImportResponse>), AppError> {
    crate::metrics::inc_requests("/api/import");

    let key = headers
        .get("Idempotency-Key")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());
    if let Some(key) = &key
        && let Some(existing) = state.idempotency.get(key).await
    {
        info!(target = "resale.api", key = %key, "idempotent_replay");
        return Ok((StatusCode::CREATED, Json(existing)));
    }

    let (filename, bytes) = read_upload(multipart).await?;
    let Ok(_permit) = state.import_permit.try_lock() else {
        return Err(ImportError::busy().into());
    };
    info!(
        target = "resale.api",
        filename = %filename,
        bytes = bytes.len(),
        "import invoked"
    );

    let response = state.pipeline.run_file(&filename, &bytes).await?;
    if let Some(key) = key {
        state.idempotency.put(key, &response).await;
    }
    Ok((StatusCode::CREATED, Json(response)))
}

async fn read_upload(mut multipart: Multipart) -> Result<(String, Vec<u8>), ImportError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| ImportError::invalid_upload(err.body_text()))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().unwrap_or_default().to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|err| ImportError::invalid_upload(err.body_text()))?;
        return Ok((filename, bytes.to_vec()));
    }
    Err(ImportError::invalid_upload(
        "multipart field `file` is required",
    ))
}

/// Stored items, newest first.
async fn list_items(State(state): State<AppState>) -> Result<Json<Vec<Item>>, AppError> {
    crate::metrics::inc_requests("/api/items");
    let items = state.pipeline.store().list_items().await?;
    Ok(Json(items))
}

/// Add a single listed item.
///
/// - Method: `POST`
/// - Path: `/api/items`
/// - Body: `{ "name", "purchase_price", "category" }`
/// - Response: `201` with the stored item
async fn create_item(
    State(state): State<AppState>,
    Json(body): Json<CreateItem>,
) -> Result<(StatusCode, Json<Item>), AppError> {
    crate::metrics::inc_requests("/api/items");
    let item = body.into_new_item().map_err(AppError::Invalid)?;
    let created = state.pipeline.store().create_item(&item).await?;
    info!(target = "resale.api", id = created.id, "item_created");
    Ok((StatusCode::CREATED, Json(created)))
}

async fn get_item(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Item>, AppError> {
    crate::metrics::inc_requests("/api/items/{id}");
    state
        .pipeline
        .store()
        .get_item(id)
        .await?
        .map(Json)
        .ok_or(AppError::NotFound("item_not_found"))
}

/// Record a sale. The item becomes `sold` whatever its previous state.
///
/// - Method: `PUT`
/// - Path: `/api/items/{id}`
/// - Body: `{ "sell_price", "sell_date": "YYYY-MM-DD" }`
async fn sell_item(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(sale): Json<SellItem>,
) -> Result<Json<Item>, AppError> {
    crate::metrics::inc_requests("/api/items/{id}");
    sale.validate().map_err(AppError::Invalid)?;
    let sold = state
        .pipeline
        .store()
        .sell_item(id, &sale)
        .await?
        .ok_or(AppError::NotFound("item_not_found"))?;
    info!(target = "resale.api", id, price = sale.sell_price, "item_sold");
    Ok(Json(sold))
}

/// Edit any subset of an item's fields; the status follows the sale fields.
///
/// - Method: `PATCH`
/// - Path: `/api/items/{id}`
async fn edit_item(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(patch): Json<ItemPatch>,
) -> Result<Json<Item>, AppError> {
    crate::metrics::inc_requests("/api/items/{id}");
    patch.validate().map_err(AppError::Invalid)?;
    state
        .pipeline
        .store()
        .edit_item(id, &patch)
        .await?
        .map(Json)
        .ok_or(AppError::NotFound("item_not_found"))
}

async fn delete_item(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, AppError> {
    crate::metrics::inc_requests("/api/items/{id}");
    if !state.pipeline.store().delete_item(id).await? {
        return Err(AppError::NotFound("item_not_found"));
    }
    info!(target = "resale.api", id, "item_deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// Profit per category over sold items.
///
/// - Method: `GET`
/// - Path: `/api/analysis`
async fn profit_analysis(
    State(state): State<AppState>,
) -> Result<Json<Vec<CategoryProfit>>, AppError> {
    crate::metrics::inc_requests("/api/analysis");
    let profit = state.pipeline.store().profit_by_category().await?;
    Ok(Json(profit))
}

#[derive(Debug, Serialize)]
struct EnqueueResponse {
    job_id: String,
}

async fn enqueue_import_job(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<EnqueueResponse>), AppError> {
    crate::metrics::inc_requests("/jobs/imports");
    let (filename, bytes) = read_upload(multipart).await?;
    let id = state
        .queue
        .enqueue_import(filename, bytes)
        .await
        .map_err(AppError::Internal)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(EnqueueResponse {
            job_id: id.to_string(),
        }),
    ))
}

async fn get_job_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<jobs::JobInfo>, AppError> {
    let Ok(uuid) = uuid::Uuid::parse_str(&id) else {
        return Err(AppError::BadRequest("invalid_job_id"));
    };
    match state.queue.get(uuid).await {
        Some(info) => Ok(Json(info)),
        None => Err(AppError::NotFound("job_not_found")),
    }
}

#[derive(Debug)]
enum AppError {
    Import(ImportError),
    Store(StoreError),
    Invalid(String),
    BadRequest(&'static str),
    NotFound(&'static str),
    Internal(String),
}

impl From<ImportError> for AppError {
    fn from(value: ImportError) -> Self {
        Self::Import(value)
    }
}

impl From<StoreError> for AppError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::Import(err) => {
                let status = match err.kind() {
                    ImportErrorKind::InvalidUpload
                    | ImportErrorKind::UnsupportedFormat
                    | ImportErrorKind::Decode
                    | ImportErrorKind::EmptyInput
                    | ImportErrorKind::NoValidRows => StatusCode::BAD_REQUEST,
                    ImportErrorKind::RequiredColumnsMissing => StatusCode::UNPROCESSABLE_ENTITY,
                    ImportErrorKind::MappingOracle => StatusCode::BAD_GATEWAY,
                    ImportErrorKind::Storage => StatusCode::INTERNAL_SERVER_ERROR,
                    ImportErrorKind::Busy => StatusCode::CONFLICT,
                };
                warn!(
                    target = "resale.api",
                    stage = err.stage(),
                    kind = err.kind().code(),
                    error = %err,
                    "import_rejected"
                );
                let missing = (!err.missing().is_empty()).then(|| err.missing().to_vec());
                let payload = ApiError {
                    error: err.kind().code().to_string(),
                    detail: Some(err.detail().to_string()),
                    missing,
                };
                (status, Json(payload)).into_response()
            }
            AppError::Store(err) => {
                error!(target = "resale.api", error = %err, "store_failed");
                error_body(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ImportErrorKind::Storage.code(),
                    Some(err.to_string()),
                )
            }
            AppError::Invalid(detail) => {
                error_body(StatusCode::BAD_REQUEST, "invalid_item", Some(detail))
            }
            AppError::BadRequest(code) => error_body(StatusCode::BAD_REQUEST, code, None),
            AppError::NotFound(code) => error_body(StatusCode::NOT_FOUND, code, None),
            AppError::Internal(detail) => {
                error_body(StatusCode::INTERNAL_SERVER_ERROR, "internal", Some(detail))
            }
        }
    }
}

fn error_body(status: StatusCode, code: &str, detail: Option<String>) -> Response {
    let payload = ApiError {
        error: code.to_string(),
        detail,
        missing: None,
    };
    (status, Json(payload)).into_response()
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    let _ = fmt().with_env_filter(filter).try_init();
}
