// GreenReceipt - REST API
//
// Handlers lock the shared connection for their whole unit of work and hand
// off to the workflow modules. Errors render through AppError's IntoResponse.

use axum::{
    async_trait,
    body::Bytes,
    extract::{FromRequestParts, Path, Query, State},
    http::{request::Parts, StatusCode},
    response::Json,
    routing::{get, patch, post},
    Router,
};
use chrono::{DateTime, Duration, Utc};
use rusqlite::Connection;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::accounts::{self, NewUser, UserPatch};
use crate::catalog::{self, CategoryPatch, CategoryView, ItemPatch, NewCategory, NewItem, StockAdjustment};
use crate::config::IngestSettings;
use crate::db::{DateRange, Event};
use crate::entities::{Category, ItemFilter, ItemView, Receipt, User};
use crate::error::{AppError, AppResult};
use crate::ingest::coerce_date;
use crate::receipts::{self, ReceiptOutcome, ReceiptView};
use crate::spending::{self, CustomerSummary, MerchantSummary};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Mutex<Connection>>,
    pub settings: IngestSettings,
}

impl AppState {
    pub fn new(conn: Connection, settings: IngestSettings) -> Self {
        AppState {
            db: Arc::new(Mutex::new(conn)),
            settings,
        }
    }

    fn conn(&self) -> AppResult<MutexGuard<'_, Connection>> {
        self.db
            .lock()
            .map_err(|_| AppError::Internal(anyhow::anyhow!("database mutex poisoned")))
    }
}

/// API Response wrapper
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data,
            error: None,
        }
    }
}

type ApiResult<T> = AppResult<Json<ApiResponse<T>>>;
type Created<T> = AppResult<(StatusCode, Json<ApiResponse<T>>)>;

fn ok<T>(data: T) -> ApiResult<T> {
    Ok(Json(ApiResponse::ok(data)))
}

fn created<T>(data: T) -> Created<T> {
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(data))))
}

/// JSON body; malformed input is a 400 in the usual envelope
fn parse_body<T: DeserializeOwned>(body: &Bytes) -> AppResult<T> {
    Ok(serde_json::from_slice(body)?)
}

// ============================================================================
// Query parameters
// ============================================================================

/// `Query` whose rejections render in the usual error envelope
struct QueryParams<T>(T);

#[async_trait]
impl<T, S> FromRequestParts<S> for QueryParams<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        Query::<T>::from_request_parts(parts, state)
            .await
            .map(|Query(value)| QueryParams(value))
            .map_err(|rejection| AppError::BadRequest(rejection.body_text()))
    }
}

#[derive(Debug, Default, Deserialize)]
struct RangeQuery {
    from: Option<String>,
    to: Option<String>,
}

impl RangeQuery {
    /// Date-only `to` covers the whole day
    fn into_range(self) -> AppResult<DateRange> {
        Ok(DateRange {
            from: parse_bound("from", self.from, false)?,
            to: parse_bound("to", self.to, true)?,
        })
    }
}

fn parse_bound(field: &str, raw: Option<String>, end_of_day: bool) -> AppResult<Option<DateTime<Utc>>> {
    let Some(raw) = raw.filter(|r| !r.trim().is_empty()) else {
        return Ok(None);
    };
    let parsed = coerce_date(&serde_json::Value::String(raw.clone()))
        .map_err(|e| AppError::BadRequest(format!("{field}: {e}")))?;

    Ok(parsed.map(|date| {
        if end_of_day && raw.trim().len() == 10 {
            date + Duration::days(1) - Duration::milliseconds(1)
        } else {
            date
        }
    }))
}

#[derive(Debug, Default, Deserialize)]
struct CategoryQuery {
    merchant_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ScanRequest {
    qr: String,
}

#[derive(Debug, Default, Deserialize)]
struct VoidRequest {
    reason: Option<String>,
}

#[derive(Serialize)]
struct Health {
    status: &'static str,
    version: &'static str,
}

// ============================================================================
// Users
// ============================================================================

/// GET /api/health
async fn health_check() -> ApiResult<Health> {
    ok(Health {
        status: "ok",
        version: crate::VERSION,
    })
}

/// POST /api/users
async fn create_user(State(state): State<AppState>, body: Bytes) -> Created<User> {
    let input: NewUser = parse_body(&body)?;
    let conn = state.conn()?;
    created(accounts::create_user(&conn, input)?)
}

/// GET /api/users/:id
async fn get_user(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<User> {
    let conn = state.conn()?;
    ok(accounts::get_user(&conn, &id)?)
}

/// PATCH /api/users/:id
async fn update_user(State(state): State<AppState>, Path(id): Path<String>, body: Bytes) -> ApiResult<User> {
    let patch: UserPatch = parse_body(&body)?;
    let conn = state.conn()?;
    ok(accounts::update_user(&conn, &id, patch)?)
}

/// GET /api/merchants
async fn list_merchants(State(state): State<AppState>) -> ApiResult<Vec<User>> {
    let conn = state.conn()?;
    ok(accounts::list_merchants(&conn)?)
}

// ============================================================================
// Categories
// ============================================================================

/// GET /api/categories?merchant_id=
async fn list_categories(
    State(state): State<AppState>,
    QueryParams(query): QueryParams<CategoryQuery>,
) -> ApiResult<Vec<Category>> {
    let conn = state.conn()?;
    ok(catalog::list_categories(&conn, query.merchant_id.as_deref())?)
}

/// POST /api/categories
async fn create_category(State(state): State<AppState>, body: Bytes) -> Created<Category> {
    let input: NewCategory = parse_body(&body)?;
    let conn = state.conn()?;
    created(catalog::create_category(&conn, input)?)
}

/// GET /api/categories/:id
async fn get_category(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<CategoryView> {
    let conn = state.conn()?;
    ok(catalog::get_category(&conn, &id)?)
}

/// PATCH /api/categories/:id
async fn update_category(State(state): State<AppState>, Path(id): Path<String>, body: Bytes) -> ApiResult<Category> {
    let patch: CategoryPatch = parse_body(&body)?;
    let conn = state.conn()?;
    ok(catalog::update_category(&conn, &id, patch)?)
}

/// DELETE /api/categories/:id?merchant_id=
async fn delete_category(
    State(state): State<AppState>,
    Path(id): Path<String>,
    QueryParams(query): QueryParams<CategoryQuery>,
) -> ApiResult<()> {
    let merchant_id = query
        .merchant_id
        .ok_or_else(|| AppError::BadRequest("merchant_id query parameter is required".into()))?;
    let conn = state.conn()?;
    ok(catalog::delete_category(&conn, &merchant_id, &id)?)
}

// ============================================================================
// Items
// ============================================================================

/// GET /api/merchants/:id/items
async fn list_items(
    State(state): State<AppState>,
    Path(merchant_id): Path<String>,
    QueryParams(filter): QueryParams<ItemFilter>,
) -> ApiResult<Vec<ItemView>> {
    let conn = state.conn()?;
    let now = Utc::now();
    let items = catalog::list_items(&conn, &merchant_id, &filter)?;
    ok(items.iter().map(|item| item.view(now)).collect())
}

/// POST /api/merchants/:id/items
async fn create_item(State(state): State<AppState>, Path(merchant_id): Path<String>, body: Bytes) -> Created<ItemView> {
    let input: NewItem = parse_body(&body)?;
    let conn = state.conn()?;
    let item = catalog::create_item(&conn, &state.settings, &merchant_id, input)?;
    created(item.view(Utc::now()))
}

/// GET /api/merchants/:id/items/:item_id
async fn get_item(
    State(state): State<AppState>,
    Path((merchant_id, item_id)): Path<(String, String)>,
) -> ApiResult<ItemView> {
    let conn = state.conn()?;
    ok(catalog::get_item(&conn, &merchant_id, &item_id)?.view(Utc::now()))
}

/// PATCH /api/merchants/:id/items/:item_id
async fn update_item(
    State(state): State<AppState>,
    Path((merchant_id, item_id)): Path<(String, String)>,
    body: Bytes,
) -> ApiResult<ItemView> {
    let patch: ItemPatch = parse_body(&body)?;
    let conn = state.conn()?;
    ok(catalog::update_item(&conn, &merchant_id, &item_id, patch)?.view(Utc::now()))
}

/// DELETE /api/merchants/:id/items/:item_id
async fn delete_item(
    State(state): State<AppState>,
    Path((merchant_id, item_id)): Path<(String, String)>,
) -> ApiResult<()> {
    let conn = state.conn()?;
    ok(catalog::delete_item(&conn, &merchant_id, &item_id)?)
}

/// POST /api/merchants/:id/items/:item_id/stock
async fn adjust_stock(
    State(state): State<AppState>,
    Path((merchant_id, item_id)): Path<(String, String)>,
    body: Bytes,
) -> ApiResult<ItemView> {
    let adjustment: StockAdjustment = parse_body(&body)?;
    let conn = state.conn()?;
    ok(catalog::adjust_stock(&conn, &merchant_id, &item_id, adjustment)?.view(Utc::now()))
}

// ============================================================================
// Receipts
// ============================================================================

/// POST /api/merchants/:id/receipts
async fn issue_receipt(State(state): State<AppState>, Path(merchant_id): Path<String>, body: Bytes) -> Created<ReceiptOutcome> {
    let payload: serde_json::Value = parse_body(&body)?;
    let conn = state.conn()?;
    created(receipts::issue_receipt(&conn, &state.settings, &merchant_id, &payload)?)
}

/// GET /api/merchants/:id/receipts?from=&to=
async fn list_merchant_receipts(
    State(state): State<AppState>,
    Path(merchant_id): Path<String>,
    QueryParams(range): QueryParams<RangeQuery>,
) -> ApiResult<Vec<Receipt>> {
    let range = range.into_range()?;
    let conn = state.conn()?;
    ok(receipts::list_merchant_receipts(&conn, &merchant_id, range)?)
}

/// POST /api/merchants/:id/receipts/:receipt_id/void
async fn void_receipt(
    State(state): State<AppState>,
    Path((merchant_id, receipt_id)): Path<(String, String)>,
    body: Bytes,
) -> ApiResult<Receipt> {
    let request: VoidRequest = if body.is_empty() { VoidRequest::default() } else { parse_body(&body)? };
    let conn = state.conn()?;
    ok(receipts::void_receipt(&conn, &merchant_id, &receipt_id, request.reason.as_deref())?)
}

/// GET /api/merchants/:id/summary?from=&to=
async fn merchant_summary(
    State(state): State<AppState>,
    Path(merchant_id): Path<String>,
    QueryParams(range): QueryParams<RangeQuery>,
) -> ApiResult<MerchantSummary> {
    let range = range.into_range()?;
    let conn = state.conn()?;
    ok(spending::merchant_summary(&conn, &merchant_id, range)?)
}

/// POST /api/customers/:id/receipts/scan
async fn scan_receipt(State(state): State<AppState>, Path(customer_id): Path<String>, body: Bytes) -> Created<ReceiptOutcome> {
    let request: ScanRequest = parse_body(&body)?;
    let conn = state.conn()?;
    let outcome = receipts::scan_receipt(&conn, &state.settings, &customer_id, &request.qr)?;

    // Claiming an issued receipt creates nothing new
    let status = if outcome.claimed_existing { StatusCode::OK } else { StatusCode::CREATED };
    Ok((status, Json(ApiResponse::ok(outcome))))
}

/// POST /api/customers/:id/receipts/upload
async fn upload_receipt(State(state): State<AppState>, Path(customer_id): Path<String>, body: Bytes) -> Created<ReceiptOutcome> {
    let payload: serde_json::Value = parse_body(&body)?;
    let conn = state.conn()?;
    created(receipts::upload_receipt(&conn, &state.settings, &customer_id, &payload)?)
}

/// GET /api/customers/:id/receipts?from=&to=
async fn list_customer_receipts(
    State(state): State<AppState>,
    Path(customer_id): Path<String>,
    QueryParams(range): QueryParams<RangeQuery>,
) -> ApiResult<Vec<Receipt>> {
    let range = range.into_range()?;
    let conn = state.conn()?;
    ok(receipts::list_customer_receipts(&conn, &customer_id, range)?)
}

/// GET /api/customers/:id/summary?from=&to=
async fn customer_summary(
    State(state): State<AppState>,
    Path(customer_id): Path<String>,
    QueryParams(range): QueryParams<RangeQuery>,
) -> ApiResult<CustomerSummary> {
    let range = range.into_range()?;
    let conn = state.conn()?;
    ok(spending::customer_summary(&conn, &customer_id, range)?)
}

/// GET /api/receipts/:id
async fn get_receipt(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<ReceiptView> {
    let conn = state.conn()?;
    ok(receipts::get_receipt(&conn, &id)?)
}

/// GET /api/receipts/:id/events
async fn receipt_events(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Vec<Event>> {
    let conn = state.conn()?;
    ok(receipts::receipt_events(&conn, &id)?)
}

async fn api_not_found() -> AppError {
    AppError::not_found("Route", "unknown API path")
}

// ============================================================================
// Router
// ============================================================================

pub fn build_router(state: AppState, static_dir: Option<PathBuf>) -> Router {
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/users", post(create_user))
        .route("/users/:id", get(get_user).patch(update_user))
        .route("/merchants", get(list_merchants))
        .route("/categories", get(list_categories).post(create_category))
        .route(
            "/categories/:id",
            get(get_category).patch(update_category).delete(delete_category),
        )
        .route("/merchants/:id/items", get(list_items).post(create_item))
        .route(
            "/merchants/:id/items/:item_id",
            get(get_item).patch(update_item).delete(delete_item),
        )
        .route("/merchants/:id/items/:item_id/stock", post(adjust_stock))
        .route("/merchants/:id/receipts", get(list_merchant_receipts).post(issue_receipt))
        .route("/merchants/:id/receipts/:receipt_id/void", post(void_receipt))
        .route("/merchants/:id/summary", get(merchant_summary))
        .route("/customers/:id/receipts", get(list_customer_receipts))
        .route("/customers/:id/receipts/scan", post(scan_receipt))
        .route("/customers/:id/receipts/upload", post(upload_receipt))
        .route("/customers/:id/summary", get(customer_summary))
        .route("/receipts/:id", get(get_receipt))
        .route("/receipts/:id/events", get(receipt_events))
        .fallback(api_not_found)
        .with_state(state);

    let mut app = Router::new().nest("/api", api_routes);

    // SPA build output, when configured
    if let Some(dir) = static_dir {
        app = app.fallback_service(ServeDir::new(dir));
    }

    app.layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
