use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use shared::{
    ErrorResponse, Pagination, ReleaseStockData, ReservationError, ReserveStockData, ReserveStockResult,
};
use uuid::Uuid;

use crate::models::{StockItem, StockKey, StockReservation};
use crate::service::{InventoryService, MovementPage, StockLevel};

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<InventoryService>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateStockRequest {
    pub product_id: Uuid,
    #[serde(default)]
    pub variant_id: Option<Uuid>,
    pub warehouse_id: Uuid,
    pub quantity_delta: i32,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReleaseStockResponse {
    pub reservation_id: Uuid,
    pub released: usize,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(err: ReservationError) -> ApiError {
    let status = match &err {
        ReservationError::InvalidQuantity(_) | ReservationError::InvalidSlotWindow(_) => StatusCode::BAD_REQUEST,
        ReservationError::PoolNotFound(_) => StatusCode::NOT_FOUND,
        ReservationError::InsufficientCapacity { .. } => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if !err.is_business() {
        tracing::error!("Inventory request failed: {}", err);
    }
    (status, Json(ErrorResponse::from(&err)))
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/v1/inventory/stock", get(get_stock).post(update_stock))
        .route("/v1/inventory/reserve", post(reserve_stock))
        .route("/v1/inventory/release", post(release_stock))
        .route("/v1/inventory/reservations/:order_id", get(get_reservations))
        .route("/v1/inventory/movements/:stock_item_id", get(get_stock_movements))
        .route("/health", get(health_check))
        .with_state(state)
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
}

pub async fn get_stock(
    State(state): State<AppState>,
    Query(key): Query<StockKey>,
) -> Result<Json<StockLevel>, ApiError> {
    state.service.get_stock(key).await.map(Json).map_err(api_error)
}

pub async fn update_stock(
    State(state): State<AppState>,
    Json(request): Json<UpdateStockRequest>,
) -> Result<Json<StockItem>, ApiError> {
    let key = StockKey {
        product_id: request.product_id,
        variant_id: request.variant_id,
        warehouse_id: request.warehouse_id,
    };
    state
        .service
        .update_stock(key, request.quantity_delta, request.reason)
        .await
        .map(Json)
        .map_err(api_error)
}

pub async fn reserve_stock(
    State(state): State<AppState>,
    Json(request): Json<ReserveStockData>,
) -> Json<ReserveStockResult> {
    Json(state.service.reserve_stock(request).await)
}

pub async fn release_stock(
    State(state): State<AppState>,
    Json(request): Json<ReleaseStockData>,
) -> Result<Json<ReleaseStockResponse>, ApiError> {
    let released = state
        .service
        .release_stock(request.reservation_id)
        .await
        .map_err(api_error)?;
    Ok(Json(ReleaseStockResponse {
        reservation_id: request.reservation_id,
        released,
    }))
}

pub async fn get_reservations(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> Result<Json<Vec<StockReservation>>, ApiError> {
    state.service.reservations(order_id).await.map(Json).map_err(api_error)
}

pub async fn get_stock_movements(
    State(state): State<AppState>,
    Path(stock_item_id): Path<Uuid>,
    Query(pagination): Query<Pagination>,
) -> Result<Json<MovementPage>, ApiError> {
    state
        .service
        .get_stock_movements(stock_item_id, pagination)
        .await
        .map(Json)
        .map_err(api_error)
}

pub async fn health_check() -> &'static str {
    "OK"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryStockStore;
    use axum::body::Body;
    use axum::http::{header, Method, Request};
    use serde::de::DeserializeOwned;
    use tower::ServiceExt;

    fn app() -> Router {
        let service = InventoryService::new(
            Arc::new(InMemoryStockStore::new()),
            chrono::Duration::minutes(30),
        );
        create_router(AppState {
            service: Arc::new(service),
        })
    }

    async fn send(app: &Router, method: Method, uri: &str, body: Option<serde_json::Value>) -> (StatusCode, Vec<u8>) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        let response = app
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, bytes.to_vec())
    }

    fn decode<T: DeserializeOwned>(bytes: &[u8]) -> T {
        serde_json::from_slice(bytes).unwrap()
    }

    #[tokio::test]
    async fn stock_lifecycle_over_http() {
        let app = app();
        let product_id = Uuid::new_v4();
        let warehouse_id = Uuid::new_v4();
        let order_id = Uuid::new_v4();

        let (status, body) = send(
            &app,
            Method::POST,
            "/v1/inventory/stock",
            Some(serde_json::json!({
                "product_id": product_id,
                "warehouse_id": warehouse_id,
                "quantity_delta": 5,
                "reason": "inbound shipment"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let item: StockItem = decode(&body);

        let (status, body) = send(
            &app,
            Method::POST,
            "/v1/inventory/reserve",
            Some(serde_json::json!({
                "order_id": order_id,
                "items": [{ "product_id": product_id, "warehouse_id": warehouse_id, "quantity": 3 }]
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let result: ReserveStockResult = decode(&body);
        assert!(result.success);

        let uri = format!(
            "/v1/inventory/stock?product_id={}&warehouse_id={}",
            product_id, warehouse_id
        );
        let (_, body) = send(&app, Method::GET, &uri, None).await;
        let level: StockLevel = decode(&body);
        assert_eq!(level.reserved_quantity, 3);
        assert_eq!(level.available_quantity, 2);

        let (status, body) = send(
            &app,
            Method::POST,
            "/v1/inventory/release",
            Some(serde_json::json!({ "reservation_id": result.reservation_id })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let released: ReleaseStockResponse = decode(&body);
        assert_eq!(released.released, 1);

        let uri = format!("/v1/inventory/movements/{}?page=1&limit=10", item.id);
        let (_, body) = send(&app, Method::GET, &uri, None).await;
        let page: MovementPage = decode(&body);
        let kinds: Vec<&str> = page.movements.iter().map(|m| m.movement_type.as_str()).collect();
        assert_eq!(kinds, vec!["RELEASE", "RESERVATION", "INBOUND"]);
    }

    #[tokio::test]
    async fn missing_pool_reports_zero_stock() {
        let app = app();
        let uri = format!(
            "/v1/inventory/stock?product_id={}&warehouse_id={}",
            Uuid::new_v4(),
            Uuid::new_v4()
        );
        let (status, body) = send(&app, Method::GET, &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        let level: StockLevel = decode(&body);
        assert_eq!(level.available_quantity, 0);
    }

    #[tokio::test]
    async fn malformed_ids_are_rejected() {
        let app = app();
        let (status, _) = send(
            &app,
            Method::GET,
            "/v1/inventory/stock?product_id=not-a-uuid&warehouse_id=also-not",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn page_past_the_end_is_empty() {
        let app = app();
        let uri = format!(
            "/v1/inventory/movements/{}?page={}&limit=50",
            Uuid::new_v4(),
            i64::MAX
        );
        let (status, body) = send(&app, Method::GET, &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        let page: MovementPage = decode(&body);
        assert!(page.movements.is_empty());
        assert_eq!(page.pagination.page, i64::MAX);
        assert_eq!(page.pagination.total, 0);
    }

    #[test]
    fn error_statuses() {
        let (status, body) = api_error(ReservationError::InsufficientCapacity { requested: 2, available: 1 });
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body.0.code, "INSUFFICIENT_CAPACITY");
        assert_eq!(api_error(ReservationError::PoolNotFound(Uuid::nil())).0, StatusCode::NOT_FOUND);
        assert_eq!(api_error(ReservationError::InvalidQuantity(0)).0, StatusCode::BAD_REQUEST);
        assert_eq!(
            api_error(ReservationError::Connection("refused".into())).0,
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
