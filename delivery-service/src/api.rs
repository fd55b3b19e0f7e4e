use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use shared::{ErrorResponse, ReservationError};
use uuid::Uuid;

use crate::models::{DeliverySlot, SlotWindowTemplate};
use crate::service::{DeliveryService, SlotReservation};

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<DeliveryService>,
}

#[derive(Debug, Deserialize)]
pub struct SlotQuery {
    pub delivery_zone_id: Uuid,
    pub date: NaiveDate,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SlotList {
    pub slots: Vec<DeliverySlot>,
}

#[derive(Debug, Deserialize)]
pub struct ReserveSlotRequest {
    pub order_id: Uuid,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct ReleaseSlotRequest {
    pub order_id: Uuid,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReleaseSlotResponse {
    pub order_id: Uuid,
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
        tracing::error!("Delivery request failed: {}", err);
    }
    (status, Json(ErrorResponse::from(&err)))
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/v1/delivery/slots", get(get_delivery_slots).post(create_delivery_slots))
        .route("/v1/delivery/slots/:slot_id", get(get_delivery_slot))
        .route("/v1/delivery/slots/:slot_id/reserve", post(reserve_delivery_slot))
        .route("/v1/delivery/release", post(release_delivery_slot))
        .route("/health", get(health_check))
        .with_state(state)
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
}

pub async fn get_delivery_slots(
    State(state): State<AppState>,
    Query(query): Query<SlotQuery>,
) -> Result<Json<SlotList>, ApiError> {
    let slots = state
        .service
        .get_delivery_slots(query.delivery_zone_id, query.date)
        .await
        .map_err(api_error)?;
    Ok(Json(SlotList { slots }))
}

pub async fn create_delivery_slots(
    State(state): State<AppState>,
    Json(template): Json<SlotWindowTemplate>,
) -> Result<(StatusCode, Json<SlotList>), ApiError> {
    let slots = state
        .service
        .create_delivery_slots(template)
        .await
        .map_err(api_error)?;
    Ok((StatusCode::CREATED, Json(SlotList { slots })))
}

pub async fn get_delivery_slot(
    State(state): State<AppState>,
    Path(slot_id): Path<Uuid>,
) -> Result<Json<DeliverySlot>, ApiError> {
    state.service.get_delivery_slot(slot_id).await.map(Json).map_err(api_error)
}

pub async fn reserve_delivery_slot(
    State(state): State<AppState>,
    Path(slot_id): Path<Uuid>,
    Json(request): Json<ReserveSlotRequest>,
) -> Result<Json<SlotReservation>, ApiError> {
    state
        .service
        .reserve_delivery_slot(slot_id, request.order_id, request.expires_at)
        .await
        .map(Json)
        .map_err(api_error)
}

pub async fn release_delivery_slot(
    State(state): State<AppState>,
    Json(request): Json<ReleaseSlotRequest>,
) -> Result<Json<ReleaseSlotResponse>, ApiError> {
    let released = state
        .service
        .release_delivery_slot(request.order_id)
        .await
        .map_err(api_error)?;
    Ok(Json(ReleaseSlotResponse {
        order_id: request.order_id,
        released,
    }))
}

pub async fn health_check() -> &'static str {
    "OK"
}
