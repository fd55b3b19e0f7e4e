use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::{ExpiredReservation, ExpiringLedger, Pagination, ReleaseFilter, ReservationError};
use uuid::Uuid;

use crate::models::{StockItem, StockKey, StockMovement, StockReservation};

/// Persistence seam for stock pools, their reservation ledger and movement log.
///
/// Every mutating method is a single atomic unit: either all of its effects
/// (pool counters, ledger row, movement record) are committed or none are.
#[async_trait]
pub trait StockStore: Send + Sync {
    async fn get_stock(&self, key: &StockKey) -> Result<Option<StockItem>, ReservationError>;

    async fn get_stock_by_id(&self, stock_item_id: Uuid) -> Result<Option<StockItem>, ReservationError>;

    /// Creates the pool on first use, then applies the clamped capacity change
    /// and appends an INBOUND/OUTBOUND movement.
    async fn adjust_stock(
        &self,
        key: &StockKey,
        delta: i32,
        reason: Option<String>,
    ) -> Result<StockItem, ReservationError>;

    /// Claims `quantity` units of the pool for `order_id`. Repeated calls for
    /// the same order and pool accumulate into one reservation.
    async fn reserve(
        &self,
        order_id: Uuid,
        stock_item_id: Uuid,
        quantity: i32,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<StockReservation, ReservationError>;

    /// Removes every reservation matching `filter` and returns the released
    /// rows. Nothing matching is not an error.
    async fn release(&self, filter: ReleaseFilter) -> Result<Vec<StockReservation>, ReservationError>;

    async fn reservations_for_order(&self, order_id: Uuid) -> Result<Vec<StockReservation>, ReservationError>;

    /// Movements of one pool, newest first.
    async fn list_movements(
        &self,
        stock_item_id: Uuid,
        pagination: Pagination,
    ) -> Result<Vec<StockMovement>, ReservationError>;

    async fn expired_reservations(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<ExpiredReservation>, ReservationError>;
}

/// Exposes a stock store to the expiry sweeper.
pub struct StockLedger(pub Arc<dyn StockStore>);

#[async_trait]
impl ExpiringLedger for StockLedger {
    async fn expired_reservations(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<ExpiredReservation>, ReservationError> {
        self.0.expired_reservations(now, limit).await
    }

    async fn release_matching(&self, filter: ReleaseFilter) -> Result<usize, ReservationError> {
        Ok(self.0.release(filter).await?.len())
    }
}

/// Reference recorded on RELEASE movements.
pub fn release_reference(filter: &ReleaseFilter) -> String {
    if filter.expired_before.is_some() {
        format!("Expired: Order: {}", filter.claimant_id)
    } else {
        crate::models::order_reference(filter.claimant_id)
    }
}
