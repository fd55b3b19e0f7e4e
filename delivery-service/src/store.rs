use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use shared::{ExpiredReservation, ExpiringLedger, ReleaseFilter, ReservationError};
use uuid::Uuid;

use crate::models::{DeliveryReservation, DeliverySlot, NewDeliverySlot};

/// Persistence seam for delivery slots and their reservation ledger.
///
/// A slot reservation always holds exactly one unit of the slot's capacity.
#[async_trait]
pub trait SlotStore: Send + Sync {
    /// Slots of `zone_id` on `date` that still have room, earliest first.
    async fn available_slots(&self, zone_id: Uuid, date: NaiveDate) -> Result<Vec<DeliverySlot>, ReservationError>;

    async fn get_slot(&self, slot_id: Uuid) -> Result<Option<DeliverySlot>, ReservationError>;

    /// Inserts the given windows, skipping any whose zone and start time
    /// already exist. Returns the slots actually created.
    async fn create_slots(&self, slots: Vec<NewDeliverySlot>) -> Result<Vec<DeliverySlot>, ReservationError>;

    /// Claims one unit of the slot for `order_id`. If the order already holds
    /// this slot the existing reservation is returned and nothing changes.
    async fn reserve(
        &self,
        slot_id: Uuid,
        order_id: Uuid,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<DeliveryReservation, ReservationError>;

    async fn release(&self, filter: ReleaseFilter) -> Result<Vec<DeliveryReservation>, ReservationError>;

    async fn reservations_for_order(&self, order_id: Uuid) -> Result<Vec<DeliveryReservation>, ReservationError>;

    async fn expired_reservations(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<ExpiredReservation>, ReservationError>;
}

pub struct SlotLedger(pub Arc<dyn SlotStore>);

#[async_trait]
impl ExpiringLedger for SlotLedger {
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
