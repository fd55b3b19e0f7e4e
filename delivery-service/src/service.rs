use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use shared::{ReleaseFilter, ReservationError};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::models::{DeliverySlot, SlotWindowTemplate};
use crate::store::SlotStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotReservation {
    pub reservation_id: Uuid,
    pub slot_id: Uuid,
    pub order_id: Uuid,
    pub reserved_at: DateTime<Utc>,
}

pub struct DeliveryService {
    store: Arc<dyn SlotStore>,
}

impl DeliveryService {
    pub fn new(store: Arc<dyn SlotStore>) -> Self {
        Self { store }
    }

    pub async fn get_delivery_slots(&self, zone_id: Uuid, date: NaiveDate) -> Result<Vec<DeliverySlot>, ReservationError> {
        self.store.available_slots(zone_id, date).await
    }

    pub async fn get_delivery_slot(&self, slot_id: Uuid) -> Result<DeliverySlot, ReservationError> {
        self.store
            .get_slot(slot_id)
            .await?
            .ok_or(ReservationError::PoolNotFound(slot_id))
    }

    pub async fn create_delivery_slots(&self, template: SlotWindowTemplate) -> Result<Vec<DeliverySlot>, ReservationError> {
        let windows = template.windows()?;
        let requested = windows.len();
        let created = self.store.create_slots(windows).await?;
        info!(
            "Created {} of {} delivery slots for zone {} on {}",
            created.len(),
            requested,
            template.delivery_zone_id,
            template.date
        );
        Ok(created)
    }

    /// Books one unit of `slot_id` for the order. Booking the same slot again
    /// for the same order returns the existing reservation.
    pub async fn reserve_delivery_slot(
        &self,
        slot_id: Uuid,
        order_id: Uuid,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<SlotReservation, ReservationError> {
        match self.store.reserve(slot_id, order_id, expires_at).await {
            Ok(reservation) => {
                info!("Reserved delivery slot {} for order {}", slot_id, order_id);
                Ok(SlotReservation {
                    reservation_id: reservation.id,
                    slot_id: reservation.slot_id,
                    order_id: reservation.order_id,
                    reserved_at: reservation.created_at,
                })
            }
            Err(e) => {
                if e.is_business() {
                    warn!("Delivery slot {} refused for order {}: {}", slot_id, order_id, e);
                } else {
                    error!("Failed to reserve delivery slot {} for order {}: {}", slot_id, order_id, e);
                }
                Err(e)
            }
        }
    }

    pub async fn release_delivery_slot(&self, order_id: Uuid) -> Result<usize, ReservationError> {
        let released = self.store.release(ReleaseFilter::claimant(order_id)).await?;
        info!("Released {} delivery reservations for order {}", released.len(), order_id);
        Ok(released.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemorySlotStore;

    fn service() -> DeliveryService {
        DeliveryService::new(Arc::new(InMemorySlotStore::new()))
    }

    fn template(capacity: i32) -> SlotWindowTemplate {
        SlotWindowTemplate {
            delivery_zone_id: Uuid::new_v4(),
            date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            first_hour: 8,
            last_hour: 20,
            window_minutes: 120,
            capacity,
        }
    }

    #[tokio::test]
    async fn booked_out_slot_disappears_from_listing() {
        let service = service();
        let template = template(1);
        let slots = service.create_delivery_slots(template.clone()).await.unwrap();
        assert_eq!(slots.len(), 6);

        service
            .reserve_delivery_slot(slots[0].id, Uuid::new_v4(), None)
            .await
            .unwrap();

        let listed = service
            .get_delivery_slots(template.delivery_zone_id, template.date)
            .await
            .unwrap();
        assert_eq!(listed.len(), 5);
        assert_eq!(listed[0].id, slots[1].id);
    }

    #[tokio::test]
    async fn repeat_booking_returns_same_reservation() {
        let service = service();
        let slot_id = service.create_delivery_slots(template(3)).await.unwrap()[0].id;
        let order_id = Uuid::new_v4();

        let first = service.reserve_delivery_slot(slot_id, order_id, None).await.unwrap();
        let second = service.reserve_delivery_slot(slot_id, order_id, None).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(service.get_delivery_slot(slot_id).await.unwrap().available, 2);
    }

    #[tokio::test]
    async fn unknown_slot_is_a_hard_not_found() {
        let service = service();
        let missing = Uuid::new_v4();
        assert!(matches!(
            service.get_delivery_slot(missing).await,
            Err(ReservationError::PoolNotFound(id)) if id == missing
        ));
        assert!(matches!(
            service.reserve_delivery_slot(missing, Uuid::new_v4(), None).await,
            Err(ReservationError::PoolNotFound(_))
        ));
    }

    #[tokio::test]
    async fn release_returns_capacity() {
        let service = service();
        let slot_id = service.create_delivery_slots(template(1)).await.unwrap()[0].id;
        let order_id = Uuid::new_v4();
        service.reserve_delivery_slot(slot_id, order_id, None).await.unwrap();

        assert_eq!(service.release_delivery_slot(order_id).await.unwrap(), 1);
        assert_eq!(service.release_delivery_slot(order_id).await.unwrap(), 0);
        assert_eq!(service.get_delivery_slot(slot_id).await.unwrap().available, 1);
    }

    #[tokio::test]
    async fn invalid_template_creates_nothing() {
        let service = service();
        let mut template = template(2);
        template.window_minutes = 0;

        assert!(matches!(
            service.create_delivery_slots(template.clone()).await,
            Err(ReservationError::InvalidSlotWindow(_))
        ));
        assert!(service
            .get_delivery_slots(template.delivery_zone_id, template.date)
            .await
            .unwrap()
            .is_empty());
    }
}
