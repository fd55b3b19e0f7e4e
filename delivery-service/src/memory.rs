//! Slot store kept in process memory behind a single mutex.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use shared::{ExpiredReservation, ReleaseFilter, ReservationError};
use uuid::Uuid;

use crate::models::*;
use crate::store::SlotStore;

#[derive(Default)]
struct State {
    slots: HashMap<Uuid, DeliverySlot>,
    windows: HashMap<(Uuid, DateTime<Utc>), Uuid>,
    reservations: HashMap<(Uuid, Uuid), DeliveryReservation>,
}

#[derive(Default)]
pub struct InMemorySlotStore {
    state: Mutex<State>,
}

impl InMemorySlotStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self, operation: &'static str) -> Result<MutexGuard<'_, State>, ReservationError> {
        self.state
            .lock()
            .map_err(|_| ReservationError::LockPoisoned(operation))
    }
}

#[async_trait]
impl SlotStore for InMemorySlotStore {
    async fn available_slots(&self, zone_id: Uuid, date: NaiveDate) -> Result<Vec<DeliverySlot>, ReservationError> {
        let state = self.lock("available_slots")?;
        let mut slots: Vec<DeliverySlot> = state
            .slots
            .values()
            .filter(|s| s.delivery_zone_id == zone_id && s.date == date && s.available > 0)
            .cloned()
            .collect();
        slots.sort_by_key(|s| s.start_time);
        Ok(slots)
    }

    async fn get_slot(&self, slot_id: Uuid) -> Result<Option<DeliverySlot>, ReservationError> {
        let state = self.lock("get_slot")?;
        Ok(state.slots.get(&slot_id).cloned())
    }

    async fn create_slots(&self, slots: Vec<NewDeliverySlot>) -> Result<Vec<DeliverySlot>, ReservationError> {
        let mut state = self.lock("create_slots")?;
        let mut created = Vec::new();

        for new_slot in slots {
            let window = (new_slot.delivery_zone_id, new_slot.start_time);
            if state.windows.contains_key(&window) {
                continue;
            }
            let slot = new_slot.into_slot();
            state.windows.insert(window, slot.id);
            state.slots.insert(slot.id, slot.clone());
            created.push(slot);
        }

        created.sort_by_key(|s| s.start_time);
        Ok(created)
    }

    async fn reserve(
        &self,
        slot_id: Uuid,
        order_id: Uuid,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<DeliveryReservation, ReservationError> {
        let mut state = self.lock("reserve")?;

        if !state.slots.contains_key(&slot_id) {
            return Err(ReservationError::PoolNotFound(slot_id));
        }
        if let Some(existing) = state.reservations.get(&(slot_id, order_id)) {
            return Ok(existing.clone());
        }

        let slot = state
            .slots
            .get_mut(&slot_id)
            .ok_or(ReservationError::PoolNotFound(slot_id))?;
        let mut capacity = slot.capacity();
        capacity.reserve(1)?;
        slot.set_capacity(capacity);

        let reservation = DeliveryReservation {
            id: Uuid::new_v4(),
            slot_id,
            order_id,
            expires_at,
            created_at: Utc::now(),
        };
        state.reservations.insert((slot_id, order_id), reservation.clone());
        Ok(reservation)
    }

    async fn release(&self, filter: ReleaseFilter) -> Result<Vec<DeliveryReservation>, ReservationError> {
        let mut state = self.lock("release")?;

        let mut keys: Vec<(Uuid, Uuid)> = state
            .reservations
            .values()
            .filter(|r| filter.matches(r.slot_id, r.order_id, r.expires_at))
            .map(|r| (r.slot_id, r.order_id))
            .collect();
        keys.sort();

        let mut released = Vec::with_capacity(keys.len());
        for key in keys {
            let Some(reservation) = state.reservations.remove(&key) else {
                continue;
            };
            if let Some(slot) = state.slots.get_mut(&reservation.slot_id) {
                let mut capacity = slot.capacity();
                capacity.release(1);
                slot.set_capacity(capacity);
            }
            released.push(reservation);
        }

        Ok(released)
    }

    async fn reservations_for_order(&self, order_id: Uuid) -> Result<Vec<DeliveryReservation>, ReservationError> {
        let state = self.lock("reservations_for_order")?;
        let mut reservations: Vec<DeliveryReservation> = state
            .reservations
            .values()
            .filter(|r| r.order_id == order_id)
            .cloned()
            .collect();
        reservations.sort_by_key(|r| r.created_at);
        Ok(reservations)
    }

    async fn expired_reservations(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<ExpiredReservation>, ReservationError> {
        let state = self.lock("expired_reservations")?;
        let mut expired: Vec<(DateTime<Utc>, ExpiredReservation)> = state
            .reservations
            .values()
            .filter_map(|r| {
                let at = r.expires_at?;
                (at <= now).then_some((
                    at,
                    ExpiredReservation {
                        pool_id: r.slot_id,
                        claimant_id: r.order_id,
                    },
                ))
            })
            .collect();
        expired.sort_by_key(|(at, _)| *at);
        Ok(expired
            .into_iter()
            .take(limit.max(0) as usize)
            .map(|(_, r)| r)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SlotLedger;
    use shared::ExpirySweeper;
    use std::sync::Arc;

    fn template(capacity: i32) -> SlotWindowTemplate {
        SlotWindowTemplate {
            delivery_zone_id: Uuid::new_v4(),
            date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            first_hour: 9,
            last_hour: 12,
            window_minutes: 60,
            capacity,
        }
    }

    async fn slot(store: &InMemorySlotStore, capacity: i32) -> DeliverySlot {
        store
            .create_slots(template(capacity).windows().unwrap())
            .await
            .unwrap()
            .remove(0)
    }

    #[tokio::test]
    async fn duplicate_windows_are_skipped() {
        let store = InMemorySlotStore::new();
        let template = template(2);

        let first = store.create_slots(template.windows().unwrap()).await.unwrap();
        let second = store.create_slots(template.windows().unwrap()).await.unwrap();

        assert_eq!(first.len(), 3);
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn listing_hides_full_slots_and_orders_by_start() {
        let store = InMemorySlotStore::new();
        let template = template(1);
        let slots = store.create_slots(template.windows().unwrap()).await.unwrap();
        store.reserve(slots[0].id, Uuid::new_v4(), None).await.unwrap();

        let listed = store
            .available_slots(template.delivery_zone_id, template.date)
            .await
            .unwrap();
        let ids: Vec<Uuid> = listed.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![slots[1].id, slots[2].id]);

        let other_day = template.date.succ_opt().unwrap();
        assert!(store
            .available_slots(template.delivery_zone_id, other_day)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn reserving_twice_for_one_order_is_a_no_op() {
        let store = InMemorySlotStore::new();
        let slot = slot(&store, 2).await;
        let order_id = Uuid::new_v4();

        let first = store.reserve(slot.id, order_id, None).await.unwrap();
        let second = store.reserve(slot.id, order_id, None).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(store.get_slot(slot.id).await.unwrap().unwrap().reserved, 1);
    }

    #[tokio::test]
    async fn full_slot_rejects_new_orders() {
        let store = InMemorySlotStore::new();
        let slot = slot(&store, 1).await;
        store.reserve(slot.id, Uuid::new_v4(), None).await.unwrap();

        let err = store.reserve(slot.id, Uuid::new_v4(), None).await.unwrap_err();
        assert!(matches!(
            err,
            ReservationError::InsufficientCapacity { requested: 1, available: 0 }
        ));
    }

    #[tokio::test]
    async fn missing_slot_is_not_found() {
        let store = InMemorySlotStore::new();
        let missing = Uuid::new_v4();
        let err = store.reserve(missing, Uuid::new_v4(), None).await.unwrap_err();
        assert!(matches!(err, ReservationError::PoolNotFound(id) if id == missing));
    }

    #[tokio::test]
    async fn release_frees_the_unit_once() {
        let store = InMemorySlotStore::new();
        let slot = slot(&store, 1).await;
        let order_id = Uuid::new_v4();
        store.reserve(slot.id, order_id, None).await.unwrap();

        assert_eq!(store.release(ReleaseFilter::claimant(order_id)).await.unwrap().len(), 1);
        assert!(store.release(ReleaseFilter::claimant(order_id)).await.unwrap().is_empty());

        let slot = store.get_slot(slot.id).await.unwrap().unwrap();
        assert_eq!(slot.reserved, 0);
        assert_eq!(slot.available, 1);
        assert!(store.reserve(slot.id, Uuid::new_v4(), None).await.is_ok());
    }

    #[tokio::test]
    async fn expired_filter_spares_renewed_reservations() {
        let store = InMemorySlotStore::new();
        let slot = slot(&store, 2).await;
        let now = Utc::now();
        let order_id = Uuid::new_v4();
        store
            .reserve(slot.id, order_id, Some(now + chrono::Duration::minutes(10)))
            .await
            .unwrap();

        let released = store
            .release(ReleaseFilter::expired(slot.id, order_id, now))
            .await
            .unwrap();
        assert!(released.is_empty());
        assert_eq!(store.reservations_for_order(order_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn sweep_frees_expired_bookings() {
        let store = Arc::new(InMemorySlotStore::new());
        let slot = slot(&store, 2).await;
        let now = Utc::now();
        let stale = Uuid::new_v4();
        let live = Uuid::new_v4();
        store
            .reserve(slot.id, stale, Some(now - chrono::Duration::minutes(1)))
            .await
            .unwrap();
        store.reserve(slot.id, live, None).await.unwrap();

        let ledger: Arc<dyn SlotStore> = store.clone();
        let sweeper = ExpirySweeper::new(
            Arc::new(SlotLedger(ledger)),
            std::time::Duration::from_secs(30),
            10,
        );
        assert_eq!(sweeper.sweep(now).await.unwrap(), 1);
        assert_eq!(sweeper.sweep(now).await.unwrap(), 0);

        let slot = store.get_slot(slot.id).await.unwrap().unwrap();
        assert_eq!(slot.reserved, 1);
        assert_eq!(slot.available, 1);
        assert!(store.reservations_for_order(stale).await.unwrap().is_empty());
        assert_eq!(store.reservations_for_order(live).await.unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_bookings_never_overbook() {
        let store = Arc::new(InMemorySlotStore::new());
        let slot_id = slot(&store, 5).await.id;

        let tasks = (0..25).map(|_| {
            let store = store.clone();
            tokio::spawn(async move { store.reserve(slot_id, Uuid::new_v4(), None).await })
        });
        let results = futures::future::join_all(tasks).await;

        let succeeded = results
            .into_iter()
            .filter(|r| matches!(r, Ok(Ok(_))))
            .count();
        let slot = store.get_slot(slot_id).await.unwrap().unwrap();
        assert_eq!(succeeded, 5);
        assert_eq!(slot.reserved, 5);
        assert_eq!(slot.available, 0);
    }
}
