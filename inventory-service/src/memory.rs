//! In-process stock store. One mutex guards all pools, so every operation is
//! trivially serializable; used for local runs without Postgres and in tests.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::{ExpiredReservation, Pagination, ReleaseFilter, ReservationError};
use uuid::Uuid;

use crate::models::*;
use crate::store::{release_reference, StockStore};

#[derive(Default)]
struct State {
    items: HashMap<Uuid, StockItem>,
    keys: HashMap<StockKey, Uuid>,
    reservations: HashMap<(Uuid, Uuid), StockReservation>,
    movements: Vec<StockMovement>,
}

impl State {
    fn record(&mut self, stock_item_id: Uuid, kind: MovementType, quantity: i32, reference: Option<String>) {
        let movement = NewStockMovement::new(stock_item_id, kind, quantity, reference);
        self.movements.push(movement.into_movement());
    }
}

#[derive(Default)]
pub struct InMemoryStockStore {
    state: Mutex<State>,
}

impl InMemoryStockStore {
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
impl StockStore for InMemoryStockStore {
    async fn get_stock(&self, key: &StockKey) -> Result<Option<StockItem>, ReservationError> {
        let state = self.lock("get_stock")?;
        Ok(state
            .keys
            .get(key)
            .and_then(|id| state.items.get(id))
            .cloned())
    }

    async fn get_stock_by_id(&self, stock_item_id: Uuid) -> Result<Option<StockItem>, ReservationError> {
        let state = self.lock("get_stock_by_id")?;
        Ok(state.items.get(&stock_item_id).cloned())
    }

    async fn adjust_stock(
        &self,
        key: &StockKey,
        delta: i32,
        reason: Option<String>,
    ) -> Result<StockItem, ReservationError> {
        let mut state = self.lock("adjust_stock")?;

        let existing = state.keys.get(key).copied();
        let id = match existing {
            Some(id) => id,
            None => {
                let item = StockItem::new(*key);
                let id = item.id;
                state.items.insert(id, item);
                state.keys.insert(*key, id);
                id
            }
        };

        let item = state
            .items
            .get_mut(&id)
            .ok_or(ReservationError::PoolNotFound(id))?;
        let mut capacity = item.capacity();
        let applied = capacity.adjust(delta);
        item.set_capacity(capacity);
        let item = item.clone();

        state.record(id, MovementType::for_adjustment(delta), applied, reason);
        Ok(item)
    }

    async fn reserve(
        &self,
        order_id: Uuid,
        stock_item_id: Uuid,
        quantity: i32,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<StockReservation, ReservationError> {
        let mut state = self.lock("reserve")?;

        let item = state
            .items
            .get_mut(&stock_item_id)
            .ok_or(ReservationError::PoolNotFound(stock_item_id))?;
        let mut capacity = item.capacity();
        capacity.reserve(quantity)?;
        item.set_capacity(capacity);

        let reservation = state
            .reservations
            .entry((order_id, stock_item_id))
            .and_modify(|r| {
                r.quantity += quantity;
                r.expires_at = expires_at;
            })
            .or_insert_with(|| StockReservation {
                id: Uuid::new_v4(),
                order_id,
                stock_item_id,
                quantity,
                expires_at,
                created_at: Utc::now(),
            })
            .clone();

        state.record(
            stock_item_id,
            MovementType::Reservation,
            quantity,
            Some(order_reference(order_id)),
        );
        Ok(reservation)
    }

    async fn release(&self, filter: ReleaseFilter) -> Result<Vec<StockReservation>, ReservationError> {
        let mut state = self.lock("release")?;
        let reference = release_reference(&filter);

        let mut keys: Vec<(Uuid, Uuid)> = state
            .reservations
            .values()
            .filter(|r| filter.matches(r.stock_item_id, r.order_id, r.expires_at))
            .map(|r| (r.order_id, r.stock_item_id))
            .collect();
        keys.sort_by_key(|(_, stock_item_id)| *stock_item_id);

        let mut released = Vec::with_capacity(keys.len());
        for key in keys {
            let Some(reservation) = state.reservations.remove(&key) else {
                continue;
            };

            let freed = match state.items.get_mut(&reservation.stock_item_id) {
                Some(item) => {
                    let mut capacity = item.capacity();
                    let freed = capacity.release(reservation.quantity);
                    item.set_capacity(capacity);
                    freed
                }
                None => 0,
            };

            state.record(
                reservation.stock_item_id,
                MovementType::Release,
                -freed,
                Some(reference.clone()),
            );
            released.push(reservation);
        }

        Ok(released)
    }

    async fn reservations_for_order(&self, order_id: Uuid) -> Result<Vec<StockReservation>, ReservationError> {
        let state = self.lock("reservations_for_order")?;
        let mut reservations: Vec<StockReservation> = state
            .reservations
            .values()
            .filter(|r| r.order_id == order_id)
            .cloned()
            .collect();
        reservations.sort_by_key(|r| r.created_at);
        Ok(reservations)
    }

    async fn list_movements(
        &self,
        stock_item_id: Uuid,
        pagination: Pagination,
    ) -> Result<Vec<StockMovement>, ReservationError> {
        let pagination = pagination.normalized();
        let state = self.lock("list_movements")?;
        // Appended in commit order, so reversing gives newest first.
        Ok(state
            .movements
            .iter()
            .rev()
            .filter(|m| m.stock_item_id == stock_item_id)
            .skip(usize::try_from(pagination.offset()).unwrap_or(usize::MAX))
            .take(pagination.limit as usize)
            .cloned()
            .collect())
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
                        pool_id: r.stock_item_id,
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
