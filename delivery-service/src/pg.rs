use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use diesel::prelude::*;
use diesel_async::{AsyncConnection, RunQueryDsl};
use shared::db::{checkout, DbPool};
use shared::{ExpiredReservation, ReleaseFilter, ReservationError};
use uuid::Uuid;

use crate::models::*;
use crate::schema::*;
use crate::store::SlotStore;

pub struct PgSlotStore {
    pool: DbPool,
}

impl PgSlotStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SlotStore for PgSlotStore {
    async fn available_slots(&self, zone_id: Uuid, date: NaiveDate) -> Result<Vec<DeliverySlot>, ReservationError> {
        let mut conn = checkout(&self.pool).await?;
        let slots = delivery_slots::table
            .filter(delivery_slots::delivery_zone_id.eq(zone_id))
            .filter(delivery_slots::date.eq(date))
            .filter(delivery_slots::available.gt(0))
            .order(delivery_slots::start_time.asc())
            .load::<DeliverySlot>(&mut conn)
            .await?;
        Ok(slots)
    }

    async fn get_slot(&self, slot_id: Uuid) -> Result<Option<DeliverySlot>, ReservationError> {
        let mut conn = checkout(&self.pool).await?;
        let slot = delivery_slots::table
            .find(slot_id)
            .first::<DeliverySlot>(&mut conn)
            .await
            .optional()?;
        Ok(slot)
    }

    async fn create_slots(&self, slots: Vec<NewDeliverySlot>) -> Result<Vec<DeliverySlot>, ReservationError> {
        if slots.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = checkout(&self.pool).await?;
        // RETURNING only yields rows that were inserted, so skipped windows
        // are absent from the result.
        let mut created = diesel::insert_into(delivery_slots::table)
            .values(&slots)
            .on_conflict((delivery_slots::delivery_zone_id, delivery_slots::start_time))
            .do_nothing()
            .get_results::<DeliverySlot>(&mut conn)
            .await?;
        created.sort_by_key(|slot| slot.start_time);
        Ok(created)
    }

    async fn reserve(
        &self,
        slot_id: Uuid,
        order_id: Uuid,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<DeliveryReservation, ReservationError> {
        let mut conn = checkout(&self.pool).await?;

        conn.transaction::<_, ReservationError, _>(|conn| {
            Box::pin(async move {
                // Locking the slot first serializes reservations of the same
                // slot, so the existence check below cannot race the insert.
                let slot = delivery_slots::table
                    .find(slot_id)
                    .for_update()
                    .first::<DeliverySlot>(conn)
                    .await
                    .optional()?
                    .ok_or(ReservationError::PoolNotFound(slot_id))?;

                let existing = delivery_reservations::table
                    .filter(delivery_reservations::slot_id.eq(slot_id))
                    .filter(delivery_reservations::order_id.eq(order_id))
                    .for_update()
                    .first::<DeliveryReservation>(conn)
                    .await
                    .optional()?;
                if let Some(reservation) = existing {
                    return Ok(reservation);
                }

                let updated = diesel::update(
                    delivery_slots::table
                        .filter(delivery_slots::id.eq(slot_id))
                        .filter((delivery_slots::reserved + 1).le(delivery_slots::capacity)),
                )
                .set((
                    delivery_slots::reserved.eq(delivery_slots::reserved + 1),
                    delivery_slots::updated_at.eq(Utc::now()),
                ))
                .execute(conn)
                .await?;

                if updated == 0 {
                    return Err(ReservationError::InsufficientCapacity {
                        requested: 1,
                        available: slot.available,
                    });
                }

                let new_reservation = NewDeliveryReservation {
                    id: Uuid::new_v4(),
                    slot_id,
                    order_id,
                    expires_at,
                };
                let reservation = diesel::insert_into(delivery_reservations::table)
                    .values(&new_reservation)
                    .get_result::<DeliveryReservation>(conn)
                    .await?;

                Ok(reservation)
            })
        })
        .await
    }

    async fn release(&self, filter: ReleaseFilter) -> Result<Vec<DeliveryReservation>, ReservationError> {
        let mut conn = checkout(&self.pool).await?;

        conn.transaction::<_, ReservationError, _>(|conn| {
            Box::pin(async move {
                let mut query = delivery_reservations::table
                    .filter(delivery_reservations::order_id.eq(filter.claimant_id))
                    .into_boxed();
                if let Some(slot_id) = filter.pool_id {
                    query = query.filter(delivery_reservations::slot_id.eq(slot_id));
                }
                if let Some(now) = filter.expired_before {
                    query = query.filter(delivery_reservations::expires_at.le(now));
                }

                // The slot row is locked before its ledger row, as in `reserve`.
                let candidates = query
                    .order(delivery_reservations::slot_id.asc())
                    .load::<DeliveryReservation>(conn)
                    .await?;

                let mut released = Vec::with_capacity(candidates.len());
                for candidate in candidates {
                    let slot = delivery_slots::table
                        .find(candidate.slot_id)
                        .for_update()
                        .first::<DeliverySlot>(conn)
                        .await?;

                    let deleted = match filter.expired_before {
                        Some(now) => diesel::delete(
                            delivery_reservations::table
                                .find(candidate.id)
                                .filter(delivery_reservations::expires_at.le(now)),
                        )
                        .get_result::<DeliveryReservation>(conn)
                        .await
                        .optional()?,
                        None => diesel::delete(delivery_reservations::table.find(candidate.id))
                            .get_result::<DeliveryReservation>(conn)
                            .await
                            .optional()?,
                    };
                    let Some(reservation) = deleted else {
                        continue;
                    };

                    let mut capacity = slot.capacity();
                    capacity.release(1);

                    diesel::update(delivery_slots::table.find(slot.id))
                        .set((
                            delivery_slots::reserved.eq(capacity.reserved),
                            delivery_slots::updated_at.eq(Utc::now()),
                        ))
                        .execute(conn)
                        .await?;

                    released.push(reservation);
                }

                Ok(released)
            })
        })
        .await
    }

    async fn reservations_for_order(&self, order_id: Uuid) -> Result<Vec<DeliveryReservation>, ReservationError> {
        let mut conn = checkout(&self.pool).await?;
        let reservations = delivery_reservations::table
            .filter(delivery_reservations::order_id.eq(order_id))
            .order(delivery_reservations::created_at.asc())
            .load::<DeliveryReservation>(&mut conn)
            .await?;
        Ok(reservations)
    }

    async fn expired_reservations(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<ExpiredReservation>, ReservationError> {
        let mut conn = checkout(&self.pool).await?;
        let rows = delivery_reservations::table
            .filter(delivery_reservations::expires_at.le(now))
            .order(delivery_reservations::expires_at.asc())
            .limit(limit)
            .select((delivery_reservations::slot_id, delivery_reservations::order_id))
            .load::<(Uuid, Uuid)>(&mut conn)
            .await?;

        Ok(rows
            .into_iter()
            .map(|(pool_id, claimant_id)| ExpiredReservation { pool_id, claimant_id })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    //! Run against Postgres with `TEST_DATABASE_URL` set:
    //! `cargo test -p delivery-service -- --ignored`

    use super::*;
    use diesel::{Connection, PgConnection};
    use diesel_migrations::MigrationHarness;
    use std::sync::Arc;

    async fn store() -> PgSlotStore {
        let url = std::env::var("TEST_DATABASE_URL").expect("TEST_DATABASE_URL must be set");
        let mut conn = PgConnection::establish(&url).expect("connect for migrations");
        conn.run_pending_migrations(crate::MIGRATIONS).expect("migrations");
        PgSlotStore::new(shared::db::connect(&url, 32).await.expect("pool"))
    }

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

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    #[ignore]
    async fn concurrent_bookings_never_overbook() {
        let store = Arc::new(store().await);
        let slot_id = store.create_slots(template(3).windows().unwrap()).await.unwrap()[0].id;

        let mut tasks = Vec::new();
        for _ in 0..10 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                store.reserve(slot_id, Uuid::new_v4(), None).await
            }));
        }

        let mut succeeded = 0;
        for task in tasks {
            if task.await.unwrap().is_ok() {
                succeeded += 1;
            }
        }

        let slot = store.get_slot(slot_id).await.unwrap().unwrap();
        assert_eq!(succeeded, 3);
        assert_eq!(slot.reserved, 3);
        assert_eq!(slot.available, 0);
    }

    #[tokio::test]
    #[ignore]
    async fn regenerating_a_day_skips_existing_windows() {
        let store = store().await;
        let template = template(2);
        assert_eq!(store.create_slots(template.windows().unwrap()).await.unwrap().len(), 3);
        assert!(store.create_slots(template.windows().unwrap()).await.unwrap().is_empty());
    }

    #[tokio::test]
    #[ignore]
    async fn rebooking_same_order_holds_one_unit() {
        let store = store().await;
        let slot_id = store.create_slots(template(2).windows().unwrap()).await.unwrap()[0].id;
        let order_id = Uuid::new_v4();

        let first = store.reserve(slot_id, order_id, None).await.unwrap();
        let second = store.reserve(slot_id, order_id, None).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(store.get_slot(slot_id).await.unwrap().unwrap().reserved, 1);

        assert_eq!(store.release(ReleaseFilter::claimant(order_id)).await.unwrap().len(), 1);
        assert_eq!(store.get_slot(slot_id).await.unwrap().unwrap().reserved, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    #[ignore]
    async fn rebooking_while_releasing_never_leaks_capacity() {
        let store = Arc::new(store().await);
        let slot_id = store.create_slots(template(500).windows().unwrap()).await.unwrap()[0].id;

        for _ in 0..100 {
            let order_id = Uuid::new_v4();
            store.reserve(slot_id, order_id, None).await.unwrap();

            let booking = {
                let store = store.clone();
                tokio::spawn(async move { store.reserve(slot_id, order_id, None).await })
            };
            let releasing = {
                let store = store.clone();
                tokio::spawn(async move { store.release(ReleaseFilter::claimant(order_id)).await })
            };

            booking.await.unwrap().unwrap();
            releasing.await.unwrap().unwrap();

            let held = store.reservations_for_order(order_id).await.unwrap();
            let slot = store.get_slot(slot_id).await.unwrap().unwrap();
            assert_eq!(slot.reserved as usize, held.len());

            store.release(ReleaseFilter::claimant(order_id)).await.unwrap();
        }

        assert_eq!(store.get_slot(slot_id).await.unwrap().unwrap().reserved, 0);
    }
}
