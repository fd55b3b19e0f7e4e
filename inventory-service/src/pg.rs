use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use shared::db::{checkout, DbPool};
use shared::{ExpiredReservation, Pagination, ReleaseFilter, ReservationError};
use uuid::Uuid;

use crate::models::*;
use crate::schema::*;
use crate::store::{release_reference, StockStore};

pub struct PgStockStore {
    pool: DbPool,
}

impl PgStockStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

async fn find_stock(conn: &mut AsyncPgConnection, key: &StockKey) -> Result<Option<StockItem>, ReservationError> {
    let item = stock_items::table
        .filter(stock_items::product_id.eq(key.product_id))
        .filter(stock_items::variant_id.is_not_distinct_from(key.variant_id))
        .filter(stock_items::warehouse_id.eq(key.warehouse_id))
        .first::<StockItem>(conn)
        .await
        .optional()?;
    Ok(item)
}

async fn record_movement(conn: &mut AsyncPgConnection, movement: &NewStockMovement) -> Result<(), ReservationError> {
    diesel::insert_into(stock_movements::table)
        .values(movement)
        .execute(conn)
        .await?;
    Ok(())
}

#[async_trait]
impl StockStore for PgStockStore {
    async fn get_stock(&self, key: &StockKey) -> Result<Option<StockItem>, ReservationError> {
        let mut conn = checkout(&self.pool).await?;
        find_stock(&mut conn, key).await
    }

    async fn get_stock_by_id(&self, stock_item_id: Uuid) -> Result<Option<StockItem>, ReservationError> {
        let mut conn = checkout(&self.pool).await?;
        let item = stock_items::table
            .find(stock_item_id)
            .first::<StockItem>(&mut conn)
            .await
            .optional()?;
        Ok(item)
    }

    async fn adjust_stock(
        &self,
        key: &StockKey,
        delta: i32,
        reason: Option<String>,
    ) -> Result<StockItem, ReservationError> {
        let mut conn = checkout(&self.pool).await?;
        let key = *key;

        conn.transaction::<_, ReservationError, _>(|conn| {
            Box::pin(async move {
                let new_item = NewStockItem {
                    id: Uuid::new_v4(),
                    product_id: key.product_id,
                    variant_id: key.variant_id,
                    warehouse_id: key.warehouse_id,
                    quantity: 0,
                    reserved_quantity: 0,
                };

                diesel::insert_into(stock_items::table)
                    .values(&new_item)
                    .on_conflict_do_nothing()
                    .execute(conn)
                    .await?;

                // Row lock keeps the read-modify-write below atomic against
                // concurrent reserves and releases on the same pool.
                let item = stock_items::table
                    .filter(stock_items::product_id.eq(key.product_id))
                    .filter(stock_items::variant_id.is_not_distinct_from(key.variant_id))
                    .filter(stock_items::warehouse_id.eq(key.warehouse_id))
                    .for_update()
                    .first::<StockItem>(conn)
                    .await?;

                let mut capacity = item.capacity();
                let applied = capacity.adjust(delta);

                let item = diesel::update(stock_items::table.find(item.id))
                    .set((
                        stock_items::quantity.eq(capacity.total),
                        stock_items::updated_at.eq(Utc::now()),
                    ))
                    .get_result::<StockItem>(conn)
                    .await?;

                let movement = NewStockMovement::new(
                    item.id,
                    MovementType::for_adjustment(delta),
                    applied,
                    reason,
                );
                record_movement(conn, &movement).await?;

                Ok(item)
            })
        })
        .await
    }

    async fn reserve(
        &self,
        order_id: Uuid,
        stock_item_id: Uuid,
        quantity: i32,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<StockReservation, ReservationError> {
        shared::capacity::ensure_positive(quantity)?;
        let mut conn = checkout(&self.pool).await?;

        conn.transaction::<_, ReservationError, _>(|conn| {
            Box::pin(async move {
                // The availability check lives in the WHERE clause so that the
                // check and the increment are one statement.
                let updated = diesel::update(
                    stock_items::table
                        .filter(stock_items::id.eq(stock_item_id))
                        .filter((stock_items::reserved_quantity + quantity).le(stock_items::quantity)),
                )
                .set((
                    stock_items::reserved_quantity.eq(stock_items::reserved_quantity + quantity),
                    stock_items::updated_at.eq(Utc::now()),
                ))
                .execute(conn)
                .await?;

                if updated == 0 {
                    let item = stock_items::table
                        .find(stock_item_id)
                        .first::<StockItem>(conn)
                        .await
                        .optional()?;
                    return Err(match item {
                        Some(item) => ReservationError::InsufficientCapacity {
                            requested: quantity,
                            available: item.available_quantity,
                        },
                        None => ReservationError::PoolNotFound(stock_item_id),
                    });
                }

                let new_reservation = NewStockReservation {
                    id: Uuid::new_v4(),
                    order_id,
                    stock_item_id,
                    quantity,
                    expires_at,
                };

                let reservation = diesel::insert_into(stock_reservations::table)
                    .values(&new_reservation)
                    .on_conflict((stock_reservations::order_id, stock_reservations::stock_item_id))
                    .do_update()
                    .set((
                        stock_reservations::quantity.eq(stock_reservations::quantity + quantity),
                        stock_reservations::expires_at.eq(expires_at),
                    ))
                    .get_result::<StockReservation>(conn)
                    .await?;

                let movement = NewStockMovement::new(
                    stock_item_id,
                    MovementType::Reservation,
                    quantity,
                    Some(order_reference(order_id)),
                );
                record_movement(conn, &movement).await?;

                Ok(reservation)
            })
        })
        .await
    }

    async fn release(&self, filter: ReleaseFilter) -> Result<Vec<StockReservation>, ReservationError> {
        let mut conn = checkout(&self.pool).await?;
        let reference = release_reference(&filter);

        conn.transaction::<_, ReservationError, _>(|conn| {
            Box::pin(async move {
                let mut query = stock_reservations::table
                    .filter(stock_reservations::order_id.eq(filter.claimant_id))
                    .into_boxed();
                if let Some(pool_id) = filter.pool_id {
                    query = query.filter(stock_reservations::stock_item_id.eq(pool_id));
                }
                if let Some(now) = filter.expired_before {
                    query = query.filter(stock_reservations::expires_at.le(now));
                }

                // Every path that touches a pool and its ledger locks the pool
                // row first. Releases visit pools in id order.
                let candidates = query
                    .order(stock_reservations::stock_item_id.asc())
                    .load::<StockReservation>(conn)
                    .await?;

                let mut released = Vec::with_capacity(candidates.len());
                for candidate in candidates {
                    let item = stock_items::table
                        .find(candidate.stock_item_id)
                        .for_update()
                        .first::<StockItem>(conn)
                        .await?;

                    // A concurrent release may already have taken this row; the
                    // delete decides who owns the decrement.
                    let deleted = match filter.expired_before {
                        Some(now) => diesel::delete(
                            stock_reservations::table
                                .find(candidate.id)
                                .filter(stock_reservations::expires_at.le(now)),
                        )
                        .get_result::<StockReservation>(conn)
                        .await
                        .optional()?,
                        None => diesel::delete(stock_reservations::table.find(candidate.id))
                            .get_result::<StockReservation>(conn)
                            .await
                            .optional()?,
                    };
                    let Some(reservation) = deleted else {
                        continue;
                    };

                    let mut capacity = item.capacity();
                    let freed = capacity.release(reservation.quantity);

                    diesel::update(stock_items::table.find(item.id))
                        .set((
                            stock_items::reserved_quantity.eq(capacity.reserved),
                            stock_items::updated_at.eq(Utc::now()),
                        ))
                        .execute(conn)
                        .await?;

                    let movement = NewStockMovement::new(
                        item.id,
                        MovementType::Release,
                        -freed,
                        Some(reference.clone()),
                    );
                    record_movement(conn, &movement).await?;

                    released.push(reservation);
                }

                Ok(released)
            })
        })
        .await
    }

    async fn reservations_for_order(&self, order_id: Uuid) -> Result<Vec<StockReservation>, ReservationError> {
        let mut conn = checkout(&self.pool).await?;
        let reservations = stock_reservations::table
            .filter(stock_reservations::order_id.eq(order_id))
            .order(stock_reservations::created_at.asc())
            .load::<StockReservation>(&mut conn)
            .await?;
        Ok(reservations)
    }

    async fn list_movements(
        &self,
        stock_item_id: Uuid,
        pagination: Pagination,
    ) -> Result<Vec<StockMovement>, ReservationError> {
        let pagination = pagination.normalized();
        let mut conn = checkout(&self.pool).await?;
        let movements = stock_movements::table
            .filter(stock_movements::stock_item_id.eq(stock_item_id))
            .order(stock_movements::created_at.desc())
            .limit(pagination.limit)
            .offset(pagination.offset())
            .load::<StockMovement>(&mut conn)
            .await?;
        Ok(movements)
    }

    async fn expired_reservations(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<ExpiredReservation>, ReservationError> {
        let mut conn = checkout(&self.pool).await?;
        let rows = stock_reservations::table
            .filter(stock_reservations::expires_at.le(now))
            .order(stock_reservations::expires_at.asc())
            .limit(limit)
            .select((stock_reservations::stock_item_id, stock_reservations::order_id))
            .load::<(Uuid, Uuid)>(&mut conn)
            .await?;

        Ok(rows
            .into_iter()
            .map(|(pool_id, claimant_id)| ExpiredReservation { pool_id, claimant_id })
            .collect())
    }
}
