use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use shared::{
    PageInfo, Pagination, ReleaseFilter, ReservationError, ReserveStockData, ReserveStockResult,
};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::models::{StockItem, StockKey, StockMovement, StockReservation};
use crate::store::StockStore;

/// Stock level as seen by callers. Pools that were never stocked read as zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLevel {
    pub stock_item_id: Option<Uuid>,
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    pub warehouse_id: Uuid,
    pub quantity: i32,
    pub reserved_quantity: i32,
    pub available_quantity: i32,
    pub updated_at: DateTime<Utc>,
}

impl From<StockItem> for StockLevel {
    fn from(item: StockItem) -> Self {
        Self {
            stock_item_id: Some(item.id),
            product_id: item.product_id,
            variant_id: item.variant_id,
            warehouse_id: item.warehouse_id,
            quantity: item.quantity,
            reserved_quantity: item.reserved_quantity,
            available_quantity: item.available_quantity,
            updated_at: item.updated_at,
        }
    }
}

impl StockLevel {
    fn empty(key: StockKey) -> Self {
        Self {
            stock_item_id: None,
            product_id: key.product_id,
            variant_id: key.variant_id,
            warehouse_id: key.warehouse_id,
            quantity: 0,
            reserved_quantity: 0,
            available_quantity: 0,
            updated_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MovementPage {
    pub movements: Vec<StockMovement>,
    pub pagination: PageInfo,
}

pub struct InventoryService {
    store: Arc<dyn StockStore>,
    reservation_ttl: Duration,
}

impl InventoryService {
    pub fn new(store: Arc<dyn StockStore>, reservation_ttl: Duration) -> Self {
        Self { store, reservation_ttl }
    }

    pub async fn get_stock(&self, key: StockKey) -> Result<StockLevel, ReservationError> {
        let level = match self.store.get_stock(&key).await? {
            Some(item) => StockLevel::from(item),
            None => StockLevel::empty(key),
        };
        Ok(level)
    }

    pub async fn update_stock(
        &self,
        key: StockKey,
        quantity_delta: i32,
        reason: Option<String>,
    ) -> Result<StockItem, ReservationError> {
        let reason = reason.filter(|r| !r.is_empty());
        let item = self.store.adjust_stock(&key, quantity_delta, reason).await?;
        info!(
            "Adjusted stock {} by {}: quantity {}, reserved {}",
            item.id, quantity_delta, item.quantity, item.reserved_quantity
        );
        Ok(item)
    }

    /// Attempts every line independently. Lines that succeed stay reserved
    /// even when a later line fails; callers wanting all-or-nothing release
    /// the order on `success == false`.
    pub async fn reserve_stock(&self, request: ReserveStockData) -> ReserveStockResult {
        let order_id = request.order_id;
        let expires_at = request
            .expires_at
            .or_else(|| Utc::now().checked_add_signed(self.reservation_ttl));
        if expires_at.is_none() {
            warn!("Reservation TTL out of range; order {} is held without expiry", order_id);
        }
        info!("Reserving {} items for order {}", request.items.len(), order_id);

        let mut failed_items = Vec::new();

        for item in &request.items {
            let key = StockKey::from(item);

            if item.quantity <= 0 {
                warn!("Rejected non-positive quantity {} for product {}", item.quantity, item.product_id);
                failed_items.push(item.product_id.to_string());
                continue;
            }

            let stock = match self.store.get_stock(&key).await {
                Ok(Some(stock)) => stock,
                Ok(None) => {
                    warn!("No stock pool for product {} in warehouse {}", item.product_id, item.warehouse_id);
                    failed_items.push(item.product_id.to_string());
                    continue;
                }
                Err(e) => {
                    error!("Failed to get stock for product {}: {}", item.product_id, e);
                    failed_items.push(item.product_id.to_string());
                    continue;
                }
            };

            if stock.available_quantity < item.quantity {
                warn!(
                    "Insufficient stock for product {}: requested {}, available {}",
                    item.product_id, item.quantity, stock.available_quantity
                );
                failed_items.push(item.product_id.to_string());
                continue;
            }

            if let Err(e) = self
                .store
                .reserve(order_id, stock.id, item.quantity, expires_at)
                .await
            {
                if e.is_business() {
                    warn!("Reservation of product {} for order {} refused: {}", item.product_id, order_id, e);
                } else {
                    error!("Failed to reserve product {} for order {}: {}", item.product_id, order_id, e);
                }
                failed_items.push(item.product_id.to_string());
            }
        }

        ReserveStockResult {
            reservation_id: order_id,
            success: failed_items.is_empty(),
            failed_items,
        }
    }

    /// Releases everything reserved under `reservation_id` (the order id).
    pub async fn release_stock(&self, reservation_id: Uuid) -> Result<usize, ReservationError> {
        let released = self
            .store
            .release(ReleaseFilter::claimant(reservation_id))
            .await?;
        info!("Released {} stock reservations for order {}", released.len(), reservation_id);
        Ok(released.len())
    }

    pub async fn reservations(&self, order_id: Uuid) -> Result<Vec<StockReservation>, ReservationError> {
        self.store.reservations_for_order(order_id).await
    }

    pub async fn get_stock_movements(
        &self,
        stock_item_id: Uuid,
        pagination: Pagination,
    ) -> Result<MovementPage, ReservationError> {
        let pagination = pagination.normalized();
        let movements = self.store.list_movements(stock_item_id, pagination).await?;
        Ok(MovementPage {
            pagination: PageInfo {
                page: pagination.page,
                limit: pagination.limit,
                total: movements.len() as i64,
            },
            movements,
        })
    }
}
