use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use shared::Capacity;
use uuid::Uuid;
use chrono::{DateTime, Utc};

/// Identity of a stock pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StockKey {
    pub product_id: Uuid,
    #[serde(default)]
    pub variant_id: Option<Uuid>,
    pub warehouse_id: Uuid,
}

impl From<&shared::StockItemRequest> for StockKey {
    fn from(item: &shared::StockItemRequest) -> Self {
        Self {
            product_id: item.product_id,
            variant_id: item.variant_id,
            warehouse_id: item.warehouse_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Queryable, Identifiable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::stock_items)]
pub struct StockItem {
    pub id: Uuid,
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    pub warehouse_id: Uuid,
    pub quantity: i32,
    pub reserved_quantity: i32,
    pub available_quantity: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StockItem {
    pub fn new(key: StockKey) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            product_id: key.product_id,
            variant_id: key.variant_id,
            warehouse_id: key.warehouse_id,
            quantity: 0,
            reserved_quantity: 0,
            available_quantity: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn key(&self) -> StockKey {
        StockKey {
            product_id: self.product_id,
            variant_id: self.variant_id,
            warehouse_id: self.warehouse_id,
        }
    }

    pub fn capacity(&self) -> Capacity {
        Capacity {
            total: self.quantity,
            reserved: self.reserved_quantity,
        }
    }

    /// Writes `capacity` back, keeping the derived availability in step.
    pub fn set_capacity(&mut self, capacity: Capacity) {
        self.quantity = capacity.total;
        self.reserved_quantity = capacity.reserved;
        self.available_quantity = capacity.available();
        self.updated_at = Utc::now();
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::stock_items)]
pub struct NewStockItem {
    pub id: Uuid,
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    pub warehouse_id: Uuid,
    pub quantity: i32,
    pub reserved_quantity: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Queryable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::stock_reservations)]
pub struct StockReservation {
    pub id: Uuid,
    pub order_id: Uuid,
    pub stock_item_id: Uuid,
    pub quantity: i32,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::stock_reservations)]
pub struct NewStockReservation {
    pub id: Uuid,
    pub order_id: Uuid,
    pub stock_item_id: Uuid,
    pub quantity: i32,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MovementType {
    Inbound,
    Outbound,
    Reservation,
    Release,
}

impl MovementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inbound => "INBOUND",
            Self::Outbound => "OUTBOUND",
            Self::Reservation => "RESERVATION",
            Self::Release => "RELEASE",
        }
    }

    pub fn for_adjustment(delta: i32) -> Self {
        if delta >= 0 {
            Self::Inbound
        } else {
            Self::Outbound
        }
    }
}

impl std::str::FromStr for MovementType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INBOUND" => Ok(Self::Inbound),
            "OUTBOUND" => Ok(Self::Outbound),
            "RESERVATION" => Ok(Self::Reservation),
            "RELEASE" => Ok(Self::Release),
            other => Err(format!("unknown movement type: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Queryable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::stock_movements)]
pub struct StockMovement {
    pub id: Uuid,
    pub stock_item_id: Uuid,
    pub movement_type: String,
    pub quantity: i32,
    pub reference: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::stock_movements)]
pub struct NewStockMovement {
    pub id: Uuid,
    pub stock_item_id: Uuid,
    pub movement_type: String,
    pub quantity: i32,
    pub reference: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl NewStockMovement {
    pub fn new(stock_item_id: Uuid, movement_type: MovementType, quantity: i32, reference: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            stock_item_id,
            movement_type: movement_type.as_str().to_string(),
            quantity,
            reference,
            created_at: Utc::now(),
        }
    }

    pub fn into_movement(self) -> StockMovement {
        StockMovement {
            id: self.id,
            stock_item_id: self.stock_item_id,
            movement_type: self.movement_type,
            quantity: self.quantity,
            reference: self.reference,
            created_at: self.created_at,
        }
    }
}

#[cfg(feature = "kafka")]
#[derive(Debug, Clone, Queryable, Insertable)]
#[diesel(table_name = crate::schema::processed_commands)]
pub struct ProcessedCommand {
    pub idempotency_key: String,
    pub command_id: Uuid,
    pub result: Option<serde_json::Value>,
    pub processed_at: Option<DateTime<Utc>>,
}

/// Reference text recorded on movements caused by an order.
pub fn order_reference(order_id: Uuid) -> String {
    format!("Order: {}", order_id)
}
