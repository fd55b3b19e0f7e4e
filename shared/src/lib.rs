use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, Utc};

pub mod capacity;
pub mod db;
mod error;
pub mod pagination;
pub mod sweeper;

pub use capacity::Capacity;
pub use error::ReservationError;
pub use pagination::{PageInfo, Pagination};
pub use sweeper::{ExpiredReservation, ExpiringLedger, ExpirySweeper, ReleaseFilter};

/// One line of a stock reservation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockItemRequest {
    pub product_id: Uuid,
    #[serde(default)]
    pub variant_id: Option<Uuid>,
    pub warehouse_id: Uuid,
    pub quantity: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReserveStockData {
    pub order_id: Uuid,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    pub items: Vec<StockItemRequest>,
}

/// `reservation_id` is the order id the stock was reserved for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseStockData {
    pub reservation_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReserveStockResult {
    pub reservation_id: Uuid,
    pub success: bool,
    pub failed_items: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl From<&ReservationError> for ErrorResponse {
    fn from(err: &ReservationError) -> Self {
        Self {
            error: err.to_string(),
            code: err.code().to_string(),
        }
    }
}

/// Error code of a command reply whose reservation succeeded only in part.
pub const PARTIAL_RESERVATION: &str = "PARTIAL_RESERVATION";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    pub id: Uuid,
    pub correlation_id: Uuid,
    pub command_type: CommandType,
    pub payload: serde_json::Value,
    pub idempotency_key: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandType {
    ReserveStock,
    ReleaseStock,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandReply {
    pub id: Uuid,
    pub command_id: Uuid,
    pub correlation_id: Uuid,
    pub status: CommandStatus,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub error_code: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandStatus {
    Success,
    Failed,
}

impl Command {
    pub fn new(correlation_id: Uuid, command_type: CommandType, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            correlation_id,
            command_type,
            payload,
            idempotency_key: format!("{}_{}", correlation_id, Uuid::new_v4()),
            created_at: Utc::now(),
        }
    }
}

impl CommandReply {
    pub fn success(command: &Command, result: Option<serde_json::Value>) -> Self {
        Self {
            id: Uuid::new_v4(),
            command_id: command.id,
            correlation_id: command.correlation_id,
            status: CommandStatus::Success,
            result,
            error: None,
            error_code: None,
            created_at: Utc::now(),
        }
    }

    /// Reply to a `ReserveStock` command. A reservation that missed any line
    /// is reported as failed, with the per-line result still attached.
    pub fn reservation(command: &Command, result: &ReserveStockResult) -> Result<Self, serde_json::Error> {
        let mut reply = Self::success(command, Some(serde_json::to_value(result)?));
        if !result.success {
            reply.status = CommandStatus::Failed;
            reply.error = Some(format!("Could not reserve: {}", result.failed_items.join(", ")));
            reply.error_code = Some(PARTIAL_RESERVATION.to_string());
        }
        Ok(reply)
    }

    /// Reply to a `ReleaseStock` command.
    pub fn release(command: &Command, outcome: Result<usize, &ReservationError>) -> Self {
        match outcome {
            Ok(released) => Self::success(command, Some(serde_json::json!({ "released": released }))),
            Err(e) => Self::failed(command, e),
        }
    }

    pub fn failed(command: &Command, error: &ReservationError) -> Self {
        Self {
            id: Uuid::new_v4(),
            command_id: command.id,
            correlation_id: command.correlation_id,
            status: CommandStatus::Failed,
            result: None,
            error: Some(error.to_string()),
            error_code: Some(error.code().to_string()),
            created_at: Utc::now(),
        }
    }
}
