use thiserror::Error;
use uuid::Uuid;

/// Failure modes of the reservation engine.
///
/// `InsufficientCapacity` and `PoolNotFound` are ordinary business outcomes and
/// are reported to the caller as-is. The remaining variants are infrastructure
/// failures.
#[derive(Debug, Error)]
pub enum ReservationError {
    #[error("quantity must be positive, got {0}")]
    InvalidQuantity(i32),

    #[error("insufficient capacity: requested {requested}, available {available}")]
    InsufficientCapacity { requested: i32, available: i32 },

    #[error("pool not found: {0}")]
    PoolNotFound(Uuid),

    #[error("invalid slot window: {0}")]
    InvalidSlotWindow(String),

    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("connection pool error: {0}")]
    Connection(String),

    #[error("store lock poisoned during {0}")]
    LockPoisoned(&'static str),
}

impl ReservationError {
    /// Stable machine-readable code, used in API error bodies and command replies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidQuantity(_) => "INVALID_QUANTITY",
            Self::InsufficientCapacity { .. } => "INSUFFICIENT_CAPACITY",
            Self::PoolNotFound(_) => "POOL_NOT_FOUND",
            Self::InvalidSlotWindow(_) => "INVALID_SLOT_WINDOW",
            Self::Database(_) | Self::Connection(_) | Self::LockPoisoned(_) => "INTERNAL",
        }
    }

    /// True for outcomes the caller is expected to handle (not infrastructure faults).
    pub fn is_business(&self) -> bool {
        matches!(
            self,
            Self::InvalidQuantity(_)
                | Self::InsufficientCapacity { .. }
                | Self::PoolNotFound(_)
                | Self::InvalidSlotWindow(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn business_errors_have_distinct_codes() {
        let insufficient = ReservationError::InsufficientCapacity { requested: 3, available: 1 };
        let missing = ReservationError::PoolNotFound(Uuid::nil());

        assert_eq!(insufficient.code(), "INSUFFICIENT_CAPACITY");
        assert_eq!(missing.code(), "POOL_NOT_FOUND");
        assert!(insufficient.is_business());
        assert!(missing.is_business());
    }

    #[test]
    fn infrastructure_errors_are_internal() {
        let err = ReservationError::from(diesel::result::Error::NotFound);
        assert_eq!(err.code(), "INTERNAL");
        assert!(!err.is_business());
        assert!(!ReservationError::LockPoisoned("reserve").is_business());
    }

    #[test]
    fn insufficient_capacity_message_names_both_sides() {
        let err = ReservationError::InsufficientCapacity { requested: 5, available: 2 };
        assert_eq!(err.to_string(), "insufficient capacity: requested 5, available 2");
    }
}
