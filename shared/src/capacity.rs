//! Capacity arithmetic shared by every pool type.
//!
//! A pool holds `total` units of which `reserved` are claimed. Every mutation
//! keeps `0 <= reserved <= total`; `available` is always derived, never stored.

use serde::{Deserialize, Serialize};

use crate::ReservationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Capacity {
    pub total: i32,
    pub reserved: i32,
}

impl Capacity {
    pub fn new(total: i32) -> Self {
        Self {
            total: total.max(0),
            reserved: 0,
        }
    }

    pub fn available(&self) -> i32 {
        self.total - self.reserved
    }

    /// Claims `quantity` units, or leaves the pool untouched and reports why not.
    pub fn reserve(&mut self, quantity: i32) -> Result<(), ReservationError> {
        ensure_positive(quantity)?;
        let available = self.available();
        if quantity > available {
            return Err(ReservationError::InsufficientCapacity {
                requested: quantity,
                available,
            });
        }
        self.reserved += quantity;
        Ok(())
    }

    /// Returns up to `quantity` units to the pool. `reserved` never drops below
    /// zero even if the ledger has drifted. Returns the amount actually released.
    pub fn release(&mut self, quantity: i32) -> i32 {
        let next = self.reserved.saturating_sub(quantity.max(0)).max(0);
        let released = self.reserved - next;
        self.reserved = next;
        released
    }

    /// Applies an inbound (positive) or outbound (negative) adjustment to the
    /// total. Outbound adjustments clamp silently: the total never goes below
    /// zero nor below what is currently reserved. Returns the applied delta.
    pub fn adjust(&mut self, delta: i32) -> i32 {
        let next = self.total.saturating_add(delta).max(self.reserved).max(0);
        let applied = next - self.total;
        self.total = next;
        applied
    }
}

pub fn ensure_positive(quantity: i32) -> Result<(), ReservationError> {
    if quantity <= 0 {
        return Err(ReservationError::InvalidQuantity(quantity));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserve_up_to_total() {
        let mut pool = Capacity::new(5);
        pool.reserve(3).unwrap();
        pool.reserve(2).unwrap();
        assert_eq!(pool.available(), 0);

        let err = pool.reserve(1).unwrap_err();
        assert!(matches!(
            err,
            ReservationError::InsufficientCapacity { requested: 1, available: 0 }
        ));
        assert_eq!(pool.reserved, 5);
    }

    #[test]
    fn failed_reserve_leaves_pool_untouched() {
        let mut pool = Capacity::new(2);
        pool.reserve(1).unwrap();
        let before = pool;
        assert!(pool.reserve(2).is_err());
        assert_eq!(pool, before);
    }

    #[test]
    fn non_positive_quantity_is_rejected() {
        let mut pool = Capacity::new(10);
        assert!(matches!(pool.reserve(0), Err(ReservationError::InvalidQuantity(0))));
        assert!(matches!(pool.reserve(-4), Err(ReservationError::InvalidQuantity(-4))));
        assert_eq!(pool.reserved, 0);
    }

    #[test]
    fn release_floors_at_zero() {
        let mut pool = Capacity::new(10);
        pool.reserve(3).unwrap();
        assert_eq!(pool.release(5), 3);
        assert_eq!(pool.reserved, 0);
        assert_eq!(pool.release(1), 0);
    }

    #[test]
    fn adjust_clamps_outbound() {
        let mut pool = Capacity::new(4);
        assert_eq!(pool.adjust(6), 6);
        assert_eq!(pool.total, 10);
        assert_eq!(pool.adjust(-25), -10);
        assert_eq!(pool.total, 0);
    }

    #[test]
    fn adjust_never_strands_reserved_units() {
        let mut pool = Capacity::new(10);
        pool.reserve(4).unwrap();
        assert_eq!(pool.adjust(-8), -6);
        assert_eq!(pool.total, 4);
        assert_eq!(pool.available(), 0);
    }

    #[test]
    fn new_floors_negative_total() {
        assert_eq!(Capacity::new(-3).total, 0);
    }
}
