//! Background release of reservations whose hold deadline has passed.
//!
//! The sweeper never touches pool counters itself. It lists expired
//! `(pool, claimant)` pairs and hands each one to the store's regular release
//! path.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::time;
use tracing::{error, info};
use uuid::Uuid;

use crate::ReservationError;

/// Selects which reservations a release applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReleaseFilter {
    pub claimant_id: Uuid,
    pub pool_id: Option<Uuid>,
    pub expired_before: Option<DateTime<Utc>>,
}

impl ReleaseFilter {
    /// Every reservation the claimant holds, across all pools.
    pub fn claimant(claimant_id: Uuid) -> Self {
        Self {
            claimant_id,
            pool_id: None,
            expired_before: None,
        }
    }

    /// The claimant's reservation on one pool.
    pub fn pool(pool_id: Uuid, claimant_id: Uuid) -> Self {
        Self {
            claimant_id,
            pool_id: Some(pool_id),
            expired_before: None,
        }
    }

    /// The claimant's reservation on one pool, only if it is still expired at `now`.
    pub fn expired(pool_id: Uuid, claimant_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            claimant_id,
            pool_id: Some(pool_id),
            expired_before: Some(now),
        }
    }

    pub fn matches(&self, pool_id: Uuid, claimant_id: Uuid, expires_at: Option<DateTime<Utc>>) -> bool {
        if claimant_id != self.claimant_id {
            return false;
        }
        if self.pool_id.is_some_and(|id| id != pool_id) {
            return false;
        }
        match self.expired_before {
            Some(now) => expires_at.is_some_and(|at| at <= now),
            None => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpiredReservation {
    pub pool_id: Uuid,
    pub claimant_id: Uuid,
}

#[async_trait]
pub trait ExpiringLedger: Send + Sync {
    async fn expired_reservations(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<ExpiredReservation>, ReservationError>;

    /// Releases whatever matches `filter`, returning how many reservations went away.
    async fn release_matching(&self, filter: ReleaseFilter) -> Result<usize, ReservationError>;
}

pub struct ExpirySweeper<L: ?Sized> {
    ledger: Arc<L>,
    interval: Duration,
    batch_size: i64,
}

impl<L: ExpiringLedger + ?Sized> ExpirySweeper<L> {
    pub fn new(ledger: Arc<L>, interval: Duration, batch_size: i64) -> Self {
        Self {
            ledger,
            interval,
            batch_size: batch_size.max(1),
        }
    }

    pub async fn run(&self) {
        let mut interval = time::interval(self.interval);

        loop {
            interval.tick().await;

            match self.sweep(Utc::now()).await {
                Ok(0) => {}
                Ok(released) => info!("Released {} expired reservations", released),
                Err(e) => error!("Error sweeping expired reservations: {}", e),
            }
        }
    }

    /// Releases one batch of reservations expired at `now`.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<usize, ReservationError> {
        let expired = self.ledger.expired_reservations(now, self.batch_size).await?;
        let mut released = 0;

        for reservation in expired {
            let filter = ReleaseFilter::expired(reservation.pool_id, reservation.claimant_id, now);
            match self.ledger.release_matching(filter).await {
                Ok(n) => released += n,
                Err(e) => {
                    error!(
                        "Failed to release expired reservation of {} on {}: {}",
                        reservation.claimant_id, reservation.pool_id, e
                    );
                }
            }
        }

        Ok(released)
    }
}
