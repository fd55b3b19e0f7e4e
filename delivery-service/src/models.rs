use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use shared::{Capacity, ReservationError};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Queryable, Identifiable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::delivery_slots)]
pub struct DeliverySlot {
    pub id: Uuid,
    pub delivery_zone_id: Uuid,
    pub date: NaiveDate,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub capacity: i32,
    pub reserved: i32,
    pub available: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DeliverySlot {
    pub fn capacity(&self) -> Capacity {
        Capacity {
            total: self.capacity,
            reserved: self.reserved,
        }
    }

    pub fn set_capacity(&mut self, capacity: Capacity) {
        self.capacity = capacity.total;
        self.reserved = capacity.reserved;
        self.available = capacity.available();
        self.updated_at = Utc::now();
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Insertable)]
#[diesel(table_name = crate::schema::delivery_slots)]
pub struct NewDeliverySlot {
    pub id: Uuid,
    pub delivery_zone_id: Uuid,
    pub date: NaiveDate,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub capacity: i32,
}

impl NewDeliverySlot {
    pub fn into_slot(self) -> DeliverySlot {
        let now = Utc::now();
        DeliverySlot {
            id: self.id,
            delivery_zone_id: self.delivery_zone_id,
            date: self.date,
            start_time: self.start_time,
            end_time: self.end_time,
            capacity: self.capacity,
            reserved: 0,
            available: self.capacity,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Queryable, Identifiable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::delivery_reservations)]
pub struct DeliveryReservation {
    pub id: Uuid,
    pub slot_id: Uuid,
    pub order_id: Uuid,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::delivery_reservations)]
pub struct NewDeliveryReservation {
    pub id: Uuid,
    pub slot_id: Uuid,
    pub order_id: Uuid,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Describes a day of equally sized delivery windows for one zone.
///
/// Windows start at `first_hour` (UTC) and are laid back to back until the
/// next one would end after `last_hour`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotWindowTemplate {
    pub delivery_zone_id: Uuid,
    pub date: NaiveDate,
    pub first_hour: u32,
    pub last_hour: u32,
    pub window_minutes: u32,
    pub capacity: i32,
}

impl SlotWindowTemplate {
    pub fn windows(&self) -> Result<Vec<NewDeliverySlot>, ReservationError> {
        shared::capacity::ensure_positive(self.capacity)?;
        if self.first_hour >= self.last_hour || self.last_hour > 24 {
            return Err(ReservationError::InvalidSlotWindow(format!(
                "hours must satisfy first < last <= 24, got {}..{}",
                self.first_hour, self.last_hour
            )));
        }
        if self.window_minutes == 0 || self.window_minutes > 24 * 60 {
            return Err(ReservationError::InvalidSlotWindow(format!(
                "window of {} minutes",
                self.window_minutes
            )));
        }

        let midnight = self
            .date
            .and_hms_opt(0, 0, 0)
            .map(|naive| Utc.from_utc_datetime(&naive))
            .ok_or_else(|| ReservationError::InvalidSlotWindow(format!("date {}", self.date)))?;
        let last = midnight + Duration::hours(i64::from(self.last_hour));
        let window = Duration::minutes(i64::from(self.window_minutes));

        let mut slots = Vec::new();
        let mut start = midnight + Duration::hours(i64::from(self.first_hour));
        while start + window <= last {
            slots.push(NewDeliverySlot {
                id: Uuid::new_v4(),
                delivery_zone_id: self.delivery_zone_id,
                date: self.date,
                start_time: start,
                end_time: start + window,
                capacity: self.capacity,
            });
            start = start + window;
        }

        if slots.is_empty() {
            return Err(ReservationError::InvalidSlotWindow(format!(
                "no {}-minute window fits between {}:00 and {}:00",
                self.window_minutes, self.first_hour, self.last_hour
            )));
        }
        Ok(slots)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template(first_hour: u32, last_hour: u32, window_minutes: u32) -> SlotWindowTemplate {
        SlotWindowTemplate {
            delivery_zone_id: Uuid::new_v4(),
            date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            first_hour,
            last_hour,
            window_minutes,
            capacity: 4,
        }
    }

    #[test]
    fn windows_are_back_to_back() {
        let slots = template(9, 12, 60).windows().unwrap();
        assert_eq!(slots.len(), 3);
        assert_eq!(slots[0].start_time.to_rfc3339(), "2024-03-01T09:00:00+00:00");
        assert_eq!(slots[2].end_time.to_rfc3339(), "2024-03-01T12:00:00+00:00");
        for pair in slots.windows(2) {
            assert_eq!(pair[0].end_time, pair[1].start_time);
        }
    }

    #[test]
    fn partial_trailing_window_is_dropped() {
        let slots = template(9, 11, 45).windows().unwrap();
        assert_eq!(slots.len(), 2);
        assert_eq!(slots[1].end_time.to_rfc3339(), "2024-03-01T10:30:00+00:00");
    }

    #[test]
    fn last_hour_may_be_midnight() {
        let slots = template(22, 24, 120).windows().unwrap();
        assert_eq!(slots.len(), 1);
        assert_eq!(slots[0].end_time.to_rfc3339(), "2024-03-02T00:00:00+00:00");
    }

    #[test]
    fn rejects_bad_templates() {
        assert!(matches!(
            template(12, 9, 60).windows(),
            Err(ReservationError::InvalidSlotWindow(_))
        ));
        assert!(matches!(
            template(9, 10, 0).windows(),
            Err(ReservationError::InvalidSlotWindow(_))
        ));
        assert!(matches!(
            template(9, 10, 90).windows(),
            Err(ReservationError::InvalidSlotWindow(_))
        ));

        let mut empty = template(9, 12, 60);
        empty.capacity = 0;
        assert!(matches!(empty.windows(), Err(ReservationError::InvalidQuantity(0))));
    }

    #[test]
    fn new_slot_starts_fully_available() {
        let slot = template(9, 10, 60).windows().unwrap().remove(0).into_slot();
        assert_eq!(slot.reserved, 0);
        assert_eq!(slot.available, 4);
        assert_eq!(slot.capacity().available(), 4);
    }
}
