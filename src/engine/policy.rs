use chrono::{NaiveDateTime, TimeDelta};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{Reservation, ReservationStatus};

/// When a customer may still cancel their own reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancellationPolicy {
    pub minimum_advance_hours: u32,
    pub allow_same_day: bool,
}

impl Default for CancellationPolicy {
    fn default() -> Self {
        Self {
            minimum_advance_hours: 24,
            allow_same_day: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CancelRefusal {
    #[error("reservation is already cancelled")]
    AlreadyCancelled,
    #[error("cannot cancel completed reservations")]
    Completed,
    #[error("cannot cancel past reservations")]
    Past,
    #[error("minimum {0} hours advance notice required")]
    TooLate(u32),
    #[error("same-day cancellations are not allowed")]
    SameDay,
}

impl CancellationPolicy {
    /// Last moment a customer can cancel.
    pub fn deadline(&self, reservation: &Reservation) -> NaiveDateTime {
        reservation.window.starts_at() - TimeDelta::hours(i64::from(self.minimum_advance_hours))
    }

    /// `now` is restaurant-local.
    pub fn check(&self, reservation: &Reservation, now: NaiveDateTime) -> Result<(), CancelRefusal> {
        match reservation.status {
            ReservationStatus::Cancelled => return Err(CancelRefusal::AlreadyCancelled),
            ReservationStatus::Completed => return Err(CancelRefusal::Completed),
            ReservationStatus::Pending | ReservationStatus::Confirmed => {}
        }
        if reservation.window.date < now.date() || reservation.window.starts_at() <= now {
            return Err(CancelRefusal::Past);
        }
        if now > self.deadline(reservation) {
            return Err(CancelRefusal::TooLate(self.minimum_advance_hours));
        }
        if !self.allow_same_day && reservation.window.date == now.date() {
            return Err(CancelRefusal::SameDay);
        }
        Ok(())
    }
}
