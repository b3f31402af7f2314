use chrono::{NaiveDate, NaiveDateTime, NaiveTime, TimeDelta};
use tracing::debug;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::availability::{TableDay, count_free, duration_counts, group_by_floor, slot_starts, time_slots};
use super::conflict::{busy_windows, find_conflict, validate_window};
use super::{Engine, EngineError};

impl Engine {
    /// True iff no blocking reservation on the table overlaps `window`.
    /// Unknown tables or restaurants read as occupied.
    pub async fn is_free(&self, table_id: Ulid, window: &Window) -> bool {
        let Some(table) = self.store.table(&table_id) else {
            return false;
        };
        if !self.store.contains_restaurant(&table.restaurant_id) {
            return false;
        }
        match self.store.sheet(&table_id, window.date) {
            Some(sheet) => find_conflict(&*sheet.read().await, window, self.local_now()).is_none(),
            None => true,
        }
    }

    /// Snapshot each table's blocking windows on `date`, one read lock at a time.
    pub(super) async fn table_days(&self, tables: Vec<Table>, date: NaiveDate, now: NaiveDateTime) -> Vec<TableDay> {
        let mut days = Vec::with_capacity(tables.len());
        for table in tables {
            let busy = match self.store.sheet(&table.id, date) {
                Some(sheet) => busy_windows(&*sheet.read().await, now),
                None => Vec::new(),
            };
            days.push(TableDay { table, busy });
        }
        days
    }

    /// Candidate tables free for the whole of `window`, ascending by id.
    pub async fn free_tables(
        &self,
        restaurant_id: Ulid,
        window: &Window,
        party_size: u32,
        floor: Option<&Floor>,
    ) -> Result<Vec<Table>, EngineError> {
        validate_window(window)?;
        let restaurant = self.active_restaurant(restaurant_id)?;
        let candidates = self.candidates(restaurant_id, party_size, floor)?;
        if !restaurant.covers(window) {
            return Ok(Vec::new());
        }
        let now = self.local_now();
        let mut free = Vec::with_capacity(candidates.len());
        for table in candidates {
            if let Some(sheet) = self.store.sheet(&table.id, window.date)
                && find_conflict(&*sheet.read().await, window, now).is_some()
            {
                continue;
            }
            free.push(table);
        }
        debug!(restaurant = %restaurant_id, %window, party_size, free = free.len(), "free tables");
        Ok(free)
    }

    pub async fn available_tables(
        &self,
        restaurant_id: Ulid,
        window: &Window,
        party_size: u32,
        floor: Option<&Floor>,
    ) -> Result<Vec<TableInfo>, EngineError> {
        let free = self.free_tables(restaurant_id, window, party_size, floor).await?;
        Ok(free.iter().map(Table::info).collect())
    }

    pub async fn tables_by_floor(
        &self,
        restaurant_id: Ulid,
        window: &Window,
        party_size: u32,
    ) -> Result<Vec<FloorGroup>, EngineError> {
        let free = self.free_tables(restaurant_id, window, party_size, None).await?;
        Ok(group_by_floor(&free))
    }

    pub async fn available_time_slots(
        &self,
        restaurant_id: Ulid,
        date: NaiveDate,
        party_size: u32,
        duration_hours: u32,
    ) -> Result<Vec<TimeSlot>, EngineError> {
        let restaurant = self.active_restaurant(restaurant_id)?;
        let candidates = self.candidates(restaurant_id, party_size, None)?;
        if duration_hours == 0 {
            return Err(EngineError::Validation("duration_hours must be at least 1".into()));
        }
        if duration_hours > MAX_DURATION_HOURS {
            return Err(EngineError::LimitExceeded("reservation too long"));
        }

        let now = self.local_now();
        let Some(not_before) = not_before(date, now) else {
            return Ok(Vec::new());
        };
        let days = self.table_days(candidates, date, now).await;
        Ok(time_slots(&restaurant, date, duration_hours, &days, not_before, MAX_DURATION_HOURS))
    }

    pub async fn available_durations(
        &self,
        restaurant_id: Ulid,
        date: NaiveDate,
        time: NaiveTime,
        party_size: u32,
    ) -> Result<Vec<DurationCount>, EngineError> {
        let restaurant = self.active_restaurant(restaurant_id)?;
        let candidates = self.candidates(restaurant_id, party_size, None)?;
        let start = truncate_to_minute(time);
        let now = self.local_now();
        if minute_of_day(start) < restaurant.opening_minute() || date.and_time(start) < now {
            return Ok(Vec::new());
        }
        let days = self.table_days(candidates, date, now).await;
        Ok(duration_counts(&restaurant, date, start, MAX_OFFERED_DURATION_HOURS, &days))
    }

    /// Dates from today with at least one free 1-hour slot, with the count of such slots.
    pub async fn available_dates(
        &self,
        restaurant_id: Ulid,
        party_size: u32,
        horizon_days: Option<u32>,
    ) -> Result<Vec<DateAvailability>, EngineError> {
        let horizon = horizon_days.unwrap_or(DEFAULT_HORIZON_DAYS);
        if horizon == 0 {
            return Err(EngineError::Validation("horizon_days must be at least 1".into()));
        }
        if horizon > MAX_HORIZON_DAYS {
            return Err(EngineError::LimitExceeded("horizon too long"));
        }
        let restaurant = self.active_restaurant(restaurant_id)?;
        let candidates = self.candidates(restaurant_id, party_size, None)?;

        let now = self.local_now();
        let today = now.date();
        let mut out = Vec::new();
        for offset in 0..horizon {
            let date = today + TimeDelta::days(i64::from(offset));
            let not_before = (date == today).then(|| now.time());
            let days = self.table_days(candidates.clone(), date, now).await;
            let available_slots = slot_starts(&restaurant, 1)
                .into_iter()
                .filter(|start| not_before.is_none_or(|nb| *start >= nb))
                .filter(|start| count_free(&days, &Window::new(date, *start, 1)) > 0)
                .count();
            if available_slots > 0 {
                out.push(DateAvailability { date, available_slots });
            }
        }
        Ok(out)
    }

    // ── Lookups ──────────────────────────────────────────────

    pub async fn get_reservation(&self, reservation_id: Ulid) -> Result<ReservationInfo, EngineError> {
        let reservation = self.load_reservation(reservation_id).await?;
        self.describe(&reservation)
    }

    /// A customer's reservations, newest start first.
    pub async fn list_reservations_for_customer(&self, customer_id: Ulid) -> Vec<ReservationInfo> {
        let mut found = Vec::new();
        for id in self.store.reservations_of_customer(&customer_id) {
            if let Ok(r) = self.load_reservation(id).await {
                found.push(r);
            }
        }
        found.sort_by(|a, b| b.window.starts_at().cmp(&a.window.starts_at()));
        found.iter().filter_map(|r| self.describe(r).ok()).collect()
    }

    /// Every reservation on a table for one date, any status, by start time.
    pub async fn list_reservations_for_table(
        &self,
        table_id: Ulid,
        date: NaiveDate,
    ) -> Result<Vec<ReservationInfo>, EngineError> {
        let table = self
            .store
            .table(&table_id)
            .ok_or_else(|| EngineError::not_found("table", table_id))?;
        let Some(sheet) = self.store.sheet(&table_id, date) else {
            return Ok(Vec::new());
        };
        let guard = sheet.read().await;
        Ok(guard
            .reservations
            .iter()
            .map(|r| ReservationInfo::new(r, &table))
            .collect())
    }

    pub fn selection_record(&self, reservation_id: Ulid) -> Option<SelectionRecord> {
        self.store.selection(&reservation_id)
    }

    /// Confirmed or completed reservations on a table in the days before `date`.
    pub(super) async fn recent_bookings(&self, table_id: Ulid, date: NaiveDate) -> usize {
        let mut count = 0;
        for back in 1..=RECENT_BOOKINGS_DAYS {
            let day = date - TimeDelta::days(back);
            if let Some(sheet) = self.store.sheet(&table_id, day) {
                count += sheet
                    .read()
                    .await
                    .reservations
                    .iter()
                    .filter(|r| matches!(r.status, ReservationStatus::Confirmed | ReservationStatus::Completed))
                    .count();
            }
        }
        count
    }

    pub(super) async fn load_reservation(&self, reservation_id: Ulid) -> Result<Reservation, EngineError> {
        let (table_id, date) = self
            .store
            .locate(&reservation_id)
            .ok_or_else(|| EngineError::not_found("reservation", reservation_id))?;
        let sheet = self
            .store
            .sheet(&table_id, date)
            .ok_or_else(|| EngineError::not_found("reservation", reservation_id))?;
        let guard = sheet.read().await;
        guard
            .get(&reservation_id)
            .cloned()
            .ok_or_else(|| EngineError::not_found("reservation", reservation_id))
    }

    pub(super) fn describe(&self, reservation: &Reservation) -> Result<ReservationInfo, EngineError> {
        let table = self
            .store
            .table(&reservation.table_id)
            .ok_or_else(|| EngineError::not_found("table", reservation.table_id))?;
        Ok(ReservationInfo::new(reservation, &table))
    }
}

/// Earliest start still bookable on `date`: `None` for past dates,
/// `Some(None)` for future dates, `Some(Some(t))` for today.
fn not_before(date: NaiveDate, now: NaiveDateTime) -> Option<Option<NaiveTime>> {
    match date.cmp(&now.date()) {
        std::cmp::Ordering::Less => None,
        std::cmp::Ordering::Equal => Some(Some(now.time())),
        std::cmp::Ordering::Greater => Some(None),
    }
}
