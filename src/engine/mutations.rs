use chrono::NaiveDateTime;
use tracing::{debug, info};
use ulid::Ulid;

use crate::access::{self, Requester, Role};
use crate::limits::*;
use crate::model::*;

use super::conflict::{check_no_conflict, is_blocking_at, validate_party_size, validate_window};
use super::selection::SelectionContext;
use super::{Engine, EngineError};

/// Selection rounds for one advisory commit: the first pick plus one retry.
const MAX_SELECTION_ATTEMPTS: u32 = 2;

impl Engine {
    // ── Commit ───────────────────────────────────────────────

    /// Reserve a specific table.
    pub async fn commit_direct(
        &self,
        request: &ReservationRequest,
        table_id: Ulid,
    ) -> Result<CommitOutcome, EngineError> {
        self.validate_request(request)?;
        let table = self.reservable_table(request, table_id)?;
        let reservation = self.create_on_table(request, &table).await?;
        metrics::counter!(crate::observability::RESERVATIONS_COMMITTED_TOTAL, "mode" => "direct").increment(1);
        Ok(CommitOutcome {
            reservation: ReservationInfo::new(&reservation, &table),
            selection: None,
        })
    }

    /// Let the advisor choose among `candidate_ids`, then reserve its pick.
    /// A pick lost to a concurrent commit is dropped and selection runs once more.
    pub async fn commit_advisory(
        &self,
        request: &ReservationRequest,
        candidate_ids: &[Ulid],
    ) -> Result<CommitOutcome, EngineError> {
        let restaurant = self.validate_request(request)?;
        if candidate_ids.len() > MAX_CANDIDATES {
            return Err(EngineError::LimitExceeded("too many candidate tables"));
        }

        let mut remaining = Vec::with_capacity(candidate_ids.len());
        for &id in candidate_ids {
            let table = self
                .store
                .table(&id)
                .filter(|t| t.restaurant_id == request.restaurant_id)
                .ok_or_else(|| EngineError::not_found("table", id))?;
            if table.is_active && table.capacity >= request.party_size {
                remaining.push(table);
            }
        }
        remaining.sort_by_key(|t| t.id);
        remaining.dedup_by_key(|t| t.id);
        if remaining.is_empty() {
            return Err(EngineError::Validation(format!(
                "no candidate table seats a party of {}",
                request.party_size
            )));
        }
        let offered: Vec<TableInfo> = remaining.iter().map(Table::info).collect();

        let ctx = SelectionContext {
            restaurant_name: restaurant.name.clone(),
            party_size: request.party_size,
            date: request.window.date,
            time: request.window.start,
            duration_hours: request.window.duration_hours,
            occasion: request.occasion.clone(),
            preferences: request.preferences.clone(),
        };

        let mut attempts = 0;
        loop {
            attempts += 1;
            let selection = self
                .select(&remaining, &ctx)
                .await
                .ok_or_else(|| EngineError::Validation("no candidate tables".into()))?;

            match self.create_on_table(request, &selection.table).await {
                Ok(reservation) => {
                    self.store.insert_selection(SelectionRecord {
                        reservation_id: reservation.id,
                        restaurant_id: reservation.restaurant_id,
                        customer_id: reservation.customer_id,
                        table_id: selection.table.id,
                        candidates: offered,
                        selection: selection.info.clone(),
                        attempts,
                        party_size: request.party_size,
                        window: request.window,
                        occasion: request.occasion.clone(),
                        preferences: request.preferences.clone(),
                        created_at: reservation.created_at,
                    });
                    metrics::counter!(crate::observability::RESERVATIONS_COMMITTED_TOTAL, "mode" => "advisory")
                        .increment(1);
                    return Ok(CommitOutcome {
                        reservation: ReservationInfo::new(&reservation, &selection.table),
                        selection: Some(selection.info),
                    });
                }
                Err(err @ EngineError::Conflict { .. }) if attempts < MAX_SELECTION_ATTEMPTS => {
                    debug!(table = %selection.table.id, "selected table taken, selecting again");
                    remaining.retain(|t| t.id != selection.table.id);
                    if remaining.is_empty() {
                        return Err(err);
                    }
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Advisory commit over every table free for the request, optionally on one floor.
    pub async fn reserve_smart(
        &self,
        request: &ReservationRequest,
        floor: Option<&Floor>,
    ) -> Result<CommitOutcome, EngineError> {
        self.validate_request(request)?;
        let free = self
            .free_tables(request.restaurant_id, &request.window, request.party_size, floor)
            .await?;
        if free.is_empty() {
            return Err(EngineError::NoTableAvailable {
                party_size: request.party_size,
                window: request.window,
            });
        }
        let ids: Vec<Ulid> = free.iter().map(|t| t.id).collect();
        self.commit_advisory(request, &ids).await
    }

    /// Checks shared by both commit modes. Returns the restaurant.
    fn validate_request(&self, request: &ReservationRequest) -> Result<Restaurant, EngineError> {
        access::ensure_can_reserve(&request.requester, request.restaurant_id)?;
        validate_party_size(request.party_size)?;
        validate_window(&request.window)?;
        let restaurant = self.active_restaurant(request.restaurant_id)?;
        if !restaurant.covers(&request.window) {
            return Err(EngineError::Validation(format!(
                "{} is outside opening hours {}-{}",
                request.window,
                restaurant.opening_time.format("%H:%M"),
                restaurant.closing_time.format("%H:%M")
            )));
        }
        if request.window.starts_at() < self.local_now() {
            return Err(EngineError::Validation(format!("{} is in the past", request.window)));
        }
        if request
            .special_requests
            .as_ref()
            .is_some_and(|s| s.len() > MAX_SPECIAL_REQUESTS_LEN)
        {
            return Err(EngineError::LimitExceeded("special requests too long"));
        }
        if request.occasion.as_ref().is_some_and(|s| s.len() > MAX_OCCASION_LEN) {
            return Err(EngineError::LimitExceeded("occasion too long"));
        }
        if request.preferences.len() > MAX_PREFERENCES {
            return Err(EngineError::LimitExceeded("too many preferences"));
        }
        if request
            .preferences
            .iter()
            .any(|(k, v)| k.len() > MAX_PREFERENCE_LEN || v.len() > MAX_PREFERENCE_LEN)
        {
            return Err(EngineError::LimitExceeded("preference too long"));
        }
        Ok(restaurant)
    }

    fn reservable_table(&self, request: &ReservationRequest, table_id: Ulid) -> Result<Table, EngineError> {
        let table = self
            .store
            .table(&table_id)
            .filter(|t| t.restaurant_id == request.restaurant_id)
            .ok_or_else(|| EngineError::not_found("table", table_id))?;
        if !table.is_active {
            return Err(EngineError::Validation(format!(
                "table {} is not taking reservations",
                table.table_number
            )));
        }
        if table.capacity < request.party_size {
            return Err(EngineError::Validation(format!(
                "table {} seats {}, party of {} requested",
                table.table_number, table.capacity, request.party_size
            )));
        }
        Ok(table)
    }

    /// Re-check and insert under the day sheet's write lock.
    async fn create_on_table(&self, request: &ReservationRequest, table: &Table) -> Result<Reservation, EngineError> {
        let window = request.window;
        let sheet = self.store.sheet_or_create(table.id, window.date);
        let mut guard = sheet.write().await;
        let local_now = self.local_now();

        // Cancelled and ended rows stay on the sheet for lookups but do not count.
        let blocking = guard.reservations.iter().filter(|r| is_blocking_at(r, local_now)).count();
        if blocking >= MAX_RESERVATIONS_PER_SHEET {
            return Err(EngineError::LimitExceeded("too many reservations on this table and date"));
        }
        if let Err(e) = check_no_conflict(&guard, table, &window, local_now) {
            metrics::counter!(crate::observability::COMMIT_CONFLICTS_TOTAL).increment(1);
            return Err(e);
        }

        let status = if access::may_auto_approve(&request.requester, request.restaurant_id) {
            ReservationStatus::Confirmed
        } else {
            ReservationStatus::Pending
        };
        let now = self.clock.now();
        let reservation = Reservation {
            id: Ulid::new(),
            restaurant_id: request.restaurant_id,
            table_id: table.id,
            customer_id: request.requester.id,
            party_size: request.party_size,
            window,
            status,
            special_requests: request
                .special_requests
                .as_ref()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
            created_at: now,
            updated_at: now,
        };
        guard.insert(reservation.clone());
        self.store.index_reservation(&reservation);
        self.store.mark_open(table.id, window.date);
        drop(guard);

        info!(
            reservation = %reservation.id,
            table = %table.table_number,
            %window,
            party_size = reservation.party_size,
            %status,
            "reservation created"
        );
        self.notify.send(
            reservation.restaurant_id,
            &ReservationEvent::Created {
                reservation_id: reservation.id,
                table_id: table.id,
                window,
                status,
            },
        );
        Ok(reservation)
    }

    // ── Lifecycle ────────────────────────────────────────────

    /// Staff confirm a pending reservation.
    pub async fn approve(&self, requester: &Requester, reservation_id: Ulid) -> Result<ReservationInfo, EngineError> {
        self.transition(reservation_id, ReservationStatus::Confirmed, |r| {
            access::ensure_restaurant_staff(requester, r.restaurant_id)?;
            require_status(r, ReservationStatus::Pending, ReservationStatus::Confirmed)
        })
        .await
    }

    /// Staff decline a pending reservation.
    pub async fn reject(&self, requester: &Requester, reservation_id: Ulid) -> Result<ReservationInfo, EngineError> {
        self.transition(reservation_id, ReservationStatus::Cancelled, |r| {
            access::ensure_restaurant_staff(requester, r.restaurant_id)?;
            require_status(r, ReservationStatus::Pending, ReservationStatus::Cancelled)
        })
        .await
    }

    /// Customers cancel their own reservations subject to the cancellation
    /// policy. Managers may cancel any blocking reservation of their restaurant.
    pub async fn cancel(&self, requester: &Requester, reservation_id: Ulid) -> Result<ReservationInfo, EngineError> {
        let now = self.local_now();
        let policy = self.settings.cancellation;
        self.transition(reservation_id, ReservationStatus::Cancelled, |r| {
            if requester.role == Role::Customer {
                if r.customer_id != requester.id {
                    return Err(access::AccessDenied::NotOwner.into());
                }
                policy.check(r, now)?;
                return Ok(());
            }
            access::ensure_manager(requester, r.restaurant_id)?;
            if !r.status.can_transition_to(ReservationStatus::Cancelled) {
                return Err(EngineError::InvalidTransition {
                    from: r.status,
                    to: ReservationStatus::Cancelled,
                });
            }
            Ok(())
        })
        .await
    }

    /// Mark a reservation whose end has passed as completed. Completing an
    /// already completed reservation is a no-op.
    pub async fn complete(&self, reservation_id: Ulid) -> Result<ReservationInfo, EngineError> {
        let now = self.local_now();
        let mut guard = self.resolve_reservation_write(reservation_id).await?;
        let reservation = guard
            .get_mut(&reservation_id)
            .ok_or_else(|| EngineError::not_found("reservation", reservation_id))?;
        if reservation.status == ReservationStatus::Completed {
            let snapshot = reservation.clone();
            drop(guard);
            return self.describe(&snapshot);
        }
        if !reservation.status.can_transition_to(ReservationStatus::Completed) {
            return Err(EngineError::InvalidTransition {
                from: reservation.status,
                to: ReservationStatus::Completed,
            });
        }
        if reservation.window.ends_at() > now {
            return Err(EngineError::Validation(format!(
                "reservation {} has not ended yet",
                reservation.window
            )));
        }
        let from = reservation.status;
        reservation.status = ReservationStatus::Completed;
        reservation.updated_at = self.clock.now();
        let snapshot = reservation.clone();
        drop(guard);
        self.announce(&snapshot, from);
        self.describe(&snapshot)
    }

    /// Blocking reservations whose end is at or before `now` (restaurant-local).
    ///
    /// Only open sheets are scanned. A sheet with no pending or confirmed rows
    /// left is settled and skipped from then on, until a new commit reopens it.
    pub async fn collect_expired_reservations(&self, now: NaiveDateTime) -> Vec<Ulid> {
        let mut expired = Vec::new();
        for (table_id, date) in self.store.open_sheet_keys() {
            if date > now.date() {
                continue;
            }
            let Some(sheet) = self.store.sheet(&table_id, date) else {
                self.store.settle(table_id, date);
                continue;
            };
            let guard = sheet.read().await;
            if !guard.reservations.iter().any(|r| r.status.is_blocking()) {
                self.store.settle(table_id, date);
                continue;
            }
            expired.extend(
                guard
                    .reservations
                    .iter()
                    .filter(|r| r.status.is_blocking() && !is_blocking_at(r, now))
                    .map(|r| r.id),
            );
        }
        expired
    }

    /// Apply a status change under the sheet lock once `check` accepts it.
    async fn transition<F>(
        &self,
        reservation_id: Ulid,
        to: ReservationStatus,
        check: F,
    ) -> Result<ReservationInfo, EngineError>
    where
        F: FnOnce(&Reservation) -> Result<(), EngineError>,
    {
        let mut guard = self.resolve_reservation_write(reservation_id).await?;
        let reservation = guard
            .get_mut(&reservation_id)
            .ok_or_else(|| EngineError::not_found("reservation", reservation_id))?;
        check(reservation)?;
        let from = reservation.status;
        reservation.status = to;
        reservation.updated_at = self.clock.now();
        let snapshot = reservation.clone();
        drop(guard);

        self.announce(&snapshot, from);
        self.describe(&snapshot)
    }

    fn announce(&self, reservation: &Reservation, from: ReservationStatus) {
        info!(reservation = %reservation.id, %from, to = %reservation.status, "reservation status changed");
        metrics::counter!(crate::observability::STATUS_CHANGES_TOTAL, "to" => reservation.status.as_str())
            .increment(1);
        self.notify.send(
            reservation.restaurant_id,
            &ReservationEvent::StatusChanged {
                reservation_id: reservation.id,
                table_id: reservation.table_id,
                from,
                to: reservation.status,
            },
        );
    }
}

fn require_status(
    reservation: &Reservation,
    expected: ReservationStatus,
    to: ReservationStatus,
) -> Result<(), EngineError> {
    if reservation.status != expected {
        return Err(EngineError::InvalidTransition {
            from: reservation.status,
            to,
        });
    }
    Ok(())
}
