use chrono::NaiveDateTime;

use crate::limits::*;
use crate::model::*;

use super::EngineError;

pub(crate) fn validate_window(window: &Window) -> Result<(), EngineError> {
    if window.duration_hours == 0 {
        return Err(EngineError::Validation("duration_hours must be at least 1".into()));
    }
    if window.duration_hours > MAX_DURATION_HOURS {
        return Err(EngineError::LimitExceeded("reservation too long"));
    }
    if window.crosses_midnight() {
        return Err(EngineError::Validation(format!(
            "reservation {window} runs past midnight"
        )));
    }
    Ok(())
}

pub(crate) fn validate_party_size(party_size: u32) -> Result<(), EngineError> {
    if party_size == 0 {
        return Err(EngineError::Validation("party_size must be at least 1".into()));
    }
    if party_size > MAX_PARTY_SIZE {
        return Err(EngineError::LimitExceeded("party too large"));
    }
    Ok(())
}

/// A reservation whose end has passed no longer blocks, whatever its status.
pub(crate) fn is_blocking_at(reservation: &Reservation, now: NaiveDateTime) -> bool {
    reservation.status.is_blocking() && reservation.window.ends_at() > now
}

pub(crate) fn find_conflict<'a>(
    sheet: &'a DaySheet,
    window: &Window,
    now: NaiveDateTime,
) -> Option<&'a Reservation> {
    sheet.overlapping(window).find(|r| is_blocking_at(r, now))
}

pub(crate) fn check_no_conflict(
    sheet: &DaySheet,
    table: &Table,
    window: &Window,
    now: NaiveDateTime,
) -> Result<(), EngineError> {
    match find_conflict(sheet, window, now) {
        Some(existing) => Err(EngineError::Conflict {
            table_id: table.id,
            table_number: table.table_number.clone(),
            window: existing.window,
        }),
        None => Ok(()),
    }
}

/// Windows on the sheet that currently block new reservations.
pub(crate) fn busy_windows(sheet: &DaySheet, now: NaiveDateTime) -> Vec<Window> {
    sheet
        .reservations
        .iter()
        .filter(|r| is_blocking_at(r, now))
        .map(|r| r.window)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveTime, Utc};
    use ulid::Ulid;

    fn d() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 1).unwrap()
    }

    fn t(h: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, 0, 0).unwrap()
    }

    fn sheet_with(entries: &[(u32, u32, ReservationStatus)]) -> DaySheet {
        let mut sheet = DaySheet::new(Ulid::new(), d());
        for &(start, hours, status) in entries {
            sheet.insert(Reservation {
                id: Ulid::new(),
                restaurant_id: Ulid::new(),
                table_id: sheet.table_id,
                customer_id: Ulid::new(),
                party_size: 2,
                window: Window::new(d(), t(start), hours),
                status,
                special_requests: None,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            });
        }
        sheet
    }

    fn early_morning() -> NaiveDateTime {
        d().and_time(t(6))
    }

    #[test]
    fn cancelled_and_completed_do_not_block() {
        let sheet = sheet_with(&[
            (19, 2, ReservationStatus::Cancelled),
            (19, 2, ReservationStatus::Completed),
        ]);
        let w = Window::new(d(), t(19), 2);
        assert!(find_conflict(&sheet, &w, early_morning()).is_none());
    }

    #[test]
    fn pending_blocks() {
        let sheet = sheet_with(&[(19, 2, ReservationStatus::Pending)]);
        let w = Window::new(d(), t(20), 1);
        assert!(find_conflict(&sheet, &w, early_morning()).is_some());
    }

    #[test]
    fn ended_reservation_does_not_block() {
        let sheet = sheet_with(&[(10, 2, ReservationStatus::Confirmed)]);
        let w = Window::new(d(), t(11), 1);
        assert!(find_conflict(&sheet, &w, d().and_time(t(9))).is_some());
        assert!(find_conflict(&sheet, &w, d().and_time(t(12))).is_none());
    }

    #[test]
    fn conflict_reports_existing_window() {
        let sheet = sheet_with(&[(18, 2, ReservationStatus::Confirmed)]);
        let table = Table {
            id: sheet.table_id,
            restaurant_id: Ulid::new(),
            table_number: "T1".into(),
            capacity: 4,
            floor: Floor::Ground,
            is_active: true,
        };
        let err = check_no_conflict(&sheet, &table, &Window::new(d(), t(19), 2), early_morning()).unwrap_err();
        match err {
            EngineError::Conflict { table_number, window, .. } => {
                assert_eq!(table_number, "T1");
                assert_eq!(window.start, t(18));
            }
            other => panic!("expected conflict, got {other:?}"),
        }
        assert!(check_no_conflict(&sheet, &table, &Window::new(d(), t(20), 1), early_morning()).is_ok());
    }

    #[test]
    fn window_validation() {
        assert!(validate_window(&Window { date: d(), start: t(19), duration_hours: 0 }).is_err());
        assert!(matches!(
            validate_window(&Window::new(d(), t(8), MAX_DURATION_HOURS + 1)),
            Err(EngineError::LimitExceeded(_))
        ));
        assert!(matches!(
            validate_window(&Window::new(d(), t(23), 2)),
            Err(EngineError::Validation(_))
        ));
        assert!(validate_window(&Window::new(d(), t(22), 2)).is_ok());
    }

    #[test]
    fn party_size_validation() {
        assert!(validate_party_size(0).is_err());
        assert!(validate_party_size(1).is_ok());
        assert!(matches!(
            validate_party_size(MAX_PARTY_SIZE + 1),
            Err(EngineError::LimitExceeded(_))
        ));
    }

    #[test]
    fn busy_windows_skips_released() {
        let sheet = sheet_with(&[
            (12, 1, ReservationStatus::Confirmed),
            (15, 1, ReservationStatus::Cancelled),
            (19, 2, ReservationStatus::Pending),
        ]);
        let busy = busy_windows(&sheet, early_morning());
        assert_eq!(busy.len(), 2);
        assert_eq!(busy[1].start, t(19));
    }
}
