use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveTime};

use crate::limits::SLOT_MINUTES;
use crate::model::*;

// ── Slot grid and counting ────────────────────────────────────────

/// One table's blocking windows on one date, captured under its read lock.
#[derive(Debug, Clone)]
pub struct TableDay {
    pub table: Table,
    pub busy: Vec<Window>,
}

impl TableDay {
    pub fn is_free(&self, window: &Window) -> bool {
        !self.busy.iter().any(|b| b.overlaps(window))
    }
}

pub fn count_free(days: &[TableDay], window: &Window) -> usize {
    days.iter().filter(|d| d.is_free(window)).count()
}

/// Hourly start times from opening through the last start that still ends by closing.
pub fn slot_starts(restaurant: &Restaurant, duration_hours: u32) -> Vec<NaiveTime> {
    let close = restaurant.closing_minute();
    let need = duration_hours * 60;
    let mut starts = Vec::new();
    let mut minute = restaurant.opening_minute();
    while minute + need <= close {
        if let Some(t) = NaiveTime::from_hms_opt(minute / 60, minute % 60, 0) {
            starts.push(t);
        }
        minute += SLOT_MINUTES;
    }
    starts
}

/// Per-duration counts for a start time, 1h up to `cap` or closing, whichever
/// comes first. Durations with no free table are left out.
pub fn duration_counts(
    restaurant: &Restaurant,
    date: NaiveDate,
    start: NaiveTime,
    cap: u32,
    days: &[TableDay],
) -> Vec<DurationCount> {
    let longest = restaurant.hours_until_closing(start).min(cap);
    (1..=longest)
        .filter_map(|hours| {
            let window = Window::new(date, start, hours);
            let available = count_free(days, &window);
            (available > 0).then(|| DurationCount {
                duration_hours: hours,
                end_time: window.end_time(),
                available_tables: available,
            })
        })
        .collect()
}

/// Slots of `duration_hours` with at least one free table. Starts before
/// `not_before` are skipped. Each slot carries its duration breakdown.
pub fn time_slots(
    restaurant: &Restaurant,
    date: NaiveDate,
    duration_hours: u32,
    days: &[TableDay],
    not_before: Option<NaiveTime>,
    breakdown_cap: u32,
) -> Vec<TimeSlot> {
    slot_starts(restaurant, duration_hours)
        .into_iter()
        .filter(|start| not_before.is_none_or(|nb| *start >= nb))
        .filter_map(|start| {
            let window = Window::new(date, start, duration_hours);
            let available = count_free(days, &window);
            if available == 0 {
                return None;
            }
            Some(TimeSlot {
                time: start,
                end_time: window.end_time(),
                available_tables: available,
                durations: duration_counts(restaurant, date, start, breakdown_cap, days),
            })
        })
        .collect()
}

/// Tables grouped by floor in display order, each group sorted by table number.
pub fn group_by_floor(tables: &[Table]) -> Vec<FloorGroup> {
    let mut groups: BTreeMap<Floor, Vec<TableInfo>> = BTreeMap::new();
    for table in tables {
        groups.entry(table.floor.clone()).or_default().push(table.info());
    }
    groups
        .into_iter()
        .map(|(floor, mut tables)| {
            tables.sort_by(|a, b| a.table_number.cmp(&b.table_number));
            FloorGroup { floor, tables }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    fn d() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 1).unwrap()
    }

    fn t(h: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, 0, 0).unwrap()
    }

    fn restaurant(open: u32, close: u32) -> Restaurant {
        Restaurant {
            id: Ulid::new(),
            name: "Test".into(),
            opening_time: t(open),
            closing_time: t(close),
            is_active: true,
        }
    }

    fn table(number: &str, floor: Floor) -> Table {
        Table {
            id: Ulid::new(),
            restaurant_id: Ulid::new(),
            table_number: number.into(),
            capacity: 4,
            floor,
            is_active: true,
        }
    }

    fn day(busy: &[(u32, u32)]) -> TableDay {
        TableDay {
            table: table("T", Floor::Ground),
            busy: busy.iter().map(|&(s, h)| Window::new(d(), t(s), h)).collect(),
        }
    }

    #[test]
    fn slot_grid_respects_closing() {
        let r = restaurant(9, 22);
        let starts = slot_starts(&r, 2);
        assert_eq!(starts.first(), Some(&t(9)));
        assert_eq!(starts.last(), Some(&t(20)));
        assert_eq!(starts.len(), 12);
    }

    #[test]
    fn slot_grid_empty_when_duration_exceeds_hours() {
        let r = restaurant(18, 20);
        assert!(slot_starts(&r, 3).is_empty());
    }

    #[test]
    fn half_hour_opening_keeps_its_offset() {
        let mut r = restaurant(9, 22);
        r.opening_time = NaiveTime::from_hms_opt(9, 30, 0).unwrap();
        let starts = slot_starts(&r, 1);
        assert_eq!(starts[0], NaiveTime::from_hms_opt(9, 30, 0).unwrap());
        assert_eq!(starts.last(), Some(&NaiveTime::from_hms_opt(20, 30, 0).unwrap()));
    }

    #[test]
    fn count_free_per_window() {
        let days = vec![day(&[(19, 2)]), day(&[]), day(&[(12, 1)])];
        assert_eq!(count_free(&days, &Window::new(d(), t(19), 1)), 2);
        assert_eq!(count_free(&days, &Window::new(d(), t(12), 1)), 2);
        assert_eq!(count_free(&days, &Window::new(d(), t(15), 1)), 3);
    }

    #[test]
    fn durations_stop_at_closing_and_cap() {
        let r = restaurant(9, 22);
        let days = vec![day(&[])];
        let late = duration_counts(&r, d(), t(20), 6, &days);
        assert_eq!(late.iter().map(|c| c.duration_hours).collect::<Vec<_>>(), vec![1, 2]);
        let early = duration_counts(&r, d(), t(10), 6, &days);
        assert_eq!(early.len(), 6);
        assert_eq!(early[5].end_time, t(16));
    }

    #[test]
    fn durations_drop_unavailable_lengths() {
        let r = restaurant(9, 22);
        let days = vec![day(&[(20, 1)])];
        let counts = duration_counts(&r, d(), t(18), 6, &days);
        assert_eq!(counts.iter().map(|c| c.duration_hours).collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn time_slots_skip_full_and_past_starts() {
        let r = restaurant(17, 22);
        let days = vec![day(&[(19, 2)])];
        let slots = time_slots(&r, d(), 1, &days, Some(t(18)), 12);
        let times: Vec<_> = slots.iter().map(|s| s.time).collect();
        assert_eq!(times, vec![t(18), t(21)]);
        assert_eq!(slots[0].durations.len(), 1);
        assert_eq!(slots[0].end_time, t(19));
    }

    #[test]
    fn floors_in_display_order() {
        let tables = vec![
            table("R2", Floor::Rooftop),
            table("G2", Floor::Ground),
            table("A1", Floor::Other("annex".into())),
            table("G1", Floor::Ground),
        ];
        let groups = group_by_floor(&tables);
        let floors: Vec<_> = groups.iter().map(|g| g.floor.clone()).collect();
        assert_eq!(floors, vec![Floor::Ground, Floor::Rooftop, Floor::Other("annex".into())]);
        let ground: Vec<_> = groups[0].tables.iter().map(|t| t.table_number.as_str()).collect();
        assert_eq!(ground, vec!["G1", "G2"]);
    }
}
