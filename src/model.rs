use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, Timelike, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::access::Requester;

pub const MINUTES_PER_DAY: u32 = 24 * 60;

/// Wall-clock times travel as `"HH:MM"`; `"HH:MM:SS"` is accepted on input.
pub mod hhmm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn parse(s: &str) -> Option<NaiveTime> {
        NaiveTime::parse_from_str(s, "%H:%M")
            .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
            .ok()
    }

    pub fn serialize<S: Serializer>(t: &NaiveTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&t.format("%H:%M").to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(d)?;
        parse(&raw).ok_or_else(|| serde::de::Error::custom(format!("invalid time {raw:?}, expected HH:MM")))
    }
}

/// Minutes since midnight, ignoring seconds.
pub fn minute_of_day(t: NaiveTime) -> u32 {
    t.hour() * 60 + t.minute()
}

/// Drop seconds and sub-second precision.
pub fn truncate_to_minute(t: NaiveTime) -> NaiveTime {
    NaiveTime::from_hms_opt(t.hour(), t.minute(), 0).unwrap_or(t)
}

/// Half-open window `[start, start + duration_hours)` on a single date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Window {
    pub date: NaiveDate,
    #[serde(with = "hhmm")]
    pub start: NaiveTime,
    pub duration_hours: u32,
}

impl Window {
    pub fn new(date: NaiveDate, start: NaiveTime, duration_hours: u32) -> Self {
        debug_assert!(duration_hours > 0, "Window duration must be positive");
        Self {
            date,
            start: truncate_to_minute(start),
            duration_hours,
        }
    }

    pub fn start_minute(&self) -> u32 {
        minute_of_day(self.start)
    }

    /// Not wrapped: a window that runs to midnight ends at minute 1440.
    pub fn end_minute(&self) -> u32 {
        self.start_minute() + self.duration_hours * 60
    }

    /// Time of day the window ends. Wraps past midnight; only compare it
    /// against times on the same date.
    pub fn end_time(&self) -> NaiveTime {
        self.start
            .overflowing_add_signed(TimeDelta::hours(i64::from(self.duration_hours)))
            .0
    }

    pub fn crosses_midnight(&self) -> bool {
        self.end_minute() > MINUTES_PER_DAY
    }

    pub fn overlaps(&self, other: &Window) -> bool {
        self.date == other.date
            && self.start_minute() < other.end_minute()
            && other.start_minute() < self.end_minute()
    }

    pub fn starts_at(&self) -> NaiveDateTime {
        self.date.and_time(self.start)
    }

    pub fn ends_at(&self) -> NaiveDateTime {
        self.starts_at() + TimeDelta::hours(i64::from(self.duration_hours))
    }

    pub fn with_duration(&self, duration_hours: u32) -> Self {
        Self::new(self.date, self.start, duration_hours)
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}-{}",
            self.date,
            self.start.format("%H:%M"),
            self.end_time().format("%H:%M")
        )
    }
}

/// Coarse location of a table. Variant order is the display order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Floor {
    #[default]
    Ground,
    First,
    Second,
    Rooftop,
    Terrace,
    Private,
    Other(String),
}

impl Floor {
    pub fn as_str(&self) -> &str {
        match self {
            Floor::Ground => "ground",
            Floor::First => "first",
            Floor::Second => "second",
            Floor::Rooftop => "rooftop",
            Floor::Terrace => "terrace",
            Floor::Private => "private",
            Floor::Other(name) => name,
        }
    }
}

impl From<String> for Floor {
    fn from(raw: String) -> Self {
        let name = raw.trim().to_lowercase();
        match name.as_str() {
            "ground" => Floor::Ground,
            "first" => Floor::First,
            "second" => Floor::Second,
            "rooftop" => Floor::Rooftop,
            "terrace" => Floor::Terrace,
            "private" => Floor::Private,
            _ => Floor::Other(name),
        }
    }
}

impl From<&str> for Floor {
    fn from(raw: &str) -> Self {
        Floor::from(raw.to_string())
    }
}

impl From<Floor> for String {
    fn from(floor: Floor) -> Self {
        floor.as_str().to_string()
    }
}

impl fmt::Display for Floor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReservationStatus {
    Pending,
    Confirmed,
    Cancelled,
    Completed,
}

impl ReservationStatus {
    /// Pending and confirmed reservations count against availability.
    pub fn is_blocking(self) -> bool {
        matches!(self, ReservationStatus::Pending | ReservationStatus::Confirmed)
    }

    pub fn can_transition_to(self, next: ReservationStatus) -> bool {
        use ReservationStatus::*;
        matches!(
            (self, next),
            (Pending, Confirmed) | (Pending, Cancelled) | (Confirmed, Cancelled) | (Pending, Completed) | (Confirmed, Completed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ReservationStatus::Pending => "pending",
            ReservationStatus::Confirmed => "confirmed",
            ReservationStatus::Cancelled => "cancelled",
            ReservationStatus::Completed => "completed",
        }
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Restaurant {
    pub id: Ulid,
    pub name: String,
    #[serde(with = "hhmm")]
    pub opening_time: NaiveTime,
    #[serde(with = "hhmm")]
    pub closing_time: NaiveTime,
    pub is_active: bool,
}

impl Restaurant {
    pub fn opening_minute(&self) -> u32 {
        minute_of_day(self.opening_time)
    }

    pub fn closing_minute(&self) -> u32 {
        minute_of_day(self.closing_time)
    }

    /// Whole hours between `start` and closing (0 if at or after closing).
    pub fn hours_until_closing(&self, start: NaiveTime) -> u32 {
        self.closing_minute().saturating_sub(minute_of_day(start)) / 60
    }

    /// True if the window lies entirely within opening hours.
    pub fn covers(&self, window: &Window) -> bool {
        window.start_minute() >= self.opening_minute() && window.end_minute() <= self.closing_minute()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    pub id: Ulid,
    pub restaurant_id: Ulid,
    pub table_number: String,
    pub capacity: u32,
    pub floor: Floor,
    pub is_active: bool,
}

impl Table {
    pub fn info(&self) -> TableInfo {
        TableInfo {
            id: self.id,
            table_number: self.table_number.clone(),
            capacity: self.capacity,
            floor: self.floor.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub restaurant_id: Ulid,
    pub table_id: Ulid,
    pub customer_id: Ulid,
    pub party_size: u32,
    pub window: Window,
    pub status: ReservationStatus,
    pub special_requests: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// All reservations of one table on one date, any status, sorted by start.
#[derive(Debug, Clone)]
pub struct DaySheet {
    pub table_id: Ulid,
    pub date: NaiveDate,
    pub reservations: Vec<Reservation>,
}

impl DaySheet {
    pub fn new(table_id: Ulid, date: NaiveDate) -> Self {
        Self {
            table_id,
            date,
            reservations: Vec::new(),
        }
    }

    /// Insert maintaining sort order by window start.
    pub fn insert(&mut self, reservation: Reservation) {
        let key = reservation.window.start_minute();
        let pos = self
            .reservations
            .binary_search_by_key(&key, |r| r.window.start_minute())
            .unwrap_or_else(|e| e);
        self.reservations.insert(pos, reservation);
    }

    pub fn get(&self, id: &Ulid) -> Option<&Reservation> {
        self.reservations.iter().find(|r| r.id == *id)
    }

    pub fn get_mut(&mut self, id: &Ulid) -> Option<&mut Reservation> {
        self.reservations.iter_mut().find(|r| r.id == *id)
    }

    /// Reservations whose window overlaps `query`, regardless of status.
    /// Everything starting at or after `query` ends is skipped by binary search.
    pub fn overlapping(&self, query: &Window) -> impl Iterator<Item = &Reservation> {
        let right_bound = self
            .reservations
            .partition_point(|r| r.window.start_minute() < query.end_minute());
        self.reservations[..right_bound]
            .iter()
            .filter(move |r| r.window.overlaps(query))
    }
}

/// A reservation request as it reaches the commit path.
#[derive(Debug, Clone)]
pub struct ReservationRequest {
    pub restaurant_id: Ulid,
    pub requester: Requester,
    pub party_size: u32,
    pub window: Window,
    pub special_requests: Option<String>,
    pub occasion: Option<String>,
    pub preferences: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectionMethod {
    Advisory,
    Fallback,
}

impl SelectionMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            SelectionMethod::Advisory => "advisory",
            SelectionMethod::Fallback => "fallback",
        }
    }
}

/// How a table was chosen, as reported back to the requester.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionInfo {
    pub method: SelectionMethod,
    pub reasoning: String,
    pub confidence: f64,
    pub response_time_ms: u64,
    pub factors_considered: Vec<String>,
    pub alternative_table_id: Option<Ulid>,
    /// Why the advisory answer was not used, for fallbacks.
    pub failure: Option<String>,
}

/// Audit trail of one advisory-mode commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionRecord {
    pub reservation_id: Ulid,
    pub restaurant_id: Ulid,
    pub customer_id: Ulid,
    pub table_id: Ulid,
    pub candidates: Vec<TableInfo>,
    pub selection: SelectionInfo,
    /// Selection rounds needed; 2 when the first pick was lost to a concurrent commit.
    pub attempts: u32,
    pub party_size: u32,
    pub window: Window,
    pub occasion: Option<String>,
    pub preferences: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
}

// ── Event types ──────────────────────────────────────────────────

/// Broadcast to listeners of a restaurant whenever a reservation changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ReservationEvent {
    Created {
        reservation_id: Ulid,
        table_id: Ulid,
        window: Window,
        status: ReservationStatus,
    },
    StatusChanged {
        reservation_id: Ulid,
        table_id: Ulid,
        from: ReservationStatus,
        to: ReservationStatus,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableInfo {
    pub id: Ulid,
    pub table_number: String,
    pub capacity: u32,
    pub floor: Floor,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DurationCount {
    pub duration_hours: u32,
    #[serde(with = "hhmm")]
    pub end_time: NaiveTime,
    pub available_tables: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSlot {
    #[serde(with = "hhmm")]
    pub time: NaiveTime,
    #[serde(with = "hhmm")]
    pub end_time: NaiveTime,
    pub available_tables: usize,
    pub durations: Vec<DurationCount>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateAvailability {
    pub date: NaiveDate,
    pub available_slots: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FloorGroup {
    pub floor: Floor,
    pub tables: Vec<TableInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationInfo {
    pub id: Ulid,
    pub restaurant_id: Ulid,
    pub customer_id: Ulid,
    pub status: ReservationStatus,
    pub table: TableInfo,
    pub date: NaiveDate,
    #[serde(with = "hhmm")]
    pub time: NaiveTime,
    pub duration_hours: u32,
    #[serde(with = "hhmm")]
    pub end_time: NaiveTime,
    pub party_size: u32,
    pub special_requests: Option<String>,
}

impl ReservationInfo {
    pub fn new(reservation: &Reservation, table: &Table) -> Self {
        Self {
            id: reservation.id,
            restaurant_id: reservation.restaurant_id,
            customer_id: reservation.customer_id,
            status: reservation.status,
            table: table.info(),
            date: reservation.window.date,
            time: reservation.window.start,
            duration_hours: reservation.window.duration_hours,
            end_time: reservation.window.end_time(),
            party_size: reservation.party_size,
            special_requests: reservation.special_requests.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitOutcome {
    pub reservation: ReservationInfo,
    pub selection: Option<SelectionInfo>,
}
