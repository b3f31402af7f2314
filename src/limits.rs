//! Hard limits on request shapes and per-restaurant state.

pub const MAX_PARTY_SIZE: u32 = 100;
/// Longest reservation that can be committed.
pub const MAX_DURATION_HOURS: u32 = 12;
/// Longest duration offered by the duration picker. Policy, not physics.
pub const MAX_OFFERED_DURATION_HOURS: u32 = 6;
pub const DEFAULT_HORIZON_DAYS: u32 = 30;
pub const MAX_HORIZON_DAYS: u32 = 365;
/// Granularity of generated start times.
pub const SLOT_MINUTES: u32 = 60;
/// Look-back used to describe how busy a table has been.
pub const RECENT_BOOKINGS_DAYS: i64 = 30;

pub const MAX_NAME_LEN: usize = 100;
pub const MAX_TABLE_NUMBER_LEN: usize = 10;
pub const MAX_SPECIAL_REQUESTS_LEN: usize = 2_000;
pub const MAX_OCCASION_LEN: usize = 100;
pub const MAX_PREFERENCES: usize = 32;
pub const MAX_PREFERENCE_LEN: usize = 200;
pub const MAX_CANDIDATES: usize = 200;

pub const MAX_TABLES_PER_RESTAURANT: usize = 500;
/// A table can turn over at most once per quarter hour in a day.
pub const MAX_RESERVATIONS_PER_SHEET: usize = 96;

/// Longest accepted protocol line, in bytes.
pub const MAX_LINE_LEN: usize = 64 * 1024;
