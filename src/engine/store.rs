use std::sync::Arc;

use chrono::NaiveDate;
use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::model::*;

use super::{EngineError, SharedDaySheet};

/// Restaurants, tables and reservations held in memory.
///
/// Reservations live in one [`DaySheet`] per `(table, date)`; the sheet's
/// lock is the serialization point for commits on that table and date.
pub struct InMemoryStore {
    restaurants: DashMap<Ulid, Restaurant>,
    tables: DashMap<Ulid, Table>,
    /// Restaurant → table ids, for inventory scans.
    restaurant_tables: DashMap<Ulid, Vec<Ulid>>,
    sheets: DashMap<(Ulid, NaiveDate), SharedDaySheet>,
    /// Sheets that may still hold pending or confirmed rows. Only these are swept.
    open_sheets: DashSet<(Ulid, NaiveDate)>,
    /// Reverse lookup: reservation id → sheet key.
    reservation_index: DashMap<Ulid, (Ulid, NaiveDate)>,
    /// Customer → reservation ids.
    customer_index: DashMap<Ulid, Vec<Ulid>>,
    selections: DashMap<Ulid, SelectionRecord>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            restaurants: DashMap::new(),
            tables: DashMap::new(),
            restaurant_tables: DashMap::new(),
            sheets: DashMap::new(),
            open_sheets: DashSet::new(),
            reservation_index: DashMap::new(),
            customer_index: DashMap::new(),
            selections: DashMap::new(),
        }
    }

    // ── Inventory ────────────────────────────────────────────

    pub fn restaurant(&self, id: &Ulid) -> Option<Restaurant> {
        self.restaurants.get(id).map(|e| e.value().clone())
    }

    pub fn contains_restaurant(&self, id: &Ulid) -> bool {
        self.restaurants.contains_key(id)
    }

    pub fn insert_restaurant(&self, restaurant: Restaurant) {
        self.restaurants.insert(restaurant.id, restaurant);
    }

    pub fn table(&self, id: &Ulid) -> Option<Table> {
        self.tables.get(id).map(|e| e.value().clone())
    }

    /// Add a table, holding its restaurant's index entry across the number
    /// check and the insert so two registrations cannot both pass.
    pub fn insert_new_table(&self, table: Table, max_tables: usize) -> Result<(), EngineError> {
        let mut ids = self.restaurant_tables.entry(table.restaurant_id).or_default();
        if ids.len() >= max_tables {
            return Err(EngineError::LimitExceeded("too many tables"));
        }
        let taken = ids
            .iter()
            .any(|id| self.tables.get(id).is_some_and(|t| t.table_number == table.table_number));
        if taken {
            return Err(EngineError::AlreadyExists(format!("table number {}", table.table_number)));
        }
        match self.tables.entry(table.id) {
            Entry::Occupied(_) => Err(EngineError::AlreadyExists(format!("table {}", table.id))),
            Entry::Vacant(slot) => {
                ids.push(table.id);
                slot.insert(table);
                Ok(())
            }
        }
    }

    pub fn set_table_active(&self, id: &Ulid, active: bool) -> Option<Table> {
        self.tables.get_mut(id).map(|mut t| {
            t.is_active = active;
            t.clone()
        })
    }

    /// Every table of a restaurant, active or not, in registration order.
    pub fn tables_of(&self, restaurant_id: &Ulid) -> Vec<Table> {
        let ids = self
            .restaurant_tables
            .get(restaurant_id)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        ids.iter().filter_map(|id| self.table(id)).collect()
    }

    // ── Day sheets ───────────────────────────────────────────

    pub fn sheet(&self, table_id: &Ulid, date: NaiveDate) -> Option<SharedDaySheet> {
        self.sheets.get(&(*table_id, date)).map(|e| e.value().clone())
    }

    pub fn sheet_or_create(&self, table_id: Ulid, date: NaiveDate) -> SharedDaySheet {
        self.sheets
            .entry((table_id, date))
            .or_insert_with(|| Arc::new(RwLock::new(DaySheet::new(table_id, date))))
            .value()
            .clone()
    }

    /// Call with the sheet's write lock held after inserting a blocking row.
    pub fn mark_open(&self, table_id: Ulid, date: NaiveDate) {
        self.open_sheets.insert((table_id, date));
    }

    /// Call with the sheet's lock held once no row on it can block again.
    pub fn settle(&self, table_id: Ulid, date: NaiveDate) {
        self.open_sheets.remove(&(table_id, date));
    }

    pub fn open_sheet_keys(&self) -> Vec<(Ulid, NaiveDate)> {
        self.open_sheets.iter().map(|e| *e.key()).collect()
    }

    // ── Reservation index ────────────────────────────────────

    pub fn locate(&self, reservation_id: &Ulid) -> Option<(Ulid, NaiveDate)> {
        self.reservation_index.get(reservation_id).map(|e| *e.value())
    }

    pub fn index_reservation(&self, reservation: &Reservation) {
        self.reservation_index
            .insert(reservation.id, (reservation.table_id, reservation.window.date));
        self.customer_index
            .entry(reservation.customer_id)
            .or_default()
            .push(reservation.id);
    }

    pub fn reservations_of_customer(&self, customer_id: &Ulid) -> Vec<Ulid> {
        self.customer_index
            .get(customer_id)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }

    // ── Selection audit ──────────────────────────────────────

    pub fn insert_selection(&self, record: SelectionRecord) {
        self.selections.insert(record.reservation_id, record);
    }

    pub fn selection(&self, reservation_id: &Ulid) -> Option<SelectionRecord> {
        self.selections.get(reservation_id).map(|e| e.value().clone())
    }
}
