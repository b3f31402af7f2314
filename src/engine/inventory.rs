use tracing::info;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::validate_party_size;
use super::{Engine, EngineError};

/// Active tables seating at least `party_size`, optionally on one floor,
/// in ascending id order.
pub fn filter_candidates(tables: Vec<Table>, party_size: u32, floor: Option<&Floor>) -> Vec<Table> {
    let mut out: Vec<Table> = tables
        .into_iter()
        .filter(|t| t.is_active && t.capacity >= party_size)
        .filter(|t| floor.is_none_or(|f| &t.floor == f))
        .collect();
    out.sort_by_key(|t| t.id);
    out
}

impl Engine {
    pub fn restaurant(&self, id: Ulid) -> Option<Restaurant> {
        self.store.restaurant(&id)
    }

    pub fn table(&self, id: Ulid) -> Option<Table> {
        self.store.table(&id)
    }

    /// Every table of an active restaurant, including inactive ones.
    pub fn tables(&self, restaurant_id: Ulid) -> Result<Vec<Table>, EngineError> {
        let restaurant = self.active_restaurant(restaurant_id)?;
        Ok(self.store.tables_of(&restaurant.id))
    }

    pub fn candidates(
        &self,
        restaurant_id: Ulid,
        party_size: u32,
        floor: Option<&Floor>,
    ) -> Result<Vec<Table>, EngineError> {
        validate_party_size(party_size)?;
        let tables = self.tables(restaurant_id)?;
        if let Some(f) = floor
            && !tables.iter().any(|t| &t.floor == f)
        {
            return Err(EngineError::not_found("floor", f));
        }
        Ok(filter_candidates(tables, party_size, floor))
    }

    // ── Registration ─────────────────────────────────────────

    pub fn register_restaurant(&self, restaurant: Restaurant) -> Result<Restaurant, EngineError> {
        let name = restaurant.name.trim();
        if name.is_empty() {
            return Err(EngineError::Validation("restaurant name is required".into()));
        }
        if name.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("restaurant name too long"));
        }
        if restaurant.opening_time >= restaurant.closing_time {
            return Err(EngineError::Validation(format!(
                "opening time {} must be before closing time {}",
                restaurant.opening_time.format("%H:%M"),
                restaurant.closing_time.format("%H:%M")
            )));
        }
        if self.store.contains_restaurant(&restaurant.id) {
            return Err(EngineError::AlreadyExists(format!("restaurant {}", restaurant.id)));
        }

        let restaurant = Restaurant {
            name: name.to_string(),
            opening_time: truncate_to_minute(restaurant.opening_time),
            closing_time: truncate_to_minute(restaurant.closing_time),
            ..restaurant
        };
        self.store.insert_restaurant(restaurant.clone());
        info!(restaurant = %restaurant.id, name = %restaurant.name, "restaurant registered");
        Ok(restaurant)
    }

    pub fn register_table(&self, table: Table) -> Result<Table, EngineError> {
        let number = table.table_number.trim();
        if number.is_empty() {
            return Err(EngineError::Validation("table_number is required".into()));
        }
        if number.len() > MAX_TABLE_NUMBER_LEN {
            return Err(EngineError::LimitExceeded("table number too long"));
        }
        if table.capacity == 0 {
            return Err(EngineError::Validation("capacity must be at least 1".into()));
        }
        if table.capacity > MAX_PARTY_SIZE {
            return Err(EngineError::LimitExceeded("table capacity too large"));
        }
        if !self.store.contains_restaurant(&table.restaurant_id) {
            return Err(EngineError::not_found("restaurant", table.restaurant_id));
        }

        let table = Table {
            table_number: number.to_string(),
            ..table
        };
        self.store.insert_new_table(table.clone(), MAX_TABLES_PER_RESTAURANT)?;
        info!(table = %table.id, restaurant = %table.restaurant_id, number = %table.table_number, "table registered");
        Ok(table)
    }

    /// Deactivated tables drop out of every query; their reservations stay.
    pub fn set_table_active(&self, table_id: Ulid, active: bool) -> Result<Table, EngineError> {
        let table = self
            .store
            .set_table_active(&table_id, active)
            .ok_or_else(|| EngineError::not_found("table", table_id))?;
        info!(table = %table_id, active, "table availability changed");
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(capacity: u32, floor: Floor, is_active: bool) -> Table {
        Table {
            id: Ulid::new(),
            restaurant_id: Ulid::nil(),
            table_number: "T".into(),
            capacity,
            floor,
            is_active,
        }
    }

    #[test]
    fn filters_capacity_activity_and_floor() {
        let small = table(2, Floor::Ground, true);
        let big = table(6, Floor::Ground, true);
        let off = table(6, Floor::Ground, false);
        let roof = table(4, Floor::Rooftop, true);
        let all = vec![roof.clone(), off, big.clone(), small];

        let four = filter_candidates(all.clone(), 4, None);
        let mut expected = vec![big.clone(), roof.clone()];
        expected.sort_by_key(|t| t.id);
        assert_eq!(four, expected);

        assert_eq!(filter_candidates(all.clone(), 4, Some(&Floor::Ground)), vec![big]);
        assert!(filter_candidates(all, 7, None).is_empty());
    }

    #[test]
    fn candidates_sorted_by_id() {
        let tables: Vec<_> = (0..5).map(|_| table(4, Floor::Ground, true)).rev().collect();
        let out = filter_candidates(tables, 1, None);
        assert!(out.windows(2).all(|w| w[0].id < w[1].id));
    }
}
