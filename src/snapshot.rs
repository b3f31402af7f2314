//! Inventory seed: restaurants with their tables, loaded from JSON at startup.
//!
//! ```json
//! { "restaurants": [ { "name": "Bistro", "opening_time": "09:00", "closing_time": "22:00",
//!     "tables": [ { "table_number": "1", "capacity": 4, "floor": "terrace" } ] } ] }
//! ```

use std::path::Path;

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;
use ulid::Ulid;

use crate::engine::{Engine, EngineError};
use crate::model::{Floor, Restaurant, Table, hhmm};

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("cannot read seed file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid seed file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("seed rejected: {0}")]
    Rejected(#[from] EngineError),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventorySnapshot {
    pub restaurants: Vec<RestaurantSeed>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestaurantSeed {
    #[serde(default)]
    pub id: Option<Ulid>,
    pub name: String,
    #[serde(with = "hhmm")]
    pub opening_time: NaiveTime,
    #[serde(with = "hhmm")]
    pub closing_time: NaiveTime,
    #[serde(default = "yes")]
    pub is_active: bool,
    #[serde(default)]
    pub tables: Vec<TableSeed>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSeed {
    #[serde(default)]
    pub id: Option<Ulid>,
    pub table_number: String,
    pub capacity: u32,
    #[serde(default)]
    pub floor: Floor,
    #[serde(default = "yes")]
    pub is_active: bool,
}

fn yes() -> bool {
    true
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SeedSummary {
    pub restaurants: usize,
    pub tables: usize,
}

pub fn load(path: &Path) -> Result<InventorySnapshot, SnapshotError> {
    parse(&std::fs::read_to_string(path)?)
}

pub fn parse(json: &str) -> Result<InventorySnapshot, SnapshotError> {
    Ok(serde_json::from_str(json)?)
}

/// Register everything in the snapshot. Stops at the first rejected entry;
/// entries registered before it stay.
pub fn apply(engine: &Engine, snapshot: InventorySnapshot) -> Result<SeedSummary, SnapshotError> {
    let mut summary = SeedSummary::default();
    for seed in snapshot.restaurants {
        let restaurant = engine.register_restaurant(Restaurant {
            id: seed.id.unwrap_or_else(Ulid::new),
            name: seed.name,
            opening_time: seed.opening_time,
            closing_time: seed.closing_time,
            is_active: seed.is_active,
        })?;
        summary.restaurants += 1;
        for table in seed.tables {
            engine.register_table(Table {
                id: table.id.unwrap_or_else(Ulid::new),
                restaurant_id: restaurant.id,
                table_number: table.table_number,
                capacity: table.capacity,
                floor: table.floor,
                is_active: table.is_active,
            })?;
            summary.tables += 1;
        }
    }
    info!(restaurants = summary.restaurants, tables = summary.tables, "inventory seeded");
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::advisory::NoAdvisor;
    use crate::engine::EngineSettings;
    use crate::notify::NotifyHub;
    use std::sync::Arc;

    fn engine() -> Engine {
        Engine::new(Arc::new(NoAdvisor), Arc::new(NotifyHub::new()), EngineSettings::default())
    }

    const SEED: &str = r#"{
        "restaurants": [
            {
                "id": "01HZY0000000000000000000R1",
                "name": "Bistro",
                "opening_time": "09:00",
                "closing_time": "22:00",
                "tables": [
                    { "table_number": "1", "capacity": 2 },
                    { "table_number": "2", "capacity": 4, "floor": "Terrace" },
                    { "table_number": "3", "capacity": 6, "is_active": false }
                ]
            },
            { "name": "Cafe", "opening_time": "07:30", "closing_time": "15:00:00" }
        ]
    }"#;

    #[test]
    fn applies_seed() {
        let engine = engine();
        let summary = apply(&engine, parse(SEED).unwrap()).unwrap();
        assert_eq!(summary, SeedSummary { restaurants: 2, tables: 3 });

        let rid: Ulid = "01HZY0000000000000000000R1".parse().unwrap();
        let tables = engine.tables(rid).unwrap();
        assert_eq!(tables.len(), 3);
        assert_eq!(tables[1].floor, Floor::Terrace);
        assert_eq!(tables[0].floor, Floor::Ground);
        assert!(!tables[2].is_active);
    }

    #[test]
    fn duplicate_table_number_rejected() {
        let engine = engine();
        let json = r#"{"restaurants":[{"name":"X","opening_time":"09:00","closing_time":"22:00",
            "tables":[{"table_number":"1","capacity":2},{"table_number":"1","capacity":4}]}]}"#;
        assert!(matches!(
            apply(&engine, parse(json).unwrap()),
            Err(SnapshotError::Rejected(EngineError::AlreadyExists(_)))
        ));
    }

    #[test]
    fn malformed_json_is_parse_error() {
        assert!(matches!(parse("{ nope"), Err(SnapshotError::Parse(_))));
        assert!(matches!(
            parse(r#"{"restaurants":[{"name":"X","opening_time":"late","closing_time":"22:00"}]}"#),
            Err(SnapshotError::Parse(_))
        ));
    }
}
