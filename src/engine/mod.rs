mod availability;
mod conflict;
mod error;
mod inventory;
mod mutations;
pub mod policy;
mod queries;
mod selection;
mod store;

pub use availability::{TableDay, count_free, duration_counts, group_by_floor, slot_starts, time_slots};
pub use error::EngineError;
pub use inventory::filter_candidates;
pub use policy::{CancelRefusal, CancellationPolicy};
pub use selection::{Selection, SelectionContext};
pub use store::InMemoryStore;

use std::sync::Arc;
use std::time::Duration;

use chrono::{FixedOffset, NaiveDateTime, Offset, Utc};
use tokio::sync::{OwnedRwLockWriteGuard, RwLock};
use ulid::Ulid;

use crate::advisory::TableAdvisor;
use crate::clock::{Clock, SystemClock};
use crate::model::*;
use crate::notify::NotifyHub;

pub type SharedDaySheet = Arc<RwLock<DaySheet>>;

#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Offset of the restaurants' local time from UTC.
    pub utc_offset: FixedOffset,
    /// Upper bound on one advisory call; past it the commit falls back.
    pub advisory_timeout: Duration,
    pub cancellation: CancellationPolicy,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            utc_offset: Utc.fix(),
            advisory_timeout: Duration::from_secs(3),
            cancellation: CancellationPolicy::default(),
        }
    }
}

pub struct Engine {
    pub(super) store: InMemoryStore,
    pub(super) advisor: Arc<dyn TableAdvisor>,
    pub notify: Arc<NotifyHub>,
    pub(super) settings: EngineSettings,
    pub(super) clock: Arc<dyn Clock>,
}

impl Engine {
    pub fn new(advisor: Arc<dyn TableAdvisor>, notify: Arc<NotifyHub>, settings: EngineSettings) -> Self {
        Self {
            store: InMemoryStore::new(),
            advisor,
            notify,
            settings,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Current wall-clock time at the restaurants.
    pub fn local_now(&self) -> NaiveDateTime {
        self.clock.now().with_timezone(&self.settings.utc_offset).naive_local()
    }

    /// Restaurant that exists and accepts reservations.
    pub(super) fn active_restaurant(&self, id: Ulid) -> Result<Restaurant, EngineError> {
        self.store
            .restaurant(&id)
            .filter(|r| r.is_active)
            .ok_or_else(|| EngineError::not_found("restaurant", id))
    }

    /// Lookup reservation → day sheet, acquire its write lock.
    pub(super) async fn resolve_reservation_write(
        &self,
        reservation_id: Ulid,
    ) -> Result<OwnedRwLockWriteGuard<DaySheet>, EngineError> {
        let (table_id, date) = self
            .store
            .locate(&reservation_id)
            .ok_or_else(|| EngineError::not_found("reservation", reservation_id))?;
        let sheet = self
            .store
            .sheet(&table_id, date)
            .ok_or_else(|| EngineError::not_found("reservation", reservation_id))?;
        Ok(sheet.write_owned().await)
    }
}
