//! Tracking table for non-permanent facts.
//!
//! The store keeps each fact's profile and creation time as an annotation;
//! the manager mirrors them to decide *what* is due. Removing due facts from
//! the store and the post-commit steps belong to the coordinator, which runs
//! the whole batch in one write section.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{KbError, KbResult, ValidationError};
use crate::term::{FactId, Triple};

use super::profile::MemoryProfile;

fn lock_err(context: &'static str) -> KbError {
    KbError::internal(format!("poisoned lock: {context}"))
}

fn default_sweep_period_ms() -> u64 {
    500
}

fn default_time_unit_ms() -> u64 {
    1000
}

/// Sweeper settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Period between two sweeps.
    #[serde(default = "default_sweep_period_ms")]
    pub sweep_period_ms: u64,
    /// Wall-clock length of one TTL unit. Tests compress it.
    #[serde(default = "default_time_unit_ms")]
    pub time_unit_ms: u64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            sweep_period_ms: default_sweep_period_ms(),
            time_unit_ms: default_time_unit_ms(),
        }
    }
}

impl MemoryConfig {
    /// `sweep_period_ms` as a duration.
    #[must_use]
    pub const fn sweep_period(&self) -> Duration {
        Duration::from_millis(self.sweep_period_ms)
    }

    /// `time_unit_ms` as a duration.
    #[must_use]
    pub const fn time_unit(&self) -> Duration {
        Duration::from_millis(self.time_unit_ms)
    }

    /// Rejects zero periods and units.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.sweep_period_ms == 0 {
            return Err(ValidationError::InvalidConfig {
                reason: "memory.sweep_period_ms must be greater than zero".to_string(),
            });
        }
        if self.time_unit_ms == 0 {
            return Err(ValidationError::InvalidConfig {
                reason: "memory.time_unit_ms must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

/// A tracked non-permanent fact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FactRecord {
    /// The tracked statement.
    pub fact: Triple,
    /// When the current profile was applied.
    pub created_at: DateTime<Utc>,
    /// Never `Permanent`.
    pub profile: MemoryProfile,
}

impl FactRecord {
    /// The record an assertion with `profile` at `now` leaves behind, or
    /// `None` if `current` stays as it is.
    ///
    /// The shortest TTL wins: an equal or shorter profile replaces the
    /// record and restarts its clock, a longer one leaves it untouched.
    /// Permanent assertions never produce a record.
    #[must_use]
    pub fn renewal(current: Option<&Self>, fact: &Triple, profile: MemoryProfile, now: DateTime<Utc>) -> Option<Self> {
        if profile.is_permanent() {
            return None;
        }
        if let Some(existing) = current {
            if !profile.outlived_by(existing.profile) {
                debug!(fact = %fact, tracked = %existing.profile, requested = %profile, "keeping shorter profile");
                return None;
            }
        }
        Some(Self {
            fact: fact.clone(),
            created_at: now,
            profile,
        })
    }

    /// True once more than the profile's TTL has elapsed at `now`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>, time_unit: Duration) -> bool {
        let Some(ttl) = self.profile.ttl(time_unit) else {
            return false;
        };
        (now - self.created_at).to_std().is_ok_and(|elapsed| elapsed > ttl)
    }
}

/// Table of non-permanent facts and their profiles.
#[derive(Debug)]
pub struct MemoryManager {
    config: MemoryConfig,
    records: Mutex<HashMap<FactId, FactRecord>>,
}

impl MemoryManager {
    /// An empty table.
    #[must_use]
    pub fn new(config: MemoryConfig) -> Self {
        Self {
            config,
            records: Mutex::new(HashMap::new()),
        }
    }

    /// Settings the manager was built with.
    #[must_use]
    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    /// Records a freshly committed fact, following [`FactRecord::renewal`].
    pub fn track(&self, fact: &Triple, profile: MemoryProfile, now: DateTime<Utc>) -> KbResult<()> {
        let mut records = self.records.lock().map_err(|_| lock_err("memory.records"))?;
        let id = fact.id();
        if let Some(record) = FactRecord::renewal(records.get(&id), fact, profile, now) {
            records.insert(id, record);
        }
        Ok(())
    }

    /// Installs a record as is, replacing any earlier one for its fact.
    pub fn adopt(&self, record: FactRecord) -> KbResult<()> {
        let mut records = self.records.lock().map_err(|_| lock_err("memory.records"))?;
        records.insert(record.fact.id(), record);
        Ok(())
    }

    /// Drops the record of a fact. Unknown facts are ignored.
    pub fn forget(&self, fact: &Triple) -> KbResult<bool> {
        let mut records = self.records.lock().map_err(|_| lock_err("memory.records"))?;
        Ok(records.remove(&fact.id()).is_some())
    }

    /// Facts whose TTL has elapsed at `now`.
    pub fn due(&self, now: DateTime<Utc>) -> KbResult<Vec<Triple>> {
        let records = self.records.lock().map_err(|_| lock_err("memory.records"))?;
        let time_unit = self.config.time_unit();
        let mut due: Vec<Triple> = records
            .values()
            .filter(|r| r.is_expired(now, time_unit))
            .map(|r| r.fact.clone())
            .collect();
        due.sort();
        Ok(due)
    }

    /// Drops the records of a swept batch.
    pub fn drop_records<'a>(&self, facts: impl IntoIterator<Item = &'a Triple>) -> KbResult<()> {
        let mut records = self.records.lock().map_err(|_| lock_err("memory.records"))?;
        for fact in facts {
            records.remove(&fact.id());
        }
        Ok(())
    }

    /// The record of a fact, if tracked.
    pub fn record(&self, fact: &Triple) -> KbResult<Option<FactRecord>> {
        let records = self.records.lock().map_err(|_| lock_err("memory.records"))?;
        Ok(records.get(&fact.id()).cloned())
    }

    /// Number of tracked facts.
    pub fn tracked_count(&self) -> KbResult<usize> {
        let records = self.records.lock().map_err(|_| lock_err("memory.records"))?;
        Ok(records.len())
    }
}
