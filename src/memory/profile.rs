//! Memory profiles: named TTL policies for facts.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How long a fact survives before it is forgotten.
///
/// TTLs are expressed in abstract time units; the unit-to-wall-clock scale
/// comes from [`crate::memory::MemoryConfig::time_unit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryProfile {
    /// Short-term memory, 10 units.
    Ephemeral,
    /// Episodic memory, 300 units.
    Episodic,
    /// Never swept.
    #[default]
    Permanent,
}

impl MemoryProfile {
    /// TTL in time units, `None` for permanent facts.
    #[must_use]
    pub const fn units(self) -> Option<u32> {
        match self {
            Self::Ephemeral => Some(10),
            Self::Episodic => Some(300),
            Self::Permanent => None,
        }
    }

    /// Wall-clock TTL under the given time unit.
    #[must_use]
    pub fn ttl(self, time_unit: Duration) -> Option<Duration> {
        self.units().map(|u| time_unit.saturating_mul(u))
    }

    /// True for facts that never expire.
    #[must_use]
    pub const fn is_permanent(self) -> bool {
        matches!(self, Self::Permanent)
    }

    /// Lenient parse. Unknown names fall back to `Permanent`.
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "ephemeral" | "shortterm" | "short_term" => Self::Ephemeral,
            "episodic" => Self::Episodic,
            _ => Self::Permanent,
        }
    }

    /// True if `self` expires no later than `other`.
    #[must_use]
    pub fn outlived_by(self, other: Self) -> bool {
        match (self.units(), other.units()) {
            (Some(a), Some(b)) => a <= b,
            (Some(_), None) | (None, None) => true,
            (None, Some(_)) => false,
        }
    }
}

impl fmt::Display for MemoryProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Ephemeral => "ephemeral",
            Self::Episodic => "episodic",
            Self::Permanent => "permanent",
        };
        f.write_str(s)
    }
}
