//! Watch patterns, trigger modes and events.
//!
//! These types are serializable so a connector layer can forward them.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{KbError, KbResult};

/// Unique identifier for a registered watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WatcherId(Uuid);

impl WatcherId {
    /// Create a new random watcher id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for WatcherId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WatcherId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// When a watcher fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerMode {
    /// On a false to true transition.
    #[default]
    OnBecomeTrue,
    /// The first time the pattern is observed true, then unregistered.
    OnBecomeTrueOnce,
    /// On a true to false transition.
    OnBecomeFalse,
    /// The first time the pattern is observed false, then unregistered.
    OnBecomeFalseOnce,
    /// On any transition.
    OnToggle,
}

impl TriggerMode {
    /// True for modes that unregister after their first notification.
    #[must_use]
    pub const fn is_one_shot(self) -> bool {
        matches!(self, Self::OnBecomeTrueOnce | Self::OnBecomeFalseOnce)
    }

    pub(crate) const fn watches_true(self) -> bool {
        matches!(self, Self::OnBecomeTrue | Self::OnBecomeTrueOnce | Self::OnToggle)
    }

    pub(crate) const fn watches_false(self) -> bool {
        matches!(self, Self::OnBecomeFalse | Self::OnBecomeFalseOnce | Self::OnToggle)
    }
}

/// What a watcher observes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PatternKind {
    /// Conjunction of partial statements; true while at least one match exists.
    FactPattern {
        /// Partial statements, e.g. `?a eats grass`.
        patterns: Vec<String>,
    },
    /// Instances of a class, subclasses included.
    NewInstanceOf {
        /// Class name, light or qualified.
        class: String,
    },
    /// Bindings of one variable over a conjunction of partial statements.
    NewInstance {
        /// The reported variable, with its leading `?`.
        variable: String,
        /// Partial statements binding `variable`.
        patterns: Vec<String>,
    },
}

/// A subscription request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchPattern {
    /// What is observed.
    pub kind: PatternKind,
    /// When to fire. Ignored by `NewInstanceOf`.
    #[serde(default)]
    pub mode: TriggerMode,
}

impl WatchPattern {
    /// A conjunction of partial statements.
    pub fn facts<S: Into<String>>(patterns: impl IntoIterator<Item = S>, mode: TriggerMode) -> Self {
        Self {
            kind: PatternKind::FactPattern {
                patterns: patterns.into_iter().map(Into::into).collect(),
            },
            mode,
        }
    }

    /// New instances of `class`. Trigger modes do not apply.
    pub fn new_instance_of(class: impl Into<String>) -> Self {
        Self {
            kind: PatternKind::NewInstanceOf { class: class.into() },
            mode: TriggerMode::OnBecomeTrue,
        }
    }

    /// Bindings of `variable` across `patterns`.
    pub fn new_instance<S: Into<String>>(
        variable: impl Into<String>,
        patterns: impl IntoIterator<Item = S>,
        mode: TriggerMode,
    ) -> Self {
        Self {
            kind: PatternKind::NewInstance {
                variable: variable.into(),
                patterns: patterns.into_iter().map(Into::into).collect(),
            },
            mode,
        }
    }
}

/// Why a watcher fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A fact pattern started to hold.
    BecameTrue,
    /// A fact pattern stopped holding.
    BecameFalse,
    /// Instances or bindings appeared.
    NewInstances,
    /// Bindings disappeared.
    RemovedInstances,
}

/// A notification delivered to a consumer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchEvent {
    /// Unique per event.
    pub event_id: Uuid,
    /// The watcher that fired.
    pub watcher_id: WatcherId,
    /// Which edge was observed.
    pub kind: EventKind,
    /// When the watcher pass ran.
    pub timestamp: DateTime<Utc>,
    /// Instance delta, in light form. Empty for fact patterns.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub matched: Vec<String>,
}

impl WatchEvent {
    /// An event with a fresh id.
    #[must_use]
    pub fn new(watcher_id: WatcherId, kind: EventKind, matched: Vec<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            watcher_id,
            kind,
            timestamp,
            matched,
        }
    }

    /// The event rendered as JSON, for connectors.
    pub fn context_json(&self) -> KbResult<serde_json::Value> {
        serde_json::to_value(self).map_err(|e| KbError::internal(format!("event serialization: {e}")))
    }
}
