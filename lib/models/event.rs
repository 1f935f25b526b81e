use std::fmt::{self, Display};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{
    DEFAULT_PRE_ALLOCATE_INTERVAL_BASE_SECS, DEFAULT_PRE_ALLOCATE_NUMBER, DEFAULT_RECYCLE_MINUTES,
    PRE_ALLOCATE_INTERVAL_STEP_SECS,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The cloud provider an event provisions its virtual environments on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloudProvider {
    /// A cloud-hosted container/VM host managed by the orchestrator.
    Hosted,

    /// An external container PaaS that manages its own warm pool.
    Paas,
}

/// A time-boxed event (hackathon) that experiments are started under.
///
/// Owned by an external event store; the orchestrator only reads its
/// recycling and pre-allocation policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// The unique id of the event.
    pub id: i64,

    /// The unique name of the event.
    pub name: String,

    /// The time the event ends; experiments cannot be started afterwards.
    pub event_end_time: DateTime<Utc>,

    /// The resource policy configured for the event.
    pub config: EventConfig,

    /// The names of the templates that belong to the event.
    pub templates: Vec<String>,
}

/// The resource policy of an event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventConfig {
    /// The cloud provider the event provisions on. Unset means no cloud
    /// resource is configured and experiments cannot be started.
    pub cloud_provider: Option<CloudProvider>,

    /// Whether idle experiments of this event are reclaimed.
    pub recycle_enabled: bool,

    /// The idle threshold in minutes before a running experiment is recycled.
    pub recycle_minutes: Option<i64>,

    /// Whether a warm pool of experiments is kept for this event.
    pub pre_allocate_enabled: bool,

    /// The target warm-pool size per template.
    pub pre_allocate_number: Option<i64>,

    /// The period of the pre-allocation sweep in seconds.
    pub pre_allocate_interval_seconds: Option<i64>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Event {
    /// Returns the idle threshold in minutes, falling back to the default.
    pub fn recycle_minutes(&self) -> i64 {
        self.config.recycle_minutes.unwrap_or(DEFAULT_RECYCLE_MINUTES)
    }

    /// Returns the target warm-pool size per template, falling back to the
    /// default.
    pub fn pre_allocate_number(&self) -> i64 {
        self.config
            .pre_allocate_number
            .unwrap_or(DEFAULT_PRE_ALLOCATE_NUMBER)
    }

    /// Returns the pre-allocation sweep period in seconds.
    ///
    /// When the event does not configure one, the period scales with the event
    /// id so sweeps of different events stay de-synchronized.
    pub fn pre_allocate_interval_seconds(&self) -> i64 {
        self.config.pre_allocate_interval_seconds.unwrap_or(
            DEFAULT_PRE_ALLOCATE_INTERVAL_BASE_SECS + PRE_ALLOCATE_INTERVAL_STEP_SECS * self.id,
        )
    }

    /// Returns true if the event has ended at the given time.
    pub fn has_ended(&self, now: DateTime<Utc>) -> bool {
        now >= self.event_end_time
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Display for CloudProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloudProvider::Hosted => write!(f, "hosted"),
            CloudProvider::Paas => write!(f, "paas"),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
