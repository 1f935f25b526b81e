//! Fire-and-forget notification sink.

use serde::{Deserialize, Serialize};
use tracing::info;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The kind of a notice emitted by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    /// An experiment finished starting and its user can join.
    ExprJoin,
}

/// One notice emitted by the orchestrator. Text rendering is the sink's
/// concern, not the orchestrator's.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notice {
    /// The kind of the notice.
    pub kind: NoticeKind,

    /// The event the notice concerns.
    pub event_id: i64,

    /// The owning user, empty for pool-owned experiments.
    pub user_id: Option<String>,
}

/// A [`Notifier`] that logs notices through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

//--------------------------------------------------------------------------------------------------
// Traits
//--------------------------------------------------------------------------------------------------

/// A fire-and-forget notification sink.
pub trait Notifier: Send + Sync {
    /// Delivers one notice. Failures are the sink's problem; the orchestrator
    /// never waits on delivery.
    fn notify(&self, notice: Notice);
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Notifier for TracingNotifier {
    fn notify(&self, notice: Notice) {
        info!(
            "notice {:?} for event {} (user: {})",
            notice.kind,
            notice.event_id,
            notice.user_id.as_deref().unwrap_or("")
        );
    }
}
