//! The protocol expected from a provisioning backend.
//!
//! A backend performs the actual create/destroy/inspect of one virtual
//! environment unit against a container host or a VM cloud. Creation is
//! long-running: [`ProvisioningBackend::create_unit`] only triggers the work
//! and returns promptly; completion is delivered later as a
//! [`ProvisionEvent`] on the channel the backend was constructed with, with
//! the orchestrator as the consumer. Events for one experiment may arrive in
//! any order.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::models::{ContainerInfo, RemoteAccess, VeProvider, VmInfo};
use crate::HackpodResult;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The description of one unit handed to a backend for creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitSpec {
    /// The id of the experiment the unit belongs to.
    pub experiment_id: i64,

    /// The generated, globally unique name of the unit.
    pub name: String,

    /// The backend image or reference to create the unit from.
    pub image: String,

    /// The provider family of the unit.
    pub provider: VeProvider,
}

/// A reference to a unit previously created by a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitHandle {
    /// The unit name the backend resource was created under.
    pub name: String,
}

/// The status of a unit as reported by a backend inspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitRuntimeStatus {
    /// The backend is still provisioning the unit.
    Provisioning,

    /// The unit is running.
    Running,

    /// The unit is stopped or was never created.
    Stopped,
}

/// A completion message delivered by a backend for one unit.
#[derive(Debug, Clone, PartialEq)]
pub struct ProvisionEvent {
    /// The id of the experiment the unit belongs to.
    pub experiment_id: i64,

    /// The name of the unit the message concerns.
    pub virtual_environment_name: String,

    /// What happened to the unit.
    pub outcome: ProvisionOutcome,
}

/// The outcome reported by a backend for one unit.
#[derive(Debug, Clone, PartialEq)]
pub enum ProvisionOutcome {
    /// The unit reached the running state.
    Running(Box<ProvisionedUnit>),

    /// The unit was stopped and its backend resource released.
    Stopped,

    /// Provisioning failed; the whole experiment should be rolled back.
    Failed {
        /// The backend error message.
        error: String,
    },

    /// The unit failed in a way the backend did not anticipate. Siblings are
    /// left alone; the failure is surfaced, not auto-healed.
    UnexpectedError {
        /// The backend error message.
        error: String,
    },
}

/// The resource details of a unit that reached the running state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProvisionedUnit {
    /// The remote-access descriptor wired up by the backend.
    pub remote: Option<RemoteAccess>,

    /// Container resource details, for container-family units.
    pub container: Option<ContainerInfo>,

    /// VM resource details, for VM-family units.
    pub vm: Option<VmInfo>,
}

/// The sending half of a backend completion channel.
pub type ProvisionEventSender = mpsc::UnboundedSender<ProvisionEvent>;

/// The receiving half of a backend completion channel.
pub type ProvisionEventReceiver = mpsc::UnboundedReceiver<ProvisionEvent>;

//--------------------------------------------------------------------------------------------------
// Traits
//--------------------------------------------------------------------------------------------------

/// The provisioning protocol implemented by each concrete backend.
#[async_trait]
pub trait ProvisioningBackend: Send + Sync {
    /// Triggers creation of one unit and returns promptly. Completion is
    /// delivered later as a [`ProvisionEvent`].
    async fn create_unit(&self, spec: &UnitSpec) -> HackpodResult<UnitHandle>;

    /// Destroys the backend resource of one unit. Must tolerate units that
    /// were never fully created.
    async fn destroy_unit(&self, handle: &UnitHandle) -> HackpodResult<()>;

    /// Reports the current backend-side status of one unit.
    async fn inspect_unit(&self, handle: &UnitHandle) -> HackpodResult<UnitRuntimeStatus>;
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Creates a completion channel shared between backends and the orchestrator.
pub fn provision_channel() -> (ProvisionEventSender, ProvisionEventReceiver) {
    mpsc::unbounded_channel()
}
