use std::fmt::{self, Display};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::HackpodError;

use super::VeProvider;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// One sandboxed session, composed of one or more virtual environments.
#[derive(Debug, Clone, PartialEq)]
pub struct Experiment {
    /// The unique id of the experiment.
    pub id: i64,

    /// The lifecycle status of the experiment.
    pub status: ExprStatus,

    /// The owning user. `None` means the experiment is unassigned and
    /// pool-owned, awaiting a claim.
    pub user_id: Option<String>,

    /// The id of the event the experiment was started under. Zero for
    /// template self-test experiments.
    pub event_id: i64,

    /// The name of the event. Empty for template self-test experiments.
    pub event_name: String,

    /// The name of the template the experiment was created from.
    pub template_name: String,

    /// The provider family of the template.
    pub template_provider: VeProvider,

    /// The time the experiment was created.
    pub create_time: DateTime<Utc>,

    /// The time of the last client heartbeat. Initialized to the creation
    /// time, so experiments that never beat age from creation.
    pub last_heart_beat_time: DateTime<Utc>,

    /// The virtual environments owned by the experiment.
    pub virtual_environments: Vec<VirtualEnvironment>,
}

/// The lifecycle status of an experiment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExprStatus {
    /// The experiment document exists but no unit has been driven yet.
    Init,

    /// Units are being provisioned.
    Starting,

    /// Every unit reported running.
    Running,

    /// Every unit reported stopped.
    Stopped,

    /// A unit failed in a way the orchestrator did not anticipate.
    UnexpectedError,
}

/// One unit of compute (a container or a virtual machine) belonging to
/// exactly one experiment.
#[derive(Debug, Clone, PartialEq)]
pub struct VirtualEnvironment {
    /// The globally unique generated name of the unit; also the backend
    /// resource handle.
    pub name: String,

    /// The provider family of the unit.
    pub provider: VeProvider,

    /// The backend image or reference the unit was created from.
    pub image: String,

    /// The status of the unit.
    pub status: VeStatus,

    /// The remote-access descriptor, present once the unit is running.
    pub remote: Option<RemoteAccess>,

    /// Container-specific resource details, present for running containers.
    pub container: Option<ContainerInfo>,

    /// VM-specific resource details, present for running virtual machines.
    pub vm: Option<VmInfo>,
}

/// The status of a virtual environment unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VeStatus {
    /// The unit document exists; backend provisioning is in flight.
    Init,

    /// The unit is running.
    Running,

    /// The unit is stopped.
    Stopped,

    /// The unit failed unexpectedly.
    UnexpectedError,
}

/// The remote-desktop protocol a unit is reachable over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteProvider {
    /// The Guacamole remote-desktop gateway.
    Guacamole,
}

/// The remote-access descriptor of a running unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteAccess {
    /// The remote-desktop protocol provider.
    pub provider: RemoteProvider,

    /// The gateway connection name of the unit.
    pub name: String,

    /// The host the gateway connects to.
    pub hostname: String,

    /// The port the gateway connects to.
    pub port: u16,

    /// The login user of the remote session.
    pub username: String,

    /// The login password of the remote session.
    pub password: String,
}

/// Container-specific resource details of a running unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerInfo {
    /// The public DNS name of the host the container runs on.
    pub public_dns: String,

    /// The port bindings of the container.
    pub port_bindings: Vec<PortBinding>,
}

/// One port binding of a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortBinding {
    /// The name of the binding.
    pub name: String,

    /// Whether the binding is publicly reachable.
    pub is_public: bool,

    /// The public port of the binding.
    pub public_port: u16,

    /// A URL template with `{host}` and `{port}` placeholders, substituted
    /// when assembling public URLs.
    pub url_template: Option<String>,
}

/// VM-specific resource details of a running unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmInfo {
    /// The public IP address of the virtual machine.
    pub public_ip: String,

    /// The network endpoints of the virtual machine.
    pub endpoints: Vec<VmEndpoint>,
}

/// One network endpoint of a virtual machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmEndpoint {
    /// The name of the endpoint.
    pub name: String,

    /// The publicly reachable port.
    pub public_port: u16,

    /// The private port the endpoint is bound to inside the machine.
    pub private_port: u16,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Experiment {
    /// Returns true if any of the experiment's units is container-family.
    ///
    /// The recycle sweep destroys such experiments instead of returning them
    /// to the pool, since containers are cheap to recreate.
    pub fn has_docker_unit(&self) -> bool {
        self.virtual_environments
            .iter()
            .any(|ve| ve.provider == VeProvider::Docker)
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Display for ExprStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExprStatus::Init => write!(f, "init"),
            ExprStatus::Starting => write!(f, "starting"),
            ExprStatus::Running => write!(f, "running"),
            ExprStatus::Stopped => write!(f, "stopped"),
            ExprStatus::UnexpectedError => write!(f, "unexpected_error"),
        }
    }
}

impl FromStr for ExprStatus {
    type Err = HackpodError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "init" => Ok(ExprStatus::Init),
            "starting" => Ok(ExprStatus::Starting),
            "running" => Ok(ExprStatus::Running),
            "stopped" => Ok(ExprStatus::Stopped),
            "unexpected_error" => Ok(ExprStatus::UnexpectedError),
            other => Err(HackpodError::InvalidExprStatus(other.to_string())),
        }
    }
}

impl Display for VeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VeStatus::Init => write!(f, "init"),
            VeStatus::Running => write!(f, "running"),
            VeStatus::Stopped => write!(f, "stopped"),
            VeStatus::UnexpectedError => write!(f, "unexpected_error"),
        }
    }
}

impl FromStr for VeStatus {
    type Err = HackpodError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "init" => Ok(VeStatus::Init),
            "running" => Ok(VeStatus::Running),
            "stopped" => Ok(VeStatus::Stopped),
            "unexpected_error" => Ok(VeStatus::UnexpectedError),
            other => Err(HackpodError::InvalidVeStatus(other.to_string())),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
