use std::fmt::{self, Display};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::HackpodError;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The provider family of a virtual environment unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VeProvider {
    /// A container unit.
    Docker,

    /// A virtual machine unit.
    Vm,
}

/// An immutable description of which virtual environment units an experiment
/// is made of. Owned by an external template library; the orchestrator treats
/// it as read-only input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Template {
    /// The name of the template, unique within the template library.
    pub name: String,

    /// The provider family of every unit described by the template.
    pub provider: VeProvider,
}

/// One virtual environment unit descriptor loaded from a template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateUnit {
    /// The name of the unit within the template.
    pub name: String,

    /// The backend image or reference the unit is created from.
    pub image: String,
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Display for VeProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VeProvider::Docker => write!(f, "docker"),
            VeProvider::Vm => write!(f, "vm"),
        }
    }
}

impl FromStr for VeProvider {
    type Err = HackpodError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "docker" => Ok(VeProvider::Docker),
            "vm" => Ok(VeProvider::Vm),
            other => Err(HackpodError::InvalidProvider(other.to_string())),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
