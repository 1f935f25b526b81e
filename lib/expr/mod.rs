//! Experiment lifecycle orchestration.
//!
//! [`ExprManager`] is the policy engine: admission control, status reporting,
//! idle recycling, pre-allocation scheduling and rollback triggering.
//! [`ExprStarter`] implementations drive one experiment's virtual
//! environments for one provider family, selected through the
//! [`StarterRegistry`] by the template's provider crossed with the event's
//! cloud provider.

mod docker;
mod manager;
mod registry;
mod report;
mod starter;
mod vm;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use docker::*;
pub use manager::*;
pub use registry::*;
pub use report::*;
pub use starter::*;
pub use vm::*;
