//! Configuration types and policy defaults for the orchestrator.

mod config;
mod defaults;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use config::*;
pub use defaults::*;
