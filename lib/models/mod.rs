//! Core domain types: experiments, virtual environments, events and templates.

mod event;
mod experiment;
mod template;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use event::*;
pub use experiment::*;
pub use template::*;
