//! SQLite persistence for experiments and their virtual environments.
//!
//! The store's conditional single-row updates are the only concurrency
//! control between the interactive request path and the background sweeps;
//! there is no in-process lock.

mod db;
mod experiment;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use db::*;
pub use experiment::*;
