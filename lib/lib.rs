//! `hackpod` orchestrates short-lived sandboxed execution environments ("experiments")
//! for time-boxed events such as hackathons.
//!
//! # Overview
//!
//! An experiment is one user-facing session composed of one or more virtual
//! environments (containers or virtual machines) provisioned through
//! interchangeable backends. hackpod owns the stateful control loop around
//! those backends:
//!
//! - Admission control: at most one live experiment per user per event
//! - Asynchronous provisioning with order-independent status rollup
//! - Warm pools of pre-allocated experiments claimed atomically by users
//! - Idle-timeout reclamation with a cost-aware policy (containers are
//!   destroyed, virtual machines are returned to the pool)
//! - Rollback of partially-created experiments
//!
//! # Architecture
//!
//! - **ExprManager**: the top-level policy engine — admission, status
//!   reporting, recycle and pre-allocation sweeps, rollback triggering
//! - **ExprStarter**: per provider-family strategy driving one experiment's
//!   virtual environments from creation through running/stopped/error
//! - **ProvisioningBackend**: the protocol expected from a concrete backend;
//!   completion is delivered as messages on a channel, never by blocking
//! - **Scheduler**: a timer-driven job runner invoking the periodic sweeps
//!
//! Persistent state lives in SQLite; the claim of a pool-owned experiment is
//! a single conditional update, so racing claimants resolve to one winner.
//!
//! # Modules
//!
//! - [`backend`] - Provisioning backend protocol and completion events
//! - [`config`] - Orchestrator configuration and policy defaults
//! - [`event`] - Event (hackathon) lookups and policy flags
//! - [`expr`] - Experiment lifecycle orchestration
//! - [`models`] - Experiment, virtual environment, event and template types
//! - [`notify`] - Fire-and-forget notification sink
//! - [`scheduler`] - Interval job runner
//! - [`store`] - SQLite persistence for experiments
//! - [`template`] - Template library interface
//! - [`utils`] - Common utilities and helpers

#![warn(missing_docs)]

mod error;

#[cfg(test)]
mod test_utils;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub mod backend;
pub mod config;
pub mod event;
pub mod expr;
pub mod models;
pub mod notify;
pub mod scheduler;
pub mod store;
pub mod template;
pub mod utils;

pub use error::*;
