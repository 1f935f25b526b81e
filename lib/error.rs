use std::{
    error::Error,
    fmt::{self, Display},
};
use thiserror::Error;

use crate::models::{CloudProvider, VeProvider};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The result of a hackpod-related operation.
pub type HackpodResult<T> = Result<T, HackpodError>;

/// An error that occurred during an experiment orchestration operation.
#[derive(Debug, Error)]
pub enum HackpodError {
    /// An I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// An error returned by the experiment store.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// An error that occurred while running database migrations.
    #[error("database migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// An error that occurred while (de)serializing a stored document.
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// An error that can represent any error.
    #[error(transparent)]
    Custom(#[from] AnyError),

    /// An event could not be resolved by name.
    #[error("event with name '{0}' not found")]
    EventNotFound(String),

    /// A template could not be resolved by name.
    #[error("template cannot be found by name '{0}'")]
    TemplateNotFound(String),

    /// An experiment could not be resolved by id.
    #[error("experiment {0} not found")]
    ExperimentNotFound(i64),

    /// A request was rejected because a precondition does not hold.
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    /// No starter is configured for a provider combination.
    #[error("no starter configured for {ve} environments on {cloud}")]
    NoStarterConfigured {
        /// The virtual environment provider family requested by the template.
        ve: VeProvider,
        /// The cloud provider configured for the event.
        cloud: CloudProvider,
    },

    /// Starting an experiment failed and it was rolled back.
    #[error("failed starting experiment: {0}")]
    StartFailed(String),

    /// An unknown experiment status value was read from the store.
    #[error("invalid experiment status: {0}")]
    InvalidExprStatus(String),

    /// An unknown virtual environment status value was read from the store.
    #[error("invalid virtual environment status: {0}")]
    InvalidVeStatus(String),

    /// An unknown provider value was read from the store.
    #[error("invalid provider: {0}")]
    InvalidProvider(String),
}

/// An error that can represent any error.
#[derive(Debug)]
pub struct AnyError {
    error: anyhow::Error,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl HackpodError {
    /// Creates a new `HackpodError` from an arbitrary error.
    pub fn custom(error: impl Into<anyhow::Error>) -> HackpodError {
        HackpodError::Custom(AnyError {
            error: error.into(),
        })
    }

    /// Returns true if this error belongs to the not-found family.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            HackpodError::EventNotFound(_)
                | HackpodError::TemplateNotFound(_)
                | HackpodError::ExperimentNotFound(_)
        )
    }

    /// Returns true if this error belongs to the rejected-precondition family.
    pub fn is_precondition_failed(&self) -> bool {
        matches!(
            self,
            HackpodError::PreconditionFailed(_) | HackpodError::NoStarterConfigured { .. }
        )
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Display for AnyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)
    }
}

impl Error for AnyError {}
