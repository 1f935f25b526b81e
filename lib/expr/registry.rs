use std::collections::HashMap;
use std::sync::Arc;

use crate::expr::ExprStarter;
use crate::models::{CloudProvider, VeProvider};
use crate::{HackpodError, HackpodResult};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Maps the template's provider family crossed with the event's cloud
/// provider to the starter strategy that drives it.
///
/// The mapping is fixed at construction time; resolving an unregistered
/// combination is a configuration error surfaced to the caller.
#[derive(Default)]
pub struct StarterRegistry {
    starters: HashMap<(VeProvider, CloudProvider), Arc<dyn ExprStarter>>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl StarterRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a starter for a provider combination, replacing any
    /// previous registration.
    pub fn register(
        mut self,
        ve: VeProvider,
        cloud: CloudProvider,
        starter: Arc<dyn ExprStarter>,
    ) -> Self {
        self.starters.insert((ve, cloud), starter);
        self
    }

    /// Resolves the starter for a provider combination.
    pub fn resolve(
        &self,
        ve: VeProvider,
        cloud: CloudProvider,
    ) -> HackpodResult<Arc<dyn ExprStarter>> {
        self.starters
            .get(&(ve, cloud))
            .cloned()
            .ok_or(HackpodError::NoStarterConfigured { ve, cloud })
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
