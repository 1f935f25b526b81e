//! Orchestrator configuration types.

use getset::Getters;
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::models::CloudProvider;

use super::DEFAULT_GUACAMOLE_HOST;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The orchestrator configuration.
///
/// Event-level policy (recycle threshold, pool target, sweep cadence) lives on
/// the event itself; this struct only carries deployment-wide settings.
#[derive(Debug, Clone, Serialize, Deserialize, TypedBuilder, PartialEq, Eq, Getters)]
#[getset(get = "pub with_prefix")]
pub struct OrchestratorConfig {
    /// The host serving the remote-desktop gateway, used to build launch URLs.
    #[serde(default = "default_guacamole_host")]
    #[builder(default = DEFAULT_GUACAMOLE_HOST.to_string())]
    guacamole_host: String,

    /// The cloud provider assumed when an experiment is started without an
    /// event (template self-test mode).
    #[serde(default = "default_template_test_provider")]
    #[builder(default = CloudProvider::Hosted)]
    template_test_provider: CloudProvider,
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

fn default_guacamole_host() -> String {
    DEFAULT_GUACAMOLE_HOST.to_string()
}

fn default_template_test_provider() -> CloudProvider {
    CloudProvider::Hosted
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.get_guacamole_host(), DEFAULT_GUACAMOLE_HOST);
        assert_eq!(
            *config.get_template_test_provider(),
            CloudProvider::Hosted
        );
    }

    #[test]
    fn test_config_roundtrip() -> anyhow::Result<()> {
        let config = OrchestratorConfig::builder()
            .guacamole_host("gateway.example.com:8080".to_string())
            .build();

        let serialized = serde_json::to_string(&config)?;
        let deserialized: OrchestratorConfig = serde_json::from_str(&serialized)?;
        assert_eq!(config, deserialized);

        Ok(())
    }
}
