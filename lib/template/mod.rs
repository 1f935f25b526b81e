//! Template library interface consumed by the orchestrator.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::models::{Template, TemplateUnit};
use crate::{HackpodError, HackpodResult};

//--------------------------------------------------------------------------------------------------
// Traits
//--------------------------------------------------------------------------------------------------

/// Read access to the template library.
///
/// The concrete template description format is out of scope; the orchestrator
/// only consumes the parsed unit descriptors.
#[async_trait]
pub trait TemplateLibrary: Send + Sync {
    /// Resolves a template by its unique name.
    async fn get_template_by_name(&self, name: &str) -> Option<Template>;

    /// Loads the ordered unit descriptors of a template.
    async fn load_template(&self, template: &Template) -> HackpodResult<Vec<TemplateUnit>>;
}

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// An in-memory [`TemplateLibrary`].
#[derive(Debug, Default)]
pub struct MemoryTemplateLibrary {
    templates: RwLock<HashMap<String, (Template, Vec<TemplateUnit>)>>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl MemoryTemplateLibrary {
    /// Creates an empty library.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a template and its unit descriptors.
    pub async fn insert_template(&self, template: Template, units: Vec<TemplateUnit>) {
        let mut templates = self.templates.write().await;
        templates.insert(template.name.clone(), (template, units));
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl TemplateLibrary for MemoryTemplateLibrary {
    async fn get_template_by_name(&self, name: &str) -> Option<Template> {
        let templates = self.templates.read().await;
        templates.get(name).map(|(template, _)| template.clone())
    }

    async fn load_template(&self, template: &Template) -> HackpodResult<Vec<TemplateUnit>> {
        let templates = self.templates.read().await;
        templates
            .get(&template.name)
            .map(|(_, units)| units.clone())
            .ok_or_else(|| HackpodError::TemplateNotFound(template.name.clone()))
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
