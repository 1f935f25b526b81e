use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info};

use crate::backend::ProvisioningBackend;
use crate::expr::{ExprStarter, StartContext, StarterCore};
use crate::models::Experiment;
use crate::store::ExperimentStore;
use crate::template::TemplateLibrary;
use crate::{HackpodError, HackpodResult};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Starter for templates backed by containers.
///
/// Container experiments are cheap to create and destroy, so both stopping
/// and rolling back release the backend resources outright.
pub struct DockerExprStarter {
    core: StarterCore,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl DockerExprStarter {
    /// Creates a starter driving containers through the given backend.
    pub fn new(
        store: ExperimentStore,
        templates: Arc<dyn TemplateLibrary>,
        backend: Arc<dyn ProvisioningBackend>,
    ) -> Self {
        Self {
            core: StarterCore::new(store, templates, backend),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl ExprStarter for DockerExprStarter {
    async fn start_expr(&self, ctx: StartContext) -> HackpodResult<i64> {
        let (expr_id, units) = self.core.prepare(&ctx).await?;

        let specs = match self.core.persist_units(expr_id, &ctx, &units).await {
            Ok(specs) => specs,
            Err(e) => {
                error!(
                    "failed to start containers of experiment {}: {}",
                    expr_id, e
                );
                self.core.rollback_partial(expr_id).await;
                return Err(HackpodError::StartFailed(e.to_string()));
            }
        };
        for spec in &specs {
            if let Err(e) = self.core.start_unit(spec).await {
                error!(
                    "failed to start containers of experiment {}: {}",
                    expr_id, e
                );
                self.core.rollback_partial(expr_id).await;
                return Err(HackpodError::StartFailed(e.to_string()));
            }
        }

        info!(
            "experiment {} starting {} container(s)",
            expr_id,
            specs.len()
        );

        Ok(expr_id)
    }

    async fn stop_expr(&self, expr: &Experiment) -> HackpodResult<()> {
        info!("stopping containers of experiment {}", expr.id);
        self.core.teardown(expr).await
    }

    async fn rollback(&self, expr: &Experiment) -> HackpodResult<()> {
        info!("rolling back containers of experiment {}", expr.id);
        self.core.teardown(expr).await
    }
}
