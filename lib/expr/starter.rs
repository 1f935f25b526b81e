use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::backend::{ProvisioningBackend, UnitHandle, UnitRuntimeStatus, UnitSpec};
use crate::models::{Experiment, ExprStatus, Template, TemplateUnit, VeStatus, VirtualEnvironment};
use crate::store::{ExperimentStore, NewExperiment};
use crate::template::TemplateLibrary;
use crate::utils::unique_ve_name;
use crate::HackpodResult;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The inputs of one experiment start.
#[derive(Debug, Clone)]
pub struct StartContext {
    /// The template to create the experiment from.
    pub template: Template,

    /// The owning user, `None` for the pre-allocation path.
    pub user_id: Option<String>,

    /// The id of the event, zero for template self-tests.
    pub event_id: i64,

    /// The name of the event, empty for template self-tests.
    pub event_name: String,
}

/// The shared mechanics every starter is built on: persisting the experiment,
/// generating unit names, triggering backend creation and tearing down
/// backend resources.
pub(crate) struct StarterCore {
    store: ExperimentStore,
    templates: Arc<dyn TemplateLibrary>,
    backend: Arc<dyn ProvisioningBackend>,
}

//--------------------------------------------------------------------------------------------------
// Traits
//--------------------------------------------------------------------------------------------------

/// A per provider-family strategy driving one experiment's virtual
/// environments from creation through running/stopped/error.
#[async_trait]
pub trait ExprStarter: Send + Sync {
    /// Starts a new experiment asynchronously: the returned experiment is
    /// `starting`; units reach `running` later through provision events.
    async fn start_expr(&self, ctx: StartContext) -> HackpodResult<i64>;

    /// Tears down the backend resources of every unit of the experiment.
    async fn stop_expr(&self, expr: &Experiment) -> HackpodResult<()>;

    /// Cancels an experiment whose start failed, releasing whatever was
    /// created so far. Idempotent against partially-created state.
    async fn rollback(&self, expr: &Experiment) -> HackpodResult<()>;
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl StarterCore {
    pub(crate) fn new(
        store: ExperimentStore,
        templates: Arc<dyn TemplateLibrary>,
        backend: Arc<dyn ProvisioningBackend>,
    ) -> Self {
        Self {
            store,
            templates,
            backend,
        }
    }

    /// Persists the experiment in `init`, loads its template units, then
    /// moves it to `starting`.
    pub(crate) async fn prepare(
        &self,
        ctx: &StartContext,
    ) -> HackpodResult<(i64, Vec<TemplateUnit>)> {
        let expr_id = self
            .store
            .insert_experiment(NewExperiment {
                user_id: ctx.user_id.as_deref(),
                event_id: ctx.event_id,
                event_name: &ctx.event_name,
                template_name: &ctx.template.name,
                template_provider: ctx.template.provider,
            })
            .await?;

        let units = self.templates.load_template(&ctx.template).await?;
        self.store.set_status(expr_id, ExprStatus::Starting).await?;

        Ok((expr_id, units))
    }

    /// Persists one `init` unit row per template unit, generating names.
    ///
    /// Every row is inserted before any backend creation is triggered, so
    /// the status rollup always decides over the complete unit set and an
    /// experiment is never marked running from a partial one.
    pub(crate) async fn persist_units(
        &self,
        expr_id: i64,
        ctx: &StartContext,
        units: &[TemplateUnit],
    ) -> HackpodResult<Vec<UnitSpec>> {
        let mut specs = Vec::with_capacity(units.len());
        for unit in units {
            let name = unique_ve_name(expr_id, &unit.name);
            let ve = VirtualEnvironment {
                name: name.clone(),
                provider: ctx.template.provider,
                image: unit.image.clone(),
                status: VeStatus::Init,
                remote: None,
                container: None,
                vm: None,
            };
            self.store.insert_virtual_environment(expr_id, &ve).await?;
            specs.push(UnitSpec {
                experiment_id: expr_id,
                name,
                image: unit.image.clone(),
                provider: ctx.template.provider,
            });
        }

        Ok(specs)
    }

    /// Triggers the backend creation of one persisted unit. The unit stays
    /// `init` until the backend reports completion.
    pub(crate) async fn start_unit(&self, spec: &UnitSpec) -> HackpodResult<()> {
        debug!(
            "starting unit {} of experiment {}",
            spec.name, spec.experiment_id
        );
        self.backend.create_unit(spec).await?;

        Ok(())
    }

    /// Releases the backend resources of every unit not already stopped.
    ///
    /// Units the backend reports as already gone are skipped, so the routine
    /// tolerates partially-created experiments and repeated invocations.
    pub(crate) async fn teardown(&self, expr: &Experiment) -> HackpodResult<()> {
        for ve in &expr.virtual_environments {
            if ve.status == VeStatus::Stopped {
                continue;
            }

            let handle = UnitHandle {
                name: ve.name.clone(),
            };
            if let Ok(UnitRuntimeStatus::Stopped) = self.backend.inspect_unit(&handle).await {
                debug!("unit {} has no backend resource to release", ve.name);
                continue;
            }
            if let Err(e) = self.backend.destroy_unit(&handle).await {
                warn!("failed to destroy unit {}: {}", ve.name, e);
            }
        }

        Ok(())
    }

    /// Best-effort teardown of an experiment whose start failed mid-way.
    ///
    /// Units that never reached the backend produce no completion messages,
    /// so every unit and the experiment itself are marked stopped here
    /// instead of by the rollup.
    pub(crate) async fn rollback_partial(&self, expr_id: i64) {
        match self.store.get_experiment(expr_id).await {
            Ok(Some(expr)) => {
                if let Err(e) = self.teardown(&expr).await {
                    warn!("rollback of experiment {} failed: {}", expr_id, e);
                }
                for ve in &expr.virtual_environments {
                    if ve.status == VeStatus::Stopped {
                        continue;
                    }
                    if let Err(e) = self
                        .store
                        .set_ve_status(expr_id, &ve.name, VeStatus::Stopped)
                        .await
                    {
                        warn!("rollback of experiment {} failed: {}", expr_id, e);
                    }
                }
                if let Err(e) = self.store.set_status(expr_id, ExprStatus::Stopped).await {
                    warn!("rollback of experiment {} failed: {}", expr_id, e);
                }
            }
            Ok(None) => warn!("rollback failed, experiment {} not found", expr_id),
            Err(e) => warn!("rollback of experiment {} failed: {}", expr_id, e),
        }
    }
}
