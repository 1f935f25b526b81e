use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use typed_builder::TypedBuilder;

use crate::backend::{ProvisionEvent, ProvisionEventReceiver, ProvisionOutcome};
use crate::config::OrchestratorConfig;
use crate::event::EventStore;
use crate::expr::{build_status_report, ExprStarter, StartContext, StarterRegistry, StatusReport};
use crate::models::{CloudProvider, Event, Experiment, ExprStatus, Template, VeProvider, VeStatus};
use crate::notify::{Notice, NoticeKind, Notifier};
use crate::scheduler::Scheduler;
use crate::store::ExperimentStore;
use crate::template::TemplateLibrary;
use crate::{HackpodError, HackpodResult};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The experiment orchestration policy engine.
///
/// Owns admission control, claim-before-create, the provision event rollup,
/// status reporting and the background recycle/pre-allocation sweeps. The
/// actual driving of virtual environments is delegated to the starter
/// resolved from the [`StarterRegistry`].
#[derive(TypedBuilder)]
pub struct ExprManager {
    store: ExperimentStore,
    events: Arc<dyn EventStore>,
    templates: Arc<dyn TemplateLibrary>,
    starters: StarterRegistry,
    notifier: Arc<dyn Notifier>,
    #[builder(default)]
    config: OrchestratorConfig,
}

/// What one template contributed to a pre-allocation sweep.
enum SweepAction {
    /// A pool experiment was created; the sweep moves no further this cycle.
    Started,

    /// The whole event's sweep should wait for in-flight starts to settle.
    SkipCycle,

    /// Nothing to do for this template.
    Idle,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ExprManager {
    /// Starts (or returns) an experiment for a user.
    ///
    /// Admission control grants each user at most one active experiment per
    /// event (per template for event administrators); an existing one is
    /// returned as-is. Otherwise a pre-allocated pool experiment is claimed
    /// if available, and only then is a fresh one started.
    ///
    /// Passing no event runs the template in self-test mode: admission and
    /// the pool are bypassed and the configured self-test cloud provider is
    /// assumed.
    pub async fn start_expr(
        &self,
        user_id: Option<&str>,
        template_name: &str,
        event_name: Option<&str>,
    ) -> HackpodResult<StatusReport> {
        let event = match event_name {
            Some(name) => Some(self.verify_event(name).await?),
            None => None,
        };
        let template = self.verify_template(template_name, event.as_ref()).await?;

        if let (Some(user_id), Some(event)) = (user_id, &event) {
            if let Some(id) = self.check_expr_status(user_id, event, &template).await? {
                info!(
                    "user {} gets experiment {} under event '{}'",
                    user_id, id, event.name
                );
                return self.get_expr_status(id).await;
            }
        }

        let id = self
            .start_new_expr(user_id, &template, event.as_ref())
            .await?;

        self.get_expr_status(id).await
    }

    /// Returns the client-facing view of an experiment.
    pub async fn get_expr_status(&self, id: i64) -> HackpodResult<StatusReport> {
        let expr = self
            .store
            .get_experiment(id)
            .await?
            .ok_or(HackpodError::ExperimentNotFound(id))?;

        Ok(build_status_report(&expr, self.config.get_guacamole_host()))
    }

    /// Records a client heartbeat. Returns false when the experiment is
    /// absent or not running, which tells the client to stop beating.
    pub async fn heart_beat(&self, id: i64) -> HackpodResult<bool> {
        self.store.update_heartbeat(id, Utc::now()).await
    }

    /// Stops a running experiment and releases its backend resources.
    /// Stopping an absent or non-running experiment is a no-op; experiments
    /// stuck mid-start are handled by rollback, not by stopping.
    pub async fn stop_expr(&self, id: i64) -> HackpodResult<()> {
        let Some(expr) = self.store.get_experiment(id).await? else {
            return Ok(());
        };
        if expr.status != ExprStatus::Running {
            return Ok(());
        }

        let starter = self.starter_for_experiment(&expr).await?;
        starter.stop_expr(&expr).await?;
        self.store.set_status(id, ExprStatus::Stopped).await?;
        info!("experiment {} stopped", id);

        Ok(())
    }

    /// Rolls an experiment back after a provisioning failure, best effort.
    /// Missing experiments and teardown errors are logged, not surfaced.
    pub async fn roll_back(&self, id: i64) {
        let expr = match self.store.get_experiment(id).await {
            Ok(Some(expr)) => expr,
            Ok(None) => {
                warn!("cannot roll back experiment {}, not found", id);
                return;
            }
            Err(e) => {
                warn!("cannot roll back experiment {}: {}", id, e);
                return;
            }
        };

        let starter = match self.starter_for_experiment(&expr).await {
            Ok(starter) => starter,
            Err(e) => {
                warn!("cannot roll back experiment {}: {}", id, e);
                return;
            }
        };

        if let Err(e) = starter.rollback(&expr).await {
            warn!("rollback of experiment {} failed: {}", id, e);
        }
    }

    /// Applies one backend completion message.
    ///
    /// The rollup re-reads the full current unit set from the store, so the
    /// experiment status it derives is independent of the order messages
    /// arrive in.
    pub async fn handle_provision_event(&self, event: ProvisionEvent) -> HackpodResult<()> {
        let id = event.experiment_id;
        let name = event.virtual_environment_name;

        match event.outcome {
            ProvisionOutcome::Running(unit) => {
                self.store.set_ve_provisioned(id, &name, &unit).await?;
                let statuses = self.store.ve_statuses(id).await?;
                if !statuses.is_empty() && statuses.iter().all(|s| *s == VeStatus::Running) {
                    self.store.set_status(id, ExprStatus::Running).await?;
                    self.on_expr_started(id).await?;
                }
            }
            ProvisionOutcome::Stopped => {
                self.store.set_ve_status(id, &name, VeStatus::Stopped).await?;
                self.rollup_stopped(id).await?;
            }
            ProvisionOutcome::Failed { error } => {
                error!(
                    "unit {} of experiment {} failed to provision: {}",
                    name, id, error
                );
                // The failed unit has no backend resource left to release.
                self.store.set_ve_status(id, &name, VeStatus::Stopped).await?;
                self.roll_back(id).await;
                self.rollup_stopped(id).await?;
            }
            ProvisionOutcome::UnexpectedError { error } => {
                warn!(
                    "unit {} of experiment {} hit an unexpected error: {}",
                    name, id, error
                );
                // Only the unit is marked; the experiment keeps its status so
                // it can still be stopped and recycled later.
                self.store
                    .set_ve_status(id, &name, VeStatus::UnexpectedError)
                    .await?;
            }
        }

        Ok(())
    }

    /// Spawns the task consuming backend completion messages. The task ends
    /// when every sender half of the channel is dropped.
    pub fn spawn_event_loop(self: &Arc<Self>, mut rx: ProvisionEventReceiver) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if let Err(e) = manager.handle_provision_event(event).await {
                    error!("failed to apply provision event: {}", e);
                }
            }
        })
    }

    /// Reclaims idle experiments across every recycle-enabled event.
    ///
    /// Container experiments are destroyed; VM experiments are returned to
    /// the warm pool unassigned. A failing candidate never blocks the rest
    /// of the sweep.
    pub async fn recycle_expr(&self) {
        for event in self.events.list_events().await {
            if !event.config.recycle_enabled {
                continue;
            }

            let cutoff = Utc::now() - ChronoDuration::minutes(event.recycle_minutes());
            let candidates = match self.store.list_recyclable(event.id, cutoff).await {
                Ok(candidates) => candidates,
                Err(e) => {
                    warn!("recycle sweep of event {} failed: {}", event.id, e);
                    continue;
                }
            };

            for id in candidates {
                if let Err(e) = self.recycle_one(id).await {
                    warn!("failed to recycle experiment {}: {}", id, e);
                }
            }
        }
    }

    /// Tops up the warm pool of one event.
    ///
    /// At most one experiment is created per sweep so the pool grows
    /// gradually; VM templates additionally hold the whole event's sweep
    /// while pool starts are still in flight.
    pub async fn pre_allocate_expr(&self, event_id: i64) {
        let Some(event) = self.events.get_event_by_id(event_id).await else {
            warn!("pre-allocation sweep skipped, event {} not found", event_id);
            return;
        };
        if !event.config.pre_allocate_enabled {
            return;
        }

        for template_name in &event.templates {
            match self.pre_allocate_template(&event, template_name).await {
                Ok(SweepAction::Started) => break,
                Ok(SweepAction::SkipCycle) => return,
                Ok(SweepAction::Idle) => {}
                Err(e) => {
                    warn!(
                        "pre-allocation of template '{}' under event {} failed: {}",
                        template_name, event.id, e
                    );
                }
            }
        }
    }

    /// Aligns the scheduler with the current event set: one pre-allocation
    /// interval job per enabled event, removed once the event disables
    /// pre-allocation.
    pub async fn check_events_for_pre_allocate(self: &Arc<Self>, scheduler: &Scheduler) {
        for event in self.events.list_events().await {
            let job_id = format!("pre_allocate_expr_{}", event.id);

            if !event.config.pre_allocate_enabled {
                scheduler.remove_job(&job_id);
                continue;
            }
            if scheduler.has_job(&job_id) {
                continue;
            }

            let period = Duration::from_secs(event.pre_allocate_interval_seconds().max(1) as u64);
            let manager = Arc::clone(self);
            let event_id = event.id;
            scheduler.add_interval(&job_id, period, move || {
                let manager = Arc::clone(&manager);
                async move { manager.pre_allocate_expr(event_id).await }
            });
        }
    }

    async fn verify_event(&self, name: &str) -> HackpodResult<Event> {
        let event = self
            .events
            .get_event_by_name(name)
            .await
            .ok_or_else(|| HackpodError::EventNotFound(name.to_string()))?;

        if event.config.cloud_provider.is_none() {
            return Err(HackpodError::PreconditionFailed(format!(
                "event '{}' has no cloud resource configured",
                event.name
            )));
        }
        if event.has_ended(Utc::now()) {
            return Err(HackpodError::PreconditionFailed(format!(
                "event '{}' has ended",
                event.name
            )));
        }

        Ok(event)
    }

    async fn verify_template(
        &self,
        name: &str,
        event: Option<&Event>,
    ) -> HackpodResult<Template> {
        let template = self
            .templates
            .get_template_by_name(name)
            .await
            .ok_or_else(|| HackpodError::TemplateNotFound(name.to_string()))?;

        if let Some(event) = event {
            if !event.templates.iter().any(|t| t == name) {
                return Err(HackpodError::PreconditionFailed(format!(
                    "template '{}' does not belong to event '{}'",
                    name, event.name
                )));
            }
        }

        Ok(template)
    }

    /// Admission control. Returns the experiment the user should be handed
    /// instead of starting a fresh one, if any: their already-active one
    /// first, then a claimed pool experiment.
    async fn check_expr_status(
        &self,
        user_id: &str,
        event: &Event,
        template: &Template,
    ) -> HackpodResult<Option<i64>> {
        // Administrators test templates, so their one-active-experiment
        // limit is per template rather than per event.
        let template_filter = if self.events.is_admin(event.id, user_id).await {
            Some(template.name.as_str())
        } else {
            None
        };

        if let Some(id) = self
            .store
            .find_active_for_user(event.id, user_id, template_filter)
            .await?
        {
            return Ok(Some(id));
        }

        if let Some(id) = self
            .store
            .claim_pooled(event.id, &template.name, user_id)
            .await?
        {
            info!("user {} claimed pre-allocated experiment {}", user_id, id);
            return Ok(Some(id));
        }

        Ok(None)
    }

    async fn start_new_expr(
        &self,
        user_id: Option<&str>,
        template: &Template,
        event: Option<&Event>,
    ) -> HackpodResult<i64> {
        let cloud = event
            .and_then(|e| e.config.cloud_provider)
            .unwrap_or(*self.config.get_template_test_provider());
        let starter = self.starters.resolve(template.provider, cloud)?;

        let (event_id, event_name) = match event {
            Some(event) => (event.id, event.name.clone()),
            None => (0, String::new()),
        };

        starter
            .start_expr(StartContext {
                template: template.clone(),
                user_id: user_id.map(str::to_string),
                event_id,
                event_name,
            })
            .await
    }

    async fn starter_for_experiment(
        &self,
        expr: &Experiment,
    ) -> HackpodResult<Arc<dyn ExprStarter>> {
        let cloud = if expr.event_name.is_empty() {
            *self.config.get_template_test_provider()
        } else {
            let event = self
                .events
                .get_event_by_id(expr.event_id)
                .await
                .ok_or_else(|| HackpodError::EventNotFound(expr.event_name.clone()))?;
            event.config.cloud_provider.ok_or_else(|| {
                HackpodError::PreconditionFailed(format!(
                    "event '{}' has no cloud resource configured",
                    event.name
                ))
            })?
        };

        self.starters.resolve(expr.template_provider, cloud)
    }

    async fn on_expr_started(&self, id: i64) -> HackpodResult<()> {
        let Some(expr) = self.store.get_experiment(id).await? else {
            return Ok(());
        };

        info!("experiment {} is running", id);
        self.notifier.notify(Notice {
            kind: NoticeKind::ExprJoin,
            event_id: expr.event_id,
            user_id: expr.user_id,
        });

        Ok(())
    }

    async fn rollup_stopped(&self, id: i64) -> HackpodResult<()> {
        let statuses = self.store.ve_statuses(id).await?;
        if !statuses.is_empty() && statuses.iter().all(|s| *s == VeStatus::Stopped) {
            self.store.set_status(id, ExprStatus::Stopped).await?;
        }

        Ok(())
    }

    async fn recycle_one(&self, id: i64) -> HackpodResult<()> {
        let Some(expr) = self.store.get_experiment(id).await? else {
            return Ok(());
        };

        if expr.has_docker_unit() {
            // Containers are cheap to recreate; reclaim the resources.
            info!("recycling idle experiment {}", id);
            self.stop_expr(id).await
        } else {
            // Machines are slow to provision; return them to the pool.
            info!("returning idle experiment {} to the pool", id);
            self.store.unassign_user(id).await
        }
    }

    async fn pre_allocate_template(
        &self,
        event: &Event,
        template_name: &str,
    ) -> HackpodResult<SweepAction> {
        let Some(template) = self.templates.get_template_by_name(template_name).await else {
            warn!(
                "pre-allocation skipped unknown template '{}' of event {}",
                template_name, event.id
            );
            return Ok(SweepAction::Idle);
        };

        let pooled = self.store.count_pooled(event.id, template_name).await?;
        let target = event.pre_allocate_number();
        if pooled >= target {
            return Ok(SweepAction::Idle);
        }

        match template.provider {
            VeProvider::Vm => {
                // Machines provision slowly; let in-flight pool starts
                // settle before creating more anywhere in this event.
                if self
                    .store
                    .count_pooled_starting(event.id, template_name)
                    .await?
                    > 0
                {
                    return Ok(SweepAction::SkipCycle);
                }
            }
            VeProvider::Docker => {
                // A container PaaS keeps its own warm pool.
                if event.config.cloud_provider == Some(CloudProvider::Paas) {
                    return Ok(SweepAction::Idle);
                }
            }
        }

        info!(
            "pre-allocating experiment of template '{}' for event {} ({}/{})",
            template_name, event.id, pooled, target
        );
        self.start_expr(None, template_name, Some(&event.name))
            .await?;

        Ok(SweepAction::Started)
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use chrono::Duration as ChronoDuration;
    use chrono::Utc;

    use super::*;
    use crate::test_utils::{hosted_event, TestHarness};

    #[test_log::test(tokio::test)]
    async fn test_start_expr_unknown_event() {
        let harness = TestHarness::new(true).await;
        harness.seed_docker_template("web", &["app"]).await;

        let err = harness
            .manager
            .start_expr(Some("alice"), "web", Some("ghost-hack"))
            .await
            .unwrap_err();

        assert!(matches!(err, HackpodError::EventNotFound(_)));
    }

    #[test_log::test(tokio::test)]
    async fn test_start_expr_event_without_cloud() {
        let harness = TestHarness::new(true).await;
        let mut event = hosted_event(1, "spring-hack", &["web"]);
        event.config.cloud_provider = None;
        harness.events.insert_event(event).await;
        harness.seed_docker_template("web", &["app"]).await;

        let err = harness
            .manager
            .start_expr(Some("alice"), "web", Some("spring-hack"))
            .await
            .unwrap_err();

        assert!(err.is_precondition_failed());
    }

    #[test_log::test(tokio::test)]
    async fn test_start_expr_ended_event() {
        let harness = TestHarness::new(true).await;
        let mut event = hosted_event(1, "spring-hack", &["web"]);
        event.event_end_time = Utc::now() - ChronoDuration::hours(1);
        harness.events.insert_event(event).await;
        harness.seed_docker_template("web", &["app"]).await;

        let err = harness
            .manager
            .start_expr(Some("alice"), "web", Some("spring-hack"))
            .await
            .unwrap_err();

        assert!(err.is_precondition_failed());
    }

    #[test_log::test(tokio::test)]
    async fn test_start_expr_unknown_template() {
        let harness = TestHarness::new(true).await;
        harness
            .events
            .insert_event(hosted_event(1, "spring-hack", &["web"]))
            .await;

        let err = harness
            .manager
            .start_expr(Some("alice"), "web", Some("spring-hack"))
            .await
            .unwrap_err();

        assert!(matches!(err, HackpodError::TemplateNotFound(_)));
    }

    #[test_log::test(tokio::test)]
    async fn test_start_expr_template_outside_event() {
        let harness = TestHarness::new(true).await;
        harness
            .events
            .insert_event(hosted_event(1, "spring-hack", &["web"]))
            .await;
        harness.seed_docker_template("db", &["postgres"]).await;

        let err = harness
            .manager
            .start_expr(Some("alice"), "db", Some("spring-hack"))
            .await
            .unwrap_err();

        assert!(err.is_precondition_failed());
    }

    #[test_log::test(tokio::test)]
    async fn test_start_expr_reaches_running() -> HackpodResult<()> {
        let mut harness = TestHarness::new(true).await;
        harness
            .events
            .insert_event(hosted_event(1, "spring-hack", &["web"]))
            .await;
        harness.seed_docker_template("web", &["app", "db"]).await;

        let report = harness
            .manager
            .start_expr(Some("alice"), "web", Some("spring-hack"))
            .await?;
        assert_eq!(report.status, ExprStatus::Starting);
        assert!(report.remote_servers.is_none());

        harness.drain_provision_events().await;

        let report = harness.manager.get_expr_status(report.expr_id).await?;
        assert_eq!(report.status, ExprStatus::Running);
        assert_eq!(report.event_name, "spring-hack");
        assert_eq!(report.remote_servers.as_ref().map(Vec::len), Some(2));
        assert!(report.public_urls.is_some());

        let notices = harness.notifier.notices.lock().unwrap();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].event_id, 1);
        assert_eq!(notices[0].user_id.as_deref(), Some("alice"));

        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_rollup_is_order_independent() -> HackpodResult<()> {
        let mut harness = TestHarness::new(true).await;
        harness
            .events
            .insert_event(hosted_event(1, "spring-hack", &["web"]))
            .await;
        harness.seed_docker_template("web", &["app", "db"]).await;

        let report = harness
            .manager
            .start_expr(Some("alice"), "web", Some("spring-hack"))
            .await?;

        // Replay the completion messages in reverse arrival order.
        let mut queued: Vec<ProvisionEvent> = Vec::new();
        while let Ok(event) = harness.rx.try_recv() {
            queued.push(event);
        }
        assert_eq!(queued.len(), 2);
        queued.reverse();

        harness
            .manager
            .handle_provision_event(queued.remove(0))
            .await?;
        let mid = harness.manager.get_expr_status(report.expr_id).await?;
        assert_eq!(mid.status, ExprStatus::Starting);

        harness
            .manager
            .handle_provision_event(queued.remove(0))
            .await?;
        let done = harness.manager.get_expr_status(report.expr_id).await?;
        assert_eq!(done.status, ExprStatus::Running);

        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_user_gets_existing_experiment() -> HackpodResult<()> {
        let harness = TestHarness::new(true).await;
        harness
            .events
            .insert_event(hosted_event(1, "spring-hack", &["web", "db"]))
            .await;
        harness.seed_docker_template("web", &["app"]).await;
        harness.seed_docker_template("db", &["postgres"]).await;

        let first = harness
            .manager
            .start_expr(Some("alice"), "web", Some("spring-hack"))
            .await?;
        let created = harness.backend.created_count();

        // Same user, same event: handed the experiment they already have,
        // even for a different template.
        let second = harness
            .manager
            .start_expr(Some("alice"), "db", Some("spring-hack"))
            .await?;
        assert_eq!(second.expr_id, first.expr_id);
        assert_eq!(harness.backend.created_count(), created);

        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_admin_admission_is_per_template() -> HackpodResult<()> {
        let harness = TestHarness::new(true).await;
        harness
            .events
            .insert_event(hosted_event(1, "spring-hack", &["web", "db"]))
            .await;
        harness.events.add_admin(1, "alice").await;
        harness.seed_docker_template("web", &["app"]).await;
        harness.seed_docker_template("db", &["postgres"]).await;

        let web = harness
            .manager
            .start_expr(Some("alice"), "web", Some("spring-hack"))
            .await?;
        let db = harness
            .manager
            .start_expr(Some("alice"), "db", Some("spring-hack"))
            .await?;
        assert_ne!(web.expr_id, db.expr_id);

        let web_again = harness
            .manager
            .start_expr(Some("alice"), "web", Some("spring-hack"))
            .await?;
        assert_eq!(web_again.expr_id, web.expr_id);

        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_claim_pooled_before_fresh_start() -> HackpodResult<()> {
        let mut harness = TestHarness::new(true).await;
        harness
            .events
            .insert_event(hosted_event(1, "spring-hack", &["web"]))
            .await;
        harness.seed_docker_template("web", &["app"]).await;

        // A pool-owned experiment, fully running.
        let pooled = harness
            .manager
            .start_expr(None, "web", Some("spring-hack"))
            .await?;
        harness.drain_provision_events().await;

        let created = harness.backend.created_count();
        let claimed = harness
            .manager
            .start_expr(Some("alice"), "web", Some("spring-hack"))
            .await?;

        assert_eq!(claimed.expr_id, pooled.expr_id);
        assert_eq!(claimed.status, ExprStatus::Running);
        assert_eq!(harness.backend.created_count(), created);

        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_stop_expr_is_idempotent() -> HackpodResult<()> {
        let mut harness = TestHarness::new(true).await;
        harness
            .events
            .insert_event(hosted_event(1, "spring-hack", &["web"]))
            .await;
        harness.seed_docker_template("web", &["app"]).await;

        let report = harness
            .manager
            .start_expr(Some("alice"), "web", Some("spring-hack"))
            .await?;
        harness.drain_provision_events().await;

        harness.manager.stop_expr(report.expr_id).await?;
        let destroyed = harness.backend.destroyed_count();
        assert_eq!(destroyed, 1);

        let report = harness.manager.get_expr_status(report.expr_id).await?;
        assert_eq!(report.status, ExprStatus::Stopped);

        // Stopping again must not touch the backend.
        harness.manager.stop_expr(report.expr_id).await?;
        assert_eq!(harness.backend.destroyed_count(), destroyed);

        // Stopping an unknown experiment is a no-op.
        harness.manager.stop_expr(report.expr_id + 100).await?;

        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_heart_beat_only_for_running() -> HackpodResult<()> {
        let mut harness = TestHarness::new(true).await;
        harness
            .events
            .insert_event(hosted_event(1, "spring-hack", &["web"]))
            .await;
        harness.seed_docker_template("web", &["app"]).await;

        let report = harness
            .manager
            .start_expr(Some("alice"), "web", Some("spring-hack"))
            .await?;
        assert!(!harness.manager.heart_beat(report.expr_id).await?);

        harness.drain_provision_events().await;
        assert!(harness.manager.heart_beat(report.expr_id).await?);
        assert!(!harness.manager.heart_beat(report.expr_id + 100).await?);

        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_get_expr_status_unknown_experiment() {
        let harness = TestHarness::new(true).await;

        let err = harness.manager.get_expr_status(42).await.unwrap_err();
        assert!(matches!(err, HackpodError::ExperimentNotFound(42)));
    }

    #[test_log::test(tokio::test)]
    async fn test_start_failure_rolls_back_created_units() -> HackpodResult<()> {
        let mut harness = TestHarness::new(true).await;
        harness
            .events
            .insert_event(hosted_event(1, "spring-hack", &["web"]))
            .await;
        harness.seed_docker_template("web", &["app", "db"]).await;
        harness.backend.fail_units_containing("db");

        let err = harness
            .manager
            .start_expr(Some("alice"), "web", Some("spring-hack"))
            .await
            .unwrap_err();
        assert!(matches!(err, HackpodError::StartFailed(_)));

        // Only the unit that was actually created gets destroyed.
        let created = harness.backend.created.lock().unwrap().clone();
        assert_eq!(created.len(), 1);
        let destroyed = harness.backend.destroyed.lock().unwrap().clone();
        assert_eq!(destroyed, vec![created[0].name.clone()]);

        // Rollback leaves a consistent stopped state: the experiment and
        // every unit row, including the one that never reached the backend.
        let expr = harness
            .store
            .get_experiment(created[0].experiment_id)
            .await?
            .expect("experiment missing");
        assert_eq!(expr.status, ExprStatus::Stopped);
        assert_eq!(expr.virtual_environments.len(), 2);
        assert!(expr
            .virtual_environments
            .iter()
            .all(|ve| ve.status == VeStatus::Stopped));

        harness.drain_provision_events().await;
        let report = harness.manager.get_expr_status(created[0].experiment_id).await?;
        assert_eq!(report.status, ExprStatus::Stopped);

        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_all_units_persisted_before_any_creation() -> HackpodResult<()> {
        let harness = TestHarness::new(true).await;
        harness
            .events
            .insert_event(hosted_event(1, "spring-hack", &["web"]))
            .await;
        harness.seed_docker_template("web", &["app", "db"]).await;
        harness.backend.fail_units_containing("app");

        let err = harness
            .manager
            .start_expr(Some("alice"), "web", Some("spring-hack"))
            .await
            .unwrap_err();
        assert!(matches!(err, HackpodError::StartFailed(_)));
        assert_eq!(harness.backend.created_count(), 0);

        // The first creation failed, yet the sibling's row already exists:
        // unit rows land in the store before the backend sees any of them.
        let expr = harness
            .store
            .get_experiment(1)
            .await?
            .expect("experiment missing");
        assert_eq!(expr.virtual_environments.len(), 2);
        assert_eq!(expr.status, ExprStatus::Stopped);
        assert_eq!(harness.backend.destroyed_count(), 0);

        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_provision_failure_triggers_rollback() -> HackpodResult<()> {
        let mut harness = TestHarness::new(false).await;
        harness
            .events
            .insert_event(hosted_event(1, "spring-hack", &["web"]))
            .await;
        harness.seed_docker_template("web", &["app", "db"]).await;

        let report = harness
            .manager
            .start_expr(Some("alice"), "web", Some("spring-hack"))
            .await?;

        let created = harness.backend.created.lock().unwrap().clone();
        assert_eq!(created.len(), 2);

        harness
            .manager
            .handle_provision_event(ProvisionEvent {
                experiment_id: report.expr_id,
                virtual_environment_name: created[0].name.clone(),
                outcome: crate::backend::ProvisionOutcome::Failed {
                    error: "image pull failed".to_string(),
                },
            })
            .await?;

        // The sibling was torn down by the rollback.
        let destroyed = harness.backend.destroyed.lock().unwrap().clone();
        assert_eq!(destroyed, vec![created[1].name.clone()]);

        harness.drain_provision_events().await;
        let report = harness.manager.get_expr_status(report.expr_id).await?;
        assert_eq!(report.status, ExprStatus::Stopped);

        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_unexpected_error_marks_unit_not_experiment() -> HackpodResult<()> {
        let mut harness = TestHarness::new(true).await;
        harness
            .events
            .insert_event(hosted_event(1, "spring-hack", &["web"]))
            .await;
        harness.seed_docker_template("web", &["app", "db"]).await;

        let report = harness
            .manager
            .start_expr(Some("alice"), "web", Some("spring-hack"))
            .await?;
        harness.drain_provision_events().await;

        let created = harness.backend.created.lock().unwrap().clone();
        harness
            .manager
            .handle_provision_event(ProvisionEvent {
                experiment_id: report.expr_id,
                virtual_environment_name: created[0].name.clone(),
                outcome: ProvisionOutcome::UnexpectedError {
                    error: "host unreachable".to_string(),
                },
            })
            .await?;

        // The failure is confined to the unit; siblings are left alone and
        // the experiment stays stoppable.
        let expr = harness
            .store
            .get_experiment(report.expr_id)
            .await?
            .expect("experiment missing");
        assert_eq!(expr.status, ExprStatus::Running);
        assert_eq!(
            expr.virtual_environments[0].status,
            VeStatus::UnexpectedError
        );
        assert_eq!(harness.backend.destroyed_count(), 0);

        harness.manager.stop_expr(report.expr_id).await?;
        assert_eq!(harness.backend.destroyed_count(), 2);

        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_recycle_destroys_idle_docker_experiment() -> HackpodResult<()> {
        let mut harness = TestHarness::new(true).await;
        let mut event = hosted_event(1, "spring-hack", &["web"]);
        event.config.recycle_enabled = true;
        harness.events.insert_event(event).await;
        harness.seed_docker_template("web", &["app"]).await;

        let report = harness
            .manager
            .start_expr(Some("alice"), "web", Some("spring-hack"))
            .await?;
        harness.drain_provision_events().await;

        harness
            .store
            .backdate_heart_beat(report.expr_id, Utc::now() - ChronoDuration::minutes(61))
            .await?;

        harness.manager.recycle_expr().await;

        assert_eq!(harness.backend.destroyed_count(), 1);
        let report = harness.manager.get_expr_status(report.expr_id).await?;
        assert_eq!(report.status, ExprStatus::Stopped);

        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_recycle_returns_idle_vm_to_pool() -> HackpodResult<()> {
        let mut harness = TestHarness::new(true).await;
        let mut event = hosted_event(1, "spring-hack", &["box"]);
        event.config.recycle_enabled = true;
        event.config.recycle_minutes = Some(30);
        harness.events.insert_event(event).await;
        harness.seed_vm_template("box", &["machine"]).await;

        let report = harness
            .manager
            .start_expr(Some("alice"), "box", Some("spring-hack"))
            .await?;
        harness.drain_provision_events().await;

        harness
            .store
            .backdate_heart_beat(report.expr_id, Utc::now() - ChronoDuration::minutes(31))
            .await?;

        harness.manager.recycle_expr().await;

        // The machine survives; only the assignment is dropped.
        assert_eq!(harness.backend.destroyed_count(), 0);
        let expr = harness
            .store
            .get_experiment(report.expr_id)
            .await?
            .expect("experiment missing");
        assert_eq!(expr.status, ExprStatus::Running);
        assert_eq!(expr.user_id, None);

        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_recycle_leaves_fresh_experiments_alone() -> HackpodResult<()> {
        let mut harness = TestHarness::new(true).await;
        let mut event = hosted_event(1, "spring-hack", &["web"]);
        event.config.recycle_enabled = true;
        harness.events.insert_event(event).await;
        harness.seed_docker_template("web", &["app"]).await;

        let report = harness
            .manager
            .start_expr(Some("alice"), "web", Some("spring-hack"))
            .await?;
        harness.drain_provision_events().await;

        harness.manager.recycle_expr().await;

        assert_eq!(harness.backend.destroyed_count(), 0);
        let report = harness.manager.get_expr_status(report.expr_id).await?;
        assert_eq!(report.status, ExprStatus::Running);

        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_pre_allocate_fills_pool_to_target() -> HackpodResult<()> {
        let mut harness = TestHarness::new(true).await;
        let mut event = hosted_event(1, "spring-hack", &["web"]);
        event.config.pre_allocate_enabled = true;
        // No configured target: the default of one warm experiment applies.
        harness.events.insert_event(event).await;
        harness.seed_docker_template("web", &["app"]).await;

        harness.manager.pre_allocate_expr(1).await;
        harness.drain_provision_events().await;
        assert_eq!(harness.backend.created_count(), 1);
        assert_eq!(harness.store.count_pooled(1, "web").await?, 1);

        // At target: nothing new.
        harness.manager.pre_allocate_expr(1).await;
        assert_eq!(harness.backend.created_count(), 1);

        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_pre_allocate_creates_one_per_sweep() -> HackpodResult<()> {
        let harness = TestHarness::new(true).await;
        let mut event = hosted_event(1, "spring-hack", &["web", "db"]);
        event.config.pre_allocate_enabled = true;
        harness.events.insert_event(event).await;
        harness.seed_docker_template("web", &["app"]).await;
        harness.seed_docker_template("db", &["postgres"]).await;

        // Both templates are below target, but a sweep creates only one.
        harness.manager.pre_allocate_expr(1).await;
        assert_eq!(harness.backend.created_count(), 1);

        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_pre_allocate_vm_waits_for_starting_pool() -> HackpodResult<()> {
        let harness = TestHarness::new(false).await;
        let mut event = hosted_event(1, "spring-hack", &["box"]);
        event.config.pre_allocate_enabled = true;
        event.config.pre_allocate_number = Some(2);
        harness.events.insert_event(event).await;
        harness.seed_vm_template("box", &["machine"]).await;

        harness.manager.pre_allocate_expr(1).await;
        assert_eq!(harness.backend.created_count(), 1);

        // The pool machine is still starting; the sweep holds.
        harness.manager.pre_allocate_expr(1).await;
        assert_eq!(harness.backend.created_count(), 1);

        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_pre_allocate_skips_paas_containers() -> HackpodResult<()> {
        let harness = TestHarness::new(true).await;
        let mut event = hosted_event(1, "spring-hack", &["web"]);
        event.config.cloud_provider = Some(CloudProvider::Paas);
        event.config.pre_allocate_enabled = true;
        event.config.pre_allocate_number = Some(3);
        harness.events.insert_event(event).await;
        harness.seed_docker_template("web", &["app"]).await;

        harness.manager.pre_allocate_expr(1).await;
        assert_eq!(harness.backend.created_count(), 0);

        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_check_events_registers_and_removes_jobs() {
        let harness = TestHarness::new(true).await;
        let mut event = hosted_event(1, "spring-hack", &["web"]);
        event.config.pre_allocate_enabled = true;
        harness.events.insert_event(event.clone()).await;

        let scheduler = Scheduler::new();
        harness
            .manager
            .check_events_for_pre_allocate(&scheduler)
            .await;
        assert!(scheduler.has_job("pre_allocate_expr_1"));

        event.config.pre_allocate_enabled = false;
        harness.events.insert_event(event).await;
        harness
            .manager
            .check_events_for_pre_allocate(&scheduler)
            .await;
        assert!(!scheduler.has_job("pre_allocate_expr_1"));
    }

    #[test_log::test(tokio::test)]
    async fn test_template_self_test_without_event() -> HackpodResult<()> {
        let mut harness = TestHarness::new(true).await;
        harness.seed_docker_template("web", &["app"]).await;

        let report = harness
            .manager
            .start_expr(Some("alice"), "web", None)
            .await?;
        assert_eq!(report.event_id, 0);
        assert_eq!(report.event_name, "");

        harness.drain_provision_events().await;
        let report = harness.manager.get_expr_status(report.expr_id).await?;
        assert_eq!(report.status, ExprStatus::Running);

        Ok(())
    }
}
