//! Shared fixtures for orchestrator tests.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tempfile::TempDir;

use crate::backend::{
    provision_channel, ProvisionEvent, ProvisionEventReceiver, ProvisionEventSender,
    ProvisionOutcome, ProvisionedUnit, ProvisioningBackend, UnitHandle, UnitRuntimeStatus,
    UnitSpec,
};
use crate::event::MemoryEventStore;
use crate::expr::{DockerExprStarter, ExprManager, StarterRegistry, VmExprStarter};
use crate::models::{
    CloudProvider, ContainerInfo, Event, EventConfig, PortBinding, RemoteAccess, RemoteProvider,
    Template, TemplateUnit, VeProvider, VmEndpoint, VmInfo,
};
use crate::notify::{Notice, Notifier};
use crate::store::{init_db, ExperimentStore, MIGRATOR};
use crate::template::MemoryTemplateLibrary;
use crate::{HackpodError, HackpodResult};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A deterministic in-memory [`ProvisioningBackend`].
///
/// Creations and destructions are recorded, and the matching completion
/// messages are pushed onto the channel synchronously, so tests control
/// exactly when (and in which order) the orchestrator consumes them.
pub(crate) struct MockBackend {
    events: ProvisionEventSender,
    auto_running: bool,
    pub(crate) created: Mutex<Vec<UnitSpec>>,
    pub(crate) destroyed: Mutex<Vec<String>>,
    fail_fragment: Mutex<Option<String>>,
}

/// A [`Notifier`] that records every notice it is handed.
#[derive(Default)]
pub(crate) struct RecordingNotifier {
    pub(crate) notices: Mutex<Vec<Notice>>,
}

/// A fully wired orchestrator over a temporary database.
pub(crate) struct TestHarness {
    pub(crate) manager: Arc<ExprManager>,
    pub(crate) store: ExperimentStore,
    pub(crate) events: Arc<MemoryEventStore>,
    pub(crate) templates: Arc<MemoryTemplateLibrary>,
    pub(crate) backend: Arc<MockBackend>,
    pub(crate) notifier: Arc<RecordingNotifier>,
    pub(crate) rx: ProvisionEventReceiver,
    _tmp: TempDir,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl MockBackend {
    pub(crate) fn new(events: ProvisionEventSender, auto_running: bool) -> Self {
        Self {
            events,
            auto_running,
            created: Mutex::new(Vec::new()),
            destroyed: Mutex::new(Vec::new()),
            fail_fragment: Mutex::new(None),
        }
    }

    /// Makes creation fail for every unit whose name contains the fragment.
    pub(crate) fn fail_units_containing(&self, fragment: &str) {
        *self.fail_fragment.lock().unwrap() = Some(fragment.to_string());
    }

    pub(crate) fn created_count(&self) -> usize {
        self.created.lock().unwrap().len()
    }

    pub(crate) fn destroyed_count(&self) -> usize {
        self.destroyed.lock().unwrap().len()
    }

    fn provisioned_unit(spec: &UnitSpec) -> ProvisionedUnit {
        let remote = RemoteAccess {
            provider: RemoteProvider::Guacamole,
            name: spec.name.clone(),
            hostname: "10.0.0.5".to_string(),
            port: 5900,
            username: "hacker".to_string(),
            password: "secret".to_string(),
        };

        match spec.provider {
            VeProvider::Docker => ProvisionedUnit {
                remote: Some(remote),
                container: Some(ContainerInfo {
                    public_dns: "host-1.example.com".to_string(),
                    port_bindings: vec![PortBinding {
                        name: "web".to_string(),
                        is_public: true,
                        public_port: 10080,
                        url_template: Some("http://{host}:{port}".to_string()),
                    }],
                }),
                vm: None,
            },
            VeProvider::Vm => ProvisionedUnit {
                remote: Some(remote),
                container: None,
                vm: Some(VmInfo {
                    public_ip: "52.1.2.3".to_string(),
                    endpoints: vec![VmEndpoint {
                        name: "web".to_string(),
                        public_port: 8080,
                        private_port: 80,
                    }],
                }),
            },
        }
    }
}

impl TestHarness {
    /// Builds the orchestrator over a fresh temporary database.
    ///
    /// With `auto_running` the backend reports every created unit running
    /// right away; without it, tests hand-craft the completion messages.
    pub(crate) async fn new(auto_running: bool) -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let pool = init_db(tmp.path().join("experiments.db"), &MIGRATOR)
            .await
            .unwrap();
        let store = ExperimentStore::new(pool);

        let (tx, rx) = provision_channel();
        let backend = Arc::new(MockBackend::new(tx, auto_running));
        let events = Arc::new(MemoryEventStore::new());
        let templates = Arc::new(MemoryTemplateLibrary::new());
        let notifier = Arc::new(RecordingNotifier::default());

        let docker = Arc::new(DockerExprStarter::new(
            store.clone(),
            templates.clone(),
            backend.clone(),
        ));
        let vm = Arc::new(VmExprStarter::new(
            store.clone(),
            templates.clone(),
            backend.clone(),
        ));
        let starters = StarterRegistry::new()
            .register(VeProvider::Docker, CloudProvider::Hosted, docker.clone())
            .register(VeProvider::Docker, CloudProvider::Paas, docker)
            .register(VeProvider::Vm, CloudProvider::Hosted, vm);

        let manager = Arc::new(
            ExprManager::builder()
                .store(store.clone())
                .events(events.clone())
                .templates(templates.clone())
                .starters(starters)
                .notifier(notifier.clone())
                .build(),
        );

        Self {
            manager,
            store,
            events,
            templates,
            backend,
            notifier,
            rx,
            _tmp: tmp,
        }
    }

    /// Inserts a container template with one unit per name.
    pub(crate) async fn seed_docker_template(&self, name: &str, units: &[&str]) {
        let template = Template {
            name: name.to_string(),
            provider: VeProvider::Docker,
        };
        let units = units
            .iter()
            .map(|unit| TemplateUnit {
                name: unit.to_string(),
                image: format!("{unit}:latest"),
            })
            .collect();
        self.templates.insert_template(template, units).await;
    }

    /// Inserts a VM template with one unit per name.
    pub(crate) async fn seed_vm_template(&self, name: &str, units: &[&str]) {
        let template = Template {
            name: name.to_string(),
            provider: VeProvider::Vm,
        };
        let units = units
            .iter()
            .map(|unit| TemplateUnit {
                name: unit.to_string(),
                image: "ubuntu-22.04".to_string(),
            })
            .collect();
        self.templates.insert_template(template, units).await;
    }

    /// Applies every queued backend completion message, including the ones
    /// produced while applying earlier ones (rollback cascades).
    pub(crate) async fn drain_provision_events(&mut self) {
        while let Ok(event) = self.rx.try_recv() {
            self.manager.handle_provision_event(event).await.unwrap();
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl ProvisioningBackend for MockBackend {
    async fn create_unit(&self, spec: &UnitSpec) -> HackpodResult<UnitHandle> {
        if let Some(fragment) = self.fail_fragment.lock().unwrap().as_deref() {
            if spec.name.contains(fragment) {
                return Err(HackpodError::custom(anyhow::anyhow!(
                    "image pull failed for {}",
                    spec.image
                )));
            }
        }

        self.created.lock().unwrap().push(spec.clone());

        if self.auto_running {
            let _ = self.events.send(ProvisionEvent {
                experiment_id: spec.experiment_id,
                virtual_environment_name: spec.name.clone(),
                outcome: ProvisionOutcome::Running(Box::new(Self::provisioned_unit(spec))),
            });
        }

        Ok(UnitHandle {
            name: spec.name.clone(),
        })
    }

    async fn destroy_unit(&self, handle: &UnitHandle) -> HackpodResult<()> {
        self.destroyed.lock().unwrap().push(handle.name.clone());

        let experiment_id = self
            .created
            .lock()
            .unwrap()
            .iter()
            .find(|spec| spec.name == handle.name)
            .map(|spec| spec.experiment_id)
            .unwrap_or(0);
        let _ = self.events.send(ProvisionEvent {
            experiment_id,
            virtual_environment_name: handle.name.clone(),
            outcome: ProvisionOutcome::Stopped,
        });

        Ok(())
    }

    async fn inspect_unit(&self, handle: &UnitHandle) -> HackpodResult<UnitRuntimeStatus> {
        let created = self
            .created
            .lock()
            .unwrap()
            .iter()
            .any(|spec| spec.name == handle.name);
        let destroyed = self.destroyed.lock().unwrap().contains(&handle.name);

        Ok(if created && !destroyed {
            UnitRuntimeStatus::Running
        } else {
            UnitRuntimeStatus::Stopped
        })
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notice: Notice) {
        self.notices.lock().unwrap().push(notice);
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// An event on the hosted cloud, ending a day from now, with no recycling
/// or pre-allocation. Tests tweak the config from there.
pub(crate) fn hosted_event(id: i64, name: &str, templates: &[&str]) -> Event {
    Event {
        id,
        name: name.to_string(),
        event_end_time: Utc::now() + Duration::days(1),
        config: EventConfig {
            cloud_provider: Some(CloudProvider::Hosted),
            ..Default::default()
        },
        templates: templates.iter().map(|t| t.to_string()).collect(),
    }
}
