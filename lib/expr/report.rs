use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::VM_WEB_PRIVATE_PORT;
use crate::models::{Experiment, ExprStatus, VeProvider, VirtualEnvironment};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The client-facing view of one experiment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    /// The id of the experiment.
    pub expr_id: i64,

    /// The lifecycle status presented to the client. An experiment whose
    /// units are not all reachable yet is presented as `starting` even if the
    /// stored status says `running`.
    pub status: ExprStatus,

    /// The name of the event the experiment belongs to.
    pub event_name: String,

    /// The id of the event the experiment belongs to.
    pub event_id: i64,

    /// The time the experiment was created.
    pub create_time: DateTime<Utc>,

    /// The time of the last client heartbeat.
    pub last_heart_beat_time: DateTime<Utc>,

    /// Remote-desktop launch descriptors, one per unit. Present only once
    /// the experiment is fully running.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_servers: Option<Vec<RemoteServer>>,

    /// Public application URLs exposed by the units. Present only once the
    /// experiment is fully running.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_urls: Option<Vec<PublicUrl>>,
}

/// A remote-desktop launch descriptor of one unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteServer {
    /// The name of the unit.
    pub name: String,

    /// The host serving the remote-desktop gateway.
    pub guacamole_host: String,

    /// The browser launch URL of the remote session.
    pub url: String,
}

/// A public application URL exposed by one unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicUrl {
    /// The name of the exposing binding or endpoint.
    pub name: String,

    /// The public URL.
    pub url: String,
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Assembles the client-facing view of an experiment.
///
/// A running experiment with a unit that lacks its remote-access descriptor
/// is degraded to `starting` and reported without URL lists, so clients keep
/// polling instead of receiving a broken launch link.
pub fn build_status_report(expr: &Experiment, guacamole_host: &str) -> StatusReport {
    let mut report = StatusReport {
        expr_id: expr.id,
        status: expr.status,
        event_name: expr.event_name.clone(),
        event_id: expr.event_id,
        create_time: expr.create_time,
        last_heart_beat_time: expr.last_heart_beat_time,
        remote_servers: None,
        public_urls: None,
    };

    if expr.status != ExprStatus::Running {
        return report;
    }

    let mut remote_servers = Vec::new();
    for ve in &expr.virtual_environments {
        let Some(remote) = &ve.remote else {
            report.status = ExprStatus::Starting;
            return report;
        };
        remote_servers.push(RemoteServer {
            name: ve.name.clone(),
            guacamole_host: guacamole_host.to_string(),
            url: format!(
                "{}/guacamole/#/client/c/{}?name={}",
                guacamole_host, remote.name, remote.name
            ),
        });
    }

    report.remote_servers = Some(remote_servers);
    report.public_urls = Some(
        expr.virtual_environments
            .iter()
            .flat_map(public_urls_of)
            .collect(),
    );

    report
}

/// Collects the public URLs exposed by one unit.
fn public_urls_of(ve: &VirtualEnvironment) -> Vec<PublicUrl> {
    match ve.provider {
        VeProvider::Docker => {
            let Some(container) = &ve.container else {
                return Vec::new();
            };
            container
                .port_bindings
                .iter()
                .filter(|binding| binding.is_public)
                .filter_map(|binding| {
                    let template = binding.url_template.as_ref()?;
                    Some(PublicUrl {
                        name: binding.name.clone(),
                        url: template
                            .replace("{host}", &container.public_dns)
                            .replace("{port}", &binding.public_port.to_string()),
                    })
                })
                .collect()
        }
        VeProvider::Vm => {
            let Some(vm) = &ve.vm else {
                return Vec::new();
            };
            vm.endpoints
                .iter()
                .filter(|endpoint| endpoint.private_port == VM_WEB_PRIVATE_PORT)
                .map(|endpoint| PublicUrl {
                    name: endpoint.name.clone(),
                    url: format!("http://{}:{}", vm.public_ip, endpoint.public_port),
                })
                .collect()
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
