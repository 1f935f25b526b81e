use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Pool, Row, Sqlite};

use crate::backend::ProvisionedUnit;
use crate::models::{Experiment, ExprStatus, VeProvider, VeStatus, VirtualEnvironment};
use crate::HackpodResult;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Persistent access to experiments and their virtual environments.
///
/// Every mutation is a single-row (or single-condition) statement, so the
/// store's compare-and-set semantics are the concurrency control between the
/// interactive path and the background sweeps.
#[derive(Debug, Clone)]
pub struct ExperimentStore {
    pool: Pool<Sqlite>,
}

/// The fields of a new experiment row.
#[derive(Debug, Clone)]
pub struct NewExperiment<'a> {
    /// The owning user, `None` for a pool-owned experiment.
    pub user_id: Option<&'a str>,

    /// The id of the event, zero for template self-tests.
    pub event_id: i64,

    /// The name of the event, empty for template self-tests.
    pub event_name: &'a str,

    /// The name of the template the experiment is created from.
    pub template_name: &'a str,

    /// The provider family of the template.
    pub template_provider: VeProvider,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ExperimentStore {
    /// Creates a store over an existing connection pool.
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    /// Inserts a new experiment in the `init` state and returns its id.
    pub async fn insert_experiment(&self, new: NewExperiment<'_>) -> HackpodResult<i64> {
        let now = Utc::now();
        let record = sqlx::query(
            r#"
            INSERT INTO experiments (
                status, user_id, event_id, event_name,
                template_name, template_provider,
                create_time, last_heart_beat_time
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(ExprStatus::Init.to_string())
        .bind(new.user_id)
        .bind(new.event_id)
        .bind(new.event_name)
        .bind(new.template_name)
        .bind(new.template_provider.to_string())
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(record.get::<i64, _>("id"))
    }

    /// Fetches an experiment with its virtual environments.
    pub async fn get_experiment(&self, id: i64) -> HackpodResult<Option<Experiment>> {
        let row = sqlx::query("SELECT * FROM experiments WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let mut experiment = experiment_from_row(&row)?;
        let ve_rows =
            sqlx::query("SELECT * FROM virtual_environments WHERE experiment_id = ? ORDER BY id")
                .bind(id)
                .fetch_all(&self.pool)
                .await?;
        experiment.virtual_environments = ve_rows
            .iter()
            .map(virtual_environment_from_row)
            .collect::<HackpodResult<Vec<_>>>()?;

        Ok(Some(experiment))
    }

    /// Sets the lifecycle status of an experiment.
    pub async fn set_status(&self, id: i64, status: ExprStatus) -> HackpodResult<()> {
        sqlx::query("UPDATE experiments SET status = ? WHERE id = ?")
            .bind(status.to_string())
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Attaches a virtual environment to an experiment.
    pub async fn insert_virtual_environment(
        &self,
        experiment_id: i64,
        ve: &VirtualEnvironment,
    ) -> HackpodResult<()> {
        sqlx::query(
            r#"
            INSERT INTO virtual_environments (
                experiment_id, name, provider, image, status,
                remote_json, container_json, vm_json
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(experiment_id)
        .bind(&ve.name)
        .bind(ve.provider.to_string())
        .bind(&ve.image)
        .bind(ve.status.to_string())
        .bind(ve.remote.as_ref().map(serde_json::to_string).transpose()?)
        .bind(ve.container.as_ref().map(serde_json::to_string).transpose()?)
        .bind(ve.vm.as_ref().map(serde_json::to_string).transpose()?)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Sets the status of one named virtual environment.
    pub async fn set_ve_status(
        &self,
        experiment_id: i64,
        name: &str,
        status: VeStatus,
    ) -> HackpodResult<()> {
        sqlx::query(
            "UPDATE virtual_environments SET status = ? WHERE experiment_id = ? AND name = ?",
        )
        .bind(status.to_string())
        .bind(experiment_id)
        .bind(name)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Marks one named virtual environment running and records the resource
    /// details the backend reported.
    pub async fn set_ve_provisioned(
        &self,
        experiment_id: i64,
        name: &str,
        unit: &ProvisionedUnit,
    ) -> HackpodResult<()> {
        sqlx::query(
            r#"
            UPDATE virtual_environments
            SET status = ?, remote_json = ?, container_json = ?, vm_json = ?
            WHERE experiment_id = ? AND name = ?
            "#,
        )
        .bind(VeStatus::Running.to_string())
        .bind(unit.remote.as_ref().map(serde_json::to_string).transpose()?)
        .bind(
            unit.container
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
        )
        .bind(unit.vm.as_ref().map(serde_json::to_string).transpose()?)
        .bind(experiment_id)
        .bind(name)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Re-reads the statuses of every unit of an experiment. The rollup rule
    /// always consults this full current set, which makes it independent of
    /// callback arrival order.
    pub async fn ve_statuses(&self, experiment_id: i64) -> HackpodResult<Vec<VeStatus>> {
        let rows = sqlx::query(
            "SELECT status FROM virtual_environments WHERE experiment_id = ? ORDER BY id",
        )
        .bind(experiment_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| row.get::<String, _>("status").parse())
            .collect()
    }

    /// Atomically claims one pool-owned running experiment for a user.
    ///
    /// The claim is a single conditional update, so two racing claimants
    /// resolve to exactly one winner. Returns the claimed id, if any.
    pub async fn claim_pooled(
        &self,
        event_id: i64,
        template_name: &str,
        user_id: &str,
    ) -> HackpodResult<Option<i64>> {
        let row = sqlx::query(
            r#"
            UPDATE experiments SET user_id = ?
            WHERE id = (
                SELECT id FROM experiments
                WHERE event_id = ? AND template_name = ?
                      AND user_id IS NULL AND status = 'running'
                ORDER BY id
                LIMIT 1
            )
            RETURNING id
            "#,
        )
        .bind(user_id)
        .bind(event_id)
        .bind(template_name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.get::<i64, _>("id")))
    }

    /// Finds a starting or running experiment owned by the user under an
    /// event, optionally narrowed to one template (administrator admission).
    pub async fn find_active_for_user(
        &self,
        event_id: i64,
        user_id: &str,
        template_name: Option<&str>,
    ) -> HackpodResult<Option<i64>> {
        let row = match template_name {
            Some(template_name) => {
                sqlx::query(
                    r#"
                    SELECT id FROM experiments
                    WHERE event_id = ? AND user_id = ? AND template_name = ?
                          AND status IN ('starting', 'running')
                    ORDER BY id
                    LIMIT 1
                    "#,
                )
                .bind(event_id)
                .bind(user_id)
                .bind(template_name)
                .fetch_optional(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    r#"
                    SELECT id FROM experiments
                    WHERE event_id = ? AND user_id = ?
                          AND status IN ('starting', 'running')
                    ORDER BY id
                    LIMIT 1
                    "#,
                )
                .bind(event_id)
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?
            }
        };

        Ok(row.map(|r| r.get::<i64, _>("id")))
    }

    /// Advances the heartbeat of a running experiment. Returns false when the
    /// experiment is absent or not running, which is a normal polling outcome.
    pub async fn update_heartbeat(&self, id: i64, now: DateTime<Utc>) -> HackpodResult<bool> {
        let result = sqlx::query(
            "UPDATE experiments SET last_heart_beat_time = ? WHERE id = ? AND status = 'running'",
        )
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Lists the running experiments of an event whose last heartbeat is
    /// older than the cutoff.
    pub async fn list_recyclable(
        &self,
        event_id: i64,
        cutoff: DateTime<Utc>,
    ) -> HackpodResult<Vec<i64>> {
        let rows = sqlx::query(
            r#"
            SELECT id FROM experiments
            WHERE event_id = ? AND status = 'running' AND last_heart_beat_time < ?
            ORDER BY id
            "#,
        )
        .bind(event_id)
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(|r| r.get::<i64, _>("id")).collect())
    }

    /// Counts the pool-owned (unassigned) experiments of a template that are
    /// starting or running.
    pub async fn count_pooled(&self, event_id: i64, template_name: &str) -> HackpodResult<i64> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS cnt FROM experiments
            WHERE event_id = ? AND template_name = ?
                  AND user_id IS NULL AND status IN ('starting', 'running')
            "#,
        )
        .bind(event_id)
        .bind(template_name)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get::<i64, _>("cnt"))
    }

    /// Counts the pool-owned experiments of a template still starting.
    pub async fn count_pooled_starting(
        &self,
        event_id: i64,
        template_name: &str,
    ) -> HackpodResult<i64> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS cnt FROM experiments
            WHERE event_id = ? AND template_name = ?
                  AND user_id IS NULL AND status = 'starting'
            "#,
        )
        .bind(event_id)
        .bind(template_name)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get::<i64, _>("cnt"))
    }

    /// Removes the owner of an experiment, returning it to the pool.
    pub async fn unassign_user(&self, id: i64) -> HackpodResult<()> {
        sqlx::query("UPDATE experiments SET user_id = NULL WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

#[cfg(test)]
impl ExperimentStore {
    /// Rewinds the heartbeat of an experiment, for aging scenarios in tests.
    pub(crate) async fn backdate_heart_beat(
        &self,
        id: i64,
        to: DateTime<Utc>,
    ) -> HackpodResult<()> {
        sqlx::query("UPDATE experiments SET last_heart_beat_time = ? WHERE id = ?")
            .bind(to)
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

fn experiment_from_row(row: &SqliteRow) -> HackpodResult<Experiment> {
    Ok(Experiment {
        id: row.get::<i64, _>("id"),
        status: row.get::<String, _>("status").parse()?,
        user_id: row.get::<Option<String>, _>("user_id"),
        event_id: row.get::<i64, _>("event_id"),
        event_name: row.get::<String, _>("event_name"),
        template_name: row.get::<String, _>("template_name"),
        template_provider: row.get::<String, _>("template_provider").parse()?,
        create_time: row.get::<DateTime<Utc>, _>("create_time"),
        last_heart_beat_time: row.get::<DateTime<Utc>, _>("last_heart_beat_time"),
        virtual_environments: Vec::new(),
    })
}

fn virtual_environment_from_row(row: &SqliteRow) -> HackpodResult<VirtualEnvironment> {
    Ok(VirtualEnvironment {
        name: row.get::<String, _>("name"),
        provider: row.get::<String, _>("provider").parse()?,
        image: row.get::<String, _>("image"),
        status: row.get::<String, _>("status").parse()?,
        remote: row
            .get::<Option<String>, _>("remote_json")
            .map(|s| serde_json::from_str(&s))
            .transpose()?,
        container: row
            .get::<Option<String>, _>("container_json")
            .map(|s| serde_json::from_str(&s))
            .transpose()?,
        vm: row
            .get::<Option<String>, _>("vm_json")
            .map(|s| serde_json::from_str(&s))
            .transpose()?,
    })
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
