//! Cluster membership queries.

use fleetd_core::time::utc_iso_timestamp;

use super::db::{Database, DatabaseError};
use super::models::Worker;

impl Database {
    /// Register a worker. A duplicate name is a [`DatabaseError::ConstraintViolation`].
    pub async fn add_worker(
        &self,
        unit: &str,
        address: Option<&str>,
    ) -> Result<Worker, DatabaseError> {
        sqlx::query(
            r"
            INSERT INTO workers (pioreactor_unit, address, is_active, added_at)
            VALUES (?, ?, 1, ?)
            ",
        )
        .bind(unit)
        .bind(address)
        .bind(utc_iso_timestamp())
        .execute(self.pool())
        .await?;

        self.get_worker(unit).await
    }

    /// Get a worker by name.
    pub async fn get_worker(&self, unit: &str) -> Result<Worker, DatabaseError> {
        sqlx::query_as::<_, Worker>("SELECT * FROM workers WHERE pioreactor_unit = ?")
            .bind(unit)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("Worker {unit}")))
    }

    /// All workers, most recently added first.
    ///
    /// The leader is usually registered first, so broadcasts that walk this
    /// list reach it last.
    pub async fn list_workers(&self) -> Result<Vec<Worker>, DatabaseError> {
        let workers = sqlx::query_as::<_, Worker>(
            "SELECT * FROM workers ORDER BY added_at DESC, rowid DESC",
        )
        .fetch_all(self.pool())
        .await?;
        Ok(workers)
    }

    /// Enable or disable a worker.
    pub async fn set_worker_active(&self, unit: &str, active: bool) -> Result<(), DatabaseError> {
        let result = sqlx::query("UPDATE workers SET is_active = ? WHERE pioreactor_unit = ?")
            .bind(i64::from(active))
            .bind(unit)
            .execute(self.pool())
            .await?;
        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound(format!("Worker {unit}")));
        }
        Ok(())
    }

    /// Remove a worker and its experiment assignment.
    pub async fn remove_worker(&self, unit: &str) -> Result<(), DatabaseError> {
        let result = sqlx::query("DELETE FROM workers WHERE pioreactor_unit = ?")
            .bind(unit)
            .execute(self.pool())
            .await?;
        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound(format!("Worker {unit}")));
        }
        Ok(())
    }

    /// Assign a worker to an experiment, replacing any previous assignment.
    ///
    /// Unknown workers fail with a constraint violation.
    pub async fn assign_worker(&self, unit: &str, experiment: &str) -> Result<(), DatabaseError> {
        sqlx::query(
            r"
            INSERT INTO experiment_worker_assignments (pioreactor_unit, experiment, assigned_at)
            VALUES (?, ?, ?)
            ON CONFLICT (pioreactor_unit) DO UPDATE SET
                experiment = excluded.experiment,
                assigned_at = excluded.assigned_at
            ",
        )
        .bind(unit)
        .bind(experiment)
        .bind(utc_iso_timestamp())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Active workers assigned to `experiment`, most recently added first.
    pub async fn workers_in_experiment(
        &self,
        experiment: &str,
    ) -> Result<Vec<Worker>, DatabaseError> {
        let workers = sqlx::query_as::<_, Worker>(
            r"
            SELECT w.* FROM workers w
            JOIN experiment_worker_assignments a ON a.pioreactor_unit = w.pioreactor_unit
            WHERE a.experiment = ? AND w.is_active = 1
            ORDER BY w.added_at DESC, w.rowid DESC
            ",
        )
        .bind(experiment)
        .fetch_all(self.pool())
        .await?;
        Ok(workers)
    }
}
