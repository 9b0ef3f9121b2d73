//! Task result queries.

use fleetd_core::db::unix_timestamp;

use super::db::{Database, DatabaseError};
use super::models::TaskRecord;
use crate::queue::{TaskArgs, TaskId, TaskOutcome};

impl Database {
    /// Record a newly enqueued task.
    pub async fn insert_task(
        &self,
        id: TaskId,
        function: &str,
        args: &TaskArgs,
    ) -> Result<(), DatabaseError> {
        let args_json =
            serde_json::to_string(&args.args).map_err(|e| DatabaseError::Query(e.to_string()))?;
        let env_json =
            serde_json::to_string(&args.env).map_err(|e| DatabaseError::Query(e.to_string()))?;

        sqlx::query(
            r"
            INSERT INTO task_results (id, function, args, env, state, enqueued_at)
            VALUES (?, ?, ?, ?, 'pending', ?)
            ",
        )
        .bind(id.to_string())
        .bind(function)
        .bind(args_json)
        .bind(env_json)
        .bind(unix_timestamp())
        .execute(self.pool())
        .await?;

        Ok(())
    }

    /// Mark a task as picked up by a worker.
    pub async fn mark_task_running(&self, id: TaskId) -> Result<(), DatabaseError> {
        sqlx::query("UPDATE task_results SET state = 'running', started_at = ? WHERE id = ?")
            .bind(unix_timestamp())
            .bind(id.to_string())
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Store a task's terminal outcome, finished at `finished_at` (unix seconds).
    pub async fn finish_task(
        &self,
        id: TaskId,
        outcome: &TaskOutcome,
        finished_at: i64,
    ) -> Result<(), DatabaseError> {
        let (result, error) = match outcome {
            TaskOutcome::Succeeded(value) => (
                Some(serde_json::to_string(value).map_err(|e| DatabaseError::Query(e.to_string()))?),
                None,
            ),
            TaskOutcome::Failed(msg) => (None, Some(msg.as_str())),
        };

        sqlx::query(
            "UPDATE task_results SET state = ?, result = ?, error = ?, finished_at = ? WHERE id = ?",
        )
        .bind(outcome.state().as_str())
        .bind(result)
        .bind(error)
        .bind(finished_at)
        .bind(id.to_string())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Get a task by ID.
    pub async fn get_task(&self, id: TaskId) -> Result<TaskRecord, DatabaseError> {
        sqlx::query_as::<_, TaskRecord>("SELECT * FROM task_results WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("Task {id}")))
    }

    /// Delete terminal tasks that finished at or before `cutoff` (unix seconds).
    pub async fn purge_finished_tasks(&self, cutoff: i64) -> Result<u64, DatabaseError> {
        let result = sqlx::query(
            "DELETE FROM task_results WHERE finished_at IS NOT NULL AND finished_at <= ?",
        )
        .bind(cutoff)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::queue::TaskState;

    async fn db() -> Database {
        Database::open_in_memory().await.unwrap()
    }

    #[tokio::test]
    async fn task_lifecycle_is_persisted() {
        let db = db().await;
        let id = TaskId::new();
        let args = TaskArgs::strings(["run", "stirring"]);

        db.insert_task(id, "pio", &args).await.unwrap();
        let row = db.get_task(id).await.unwrap();
        assert_eq!(row.state, "pending");
        assert_eq!(row.args, r#"["run","stirring"]"#);

        db.mark_task_running(id).await.unwrap();
        assert_eq!(db.get_task(id).await.unwrap().state, "running");

        db.finish_task(id, &TaskOutcome::Succeeded(json!([true, "ok"])), unix_timestamp())
            .await
            .unwrap();
        let snapshot = db.get_task(id).await.unwrap().to_snapshot().unwrap();
        assert_eq!(snapshot.state, TaskState::Succeeded);
        assert_eq!(snapshot.outcome, Some(TaskOutcome::Succeeded(json!([true, "ok"]))));
        assert!(snapshot.finished_at.is_some());
    }

    #[tokio::test]
    async fn failure_message_is_stored() {
        let db = db().await;
        let id = TaskId::new();
        db.insert_task(id, "rm", &TaskArgs::default()).await.unwrap();
        db.finish_task(id, &TaskOutcome::Failed("Invalid arguments".into()), unix_timestamp())
            .await
            .unwrap();

        let row = db.get_task(id).await.unwrap();
        assert_eq!(row.state, "failed");
        assert_eq!(row.error.as_deref(), Some("Invalid arguments"));
        assert!(row.result.is_none());
    }

    #[tokio::test]
    async fn missing_task_is_not_found() {
        let err = db().await.get_task(TaskId::new()).await.unwrap_err();
        assert!(matches!(err, DatabaseError::NotFound(_)));
    }

    #[tokio::test]
    async fn purge_only_touches_finished_rows() {
        let db = db().await;
        let done = TaskId::new();
        let running = TaskId::new();
        db.insert_task(done, "pio", &TaskArgs::default()).await.unwrap();
        db.insert_task(running, "pio", &TaskArgs::default()).await.unwrap();
        db.mark_task_running(running).await.unwrap();
        db.finish_task(done, &TaskOutcome::Succeeded(json!(true)), 1_000)
            .await
            .unwrap();

        assert_eq!(db.purge_finished_tasks(999).await.unwrap(), 0);
        // The cutoff itself counts as expired.
        let purged = db.purge_finished_tasks(1_000).await.unwrap();
        assert_eq!(purged, 1);
        assert!(db.get_task(done).await.is_err());
        assert!(db.get_task(running).await.is_ok());
    }

    #[tokio::test]
    async fn duplicate_task_id_is_constraint_violation() {
        let db = db().await;
        let id = TaskId::new();
        db.insert_task(id, "pio", &TaskArgs::default()).await.unwrap();
        let err = db.insert_task(id, "pio", &TaskArgs::default()).await.unwrap_err();
        assert!(err.is_constraint_violation());
    }
}
