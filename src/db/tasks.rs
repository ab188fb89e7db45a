//! Task and report stores.

use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use crate::model::{Ref, Task, TaskReport, TaskState};

use super::{json_column, json_column_opt, to_json, Database, DbResult};

const TASK_COLUMNS: &str = "t.id, t.name, t.kind, t.addon, t.extensions, t.state, \
     t.locator, t.priority, t.policy, t.ttl, t.data, t.application_id, \
     t.task_group_id, t.bucket_id, t.pod, t.started, t.terminated, t.canceled, \
     t.retries, t.errors, t.events, t.attached, t.state_entered, \
     a.name AS application_name";

fn task_from_row(row: &SqliteRow) -> DbResult<Task> {
    let application = row
        .try_get::<Option<i64>, _>("application_id")?
        .map(|id| Ref {
            id,
            name: row
                .try_get::<Option<String>, _>("application_name")
                .unwrap_or_default()
                .unwrap_or_default(),
        });
    Ok(Task {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        kind: row.try_get("kind")?,
        addon: row.try_get("addon")?,
        extensions: json_column(row, "extensions")?,
        state: TaskState::parse(&row.try_get::<String, _>("state")?),
        locator: row.try_get("locator")?,
        priority: row.try_get("priority")?,
        policy: json_column(row, "policy")?,
        ttl: json_column_opt(row, "ttl")?,
        data: json_column(row, "data")?,
        application,
        task_group: row.try_get("task_group_id")?,
        bucket: row.try_get("bucket_id")?,
        pod: row.try_get("pod")?,
        started: row.try_get("started")?,
        terminated: row.try_get("terminated")?,
        canceled: row.try_get("canceled")?,
        retries: row.try_get("retries")?,
        errors: json_column(row, "errors")?,
        events: json_column(row, "events")?,
        attached: json_column(row, "attached")?,
        report: None,
        state_entered: row.try_get("state_entered")?,
    })
}

fn report_from_row(row: &SqliteRow) -> DbResult<TaskReport> {
    Ok(TaskReport {
        id: row.try_get("id")?,
        status: row.try_get("status")?,
        total: row.try_get("total")?,
        completed: row.try_get("completed")?,
        activity: json_column(row, "activity")?,
        errors: json_column(row, "errors")?,
        attached: json_column(row, "attached")?,
        result: json_column_opt(row, "result")?,
        task: row.try_get("task_id")?,
    })
}

impl Database {
    /// Insert a task; returns it with the assigned id.
    pub async fn create_task(&self, task: &Task) -> DbResult<Task> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO tasks \
             (name, kind, addon, extensions, state, locator, priority, policy, \
              ttl, data, application_id, task_group_id, bucket_id, pod, started, \
              terminated, canceled, retries, errors, events, attached) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             RETURNING id",
        )
        .bind(&task.name)
        .bind(&task.kind)
        .bind(&task.addon)
        .bind(to_json(&task.extensions))
        .bind(task.state.as_str())
        .bind(&task.locator)
        .bind(task.priority)
        .bind(to_json(&task.policy))
        .bind(task.ttl.as_ref().map(to_json))
        .bind(to_json(&task.data))
        .bind(task.application_id())
        .bind(task.task_group)
        .bind(task.bucket)
        .bind(&task.pod)
        .bind(task.started)
        .bind(task.terminated)
        .bind(task.canceled)
        .bind(task.retries)
        .bind(to_json(&task.errors))
        .bind(to_json(&task.events))
        .bind(to_json(&task.attached))
        .fetch_one(&self.pool)
        .await?;
        let mut created = task.clone();
        created.id = id;
        Ok(created)
    }

    /// Full-row save. `state_entered` rolls forward only when the state
    /// actually changed.
    pub async fn save_task(&self, task: &Task) -> DbResult<()> {
        sqlx::query(
            "UPDATE tasks SET \
             name = ?, kind = ?, addon = ?, extensions = ?, \
             state_entered = CASE WHEN state <> ? THEN ? ELSE state_entered END, \
             state = ?, locator = ?, priority = ?, policy = ?, ttl = ?, data = ?, \
             application_id = ?, bucket_id = ?, pod = ?, started = ?, \
             terminated = ?, canceled = ?, retries = ?, errors = ?, events = ?, \
             attached = ? \
             WHERE id = ?",
        )
        .bind(&task.name)
        .bind(&task.kind)
        .bind(&task.addon)
        .bind(to_json(&task.extensions))
        .bind(task.state.as_str())
        .bind(Utc::now())
        .bind(task.state.as_str())
        .bind(&task.locator)
        .bind(task.priority)
        .bind(to_json(&task.policy))
        .bind(task.ttl.as_ref().map(to_json))
        .bind(to_json(&task.data))
        .bind(task.application_id())
        .bind(task.bucket)
        .bind(&task.pod)
        .bind(task.started)
        .bind(task.terminated)
        .bind(task.canceled)
        .bind(task.retries)
        .bind(to_json(&task.errors))
        .bind(to_json(&task.events))
        .bind(to_json(&task.attached))
        .bind(task.id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Fetch one task with its report eager-loaded.
    pub async fn get_task(&self, id: i64) -> DbResult<Option<Task>> {
        let row = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks t \
             LEFT JOIN applications a ON a.id = t.application_id \
             WHERE t.id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let mut task = task_from_row(&row)?;
        task.report = self.get_report(id).await?;
        Ok(Some(task))
    }

    /// List tasks, optionally filtered by locator.
    pub async fn list_tasks(&self, locator: Option<&str>) -> DbResult<Vec<Task>> {
        let mut sql = format!(
            "SELECT {TASK_COLUMNS} FROM tasks t \
             LEFT JOIN applications a ON a.id = t.application_id"
        );
        if locator.is_some() {
            sql.push_str(" WHERE t.locator = ?");
        }
        sql.push_str(" ORDER BY t.id");
        let mut query = sqlx::query(&sql);
        if let Some(locator) = locator {
            query = query.bind(locator);
        }
        let rows = query.fetch_all(&self.pool).await?;
        let mut list = Vec::with_capacity(rows.len());
        for row in &rows {
            list.push(task_from_row(row)?);
        }
        Ok(list)
    }

    /// Tasks in the given states, ordered by (priority desc, id asc).
    pub async fn tasks_in_states(&self, states: &[TaskState]) -> DbResult<Vec<Task>> {
        let marks = vec!["?"; states.len()].join(", ");
        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM tasks t \
             LEFT JOIN applications a ON a.id = t.application_id \
             WHERE t.state IN ({marks}) \
             ORDER BY t.priority DESC, t.id ASC"
        );
        let mut query = sqlx::query(&sql);
        for state in states {
            query = query.bind(state.as_str());
        }
        let rows = query.fetch_all(&self.pool).await?;
        let mut list = Vec::with_capacity(rows.len());
        for row in &rows {
            list.push(task_from_row(row)?);
        }
        Ok(list)
    }

    /// Member tasks of a group.
    pub async fn tasks_in_group(&self, group: i64) -> DbResult<Vec<Task>> {
        let rows = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks t \
             LEFT JOIN applications a ON a.id = t.application_id \
             WHERE t.task_group_id = ? ORDER BY t.id"
        ))
        .bind(group)
        .fetch_all(&self.pool)
        .await?;
        let mut list = Vec::with_capacity(rows.len());
        for row in &rows {
            list.push(task_from_row(row)?);
        }
        Ok(list)
    }

    /// Partial update; allowed only while the task is still `Created`.
    /// Returns false when no row matched.
    pub async fn update_created_task(&self, task: &Task) -> DbResult<bool> {
        let result = sqlx::query(
            "UPDATE tasks SET \
             name = ?, kind = ?, addon = ?, extensions = ?, locator = ?, \
             priority = ?, policy = ?, ttl = ?, data = ?, application_id = ? \
             WHERE id = ? AND state = 'Created'",
        )
        .bind(&task.name)
        .bind(&task.kind)
        .bind(&task.addon)
        .bind(to_json(&task.extensions))
        .bind(&task.locator)
        .bind(task.priority)
        .bind(to_json(&task.policy))
        .bind(task.ttl.as_ref().map(to_json))
        .bind(to_json(&task.data))
        .bind(task.application_id())
        .bind(task.id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// `Created -> Ready`. Returns false when the task is already past
    /// `Created`.
    pub async fn submit_task(&self, id: i64) -> DbResult<bool> {
        let result = sqlx::query(
            "UPDATE tasks SET state = 'Ready', state_entered = ? \
             WHERE id = ? AND state = 'Created'",
        )
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Flag the task canceled; the scheduler reaps on the next tick.
    pub async fn cancel_task(&self, id: i64) -> DbResult<()> {
        sqlx::query("UPDATE tasks SET canceled = 1 WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn delete_task(&self, id: i64) -> DbResult<()> {
        sqlx::query("DELETE FROM tasks WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn get_report(&self, task_id: i64) -> DbResult<Option<TaskReport>> {
        let row = sqlx::query("SELECT * FROM task_reports WHERE task_id = ?")
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(report_from_row).transpose()
    }

    pub async fn create_report(&self, report: &TaskReport) -> DbResult<TaskReport> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO task_reports \
             (task_id, status, total, completed, activity, errors, attached, result) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?) RETURNING id",
        )
        .bind(report.task)
        .bind(&report.status)
        .bind(report.total)
        .bind(report.completed)
        .bind(to_json(&report.activity))
        .bind(to_json(&report.errors))
        .bind(to_json(&report.attached))
        .bind(report.result.as_ref().map(to_json))
        .fetch_one(&self.pool)
        .await?;
        let mut created = report.clone();
        created.id = id;
        Ok(created)
    }

    pub async fn update_report(&self, report: &TaskReport) -> DbResult<bool> {
        let result = sqlx::query(
            "UPDATE task_reports SET \
             status = ?, total = ?, completed = ?, activity = ?, errors = ?, \
             attached = ?, result = ? \
             WHERE task_id = ?",
        )
        .bind(&report.status)
        .bind(report.total)
        .bind(report.completed)
        .bind(to_json(&report.activity))
        .bind(to_json(&report.errors))
        .bind(to_json(&report.attached))
        .bind(report.result.as_ref().map(to_json))
        .bind(report.task)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn delete_report(&self, task_id: i64) -> DbResult<()> {
        sqlx::query("DELETE FROM task_reports WHERE task_id = ?")
            .bind(task_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
