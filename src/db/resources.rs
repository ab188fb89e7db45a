//! Applications, tags, task groups, files and buckets.
//!
//! The application surface here is deliberately narrow: enough for routing,
//! for the tag selector, and for priming watch subscriptions.

use sqlx::Row;

use crate::model::{Application, File, Tag, TaskGroup, TaskState};

use super::{json_column, to_json, Database, DbResult};

impl Database {
    /// Insert an application with its tags.
    pub async fn create_application(&self, app: &Application) -> DbResult<Application> {
        let id: i64 = sqlx::query_scalar("INSERT INTO applications (name) VALUES (?) RETURNING id")
            .bind(&app.name)
            .fetch_one(&self.pool)
            .await?;
        let mut created = app.clone();
        created.id = id;
        for tag in created.tags.iter_mut() {
            let tag_id: i64 = sqlx::query_scalar(
                "INSERT INTO tags (name, category) VALUES (?, ?) RETURNING id",
            )
            .bind(&tag.name)
            .bind(&tag.category)
            .fetch_one(&self.pool)
            .await?;
            tag.id = tag_id;
            sqlx::query("INSERT INTO application_tags (application_id, tag_id) VALUES (?, ?)")
                .bind(id)
                .bind(tag_id)
                .execute(&self.pool)
                .await?;
        }
        Ok(created)
    }

    pub async fn get_application(&self, id: i64) -> DbResult<Option<Application>> {
        let row = sqlx::query("SELECT id, name FROM applications WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(Application {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            tags: self.application_tags(id).await?,
        }))
    }

    pub async fn list_applications(&self) -> DbResult<Vec<Application>> {
        let rows = sqlx::query("SELECT id, name FROM applications ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        let mut list = Vec::with_capacity(rows.len());
        for row in &rows {
            let id: i64 = row.try_get("id")?;
            list.push(Application {
                id,
                name: row.try_get("name")?,
                tags: self.application_tags(id).await?,
            });
        }
        Ok(list)
    }

    pub async fn delete_application(&self, id: i64) -> DbResult<()> {
        sqlx::query("DELETE FROM applications WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Tags in insertion order (join rowid).
    pub async fn application_tags(&self, application: i64) -> DbResult<Vec<Tag>> {
        let rows = sqlx::query(
            "SELECT g.id, g.name, g.category FROM application_tags j \
             JOIN tags g ON g.id = j.tag_id \
             WHERE j.application_id = ? \
             ORDER BY j.rowid",
        )
        .bind(application)
        .fetch_all(&self.pool)
        .await?;
        let mut tags = Vec::with_capacity(rows.len());
        for row in &rows {
            tags.push(Tag {
                id: row.try_get("id")?,
                name: row.try_get("name")?,
                category: row.try_get("category")?,
            });
        }
        Ok(tags)
    }

    pub async fn create_group(&self, group: &TaskGroup) -> DbResult<TaskGroup> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO task_groups (name, kind, state, data) VALUES (?, ?, ?, ?) RETURNING id",
        )
        .bind(&group.name)
        .bind(&group.kind)
        .bind(group.state.as_str())
        .bind(to_json(&group.data))
        .fetch_one(&self.pool)
        .await?;
        let mut created = group.clone();
        created.id = id;
        Ok(created)
    }

    pub async fn get_group(&self, id: i64) -> DbResult<Option<TaskGroup>> {
        let row = sqlx::query("SELECT * FROM task_groups WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(TaskGroup {
            id,
            name: row.try_get("name")?,
            kind: row.try_get("kind")?,
            state: TaskState::parse(&row.try_get::<String, _>("state")?),
            data: json_column(&row, "data")?,
            tasks: self.tasks_in_group(id).await?,
        }))
    }

    pub async fn list_groups(&self) -> DbResult<Vec<TaskGroup>> {
        let rows = sqlx::query("SELECT id FROM task_groups ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        let mut list = Vec::with_capacity(rows.len());
        for row in &rows {
            let id: i64 = row.try_get("id")?;
            if let Some(group) = self.get_group(id).await? {
                list.push(group);
            }
        }
        Ok(list)
    }

    pub async fn set_group_state(&self, id: i64, state: TaskState) -> DbResult<()> {
        sqlx::query("UPDATE task_groups SET state = ? WHERE id = ?")
            .bind(state.as_str())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Delete a group; member tasks cascade.
    pub async fn delete_group(&self, id: i64) -> DbResult<()> {
        sqlx::query("DELETE FROM task_groups WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Insert a file row; the caller writes content at `path`.
    pub async fn create_file(&self, name: &str, path: &str) -> DbResult<File> {
        let id: i64 =
            sqlx::query_scalar("INSERT INTO files (name, path) VALUES (?, ?) RETURNING id")
                .bind(name)
                .bind(path)
                .fetch_one(&self.pool)
                .await?;
        Ok(File {
            id,
            name: name.to_string(),
            path: path.to_string(),
        })
    }

    pub async fn get_file(&self, id: i64) -> DbResult<Option<File>> {
        let row = sqlx::query("SELECT id, name, path FROM files WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| {
            Ok(File {
                id: row.try_get("id")?,
                name: row.try_get("name")?,
                path: row.try_get("path")?,
            })
        })
        .transpose()
    }

    pub async fn create_bucket(&self, path: &str) -> DbResult<i64> {
        sqlx::query_scalar("INSERT INTO buckets (path) VALUES (?) RETURNING id")
            .bind(path)
            .fetch_one(&self.pool)
            .await
    }

    pub async fn get_bucket(&self, id: i64) -> DbResult<Option<String>> {
        sqlx::query_scalar("SELECT path FROM buckets WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    pub async fn delete_bucket(&self, id: i64) -> DbResult<()> {
        sqlx::query("DELETE FROM buckets WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Task;

    #[tokio::test]
    async fn test_application_tags_keep_insertion_order() {
        let db = Database::connect(":memory:").await.expect("connect");
        let app = db
            .create_application(&Application {
                name: "inventory".into(),
                tags: vec![
                    Tag {
                        name: "Java".into(),
                        category: "Language".into(),
                        ..Default::default()
                    },
                    Tag {
                        name: "Go".into(),
                        category: "Language".into(),
                        ..Default::default()
                    },
                ],
                ..Default::default()
            })
            .await
            .expect("create");
        let tags = db.application_tags(app.id).await.expect("tags");
        let names: Vec<&str> = tags.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["Java", "Go"]);
    }

    #[tokio::test]
    async fn test_group_members_cascade() {
        let db = Database::connect(":memory:").await.expect("connect");
        let group = db
            .create_group(&TaskGroup {
                name: "batch".into(),
                ..Default::default()
            })
            .await
            .expect("group");
        let task = db
            .create_task(&Task {
                task_group: Some(group.id),
                ..Default::default()
            })
            .await
            .expect("task");

        db.delete_group(group.id).await.expect("delete");
        assert!(db.get_task(task.id).await.unwrap().is_none());
    }
}
