use async_trait::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::repo_types::{NewTask, StatusFilter, Task, TaskRow, TaskStatus};
use crate::error::StoreError;

#[async_trait]
pub trait TaskRepo: Send + Sync {
    /// Persists a new `pending` task.
    async fn insert(&self, task: NewTask) -> Result<Task, StoreError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Task>, StoreError>;

    /// Tasks owned by `user_id`, newest first.
    async fn list_by_user(&self, user_id: Uuid, filter: StatusFilter) -> Result<Vec<Task>, StoreError>;

    /// Overwrites the mutable fields. `None` if the task vanished meanwhile.
    async fn update(&self, task: &Task) -> Result<Option<Task>, StoreError>;

    /// Physically removes the task. Returns whether a row was removed.
    async fn delete(&self, id: Uuid) -> Result<bool, StoreError>;
}

const TASK_COLUMNS: &str =
    "id, user_id, title, description, status, priority, due_date, created_at, updated_at";

pub struct PgTaskRepo {
    db: PgPool,
}

impl PgTaskRepo {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl TaskRepo for PgTaskRepo {
    async fn insert(&self, task: NewTask) -> Result<Task, StoreError> {
        let now = OffsetDateTime::now_utc();
        let row = sqlx::query_as::<_, TaskRow>(&format!(
            r#"
            INSERT INTO tasks (id, user_id, title, description, status, priority, due_date, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8)
            RETURNING {TASK_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(task.user_id)
        .bind(&task.title)
        .bind(&task.description)
        .bind(TaskStatus::Pending.as_str())
        .bind(task.priority.as_str())
        .bind(task.due_date)
        .bind(now)
        .fetch_one(&self.db)
        .await?;
        row.try_into()
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Task>, StoreError> {
        let row = sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        row.map(Task::try_from).transpose()
    }

    async fn list_by_user(&self, user_id: Uuid, filter: StatusFilter) -> Result<Vec<Task>, StoreError> {
        let only = match filter {
            StatusFilter::Visible => None,
            StatusFilter::Only(s) => Some(s.as_str()),
        };
        let rows = sqlx::query_as::<_, TaskRow>(&format!(
            r#"
            SELECT {TASK_COLUMNS}
              FROM tasks
             WHERE user_id = $1
               AND CASE WHEN $2::text IS NULL THEN status <> 'deleted' ELSE status = $2 END
             ORDER BY created_at DESC, id DESC
            "#
        ))
        .bind(user_id)
        .bind(only)
        .fetch_all(&self.db)
        .await?;
        rows.into_iter().map(Task::try_from).collect()
    }

    async fn update(&self, task: &Task) -> Result<Option<Task>, StoreError> {
        let row = sqlx::query_as::<_, TaskRow>(&format!(
            r#"
            UPDATE tasks
               SET title = $2, description = $3, status = $4, priority = $5,
                   due_date = $6, updated_at = $7
             WHERE id = $1
            RETURNING {TASK_COLUMNS}
            "#
        ))
        .bind(task.id)
        .bind(&task.title)
        .bind(&task.description)
        .bind(task.status.as_str())
        .bind(task.priority.as_str())
        .bind(task.due_date)
        .bind(task.updated_at)
        .fetch_optional(&self.db)
        .await?;
        row.map(Task::try_from).transpose()
    }

    async fn delete(&self, id: Uuid) -> Result<bool, StoreError> {
        let res = sqlx::query("DELETE FROM tasks WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await?;
        Ok(res.rows_affected() > 0)
    }
}

/// Tasks kept in process memory, in insertion order.
#[derive(Default)]
pub struct MemoryTaskRepo {
    tasks: RwLock<Vec<Task>>,
}

#[async_trait]
impl TaskRepo for MemoryTaskRepo {
    async fn insert(&self, task: NewTask) -> Result<Task, StoreError> {
        let now = OffsetDateTime::now_utc();
        let created = Task {
            id: Uuid::new_v4(),
            user_id: task.user_id,
            title: task.title,
            description: task.description,
            status: TaskStatus::Pending,
            priority: task.priority,
            due_date: task.due_date,
            created_at: now,
            updated_at: now,
        };
        self.tasks.write().await.push(created.clone());
        Ok(created)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Task>, StoreError> {
        Ok(self.tasks.read().await.iter().find(|t| t.id == id).cloned())
    }

    async fn list_by_user(&self, user_id: Uuid, filter: StatusFilter) -> Result<Vec<Task>, StoreError> {
        let tasks = self.tasks.read().await;
        // reverse insertion order breaks created_at ties newest-first
        let mut out: Vec<Task> = tasks
            .iter()
            .rev()
            .filter(|t| t.user_id == user_id && filter.matches(t.status))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }

    async fn update(&self, task: &Task) -> Result<Option<Task>, StoreError> {
        let mut tasks = self.tasks.write().await;
        let Some(slot) = tasks.iter_mut().find(|t| t.id == task.id) else {
            return Ok(None);
        };
        slot.title = task.title.clone();
        slot.description = task.description.clone();
        slot.status = task.status;
        slot.priority = task.priority;
        slot.due_date = task.due_date;
        slot.updated_at = task.updated_at;
        Ok(Some(slot.clone()))
    }

    async fn delete(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut tasks = self.tasks.write().await;
        let before = tasks.len();
        tasks.retain(|t| t.id != id);
        Ok(tasks.len() != before)
    }
}
