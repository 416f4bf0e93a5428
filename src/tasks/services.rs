use std::sync::Arc;

use time::OffsetDateTime;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::{
    dto::{CreateTaskRequest, UpdateTaskRequest},
    repo::TaskRepo,
    repo_types::{NewTask, StatusFilter, Task},
    validation,
};
use crate::error::{AppError, AppResult};

/// Task CRUD scoped to the calling user.
#[derive(Clone)]
pub struct TaskService {
    repo: Arc<dyn TaskRepo>,
}

/// Checks, in order, that the task exists and that `user_id` owns it.
///
/// Every task operation after create goes through here.
pub(crate) fn ensure_owned(task: Option<Task>, user_id: Uuid) -> AppResult<Task> {
    let task = task.ok_or_else(|| AppError::NotFound("Task not found".into()))?;
    if task.user_id != user_id {
        warn!(task_id = %task.id, %user_id, "task owned by another user");
        return Err(AppError::Forbidden("Not authorized".into()));
    }
    Ok(task)
}

impl TaskService {
    pub fn new(repo: Arc<dyn TaskRepo>) -> Self {
        Self { repo }
    }

    async fn load_owned(&self, user_id: Uuid, task_id: Uuid) -> AppResult<Task> {
        let task = self.repo.find_by_id(task_id).await?;
        ensure_owned(task, user_id)
    }

    #[instrument(skip(self, req))]
    pub async fn create(&self, user_id: Uuid, req: CreateTaskRequest) -> AppResult<Task> {
        let title = validation::title(req.title.as_deref().unwrap_or_default())?;
        let description = match req.description.as_deref() {
            Some(d) => validation::description(d)?,
            None => None,
        };
        let priority = match req.priority.as_deref() {
            Some(p) => validation::priority(p)?,
            None => Default::default(),
        };
        let due_date = match req.due_date.as_deref() {
            Some(d) => validation::due_date(d)?,
            None => None,
        };

        let task = self
            .repo
            .insert(NewTask {
                user_id,
                title,
                description,
                priority,
                due_date,
            })
            .await?;
        info!(task_id = %task.id, "task created");
        Ok(task)
    }

    #[instrument(skip(self))]
    pub async fn list(&self, user_id: Uuid, filter: StatusFilter) -> AppResult<Vec<Task>> {
        Ok(self.repo.list_by_user(user_id, filter).await?)
    }

    #[instrument(skip(self))]
    pub async fn get(&self, user_id: Uuid, task_id: Uuid) -> AppResult<Task> {
        self.load_owned(user_id, task_id).await
    }

    /// Partial update; each provided field is validated like on create.
    /// A provided blank title is rejected, a blank description or due date clears it.
    #[instrument(skip(self, req))]
    pub async fn update(&self, user_id: Uuid, task_id: Uuid, req: UpdateTaskRequest) -> AppResult<Task> {
        let mut task = self.load_owned(user_id, task_id).await?;

        if let Some(title) = req.title.as_deref() {
            task.title = validation::title(title)?;
        }
        if let Some(description) = req.description.as_deref() {
            task.description = validation::description(description)?;
        }
        if let Some(status) = req.status.as_deref() {
            task.status = validation::status(status)?;
        }
        if let Some(priority) = req.priority.as_deref() {
            task.priority = validation::priority(priority)?;
        }
        if let Some(due_date) = req.due_date.as_deref() {
            task.due_date = validation::due_date(due_date)?;
        }
        task.updated_at = OffsetDateTime::now_utc();

        // last write wins; a concurrent delete shows up as not found
        let updated = self
            .repo
            .update(&task)
            .await?
            .ok_or_else(|| AppError::NotFound("Task not found".into()))?;
        info!(task_id = %updated.id, "task updated");
        Ok(updated)
    }

    #[instrument(skip(self))]
    pub async fn delete(&self, user_id: Uuid, task_id: Uuid) -> AppResult<()> {
        let task = self.load_owned(user_id, task_id).await?;
        if !self.repo.delete(task.id).await? {
            return Err(AppError::NotFound("Task not found".into()));
        }
        info!(task_id = %task.id, "task deleted");
        Ok(())
    }
}
