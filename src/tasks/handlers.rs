use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        Path, Query, State,
    },
    http::{header, HeaderValue, StatusCode},
    response::Response,
    routing::get,
    Json, Router,
};
use tracing::instrument;
use uuid::Uuid;

use super::{
    dto::{CreateTaskRequest, ListQuery, UpdateTaskRequest},
    validation,
};
use crate::{
    auth::extractors::AuthUser,
    error::{AppError, AppResult},
    response::{reply, Message},
    state::AppState,
};

pub fn task_routes() -> Router<AppState> {
    Router::new()
        .route("/tasks", get(list_tasks).post(create_task))
        .route("/tasks/:id", get(get_task).put(update_task).delete(delete_task))
}

/// An id that does not parse cannot name an existing task.
fn task_id(path: Result<Path<Uuid>, PathRejection>) -> AppResult<Uuid> {
    path.map(|Path(id)| id)
        .map_err(|_| AppError::NotFound("Task not found".into()))
}

#[instrument(skip(state, payload))]
pub async fn create_task(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    payload: Result<Json<CreateTaskRequest>, JsonRejection>,
) -> AppResult<Response> {
    let Json(payload) = payload?;
    let task = state.tasks.create(user_id, payload).await?;
    let mut res = reply(StatusCode::CREATED, &task);
    if let Ok(location) = HeaderValue::from_str(&format!("/api/tasks/{}", task.id)) {
        res.headers_mut().insert(header::LOCATION, location);
    }
    Ok(res)
}

#[instrument(skip(state, query))]
pub async fn list_tasks(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> AppResult<Response> {
    let Query(q) = query.map_err(|_| AppError::validation("Invalid query string"))?;
    let filter = validation::status_filter(q.status.as_deref())?;
    let tasks = state.tasks.list(user_id, filter).await?;
    Ok(reply(StatusCode::OK, tasks))
}

#[instrument(skip(state, id))]
pub async fn get_task(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    id: Result<Path<Uuid>, PathRejection>,
) -> AppResult<Response> {
    let task = state.tasks.get(user_id, task_id(id)?).await?;
    Ok(reply(StatusCode::OK, task))
}

#[instrument(skip(state, id, payload))]
pub async fn update_task(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    id: Result<Path<Uuid>, PathRejection>,
    payload: Result<Json<UpdateTaskRequest>, JsonRejection>,
) -> AppResult<Response> {
    let id = task_id(id)?;
    let payload = match payload {
        Ok(Json(payload)) => payload,
        Err(rejection) => {
            // existence and ownership are reported before a malformed body
            state.tasks.get(user_id, id).await?;
            return Err(rejection.into());
        }
    };
    let task = state.tasks.update(user_id, id, payload).await?;
    Ok(reply(StatusCode::OK, task))
}

#[instrument(skip(state, id))]
pub async fn delete_task(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    id: Result<Path<Uuid>, PathRejection>,
) -> AppResult<Response> {
    state.tasks.delete(user_id, task_id(id)?).await?;
    Ok(reply(
        StatusCode::OK,
        Message {
            message: "Task deleted successfully",
        },
    ))
}
