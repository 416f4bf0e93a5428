use time::{
    format_description::well_known::Rfc3339, macros::format_description, Date, OffsetDateTime,
};

use super::repo_types::{StatusFilter, TaskPriority, TaskStatus};
use crate::error::{AppError, AppResult};

pub const MAX_TITLE_LEN: usize = 100;
pub const MAX_DESCRIPTION_LEN: usize = 500;

/// Trimmed, non-empty, at most `MAX_TITLE_LEN` characters.
pub fn title(raw: &str) -> AppResult<String> {
    let title = raw.trim();
    if title.is_empty() {
        return Err(AppError::validation("Title is required"));
    }
    if title.chars().count() > MAX_TITLE_LEN {
        return Err(AppError::validation(format!(
            "Title cannot exceed {MAX_TITLE_LEN} characters"
        )));
    }
    Ok(title.to_string())
}

/// Trimmed; blank collapses to `None`.
pub fn description(raw: &str) -> AppResult<Option<String>> {
    let description = raw.trim();
    if description.chars().count() > MAX_DESCRIPTION_LEN {
        return Err(AppError::validation(format!(
            "Description cannot exceed {MAX_DESCRIPTION_LEN} characters"
        )));
    }
    Ok((!description.is_empty()).then(|| description.to_string()))
}

pub fn priority(raw: &str) -> AppResult<TaskPriority> {
    raw.trim().parse().map_err(AppError::Validation)
}

pub fn status(raw: &str) -> AppResult<TaskStatus> {
    raw.trim().parse().map_err(AppError::Validation)
}

/// `?status=` on listings: absent, empty or `all` mean every non-deleted task.
pub fn status_filter(raw: Option<&str>) -> AppResult<StatusFilter> {
    match raw.map(str::trim) {
        None | Some("") | Some("all") => Ok(StatusFilter::Visible),
        Some(s) => Ok(StatusFilter::Only(status(s)?)),
    }
}

/// Accepts RFC 3339 timestamps or plain `YYYY-MM-DD` dates (midnight UTC).
/// Blank collapses to `None`.
pub fn due_date(raw: &str) -> AppResult<Option<OffsetDateTime>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    if let Ok(ts) = OffsetDateTime::parse(raw, &Rfc3339) {
        return Ok(Some(ts));
    }
    Date::parse(raw, format_description!("[year]-[month]-[day]"))
        .map(|d| Some(d.midnight().assume_utc()))
        .map_err(|_| AppError::validation("Due date must be a valid date"))
}
