use super::parse_id;
use crate::{
    errors::AppError,
    models::course::{Course, CourseInput},
    state::AppState,
};
use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
};

pub async fn list_courses(State(state): State<AppState>) -> Result<Json<Vec<Course>>, AppError> {
    Ok(Json(state.courses.list().await?))
}

pub async fn get_course(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Course>, AppError> {
    let id = parse_id(&id)?;
    Ok(Json(state.courses.get(id).await?))
}

pub async fn create_course(
    State(state): State<AppState>,
    payload: Result<Json<CourseInput>, JsonRejection>,
) -> Result<(StatusCode, Json<Course>), AppError> {
    let Json(input) = payload?;
    let course = state.courses.create(input).await?;
    Ok((StatusCode::CREATED, Json(course)))
}

/// `PUT /courses/{id}`: full overwrite of the mutable fields.
pub async fn update_course(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<CourseInput>, JsonRejection>,
) -> Result<StatusCode, AppError> {
    let id = parse_id(&id)?;
    let Json(input) = payload?;
    state.courses.update(id, input).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn delete_course(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let id = parse_id(&id)?;
    state.courses.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
