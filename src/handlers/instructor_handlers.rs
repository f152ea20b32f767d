use super::parse_id;
use crate::{
    errors::AppError,
    models::instructor::{Instructor, InstructorInput},
    state::AppState,
};
use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
};

pub async fn list_instructors(
    State(state): State<AppState>,
) -> Result<Json<Vec<Instructor>>, AppError> {
    Ok(Json(state.instructors.list().await?))
}

pub async fn get_instructor(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Instructor>, AppError> {
    let id = parse_id(&id)?;
    Ok(Json(state.instructors.get(id).await?))
}

pub async fn create_instructor(
    State(state): State<AppState>,
    payload: Result<Json<InstructorInput>, JsonRejection>,
) -> Result<(StatusCode, Json<Instructor>), AppError> {
    let Json(input) = payload?;
    let instructor = state.instructors.create(input).await?;
    Ok((StatusCode::CREATED, Json(instructor)))
}

pub async fn update_instructor(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<InstructorInput>, JsonRejection>,
) -> Result<StatusCode, AppError> {
    let id = parse_id(&id)?;
    let Json(input) = payload?;
    state.instructors.update(id, input).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn delete_instructor(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let id = parse_id(&id)?;
    state.instructors.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
