//! Trace endpoints.
//!
//! `POST /traces` is a multipart form with a required `file` field (a PDF)
//! and an optional `user_id` field. The file is streamed straight into the
//! object store while the form is read, so a `user_id` that turns out to be
//! invalid after the upload costs a discard of the fresh object. The fresh
//! object is held in a [`PendingObject`], which also discards it when the
//! request is dropped before the row exists.

use super::parse_id;
use crate::{
    errors::AppError,
    models::trace::{Trace, TraceInput},
    services::trace_service::{PendingObject, TraceService},
    state::AppState,
};
use axum::{
    Json,
    extract::{Multipart, Path, State, rejection::JsonRejection},
    http::StatusCode,
};
use futures::StreamExt;
use std::io;
use tracing::instrument;
use uuid::Uuid;

pub async fn list_traces(State(state): State<AppState>) -> Result<Json<Vec<Trace>>, AppError> {
    Ok(Json(state.traces.list().await?))
}

pub async fn get_trace(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Trace>, AppError> {
    let id = parse_id(&id)?;
    Ok(Json(state.traces.get(id).await?))
}

/// `POST /traces`
#[instrument(name = "create_trace", skip_all)]
pub async fn create_trace(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<Trace>), AppError> {
    let mut pending: Option<PendingObject> = None;

    let user_id = match read_form(&state.traces, &mut multipart, &mut pending).await {
        Ok(user_id) => user_id,
        Err(err) => {
            if let Some(upload) = pending.take() {
                upload.discard().await;
            }
            return Err(err);
        }
    };

    let pending = pending.ok_or_else(|| AppError::bad_request("missing `file` field"))?;
    let trace = pending.record(user_id).await?;
    Ok((StatusCode::CREATED, Json(trace)))
}

/// Walk the form, uploading the file as soon as it shows up. Whatever was
/// uploaded is left in `pending`, also on error.
async fn read_form(
    traces: &TraceService,
    multipart: &mut Multipart,
    pending: &mut Option<PendingObject>,
) -> Result<Option<Uuid>, AppError> {
    let mut user_id = None;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("user_id") => {
                let raw = field.text().await?;
                user_id = parse_user_id(&raw)?;
            }
            Some("file") => {
                if pending.is_some() {
                    return Err(AppError::bad_request("only one `file` field is accepted"));
                }
                let file_name = field
                    .file_name()
                    .map(str::to_string)
                    .ok_or_else(|| AppError::bad_request("`file` field has no filename"))?;
                if !TraceService::accepts_file_name(&file_name) {
                    return Err(AppError::bad_request(format!(
                        "`{}` is not a PDF file",
                        file_name
                    )));
                }
                let content_type = field.content_type().map(str::to_string);
                let body = field.map(|chunk| chunk.map_err(io::Error::other)).boxed();

                let object = traces
                    .upload(&file_name, content_type.as_deref(), body)
                    .await?;
                *pending = Some(PendingObject::new(traces.clone(), object));
            }
            _ => {}
        }
    }

    Ok(user_id)
}

/// Blank means "generate one"; anything else must be a UUID.
fn parse_user_id(raw: &str) -> Result<Option<Uuid>, AppError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    Uuid::parse_str(raw)
        .map(Some)
        .map_err(|_| AppError::bad_request(format!("invalid user_id `{}`", raw)))
}

/// `PUT /traces/{id}`: rewrites the row only, storage is left alone.
pub async fn update_trace(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<TraceInput>, JsonRejection>,
) -> Result<StatusCode, AppError> {
    let id = parse_id(&id)?;
    let Json(input) = payload?;
    state.traces.update(id, input).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `DELETE /traces/{id}`
pub async fn delete_trace(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let id = parse_id(&id)?;
    state.traces.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_id_field_parsing() {
        assert_eq!(parse_user_id("").unwrap(), None);
        assert_eq!(parse_user_id("  ").unwrap(), None);
        let id = Uuid::new_v4();
        assert_eq!(parse_user_id(&format!(" {} ", id)).unwrap(), Some(id));
        assert_eq!(
            parse_user_id("bob").unwrap_err().status,
            StatusCode::BAD_REQUEST
        );
    }
}
