//! HTTP handlers, one module per resource.
//!
//! Handlers decode the request, call a service and encode the result.
//! Path ids that do not parse as UUIDs are rejected with 400 before any
//! service is touched.

pub mod course_handlers;
pub mod health_handlers;
pub mod instructor_handlers;
pub mod trace_handlers;
pub mod user_handlers;

use crate::errors::AppError;
use uuid::Uuid;

pub(crate) fn parse_id(raw: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw).map_err(|_| AppError::bad_request(format!("invalid id `{}`", raw)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn malformed_ids_are_bad_requests() {
        assert!(parse_id("7a0b2c9e-5f4d-4a3b-9c1e-2d3f4a5b6c7d").is_ok());
        let err = parse_id("42").unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }
}
