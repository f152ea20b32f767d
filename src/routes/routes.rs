//! Route table.
//!
//! ## Structure
//! - **Public**
//!   - `GET    /health`: database liveness
//!   - `GET    /metrics`: Prometheus exposition (when enabled)
//!   - `POST   /users`: self-registration
//!
//! - **Behind the Basic auth guard**
//!   - `GET|POST       /instructors`, `/courses`, `/traces`; `GET /users`
//!   - `GET|PUT|DELETE /users/{id}`, `/instructors/{id}`, `/courses/{id}`,
//!     `/traces/{id}`

use crate::{
    auth::require_basic_auth,
    config::HttpLimits,
    handlers::{
        course_handlers::{create_course, delete_course, get_course, list_courses, update_course},
        health_handlers::health,
        instructor_handlers::{
            create_instructor, delete_instructor, get_instructor, list_instructors,
            update_instructor,
        },
        trace_handlers::{create_trace, delete_trace, get_trace, list_traces, update_trace},
        user_handlers::{create_user, delete_user, get_user, list_users, update_user},
    },
    metrics::{metrics_handler, track_requests},
    state::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
};
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

/// Build the full application router.
///
/// Protected routes are wrapped in the auth guard with `route_layer`, so an
/// unknown path still answers 404 rather than 401.
pub fn routes(state: AppState, limits: &HttpLimits) -> Router {
    let mut public = Router::new()
        .route("/health", get(health))
        .route("/users", post(create_user));
    if let Some(metrics) = &state.metrics {
        public = public.route(
            "/metrics",
            get(metrics_handler).with_state(metrics.clone()),
        );
    }

    let protected = Router::new()
        .route("/users", get(list_users))
        .route(
            "/users/{id}",
            get(get_user).put(update_user).delete(delete_user),
        )
        .route("/instructors", get(list_instructors).post(create_instructor))
        .route(
            "/instructors/{id}",
            get(get_instructor)
                .put(update_instructor)
                .delete(delete_instructor),
        )
        .route("/courses", get(list_courses).post(create_course))
        .route(
            "/courses/{id}",
            get(get_course).put(update_course).delete(delete_course),
        )
        .route("/traces", get(list_traces).post(create_trace))
        .route(
            "/traces/{id}",
            get(get_trace).put(update_trace).delete(delete_trace),
        )
        .route_layer(middleware::from_fn_with_state(
            state.authenticator.clone(),
            require_basic_auth,
        ));

    let mut app = public
        .merge(protected)
        .layer(DefaultBodyLimit::max(limits.max_upload_bytes))
        .layer(TimeoutLayer::new(limits.request_timeout))
        .layer(TraceLayer::new_for_http());
    if let Some(metrics) = &state.metrics {
        app = app.layer(middleware::from_fn_with_state(
            metrics.clone(),
            track_requests,
        ));
    }

    app.with_state(state)
}
