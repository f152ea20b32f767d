use crate::{
    auth::Authenticator,
    metrics::Metrics,
    services::{
        course_service::CourseService, instructor_service::InstructorService,
        trace_service::TraceService, user_service::UserService,
    },
    storage::ObjectStore,
};
use sqlx::SqlitePool;
use std::sync::Arc;

/// Handles shared by every request. Cloning is cheap: the pool, the store and
/// the guard are reference counted.
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub users: UserService,
    pub instructors: InstructorService,
    pub courses: CourseService,
    pub traces: TraceService,
    pub authenticator: Arc<dyn Authenticator>,
    pub metrics: Option<Arc<Metrics>>,
}

impl AppState {
    pub fn new(
        db: SqlitePool,
        store: Arc<dyn ObjectStore>,
        authenticator: Arc<dyn Authenticator>,
        metrics: Option<Arc<Metrics>>,
        hash_cost: u32,
    ) -> Self {
        Self {
            users: UserService::new(db.clone()).with_hash_cost(hash_cost),
            instructors: InstructorService::new(db.clone()),
            courses: CourseService::new(db.clone()),
            traces: TraceService::new(db.clone(), store),
            db,
            authenticator,
            metrics,
        }
    }
}
