//! Users, instructors, courses and PDF trace uploads over HTTP.
//!
//! Rows live in SQLite through `sqlx`; trace payloads live in an
//! [`storage::ObjectStore`] (local directory or Google Cloud Storage).

pub mod auth;
pub mod config;
pub mod db;
pub mod errors;
pub mod handlers;
pub mod metrics;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
pub mod storage;
