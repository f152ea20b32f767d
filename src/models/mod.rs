//! Core data models for the course / trace API.
//!
//! Each record maps to one table via `sqlx::FromRow` and serializes as the
//! JSON body the HTTP layer returns. The `*Input` types are what clients send
//! on POST and PUT; server-assigned fields (timestamps, and the id when the
//! client leaves it out) never come from the client.

pub mod course;
pub mod instructor;
pub mod trace;
pub mod user;
