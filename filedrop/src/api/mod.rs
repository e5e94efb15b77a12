//! API layer for HTTP request handling and data models.
//!
//! - **[`handlers`]**: Axum route handlers
//! - **[`models`]**: Request extractors and response bodies
//!
//! Endpoints are documented with `utoipa` annotations; the generated document is served at
//! `/openapi.json`.

pub mod handlers;
pub mod models;
