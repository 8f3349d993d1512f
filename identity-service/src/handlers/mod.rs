//! HTTP handlers.

pub mod auth;
pub mod metrics;
pub mod roles;
