//! HTTP surface: CloudEvents receiver and health check

pub mod dto;
pub mod proto;
pub mod rest;

pub use rest::{create_router, AppState};
