//! Face Authentication Service Library

pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod service;
pub mod transport;
pub mod utils;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::Config;
pub use error::AuthError;
