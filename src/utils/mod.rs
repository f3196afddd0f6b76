//! Shared helpers

pub mod image;
pub mod math;

pub use math::DistanceMetric;
