//! Coordinator statistics

pub mod metrics;

pub use metrics::{CoordinatorCounters, CoordinatorStats};
