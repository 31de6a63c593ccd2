//! Metric names for the switchboard crates.
//!
//! This crate only names metrics and re-exports the `metrics` facade macros.
//! Installing a recorder (Prometheus, statsd, ...) is left to the host binary;
//! without one every call is a no-op.
//!
//! ```rust,ignore
//! use switchboard_metrics::{counter, queue};
//!
//! counter!(queue::ADMISSIONS_TOTAL, "outcome" => "steered").increment(1);
//! ```

mod definitions;

pub use definitions::*;

// Re-export metrics macros for convenience
pub use metrics::{counter, gauge, histogram};
