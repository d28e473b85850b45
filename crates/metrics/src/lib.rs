//! Metrics collection and export for taskhub.
//!
//! This crate provides a unified metrics interface using the `metrics` crate facade.
//! When the `prometheus` feature is enabled, metrics are exported in Prometheus format.
//!
//! # Usage
//!
//! ```rust,ignore
//! use taskhub_metrics::{counter, cron, gauge, labels};
//!
//! counter!(cron::EXECUTIONS_TOTAL, labels::CRON => "fire_contacts").increment(1);
//! gauge!(cron::DURATION_SECONDS, labels::CRON => "fire_contacts").set(0.42);
//! ```
//!
//! # Features
//!
//! - `prometheus`: Enable Prometheus metrics export

mod definitions;
mod recorder;

pub use {
    definitions::*,
    recorder::{MetricsHandle, MetricsRecorderConfig, init_metrics},
};

// Re-export metrics macros for convenience
pub use metrics::{counter, gauge, histogram};
