//! Compliance rules engine for multi-phase research grant applications.

pub mod config;
pub mod error;
pub mod telemetry;
pub mod workflows;
