//! Observability for the access service: Prometheus metrics and helpers.

pub mod metrics;
