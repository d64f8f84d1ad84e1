//! stampede, a config-driven HTTP load generator.
//!
//! A YAML test description (endpoints, load profile, expectations) is driven
//! against a target service for a bounded duration; the run reports latency
//! percentiles, throughput and error counts. Two dispatch modes are
//! supported: a resizable virtual-user pool (optionally rate-capped) and an
//! open-loop arrival-rate dispatcher.

pub mod config;
pub mod dispatch;
pub mod engine;
pub mod executor;
pub mod limiter;
pub mod metrics;
pub mod reporter;
pub mod scheduler;
pub mod template;
pub mod worker;

pub use config::Config;
pub use engine::{Engine, EngineError};
pub use metrics::{Collector, RequestResult, Stats};
