//! Infrastructure - configuration, clock, metrics, and broker
//!
//! This module contains infrastructure concerns:
//! - `config` - Application configuration (TOML loading, defaults)
//! - `clock` - Wall-clock abstraction used by every write path
//! - `metrics` - Lock-free metrics collection
//! - `broker` - Embedded MQTT broker (rumqttd) for live hints

pub mod broker;
pub mod clock;
pub mod config;
pub mod metrics;

// Re-export commonly used types
pub use clock::{Clock, MockClock, SystemClock};
pub use config::Config;
pub use metrics::Metrics;
