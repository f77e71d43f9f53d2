//! IO modules - external system interfaces
//!
//! This module contains all external IO operations:
//! - `registration_log` - Append-only JSONL store of committed registrations
//! - `live_channel` - In-process broadcast of live events
//! - `mqtt_egress` - MQTT publisher forwarding live events to dashboards
//! - `http_api` - REST API (hyper)
//! - `prometheus` - Prometheus text format for `/metrics`
//! - `client` - REST client used by remote workstations
//! - `workstation` - TCP line listener for networked scanners

pub mod client;
pub mod http_api;
pub mod live_channel;
pub mod mqtt_egress;
pub mod prometheus;
pub mod registration_log;
pub mod workstation;

// Re-export commonly used types
pub use client::HttpDispatchClient;
pub use http_api::{start_api_server, ApiState};
pub use live_channel::{LiveChannel, LiveSubscription};
pub use mqtt_egress::MqttPublisher;
pub use registration_log::RegistrationLog;
pub use workstation::{start_workstation_listener, WorkstationListenerConfig};
