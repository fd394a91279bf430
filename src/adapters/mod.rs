//! Adapters - implementations of the ports.

pub mod gateways;
pub mod jobs;
pub mod locks;
pub mod memory;
pub mod postgres;
pub mod telemetry;
