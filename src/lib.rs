//! Commerce Core - Purchase fulfillment for the assessment platform
//!
//! Turns at-least-once payment provider notifications into exactly-once
//! state changes: order status, prepaid credit balances, and report
//! access entitlements.

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;
