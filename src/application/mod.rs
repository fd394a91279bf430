//! Application services over the store port.

pub mod catalog;
pub mod entitlements;
pub mod orders;
pub mod wallet;
pub mod webhook;
