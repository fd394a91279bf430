//! Domain layer: pure commerce types and rules.

pub mod commerce;
pub mod foundation;
