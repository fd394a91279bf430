//! In-memory commerce store for tests and local development.

mod store;

pub use store::{InMemoryCommerceStore, MemoryTx};
