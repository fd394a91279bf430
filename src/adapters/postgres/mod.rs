//! PostgreSQL adapter: the production `CommerceStore`.

mod store;

pub use store::PostgresCommerceStore;
