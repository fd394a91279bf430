//! Shared domain foundation: error codes and the commerce error type.

mod errors;

pub use errors::{CommerceError, ErrorCode};
