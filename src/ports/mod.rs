//! Ports - interfaces between the commerce domain and the outside world.
//!
//! Following hexagonal architecture, ports define the contracts the
//! orchestrator depends on; adapters implement them.
//!
//! - `CommerceStore` - transactional persistence for events, orders,
//!   wallets, and grants
//! - `PaymentGateway` - provider payload normalization
//! - `EventLock` - named distributed lock with bounded wait
//! - `EventRecorder` - fire-and-forget telemetry sink
//! - `SnapshotJobDispatcher` - post-commit report snapshot jobs

mod gateway;
mod jobs;
mod lock;
mod store;
mod telemetry;

pub use gateway::PaymentGateway;
pub use jobs::{SnapshotJob, SnapshotJobDispatcher};
pub use lock::{EventLock, LockLease};
pub use store::{
    CommerceStore, ConsumeRequest, EventClaim, EventMark, EventSeed, PaidTransition, TopupRequest,
    TransitionStamps,
};
pub use telemetry::{EventRecorder, TelemetryEvent};
