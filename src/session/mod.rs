// src/session/mod.rs

//! Cluster-wide update session: a lease that lets one update domain at a
//! time change its deployed applications.

pub mod clock;
pub mod coordinator;
pub mod file_store;
pub mod lease;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use coordinator::{CoordinatorOptions, UpdateSessionCoordinator};
pub use file_store::FileSessionStore;
pub use lease::{LeaseRecord, UpdateSession};
pub use store::{Etag, InMemorySessionStore, StoredRecord, UpdateSessionStore, WriteCondition};
