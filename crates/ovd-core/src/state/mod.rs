//! Durable pipeline state: stage sets, locks, and per-job persistence.

pub mod lock;
pub mod stage;
pub mod store;

pub use lock::{LockError, LockOptions};
pub use stage::Stage;
pub use store::StateStore;
