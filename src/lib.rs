// typestat - shared library for the daemon binary
// Configuration, usage persistence and per-keyboard sessions

pub mod config;
pub mod session;
pub mod store;

pub use config::{Config, ConfigError, FingerMap, KeyboardConfig};
pub use session::{KeyboardSession, UsageTracker};
pub use store::{MemoryStore, SledStore, StoreError, StoreHandle, StoreOp, UsageStore};
