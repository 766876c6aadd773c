//! Infrastructure layer - external capabilities

pub mod storage;

pub use storage::{AuthCacheEntry, InMemoryStorage, StationStorage, StoredMeterValue};
