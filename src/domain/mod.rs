//! Core business entities and value objects.

pub mod charging_profile;
pub mod device_model;
pub mod errors;
pub mod message;
pub mod network_profile;
pub mod transaction;

// Re-export commonly used types
pub use charging_profile::{
    ChargingProfile, ChargingSchedule, ChargingSchedulePeriod, InstalledProfile,
    ProfileValidationResult,
};
pub use device_model::{
    AttributeKind, Component, Monitor, MonitorKind, Mutability, StoredVariable, ValueSource,
    Variable, VariableCharacteristics, VariableDataType,
};
pub use errors::{DomainError, DomainResult, InfraError, InfraResult, StationError, StationResult};
pub use message::{MessageAction, QueueLane, QueuedMessage, UnknownAction};
pub use network_profile::NetworkConnectionProfile;
pub use transaction::Transaction;
