//! # ocpp-station
//!
//! OCPP 2.0.1 charging-station-side runtime: the persistent, queued,
//! reliable message-exchange engine between a charging station's local
//! events and a CSMS over one authenticated WebSocket.
//!
//! ## Architecture
//!
//! - **support**: cross-cutting utilities (OCPP-J framing, shutdown, timers)
//! - **domain**: core entities and value objects (transactions, profiles,
//!   queued messages, device-model addressing)
//! - **application**: the engines (transport, message queue, device
//!   model, EVSE manager, authorization, smart charging, monitoring)
//!   and the [`ChargePoint`] orchestrator that binds them
//! - **infrastructure**: external capabilities (the storage interface
//!   and its in-memory reference implementation)
//! - **config**: TOML bootstrap configuration (station identity, EVSE
//!   layout, network profiles)
//!
//! The embedding application supplies storage, a certificate-store
//! capability, and the [`Callbacks`] that execute physical effects, then
//! drives the runtime through `ChargePoint`'s `on_*` methods.

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod support;

pub use rust_ocpp;

// Re-export commonly used types at crate root
pub use application::{
    Callbacks, ChargePoint, CompositeSchedule, PermissiveSecurityProvider, SecurityProvider,
};
pub use config::StationConfig;
pub use domain::{ChargingProfile, MessageAction, ProfileValidationResult, Transaction};
pub use infrastructure::{InMemoryStorage, StationStorage};
