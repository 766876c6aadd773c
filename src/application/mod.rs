//! Application layer: the runtime engines and their orchestrator.

pub mod authorization;
pub mod availability;
pub mod callbacks;
pub mod charge_point;
pub mod device_model;
pub mod evse;
pub mod monitoring;
pub mod queue;
pub mod security;
pub mod smart_charging;
pub mod transport;

// Re-export key types for convenience
pub use authorization::AuthorizationEngine;
pub use availability::Availability;
pub use callbacks::Callbacks;
pub use charge_point::ChargePoint;
pub use device_model::{DeviceModel, VariableDeclaration};
pub use evse::{ConnectorEvent, CurrentPhaseType, EvseManager};
pub use monitoring::MonitoringEngine;
pub use queue::{MessageDispatcher, MessageQueue, MessageQueueConfig, RegistrationState};
pub use security::{PermissiveSecurityProvider, SecurityBlock, SecurityProvider};
pub use smart_charging::{CompositeSchedule, SmartChargingHandler};
pub use transport::{ConnectivityManager, WebSocketTransport};
