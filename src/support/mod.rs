//! Cross-cutting utilities: OCPP-J framing, shutdown signalling, timers.

pub mod ocpp_frame;
pub mod shutdown;
pub mod timer;

pub use ocpp_frame::{FrameAssembler, OcppFrame, OcppFrameError};
pub use shutdown::ShutdownSignal;
pub use timer::TimerSlot;
