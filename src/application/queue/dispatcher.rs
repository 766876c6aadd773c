//! Message dispatcher
//!
//! Thin façade over [`MessageQueue`](super::MessageQueue) that knows the
//! current registration status and decides whether an outbound Call is
//! enqueued, persisted, or discarded. All station logic dispatches
//! through here; only the BootNotification call may flow while the
//! station is not yet `Accepted`.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use rust_ocpp::v2_0_1::enumerations::registration_status_enum_type::RegistrationStatusEnumType;
use serde_json::Value;
use tracing::debug;

use super::{CallOutcome, MessageQueue};
use crate::domain::{InfraResult, MessageAction, QueuedMessage};

// ── RegistrationState ──────────────────────────────────────────

const REGISTRATION_REJECTED: u8 = 0;
const REGISTRATION_PENDING: u8 = 1;
const REGISTRATION_ACCEPTED: u8 = 2;

/// Process-wide registration status, shared between the dispatcher and
/// the orchestrator. Initial state is `Rejected`; transitions happen
/// only on `BootNotificationResponse`.
#[derive(Clone, Default)]
pub struct RegistrationState(Arc<AtomicU8>);

impl RegistrationState {
    pub fn new() -> Self {
        Self(Arc::new(AtomicU8::new(REGISTRATION_REJECTED)))
    }

    pub fn get(&self) -> RegistrationStatusEnumType {
        match self.0.load(Ordering::SeqCst) {
            REGISTRATION_ACCEPTED => RegistrationStatusEnumType::Accepted,
            REGISTRATION_PENDING => RegistrationStatusEnumType::Pending,
            _ => RegistrationStatusEnumType::Rejected,
        }
    }

    pub fn set(&self, status: RegistrationStatusEnumType) {
        let value = match status {
            RegistrationStatusEnumType::Accepted => REGISTRATION_ACCEPTED,
            RegistrationStatusEnumType::Pending => REGISTRATION_PENDING,
            RegistrationStatusEnumType::Rejected => REGISTRATION_REJECTED,
        };
        self.0.store(value, Ordering::SeqCst);
    }

    pub fn is_accepted(&self) -> bool {
        self.0.load(Ordering::SeqCst) == REGISTRATION_ACCEPTED
    }
}

// ── MessageDispatcher ──────────────────────────────────────────

pub struct MessageDispatcher {
    queue: Arc<MessageQueue>,
    registration: RegistrationState,
}

impl MessageDispatcher {
    pub fn new(queue: Arc<MessageQueue>, registration: RegistrationState) -> Self {
        Self {
            queue,
            registration,
        }
    }

    pub fn registration(&self) -> &RegistrationState {
        &self.registration
    }

    /// Dispatch a Call without waiting for its response; the response is
    /// routed back to the orchestrator through correlation.
    pub async fn dispatch_call(
        &self,
        action: MessageAction,
        payload: Value,
        initiated_by_trigger: bool,
    ) -> InfraResult<()> {
        let message = QueuedMessage::new(action, payload, initiated_by_trigger);
        if self.permits(&message) {
            self.queue.push(message).await?;
        }
        Ok(())
    }

    /// Dispatch a Call and wait for its final outcome (response, error,
    /// or internal timeout).
    pub async fn dispatch_call_and_wait(
        &self,
        action: MessageAction,
        payload: Value,
    ) -> InfraResult<CallOutcome> {
        let message = QueuedMessage::new(action, payload, false);
        if !self.permits(&message) {
            return Ok(CallOutcome::Error {
                code: "GenericError".to_string(),
                description: "Message discarded while registration is not Accepted".to_string(),
                details: Value::Object(Default::default()),
            });
        }
        self.queue.push_and_wait(message).await
    }

    pub async fn dispatch_call_result(&self, unique_id: &str, payload: Value) {
        self.queue.push_call_result(unique_id, payload).await;
    }

    pub async fn dispatch_call_error(&self, unique_id: &str, code: &str, description: &str) {
        self.queue.push_call_error(unique_id, code, description).await;
    }

    /// Whether the message may be enqueued under the current
    /// registration status. Transactional messages are always queued;
    /// of the rest only BootNotification flows before acceptance, unless
    /// `QueueAllMessages` holds them for later (minus the configured
    /// discard set).
    fn permits(&self, message: &QueuedMessage) -> bool {
        if self.registration.is_accepted() {
            return true;
        }
        if message.action == MessageAction::BootNotification {
            return true;
        }
        if message.action.is_transaction_message() {
            return true;
        }

        let config = self.queue.config_snapshot();
        if config.queue_all_messages
            && !config
                .message_types_discard_for_queueing
                .contains(&message.action)
        {
            return true;
        }

        debug!(
            action = %message.action,
            "Discarding message while registration is not Accepted"
        );
        false
    }
}
