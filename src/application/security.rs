//! Security events
//!
//! `SecurityEventNotification` plumbing: the critical subset goes to the
//! CSMS, every event reaches the user callback. Also hosts the
//! `SecurityProvider` capability consumed by network-profile validation
//! and firmware-certificate checks.

use std::sync::Arc;

use chrono::Utc;
use rust_ocpp::v2_0_1::messages::security_event_notification::SecurityEventNotificationRequest;
use tracing::{info, warn};

use super::queue::MessageDispatcher;
use crate::domain::MessageAction;

/// Security event types, spelled per OCPP 2.0.1 appendix.
pub mod security_events {
    pub const STARTUP_OF_THE_DEVICE: &str = "StartupOfTheDevice";
    pub const RESET_OR_REBOOT: &str = "ResetOrReboot";
    pub const FIRMWARE_UPDATED: &str = "FirmwareUpdated";
    pub const FAILED_TO_AUTHENTICATE_AT_CSMS: &str = "FailedToAuthenticateAtCsms";
    pub const CSMS_FAILED_TO_AUTHENTICATE: &str = "CsmsFailedToAuthenticate";
    pub const SETTING_SYSTEM_TIME: &str = "SettingSystemTime";
    pub const SECURITY_LOG_WAS_CLEARED: &str = "SecurityLogWasCleared";
    pub const INVALID_FIRMWARE_SIGNATURE: &str = "InvalidFirmwareSignature";
    pub const INVALID_FIRMWARE_SIGNING_CERTIFICATE: &str = "InvalidFirmwareSigningCertificate";
    pub const INVALID_CSMS_CERTIFICATE: &str = "InvalidCsmsCertificate";
    pub const INVALID_CHARGING_STATION_CERTIFICATE: &str = "InvalidChargingStationCertificate";
    pub const INVALID_TLS_VERSION: &str = "InvalidTLSVersion";
    pub const INVALID_TLS_CIPHER_SUITE: &str = "InvalidTLSCipherSuite";
    pub const INVALID_MESSAGES: &str = "InvalidMessages";
    pub const ATTEMPTED_REPLAY_ATTACKS: &str = "AttemptedReplayAttacks";
    pub const TAMPER_DETECTION_ACTIVATED: &str = "TamperDetectionActivated";
    pub const RECONFIGURATION_OF_SECURITY_PARAMETERS: &str =
        "ReconfigurationOfSecurityParameters";
}

/// Whether an event type is in the critical set that must reach the CSMS.
pub fn is_critical(event_type: &str) -> bool {
    use security_events::*;
    matches!(
        event_type,
        STARTUP_OF_THE_DEVICE
            | RESET_OR_REBOOT
            | FIRMWARE_UPDATED
            | FAILED_TO_AUTHENTICATE_AT_CSMS
            | CSMS_FAILED_TO_AUTHENTICATE
            | SETTING_SYSTEM_TIME
            | SECURITY_LOG_WAS_CLEARED
            | INVALID_FIRMWARE_SIGNATURE
            | INVALID_FIRMWARE_SIGNING_CERTIFICATE
            | INVALID_CSMS_CERTIFICATE
            | INVALID_CHARGING_STATION_CERTIFICATE
            | INVALID_TLS_VERSION
            | INVALID_TLS_CIPHER_SUITE
    )
}

/// TLS certificate store and signing engine, consumed as a capability.
pub trait SecurityProvider: Send + Sync {
    /// A charging-station leaf certificate is installed (needed before a
    /// slot with security profile 3 may be configured).
    fn leaf_certificate_installed(&self) -> bool;
    /// The CSMS root certificate is installed (profiles 2 and 3).
    fn csms_root_certificate_installed(&self) -> bool;
    /// Validate the signing certificate of a firmware image.
    fn verify_firmware_signing_certificate(&self, certificate: &str) -> bool;
    /// Days until the installed leaf certificate expires, if one exists.
    fn days_until_leaf_certificate_expires(&self) -> Option<i64>;
}

/// Provider used in development setups without a certificate store.
pub struct PermissiveSecurityProvider;

impl SecurityProvider for PermissiveSecurityProvider {
    fn leaf_certificate_installed(&self) -> bool {
        true
    }

    fn csms_root_certificate_installed(&self) -> bool {
        true
    }

    fn verify_firmware_signing_certificate(&self, _certificate: &str) -> bool {
        true
    }

    fn days_until_leaf_certificate_expires(&self) -> Option<i64> {
        None
    }
}

type SecurityEventObserver = Box<dyn Fn(&str, Option<&str>) + Send + Sync>;

pub struct SecurityBlock {
    dispatcher: Arc<MessageDispatcher>,
    observer: std::sync::Mutex<Option<SecurityEventObserver>>,
}

impl SecurityBlock {
    pub fn new(dispatcher: Arc<MessageDispatcher>) -> Self {
        Self {
            dispatcher,
            observer: std::sync::Mutex::new(None),
        }
    }

    pub fn set_observer(&self, observer: SecurityEventObserver) {
        *self.observer.lock().unwrap() = Some(observer);
    }

    /// Report a security event. Critical events (or `critical = Some(true)`)
    /// are sent to the CSMS; every event reaches the observer.
    pub async fn security_event_notification_req(
        &self,
        event_type: &str,
        tech_info: Option<&str>,
        critical: Option<bool>,
    ) {
        info!(event_type, ?tech_info, "Security event");

        if let Some(observer) = self.observer.lock().unwrap().as_ref() {
            observer(event_type, tech_info);
        }

        if critical.unwrap_or_else(|| is_critical(event_type)) {
            let request = SecurityEventNotificationRequest {
                kind: event_type.to_string(),
                timestamp: Utc::now(),
                tech_info: tech_info.map(String::from),
            };
            let payload = match serde_json::to_value(&request) {
                Ok(payload) => payload,
                Err(e) => {
                    warn!(error = %e, "Could not serialize SecurityEventNotification");
                    return;
                }
            };
            let _ = self
                .dispatcher
                .dispatch_call(MessageAction::SecurityEventNotification, payload, false)
                .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::queue::{
        MessageQueue, MessageQueueConfig, RegistrationState, SendFn,
    };
    use crate::infrastructure::InMemoryStorage;
    use tokio::sync::mpsc;

    fn block() -> (SecurityBlock, Arc<MessageQueue>) {
        let send_fn: SendFn = Arc::new(|_| true);
        let (tx, _rx) = mpsc::unbounded_channel();
        let queue = MessageQueue::new(
            MessageQueueConfig::default(),
            Arc::new(InMemoryStorage::new()),
            send_fn,
            tx,
        );
        (
            SecurityBlock::new(Arc::new(MessageDispatcher::new(
                queue.clone(),
                RegistrationState::new(),
            ))),
            queue,
        )
    }

    #[test]
    fn critical_set_matches_the_profile() {
        assert!(is_critical(security_events::STARTUP_OF_THE_DEVICE));
        assert!(is_critical(security_events::INVALID_CSMS_CERTIFICATE));
        assert!(!is_critical(security_events::INVALID_MESSAGES));
        assert!(!is_critical(security_events::ATTEMPTED_REPLAY_ATTACKS));
    }

    #[tokio::test]
    async fn critical_events_are_queued_for_the_csms() {
        let (block, queue) = block();
        block
            .security_event_notification_req(
                security_events::STARTUP_OF_THE_DEVICE,
                Some("powered up"),
                None,
            )
            .await;
        // SecurityEventNotification is transactional: queued even before boot
        assert_eq!(queue.queued_call_count().await, 1);
    }

    #[tokio::test]
    async fn non_critical_events_only_reach_the_observer() {
        let (block, queue) = block();
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        block.set_observer(Box::new(move |event, _| {
            seen_clone.lock().unwrap().push(event.to_string());
        }));

        block
            .security_event_notification_req(security_events::INVALID_MESSAGES, None, None)
            .await;
        assert_eq!(queue.queued_call_count().await, 0);
        assert_eq!(seen.lock().unwrap().as_slice(), ["InvalidMessages"]);
    }

    #[tokio::test]
    async fn critical_override_forces_send() {
        let (block, queue) = block();
        block
            .security_event_notification_req(
                security_events::INVALID_MESSAGES,
                Some("[not json"),
                Some(true),
            )
            .await;
        assert_eq!(queue.queued_call_count().await, 1);
    }
}
