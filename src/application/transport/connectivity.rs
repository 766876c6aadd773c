//! Connectivity manager
//!
//! Keeps the ordered list of network connection profiles (priority +
//! security profile) and the currently active transport. On profile
//! exhaustion the orchestrator asks it to advance to the next slot;
//! the list wraps around.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use tokio::sync::mpsc;
use tracing::{info, warn};

use super::websocket::{ConnectionOptions, TransportEvent, WebSocketTransport};
use crate::domain::network_profile::{order_by_priority, NetworkConnectionProfile};

/// Everything needed to open a connection that is not part of the
/// network profile itself (liveness + retry knobs, credentials).
#[derive(Debug, Clone, Default)]
pub struct ConnectivityOptions {
    pub basic_auth_identity: String,
    pub basic_auth_password: String,
    pub ping_interval: std::time::Duration,
    pub pong_timeout: std::time::Duration,
    pub retry_backoff_wait_minimum: std::time::Duration,
    pub retry_backoff_repeat_times: u32,
    pub retry_backoff_random_range: u64,
    pub connection_attempts: u32,
}

pub struct ConnectivityManager {
    profiles: Mutex<Vec<NetworkConnectionProfile>>,
    active_index: AtomicUsize,
    options: Mutex<ConnectivityOptions>,
    transport: Mutex<Option<std::sync::Arc<WebSocketTransport>>>,
    events: mpsc::UnboundedSender<TransportEvent>,
}

impl ConnectivityManager {
    pub fn new(
        profiles: Vec<NetworkConnectionProfile>,
        priority_csl: &str,
        options: ConnectivityOptions,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Self {
        let ordered = order_by_priority(&profiles, priority_csl);
        Self {
            profiles: Mutex::new(ordered),
            active_index: AtomicUsize::new(0),
            options: Mutex::new(options),
            transport: Mutex::new(None),
            events,
        }
    }

    /// Connect using the given configuration slot, or the currently
    /// active profile when `None`.
    pub fn connect(&self, configuration_slot: Option<i32>) {
        let profiles = self.profiles.lock().unwrap();
        if profiles.is_empty() {
            warn!("No network connection profiles configured");
            return;
        }

        let index = match configuration_slot {
            Some(slot) => match profiles.iter().position(|p| p.configuration_slot == slot) {
                Some(index) => index,
                None => {
                    warn!(slot, "Unknown configuration slot, keeping active profile");
                    self.active_index.load(Ordering::SeqCst) % profiles.len()
                }
            },
            None => self.active_index.load(Ordering::SeqCst) % profiles.len(),
        };
        self.active_index.store(index, Ordering::SeqCst);
        let profile = profiles[index].clone();
        drop(profiles);

        let options = self.connection_options_for(&profile);
        info!(
            configuration_slot = profile.configuration_slot,
            security_profile = profile.security_profile,
            url = profile.ocpp_csms_url.as_str(),
            "Selecting network profile"
        );

        let transport = WebSocketTransport::new(
            profile.configuration_slot,
            options,
            self.events.clone(),
        );
        transport.start();

        let mut active = self.transport.lock().unwrap();
        if let Some(old) = active.replace(transport) {
            old.disconnect();
        }
    }

    /// Close the active connection and stop reconnect attempts.
    pub fn disconnect(&self) {
        if let Some(transport) = self.transport.lock().unwrap().take() {
            transport.disconnect();
        }
    }

    /// Tear down and reconnect the active profile after `delay`.
    pub fn reconnect(self: &std::sync::Arc<Self>, delay: std::time::Duration) {
        self.disconnect();
        let manager = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            manager.connect(None);
        });
    }

    /// Advance to the next profile in priority order (wrapping) and
    /// connect. Called when a profile exhausts its attempts.
    pub fn advance_network_profile(&self) {
        let count = self.profiles.lock().unwrap().len();
        if count == 0 {
            return;
        }
        let next = (self.active_index.load(Ordering::SeqCst) + 1) % count;
        self.active_index.store(next, Ordering::SeqCst);
        info!(index = next, "Advancing to next network profile");
        self.connect(None);
    }

    pub fn is_websocket_connected(&self) -> bool {
        self.transport
            .lock()
            .unwrap()
            .as_ref()
            .map(|t| t.is_connected())
            .unwrap_or(false)
    }

    pub fn send_to_websocket(&self, text: String) -> bool {
        match self.transport.lock().unwrap().as_ref() {
            Some(transport) => transport.send(text),
            None => false,
        }
    }

    /// The profile in the given slot, if configured.
    pub fn network_connection_profile(&self, slot: i32) -> Option<NetworkConnectionProfile> {
        self.profiles
            .lock()
            .unwrap()
            .iter()
            .find(|p| p.configuration_slot == slot)
            .cloned()
    }

    /// Install or replace a profile slot; takes effect on next connect.
    pub fn set_network_profile(&self, profile: NetworkConnectionProfile) {
        let mut profiles = self.profiles.lock().unwrap();
        if let Some(existing) = profiles
            .iter_mut()
            .find(|p| p.configuration_slot == profile.configuration_slot)
        {
            *existing = profile;
        } else {
            profiles.push(profile);
        }
    }

    /// Re-order the slots from a fresh `NetworkConfigurationPriority` CSL.
    pub fn set_network_configuration_priority(&self, priority_csl: &str) {
        let mut profiles = self.profiles.lock().unwrap();
        let ordered = order_by_priority(&profiles, priority_csl);
        *profiles = ordered;
        self.active_index.store(0, Ordering::SeqCst);
    }

    /// Update credentials/liveness knobs without reconnecting; they
    /// apply to the next connection.
    pub fn set_connection_options(&self, options: ConnectivityOptions) {
        *self.options.lock().unwrap() = options;
    }

    pub fn set_basic_auth_password(&self, password: String) {
        self.options.lock().unwrap().basic_auth_password = password;
    }

    fn connection_options_for(&self, profile: &NetworkConnectionProfile) -> ConnectionOptions {
        let options = self.options.lock().unwrap();
        let basic_auth = if profile.uses_basic_auth() {
            let identity = profile
                .basic_auth_identity
                .clone()
                .unwrap_or_else(|| options.basic_auth_identity.clone());
            Some((identity, options.basic_auth_password.clone()))
        } else {
            None
        };
        ConnectionOptions {
            csms_url: profile.ocpp_csms_url.clone(),
            security_profile: profile.security_profile,
            basic_auth,
            ping_interval: options.ping_interval,
            pong_timeout: options.pong_timeout,
            retry_backoff_wait_minimum: options.retry_backoff_wait_minimum,
            retry_backoff_repeat_times: options.retry_backoff_repeat_times,
            retry_backoff_random_range: options.retry_backoff_random_range,
            connection_attempts: options.connection_attempts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(slot: i32, security: i32) -> NetworkConnectionProfile {
        NetworkConnectionProfile {
            configuration_slot: slot,
            security_profile: security,
            ocpp_csms_url: format!("ws://csms{}.example.com/ocpp", slot),
            basic_auth_identity: None,
        }
    }

    fn manager(profiles: Vec<NetworkConnectionProfile>, priority: &str) -> ConnectivityManager {
        let (tx, _rx) = mpsc::unbounded_channel();
        ConnectivityManager::new(
            profiles,
            priority,
            ConnectivityOptions {
                basic_auth_identity: "CS001".into(),
                basic_auth_password: "secret".into(),
                ..Default::default()
            },
            tx,
        )
    }

    #[test]
    fn profiles_ordered_by_priority_csl() {
        let manager = manager(vec![profile(1, 1), profile(2, 2)], "2,1");
        let first = manager.profiles.lock().unwrap()[0].clone();
        assert_eq!(first.configuration_slot, 2);
    }

    #[test]
    fn lookup_by_slot() {
        let manager = manager(vec![profile(1, 1), profile(2, 2)], "1,2");
        assert!(manager.network_connection_profile(2).is_some());
        assert!(manager.network_connection_profile(9).is_none());
    }

    #[test]
    fn set_network_profile_replaces_slot() {
        let manager = manager(vec![profile(1, 1)], "1");
        manager.set_network_profile(NetworkConnectionProfile {
            security_profile: 2,
            ..profile(1, 1)
        });
        assert_eq!(
            manager.network_connection_profile(1).unwrap().security_profile,
            2
        );
        manager.set_network_profile(profile(5, 3));
        assert!(manager.network_connection_profile(5).is_some());
    }

    #[test]
    fn basic_auth_only_for_low_security_profiles() {
        let manager = manager(vec![profile(1, 1), profile(2, 3)], "1,2");
        let p1 = manager.network_connection_profile(1).unwrap();
        let options = manager.connection_options_for(&p1);
        assert_eq!(options.basic_auth, Some(("CS001".into(), "secret".into())));

        let p2 = manager.network_connection_profile(2).unwrap();
        let options = manager.connection_options_for(&p2);
        assert!(options.basic_auth.is_none());
    }

    #[test]
    fn not_connected_without_transport() {
        let manager = manager(vec![profile(1, 1)], "1");
        assert!(!manager.is_websocket_connected());
        assert!(!manager.send_to_websocket("[2,\"a\",\"Heartbeat\",{}]".into()));
    }
}
