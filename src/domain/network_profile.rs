//! Network connection profiles
//!
//! The station keeps an ordered list of network profiles (slot +
//! security profile + CSMS endpoint). The connectivity manager walks the
//! list in priority order, advancing after a profile exhausts its
//! connection attempts.

use serde::{Deserialize, Serialize};

/// One CSMS connection endpoint, stored per configuration slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkConnectionProfile {
    pub configuration_slot: i32,
    /// 1 = HTTP Basic over TLS, 2 = TLS + token, 3 = mutual TLS.
    pub security_profile: i32,
    /// CSMS websocket endpoint, e.g. `wss://csms.example.com/ocpp`.
    pub ocpp_csms_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub basic_auth_identity: Option<String>,
}

impl NetworkConnectionProfile {
    /// Basic-auth credentials are only used for security profiles 1 and 2.
    pub fn uses_basic_auth(&self) -> bool {
        self.security_profile == 1 || self.security_profile == 2
    }
}

/// Orders profile slots by the `NetworkConfigurationPriority` CSL:
/// the CSL lists configuration slots, highest priority first.
pub fn order_by_priority(
    profiles: &[NetworkConnectionProfile],
    priority_csl: &str,
) -> Vec<NetworkConnectionProfile> {
    let mut ordered = Vec::new();
    for entry in priority_csl.split(',') {
        let Ok(slot) = entry.trim().parse::<i32>() else {
            continue;
        };
        if let Some(p) = profiles.iter().find(|p| p.configuration_slot == slot) {
            ordered.push(p.clone());
        }
    }
    // slots not named in the priority list go last, in slot order
    let mut rest: Vec<_> = profiles
        .iter()
        .filter(|p| !ordered.iter().any(|o| o.configuration_slot == p.configuration_slot))
        .cloned()
        .collect();
    rest.sort_by_key(|p| p.configuration_slot);
    ordered.extend(rest);
    ordered
}
