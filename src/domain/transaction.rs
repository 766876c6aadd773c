//! Transaction domain entity
//!
//! One plug-in-to-plug-out charging session. Created exclusively by its
//! `Evse`; destroyed once the `TransactionEvent(Ended)` has been enqueued.

use chrono::{DateTime, Utc};
use rust_ocpp::v2_0_1::enumerations::charging_state_enum_type::ChargingStateEnumType;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An open charging session on one EVSE.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    /// Opaque session id, supplied by the caller when the session opens.
    pub transaction_id: String,
    pub evse_id: i32,
    pub connector_id: i32,
    pub started_at: DateTime<Utc>,
    /// `idToken` JSON object that authorized the session.
    pub id_token: Option<Value>,
    pub group_id_token: Option<Value>,
    pub remote_start_id: Option<i32>,
    pub reservation_id: Option<i32>,
    pub charging_state: ChargingStateEnumType,
    /// Whether the authorizing idToken has already been reported in a
    /// TransactionEvent. Set once, never cleared.
    pub id_token_sent: bool,
    seq_no: i32,
}

impl Transaction {
    pub fn new(
        transaction_id: impl Into<String>,
        evse_id: i32,
        connector_id: i32,
        started_at: DateTime<Utc>,
        charging_state: ChargingStateEnumType,
    ) -> Self {
        Self {
            transaction_id: transaction_id.into(),
            evse_id,
            connector_id,
            started_at,
            id_token: None,
            group_id_token: None,
            remote_start_id: None,
            reservation_id: None,
            charging_state,
            id_token_sent: false,
            seq_no: 0,
        }
    }

    /// Current sequence number and post-increment. TransactionEvent
    /// sequence numbers are strictly monotone starting at 0.
    pub fn next_seq_no(&mut self) -> i32 {
        let seq = self.seq_no;
        self.seq_no += 1;
        seq
    }

    /// Sequence number the next event will carry, without consuming it.
    pub fn seq_no(&self) -> i32 {
        self.seq_no
    }

    pub fn set_id_token_sent(&mut self) {
        self.id_token_sent = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seq_no_starts_at_zero_and_is_monotone() {
        let mut tx = Transaction::new("T-1", 1, 1, Utc::now(), ChargingStateEnumType::EVConnected);
        assert_eq!(tx.next_seq_no(), 0);
        assert_eq!(tx.next_seq_no(), 1);
        assert_eq!(tx.next_seq_no(), 2);
        assert_eq!(tx.seq_no(), 3);
    }

    #[test]
    fn id_token_sent_latches() {
        let mut tx = Transaction::new("T-1", 1, 1, Utc::now(), ChargingStateEnumType::Charging);
        assert!(!tx.id_token_sent);
        tx.set_id_token_sent();
        assert!(tx.id_token_sent);
    }
}
