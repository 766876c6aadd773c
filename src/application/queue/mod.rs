//! Message queue
//!
//! Bounded, persisted FIFO between the station logic and the transport.
//! Three Call lanes (Transactional, Trigger, Normal) plus a lane for
//! CallResults/CallErrors, merged at dispatch time:
//!
//! 1. call results: responses to the CSMS go out first,
//! 2. Transactional: strict FIFO, persisted, replayed across restarts,
//! 3. Trigger: messages synthesized by `TriggerMessage`,
//! 4. Normal: everything else.
//!
//! At most one Call is in flight at a time. A Call is retried up to
//! `MessageAttempts` with interval `MessageAttemptInterval * attempts`;
//! exhaustion drops the message from persistence and notifies the
//! observer for transactional messages.

pub mod dispatcher;

pub use dispatcher::{MessageDispatcher, RegistrationState};

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, Mutex, Notify};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::domain::{InfraResult, MessageAction, QueueLane, QueuedMessage, UnknownAction};
use crate::infrastructure::StationStorage;
use crate::support::ocpp_frame::OcppFrame;

// ── Config ─────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct MessageQueueConfig {
    pub message_attempts: u32,
    pub message_attempt_interval: Duration,
    pub message_timeout: Duration,
    pub queue_size_threshold: usize,
    /// Queue (rather than discard) non-transactional messages while the
    /// registration status is not Accepted.
    pub queue_all_messages: bool,
    /// Message types never queued while offline.
    pub message_types_discard_for_queueing: HashSet<MessageAction>,
}

impl Default for MessageQueueConfig {
    fn default() -> Self {
        Self {
            message_attempts: 5,
            message_attempt_interval: Duration::from_secs(10),
            message_timeout: Duration::from_secs(30),
            queue_size_threshold: 200_000,
            queue_all_messages: false,
            message_types_discard_for_queueing: HashSet::new(),
        }
    }
}

// ── Receive-side types ─────────────────────────────────────────

/// Final outcome of a dispatched Call.
#[derive(Debug, Clone)]
pub enum CallOutcome {
    Result(Value),
    Error {
        code: String,
        description: String,
        details: Value,
    },
}

impl CallOutcome {
    /// Internal error used when no response arrived within `MessageTimeout`.
    pub fn timeout() -> Self {
        Self::Error {
            code: "Timeout".to_string(),
            description: "No response received within MessageTimeout".to_string(),
            details: Value::Object(Default::default()),
        }
    }
}

/// An inbound frame after correlation against the in-flight Call.
#[derive(Debug)]
pub enum ReceivedMessage {
    /// An inbound Call from the CSMS.
    Call {
        unique_id: String,
        action: Result<MessageAction, UnknownAction>,
        payload: Value,
    },
    /// The response to the Call we had in flight.
    Response {
        request: QueuedMessage,
        outcome: CallOutcome,
    },
    /// A CallResult/CallError that matches no in-flight Call.
    Unmatched { frame: OcppFrame },
}

/// Observer notifications emitted by the queue worker.
#[derive(Debug)]
pub enum QueueNotification {
    /// A transactional message (or a BootNotification) exhausted its
    /// attempts and was dropped.
    MessageDropped(QueuedMessage),
}

/// Send side of the transport: hands a frame to the socket, returns
/// whether the frame was accepted (not whether it reached the peer).
pub type SendFn = Arc<dyn Fn(String) -> bool + Send + Sync>;

// ── Queue internals ────────────────────────────────────────────

struct InFlight {
    message: QueuedMessage,
    deadline: Instant,
}

#[derive(Default)]
struct QueueState {
    transactional: VecDeque<QueuedMessage>,
    trigger: VecDeque<QueuedMessage>,
    normal: VecDeque<QueuedMessage>,
    call_results: VecDeque<String>,
    in_flight: Option<InFlight>,
    /// Earliest instant the next dispatch may happen (retry backoff).
    next_dispatch_at: Option<Instant>,
    paused: bool,
    registration_accepted: bool,
    running: bool,
}

impl QueueState {
    fn queued_calls(&self) -> usize {
        self.transactional.len() + self.trigger.len() + self.normal.len()
    }
}

pub struct MessageQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    config: std::sync::Mutex<MessageQueueConfig>,
    storage: Arc<dyn StationStorage>,
    send_fn: SendFn,
    notifications: mpsc::UnboundedSender<QueueNotification>,
    responders: DashMap<String, oneshot::Sender<CallOutcome>>,
}

impl MessageQueue {
    pub fn new(
        config: MessageQueueConfig,
        storage: Arc<dyn StationStorage>,
        send_fn: SendFn,
        notifications: mpsc::UnboundedSender<QueueNotification>,
    ) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            config: std::sync::Mutex::new(config),
            storage,
            send_fn,
            notifications,
            responders: DashMap::new(),
        })
    }

    // ── Lifecycle ──────────────────────────────────────────

    /// Replay persisted transactional messages and start the send worker.
    /// Persisted messages go ahead of anything enqueued since construction.
    pub async fn start(self: &Arc<Self>) -> InfraResult<()> {
        let persisted = self.storage.queue_load_all().await?;
        {
            let mut state = self.state.lock().await;
            if !persisted.is_empty() {
                info!(count = persisted.len(), "Replaying persisted transactional messages");
            }
            for message in persisted.into_iter().rev() {
                state.transactional.push_front(message);
            }
            state.running = true;
            state.paused = true; // transport not connected yet
        }

        let queue = self.clone();
        tokio::spawn(async move {
            queue.run_send_worker().await;
        });
        Ok(())
    }

    pub async fn stop(&self) {
        let mut state = self.state.lock().await;
        state.running = false;
        drop(state);
        self.notify.notify_one();
    }

    pub async fn pause(&self) {
        let mut state = self.state.lock().await;
        state.paused = true;
        debug!("Message queue paused");
    }

    pub async fn resume(&self, delay: Duration) {
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.state.lock().await;
        state.paused = false;
        drop(state);
        debug!("Message queue resumed");
        self.notify.notify_one();
    }

    /// Opens the queue for non-BootNotification traffic.
    pub async fn set_registration_status_accepted(&self) {
        let mut state = self.state.lock().await;
        state.registration_accepted = true;
        drop(state);
        self.notify.notify_one();
    }

    // ── Enqueue ────────────────────────────────────────────

    /// Enqueue a Call. Persists transactional messages before returning.
    pub async fn push(&self, message: QueuedMessage) -> InfraResult<()> {
        if message.persisted {
            self.storage.queue_insert(&message).await?;
        }

        let threshold = self.config.lock().unwrap().queue_size_threshold;
        let mut state = self.state.lock().await;
        match message.lane {
            QueueLane::Transactional => state.transactional.push_back(message),
            QueueLane::Trigger => state.trigger.push_back(message),
            QueueLane::Normal => state.normal.push_back(message),
        }

        // Overflow drops the oldest non-transactional messages.
        while state.queued_calls() > threshold {
            let dropped = if !state.normal.is_empty() {
                state.normal.pop_front()
            } else if !state.trigger.is_empty() {
                state.trigger.pop_front()
            } else {
                break;
            };
            if let Some(dropped) = dropped {
                warn!(
                    action = %dropped.action,
                    unique_id = dropped.unique_id.as_str(),
                    "Queue size threshold exceeded, dropping oldest non-transactional message"
                );
                self.responders.remove(&dropped.unique_id);
            }
        }
        drop(state);
        self.notify.notify_one();
        Ok(())
    }

    /// Enqueue a Call and wait for its final outcome.
    pub async fn push_and_wait(&self, message: QueuedMessage) -> InfraResult<CallOutcome> {
        let (tx, rx) = oneshot::channel();
        self.responders.insert(message.unique_id.clone(), tx);
        self.push(message).await?;
        match rx.await {
            Ok(outcome) => Ok(outcome),
            // Queue stopped or message dropped by overflow.
            Err(_) => Ok(CallOutcome::timeout()),
        }
    }

    /// Enqueue a CallResult for an inbound Call.
    pub async fn push_call_result(&self, unique_id: &str, payload: Value) {
        let frame = OcppFrame::result_response(unique_id, payload);
        let mut state = self.state.lock().await;
        state.call_results.push_back(frame.serialize());
        drop(state);
        self.notify.notify_one();
    }

    /// Enqueue a CallError for an inbound Call.
    pub async fn push_call_error(&self, unique_id: &str, code: &str, description: &str) {
        let frame = OcppFrame::error_response(unique_id, code, description);
        let mut state = self.state.lock().await;
        state.call_results.push_back(frame.serialize());
        drop(state);
        self.notify.notify_one();
    }

    // ── Receive / correlation ──────────────────────────────

    /// Correlate an inbound frame with the in-flight Call, if any.
    pub async fn receive(&self, frame: OcppFrame) -> ReceivedMessage {
        match frame {
            OcppFrame::Call {
                unique_id,
                action,
                payload,
            } => ReceivedMessage::Call {
                unique_id,
                action: action.parse(),
                payload,
            },
            OcppFrame::CallResult { unique_id, payload } => {
                self.correlate(unique_id, CallOutcome::Result(payload)).await
            }
            OcppFrame::CallError {
                unique_id,
                error_code,
                error_description,
                error_details,
            } => {
                self.correlate(
                    unique_id,
                    CallOutcome::Error {
                        code: error_code,
                        description: error_description,
                        details: error_details,
                    },
                )
                .await
            }
        }
    }

    async fn correlate(&self, unique_id: String, outcome: CallOutcome) -> ReceivedMessage {
        let request = {
            let mut state = self.state.lock().await;
            let matches = state
                .in_flight
                .as_ref()
                .map(|f| f.message.unique_id == unique_id)
                .unwrap_or(false);
            if matches {
                let in_flight = state.in_flight.take().unwrap();
                state.next_dispatch_at = None;
                Some(in_flight.message)
            } else {
                None
            }
        };

        let Some(request) = request else {
            warn!(unique_id = unique_id.as_str(), "Response for unknown unique id");
            return ReceivedMessage::Unmatched {
                frame: match outcome {
                    CallOutcome::Result(payload) => OcppFrame::CallResult { unique_id, payload },
                    CallOutcome::Error {
                        code,
                        description,
                        details,
                    } => OcppFrame::CallError {
                        unique_id,
                        error_code: code,
                        error_description: description,
                        error_details: details,
                    },
                },
            };
        };

        if request.persisted {
            if let Err(e) = self.storage.queue_delete(&request.unique_id).await {
                error!(error = %e, "Could not remove acknowledged message from storage");
            }
        }
        if let Some((_, responder)) = self.responders.remove(&request.unique_id) {
            let _ = responder.send(outcome.clone());
        }
        self.notify.notify_one();
        ReceivedMessage::Response { request, outcome }
    }

    // ── Introspection ──────────────────────────────────────

    /// Whether any queued (or in-flight) transactional message belongs to
    /// the given transaction.
    pub async fn contains_transaction_messages(&self, transaction_id: &str) -> bool {
        let matches_tx = |m: &QueuedMessage| {
            m.payload["transactionInfo"]["transactionId"]
                .as_str()
                .map(|id| id == transaction_id)
                .unwrap_or(false)
        };
        let state = self.state.lock().await;
        state.transactional.iter().any(matches_tx)
            || state
                .in_flight
                .as_ref()
                .map(|f| f.message.lane == QueueLane::Transactional && matches_tx(&f.message))
                .unwrap_or(false)
    }

    /// Whether a Call of the given action is queued or in flight.
    pub async fn contains_action(&self, action: MessageAction) -> bool {
        let state = self.state.lock().await;
        state
            .transactional
            .iter()
            .chain(state.trigger.iter())
            .chain(state.normal.iter())
            .any(|m| m.action == action)
            || state
                .in_flight
                .as_ref()
                .map(|f| f.message.action == action)
                .unwrap_or(false)
    }

    pub async fn is_transaction_message_queue_empty(&self) -> bool {
        let state = self.state.lock().await;
        state.transactional.is_empty()
            && !state
                .in_flight
                .as_ref()
                .map(|f| f.message.lane == QueueLane::Transactional)
                .unwrap_or(false)
    }

    /// Copy of the current configuration.
    pub fn config_snapshot(&self) -> MessageQueueConfig {
        self.config.lock().unwrap().clone()
    }

    /// Number of queued Calls across all lanes (in-flight excluded).
    pub async fn queued_call_count(&self) -> usize {
        self.state.lock().await.queued_calls()
    }

    // ── Runtime reconfiguration ────────────────────────────

    pub fn update_transaction_message_attempts(&self, attempts: u32) {
        self.config.lock().unwrap().message_attempts = attempts;
    }

    pub fn update_transaction_message_retry_interval(&self, interval: Duration) {
        self.config.lock().unwrap().message_attempt_interval = interval;
    }

    pub fn update_message_timeout(&self, timeout: Duration) {
        self.config.lock().unwrap().message_timeout = timeout;
    }

    // ── Send worker ────────────────────────────────────────

    async fn run_send_worker(self: Arc<Self>) {
        loop {
            let wake_at = {
                let mut state = self.state.lock().await;
                if !state.running {
                    break;
                }

                let now = Instant::now();
                self.expire_in_flight(&mut state, now).await;

                if !state.paused {
                    // CallResults always flush ahead of Calls.
                    while let Some(frame) = state.call_results.pop_front() {
                        if !(self.send_fn)(frame.clone()) {
                            state.call_results.push_front(frame);
                            break;
                        }
                    }
                    self.dispatch_next(&mut state, now);
                }

                state
                    .in_flight
                    .as_ref()
                    .map(|f| f.deadline)
                    .or(state.next_dispatch_at)
            };

            match wake_at {
                Some(deadline) => {
                    tokio::select! {
                        _ = self.notify.notified() => {}
                        _ = tokio::time::sleep_until(deadline) => {}
                    }
                }
                None => self.notify.notified().await,
            }
        }
        debug!("Message queue send worker stopped");
    }

    /// Times out the in-flight Call: retry with backoff until the attempt
    /// budget is spent, then drop it.
    async fn expire_in_flight(&self, state: &mut QueueState, now: Instant) {
        let Some(in_flight) = &state.in_flight else {
            return;
        };
        if now < in_flight.deadline {
            return;
        }

        let InFlight { message, .. } = state.in_flight.take().unwrap();
        let (max_attempts, attempt_interval) = {
            let config = self.config.lock().unwrap();
            (config.message_attempts, config.message_attempt_interval)
        };

        let budget = if message.lane == QueueLane::Transactional {
            max_attempts
        } else {
            1
        };

        if message.attempts >= budget {
            warn!(
                action = %message.action,
                unique_id = message.unique_id.as_str(),
                attempts = message.attempts,
                "Giving up on message after exhausting attempts"
            );
            if message.persisted {
                if let Err(e) = self.storage.queue_delete(&message.unique_id).await {
                    error!(error = %e, "Could not remove dropped message from storage");
                }
            }
            if let Some((_, responder)) = self.responders.remove(&message.unique_id) {
                let _ = responder.send(CallOutcome::timeout());
            }
            if message.lane == QueueLane::Transactional
                || message.action == MessageAction::BootNotification
            {
                let _ = self
                    .notifications
                    .send(QueueNotification::MessageDropped(message));
            }
            state.next_dispatch_at = None;
            return;
        }

        warn!(
            action = %message.action,
            unique_id = message.unique_id.as_str(),
            attempt = message.attempts,
            "No response within MessageTimeout, scheduling retry"
        );
        state.next_dispatch_at = Some(now + attempt_interval * message.attempts);
        match message.lane {
            QueueLane::Transactional => state.transactional.push_front(message),
            QueueLane::Trigger => state.trigger.push_front(message),
            QueueLane::Normal => state.normal.push_front(message),
        }
    }

    /// Puts the next eligible Call on the wire, if the in-flight slot is free.
    fn dispatch_next(&self, state: &mut QueueState, now: Instant) {
        if state.in_flight.is_some() {
            return;
        }
        if let Some(at) = state.next_dispatch_at {
            if now < at {
                return;
            }
        }

        let eligible = |m: &QueuedMessage, accepted: bool| {
            accepted || m.action == MessageAction::BootNotification
        };
        let accepted = state.registration_accepted;

        let lane = if state.transactional.front().map(|m| eligible(m, accepted)) == Some(true) {
            Some(&mut state.transactional)
        } else if state.trigger.front().map(|m| eligible(m, accepted)) == Some(true) {
            Some(&mut state.trigger)
        } else if state.normal.front().map(|m| eligible(m, accepted)) == Some(true) {
            Some(&mut state.normal)
        } else if !accepted {
            // Not registered yet: only a BootNotification may jump the line.
            let position = state
                .normal
                .iter()
                .position(|m| m.action == MessageAction::BootNotification);
            if let Some(position) = position {
                let message = state.normal.remove(position).unwrap();
                state.normal.push_front(message);
                Some(&mut state.normal)
            } else {
                None
            }
        } else {
            None
        };

        let Some(lane) = lane else {
            return;
        };
        let mut message = lane.pop_front().unwrap();
        message.attempts += 1;

        let frame = OcppFrame::Call {
            unique_id: message.unique_id.clone(),
            action: message.action.to_string(),
            payload: message.payload.clone(),
        };
        let text = frame.serialize();

        debug!(
            action = %message.action,
            unique_id = message.unique_id.as_str(),
            attempt = message.attempts,
            "-> {}",
            text
        );

        if message.persisted {
            let storage = self.storage.clone();
            let unique_id = message.unique_id.clone();
            let attempts = message.attempts;
            tokio::spawn(async move {
                if let Err(e) = storage.queue_update_attempts(&unique_id, attempts).await {
                    error!(error = %e, "Could not persist attempt count");
                }
            });
        }

        if (self.send_fn)(text) {
            let timeout = self.config.lock().unwrap().message_timeout;
            state.in_flight = Some(InFlight {
                message,
                deadline: now + timeout,
            });
            state.next_dispatch_at = None;
        } else {
            // Socket refused the frame; retry after the transport recovers.
            message.attempts -= 1;
            match message.lane {
                QueueLane::Transactional => state.transactional.push_front(message),
                QueueLane::Trigger => state.trigger.push_front(message),
                QueueLane::Normal => state.normal.push_front(message),
            }
            state.paused = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::InMemoryStorage;
    use std::sync::Mutex as StdMutex;

    fn test_queue(
        config: MessageQueueConfig,
    ) -> (
        Arc<MessageQueue>,
        Arc<StdMutex<Vec<String>>>,
        mpsc::UnboundedReceiver<QueueNotification>,
        Arc<InMemoryStorage>,
    ) {
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let sent_clone = sent.clone();
        let send_fn: SendFn = Arc::new(move |text| {
            sent_clone.lock().unwrap().push(text);
            true
        });
        let storage = Arc::new(InMemoryStorage::new());
        let (tx, rx) = mpsc::unbounded_channel();
        let queue = MessageQueue::new(config, storage.clone(), send_fn, tx);
        (queue, sent, rx, storage)
    }

    fn sent_actions(sent: &Arc<StdMutex<Vec<String>>>) -> Vec<String> {
        sent.lock()
            .unwrap()
            .iter()
            .map(|text| {
                let frame = OcppFrame::parse(text).unwrap();
                match frame {
                    OcppFrame::Call { action, .. } => action,
                    _ => "<response>".to_string(),
                }
            })
            .collect()
    }

    async fn respond_to_in_flight(queue: &Arc<MessageQueue>, sent: &Arc<StdMutex<Vec<String>>>) {
        let last = sent.lock().unwrap().last().cloned().unwrap();
        let unique_id = OcppFrame::parse(&last).unwrap().unique_id().to_string();
        queue
            .receive(OcppFrame::CallResult {
                unique_id,
                payload: serde_json::json!({}),
            })
            .await;
    }

    #[tokio::test]
    async fn only_boot_notification_flows_before_acceptance() {
        let (queue, sent, _rx, _) = test_queue(MessageQueueConfig::default());
        queue.start().await.unwrap();
        queue.resume(Duration::ZERO).await;

        queue
            .push(QueuedMessage::new(
                MessageAction::Heartbeat,
                serde_json::json!({}),
                false,
            ))
            .await
            .unwrap();
        queue
            .push(QueuedMessage::new(
                MessageAction::BootNotification,
                serde_json::json!({"reason": "PowerUp"}),
                false,
            ))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(sent_actions(&sent), vec!["BootNotification"]);

        respond_to_in_flight(&queue, &sent).await;
        queue.set_registration_status_accepted().await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(sent_actions(&sent), vec!["BootNotification", "Heartbeat"]);
    }

    #[tokio::test]
    async fn at_most_one_call_in_flight() {
        let (queue, sent, _rx, _) = test_queue(MessageQueueConfig::default());
        queue.start().await.unwrap();
        queue.set_registration_status_accepted().await;
        queue.resume(Duration::ZERO).await;

        for _ in 0..3 {
            queue
                .push(QueuedMessage::new(
                    MessageAction::Heartbeat,
                    serde_json::json!({}),
                    false,
                ))
                .await
                .unwrap();
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(sent.lock().unwrap().len(), 1);

        respond_to_in_flight(&queue, &sent).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(sent.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn transactional_lane_overtakes_normal() {
        let (queue, sent, _rx, _) = test_queue(MessageQueueConfig::default());
        queue.start().await.unwrap();
        queue.set_registration_status_accepted().await;

        // queued while paused so ordering is decided by lanes, not arrival
        queue
            .push(QueuedMessage::new(
                MessageAction::Heartbeat,
                serde_json::json!({}),
                false,
            ))
            .await
            .unwrap();
        queue
            .push(QueuedMessage::new(
                MessageAction::TransactionEvent,
                serde_json::json!({"eventType": "Started", "seqNo": 0}),
                false,
            ))
            .await
            .unwrap();
        queue.resume(Duration::ZERO).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(sent_actions(&sent), vec!["TransactionEvent"]);
        respond_to_in_flight(&queue, &sent).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(sent_actions(&sent), vec!["TransactionEvent", "Heartbeat"]);
    }

    #[tokio::test]
    async fn trigger_lane_overtakes_normal_but_not_transactional() {
        let (queue, sent, _rx, _) = test_queue(MessageQueueConfig::default());
        queue.start().await.unwrap();
        queue.set_registration_status_accepted().await;

        queue
            .push(QueuedMessage::new(
                MessageAction::NotifyReport,
                serde_json::json!({"requestId": 1}),
                false,
            ))
            .await
            .unwrap();
        queue
            .push(QueuedMessage::new(
                MessageAction::Heartbeat,
                serde_json::json!({}),
                true, // trigger-initiated
            ))
            .await
            .unwrap();
        queue
            .push(QueuedMessage::new(
                MessageAction::TransactionEvent,
                serde_json::json!({"eventType": "Updated", "seqNo": 1}),
                false,
            ))
            .await
            .unwrap();
        queue.resume(Duration::ZERO).await;

        for _ in 0..3 {
            tokio::time::sleep(Duration::from_millis(50)).await;
            respond_to_in_flight(&queue, &sent).await;
        }
        assert_eq!(
            sent_actions(&sent),
            vec!["TransactionEvent", "Heartbeat", "NotifyReport"]
        );
    }

    #[tokio::test]
    async fn persisted_message_removed_after_response() {
        let (queue, sent, _rx, storage) = test_queue(MessageQueueConfig::default());
        queue.start().await.unwrap();
        queue.set_registration_status_accepted().await;
        queue.resume(Duration::ZERO).await;

        queue
            .push(QueuedMessage::new(
                MessageAction::TransactionEvent,
                serde_json::json!({"eventType": "Started", "seqNo": 0}),
                false,
            ))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(storage.queue_load_all().await.unwrap().len(), 1);

        respond_to_in_flight(&queue, &sent).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(storage.queue_load_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn persisted_messages_replay_before_new_ones() {
        let storage = Arc::new(InMemoryStorage::new());
        let old = QueuedMessage::new(
            MessageAction::TransactionEvent,
            serde_json::json!({"eventType": "Started", "seqNo": 0}),
            false,
        );
        storage.queue_insert(&old).await.unwrap();

        let sent = Arc::new(StdMutex::new(Vec::new()));
        let sent_clone = sent.clone();
        let send_fn: SendFn = Arc::new(move |text| {
            sent_clone.lock().unwrap().push(text);
            true
        });
        let (tx, _rx) = mpsc::unbounded_channel();
        let queue = MessageQueue::new(MessageQueueConfig::default(), storage, send_fn, tx);

        queue
            .push(QueuedMessage::new(
                MessageAction::TransactionEvent,
                serde_json::json!({"eventType": "Updated", "seqNo": 1}),
                false,
            ))
            .await
            .unwrap();
        queue.start().await.unwrap();
        queue.set_registration_status_accepted().await;
        queue.resume(Duration::ZERO).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let first = sent.lock().unwrap().first().cloned().unwrap();
        assert_eq!(OcppFrame::parse(&first).unwrap().unique_id(), old.unique_id);
    }

    #[tokio::test(start_paused = true)]
    async fn transactional_message_retries_then_gives_up() {
        let config = MessageQueueConfig {
            message_attempts: 2,
            message_attempt_interval: Duration::from_secs(1),
            message_timeout: Duration::from_secs(5),
            ..Default::default()
        };
        let (queue, sent, mut rx, storage) = test_queue(config);
        queue.start().await.unwrap();
        queue.set_registration_status_accepted().await;
        queue.resume(Duration::ZERO).await;

        queue
            .push(QueuedMessage::new(
                MessageAction::TransactionEvent,
                serde_json::json!({"eventType": "Started", "seqNo": 0}),
                false,
            ))
            .await
            .unwrap();

        // never respond: 2 attempts, then the drop notification
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(sent.lock().unwrap().len(), 2);
        match rx.try_recv() {
            Ok(QueueNotification::MessageDropped(m)) => {
                assert_eq!(m.action, MessageAction::TransactionEvent);
            }
            other => panic!("expected drop notification, got {:?}", other),
        }
        assert!(storage.queue_load_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn call_results_flush_ahead_of_calls() {
        let (queue, sent, _rx, _) = test_queue(MessageQueueConfig::default());
        queue.start().await.unwrap();
        queue.set_registration_status_accepted().await;

        queue
            .push(QueuedMessage::new(
                MessageAction::Heartbeat,
                serde_json::json!({}),
                false,
            ))
            .await
            .unwrap();
        queue
            .push_call_result("inbound-1", serde_json::json!({"status": "Accepted"}))
            .await;
        queue.resume(Duration::ZERO).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let first = sent.lock().unwrap().first().cloned().unwrap();
        assert!(OcppFrame::parse(&first).unwrap().is_call_result());
    }

    #[tokio::test]
    async fn queue_overflow_drops_oldest_normal() {
        let config = MessageQueueConfig {
            queue_size_threshold: 2,
            ..Default::default()
        };
        let (queue, _sent, _rx, _) = test_queue(config);
        // not started: nothing is dispatched, everything stays queued
        for i in 0..3 {
            queue
                .push(QueuedMessage::new(
                    MessageAction::Heartbeat,
                    serde_json::json!({ "n": i }),
                    false,
                ))
                .await
                .unwrap();
        }
        queue
            .push(QueuedMessage::new(
                MessageAction::TransactionEvent,
                serde_json::json!({"eventType": "Started"}),
                false,
            ))
            .await
            .unwrap();

        let state = queue.state.lock().await;
        assert_eq!(state.transactional.len(), 1);
        // 3 heartbeats pushed, threshold 2: oldest dropped on each overflow
        assert!(state.normal.len() <= 2);
        assert_eq!(state.normal.front().unwrap().payload["n"], 2);
    }

    #[tokio::test]
    async fn contains_transaction_messages_matches_payload() {
        let (queue, _sent, _rx, _) = test_queue(MessageQueueConfig::default());
        queue
            .push(QueuedMessage::new(
                MessageAction::TransactionEvent,
                serde_json::json!({"transactionInfo": {"transactionId": "T42"}}),
                false,
            ))
            .await
            .unwrap();
        assert!(queue.contains_transaction_messages("T42").await);
        assert!(!queue.contains_transaction_messages("T43").await);
        assert!(!queue.is_transaction_message_queue_empty().await);
    }
}
