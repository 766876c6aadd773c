//! OCPP-J message framing
//!
//! Implements the OCPP-J (JSON over WebSocket) transport envelope:
//!
//! - **Call**       `[2, "<uniqueId>", "<action>", {<payload>}]`
//! - **CallResult** `[3, "<uniqueId>", {<payload>}]`
//! - **CallError**  `[4, "<uniqueId>", "<errorCode>", "<errorDescription>", {<errorDetails>}]`
//!
//! Also provides [`FrameAssembler`], which reassembles frames that arrive
//! split across multiple socket messages.

use serde_json::Value;
use thiserror::Error;

// ── Message-type constants ─────────────────────────────────────

const MSG_TYPE_CALL: u64 = 2;
const MSG_TYPE_CALL_RESULT: u64 = 3;
const MSG_TYPE_CALL_ERROR: u64 = 4;

/// OCPP-J caps the unique id at 36 bytes.
pub const MAX_UNIQUE_ID_LEN: usize = 36;

// ── CallError codes ────────────────────────────────────────────

/// Protocol error codes reported in a CallError, spelled per OCPP-J.
pub mod error_code {
    pub const FORMAT_VIOLATION: &str = "FormatViolation";
    pub const FORMATION_VIOLATION: &str = "FormationViolation";
    pub const OCCURRENCE_CONSTRAINT_VIOLATION: &str = "OccurrenceConstraintViolation";
    pub const TYPE_CONSTRAINT_VIOLATION: &str = "TypeConstraintViolation";
    pub const PROPERTY_CONSTRAINT_VIOLATION: &str = "PropertyConstraintViolation";
    pub const SECURITY_ERROR: &str = "SecurityError";
    pub const NOT_IMPLEMENTED: &str = "NotImplemented";
    pub const NOT_SUPPORTED: &str = "NotSupported";
    pub const RPC_FRAMEWORK_ERROR: &str = "RpcFrameworkError";
    pub const GENERIC_ERROR: &str = "GenericError";
}

// ── OcppFrame ──────────────────────────────────────────────────

/// A parsed OCPP-J frame (transport envelope, payload left as JSON).
#[derive(Debug, Clone)]
pub enum OcppFrame {
    /// `[2, uniqueId, action, payload]`
    Call {
        unique_id: String,
        action: String,
        payload: Value,
    },
    /// `[3, uniqueId, payload]`
    CallResult {
        unique_id: String,
        payload: Value,
    },
    /// `[4, uniqueId, errorCode, errorDescription, errorDetails]`
    CallError {
        unique_id: String,
        error_code: String,
        error_description: String,
        error_details: Value,
    },
}

impl OcppFrame {
    // ── Parsing ────────────────────────────────────────────

    /// Parse a raw JSON text into an `OcppFrame`.
    pub fn parse(text: &str) -> Result<Self, OcppFrameError> {
        let arr: Vec<Value> =
            serde_json::from_str(text).map_err(|e| OcppFrameError::InvalidJson(e.to_string()))?;

        if arr.is_empty() {
            return Err(OcppFrameError::EmptyArray);
        }

        let msg_type = arr[0].as_u64().ok_or(OcppFrameError::InvalidMessageType)?;

        let frame = match msg_type {
            MSG_TYPE_CALL => Self::parse_call(&arr)?,
            MSG_TYPE_CALL_RESULT => Self::parse_call_result(&arr)?,
            MSG_TYPE_CALL_ERROR => Self::parse_call_error(&arr)?,
            other => return Err(OcppFrameError::UnknownMessageType(other)),
        };

        if frame.unique_id().len() > MAX_UNIQUE_ID_LEN {
            return Err(OcppFrameError::UniqueIdTooLong(frame.unique_id().len()));
        }

        Ok(frame)
    }

    fn parse_call(arr: &[Value]) -> Result<Self, OcppFrameError> {
        if arr.len() < 4 {
            return Err(OcppFrameError::MissingFields {
                expected: 4,
                got: arr.len(),
            });
        }

        let unique_id = arr[1]
            .as_str()
            .ok_or(OcppFrameError::FieldTypeMismatch("uniqueId must be a string"))?
            .to_string();
        let action = arr[2]
            .as_str()
            .ok_or(OcppFrameError::FieldTypeMismatch("action must be a string"))?
            .to_string();
        let payload = arr[3].clone();

        Ok(Self::Call {
            unique_id,
            action,
            payload,
        })
    }

    fn parse_call_result(arr: &[Value]) -> Result<Self, OcppFrameError> {
        if arr.len() < 3 {
            return Err(OcppFrameError::MissingFields {
                expected: 3,
                got: arr.len(),
            });
        }

        let unique_id = arr[1]
            .as_str()
            .ok_or(OcppFrameError::FieldTypeMismatch("uniqueId must be a string"))?
            .to_string();
        let payload = arr.get(2).cloned().unwrap_or(Value::Object(Default::default()));

        Ok(Self::CallResult { unique_id, payload })
    }

    fn parse_call_error(arr: &[Value]) -> Result<Self, OcppFrameError> {
        if arr.len() < 4 {
            return Err(OcppFrameError::MissingFields {
                expected: 4,
                got: arr.len(),
            });
        }

        let unique_id = arr[1]
            .as_str()
            .ok_or(OcppFrameError::FieldTypeMismatch("uniqueId must be a string"))?
            .to_string();
        let error_code = arr[2].as_str().unwrap_or("GenericError").to_string();
        let error_description = arr
            .get(3)
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();
        let error_details = arr
            .get(4)
            .cloned()
            .unwrap_or(Value::Object(Default::default()));

        Ok(Self::CallError {
            unique_id,
            error_code,
            error_description,
            error_details,
        })
    }

    // ── Serialization ──────────────────────────────────────

    /// Serialize this frame to a JSON string.
    pub fn serialize(&self) -> String {
        let arr: Value = match self {
            Self::Call {
                unique_id,
                action,
                payload,
            } => Value::Array(vec![
                Value::Number(MSG_TYPE_CALL.into()),
                Value::String(unique_id.clone()),
                Value::String(action.clone()),
                payload.clone(),
            ]),

            Self::CallResult { unique_id, payload } => Value::Array(vec![
                Value::Number(MSG_TYPE_CALL_RESULT.into()),
                Value::String(unique_id.clone()),
                payload.clone(),
            ]),

            Self::CallError {
                unique_id,
                error_code,
                error_description,
                error_details,
            } => Value::Array(vec![
                Value::Number(MSG_TYPE_CALL_ERROR.into()),
                Value::String(unique_id.clone()),
                Value::String(error_code.clone()),
                Value::String(error_description.clone()),
                error_details.clone(),
            ]),
        };

        // serde_json::to_string on a Value never fails
        serde_json::to_string(&arr).unwrap()
    }

    // ── Helpers ────────────────────────────────────────────

    /// Get the unique message ID.
    pub fn unique_id(&self) -> &str {
        match self {
            Self::Call { unique_id, .. }
            | Self::CallResult { unique_id, .. }
            | Self::CallError { unique_id, .. } => unique_id,
        }
    }

    /// Create a `CallError` response for a given unique ID.
    pub fn error_response(
        unique_id: impl Into<String>,
        error_code: impl Into<String>,
        error_description: impl Into<String>,
    ) -> Self {
        Self::CallError {
            unique_id: unique_id.into(),
            error_code: error_code.into(),
            error_description: error_description.into(),
            error_details: Value::Object(Default::default()),
        }
    }

    /// Create a `CallResult` response for a given unique ID.
    pub fn result_response(unique_id: impl Into<String>, payload: Value) -> Self {
        Self::CallResult {
            unique_id: unique_id.into(),
            payload,
        }
    }

    /// Returns `true` if this is a `Call` frame.
    pub fn is_call(&self) -> bool {
        matches!(self, Self::Call { .. })
    }

    /// Returns `true` if this is a `CallResult` frame.
    pub fn is_call_result(&self) -> bool {
        matches!(self, Self::CallResult { .. })
    }

    /// Returns `true` if this is a `CallError` frame.
    pub fn is_call_error(&self) -> bool {
        matches!(self, Self::CallError { .. })
    }
}

// ── FrameAssembler ─────────────────────────────────────────────

/// Reassembles OCPP-J frames that arrive split across socket messages.
///
/// Text is buffered until a complete top-level JSON array terminates;
/// each complete array is emitted as one frame. Tracks string and escape
/// state so brackets inside JSON strings do not terminate a frame early.
#[derive(Debug, Default)]
pub struct FrameAssembler {
    buffer: String,
    depth: i32,
    in_string: bool,
    escaped: bool,
}

impl FrameAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of inbound text; returns every frame completed by it.
    pub fn push(&mut self, chunk: &str) -> Vec<String> {
        let mut frames = Vec::new();
        let base = self.buffer.len();
        self.buffer.push_str(chunk);

        let mut frame_start = 0usize;
        let mut consumed_up_to: Option<usize> = None;
        let mut pos = base;

        let new_chars: Vec<char> = self.buffer[base..].chars().collect();
        for c in new_chars {
            let char_len = c.len_utf8();
            if self.in_string {
                if self.escaped {
                    self.escaped = false;
                } else if c == '\\' {
                    self.escaped = true;
                } else if c == '"' {
                    self.in_string = false;
                }
            } else {
                match c {
                    '"' => self.in_string = true,
                    '[' | '{' => self.depth += 1,
                    ']' | '}' => {
                        self.depth -= 1;
                        if self.depth == 0 {
                            // one complete top-level value ends here
                            let frame = self.buffer[frame_start..pos + char_len].trim().to_string();
                            if !frame.is_empty() {
                                frames.push(frame);
                            }
                            consumed_up_to = Some(pos + char_len);
                            frame_start = pos + char_len;
                        }
                    }
                    _ => {}
                }
            }
            pos += char_len;
        }

        if let Some(end) = consumed_up_to {
            self.buffer.drain(..end);
        }

        frames
    }

    /// Bytes currently buffered waiting for completion.
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }

    /// Drop any partial frame (e.g. on reconnect).
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.depth = 0;
        self.in_string = false;
        self.escaped = false;
    }
}

// ── Errors ─────────────────────────────────────────────────────

/// Errors that can occur when parsing an OCPP-J frame.
#[derive(Debug, Error)]
pub enum OcppFrameError {
    #[error("Invalid JSON: {0}")]
    InvalidJson(String),
    #[error("Empty OCPP message array")]
    EmptyArray,
    #[error("Message type is not a number")]
    InvalidMessageType,
    #[error("Unknown message type: {0}")]
    UnknownMessageType(u64),
    #[error("Expected at least {expected} fields, got {got}")]
    MissingFields { expected: usize, got: usize },
    #[error("Field type mismatch: {0}")]
    FieldTypeMismatch(&'static str),
    #[error("Unique id exceeds 36 bytes: {0}")]
    UniqueIdTooLong(usize),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_call() {
        let text = r#"[2,"abc123","BootNotification",{"reason":"PowerUp","chargingStation":{"model":"M","vendorName":"V"}}]"#;
        let frame = OcppFrame::parse(text).unwrap();
        match frame {
            OcppFrame::Call {
                unique_id,
                action,
                payload,
            } => {
                assert_eq!(unique_id, "abc123");
                assert_eq!(action, "BootNotification");
                assert_eq!(payload["reason"], "PowerUp");
            }
            _ => panic!("Expected Call frame"),
        }
    }

    #[test]
    fn parse_call_result() {
        let text = r#"[3,"abc123",{"status":"Accepted","currentTime":"2024-05-01T00:00:00Z","interval":300}]"#;
        let frame = OcppFrame::parse(text).unwrap();
        match frame {
            OcppFrame::CallResult { unique_id, payload } => {
                assert_eq!(unique_id, "abc123");
                assert_eq!(payload["status"], "Accepted");
            }
            _ => panic!("Expected CallResult frame"),
        }
    }

    #[test]
    fn parse_call_error() {
        let text = r#"[4,"abc123","NotImplemented","Action not supported",{}]"#;
        let frame = OcppFrame::parse(text).unwrap();
        match frame {
            OcppFrame::CallError {
                unique_id,
                error_code,
                error_description,
                ..
            } => {
                assert_eq!(unique_id, "abc123");
                assert_eq!(error_code, "NotImplemented");
                assert_eq!(error_description, "Action not supported");
            }
            _ => panic!("Expected CallError frame"),
        }
    }

    #[test]
    fn reject_unknown_message_type() {
        assert!(matches!(
            OcppFrame::parse(r#"[9,"id",{}]"#),
            Err(OcppFrameError::UnknownMessageType(9))
        ));
    }

    #[test]
    fn reject_oversized_unique_id() {
        let id = "x".repeat(37);
        let text = format!(r#"[3,"{}",{{}}]"#, id);
        assert!(matches!(
            OcppFrame::parse(&text),
            Err(OcppFrameError::UniqueIdTooLong(37))
        ));
    }

    #[test]
    fn roundtrip_call() {
        let frame = OcppFrame::Call {
            unique_id: "id1".into(),
            action: "Heartbeat".into(),
            payload: serde_json::json!({}),
        };
        let json = frame.serialize();
        let parsed = OcppFrame::parse(&json).unwrap();
        assert!(parsed.is_call());
        assert_eq!(parsed.unique_id(), "id1");
    }

    #[test]
    fn roundtrip_call_error() {
        let frame =
            OcppFrame::error_response("id3", error_code::GENERIC_ERROR, "Something went wrong");
        let json = frame.serialize();
        let parsed = OcppFrame::parse(&json).unwrap();
        assert!(parsed.is_call_error());
        assert_eq!(parsed.unique_id(), "id3");
    }

    #[test]
    fn assembler_passes_whole_frame_through() {
        let mut asm = FrameAssembler::new();
        let frames = asm.push(r#"[3,"a",{"x":1}]"#);
        assert_eq!(frames, vec![r#"[3,"a",{"x":1}]"#.to_string()]);
        assert_eq!(asm.pending_len(), 0);
    }

    #[test]
    fn assembler_joins_split_frame() {
        let mut asm = FrameAssembler::new();
        assert!(asm.push(r#"[2,"id","Heartbe"#).is_empty());
        assert!(asm.push(r#"at",{"#).is_empty());
        let frames = asm.push(r#"}]"#);
        assert_eq!(frames.len(), 1);
        assert!(OcppFrame::parse(&frames[0]).unwrap().is_call());
    }

    #[test]
    fn assembler_ignores_brackets_inside_strings() {
        let mut asm = FrameAssembler::new();
        assert!(asm.push(r#"[3,"a",{"note":"odd ] value"#).is_empty());
        let frames = asm.push(r#""}]"#);
        assert_eq!(frames.len(), 1);
        let parsed = OcppFrame::parse(&frames[0]).unwrap();
        assert_eq!(parsed.unique_id(), "a");
    }

    #[test]
    fn assembler_splits_back_to_back_frames() {
        let mut asm = FrameAssembler::new();
        let frames = asm.push(r#"[3,"a",{}][3,"b",{}]"#);
        assert_eq!(frames.len(), 2);
        assert_eq!(OcppFrame::parse(&frames[0]).unwrap().unique_id(), "a");
        assert_eq!(OcppFrame::parse(&frames[1]).unwrap().unique_id(), "b");
    }
}
