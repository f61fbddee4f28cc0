//! Parsing inbound device frames.
//!
//! Devices are not trusted to send well-formed JSON. Every frame is
//! classified instead of rejected so the connection handler can log it
//! and carry on.

use serde_json::Value;

use crate::message::DeviceMessage;

/// Classification of a single inbound text frame.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    /// A recognised (or deliberately ignored) device message.
    Message {
        message: DeviceMessage,
        /// The parsed JSON, kept for logging
        raw: Value,
    },

    /// Valid JSON that does not match the message shapes
    /// (e.g. `register` without a string `device_id`).
    Malformed { raw: Value, reason: String },

    /// Not JSON at all.
    NotJson(String),
}

/// Classifies an inbound text frame.
pub fn parse_device_frame(text: &str) -> InboundFrame {
    let raw: Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(_) => return InboundFrame::NotJson(text.trim().to_string()),
    };

    match serde_json::from_value::<DeviceMessage>(raw.clone()) {
        Ok(message) => InboundFrame::Message { message, raw },
        Err(e) => InboundFrame::Malformed {
            raw,
            reason: e.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_register() {
        match parse_device_frame(r#"{"type":"register","device_id":"kitchen-speaker"}"#) {
            InboundFrame::Message {
                message: DeviceMessage::Register { device_id },
                ..
            } => assert_eq!(device_id, "kitchen-speaker"),
            other => panic!("Expected register, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_non_json() {
        assert_eq!(
            parse_device_frame("hello there\n"),
            InboundFrame::NotJson("hello there".to_string())
        );
    }

    #[test]
    fn test_parse_register_without_string_id_is_malformed() {
        assert!(matches!(
            parse_device_frame(r#"{"type":"register","device_id":42}"#),
            InboundFrame::Malformed { .. }
        ));
        assert!(matches!(
            parse_device_frame(r#"{"type":"register"}"#),
            InboundFrame::Malformed { .. }
        ));
    }

    #[test]
    fn test_parse_untyped_object_is_malformed() {
        assert!(matches!(
            parse_device_frame(r#"{"device_id":"x"}"#),
            InboundFrame::Malformed { .. }
        ));
    }

    #[test]
    fn test_parse_unknown_type_is_other() {
        match parse_device_frame(r#"{"type":"status","state":"playing"}"#) {
            InboundFrame::Message { message, raw } => {
                assert_eq!(message, DeviceMessage::Other);
                assert_eq!(raw["state"], "playing");
            }
            other => panic!("Expected message, got {other:?}"),
        }
    }
}
