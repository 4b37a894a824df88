use serde::Deserialize;
use serde_json::Value;

use super::SubscriptionError;

/// A decoded push notification.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationEvent {
    /// Unique identifier of the notification.
    #[serde(default)]
    pub uuid: Option<String>,
    /// Path of the resource that triggered the event.
    pub event: String,
    /// Server timestamp of the event.
    #[serde(default)]
    pub timestamp: Option<String>,
    /// Subscription the event was delivered for.
    #[serde(default)]
    pub subscription_id: Option<String>,
    /// Owner of the subscription.
    #[serde(default)]
    pub owner_id: Option<String>,
    /// Event payload.
    #[serde(default)]
    pub body: Value,
}

impl NotificationEvent {
    /// Decodes a raw frame.
    ///
    /// A frame is either the event object itself or an array of messages in
    /// which the event is the element carrying an `event` field.
    ///
    /// # Errors
    ///
    /// Fails when the frame is not JSON or holds no event, for instance a
    /// heartbeat or a connection acknowledgement.
    pub fn decode(frame: &str) -> Result<Self, serde_json::Error> {
        let value = serde_json::from_str::<Value>(frame)?;
        let event = match value {
            Value::Array(messages) => messages
                .into_iter()
                .find(|message| message.get("event").is_some())
                .unwrap_or(Value::Null),
            value => value,
        };
        serde_json::from_value(event)
    }
}

/// Delivery-layer notices reported through the notice callback.
#[derive(Debug, Clone)]
pub enum SubscriptionNotice {
    /// The subscription lapsed and was replaced by a new one.
    Recreated {
        /// Identifier of the lapsed subscription.
        previous_id: String,
        /// Identifier of the replacement.
        subscription_id: String,
    },

    /// The subscription lapsed and could not be recovered.
    Failed(SubscriptionError),

    /// The delivery channel could not be re-established and stopped.
    ChannelLost {
        /// Number of consecutive failed connection attempts.
        attempts: usize,
    },
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn should_decode_event_object() {
        let event = NotificationEvent::decode(
            r#"{
                "uuid": "4a5b",
                "event": "/restapi/v1.0/account/1/extension/2/message-store",
                "timestamp": "2025-01-31T10:00:00.000Z",
                "subscriptionId": "sub-1",
                "ownerId": "2",
                "body": { "changes": [{ "type": "SMS", "newCount": 1 }] }
            }"#,
        )
        .expect("valid event");

        assert_eq!(
            event.event,
            "/restapi/v1.0/account/1/extension/2/message-store"
        );
        assert_eq!(event.subscription_id.as_deref(), Some("sub-1"));
        assert_eq!(event.body["changes"][0]["newCount"], json!(1));
    }

    #[test]
    fn should_decode_event_in_message_array() {
        let event = NotificationEvent::decode(
            r#"[
                { "type": "ServerNotification", "messageId": "m-1" },
                { "event": "/restapi/v1.0/account/~/presence", "body": { "presenceStatus": "Busy" } }
            ]"#,
        )
        .expect("valid event");

        assert_eq!(event.event, "/restapi/v1.0/account/~/presence");
        assert!(event.uuid.is_none());
    }

    #[test]
    fn should_reject_heartbeat() {
        let result = NotificationEvent::decode(r#"[{ "type": "Heartbeat", "messageId": "m-2" }]"#);
        assert!(result.is_err());

        let result = NotificationEvent::decode("not json");
        assert!(result.is_err());
    }
}
