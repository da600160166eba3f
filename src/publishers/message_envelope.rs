use amq_protocol_types::{ShortString, Timestamp};
use lapin::BasicProperties;

/// A message to be published via [`Publisher`](super::Publisher).
#[derive(Debug, Default, Clone)]
pub struct MessageEnvelope {
    /// The body of the message - as a sequence of bytes.
    pub payload: Vec<u8>,
    /// The name of the exchange we are publishing the message to.
    /// Empty for the default exchange.
    pub exchange_name: String,
    /// The routing key the exchange matches against its bindings.
    pub routing_key: String,
    pub properties: BasicProperties,
}

impl MessageEnvelope {
    /// An envelope for `payload`, routed through `exchange_name` with `routing_key`.
    pub fn new(
        payload: impl Into<Vec<u8>>,
        exchange_name: impl Into<String>,
        routing_key: impl Into<String>,
    ) -> Self {
        Self {
            payload: payload.into(),
            exchange_name: exchange_name.into(),
            routing_key: routing_key.into(),
            properties: BasicProperties::default(),
        }
    }

    pub fn with_message_id(mut self, value: ShortString) -> Self {
        self.properties = self.properties.with_message_id(value);
        self
    }

    pub fn with_timestamp(mut self, value: Timestamp) -> Self {
        self.properties = self.properties.with_timestamp(value);
        self
    }

    pub fn with_content_type(mut self, value: ShortString) -> Self {
        self.properties = self.properties.with_content_type(value);
        self
    }
}
