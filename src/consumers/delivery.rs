use amq_protocol_types::{DeliveryTag, ShortString};
use lapin::BasicProperties;

/// A message pulled from a queue, waiting to be processed and (maybe) acknowledged.
///
/// It carries everything the broker handed over with the message except the acker:
/// acknowledgments go through the [`AckChannel`](crate::consumers::AckChannel) of the
/// subscription the delivery came from, keyed by `delivery_tag`.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    /// The delivery tag of the message, unique within the channel it was delivered on.
    pub delivery_tag: DeliveryTag,

    /// The exchange of the message. May be an empty string
    /// if the default exchange is used.
    pub exchange: ShortString,

    /// The routing key of the message. May be an empty string
    /// if no routing key is specified.
    pub routing_key: ShortString,

    /// Whether this message was redelivered
    pub redelivered: bool,

    /// Contains the properties and the headers of the
    /// message.
    pub properties: BasicProperties,

    /// The payload of the message in binary format.
    pub data: Vec<u8>,
}

impl Delivery {
    /// A first-time delivery of `data`, with default properties and no routing information.
    pub fn new(delivery_tag: DeliveryTag, data: impl Into<Vec<u8>>) -> Self {
        Self {
            delivery_tag,
            exchange: "".into(),
            routing_key: "".into(),
            redelivered: false,
            properties: BasicProperties::default(),
            data: data.into(),
        }
    }

    #[must_use]
    pub fn with_routing(mut self, exchange: &str, routing_key: &str) -> Self {
        self.exchange = exchange.into();
        self.routing_key = routing_key.into();
        self
    }

    #[must_use]
    pub fn redelivered(mut self) -> Self {
        self.redelivered = true;
        self
    }
}

impl From<lapin::message::Delivery> for Delivery {
    fn from(value: lapin::message::Delivery) -> Self {
        Self {
            delivery_tag: value.delivery_tag,
            exchange: value.exchange,
            routing_key: value.routing_key,
            redelivered: value.redelivered,
            properties: value.properties,
            data: value.data,
        }
    }
}
