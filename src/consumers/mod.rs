//! Facilities to consume messages from a RabbitMq queue, acknowledging each delivery only
//! once it has been processed successfully. Check out [`ListenerContainer`] as a starting
//! point.
pub use ack_channel::AckChannel;
pub use container::{ContainerError, ListenerContainer, ListenerContainerBuilder, ScalingPolicy};
pub use delivery::Delivery;
pub use failure_policy::FailurePolicy;
pub use listener::{AcknowledgingListener, BrokerAction, ProcessingError, ProcessingOutcome};
pub use pre_start_hook::ConsumerPreStartHook;
pub use processor::{MessageProcessor, ProcessFn};
pub use source::{DeliverySource, RabbitMqSource, Subscription};

mod ack_channel;
mod container;
mod delivery;
mod failure_policy;
mod listener;
mod pre_start_hook;
mod processor;
mod source;
pub mod topology;
mod worker;
