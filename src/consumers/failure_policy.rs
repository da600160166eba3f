use serde::Deserialize;

use super::BrokerAction;

/// What to tell the broker about a delivery whose processing did not succeed - the
/// processor returned `false`, failed with an error or panicked.
///
/// # Picking a policy
///
/// [`FailurePolicy::LeaveUnacked`] is the default: nothing is sent to the broker and the
/// message stays unacknowledged on its channel. The broker redelivers it only once that
/// channel (or its connection) is closed - e.g. when the worker retires, the container shuts
/// down or the connection drops.
/// While the channel stays healthy, each unacknowledged message keeps holding one slot of
/// the consumer prefetch window.
///
/// [`FailurePolicy::Requeue`] and [`FailurePolicy::Reject`] settle the delivery right away.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Do not acknowledge the delivery.
    #[default]
    LeaveUnacked,
    /// Nack the delivery with `requeue = true`: it becomes immediately available again.
    Requeue,
    /// Reject the delivery with `requeue = false`: it goes to the dead letter exchange,
    /// if the queue has one, or it is discarded.
    Reject,
}

impl FailurePolicy {
    pub(super) fn broker_action(self) -> BrokerAction {
        match self {
            Self::LeaveUnacked => BrokerAction::LeaveUnacked,
            Self::Requeue => BrokerAction::Nack,
            Self::Reject => BrokerAction::Reject,
        }
    }
}
