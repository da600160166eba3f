use amq_protocol_types::FieldTable;
use lapin::Channel;

#[async_trait::async_trait]
/// A hook to execute logic against the broker before consumers start pulling messages.
///
/// # Use case
///
/// Who creates the queue a consumer reads from, and the exchange it is bound to?
/// Often it is preferable to have consumers in charge of declaring the objects they rely on:
/// a pre-start hook gets access to a channel to do exactly that.
///
/// See [`topology`](crate::consumers::topology) for ready-made hooks.
pub trait ConsumerPreStartHook: Send + Sync + 'static {
    async fn run(
        &self,
        channel: &Channel,
        queue_name: &str,
        queue_args: FieldTable,
    ) -> Result<(), anyhow::Error>;
}

/// assert it's object safe
type _CHECK = Box<dyn ConsumerPreStartHook>;
