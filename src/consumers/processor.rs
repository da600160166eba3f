use std::future::Future;
use std::sync::Arc;

/// The business logic sitting behind a queue: it gets the raw payload of each delivery and
/// reports whether processing succeeded.
///
/// # Scope
///
/// `process` does not get access to the underlying RabbitMq channel, nor to the delivery tag.
/// The [`AcknowledgingListener`](crate::consumers::AcknowledgingListener) acknowledges the
/// message if and only if `process` returns `Ok(true)`.
/// `Ok(false)`, an error and a panic are all treated as a failed processing attempt.
///
/// # Concurrency
///
/// A single processor is shared by all the workers of a
/// [`ListenerContainer`](crate::consumers::ListenerContainer): `process` is invoked
/// concurrently on independent deliveries.
///
/// # Implementers
///
/// You can implement `MessageProcessor` for your own type or wrap an async closure in
/// [`ProcessFn`].
#[async_trait::async_trait]
pub trait MessageProcessor: Send + Sync + 'static {
    async fn process(&self, payload: &[u8]) -> Result<bool, anyhow::Error>;
}

#[async_trait::async_trait]
impl<P> MessageProcessor for Arc<P>
where
    P: MessageProcessor + ?Sized,
{
    async fn process(&self, payload: &[u8]) -> Result<bool, anyhow::Error> {
        P::process(self, payload).await
    }
}

#[async_trait::async_trait]
impl<P> MessageProcessor for Box<P>
where
    P: MessageProcessor + ?Sized,
{
    async fn process(&self, payload: &[u8]) -> Result<bool, anyhow::Error> {
        P::process(self, payload).await
    }
}

/// Turns an async closure into a [`MessageProcessor`].
///
/// The closure receives an owned copy of the payload.
///
/// ```rust
/// use ack_gate::consumers::{MessageProcessor, ProcessFn};
///
/// let processor = ProcessFn(|payload: Vec<u8>| async move {
///     Ok::<_, anyhow::Error>(!payload.is_empty())
/// });
/// # fn assert_processor(_: impl MessageProcessor) {}
/// # assert_processor(processor);
/// ```
pub struct ProcessFn<F>(pub F);

#[async_trait::async_trait]
impl<F, Fut, E> MessageProcessor for ProcessFn<F>
where
    F: Fn(Vec<u8>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<bool, E>> + Send + 'static,
    E: Into<anyhow::Error> + 'static,
{
    async fn process(&self, payload: &[u8]) -> Result<bool, anyhow::Error> {
        (self.0)(payload.to_vec()).await.map_err(Into::into)
    }
}
