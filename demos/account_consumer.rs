use ack_gate::bootstrap::account_listener;
use ack_gate::configuration::Settings;
use ack_gate::consumers::ProcessFn;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    // `RUST_LOG=debug` shows every delivery being processed.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    // Settings come from `config/default.toml`, if present, and from the environment.
    // To consume from the out-of-the-box RabbitMq Docker image:
    //
    //     ACK_GATE__RABBITMQ__HOST=localhost cargo run --example account_consumer
    let settings = Settings::load()?;

    // Our processor accepts every transaction but the ones flagged as bad.
    // Accepted messages are acknowledged, the others stay on the queue.
    let processor = ProcessFn(|payload: Vec<u8>| async move {
        let transaction = String::from_utf8(payload)?;
        tracing::info!(transaction = %transaction, "processing transaction");
        Ok::<_, anyhow::Error>(!transaction.starts_with("TX-BAD"))
    });

    let Some(container) = account_listener(&settings, processor).await? else {
        tracing::warn!("Set ACK_GATE__RABBITMQ__HOST to start consuming");
        return Ok(());
    };

    // Consumption stops gracefully on SIGTERM.
    container.run_until_sigterm().await?;
    Ok(())
}
