use limbo_gate::{config::Config, gateway::Gateway, verified::NoPersistence};
use std::sync::Arc;
use tokio::net::TcpListener;

#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config = Config::default();
    let listen = config.listen_address;
    let gateway = Gateway::new(config, Arc::new(NoPersistence))?;
    let listener = TcpListener::bind(listen).await?;
    tracing::info!(%listen, "gateway listening");

    tokio::select! {
        result = gateway.run(listener) => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutting down");
            gateway.shutdown();
        }
    }

    Ok(())
}
