//! Follows one execution until the backend reports it complete.
//!
//! Run with tracing enabled:
//! ```sh
//! RUST_LOG=info,tokio_tungstenite=off cargo run --example stream_updates -- exec-1
//! ```
//!
//! Optionally log to a file:
//! ```sh
//! LOG_FILE=stream_updates.log RUST_LOG=info cargo run --example stream_updates -- exec-1
//! ```
//!
//! The backend is read from `AGENT_BACKEND_URL` and defaults to `http://localhost:8000`.

use std::fs::File;

use agent_realtime::realtime::{ClientEvent, Manager};
use futures::StreamExt as _;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Ok(path) = std::env::var("LOG_FILE") {
        let file = File::create(path)?;
        tracing_subscriber::registry()
            .with(EnvFilter::from_default_env())
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(file)
                    .with_ansi(false),
            )
            .init();
    } else {
        tracing_subscriber::fmt::init();
    }

    let Some(target) = std::env::args().nth(1) else {
        anyhow::bail!("usage: stream_updates <message-id>");
    };

    let manager = Manager::from_env()?;
    let client = manager.get_client(&target, None)?;
    let mut events = Box::pin(client.events());
    client.connect().await?;
    info!(endpoint = client.endpoint(), "connected");

    while let Some(event) = events.next().await {
        match event {
            Ok(ClientEvent::StatusChanged(status)) => info!(%status, "status changed"),
            Ok(ClientEvent::Update(record)) => info!(
                message_id = %record.message_id,
                status = record.status(),
                stdout = record.stdout(),
                "update"
            ),
            Ok(ClientEvent::Completed(record)) if record.message_id == target => {
                info!(message_id = %record.message_id, status = record.status(), "completed");
                break;
            }
            Ok(ClientEvent::ReconnectFailed { attempts }) => {
                warn!(attempts, "reconnection gave up");
                break;
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "event stream error"),
        }
    }

    manager.disconnect_all();
    Ok(())
}
