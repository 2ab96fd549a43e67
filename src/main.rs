mod admin;
mod call;
mod chat;
mod config;
mod console;
mod entity;
mod error;
mod session;
mod store;
#[cfg(test)]
mod testing;
mod utils;

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = config::Config::load()?;

    let client = reqwest::Client::builder()
        .timeout(config.request_timeout)
        .build()
        .context("Failed to build HTTP client")?;

    let backends = store::create_backends(&config, client.clone())?;
    let chat_backend = Arc::new(chat::HttpChatBackend::new(&config.chat_url, client.clone()));
    let ingest = Arc::new(chat::HttpKnowledgeIngest::new(&config.chat_url, client.clone()));

    let session = Arc::new(session::ChatSession::new(
        backends.store.clone(),
        chat_backend,
    ));
    let dialer = console::Dialer {
        tokens: Arc::new(call::HttpTokenSource::new(
            &config.token_url,
            &config.voice_room,
            &config.voice_identity,
            client.clone(),
        )),
        transport: Arc::new(call::LiveKitTransport),
        sink: Arc::new(call::LoggingSink),
    };
    let editor = admin::PersonalityEditor::new(backends.store.clone());
    let knowledge = admin::KnowledgeManager::new(backends.store.clone(), backends.storage, ingest);
    let logs = admin::LogTail::new(backends.store, config.log_window);

    let mut console = console::Console::new(
        session,
        dialer,
        editor,
        knowledge,
        logs,
        config.store_backend,
        config.timezone,
    );
    info!(
        "AURA console ready ({} store, display zone {})",
        config.store_backend.label(),
        config.timezone
    );

    tokio::select! {
        result = console.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received, releasing sessions...");
            console.shutdown().await;
        }
    }

    info!("Shutdown complete");

    Ok(())
}
