//! `tellerline ask`: One question, one answer.

use std::sync::Arc;
use tellerline_config::AppConfig;
use tellerline_core::event::EventBus;
use tellerline_memory::InMemoryStateStore;
use tokio_util::sync::CancellationToken;

pub async fn run(
    config: AppConfig,
    question: String,
    language: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let events = Arc::new(EventBus::default());
    let store = Arc::new(InMemoryStateStore::new(config.state.ttl()));
    let orchestrator = tellerline_gateway::build_orchestrator(&config, store, events.clone())?;
    let _logger = tellerline_gateway::spawn_event_logger(&events);

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let reply = orchestrator
        .answer_direct(&question, language.as_deref(), &cancel)
        .await?;
    println!("{}", reply.data);

    Ok(())
}
