//! `weft serve`: Start the HTTP gateway.

use std::sync::Arc;
use weft_config::AppConfig;
use weft_core::ModelEvent;
use weft_providers::ScriptedSource;

pub async fn run(port_override: Option<u16>, scripted: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    if let Some(port) = port_override {
        config.gateway.port = port;
    }

    println!("Weft gateway");
    println!("   Listening: {}:{}", config.gateway.host, config.gateway.port);
    println!("   Approval:  {:?}", config.gateway.approval_mode);

    match scripted {
        Some(text) => {
            println!("   Model:     scripted");
            let source = ScriptedSource::repeating(vec![vec![ModelEvent::Content(text)]]);
            weft_gateway::start_with_source(config, Arc::new(source)).await?;
        }
        None => {
            println!("   Model:     {} at {}", config.model.model, config.model.api_url);
            weft_gateway::start(config).await?;
        }
    }

    Ok(())
}
