//! `tellerline serve`: Start the HTTP API server.

use tellerline_config::AppConfig;

pub async fn run(mut config: AppConfig, port_override: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(port) = port_override {
        config.gateway.port = port;
    }

    println!("Tellerline gateway");
    println!("   Listening: {}:{}", config.gateway.host, config.gateway.port);
    println!("   Model:     {}", config.provider.model);
    if !config.has_api_key() {
        println!("   Warning:   no API key set (AZURE_OPENAI_API_KEY or TELLERLINE_API_KEY)");
    }

    tellerline_gateway::start(config).await?;

    Ok(())
}
