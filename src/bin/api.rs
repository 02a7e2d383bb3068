use splitlah::{
    api::{start_server, ApiState},
    config::Config,
    ingestion::GeminiReceiptExtractor,
    voice::GeminiVoiceInterpreter,
};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Loads .env as well
    let config = Config::from_env()?;

    if config.gemini.api_key.is_empty() {
        warn!("GEMINI_API_KEY not set; receipt and voice requests will fail");
    }

    info!("Splitlah - API Server");
    info!("Port: {}", config.port);
    info!("Model: {}", config.gemini.model);

    let extractor = Arc::new(GeminiReceiptExtractor::new(&config.gemini)?);
    let interpreter = Arc::new(GeminiVoiceInterpreter::new(&config.gemini)?);
    let state = ApiState::new(extractor, interpreter);

    info!("Starting API server...");
    start_server(state, config.port).await?;

    Ok(())
}
