pub mod cli;
pub mod config;
pub mod llm;
pub mod models;
pub mod relay;
pub mod server;

use cli::Args;
use config::{ llm_config_from_args, persona::load_persona, ServerConfig };
use llm::chat::new_provider;
use log::{ info, warn };
use relay::Relay;
use server::Server;
use std::error::Error;
use std::sync::Arc;

pub async fn run(args: Args) -> Result<(), Box<dyn Error + Send + Sync>> {
    let llm_config = llm_config_from_args(&args)?;
    let server_config = ServerConfig::from_args(&args)?;

    info!("--- Relay Configuration ---");
    info!("Server Address: {}", server_config.addr);
    info!("Chat LLM Type: {}", llm_config.llm_type);
    info!("Chat Base URL: {}", llm_config.base_url());
    info!("Chat Model: {}", llm_config.model());
    info!("Upstream Timeout: {:?}", llm_config.timeout);
    info!("Persona Path: {}", args.persona_path);
    info!("Max Body Bytes: {}", server_config.max_body_bytes);
    info!("Rate Limit (req/s): {}", server_config.rate_limit_per_second);
    info!("TLS Enabled: {}", server_config.tls.is_some());
    info!("---------------------------");

    if server_config.expose_error_details {
        warn!("DEBUG is on: upstream error details will be returned to callers");
    }

    let persona = load_persona(&args.persona_path)?;
    let provider = new_provider(&llm_config)?;
    if !provider.has_credential() {
        warn!("No provider API key configured; chat requests will fail until OPENAI_API_KEY is set");
    }

    let relay = Arc::new(Relay::new(persona, provider));
    let server = Server::new(server_config, relay);
    server.run().await?;

    Ok(())
}
