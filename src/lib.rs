pub mod agent;
pub mod client;
pub mod cli;
pub mod error;
pub mod llm;
pub mod models;
pub mod server;
pub mod text;

use agent::RelayAgent;
use cli::{ Args, Command, ServeArgs };
use log::{ info, warn };
use server::Server;
use std::error::Error;
use std::time::Duration;

pub async fn run(args: Args) -> Result<(), Box<dyn Error + Send + Sync>> {
    match args.command {
        Command::Serve(serve_args) => serve(serve_args).await,
        Command::Chat(chat_args) => client::terminal::run_chat(&chat_args).await,
    }
}

pub async fn serve(args: ServeArgs) -> Result<(), Box<dyn Error + Send + Sync>> {
    info!("--- Core Configuration ---");
    info!("Server Address: {}", args.server_addr());
    info!("Allowed Origins: {}", args.allowed_origins.join(", "));
    info!("Chat Model: {}", args.chat_model);
    info!("Chat Base URL: {}", args.chat_base_url);
    info!("Upstream Timeout: {}s", args.upstream_timeout_secs);
    info!("TLS Enabled: {}", args.enable_tls);
    if args.gemini_api_key.as_deref().map_or(true, |k| k.trim().is_empty()) {
        warn!("Gemini API Key: NOT SET (chat requests will fail until it is configured)");
    } else {
        info!("Gemini API Key: set");
    }
    info!("-------------------------");

    let chat_client = llm::chat::new_client(&args.llm_config());
    let agent = RelayAgent::new(chat_client, Duration::from_secs(args.upstream_timeout_secs));

    let server = Server::new(agent, args);
    server.run().await?;

    Ok(())
}
