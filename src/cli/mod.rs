use clap::{ Args as ClapArgs, Parser, Subcommand };

use crate::llm::{ LlmConfig, DEFAULT_GEMINI_BASE_URL, DEFAULT_GEMINI_MODEL };

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the relay backend.
    Serve(ServeArgs),
    /// Chat with a running relay from the terminal.
    Chat(ChatArgs),
}

#[derive(ClapArgs, Debug, Clone)]
pub struct ServeArgs {
    // --- Server Args ---
    /// Interface the HTTP server binds to.
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port the HTTP server listens on.
    #[arg(long, env = "PORT", default_value = "4000")]
    pub port: u16,

    /// Origins allowed to call the API from a browser (comma separated).
    #[arg(long, env = "ALLOWED_ORIGINS", value_delimiter = ',', default_value = "http://localhost:5173")]
    pub allowed_origins: Vec<String>,

    // --- Chat LLM Provider Args ---
    /// API key for the Gemini API. The server starts without it, but every chat turn fails.
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    pub gemini_api_key: Option<String>,

    /// Model name for chat completion.
    #[arg(long, env = "CHAT_MODEL", default_value = DEFAULT_GEMINI_MODEL)]
    pub chat_model: String,

    /// Base URL of the Gemini API.
    #[arg(long, env = "CHAT_BASE_URL", default_value = DEFAULT_GEMINI_BASE_URL)]
    pub chat_base_url: String,

    /// System instruction sent with every conversation.
    #[arg(
        long,
        env = "SYSTEM_INSTRUCTION",
        default_value = "You are a helpful and friendly assistant. Always answer in the user's language."
    )]
    pub system_instruction: String,

    /// Seconds to wait for the upstream to accept a chat request before failing the turn.
    #[arg(long, env = "UPSTREAM_TIMEOUT_SECS", default_value = "30")]
    pub upstream_timeout_secs: u64,

    // --- TLS Args ---
    /// Optional path to the TLS certificate file (PEM format). Requires --tls-key-path.
    #[arg(long, env = "TLS_CERT_PATH")]
    pub tls_cert_path: Option<String>,

    /// Optional path to the TLS private key file (PEM format). Requires --tls-cert-path.
    #[arg(long, env = "TLS_KEY_PATH")]
    pub tls_key_path: Option<String>,

    #[arg(long, env = "ENABLE_TLS", default_value = "false")]
    pub enable_tls: bool,
}

impl ServeArgs {
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn llm_config(&self) -> LlmConfig {
        LlmConfig {
            api_key: self.gemini_api_key.clone(),
            completion_model: Some(self.chat_model.clone()),
            base_url: Some(self.chat_base_url.clone()),
            system_instruction: Some(self.system_instruction.clone()),
        }
    }
}

#[derive(ClapArgs, Debug, Clone)]
pub struct ChatArgs {
    /// Base URL of the relay server.
    #[arg(long, env = "CHAT_SERVER_URL", default_value = "http://localhost:4000")]
    pub server_url: String,

    /// Print each finished answer rendered as HTML.
    #[arg(long, default_value = "false")]
    pub html: bool,
}
