pub mod api;

use crate::agent::RelayAgent;
use crate::cli::ServeArgs;
use std::error::Error;

pub struct Server {
    agent: RelayAgent,
    args: ServeArgs,
}

impl Server {
    pub fn new(agent: RelayAgent, args: ServeArgs) -> Self {
        Self { agent, args }
    }

    pub async fn run(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        api::start_http_server(&self.args, self.agent.clone()).await
    }
}
