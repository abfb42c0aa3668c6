use crate::config::ServerConfig;
use crate::core::llm::BasetenChat;

/// Shared application state: configuration plus one HTTP client reused by
/// every LLM and TTS request across sessions.
pub struct AppState {
    pub config: ServerConfig,
    pub http: reqwest::Client,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    /// Chat client bound to the shared HTTP connection pool.
    pub fn llm_client(&self) -> BasetenChat {
        BasetenChat::new(self.config.llm_config(), self.http.clone())
    }
}
