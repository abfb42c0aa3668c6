//! Server configuration.
//!
//! Everything comes from environment variables (plus an optional `.env`
//! file); nothing else affects behavior. The three provider API keys are
//! required — startup fails without them.

mod env;

use crate::core::asr::{FennecAsrConfig, VadSettings};
use crate::core::llm::BasetenConfig;
use crate::core::tts::InworldTtsConfig;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,

    // Fennec ASR
    pub fennec_api_key: String,
    pub fennec_stream_url: String,
    pub fennec_token_url: String,
    pub fennec_sample_rate: u32,
    pub fennec_channels: u16,

    // Baseten LLM
    pub baseten_api_key: String,
    pub baseten_base_url: String,
    pub baseten_model: String,

    // Inworld TTS
    pub inworld_api_key: String,
    pub inworld_model_id: String,
    pub inworld_voice_id: String,
    pub inworld_sample_rate: u32,
}

impl ServerConfig {
    /// Socket address string for the listener.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn asr_config(&self) -> FennecAsrConfig {
        FennecAsrConfig {
            api_key: self.fennec_api_key.clone(),
            stream_url: self.fennec_stream_url.clone(),
            token_url: self.fennec_token_url.clone(),
            sample_rate: self.fennec_sample_rate,
            channels: self.fennec_channels,
            vad: VadSettings::default(),
        }
    }

    pub fn llm_config(&self) -> BasetenConfig {
        BasetenConfig {
            api_key: self.baseten_api_key.clone(),
            base_url: self.baseten_base_url.clone(),
            model: self.baseten_model.clone(),
        }
    }

    pub fn tts_config(&self) -> InworldTtsConfig {
        InworldTtsConfig {
            api_key_basic_b64: self.inworld_api_key.clone(),
            model_id: self.inworld_model_id.clone(),
            voice_id: self.inworld_voice_id.clone(),
            sample_rate: self.inworld_sample_rate,
            ..Default::default()
        }
    }
}
