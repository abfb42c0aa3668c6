use std::env;

use super::ServerConfig;

impl ServerConfig {
    /// Load configuration from environment variables
    ///
    /// Reads configuration from environment variables, with sensible
    /// defaults for everything but the provider API keys. Also loads from a
    /// `.env` file if present using dotenvy.
    ///
    /// # Errors
    /// Returns an error if a required API key is missing or a numeric
    /// variable is malformed.
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        // Load .env file if it exists
        let _ = dotenvy::dotenv();

        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("PORT")
            .unwrap_or_else(|_| "8000".to_string())
            .parse::<u16>()
            .map_err(|e| format!("Invalid port number: {e}"))?;

        let fennec_api_key = require("FENNEC_API_KEY")?;
        let fennec_stream_url = env::var("FENNEC_WS_URL")
            .unwrap_or_else(|_| crate::core::asr::DEFAULT_STREAM_URL.to_string());
        let fennec_token_url = env::var("FENNEC_TOKEN_URL")
            .unwrap_or_else(|_| crate::core::asr::DEFAULT_TOKEN_URL.to_string());
        let fennec_sample_rate = parse_var("FENNEC_SAMPLE_RATE", 16_000)?;
        let fennec_channels = parse_var("FENNEC_CHANNELS", 1)?;

        let baseten_api_key = require("BASETEN_API_KEY")?;
        let baseten_base_url = env::var("BASETEN_BASE_URL")
            .unwrap_or_else(|_| "https://inference.baseten.co/v1".to_string());
        let baseten_model = env::var("BASETEN_MODEL")
            .unwrap_or_else(|_| "meta-llama/Llama-4-Scout-17B-16E-Instruct".to_string());

        let inworld_api_key = require("INWORLD_API_KEY")?;
        let inworld_model_id =
            env::var("INWORLD_MODEL_ID").unwrap_or_else(|_| "inworld-tts-1".to_string());
        let inworld_voice_id =
            env::var("INWORLD_VOICE_ID").unwrap_or_else(|_| "Olivia".to_string());
        let inworld_sample_rate = parse_var("INWORLD_SAMPLE_RATE", 48_000)?;

        Ok(ServerConfig {
            host,
            port,
            fennec_api_key,
            fennec_stream_url,
            fennec_token_url,
            fennec_sample_rate,
            fennec_channels,
            baseten_api_key,
            baseten_base_url,
            baseten_model,
            inworld_api_key,
            inworld_model_id,
            inworld_voice_id,
            inworld_sample_rate,
        })
    }
}

fn require(name: &str) -> Result<String, String> {
    env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| format!("{name} is required"))
}

fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> Result<T, String>
where
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw.parse().map_err(|e| format!("Invalid {name}: {e}")),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const ALL_VARS: &[&str] = &[
        "HOST",
        "PORT",
        "FENNEC_API_KEY",
        "FENNEC_WS_URL",
        "FENNEC_TOKEN_URL",
        "FENNEC_SAMPLE_RATE",
        "FENNEC_CHANNELS",
        "BASETEN_API_KEY",
        "BASETEN_BASE_URL",
        "BASETEN_MODEL",
        "INWORLD_API_KEY",
        "INWORLD_MODEL_ID",
        "INWORLD_VOICE_ID",
        "INWORLD_SAMPLE_RATE",
    ];

    // Helper to clean up environment variables after tests
    fn cleanup_env_vars() {
        unsafe {
            for var in ALL_VARS {
                env::remove_var(var);
            }
        }
    }

    fn set_required_keys() {
        unsafe {
            env::set_var("FENNEC_API_KEY", "fennec-test");
            env::set_var("BASETEN_API_KEY", "baseten-test");
            env::set_var("INWORLD_API_KEY", "inworld-test");
        }
    }

    #[test]
    #[serial]
    fn test_from_env_defaults() {
        cleanup_env_vars();
        set_required_keys();

        let config = ServerConfig::from_env().expect("Should load config");
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 8000);
        assert_eq!(config.fennec_sample_rate, 16_000);
        assert_eq!(config.fennec_channels, 1);
        assert_eq!(config.inworld_sample_rate, 48_000);
        assert_eq!(config.baseten_base_url, "https://inference.baseten.co/v1");
        assert_eq!(config.address(), "0.0.0.0:8000");

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_env_missing_api_key_fails() {
        cleanup_env_vars();
        unsafe {
            env::set_var("FENNEC_API_KEY", "fennec-test");
            env::set_var("BASETEN_API_KEY", "baseten-test");
            // INWORLD_API_KEY intentionally missing
        }

        let result = ServerConfig::from_env();
        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("INWORLD_API_KEY is required")
        );

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_env_host_and_port() {
        cleanup_env_vars();
        set_required_keys();
        unsafe {
            env::set_var("HOST", "127.0.0.1");
            env::set_var("PORT", "9001");
        }

        let config = ServerConfig::from_env().expect("Should load config");
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 9001);

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_env_invalid_port_fails() {
        cleanup_env_vars();
        set_required_keys();
        unsafe {
            env::set_var("PORT", "not-a-port");
        }

        let result = ServerConfig::from_env();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("Invalid port"));

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_env_provider_overrides() {
        cleanup_env_vars();
        set_required_keys();
        unsafe {
            env::set_var("BASETEN_MODEL", "my-model");
            env::set_var("INWORLD_VOICE_ID", "Mark");
            env::set_var("FENNEC_SAMPLE_RATE", "8000");
        }

        let config = ServerConfig::from_env().expect("Should load config");
        assert_eq!(config.baseten_model, "my-model");
        assert_eq!(config.inworld_voice_id, "Mark");
        assert_eq!(config.fennec_sample_rate, 8000);

        cleanup_env_vars();
    }
}
