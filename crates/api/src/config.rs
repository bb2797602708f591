//! Application configuration

use std::env;
use std::time::Duration;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    // Server
    pub bind_address: String,
    pub cors_allowed_origins: Vec<String>,

    // Database (optional - AI messages fall back to memory without it)
    pub database_url: Option<String>,
    pub database_max_connections: u32,

    // Completion backend
    pub llm_base_url: String,
    pub llm_default_model: String,
    pub llm_connect_timeout_ms: u64,
    pub llm_chunk_timeout_ms: u64,
    pub llm_pull_timeout_secs: u64,
    pub llm_connect_retries: usize,

    // Gateway
    pub relay_cancel_grace_ms: u64,
    pub triage_gate_turns: u32,
    pub ws_idle_timeout_secs: u64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            // Server
            bind_address: env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string()),
            cors_allowed_origins: env::var("CORS_ALLOWED_ORIGINS")
                .unwrap_or_default()
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),

            // Database
            database_url: env::var("DATABASE_URL").ok().filter(|s| !s.is_empty()),
            database_max_connections: parse_or("DATABASE_MAX_CONNECTIONS", 5)?,

            // Completion backend
            llm_base_url: {
                let url = env::var("LLM_BASE_URL")
                    .unwrap_or_else(|_| "http://localhost:11434".to_string());
                if !(url.starts_with("http://") || url.starts_with("https://")) {
                    return Err(ConfigError::Invalid(
                        "LLM_BASE_URL",
                        "must start with http:// or https://",
                    ));
                }
                url.trim_end_matches('/').to_string()
            },
            llm_default_model: env::var("LLM_DEFAULT_MODEL")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| "llama3".to_string()),
            llm_connect_timeout_ms: parse_or("LLM_CONNECT_TIMEOUT_MS", 5_000)?,
            llm_chunk_timeout_ms: parse_or("LLM_CHUNK_TIMEOUT_MS", 60_000)?,
            llm_pull_timeout_secs: parse_or("LLM_PULL_TIMEOUT_SECS", 1_800)?,
            llm_connect_retries: parse_or("LLM_CONNECT_RETRIES", 2)?,

            // Gateway
            relay_cancel_grace_ms: parse_or("RELAY_CANCEL_GRACE_MS", 500)?,
            triage_gate_turns: {
                let turns: u32 = parse_or("TRIAGE_GATE_TURNS", 3)?;
                if turns == 0 {
                    return Err(ConfigError::Invalid("TRIAGE_GATE_TURNS", "must be at least 1"));
                }
                turns
            },
            ws_idle_timeout_secs: parse_or("WS_IDLE_TIMEOUT_SECS", 300)?,
        })
    }

    pub fn llm_connect_timeout(&self) -> Duration {
        Duration::from_millis(self.llm_connect_timeout_ms)
    }

    pub fn llm_chunk_timeout(&self) -> Duration {
        Duration::from_millis(self.llm_chunk_timeout_ms)
    }

    pub fn llm_pull_timeout(&self) -> Duration {
        Duration::from_secs(self.llm_pull_timeout_secs)
    }

    pub fn relay_cancel_grace(&self) -> Duration {
        Duration::from_millis(self.relay_cancel_grace_ms)
    }

    pub fn ws_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.ws_idle_timeout_secs)
    }
}

impl Default for Config {
    /// Local development defaults, matching `from_env` with an empty environment
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:3000".to_string(),
            cors_allowed_origins: Vec::new(),
            database_url: None,
            database_max_connections: 5,
            llm_base_url: "http://localhost:11434".to_string(),
            llm_default_model: "llama3".to_string(),
            llm_connect_timeout_ms: 5_000,
            llm_chunk_timeout_ms: 60_000,
            llm_pull_timeout_secs: 1_800,
            llm_connect_retries: 2,
            relay_cancel_grace_ms: 500,
            triage_gate_turns: 3,
            ws_idle_timeout_secs: 300,
        }
    }
}

/// Parse an optional numeric environment variable, rejecting garbage values
fn parse_or<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid(name, "must be a non-negative integer")),
        _ => Ok(default),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: &[&str] = &[
        "BIND_ADDRESS",
        "CORS_ALLOWED_ORIGINS",
        "DATABASE_URL",
        "LLM_BASE_URL",
        "LLM_DEFAULT_MODEL",
        "LLM_CHUNK_TIMEOUT_MS",
        "TRIAGE_GATE_TURNS",
    ];

    fn cleanup_config() {
        for var in VARS {
            env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn test_defaults_with_empty_env() {
        cleanup_config();

        let config = Config::from_env().unwrap();
        assert_eq!(config.bind_address, "0.0.0.0:3000");
        assert_eq!(config.llm_base_url, "http://localhost:11434");
        assert_eq!(config.llm_default_model, "llama3");
        assert_eq!(config.triage_gate_turns, 3);
        assert!(config.database_url.is_none());
        assert!(config.cors_allowed_origins.is_empty());
    }

    #[test]
    #[serial]
    fn test_overrides_and_normalization() {
        cleanup_config();
        env::set_var("LLM_BASE_URL", "https://llm.internal:11434/");
        env::set_var("LLM_CHUNK_TIMEOUT_MS", "2500");
        env::set_var("CORS_ALLOWED_ORIGINS", "https://a.example, ,https://b.example");
        env::set_var("DATABASE_URL", "");

        let config = Config::from_env().unwrap();
        assert_eq!(config.llm_base_url, "https://llm.internal:11434");
        assert_eq!(config.llm_chunk_timeout(), Duration::from_millis(2500));
        assert_eq!(
            config.cors_allowed_origins,
            vec!["https://a.example".to_string(), "https://b.example".to_string()]
        );
        assert!(config.database_url.is_none());

        cleanup_config();
    }

    #[test]
    #[serial]
    fn test_invalid_values_rejected() {
        cleanup_config();

        env::set_var("LLM_BASE_URL", "ftp://llm");
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::Invalid("LLM_BASE_URL", _))
        ));
        env::remove_var("LLM_BASE_URL");

        env::set_var("TRIAGE_GATE_TURNS", "0");
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::Invalid("TRIAGE_GATE_TURNS", _))
        ));

        env::set_var("TRIAGE_GATE_TURNS", "three");
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::Invalid("TRIAGE_GATE_TURNS", _))
        ));

        cleanup_config();
    }
}
