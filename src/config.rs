//! Runtime configuration
//!
//! Plain struct with defaults for a local setup (Jupyter on 8888, UI on
//! 3000), overridable through environment variables. The Gemini API key has
//! no default and must come from `GEMINI_API_KEY`.

use tracing::warn;

/// Configuration for the grader process
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the web surface binds to
    pub bind_addr: String,
    /// Gemini API base URL
    pub gemini_base_url: String,
    /// Gemini API key
    pub gemini_api_key: String,
    /// Judging model name
    pub gemini_model: String,
    /// Jupyter server base URL
    pub jupyter_base_url: String,
    /// Jupyter server token; empty for token-less local servers
    pub jupyter_token: String,
    /// Maximum model rounds per grading job
    pub max_rounds: usize,
    /// Character budget for execution-output previews in progress notices
    pub output_preview_chars: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:3000".to_string(),
            gemini_base_url: "https://generativelanguage.googleapis.com".to_string(),
            gemini_api_key: String::new(),
            gemini_model: "gemini-2.5-flash".to_string(),
            jupyter_base_url: "http://127.0.0.1:8888".to_string(),
            jupyter_token: String::new(),
            max_rounds: 16,
            output_preview_chars: 200,
        }
    }
}

impl Config {
    /// Build the configuration from the environment, falling back to
    /// defaults for anything unset. Unparseable numeric overrides are
    /// logged and ignored rather than failing startup.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let max_rounds = match std::env::var("CELLGRADER_MAX_ROUNDS") {
            Ok(raw) => match raw.parse() {
                Ok(value) => value,
                Err(_) => {
                    warn!(value = %raw, "CELLGRADER_MAX_ROUNDS is not a number, using default");
                    defaults.max_rounds
                }
            },
            Err(_) => defaults.max_rounds,
        };

        Self {
            bind_addr: env_or("CELLGRADER_BIND", defaults.bind_addr),
            gemini_base_url: env_or("GEMINI_API_BASE", defaults.gemini_base_url),
            gemini_api_key: env_or("GEMINI_API_KEY", defaults.gemini_api_key),
            gemini_model: env_or("GEMINI_MODEL", defaults.gemini_model),
            jupyter_base_url: env_or("JUPYTER_URL", defaults.jupyter_base_url),
            jupyter_token: env_or("JUPYTER_TOKEN", defaults.jupyter_token),
            max_rounds,
            output_preview_chars: defaults.output_preview_chars,
        }
    }
}

fn env_or(name: &str, default: String) -> String {
    std::env::var(name).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.bind_addr, "127.0.0.1:3000");
        assert_eq!(config.jupyter_base_url, "http://127.0.0.1:8888");
        assert_eq!(config.gemini_model, "gemini-2.5-flash");
        assert_eq!(config.max_rounds, 16);
        assert_eq!(config.output_preview_chars, 200);
        assert!(config.gemini_api_key.is_empty());
    }
}
