use std::net::SocketAddr;
use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Languages the realtime transcription model is known to accept.
const SUPPORTED_LANGUAGES: [&str; 12] = [
    "en", "es", "fr", "de", "it", "pt", "nl", "ja", "ko", "zh", "ru", "pl",
];

pub fn is_supported_language(code: &str) -> bool {
    SUPPORTED_LANGUAGES.contains(&code)
}

/// The realtime WebSocket endpoint served next to the REST API at `api_base`.
pub fn realtime_url(api_base: &str, model: &str) -> Result<String, ConfigError> {
    let base = api_base.trim().trim_end_matches('/');
    let socket_base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        return Err(ConfigError::InvalidValue(
            "OPENAI_API_BASE".to_string(),
            format!("'{api_base}' is not an http(s) URL"),
        ));
    };
    Ok(format!("{socket_base}/realtime?model={model}"))
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub openai_api_key: String,
    pub openai_api_base: String,
    pub extraction_model: String,
    pub extraction_temperature: f32,
    pub extraction_timeout: Duration,
    pub realtime_model: String,
    /// Derived from `openai_api_base` and `realtime_model`.
    pub realtime_url: String,
    pub transcription_model: String,
    pub transcription_language: String,
    pub volatile_commands: bool,
    pub volatile_cooldown: Duration,
    pub scene_seed: Option<u64>,
    pub log_level: Level,
}

fn var_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parse_var<T>(name: &str, default: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let raw = var_or(name, default);
    raw.trim()
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidValue(name.to_string(), format!("'{raw}': {e}")))
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let bind_address: SocketAddr = parse_var("BIND_ADDRESS", "0.0.0.0:3000")?;

        let openai_api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| ConfigError::MissingVar("OPENAI_API_KEY".to_string()))?;
        let openai_api_base = var_or("OPENAI_API_BASE", "https://api.openai.com/v1");

        let extraction_model = var_or("EXTRACTION_MODEL", "gpt-4o-mini");
        let extraction_temperature: f32 = parse_var("EXTRACTION_TEMPERATURE", "0.15")?;
        if !(0.0..=2.0).contains(&extraction_temperature) {
            return Err(ConfigError::InvalidValue(
                "EXTRACTION_TEMPERATURE".to_string(),
                format!("{extraction_temperature} is outside 0..=2"),
            ));
        }
        let extraction_timeout_secs: u64 = parse_var("EXTRACTION_TIMEOUT_SECS", "10")?;
        if extraction_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "EXTRACTION_TIMEOUT_SECS".to_string(),
                "must be at least 1".to_string(),
            ));
        }

        let realtime_model = var_or("REALTIME_MODEL", "gpt-4o-realtime-preview-2024-10-01");
        let realtime_url = realtime_url(&openai_api_base, &realtime_model)?;
        let transcription_model = var_or("TRANSCRIPTION_MODEL", "whisper-1");
        let transcription_language = var_or("TRANSCRIPTION_LANGUAGE", "en").to_lowercase();
        if !is_supported_language(&transcription_language) {
            return Err(ConfigError::InvalidValue(
                "TRANSCRIPTION_LANGUAGE".to_string(),
                format!("'{transcription_language}' is not a supported language"),
            ));
        }

        let volatile_commands: bool = parse_var("VOLATILE_COMMANDS", "false")?;
        let volatile_cooldown_ms: u64 = parse_var("VOLATILE_COOLDOWN_MS", "800")?;

        let scene_seed = match std::env::var("SCENE_SEED") {
            Ok(raw) => Some(raw.trim().parse::<u64>().map_err(|e| {
                ConfigError::InvalidValue("SCENE_SEED".to_string(), e.to_string())
            })?),
            Err(_) => None,
        };

        let log_level_str = var_or("RUST_LOG", "INFO");
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        Ok(Self {
            bind_address,
            openai_api_key,
            openai_api_base,
            extraction_model,
            extraction_temperature,
            extraction_timeout: Duration::from_secs(extraction_timeout_secs),
            realtime_model,
            realtime_url,
            transcription_model,
            transcription_language,
            volatile_commands,
            volatile_cooldown: Duration::from_millis(volatile_cooldown_ms),
            scene_seed,
            log_level,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;
    use tracing::Level;

    const VARS: [&str; 13] = [
        "BIND_ADDRESS",
        "OPENAI_API_KEY",
        "OPENAI_API_BASE",
        "EXTRACTION_MODEL",
        "EXTRACTION_TEMPERATURE",
        "EXTRACTION_TIMEOUT_SECS",
        "REALTIME_MODEL",
        "TRANSCRIPTION_MODEL",
        "TRANSCRIPTION_LANGUAGE",
        "VOLATILE_COMMANDS",
        "VOLATILE_COOLDOWN_MS",
        "SCENE_SEED",
        "RUST_LOG",
    ];

    fn clear_env_vars() {
        for var in VARS {
            unsafe {
                env::remove_var(var);
            }
        }
    }

    fn set_minimal_env() {
        unsafe {
            env::set_var("OPENAI_API_KEY", "test-openai-key");
        }
    }

    fn expect_invalid(var: &str, value: &str) {
        clear_env_vars();
        set_minimal_env();
        unsafe {
            env::set_var(var, value);
        }
        match Config::from_env().unwrap_err() {
            ConfigError::InvalidValue(name, _) => assert_eq!(name, var),
            other => panic!("Expected InvalidValue for {var}, got {other:?}"),
        }
    }

    #[test]
    fn test_config_error_display() {
        let missing_var = ConfigError::MissingVar("TEST_VAR".to_string());
        assert_eq!(
            format!("{}", missing_var),
            "Missing environment variable: TEST_VAR"
        );

        let invalid_value =
            ConfigError::InvalidValue("TEST_VAR".to_string(), "bad_value".to_string());
        assert_eq!(
            format!("{}", invalid_value),
            "Invalid value for environment variable TEST_VAR: bad_value"
        );
    }

    #[test]
    #[serial]
    fn test_config_from_env_defaults() {
        clear_env_vars();
        set_minimal_env();

        let config = Config::from_env().expect("Config should load successfully");

        assert_eq!(config.bind_address.to_string(), "0.0.0.0:3000");
        assert_eq!(config.openai_api_key, "test-openai-key");
        assert_eq!(config.openai_api_base, "https://api.openai.com/v1");
        assert_eq!(config.extraction_model, "gpt-4o-mini");
        assert_eq!(config.extraction_temperature, 0.15);
        assert_eq!(config.extraction_timeout, Duration::from_secs(10));
        assert_eq!(
            config.realtime_url,
            "wss://api.openai.com/v1/realtime?model=gpt-4o-realtime-preview-2024-10-01"
        );
        assert_eq!(config.transcription_model, "whisper-1");
        assert_eq!(config.transcription_language, "en");
        assert!(!config.volatile_commands);
        assert_eq!(config.volatile_cooldown, Duration::from_millis(800));
        assert_eq!(config.scene_seed, None);
        assert_eq!(config.log_level, Level::INFO);
    }

    #[test]
    #[serial]
    fn test_config_from_env_custom_values() {
        clear_env_vars();
        unsafe {
            env::set_var("BIND_ADDRESS", "127.0.0.1:8080");
            env::set_var("OPENAI_API_KEY", "custom-key");
            env::set_var("OPENAI_API_BASE", "http://localhost:11434/v1");
            env::set_var("EXTRACTION_MODEL", "llama3.1");
            env::set_var("EXTRACTION_TEMPERATURE", "0.3");
            env::set_var("EXTRACTION_TIMEOUT_SECS", "4");
            env::set_var("REALTIME_MODEL", "local-realtime");
            env::set_var("TRANSCRIPTION_LANGUAGE", "DE");
            env::set_var("VOLATILE_COMMANDS", "true");
            env::set_var("VOLATILE_COOLDOWN_MS", "1200");
            env::set_var("SCENE_SEED", "99");
            env::set_var("RUST_LOG", "debug");
        }

        let config = Config::from_env().expect("Config should load successfully");

        assert_eq!(config.bind_address.to_string(), "127.0.0.1:8080");
        assert_eq!(config.openai_api_base, "http://localhost:11434/v1");
        assert_eq!(config.extraction_model, "llama3.1");
        assert_eq!(config.extraction_temperature, 0.3);
        assert_eq!(config.extraction_timeout, Duration::from_secs(4));
        assert_eq!(config.realtime_model, "local-realtime");
        assert_eq!(
            config.realtime_url,
            "ws://localhost:11434/v1/realtime?model=local-realtime"
        );
        assert_eq!(config.transcription_language, "de");
        assert!(config.volatile_commands);
        assert_eq!(config.volatile_cooldown, Duration::from_millis(1200));
        assert_eq!(config.scene_seed, Some(99));
        assert_eq!(config.log_level, Level::DEBUG);
    }

    #[test]
    #[serial]
    fn test_config_missing_openai_key() {
        clear_env_vars();

        match Config::from_env().unwrap_err() {
            ConfigError::MissingVar(msg) => assert!(msg.contains("OPENAI_API_KEY")),
            _ => panic!("Expected MissingVar for OPENAI_API_KEY"),
        }
    }

    #[test]
    #[serial]
    fn test_config_invalid_values() {
        expect_invalid("BIND_ADDRESS", "not-a-valid-address");
        expect_invalid("RUST_LOG", "not-a-level");
        expect_invalid("EXTRACTION_TEMPERATURE", "warm");
        expect_invalid("EXTRACTION_TEMPERATURE", "5");
        expect_invalid("EXTRACTION_TIMEOUT_SECS", "0");
        expect_invalid("TRANSCRIPTION_LANGUAGE", "xx");
        expect_invalid("VOLATILE_COMMANDS", "sometimes");
        expect_invalid("SCENE_SEED", "-1");
        expect_invalid("OPENAI_API_BASE", "api.openai.com/v1");
    }

    #[test]
    fn test_realtime_url_follows_api_base() {
        assert_eq!(
            realtime_url("https://gateway.example.com/openai/v1/", "rt").unwrap(),
            "wss://gateway.example.com/openai/v1/realtime?model=rt"
        );
        assert_eq!(
            realtime_url("http://127.0.0.1:8080/v1", "rt").unwrap(),
            "ws://127.0.0.1:8080/v1/realtime?model=rt"
        );
        assert!(matches!(
            realtime_url("ftp://example.com", "rt"),
            Err(ConfigError::InvalidValue(name, _)) if name == "OPENAI_API_BASE"
        ));
    }
}
