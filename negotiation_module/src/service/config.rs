use std::env;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    MissingVar(&'static str),
    #[error("invalid value for {key}: {value}")]
    InvalidVar { key: &'static str, value: String },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Everything the service reads from the environment, loaded once at boot.
/// Bearer tokens arrive here from the surrounding OAuth machinery; the
/// service never refreshes them itself.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub host: String,
    pub port: u16,
    pub database_path: PathBuf,
    /// The advisor: calendar owner, email sender, negotiation owner default.
    pub advisor_email: String,
    pub google_access_token: String,
    pub hubspot_access_token: String,
    pub openai_api_key: String,
    pub openai_model: String,
    pub sweep_interval: Duration,
    /// Base-URL overrides so tests and staging point the connectors at a
    /// mock server; `None` means the real provider endpoints.
    pub gmail_api_base: Option<String>,
    pub calendar_api_base: Option<String>,
    pub hubspot_api_base: Option<String>,
    pub openai_api_base: Option<String>,
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let host = env::var("NEGOTIATION_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = match env::var("NEGOTIATION_PORT") {
            Ok(raw) => raw.parse::<u16>().map_err(|_| ConfigError::InvalidVar {
                key: "NEGOTIATION_PORT",
                value: raw,
            })?,
            Err(_) => 9010,
        };
        let database_path = resolve_path(
            env::var("NEGOTIATION_DB_PATH")
                .unwrap_or_else(|_| "state/negotiations.db".to_string()),
        )?;
        let advisor_email = require_var("ADVISOR_EMAIL")?;
        let google_access_token = require_var("GOOGLE_ACCESS_TOKEN")?;
        let hubspot_access_token = require_var("HUBSPOT_ACCESS_TOKEN")?;
        let openai_api_key = require_var("OPENAI_API_KEY")?;
        let openai_model = env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4".to_string());
        let sweep_interval = env::var("SWEEP_INTERVAL_SECS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .filter(|value| *value > 0)
            .map(Duration::from_secs)
            .unwrap_or_else(|| Duration::from_secs(60));

        Ok(Self {
            host,
            port,
            database_path,
            advisor_email,
            google_access_token,
            hubspot_access_token,
            openai_api_key,
            openai_model,
            sweep_interval,
            gmail_api_base: optional_var("GMAIL_API_BASE"),
            calendar_api_base: optional_var("CALENDAR_API_BASE"),
            hubspot_api_base: optional_var("HUBSPOT_API_BASE"),
            openai_api_base: optional_var("OPENAI_API_BASE"),
        })
    }
}

fn require_var(key: &'static str) -> Result<String, ConfigError> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .ok_or(ConfigError::MissingVar(key))
}

fn optional_var(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn resolve_path(raw: String) -> Result<PathBuf, std::io::Error> {
    let path = PathBuf::from(raw);
    if path.is_absolute() {
        Ok(path)
    } else {
        let cwd = env::current_dir()?;
        Ok(cwd.join(path))
    }
}
