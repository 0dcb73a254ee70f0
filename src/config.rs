use anyhow::Context;
use mpstats_client::wb_card::DEFAULT_CARD_BASE_URL;
use mpstats_client::{MpstatsConfig, DEFAULT_BASE_URL};
use std::time::Duration;

pub const DEFAULT_OPENAI_MODEL: &str = "gpt-3.5-turbo";
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com";

#[derive(Clone, Debug)]
pub struct OpenAiConfig {
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
}

/// Process-wide settings, read once at startup and passed to whatever needs them.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub mpstats: MpstatsConfig,
    pub mpstats_rpm: u64,
    pub wb_card_base_url: String,
    pub openai: OpenAiConfig,
    pub session_secret: Option<String>,
    pub database_path: String,
    pub bind_addr: String,
    pub port: u16,
    pub allowed_origins: Vec<String>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        Self::from_lookup(|key| {
            envmnt::exists(key)
                .then(|| envmnt::get_or(key, ""))
                .filter(|v| !v.trim().is_empty())
        })
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, anyhow::Error> {
        fn parse<T: std::str::FromStr>(
            get: &impl Fn(&str) -> Option<String>,
            key: &str,
            default: T,
        ) -> Result<T, anyhow::Error>
        where
            T::Err: std::error::Error + Send + Sync + 'static,
        {
            match get(key) {
                Some(v) => v.trim().parse().with_context(|| format!("Invalid {key}: {v}")),
                None => Ok(default),
            }
        }

        let token = get("MPSTATS_API_KEY").unwrap_or_default();
        let timeout_secs: u64 = parse(&get, "MPSTATS_TIMEOUT_SECS", 30)?;
        Ok(Self {
            mpstats: MpstatsConfig {
                base_url: get("MPSTATS_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
                token: token.trim().to_string(),
                timeout: Duration::from_secs(timeout_secs),
            },
            mpstats_rpm: parse(&get, "MPSTATS_RPM", 60)?,
            wb_card_base_url: get("WB_CARD_BASE_URL")
                .unwrap_or_else(|| DEFAULT_CARD_BASE_URL.to_string()),
            openai: OpenAiConfig {
                api_key: get("OPENAI_API_KEY").map(|k| k.trim().to_string()),
                model: get("OPENAI_MODEL").unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_string()),
                base_url: get("OPENAI_BASE_URL")
                    .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string()),
            },
            session_secret: get("SESSION_SECRET"),
            database_path: get("DATABASE_PATH").unwrap_or_else(|| "storage/users.db".to_string()),
            bind_addr: get("BIND_ADDR").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parse(&get, "PORT", 8000)?,
            allowed_origins: get("ALLOWED_ORIGINS")
                .unwrap_or_else(|| "http://localhost:3000".to_string())
                .split(',')
                .map(|o| o.trim().trim_end_matches('/').to_string())
                .filter(|o| !o.is_empty())
                .collect(),
        })
    }
}
