// src/config.rs
use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("{0} must be set in .env")]
    Missing(&'static str),

    #[error("{key} has an invalid value: {value}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub max_connections: u32,
    pub bind_addr: SocketAddr,
    pub jwt_secret: String,
    pub access_token_minutes: i64,
    pub refresh_token_days: i64,
    pub client_url: String,
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
    pub gemini_base_url: Option<String>,
    pub draft_ttl: Duration,
    pub smtp: Option<SmtpConfig>,
}

impl Config {
    /// 从进程环境变量读取配置 (调用前先执行 dotenvy::dotenv)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // 空字符串等同于未设置
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let database_url = get("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?;
        let jwt_secret = get("JWT_SECRET").ok_or(ConfigError::Missing("JWT_SECRET"))?;

        let smtp = match (get("SMTP_HOST"), get("SMTP_FROM")) {
            (Some(host), Some(from)) => Some(SmtpConfig {
                host,
                port: parse_or("SMTP_PORT", get("SMTP_PORT"), 587)?,
                username: get("SMTP_USERNAME"),
                password: get("SMTP_PASSWORD"),
                from,
            }),
            _ => None,
        };

        Ok(Config {
            database_url,
            max_connections: parse_or("DATABASE_MAX_CONNECTIONS", get("DATABASE_MAX_CONNECTIONS"), 5)?,
            bind_addr: parse_or(
                "BIND_ADDR",
                get("BIND_ADDR"),
                SocketAddr::from(([127, 0, 0, 1], 3000)),
            )?,
            jwt_secret,
            access_token_minutes: parse_or("ACCESS_TOKEN_MINUTES", get("ACCESS_TOKEN_MINUTES"), 15)?,
            refresh_token_days: parse_or("REFRESH_TOKEN_DAYS", get("REFRESH_TOKEN_DAYS"), 7)?,
            client_url: get("CLIENT_URL")
                .unwrap_or_else(|| "http://localhost:3000".to_string())
                .trim_end_matches('/')
                .to_string(),
            gemini_api_key: get("GEMINI_API_KEY"),
            gemini_model: get("GEMINI_MODEL").unwrap_or_else(|| "gemini-1.5-flash".to_string()),
            gemini_base_url: get("GEMINI_BASE_URL"),
            draft_ttl: Duration::from_secs(parse_or(
                "CHATBOT_DRAFT_TTL_SECS",
                get("CHATBOT_DRAFT_TTL_SECS"),
                600,
            )?),
            smtp,
        })
    }
}

fn parse_or<T: std::str::FromStr>(
    key: &'static str,
    raw: Option<String>,
    default: T,
) -> Result<T, ConfigError> {
    match raw {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
    }
}
