//! Server configuration, loaded from the environment (and `.env`) at startup.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};

/// How the conversation is handed to the generation backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptMode {
    /// Persona and history joined into one newline-separated string.
    /// Role boundaries are lost.
    Flat,
    /// Persona and history passed as role-tagged turns.
    Structured,
}

impl FromStr for PromptMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "flat" => Ok(Self::Flat),
            "structured" => Ok(Self::Structured),
            other => Err(anyhow!("unknown prompt mode '{other}', expected 'flat' or 'structured'")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub openai_api_key: String,
    pub openai_model: String,
    /// Alternative OpenAI-compatible endpoint.
    pub openai_base_url: Option<String>,
    /// Admitted requests per identity per window.
    pub rate_limit: usize,
    pub rate_window: Duration,
    /// How often idle identities are evicted from the limiter table.
    pub sweep_interval: Duration,
    /// Most recent client messages kept in a prompt. `0` keeps everything.
    pub max_history: usize,
    pub prompt_mode: PromptMode,
    /// Longest wait for the next backend chunk before the relay gives up.
    pub chunk_timeout: Option<Duration>,
    /// Derive identity from `X-Forwarded-For` / `X-Real-IP` before the peer address.
    pub trust_proxy_headers: bool,
    /// `tracing` filter, e.g. `"info"` or `"debug,tower_http=warn"`.
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([127, 0, 0, 1], 3000)),
            openai_api_key: String::new(),
            openai_model: "gpt-4o-mini".to_string(),
            openai_base_url: None,
            rate_limit: 15,
            rate_window: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(60),
            max_history: 50,
            prompt_mode: PromptMode::Structured,
            chunk_timeout: Some(Duration::from_secs(60)),
            trust_proxy_headers: true,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Build a [`Config`] from `HELPDESK_*` and `OPENAI_*` variables.
    ///
    /// Only `OPENAI_API_KEY` is required. A variable that is set but does not
    /// parse is an error rather than a silent fallback.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let openai_api_key = match lookup("OPENAI_API_KEY") {
            Some(key) if !key.trim().is_empty() => key,
            _ => bail!("OPENAI_API_KEY must be set (environment or .env file)"),
        };
        let openai_base_url = lookup("OPENAI_BASE_URL").filter(|url| !url.trim().is_empty());

        let chunk_timeout_secs: u64 = parse_or(
            &lookup,
            "HELPDESK_CHUNK_TIMEOUT_SECS",
            defaults.chunk_timeout.map_or(0, |d| d.as_secs()),
        )?;

        let rate_limit: usize = parse_or(&lookup, "HELPDESK_RATE_LIMIT", defaults.rate_limit)?;
        if rate_limit == 0 {
            bail!("HELPDESK_RATE_LIMIT must be greater than zero");
        }
        let rate_window_secs: u64 = parse_or(&lookup, "HELPDESK_RATE_WINDOW_SECS", 60)?;
        if rate_window_secs == 0 {
            bail!("HELPDESK_RATE_WINDOW_SECS must be greater than zero");
        }
        let sweep_secs: u64 = parse_or(&lookup, "HELPDESK_SWEEP_SECS", 60)?;
        if sweep_secs == 0 {
            bail!("HELPDESK_SWEEP_SECS must be greater than zero");
        }

        Ok(Self {
            bind_address: parse_or(&lookup, "HELPDESK_BIND", defaults.bind_address)?,
            openai_api_key,
            openai_model: lookup("OPENAI_MODEL").unwrap_or(defaults.openai_model),
            openai_base_url,
            rate_limit,
            rate_window: Duration::from_secs(rate_window_secs),
            sweep_interval: Duration::from_secs(sweep_secs),
            max_history: parse_or(&lookup, "HELPDESK_MAX_HISTORY", defaults.max_history)?,
            prompt_mode: parse_or(&lookup, "HELPDESK_PROMPT_MODE", defaults.prompt_mode)?,
            chunk_timeout: (chunk_timeout_secs > 0).then(|| Duration::from_secs(chunk_timeout_secs)),
            trust_proxy_headers: parse_bool_or(
                &lookup,
                "HELPDESK_TRUST_PROXY",
                defaults.trust_proxy_headers,
            )?,
            log_level: lookup("HELPDESK_LOG").unwrap_or(defaults.log_level),
        })
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow!("{e}"))
            .with_context(|| format!("invalid value for {key}: '{raw}'")),
        None => Ok(default),
    }
}

fn parse_bool_or(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: bool) -> Result<bool> {
    match lookup(key).as_deref().map(str::trim) {
        None => Ok(default),
        Some(v) if v == "1" || v.eq_ignore_ascii_case("true") => Ok(true),
        Some(v) if v == "0" || v.eq_ignore_ascii_case("false") => Ok(false),
        Some(v) => bail!("invalid value for {key}: '{v}', expected true or false"),
    }
}
