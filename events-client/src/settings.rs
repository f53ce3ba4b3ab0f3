use std::time::Duration;

use anyhow::{Context, Result, anyhow};

use crate::context::AppOptions;
use crate::http_client::SupabaseConfig;
use crate::repository::DEFAULT_PAGE_SIZE;

/// Настройки клиента из переменных окружения.
#[derive(Debug, Clone)]
pub struct ClientSettings {
    /// `SUPABASE_URL`.
    pub supabase_url: String,
    /// `SUPABASE_ANON_KEY`.
    pub supabase_anon_key: String,
    /// `EVENTS_PAGE_SIZE`.
    pub page_size: u32,
    /// `AUTH_CHECK_TIMEOUT_SECS`.
    pub auth_check_timeout_secs: u64,
    /// `HTTP_CONNECT_TIMEOUT_SECS`.
    pub http_connect_timeout_secs: u64,
    /// `HTTP_REQUEST_TIMEOUT_SECS`.
    pub http_request_timeout_secs: u64,
    /// `LOG_LEVEL`, иначе `RUST_LOG`, иначе `info`.
    pub log_level: String,
}

impl ClientSettings {
    /// Читает настройки из переменных окружения процесса.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Читает настройки через произвольный источник значений.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let supabase_url =
            get_required(&lookup, "SUPABASE_URL").context("SUPABASE_URL is required")?;
        let supabase_anon_key =
            get_required(&lookup, "SUPABASE_ANON_KEY").context("SUPABASE_ANON_KEY is required")?;

        if !supabase_url.starts_with("http://") && !supabase_url.starts_with("https://") {
            return Err(anyhow!("SUPABASE_URL must start with http:// or https://"));
        }

        let page_size = parse_positive(&lookup, "EVENTS_PAGE_SIZE", u64::from(DEFAULT_PAGE_SIZE))?;
        let page_size = u32::try_from(page_size)
            .context("Failed to parse EVENTS_PAGE_SIZE, value is too large")?;
        let auth_check_timeout_secs = parse_positive(&lookup, "AUTH_CHECK_TIMEOUT_SECS", 5)?;
        let http_connect_timeout_secs = parse_positive(&lookup, "HTTP_CONNECT_TIMEOUT_SECS", 5)?;
        let http_request_timeout_secs = parse_positive(&lookup, "HTTP_REQUEST_TIMEOUT_SECS", 15)?;
        let log_level = lookup("LOG_LEVEL")
            .or_else(|| lookup("RUST_LOG"))
            .unwrap_or_else(|| "info".to_string());

        Ok(Self {
            supabase_url,
            supabase_anon_key,
            page_size,
            auth_check_timeout_secs,
            http_connect_timeout_secs,
            http_request_timeout_secs,
            log_level,
        })
    }

    /// Параметры подключения к бэкенду.
    pub fn supabase_config(&self) -> SupabaseConfig {
        SupabaseConfig {
            url: self.supabase_url.clone(),
            anon_key: self.supabase_anon_key.clone(),
            connect_timeout: Duration::from_secs(self.http_connect_timeout_secs),
            request_timeout: Duration::from_secs(self.http_request_timeout_secs),
        }
    }

    /// Параметры контекста приложения.
    pub fn app_options(&self) -> AppOptions {
        AppOptions {
            page_size: self.page_size,
            auth_check_timeout: Duration::from_secs(self.auth_check_timeout_secs),
        }
    }
}

fn get_required(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<String> {
    let value = lookup(key).ok_or_else(|| anyhow!("{key} is not set"))?;
    let value = value.trim().to_string();
    if value.is_empty() {
        return Err(anyhow!("{key} must not be empty"));
    }
    Ok(value)
}

fn parse_positive(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: u64,
) -> Result<u64> {
    let value = lookup(key)
        .unwrap_or_else(|| default.to_string())
        .trim()
        .parse::<u64>()
        .with_context(|| format!("Failed to parse {key}, expecting positive integer"))?;

    if value == 0 {
        return Err(anyhow!("{key} must be > 0"));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use super::ClientSettings;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_are_applied() {
        let settings = ClientSettings::from_lookup(lookup_from(&[
            ("SUPABASE_URL", "https://demo.supabase.co"),
            ("SUPABASE_ANON_KEY", "anon"),
        ]))
        .expect("settings must load");

        assert_eq!(settings.page_size, 10);
        assert_eq!(settings.log_level, "info");
        assert_eq!(
            settings.app_options().auth_check_timeout,
            Duration::from_secs(5)
        );
        assert_eq!(
            settings.supabase_config().request_timeout,
            Duration::from_secs(15)
        );
    }

    #[test]
    fn missing_url_is_rejected() {
        let err = ClientSettings::from_lookup(lookup_from(&[("SUPABASE_ANON_KEY", "anon")]))
            .expect_err("url is required");
        assert!(err.to_string().contains("SUPABASE_URL"));
    }

    #[test]
    fn zero_page_size_is_rejected() {
        let result = ClientSettings::from_lookup(lookup_from(&[
            ("SUPABASE_URL", "https://demo.supabase.co"),
            ("SUPABASE_ANON_KEY", "anon"),
            ("EVENTS_PAGE_SIZE", "0"),
        ]));
        assert!(result.is_err());
    }

    #[test]
    fn log_level_falls_back_to_rust_log() {
        let settings = ClientSettings::from_lookup(lookup_from(&[
            ("SUPABASE_URL", "http://localhost:54321"),
            ("SUPABASE_ANON_KEY", "anon"),
            ("RUST_LOG", "debug"),
        ]))
        .expect("settings must load");
        assert_eq!(settings.log_level, "debug");
    }
}
