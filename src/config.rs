use crate::params::{parse_string_max, parse_u64_range};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::time::Duration;

pub const ENV_API_KEY: &str = "REMARKD_API_KEY";
pub const ENV_MODEL: &str = "REMARKD_MODEL";
pub const ENV_BASE_URL: &str = "REMARKD_BASE_URL";

/// Settings handed to the generation client. Lives in the sidecar state and
/// is passed explicitly; nothing reads it from globals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppConfig {
    pub api_key: Option<String>,
    pub active_model: String,
    pub base_url: String,
    pub batch_size: usize,
    pub batch_delay_ms: u64,
    pub retry_delays_ms: Vec<u64>,
    pub request_timeout_secs: u64,
    pub comment_language: String,
    pub extra_stopwords: Vec<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            active_model: "gpt-4o-mini".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            batch_size: 10,
            batch_delay_ms: 1500,
            retry_delays_ms: vec![2000, 4000, 8000],
            request_timeout_secs: 60,
            comment_language: "Vietnamese".to_string(),
            extra_stopwords: Vec::new(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        cfg.apply_env(|k| std::env::var(k).ok());
        cfg
    }

    /// Overrides key, model and endpoint from the environment when set.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup(ENV_API_KEY).filter(|v| !v.trim().is_empty()) {
            self.api_key = Some(v.trim().to_string());
        }
        if let Some(v) = lookup(ENV_MODEL).filter(|v| !v.trim().is_empty()) {
            self.active_model = v.trim().to_string();
        }
        if let Some(v) = lookup(ENV_BASE_URL).filter(|v| !v.trim().is_empty()) {
            self.base_url = v.trim().trim_end_matches('/').to_string();
        }
    }

    pub fn api_key(&self) -> Option<&str> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
    }

    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }

    pub fn retry_delays(&self) -> Vec<Duration> {
        self.retry_delays_ms
            .iter()
            .copied()
            .map(Duration::from_millis)
            .collect()
    }

    /// Applies a camelCase patch object, validating every field it touches.
    pub fn merge_patch(&mut self, patch: &Map<String, Value>) -> Result<(), String> {
        let mut next = self.clone();
        for (k, v) in patch {
            match k.as_str() {
                "apiKey" => {
                    next.api_key = if v.is_null() {
                        None
                    } else {
                        let s = parse_string_max(v, k, 512)?;
                        Some(s).filter(|s| !s.is_empty())
                    };
                }
                "activeModel" => {
                    let s = parse_string_max(v, k, 128)?;
                    if s.is_empty() {
                        return Err("activeModel must not be empty".into());
                    }
                    next.active_model = s;
                }
                "baseUrl" => {
                    let s = parse_string_max(v, k, 512)?;
                    if !s.starts_with("http://") && !s.starts_with("https://") {
                        return Err("baseUrl must start with http:// or https://".into());
                    }
                    next.base_url = s.trim_end_matches('/').to_string();
                }
                "batchSize" => next.batch_size = parse_u64_range(v, k, 1, 50)? as usize,
                "batchDelayMs" => next.batch_delay_ms = parse_u64_range(v, k, 0, 60_000)?,
                "retryDelaysMs" => {
                    let arr = v
                        .as_array()
                        .ok_or_else(|| format!("{} must be an array", k))?;
                    if arr.len() > 8 {
                        return Err(format!("{} allows at most 8 entries", k));
                    }
                    next.retry_delays_ms = arr
                        .iter()
                        .map(|d| parse_u64_range(d, k, 0, 120_000))
                        .collect::<Result<_, _>>()?;
                }
                "requestTimeoutSecs" => {
                    next.request_timeout_secs = parse_u64_range(v, k, 5, 600)?;
                }
                "commentLanguage" => {
                    let s = parse_string_max(v, k, 64)?;
                    if s.is_empty() {
                        return Err("commentLanguage must not be empty".into());
                    }
                    next.comment_language = s;
                }
                "extraStopwords" => {
                    let arr = v
                        .as_array()
                        .ok_or_else(|| format!("{} must be an array", k))?;
                    next.extra_stopwords = arr
                        .iter()
                        .map(|w| parse_string_max(w, k, 64))
                        .collect::<Result<Vec<_>, _>>()?
                        .into_iter()
                        .filter(|w| !w.is_empty())
                        .collect();
                }
                _ => return Err(format!("unknown config field: {}", k)),
            }
        }
        *self = next;
        Ok(())
    }

    /// JSON view for the front end; the key is never echoed back in full.
    pub fn masked_json(&self) -> Value {
        let mut v = serde_json::to_value(self).unwrap_or_else(|_| json!({}));
        v["apiKey"] = match self.api_key() {
            Some(k) => Value::String(mask_key(k)),
            None => Value::Null,
        };
        v["hasApiKey"] = Value::Bool(self.api_key().is_some());
        v
    }
}

fn mask_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 8 {
        return "*".repeat(chars.len());
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}…{}", chars[..3].iter().collect::<String>(), tail)
}
