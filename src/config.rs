use std::{str::FromStr, time::Duration};
use tracing::warn;

pub const DEMO_KEY: &str = "DEMO_KEY";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub api_key: String,
    pub api_base: String,
    pub port: u16,
    pub batch_size: usize,
    pub request_timeout: Duration,
    pub poll_interval: Duration,
    pub poll_max_attempts: u32,
    pub image_model: String,
    pub text_model: String,
    pub video_model: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: DEMO_KEY.to_string(),
            api_base: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            port: 8080,
            batch_size: 10,
            request_timeout: Duration::from_secs(120),
            poll_interval: Duration::from_secs(10),
            poll_max_attempts: 60,
            image_model: "gemini-2.5-flash-image".to_string(),
            text_model: "gemini-2.5-flash".to_string(),
            video_model: "veo-2.0-generate-001".to_string(),
        }
    }
}

impl AppConfig {
    /// Reads the configuration from the process environment (after `.env` has been loaded).
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let d = Self::default();
        let text = |key: &str, fallback: String| lookup(key).filter(|v| !v.trim().is_empty()).unwrap_or(fallback);

        let batch_size: usize = parse_or(&lookup, "BATCH_SIZE", d.batch_size);
        Self {
            api_key: text("GEMINI_API_KEY", d.api_key),
            api_base: text("GEMINI_API_BASE", d.api_base).trim_end_matches('/').to_string(),
            port: parse_or(&lookup, "PORT", d.port),
            batch_size: if batch_size == 0 { d.batch_size } else { batch_size },
            request_timeout: positive_secs(&lookup, "REQUEST_TIMEOUT_SECS", d.request_timeout),
            poll_interval: positive_secs(&lookup, "VIDEO_POLL_INTERVAL_SECS", d.poll_interval),
            poll_max_attempts: parse_or(&lookup, "VIDEO_POLL_MAX_ATTEMPTS", d.poll_max_attempts),
            image_model: text("GEMINI_IMAGE_MODEL", d.image_model),
            text_model: text("GEMINI_TEXT_MODEL", d.text_model),
            video_model: text("GEMINI_VIDEO_MODEL", d.video_model),
        }
    }

    pub fn is_demo(&self) -> bool {
        self.api_key == DEMO_KEY
    }
}

/// Like `parse_or`, but zero also falls back to the default.
fn positive_secs(lookup: &impl Fn(&str) -> Option<String>, key: &str, fallback: Duration) -> Duration {
    match parse_or(lookup, key, fallback.as_secs()) {
        0 => {
            warn!("⚠️ Ignoring {}=0, using default", key);
            fallback
        }
        secs => Duration::from_secs(secs),
    }
}

fn parse_or<T: FromStr + Copy>(lookup: &impl Fn(&str) -> Option<String>, key: &str, fallback: T) -> T {
    match lookup(key) {
        None => fallback,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("⚠️ Ignoring unparseable {}={:?}, using default", key, raw);
            fallback
        }),
    }
}
