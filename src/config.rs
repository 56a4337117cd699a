use std::env;

use anyhow::Result;
use once_cell::sync::Lazy;

#[derive(Debug, Clone)]
pub struct Config {
    pub bot_token: String,
    pub log_level: String,
    pub database_url: String,
    pub openai_api_key: String,
    pub openai_base_url: String,
    pub image_model: String,
    pub image_resolution: String,
    pub vision_model: String,
    pub ws_backend_url: String,
    pub code_generation_model: String,
    pub editor_theme: String,
    pub ws_connect_timeout_secs: u64,
    pub ws_idle_timeout_secs: u64,
    pub generated_dir: String,
    pub indexer_base_url: String,
    pub indexer_api_key: String,
    pub treasury_address: String,
    pub premium_threshold: f64,
    pub free_daily_limit: i64,
    pub premium_daily_limit: i64,
    pub welcome_video_url: String,
}

pub static CONFIG: Lazy<Config> =
    Lazy::new(|| Config::load().expect("Failed to load configuration"));

fn env_string(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_f64(name: &str, default: f64) -> f64 {
    env::var(name)
        .ok()
        .and_then(|value| value.parse::<f64>().ok())
        .unwrap_or(default)
}

fn env_i64(name: &str, default: i64) -> i64 {
    env::var(name)
        .ok()
        .and_then(|value| value.parse::<i64>().ok())
        .unwrap_or(default)
}

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn load() -> Result<Self> {
        Ok(Config {
            bot_token: env::var("TELEGRAM_BOT_TOKEN").unwrap_or_default(),
            log_level: env_string("LOG_LEVEL", "info").to_lowercase(),
            database_url: env_string("DATABASE_URL", "sqlite://velix.db?mode=rwc"),
            openai_api_key: env_string("OPENAI_API_KEY", ""),
            openai_base_url: env_string("OPENAI_BASE_URL", "https://api.openai.com/v1"),
            image_model: env_string("IMAGE_MODEL", "dall-e-3"),
            image_resolution: env_string("IMAGE_RESOLUTION", "1024x1024"),
            vision_model: env_string("VISION_MODEL", "gpt-4o"),
            ws_backend_url: env_string("WS_BACKEND_URL", ""),
            code_generation_model: env_string("CODE_GENERATION_MODEL", "gpt_4_vision"),
            editor_theme: env_string("EDITOR_THEME", "espresso"),
            ws_connect_timeout_secs: env_u64("WS_CONNECT_TIMEOUT_SECONDS", 20),
            ws_idle_timeout_secs: env_u64("WS_IDLE_TIMEOUT_SECONDS", 300),
            generated_dir: env_string("GENERATED_DIR", "generated"),
            indexer_base_url: env_string("INDEXER_BASE_URL", ""),
            indexer_api_key: env_string("INDEXER_API_KEY", ""),
            treasury_address: env_string("TREASURY_ADDRESS", ""),
            premium_threshold: env_f64("PREMIUM_THRESHOLD", 25.0),
            free_daily_limit: env_i64("FREE_DAILY_LIMIT", 3),
            premium_daily_limit: env_i64("PREMIUM_DAILY_LIMIT", 10),
            welcome_video_url: env_string(
                "WELCOME_VIDEO_URL",
                "https://res.cloudinary.com/drmwcjsgc/video/upload/v1752598235/welcome-velix-ai_y6wajd.mp4",
            ),
        })
    }
}
