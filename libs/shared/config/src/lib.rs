use std::env;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub calendar_api_base_url: String,
    pub calendar_api_token: String,
    pub redis_url: Option<String>,
    pub clinic_config_path: Option<String>,
    pub flow_state_ttl_seconds: u64,
    pub calendar_max_retries: u32,
    pub outbound_messages_per_minute: u32,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let config = Self {
            calendar_api_base_url: env::var("CALENDAR_API_BASE_URL")
                .unwrap_or_else(|_| {
                    warn!("CALENDAR_API_BASE_URL not set, using empty value");
                    String::new()
                }),
            calendar_api_token: env::var("CALENDAR_API_TOKEN")
                .unwrap_or_else(|_| {
                    warn!("CALENDAR_API_TOKEN not set, using empty value");
                    String::new()
                }),
            redis_url: env::var("REDIS_URL").ok(),
            clinic_config_path: env::var("CLINIC_CONFIG_PATH").ok(),
            flow_state_ttl_seconds: env::var("FLOW_STATE_TTL_SECONDS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3600),
            calendar_max_retries: env::var("CALENDAR_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3),
            outbound_messages_per_minute: env::var("OUTBOUND_MESSAGES_PER_MINUTE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(20),
        };

        if !config.is_configured() {
            warn!("Application not fully configured - missing environment variables");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        !self.calendar_api_base_url.is_empty() && !self.calendar_api_token.is_empty()
    }

    pub fn is_redis_configured(&self) -> bool {
        self.redis_url.as_deref().map(|url| !url.is_empty()).unwrap_or(false)
    }
}
