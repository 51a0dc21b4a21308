use std::env;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub hospital_api_url: String,
    pub hospital_api_key: String,
    pub payment_return_url: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let config = Self {
            hospital_api_url: env::var("HOSPITAL_API_URL")
                .unwrap_or_else(|_| {
                    warn!("HOSPITAL_API_URL not set, using empty value");
                    String::new()
                }),
            hospital_api_key: env::var("HOSPITAL_API_KEY")
                .unwrap_or_else(|_| {
                    warn!("HOSPITAL_API_KEY not set, using empty value");
                    String::new()
                }),
            payment_return_url: env::var("PAYMENT_RETURN_URL")
                .unwrap_or_else(|_| {
                    warn!("PAYMENT_RETURN_URL not set, using default");
                    "medibook://payment/result".to_string()
                }),
        };

        if !config.is_configured() {
            warn!("Application not fully configured - missing environment variables");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        !self.hospital_api_url.is_empty()
            && !self.hospital_api_key.is_empty()
    }
}
