use std::env;

#[derive(Clone, Debug)]
pub struct Config {
    pub bind_addr: String,
    pub database_url: String,
    pub sms_gateway_url: Option<String>,
    pub sms_gateway_token: Option<String>,
    pub sms_from_number: String,
    pub delegation_sweep_interval_secs: u64,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            bind_addr: env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:8080".to_string()),
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://data/action-logs.db".to_string()),
            sms_gateway_url: env::var("SMS_GATEWAY_URL").ok(),
            sms_gateway_token: env::var("SMS_GATEWAY_TOKEN").ok(),
            sms_from_number: env::var("SMS_FROM_NUMBER").unwrap_or_else(|_| "+10000000000".to_string()),
            delegation_sweep_interval_secs: env::var("DELEGATION_SWEEP_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(300),
        }
    }
}
