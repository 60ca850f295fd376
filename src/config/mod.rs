use std::env;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub database_max_connections: u32,
    pub host: String,
    pub port: u16,
    pub jwt_secret: String,
    pub jwt_access_token_expiry_secs: i64,
    pub jwt_refresh_token_expiry_secs: i64,
    pub dast_a_base_url: String,
    pub dast_a_api_key: String,
    pub dast_b_base_url: String,
    pub dast_b_api_key: String,
    pub sast_base_url: String,
    pub sast_api_token: String,
    /// Seconds between successive phase polls during a scan lifecycle.
    pub poll_interval_secs: u64,
    /// Upper bound on a single scan lifecycle before it is forced to failed.
    pub scan_timeout_secs: u64,
    /// Per-request timeout for scanner backend HTTP calls.
    pub scanner_http_timeout_secs: u64,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, env::VarError> {
        Ok(Self {
            database_url: env::var("DATABASE_URL")?,
            database_max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .unwrap_or(10),
            host: env::var("BACKEND_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("BACKEND_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .unwrap_or(3000),
            jwt_secret: env::var("JWT_SECRET")?,
            jwt_access_token_expiry_secs: env::var("JWT_ACCESS_TOKEN_EXPIRY_SECS")
                .unwrap_or_else(|_| "900".to_string())
                .parse()
                .unwrap_or(900),
            jwt_refresh_token_expiry_secs: env::var("JWT_REFRESH_TOKEN_EXPIRY_SECS")
                .unwrap_or_else(|_| "604800".to_string())
                .parse()
                .unwrap_or(604800),
            dast_a_base_url: env::var("DAST_A_BASE_URL")
                .unwrap_or_else(|_| "https://localhost:3443".to_string()),
            dast_a_api_key: env::var("DAST_A_API_KEY").unwrap_or_default(),
            dast_b_base_url: env::var("DAST_B_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:8090".to_string()),
            dast_b_api_key: env::var("DAST_B_API_KEY").unwrap_or_default(),
            sast_base_url: env::var("SAST_BASE_URL")
                .unwrap_or_else(|_| "https://api.sast.localhost".to_string()),
            sast_api_token: env::var("SAST_API_TOKEN").unwrap_or_default(),
            poll_interval_secs: env::var("SCAN_POLL_INTERVAL_SECS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .unwrap_or(10),
            scan_timeout_secs: env::var("SCAN_TIMEOUT_SECS")
                .unwrap_or_else(|_| "7200".to_string())
                .parse()
                .unwrap_or(7200),
            scanner_http_timeout_secs: env::var("SCANNER_HTTP_TIMEOUT_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .unwrap_or(30),
        })
    }
}
