use std::env;
use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    pub frontend_url: String,

    pub jwt_secret: String,
    pub jwt_access_ttl_secs: i64,
    pub jwt_refresh_ttl_secs: i64,

    pub openai_api_key: String,
    pub openai_assistant_id: String,
    pub openai_base_url: String,

    pub chat_poll_interval_ms: u64,
    pub chat_poll_max_attempts: u32,
}

fn required(key: &str) -> String {
    env::var(key).unwrap_or_else(|_| panic!("{} must be set", key))
}

fn or_default(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parsed<T: FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .unwrap_or_else(|_| panic!("{} must be a number, got {:?}", key, raw)),
        Err(_) => default,
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            database_url: required("DATABASE_URL"),
            host: or_default("HOST", "0.0.0.0"),
            port: parsed("PORT", 8080),
            frontend_url: or_default("FRONTEND_URL", "http://localhost:3000"),

            jwt_secret: required("JWT_SECRET"),
            jwt_access_ttl_secs: parsed("JWT_ACCESS_TTL_SECS", 900),
            jwt_refresh_ttl_secs: parsed("JWT_REFRESH_TTL_SECS", 604_800),

            // Empty key: the chat endpoints fail with RemoteUnavailable but the
            // rest of the app still works.
            openai_api_key: or_default("OPENAI_API_KEY", ""),
            openai_assistant_id: or_default("OPENAI_ASSISTANT_ID", ""),
            openai_base_url: or_default("OPENAI_BASE_URL", "https://api.openai.com/v1"),

            chat_poll_interval_ms: parsed("CHAT_POLL_INTERVAL_MS", 2000),
            chat_poll_max_attempts: parsed("CHAT_POLL_MAX_ATTEMPTS", 90),
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
