use std::env;

/// Everything the service reads from the environment, resolved once at startup.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub database_url: String,
    pub redis_url: Option<String>,
    pub request_max_bytes: usize,
    pub idempotency_ttl_secs: u64,
    pub queue_capacity: usize,
    pub metrics_key: Option<String>,
    pub http: HttpConfig,
    pub oracle: OracleConfig,
    pub import: ImportConfig,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            port: env_parse("PORT").unwrap_or(8000),
            database_url: env_string("DATABASE_URL")
                .unwrap_or_else(|| "sqlite://resale.db?mode=rwc".into()),
            redis_url: env_string("REDIS_URL"),
            request_max_bytes: env_parse::<usize>("REQUEST_MAX_BYTES")
                .filter(|v| *v > 0)
                .unwrap_or(10 * 1024 * 1024),
            idempotency_ttl_secs: env_parse("IDEMPOTENCY_TTL_SECS").unwrap_or(3600),
            queue_capacity: env_parse::<usize>("QUEUE_CAPACITY")
                .filter(|v| *v > 0)
                .unwrap_or(16),
            metrics_key: env_string("METRICS_KEY"),
            http: HttpConfig::from_env(),
            oracle: OracleConfig::from_env(),
            import: ImportConfig::from_env(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
}

impl HttpConfig {
    pub fn from_env() -> Self {
        Self {
            timeout_secs: env_parse("HTTP_TIMEOUT_SECS").unwrap_or(30),
            connect_timeout_secs: env_parse("HTTP_CONNECT_TIMEOUT_SECS").unwrap_or(5),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            connect_timeout_secs: 5,
        }
    }
}

/// Connection settings for the reasoning oracle. Built explicitly and handed
/// to the client so separate pipelines never share credentials implicitly.
#[derive(Debug, Clone)]
pub struct OracleConfig {
    pub gateway_url: String,
    pub api_key: Option<String>,
    pub function_name: String,
    pub model: Option<String>,
}

impl OracleConfig {
    pub fn from_env() -> Self {
        Self {
            gateway_url: env_string("ORACLE_GATEWAY_URL")
                .unwrap_or_else(|| "http://localhost:3000".into()),
            api_key: env_string("ORACLE_API_KEY"),
            function_name: env_string("ORACLE_FUNCTION").unwrap_or_else(|| "resale_import".into()),
            model: env_string("ORACLE_MODEL"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ImportConfig {
    pub default_category: String,
    pub sample_rows: usize,
    pub category_batch_size: usize,
}

impl ImportConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            default_category: env_string("DEFAULT_CATEGORY").unwrap_or(defaults.default_category),
            sample_rows: env_parse::<usize>("MAPPING_SAMPLE_ROWS")
                .filter(|v| *v > 0)
                .unwrap_or(defaults.sample_rows),
            category_batch_size: env_parse::<usize>("CATEGORY_BATCH_SIZE")
                .filter(|v| *v > 0)
                .unwrap_or(defaults.category_batch_size),
        }
    }
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            default_category: "Inne".into(),
            sample_rows: 5,
            category_batch_size: 200,
        }
    }
}

fn env_string(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|value| value.trim().parse::<T>().ok())
}
