use envconfig::Envconfig;
use ksana_core::KDuration;

/// Process configuration, loaded once at startup from the environment.
/// `KSANA_DATA` is accepted as an older alias for `DATA_DIR`; `DATA_DIR`
/// wins if both are set.
#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "7100")]
    pub port: u16,

    #[envconfig(from = "DATA_DIR")]
    pub data_dir: Option<String>,

    #[envconfig(from = "KSANA_DATA")]
    pub legacy_data_dir: Option<String>,

    #[envconfig(from = "WORKERS", default = "4")]
    pub workers: usize,

    #[envconfig(from = "DEFAULT_TIMEOUT", default = "10s")]
    pub default_timeout: KDuration,

    #[envconfig(from = "MAX_RETRIES", default = "3")]
    pub max_retries: u32,

    #[envconfig(from = "RETRY_BACKOFF", default = "5s")]
    pub retry_backoff: KDuration,

    #[envconfig(from = "API_KEYS_FILE", default = "./data/api_keys.txt")]
    pub api_keys_file: String,

    #[envconfig(from = "CORS_ALLOWED_ORIGINS", default = "*")]
    pub cors_allowed_origins: String,

    #[envconfig(from = "SHUTDOWN_TIMEOUT", default = "30s")]
    pub shutdown_timeout: KDuration,

    #[envconfig(from = "LOG_LEVEL", default = "info")]
    pub log_level: String,
}

impl Config {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// `DATA_DIR` is the name callers are expected to use; `KSANA_DATA` only
    /// applies when `DATA_DIR` is unset, and `"./data"` is the fallback when
    /// neither is set. Presence, not equality with the default, decides
    /// precedence, so an explicit `DATA_DIR=./data` still wins over a
    /// `KSANA_DATA` set to something else.
    pub fn resolved_data_dir(&self) -> String {
        self.data_dir
            .clone()
            .or_else(|| self.legacy_data_dir.clone())
            .unwrap_or_else(|| "./data".to_owned())
    }

    pub fn cors_origins(&self) -> Vec<String> {
        self.cors_allowed_origins
            .split(',')
            .map(|s| s.trim().to_owned())
            .filter(|s| !s.is_empty())
            .collect()
    }
}
