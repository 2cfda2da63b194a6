use serde::Deserialize;
use std::convert::TryFrom;
use std::path::PathBuf;
use std::time::Duration;

/// Server configuration.
///
/// Loaded from an optional `config` file and environment variables prefixed
/// with `SABLE_`, with a `.env` file honored if present.
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Listening address. Defaults to "127.0.0.1".
    #[serde(default = "default_host")]
    pub host: String,
    /// Listening port. Defaults to 8080.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Directory files are served from. Defaults to the working directory.
    #[serde(default = "default_doc_root")]
    pub doc_root: PathBuf,
    /// Number of executors connections are distributed over. Defaults to the
    /// CPU count.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    /// Worker-thread cap per executor. Defaults to 4.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    /// Idle keep-alive for worker threads, in seconds. Defaults to 6.
    #[serde(default = "default_keep_alive_secs")]
    pub worker_keep_alive_secs: u64,
}

impl TryFrom<config::Config> for ServerConfig {
    type Error = config::ConfigError;

    fn try_from(config: config::Config) -> Result<Self, Self::Error> {
        config.try_deserialize()
    }
}

impl ServerConfig {
    /// Load configuration from a `config` file (if present) overridden by
    /// `SABLE_`-prefixed environment variables, loading `.env` first.
    pub fn new() -> Result<Self, config::ConfigError> {
        dotenv::dotenv().ok();

        let builder = config::Config::builder()
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::with_prefix("SABLE"));

        builder.build()?.try_into()
    }

    /// Worker idle keep-alive as a Duration.
    pub fn worker_keep_alive(&self) -> Duration {
        Duration::from_secs(self.worker_keep_alive_secs)
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_doc_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_pool_size() -> usize {
    num_cpus::get()
}

fn default_max_workers() -> usize {
    4
}

fn default_keep_alive_secs() -> u64 {
    6
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            doc_root: default_doc_root(),
            pool_size: default_pool_size(),
            max_workers: default_max_workers(),
            worker_keep_alive_secs: default_keep_alive_secs(),
        }
    }
}
