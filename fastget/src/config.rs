//! Download configuration.
//!
//! [`DownloadConfig`] carries every tunable of the downloader. It can be
//! built in code or layered from an INI file via [`ConfigFile`]:
//!
//! ```ini
//! [download]
//! workers = 8
//! retries = 4
//! backoff_initial_ms = 200
//! backoff_max_secs = 10
//! buffer_kb = 128
//! keep_partial = false
//!
//! [http]
//! connect_timeout_secs = 15
//! read_timeout_secs = 30
//! job_timeout_secs = 3600
//! user_agent = my-agent/1.0
//! ```

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use ini::Ini;
use thiserror::Error;

use crate::download::job::DEFAULT_WORKERS;
use crate::download::retry::{
    RetryPolicy, DEFAULT_BACKOFF_MULTIPLIER, DEFAULT_INITIAL_DELAY_MS, DEFAULT_MAX_DELAY_SECS,
};

/// Default connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default idle timeout between two body reads.
pub const DEFAULT_READ_TIMEOUT_SECS: u64 = 60;

/// Default write buffer per worker (64 KiB).
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

/// Default interval of aggregate progress events.
pub const DEFAULT_PROGRESS_INTERVAL_MS: u64 = 100;

/// Name of the configuration directory and file.
const CONFIG_DIR_NAME: &str = "fastget";
const CONFIG_FILE_NAME: &str = "config.ini";

/// Downloader configuration.
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    /// Worker count used when a job does not set one.
    pub workers: usize,

    /// TCP/TLS connect timeout.
    pub connect_timeout: Duration,

    /// Maximum idle time between two body reads.
    pub read_timeout: Duration,

    /// Deadline for the whole job. `None` means unbounded.
    pub job_timeout: Option<Duration>,

    /// Retry policy applied per chunk.
    pub retry: RetryPolicy,

    /// Bytes a worker buffers before writing to disk.
    pub buffer_size: usize,

    /// Interval of aggregate progress events. `None` disables them.
    pub progress_interval: Option<Duration>,

    /// `User-Agent` sent with every request. A `user-agent` job header
    /// takes precedence.
    pub user_agent: String,

    /// Keep the partial output file when a job fails.
    pub keep_partial: bool,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            read_timeout: Duration::from_secs(DEFAULT_READ_TIMEOUT_SECS),
            job_timeout: None,
            retry: RetryPolicy::default(),
            buffer_size: DEFAULT_BUFFER_SIZE,
            progress_interval: Some(Duration::from_millis(DEFAULT_PROGRESS_INTERVAL_MS)),
            user_agent: format!("fastget/{}", env!("CARGO_PKG_VERSION")),
            keep_partial: false,
        }
    }
}

impl DownloadConfig {
    /// Set the default worker count (minimum 1).
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Set the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the idle read timeout.
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Set or clear the job deadline.
    pub fn with_job_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.job_timeout = timeout;
        self
    }

    /// Set the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set the per-worker buffer size (minimum 1 byte).
    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size.max(1);
        self
    }

    /// Set or disable the aggregate progress interval.
    pub fn with_progress_interval(mut self, interval: Option<Duration>) -> Self {
        self.progress_interval = interval;
        self
    }

    /// Set the `User-Agent`.
    pub fn with_user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = agent.into();
        self
    }

    /// Keep or remove partial files on failure.
    pub fn with_keep_partial(mut self, keep: bool) -> Self {
        self.keep_partial = keep;
        self
    }
}

/// Errors raised while loading a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {}: {reason}", .path.display())]
    Parse { path: PathBuf, reason: String },

    #[error("invalid value for {section}.{key}: {value:?}")]
    InvalidValue {
        section: &'static str,
        key: &'static str,
        value: String,
    },
}

/// Values read from an INI configuration file. Unset keys keep the
/// defaults of the config they are applied to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigFile {
    pub workers: Option<usize>,
    pub retries: Option<u32>,
    pub backoff_initial_ms: Option<u64>,
    pub backoff_max_secs: Option<u64>,
    pub buffer_kb: Option<usize>,
    pub keep_partial: Option<bool>,
    pub connect_timeout_secs: Option<u64>,
    pub read_timeout_secs: Option<u64>,
    pub job_timeout_secs: Option<u64>,
    pub user_agent: Option<String>,
}

impl ConfigFile {
    /// `<config_dir>/fastget/config.ini`, if the platform has a config dir.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
    }

    /// Load from the default location. A missing file yields defaults.
    pub fn load_default() -> Result<Self, ConfigError> {
        match Self::default_path() {
            Some(path) => Self::load(&path),
            None => Ok(Self::default()),
        }
    }

    /// Load from `path`. A missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        };

        let ini = Ini::load_from_str(&text).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::from_ini(&ini)
    }

    /// Parse INI text.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let ini = Ini::load_from_str(text).map_err(|e| ConfigError::Parse {
            path: PathBuf::from("<inline>"),
            reason: e.to_string(),
        })?;
        Self::from_ini(&ini)
    }

    fn from_ini(ini: &Ini) -> Result<Self, ConfigError> {
        Ok(Self {
            workers: value(ini, "download", "workers")?,
            retries: value(ini, "download", "retries")?,
            backoff_initial_ms: value(ini, "download", "backoff_initial_ms")?,
            backoff_max_secs: value(ini, "download", "backoff_max_secs")?,
            buffer_kb: value(ini, "download", "buffer_kb")?,
            keep_partial: value(ini, "download", "keep_partial")?,
            connect_timeout_secs: value(ini, "http", "connect_timeout_secs")?,
            read_timeout_secs: value(ini, "http", "read_timeout_secs")?,
            job_timeout_secs: value(ini, "http", "job_timeout_secs")?,
            user_agent: ini
                .section(Some("http"))
                .and_then(|s| s.get("user_agent"))
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
        })
    }

    /// Overlay the file's values onto `config`.
    pub fn apply(&self, mut config: DownloadConfig) -> DownloadConfig {
        if let Some(workers) = self.workers {
            config = config.with_workers(workers);
        }
        if self.retries.is_some()
            || self.backoff_initial_ms.is_some()
            || self.backoff_max_secs.is_some()
        {
            config.retry = retry_policy(
                self.retries
                    .unwrap_or(config.retry.max_attempts().saturating_sub(1)),
                self.backoff_initial_ms.unwrap_or(DEFAULT_INITIAL_DELAY_MS),
                self.backoff_max_secs.unwrap_or(DEFAULT_MAX_DELAY_SECS),
            );
        }
        if let Some(kb) = self.buffer_kb {
            config = config.with_buffer_size(kb.saturating_mul(1024));
        }
        if let Some(keep) = self.keep_partial {
            config.keep_partial = keep;
        }
        if let Some(secs) = self.connect_timeout_secs {
            config.connect_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = self.read_timeout_secs {
            config.read_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = self.job_timeout_secs {
            config.job_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }
        if let Some(agent) = &self.user_agent {
            config.user_agent = agent.clone();
        }
        config
    }
}

/// Exponential policy allowing `retries` retries after the first attempt.
pub fn retry_policy(retries: u32, initial_ms: u64, max_secs: u64) -> RetryPolicy {
    if retries == 0 {
        return RetryPolicy::None;
    }
    RetryPolicy::ExponentialBackoff {
        max_attempts: retries.saturating_add(1),
        initial_delay: Duration::from_millis(initial_ms),
        max_delay: Duration::from_secs(max_secs),
        multiplier: DEFAULT_BACKOFF_MULTIPLIER,
    }
}

fn value<T: FromStr>(
    ini: &Ini,
    section: &'static str,
    key: &'static str,
) -> Result<Option<T>, ConfigError> {
    let Some(raw) = ini.section(Some(section)).and_then(|s| s.get(key)) else {
        return Ok(None);
    };
    raw.trim()
        .parse::<T>()
        .map(Some)
        .map_err(|_| ConfigError::InvalidValue {
            section,
            key,
            value: raw.to_string(),
        })
}
