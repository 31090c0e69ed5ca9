//! Configuration loading and resolution.
//!
//! Every knob resolves in the same order: explicit CLI value, then the
//! matching `PLUCK_*` environment variable, then a built-in default. Files
//! default to `~/.pluck/`.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use pluck::HTML_EXCERPT_LIMIT;

pub const DEFAULT_BIND: &str = "127.0.0.1:7878";
pub const DEFAULT_FETCH_TIMEOUT_MS: u64 = 12_000;
pub const DEFAULT_READY_TIMEOUT_MS: u64 = 5_000;
/// Requests per actor per window.
pub const DEFAULT_RATE_LIMIT: u32 = 60;
pub const DEFAULT_RATE_WINDOW_SECS: u64 = 60;

/// Values given explicitly on the command line.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub bind: Option<String>,
    pub db_path: Option<String>,
    pub api_token: Option<String>,
    pub fetch_timeout_ms: Option<u64>,
    pub rate_limit: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: String,
    pub db_path: PathBuf,
    pub fetch_timeout: Duration,
    pub ready_timeout: Duration,
    pub excerpt_limit: usize,
    /// When set, mutating endpoints also require `Authorization: Bearer`.
    pub api_token: Option<String>,
    pub rate_limit: u32,
    pub rate_window: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            db_path: default_db_path(),
            fetch_timeout: Duration::from_millis(DEFAULT_FETCH_TIMEOUT_MS),
            ready_timeout: Duration::from_millis(DEFAULT_READY_TIMEOUT_MS),
            excerpt_limit: HTML_EXCERPT_LIMIT,
            api_token: None,
            rate_limit: DEFAULT_RATE_LIMIT,
            rate_window: Duration::from_secs(DEFAULT_RATE_WINDOW_SECS),
        }
    }
}

impl ServerConfig {
    /// Resolve against the process environment.
    pub fn resolve(overrides: ConfigOverrides) -> Self {
        Self::resolve_with(overrides, |key| std::env::var(key).ok())
    }

    /// Resolve against an arbitrary variable lookup.
    pub fn resolve_with(overrides: ConfigOverrides, env: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        fn lookup<T: FromStr>(env: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
            env(key).and_then(|v| parse_var(key, &v))
        }
        let env = &env;

        Self {
            bind: overrides
                .bind
                .or_else(|| env("PLUCK_BIND"))
                .unwrap_or(defaults.bind),
            db_path: overrides
                .db_path
                .or_else(|| env("PLUCK_DB"))
                .map(PathBuf::from)
                .unwrap_or(defaults.db_path),
            fetch_timeout: overrides
                .fetch_timeout_ms
                .or_else(|| lookup(env, "PLUCK_FETCH_TIMEOUT_MS"))
                .map(Duration::from_millis)
                .unwrap_or(defaults.fetch_timeout),
            ready_timeout: lookup(env, "PLUCK_READY_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.ready_timeout),
            excerpt_limit: lookup(env, "PLUCK_EXCERPT_LIMIT").unwrap_or(defaults.excerpt_limit),
            api_token: overrides
                .api_token
                .or_else(|| env("PLUCK_API_TOKEN"))
                .filter(|t| !t.is_empty()),
            rate_limit: overrides
                .rate_limit
                .or_else(|| lookup(env, "PLUCK_RATE_LIMIT"))
                .unwrap_or(defaults.rate_limit),
            rate_window: defaults.rate_window,
        }
    }
}

fn parse_var<T: FromStr>(key: &str, value: &str) -> Option<T> {
    match value.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value, "ignoring unparseable environment variable");
            None
        }
    }
}

fn default_db_path() -> PathBuf {
    pluck_home().join("mappings.db")
}

/// `~/.pluck`, or `./.pluck` when no home directory is known.
pub fn pluck_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".pluck")
}
