//! Configuration file management for busmatch.
//!
//! Reads/writes `~/.busmatch/config.yaml` with server address, store backend,
//! matcher tuning, push-stream cadence, state eviction, and webhook URL.

use std::path::PathBuf;

use crate::matcher::{OFF_THRESHOLD, ON_THRESHOLD};
use crate::scoring::MAX_TIME_SKEW_S;
use crate::types::MatchError;

/// Default radius of the bus proximity search around a rider.
pub const DEFAULT_SEARCH_RADIUS_M: f64 = 80.0;

/// Default push-stream cadence.
pub const DEFAULT_STREAM_INTERVAL_MS: u64 = 1000;

/// Full configuration structure.
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub matcher: MatcherConfig,
    pub stream: StreamConfig,
    pub state: StateConfig,
    pub webhook: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// `memory` or `sqlite`.
    pub backend: String,
    pub path: String,
}

#[derive(Debug, Clone)]
pub struct MatcherConfig {
    pub search_radius_m: f64,
    pub on_threshold: f64,
    pub off_threshold: f64,
    pub max_time_skew_s: f64,
}

#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub interval_ms: u64,
}

#[derive(Debug, Clone)]
pub struct StateConfig {
    /// Evict match states idle for longer than this. `None` keeps them forever.
    pub ttl_s: Option<f64>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "127.0.0.1".into(),
                port: 8000,
            },
            store: StoreConfig {
                backend: "memory".into(),
                path: "data/busmatch.db".into(),
            },
            matcher: MatcherConfig {
                search_radius_m: DEFAULT_SEARCH_RADIUS_M,
                on_threshold: ON_THRESHOLD,
                off_threshold: OFF_THRESHOLD,
                max_time_skew_s: MAX_TIME_SKEW_S,
            },
            stream: StreamConfig {
                interval_ms: DEFAULT_STREAM_INTERVAL_MS,
            },
            state: StateConfig { ttl_s: None },
            webhook: None,
        }
    }
}

/// Get the config directory path (`~/.busmatch/`).
pub fn config_dir() -> PathBuf {
    dirs_home().join(".busmatch")
}

/// Get the config file path.
pub fn config_file() -> PathBuf {
    config_dir().join("config.yaml")
}

fn dirs_home() -> PathBuf {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

/// Load config from `~/.busmatch/config.yaml`.
///
/// Returns default config if the file doesn't exist or can't be read.
pub fn load_config() -> Config {
    let path = config_file();
    if !path.exists() {
        return Config::default();
    }
    load_config_from(&path).unwrap_or_default()
}

/// Load config from an explicit path.
pub fn load_config_from(path: &std::path::Path) -> Result<Config, MatchError> {
    let text = std::fs::read_to_string(path)?;
    Ok(parse_config(&text))
}

/// Save config to `~/.busmatch/config.yaml`.
pub fn save_config(config: &Config) -> Result<PathBuf, MatchError> {
    let dir = config_dir();
    std::fs::create_dir_all(&dir).map_err(|e| MatchError::Config(e.to_string()))?;

    let path = config_file();
    std::fs::write(&path, serialize_config(config))
        .map_err(|e| MatchError::Config(e.to_string()))?;

    Ok(path)
}

/// Parse simple YAML-like config text. Unknown keys are ignored.
pub fn parse_config(text: &str) -> Config {
    let mut config = Config::default();
    let mut current_section: Option<String> = None;

    for line in text.lines() {
        let stripped = strip_comment(line).trim();
        if stripped.is_empty() {
            continue;
        }

        let is_indented = line.starts_with("  ") || line.starts_with('\t');

        let Some((key, val)) = stripped.split_once(':') else {
            continue;
        };
        let key = key.trim();
        let val = val.trim();

        if !is_indented {
            if val.is_empty() {
                current_section = Some(key.to_string());
            } else {
                current_section = None;
                if key == "webhook" {
                    config.webhook = parse_string_value(val);
                }
            }
            continue;
        }

        let Some(section) = current_section.as_deref() else {
            continue;
        };

        match (section, key) {
            ("server", "host") => {
                if let Some(v) = parse_string_value(val) {
                    config.server.host = v;
                }
            }
            ("server", "port") => {
                if let Ok(v) = val.parse::<u16>() {
                    config.server.port = v;
                }
            }
            ("store", "backend") => {
                if let Some(v) = parse_string_value(val) {
                    config.store.backend = v;
                }
            }
            ("store", "path") => {
                if let Some(v) = parse_string_value(val) {
                    config.store.path = v;
                }
            }
            ("matcher", "search_radius_m") => {
                if let Some(v) = parse_float_value(val) {
                    config.matcher.search_radius_m = v;
                }
            }
            ("matcher", "on_threshold") => {
                if let Some(v) = parse_float_value(val) {
                    config.matcher.on_threshold = v;
                }
            }
            ("matcher", "off_threshold") => {
                if let Some(v) = parse_float_value(val) {
                    config.matcher.off_threshold = v;
                }
            }
            ("matcher", "max_time_skew_s") => {
                if let Some(v) = parse_float_value(val) {
                    config.matcher.max_time_skew_s = v;
                }
            }
            ("stream", "interval_ms") => {
                if let Ok(v) = val.parse::<u64>() {
                    config.stream.interval_ms = v;
                }
            }
            ("state", "ttl_s") => config.state.ttl_s = parse_float_value(val),
            _ => {}
        }
    }

    config
}

fn strip_comment(line: &str) -> &str {
    // Only treat `#` as a comment when it is not inside a quoted value
    let mut in_quote: Option<char> = None;
    for (i, c) in line.char_indices() {
        match (c, in_quote) {
            ('"' | '\'', None) => in_quote = Some(c),
            (c, Some(q)) if c == q => in_quote = None,
            ('#', None) => return &line[..i],
            _ => {}
        }
    }
    line
}

fn parse_string_value(val: &str) -> Option<String> {
    if val == "null" || val == "~" || val.is_empty() {
        return None;
    }
    // Strip quotes
    if val.len() >= 2
        && ((val.starts_with('"') && val.ends_with('"'))
            || (val.starts_with('\'') && val.ends_with('\'')))
    {
        return Some(val[1..val.len() - 1].to_string());
    }
    Some(val.to_string())
}

fn parse_float_value(val: &str) -> Option<f64> {
    if val == "null" || val == "~" || val.is_empty() {
        return None;
    }
    val.parse().ok()
}

/// Serialize config to YAML-like text.
pub fn serialize_config(config: &Config) -> String {
    let mut lines = vec!["# busmatch configuration".to_string(), String::new()];

    lines.push("server:".into());
    lines.push(format!("  host: \"{}\"", config.server.host));
    lines.push(format!("  port: {}", config.server.port));
    lines.push(String::new());

    lines.push("store:".into());
    lines.push(format!("  backend: \"{}\"", config.store.backend));
    lines.push(format!("  path: \"{}\"", config.store.path));
    lines.push(String::new());

    lines.push("matcher:".into());
    lines.push(format!("  search_radius_m: {}", config.matcher.search_radius_m));
    lines.push(format!("  on_threshold: {}", config.matcher.on_threshold));
    lines.push(format!("  off_threshold: {}", config.matcher.off_threshold));
    lines.push(format!("  max_time_skew_s: {}", config.matcher.max_time_skew_s));
    lines.push(String::new());

    lines.push("stream:".into());
    lines.push(format!("  interval_ms: {}", config.stream.interval_ms));
    lines.push(String::new());

    lines.push("state:".into());
    match config.state.ttl_s {
        Some(v) => lines.push(format!("  ttl_s: {v}")),
        None => lines.push("  ttl_s: null".into()),
    }
    lines.push(String::new());

    match &config.webhook {
        Some(url) => lines.push(format!("webhook: \"{url}\"")),
        None => lines.push("webhook: null".into()),
    }

    lines.join("\n") + "\n"
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
