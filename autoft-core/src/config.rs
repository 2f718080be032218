//! Configuration file management for autoft.
//!
//! Reads/writes `~/.autoft/config.yaml`: network endpoints, station identity,
//! call selector, sequencer timing and the database path. The format is a
//! small YAML subset: top-level sections, indented `key: value` lines and
//! inline `[A, B]` lists.

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};

use crate::geo;
use crate::selector::build_selector;
use crate::sequencer::{ACTIVE_WINDOW, DEFAULT_COOLDOWN, DEFAULT_OFFSETS};
use crate::status::DEFAULT_MAX_TRIES;
use crate::types::{normalize_call, AutoftError, Result};

/// Full configuration structure.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub network: NetworkConfig,
    pub station: StationConfig,
    pub selector: SelectorConfig,
    pub sequencer: SequencerConfig,
    pub database: DatabaseConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NetworkConfig {
    pub bind: String,
    pub wsjtx_port: u16,
    pub console_port: u16,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StationConfig {
    pub call: String,
    pub grid: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectorConfig {
    pub name: String,
    /// Grid prefixes for the `grid` and `notgrid` selectors.
    pub squares: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SequencerConfig {
    pub max_tries: u16,
    /// Seconds past the minute at which a transmit period starts.
    pub offsets: Vec<u32>,
    pub window: i64,
    pub cooldown: i64,
    /// CQ directives (`DX`, `NA`, ...) worth answering.
    pub cq_directives: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseConfig {
    pub path: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            network: NetworkConfig {
                bind: "127.0.0.1".into(),
                wsjtx_port: 2238,
                console_port: 2240,
            },
            station: StationConfig {
                call: "N0CALL".into(),
                grid: "CM87vl".into(),
            },
            selector: SelectorConfig {
                name: "any".into(),
                squares: Vec::new(),
            },
            sequencer: SequencerConfig {
                max_tries: DEFAULT_MAX_TRIES,
                offsets: DEFAULT_OFFSETS.to_vec(),
                window: ACTIVE_WINDOW,
                cooldown: DEFAULT_COOLDOWN,
                cq_directives: Vec::new(),
            },
            database: DatabaseConfig {
                path: config_dir().join("autoft.db").to_string_lossy().into_owned(),
            },
        }
    }
}

impl Config {
    /// Check everything the tasks will rely on at construction.
    pub fn validate(&self) -> Result<()> {
        self.bind_ip()?;
        if self.network.wsjtx_port == 0 || self.network.console_port == 0 {
            return Err(AutoftError::Config("ports must be non-zero".into()));
        }
        if self.network.wsjtx_port == self.network.console_port {
            return Err(AutoftError::Config(format!(
                "wsjtx_port and console_port are both {}",
                self.network.wsjtx_port
            )));
        }

        let call = normalize_call(&self.station.call)?;
        if call.is_empty() {
            return Err(AutoftError::Config("station.call is empty".into()));
        }
        self.home()?;

        build_selector(&self.selector)?;

        let seq = &self.sequencer;
        if seq.max_tries == 0 {
            return Err(AutoftError::Config("sequencer.max_tries must be at least 1".into()));
        }
        if seq.offsets.is_empty() || seq.offsets.iter().any(|&o| o >= 60) {
            return Err(AutoftError::Config(format!(
                "sequencer.offsets must be seconds 0-59, got {:?}",
                seq.offsets
            )));
        }
        if seq.window <= 0 || seq.cooldown < 0 {
            return Err(AutoftError::Config(
                "sequencer.window must be positive and cooldown non-negative".into(),
            ));
        }
        Ok(())
    }

    /// Normalized operator call sign.
    pub fn my_call(&self) -> Result<String> {
        normalize_call(&self.station.call)
    }

    /// Operator position from `station.grid`.
    pub fn home(&self) -> Result<(f64, f64)> {
        geo::grid_to_latlon(&self.station.grid).map_err(|_| {
            AutoftError::Config(format!("invalid station.grid '{}'", self.station.grid))
        })
    }

    fn bind_ip(&self) -> Result<IpAddr> {
        self.network.bind.parse().map_err(|_| {
            AutoftError::Config(format!("invalid network.bind '{}'", self.network.bind))
        })
    }

    pub fn wsjtx_addr(&self) -> Result<SocketAddr> {
        Ok(SocketAddr::new(self.bind_ip()?, self.network.wsjtx_port))
    }

    pub fn console_addr(&self) -> Result<SocketAddr> {
        Ok(SocketAddr::new(self.bind_ip()?, self.network.console_port))
    }
}

/// Get the config directory path (`~/.autoft/`).
pub fn config_dir() -> PathBuf {
    dirs_home().join(".autoft")
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

/// Load config from `path`, or `~/.autoft/config.yaml` when `None`.
///
/// Returns the default config if the file doesn't exist.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(config_file);
    if !path.exists() {
        return Ok(Config::default());
    }

    let text = std::fs::read_to_string(&path)
        .map_err(|e| AutoftError::Config(format!("{}: {e}", path.display())))?;
    parse_config(&text)
}

/// Save config to `path`, or `~/.autoft/config.yaml` when `None`.
pub fn save_config(config: &Config, path: Option<&Path>) -> Result<PathBuf> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(config_file);
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| AutoftError::Config(e.to_string()))?;
    }

    std::fs::write(&path, serialize_config(config))
        .map_err(|e| AutoftError::Config(e.to_string()))?;

    Ok(path)
}

/// Parse the YAML-like config text. Unknown sections and keys are ignored.
pub fn parse_config(text: &str) -> Result<Config> {
    let mut config = Config::default();
    let mut current_section: Option<String> = None;

    for (n, line) in text.lines().enumerate() {
        let stripped = line.trim();
        if stripped.is_empty() || stripped.starts_with('#') {
            continue;
        }

        let is_indented = line.starts_with("  ") || line.starts_with('\t');
        let Some((key, val)) = stripped.split_once(':') else {
            return Err(AutoftError::Config(format!(
                "line {}: expected 'key: value'",
                n + 1
            )));
        };
        let key = key.trim();
        let val = val.trim();

        if !is_indented {
            current_section = val.is_empty().then(|| key.to_string());
            continue;
        }
        let Some(section) = current_section.as_deref() else {
            continue;
        };

        let bad = || AutoftError::Config(format!("line {}: bad value for {section}.{key}", n + 1));
        match (section, key) {
            ("network", "bind") => set_string(&mut config.network.bind, val),
            ("network", "wsjtx_port") => config.network.wsjtx_port = val.parse().map_err(|_| bad())?,
            ("network", "console_port") => {
                config.network.console_port = val.parse().map_err(|_| bad())?
            }
            ("station", "call") => set_string(&mut config.station.call, val),
            ("station", "grid") => set_string(&mut config.station.grid, val),
            ("selector", "name") => set_string(&mut config.selector.name, val),
            ("selector", "squares") => config.selector.squares = parse_list(val),
            ("sequencer", "max_tries") => {
                config.sequencer.max_tries = val.parse().map_err(|_| bad())?
            }
            ("sequencer", "offsets") => {
                config.sequencer.offsets = parse_list(val)
                    .iter()
                    .map(|v| v.parse().map_err(|_| bad()))
                    .collect::<Result<Vec<u32>>>()?
            }
            ("sequencer", "window") => config.sequencer.window = val.parse().map_err(|_| bad())?,
            ("sequencer", "cooldown") => {
                config.sequencer.cooldown = val.parse().map_err(|_| bad())?
            }
            ("sequencer", "cq_directives") => {
                config.sequencer.cq_directives = parse_list(val)
                    .into_iter()
                    .map(|d| d.to_uppercase())
                    .collect()
            }
            ("database", "path") => set_string(&mut config.database.path, val),
            _ => {}
        }
    }

    Ok(config)
}

fn set_string(target: &mut String, val: &str) {
    if let Some(v) = parse_string_value(val) {
        *target = v;
    }
}

fn parse_string_value(val: &str) -> Option<String> {
    if val == "null" || val == "~" || val.is_empty() {
        return None;
    }
    if (val.starts_with('"') && val.ends_with('"') && val.len() >= 2)
        || (val.starts_with('\'') && val.ends_with('\'') && val.len() >= 2)
    {
        return Some(val[1..val.len() - 1].to_string());
    }
    Some(val.to_string())
}

/// `[A, B, C]` or a bare `A`. `[]`, `null` and `~` give an empty list.
fn parse_list(val: &str) -> Vec<String> {
    let inner = val
        .strip_prefix('[')
        .and_then(|v| v.strip_suffix(']'))
        .unwrap_or(val);
    inner
        .split(',')
        .filter_map(|item| parse_string_value(item.trim()))
        .collect()
}

fn format_list<T: std::fmt::Display>(items: &[T]) -> String {
    let items: Vec<String> = items.iter().map(|i| i.to_string()).collect();
    format!("[{}]", items.join(", "))
}

/// Serialize config to YAML-like text.
pub fn serialize_config(config: &Config) -> String {
    let mut lines = vec!["# autoft configuration".to_string(), String::new()];

    lines.push("network:".into());
    lines.push(format!("  bind: \"{}\"", config.network.bind));
    lines.push(format!("  wsjtx_port: {}", config.network.wsjtx_port));
    lines.push(format!("  console_port: {}", config.network.console_port));
    lines.push(String::new());

    lines.push("station:".into());
    lines.push(format!("  call: \"{}\"", config.station.call));
    lines.push(format!("  grid: \"{}\"", config.station.grid));
    lines.push(String::new());

    lines.push("selector:".into());
    lines.push(format!("  name: \"{}\"", config.selector.name));
    lines.push(format!("  squares: {}", format_list(&config.selector.squares)));
    lines.push(String::new());

    let seq = &config.sequencer;
    lines.push("sequencer:".into());
    lines.push(format!("  max_tries: {}", seq.max_tries));
    lines.push(format!("  offsets: {}", format_list(&seq.offsets)));
    lines.push(format!("  window: {}", seq.window));
    lines.push(format!("  cooldown: {}", seq.cooldown));
    lines.push(format!("  cq_directives: {}", format_list(&seq.cq_directives)));
    lines.push(String::new());

    lines.push("database:".into());
    lines.push(format!("  path: \"{}\"", config.database.path));

    lines.join("\n") + "\n"
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.network.wsjtx_port, 2238);
        assert_eq!(config.network.console_port, 2240);
        assert_eq!(config.selector.name, "any");
        assert_eq!(config.sequencer.offsets, vec![0, 15, 30, 45]);
        assert_eq!(config.sequencer.cooldown, 900);
        config.validate().unwrap();
    }

    #[test]
    fn test_parse_config() {
        let text = r#"
network:
  bind: "0.0.0.0"
  wsjtx_port: 2237
  console_port: 2250

station:
  call: "W6BSD"
  grid: CM87vl

selector:
  name: grid
  squares: [JO, JN, 'IO']

sequencer:
  max_tries: 3
  offsets: [0, 30]
  window: 30
  cooldown: 600
  cq_directives: [dx, NA]

database:
  path: "/tmp/test.db"
"#;
        let config = parse_config(text).unwrap();
        assert_eq!(config.network.bind, "0.0.0.0");
        assert_eq!(config.network.wsjtx_port, 2237);
        assert_eq!(config.network.console_port, 2250);
        assert_eq!(config.station.call, "W6BSD");
        assert_eq!(config.station.grid, "CM87vl");
        assert_eq!(config.selector.name, "grid");
        assert_eq!(config.selector.squares, vec!["JO", "JN", "IO"]);
        assert_eq!(config.sequencer.max_tries, 3);
        assert_eq!(config.sequencer.offsets, vec![0, 30]);
        assert_eq!(config.sequencer.window, 30);
        assert_eq!(config.sequencer.cooldown, 600);
        assert_eq!(config.sequencer.cq_directives, vec!["DX", "NA"]);
        assert_eq!(config.database.path, "/tmp/test.db");
        config.validate().unwrap();
    }

    #[test]
    fn test_parse_config_null_values() {
        let text = "station:\n  call: null\n  grid: ~\nselector:\n  squares: []\n";
        let config = parse_config(text).unwrap();
        assert_eq!(config.station.call, "N0CALL");
        assert_eq!(config.station.grid, "CM87vl");
        assert!(config.selector.squares.is_empty());
    }

    #[test]
    fn test_parse_config_bad_number() {
        let text = "network:\n  wsjtx_port: lots\n";
        assert!(matches!(parse_config(text), Err(AutoftError::Config(_))));
        let text = "sequencer:\n  offsets: [0, x]\n";
        assert!(matches!(parse_config(text), Err(AutoftError::Config(_))));
    }

    #[test]
    fn test_roundtrip() {
        let mut config = Config::default();
        config.station.call = "K1ABC".into();
        config.selector = SelectorConfig {
            name: "notgrid".into(),
            squares: vec!["FN".into(), "E?".into()],
        };
        config.sequencer.cq_directives = vec!["DX".into()];
        let parsed = parse_config(&serialize_config(&config)).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_validate_rejects() {
        let mut c = Config::default();
        c.station.call = "VERYLONGCALL".into();
        assert!(c.validate().is_err());

        let mut c = Config::default();
        c.station.grid = "ZZ99".into();
        assert!(c.validate().is_err());

        let mut c = Config::default();
        c.network.bind = "localhost:80".into();
        assert!(c.validate().is_err());

        let mut c = Config::default();
        c.network.console_port = c.network.wsjtx_port;
        assert!(c.validate().is_err());

        let mut c = Config::default();
        c.selector.name = "grid".into();
        assert!(c.validate().is_err());

        let mut c = Config::default();
        c.sequencer.offsets = vec![0, 60];
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_save_and_load() {
        let dir = std::env::temp_dir().join(format!("autoft-config-{}", std::process::id()));
        let path = dir.join("config.yaml");
        let mut config = Config::default();
        config.station.call = "W6BSD".into();
        save_config(&config, Some(&path)).unwrap();
        assert_eq!(load_config(Some(&path)).unwrap(), config);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_missing_file_gives_default() {
        let path = Path::new("/nonexistent/autoft/config.yaml");
        assert_eq!(load_config(Some(path)).unwrap(), Config::default());
    }

    #[test]
    fn test_addresses() {
        let c = Config::default();
        assert_eq!(c.wsjtx_addr().unwrap().to_string(), "127.0.0.1:2238");
        assert_eq!(c.console_addr().unwrap().to_string(), "127.0.0.1:2240");
    }
}
