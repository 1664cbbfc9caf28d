//! Optional `key = value` config file supplying CLI defaults.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use offline_core::CaptureConfig;
use offline_core::config::{MAX_ACTIVE_RANGE, TIMEOUT_RANGE_SECS};

const APP_DIR: &str = "offline-capture";

/// Values read from `config.toml`; unset keys fall back to built-in defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileConfig {
    pub output_dir: Option<PathBuf>,
    pub concurrency: Option<u8>,
    pub verbosity: Option<VerbositySetting>,
    /// SQLite state file; entries are kept in memory when unset.
    pub db_path: Option<PathBuf>,
    pub shell_stylesheet_marker: Option<String>,
    pub shell_stylesheet_path: Option<PathBuf>,
    pub download_connect_timeout_secs: Option<u64>,
    pub download_read_timeout_secs: Option<u64>,
    pub resolver_connect_timeout_secs: Option<u64>,
    pub resolver_read_timeout_secs: Option<u64>,
}

impl FileConfig {
    /// Checks ranges and that the shell stylesheet keys come as a pair.
    pub fn validate(&self) -> Result<()> {
        if let Some(concurrency) = self.concurrency {
            if !MAX_ACTIVE_RANGE.contains(&usize::from(concurrency)) {
                bail!(
                    "Invalid config value for `concurrency`: {concurrency}. Expected range: {}..={}",
                    MAX_ACTIVE_RANGE.start(),
                    MAX_ACTIVE_RANGE.end()
                );
            }
        }
        for (field, value) in [
            ("download_connect_timeout_secs", self.download_connect_timeout_secs),
            ("download_read_timeout_secs", self.download_read_timeout_secs),
            ("resolver_connect_timeout_secs", self.resolver_connect_timeout_secs),
            ("resolver_read_timeout_secs", self.resolver_read_timeout_secs),
        ] {
            if let Some(value) = value {
                if !TIMEOUT_RANGE_SECS.contains(&value) {
                    bail!("Invalid config value for `{field}`: {value}. Expected range: 1..=3600");
                }
            }
        }
        if self.shell_stylesheet_marker.is_some() != self.shell_stylesheet_path.is_some() {
            bail!("`shell_stylesheet_marker` and `shell_stylesheet_path` must be set together");
        }
        Ok(())
    }

    /// Overlays the file values on `config`.
    #[must_use]
    pub fn apply(&self, mut config: CaptureConfig) -> CaptureConfig {
        if let Some(output_dir) = &self.output_dir {
            config.output_root.clone_from(output_dir);
        }
        if let Some(concurrency) = self.concurrency {
            config.max_active = usize::from(concurrency);
        }
        if let (Some(marker), Some(path)) = (&self.shell_stylesheet_marker, &self.shell_stylesheet_path) {
            config = config.with_shell_stylesheet(marker.clone(), path.clone());
        }
        let timeouts = [
            (&mut config.download_connect_timeout_secs, self.download_connect_timeout_secs),
            (&mut config.download_read_timeout_secs, self.download_read_timeout_secs),
            (&mut config.resolver_connect_timeout_secs, self.resolver_connect_timeout_secs),
            (&mut config.resolver_read_timeout_secs, self.resolver_read_timeout_secs),
        ];
        for (slot, value) in timeouts {
            if let Some(value) = value {
                *slot = value;
            }
        }
        config
    }
}

/// Verbosity labels accepted in the config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerbositySetting {
    Default,
    Verbose,
    Quiet,
    Debug,
}

impl VerbositySetting {
    /// Default tracing filter for this label.
    #[must_use]
    pub fn filter(self) -> &'static str {
        match self {
            Self::Default => "info",
            Self::Verbose => "debug",
            Self::Quiet => "error",
            Self::Debug => "trace",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LoadedConfig {
    pub path: Option<PathBuf>,
    pub config: Option<FileConfig>,
}

/// `$XDG_CONFIG_HOME/offline-capture/config.toml`, else
/// `$HOME/.config/offline-capture/config.toml`.
#[must_use]
pub fn resolve_default_config_path() -> Option<PathBuf> {
    if let Some(xdg_config_home) = env_var_non_empty_os("XDG_CONFIG_HOME") {
        return Some(PathBuf::from(xdg_config_home).join(APP_DIR).join("config.toml"));
    }
    let home = env_var_non_empty_os("HOME")?;
    Some(PathBuf::from(home).join(".config").join(APP_DIR).join("config.toml"))
}

fn env_var_non_empty_os(name: &str) -> Option<std::ffi::OsString> {
    env::var_os(name).filter(|value| !value.is_empty())
}

/// Loads the default config file when it exists.
pub fn load_default_file_config() -> Result<LoadedConfig> {
    let path = resolve_default_config_path();
    let config = match path.as_deref() {
        Some(path) if path.exists() => Some(load_file_config(path)?),
        _ => None,
    };
    Ok(LoadedConfig { path, config })
}

pub fn load_file_config(path: &Path) -> Result<FileConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
    parse_config_str(&raw).with_context(|| format!("Failed to parse config file '{}'", path.display()))
}

fn parse_config_str(raw: &str) -> Result<FileConfig> {
    let mut cfg = FileConfig::default();
    for (line_index, raw_line) in raw.lines().enumerate() {
        let line_number = line_index + 1;
        let line = strip_inline_comment(raw_line).trim();
        if line.is_empty() {
            continue;
        }
        let Some((raw_key, raw_value)) = line.split_once('=') else {
            bail!("Invalid config syntax on line {line_number}: expected key = value");
        };
        let key = raw_key.trim();
        let value = raw_value.trim();
        let context = || format!("Invalid `{key}` value on line {line_number}");

        match key {
            "output_dir" => cfg.output_dir = Some(parse_string_literal(value).with_context(context)?.into()),
            "db_path" => cfg.db_path = Some(parse_string_literal(value).with_context(context)?.into()),
            "shell_stylesheet_marker" => {
                cfg.shell_stylesheet_marker = Some(parse_string_literal(value).with_context(context)?);
            }
            "shell_stylesheet_path" => {
                cfg.shell_stylesheet_path = Some(parse_string_literal(value).with_context(context)?.into());
            }
            "concurrency" => {
                let parsed = parse_integer(value).with_context(context)?;
                cfg.concurrency = Some(u8::try_from(parsed).map_err(|_| anyhow!("{}", context()))?);
            }
            "verbosity" => {
                let label = parse_string_literal(value).with_context(context)?;
                cfg.verbosity = Some(parse_verbosity(&label).with_context(context)?);
            }
            "download_connect_timeout_secs" => {
                cfg.download_connect_timeout_secs = Some(parse_integer(value).with_context(context)?);
            }
            "download_read_timeout_secs" => {
                cfg.download_read_timeout_secs = Some(parse_integer(value).with_context(context)?);
            }
            "resolver_connect_timeout_secs" => {
                cfg.resolver_connect_timeout_secs = Some(parse_integer(value).with_context(context)?);
            }
            "resolver_read_timeout_secs" => {
                cfg.resolver_read_timeout_secs = Some(parse_integer(value).with_context(context)?);
            }
            unknown => bail!("Unknown configuration key: '{unknown}' on line {line_number}"),
        }
    }
    cfg.validate()?;
    Ok(cfg)
}

fn strip_inline_comment(line: &str) -> &str {
    let mut in_string = false;
    for (index, ch) in line.char_indices() {
        match ch {
            '"' => in_string = !in_string,
            '#' if !in_string => return &line[..index],
            _ => {}
        }
    }
    line
}

fn parse_string_literal(raw_value: &str) -> Result<String> {
    raw_value
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
        .map(str::to_string)
        .ok_or_else(|| anyhow!("Expected double-quoted string"))
}

fn parse_integer(raw_value: &str) -> Result<u64> {
    let token = raw_value.trim();
    if token.is_empty() {
        bail!("Expected integer value");
    }
    if token.starts_with('-') {
        bail!("Expected non-negative integer");
    }
    Ok(token.parse::<u64>()?)
}

fn parse_verbosity(value: &str) -> Result<VerbositySetting> {
    match value {
        "default" => Ok(VerbositySetting::Default),
        "verbose" => Ok(VerbositySetting::Verbose),
        "quiet" => Ok(VerbositySetting::Quiet),
        "debug" => Ok(VerbositySetting::Debug),
        _ => bail!("Expected one of: default, verbose, quiet, debug"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config_all_fields() {
        let cfg = parse_config_str(
            r#"
            # capture defaults
            output_dir = "/srv/bundles"
            concurrency = 4
            verbosity = "debug"
            db_path = "/srv/state.db"   # persisted
            shell_stylesheet_marker = "/dist/brandable_css/"
            shell_stylesheet_path = "/opt/shell.css"
            download_connect_timeout_secs = 15
            download_read_timeout_secs = 120
            resolver_connect_timeout_secs = 5
            resolver_read_timeout_secs = 30
            "#,
        )
        .unwrap();

        assert_eq!(cfg.output_dir, Some(PathBuf::from("/srv/bundles")));
        assert_eq!(cfg.concurrency, Some(4));
        assert_eq!(cfg.verbosity, Some(VerbositySetting::Debug));
        assert_eq!(cfg.db_path, Some(PathBuf::from("/srv/state.db")));
        assert_eq!(cfg.resolver_read_timeout_secs, Some(30));
    }

    #[test]
    fn test_hash_inside_string_is_not_a_comment() {
        let cfg = parse_config_str(r#"output_dir = "/tmp/a#b" # trailing"#).unwrap();
        assert_eq!(cfg.output_dir, Some(PathBuf::from("/tmp/a#b")));
    }

    #[test]
    fn test_unknown_key_rejected() {
        let err = parse_config_str("rate_limit = 10").unwrap_err();
        assert!(err.to_string().contains("Unknown configuration key"));
    }

    #[test]
    fn test_out_of_range_values_rejected() {
        assert!(parse_config_str("concurrency = 0").is_err());
        assert!(parse_config_str("concurrency = 33").is_err());
        assert!(parse_config_str("concurrency = 999").is_err());
        assert!(parse_config_str("download_read_timeout_secs = 0").is_err());
        assert!(parse_config_str("resolver_connect_timeout_secs = -1").is_err());
    }

    #[test]
    fn test_unpaired_shell_stylesheet_rejected() {
        let err = parse_config_str(r#"shell_stylesheet_marker = "/dist/""#).unwrap_err();
        assert!(err.to_string().contains("set together"));
    }

    #[test]
    fn test_unquoted_string_rejected() {
        assert!(parse_config_str("output_dir = /tmp").is_err());
    }

    #[test]
    fn test_apply_overlays_capture_config() {
        let file = FileConfig {
            output_dir: Some(PathBuf::from("/out")),
            concurrency: Some(7),
            shell_stylesheet_marker: Some("/brand/".into()),
            shell_stylesheet_path: Some(PathBuf::from("/opt/shell.css")),
            download_read_timeout_secs: Some(90),
            ..FileConfig::default()
        };
        let config = file.apply(CaptureConfig::default());

        assert_eq!(config.output_root, PathBuf::from("/out"));
        assert_eq!(config.max_active, 7);
        assert_eq!(config.download_read_timeout_secs, 90);
        assert_eq!(config.shell_stylesheet.unwrap().marker, "/brand/");
    }
}
