use std::{
    path::{Path, PathBuf},
    sync::{Mutex, PoisonError},
};

use tracing::{debug, warn};

use crate::{env_subst::substitute_env, schema::RelayConfig};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &["relay.toml", "relay.yaml", "relay.yml", "relay.json"];

/// Override for the config directory, set via `set_config_dir()`.
static CONFIG_DIR_OVERRIDE: Mutex<Option<PathBuf>> = Mutex::new(None);

/// Set a custom config directory. When set, discovery only looks in this
/// directory and the default config is written there too.
pub fn set_config_dir(path: PathBuf) {
    *CONFIG_DIR_OVERRIDE
        .lock()
        .unwrap_or_else(PoisonError::into_inner) = Some(path);
}

fn config_dir_override() -> Option<PathBuf> {
    CONFIG_DIR_OVERRIDE
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> anyhow::Result<RelayConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    let raw = substitute_env(&raw);
    let mut config = parse_config(&raw, path)?;
    apply_env_overrides(&mut config);
    Ok(config)
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./relay.{toml,yaml,yml,json}` (project-local)
/// 2. `~/.config/relay/relay.{toml,yaml,yml,json}` (user-global)
///
/// Returns `RelayConfig::default()` if no config file is found, and writes
/// that default to the user-global path so it can be edited.
pub fn discover_and_load() -> RelayConfig {
    let Some(path) = find_config_file() else {
        debug!("no config file found, writing default config");
        let mut config = RelayConfig::default();
        if let Err(e) = write_default_config(&config) {
            warn!(error = %e, "failed to write default config file");
        }
        apply_env_overrides(&mut config);
        return config;
    };

    debug!(path = %path.display(), "loading config");
    match load_config(&path) {
        Ok(cfg) => cfg,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
            let mut config = RelayConfig::default();
            apply_env_overrides(&mut config);
            config
        },
    }
}

/// `PORT` wins over the file, matching how hosting platforms inject it.
fn apply_env_overrides(config: &mut RelayConfig) {
    if let Some(port) = std::env::var("PORT").ok().and_then(|p| p.parse().ok()) {
        config.server.port = port;
    }
}

/// Find the first config file in standard locations.
fn find_config_file() -> Option<PathBuf> {
    if let Some(dir) = config_dir_override() {
        // Override is set, don't fall through to other locations.
        return first_existing(&dir);
    }

    CONFIG_FILENAMES
        .iter()
        .map(PathBuf::from)
        .find(|p| p.exists())
        .or_else(|| {
            home_dir()
                .map(|h| h.join(".config").join("relay"))
                .and_then(|dir| first_existing(&dir))
        })
}

fn first_existing(dir: &Path) -> Option<PathBuf> {
    CONFIG_FILENAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|p| p.exists())
}

/// Returns the config directory: override, or `~/.config/relay/`.
pub fn config_dir() -> Option<PathBuf> {
    if let Some(dir) = config_dir_override() {
        return Some(dir);
    }
    home_dir().map(|h| h.join(".config").join("relay"))
}

/// Returns the data directory: `~/.relay/`.
pub fn data_dir() -> PathBuf {
    home_dir()
        .map(|h| h.join(".relay"))
        .unwrap_or_else(|| PathBuf::from(".relay"))
}

fn home_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf())
}

/// Returns the path of an existing config file, or the default TOML path.
pub fn find_or_default_config_path() -> PathBuf {
    if let Some(path) = find_config_file() {
        return path;
    }
    config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("relay.toml")
}

/// Only called when no config file exists yet.
fn write_default_config(config: &RelayConfig) -> anyhow::Result<()> {
    let path = find_or_default_config_path();
    if path.exists() {
        return Ok(());
    }
    write_toml(&path, config)?;
    debug!(path = %path.display(), "wrote default config file");
    Ok(())
}

fn write_toml(path: &Path, config: &RelayConfig) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str =
        toml::to_string_pretty(config).map_err(|e| anyhow::anyhow!("serialize config: {e}"))?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

fn parse_config(raw: &str, path: &Path) -> anyhow::Result<RelayConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => anyhow::bail!("unsupported config format: .{ext}"),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn parses_yaml_and_json() {
        let yaml = parse_config(
            "messaging:\n  default_region: US\n",
            Path::new("relay.yaml"),
        )
        .unwrap();
        assert_eq!(yaml.messaging.default_region, "US");

        let json = parse_config(r#"{"server":{"port":9000}}"#, Path::new("relay.json")).unwrap();
        assert_eq!(json.server.port, 9000);
    }

    #[test]
    fn rejects_unknown_extension() {
        assert!(parse_config("", Path::new("relay.ini")).is_err());
    }

    #[test]
    fn load_config_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.toml");
        std::fs::write(
            &path,
            "[connection]\nsession_id = \"${RELAY_UNSET_SESSION:-ops}\"\n",
        )
        .unwrap();

        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.connection.session_id, "ops");
    }

    #[test]
    fn load_config_missing_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_config(&dir.path().join("nope.toml")).is_err());
    }

    #[test]
    fn discovery_in_override_dir_writes_then_reads_config() {
        let dir = tempfile::tempdir().unwrap();
        set_config_dir(dir.path().to_path_buf());
        let path = dir.path().join("relay.toml");

        let cfg = discover_and_load();
        assert_eq!(cfg.connection.restart_ceiling, 5);
        assert!(path.exists());
        assert_eq!(find_or_default_config_path(), path);

        std::fs::write(&path, "[connection]\nrestart_ceiling = 9\n").unwrap();
        assert_eq!(discover_and_load().connection.restart_ceiling, 9);
    }
}
