use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::store::cursor::FETCH_BATCH_SIZE_DEFAULT;
use crate::store::lease::LEASE_TTL_SECS_DEFAULT;

pub const PROJECT_CONFIG_FILE: &str = ".variant-store.yml";
pub const PAGE_SIZE_DEFAULT: usize = 10;
pub const BUSY_TIMEOUT_MS_DEFAULT: u64 = 5_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// SQLite file; `None` keeps the store in memory.
    pub database: Option<PathBuf>,
    pub page_size: usize,
    pub fetch_batch_size: usize,
    pub lease_ttl_secs: i64,
    pub busy_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database: None,
            page_size: PAGE_SIZE_DEFAULT,
            fetch_batch_size: FETCH_BATCH_SIZE_DEFAULT,
            lease_ttl_secs: LEASE_TTL_SECS_DEFAULT,
            busy_timeout_ms: BUSY_TIMEOUT_MS_DEFAULT,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    #[serde(default)]
    database: Option<String>,
    #[serde(default)]
    page_size: Option<usize>,
    #[serde(default)]
    fetch_batch_size: Option<usize>,
    #[serde(default)]
    lease_ttl_secs: Option<i64>,
    #[serde(default)]
    busy_timeout_ms: Option<u64>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid setting `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Merges user, nearest project and explicit config files, in that order.
///
/// Later layers override individual keys of earlier ones. `~` in
/// `database` is expanded against `home`.
pub fn load_effective_config(
    cwd: &Path,
    explicit_config: Option<&Path>,
    user_config: Option<&Path>,
    home: &Path,
) -> Result<StoreConfig, ConfigError> {
    let mut merged = StoreConfig::default();

    if let Some(path) = user_config.filter(|path| path.exists()) {
        merge_layer(&mut merged, load_config_layer(path)?, home)?;
    }

    if let Some(path) = find_nearest_project_config(cwd) {
        merge_layer(&mut merged, load_config_layer(&path)?, home)?;
    }

    if let Some(path) = explicit_config.filter(|path| path.exists()) {
        merge_layer(&mut merged, load_config_layer(path)?, home)?;
    }

    validate(&merged)?;
    Ok(merged)
}

pub fn find_nearest_project_config(start: &Path) -> Option<PathBuf> {
    for dir in start.ancestors() {
        let candidate = dir.join(PROJECT_CONFIG_FILE);
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    None
}

pub fn load_config_file(path: &Path, home: &Path) -> Result<StoreConfig, ConfigError> {
    let mut config = StoreConfig::default();
    merge_layer(&mut config, load_config_layer(path)?, home)?;
    validate(&config)?;
    Ok(config)
}

pub fn default_config_yaml() -> String {
    format!(
        r#"database: ~/.variant-store/variants.sqlite
page_size: {PAGE_SIZE_DEFAULT}
fetch_batch_size: {FETCH_BATCH_SIZE_DEFAULT}
lease_ttl_secs: {LEASE_TTL_SECS_DEFAULT}
busy_timeout_ms: {BUSY_TIMEOUT_MS_DEFAULT}
"#
    )
}

pub fn expand_tilde(path: &str, home: &Path) -> PathBuf {
    if path == "~" {
        return home.to_path_buf();
    }
    if let Some(rest) = path.strip_prefix("~/") {
        return home.join(rest);
    }
    PathBuf::from(path)
}

fn load_config_layer(path: &Path) -> Result<RawConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    parse_config_layer(&content)
}

fn parse_config_layer(content: &str) -> Result<RawConfig, ConfigError> {
    if content.trim().is_empty() {
        return Ok(RawConfig::default());
    }
    Ok(serde_yaml::from_str(content)?)
}

fn merge_layer(merged: &mut StoreConfig, layer: RawConfig, home: &Path) -> Result<(), ConfigError> {
    if let Some(database) = layer.database {
        let database = database.trim();
        if database.is_empty() {
            return Err(ConfigError::Invalid {
                key: "database",
                reason: "must not be empty".to_string(),
            });
        }
        merged.database = Some(expand_tilde(database, home));
    }
    if let Some(page_size) = layer.page_size {
        merged.page_size = page_size;
    }
    if let Some(fetch_batch_size) = layer.fetch_batch_size {
        merged.fetch_batch_size = fetch_batch_size;
    }
    if let Some(lease_ttl_secs) = layer.lease_ttl_secs {
        merged.lease_ttl_secs = lease_ttl_secs;
    }
    if let Some(busy_timeout_ms) = layer.busy_timeout_ms {
        merged.busy_timeout_ms = busy_timeout_ms;
    }
    Ok(())
}

fn validate(config: &StoreConfig) -> Result<(), ConfigError> {
    if config.page_size == 0 {
        return Err(ConfigError::Invalid {
            key: "page_size",
            reason: "must be at least 1".to_string(),
        });
    }
    if config.fetch_batch_size == 0 {
        return Err(ConfigError::Invalid {
            key: "fetch_batch_size",
            reason: "must be at least 1".to_string(),
        });
    }
    if config.lease_ttl_secs <= 0 {
        return Err(ConfigError::Invalid {
            key: "lease_ttl_secs",
            reason: "must be positive".to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{
        ConfigError, PROJECT_CONFIG_FILE, StoreConfig, default_config_yaml, expand_tilde,
        load_config_file, load_effective_config,
    };
    use std::path::Path;

    #[test]
    fn parses_every_key() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.yml");
        std::fs::write(
            &path,
            r#"database: ~/data/variants.sqlite
page_size: 25
fetch_batch_size: 100
lease_ttl_secs: 60
busy_timeout_ms: 250
"#,
        )
        .expect("write config");

        let parsed = load_config_file(&path, Path::new("/home/tester")).expect("parse config");
        assert_eq!(
            parsed,
            StoreConfig {
                database: Some("/home/tester/data/variants.sqlite".into()),
                page_size: 25,
                fetch_batch_size: 100,
                lease_ttl_secs: 60,
                busy_timeout_ms: 250,
            }
        );
    }

    #[test]
    fn default_yaml_parses_to_defaults_plus_database() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.yml");
        std::fs::write(&path, default_config_yaml()).expect("write default");

        let parsed = load_config_file(&path, Path::new("/home/tester")).expect("parse default");
        assert_eq!(
            parsed.database.as_deref(),
            Some(Path::new("/home/tester/.variant-store/variants.sqlite"))
        );
        assert_eq!(
            StoreConfig {
                database: None,
                ..parsed
            },
            StoreConfig::default()
        );
    }

    #[test]
    fn expands_tilde_paths() {
        let expanded = expand_tilde("~/variants.sqlite", Path::new("/home/tester"));
        assert_eq!(expanded, Path::new("/home/tester/variants.sqlite"));
        assert_eq!(expand_tilde("/abs/db", Path::new("/home/tester")), Path::new("/abs/db"));
    }

    #[test]
    fn rejects_zero_page_size_and_unknown_keys() {
        let dir = tempfile::tempdir().expect("tempdir");
        let zero = dir.path().join("zero.yml");
        std::fs::write(&zero, "page_size: 0\n").expect("write zero");
        let err = load_config_file(&zero, dir.path()).expect_err("zero page size");
        assert!(matches!(err, ConfigError::Invalid { key: "page_size", .. }));

        let unknown = dir.path().join("unknown.yml");
        std::fs::write(&unknown, "pagesize: 5\n").expect("write unknown");
        let err = load_config_file(&unknown, dir.path()).expect_err("unknown key");
        assert!(matches!(err, ConfigError::Yaml(_)));
    }

    #[test]
    fn layers_override_per_key_with_nearest_project_config() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path();
        let repo = root.join("workspace/repo");
        std::fs::create_dir_all(&repo).expect("repo dir");
        std::fs::create_dir_all(root.join("home/.variant-store")).expect("home config dir");

        let user_cfg = root.join("home/.variant-store/config.yml");
        std::fs::write(&user_cfg, "database: /shared/user.sqlite\npage_size: 50\n")
            .expect("write user config");
        std::fs::write(root.join(PROJECT_CONFIG_FILE), "page_size: 99\n")
            .expect("write root project config");
        std::fs::write(
            root.join("workspace").join(PROJECT_CONFIG_FILE),
            "fetch_batch_size: 64\n",
        )
        .expect("write nearest project config");
        let explicit = repo.join("explicit.yml");
        std::fs::write(&explicit, "database: /shared/explicit.sqlite\n")
            .expect("write explicit config");

        let merged = load_effective_config(&repo, Some(&explicit), Some(&user_cfg), root)
            .expect("merge config");
        assert_eq!(
            merged.database.as_deref(),
            Some(Path::new("/shared/explicit.sqlite"))
        );
        assert_eq!(merged.page_size, 50);
        assert_eq!(merged.fetch_batch_size, 64);
    }

    #[test]
    fn missing_layers_yield_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let merged = load_effective_config(
            dir.path(),
            Some(&dir.path().join("absent.yml")),
            None,
            dir.path(),
        )
        .expect("defaults");
        assert_eq!(merged, StoreConfig::default());
    }
}
