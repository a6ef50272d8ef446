//! Configuration loader using figment.
//!
//! # Feature Flags
//!
//! - `toml-config` *(default)*: `tether.toml`, `config.toml`
//! - `yaml-config`: `tether.yaml`, `tether.yml`, `config.yaml`, `config.yml`
//!
//! # Configuration Priority (lowest to highest)
//!
//! 1. Built-in defaults
//! 2. Profile-specific config file (`tether.{profile}.toml`)
//! 3. Main config file (`tether.toml`)
//! 4. Environment variables (`TETHER_*`)
//! 5. Programmatic overrides
//!
//! # Environment Variable Mapping
//!
//! Variables use the `TETHER_` prefix with `__` between nested keys:
//!
//! - `TETHER_SERVER__PORT=8080` → `server.port = 8080`
//! - `TETHER_LOGGING__LEVEL=debug` → `logging.level = "debug"`
//! - `TETHER_SERVER__ACCESS_TOKEN=xxx` → `server.access_token = "xxx"`
//!
//! # Example
//!
//! ```rust,ignore
//! use tether_runtime::config::ConfigLoader;
//!
//! let config = ConfigLoader::new().profile("production").load()?;
//! ```

use std::path::{Path, PathBuf};

use figment::Figment;
#[cfg(any(feature = "yaml-config", feature = "toml-config"))]
use figment::providers::Format;
#[cfg(feature = "toml-config")]
use figment::providers::Toml;
#[cfg(feature = "yaml-config")]
use figment::providers::Yaml;
use figment::providers::{Env, Serialized};
use tracing::{debug, info, trace, warn};

use super::error::{ConfigError, ConfigResult};
use super::schema::TetherConfig;

const ENV_PREFIX: &str = "TETHER_";
const PROFILE_VAR: &str = "TETHER_PROFILE";

/// Configuration profile for environment-specific settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Profile {
    #[default]
    Development,
    Production,
    Custom(String),
}

impl Profile {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Custom(name) => name,
        }
    }

    /// Reads `TETHER_PROFILE`, defaulting to development.
    pub fn from_env() -> Self {
        std::env::var(PROFILE_VAR)
            .map(|p| Self::parse(&p))
            .unwrap_or_default()
    }

    fn parse(name: &str) -> Self {
        match name.to_lowercase().as_str() {
            "production" | "prod" => Self::Production,
            "development" | "dev" => Self::Development,
            other => Self::Custom(other.to_string()),
        }
    }
}

impl std::fmt::Display for Profile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Multi-source configuration loader.
pub struct ConfigLoader {
    /// Programmatic overrides, merged last.
    overrides: Figment,
    profile: Profile,
    search_paths: Vec<PathBuf>,
    load_env: bool,
    /// Specific config file to load (overrides search).
    config_file: Option<PathBuf>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            overrides: Figment::new(),
            profile: Profile::from_env(),
            search_paths: Vec::new(),
            load_env: true,
            config_file: None,
        }
    }

    pub fn profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = Profile::parse(&profile.into());
        self
    }

    /// Adds a directory to search for configuration files.
    ///
    /// When no search path is given, the current directory and the user config directory
    /// are searched.
    pub fn search_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.search_paths.push(path.as_ref().to_path_buf());
        self
    }

    pub fn with_current_dir(self) -> Self {
        match std::env::current_dir() {
            Ok(cwd) => self.search_path(cwd),
            Err(_) => self,
        }
    }

    pub fn with_user_config_dir(self) -> Self {
        match dirs::config_dir() {
            Some(config_dir) => self.search_path(config_dir.join("tether")),
            None => self,
        }
    }

    /// Loads exactly this file instead of searching.
    pub fn file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_file = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn with_env(mut self) -> Self {
        self.load_env = true;
        self
    }

    pub fn without_env(mut self) -> Self {
        self.load_env = false;
        self
    }

    /// Merges a complete configuration on top of every other source.
    pub fn merge(mut self, config: TetherConfig) -> Self {
        self.overrides = self.overrides.merge(Serialized::defaults(config));
        self
    }

    /// Overrides a single key, e.g. `set("server.port", 8080)`.
    pub fn set<V: serde::Serialize>(mut self, key: &str, value: V) -> Self {
        self.overrides = self.overrides.merge(Serialized::default(key, value));
        self
    }

    /// Loads, extracts and validates the configuration.
    pub fn load(self) -> ConfigResult<TetherConfig> {
        let profile = self.profile.clone();
        let figment = self.build_figment()?;

        let config: TetherConfig = figment.extract()?;
        config.validate()?;

        debug!(
            profile = %profile,
            logging_level = %config.logging.level,
            bind = %config.server.bind_addr(),
            "Configuration loaded successfully"
        );

        Ok(config)
    }

    fn build_figment(mut self) -> ConfigResult<Figment> {
        let mut figment = Figment::from(Serialized::defaults(TetherConfig::default()));

        if let Some(path) = self.config_file.take() {
            if !path.exists() {
                return Err(ConfigError::FileNotFound(path));
            }
            info!(path = %path.display(), "Loading configuration file");
            figment = Self::merge_config_file(figment, &path)?;
        } else {
            figment = self.load_config_files(figment);
        }

        if self.load_env {
            trace!("Loading environment variables with {ENV_PREFIX} prefix");
            figment = figment.merge(
                Env::prefixed(ENV_PREFIX)
                    .ignore(&["PROFILE"])
                    .split("__"),
            );
        }

        let overrides = std::mem::take(&mut self.overrides);
        Ok(figment.merge(overrides))
    }

    /// Merges a single file, dispatching on its extension.
    fn merge_config_file(figment: Figment, path: &Path) -> ConfigResult<Figment> {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        match ext {
            #[cfg(feature = "toml-config")]
            "toml" => Ok(figment.merge(Toml::file(path))),
            #[cfg(feature = "yaml-config")]
            "yaml" | "yml" => Ok(figment.merge(Yaml::file(path))),
            _ => Err(ConfigError::ParseError(format!(
                "Unsupported or disabled configuration file format: .{ext}"
            ))),
        }
    }

    fn resolve_search_paths(&self) -> Vec<PathBuf> {
        if !self.search_paths.is_empty() {
            return self.search_paths.clone();
        }
        let mut paths = Vec::new();
        if let Ok(cwd) = std::env::current_dir() {
            paths.push(cwd);
        }
        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("tether"));
        }
        paths
    }

    /// Searches `search_paths × base_names`; for each candidate the profile variant is merged
    /// first, then the base file. Stops at the first base file found.
    #[cfg(any(feature = "toml-config", feature = "yaml-config"))]
    fn load_format_files<F>(
        &self,
        mut figment: Figment,
        search_paths: &[PathBuf],
        base_names: &[&str],
        merge_fn: F,
    ) -> (Figment, bool)
    where
        F: Fn(Figment, &Path) -> Figment,
    {
        for search_path in search_paths {
            for base_name in base_names {
                let Some((stem, ext)) = base_name.rsplit_once('.') else {
                    continue;
                };

                let profile_path =
                    search_path.join(format!("{stem}.{}.{ext}", self.profile.as_str()));
                if profile_path.exists() {
                    debug!(path = %profile_path.display(), "Loading profile-specific config");
                    figment = merge_fn(figment, &profile_path);
                }

                let base_path = search_path.join(base_name);
                if base_path.exists() {
                    info!(path = %base_path.display(), "Loading configuration file");
                    return (merge_fn(figment, &base_path), true);
                }
            }
        }
        (figment, false)
    }

    #[allow(unused_mut)]
    fn load_config_files(&self, mut figment: Figment) -> Figment {
        let search_paths = self.resolve_search_paths();
        let mut found = false;

        #[cfg(feature = "toml-config")]
        {
            let (f, ok) = self.load_format_files(
                figment,
                &search_paths,
                &["tether.toml", "config.toml"],
                |fig, path| fig.merge(Toml::file(path)),
            );
            figment = f;
            found |= ok;
        }

        #[cfg(feature = "yaml-config")]
        {
            let (f, ok) = self.load_format_files(
                figment,
                &search_paths,
                &["tether.yaml", "tether.yml", "config.yaml", "config.yml"],
                |fig, path| fig.merge(Yaml::file(path)),
            );
            figment = f;
            found |= ok;
        }

        if !found {
            warn!(paths = ?search_paths, "No configuration file found, using defaults");
        }
        figment
    }
}

/// Loads from the default locations with environment overrides.
pub fn load_config() -> ConfigResult<TetherConfig> {
    ConfigLoader::new().load()
}

/// Loads one specific file with environment overrides.
pub fn load_config_from_file<P: AsRef<Path>>(path: P) -> ConfigResult<TetherConfig> {
    ConfigLoader::new().file(path).load()
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogLevel;
    use figment::Jail;

    #[test]
    fn defaults_without_any_source() {
        Jail::expect_with(|jail| {
            let config = ConfigLoader::new()
                .search_path(jail.directory())
                .without_env()
                .load()
                .unwrap();

            assert_eq!(config, TetherConfig::default());
            Ok(())
        });
    }

    #[test]
    fn profile_names() {
        assert_eq!(Profile::parse("PROD"), Profile::Production);
        assert_eq!(Profile::parse("dev"), Profile::Development);
        assert_eq!(Profile::parse("staging").as_str(), "staging");
    }

    #[test]
    fn profile_from_env() {
        Jail::expect_with(|jail| {
            jail.set_env(PROFILE_VAR, "production");
            assert_eq!(Profile::from_env(), Profile::Production);
            Ok(())
        });
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let result = ConfigLoader::new()
            .file("/definitely/not/here/tether.toml")
            .without_env()
            .load();

        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[cfg(feature = "toml-config")]
    #[test]
    fn sources_are_layered_in_order() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "tether.toml",
                r#"
                [server]
                port = 9000
                access_token = "from-file"

                [bot]
                superusers = [1, 2]
                "#,
            )?;
            jail.create_file(
                "tether.production.toml",
                r#"
                [server]
                host = "127.0.0.1"
                port = 9100
                "#,
            )?;
            jail.set_env("TETHER_SERVER__ACCESS_TOKEN", "from-env");
            jail.set_env("TETHER_LOGGING__LEVEL", "debug");

            let config = ConfigLoader::new()
                .search_path(jail.directory())
                .profile("production")
                .set("api.timeout_secs", 3)
                .load()
                .unwrap();

            assert_eq!(config.server.host, "127.0.0.1");
            assert_eq!(config.server.port, 9000);
            assert_eq!(config.server.access_token.as_deref(), Some("from-env"));
            assert_eq!(config.bot.superusers, vec![1, 2]);
            assert_eq!(config.logging.level, LogLevel::Debug);
            assert_eq!(config.api.timeout_secs, 3);
            Ok(())
        });
    }

    #[cfg(feature = "toml-config")]
    #[test]
    fn invalid_values_are_rejected_on_load() {
        Jail::expect_with(|jail| {
            jail.create_file("tether.toml", "[connection]\nqueue_capacity = 0\n")?;

            let result = ConfigLoader::new()
                .search_path(jail.directory())
                .without_env()
                .load();

            assert!(matches!(result, Err(ConfigError::ZeroValue { .. })));
            Ok(())
        });
    }

    #[cfg(feature = "toml-config")]
    #[test]
    fn malformed_file_is_a_parse_error() {
        Jail::expect_with(|jail| {
            jail.create_file("tether.toml", "[server]\nport = \"not a number\"\n")?;

            let result = ConfigLoader::new()
                .file(jail.directory().join("tether.toml"))
                .without_env()
                .load();

            assert!(matches!(result, Err(ConfigError::ParseError(_))));
            Ok(())
        });
    }
}
