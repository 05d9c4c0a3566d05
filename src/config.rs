//! Configuration for benchgate.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (BENCHGATE_HOME, BENCHGATE_CANONICAL_BRANCH,
//!    BENCHGATE_WEBHOOK_URL)
//! 2. Config file (.benchgate/config.yaml)
//! 3. Defaults (~/.benchgate, canonical branch "main")
//!
//! Config file discovery:
//! - Searches current directory and parents for .benchgate/config.yaml
//! - `paths.home` is relative to the .benchgate/ directory

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::adapters::TelegramConfig;
use crate::core::NotifyCondition;

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

const DEFAULT_CANONICAL_BRANCH: &str = "main";

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub paths: PathsConfig,
    /// Branch whose failures are reported and whose artifacts are the fallback
    pub canonical_branch: Option<String>,
    #[serde(default)]
    pub notify: NotifyConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// Engine state directory (relative to .benchgate/)
    pub home: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NotifyConfig {
    pub condition: Option<NotifyCondition>,
    pub telegram: Option<TelegramConfig>,
    pub webhook: Option<WebhookConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookConfig {
    pub url: String,
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Absolute path to benchgate home (run logs, artifacts, active runs)
    pub home: PathBuf,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    /// Canonical branch name
    pub canonical_branch: String,
    /// Notification settings
    pub notify: NotifySettings,
}

#[derive(Debug, Clone, Default)]
pub struct NotifySettings {
    pub condition: NotifyCondition,
    pub telegram: Option<TelegramConfig>,
    pub webhook_url: Option<String>,
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(".benchgate").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to the config directory
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

/// Merge env, file and defaults. `env` looks up an environment variable.
fn resolve(
    config_file: Option<PathBuf>,
    file: ConfigFile,
    default_home: PathBuf,
    env: impl Fn(&str) -> Option<String>,
) -> ResolvedConfig {
    let home = if let Some(env_home) = env("BENCHGATE_HOME") {
        PathBuf::from(env_home)
    } else if let (Some(config_path), Some(home_path)) = (&config_file, &file.paths.home) {
        let config_dir = config_path.parent().unwrap_or(Path::new("."));
        resolve_path(config_dir, home_path)
    } else {
        default_home
    };

    let canonical_branch = env("BENCHGATE_CANONICAL_BRANCH")
        .or(file.canonical_branch)
        .unwrap_or_else(|| DEFAULT_CANONICAL_BRANCH.to_string());

    let webhook_url = env("BENCHGATE_WEBHOOK_URL").or(file.notify.webhook.map(|w| w.url));

    ResolvedConfig {
        home,
        config_file,
        canonical_branch,
        notify: NotifySettings {
            condition: file.notify.condition.unwrap_or_default(),
            telegram: file.notify.telegram,
            webhook_url,
        },
    }
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(".benchgate");

    let config_file = find_config_file();
    let file = match &config_file {
        Some(path) => load_config_file(path)?,
        None => ConfigFile::default(),
    };

    Ok(resolve(config_file, file, default_home, |key| {
        std::env::var(key).ok()
    }))
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| e.to_string()));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

/// Force reload configuration (bypasses the cache)
pub fn reload_config() -> Result<ResolvedConfig> {
    load_config()
}

// ============================================================================
// Convenience functions
// ============================================================================

/// Get the benchgate home directory
pub fn benchgate_home() -> Result<PathBuf> {
    Ok(config()?.home.clone())
}

/// Get the runs directory ($BENCHGATE_HOME/runs)
pub fn runs_dir() -> Result<PathBuf> {
    Ok(config()?.home.join("runs"))
}

/// Get the artifact store directory ($BENCHGATE_HOME/artifacts)
pub fn artifacts_dir() -> Result<PathBuf> {
    Ok(config()?.home.join("artifacts"))
}

/// Get the active-runs registry directory ($BENCHGATE_HOME/active)
pub fn active_dir() -> Result<PathBuf> {
    Ok(config()?.home.join("active"))
}

/// Canonical branch, falling back to "main" when configuration is unreadable
pub fn canonical_branch() -> String {
    config()
        .map(|c| c.canonical_branch.clone())
        .unwrap_or_else(|_| DEFAULT_CANONICAL_BRANCH.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::TempDir;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_defaults_without_file() {
        let config = resolve(None, ConfigFile::default(), PathBuf::from("/home/u/.benchgate"), no_env);

        assert_eq!(config.home, PathBuf::from("/home/u/.benchgate"));
        assert_eq!(config.canonical_branch, "main");
        assert_eq!(config.notify.condition, NotifyCondition::CanonicalBranchFailure);
        assert!(config.notify.webhook_url.is_none());
        assert!(config.config_file.is_none());
    }

    #[test]
    fn test_config_file_parsing() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join(".benchgate");
        std::fs::create_dir_all(&dir).unwrap();

        let config_path = dir.join("config.yaml");
        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(
            file,
            r#"
version: "1.0"
paths:
  home: ./state
canonical_branch: trunk
notify:
  condition: any_failure
  telegram:
    bot_token: abc
    chat_id: "42"
  webhook:
    url: https://hooks.example.com/x
"#
        )
        .unwrap();

        let parsed = load_config_file(&config_path).unwrap();
        assert_eq!(parsed.version.as_deref(), Some("1.0"));
        assert_eq!(parsed.canonical_branch.as_deref(), Some("trunk"));

        let config = resolve(Some(config_path), parsed, PathBuf::from("/unused"), no_env);
        assert_eq!(config.home, dir.join("state"));
        assert_eq!(config.canonical_branch, "trunk");
        assert_eq!(config.notify.condition, NotifyCondition::AnyFailure);
        assert_eq!(config.notify.telegram.unwrap().chat_id, "42");
        assert_eq!(
            config.notify.webhook_url.as_deref(),
            Some("https://hooks.example.com/x")
        );
    }

    #[test]
    fn test_env_overrides_file() {
        let env: HashMap<&str, &str> = [
            ("BENCHGATE_HOME", "/srv/benchgate"),
            ("BENCHGATE_CANONICAL_BRANCH", "release"),
            ("BENCHGATE_WEBHOOK_URL", "http://localhost/hook"),
        ]
        .into_iter()
        .collect();

        let file = ConfigFile {
            canonical_branch: Some("trunk".to_string()),
            paths: PathsConfig {
                home: Some("./state".to_string()),
            },
            ..Default::default()
        };

        let config = resolve(
            Some(PathBuf::from("/project/.benchgate/config.yaml")),
            file,
            PathBuf::from("/unused"),
            |k| env.get(k).map(|v| v.to_string()),
        );

        assert_eq!(config.home, PathBuf::from("/srv/benchgate"));
        assert_eq!(config.canonical_branch, "release");
        assert_eq!(config.notify.webhook_url.as_deref(), Some("http://localhost/hook"));
    }

    #[test]
    fn test_resolve_relative_path() {
        let base = PathBuf::from("/home/user/project");

        assert_eq!(
            resolve_path(&base, "./subdir"),
            PathBuf::from("/home/user/project/subdir")
        );
        assert_eq!(
            resolve_path(&base, "/absolute/path"),
            PathBuf::from("/absolute/path")
        );
    }
}
