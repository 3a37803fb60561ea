//! Configuration for Sideloader.
//!
//! Settings are read from `.sideloader/sideloader.toml` in the project
//! directory, then overridden by environment variables, then by CLI flags.
//!
//! # Configuration File Format
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 8000
//! public_url = "https://deploy.example.com"
//!
//! [database]
//! path = "sideloader.db"
//!
//! [deploy]
//! command = "./scripts/deploy.sh"
//! timeout_secs = 1800
//!
//! [scheduler]
//! sweep_interval_secs = 30
//! claim_lease_secs = 120
//! ```
//!
//! Relative database paths resolve against the `.sideloader` directory.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_DIR: &str = ".sideloader";
pub const CONFIG_FILE: &str = "sideloader.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub host: String,
    pub port: u16,
    /// Base URL used when rendering sign links. Defaults to `http://host:port`.
    pub public_url: Option<String>,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            public_url: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSection {
    pub path: PathBuf,
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            path: PathBuf::from("sideloader.db"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeploySection {
    /// Shell command run for each release. Unset means dry-run.
    pub command: Option<String>,
    pub timeout_secs: u64,
}

impl Default for DeploySection {
    fn default() -> Self {
        Self {
            command: None,
            timeout_secs: 1800,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSection {
    pub sweep_interval_secs: u64,
    /// How long a dispatcher may go without a heartbeat before other
    /// dispatchers take over its claimed releases.
    pub claim_lease_secs: u64,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 30,
            claim_lease_secs: 120,
        }
    }
}

/// Contents of `sideloader.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SideloaderToml {
    pub server: ServerSection,
    pub database: DatabaseSection,
    pub deploy: DeploySection,
    pub scheduler: SchedulerSection,
}

impl SideloaderToml {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse sideloader.toml")
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).context("Failed to serialize sideloader.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }
}

/// Resolved runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub config_dir: PathBuf,
    pub toml: SideloaderToml,
}

impl Config {
    /// Load from `<project_dir>/.sideloader/sideloader.toml` (defaults when
    /// missing) and apply environment overrides.
    pub fn load(project_dir: &Path) -> Result<Self> {
        Self::load_with_env(project_dir, |key| std::env::var(key).ok())
    }

    pub fn load_with_env<F>(project_dir: &Path, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let config_dir = project_dir.join(CONFIG_DIR);
        let config_path = config_dir.join(CONFIG_FILE);
        let mut toml = if config_path.exists() {
            SideloaderToml::load(&config_path)?
        } else {
            SideloaderToml::default()
        };

        if let Some(path) = env("SIDELOADER_DB_PATH") {
            toml.database.path = PathBuf::from(path);
        }
        if let Some(cmd) = env("SIDELOADER_DEPLOY_CMD") {
            toml.deploy.command = Some(cmd).filter(|c| !c.trim().is_empty());
        }
        if let Some(url) = env("SIDELOADER_PUBLIC_URL") {
            toml.server.public_url = Some(url);
        }

        Ok(Self { config_dir, toml })
    }

    pub fn config_path(&self) -> PathBuf {
        self.config_dir.join(CONFIG_FILE)
    }

    pub fn db_path(&self) -> PathBuf {
        if self.toml.database.path.is_absolute() {
            self.toml.database.path.clone()
        } else {
            self.config_dir.join(&self.toml.database.path)
        }
    }

    pub fn public_url(&self) -> String {
        let url = match &self.toml.server.public_url {
            Some(url) => url.clone(),
            None => format!("http://{}:{}", self.toml.server.host, self.toml.server.port),
        };
        url.trim_end_matches('/').to_string()
    }

    pub fn deploy_timeout(&self) -> Duration {
        Duration::from_secs(self.toml.deploy.timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.toml.scheduler.sweep_interval_secs.max(1))
    }

    /// Claim lease, never shorter than two sweep intervals so a live
    /// dispatcher always heartbeats before its lease runs out.
    pub fn claim_lease(&self) -> Duration {
        let floor = self.sweep_interval().as_secs() * 2;
        Duration::from_secs(self.toml.scheduler.claim_lease_secs.max(floor))
    }

    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(&self.config_dir)
            .context("Failed to create .sideloader directory")?;
        if let Some(parent) = self.db_path().parent() {
            std::fs::create_dir_all(parent).context("Failed to create database directory")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::fs;
    use tempfile::tempdir;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_defaults_without_file() {
        let dir = tempdir().unwrap();
        let config = Config::load_with_env(dir.path(), no_env).unwrap();
        assert_eq!(config.toml, SideloaderToml::default());
        assert_eq!(config.db_path(), dir.path().join(".sideloader/sideloader.db"));
        assert_eq!(config.public_url(), "http://127.0.0.1:8000");
        assert_eq!(config.sweep_interval(), Duration::from_secs(30));
        assert_eq!(config.claim_lease(), Duration::from_secs(120));
        assert_eq!(config.toml.deploy.command, None);
    }

    #[test]
    fn test_parse_partial_file() {
        let toml = SideloaderToml::parse(
            r#"
[server]
port = 9000
public_url = "https://deploy.example.com/"

[deploy]
command = "make deploy"
"#,
        )
        .unwrap();
        assert_eq!(toml.server.port, 9000);
        assert_eq!(toml.server.host, "127.0.0.1");
        assert_eq!(toml.deploy.command.as_deref(), Some("make deploy"));
        assert_eq!(toml.deploy.timeout_secs, 1800);
        assert_eq!(toml.scheduler.sweep_interval_secs, 30);
    }

    #[test]
    fn test_parse_invalid_toml_errors() {
        let err = SideloaderToml::parse("[server\nport = ").unwrap_err();
        assert!(err.to_string().contains("sideloader.toml"));
    }

    #[test]
    fn test_file_values() {
        let dir = tempdir().unwrap();
        let config_dir = dir.path().join(CONFIG_DIR);
        fs::create_dir_all(&config_dir).unwrap();
        fs::write(
            config_dir.join(CONFIG_FILE),
            "[server]\npublic_url = \"https://deploy.example.com/\"\n[database]\npath = \"/var/lib/sideloader.db\"\n",
        )
        .unwrap();

        let config = Config::load_with_env(dir.path(), no_env).unwrap();
        assert_eq!(config.db_path(), PathBuf::from("/var/lib/sideloader.db"));
        assert_eq!(config.public_url(), "https://deploy.example.com");
    }

    #[test]
    fn test_env_overrides_file() {
        let dir = tempdir().unwrap();
        let env: HashMap<&str, &str> = [
            ("SIDELOADER_DB_PATH", "/tmp/other.db"),
            ("SIDELOADER_DEPLOY_CMD", "./deploy.sh"),
            ("SIDELOADER_PUBLIC_URL", "http://sl.internal"),
        ]
        .into_iter()
        .collect();
        let config =
            Config::load_with_env(dir.path(), |k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.db_path(), PathBuf::from("/tmp/other.db"));
        assert_eq!(config.toml.deploy.command.as_deref(), Some("./deploy.sh"));
        assert_eq!(config.public_url(), "http://sl.internal");
    }

    #[test]
    fn test_blank_deploy_cmd_env_means_dry_run() {
        let dir = tempdir().unwrap();
        let config = Config::load_with_env(dir.path(), |k| {
            (k == "SIDELOADER_DEPLOY_CMD").then(|| "  ".to_string())
        })
        .unwrap();
        assert_eq!(config.toml.deploy.command, None);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        let mut toml = SideloaderToml::default();
        toml.scheduler.sweep_interval_secs = 5;
        toml.save(&path).unwrap();
        assert_eq!(SideloaderToml::load(&path).unwrap(), toml);
    }

    #[test]
    fn test_ensure_directories() {
        let dir = tempdir().unwrap();
        let config = Config::load_with_env(dir.path(), no_env).unwrap();
        config.ensure_directories().unwrap();
        assert!(dir.path().join(".sideloader").is_dir());
    }

    #[test]
    fn test_claim_lease_covers_two_sweeps() {
        let mut toml = SideloaderToml::default();
        toml.scheduler.sweep_interval_secs = 90;
        toml.scheduler.claim_lease_secs = 60;
        let config = Config {
            config_dir: PathBuf::from(CONFIG_DIR),
            toml,
        };
        assert_eq!(config.claim_lease(), Duration::from_secs(180));
    }
}
