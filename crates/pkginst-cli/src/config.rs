use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use pkginst::{InstallConfig, RepositoryPolicy};

pub const CONFIG_FILE: &str = "pkginst.toml";

/// The pkginst configuration file structure (pkginst.toml)
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct PkginstConfig {
    /// Installer settings
    pub installer: InstallerSection,
}

/// `[installer]` table
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct InstallerSection {
    /// Directory receiving packages, relative to the application root
    pub packages_dir: Option<String>,

    /// Host manifest file name
    pub manifest_file: Option<String>,

    /// Composer executable
    pub composer_bin: Option<String>,

    /// Extra arguments for `composer update`
    pub composer_args: Vec<String>,

    /// Seconds before composer is killed (0 = no limit)
    pub process_timeout: Option<u64>,

    /// Constraint written for new requirements
    pub default_constraint: Option<String>,

    /// Skip path repositories whose url is already declared
    pub dedupe_repositories: Option<bool>,

    /// Undo the installation when composer fails
    pub rollback_on_failure: Option<bool>,
}

impl PkginstConfig {
    /// Load configuration from pkginst.toml, searching upward from the given directory
    pub fn load(start_dir: &Path) -> Result<Option<Self>> {
        let mut current = start_dir.to_path_buf();

        loop {
            let config_path = current.join(CONFIG_FILE);

            if config_path.exists() {
                let content = std::fs::read_to_string(&config_path)
                    .with_context(|| format!("Failed to read {}", config_path.display()))?;
                let config: PkginstConfig = toml::from_str(&content)
                    .with_context(|| format!("Failed to parse {}", config_path.display()))?;
                log::debug!("Loaded {}", config_path.display());
                return Ok(Some(config));
            }

            if !current.pop() {
                return Ok(None);
            }
        }
    }

    /// Apply `PKGINST_*` overrides from the process environment
    pub fn apply_env(&mut self) {
        self.apply_env_with(|key| std::env::var(key).ok());
    }

    pub fn apply_env_with<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());
        let section = &mut self.installer;

        if let Some(dir) = get("PKGINST_PACKAGES_DIR") {
            section.packages_dir = Some(dir);
        }
        if let Some(bin) = get("PKGINST_COMPOSER_BIN") {
            section.composer_bin = Some(bin);
        }
        if let Some(timeout) = get("PKGINST_PROCESS_TIMEOUT") {
            match timeout.parse() {
                Ok(secs) => section.process_timeout = Some(secs),
                Err(_) => log::warn!("Ignoring invalid PKGINST_PROCESS_TIMEOUT '{}'", timeout),
            }
        }
    }

    /// Build library settings rooted at `base_dir`
    pub fn to_install_config(&self, base_dir: &Path) -> InstallConfig {
        let section = &self.installer;
        let mut config = InstallConfig::with_base_dir(base_dir);

        if let Some(dir) = &section.packages_dir {
            config.packages_dir = PathBuf::from(dir);
        }
        if let Some(file) = &section.manifest_file {
            config.manifest_file = PathBuf::from(file);
        }
        if let Some(bin) = &section.composer_bin {
            config.composer_binary = PathBuf::from(bin);
        }
        if let Some(constraint) = &section.default_constraint {
            config.default_constraint = constraint.clone();
        }
        config.composer_args = section.composer_args.clone();
        config.process_timeout = section
            .process_timeout
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs);
        if section.dedupe_repositories == Some(true) {
            config.repository_policy = RepositoryPolicy::DeduplicateByUrl;
        }
        config.rollback_on_tool_failure = section.rollback_on_failure.unwrap_or(false);

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_parse_empty_config() {
        let config: PkginstConfig = toml::from_str("").unwrap();
        assert!(config.installer.packages_dir.is_none());
        assert!(config.installer.composer_args.is_empty());
    }

    #[test]
    fn test_parse_installer_section() {
        let toml = r#"
[installer]
packages-dir = "modules"
composer-bin = "/usr/local/bin/composer"
composer-args = ["--no-interaction", "--no-progress"]
process-timeout = 600
dedupe-repositories = true
"#;
        let config: PkginstConfig = toml::from_str(toml).unwrap();
        let install = config.to_install_config(Path::new("/srv/app"));

        assert_eq!(install.packages_root(), PathBuf::from("/srv/app/modules"));
        assert_eq!(install.composer_binary, PathBuf::from("/usr/local/bin/composer"));
        assert_eq!(install.composer_args, vec!["--no-interaction", "--no-progress"]);
        assert_eq!(install.process_timeout, Some(Duration::from_secs(600)));
        assert_eq!(install.repository_policy, RepositoryPolicy::DeduplicateByUrl);
        assert!(!install.rollback_on_tool_failure);
    }

    #[test]
    fn test_zero_timeout_disables_limit() {
        let config: PkginstConfig = toml::from_str("[installer]\nprocess-timeout = 0\n").unwrap();
        assert!(config.to_install_config(Path::new(".")).process_timeout.is_none());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = PkginstConfig::default();
        config.installer.packages_dir = Some("packages".to_string());

        let env: HashMap<&str, &str> = HashMap::from([
            ("PKGINST_PACKAGES_DIR", "vendor-local"),
            ("PKGINST_PROCESS_TIMEOUT", "not-a-number"),
            ("PKGINST_COMPOSER_BIN", ""),
        ]);
        config.apply_env_with(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.installer.packages_dir.as_deref(), Some("vendor-local"));
        assert!(config.installer.process_timeout.is_none());
        assert!(config.installer.composer_bin.is_none());
    }

    #[test]
    fn test_load_searches_upward() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join(CONFIG_FILE),
            "[installer]\npackages-dir = \"local\"\n",
        )
        .unwrap();
        let nested = temp.path().join("public/uploads");
        std::fs::create_dir_all(&nested).unwrap();

        let config = PkginstConfig::load(&nested).unwrap().unwrap();
        assert_eq!(config.installer.packages_dir.as_deref(), Some("local"));
    }

    #[test]
    fn test_load_rejects_invalid_toml() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join(CONFIG_FILE), "[installer\n").unwrap();
        assert!(PkginstConfig::load(temp.path()).is_err());
    }
}
