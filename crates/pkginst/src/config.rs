//! Installer settings.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::host_manifest::RepositoryPolicy;
use crate::manifest::MANIFEST_FILE;
use crate::upload::ZIP_MEDIA_TYPE;

/// Default directory, relative to the application root, that receives uploaded packages.
pub const DEFAULT_PACKAGES_DIR: &str = "packages";

/// Configuration for one installation run.
#[derive(Debug, Clone)]
pub struct InstallConfig {
    /// Application root; holds the host composer.json and is the working
    /// directory of the dependency resolver
    pub base_dir: PathBuf,
    /// Packages directory, relative to `base_dir` unless absolute
    pub packages_dir: PathBuf,
    /// Host manifest file name, relative to `base_dir`
    pub manifest_file: PathBuf,
    /// Media type uploads must declare
    pub expected_media_type: String,
    /// Constraint written into `require` for new packages
    pub default_constraint: String,
    pub repository_policy: RepositoryPolicy,
    /// Composer executable
    pub composer_binary: PathBuf,
    /// Extra arguments placed after `update <package>`
    pub composer_args: Vec<String>,
    /// Kill the resolver after this long; `None` waits forever
    pub process_timeout: Option<Duration>,
    /// Run the resolver after patching the manifest
    pub run_update: bool,
    /// Stop after the collision check without touching the filesystem
    pub dry_run: bool,
    /// Undo extraction and manifest changes when the resolver fails
    pub rollback_on_tool_failure: bool,
}

impl Default for InstallConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("."),
            packages_dir: PathBuf::from(DEFAULT_PACKAGES_DIR),
            manifest_file: PathBuf::from(MANIFEST_FILE),
            expected_media_type: ZIP_MEDIA_TYPE.to_string(),
            default_constraint: "*".to_string(),
            repository_policy: RepositoryPolicy::default(),
            composer_binary: PathBuf::from("composer"),
            composer_args: Vec::new(),
            process_timeout: None,
            run_update: true,
            dry_run: false,
            rollback_on_tool_failure: false,
        }
    }
}

impl InstallConfig {
    /// Defaults rooted at the given application directory.
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            ..Default::default()
        }
    }

    /// Absolute (or base-relative) path of the host composer.json.
    pub fn manifest_path(&self) -> PathBuf {
        self.base_dir.join(&self.manifest_file)
    }

    /// Directory receiving `<vendor>/<name>` trees.
    pub fn packages_root(&self) -> PathBuf {
        self.base_dir.join(self.packages_dir_trimmed())
    }

    /// `packages_dir` without trailing separators.
    pub fn packages_dir_trimmed(&self) -> PathBuf {
        let raw = self.packages_dir.to_string_lossy();
        let trimmed = raw.trim_end_matches(['/', '\\']);
        if trimmed.is_empty() {
            // "/" stays the filesystem root; "" means the application root itself
            if raw.is_empty() {
                PathBuf::from(".")
            } else {
                PathBuf::from(&raw[..1])
            }
        } else {
            Path::new(trimmed).to_path_buf()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = InstallConfig::default();
        assert_eq!(config.packages_dir, PathBuf::from("packages"));
        assert_eq!(config.manifest_file, PathBuf::from("composer.json"));
        assert_eq!(config.expected_media_type, "application/zip");
        assert_eq!(config.default_constraint, "*");
        assert_eq!(config.repository_policy, RepositoryPolicy::Append);
        assert!(config.run_update);
        assert!(!config.dry_run);
        assert!(!config.rollback_on_tool_failure);
        assert!(config.process_timeout.is_none());
    }

    #[test]
    fn test_paths_from_base_dir() {
        let config = InstallConfig::with_base_dir("/srv/app");
        assert_eq!(config.manifest_path(), PathBuf::from("/srv/app/composer.json"));
        assert_eq!(config.packages_root(), PathBuf::from("/srv/app/packages"));
    }

    #[test]
    fn test_packages_dir_trailing_separator() {
        let mut config = InstallConfig::with_base_dir("/srv/app");
        config.packages_dir = PathBuf::from("local/packages/");
        assert_eq!(config.packages_dir_trimmed(), PathBuf::from("local/packages"));
        assert_eq!(config.packages_root(), PathBuf::from("/srv/app/local/packages"));

        config.packages_dir = PathBuf::from("/opt/packages//");
        assert_eq!(config.packages_root(), PathBuf::from("/opt/packages"));
    }
}
