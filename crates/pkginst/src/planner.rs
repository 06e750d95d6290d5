//! Where a package goes on disk.

use std::path::{Path, PathBuf};

use crate::manifest::PackageIdentity;

/// Directories a package is installed into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallationTarget {
    /// `<packages_root>/<vendor>`
    pub vendor_dir: PathBuf,
    /// `<packages_root>/<vendor>/<name>`
    pub package_dir: PathBuf,
    /// Package directory relative to the application root, `/`-separated
    /// (e.g. `packages/acme/widget`); absolute when the packages root lies
    /// outside the application
    pub relative_package_dir: String,
}

impl InstallationTarget {
    /// Url of the path repository pointing at this package.
    pub fn repository_url(&self) -> String {
        if Path::new(&self.relative_package_dir).is_absolute() {
            self.relative_package_dir.clone()
        } else {
            format!("./{}", self.relative_package_dir)
        }
    }
}

/// Computes installation targets below a packages root.
#[derive(Debug, Clone)]
pub struct InstallationPlanner {
    base_dir: PathBuf,
    packages_root: PathBuf,
}

impl InstallationPlanner {
    pub fn new(base_dir: impl Into<PathBuf>, packages_root: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            packages_root: packages_root.into(),
        }
    }

    pub fn packages_root(&self) -> &Path {
        &self.packages_root
    }

    /// Target directories for a package. Pure: does not touch the filesystem.
    pub fn plan_target(&self, identity: &PackageIdentity) -> InstallationTarget {
        let vendor_dir = self.packages_root.join(identity.vendor());
        let package_dir = vendor_dir.join(identity.name());

        let relative = pathdiff::diff_paths(&package_dir, &self.base_dir)
            .filter(|p| !p.starts_with(".."))
            .unwrap_or_else(|| package_dir.clone());

        InstallationTarget {
            vendor_dir,
            package_dir,
            relative_package_dir: to_slash_path(&relative),
        }
    }

    /// True if the package directory already exists.
    pub fn collision_check(&self, target: &InstallationTarget) -> bool {
        target.package_dir.is_dir()
    }
}

fn to_slash_path(path: &Path) -> String {
    let joined = path
        .components()
        .filter(|c| !matches!(c, std::path::Component::CurDir))
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect::<Vec<_>>()
        .join("/");

    // RootDir renders as "/" and would double up when joined
    if path.has_root() && joined.starts_with("//") {
        joined[1..].to_string()
    } else {
        joined
    }
}
