//! Materializes an archive at its installation target.
//!
//! Archives are rooted in a directory whose name rarely matches the package
//! (`widget-main/`, `widget-1.2.0/`). The tree is extracted into a staging
//! directory next to the target, then its root is renamed into place, so the
//! package directory either appears complete or not at all.

use std::path::{Path, PathBuf};

use crate::archive::ArchiveReader;
use crate::error::{InstallError, Result};
use crate::planner::InstallationTarget;

const STAGING_PREFIX: &str = ".pkginst-";

/// What an extraction produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionReport {
    pub package_dir: PathBuf,
    /// Root directory name found in the archive
    pub archive_root: String,
    /// The vendor directory did not exist before
    pub created_vendor_dir: bool,
    /// Number of files written
    pub entries: usize,
}

pub struct Extractor;

impl Extractor {
    /// Extract `archive` so that its root directory becomes `target.package_dir`.
    pub fn extract(archive: &mut ArchiveReader, target: &InstallationTarget) -> Result<ExtractionReport> {
        let archive_root = archive.top_level_directory_name()?;
        if !archive.is_single_rooted() {
            return Err(InstallError::extraction(format!(
                "archive has entries outside its top-level directory '{}'",
                archive_root
            )));
        }

        let created_vendor_dir = ensure_dir(&target.vendor_dir)?;

        let staging = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempdir_in(&target.vendor_dir)
            .map_err(|e| InstallError::extraction_io(
                format!("creating staging directory in {}", target.vendor_dir.display()),
                e,
            ));
        let staging = match staging {
            Ok(dir) => dir,
            Err(e) => {
                remove_if_created(&target.vendor_dir, created_vendor_dir);
                return Err(e);
            }
        };

        let result = Self::extract_staged(archive, staging.path(), &archive_root, target);

        // Remove leftovers before reporting, whatever the outcome
        if let Err(e) = staging.close() {
            log::warn!("Failed to remove staging directory: {}", e);
        }

        match result {
            Ok(entries) => Ok(ExtractionReport {
                package_dir: target.package_dir.clone(),
                archive_root,
                created_vendor_dir,
                entries,
            }),
            Err(e) => {
                remove_if_created(&target.vendor_dir, created_vendor_dir);
                Err(e)
            }
        }
    }

    fn extract_staged(
        archive: &mut ArchiveReader,
        staging: &Path,
        archive_root: &str,
        target: &InstallationTarget,
    ) -> Result<usize> {
        let entries = archive.extract_all(staging)?;

        let extracted_root = staging.join(archive_root);
        if !extracted_root.is_dir() {
            return Err(InstallError::extraction(format!(
                "archive root '{}' was not extracted as a directory",
                archive_root
            )));
        }

        if target.package_dir.exists() {
            return Err(InstallError::TargetCollision {
                path: PathBuf::from(&target.relative_package_dir),
            });
        }

        std::fs::rename(&extracted_root, &target.package_dir).map_err(|e| {
            InstallError::extraction_io(
                format!("moving {} to {}", archive_root, target.package_dir.display()),
                e,
            )
        })?;

        log::debug!(
            "Moved archive root {} to {}",
            archive_root,
            target.package_dir.display()
        );

        Ok(entries)
    }
}

/// Create `dir` and its parents. Returns whether the directory is new.
fn ensure_dir(dir: &Path) -> Result<bool> {
    if dir.is_dir() {
        return Ok(false);
    }

    std::fs::create_dir_all(dir)
        .map_err(|e| InstallError::extraction_io(format!("creating {}", dir.display()), e))?;
    Ok(true)
}

fn remove_if_created(dir: &Path, created: bool) {
    if created {
        // Only succeeds while empty
        let _ = std::fs::remove_dir(dir);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::tests::write_zip;
    use crate::manifest::PackageIdentity;
    use crate::planner::InstallationPlanner;
    use tempfile::TempDir;

    fn setup(temp: &TempDir, entries: &[(&str, &str)]) -> (ArchiveReader, InstallationTarget) {
        let zip_path = temp.path().join("upload.zip");
        write_zip(&zip_path, entries);

        let planner = InstallationPlanner::new(temp.path(), temp.path().join("packages"));
        let target = planner.plan_target(&PackageIdentity::parse("acme/widget").unwrap());
        (ArchiveReader::open(&zip_path).unwrap(), target)
    }

    fn staging_dirs(dir: &Path) -> Vec<String> {
        std::fs::read_dir(dir)
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .map(|e| e.file_name().to_string_lossy().to_string())
                    .filter(|name| name.starts_with(STAGING_PREFIX))
                    .collect()
            })
            .unwrap_or_default()
    }

    #[test]
    fn test_extract_renames_root() {
        let temp = TempDir::new().unwrap();
        let (mut archive, target) = setup(
            &temp,
            &[
                ("acme-widget-main/", ""),
                ("acme-widget-main/composer.json", r#"{"name": "acme/widget"}"#),
                ("acme-widget-main/src/Widget.php", "<?php\n"),
            ],
        );

        let report = Extractor::extract(&mut archive, &target).unwrap();

        assert_eq!(report.archive_root, "acme-widget-main");
        assert!(report.created_vendor_dir);
        assert_eq!(report.entries, 2);
        assert!(target.package_dir.join("composer.json").is_file());
        assert!(target.package_dir.join("src/Widget.php").is_file());
        assert!(!target.vendor_dir.join("acme-widget-main").exists());
        assert!(staging_dirs(&target.vendor_dir).is_empty());
    }

    #[test]
    fn test_existing_vendor_dir_is_reused() {
        let temp = TempDir::new().unwrap();
        let (mut archive, target) = setup(&temp, &[("root/composer.json", "{}")]);
        std::fs::create_dir_all(target.vendor_dir.join("other")).unwrap();

        let report = Extractor::extract(&mut archive, &target).unwrap();

        assert!(!report.created_vendor_dir);
        assert!(target.vendor_dir.join("other").is_dir());
        assert!(target.package_dir.join("composer.json").is_file());
    }

    #[test]
    fn test_refuses_to_overwrite() {
        let temp = TempDir::new().unwrap();
        let (mut archive, target) = setup(&temp, &[("root/composer.json", "{}")]);
        std::fs::create_dir_all(&target.package_dir).unwrap();
        std::fs::write(target.package_dir.join("keep.txt"), "mine").unwrap();

        let err = Extractor::extract(&mut archive, &target).unwrap_err();

        assert!(matches!(err, InstallError::TargetCollision { .. }));
        assert_eq!(err.params(), vec![("path", "packages/acme/widget".to_string())]);
        assert_eq!(std::fs::read_to_string(target.package_dir.join("keep.txt")).unwrap(), "mine");
        assert!(staging_dirs(&target.vendor_dir).is_empty());
    }

    #[test]
    fn test_multi_rooted_archive_fails_without_writes() {
        let temp = TempDir::new().unwrap();
        let (mut archive, target) = setup(&temp, &[("a/composer.json", "{}"), ("b/other.txt", "")]);

        let err = Extractor::extract(&mut archive, &target).unwrap_err();

        assert!(matches!(err, InstallError::ExtractionFailure { .. }));
        assert!(!target.vendor_dir.exists());
    }

    #[test]
    fn test_failed_extraction_leaves_no_partial_package() {
        let temp = TempDir::new().unwrap();
        let (mut archive, target) = setup(
            &temp,
            &[("root/", ""), ("root/ok.txt", "fine"), ("root/../../../escape.txt", "boom")],
        );

        let err = Extractor::extract(&mut archive, &target).unwrap_err();

        assert!(matches!(err, InstallError::ExtractionFailure { .. }));
        assert!(!target.package_dir.exists());
        assert!(!target.vendor_dir.exists());
    }
}
