//! Zip archive access: open, locate and read entries, extract.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use crate::error::{InstallError, Result};

/// Largest entry [`ArchiveReader::read`] loads into memory.
pub const MAX_READ_BYTES: u64 = 4 * 1024 * 1024;

/// Resource-fork tree added by macOS Finder; never part of the package.
const METADATA_ROOT: &str = "__MACOSX/";

fn is_metadata(name: &str) -> bool {
    name.starts_with(METADATA_ROOT)
}

/// A located archive entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryRef {
    index: usize,
    name: String,
}

impl EntryRef {
    pub fn index(&self) -> usize {
        self.index
    }

    /// Full name of the entry inside the archive.
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Read access to an uploaded zip archive.
pub struct ArchiveReader {
    archive: zip::ZipArchive<BufReader<File>>,
    path: PathBuf,
}

impl ArchiveReader {
    /// Open a zip archive. Corrupt, empty or non-zip files are rejected.
    pub fn open(path: &Path) -> Result<Self> {
        let not_openable = |reason: String| InstallError::ArchiveNotOpenable {
            path: path.to_path_buf(),
            reason,
        };

        let file = File::open(path).map_err(|e| not_openable(e.to_string()))?;
        let archive = zip::ZipArchive::new(BufReader::new(file))
            .map_err(|e| not_openable(e.to_string()))?;

        log::debug!("Opened {} ({} entries)", path.display(), archive.len());

        Ok(Self {
            archive,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.archive.len()
    }

    pub fn is_empty(&self) -> bool {
        self.archive.is_empty()
    }

    /// Find an entry by file name, ignoring the directories it sits in.
    ///
    /// When several entries carry that name, the one closest to the archive
    /// root wins, so a package's own manifest beats copies bundled deeper.
    pub fn locate(&self, file_name: &str) -> Option<EntryRef> {
        let mut best: Option<(usize, EntryRef)> = None;

        for index in 0..self.archive.len() {
            let Some(name) = self.archive.name_for_index(index) else {
                continue;
            };
            if name.ends_with('/') || is_metadata(name) {
                continue;
            }

            let components: Vec<&str> = name.split('/').filter(|c| !c.is_empty()).collect();
            if components.last() != Some(&file_name) {
                continue;
            }

            let depth = components.len();
            if best.as_ref().map_or(true, |(d, _)| depth < *d) {
                best = Some((
                    depth,
                    EntryRef {
                        index,
                        name: name.to_string(),
                    },
                ));
            }
        }

        best.map(|(_, entry)| entry)
    }

    /// Read the full content of an entry, at most [`MAX_READ_BYTES`].
    pub fn read(&mut self, entry: &EntryRef) -> Result<Vec<u8>> {
        let not_readable = |reason: String| InstallError::ArchiveNotOpenable {
            path: self.path.clone(),
            reason: format!("cannot read {}: {}", entry.name, reason),
        };

        let mut file = self
            .archive
            .by_index(entry.index)
            .map_err(|e| not_readable(e.to_string()))?;

        // The declared size comes from the archive and cannot be trusted
        let declared = file.size();
        if declared > MAX_READ_BYTES {
            return Err(not_readable(format!(
                "declared size {} exceeds the {} byte limit",
                declared, MAX_READ_BYTES
            )));
        }

        let mut content = Vec::with_capacity(declared as usize);
        (&mut file)
            .take(MAX_READ_BYTES + 1)
            .read_to_end(&mut content)
            .map_err(|e| not_readable(e.to_string()))?;

        if content.len() as u64 > MAX_READ_BYTES {
            return Err(not_readable(format!("entry exceeds the {} byte limit", MAX_READ_BYTES)));
        }

        Ok(content)
    }

    /// Name of the directory the archive is rooted in (e.g. `widget-main`).
    ///
    /// Taken from the first entry, so archives without explicit directory
    /// entries work too. `__MACOSX/` entries are skipped.
    pub fn top_level_directory_name(&self) -> Result<String> {
        let first = (0..self.archive.len())
            .filter_map(|index| self.archive.name_for_index(index))
            .find(|name| !is_metadata(name))
            .ok_or_else(|| InstallError::extraction("archive is empty"))?;

        let trimmed = first.trim_end_matches('/');
        match trimmed.split_once('/') {
            Some((root, _)) if !root.is_empty() => Ok(root.to_string()),
            None if first.ends_with('/') && !trimmed.is_empty() => Ok(trimmed.to_string()),
            _ => Err(InstallError::extraction(format!(
                "archive is not rooted in a directory (first entry: {})",
                first
            ))),
        }
    }

    /// Whether every entry lives below the top-level directory.
    pub fn is_single_rooted(&self) -> bool {
        let Ok(root) = self.top_level_directory_name() else {
            return false;
        };
        let prefix = format!("{}/", root);

        (0..self.archive.len()).all(|index| {
            self.archive
                .name_for_index(index)
                .map_or(false, |name| name.starts_with(&prefix) || is_metadata(name))
        })
    }

    /// Extract every entry below `dest_dir`. Returns the number of entries written.
    pub fn extract_all(&mut self, dest_dir: &Path) -> Result<usize> {
        std::fs::create_dir_all(dest_dir)
            .map_err(|e| InstallError::extraction_io(format!("creating {}", dest_dir.display()), e))?;

        let mut written = 0;

        for index in 0..self.archive.len() {
            let mut file = self.archive.by_index(index).map_err(|e| {
                InstallError::extraction(format!("failed to read zip entry {}: {}", index, e))
            })?;
            if is_metadata(file.name()) {
                continue;
            }

            // Rejects absolute names and names escaping the destination
            let relative = file.enclosed_name().ok_or_else(|| {
                InstallError::extraction(format!("path traversal detected in archive: {}", file.name()))
            })?;
            let outpath = dest_dir.join(&relative);

            if file.is_dir() {
                std::fs::create_dir_all(&outpath)
                    .map_err(|e| InstallError::extraction_io(format!("creating {}", outpath.display()), e))?;
                continue;
            }

            if let Some(parent) = outpath.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| InstallError::extraction_io(format!("creating {}", parent.display()), e))?;
            }

            let mut outfile = File::create(&outpath)
                .map_err(|e| InstallError::extraction_io(format!("writing {}", outpath.display()), e))?;
            std::io::copy(&mut file, &mut outfile)
                .map_err(|e| InstallError::extraction_io(format!("writing {}", outpath.display()), e))?;

            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                if let Some(mode) = file.unix_mode() {
                    std::fs::set_permissions(&outpath, std::fs::Permissions::from_mode(mode))
                        .map_err(|e| InstallError::extraction_io(format!("chmod {}", outpath.display()), e))?;
                }
            }

            written += 1;
        }

        log::debug!("Extracted {} files from {} into {}", written, self.path.display(), dest_dir.display());
        Ok(written)
    }

    /// Release the archive handle.
    pub fn close(self) {
        log::trace!("Closed {}", self.path.display());
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;
    use zip::write::SimpleFileOptions;

    /// Build a zip at `path` from `(name, content)` pairs; names ending in `/` become directories.
    pub(crate) fn write_zip(path: &Path, entries: &[(&str, &str)]) {
        let file = File::create(path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        let options = SimpleFileOptions::default();

        for (name, content) in entries {
            if name.ends_with('/') {
                writer.add_directory(name.trim_end_matches('/'), options).unwrap();
            } else {
                writer.start_file(*name, options).unwrap();
                writer.write_all(content.as_bytes()).unwrap();
            }
        }

        writer.finish().unwrap();
    }

    fn widget_zip(temp: &TempDir) -> PathBuf {
        let path = temp.path().join("widget.zip");
        write_zip(
            &path,
            &[
                ("acme-widget-main/", ""),
                ("acme-widget-main/composer.json", r#"{"name": "acme/widget"}"#),
                ("acme-widget-main/src/", ""),
                ("acme-widget-main/src/Widget.php", "<?php\n"),
                ("acme-widget-main/vendor/other/lib/composer.json", r#"{"name": "other/lib"}"#),
            ],
        );
        path
    }

    #[test]
    fn test_open_rejects_garbage() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("broken.zip");
        std::fs::write(&path, "definitely not a zip").unwrap();

        let err = ArchiveReader::open(&path).err().unwrap();
        assert!(matches!(err, InstallError::ArchiveNotOpenable { .. }));
    }

    #[test]
    fn test_open_rejects_zero_length() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("empty.zip");
        std::fs::write(&path, "").unwrap();

        assert!(ArchiveReader::open(&path).is_err());
    }

    #[test]
    fn test_locate_prefers_shallowest() {
        let temp = TempDir::new().unwrap();
        let mut reader = ArchiveReader::open(&widget_zip(&temp)).unwrap();

        let entry = reader.locate("composer.json").unwrap();
        assert_eq!(entry.name(), "acme-widget-main/composer.json");

        let content = reader.read(&entry).unwrap();
        assert_eq!(content, br#"{"name": "acme/widget"}"#);

        assert!(reader.locate("package.json").is_none());
    }

    #[test]
    fn test_locate_ignores_directories() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("dir.zip");
        write_zip(&path, &[("root/", ""), ("root/composer.json/", "")]);

        let reader = ArchiveReader::open(&path).unwrap();
        assert!(reader.locate("composer.json").is_none());
    }

    #[test]
    fn test_top_level_directory_name() {
        let temp = TempDir::new().unwrap();
        let reader = ArchiveReader::open(&widget_zip(&temp)).unwrap();
        assert_eq!(reader.top_level_directory_name().unwrap(), "acme-widget-main");
        assert!(reader.is_single_rooted());
    }

    #[test]
    fn test_top_level_without_directory_entries() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("flat.zip");
        write_zip(&path, &[("widget/composer.json", "{}"), ("widget/README.md", "")]);

        let reader = ArchiveReader::open(&path).unwrap();
        assert_eq!(reader.top_level_directory_name().unwrap(), "widget");
        assert!(reader.is_single_rooted());
    }

    #[test]
    fn test_multiple_roots_detected() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("multi.zip");
        write_zip(&path, &[("a/composer.json", "{}"), ("b/README.md", "")]);

        let reader = ArchiveReader::open(&path).unwrap();
        assert!(!reader.is_single_rooted());

        let path = temp.path().join("rootfile.zip");
        write_zip(&path, &[("composer.json", "{}")]);
        let reader = ArchiveReader::open(&path).unwrap();
        assert!(reader.top_level_directory_name().is_err());
    }

    #[test]
    fn test_macos_metadata_root_is_ignored() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("finder.zip");
        write_zip(
            &path,
            &[
                ("__MACOSX/", ""),
                ("__MACOSX/widget/._composer.json", "resource fork"),
                ("widget/", ""),
                ("widget/composer.json", r#"{"name": "acme/widget"}"#),
                ("__MACOSX/widget/._README.md", "resource fork"),
                ("widget/README.md", "# Widget\n"),
            ],
        );

        let mut reader = ArchiveReader::open(&path).unwrap();
        assert_eq!(reader.top_level_directory_name().unwrap(), "widget");
        assert!(reader.is_single_rooted());
        assert_eq!(reader.locate("composer.json").unwrap().name(), "widget/composer.json");

        let dest = temp.path().join("out");
        assert_eq!(reader.extract_all(&dest).unwrap(), 2);
        assert!(dest.join("widget/README.md").is_file());
        assert!(!dest.join("__MACOSX").exists());
    }

    #[test]
    fn test_read_rejects_entry_over_limit() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("big.zip");
        let padding = " ".repeat(MAX_READ_BYTES as usize + 1);
        write_zip(&path, &[("root/", ""), ("root/composer.json", &padding)]);

        let mut reader = ArchiveReader::open(&path).unwrap();
        let entry = reader.locate("composer.json").unwrap();
        let err = reader.read(&entry).unwrap_err();
        assert!(matches!(err, InstallError::ArchiveNotOpenable { .. }));
    }

    /// Single stored `root/composer.json` whose zip64 fields claim `declared` bytes.
    fn zip64_lying_about_size(declared: u64) -> Vec<u8> {
        let name = b"root/composer.json";
        let data = b"{}";
        let mut zip64_extra = Vec::new();
        zip64_extra.extend_from_slice(&1u16.to_le_bytes());
        zip64_extra.extend_from_slice(&16u16.to_le_bytes());
        zip64_extra.extend_from_slice(&declared.to_le_bytes());
        zip64_extra.extend_from_slice(&declared.to_le_bytes());

        let mut out = Vec::new();
        out.extend_from_slice(&0x04034b50u32.to_le_bytes());
        out.extend_from_slice(&45u16.to_le_bytes()); // version needed
        out.extend_from_slice(&0u16.to_le_bytes()); // flags
        out.extend_from_slice(&0u16.to_le_bytes()); // stored
        out.extend_from_slice(&0u16.to_le_bytes()); // time
        out.extend_from_slice(&0x21u16.to_le_bytes()); // 1980-01-01
        out.extend_from_slice(&0u32.to_le_bytes()); // crc32
        out.extend_from_slice(&u32::MAX.to_le_bytes());
        out.extend_from_slice(&u32::MAX.to_le_bytes());
        out.extend_from_slice(&(name.len() as u16).to_le_bytes());
        out.extend_from_slice(&(zip64_extra.len() as u16).to_le_bytes());
        out.extend_from_slice(name);
        out.extend_from_slice(&zip64_extra);
        out.extend_from_slice(data);

        let central_offset = out.len() as u32;
        out.extend_from_slice(&0x02014b50u32.to_le_bytes());
        out.extend_from_slice(&45u16.to_le_bytes()); // made by
        out.extend_from_slice(&45u16.to_le_bytes()); // needed
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&0x21u16.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&u32::MAX.to_le_bytes());
        out.extend_from_slice(&u32::MAX.to_le_bytes());
        out.extend_from_slice(&(name.len() as u16).to_le_bytes());
        out.extend_from_slice(&(zip64_extra.len() as u16).to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes()); // comment
        out.extend_from_slice(&0u16.to_le_bytes()); // disk
        out.extend_from_slice(&0u16.to_le_bytes()); // internal attrs
        out.extend_from_slice(&0u32.to_le_bytes()); // external attrs
        out.extend_from_slice(&0u32.to_le_bytes()); // local header offset
        out.extend_from_slice(name);
        out.extend_from_slice(&zip64_extra);
        let central_size = out.len() as u32 - central_offset;

        out.extend_from_slice(&0x06054b50u32.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&1u16.to_le_bytes());
        out.extend_from_slice(&1u16.to_le_bytes());
        out.extend_from_slice(&central_size.to_le_bytes());
        out.extend_from_slice(&central_offset.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out
    }

    #[test]
    fn test_huge_declared_size_is_an_error_not_a_crash() {
        let temp = TempDir::new().unwrap();

        for declared in [u64::MAX / 2 + 10, 3 * 1024 * 1024 * 1024] {
            let path = temp.path().join("zip64.zip");
            std::fs::write(&path, zip64_lying_about_size(declared)).unwrap();

            // Depending on how far the zip reader gets, the failure shows up
            // while opening, locating or reading; it must never panic
            let err = match ArchiveReader::open(&path) {
                Err(e) => e,
                Ok(mut reader) => match reader.locate("composer.json") {
                    None => continue,
                    Some(entry) => reader.read(&entry).unwrap_err(),
                },
            };
            assert!(matches!(err, InstallError::ArchiveNotOpenable { .. }), "{:?}", err);
        }
    }

    #[test]
    fn test_extract_all() {
        let temp = TempDir::new().unwrap();
        let mut reader = ArchiveReader::open(&widget_zip(&temp)).unwrap();
        let dest = temp.path().join("out");

        let written = reader.extract_all(&dest).unwrap();
        assert_eq!(written, 3);
        assert!(dest.join("acme-widget-main/src/Widget.php").is_file());
        assert!(dest.join("acme-widget-main/composer.json").is_file());
        reader.close();
    }

    #[test]
    fn test_extract_rejects_traversal() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("evil.zip");
        write_zip(&path, &[("root/", ""), ("root/../../escape.txt", "boom")]);

        let mut reader = ArchiveReader::open(&path).unwrap();
        let err = reader.extract_all(&temp.path().join("out")).unwrap_err();
        assert!(matches!(err, InstallError::ExtractionFailure { .. }));
        assert!(!temp.path().join("escape.txt").exists());
    }
}
